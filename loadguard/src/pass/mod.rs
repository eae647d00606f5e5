//! Module Pass Infrastructure
//!
//! Passes transform a whole [`Module`] in place and report which analyses
//! survive. A [`PassManager`] runs an ordered list of passes, optionally
//! verifying the module after each one, and a [`PassRegistry`] turns a
//! textual pipeline such as `"load-checker"` into a manager.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::instrument::LoadChecker;
use crate::ir::{verify_module, Module};

/// Module pass trait
pub trait ModulePass {
    /// Name of the pass, as used in pipeline strings
    fn name(&self) -> &'static str;

    /// Run the pass on a module
    fn run_on_module(&self, module: &mut Module) -> Result<PreservedAnalyses>;
}

/// Which previously computed analyses are still valid after a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreservedAnalyses {
    /// Nothing changed
    All,
    /// The module was mutated
    None,
}

impl PreservedAnalyses {
    pub fn from_changed(changed: bool) -> Self {
        if changed { Self::None } else { Self::All }
    }

    pub fn changed(self) -> bool {
        self == Self::None
    }
}

/// Ordered pass pipeline
pub struct PassManager {
    passes: Vec<Box<dyn ModulePass>>,
    verify_each: bool,
}

impl PassManager {
    pub fn new() -> Self {
        Self {
            passes: Vec::new(),
            verify_each: false,
        }
    }

    pub fn add_pass(&mut self, pass: Box<dyn ModulePass>) {
        self.passes.push(pass);
    }

    /// Verify the module after every pass that changed it
    pub fn set_verify_each(&mut self, verify: bool) {
        self.verify_each = verify;
    }

    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Run all passes once, in order
    pub fn run(&self, module: &mut Module) -> Result<PassStats> {
        let mut stats = PassStats::new();

        for pass in &self.passes {
            debug!(pass = pass.name(), module = %module.name, "running pass");
            let preserved = pass.run_on_module(module)?;
            stats.record_run(pass.name(), preserved);

            if preserved.changed() && self.verify_each {
                verify_module(module)?;
            }
        }

        info!(passes = stats.runs, changed = stats.changed(), "pipeline finished");
        Ok(stats)
    }
}

impl Default for PassManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics from a pipeline run
#[derive(Debug, Default)]
pub struct PassStats {
    /// Number of pass executions
    pub runs: usize,
    /// Passes that changed the module, with how often they did
    pub pass_counts: HashMap<String, usize>,
}

impl PassStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_run(&mut self, name: &str, preserved: PreservedAnalyses) {
        self.runs += 1;
        if preserved.changed() {
            *self.pass_counts.entry(name.to_string()).or_insert(0) += 1;
        }
    }

    /// True if any pass mutated the module
    pub fn changed(&self) -> bool {
        !self.pass_counts.is_empty()
    }
}

type PassFactory = fn() -> Box<dyn ModulePass>;

struct RegisteredPass {
    name: &'static str,
    description: &'static str,
    factory: PassFactory,
}

/// Pipeline-name to pass lookup
pub struct PassRegistry {
    passes: Vec<RegisteredPass>,
}

impl PassRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    /// Registry with every pass this crate provides
    pub fn with_builtin_passes() -> Self {
        let mut registry = Self::new();
        registry.register(
            LoadChecker::PASS_NAME,
            "guard every load with a run-time null pointer check",
            || -> Box<dyn ModulePass> { Box::new(LoadChecker::new()) },
        );
        registry
    }

    pub fn register(&mut self, name: &'static str, description: &'static str, factory: PassFactory) {
        self.passes.retain(|p| p.name != name);
        self.passes.push(RegisteredPass {
            name,
            description,
            factory,
        });
    }

    pub fn create(&self, name: &str) -> Option<Box<dyn ModulePass>> {
        self.passes.iter().find(|p| p.name == name).map(|p| (p.factory)())
    }

    /// (name, description) of every registered pass
    pub fn list(&self) -> Vec<(&'static str, &'static str)> {
        self.passes.iter().map(|p| (p.name, p.description)).collect()
    }

    /// Build a manager from a comma-separated pipeline string
    pub fn parse_pipeline(&self, pipeline: &str) -> Result<PassManager> {
        let mut manager = PassManager::new();
        for name in pipeline.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let pass = self.create(name).ok_or_else(|| Error::UnknownPass {
                name: name.to_string(),
            })?;
            manager.add_pass(pass);
        }
        Ok(manager)
    }
}

impl Default for PassRegistry {
    fn default() -> Self {
        Self::with_builtin_passes()
    }
}
