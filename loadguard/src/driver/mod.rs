//! Pipeline Driver
//!
//! Loads a module, runs a pass pipeline over it and writes the result:
//!
//! ```text
//! LIR text / JSON → Module → verify → passes (verify each) → text / JSON
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::Result;
use crate::instrument::LoadChecker;
use crate::interp::{run_module, InterpConfig, RunOutcome};
use crate::ir::{format_module, verify_module, Module};
use crate::parser::parse_module;
use crate::pass::{PassManager, PassRegistry, PassStats};

/// Output format for a transformed module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum EmitFormat {
    /// LIR text
    #[default]
    Text,
    /// serde_json rendition of the module graph
    Json,
}

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Input module, LIR text or `.json`
    pub input: PathBuf,
    /// Output file; None leaves the result in the report only
    pub output: Option<PathBuf>,
    /// Comma-separated pass names
    pub passes: String,
    /// Verify the input, and the module after every pass that changes it
    pub verify: bool,
    pub emit: EmitFormat,
    /// Verbose output
    pub verbose: bool,
}

impl PipelineConfig {
    /// Create a pipeline configuration with defaults
    pub fn new(input: PathBuf) -> Self {
        Self {
            input,
            output: None,
            passes: LoadChecker::PASS_NAME.to_string(),
            verify: true,
            emit: EmitFormat::Text,
            verbose: false,
        }
    }

    pub fn output(mut self, path: PathBuf) -> Self {
        self.output = Some(path);
        self
    }

    pub fn passes(mut self, pipeline: impl Into<String>) -> Self {
        self.passes = pipeline.into();
        self
    }

    pub fn verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    pub fn emit(mut self, format: EmitFormat) -> Self {
        self.emit = format;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

/// What a pipeline run produced
#[derive(Debug)]
pub struct PipelineReport {
    pub module: Module,
    pub stats: PassStats,
    /// The module rendered in the requested format
    pub emitted: String,
    pub loads_before: usize,
    pub loads_after: usize,
}

/// True if `path` names a JSON module
pub fn is_json_path(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

/// Decode a module; the format is chosen by the path's extension
pub fn load_module(path: &Path, source: &str) -> Result<Module> {
    if is_json_path(path) {
        Ok(serde_json::from_str(source)?)
    } else {
        parse_module(source)
    }
}

/// Render a module in `format`
pub fn emit_module(module: &Module, format: EmitFormat) -> Result<String> {
    match format {
        EmitFormat::Text => Ok(format_module(module)),
        EmitFormat::Json => {
            let mut out = serde_json::to_string_pretty(module)?;
            out.push('\n');
            Ok(out)
        }
    }
}

/// Run the configured pipeline
pub fn run_pipeline(config: &PipelineConfig) -> Result<PipelineReport> {
    let source = fs::read_to_string(&config.input)?;
    let mut module = load_module(&config.input, &source)?;

    if config.verbose {
        eprintln!("Loaded: {} ({} functions)", config.input.display(), module.functions.len());
    }

    if config.verify {
        verify_module(&module)?;
    }

    let mut manager = PassRegistry::with_builtin_passes().parse_pipeline(&config.passes)?;
    manager.set_verify_each(config.verify);

    let loads_before = module.count_loads();
    let stats = manager.run(&mut module)?;
    let loads_after = module.count_loads();

    if config.verbose {
        eprintln!("  Ran {} pass(es): {}", stats.runs, manager.pass_names().join(", "));
    }

    let emitted = emit_module(&module, config.emit)?;
    if let Some(path) = &config.output {
        fs::write(path, &emitted)?;
        if config.verbose {
            eprintln!("  Wrote {}", path.display());
        }
    }

    info!(input = %config.input.display(), loads = loads_before, "pipeline complete");
    Ok(PipelineReport {
        module,
        stats,
        emitted,
        loads_before,
        loads_after,
    })
}

/// Load `path`, optionally instrument it, and execute it
pub fn run_file(path: &Path, instrument: bool, config: InterpConfig) -> Result<RunOutcome> {
    let source = fs::read_to_string(path)?;
    let mut module = load_module(path, &source)?;

    if instrument {
        let mut manager = PassManager::new();
        manager.add_pass(Box::new(LoadChecker::new()));
        manager.set_verify_each(true);
        manager.run(&mut module)?;
    }

    Ok(run_module(&module, config))
}
