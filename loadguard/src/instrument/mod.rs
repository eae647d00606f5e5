//! Null-Load Instrumentation
//!
//! Guards every `load` with a run-time null check. Before each load the
//! pass inserts
//!
//! ```text
//! %isnull = icmp eq T* %addr, null
//! call void @nullChecker_L_C(i1 %isnull)
//! ```
//!
//! where the guard prints a location-specific diagnostic and exits with
//! status 1 when its argument is true. Loads sharing a source location
//! share one guard. Loads without a location share the unsuffixed
//! `nullChecker`.
//!
//! Running the pass twice adds a second comparison and call before every
//! original load. Guards and diagnostics are reused by name, so symbols are
//! never duplicated.

mod guard;
mod rewrite;
mod scan;

pub use guard::{
    exit_signature, guard_signature, message_type, printf_signature, GuardEntry, GuardSynthesizer,
    ResolvedGuard,
};
pub use rewrite::rewrite_site;
pub use scan::{scan_loads, LoadSite};

use std::collections::{HashMap, HashSet};
use std::fmt;

use thiserror::Error;
use tracing::{debug, info};

use crate::error::Result;
use crate::ir::{BlockId, BuildError, FuncId, InsertPoint, IrBuilder, Module, SourceLoc};
use crate::pass::{ModulePass, PreservedAnalyses};

/// Guard function name prefix
pub const GUARD_PREFIX: &str = "nullChecker";
/// Diagnostic global name prefix
pub const MESSAGE_PREFIX: &str = "ErrorMsg";
pub const PRINTF_SYMBOL: &str = "printf";
pub const EXIT_SYMBOL: &str = "exit";
/// Status passed to `exit` by a failing guard
pub const EXIT_CODE: i64 = 1;

/// Identity of a guard: the source location of the loads it protects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocationKey(Option<SourceLoc>);

impl LocationKey {
    pub fn new(loc: Option<SourceLoc>) -> Self {
        Self(loc)
    }

    pub fn loc(&self) -> Option<SourceLoc> {
        self.0
    }

    fn suffix(&self) -> String {
        match self.0 {
            Some(loc) => format!("_{}_{}", loc.line, loc.col),
            None => String::new(),
        }
    }

    /// `nullChecker_L_C`, or `nullChecker` without a location
    pub fn guard_name(&self) -> String {
        format!("{GUARD_PREFIX}{}", self.suffix())
    }

    /// `ErrorMsg_L_C`, or `ErrorMsg` without a location
    pub fn message_name(&self) -> String {
        format!("{MESSAGE_PREFIX}{}", self.suffix())
    }

    /// Diagnostic text, without the trailing NUL
    pub fn message(&self) -> String {
        match self.0 {
            Some(loc) => format!(
                "Trying to load a NULL pointer at line {}, col {}. Exiting early.\n",
                loc.line, loc.col
            ),
            None => "Trying to load a NULL pointer. Exiting early.\n".to_string(),
        }
    }
}

impl fmt::Display for LocationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(loc) => write!(f, "{}:{}", loc.line, loc.col),
            None => write!(f, "<unknown>"),
        }
    }
}

/// Instrumentation failure. The module is left untouched except for `Build`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InstrumentError {
    #[error("load in `@{function}` reads through `{ty}`, which is not a pointer")]
    NonPointerAddress { function: String, ty: String },

    #[error("existing function `@{name}` has signature `{found}`, expected `{expected}`")]
    SignatureConflict {
        name: String,
        expected: String,
        found: String,
    },

    #[error("existing global `@{name}` has type `{found}`, expected `{expected}`")]
    GlobalConflict {
        name: String,
        expected: String,
        found: String,
    },

    #[error(transparent)]
    Build(#[from] BuildError),
}

/// What one instrumentation run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstrumentReport {
    pub loads_instrumented: usize,
    pub guards_created: usize,
    /// Resolutions served by a guard that already existed
    pub guards_reused: usize,
    pub declared_printf: bool,
    pub declared_exit: bool,
}

impl InstrumentReport {
    pub fn changed(&self) -> bool {
        self.loads_instrumented > 0
    }
}

/// Instrument every load in `module`
pub fn instrument_module(module: &mut Module) -> std::result::Result<InstrumentReport, InstrumentError> {
    let sites = scan_loads(module);
    if sites.is_empty() {
        debug!(module = %module.name, "no loads to instrument");
        return Ok(InstrumentReport::default());
    }

    if let Some(site) = sites.iter().find(|s| !s.addr.ty.is_pointer()) {
        return Err(InstrumentError::NonPointerAddress {
            function: module.function(site.func).name.clone(),
            ty: site.addr.ty.to_string(),
        });
    }
    let keys: HashSet<LocationKey> = sites.iter().map(LoadSite::key).collect();
    guard::check_existing_symbols(module, &keys)?;

    let mut builder = IrBuilder::new(module);
    let mut guards = GuardSynthesizer::new();
    // instructions already inserted ahead of later sites in the same block
    let mut shifted: HashMap<(FuncId, BlockId), usize> = HashMap::new();
    let mut report = InstrumentReport::default();

    for site in &sites {
        let resolved = guards.resolve(&mut builder, site.key())?;

        let shift = shifted.entry((site.func, site.block)).or_insert(0);
        let point = InsertPoint {
            index: site.index + *shift,
            ..site.insert_point()
        };
        *shift += rewrite_site(&mut builder, site, point, resolved.entry.func)?;
        report.loads_instrumented += 1;
    }

    report.guards_created = guards.created;
    report.guards_reused = guards.reused;
    report.declared_printf = guards.declared_printf;
    report.declared_exit = guards.declared_exit;
    Ok(report)
}

/// The null-load checking pass
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadChecker;

impl LoadChecker {
    pub const PASS_NAME: &'static str = "load-checker";

    pub fn new() -> Self {
        Self
    }

    /// Run the pass and return the full report
    pub fn instrument(&self, module: &mut Module) -> std::result::Result<InstrumentReport, InstrumentError> {
        let report = instrument_module(module)?;
        info!(
            module = %module.name,
            loads = report.loads_instrumented,
            guards = report.guards_created,
            reused = report.guards_reused,
            "instrumented loads"
        );
        Ok(report)
    }
}

impl ModulePass for LoadChecker {
    fn name(&self) -> &'static str {
        Self::PASS_NAME
    }

    fn run_on_module(&self, module: &mut Module) -> Result<PreservedAnalyses> {
        let report = self.instrument(module)?;
        Ok(PreservedAnalyses::from_changed(report.changed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{format_module, verify_module, FnAttr, InstKind, Terminator, Type, Value};
    use crate::parser::parse_module;

    const SHARED_LOCATION: &str = r#"; ModuleID = 'shared'

define i32 @sum(i32* %a, i32* %b) {
entry:
  %x = load i32, i32* %a, !loc(3, 9)
  %y = load i32, i32* %b, !loc(3, 9)
  %s = add i32 %x, %y
  %z = load i32, i32* %a
  ret i32 %s
}

define i8 @first(i8* %s) {
entry:
  %c = load i8, i8* %s, !loc(7, 12)
  %d = load i8, i8* %s
  ret i8 %c
}
"#;

    fn count_calls_to(module: &Module, name: &str) -> usize {
        module
            .functions
            .iter()
            .flat_map(|f| &f.blocks)
            .flat_map(|b| &b.instructions)
            .filter(|i| matches!(&i.kind, InstKind::Call { callee, .. } if callee == name))
            .count()
    }

    #[test]
    fn test_location_key_names() {
        let key = LocationKey::new(Some(SourceLoc::new(12, 5)));
        assert_eq!(key.guard_name(), "nullChecker_12_5");
        assert_eq!(key.message_name(), "ErrorMsg_12_5");
        assert_eq!(key.message(), "Trying to load a NULL pointer at line 12, col 5. Exiting early.\n");
        assert_eq!(key.to_string(), "12:5");

        let none = LocationKey::new(None);
        assert_eq!(none.guard_name(), "nullChecker");
        assert_eq!(none.message_name(), "ErrorMsg");
        assert_eq!(none.message(), "Trying to load a NULL pointer. Exiting early.\n");
    }

    #[test]
    fn test_empty_module_unchanged() {
        let mut module = parse_module("define void @f() {\nentry:\n  ret void\n}\n").unwrap();
        let before = module.clone();
        let report = instrument_module(&mut module).unwrap();
        assert!(!report.changed());
        assert_eq!(module, before);
        assert_eq!(
            LoadChecker::new().run_on_module(&mut module).unwrap(),
            PreservedAnalyses::All
        );
    }

    #[test]
    fn test_every_load_guarded() {
        let mut module = parse_module(SHARED_LOCATION).unwrap();
        let report = instrument_module(&mut module).unwrap();
        assert_eq!(report.loads_instrumented, 5);
        assert_eq!(module.count_loads(), 5);

        for func in module.functions.iter().filter(|f| !f.name.starts_with(GUARD_PREFIX)) {
            for block in &func.blocks {
                for (i, inst) in block.instructions.iter().enumerate() {
                    let InstKind::Load { addr, .. } = &inst.kind else { continue };
                    let InstKind::ICmp { dest, rhs, lhs, .. } = &block.instructions[i - 2].kind else {
                        panic!("no comparison before load in @{}", func.name);
                    };
                    assert_eq!(lhs, addr);
                    assert_eq!(rhs.value, Value::Null);
                    let InstKind::Call { callee, args, ret_ty, .. } = &block.instructions[i - 1].kind else {
                        panic!("no guard call before load in @{}", func.name);
                    };
                    assert_eq!(*callee, LocationKey::new(inst.loc).guard_name());
                    assert_eq!(*ret_ty, Type::Void);
                    assert_eq!(args[0].value, Value::Local(dest.clone()));
                    assert_eq!(block.instructions[i - 1].loc, inst.loc);
                }
            }
        }
        assert_eq!(verify_module(&module), Ok(()));
    }

    #[test]
    fn test_loads_share_guard_per_location() {
        let mut module = parse_module(SHARED_LOCATION).unwrap();
        let report = instrument_module(&mut module).unwrap();
        assert_eq!(report.guards_created, 3);
        assert_eq!(report.guards_reused, 2);
        assert!(report.declared_printf && report.declared_exit);

        assert_eq!(count_calls_to(&module, "nullChecker_3_9"), 2);
        assert_eq!(count_calls_to(&module, "nullChecker_7_12"), 1);
        assert!(module.find_global("ErrorMsg_3_9").is_some());
        assert_eq!(module.globals.len(), 3);
    }

    #[test]
    fn test_unlocated_loads_share_one_guard() {
        let mut module = parse_module(SHARED_LOCATION).unwrap();
        instrument_module(&mut module).unwrap();
        // one unlocated load in @sum, one in @first
        assert_eq!(count_calls_to(&module, "nullChecker"), 2);
        assert_eq!(module.functions.iter().filter(|f| f.name == "nullChecker").count(), 1);
        assert_eq!(module.globals.iter().filter(|g| g.name == "ErrorMsg").count(), 1);
    }

    #[test]
    fn test_existing_guard_reused_without_message() {
        let source = "define void @nullChecker(i1 %c) {\n\
            entry:\n\
            \x20 ret void\n\
            }\n\n\
            define i32 @f(i32* %p) {\n\
            entry:\n\
            \x20 %v = load i32, i32* %p\n\
            \x20 %w = load i32, i32* %p\n\
            \x20 ret i32 %v\n\
            }\n";
        let mut module = parse_module(source).unwrap();
        let report = instrument_module(&mut module).unwrap();

        assert_eq!(report.loads_instrumented, 2);
        assert_eq!(report.guards_created, 0);
        assert_eq!(report.guards_reused, 2);
        assert!(!report.declared_printf && !report.declared_exit);
        assert_eq!(count_calls_to(&module, "nullChecker"), 2);
        let guard = module.function(module.find_function("nullChecker").unwrap());
        assert_eq!(guard.params[0].name, "c");
        assert_eq!(guard.blocks.len(), 1);
        assert!(module.globals.is_empty());
        assert_eq!(module.functions.len(), 2);
        assert_eq!(verify_module(&module), Ok(()));
    }

    #[test]
    fn test_runtime_symbols_declared_once() {
        let mut module = parse_module(SHARED_LOCATION).unwrap();
        instrument_module(&mut module).unwrap();
        assert_eq!(module.functions.iter().filter(|f| f.name == PRINTF_SYMBOL).count(), 1);
        assert_eq!(module.functions.iter().filter(|f| f.name == EXIT_SYMBOL).count(), 1);

        let printf = module.function(module.find_function(PRINTF_SYMBOL).unwrap());
        assert_eq!(printf.signature(), printf_signature());
        assert!(printf.has_attr(FnAttr::NoUnwind));
        let exit = module.function(module.find_function(EXIT_SYMBOL).unwrap());
        assert_eq!(exit.signature(), exit_signature());
    }

    #[test]
    fn test_guard_calls_printf_then_exit() {
        let mut module = parse_module(SHARED_LOCATION).unwrap();
        instrument_module(&mut module).unwrap();
        let guard = module.function(module.find_function("nullChecker_7_12").unwrap());
        let failure = &guard.blocks[1];
        let callees: Vec<_> = failure
            .instructions
            .iter()
            .filter_map(|i| match &i.kind {
                InstKind::Call { callee, args, .. } => Some((callee.as_str(), args.len())),
                _ => None,
            })
            .collect();
        assert_eq!(callees, vec![("printf", 1), ("exit", 1)]);
        assert!(matches!(guard.blocks[0].terminator, Some(Terminator::CondBr { .. })));
    }

    #[test]
    fn test_rerun_adds_calls_but_no_symbols() {
        let mut module = parse_module(SHARED_LOCATION).unwrap();
        instrument_module(&mut module).unwrap();
        let functions = module.functions.len();
        let globals = module.globals.len();

        let report = instrument_module(&mut module).unwrap();
        assert_eq!(report.loads_instrumented, 5);
        assert_eq!(report.guards_created, 0);
        assert!(!report.declared_printf && !report.declared_exit);
        assert_eq!(module.functions.len(), functions);
        assert_eq!(module.globals.len(), globals);
        assert_eq!(count_calls_to(&module, "nullChecker_3_9"), 4);
        assert_eq!(verify_module(&module), Ok(()));
    }

    #[test]
    fn test_non_pointer_address_rejected() {
        let mut module = Module::new("bad");
        let mut func = crate::ir::Function::new("f", vec![crate::ir::Param::new("x", Type::I32)], Type::I32);
        let mut entry = crate::ir::BasicBlock::new("entry");
        entry.instructions.push(crate::ir::Instruction::new(InstKind::Load {
            dest: "v".to_string(),
            ty: Type::I32,
            addr: crate::ir::Operand::local(Type::I32, "x"),
        }));
        entry.terminator = Some(Terminator::Ret(Some(crate::ir::Operand::local(Type::I32, "v"))));
        func.blocks.push(entry);
        module.add_function(func);
        let before = module.clone();

        let err = instrument_module(&mut module).unwrap_err();
        assert_eq!(
            err,
            InstrumentError::NonPointerAddress {
                function: "f".to_string(),
                ty: "i32".to_string()
            }
        );
        assert_eq!(module, before);
    }

    #[test]
    fn test_conflicting_printf_leaves_module_untouched() {
        let source = "declare void @printf(i8*)\n\ndefine i8 @f(i8* %s) {\nentry:\n  %c = load i8, i8* %s\n  ret i8 %c\n}\n";
        let mut module = parse_module(source).unwrap();
        let before = module.clone();
        let err = instrument_module(&mut module).unwrap_err();
        assert!(matches!(err, InstrumentError::SignatureConflict { ref name, .. } if name == "printf"));
        assert_eq!(module, before);
    }

    #[test]
    fn test_pass_reports_change() {
        let mut module = parse_module(SHARED_LOCATION).unwrap();
        let pass = LoadChecker::new();
        assert_eq!(pass.name(), "load-checker");
        assert_eq!(pass.run_on_module(&mut module).unwrap(), PreservedAnalyses::None);
    }

    #[test]
    fn test_instrumented_module_text() {
        let mut module = parse_module(
            "; ModuleID = 'snapshot'\n\ndefine i32 @read(i32* %p) {\nentry:\n  %v = load i32, i32* %p, !loc(4, 12)\n  ret i32 %v\n}\n",
        )
        .unwrap();
        instrument_module(&mut module).unwrap();
        insta::assert_snapshot!(format_module(&module), @r#"
        ; ModuleID = 'snapshot'

        @ErrorMsg_4_12 = constant [65 x i8] c"Trying to load a NULL pointer at line 4, col 12. Exiting early.\0A\00"

        define i32 @read(i32* %p) {
        entry:
          %isnull = icmp eq i32* %p, null, !loc(4, 12)
          call void @nullChecker_4_12(i1 %isnull), !loc(4, 12)
          %v = load i32, i32* %p, !loc(4, 12)
          ret i32 %v
        }

        define void @nullChecker_4_12(i1 %cond) {
        enter:
          br i1 %cond, label %is_null, label %ret
        is_null:
          %msg = bitcast [65 x i8]* @ErrorMsg_4_12 to i8*
          call i32 @printf(i8* %msg)
          call void @exit(i32 1)
          br label %ret
        ret:
          ret void
        }

        declare i32 @printf(i8* nocapture readonly, ...) nounwind

        declare void @exit(i32) noreturn
        "#);
    }
}
