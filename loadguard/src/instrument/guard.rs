//! Guard-function synthesis
//!
//! A guard is `void nullChecker[_L_C](i1 %cond)`:
//!
//! ```text
//! enter:   br i1 %cond, label %is_null, label %ret
//! is_null: printf(ErrorMsg[_L_C]); exit(1); br label %ret
//! ret:     ret void
//! ```
//!
//! One guard and one diagnostic global exist per location key. The
//! synthesizer caches them by key and falls back to a lookup by name so a
//! module instrumented by an earlier run keeps its guards. A guard found by
//! name is used as is, whatever its body and whether or not its diagnostic
//! global exists.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::ir::{
    FnAttr, FuncId, Function, Global, GlobalId, Initializer, IrBuilder, Module, Operand, Param,
    ParamAttr, Signature, Type,
};

use super::{InstrumentError, LocationKey, EXIT_CODE, EXIT_SYMBOL, PRINTF_SYMBOL};

/// A guard function and the diagnostic it prints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardEntry {
    pub func: FuncId,
    /// None for a guard found by name without its diagnostic global
    pub message: Option<GlobalId>,
}

/// Result of resolving a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedGuard {
    pub entry: GuardEntry,
    /// True if the guard was synthesized by this call
    pub created: bool,
}

/// `void (i1)`
pub fn guard_signature() -> Signature {
    Signature {
        ret_ty: Type::Void,
        params: vec![Type::I1],
        is_var_arg: false,
    }
}

/// `i32 (i8*, ...)`
pub fn printf_signature() -> Signature {
    Signature {
        ret_ty: Type::I32,
        params: vec![Type::byte_ptr()],
        is_var_arg: true,
    }
}

/// `void (i32)`
pub fn exit_signature() -> Signature {
    Signature {
        ret_ty: Type::Void,
        params: vec![Type::I32],
        is_var_arg: false,
    }
}

/// Type of the diagnostic global for `key`: the message plus its NUL
pub fn message_type(key: &LocationKey) -> Type {
    Type::array_of(Type::I8, key.message().len() as u64 + 1)
}

fn check_signature(module: &Module, id: FuncId, expected: &Signature) -> Result<(), InstrumentError> {
    let func = module.function(id);
    let found = func.signature();
    if found != *expected {
        return Err(InstrumentError::SignatureConflict {
            name: func.name.clone(),
            expected: expected.to_string(),
            found: found.to_string(),
        });
    }
    Ok(())
}

/// Check, before anything is mutated, that existing symbols with the
/// names the pass emits can be reused for `keys`
pub fn check_existing_symbols(module: &Module, keys: &HashSet<LocationKey>) -> Result<(), InstrumentError> {
    if let Some(id) = module.find_function(PRINTF_SYMBOL) {
        check_signature(module, id, &printf_signature())?;
    }
    if let Some(id) = module.find_function(EXIT_SYMBOL) {
        check_signature(module, id, &exit_signature())?;
    }

    for key in keys {
        let guard_name = key.guard_name();
        let message_name = key.message_name();

        if let Some(id) = module.find_function(&guard_name) {
            // reused unchanged, so its diagnostic global is never touched
            check_signature(module, id, &guard_signature())?;
            continue;
        }
        if let Some(id) = module.find_global(&message_name)
            && module.global(id).ty != message_type(key)
        {
            return Err(InstrumentError::GlobalConflict {
                name: message_name,
                expected: message_type(key).to_string(),
                found: module.global(id).ty.to_string(),
            });
        }
    }

    Ok(())
}

/// Builds guard functions on demand, at most once per location key
#[derive(Debug, Default)]
pub struct GuardSynthesizer {
    cache: HashMap<LocationKey, GuardEntry>,
    printf: Option<FuncId>,
    exit: Option<FuncId>,
    pub created: usize,
    pub reused: usize,
    pub declared_printf: bool,
    pub declared_exit: bool,
}

impl GuardSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cached(&self, key: &LocationKey) -> Option<GuardEntry> {
        self.cache.get(key).copied()
    }

    /// Guard for `key`, synthesizing it if neither the cache nor the module has one
    pub fn resolve(&mut self, builder: &mut IrBuilder<'_>, key: LocationKey) -> Result<ResolvedGuard, InstrumentError> {
        if let Some(entry) = self.cached(&key) {
            self.reused += 1;
            return Ok(ResolvedGuard { entry, created: false });
        }

        let module = builder.module();
        if let Some(func) = module.find_function(&key.guard_name()) {
            let entry = GuardEntry {
                func,
                message: module.find_global(&key.message_name()),
            };
            self.cache.insert(key, entry);
            self.reused += 1;
            return Ok(ResolvedGuard { entry, created: false });
        }

        let entry = self.build_guard(builder, &key)?;
        self.cache.insert(key, entry);
        self.created += 1;
        Ok(ResolvedGuard { entry, created: true })
    }

    fn build_guard(&mut self, builder: &mut IrBuilder<'_>, key: &LocationKey) -> Result<GuardEntry, InstrumentError> {
        let name = key.guard_name();
        let func = builder
            .module_mut()
            .add_function(Function::new(name.clone(), vec![Param::new("cond", Type::I1)], Type::Void));

        builder.set_location(None);
        let enter = builder.append_block(func, "enter");
        let is_null = builder.append_block(func, "is_null");
        let ret = builder.append_block(func, "ret");

        builder.position_at_end(func, enter);
        builder.build_cond_br(Operand::local(Type::I1, "cond"), is_null, ret)?;

        builder.position_at_end(func, is_null);
        let printf = self.ensure_printf(builder)?;
        let message = self.ensure_message(builder, key)?;
        let message_ptr = Operand::global(message_type(key).ptr_to(), key.message_name());
        let format = builder.build_pointer_cast(message_ptr, Type::byte_ptr(), "msg")?;
        builder.build_call(printf, vec![format], None)?;
        let exit = self.ensure_exit(builder)?;
        builder.build_call(exit, vec![Operand::int(Type::I32, EXIT_CODE)], None)?;
        // exit never returns; the branch only closes the block
        builder.build_br(ret)?;

        builder.position_at_end(func, ret);
        builder.build_ret_void()?;

        debug!(guard = %name, key = %key, "synthesized guard function");
        Ok(GuardEntry {
            func,
            message: Some(message),
        })
    }

    fn ensure_printf(&mut self, builder: &mut IrBuilder<'_>) -> Result<FuncId, InstrumentError> {
        if let Some(id) = self.printf {
            return Ok(id);
        }
        let sig = printf_signature();
        let (id, created) = builder.get_or_insert_function(PRINTF_SYMBOL, &sig);
        check_signature(builder.module(), id, &sig)?;

        let printf = builder.module_mut().function_mut(id);
        printf.add_attr(FnAttr::NoUnwind);
        printf.add_param_attr(0, ParamAttr::NoCapture);
        printf.add_param_attr(0, ParamAttr::ReadOnly);

        self.declared_printf |= created;
        self.printf = Some(id);
        Ok(id)
    }

    fn ensure_exit(&mut self, builder: &mut IrBuilder<'_>) -> Result<FuncId, InstrumentError> {
        if let Some(id) = self.exit {
            return Ok(id);
        }
        let sig = exit_signature();
        let (id, created) = builder.get_or_insert_function(EXIT_SYMBOL, &sig);
        check_signature(builder.module(), id, &sig)?;
        builder.module_mut().function_mut(id).add_attr(FnAttr::NoReturn);

        self.declared_exit |= created;
        self.exit = Some(id);
        Ok(id)
    }

    fn ensure_message(&mut self, builder: &mut IrBuilder<'_>, key: &LocationKey) -> Result<GlobalId, InstrumentError> {
        let name = key.message_name();
        let ty = message_type(key);
        let initializer = Initializer::c_string(&key.message());

        if let Some(id) = builder.module().find_global(&name) {
            let global = builder.module_mut().global_mut(id);
            if global.ty != ty {
                return Err(InstrumentError::GlobalConflict {
                    name,
                    expected: ty.to_string(),
                    found: global.ty.to_string(),
                });
            }
            global.is_constant = true;
            global.initializer = Some(initializer);
            return Ok(id);
        }

        Ok(builder.add_global(Global {
            name,
            ty,
            is_constant: true,
            initializer: Some(initializer),
        }))
    }
}
