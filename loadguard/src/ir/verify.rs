//! Structural verifier for LIR modules
//!
//! Checks the invariants every pass must preserve: one terminator per
//! block, existing branch targets, single definitions, defs dominating
//! uses, and operand types agreeing with definitions and signatures.
//! All violations are collected rather than stopping at the first one.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use super::{BasicBlock, CastOp, Function, Initializer, InstKind, Module, Operand, Terminator, Type, Value};

/// A single verifier finding
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{location}: {message}")]
pub struct VerifyError {
    /// `@function` or `@function:label`, or `module`
    pub location: String,
    pub message: String,
}

impl VerifyError {
    fn new(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            message: message.into(),
        }
    }
}

/// Verify a whole module, returning every violation found
pub fn verify_module(module: &Module) -> Result<(), Vec<VerifyError>> {
    let mut errors = Vec::new();

    let mut names = HashSet::new();
    for name in module
        .functions
        .iter()
        .map(|f| &f.name)
        .chain(module.globals.iter().map(|g| &g.name))
    {
        if !names.insert(name.as_str()) {
            errors.push(VerifyError::new("module", format!("symbol `@{name}` is defined more than once")));
        }
    }

    for global in &module.globals {
        if let Some(init) = &global.initializer
            && let Some(message) = check_initializer(module, &global.ty, init)
        {
            errors.push(VerifyError::new(format!("@{}", global.name), message));
        }
    }

    for func in module.functions.iter().filter(|f| !f.is_declaration()) {
        FunctionVerifier::new(module, func, &mut errors).run();
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

fn check_initializer(module: &Module, ty: &Type, init: &Initializer) -> Option<String> {
    match init {
        Initializer::Int(_) if !ty.is_integer() => Some(format!("integer initializer for `{ty}`")),
        Initializer::Null if !ty.is_pointer() => Some(format!("null initializer for `{ty}`")),
        Initializer::Bytes(bytes) => {
            let expected = Type::array_of(Type::I8, bytes.len() as u64);
            (*ty != expected).then(|| format!("byte initializer of type `{expected}` for `{ty}`"))
        }
        Initializer::Address(name) => match module.find_global(name) {
            None => Some(format!("initializer refers to unknown global `@{name}`")),
            Some(id) => {
                let expected = module.global(id).ty.ptr_to();
                (*ty != expected).then(|| format!("address of `@{name}` has type `{expected}`, not `{ty}`"))
            }
        },
        _ => None,
    }
}

/// Where a local was defined
#[derive(Debug, Clone, Copy)]
enum DefSite {
    Param,
    Inst { block: usize, index: usize },
}

struct FunctionVerifier<'a> {
    module: &'a Module,
    func: &'a Function,
    errors: &'a mut Vec<VerifyError>,
    labels: HashMap<&'a str, usize>,
    defs: HashMap<&'a str, (DefSite, Type)>,
    /// dominators[b] = blocks dominating b; `None` for unreachable blocks
    dominators: Vec<Option<HashSet<usize>>>,
}

impl<'a> FunctionVerifier<'a> {
    fn new(module: &'a Module, func: &'a Function, errors: &'a mut Vec<VerifyError>) -> Self {
        Self {
            module,
            func,
            errors,
            labels: HashMap::new(),
            defs: HashMap::new(),
            dominators: Vec::new(),
        }
    }

    fn error(&mut self, block: Option<&BasicBlock>, message: impl Into<String>) {
        let location = match block {
            Some(b) => format!("@{}:{}", self.func.name, b.label),
            None => format!("@{}", self.func.name),
        };
        self.errors.push(VerifyError::new(location, message));
    }

    fn run(mut self) {
        let func = self.func;

        for (i, block) in func.blocks.iter().enumerate() {
            if self.labels.insert(&block.label, i).is_some() {
                self.error(Some(block), "duplicate block label");
            }
        }

        for param in &func.params {
            if self.defs.insert(&param.name, (DefSite::Param, param.ty.clone())).is_some() {
                self.error(None, format!("parameter `%{}` declared twice", param.name));
            }
        }
        for (b, block) in func.blocks.iter().enumerate() {
            for (i, inst) in block.instructions.iter().enumerate() {
                if let (Some(dest), Some(ty)) = (inst.kind.dest(), inst.kind.result_type()) {
                    let site = DefSite::Inst { block: b, index: i };
                    if self.defs.insert(dest, (site, ty)).is_some() {
                        self.error(Some(block), format!("`%{dest}` is defined more than once"));
                    }
                }
            }
        }

        for block in &func.blocks {
            match &block.terminator {
                None => self.error(Some(block), "block has no terminator"),
                Some(term) => {
                    for target in term.successors() {
                        if !self.labels.contains_key(target) {
                            self.error(Some(block), format!("branch to unknown label `%{target}`"));
                        }
                    }
                }
            }
        }

        self.dominators = compute_dominators(func, &self.labels);

        for (b, block) in func.blocks.iter().enumerate() {
            for (i, inst) in block.instructions.iter().enumerate() {
                for op in inst.kind.operands() {
                    self.check_operand(b, i, op);
                }
                self.check_inst(block, &inst.kind);
            }
            if let Some(term) = &block.terminator {
                let end = block.instructions.len();
                for op in term.operands() {
                    self.check_operand(b, end, op);
                }
                self.check_terminator(block, term);
            }
        }
    }

    fn check_operand(&mut self, block: usize, index: usize, op: &Operand) {
        let func = self.func;
        let bb = &func.blocks[block];
        match &op.value {
            Value::Local(name) => {
                let Some((site, ty)) = self.defs.get(name.as_str()).cloned() else {
                    self.error(Some(bb), format!("use of undefined value `%{name}`"));
                    return;
                };
                if ty != op.ty {
                    self.error(Some(bb), format!("`%{name}` has type `{ty}` but is used as `{}`", op.ty));
                }
                if !self.dominates(site, block, index) {
                    self.error(Some(bb), format!("definition of `%{name}` does not dominate its use"));
                }
            }
            Value::Global(name) => match self.module.find_global(name) {
                Some(id) => {
                    let expected = self.module.global(id).ty.ptr_to();
                    if expected != op.ty {
                        self.error(Some(bb), format!("`@{name}` has type `{expected}` but is used as `{}`", op.ty));
                    }
                }
                None => self.error(Some(bb), format!("use of unknown global `@{name}`")),
            },
            Value::Int(_) => {
                if !op.ty.is_integer() {
                    self.error(Some(bb), format!("integer constant of type `{}`", op.ty));
                }
            }
            Value::Null => {
                if !op.ty.is_pointer() {
                    self.error(Some(bb), format!("null constant of non-pointer type `{}`", op.ty));
                }
            }
        }
    }

    fn dominates(&self, site: DefSite, use_block: usize, use_index: usize) -> bool {
        match site {
            DefSite::Param => true,
            DefSite::Inst { block, index } if block == use_block => index < use_index,
            DefSite::Inst { block, .. } => match &self.dominators[use_block] {
                Some(doms) => doms.contains(&block),
                // Uses in unreachable code are not constrained
                None => true,
            },
        }
    }

    fn check_inst(&mut self, block: &BasicBlock, kind: &InstKind) {
        match kind {
            InstKind::Alloca { ty, .. } => {
                if *ty == Type::Void {
                    self.error(Some(block), "alloca of void");
                }
            }
            InstKind::Load { ty, addr, .. } => {
                if addr.ty.pointee() != Some(ty) {
                    self.error(Some(block), format!("load of `{ty}` through `{}`", addr.ty));
                }
            }
            InstKind::Store { value, addr } => {
                if addr.ty.pointee() != Some(&value.ty) {
                    self.error(Some(block), format!("store of `{}` through `{}`", value.ty, addr.ty));
                }
            }
            InstKind::Binary { lhs, rhs, .. } => {
                if !lhs.ty.is_integer() || lhs.ty != rhs.ty {
                    self.error(Some(block), format!("arithmetic on `{}` and `{}`", lhs.ty, rhs.ty));
                }
            }
            InstKind::ICmp { lhs, rhs, .. } => {
                if lhs.ty != rhs.ty || !(lhs.ty.is_integer() || lhs.ty.is_pointer()) {
                    self.error(Some(block), format!("comparison of `{}` with `{}`", lhs.ty, rhs.ty));
                }
            }
            InstKind::Cast { op, value, ty, .. } => {
                if !cast_is_valid(*op, &value.ty, ty) {
                    self.error(Some(block), format!("invalid cast from `{}` to `{ty}`", value.ty));
                }
            }
            InstKind::Gep { base, index, .. } => {
                if !base.ty.is_pointer() || !index.ty.is_integer() {
                    self.error(Some(block), format!("getelementptr on `{}` with `{}` index", base.ty, index.ty));
                }
            }
            InstKind::Call { dest, callee, ret_ty, args } => self.check_call(block, dest.as_deref(), callee, ret_ty, args),
        }
    }

    fn check_call(&mut self, block: &BasicBlock, dest: Option<&str>, callee: &str, ret_ty: &Type, args: &[Operand]) {
        let Some(id) = self.module.find_function(callee) else {
            self.error(Some(block), format!("call to unknown function `@{callee}`"));
            return;
        };
        let sig = self.module.function(id).signature();

        if sig.ret_ty != *ret_ty {
            self.error(Some(block), format!("call of `@{callee}` expects `{}` result, found `{ret_ty}`", sig.ret_ty));
        }
        if dest.is_some() && *ret_ty == Type::Void {
            self.error(Some(block), format!("void call of `@{callee}` cannot define a value"));
        }

        let arity_ok = if sig.is_var_arg {
            args.len() >= sig.params.len()
        } else {
            args.len() == sig.params.len()
        };
        if !arity_ok {
            self.error(
                Some(block),
                format!("`@{callee}` takes {} arguments, {} given", sig.params.len(), args.len()),
            );
            return;
        }
        for (i, (arg, param)) in args.iter().zip(&sig.params).enumerate() {
            if arg.ty != *param {
                self.error(Some(block), format!("argument {i} of `@{callee}` is `{}`, expected `{param}`", arg.ty));
            }
        }
    }

    fn check_terminator(&mut self, block: &BasicBlock, term: &Terminator) {
        let ret_ty = &self.func.ret_ty;
        match term {
            Terminator::Ret(None) if *ret_ty != Type::Void => {
                self.error(Some(block), format!("`ret void` in function returning `{ret_ty}`"));
            }
            Terminator::Ret(Some(value)) if value.ty != *ret_ty => {
                self.error(Some(block), format!("returning `{}` from function returning `{ret_ty}`", value.ty));
            }
            Terminator::CondBr { cond, .. } if cond.ty != Type::I1 => {
                self.error(Some(block), format!("branch condition of type `{}`", cond.ty));
            }
            _ => {}
        }
    }
}

fn cast_is_valid(op: CastOp, from: &Type, to: &Type) -> bool {
    match op {
        CastOp::Bitcast => from.is_pointer() && to.is_pointer(),
        CastOp::PtrToInt => from.is_pointer() && to.is_integer(),
        CastOp::IntToPtr => from.is_integer() && to.is_pointer(),
        CastOp::ZExt | CastOp::SExt => matches!((from.bit_width(), to.bit_width()), (Some(a), Some(b)) if a < b),
        CastOp::Trunc => matches!((from.bit_width(), to.bit_width()), (Some(a), Some(b)) if a > b),
    }
}

/// Iterative dominator sets over the blocks reachable from the entry
fn compute_dominators(func: &Function, labels: &HashMap<&str, usize>) -> Vec<Option<HashSet<usize>>> {
    let n = func.blocks.len();
    let succs: Vec<Vec<usize>> = func
        .blocks
        .iter()
        .map(|b| {
            b.terminator
                .iter()
                .flat_map(|t| t.successors())
                .filter_map(|l| labels.get(l).copied())
                .collect()
        })
        .collect();

    let mut reachable = vec![false; n];
    let mut stack = vec![0];
    while let Some(b) = stack.pop() {
        if n == 0 || reachable[b] {
            continue;
        }
        reachable[b] = true;
        stack.extend(succs[b].iter().copied());
    }

    let mut preds: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (b, ss) in succs.iter().enumerate() {
        if reachable[b] {
            for &s in ss {
                preds[s].push(b);
            }
        }
    }

    let all: HashSet<usize> = (0..n).filter(|&b| reachable[b]).collect();
    let mut doms: Vec<Option<HashSet<usize>>> = (0..n)
        .map(|b| {
            if !reachable[b] {
                None
            } else if b == 0 {
                Some(HashSet::from([0]))
            } else {
                Some(all.clone())
            }
        })
        .collect();

    let mut changed = true;
    while changed {
        changed = false;
        for b in 1..n {
            if !reachable[b] {
                continue;
            }
            let mut new: Option<HashSet<usize>> = None;
            for &p in &preds[b] {
                if let Some(pd) = &doms[p] {
                    new = Some(match new {
                        None => pd.clone(),
                        Some(acc) => acc.intersection(pd).copied().collect(),
                    });
                }
            }
            let mut new = new.unwrap_or_default();
            new.insert(b);
            if doms[b].as_ref() != Some(&new) {
                doms[b] = Some(new);
                changed = true;
            }
        }
    }

    doms
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Global, Instruction, Param};

    fn ret_block(label: &str, insts: Vec<InstKind>, term: Terminator) -> BasicBlock {
        BasicBlock {
            label: label.to_string(),
            instructions: insts.into_iter().map(Instruction::new).collect(),
            terminator: Some(term),
        }
    }

    fn module_of(func: Function) -> Module {
        let mut module = Module::new("m");
        module.add_function(func);
        module
    }

    #[test]
    fn test_valid_function() {
        let p = Type::I32.ptr_to();
        let mut func = Function::new("f", vec![Param::new("p", p.clone())], Type::I32);
        func.blocks.push(ret_block(
            "entry",
            vec![InstKind::Load { dest: "v".to_string(), ty: Type::I32, addr: Operand::local(p, "p") }],
            Terminator::Ret(Some(Operand::local(Type::I32, "v"))),
        ));
        assert_eq!(verify_module(&module_of(func)), Ok(()));
    }

    #[test]
    fn test_missing_terminator() {
        let mut func = Function::new("f", vec![], Type::Void);
        func.blocks.push(BasicBlock::new("entry"));
        let errors = verify_module(&module_of(func)).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "block has no terminator");
        assert_eq!(errors[0].location, "@f:entry");
    }

    #[test]
    fn test_use_before_def_in_block() {
        let mut func = Function::new("f", vec![], Type::I32);
        func.blocks.push(ret_block(
            "entry",
            vec![
                InstKind::Binary {
                    dest: "a".to_string(),
                    op: crate::ir::BinaryOp::Add,
                    lhs: Operand::local(Type::I32, "b"),
                    rhs: Operand::int(Type::I32, 1),
                },
                InstKind::Binary {
                    dest: "b".to_string(),
                    op: crate::ir::BinaryOp::Add,
                    lhs: Operand::int(Type::I32, 1),
                    rhs: Operand::int(Type::I32, 1),
                },
            ],
            Terminator::Ret(Some(Operand::local(Type::I32, "a"))),
        ));
        let errors = verify_module(&module_of(func)).unwrap_err();
        assert!(errors.iter().any(|e| e.message.contains("does not dominate")));
    }

    #[test]
    fn test_def_in_sibling_branch_does_not_dominate() {
        let mut func = Function::new("f", vec![Param::new("c", Type::I1)], Type::I32);
        func.blocks.push(ret_block(
            "entry",
            vec![],
            Terminator::CondBr {
                cond: Operand::local(Type::I1, "c"),
                then_label: "left".to_string(),
                else_label: "join".to_string(),
            },
        ));
        func.blocks.push(ret_block(
            "left",
            vec![InstKind::Binary {
                dest: "x".to_string(),
                op: crate::ir::BinaryOp::Add,
                lhs: Operand::int(Type::I32, 1),
                rhs: Operand::int(Type::I32, 2),
            }],
            Terminator::Br("join".to_string()),
        ));
        func.blocks.push(ret_block("join", vec![], Terminator::Ret(Some(Operand::local(Type::I32, "x")))));
        let errors = verify_module(&module_of(func)).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].location, "@f:join");
    }

    #[test]
    fn test_load_type_mismatch_and_unknown_label() {
        let mut func = Function::new("f", vec![Param::new("p", Type::I8.ptr_to())], Type::Void);
        func.blocks.push(ret_block(
            "entry",
            vec![InstKind::Load {
                dest: "v".to_string(),
                ty: Type::I32,
                addr: Operand::local(Type::I8.ptr_to(), "p"),
            }],
            Terminator::Br("nowhere".to_string()),
        ));
        let errors = verify_module(&module_of(func)).unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_call_signature_checked() {
        let mut module = Module::new("m");
        module.add_function(Function::new("exit", vec![Param::new("code", Type::I32)], Type::Void));
        let mut func = Function::new("main", vec![], Type::Void);
        func.blocks.push(ret_block(
            "entry",
            vec![InstKind::Call {
                dest: None,
                callee: "exit".to_string(),
                ret_ty: Type::Void,
                args: vec![Operand::int(Type::I64, 1)],
            }],
            Terminator::Ret(None),
        ));
        module.add_function(func);
        let errors = verify_module(&module).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("argument 0"));
    }

    #[test]
    fn test_global_initializers() {
        let mut module = Module::new("m");
        module.add_global(Global {
            name: "msg".to_string(),
            ty: Type::array_of(Type::I8, 3),
            is_constant: true,
            initializer: Some(Initializer::c_string("hi")),
        });
        module.add_global(Global {
            name: "bad".to_string(),
            ty: Type::I32,
            is_constant: false,
            initializer: Some(Initializer::Address("msg".to_string())),
        });
        let errors = verify_module(&module).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].location, "@bad");
    }

    #[test]
    fn test_duplicate_symbols() {
        let mut module = Module::new("m");
        module.add_function(Function::new("f", vec![], Type::Void));
        module.add_function(Function::new("f", vec![], Type::Void));
        let errors = verify_module(&module).unwrap_err();
        assert_eq!(errors[0].location, "module");
    }
}
