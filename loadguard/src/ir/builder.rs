//! Positioned instruction builder
//!
//! `IrBuilder` is the mutation API passes use: it keeps an insertion point
//! and a current debug location, creates blocks and declarations, and hands
//! out local names that are unique within their function.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use super::{
    BasicBlock, BlockId, CastOp, FuncId, Function, Global, GlobalId, ICmpPred, InstKind,
    Instruction, Module, Operand, Signature, SourceLoc, Terminator, Type,
};

/// Builder misuse
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("builder has no insert point")]
    NoInsertPoint,

    #[error("insert point {index} is outside block {block} of `{function}`")]
    InvalidInsertPoint {
        function: String,
        block: usize,
        index: usize,
    },
}

/// Position inside a block: new instructions go before `index`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertPoint {
    pub func: FuncId,
    pub block: BlockId,
    pub index: usize,
}

/// Instruction builder over a borrowed module
pub struct IrBuilder<'m> {
    module: &'m mut Module,
    point: Option<InsertPoint>,
    loc: Option<SourceLoc>,
    /// Local names in use per function, collected on first request
    taken: HashMap<FuncId, HashSet<String>>,
}

impl<'m> IrBuilder<'m> {
    pub fn new(module: &'m mut Module) -> Self {
        Self {
            module,
            point: None,
            loc: None,
            taken: HashMap::new(),
        }
    }

    pub fn module(&self) -> &Module {
        self.module
    }

    pub fn module_mut(&mut self) -> &mut Module {
        self.module
    }

    pub fn insert_point(&self) -> Option<InsertPoint> {
        self.point
    }

    /// New instructions go immediately before `point.index`
    pub fn position_before(&mut self, point: InsertPoint) {
        self.point = Some(point);
    }

    /// New instructions are appended to `block`
    pub fn position_at_end(&mut self, func: FuncId, block: BlockId) {
        let index = self.module.function(func).block(block).instructions.len();
        self.point = Some(InsertPoint { func, block, index });
    }

    /// Debug location attached to every instruction built from now on
    pub fn set_location(&mut self, loc: Option<SourceLoc>) {
        self.loc = loc;
    }

    pub fn append_block(&mut self, func: FuncId, label: impl Into<String>) -> BlockId {
        let function = self.module.function_mut(func);
        function.blocks.push(BasicBlock::new(label));
        BlockId(function.blocks.len() - 1)
    }

    /// Local name derived from `hint` that no other value in `func` uses
    pub fn fresh_local(&mut self, func: FuncId, hint: &str) -> String {
        let module = &*self.module;
        let taken = self
            .taken
            .entry(func)
            .or_insert_with(|| local_names(module.function(func)));

        let mut name = hint.to_string();
        let mut n = 0;
        while taken.contains(&name) {
            n += 1;
            name = format!("{hint}{n}");
        }
        taken.insert(name.clone());
        name
    }

    /// Get a function by name, declaring it with `sig` when absent.
    /// The flag is true if the declaration was created.
    pub fn get_or_insert_function(&mut self, name: &str, sig: &Signature) -> (FuncId, bool) {
        match self.module.find_function(name) {
            Some(id) => (id, false),
            None => (self.module.add_function(Function::declaration(name, sig)), true),
        }
    }

    pub fn add_global(&mut self, global: Global) -> GlobalId {
        self.module.add_global(global)
    }

    fn insert(&mut self, kind: InstKind) -> Result<(), BuildError> {
        let point = self.point.ok_or(BuildError::NoInsertPoint)?;
        let function = self.module.function_mut(point.func);
        let name = function.name.clone();
        let block = function
            .blocks
            .get_mut(point.block.0)
            .filter(|b| point.index <= b.instructions.len())
            .ok_or(BuildError::InvalidInsertPoint {
                function: name,
                block: point.block.0,
                index: point.index,
            })?;

        block.instructions.insert(point.index, Instruction { kind, loc: self.loc });
        self.point = Some(InsertPoint {
            index: point.index + 1,
            ..point
        });
        Ok(())
    }

    fn terminate(&mut self, term: Terminator) -> Result<(), BuildError> {
        let point = self.point.ok_or(BuildError::NoInsertPoint)?;
        let function = self.module.function_mut(point.func);
        let name = function.name.clone();
        let block = function
            .blocks
            .get_mut(point.block.0)
            .ok_or(BuildError::InvalidInsertPoint {
                function: name,
                block: point.block.0,
                index: point.index,
            })?;
        block.terminator = Some(term);
        Ok(())
    }

    fn current_func(&self) -> Result<FuncId, BuildError> {
        self.point.map(|p| p.func).ok_or(BuildError::NoInsertPoint)
    }

    fn label_of(&self, block: BlockId) -> Result<String, BuildError> {
        let func = self.current_func()?;
        Ok(self.module.function(func).block(block).label.clone())
    }

    /// %name = icmp eq lhs, rhs
    pub fn build_icmp_eq(&mut self, lhs: Operand, rhs: Operand, hint: &str) -> Result<Operand, BuildError> {
        let dest = self.fresh_local(self.current_func()?, hint);
        self.insert(InstKind::ICmp {
            dest: dest.clone(),
            pred: ICmpPred::Eq,
            lhs,
            rhs,
        })?;
        Ok(Operand::local(Type::I1, dest))
    }

    /// Reinterpret a pointer as another pointer type
    pub fn build_pointer_cast(&mut self, value: Operand, ty: Type, hint: &str) -> Result<Operand, BuildError> {
        let dest = self.fresh_local(self.current_func()?, hint);
        self.insert(InstKind::Cast {
            dest: dest.clone(),
            op: CastOp::Bitcast,
            value,
            ty: ty.clone(),
        })?;
        Ok(Operand::local(ty, dest))
    }

    /// Call `callee`; a non-void result is named after `hint` when given
    pub fn build_call(
        &mut self,
        callee: FuncId,
        args: Vec<Operand>,
        hint: Option<&str>,
    ) -> Result<Option<Operand>, BuildError> {
        let (callee_name, ret_ty) = {
            let f = self.module.function(callee);
            (f.name.clone(), f.ret_ty.clone())
        };
        let dest = match hint {
            Some(hint) if ret_ty != Type::Void => Some(self.fresh_local(self.current_func()?, hint)),
            _ => None,
        };
        self.insert(InstKind::Call {
            dest: dest.clone(),
            callee: callee_name,
            ret_ty: ret_ty.clone(),
            args,
        })?;
        Ok(dest.map(|d| Operand::local(ret_ty, d)))
    }

    pub fn build_cond_br(&mut self, cond: Operand, then_block: BlockId, else_block: BlockId) -> Result<(), BuildError> {
        let then_label = self.label_of(then_block)?;
        let else_label = self.label_of(else_block)?;
        self.terminate(Terminator::CondBr { cond, then_label, else_label })
    }

    pub fn build_br(&mut self, target: BlockId) -> Result<(), BuildError> {
        let label = self.label_of(target)?;
        self.terminate(Terminator::Br(label))
    }

    pub fn build_ret_void(&mut self) -> Result<(), BuildError> {
        self.terminate(Terminator::Ret(None))
    }
}

fn local_names(func: &Function) -> HashSet<String> {
    func.params
        .iter()
        .map(|p| p.name.clone())
        .chain(
            func.blocks
                .iter()
                .flat_map(|b| b.instructions.iter())
                .filter_map(|i| i.kind.dest().map(str::to_string)),
        )
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Param, Value};

    fn module_with_load() -> Module {
        let mut module = Module::new("m");
        let ptr_ty = Type::I32.ptr_to();
        let mut func = Function::new("f", vec![Param::new("p", ptr_ty.clone())], Type::I32);
        let mut entry = BasicBlock::new("entry");
        entry.instructions.push(Instruction::new(InstKind::Load {
            dest: "v".to_string(),
            ty: Type::I32,
            addr: Operand::local(ptr_ty, "p"),
        }));
        entry.terminator = Some(Terminator::Ret(Some(Operand::local(Type::I32, "v"))));
        func.blocks.push(entry);
        module.add_function(func);
        module
    }

    #[test]
    fn test_insert_before_keeps_order() {
        let mut module = module_with_load();
        let mut builder = IrBuilder::new(&mut module);
        builder.position_before(InsertPoint { func: FuncId(0), block: BlockId(0), index: 0 });
        builder.set_location(Some(SourceLoc::new(3, 9)));
        let ptr = Operand::local(Type::I32.ptr_to(), "p");
        let cmp = builder.build_icmp_eq(ptr.clone(), Operand::null(ptr.ty.clone()), "c").unwrap();
        assert_eq!(cmp.value, Value::Local("c".to_string()));

        let insts = &module.functions[0].blocks[0].instructions;
        assert_eq!(insts.len(), 2);
        assert!(matches!(insts[0].kind, InstKind::ICmp { .. }));
        assert_eq!(insts[0].loc, Some(SourceLoc::new(3, 9)));
        assert!(matches!(insts[1].kind, InstKind::Load { .. }));
    }

    #[test]
    fn test_fresh_local_avoids_existing_names() {
        let mut module = module_with_load();
        let mut builder = IrBuilder::new(&mut module);
        assert_eq!(builder.fresh_local(FuncId(0), "v"), "v1");
        assert_eq!(builder.fresh_local(FuncId(0), "v"), "v2");
        assert_eq!(builder.fresh_local(FuncId(0), "p"), "p1");
        assert_eq!(builder.fresh_local(FuncId(0), "x"), "x");
    }

    #[test]
    fn test_build_without_position_fails() {
        let mut module = module_with_load();
        let mut builder = IrBuilder::new(&mut module);
        assert_eq!(builder.build_ret_void(), Err(BuildError::NoInsertPoint));
    }

    #[test]
    fn test_invalid_insert_point() {
        let mut module = module_with_load();
        let mut builder = IrBuilder::new(&mut module);
        builder.position_before(InsertPoint { func: FuncId(0), block: BlockId(0), index: 7 });
        let err = builder
            .build_icmp_eq(Operand::bool(true), Operand::bool(false), "c")
            .unwrap_err();
        assert!(matches!(err, BuildError::InvalidInsertPoint { index: 7, .. }));
    }

    #[test]
    fn test_get_or_insert_function_reuses() {
        let mut module = module_with_load();
        let mut builder = IrBuilder::new(&mut module);
        let sig = Signature { ret_ty: Type::Void, params: vec![Type::I32], is_var_arg: false };
        let (first, created) = builder.get_or_insert_function("exit", &sig);
        assert!(created);
        let (second, created) = builder.get_or_insert_function("exit", &sig);
        assert!(!created);
        assert_eq!(first, second);
        assert_eq!(module.functions.len(), 2);
    }

    #[test]
    fn test_build_blocks_and_terminators() {
        let mut module = Module::new("m");
        let func = module.add_function(Function::new("g", vec![Param::new("c", Type::I1)], Type::Void));
        let mut builder = IrBuilder::new(&mut module);
        let entry = builder.append_block(func, "entry");
        let exit = builder.append_block(func, "exit");
        builder.position_at_end(func, entry);
        builder.build_cond_br(Operand::local(Type::I1, "c"), exit, exit).unwrap();
        builder.position_at_end(func, exit);
        builder.build_ret_void().unwrap();

        let f = module.function(func);
        assert_eq!(
            f.blocks[0].terminator,
            Some(Terminator::CondBr {
                cond: Operand::local(Type::I1, "c"),
                then_label: "exit".to_string(),
                else_label: "exit".to_string(),
            })
        );
        assert_eq!(f.blocks[1].terminator, Some(Terminator::Ret(None)));
    }
}
