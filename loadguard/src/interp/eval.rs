//! Instruction evaluator

use std::collections::HashMap;

use tracing::{debug, trace};

use super::error::{InterpResult, RuntimeError};
use super::libc::{builtins, BuiltinFn, Runtime};
use super::memory::SlotKind;
use super::value::{type_size, unsigned, wrap, Address, Value};
use super::InterpConfig;
use crate::ir::{
    BinaryOp, CastOp, Function, ICmpPred, InstKind, Instruction, Initializer, Module, Operand, Terminator,
    Type, Value as IrValue,
};

/// Activation record of one call
struct Frame<'m> {
    func: &'m Function,
    locals: HashMap<&'m str, Value>,
    allocas: Vec<Address>,
}

impl<'m> Frame<'m> {
    fn new(func: &'m Function) -> Self {
        Frame {
            func,
            locals: HashMap::new(),
            allocas: Vec::new(),
        }
    }
}

/// The interpreter
pub struct Interpreter<'m> {
    module: &'m Module,
    config: InterpConfig,
    runtime: Runtime,
    builtins: HashMap<&'static str, BuiltinFn>,
    globals: HashMap<&'m str, Address>,
    /// Current call depth
    depth: usize,
    /// Instructions and terminators executed so far
    steps: u64,
}

impl<'m> Interpreter<'m> {
    /// Create an interpreter with every global allocated and initialized
    pub fn new(module: &'m Module, config: InterpConfig) -> InterpResult<Self> {
        let mut interp = Interpreter {
            module,
            config,
            runtime: Runtime::default(),
            builtins: builtins(),
            globals: HashMap::new(),
            depth: 0,
            steps: 0,
        };
        interp.init_globals()?;
        Ok(interp)
    }

    fn init_globals(&mut self) -> InterpResult<()> {
        let module = self.module;
        for global in &module.globals {
            let addr = self.runtime.memory.allocate(SlotKind::Global, type_size(&global.ty))?;
            self.globals.insert(&global.name, addr);
        }

        for global in &module.globals {
            let addr = self.globals[global.name.as_str()];
            match &global.initializer {
                None | Some(Initializer::Null | Initializer::Zero) => {}
                Some(Initializer::Int(n)) => {
                    self.runtime.memory.store(addr, &global.ty, Value::Int(wrap(&global.ty, *n)))?;
                }
                Some(Initializer::Address(target)) => {
                    let target = self.global_address(target)?;
                    self.runtime.memory.store(addr, &global.ty, Value::Ptr(target))?;
                }
                Some(Initializer::Bytes(bytes)) => self.runtime.memory.write_bytes(addr, bytes)?,
            }
        }
        Ok(())
    }

    fn global_address(&self, name: &str) -> InterpResult<Address> {
        self.globals
            .get(name)
            .copied()
            .ok_or_else(|| RuntimeError::undefined_value(&format!("@{name}")))
    }

    /// Standard output captured so far
    pub fn stdout(&self) -> &[u8] {
        &self.runtime.stdout
    }

    pub fn into_stdout(self) -> Vec<u8> {
        self.runtime.stdout
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Call a function by name
    pub fn call(&mut self, name: &str, args: Vec<Value>) -> InterpResult<Value> {
        let module = self.module;
        match module.find_function(name) {
            Some(id) => self.call_function(module.function(id), args),
            None => Err(RuntimeError::undefined_function(name)),
        }
    }

    fn call_function(&mut self, func: &'m Function, args: Vec<Value>) -> InterpResult<Value> {
        if func.is_declaration() {
            let builtin = self
                .builtins
                .get(func.name.as_str())
                .copied()
                .ok_or_else(|| RuntimeError::undefined_function(&func.name))?;
            trace!(function = %func.name, "builtin call");
            return builtin(&mut self.runtime, &args);
        }

        if args.len() != func.params.len() {
            return Err(RuntimeError::arity_mismatch(&func.name, func.params.len(), args.len()));
        }

        self.depth += 1;
        if self.depth > self.config.max_call_depth {
            self.depth -= 1;
            return Err(RuntimeError::stack_overflow(self.config.max_call_depth));
        }

        let mut frame = Frame::new(func);
        for (param, arg) in func.params.iter().zip(args) {
            frame.locals.insert(&param.name, arg);
        }

        trace!(function = %func.name, depth = self.depth, "call");
        let result = self.execute_body(&mut frame);

        for addr in frame.allocas {
            self.runtime.memory.release(addr);
        }
        self.depth -= 1;
        result
    }

    fn tick(&mut self) -> InterpResult<()> {
        self.steps += 1;
        if self.steps > self.config.max_steps {
            return Err(RuntimeError::step_limit(self.config.max_steps));
        }
        Ok(())
    }

    fn execute_body(&mut self, frame: &mut Frame<'m>) -> InterpResult<Value> {
        let func = frame.func;
        let mut block = &func.blocks[0];

        loop {
            for inst in &block.instructions {
                self.tick()?;
                self.execute(frame, inst)?;
            }

            self.tick()?;
            let target = match &block.terminator {
                Some(Terminator::Ret(None)) => return Ok(Value::Void),
                Some(Terminator::Ret(Some(op))) => return self.eval(frame, op),
                Some(Terminator::Br(label)) => label,
                Some(Terminator::CondBr { cond, then_label, else_label }) => {
                    if self.eval(frame, cond)?.is_truthy() { then_label } else { else_label }
                }
                Some(Terminator::Unreachable) | None => return Err(RuntimeError::unreachable(&func.name)),
            };
            block = func
                .find_block(target)
                .map(|id| func.block(id))
                .ok_or_else(|| RuntimeError::undefined_value(&format!("label %{target}")))?;
        }
    }

    fn execute(&mut self, frame: &mut Frame<'m>, inst: &'m Instruction) -> InterpResult<()> {
        let (dest, value) = match &inst.kind {
            InstKind::Alloca { dest, ty } => {
                let addr = self.runtime.memory.allocate(SlotKind::Stack, type_size(ty))?;
                frame.allocas.push(addr);
                (dest, Value::Ptr(addr))
            }
            InstKind::Load { dest, ty, addr } => {
                let addr = self.pointer(frame, addr)?;
                (dest, self.runtime.memory.load(addr, ty)?)
            }
            InstKind::Store { value, addr } => {
                let v = self.eval(frame, value)?;
                let addr = self.pointer(frame, addr)?;
                self.runtime.memory.store(addr, &value.ty, v)?;
                return Ok(());
            }
            InstKind::Binary { dest, op, lhs, rhs } => {
                let a = self.integer(frame, lhs)?;
                let b = self.integer(frame, rhs)?;
                (dest, Value::Int(binary(*op, &lhs.ty, a, b)?))
            }
            InstKind::ICmp { dest, pred, lhs, rhs } => {
                let a = self.eval(frame, lhs)?;
                let b = self.eval(frame, rhs)?;
                (dest, Value::Int(compare(*pred, &lhs.ty, a, b)? as i64))
            }
            InstKind::Cast { dest, op, value, ty } => {
                let v = self.eval(frame, value)?;
                (dest, cast(*op, &value.ty, ty, v)?)
            }
            InstKind::Gep { dest, base, index } => {
                let addr = self.pointer(frame, base)?;
                let i = self.integer(frame, index)?;
                let size = base.ty.pointee().map(type_size).unwrap_or(1) as i64;
                (dest, Value::Ptr(addr.offset_by(i.wrapping_mul(size))))
            }
            InstKind::Call { dest, callee, args, .. } => {
                let args = args.iter().map(|a| self.eval(frame, a)).collect::<InterpResult<Vec<_>>>()?;
                let module = self.module;
                let func = module
                    .find_function(callee)
                    .map(|id| module.function(id))
                    .ok_or_else(|| RuntimeError::undefined_function(callee))?;
                let result = self.call_function(func, args)?;
                match dest {
                    Some(dest) => (dest, result),
                    None => return Ok(()),
                }
            }
        };
        frame.locals.insert(dest, value);
        Ok(())
    }

    fn eval(&self, frame: &Frame<'m>, op: &Operand) -> InterpResult<Value> {
        match &op.value {
            IrValue::Local(name) => frame
                .locals
                .get(name.as_str())
                .copied()
                .ok_or_else(|| RuntimeError::undefined_value(&format!("%{name}"))),
            IrValue::Global(name) => Ok(Value::Ptr(self.global_address(name)?)),
            IrValue::Int(n) => Ok(Value::Int(wrap(&op.ty, *n))),
            IrValue::Null => Ok(Value::Ptr(Address::NULL)),
        }
    }

    fn pointer(&self, frame: &Frame<'m>, op: &Operand) -> InterpResult<Address> {
        let v = self.eval(frame, op)?;
        v.as_ptr().ok_or_else(|| RuntimeError::type_error("pointer", v.type_name()))
    }

    fn integer(&self, frame: &Frame<'m>, op: &Operand) -> InterpResult<i64> {
        let v = self.eval(frame, op)?;
        v.as_int().ok_or_else(|| RuntimeError::type_error("integer", v.type_name()))
    }

    /// Run `main` to completion
    pub fn run_main(&mut self) -> InterpResult<i32> {
        let module = self.module;
        let id = module
            .find_function("main")
            .ok_or_else(|| RuntimeError::undefined_function("main"))?;
        let main = module.function(id);
        let args = main
            .params
            .iter()
            .map(|p| if p.ty.is_pointer() { Value::Ptr(Address::NULL) } else { Value::Int(0) })
            .collect();

        debug!(module = %module.name, "running main");
        match self.call_function(main, args)? {
            Value::Int(code) => Ok(code as i32),
            _ => Ok(0),
        }
    }
}

fn binary(op: BinaryOp, ty: &Type, a: i64, b: i64) -> InterpResult<i64> {
    let n = match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::SDiv | BinaryOp::SRem if b == 0 => return Err(RuntimeError::division_by_zero()),
        BinaryOp::SDiv => a.wrapping_div(b),
        BinaryOp::SRem => a.wrapping_rem(b),
        BinaryOp::And => a & b,
        BinaryOp::Or => a | b,
        BinaryOp::Xor => a ^ b,
    };
    Ok(wrap(ty, n))
}

fn compare(pred: ICmpPred, ty: &Type, a: Value, b: Value) -> InterpResult<bool> {
    let (sa, sb, ua, ub) = match (a, b) {
        (Value::Int(x), Value::Int(y)) => (x, y, unsigned(ty, x), unsigned(ty, y)),
        (Value::Ptr(x), Value::Ptr(y)) => (x.0 as i64, y.0 as i64, x.0, y.0),
        (x, y) => {
            return Err(RuntimeError::type_error(x.type_name(), y.type_name()));
        }
    };
    Ok(match pred {
        ICmpPred::Eq => ua == ub,
        ICmpPred::Ne => ua != ub,
        ICmpPred::Slt => sa < sb,
        ICmpPred::Sle => sa <= sb,
        ICmpPred::Sgt => sa > sb,
        ICmpPred::Sge => sa >= sb,
        ICmpPred::Ult => ua < ub,
        ICmpPred::Ule => ua <= ub,
        ICmpPred::Ugt => ua > ub,
        ICmpPred::Uge => ua >= ub,
    })
}

fn cast(op: CastOp, from: &Type, to: &Type, v: Value) -> InterpResult<Value> {
    match (op, v) {
        (CastOp::Bitcast, v) => Ok(v),
        (CastOp::PtrToInt, Value::Ptr(a)) => Ok(Value::Int(wrap(to, a.0 as i64))),
        (CastOp::IntToPtr, Value::Int(n)) => Ok(Value::Ptr(Address(unsigned(from, n)))),
        (CastOp::ZExt, Value::Int(n)) => Ok(Value::Int(wrap(to, unsigned(from, n) as i64))),
        (CastOp::SExt | CastOp::Trunc, Value::Int(n)) => Ok(Value::Int(wrap(to, n))),
        (_, v) => Err(RuntimeError::type_error(&format!("operand of {op:?}"), v.type_name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::ErrorKind;

    #[test]
    fn test_binary_wraps_to_width() {
        assert_eq!(binary(BinaryOp::Add, &Type::I8, 127, 1).unwrap(), -128);
        assert_eq!(binary(BinaryOp::Mul, &Type::I32, 65536, 65536).unwrap(), 0);
        assert_eq!(binary(BinaryOp::SDiv, &Type::I64, i64::MIN, -1).unwrap(), i64::MIN);
        assert_eq!(binary(BinaryOp::SRem, &Type::I32, -7, 2).unwrap(), -1);
        assert_eq!(
            binary(BinaryOp::SDiv, &Type::I32, 1, 0).unwrap_err().kind,
            ErrorKind::DivisionByZero
        );
    }

    #[test]
    fn test_compare_signedness() {
        let minus_one = Value::Int(-1);
        let one = Value::Int(1);
        assert!(compare(ICmpPred::Slt, &Type::I32, minus_one, one).unwrap());
        assert!(compare(ICmpPred::Ugt, &Type::I32, minus_one, one).unwrap());
        let null = Value::Ptr(Address::NULL);
        assert!(compare(ICmpPred::Eq, &Type::byte_ptr(), null, null).unwrap());
        assert!(compare(ICmpPred::Ne, &Type::byte_ptr(), Value::Ptr(Address::new(0, 0)), null).unwrap());
    }

    #[test]
    fn test_casts() {
        assert_eq!(cast(CastOp::ZExt, &Type::I8, &Type::I32, Value::Int(-1)).unwrap(), Value::Int(255));
        assert_eq!(cast(CastOp::SExt, &Type::I8, &Type::I32, Value::Int(-1)).unwrap(), Value::Int(-1));
        assert_eq!(cast(CastOp::Trunc, &Type::I32, &Type::I8, Value::Int(300)).unwrap(), Value::Int(44));
        assert_eq!(cast(CastOp::ZExt, &Type::I1, &Type::I32, Value::Int(1)).unwrap(), Value::Int(1));
        let p = Address::new(2, 8);
        let n = cast(CastOp::PtrToInt, &Type::byte_ptr(), &Type::I64, Value::Ptr(p)).unwrap();
        assert_eq!(cast(CastOp::IntToPtr, &Type::I64, &Type::byte_ptr(), n).unwrap(), Value::Ptr(p));
    }
}
