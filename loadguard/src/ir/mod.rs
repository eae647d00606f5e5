//! Load-guard Intermediate Representation (LIR)
//!
//! LIR is a small, typed, CFG-based IR modelled on the subset of a host
//! compiler IR that the load-checker pass needs: functions made of basic
//! blocks, instructions with optional debug locations, typed pointers and
//! module-level globals.
//!
//! The module owns every function and global. Other code refers to them
//! through index handles (`FuncId`, `GlobalId`, `BlockId`) so insertion and
//! lookup stay explicit.

mod builder;
pub mod verify;

pub use builder::{BuildError, InsertPoint, IrBuilder};
pub use verify::{verify_module, VerifyError};

use std::fmt;

use serde::{Deserialize, Serialize};

/// Handle to a function inside a [`Module`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FuncId(pub usize);

/// Handle to a global inside a [`Module`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GlobalId(pub usize);

/// Handle to a basic block inside a [`Function`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockId(pub usize);

/// A LIR module: the unit a pass transforms
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub globals: Vec<Global>,
    pub functions: Vec<Function>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            globals: Vec::new(),
            functions: Vec::new(),
        }
    }

    pub fn function(&self, id: FuncId) -> &Function {
        &self.functions[id.0]
    }

    pub fn function_mut(&mut self, id: FuncId) -> &mut Function {
        &mut self.functions[id.0]
    }

    pub fn global(&self, id: GlobalId) -> &Global {
        &self.globals[id.0]
    }

    pub fn global_mut(&mut self, id: GlobalId) -> &mut Global {
        &mut self.globals[id.0]
    }

    /// Look up a function (definition or declaration) by name
    pub fn find_function(&self, name: &str) -> Option<FuncId> {
        self.functions.iter().position(|f| f.name == name).map(FuncId)
    }

    /// Look up a global by name
    pub fn find_global(&self, name: &str) -> Option<GlobalId> {
        self.globals.iter().position(|g| g.name == name).map(GlobalId)
    }

    pub fn add_function(&mut self, func: Function) -> FuncId {
        self.functions.push(func);
        FuncId(self.functions.len() - 1)
    }

    pub fn add_global(&mut self, global: Global) -> GlobalId {
        self.globals.push(global);
        GlobalId(self.globals.len() - 1)
    }

    /// Number of load instructions in the whole module
    pub fn count_loads(&self) -> usize {
        self.functions
            .iter()
            .flat_map(|f| f.blocks.iter())
            .flat_map(|b| b.instructions.iter())
            .filter(|i| matches!(i.kind, InstKind::Load { .. }))
            .count()
    }
}

/// Module-level variable or constant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Global {
    pub name: String,
    /// Type of the stored value; the global itself is a `ty*`
    pub ty: Type,
    /// Read-only data (`constant`) versus mutable (`global`)
    pub is_constant: bool,
    /// `None` for an external global
    pub initializer: Option<Initializer>,
}

/// Global initializer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Initializer {
    Int(i64),
    Null,
    /// Address of another global
    Address(String),
    /// Byte array (`c"..."`); includes the trailing NUL if any
    Bytes(Vec<u8>),
    Zero,
}

impl Initializer {
    /// Byte-array initializer for a C string, NUL terminated
    pub fn c_string(text: &str) -> Self {
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(0);
        Initializer::Bytes(bytes)
    }
}

/// Function parameter attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamAttr {
    NoCapture,
    ReadOnly,
}

/// Function attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FnAttr {
    /// Never unwinds
    NoUnwind,
    /// Never returns control to the caller
    NoReturn,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: Type,
    pub attrs: Vec<ParamAttr>,
}

impl Param {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
            attrs: Vec::new(),
        }
    }
}

/// Call signature: what a declaration and a definition must agree on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub ret_ty: Type,
    pub params: Vec<Type>,
    pub is_var_arg: bool,
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = self.params.iter().map(|t| t.to_string()).collect();
        if self.is_var_arg {
            parts.push("...".to_string());
        }
        write!(f, "{} ({})", self.ret_ty, parts.join(", "))
    }
}

/// A function definition, or a declaration when it has no blocks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub params: Vec<Param>,
    pub ret_ty: Type,
    pub is_var_arg: bool,
    pub attrs: Vec<FnAttr>,
    /// Basic blocks (first block is entry)
    pub blocks: Vec<BasicBlock>,
}

impl Function {
    pub fn new(name: impl Into<String>, params: Vec<Param>, ret_ty: Type) -> Self {
        Self {
            name: name.into(),
            params,
            ret_ty,
            is_var_arg: false,
            attrs: Vec::new(),
            blocks: Vec::new(),
        }
    }

    /// Declaration of an external function with the given signature
    pub fn declaration(name: impl Into<String>, sig: &Signature) -> Self {
        let params = sig
            .params
            .iter()
            .enumerate()
            .map(|(i, ty)| Param::new(format!("arg{i}"), ty.clone()))
            .collect();
        Self {
            is_var_arg: sig.is_var_arg,
            ..Self::new(name, params, sig.ret_ty.clone())
        }
    }

    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn signature(&self) -> Signature {
        Signature {
            ret_ty: self.ret_ty.clone(),
            params: self.params.iter().map(|p| p.ty.clone()).collect(),
            is_var_arg: self.is_var_arg,
        }
    }

    pub fn has_attr(&self, attr: FnAttr) -> bool {
        self.attrs.contains(&attr)
    }

    pub fn add_attr(&mut self, attr: FnAttr) {
        if !self.has_attr(attr) {
            self.attrs.push(attr);
        }
    }

    pub fn add_param_attr(&mut self, index: usize, attr: ParamAttr) {
        if let Some(param) = self.params.get_mut(index)
            && !param.attrs.contains(&attr)
        {
            param.attrs.push(attr);
        }
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.0]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id.0]
    }

    pub fn find_block(&self, label: &str) -> Option<BlockId> {
        self.blocks.iter().position(|b| b.label == label).map(BlockId)
    }
}

/// A basic block: straight-line instructions closed by one terminator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicBlock {
    /// Block label (unique within function)
    pub label: String,
    pub instructions: Vec<Instruction>,
    /// `None` only while the block is under construction
    pub terminator: Option<Terminator>,
}

impl BasicBlock {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            instructions: Vec::new(),
            terminator: None,
        }
    }
}

/// Source position attached through debug metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLoc {
    pub line: u32,
    pub col: u32,
}

impl SourceLoc {
    pub fn new(line: u32, col: u32) -> Self {
        Self { line, col }
    }
}

/// An instruction together with its optional debug location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub kind: InstKind,
    pub loc: Option<SourceLoc>,
}

impl Instruction {
    pub fn new(kind: InstKind) -> Self {
        Self { kind, loc: None }
    }

    pub fn with_loc(mut self, loc: SourceLoc) -> Self {
        self.loc = Some(loc);
        self
    }
}

/// LIR instruction kinds (non-terminating)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InstKind {
    /// Stack slot: %dest = alloca ty (yields ty*)
    Alloca { dest: String, ty: Type },
    /// Memory read: %dest = load ty, ty* addr
    Load {
        dest: String,
        ty: Type,
        addr: Operand,
    },
    /// Memory write: store value, addr
    Store { value: Operand, addr: Operand },
    /// Integer arithmetic: %dest = op lhs, rhs
    Binary {
        dest: String,
        op: BinaryOp,
        lhs: Operand,
        rhs: Operand,
    },
    /// Integer or pointer comparison yielding i1
    ICmp {
        dest: String,
        pred: ICmpPred,
        lhs: Operand,
        rhs: Operand,
    },
    /// Conversion: %dest = op value to ty
    Cast {
        dest: String,
        op: CastOp,
        value: Operand,
        ty: Type,
    },
    /// Pointer offset in units of the pointee: %dest = getelementptr base, index
    Gep {
        dest: String,
        base: Operand,
        index: Operand,
    },
    /// Direct call by name
    Call {
        dest: Option<String>,
        callee: String,
        ret_ty: Type,
        args: Vec<Operand>,
    },
}

impl InstKind {
    /// Local defined by this instruction, if any
    pub fn dest(&self) -> Option<&str> {
        match self {
            InstKind::Alloca { dest, .. }
            | InstKind::Load { dest, .. }
            | InstKind::Binary { dest, .. }
            | InstKind::ICmp { dest, .. }
            | InstKind::Cast { dest, .. }
            | InstKind::Gep { dest, .. } => Some(dest),
            InstKind::Call { dest, .. } => dest.as_deref(),
            InstKind::Store { .. } => None,
        }
    }

    /// Type of the defined local, if any
    pub fn result_type(&self) -> Option<Type> {
        match self {
            InstKind::Alloca { ty, .. } => Some(ty.ptr_to()),
            InstKind::Load { ty, .. } => Some(ty.clone()),
            InstKind::Binary { lhs, .. } => Some(lhs.ty.clone()),
            InstKind::ICmp { .. } => Some(Type::I1),
            InstKind::Cast { ty, .. } => Some(ty.clone()),
            InstKind::Gep { base, .. } => Some(base.ty.clone()),
            InstKind::Call { dest: Some(_), ret_ty, .. } => Some(ret_ty.clone()),
            InstKind::Call { dest: None, .. } | InstKind::Store { .. } => None,
        }
    }

    /// Operands read by this instruction
    pub fn operands(&self) -> Vec<&Operand> {
        match self {
            InstKind::Alloca { .. } => vec![],
            InstKind::Load { addr, .. } => vec![addr],
            InstKind::Store { value, addr } => vec![value, addr],
            InstKind::Binary { lhs, rhs, .. } | InstKind::ICmp { lhs, rhs, .. } => vec![lhs, rhs],
            InstKind::Cast { value, .. } => vec![value],
            InstKind::Gep { base, index, .. } => vec![base, index],
            InstKind::Call { args, .. } => args.iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    SDiv,
    SRem,
    And,
    Or,
    Xor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ICmpPred {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
    Ult,
    Ule,
    Ugt,
    Uge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CastOp {
    Bitcast,
    PtrToInt,
    IntToPtr,
    ZExt,
    SExt,
    Trunc,
}

/// Block terminator (control flow)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Terminator {
    /// ret void / ret ty value
    Ret(Option<Operand>),
    /// Unconditional branch: br label %target
    Br(String),
    /// Conditional branch on an i1
    CondBr {
        cond: Operand,
        then_label: String,
        else_label: String,
    },
    Unreachable,
}

impl Terminator {
    /// Labels this terminator may transfer control to
    pub fn successors(&self) -> Vec<&str> {
        match self {
            Terminator::Br(target) => vec![target],
            Terminator::CondBr { then_label, else_label, .. } => vec![then_label, else_label],
            Terminator::Ret(_) | Terminator::Unreachable => vec![],
        }
    }

    pub fn operands(&self) -> Vec<&Operand> {
        match self {
            Terminator::Ret(Some(v)) => vec![v],
            Terminator::CondBr { cond, .. } => vec![cond],
            Terminator::Ret(None) | Terminator::Br(_) | Terminator::Unreachable => vec![],
        }
    }
}

/// A typed value at its point of use
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operand {
    pub ty: Type,
    pub value: Value,
}

impl Operand {
    pub fn local(ty: Type, name: impl Into<String>) -> Self {
        Self { ty, value: Value::Local(name.into()) }
    }

    pub fn global(ty: Type, name: impl Into<String>) -> Self {
        Self { ty, value: Value::Global(name.into()) }
    }

    pub fn int(ty: Type, n: i64) -> Self {
        Self { ty, value: Value::Int(n) }
    }

    pub fn bool(b: bool) -> Self {
        Self::int(Type::I1, b as i64)
    }

    /// The null constant of the given pointer type
    pub fn null(ty: Type) -> Self {
        Self { ty, value: Value::Null }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    /// Parameter or instruction result: %name
    Local(String),
    /// Address of a global or function: @name
    Global(String),
    Int(i64),
    Null,
}

/// LIR type system
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    Void,
    I1,
    I8,
    I32,
    I64,
    /// Typed pointer
    Ptr(Box<Type>),
    /// Fixed-size array
    Array { element: Box<Type>, len: u64 },
}

impl Type {
    pub fn ptr_to(&self) -> Type {
        Type::Ptr(Box::new(self.clone()))
    }

    pub fn array_of(element: Type, len: u64) -> Type {
        Type::Array { element: Box::new(element), len }
    }

    /// `i8*`, the type of C strings
    pub fn byte_ptr() -> Type {
        Type::I8.ptr_to()
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, Type::Ptr(_))
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Type::I1 | Type::I8 | Type::I32 | Type::I64)
    }

    pub fn pointee(&self) -> Option<&Type> {
        match self {
            Type::Ptr(inner) => Some(inner),
            _ => None,
        }
    }

    /// Width in bits of an integer type
    pub fn bit_width(&self) -> Option<u32> {
        match self {
            Type::I1 => Some(1),
            Type::I8 => Some(8),
            Type::I32 => Some(32),
            Type::I64 => Some(64),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::I1 => write!(f, "i1"),
            Type::I8 => write!(f, "i8"),
            Type::I32 => write!(f, "i32"),
            Type::I64 => write!(f, "i64"),
            Type::Ptr(inner) => write!(f, "{inner}*"),
            Type::Array { element, len } => write!(f, "[{len} x {element}]"),
        }
    }
}

// ============================================================================
// LIR Text Formatting
// ============================================================================

/// Format a module to LIR text; `parser::parse_module` reads it back
pub fn format_module(module: &Module) -> String {
    let mut out = format!("; ModuleID = '{}'\n", module.name);

    if !module.globals.is_empty() {
        out.push('\n');
        for global in &module.globals {
            out.push_str(&format_global(global));
            out.push('\n');
        }
    }

    for func in &module.functions {
        out.push('\n');
        out.push_str(&format_function(func));
    }

    out
}

fn format_global(global: &Global) -> String {
    let kind = if global.is_constant { "constant" } else { "global" };
    match &global.initializer {
        None => format!("@{} = external {} {}", global.name, kind, global.ty),
        Some(init) => format!("@{} = {} {} {}", global.name, kind, global.ty, format_initializer(init)),
    }
}

fn format_initializer(init: &Initializer) -> String {
    match init {
        Initializer::Int(n) => n.to_string(),
        Initializer::Null => "null".to_string(),
        Initializer::Address(name) => format!("@{name}"),
        Initializer::Bytes(bytes) => format!("c\"{}\"", escape_bytes(bytes)),
        Initializer::Zero => "zeroinitializer".to_string(),
    }
}

/// Escape bytes the way `c"..."` literals spell them
pub fn escape_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        if (0x20..0x7f).contains(&b) && b != b'"' && b != b'\\' {
            out.push(b as char);
        } else {
            out.push_str(&format!("\\{b:02X}"));
        }
    }
    out
}

/// Format a single function
pub fn format_function(func: &Function) -> String {
    let mut params: Vec<String> = func
        .params
        .iter()
        .map(|p| {
            let mut s = p.ty.to_string();
            for attr in &p.attrs {
                s.push(' ');
                s.push_str(format_param_attr(*attr));
            }
            if !func.is_declaration() {
                s.push_str(&format!(" %{}", p.name));
            }
            s
        })
        .collect();
    if func.is_var_arg {
        params.push("...".to_string());
    }

    let attrs: String = func.attrs.iter().map(|a| format!(" {}", format_fn_attr(*a))).collect();

    if func.is_declaration() {
        return format!("declare {} @{}({}){}\n", func.ret_ty, func.name, params.join(", "), attrs);
    }

    let mut out = format!("define {} @{}({}){} {{\n", func.ret_ty, func.name, params.join(", "), attrs);
    for block in &func.blocks {
        out.push_str(&format!("{}:\n", block.label));
        for inst in &block.instructions {
            out.push_str(&format!("  {}\n", format_instruction(inst)));
        }
        if let Some(term) = &block.terminator {
            out.push_str(&format!("  {}\n", format_terminator(term)));
        }
    }
    out.push_str("}\n");
    out
}

fn format_param_attr(attr: ParamAttr) -> &'static str {
    match attr {
        ParamAttr::NoCapture => "nocapture",
        ParamAttr::ReadOnly => "readonly",
    }
}

fn format_fn_attr(attr: FnAttr) -> &'static str {
    match attr {
        FnAttr::NoUnwind => "nounwind",
        FnAttr::NoReturn => "noreturn",
    }
}

/// Format an instruction, including its debug location
pub fn format_instruction(inst: &Instruction) -> String {
    let body = format_inst_kind(&inst.kind);
    match inst.loc {
        Some(loc) => format!("{body}, !loc({}, {})", loc.line, loc.col),
        None => body,
    }
}

fn format_inst_kind(kind: &InstKind) -> String {
    match kind {
        InstKind::Alloca { dest, ty } => format!("%{dest} = alloca {ty}"),
        InstKind::Load { dest, ty, addr } => {
            format!("%{dest} = load {ty}, {}", format_operand(addr))
        }
        InstKind::Store { value, addr } => {
            format!("store {}, {}", format_operand(value), format_operand(addr))
        }
        InstKind::Binary { dest, op, lhs, rhs } => {
            format!("%{dest} = {} {}, {}", binary_op_name(*op), format_operand(lhs), format_value(&rhs.value, &rhs.ty))
        }
        InstKind::ICmp { dest, pred, lhs, rhs } => {
            format!("%{dest} = icmp {} {}, {}", icmp_pred_name(*pred), format_operand(lhs), format_value(&rhs.value, &rhs.ty))
        }
        InstKind::Cast { dest, op, value, ty } => {
            format!("%{dest} = {} {} to {ty}", cast_op_name(*op), format_operand(value))
        }
        InstKind::Gep { dest, base, index } => {
            format!("%{dest} = getelementptr {}, {}", format_operand(base), format_operand(index))
        }
        InstKind::Call { dest, callee, ret_ty, args } => {
            let args_str: Vec<_> = args.iter().map(format_operand).collect();
            match dest {
                Some(d) => format!("%{d} = call {ret_ty} @{callee}({})", args_str.join(", ")),
                None => format!("call {ret_ty} @{callee}({})", args_str.join(", ")),
            }
        }
    }
}

/// Format a terminator
pub fn format_terminator(term: &Terminator) -> String {
    match term {
        Terminator::Ret(None) => "ret void".to_string(),
        Terminator::Ret(Some(v)) => format!("ret {}", format_operand(v)),
        Terminator::Br(target) => format!("br label %{target}"),
        Terminator::CondBr { cond, then_label, else_label } => {
            format!("br {}, label %{then_label}, label %{else_label}", format_operand(cond))
        }
        Terminator::Unreachable => "unreachable".to_string(),
    }
}

/// Format an operand with its type: `i32* %p`
pub fn format_operand(op: &Operand) -> String {
    format!("{} {}", op.ty, format_value(&op.value, &op.ty))
}

fn format_value(value: &Value, ty: &Type) -> String {
    match value {
        Value::Local(name) => format!("%{name}"),
        Value::Global(name) => format!("@{name}"),
        Value::Int(n) if *ty == Type::I1 => if *n != 0 { "true" } else { "false" }.to_string(),
        Value::Int(n) => n.to_string(),
        Value::Null => "null".to_string(),
    }
}

pub fn binary_op_name(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "add",
        BinaryOp::Sub => "sub",
        BinaryOp::Mul => "mul",
        BinaryOp::SDiv => "sdiv",
        BinaryOp::SRem => "srem",
        BinaryOp::And => "and",
        BinaryOp::Or => "or",
        BinaryOp::Xor => "xor",
    }
}

pub fn icmp_pred_name(pred: ICmpPred) -> &'static str {
    match pred {
        ICmpPred::Eq => "eq",
        ICmpPred::Ne => "ne",
        ICmpPred::Slt => "slt",
        ICmpPred::Sle => "sle",
        ICmpPred::Sgt => "sgt",
        ICmpPred::Sge => "sge",
        ICmpPred::Ult => "ult",
        ICmpPred::Ule => "ule",
        ICmpPred::Ugt => "ugt",
        ICmpPred::Uge => "uge",
    }
}

pub fn cast_op_name(op: CastOp) -> &'static str {
    match op {
        CastOp::Bitcast => "bitcast",
        CastOp::PtrToInt => "ptrtoint",
        CastOp::IntToPtr => "inttoptr",
        CastOp::ZExt => "zext",
        CastOp::SExt => "sext",
        CastOp::Trunc => "trunc",
    }
}
