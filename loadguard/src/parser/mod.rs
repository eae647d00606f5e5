//! Recursive-descent parser for LIR text
//!
//! Reads exactly what `ir::format_module` prints, so printing and parsing
//! round-trip.

use crate::error::{Error, Result};
use crate::ir::{
    BasicBlock, BinaryOp, CastOp, FnAttr, Function, Global, ICmpPred, InstKind, Instruction,
    Initializer, Module, Operand, Param, ParamAttr, SourceLoc, Terminator, Type,
};
use crate::lexer::{tokenize, Token};
use crate::span::Span;

#[cfg(test)]
mod tests;

/// Module name used when the text has no `; ModuleID = '...'` header
pub const DEFAULT_MODULE_NAME: &str = "module";

/// Parse LIR source text into a module
pub fn parse_module(source: &str) -> Result<Module> {
    let tokens = tokenize(source)?;
    let name = module_name_from_header(source).unwrap_or(DEFAULT_MODULE_NAME);
    Parser::new(tokens, source.len()).module(name)
}

fn module_name_from_header(source: &str) -> Option<&str> {
    source
        .lines()
        .next()?
        .trim()
        .strip_prefix("; ModuleID = '")?
        .strip_suffix('\'')
}

struct Parser {
    tokens: Vec<(Token, Span)>,
    pos: usize,
    eof: Span,
}

impl Parser {
    fn new(tokens: Vec<(Token, Span)>, len: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            eof: Span::new(len, len),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.peek_at(0)
    }

    fn peek_at(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n).map(|(t, _)| t)
    }

    fn span(&self) -> Span {
        self.tokens.get(self.pos).map(|(_, s)| *s).unwrap_or(self.eof)
    }

    fn next(&mut self) -> Result<(Token, Span)> {
        match self.tokens.get(self.pos) {
            Some(entry) => {
                self.pos += 1;
                Ok(entry.clone())
            }
            None => Err(Error::parser("unexpected end of input", self.eof)),
        }
    }

    fn unexpected<T>(&self, expected: &str) -> Result<T> {
        let message = match self.peek() {
            Some(tok) => format!("expected {expected}, found `{tok}`"),
            None => format!("expected {expected}, found end of input"),
        };
        Err(Error::parser(message, self.span()))
    }

    fn eat(&mut self, tok: &Token) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: Token) -> Result<Span> {
        let span = self.span();
        if self.eat(&tok) {
            Ok(span)
        } else {
            self.unexpected(&format!("`{tok}`"))
        }
    }

    fn is_word(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(w)) if w == word)
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if self.is_word(word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_word(&mut self, word: &str) -> Result<()> {
        if self.eat_word(word) {
            Ok(())
        } else {
            self.unexpected(&format!("`{word}`"))
        }
    }

    fn word(&mut self) -> Result<(String, Span)> {
        match self.peek() {
            Some(Token::Word(_)) => match self.next()? {
                (Token::Word(w), span) => Ok((w, span)),
                (_, span) => Err(Error::parser("expected identifier", span)),
            },
            _ => self.unexpected("identifier"),
        }
    }

    fn local_name(&mut self) -> Result<String> {
        match self.peek() {
            Some(Token::Local(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => self.unexpected("`%name`"),
        }
    }

    fn global_name(&mut self) -> Result<String> {
        match self.peek() {
            Some(Token::Global(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => self.unexpected("`@name`"),
        }
    }

    fn int(&mut self) -> Result<(i64, Span)> {
        match self.peek() {
            Some(Token::Int(n)) => {
                let n = *n;
                let span = self.span();
                self.pos += 1;
                Ok((n, span))
            }
            _ => self.unexpected("integer"),
        }
    }

    // ------------------------------------------------------------------
    // Module level
    // ------------------------------------------------------------------

    fn module(mut self, name: &str) -> Result<Module> {
        let mut module = Module::new(name);

        while let Some(tok) = self.peek().cloned() {
            match tok {
                Token::Global(_) => {
                    let global = self.global()?;
                    module.add_global(global);
                }
                Token::Word(w) if w == "define" => {
                    let func = self.define()?;
                    module.add_function(func);
                }
                Token::Word(w) if w == "declare" => {
                    let func = self.declare()?;
                    module.add_function(func);
                }
                _ => return self.unexpected("global, `define` or `declare`"),
            }
        }

        Ok(module)
    }

    fn global(&mut self) -> Result<Global> {
        let name = self.global_name()?;
        self.expect(Token::Eq)?;
        let external = self.eat_word("external");
        let is_constant = match self.word()? {
            (w, _) if w == "global" => false,
            (w, _) if w == "constant" => true,
            (w, span) => return Err(Error::parser(format!("expected `global` or `constant`, found `{w}`"), span)),
        };
        let ty = self.ty()?;
        let initializer = if external { None } else { Some(self.initializer()?) };

        Ok(Global {
            name,
            ty,
            is_constant,
            initializer,
        })
    }

    fn initializer(&mut self) -> Result<Initializer> {
        match self.next()? {
            (Token::Int(n), _) => Ok(Initializer::Int(n)),
            (Token::Word(w), _) if w == "null" => Ok(Initializer::Null),
            (Token::Word(w), _) if w == "zeroinitializer" => Ok(Initializer::Zero),
            (Token::Global(name), _) => Ok(Initializer::Address(name)),
            (Token::Bytes(bytes), _) => Ok(Initializer::Bytes(bytes)),
            (tok, span) => Err(Error::parser(format!("expected initializer, found `{tok}`"), span)),
        }
    }

    fn define(&mut self) -> Result<Function> {
        self.expect_word("define")?;
        let ret_ty = self.ty()?;
        let name = self.global_name()?;
        self.expect(Token::LParen)?;
        let (params, is_var_arg) = self.params(true)?;
        let attrs = self.fn_attrs();
        let open = self.expect(Token::LBrace)?;

        let mut blocks = Vec::new();
        while !self.eat(&Token::RBrace) {
            blocks.push(self.block()?);
        }
        if blocks.is_empty() {
            return Err(Error::parser(format!("function `@{name}` has no blocks"), open));
        }

        Ok(Function {
            name,
            params,
            ret_ty,
            is_var_arg,
            attrs,
            blocks,
        })
    }

    fn declare(&mut self) -> Result<Function> {
        self.expect_word("declare")?;
        let ret_ty = self.ty()?;
        let name = self.global_name()?;
        self.expect(Token::LParen)?;
        let (params, is_var_arg) = self.params(false)?;
        let attrs = self.fn_attrs();

        Ok(Function {
            name,
            params,
            ret_ty,
            is_var_arg,
            attrs,
            blocks: Vec::new(),
        })
    }

    /// Parameter list after `(`, through the closing `)`
    fn params(&mut self, named: bool) -> Result<(Vec<Param>, bool)> {
        let mut params = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok((params, false));
        }

        loop {
            if self.eat(&Token::Ellipsis) {
                self.expect(Token::RParen)?;
                return Ok((params, true));
            }

            let ty = self.ty()?;
            let mut attrs = Vec::new();
            loop {
                if self.eat_word("nocapture") {
                    attrs.push(ParamAttr::NoCapture);
                } else if self.eat_word("readonly") {
                    attrs.push(ParamAttr::ReadOnly);
                } else {
                    break;
                }
            }
            let name = if named {
                self.local_name()?
            } else {
                format!("arg{}", params.len())
            };
            params.push(Param { name, ty, attrs });

            if !self.eat(&Token::Comma) {
                self.expect(Token::RParen)?;
                return Ok((params, false));
            }
        }
    }

    fn fn_attrs(&mut self) -> Vec<FnAttr> {
        let mut attrs = Vec::new();
        loop {
            if self.eat_word("nounwind") {
                attrs.push(FnAttr::NoUnwind);
            } else if self.eat_word("noreturn") {
                attrs.push(FnAttr::NoReturn);
            } else {
                return attrs;
            }
        }
    }

    fn ty(&mut self) -> Result<Type> {
        let mut ty = match self.next()? {
            (Token::Word(w), span) => match w.as_str() {
                "void" => Type::Void,
                "i1" => Type::I1,
                "i8" => Type::I8,
                "i32" => Type::I32,
                "i64" => Type::I64,
                _ => return Err(Error::parser(format!("unknown type `{w}`"), span)),
            },
            (Token::LBracket, open) => {
                let (len, span) = self.int()?;
                let len = u64::try_from(len)
                    .map_err(|_| Error::parser("array length must not be negative", open.merge(span)))?;
                self.expect_word("x")?;
                let element = self.ty()?;
                self.expect(Token::RBracket)?;
                Type::array_of(element, len)
            }
            (tok, span) => return Err(Error::parser(format!("expected type, found `{tok}`"), span)),
        };

        while self.eat(&Token::Star) {
            ty = ty.ptr_to();
        }
        Ok(ty)
    }

    // ------------------------------------------------------------------
    // Function bodies
    // ------------------------------------------------------------------

    fn block(&mut self) -> Result<BasicBlock> {
        let (label, _) = self.word()?;
        self.expect(Token::Colon)?;
        let mut block = BasicBlock::new(label);

        loop {
            if let Some(term) = self.terminator()? {
                block.terminator = Some(term);
                return Ok(block);
            }
            block.instructions.push(self.instruction()?);
        }
    }

    fn terminator(&mut self) -> Result<Option<Terminator>> {
        let term = if self.eat_word("ret") {
            if self.eat_word("void") {
                Terminator::Ret(None)
            } else {
                Terminator::Ret(Some(self.operand()?))
            }
        } else if self.eat_word("br") {
            if self.eat_word("label") {
                Terminator::Br(self.local_name()?)
            } else {
                let cond = self.operand()?;
                self.expect(Token::Comma)?;
                self.expect_word("label")?;
                let then_label = self.local_name()?;
                self.expect(Token::Comma)?;
                self.expect_word("label")?;
                let else_label = self.local_name()?;
                Terminator::CondBr {
                    cond,
                    then_label,
                    else_label,
                }
            }
        } else if self.eat_word("unreachable") {
            Terminator::Unreachable
        } else {
            return Ok(None);
        };
        Ok(Some(term))
    }

    fn instruction(&mut self) -> Result<Instruction> {
        let dest = match self.peek() {
            Some(Token::Local(_)) => {
                let name = self.local_name()?;
                self.expect(Token::Eq)?;
                Some(name)
            }
            _ => None,
        };
        let (op, op_span) = self.word()?;
        let need_dest = |dest: Option<String>| {
            dest.ok_or_else(|| Error::parser(format!("`{op}` must define a value"), op_span))
        };

        let kind = match op.as_str() {
            "alloca" => InstKind::Alloca {
                dest: need_dest(dest)?,
                ty: self.ty()?,
            },
            "load" => {
                let dest = need_dest(dest)?;
                let ty = self.ty()?;
                self.expect(Token::Comma)?;
                let addr = self.operand()?;
                InstKind::Load { dest, ty, addr }
            }
            "store" => {
                if dest.is_some() {
                    return Err(Error::parser("`store` does not define a value", op_span));
                }
                let value = self.operand()?;
                self.expect(Token::Comma)?;
                let addr = self.operand()?;
                InstKind::Store { value, addr }
            }
            "icmp" => {
                let dest = need_dest(dest)?;
                let pred = self.icmp_pred()?;
                let lhs = self.operand()?;
                self.expect(Token::Comma)?;
                let rhs = self.value(lhs.ty.clone())?;
                InstKind::ICmp { dest, pred, lhs, rhs }
            }
            "getelementptr" => {
                let dest = need_dest(dest)?;
                let base = self.operand()?;
                self.expect(Token::Comma)?;
                let index = self.operand()?;
                InstKind::Gep { dest, base, index }
            }
            "call" => {
                let ret_ty = self.ty()?;
                let callee = self.global_name()?;
                self.expect(Token::LParen)?;
                let mut args = Vec::new();
                if !self.eat(&Token::RParen) {
                    loop {
                        args.push(self.operand()?);
                        if !self.eat(&Token::Comma) {
                            self.expect(Token::RParen)?;
                            break;
                        }
                    }
                }
                InstKind::Call {
                    dest,
                    callee,
                    ret_ty,
                    args,
                }
            }
            other => {
                if let Some(bin) = binary_op_from_name(other) {
                    let dest = need_dest(dest)?;
                    let lhs = self.operand()?;
                    self.expect(Token::Comma)?;
                    let rhs = self.value(lhs.ty.clone())?;
                    InstKind::Binary { dest, op: bin, lhs, rhs }
                } else if let Some(cast) = cast_op_from_name(other) {
                    let dest = need_dest(dest)?;
                    let value = self.operand()?;
                    self.expect_word("to")?;
                    let ty = self.ty()?;
                    InstKind::Cast { dest, op: cast, value, ty }
                } else {
                    return Err(Error::parser(format!("unknown instruction `{other}`"), op_span));
                }
            }
        };

        let loc = self.debug_loc()?;
        Ok(Instruction { kind, loc })
    }

    /// Optional `, !loc(line, col)` suffix
    fn debug_loc(&mut self) -> Result<Option<SourceLoc>> {
        if self.peek() != Some(&Token::Comma) || self.peek_at(1) != Some(&Token::Bang) {
            return Ok(None);
        }
        self.pos += 2;
        self.expect_word("loc")?;
        self.expect(Token::LParen)?;
        let line = self.location_component()?;
        self.expect(Token::Comma)?;
        let col = self.location_component()?;
        self.expect(Token::RParen)?;
        Ok(Some(SourceLoc::new(line, col)))
    }

    fn location_component(&mut self) -> Result<u32> {
        let (n, span) = self.int()?;
        u32::try_from(n).map_err(|_| Error::parser(format!("invalid source position `{n}`"), span))
    }

    fn icmp_pred(&mut self) -> Result<ICmpPred> {
        let (w, span) = self.word()?;
        let pred = match w.as_str() {
            "eq" => ICmpPred::Eq,
            "ne" => ICmpPred::Ne,
            "slt" => ICmpPred::Slt,
            "sle" => ICmpPred::Sle,
            "sgt" => ICmpPred::Sgt,
            "sge" => ICmpPred::Sge,
            "ult" => ICmpPred::Ult,
            "ule" => ICmpPred::Ule,
            "ugt" => ICmpPred::Ugt,
            "uge" => ICmpPred::Uge,
            _ => return Err(Error::parser(format!("unknown comparison `{w}`"), span)),
        };
        Ok(pred)
    }

    /// `type value`
    fn operand(&mut self) -> Result<Operand> {
        let ty = self.ty()?;
        self.value(ty)
    }

    /// A value whose type is already known
    fn value(&mut self, ty: Type) -> Result<Operand> {
        match self.next()? {
            (Token::Local(name), _) => Ok(Operand::local(ty, name)),
            (Token::Global(name), _) => Ok(Operand::global(ty, name)),
            (Token::Int(n), _) => Ok(Operand::int(ty, n)),
            (Token::Word(w), _) if w == "true" => Ok(Operand::int(ty, 1)),
            (Token::Word(w), _) if w == "false" => Ok(Operand::int(ty, 0)),
            (Token::Word(w), _) if w == "null" => Ok(Operand::null(ty)),
            (tok, span) => Err(Error::parser(format!("expected value, found `{tok}`"), span)),
        }
    }
}

fn binary_op_from_name(name: &str) -> Option<BinaryOp> {
    Some(match name {
        "add" => BinaryOp::Add,
        "sub" => BinaryOp::Sub,
        "mul" => BinaryOp::Mul,
        "sdiv" => BinaryOp::SDiv,
        "srem" => BinaryOp::SRem,
        "and" => BinaryOp::And,
        "or" => BinaryOp::Or,
        "xor" => BinaryOp::Xor,
        _ => return None,
    })
}

fn cast_op_from_name(name: &str) -> Option<CastOp> {
    Some(match name {
        "bitcast" => CastOp::Bitcast,
        "ptrtoint" => CastOp::PtrToInt,
        "inttoptr" => CastOp::IntToPtr,
        "zext" => CastOp::ZExt,
        "sext" => CastOp::SExt,
        "trunc" => CastOp::Trunc,
        _ => return None,
    })
}
