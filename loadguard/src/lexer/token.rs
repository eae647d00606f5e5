//! Token definitions

use std::fmt;

use logos::{Lexer, Logos};

/// LIR token
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\n\r]+")]
#[logos(skip r";[^\n]*")]
pub enum Token {
    /// `%name`: parameter, instruction result or block label reference
    #[regex(r"%[A-Za-z0-9_.]+", |lex| lex.slice()[1..].to_string())]
    Local(String),

    /// `@name`: global or function
    #[regex(r"@[A-Za-z0-9_.]+", |lex| lex.slice()[1..].to_string())]
    Global(String),

    #[regex(r"-?[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),

    /// `c"..."` byte string with `\XX` escapes
    #[regex(r#"c"([^"\\]|\\[0-9A-Fa-f][0-9A-Fa-f])*""#, unescape_bytes)]
    Bytes(Vec<u8>),

    /// Keywords, type names, labels and attributes
    #[regex(r"[A-Za-z_][A-Za-z0-9_.]*", |lex| lex.slice().to_string())]
    Word(String),

    #[token("=")]
    Eq,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,
    #[token("*")]
    Star,
    #[token("!")]
    Bang,
    #[token("...")]
    Ellipsis,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
}

fn unescape_bytes(lex: &mut Lexer<Token>) -> Option<Vec<u8>> {
    let slice = lex.slice();
    let body = &slice.as_bytes()[2..slice.len() - 1];
    let mut out = Vec::with_capacity(body.len());
    let mut i = 0;
    while i < body.len() {
        if body[i] == b'\\' {
            let hex = std::str::from_utf8(body.get(i + 1..i + 3)?).ok()?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(body[i]);
            i += 1;
        }
    }
    Some(out)
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Local(name) => write!(f, "%{name}"),
            Token::Global(name) => write!(f, "@{name}"),
            Token::Int(n) => write!(f, "{n}"),
            Token::Bytes(_) => write!(f, "byte string"),
            Token::Word(w) => write!(f, "{w}"),
            Token::Eq => write!(f, "="),
            Token::Comma => write!(f, ","),
            Token::Colon => write!(f, ":"),
            Token::Star => write!(f, "*"),
            Token::Bang => write!(f, "!"),
            Token::Ellipsis => write!(f, "..."),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
        }
    }
}
