//! loadguard
//!
//! Null-pointer load instrumentation for a small SSA IR. Every `load` is
//! preceded by a call to a location-specific guard that prints a
//! diagnostic and exits with status 1 when the address is null.

pub mod driver;
pub mod error;
pub mod instrument;
pub mod interp;
pub mod ir;
pub mod lexer;
pub mod parser;
pub mod pass;
pub mod span;

pub use error::{Error, Result};
pub use span::Span;
