//! Runtime errors for the interpreter

use thiserror::Error;

/// Runtime error during interpretation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Runtime error: {message}")]
pub struct RuntimeError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Kinds of runtime errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Load or store through a null pointer
    NullDereference,
    /// Access outside a live memory object
    InvalidAccess,
    /// `free` of something that is not a live heap object
    InvalidFree,
    /// Use of an undefined local value
    UndefinedValue,
    /// Call to a function with neither a body nor a built-in
    UndefinedFunction,
    /// Operand of the wrong kind for the instruction
    TypeError,
    /// Division by zero
    DivisionByZero,
    /// Argument count mismatch
    ArityMismatch,
    /// Malformed `printf` format or argument
    FormatError,
    /// Reached an `unreachable` terminator
    Unreachable,
    /// Call depth limit exceeded
    StackOverflow,
    /// Instruction budget exhausted
    StepLimit,
    /// Object too large to allocate or address
    OutOfMemory,
    /// Control flow: the program called `exit` with this status
    Exit(i32),
}

impl RuntimeError {
    pub fn null_dereference(op: &str) -> Self {
        RuntimeError {
            kind: ErrorKind::NullDereference,
            message: format!("null pointer dereference in {op}"),
        }
    }

    pub fn invalid_access(what: &str) -> Self {
        RuntimeError {
            kind: ErrorKind::InvalidAccess,
            message: format!("invalid memory access: {what}"),
        }
    }

    pub fn invalid_free(what: &str) -> Self {
        RuntimeError {
            kind: ErrorKind::InvalidFree,
            message: format!("invalid free: {what}"),
        }
    }

    /// `name` carries its sigil, `%x` or `@g`
    pub fn undefined_value(name: &str) -> Self {
        RuntimeError {
            kind: ErrorKind::UndefinedValue,
            message: format!("undefined value: {name}"),
        }
    }

    pub fn undefined_function(name: &str) -> Self {
        RuntimeError {
            kind: ErrorKind::UndefinedFunction,
            message: format!("undefined function: @{name}"),
        }
    }

    pub fn type_error(expected: &str, got: &str) -> Self {
        RuntimeError {
            kind: ErrorKind::TypeError,
            message: format!("type error: expected {expected}, got {got}"),
        }
    }

    pub fn division_by_zero() -> Self {
        RuntimeError {
            kind: ErrorKind::DivisionByZero,
            message: "division by zero".to_string(),
        }
    }

    pub fn arity_mismatch(name: &str, expected: usize, got: usize) -> Self {
        RuntimeError {
            kind: ErrorKind::ArityMismatch,
            message: format!("function @{name} expects {expected} argument(s), got {got}"),
        }
    }

    pub fn format_error(msg: &str) -> Self {
        RuntimeError {
            kind: ErrorKind::FormatError,
            message: format!("printf: {msg}"),
        }
    }

    pub fn unreachable(func: &str) -> Self {
        RuntimeError {
            kind: ErrorKind::Unreachable,
            message: format!("reached unreachable in @{func}"),
        }
    }

    pub fn stack_overflow(limit: usize) -> Self {
        RuntimeError {
            kind: ErrorKind::StackOverflow,
            message: format!("stack overflow: call depth exceeded {limit}"),
        }
    }

    pub fn step_limit(limit: u64) -> Self {
        RuntimeError {
            kind: ErrorKind::StepLimit,
            message: format!("step limit of {limit} instructions exceeded"),
        }
    }

    pub fn out_of_memory(size: u64) -> Self {
        RuntimeError {
            kind: ErrorKind::OutOfMemory,
            message: format!("out of memory: cannot allocate {size} bytes"),
        }
    }

    pub fn exit(code: i32) -> Self {
        RuntimeError {
            kind: ErrorKind::Exit(code),
            message: format!("exit({code})"),
        }
    }

    /// Status if this is a call to `exit` rather than a fault
    pub fn exit_code(&self) -> Option<i32> {
        match self.kind {
            ErrorKind::Exit(code) => Some(code),
            _ => None,
        }
    }
}

/// Result type for interpreter operations
pub type InterpResult<T> = Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_dereference() {
        let err = RuntimeError::null_dereference("load");
        assert_eq!(err.kind, ErrorKind::NullDereference);
        assert_eq!(err.to_string(), "Runtime error: null pointer dereference in load");
    }

    #[test]
    fn test_exit_is_not_a_fault() {
        assert_eq!(RuntimeError::exit(3).exit_code(), Some(3));
        assert_eq!(RuntimeError::division_by_zero().exit_code(), None);
    }

    #[test]
    fn test_arity_mismatch() {
        let err = RuntimeError::arity_mismatch("exit", 1, 0);
        assert_eq!(err.kind, ErrorKind::ArityMismatch);
        assert!(err.message.contains("@exit"));
    }
}
