//! Reference interpreter
//!
//! Executes a module from `main` with C-like semantics: loads through
//! null trap, `exit` ends the run, and `printf`/`puts` output is captured.

mod error;
mod eval;
mod libc;
mod memory;
mod value;

pub use error::{ErrorKind, InterpResult, RuntimeError};
pub use eval::Interpreter;
pub use libc::{format_printf, BuiltinFn, Runtime};
pub use memory::{Memory, SlotKind, MAX_OBJECT_SIZE};
pub use value::{type_size, Address, Value};

use tracing::debug;

use crate::ir::Module;

/// Exit status reported for a trapped run, as a shell reports SIGSEGV
pub const TRAP_EXIT_CODE: i32 = 139;

/// Interpreter limits
#[derive(Debug, Clone, Copy)]
pub struct InterpConfig {
    /// Instructions and terminators executed before giving up
    pub max_steps: u64,
    /// Maximum call depth
    pub max_call_depth: usize,
}

impl InterpConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_steps(mut self, steps: u64) -> Self {
        self.max_steps = steps;
        self
    }

    pub fn max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }
}

impl Default for InterpConfig {
    fn default() -> Self {
        Self {
            max_steps: 10_000_000,
            max_call_depth: 1024,
        }
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exit {
    /// `main` returned, or the program called `exit`
    Code(i32),
    /// The program faulted
    Trap(RuntimeError),
}

/// Result of running a program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub exit: Exit,
    /// Everything the program wrote to standard output, byte for byte
    pub stdout: Vec<u8>,
}

impl RunOutcome {
    /// Process exit status: the program's code, or 139 for a trap
    pub fn exit_code(&self) -> i32 {
        match &self.exit {
            Exit::Code(code) => *code,
            Exit::Trap(_) => TRAP_EXIT_CODE,
        }
    }

    /// Standard output as text, with invalid UTF-8 replaced
    pub fn stdout_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    pub fn trap(&self) -> Option<&RuntimeError> {
        match &self.exit {
            Exit::Trap(err) => Some(err),
            Exit::Code(_) => None,
        }
    }
}

/// Run `main` in `module`
pub fn run_module(module: &Module, config: InterpConfig) -> RunOutcome {
    let mut interp = match Interpreter::new(module, config) {
        Ok(interp) => interp,
        Err(err) => {
            return RunOutcome {
                exit: Exit::Trap(err),
                stdout: Vec::new(),
            };
        }
    };

    let exit = match interp.run_main() {
        Ok(code) => Exit::Code(code),
        Err(err) => match err.exit_code() {
            Some(code) => Exit::Code(code),
            None => Exit::Trap(err),
        },
    };
    debug!(steps = interp.steps(), ?exit, "run finished");

    RunOutcome {
        exit,
        stdout: interp.into_stdout(),
    }
}
