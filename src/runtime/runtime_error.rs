use crate::bytecode::op::Op;

/// Classification of a runtime failure, reported by name in diagnostics
/// and used by the driver to pick an exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeErrorKind {
    /// Division or modulo by zero, integer overflow.
    Arithmetic,
    /// Operand type mismatch discovered while executing.
    Type,
    StackOverflow,
    StackUnderflow,
    InvalidOpcode,
    /// `RETURN` with an empty call stack.
    BadReturn,
    /// Reading stdin or writing stdout failed (e.g. a closed pipe during
    /// `PRINT`).
    Io,
    /// A state the loader and generator are supposed to make impossible.
    Internal,
}

impl RuntimeErrorKind {
    pub fn name(self) -> &'static str {
        match self {
            RuntimeErrorKind::Arithmetic => "ArithmeticError",
            RuntimeErrorKind::Type => "TypeError",
            RuntimeErrorKind::StackOverflow => "StackOverflow",
            RuntimeErrorKind::StackUnderflow => "StackUnderflow",
            RuntimeErrorKind::InvalidOpcode => "InvalidOpcode",
            RuntimeErrorKind::BadReturn => "BadReturn",
            RuntimeErrorKind::Io => "IOError",
            RuntimeErrorKind::Internal => "InternalError",
        }
    }
}

/// A runtime failure with enough context for one diagnostic line plus an
/// optional traceback: the failing pc, the opcode, and the call-stack
/// snapshot at the moment of failure.
#[derive(Debug, Clone)]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    pub message: String,
    pub pc: Option<usize>,
    pub opcode: Option<u8>,
    /// Return addresses of the frames that were live, innermost last.
    pub call_stack: Vec<usize>,
}

impl RuntimeError {
    pub fn new(kind: RuntimeErrorKind, message: impl Into<String>) -> Self {
        RuntimeError {
            kind,
            message: message.into(),
            pc: None,
            opcode: None,
            call_stack: Vec::new(),
        }
    }

    /// Attach execution context; does not overwrite context already set.
    pub fn at(mut self, pc: usize, opcode: u8, call_stack: Vec<usize>) -> Self {
        if self.pc.is_none() {
            self.pc = Some(pc);
            self.opcode = Some(opcode);
            self.call_stack = call_stack;
        }
        self
    }
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "runtime error: {}: {}", self.kind.name(), self.message)?;

        if let Some(pc) = self.pc {
            let mnemonic = self
                .opcode
                .and_then(Op::from_u8)
                .map(|op| op.mnemonic())
                .unwrap_or("?");
            write!(f, "\n  at pc={:04} ({})", pc, mnemonic)?;
        }

        if !self.call_stack.is_empty() {
            write!(f, "\n  call stack:")?;
            for (i, return_pc) in self.call_stack.iter().rev().enumerate() {
                write!(f, "\n    {}: return to {:04}", i, return_pc)?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {}
