use crate::frontend::lexer::Span;

#[derive(Debug, Clone)]
pub enum CompileError {
    /// Read of a variable that has never been assigned.
    NameError { name: String, line: usize, col: usize },

    /// Operator applied to literal operands whose types can never combine.
    TypeError {
        message: String,
        line: usize,
        col: usize,
    },

    /// A language construct the generator does not accept.
    Unsupported {
        what: String,
        line: usize,
        col: usize,
        hint: Option<String>,
    },

    /// A branch label that was never bound. This is a generator bug, not a
    /// user error.
    UnresolvedLabel { label: usize },

    /// Internal generator invariant violation (e.g. the symbolic stack
    /// depth diverging between branches).
    Internal(String),
}

impl CompileError {
    pub fn undefined_name(name: &str, span: &Span) -> Self {
        CompileError::NameError {
            name: name.to_string(),
            line: span.line,
            col: span.col,
        }
    }

    pub fn type_clash(message: impl Into<String>, span: &Span) -> Self {
        CompileError::TypeError {
            message: message.into(),
            line: span.line,
            col: span.col,
        }
    }

    pub fn unsupported(what: impl Into<String>, span: &Span, hint: impl Into<String>) -> Self {
        CompileError::Unsupported {
            what: what.into(),
            line: span.line,
            col: span.col,
            hint: Some(hint.into()),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        CompileError::Internal(message.into())
    }

    /// True for the `NameError` kind; the CLI reports the kind by name.
    pub fn is_name_error(&self) -> bool {
        matches!(self, CompileError::NameError { .. })
    }

    /// True for the `TypeError` kind.
    pub fn is_type_error(&self) -> bool {
        matches!(self, CompileError::TypeError { .. })
    }
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompileError::NameError { name, line, col } => {
                write!(
                    f,
                    "compile error: {}:{}: NameError: name '{}' is not defined",
                    line, col, name
                )
            }
            CompileError::TypeError { message, line, col } => {
                write!(f, "compile error: {}:{}: TypeError: {}", line, col, message)
            }
            CompileError::Unsupported {
                what,
                line,
                col,
                hint,
            } => {
                write!(f, "compile error: {}:{}: {}", line, col, what)?;
                if let Some(h) = hint {
                    write!(f, "\n  hint: {}", h)?;
                }
                Ok(())
            }
            CompileError::UnresolvedLabel { label } => {
                write!(f, "compile error: internal error: unresolved label {}", label)
            }
            CompileError::Internal(message) => {
                write!(f, "compile error: internal error: {}", message)
            }
        }
    }
}

impl std::error::Error for CompileError {}
