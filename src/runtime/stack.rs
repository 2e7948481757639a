use crate::lang::value::Value;
use crate::runtime::runtime_error::{RuntimeError, RuntimeErrorKind};

/// The operand stack: runtime values consumed and produced by instructions.
///
/// The soft maximum is configurable; exceeding it fails with
/// `StackOverflow` rather than growing without bound.
#[derive(Debug)]
pub struct OperandStack {
    values: Vec<Value>,
    max_size: usize,
}

impl OperandStack {
    pub fn new(max_size: usize) -> Self {
        OperandStack {
            values: Vec::new(),
            max_size,
        }
    }

    pub fn push(&mut self, value: Value) -> Result<(), RuntimeError> {
        if self.values.len() >= self.max_size {
            return Err(RuntimeError::new(
                RuntimeErrorKind::StackOverflow,
                format!("operand stack limit exceeded ({})", self.max_size),
            ));
        }
        self.values.push(value);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.values.pop().ok_or_else(|| {
            RuntimeError::new(
                RuntimeErrorKind::StackUnderflow,
                "pop from an empty operand stack",
            )
        })
    }

    pub fn depth(&self) -> usize {
        self.values.len()
    }

    /// Drop values above `depth`; used by `RETURN` to restore the caller's
    /// stack baseline.
    pub fn truncate(&mut self, depth: usize) {
        self.values.truncate(depth);
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

/// A call frame: where to resume, the variable-store baseline, and the
/// operand-stack depth to restore on return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallFrame {
    pub return_pc: usize,
    pub base_of_locals: usize,
    pub saved_depth: usize,
}

/// The call stack, bounded by a configurable frame limit.
#[derive(Debug)]
pub struct CallStack {
    frames: Vec<CallFrame>,
    max_depth: usize,
}

impl CallStack {
    pub fn new(max_depth: usize) -> Self {
        CallStack {
            frames: Vec::new(),
            max_depth,
        }
    }

    pub fn push_frame(&mut self, frame: CallFrame) -> Result<(), RuntimeError> {
        if self.frames.len() >= self.max_depth {
            return Err(RuntimeError::new(
                RuntimeErrorKind::StackOverflow,
                format!("call stack limit exceeded ({})", self.max_depth),
            ));
        }
        self.frames.push(frame);
        Ok(())
    }

    pub fn pop_frame(&mut self) -> Option<CallFrame> {
        self.frames.pop()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Return addresses of all live frames, outermost first. Captured into
    /// runtime errors for the traceback.
    pub fn snapshot(&self) -> Vec<usize> {
        self.frames.iter().map(|f| f.return_pc).collect()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop_order() {
        let mut stack = OperandStack::new(16);
        stack.push(Value::Integer(1)).unwrap();
        stack.push(Value::Integer(2)).unwrap();

        assert_eq!(stack.pop().unwrap(), Value::Integer(2));
        assert_eq!(stack.pop().unwrap(), Value::Integer(1));
    }

    #[test]
    fn test_pop_empty_underflows() {
        let mut stack = OperandStack::new(16);
        let err = stack.pop().unwrap_err();
        assert_eq!(err.kind, RuntimeErrorKind::StackUnderflow);
    }

    #[test]
    fn test_push_beyond_limit_overflows() {
        let mut stack = OperandStack::new(2);
        stack.push(Value::Integer(1)).unwrap();
        stack.push(Value::Integer(2)).unwrap();

        let err = stack.push(Value::Integer(3)).unwrap_err();
        assert_eq!(err.kind, RuntimeErrorKind::StackOverflow);
    }

    #[test]
    fn test_truncate_restores_baseline() {
        let mut stack = OperandStack::new(16);
        for i in 0..5 {
            stack.push(Value::Integer(i)).unwrap();
        }
        stack.truncate(2);

        assert_eq!(stack.depth(), 2);
        assert_eq!(stack.pop().unwrap(), Value::Integer(1));
    }

    #[test]
    fn test_call_stack_limit() {
        let mut frames = CallStack::new(1);
        let frame = CallFrame {
            return_pc: 0,
            base_of_locals: 0,
            saved_depth: 0,
        };
        frames.push_frame(frame).unwrap();

        let err = frames.push_frame(frame).unwrap_err();
        assert_eq!(err.kind, RuntimeErrorKind::StackOverflow);
    }

    #[test]
    fn test_call_stack_snapshot_order() {
        let mut frames = CallStack::new(8);
        for pc in [10, 20, 30] {
            frames
                .push_frame(CallFrame {
                    return_pc: pc,
                    base_of_locals: 0,
                    saved_depth: 0,
                })
                .unwrap();
        }

        assert_eq!(frames.snapshot(), vec![10, 20, 30]);
    }
}
