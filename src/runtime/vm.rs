use std::io::{BufRead, Write};

use crate::bytecode::op::Op;
use crate::bytecode::program::{Program, SymbolKind, BUILTIN_INPUT, BUILTIN_PRINT};
use crate::bytecode::stack_check;
use crate::lang::value::Value;
use crate::runtime::runtime_error::{RuntimeError, RuntimeErrorKind};
use crate::runtime::stack::{CallFrame, CallStack, OperandStack};
use crate::runtime::stats::ExecStats;

/// Resource limits and diagnostics switches for one VM instance.
#[derive(Debug, Clone)]
pub struct VmConfig {
    pub max_stack: usize,
    pub max_frames: usize,
    /// Trace every instruction to stderr while executing.
    pub trace: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            max_stack: 1024,
            max_frames: 256,
            trace: false,
        }
    }
}

enum Flow {
    Continue,
    Halt,
}

/// The stack virtual machine.
///
/// Owns the operand stack, call stack and variable store; borrows the
/// program (constants, symbols, code) for the duration of a run. I/O is
/// generic so tests can substitute buffers for the process streams.
pub struct Vm<R = std::io::BufReader<std::io::Stdin>, W = std::io::Stdout>
where
    R: BufRead,
    W: Write,
{
    config: VmConfig,
    stack: OperandStack,
    frames: CallStack,
    vars: Vec<Value>,
    stats: ExecStats,
    input: R,
    output: W,
}

impl Vm {
    pub fn new() -> Self {
        Vm::with_config(VmConfig::default())
    }

    pub fn with_config(config: VmConfig) -> Self {
        Vm::with_io(
            config,
            std::io::BufReader::new(std::io::stdin()),
            std::io::stdout(),
        )
    }
}

impl Default for Vm {
    fn default() -> Self {
        Vm::new()
    }
}

impl<R: BufRead, W: Write> Vm<R, W> {
    pub fn with_io(config: VmConfig, input: R, output: W) -> Self {
        let max_stack = config.max_stack;
        let max_frames = config.max_frames;
        Vm {
            config,
            stack: OperandStack::new(max_stack),
            frames: CallStack::new(max_frames),
            vars: Vec::new(),
            stats: ExecStats::new(),
            input,
            output,
        }
    }

    pub fn stats(&self) -> &ExecStats {
        &self.stats
    }

    pub fn output(&self) -> &W {
        &self.output
    }

    /// Final operand-stack depth, exposed for the performance report.
    pub fn stack_depth(&self) -> usize {
        self.stack.depth()
    }

    /// Execute a program from its entry point until `HALT`, the end of the
    /// code section, or a runtime error. All state is reset first; no
    /// partial state survives a failed run.
    pub fn run(&mut self, program: &Program) -> Result<(), RuntimeError> {
        self.stack.clear();
        self.frames.clear();
        self.vars = vec![Value::Null; program.var_count()];

        stack_check::check_code(program).map_err(|e| {
            RuntimeError::new(RuntimeErrorKind::StackUnderflow, e.message.clone()).at(
                e.offset,
                program.code.get(e.offset).copied().unwrap_or(0),
                Vec::new(),
            )
        })?;

        self.stats.start();
        let result = self.execute(program);
        self.stats.stop();
        result
    }

    fn execute(&mut self, program: &Program) -> Result<(), RuntimeError> {
        let code = &program.code;
        let mut pc = 0usize;

        while pc < code.len() {
            let offset = pc;
            let byte = code[offset];
            match self.step(program, &mut pc) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Halt) => return Ok(()),
                Err(e) => return Err(e.at(offset, byte, self.frames.snapshot())),
            }
        }

        // Running off the end of the code section halts.
        Ok(())
    }

    fn step(&mut self, program: &Program, pc: &mut usize) -> Result<Flow, RuntimeError> {
        let code = &program.code;
        let offset = *pc;

        let byte = code[offset];
        let op = Op::from_u8(byte).ok_or_else(|| {
            RuntimeError::new(
                RuntimeErrorKind::InvalidOpcode,
                format!("unknown opcode 0x{:02X}", byte),
            )
        })?;
        *pc += 1;

        let width = op.operand_width();
        if *pc + width > code.len() {
            return Err(RuntimeError::new(
                RuntimeErrorKind::InvalidOpcode,
                format!("{} is missing operand bytes", op.mnemonic()),
            ));
        }
        let operand = &code[*pc..*pc + width];
        *pc += width;

        self.stats.record(byte);
        if self.config.trace {
            eprintln!(
                "PC={:04} | {:<14} | stack depth {}",
                offset,
                op.mnemonic(),
                self.stack.depth()
            );
        }

        match op {
            Op::Nop => {}

            Op::LoadConst | Op::LoadConstW => {
                let index = index_operand(operand);
                let constant = program.constants.get(index).ok_or_else(|| {
                    RuntimeError::new(
                        RuntimeErrorKind::Internal,
                        format!("constant index {} out of range", index),
                    )
                })?;
                self.stack.push(constant.to_value())?;
            }

            Op::LoadVar | Op::LoadVarW => {
                let slot = index_operand(operand);
                let value = self.vars.get(slot).cloned().ok_or_else(|| {
                    RuntimeError::new(
                        RuntimeErrorKind::Internal,
                        format!("variable slot {} out of range", slot),
                    )
                })?;
                self.stack.push(value)?;
            }

            Op::StoreVar | Op::StoreVarW => {
                let slot = index_operand(operand);
                let value = self.stack.pop()?;
                match self.vars.get_mut(slot) {
                    Some(cell) => *cell = value,
                    None => {
                        return Err(RuntimeError::new(
                            RuntimeErrorKind::Internal,
                            format!("variable slot {} out of range", slot),
                        ));
                    }
                }
            }

            Op::Pop => {
                self.stack.pop()?;
            }

            Op::Dup => {
                let value = self.stack.pop()?;
                self.stack.push(value.clone())?;
                self.stack.push(value)?;
            }

            Op::Swap => {
                let b = self.stack.pop()?;
                let a = self.stack.pop()?;
                self.stack.push(b)?;
                self.stack.push(a)?;
            }

            Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Mod => {
                let b = self.stack.pop()?;
                let a = self.stack.pop()?;
                let result = arithmetic(op, a, b)?;
                self.stack.push(result)?;
            }

            Op::Neg => {
                let value = self.stack.pop()?;
                let result = match value {
                    Value::Integer(n) => Value::Integer(n.checked_neg().ok_or_else(|| {
                        RuntimeError::new(RuntimeErrorKind::Arithmetic, "integer overflow")
                    })?),
                    Value::Float(x) => Value::Float(-x),
                    other => {
                        return Err(RuntimeError::new(
                            RuntimeErrorKind::Type,
                            format!("cannot negate {}", other.type_name()),
                        ));
                    }
                };
                self.stack.push(result)?;
            }

            Op::CmpEq | Op::CmpNe => {
                let b = self.stack.pop()?;
                let a = self.stack.pop()?;
                let equal = values_equal(op, &a, &b)?;
                let result = if op == Op::CmpEq { equal } else { !equal };
                self.stack.push(Value::Bool(result))?;
            }

            Op::CmpLt | Op::CmpLe | Op::CmpGt | Op::CmpGe => {
                let b = self.stack.pop()?;
                let a = self.stack.pop()?;
                self.stack.push(Value::Bool(values_ordered(op, &a, &b)?))?;
            }

            Op::And => {
                let b = self.stack.pop()?;
                let a = self.stack.pop()?;
                self.stack
                    .push(Value::Bool(a.is_truthy() && b.is_truthy()))?;
            }

            Op::Or => {
                let b = self.stack.pop()?;
                let a = self.stack.pop()?;
                self.stack
                    .push(Value::Bool(a.is_truthy() || b.is_truthy()))?;
            }

            Op::Not => {
                let value = self.stack.pop()?;
                self.stack.push(Value::Bool(!value.is_truthy()))?;
            }

            Op::Jump => {
                *pc = jump_target(operand);
            }

            Op::JumpIfFalse => {
                let condition = self.stack.pop()?;
                if !condition.is_truthy() {
                    *pc = jump_target(operand);
                }
            }

            Op::JumpIfTrue => {
                let condition = self.stack.pop()?;
                if condition.is_truthy() {
                    *pc = jump_target(operand);
                }
            }

            Op::Call => {
                let index = u16::from_le_bytes([operand[0], operand[1]]) as usize;
                let argc = operand[2] as usize;
                self.call(program, pc, index, argc)?;
            }

            Op::Return => {
                let frame = self.frames.pop_frame().ok_or_else(|| {
                    RuntimeError::new(
                        RuntimeErrorKind::BadReturn,
                        "RETURN with an empty call stack",
                    )
                })?;
                let result = self.stack.pop()?;
                self.stack.truncate(frame.saved_depth);
                self.vars.truncate(frame.base_of_locals);
                self.stack.push(result)?;
                *pc = frame.return_pc;
            }

            Op::Print => {
                let value = self.stack.pop()?;
                self.write_line(&value.to_string())?;
            }

            Op::Input => {
                let line = self.read_line()?;
                self.stack.push(Value::String(line))?;
            }

            Op::Halt => return Ok(Flow::Halt),
        }

        Ok(Flow::Continue)
    }

    /// `CALL` dispatch. The builtins run in place without pushing a frame;
    /// any other function symbol's value is a code offset and gets a
    /// proper frame.
    fn call(
        &mut self,
        program: &Program,
        pc: &mut usize,
        index: usize,
        argc: usize,
    ) -> Result<(), RuntimeError> {
        let symbol = program.symbols.get(index).ok_or_else(|| {
            RuntimeError::new(
                RuntimeErrorKind::Internal,
                format!("symbol index {} out of range", index),
            )
        })?;

        if symbol.kind != SymbolKind::Func {
            return Err(RuntimeError::new(
                RuntimeErrorKind::Type,
                format!("'{}' is not callable", symbol.name),
            ));
        }

        match (symbol.name.as_str(), symbol.value) {
            ("print", BUILTIN_PRINT) => {
                let mut args = Vec::with_capacity(argc);
                for _ in 0..argc {
                    args.push(self.stack.pop()?);
                }
                args.reverse();
                let text = args
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join(" ");
                self.write_line(&text)?;
                self.stack.push(Value::Null)?;
            }

            ("input", BUILTIN_INPUT) => {
                if argc > 1 {
                    return Err(RuntimeError::new(
                        RuntimeErrorKind::Type,
                        format!("input takes at most one argument, got {}", argc),
                    ));
                }
                if argc == 1 {
                    let prompt = self.stack.pop()?;
                    self.write_text(&prompt.to_string())?;
                }
                let line = self.read_line()?;
                self.stack.push(Value::String(line))?;
            }

            // User-defined function: value is a code offset.
            (_, target) => {
                let target = target as usize;
                if target >= program.code.len() {
                    return Err(RuntimeError::new(
                        RuntimeErrorKind::Internal,
                        format!("call target {} outside the code section", target),
                    ));
                }
                if self.stack.depth() < argc {
                    return Err(RuntimeError::new(
                        RuntimeErrorKind::StackUnderflow,
                        format!("call needs {} arguments on the stack", argc),
                    ));
                }
                self.frames.push_frame(CallFrame {
                    return_pc: *pc,
                    base_of_locals: self.vars.len(),
                    saved_depth: self.stack.depth() - argc,
                })?;
                *pc = target;
            }
        }

        Ok(())
    }

    fn write_line(&mut self, text: &str) -> Result<(), RuntimeError> {
        writeln!(self.output, "{}", text).map_err(io_error)
    }

    fn write_text(&mut self, text: &str) -> Result<(), RuntimeError> {
        write!(self.output, "{}", text).map_err(io_error)?;
        self.output.flush().map_err(io_error)
    }

    fn read_line(&mut self) -> Result<String, RuntimeError> {
        let mut line = String::new();
        self.input.read_line(&mut line).map_err(io_error)?;
        if line.ends_with('\n') {
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
        }
        Ok(line)
    }
}

fn io_error(e: std::io::Error) -> RuntimeError {
    RuntimeError::new(RuntimeErrorKind::Io, format!("I/O failed: {}", e))
}

fn index_operand(operand: &[u8]) -> usize {
    match operand.len() {
        1 => operand[0] as usize,
        _ => u16::from_le_bytes([operand[0], operand[1]]) as usize,
    }
}

fn jump_target(operand: &[u8]) -> usize {
    let target = i32::from_le_bytes([operand[0], operand[1], operand[2], operand[3]]);
    target as usize
}

fn type_error(op: Op, a: &Value, b: &Value) -> RuntimeError {
    RuntimeError::new(
        RuntimeErrorKind::Type,
        format!(
            "unsupported operand types for {}: {} and {}",
            op.mnemonic(),
            a.type_name(),
            b.type_name()
        ),
    )
}

fn arith_error(message: &str) -> RuntimeError {
    RuntimeError::new(RuntimeErrorKind::Arithmetic, message)
}

/// Arithmetic dispatch over the operand variant pair. Integers promote to
/// floats in mixed expressions; `+` additionally concatenates strings.
fn arithmetic(op: Op, a: Value, b: Value) -> Result<Value, RuntimeError> {
    use Value::*;

    match (&a, &b) {
        (Integer(x), Integer(y)) => {
            let (x, y) = (*x, *y);
            let result = match op {
                Op::Add => x.checked_add(y),
                Op::Sub => x.checked_sub(y),
                Op::Mul => x.checked_mul(y),
                Op::Div => {
                    if y == 0 {
                        return Err(arith_error("division by zero"));
                    }
                    x.checked_div(y)
                }
                Op::Mod => {
                    if y == 0 {
                        return Err(arith_error("modulo by zero"));
                    }
                    // Truncated remainder: the result keeps the sign of
                    // the dividend.
                    x.checked_rem(y)
                }
                _ => unreachable!("arithmetic called with {:?}", op),
            };
            result
                .map(Integer)
                .ok_or_else(|| arith_error("integer overflow"))
        }

        (Integer(_), Float(_)) | (Float(_), Integer(_)) | (Float(_), Float(_)) => {
            let x = match &a {
                Integer(n) => *n as f64,
                Float(v) => *v,
                _ => unreachable!(),
            };
            let y = match &b {
                Integer(n) => *n as f64,
                Float(v) => *v,
                _ => unreachable!(),
            };
            let result = match op {
                Op::Add => x + y,
                Op::Sub => x - y,
                Op::Mul => x * y,
                Op::Div => {
                    if y == 0.0 {
                        return Err(arith_error("division by zero"));
                    }
                    x / y
                }
                Op::Mod => {
                    if y == 0.0 {
                        return Err(arith_error("modulo by zero"));
                    }
                    x % y
                }
                _ => unreachable!("arithmetic called with {:?}", op),
            };
            Ok(Float(result))
        }

        (String(x), String(y)) if op == Op::Add => Ok(String(format!("{}{}", x, y))),

        _ => Err(type_error(op, &a, &b)),
    }
}

/// Equality is by variant then payload; the only cross-variant pairing is
/// int⇄float. `op` is the opcode being executed (CMP_EQ or CMP_NE), used
/// only for the diagnostic.
fn values_equal(op: Op, a: &Value, b: &Value) -> Result<bool, RuntimeError> {
    use Value::*;
    match (a, b) {
        (Integer(x), Integer(y)) => Ok(x == y),
        (Float(x), Float(y)) => Ok(x == y),
        (Integer(x), Float(y)) | (Float(y), Integer(x)) => Ok((*x as f64) == *y),
        (String(x), String(y)) => Ok(x == y),
        (Bool(x), Bool(y)) => Ok(x == y),
        (Null, Null) => Ok(true),
        _ => Err(type_error(op, a, b)),
    }
}

/// Ordering comparisons: numeric pairs and string pairs only. Strings are
/// compared lexicographically over bytes.
fn values_ordered(op: Op, a: &Value, b: &Value) -> Result<bool, RuntimeError> {
    use Value::*;

    let ordering = match (a, b) {
        (Integer(x), Integer(y)) => x.cmp(y),
        (String(x), String(y)) => x.as_bytes().cmp(y.as_bytes()),
        (Integer(_), Float(_)) | (Float(_), Integer(_)) | (Float(_), Float(_)) => {
            let x = match a {
                Integer(n) => *n as f64,
                Float(v) => *v,
                _ => unreachable!(),
            };
            let y = match b {
                Integer(n) => *n as f64,
                Float(v) => *v,
                _ => unreachable!(),
            };
            match x.partial_cmp(&y) {
                Some(ordering) => ordering,
                // NaN compares false against everything.
                None => return Ok(false),
            }
        }
        _ => return Err(type_error(op, a, b)),
    };

    Ok(match op {
        Op::CmpLt => ordering.is_lt(),
        Op::CmpLe => ordering.is_le(),
        Op::CmpGt => ordering.is_gt(),
        Op::CmpGe => ordering.is_ge(),
        _ => unreachable!("values_ordered called with {:?}", op),
    })
}
