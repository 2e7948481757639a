use crate::bytecode::op::Op;
use crate::bytecode::program::{Program, SymbolKind};

#[derive(Debug)]
pub struct StackCheckError {
    pub message: String,
    pub offset: usize,
}

impl std::fmt::Display for StackCheckError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stack-check error at {:04}: {}", self.offset, self.message)
    }
}

impl std::error::Error for StackCheckError {}

impl StackCheckError {
    fn new(offset: usize, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            offset,
        }
    }
}

/// Returns (pops, pushes) for an opcode, or None if the effect depends on
/// state the checker does not model.
fn effect(op: Op) -> Option<(i32, i32)> {
    use Op::*;
    Some(match op {
        Nop => (0, 0),

        LoadConst | LoadConstW | LoadVar | LoadVarW => (0, 1),
        StoreVar | StoreVarW => (1, 0),
        Pop => (1, 0),
        Dup => (1, 2),
        Swap => (2, 2),

        Add | Sub | Mul | Div | Mod => (2, 1),
        Neg => (1, 1),

        CmpEq | CmpNe | CmpLt | CmpLe | CmpGt | CmpGe => (2, 1),

        And | Or => (2, 1),
        Not => (1, 1),

        Jump => (0, 0),
        JumpIfFalse | JumpIfTrue => (1, 0),

        Print => (1, 0),
        Input => (0, 1),

        Halt => (0, 0),

        // Effect is operand-dependent; handled by the caller.
        Call | Return => return None,
    })
}

/// Check stack effects over a linear scan of the code section.
///
/// NOTE: the scan does not follow jump targets, so it validates straight-line
/// discipline but not full control-flow joins. The generator's own depth
/// tracking covers those; this pass catches hand-crafted or corrupted code
/// that would underflow on the common path.
pub fn check_code(program: &Program) -> Result<(), StackCheckError> {
    let code = &program.code;
    let mut h: i32 = 0;
    let mut pc = 0usize;

    while pc < code.len() {
        let offset = pc;
        let op = match Op::from_u8(code[pc]) {
            Some(op) => op,
            // Undecodable byte: stop here and let the VM report it as
            // InvalidOpcode with proper context.
            None => return Ok(()),
        };
        pc += 1;

        let width = op.operand_width();
        if pc + width > code.len() {
            return Ok(());
        }

        let (pops, pushes) = match op {
            Op::Call => {
                let index = u16::from_le_bytes([code[pc], code[pc + 1]]) as usize;
                let argc = code[pc + 2] as i32;
                match program.symbols.get(index) {
                    Some(sym) if sym.kind == SymbolKind::Func => {
                        if sym.name == "print" || sym.name == "input" {
                            // Builtins consume their arguments and push one
                            // result.
                            (argc, 1)
                        } else {
                            // User function: stack effect unknown from here,
                            // stop checking.
                            return Ok(());
                        }
                    }
                    _ => (argc, 1),
                }
            }
            Op::Return => return Ok(()),
            _ => effect(op).expect("static effect"),
        };
        pc += width;

        h -= pops;
        if h < 0 {
            return Err(StackCheckError::new(
                offset,
                format!("stack underflow: {} needs {} operands", op.mnemonic(), pops),
            ));
        }
        h += pushes;
    }

    Ok(())
}
