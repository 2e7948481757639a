use crate::bytecode::op::Op;
use crate::bytecode::program::{Constant, Program};

/// Disassemble the code section: one line per instruction,
/// `offset  MNEMONIC  operand`, with constant and symbol operands resolved
/// to their canonical text.
pub fn disassemble(program: &Program) -> String {
    let code = &program.code;
    let mut lines = Vec::new();
    let mut pc = 0usize;

    while pc < code.len() {
        let offset = pc;
        let op = match Op::from_u8(code[pc]) {
            Some(op) => op,
            None => {
                lines.push(format!("{:04}  .byte 0x{:02X}", offset, code[pc]));
                pc += 1;
                continue;
            }
        };
        pc += 1;

        let width = op.operand_width();
        if pc + width > code.len() {
            lines.push(format!("{:04}  {} <truncated>", offset, op.mnemonic()));
            break;
        }

        let pretty = operand_pretty(program, op, &code[pc..pc + width]);
        pc += width;

        if pretty.is_empty() {
            lines.push(format!("{:04}  {}", offset, op.mnemonic()));
        } else {
            lines.push(format!("{:04}  {:<14}{}", offset, op.mnemonic(), pretty));
        }
    }

    lines.join("\n")
}

fn operand_pretty(program: &Program, op: Op, operand: &[u8]) -> String {
    match op {
        Op::LoadConst | Op::LoadConstW => {
            let index = index_operand(operand);
            match program.constants.get(index as usize) {
                Some(c) => format!("{} ({})", index, c),
                None => format!("{} (?)", index),
            }
        }
        Op::LoadVar | Op::LoadVarW | Op::StoreVar | Op::StoreVarW => {
            let slot = index_operand(operand);
            match program.var_name(slot) {
                Some(name) => format!("{} ({})", slot, name),
                None => format!("{} (?)", slot),
            }
        }
        Op::Call => {
            let index = u16::from_le_bytes([operand[0], operand[1]]);
            let argc = operand[2];
            match program.symbols.get(index as usize) {
                Some(sym) => format!("{}, {} ({})", index, argc, sym.name),
                None => format!("{}, {} (?)", index, argc),
            }
        }
        Op::Jump | Op::JumpIfFalse | Op::JumpIfTrue => {
            let target = i32::from_le_bytes([operand[0], operand[1], operand[2], operand[3]]);
            format!("{:04}", target)
        }
        _ => String::new(),
    }
}

fn index_operand(operand: &[u8]) -> u32 {
    match operand.len() {
        1 => operand[0] as u32,
        _ => u16::from_le_bytes([operand[0], operand[1]]) as u32,
    }
}

/// Constant pool and symbol table listing, shared by `--show-bytecode`
/// and `--info`.
pub fn tables(program: &Program) -> String {
    let mut out = String::new();

    out.push_str("constants:\n");
    if program.constants.is_empty() {
        out.push_str("  (empty)\n");
    }
    for (i, constant) in program.constants.iter().enumerate() {
        let type_name = match constant {
            Constant::Integer(_) => "INT",
            Constant::Float(_) => "FLOAT",
            Constant::String(_) => "STRING",
            Constant::Bool(_) => "BOOL",
        };
        out.push_str(&format!("  [{:2}] {}({})\n", i, type_name, constant));
    }

    out.push_str("\nsymbols:\n");
    if program.symbols.is_empty() {
        out.push_str("  (empty)\n");
    }
    for (i, symbol) in program.symbols.iter().enumerate() {
        out.push_str(&format!(
            "  [{:2}] {}({})[{}]\n",
            i,
            symbol.kind.name(),
            symbol.name,
            symbol.value
        ));
    }

    out
}

/// Full program listing: constant pool, symbol table and disassembly.
/// Backs `--show-bytecode`.
pub fn dump(program: &Program) -> String {
    let mut out = tables(program);

    out.push_str("\ncode:\n");
    for line in disassemble(program).lines() {
        out.push_str("  ");
        out.push_str(line);
        out.push('\n');
    }

    out
}
