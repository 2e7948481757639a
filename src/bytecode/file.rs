//! The `.pvm` binary container.
//!
//! Little-endian throughout. Layout:
//!
//! ```text
//! magic "PYMV" : 4 bytes
//! version      : u16   (major = high byte)
//! flags        : u16   (bit 0 = debug section present)
//! const_count  : u32
//! symbol_count : u32
//! code_size    : u32   (bytes in the code section)
//! constants    : const_count x (tag u8, size u32, payload)
//! symbols      : symbol_count x (kind u8, name_len u16, name, value u32)
//! code         : code_size bytes
//! debug        : line_count u32, line_count x (pc u32, line u32, column u16)
//! ```
//!
//! String constants are stored NUL-terminated (`size` includes the NUL);
//! symbol names are length-prefixed without a terminator.
//!
//! The loader refuses anything it cannot prove well-formed: unknown tags,
//! out-of-range indices, jumps that do not land on instruction boundaries.
//! A program that loads successfully can be executed without re-validation.

use crate::bytecode::load_error::LoadError;
use crate::bytecode::op::Op;
use crate::bytecode::program::{
    Constant, DebugEntry, Program, Symbol, SymbolKind, FLAG_DEBUG, FORMAT_VERSION, RESERVED_FLAGS,
};

pub const MAGIC: [u8; 4] = *b"PYMV";
pub const HEADER_SIZE: usize = 20;

const TAG_INT: u8 = 0x01;
const TAG_FLOAT: u8 = 0x02;
const TAG_STRING: u8 = 0x03;
const TAG_BOOL: u8 = 0x04;

const KIND_VAR: u8 = 0x01;
const KIND_FUNC: u8 = 0x02;

// ───────────────────────────────── Writing ─────────────────────────────────

/// Serialize a program into the container format.
pub fn serialize(program: &Program) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE + program.code.len());

    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&program.version.to_le_bytes());
    out.extend_from_slice(&program.flags.to_le_bytes());
    out.extend_from_slice(&(program.constants.len() as u32).to_le_bytes());
    out.extend_from_slice(&(program.symbols.len() as u32).to_le_bytes());
    out.extend_from_slice(&(program.code.len() as u32).to_le_bytes());

    for constant in &program.constants {
        write_constant(&mut out, constant);
    }
    for symbol in &program.symbols {
        write_symbol(&mut out, symbol);
    }
    out.extend_from_slice(&program.code);

    if program.flags & FLAG_DEBUG != 0 {
        let table: &[DebugEntry] = program.debug.as_deref().unwrap_or(&[]);
        out.extend_from_slice(&(table.len() as u32).to_le_bytes());
        for entry in table {
            out.extend_from_slice(&entry.pc.to_le_bytes());
            out.extend_from_slice(&entry.line.to_le_bytes());
            out.extend_from_slice(&entry.column.to_le_bytes());
        }
    }

    out
}

fn write_constant(out: &mut Vec<u8>, constant: &Constant) {
    match constant {
        Constant::Integer(n) => {
            out.push(TAG_INT);
            out.extend_from_slice(&4u32.to_le_bytes());
            out.extend_from_slice(&n.to_le_bytes());
        }
        Constant::Float(x) => {
            out.push(TAG_FLOAT);
            out.extend_from_slice(&8u32.to_le_bytes());
            out.extend_from_slice(&x.to_le_bytes());
        }
        Constant::String(s) => {
            out.push(TAG_STRING);
            out.extend_from_slice(&((s.len() + 1) as u32).to_le_bytes());
            out.extend_from_slice(s.as_bytes());
            out.push(0);
        }
        Constant::Bool(b) => {
            out.push(TAG_BOOL);
            out.extend_from_slice(&1u32.to_le_bytes());
            out.push(if *b { 1 } else { 0 });
        }
    }
}

fn write_symbol(out: &mut Vec<u8>, symbol: &Symbol) {
    out.push(match symbol.kind {
        SymbolKind::Var => KIND_VAR,
        SymbolKind::Func => KIND_FUNC,
    });
    out.extend_from_slice(&(symbol.name.len() as u16).to_le_bytes());
    out.extend_from_slice(symbol.name.as_bytes());
    out.extend_from_slice(&symbol.value.to_le_bytes());
}

// ───────────────────────────────── Reading ─────────────────────────────────

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
    section: &'static str,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Reader {
            bytes,
            pos: 0,
            section: "header",
        }
    }

    fn enter(&mut self, section: &'static str) {
        self.section = section;
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], LoadError> {
        if self.pos + n > self.bytes.len() {
            return Err(LoadError::Truncated {
                section: self.section,
            });
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, LoadError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, LoadError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, LoadError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i32(&mut self) -> Result<i32, LoadError> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn f64(&mut self) -> Result<f64, LoadError> {
        let b = self.take(8)?;
        Ok(f64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }
}

/// Load and verify a program from container bytes.
pub fn load(bytes: &[u8]) -> Result<Program, LoadError> {
    let mut r = Reader::new(bytes);

    let magic = r.take(4)?;
    if magic != MAGIC {
        return Err(LoadError::BadMagic([magic[0], magic[1], magic[2], magic[3]]));
    }

    let version = r.u16()?;
    if version >> 8 != FORMAT_VERSION >> 8 {
        return Err(LoadError::UnsupportedVersion {
            found: version,
            supported: FORMAT_VERSION,
        });
    }

    let flags = r.u16()?;
    if flags & RESERVED_FLAGS != 0 {
        return Err(LoadError::ReservedFlags(flags));
    }

    let const_count = r.u32()? as usize;
    let symbol_count = r.u32()? as usize;
    let code_size = r.u32()? as usize;

    r.enter("constant pool");
    let mut constants = Vec::with_capacity(const_count.min(1024));
    for _ in 0..const_count {
        constants.push(read_constant(&mut r)?);
    }

    r.enter("symbol table");
    let mut symbols = Vec::with_capacity(symbol_count.min(1024));
    for _ in 0..symbol_count {
        symbols.push(read_symbol(&mut r)?);
    }

    r.enter("code");
    let code = r.take(code_size)?.to_vec();

    let debug = if flags & FLAG_DEBUG != 0 {
        r.enter("debug table");
        let line_count = r.u32()? as usize;
        let mut table = Vec::with_capacity(line_count.min(1024));
        for _ in 0..line_count {
            let pc = r.u32()?;
            let line = r.u32()?;
            let column = r.u16()?;
            table.push(DebugEntry { pc, line, column });
        }
        if table.windows(2).any(|w| w[0].pc > w[1].pc) {
            return Err(LoadError::DebugTableUnsorted);
        }
        Some(table)
    } else {
        None
    };

    if r.remaining() != 0 {
        return Err(LoadError::TrailingBytes {
            count: r.remaining(),
        });
    }

    let program = Program {
        version,
        flags,
        constants,
        symbols,
        code,
        debug,
    };
    verify(&program)?;
    Ok(program)
}

fn read_constant(r: &mut Reader) -> Result<Constant, LoadError> {
    let tag = r.u8()?;
    let size = r.u32()?;

    match tag {
        TAG_INT => {
            if size != 4 {
                return Err(LoadError::BadConstantSize { tag, size });
            }
            Ok(Constant::Integer(r.i32()?))
        }
        TAG_FLOAT => {
            if size != 8 {
                return Err(LoadError::BadConstantSize { tag, size });
            }
            Ok(Constant::Float(r.f64()?))
        }
        TAG_STRING => {
            if size == 0 {
                return Err(LoadError::BadConstantSize { tag, size });
            }
            let data = r.take(size as usize)?;
            if data[data.len() - 1] != 0 {
                return Err(LoadError::InvalidString {
                    section: "constant pool",
                });
            }
            let text = std::str::from_utf8(&data[..data.len() - 1]).map_err(|_| {
                LoadError::InvalidString {
                    section: "constant pool",
                }
            })?;
            Ok(Constant::String(text.to_string()))
        }
        TAG_BOOL => {
            if size != 1 {
                return Err(LoadError::BadConstantSize { tag, size });
            }
            Ok(Constant::Bool(r.u8()? != 0))
        }
        _ => Err(LoadError::UnknownConstantTag(tag)),
    }
}

fn read_symbol(r: &mut Reader) -> Result<Symbol, LoadError> {
    let kind = match r.u8()? {
        KIND_VAR => SymbolKind::Var,
        KIND_FUNC => SymbolKind::Func,
        other => return Err(LoadError::UnknownSymbolKind(other)),
    };
    let name_len = r.u16()? as usize;
    let name = std::str::from_utf8(r.take(name_len)?)
        .map_err(|_| LoadError::InvalidString {
            section: "symbol table",
        })?
        .to_string();
    let value = r.u32()?;
    Ok(Symbol { kind, name, value })
}

// ─────────────────────────────── Verification ──────────────────────────────

/// Structural verification of a parsed program: every index operand in
/// bounds, every jump on an instruction boundary.
fn verify(program: &Program) -> Result<(), LoadError> {
    let var_count = program.var_count() as u32;
    for symbol in &program.symbols {
        if symbol.kind == SymbolKind::Var && symbol.value >= var_count {
            return Err(LoadError::BadVarSlot {
                name: symbol.name.clone(),
                slot: symbol.value,
            });
        }
    }

    let code = &program.code;
    let const_count = program.constants.len() as u32;
    let symbol_count = program.symbols.len() as u32;

    let mut boundaries: Vec<usize> = Vec::new();
    let mut jumps: Vec<(usize, i32)> = Vec::new();

    let mut pc = 0usize;
    while pc < code.len() {
        let offset = pc;
        boundaries.push(offset);

        let op = Op::from_u8(code[pc]).ok_or(LoadError::UnknownOpcode {
            offset,
            byte: code[pc],
        })?;
        pc += 1;

        let width = op.operand_width();
        if pc + width > code.len() {
            return Err(LoadError::TruncatedInstruction { offset });
        }

        match op {
            Op::LoadConst | Op::LoadConstW => {
                let index = operand_index(code, pc, width);
                if index >= const_count {
                    return Err(LoadError::ConstIndexOutOfRange { offset, index });
                }
            }
            Op::LoadVar | Op::LoadVarW | Op::StoreVar | Op::StoreVarW => {
                let slot = operand_index(code, pc, width);
                if slot >= var_count {
                    return Err(LoadError::VarSlotOutOfRange { offset, slot });
                }
            }
            Op::Call => {
                let index = u16::from_le_bytes([code[pc], code[pc + 1]]) as u32;
                if index >= symbol_count {
                    return Err(LoadError::SymbolIndexOutOfRange { offset, index });
                }
            }
            Op::Jump | Op::JumpIfFalse | Op::JumpIfTrue => {
                let target = i32::from_le_bytes([
                    code[pc],
                    code[pc + 1],
                    code[pc + 2],
                    code[pc + 3],
                ]);
                jumps.push((offset, target));
            }
            _ => {}
        }
        pc += width;
    }

    for (offset, target) in jumps {
        if target < 0 || target as usize >= code.len() {
            return Err(LoadError::JumpOutOfRange { offset, target });
        }
        if boundaries.binary_search(&(target as usize)).is_err() {
            return Err(LoadError::JumpIntoInstruction { offset, target });
        }
    }

    Ok(())
}

fn operand_index(code: &[u8], pos: usize, width: usize) -> u32 {
    match width {
        1 => code[pos] as u32,
        2 => u16::from_le_bytes([code[pos], code[pos + 1]]) as u32,
        _ => unreachable!("load/store operand widths are 1 or 2"),
    }
}
