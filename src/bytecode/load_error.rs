#[derive(Debug, Clone, PartialEq)]
pub enum LoadError {
    /// The file does not start with the `"PYMV"` magic.
    BadMagic([u8; 4]),

    /// Major version differs from the runtime's.
    UnsupportedVersion { found: u16, supported: u16 },

    /// A reserved header flag bit is set.
    ReservedFlags(u16),

    /// A section ends before its declared size.
    Truncated { section: &'static str },

    UnknownConstantTag(u8),
    UnknownSymbolKind(u8),

    /// A string payload is not valid UTF-8 or is missing its terminator.
    InvalidString { section: &'static str },

    /// Constant size field does not match its type's payload size.
    BadConstantSize { tag: u8, size: u32 },

    UnknownOpcode { offset: usize, byte: u8 },

    /// An instruction's operand runs past the end of the code section.
    TruncatedInstruction { offset: usize },

    ConstIndexOutOfRange { offset: usize, index: u32 },
    VarSlotOutOfRange { offset: usize, slot: u32 },
    SymbolIndexOutOfRange { offset: usize, index: u32 },

    /// A VAR symbol names a slot outside the variable store.
    BadVarSlot { name: String, slot: u32 },

    JumpOutOfRange { offset: usize, target: i32 },

    /// A jump target that is inside an instruction, not at its first byte.
    JumpIntoInstruction { offset: usize, target: i32 },

    /// Debug entries are not sorted by pc.
    DebugTableUnsorted,

    /// Bytes remain after the last declared section.
    TrailingBytes { count: usize },
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "load error: ")?;
        match self {
            LoadError::BadMagic(bytes) => {
                write!(
                    f,
                    "bad magic {:02X} {:02X} {:02X} {:02X}, not a bytecode file",
                    bytes[0], bytes[1], bytes[2], bytes[3]
                )
            }
            LoadError::UnsupportedVersion { found, supported } => {
                write!(
                    f,
                    "unsupported format version 0x{:04X} (runtime supports 0x{:04X})",
                    found, supported
                )
            }
            LoadError::ReservedFlags(flags) => {
                write!(f, "reserved header flags set: 0x{:04X}", flags)
            }
            LoadError::Truncated { section } => {
                write!(f, "truncated {} section", section)
            }
            LoadError::UnknownConstantTag(tag) => {
                write!(f, "unknown constant type tag 0x{:02X}", tag)
            }
            LoadError::UnknownSymbolKind(kind) => {
                write!(f, "unknown symbol kind 0x{:02X}", kind)
            }
            LoadError::InvalidString { section } => {
                write!(f, "invalid string data in {} section", section)
            }
            LoadError::BadConstantSize { tag, size } => {
                write!(f, "constant tag 0x{:02X} with impossible size {}", tag, size)
            }
            LoadError::UnknownOpcode { offset, byte } => {
                write!(f, "unknown opcode 0x{:02X} at offset {:04}", byte, offset)
            }
            LoadError::TruncatedInstruction { offset } => {
                write!(f, "instruction at offset {:04} is missing operand bytes", offset)
            }
            LoadError::ConstIndexOutOfRange { offset, index } => {
                write!(
                    f,
                    "constant index {} out of range at offset {:04}",
                    index, offset
                )
            }
            LoadError::VarSlotOutOfRange { offset, slot } => {
                write!(
                    f,
                    "variable slot {} out of range at offset {:04}",
                    slot, offset
                )
            }
            LoadError::SymbolIndexOutOfRange { offset, index } => {
                write!(
                    f,
                    "symbol index {} out of range at offset {:04}",
                    index, offset
                )
            }
            LoadError::BadVarSlot { name, slot } => {
                write!(f, "symbol '{}' names invalid variable slot {}", name, slot)
            }
            LoadError::JumpOutOfRange { offset, target } => {
                write!(
                    f,
                    "jump at offset {:04} targets {} outside the code section",
                    offset, target
                )
            }
            LoadError::JumpIntoInstruction { offset, target } => {
                write!(
                    f,
                    "jump at offset {:04} targets {} inside an instruction",
                    offset, target
                )
            }
            LoadError::DebugTableUnsorted => {
                write!(f, "debug table entries are not sorted by pc")
            }
            LoadError::TrailingBytes { count } => {
                write!(f, "{} trailing bytes after the last section", count)
            }
        }
    }
}

impl std::error::Error for LoadError {}
