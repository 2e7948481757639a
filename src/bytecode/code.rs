use crate::bytecode::op::Op;

/// Identifier for a branch target created by [`CodeBuffer::new_label`].
pub type Label = usize;

/// Append-only byte buffer with backpatching for forward branches.
///
/// Jump operands are written as 4-byte placeholders and recorded in a patch
/// list; [`CodeBuffer::bind_label`] fixes a label to the current offset, and
/// [`CodeBuffer::finalize`] resolves every patch site. The buffer itself is
/// never rewritten except at recorded patch sites.
pub struct CodeBuffer {
    bytes: Vec<u8>,
    labels: Vec<Option<u32>>,
    patches: Vec<(usize, Label)>,
}

impl CodeBuffer {
    pub fn new() -> Self {
        CodeBuffer {
            bytes: Vec::new(),
            labels: Vec::new(),
            patches: Vec::new(),
        }
    }

    /// Current write offset, i.e. the offset of the next instruction.
    pub fn offset(&self) -> u32 {
        self.bytes.len() as u32
    }

    /// Emit an opcode with no operand.
    pub fn emit(&mut self, op: Op) {
        debug_assert_eq!(op.operand_width(), 0);
        self.bytes.push(op as u8);
    }

    /// Emit an opcode with a 1-byte operand.
    pub fn emit_u8(&mut self, op: Op, operand: u8) {
        debug_assert_eq!(op.operand_width(), 1);
        self.bytes.push(op as u8);
        self.bytes.push(operand);
    }

    /// Emit an opcode with a 2-byte operand.
    pub fn emit_u16(&mut self, op: Op, operand: u16) {
        debug_assert_eq!(op.operand_width(), 2);
        self.bytes.push(op as u8);
        self.bytes.extend_from_slice(&operand.to_le_bytes());
    }

    /// Emit a `CALL` with its symbol index and argument count.
    pub fn emit_call(&mut self, symbol: u16, argc: u8) {
        self.bytes.push(Op::Call as u8);
        self.bytes.extend_from_slice(&symbol.to_le_bytes());
        self.bytes.push(argc);
    }

    /// Emit a jump towards `label`, leaving a placeholder operand and
    /// recording the patch site.
    pub fn emit_jump(&mut self, op: Op, label: Label) {
        debug_assert!(op.is_jump());
        self.bytes.push(op as u8);
        let site = self.bytes.len();
        self.bytes.extend_from_slice(&(-1i32).to_le_bytes());
        self.patches.push((site, label));
    }

    /// Create a fresh, unbound label.
    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        self.labels.len() - 1
    }

    /// Bind `label` to the current offset.
    pub fn bind_label(&mut self, label: Label) {
        let offset = self.offset();
        self.labels[label] = Some(offset);
    }

    /// Resolve all patch sites and freeze the buffer. Returns the first
    /// unresolved label on failure.
    pub fn finalize(mut self) -> Result<Vec<u8>, Label> {
        for (site, label) in &self.patches {
            let target = match self.labels.get(*label).copied().flatten() {
                Some(offset) => offset,
                None => return Err(*label),
            };
            let encoded = (target as i32).to_le_bytes();
            self.bytes[*site..*site + 4].copy_from_slice(&encoded);
        }
        Ok(self.bytes)
    }
}

impl Default for CodeBuffer {
    fn default() -> Self {
        CodeBuffer::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_simple_sequence() {
        let mut code = CodeBuffer::new();
        code.emit_u8(Op::LoadConst, 0);
        code.emit(Op::Print);
        code.emit(Op::Halt);

        let bytes = code.finalize().unwrap();
        assert_eq!(bytes, vec![0x01, 0x00, 0x40, 0xFF]);
    }

    #[test]
    fn test_forward_jump_is_patched() {
        let mut code = CodeBuffer::new();
        let end = code.new_label();
        code.emit_jump(Op::Jump, end);
        code.emit(Op::Nop);
        code.bind_label(end);
        code.emit(Op::Halt);

        let bytes = code.finalize().unwrap();
        // JUMP (1 + 4 bytes) + NOP = 6; HALT lives at offset 6.
        assert_eq!(&bytes[1..5], &6i32.to_le_bytes());
    }

    #[test]
    fn test_backward_jump_targets_bound_offset() {
        let mut code = CodeBuffer::new();
        let top = code.new_label();
        code.bind_label(top);
        code.emit(Op::Nop);
        code.emit_jump(Op::Jump, top);

        let bytes = code.finalize().unwrap();
        assert_eq!(&bytes[2..6], &0i32.to_le_bytes());
    }

    #[test]
    fn test_unresolved_label_fails_finalize() {
        let mut code = CodeBuffer::new();
        let dangling = code.new_label();
        code.emit_jump(Op::Jump, dangling);

        assert_eq!(code.finalize(), Err(dangling));
    }

    #[test]
    fn test_emit_call_layout() {
        let mut code = CodeBuffer::new();
        code.emit_call(0x0102, 3);

        let bytes = code.finalize().unwrap();
        assert_eq!(bytes, vec![0x33, 0x02, 0x01, 0x03]);
    }

    #[test]
    fn test_emit_u16_little_endian() {
        let mut code = CodeBuffer::new();
        code.emit_u16(Op::LoadConstW, 0x0201);

        let bytes = code.finalize().unwrap();
        assert_eq!(bytes, vec![0x81, 0x01, 0x02]);
    }
}
