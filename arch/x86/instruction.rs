use x86_decode_core::flags::{Field, Flags};

use crate::{
    code::Code, memory_size::MemorySize, operand::MemoryOperand, operand::OpKind,
    register::Register,
};

pub(crate) const LOCK: u32 = 1 << 0;
pub(crate) const REPE: u32 = 1 << 1;
pub(crate) const REPNE: u32 = 1 << 2;
pub(crate) const ZEROING: u32 = 1 << 3;
pub(crate) const SAE: u32 = 1 << 4;
pub(crate) const BROADCAST: u32 = 1 << 5;

pub(crate) const FIELD_OPMASK: Field = Field::new(8, 3);
pub(crate) const FIELD_ROUNDING: Field = Field::new(11, 3);
pub(crate) const FIELD_ENCODING: Field = Field::new(14, 3);

/// Maximum number of operands.
pub const MAX_OPERANDS: usize = 5;

/// Embedded rounding mode of an EVEX instruction.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RoundingControl {
    None,
    RoundToNearest,
    RoundDown,
    RoundUp,
    RoundTowardZero,
}

impl RoundingControl {
    fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Self::RoundToNearest,
            2 => Self::RoundDown,
            3 => Self::RoundUp,
            4 => Self::RoundTowardZero,
            _ => Self::None,
        }
    }
}

/// Instruction encoding family.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum EncodingKind {
    #[default]
    Legacy,
    D3now,
    Vex,
    Xop,
    Evex,
}

impl EncodingKind {
    fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Self::D3now,
            2 => Self::Vex,
            3 => Self::Xop,
            4 => Self::Evex,
            _ => Self::Legacy,
        }
    }

    pub(crate) fn raw(&self) -> u32 {
        *self as u32
    }
}

/// Location of the constants inside the instruction bytes.
///
/// Offsets are relative to the first byte of the instruction. A size of
/// zero means that the field is not present.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ConstantOffsets {
    pub displacement_offset: u8,
    pub displacement_size: u8,
    pub immediate_offset: u8,
    pub immediate_size: u8,
    /// Second immediate (ENTER's nesting level, far pointer's selector).
    pub immediate_offset2: u8,
    pub immediate_size2: u8,
}

impl ConstantOffsets {
    pub fn has_displacement(&self) -> bool {
        self.displacement_size != 0
    }

    pub fn has_immediate(&self) -> bool {
        self.immediate_size != 0
    }

    pub fn has_immediate2(&self) -> bool {
        self.immediate_size2 != 0
    }

    pub(crate) fn set_displacement(&mut self, offset: usize, size: usize) {
        self.displacement_offset = offset as u8;
        self.displacement_size = size as u8;
    }

    /// Records an immediate field, the first one becomes the immediate and
    /// the second one becomes the second immediate.
    pub(crate) fn push_immediate(&mut self, offset: usize, size: usize) {
        if !self.has_immediate() {
            self.immediate_offset = offset as u8;
            self.immediate_size = size as u8;
        } else {
            self.immediate_offset2 = offset as u8;
            self.immediate_size2 = size as u8;
        }
    }
}

/// Decoded instruction.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Instruction {
    code: Code,
    len: u8,
    op_count: u8,
    ip: u64,
    ops: [OpKind; MAX_OPERANDS],
    flags: Flags,
    segment_prefix: Option<Register>,
    memory_size: MemorySize,
    offsets: ConstantOffsets,
}

impl Default for Instruction {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Instruction {
    pub(crate) fn new(ip: u64) -> Self {
        Self {
            code: Code::INVALID,
            len: 0,
            op_count: 0,
            ip,
            ops: [OpKind::Immediate8(0); MAX_OPERANDS],
            flags: Flags::empty(),
            segment_prefix: None,
            memory_size: MemorySize::Unknown,
            offsets: ConstantOffsets::default(),
        }
    }

    pub fn code(&self) -> Code {
        self.code
    }

    #[cfg(feature = "mnemonic")]
    pub fn mnemonic(&self) -> crate::Mnemonic {
        self.code.mnemonic()
    }

    /// Returns the instruction length in bytes.
    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn ip(&self) -> u64 {
        self.ip
    }

    /// Returns the address of the next instruction.
    pub fn next_ip(&self) -> u64 {
        self.ip.wrapping_add(self.len as u64)
    }

    pub fn op_count(&self) -> usize {
        self.op_count as usize
    }

    pub fn op(&self, index: usize) -> Option<&OpKind> {
        self.ops().get(index)
    }

    pub fn ops(&self) -> &[OpKind] {
        &self.ops[..self.op_count as usize]
    }

    /// Returns the first memory operand.
    pub fn memory(&self) -> Option<&MemoryOperand> {
        self.ops().iter().find_map(OpKind::memory)
    }

    pub fn has_lock(&self) -> bool {
        self.flags.any(LOCK)
    }

    pub fn has_repe(&self) -> bool {
        self.flags.any(REPE)
    }

    pub fn has_repne(&self) -> bool {
        self.flags.any(REPNE)
    }

    /// Returns the segment override prefix.
    pub fn segment_prefix(&self) -> Option<Register> {
        self.segment_prefix
    }

    /// Returns the size of the memory operand, `Broadcast*` if the operand
    /// is broadcast.
    pub fn memory_size(&self) -> MemorySize {
        self.memory_size
    }

    pub fn encoding(&self) -> EncodingKind {
        EncodingKind::from_raw(self.flags.field(FIELD_ENCODING))
    }

    /// Returns the opmask register or `None` if `EVEX.aaa` is zero.
    pub fn opmask(&self) -> Option<Register> {
        match self.flags.field(FIELD_OPMASK) {
            0 => None,
            n => crate::register::RegClass::Mask.get(n as u8, false),
        }
    }

    pub fn zeroing(&self) -> bool {
        self.flags.any(ZEROING)
    }

    pub fn rounding(&self) -> RoundingControl {
        RoundingControl::from_raw(self.flags.field(FIELD_ROUNDING))
    }

    pub fn suppress_all_exceptions(&self) -> bool {
        self.flags.any(SAE)
    }

    pub fn is_broadcast(&self) -> bool {
        self.flags.any(BROADCAST)
    }

    pub fn constant_offsets(&self) -> ConstantOffsets {
        self.offsets
    }

    /// Returns the absolute address of a RIP/EIP relative memory operand.
    pub fn ip_rel_memory_address(&self) -> Option<u64> {
        let mem = self.memory().filter(|mem| mem.is_ip_relative())?;
        let addr = self.next_ip().wrapping_add(mem.displacement as u64);
        Some(match mem.base {
            Some(Register::EIP) => addr as u32 as u64,
            _ => addr,
        })
    }

    pub(crate) fn set_code(&mut self, code: Code) {
        self.code = code;
    }

    pub(crate) fn set_len(&mut self, len: usize) {
        self.len = len as u8;
    }

    pub(crate) fn push_op(&mut self, op: OpKind) {
        self.ops[self.op_count as usize] = op;
        self.op_count += 1;
    }

    pub(crate) fn op_mut(&mut self, index: usize) -> &mut OpKind {
        &mut self.ops[index]
    }

    pub(crate) fn flags_mut(&mut self) -> &mut Flags {
        &mut self.flags
    }

    pub(crate) fn set_segment_prefix(&mut self, reg: Option<Register>) {
        self.segment_prefix = reg;
    }

    pub(crate) fn set_memory_size(&mut self, size: MemorySize) {
        self.memory_size = size;
    }

    pub(crate) fn offsets_mut(&mut self) -> &mut ConstantOffsets {
        &mut self.offsets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decorations() {
        let mut insn = Instruction::new(0x1000);
        insn.flags_mut()
            .set(ZEROING | BROADCAST)
            .field_set(FIELD_OPMASK, 3)
            .field_set(FIELD_ROUNDING, 2)
            .field_set(FIELD_ENCODING, EncodingKind::Evex.raw());
        assert_eq!(insn.opmask(), Some(Register::K3));
        assert!(insn.zeroing());
        assert!(insn.is_broadcast());
        assert!(!insn.suppress_all_exceptions());
        assert_eq!(insn.rounding(), RoundingControl::RoundDown);
        assert_eq!(insn.encoding(), EncodingKind::Evex);
    }

    #[test]
    fn ops() {
        let mut insn = Instruction::new(0xfff0);
        insn.set_len(5);
        insn.push_op(OpKind::Register(Register::EAX));
        insn.push_op(OpKind::Immediate32(1));
        assert_eq!(insn.op_count(), 2);
        assert_eq!(insn.op(1), Some(&OpKind::Immediate32(1)));
        assert_eq!(insn.op(2), None);
        assert_eq!(insn.next_ip(), 0xfff5);
        assert_eq!(insn.opmask(), None);
        assert_eq!(insn.encoding(), EncodingKind::Legacy);
    }

    #[test]
    fn offsets() {
        let mut offsets = ConstantOffsets::default();
        assert!(!offsets.has_immediate());
        offsets.push_immediate(1, 2);
        offsets.push_immediate(3, 1);
        assert_eq!((offsets.immediate_offset, offsets.immediate_size), (1, 2));
        assert_eq!((offsets.immediate_offset2, offsets.immediate_size2), (3, 1));
        assert!(offsets.has_immediate2());
    }
}
