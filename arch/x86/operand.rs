use crate::register::Register;

/// Memory operand.
///
/// `displacement` is the encoded displacement sign-extended from
/// `displ_size` bytes. EVEX compressed displacements are already scaled.
/// RIP/EIP relative operands report `RIP`/`EIP` as the base, use
/// [`Instruction::ip_rel_memory_address`] to get the target.
///
/// [`Instruction::ip_rel_memory_address`]: crate::Instruction::ip_rel_memory_address
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct MemoryOperand {
    /// Effective segment register.
    pub segment: Register,
    pub base: Option<Register>,
    pub index: Option<Register>,
    /// Index scale, 1, 2, 4 or 8.
    pub scale: u8,
    pub displacement: i64,
    /// Encoded displacement size in bytes, 0, 1, 2, 4 or 8.
    pub displ_size: u8,
}

impl MemoryOperand {
    pub fn is_ip_relative(&self) -> bool {
        matches!(self.base, Some(Register::RIP) | Some(Register::EIP))
    }
}

/// Decoded operand.
#[allow(non_camel_case_types)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum OpKind {
    Register(Register),
    Memory(MemoryOperand),
    Immediate8(u8),
    /// Second 8-bit immediate (ENTER).
    Immediate8_2nd(u8),
    Immediate16(u16),
    Immediate32(u32),
    Immediate64(u64),
    Immediate8to16(i16),
    Immediate8to32(i32),
    Immediate8to64(i64),
    Immediate32to64(i64),
    /// Absolute branch target.
    NearBranch16(u16),
    NearBranch32(u32),
    NearBranch64(u64),
    FarBranch16 {
        selector: u16,
        offset: u16,
    },
    FarBranch32 {
        selector: u16,
        offset: u32,
    },
}

impl OpKind {
    pub fn register(&self) -> Option<Register> {
        match self {
            Self::Register(reg) => Some(*reg),
            _ => None,
        }
    }

    pub fn memory(&self) -> Option<&MemoryOperand> {
        match self {
            Self::Memory(mem) => Some(mem),
            _ => None,
        }
    }

    /// Returns the immediate value, sign-extended forms are returned as
    /// their extended value reinterpreted as `u64`.
    pub fn immediate(&self) -> Option<u64> {
        match *self {
            Self::Immediate8(imm) | Self::Immediate8_2nd(imm) => Some(imm as u64),
            Self::Immediate16(imm) => Some(imm as u64),
            Self::Immediate32(imm) => Some(imm as u64),
            Self::Immediate64(imm) => Some(imm),
            Self::Immediate8to16(imm) => Some(imm as u16 as u64),
            Self::Immediate8to32(imm) => Some(imm as u32 as u64),
            Self::Immediate8to64(imm) | Self::Immediate32to64(imm) => Some(imm as u64),
            _ => None,
        }
    }

    pub fn near_branch_target(&self) -> Option<u64> {
        match *self {
            Self::NearBranch16(target) => Some(target as u64),
            Self::NearBranch32(target) => Some(target as u64),
            Self::NearBranch64(target) => Some(target),
            _ => None,
        }
    }

    pub fn is_immediate(&self) -> bool {
        self.immediate().is_some()
    }
}
