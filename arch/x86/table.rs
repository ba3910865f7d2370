//! Opcode tables.
//!
//! The tables are generated at build time from `tables/*.tbl`. The decoder
//! packs its state into a key (see [`key`]) and the generated
//! [`TableDecode`] matcher selects an index into [`ENTRIES`].

use crate::{
    code::Code,
    memory_size::MemorySize,
    register::{RegClass, Register},
};

pub(crate) use crate::generated::{SelectEntry, TableDecode};

/// Entry attributes.
pub(crate) mod attr {
    pub const LOCK: u16 = 1 << 0;
    /// Default operand size is 64 bits in 64-bit mode.
    pub const D64: u16 = 1 << 1;
    /// Operand size is always 64 bits in 64-bit mode.
    pub const F64: u16 = 1 << 2;
    pub const OPMASK: u16 = 1 << 3;
    pub const OPMASK_REQ: u16 = 1 << 4;
    pub const ZEROING: u16 = 1 << 5;
    pub const ER: u16 = 1 << 6;
    pub const SAE: u16 = 1 << 7;
    /// ModRM.mod is ignored and rm is always a register.
    pub const NO_MOD: u16 = 1 << 8;
    /// LOCK selects CR8-CR15 in 32-bit mode.
    pub const CR_LOCK: u16 = 1 << 9;
    /// Near branch without a relative operand.
    pub const BRANCH: u16 = 1 << 10;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum ModSel {
    Any,
    Mem,
    Reg,
}

/// Mandatory prefix.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum PrefixSel {
    Any,
    None,
    P66,
    PF3,
    PF2,
}

impl PrefixSel {
    /// Value of the prefix field in the lookup key.
    pub(crate) fn key(&self) -> u32 {
        match self {
            Self::Any | Self::None => 0,
            Self::P66 => 1,
            Self::PF3 => 2,
            Self::PF2 => 3,
        }
    }

    /// Converts VEX/EVEX/XOP `pp` field.
    pub(crate) fn from_pp(pp: u8) -> Self {
        match pp & 3 {
            0 => Self::None,
            1 => Self::P66,
            2 => Self::PF3,
            _ => Self::PF2,
        }
    }
}

/// Operand template.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Op {
    /// Fixed register.
    Reg(Register),
    // ModRM.reg general purpose register
    Gb,
    Gw,
    Gd,
    Gq,
    // ModRM.rm general purpose register or memory
    Eb,
    Ew,
    Ed,
    Eq,
    // ModRM.rm general purpose register only
    Rw,
    Rd,
    Rq,
    /// ModRM.rm memory only.
    M,
    /// ModRM.reg segment register.
    Sw,
    Cd,
    Cq,
    Dd,
    Dq,
    Td,
    // MMX registers: reg, rm or memory, rm register only
    P,
    Q,
    N,
    // vector register in ModRM.reg
    VX,
    VY,
    VZ,
    // vector register or memory in ModRM.rm
    WX,
    WY,
    WZ,
    // vector register in ModRM.rm
    UX,
    UY,
    UZ,
    // vector register in vvvv
    HX,
    HY,
    HZ,
    // vector register in imm8[7:4]
    IsX,
    IsY,
    // general purpose register in vvvv
    Bd,
    Bq,
    // opmask registers
    VK,
    WK,
    RK,
    HK,
    BndG,
    BndE,
    Ib,
    Iw,
    Id,
    Iq,
    Ib16,
    Ib32,
    Ib64,
    Id64,
    Ib2,
    /// Implicit constant 1.
    I1,
    Jb,
    Jw,
    Jd,
    /// Far pointer.
    Ap,
    // memory offset
    Ob,
    Ow,
    Od,
    Oq,
    // source string operand [rSI]
    Xb,
    Xw,
    Xd,
    Xq,
    // destination string operand es:[rDI]
    Yb,
    Yw,
    Yd,
    Yq,
    /// [rBX+AL]
    Xlat,
    // general purpose register in opcode low bits
    Zb,
    Zw,
    Zd,
    Zq,
    STi,
    VsibX,
    VsibY,
    VsibZ,
}

impl Op {
    pub(crate) fn is_near_branch(&self) -> bool {
        matches!(self, Self::Jb | Self::Jw | Self::Jd)
    }

    /// Operand is encoded in the vvvv field.
    pub(crate) fn uses_vvvv(&self) -> bool {
        matches!(
            self,
            Self::HX | Self::HY | Self::HZ | Self::Bd | Self::Bq | Self::HK
        )
    }

    /// Operand is a ModRM.rm register which must not be memory.
    pub(crate) fn is_register_only(&self) -> bool {
        matches!(
            self,
            Self::Rw
                | Self::Rd
                | Self::Rq
                | Self::N
                | Self::UX
                | Self::UY
                | Self::UZ
                | Self::RK
                | Self::STi
        )
    }

    pub(crate) fn is_vsib(&self) -> bool {
        matches!(self, Self::VsibX | Self::VsibY | Self::VsibZ)
    }

    /// Index register class of a VSIB operand.
    pub(crate) fn vsib_class(&self) -> Option<RegClass> {
        match self {
            Self::VsibX => Some(RegClass::Xmm),
            Self::VsibY => Some(RegClass::Ymm),
            Self::VsibZ => Some(RegClass::Zmm),
            _ => None,
        }
    }

    /// Operand is a ModRM.rm memory which must not be a register.
    pub(crate) fn is_memory_only(&self) -> bool {
        matches!(self, Self::M | Self::VsibX | Self::VsibY | Self::VsibZ)
    }
}

/// EVEX tuple type, selects the disp8 scale.
#[allow(non_camel_case_types)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum TupleType {
    None,
    Full_128,
    Full_256,
    Full_512,
    Half_128,
    Half_256,
    Half_512,
    Full_Mem_128,
    Full_Mem_256,
    Full_Mem_512,
    Tuple1_Scalar,
    Tuple1_Scalar_1,
    Tuple1_Scalar_2,
    Tuple1_Fixed,
    Tuple2,
    Tuple4,
    Tuple8,
    Half_Mem_128,
    Half_Mem_256,
    Half_Mem_512,
    Quarter_Mem_128,
    Quarter_Mem_256,
    Quarter_Mem_512,
    Eighth_Mem_128,
    Eighth_Mem_256,
    Eighth_Mem_512,
    Mem128,
    MOVDDUP_128,
    MOVDDUP_256,
    MOVDDUP_512,
}

impl TupleType {
    /// Returns the compressed displacement scale.
    pub(crate) fn disp8_scale(&self, w: bool, b: bool) -> i64 {
        let w = |yes, no| if w { yes } else { no };
        match self {
            Self::None => 1,
            Self::Full_128 | Self::Full_256 | Self::Full_512 if b => w(8, 4),
            Self::Full_128 => 16,
            Self::Full_256 => 32,
            Self::Full_512 => 64,
            Self::Half_128 | Self::Half_256 | Self::Half_512 if b => 4,
            Self::Half_128 => 8,
            Self::Half_256 => 16,
            Self::Half_512 => 32,
            Self::Full_Mem_128 => 16,
            Self::Full_Mem_256 => 32,
            Self::Full_Mem_512 => 64,
            Self::Tuple1_Scalar | Self::Tuple1_Fixed => w(8, 4),
            Self::Tuple1_Scalar_1 => 1,
            Self::Tuple1_Scalar_2 => 2,
            Self::Tuple2 => w(16, 8),
            Self::Tuple4 => w(32, 16),
            Self::Tuple8 => 32,
            Self::Half_Mem_128 => 8,
            Self::Half_Mem_256 => 16,
            Self::Half_Mem_512 => 32,
            Self::Quarter_Mem_128 => 4,
            Self::Quarter_Mem_256 => 8,
            Self::Quarter_Mem_512 => 16,
            Self::Eighth_Mem_128 => 2,
            Self::Eighth_Mem_256 => 4,
            Self::Eighth_Mem_512 => 8,
            Self::Mem128 => 16,
            Self::MOVDDUP_128 => 8,
            Self::MOVDDUP_256 => 32,
            Self::MOVDDUP_512 => 64,
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct Entry {
    pub code: Code,
    pub mode: ModSel,
    pub prefix: PrefixSel,
    pub attr: u16,
    pub ops: &'static [Op],
    pub mem: MemorySize,
    pub bcst: MemorySize,
    pub tuple: TupleType,
}

impl Entry {
    pub(crate) fn has(&self, attr: u16) -> bool {
        self.attr & attr != 0
    }

    pub(crate) fn is_near_branch(&self) -> bool {
        self.has(attr::BRANCH) || self.ops.iter().any(Op::is_near_branch)
    }

    pub(crate) fn uses_vvvv(&self) -> bool {
        self.ops.iter().any(Op::uses_vvvv)
    }
}

include!(concat!(env!("OUT_DIR"), "/generated_tables.rs"));

impl Map {
    /// The opcode is followed by a ModRM byte.
    pub(crate) fn has_modrm(&self, opcode: u8) -> bool {
        MODRM[*self as usize][opcode as usize]
    }
}
