//! Structural dump of decoded instructions.
//!
//! ```text
//! lock Add_Eq_Gq UInt64[ds:rax+rcx*4+0x10], rdx
//! EVEX_Vaddps_VZ_k1z_HZ_WZ_er_b zmm1, zmm2, Broadcast512_Float32[ds:rax] {k1}{z}
//! ```

use core::fmt::{self, Write as _};

use crate::{Instruction, MemoryOperand, OpKind, Register, RoundingControl};

struct Reg(Register);

impl fmt::Display for Reg {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        for c in self.0.name().chars() {
            fmt.write_char(c.to_ascii_lowercase())?;
        }
        Ok(())
    }
}

struct Printer<'a>(&'a Instruction, &'a OpKind);

impl Printer<'_> {
    fn print_memory(&self, fmt: &mut fmt::Formatter, mem: &MemoryOperand) -> fmt::Result {
        write!(fmt, "{}[{}:", self.0.memory_size().name(), Reg(mem.segment))?;
        let mut empty = true;
        if let Some(base) = mem.base {
            write!(fmt, "{}", Reg(base))?;
            empty = false;
        }
        if let Some(index) = mem.index {
            if !empty {
                fmt.write_char('+')?;
            }
            write!(fmt, "{}*{}", Reg(index), mem.scale)?;
            empty = false;
        }
        if mem.displ_size != 0 || empty {
            let disp = mem.displacement;
            if empty {
                write!(fmt, "{disp:#x}")?;
            } else if disp < 0 {
                write!(fmt, "-{:#x}", disp.unsigned_abs())?;
            } else {
                write!(fmt, "+{disp:#x}")?;
            }
        }
        fmt.write_char(']')
    }
}

impl fmt::Display for Printer<'_> {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match *self.1 {
            OpKind::Register(reg) => write!(fmt, "{}", Reg(reg)),
            OpKind::Memory(ref mem) => self.print_memory(fmt, mem),
            OpKind::Immediate8(imm) => write!(fmt, "i8:{imm:#x}"),
            OpKind::Immediate8_2nd(imm) => write!(fmt, "i8_2:{imm:#x}"),
            OpKind::Immediate16(imm) => write!(fmt, "i16:{imm:#x}"),
            OpKind::Immediate32(imm) => write!(fmt, "i32:{imm:#x}"),
            OpKind::Immediate64(imm) => write!(fmt, "i64:{imm:#x}"),
            OpKind::Immediate8to16(imm) => write!(fmt, "i8to16:{:#x}", imm as u16),
            OpKind::Immediate8to32(imm) => write!(fmt, "i8to32:{:#x}", imm as u32),
            OpKind::Immediate8to64(imm) => write!(fmt, "i8to64:{:#x}", imm as u64),
            OpKind::Immediate32to64(imm) => write!(fmt, "i32to64:{:#x}", imm as u64),
            OpKind::NearBranch16(target) => write!(fmt, "nb16:{target:#x}"),
            OpKind::NearBranch32(target) => write!(fmt, "nb32:{target:#x}"),
            OpKind::NearBranch64(target) => write!(fmt, "nb64:{target:#x}"),
            OpKind::FarBranch16 { selector, offset } => {
                write!(fmt, "fb16:{selector:#x}:{offset:#x}")
            }
            OpKind::FarBranch32 { selector, offset } => {
                write!(fmt, "fb32:{selector:#x}:{offset:#x}")
            }
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        if self.has_lock() {
            fmt.write_str("lock ")?;
        }
        if self.has_repe() {
            fmt.write_str("repe ")?;
        }
        if self.has_repne() {
            fmt.write_str("repne ")?;
        }
        fmt.write_str(self.code().name())?;

        for (i, op) in self.ops().iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            write!(fmt, "{sep}{}", Printer(self, op))?;
        }

        let opmask = self.opmask();
        if opmask.is_some() || self.zeroing() {
            fmt.write_char(' ')?;
        }
        if let Some(k) = opmask {
            write!(fmt, "{{{}}}", Reg(k))?;
        }
        if self.zeroing() {
            fmt.write_str("{z}")?;
        }
        let rounding = match self.rounding() {
            RoundingControl::None => None,
            RoundingControl::RoundToNearest => Some("rn-sae"),
            RoundingControl::RoundDown => Some("rd-sae"),
            RoundingControl::RoundUp => Some("ru-sae"),
            RoundingControl::RoundTowardZero => Some("rz-sae"),
        };
        if let Some(rounding) = rounding {
            write!(fmt, " {{{rounding}}}")?;
        } else if self.suppress_all_exceptions() {
            fmt.write_str(" {sae}")?;
        }
        Ok(())
    }
}
