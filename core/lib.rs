#![cfg_attr(not(feature = "std"), no_std)]

pub mod bytes;
pub mod error;
pub mod flags;
pub mod macros;
pub mod utils;

use core::fmt;

/// Maximum length of an x86 instruction in bytes.
pub const INSN_MAX_LEN: usize = 15;

/// Code size of the decoded instruction stream.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Bitness {
    Bits16,
    Bits32,
    #[default]
    Bits64,
}

impl Bitness {
    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            16 => Some(Self::Bits16),
            32 => Some(Self::Bits32),
            64 => Some(Self::Bits64),
            _ => None,
        }
    }

    pub const fn bits(&self) -> u32 {
        match self {
            Self::Bits16 => 16,
            Self::Bits32 => 32,
            Self::Bits64 => 64,
        }
    }

    pub const fn is_64(&self) -> bool {
        matches!(self, Self::Bits64)
    }
}

impl fmt::Display for Bitness {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}-bit", self.bits())
    }
}
