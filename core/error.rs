use core::fmt;

/// Encoding rule broken by an instruction.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Invalid {
    /// REX, 66, F2 or F3 prefix before a VEX, XOP or EVEX prefix.
    VexPrefix,
    /// Reserved opcode map selector.
    Map,
    /// MVEX encoding (EVEX with P1 bit 2 cleared).
    Mvex,
    /// Reserved EVEX bits are not zero.
    EvexReserved,
    /// EVEX.z without an opmask register.
    ZeroingWithoutMask,
    /// Memory operand for a register-only form.
    RegisterOnly,
    /// Register operand for a memory-only form.
    MemoryOnly,
    /// VEX/XOP/EVEX vvvv must be 1111b for this instruction.
    UnusedVvvv,
    /// LOCK prefix on an instruction which is not lockable.
    Lock,
    /// Opmask register is not allowed or is required.
    Opmask,
    /// Zeroing-masking is not allowed.
    Zeroing,
    /// Embedded rounding or SAE is not supported.
    EmbeddedRounding,
    /// Broadcast is not supported.
    Broadcast,
    /// VSIB memory operand without a SIB byte.
    Vsib,
    /// Reserved register number.
    Register,
    /// Address size not supported by the instruction.
    AddressSize,
    /// Instruction is longer than 15 bytes.
    TooLong,
}

impl Invalid {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VexPrefix => "legacy prefix before VEX/XOP/EVEX",
            Self::Map => "reserved opcode map",
            Self::Mvex => "MVEX is not supported",
            Self::EvexReserved => "reserved EVEX bits",
            Self::ZeroingWithoutMask => "zeroing without opmask",
            Self::RegisterOnly => "memory operand for register-only form",
            Self::MemoryOnly => "register operand for memory-only form",
            Self::UnusedVvvv => "vvvv is not 1111b",
            Self::Lock => "LOCK prefix not allowed",
            Self::Opmask => "invalid opmask",
            Self::Zeroing => "zeroing-masking not allowed",
            Self::EmbeddedRounding => "embedded rounding not allowed",
            Self::Broadcast => "broadcast not allowed",
            Self::Vsib => "VSIB requires SIB byte",
            Self::Register => "reserved register",
            Self::AddressSize => "unsupported address size",
            Self::TooLong => "instruction too long",
        }
    }
}

impl fmt::Display for Invalid {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str(self.as_str())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Error {
    /// Need more bytes to decode an instruction, the payload is the total
    /// number of bytes required so far.
    More(usize),
    /// No instruction is defined for the opcode.
    InvalidOpcode,
    /// Known opcode but an illegal combination of prefixes, operands or
    /// decorations.
    InvalidEncoding(Invalid),
}

impl Error {
    pub fn is_more(&self) -> bool {
        matches!(self, Self::More(_))
    }
}

impl From<Invalid> for Error {
    fn from(value: Invalid) -> Self {
        Self::InvalidEncoding(value)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::More(n) => write!(fmt, "Need more data ({n} bytes)"),
            Self::InvalidOpcode => fmt.write_str("Invalid opcode"),
            Self::InvalidEncoding(invalid) => write!(fmt, "Invalid encoding: {invalid}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}
