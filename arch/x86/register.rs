//! Register names.

use x86_decode_core::define_enum;

define_enum! {
    /// x86 register.
    ///
    /// Registers of one class are numbered consecutively so that the
    /// register number can be added to the first register of the class.
    pub enum Register: u8 {
        AL, CL, DL, BL, AH, CH, DH, BH,
        SPL, BPL, SIL, DIL, R8L, R9L, R10L, R11L,
        R12L, R13L, R14L, R15L, AX, CX, DX, BX,
        SP, BP, SI, DI, R8W, R9W, R10W, R11W,
        R12W, R13W, R14W, R15W, EAX, ECX, EDX, EBX,
        ESP, EBP, ESI, EDI, R8D, R9D, R10D, R11D,
        R12D, R13D, R14D, R15D, RAX, RCX, RDX, RBX,
        RSP, RBP, RSI, RDI, R8, R9, R10, R11,
        R12, R13, R14, R15, EIP, RIP, ES, CS,
        SS, DS, FS, GS, XMM0, XMM1, XMM2, XMM3,
        XMM4, XMM5, XMM6, XMM7, XMM8, XMM9, XMM10, XMM11,
        XMM12, XMM13, XMM14, XMM15, XMM16, XMM17, XMM18, XMM19,
        XMM20, XMM21, XMM22, XMM23, XMM24, XMM25, XMM26, XMM27,
        XMM28, XMM29, XMM30, XMM31, YMM0, YMM1, YMM2, YMM3,
        YMM4, YMM5, YMM6, YMM7, YMM8, YMM9, YMM10, YMM11,
        YMM12, YMM13, YMM14, YMM15, YMM16, YMM17, YMM18, YMM19,
        YMM20, YMM21, YMM22, YMM23, YMM24, YMM25, YMM26, YMM27,
        YMM28, YMM29, YMM30, YMM31, ZMM0, ZMM1, ZMM2, ZMM3,
        ZMM4, ZMM5, ZMM6, ZMM7, ZMM8, ZMM9, ZMM10, ZMM11,
        ZMM12, ZMM13, ZMM14, ZMM15, ZMM16, ZMM17, ZMM18, ZMM19,
        ZMM20, ZMM21, ZMM22, ZMM23, ZMM24, ZMM25, ZMM26, ZMM27,
        ZMM28, ZMM29, ZMM30, ZMM31, K0, K1, K2, K3,
        K4, K5, K6, K7, BND0, BND1, BND2, BND3,
        CR0, CR1, CR2, CR3, CR4, CR5, CR6, CR7,
        CR8, CR9, CR10, CR11, CR12, CR13, CR14, CR15,
        DR0, DR1, DR2, DR3, DR4, DR5, DR6, DR7,
        DR8, DR9, DR10, DR11, DR12, DR13, DR14, DR15,
        ST0, ST1, ST2, ST3, ST4, ST5, ST6, ST7,
        MM0, MM1, MM2, MM3, MM4, MM5, MM6, MM7,
        TR0, TR1, TR2, TR3, TR4, TR5, TR6, TR7,
    }
}

use self::Register::*;

static GPR8: [Register; 8] = [AL, CL, DL, BL, AH, CH, DH, BH];

#[rustfmt::skip]
static GPR8_REX: [Register; 16] = [
    AL, CL, DL, BL, SPL, BPL, SIL, DIL,
    R8L, R9L, R10L, R11L, R12L, R13L, R14L, R15L,
];

#[rustfmt::skip]
static GPR16: [Register; 16] = [
    AX, CX, DX, BX, SP, BP, SI, DI,
    R8W, R9W, R10W, R11W, R12W, R13W, R14W, R15W,
];

#[rustfmt::skip]
static GPR32: [Register; 16] = [
    EAX, ECX, EDX, EBX, ESP, EBP, ESI, EDI,
    R8D, R9D, R10D, R11D, R12D, R13D, R14D, R15D,
];

#[rustfmt::skip]
static GPR64: [Register; 16] = [
    RAX, RCX, RDX, RBX, RSP, RBP, RSI, RDI,
    R8, R9, R10, R11, R12, R13, R14, R15,
];

static SEGMENT: [Register; 6] = [ES, CS, SS, DS, FS, GS];

/// Register class of a decoded operand.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum RegClass {
    Gpr8,
    Gpr16,
    Gpr32,
    Gpr64,
    Segment,
    Xmm,
    Ymm,
    Zmm,
    Mask,
    Bound,
    Control,
    Debug,
    Test,
    St,
    Mmx,
}

impl RegClass {
    /// Returns the number of registers in the class.
    pub(crate) fn count(&self) -> u8 {
        match self {
            Self::Gpr8 | Self::Gpr16 | Self::Gpr32 | Self::Gpr64 => 16,
            Self::Segment => 6,
            Self::Xmm | Self::Ymm | Self::Zmm => 32,
            Self::Control | Self::Debug => 16,
            Self::Bound => 4,
            Self::Mask | Self::Test | Self::St | Self::Mmx => 8,
        }
    }

    fn first(&self) -> Register {
        match self {
            Self::Gpr8 => AL,
            Self::Gpr16 => AX,
            Self::Gpr32 => EAX,
            Self::Gpr64 => RAX,
            Self::Segment => ES,
            Self::Xmm => XMM0,
            Self::Ymm => YMM0,
            Self::Zmm => ZMM0,
            Self::Mask => K0,
            Self::Bound => BND0,
            Self::Control => CR0,
            Self::Debug => DR0,
            Self::Test => TR0,
            Self::St => ST0,
            Self::Mmx => MM0,
        }
    }

    /// Returns register `n` of the class or `None` if the number is out of
    /// range.
    ///
    /// Byte registers follow the REX rule: without a REX prefix numbers
    /// 4-7 select AH, CH, DH and BH.
    pub(crate) fn get(&self, n: u8, rex: bool) -> Option<Register> {
        let n = n as usize;
        match self {
            Self::Gpr8 if rex => GPR8_REX.get(n).copied(),
            Self::Gpr8 => GPR8.get(n).copied(),
            Self::Gpr16 => GPR16.get(n).copied(),
            Self::Gpr32 => GPR32.get(n).copied(),
            Self::Gpr64 => GPR64.get(n).copied(),
            Self::Segment => SEGMENT.get(n).copied(),
            _ if n < self.count() as usize => Register::from_index(self.first().index() + n),
            _ => None,
        }
    }
}

impl Register {
    /// Returns the general purpose register `n` of `bits` width.
    pub fn gpr(bits: u32, n: u8, rex: bool) -> Option<Register> {
        let class = match bits {
            8 => RegClass::Gpr8,
            16 => RegClass::Gpr16,
            32 => RegClass::Gpr32,
            64 => RegClass::Gpr64,
            _ => return None,
        };
        class.get(n, rex)
    }

    pub fn is_gpr8(&self) -> bool {
        (AL..=R15L).contains(self)
    }

    pub fn is_gpr16(&self) -> bool {
        (AX..=R15W).contains(self)
    }

    pub fn is_gpr32(&self) -> bool {
        (EAX..=R15D).contains(self)
    }

    pub fn is_gpr64(&self) -> bool {
        (RAX..=R15).contains(self)
    }

    pub fn is_segment(&self) -> bool {
        (ES..=GS).contains(self)
    }

    pub fn is_vector(&self) -> bool {
        (XMM0..=ZMM31).contains(self)
    }

    pub fn is_mask(&self) -> bool {
        (K0..=K7).contains(self)
    }

    /// Returns the register size in bytes, zero for registers without a
    /// fixed size (control, debug and test registers).
    pub fn size(&self) -> usize {
        const SIZES: &[(Register, Register, usize)] = &[
            (AL, R15L, 1),
            (AX, R15W, 2),
            (EAX, R15D, 4),
            (RAX, R15, 8),
            (EIP, EIP, 4),
            (RIP, RIP, 8),
            (ES, GS, 2),
            (XMM0, XMM31, 16),
            (YMM0, YMM31, 32),
            (ZMM0, ZMM31, 64),
            (K0, K7, 8),
            (BND0, BND3, 16),
            (ST0, ST7, 10),
            (MM0, MM7, 8),
        ];
        SIZES
            .iter()
            .find(|(first, last, _)| (first..=last).contains(&self))
            .map_or(0, |(_, _, size)| *size)
    }
}
