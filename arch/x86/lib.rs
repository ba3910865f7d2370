//! x86/x86-64 instruction decoder.
//!
//! ```
//! use x86_decode::{decode, Bitness, Code, OpKind};
//!
//! let (insn, len) = decode(&[0x68, 0x5a, 0xa5, 0x12, 0x34], 0, Bitness::Bits32).unwrap();
//! assert_eq!(insn.code(), Code::Push_Id);
//! assert_eq!(insn.ops(), &[OpKind::Immediate32(0x3412a55a)]);
//! assert_eq!(len, 5);
//! ```

#![cfg_attr(not(feature = "std"), no_std)]

mod code;
mod generated;
mod instruction;
mod memory_size;
mod operand;
mod register;
mod table;

#[cfg(feature = "print")]
mod printer;

use core::ops::{Deref, DerefMut};

use log::{debug, trace};
use x86_decode_core::{bytes::Bytes, impl_field, utils::truncate};

use crate::{
    instruction::{
        BROADCAST, FIELD_ENCODING, FIELD_OPMASK, FIELD_ROUNDING, LOCK, REPE, REPNE, SAE, ZEROING,
    },
    register::RegClass,
    table::{attr, key, Entry, Map, ModSel, Op, PrefixSel, SelectEntry, TableDecode, ENTRIES},
};

pub use x86_decode_core::{
    error::{Error, Invalid},
    Bitness, INSN_MAX_LEN,
};

#[cfg(feature = "mnemonic")]
pub use crate::code::Mnemonic;
pub use crate::{
    code::Code,
    instruction::{ConstantOffsets, EncodingKind, Instruction, RoundingControl, MAX_OPERANDS},
    memory_size::MemorySize,
    operand::{MemoryOperand, OpKind},
    register::Register,
};

type Result<T = (), E = Error> = core::result::Result<T, E>;

const PREFIX_OPERAND_SIZE: u8 = 0x66;
const PREFIX_ADDRESS_SIZE: u8 = 0x67;
const PREFIX_CS: u8 = 0x2e;
const PREFIX_ES: u8 = 0x26;
const PREFIX_SS: u8 = 0x36;
const PREFIX_DS: u8 = 0x3e;
const PREFIX_FS: u8 = 0x64;
const PREFIX_GS: u8 = 0x65;
const PREFIX_LOCK: u8 = 0xf0;
const PREFIX_REPNZ: u8 = 0xf2;
const PREFIX_REPZ: u8 = 0xf3;
const PREFIX_REX: u8 = 0x40;
const PREFIX_REX_MASK: u8 = 0xf0;

const ESCAPE_0F: u8 = 0x0f;
const ESCAPE_38: u8 = 0x38;
const ESCAPE_3A: u8 = 0x3a;
const ESCAPE_3DNOW: u8 = 0x0f;
const ESCAPE_VEX2: u8 = 0xc5;
const ESCAPE_VEX3: u8 = 0xc4;
const ESCAPE_XOP: u8 = 0x8f;
const ESCAPE_EVEX: u8 = 0x62;

const MODE_REGISTER_DIRECT: u8 = 3;

/// 16-bit addressing forms indexed by ModRM.rm.
const MEM16: [(Register, Option<Register>); 8] = [
    (Register::BX, Some(Register::SI)),
    (Register::BX, Some(Register::DI)),
    (Register::BP, Some(Register::SI)),
    (Register::BP, Some(Register::DI)),
    (Register::SI, None),
    (Register::DI, None),
    (Register::BP, None),
    (Register::BX, None),
];

#[derive(Copy, Clone, Default)]
struct ModRm(u8);

impl ModRm {
    fn raw(&self) -> u8 {
        self.0
    }

    impl_field! {
        rm = 0, 3, u8;
        reg = 3, 3, u8;
        mode = 6, 2, u8;
    }
}

#[derive(Copy, Clone)]
struct Sib(u8);

impl Sib {
    fn raw(&self) -> u8 {
        self.0
    }

    impl_field! {
        base = 0, 3, u8;
        index = 3, 3, u8;
        scale = 6, 2, u8;
    }
}

/// Decoder configuration.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Options {
    pub bitness: Bitness,
    /// Reject encodings that break a rule which does not change the
    /// instruction length (LOCK, unused vvvv, EVEX decorations, prefixes
    /// before VEX/XOP/EVEX).
    pub invalid_check: bool,
    /// Near branches in 64-bit mode honor the 66 prefix, as AMD processors
    /// do. By default 66 is ignored.
    pub amd_branches: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            bitness: Bitness::Bits64,
            invalid_check: true,
            amd_branches: false,
        }
    }
}

impl Options {
    pub fn new(bitness: Bitness) -> Self {
        Self {
            bitness,
            ..Self::default()
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Repeat {
    None,
    RepZ,
    RepNZ,
}

impl Default for Repeat {
    fn default() -> Self {
        Self::None
    }
}

#[derive(Default)]
struct State {
    // legacy prefixes
    prefix_66: bool,
    prefix_67: bool,
    lock: bool,
    repeat: Repeat,
    segment: Option<Register>,
    // FS/GS override seen, 64-bit mode ignores ES/CS/SS/DS after it
    segment_prio: bool,

    // last REX byte, any following legacy prefix cancels it
    rex_byte: u8,
    rex: bool,
    w: bool,

    // register number extensions, already shifted into place
    r: u8,
    x: u8,
    b: u8,
    // EVEX.R' and EVEX.V'
    r2: u8,
    v2: u8,

    vvvv: u8,
    // vvvv as encoded, before masking for 16/32-bit modes
    vvvv_raw: u8,
    l: u8,
    // mandatory prefix from VEX/XOP/EVEX.pp
    pp: Option<PrefixSel>,
    encoding: EncodingKind,

    // EVEX decorations
    aaa: u8,
    z: bool,
    bcst: bool,

    opcode: u8,
    modrm: ModRm,
    has_modrm: bool,
    // index into ENTRIES selected by the opcode tables
    entry: usize,

    operand_size: u8,
    address_size: u8,

    mem: Option<MemoryOperand>,
    // operand index and displacement of a near branch
    branch: Option<(usize, i64)>,
}

struct Inner<'a> {
    opts: &'a Options,
    bytes: Bytes<'a>,
    ip: u64,
    state: State,
}

impl<'a> Deref for Inner<'a> {
    type Target = State;

    fn deref(&self) -> &Self::Target {
        &self.state
    }
}

impl<'a> DerefMut for Inner<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.state
    }
}

impl<'a> Inner<'a> {
    #[inline(always)]
    fn is_64(&self) -> bool {
        self.opts.bitness.is_64()
    }

    #[inline(always)]
    fn mode(&self) -> u8 {
        self.modrm.mode()
    }

    #[inline(always)]
    fn reg(&self) -> u8 {
        self.modrm.reg()
    }

    #[inline(always)]
    fn rm(&self) -> u8 {
        self.modrm.rm()
    }

    #[inline(always)]
    fn is_reg_form(&self) -> bool {
        self.mode() == MODE_REGISTER_DIRECT
    }

    #[inline(always)]
    fn is_evex(&self) -> bool {
        self.encoding == EncodingKind::Evex
    }

    fn invalid(&self, invalid: Invalid) -> Error {
        trace!(
            "{:#x}: {invalid}, bytes {:02x?}",
            self.ip,
            self.bytes.consumed()
        );
        Error::InvalidEncoding(invalid)
    }

    /// Fails with `invalid` if `cond` holds and checks are enabled.
    fn check(&self, cond: bool, invalid: Invalid) -> Result {
        if cond && self.opts.invalid_check {
            Err(self.invalid(invalid))
        } else {
            Ok(())
        }
    }

    fn set_segment(&mut self, segment: Register) {
        if !(self.is_64() && self.segment_prio) {
            self.segment = Some(segment);
        }
    }

    #[inline(always)]
    fn set_rex(&mut self) {
        let rex = self.rex_byte;
        if rex != 0 {
            self.rex = true;
            self.w = rex & 8 != 0;
            self.r = (rex & 4) << 1;
            self.x = (rex & 2) << 2;
            self.b = (rex & 1) << 3;
        }
    }

    #[inline(always)]
    fn set_vvvv(&mut self, vvvv: u8) {
        self.vvvv_raw = vvvv;
        self.vvvv = if self.is_64() { vvvv } else { vvvv & 7 };
    }

    /// Consumes legacy prefixes and REX, returns the first opcode byte.
    fn decode_prefixes(&mut self) -> Result<u8> {
        loop {
            let byte = self.bytes.read_u8()?;
            match byte {
                PREFIX_ES => self.set_segment(Register::ES),
                PREFIX_CS => self.set_segment(Register::CS),
                PREFIX_SS => self.set_segment(Register::SS),
                PREFIX_DS => self.set_segment(Register::DS),
                PREFIX_FS | PREFIX_GS => {
                    let segment = if byte == PREFIX_FS {
                        Register::FS
                    } else {
                        Register::GS
                    };
                    self.segment = Some(segment);
                    self.segment_prio = true;
                }
                PREFIX_OPERAND_SIZE => self.prefix_66 = true,
                PREFIX_ADDRESS_SIZE => self.prefix_67 = true,
                PREFIX_LOCK => self.lock = true,
                PREFIX_REPZ => self.repeat = Repeat::RepZ,
                PREFIX_REPNZ => self.repeat = Repeat::RepNZ,
                _ if byte & PREFIX_REX_MASK == PREFIX_REX && self.is_64() => {
                    self.rex_byte = byte;
                    continue;
                }
                _ => return Ok(byte),
            }
            self.rex_byte = 0;
        }
    }

    /// C4/C5/62 are LES/LDS/BOUND outside of 64-bit mode unless ModRM.mod
    /// of the next byte is 11b.
    fn is_vex_escape(&self) -> bool {
        self.is_64() || matches!(self.bytes.peek_u8(), Some(b) if b >> 6 == MODE_REGISTER_DIRECT)
    }

    /// 8F is POP Ev if the map field is less than 8.
    fn is_xop_escape(&self) -> bool {
        matches!(self.bytes.peek_u8(), Some(b) if b & 0x1f >= 8)
    }

    fn check_vex_prefixes(&mut self) -> Result {
        let legacy = self.rex_byte != 0 || self.prefix_66 || self.repeat != Repeat::None;
        self.check(legacy, Invalid::VexPrefix)?;
        self.prefix_66 = false;
        self.repeat = Repeat::None;
        self.rex_byte = 0;
        Ok(())
    }

    fn decode_vex2(&mut self) -> Result<Map> {
        self.check_vex_prefixes()?;
        let b = self.bytes.read_u8()?;
        if self.is_64() {
            self.r = (!b & 0x80) >> 4;
        }
        self.set_vvvv((!b >> 3) & 15);
        self.l = (b >> 2) & 1;
        self.pp = Some(PrefixSel::from_pp(b));
        self.encoding = EncodingKind::Vex;
        self.opcode = self.bytes.read_u8()?;
        Ok(Map::Vex0F)
    }

    fn decode_vex3(&mut self, encoding: EncodingKind) -> Result<Map> {
        self.check_vex_prefixes()?;
        let [b1, b2] = self.bytes.read_array::<2>()?;
        if self.is_64() {
            self.r = (!b1 & 0x80) >> 4;
            self.x = (!b1 & 0x40) >> 3;
            self.b = (!b1 & 0x20) >> 2;
        }
        self.w = b2 & 0x80 != 0;
        self.set_vvvv((!b2 >> 3) & 15);
        self.l = (b2 >> 2) & 1;
        self.pp = Some(PrefixSel::from_pp(b2));
        let map = match (encoding, b1 & 0x1f) {
            (EncodingKind::Vex, 1) => Map::Vex0F,
            (EncodingKind::Vex, 2) => Map::Vex0F38,
            (EncodingKind::Vex, 3) => Map::Vex0F3A,
            (EncodingKind::Xop, 8) => Map::Xop8,
            (EncodingKind::Xop, 9) => Map::Xop9,
            (EncodingKind::Xop, 10) => Map::XopA,
            _ => return Err(self.invalid(Invalid::Map)),
        };
        self.encoding = encoding;
        self.opcode = self.bytes.read_u8()?;
        Ok(map)
    }

    fn decode_evex(&mut self) -> Result<Map> {
        self.check_vex_prefixes()?;
        let [p0, p1, p2] = self.bytes.read_array::<3>()?;
        if p1 & 4 == 0 {
            return Err(self.invalid(Invalid::Mvex));
        }
        if p0 & 0x0c != 0 {
            return Err(self.invalid(Invalid::EvexReserved));
        }
        let map = match p0 & 3 {
            1 => Map::Evex0F,
            2 => Map::Evex0F38,
            3 => Map::Evex0F3A,
            _ => return Err(self.invalid(Invalid::Map)),
        };
        if self.is_64() {
            self.r = (!p0 & 0x80) >> 4;
            self.x = (!p0 & 0x40) >> 3;
            self.b = (!p0 & 0x20) >> 2;
            self.r2 = !p0 & 0x10;
            self.v2 = (!p2 & 8) << 1;
        }
        self.w = p1 & 0x80 != 0;
        self.set_vvvv((!p1 >> 3) & 15);
        self.pp = Some(PrefixSel::from_pp(p1));
        self.aaa = p2 & 7;
        self.z = p2 & 0x80 != 0;
        self.bcst = p2 & 0x10 != 0;
        self.l = (p2 >> 5) & 3;
        self.check(self.z && self.aaa == 0, Invalid::ZeroingWithoutMask)?;
        self.encoding = EncodingKind::Evex;
        self.opcode = self.bytes.read_u8()?;
        Ok(map)
    }

    /// 3DNow puts the opcode after ModRM and the memory operand.
    fn decode_3dnow(&mut self, out: &mut Instruction) -> Result<Map> {
        self.modrm = ModRm(self.bytes.read_u8()?);
        self.has_modrm = true;
        if !self.is_reg_form() {
            self.mem = Some(self.decode_mem(out, None, false, 1)?);
        }
        self.encoding = EncodingKind::D3now;
        self.opcode = self.bytes.read_u8()?;
        Ok(Map::D3Now)
    }

    fn mandatory_prefix(&self) -> PrefixSel {
        if let Some(pp) = self.pp {
            return pp;
        }
        match self.repeat {
            Repeat::RepZ => PrefixSel::PF3,
            Repeat::RepNZ => PrefixSel::PF2,
            Repeat::None if self.prefix_66 => PrefixSel::P66,
            Repeat::None => PrefixSel::None,
        }
    }

    /// Vector length used for matching, EVEX rounding implies 512 bits.
    fn vector_length(&self) -> u8 {
        if self.is_evex() && self.bcst && self.is_reg_form() {
            2
        } else {
            self.l
        }
    }

    /// Effective operand size if `entry` is selected.
    fn operand_size_for(&self, entry: &Entry) -> u8 {
        let prefix_66 = self.prefix_66 && entry.prefix != PrefixSel::P66;
        if self.is_64() {
            if entry.has(attr::F64) || self.w {
                64
            } else if entry.has(attr::D64) {
                let ignore_66 = !self.opts.amd_branches && entry.is_near_branch();
                if prefix_66 && !ignore_66 {
                    16
                } else {
                    64
                }
            } else if prefix_66 {
                16
            } else {
                32
            }
        } else {
            let size = match self.opts.bitness {
                Bitness::Bits16 => 16,
                _ => 32,
            };
            if prefix_66 {
                48 - size
            } else {
                size
            }
        }
    }

    /// Packs the state the opcode tables select on, `reg_form` stands in for
    /// ModRM.mod so the other form can be looked up too.
    fn table_key(&self, map: Map, reg_form: bool) -> u32 {
        let size = |bits| match bits {
            16 => 0,
            32 => 1,
            _ => 2,
        };
        key::MAP.encode(map as u32)
            | key::OPCODE.encode(self.opcode as u32)
            | key::REG.encode(self.reg() as u32)
            | key::RM.encode(self.rm() as u32)
            | key::REG_FORM.encode(reg_form as u32)
            | key::PREFIX.encode(self.mandatory_prefix().key())
            | key::P66.encode(self.prefix_66 as u32)
            | key::W.encode(self.w as u32)
            | key::BITNESS.encode(size(self.opts.bitness.bits()))
            | key::ASIZE.encode(size(self.address_size as u32))
            | key::L.encode(self.vector_length() as u32)
            | key::REX_B.encode((self.b != 0) as u32)
            | key::AMD.encode(self.opts.amd_branches as u32)
    }

    fn find_entry(&mut self, map: Map) -> Result<&'static Entry> {
        let reg_form = self.is_reg_form();
        let key = self.table_key(map, reg_form);
        if TableDecode::decode(self, key).is_ok() {
            return Ok(&ENTRIES[self.entry]);
        }
        // look for the other form to report a better error
        let key = self.table_key(map, !reg_form);
        if self.has_modrm && TableDecode::decode(self, key).is_ok() {
            return if ENTRIES[self.entry].mode == ModSel::Reg {
                Err(self.invalid(Invalid::RegisterOnly))
            } else {
                Err(self.invalid(Invalid::MemoryOnly))
            };
        }
        trace!(
            "{:#x}: invalid opcode {map:?} {:02x}, bytes {:02x?}",
            self.ip,
            self.opcode,
            self.bytes.consumed()
        );
        Err(Error::InvalidOpcode)
    }

    fn register(&self, class: RegClass, n: u8) -> Result<OpKind> {
        match class.get(n, self.rex) {
            Some(reg) => Ok(OpKind::Register(reg)),
            None => Err(self.invalid(Invalid::Register)),
        }
    }

    fn gpr(&self, bits: u8, n: u8) -> Result<OpKind> {
        let class = match bits {
            8 => RegClass::Gpr8,
            16 => RegClass::Gpr16,
            32 => RegClass::Gpr32,
            _ => RegClass::Gpr64,
        };
        self.register(class, n)
    }

    fn memory(&self) -> Result<OpKind> {
        match self.mem {
            Some(mem) => Ok(OpKind::Memory(mem)),
            None => Err(self.invalid(Invalid::MemoryOnly)),
        }
    }

    fn gpr_or_mem(&self, bits: u8) -> Result<OpKind> {
        if self.is_reg_form() {
            self.gpr(bits, self.rm() + self.b)
        } else {
            self.memory()
        }
    }

    /// Register number of a vector register in ModRM.rm.
    fn vec_rm(&self) -> u8 {
        let x = if self.is_evex() { self.x << 1 } else { 0 };
        self.rm() + self.b + x
    }

    fn vec_or_mem(&self, class: RegClass) -> Result<OpKind> {
        if self.is_reg_form() {
            self.register(class, self.vec_rm())
        } else {
            self.memory()
        }
    }

    fn mask(&self, n: u8, extended: bool) -> Result<OpKind> {
        self.check(extended, Invalid::Register)?;
        self.register(RegClass::Mask, n & 7)
    }

    fn read_imm(&mut self, out: &mut Instruction, size: usize) -> Result<u64> {
        let offset = self.bytes.offset();
        let imm = match size {
            1 => self.bytes.read_u8()? as u64,
            2 => self.bytes.read_u16()? as u64,
            4 => self.bytes.read_u32()? as u64,
            _ => self.bytes.read_u64()?,
        };
        out.offsets_mut().push_immediate(offset, size);
        Ok(imm)
    }

    fn read_displacement(
        &mut self,
        out: &mut Instruction,
        size: u8,
        disp8_scale: i64,
    ) -> Result<i64> {
        let offset = self.bytes.offset();
        let disp = match size {
            0 => return Ok(0),
            1 => self.bytes.read_i8()? as i64 * disp8_scale,
            2 => self.bytes.read_i16()? as i64,
            4 => self.bytes.read_i32()? as i64,
            _ => self.bytes.read_i64()?,
        };
        out.offsets_mut()
            .set_displacement(offset, size as usize);
        Ok(disp)
    }

    fn default_segment(&self, base: Option<Register>) -> Register {
        use Register::*;

        match (self.segment, base) {
            (Some(segment), _) => segment,
            (None, Some(BP | EBP | RBP | SP | ESP | RSP)) => SS,
            _ => DS,
        }
    }

    fn decode_mem16(&mut self, out: &mut Instruction, disp8_scale: i64) -> Result<MemoryOperand> {
        let (mode, rm) = (self.mode(), self.rm());
        let (base, index) = if mode == 0 && rm == 6 {
            (None, None)
        } else {
            let (base, index) = MEM16[rm as usize];
            (Some(base), index)
        };
        let displ_size = match mode {
            0 if rm == 6 => 2,
            0 => 0,
            1 => 1,
            _ => 2,
        };
        let displacement = self.read_displacement(out, displ_size, disp8_scale)?;
        Ok(MemoryOperand {
            segment: self.default_segment(base),
            base,
            index,
            scale: 1,
            displacement,
            displ_size,
        })
    }

    fn decode_mem(
        &mut self,
        out: &mut Instruction,
        vsib: Option<RegClass>,
        mpx: bool,
        disp8_scale: i64,
    ) -> Result<MemoryOperand> {
        let address_size = if mpx && self.is_64() {
            64
        } else {
            self.address_size
        };
        if address_size == 16 {
            if mpx {
                return Err(self.invalid(Invalid::AddressSize));
            }
            if vsib.is_some() {
                return Err(self.invalid(Invalid::Vsib));
            }
            return self.decode_mem16(out, disp8_scale);
        }

        let (mode, rm) = (self.mode(), self.rm());
        let mut displ_size = match mode {
            1 => 1,
            2 => 4,
            _ => 0,
        };
        let mut base = None;
        let mut index = None;
        let mut scale = 1;

        if rm == 4 {
            let sib = Sib(self.bytes.read_u8()?);
            let n = sib.index() + self.x;
            index = match vsib {
                Some(class) => self.register(class, n + self.v2)?.register(),
                None if n == 4 => None,
                None => self.gpr(address_size, n)?.register(),
            };
            if index.is_some() {
                scale = 1 << sib.scale();
            }
            if sib.base() == 5 && mode == 0 {
                displ_size = 4;
            } else {
                base = self.gpr(address_size, sib.base() + self.b)?.register();
            }
        } else if vsib.is_some() {
            return Err(self.invalid(Invalid::Vsib));
        } else if rm == 5 && mode == 0 {
            displ_size = 4;
            if self.is_64() {
                base = Some(match address_size {
                    64 => Register::RIP,
                    _ => Register::EIP,
                });
            }
        } else {
            base = self.gpr(address_size, rm + self.b)?.register();
        }

        let displacement = self.read_displacement(out, displ_size, disp8_scale)?;
        Ok(MemoryOperand {
            segment: self.default_segment(base),
            base,
            index,
            scale,
            displacement,
            displ_size,
        })
    }

    /// Memory operand addressed by the address-size variant of `n`.
    fn implicit_mem(&self, segment: Register, n: u8, index: Option<Register>) -> Result<OpKind> {
        let base = self.gpr(self.address_size, n)?.register();
        Ok(OpKind::Memory(MemoryOperand {
            segment,
            base,
            index,
            scale: 1,
            displacement: 0,
            displ_size: 0,
        }))
    }

    fn moffs(&mut self, out: &mut Instruction) -> Result<OpKind> {
        let size = self.address_size / 8;
        let displacement = self.read_displacement(out, size, 1)?;
        Ok(OpKind::Memory(MemoryOperand {
            segment: self.segment.unwrap_or(Register::DS),
            base: None,
            index: None,
            scale: 1,
            displacement,
            displ_size: size,
        }))
    }

    fn decode_operand(
        &mut self,
        out: &mut Instruction,
        entry: &Entry,
        index: usize,
        op: Op,
    ) -> Result<OpKind> {
        use RegClass as C;

        let reg = self.reg();
        let kind = match op {
            Op::Reg(reg) => OpKind::Register(reg),
            Op::Gb => self.gpr(8, reg + self.r)?,
            Op::Gw => self.gpr(16, reg + self.r)?,
            Op::Gd => self.gpr(32, reg + self.r)?,
            Op::Gq => self.gpr(64, reg + self.r)?,
            Op::Eb => self.gpr_or_mem(8)?,
            Op::Ew => self.gpr_or_mem(16)?,
            Op::Ed => self.gpr_or_mem(32)?,
            Op::Eq => self.gpr_or_mem(64)?,
            Op::Rw => self.gpr(16, self.rm() + self.b)?,
            Op::Rd => self.gpr(32, self.rm() + self.b)?,
            Op::Rq => self.gpr(64, self.rm() + self.b)?,
            Op::Zb => self.gpr(8, (self.opcode & 7) + self.b)?,
            Op::Zw => self.gpr(16, (self.opcode & 7) + self.b)?,
            Op::Zd => self.gpr(32, (self.opcode & 7) + self.b)?,
            Op::Zq => self.gpr(64, (self.opcode & 7) + self.b)?,
            Op::Bd => self.gpr(32, self.vvvv)?,
            Op::Bq => self.gpr(64, self.vvvv)?,
            Op::M | Op::VsibX | Op::VsibY | Op::VsibZ => self.memory()?,
            Op::Sw => {
                // CS can not be loaded with MOV
                if index == 0 && reg == 1 {
                    return Err(self.invalid(Invalid::Register));
                }
                self.register(C::Segment, reg)?
            }
            Op::Cd | Op::Cq => {
                let mut n = reg + self.r;
                if self.lock && entry.has(attr::CR_LOCK) {
                    n += 8;
                    self.lock = false;
                }
                self.register(C::Control, n)?
            }
            Op::Dd | Op::Dq => {
                let n = reg + self.r;
                if n > 7 {
                    return Err(self.invalid(Invalid::Register));
                }
                self.register(C::Debug, n)?
            }
            Op::Td => self.register(C::Test, reg)?,
            Op::STi => self.register(C::St, self.rm())?,
            Op::P => self.register(C::Mmx, reg)?,
            Op::N => self.register(C::Mmx, self.rm())?,
            Op::Q if self.is_reg_form() => self.register(C::Mmx, self.rm())?,
            Op::Q => self.memory()?,
            Op::VX => self.register(C::Xmm, reg + self.r + self.r2)?,
            Op::VY => self.register(C::Ymm, reg + self.r + self.r2)?,
            Op::VZ => self.register(C::Zmm, reg + self.r + self.r2)?,
            Op::WX => self.vec_or_mem(C::Xmm)?,
            Op::WY => self.vec_or_mem(C::Ymm)?,
            Op::WZ => self.vec_or_mem(C::Zmm)?,
            Op::UX => self.register(C::Xmm, self.vec_rm())?,
            Op::UY => self.register(C::Ymm, self.vec_rm())?,
            Op::UZ => self.register(C::Zmm, self.vec_rm())?,
            Op::HX => self.register(C::Xmm, self.vvvv + self.v2)?,
            Op::HY => self.register(C::Ymm, self.vvvv + self.v2)?,
            Op::HZ => self.register(C::Zmm, self.vvvv + self.v2)?,
            Op::IsX | Op::IsY => {
                let imm = self.bytes.read_u8()? >> 4;
                let n = if self.is_64() { imm } else { imm & 7 };
                let class = if op == Op::IsX { C::Xmm } else { C::Ymm };
                self.register(class, n)?
            }
            Op::VK => self.mask(reg, self.r | self.r2 != 0)?,
            Op::RK => self.mask(self.rm(), self.b | self.x != 0)?,
            Op::WK if self.is_reg_form() => self.mask(self.rm(), self.b | self.x != 0)?,
            Op::WK => self.memory()?,
            Op::HK => self.mask(self.vvvv, self.vvvv + self.v2 > 7)?,
            Op::BndG => self.register(C::Bound, reg + self.r)?,
            Op::BndE if self.is_reg_form() => self.register(C::Bound, self.rm() + self.b)?,
            Op::BndE => self.memory()?,
            Op::Ib => OpKind::Immediate8(self.read_imm(out, 1)? as u8),
            Op::Iw => OpKind::Immediate16(self.read_imm(out, 2)? as u16),
            Op::Id => OpKind::Immediate32(self.read_imm(out, 4)? as u32),
            Op::Iq => OpKind::Immediate64(self.read_imm(out, 8)?),
            Op::Ib16 => OpKind::Immediate8to16(self.read_imm(out, 1)? as i8 as i16),
            Op::Ib32 => OpKind::Immediate8to32(self.read_imm(out, 1)? as i8 as i32),
            Op::Ib64 => OpKind::Immediate8to64(self.read_imm(out, 1)? as i8 as i64),
            Op::Id64 => OpKind::Immediate32to64(self.read_imm(out, 4)? as i32 as i64),
            Op::Ib2 => OpKind::Immediate8_2nd(self.read_imm(out, 1)? as u8),
            Op::I1 => OpKind::Immediate8(1),
            Op::Jb | Op::Jw | Op::Jd => {
                let disp = match op {
                    Op::Jb => self.read_imm(out, 1)? as i8 as i64,
                    Op::Jw => self.read_imm(out, 2)? as i16 as i64,
                    _ => self.read_imm(out, 4)? as i32 as i64,
                };
                // target is known after the last byte is read
                self.branch = Some((index, disp));
                OpKind::NearBranch64(0)
            }
            Op::Ap => {
                if self.operand_size == 16 {
                    let offset = self.read_imm(out, 2)? as u16;
                    let selector = self.read_imm(out, 2)? as u16;
                    OpKind::FarBranch16 { selector, offset }
                } else {
                    let offset = self.read_imm(out, 4)? as u32;
                    let selector = self.read_imm(out, 2)? as u16;
                    OpKind::FarBranch32 { selector, offset }
                }
            }
            Op::Ob | Op::Ow | Op::Od | Op::Oq => self.moffs(out)?,
            Op::Xb | Op::Xw | Op::Xd | Op::Xq => {
                self.implicit_mem(self.segment.unwrap_or(Register::DS), 6, None)?
            }
            Op::Yb | Op::Yw | Op::Yd | Op::Yq => self.implicit_mem(Register::ES, 7, None)?,
            Op::Xlat => {
                self.implicit_mem(self.segment.unwrap_or(Register::DS), 3, Some(Register::AL))?
            }
        };
        Ok(kind)
    }

    fn decode_operands(&mut self, out: &mut Instruction, entry: &'static Entry) -> Result {
        if self.has_modrm && !entry.has(attr::NO_MOD) {
            if self.is_reg_form() {
                if entry.ops.iter().any(Op::is_memory_only) {
                    return Err(self.invalid(Invalid::MemoryOnly));
                }
            } else if entry.ops.iter().any(Op::is_register_only) {
                return Err(self.invalid(Invalid::RegisterOnly));
            } else if self.mem.is_none() {
                let vsib = entry.ops.iter().find_map(Op::vsib_class);
                let mpx = entry
                    .ops
                    .iter()
                    .any(|op| matches!(op, Op::BndG | Op::BndE));
                let disp8_scale = if self.is_evex() {
                    entry.tuple.disp8_scale(self.w, self.bcst)
                } else {
                    1
                };
                self.mem = Some(self.decode_mem(out, vsib, mpx, disp8_scale)?);
            }
        }

        for (index, op) in entry.ops.iter().enumerate() {
            let kind = self.decode_operand(out, entry, index, *op)?;
            out.push_op(kind);
        }
        Ok(())
    }

    fn decode_evex_decorations(&mut self, out: &mut Instruction, entry: &Entry) -> Result {
        let has_opmask = entry.has(attr::OPMASK | attr::OPMASK_REQ);
        self.check(self.aaa != 0 && !has_opmask, Invalid::Opmask)?;
        self.check(self.aaa == 0 && entry.has(attr::OPMASK_REQ), Invalid::Opmask)?;
        self.check(self.z && !entry.has(attr::ZEROING), Invalid::Zeroing)?;

        let mut broadcast = false;
        if self.bcst {
            if self.is_reg_form() {
                if entry.has(attr::ER) {
                    out.flags_mut()
                        .field_set(FIELD_ROUNDING, self.l as u32 + 1);
                } else if entry.has(attr::SAE) {
                    out.flags_mut().set(SAE);
                } else {
                    self.check(true, Invalid::EmbeddedRounding)?;
                }
            } else if entry.bcst != MemorySize::Unknown {
                broadcast = true;
            } else {
                self.check(true, Invalid::Broadcast)?;
            }
        }

        out.flags_mut()
            .field_set(FIELD_OPMASK, self.aaa as u32)
            .set_if(ZEROING, self.z)
            .set_if(BROADCAST, broadcast);
        Ok(())
    }

    fn decode(&mut self, out: &mut Instruction) -> Result<usize> {
        let opcode = self.decode_prefixes()?;

        self.address_size = match (self.opts.bitness, self.prefix_67) {
            (Bitness::Bits16, false) | (Bitness::Bits32, true) => 16,
            (Bitness::Bits16, true) | (Bitness::Bits32, false) | (Bitness::Bits64, true) => 32,
            (Bitness::Bits64, false) => 64,
        };

        let map = match opcode {
            ESCAPE_VEX2 if self.is_vex_escape() => self.decode_vex2()?,
            ESCAPE_VEX3 if self.is_vex_escape() => self.decode_vex3(EncodingKind::Vex)?,
            ESCAPE_XOP if self.is_xop_escape() => self.decode_vex3(EncodingKind::Xop)?,
            ESCAPE_EVEX if self.is_vex_escape() => self.decode_evex()?,
            ESCAPE_0F => {
                self.set_rex();
                match self.bytes.read_u8()? {
                    ESCAPE_38 => {
                        self.opcode = self.bytes.read_u8()?;
                        Map::L0F38
                    }
                    ESCAPE_3A => {
                        self.opcode = self.bytes.read_u8()?;
                        Map::L0F3A
                    }
                    ESCAPE_3DNOW => self.decode_3dnow(out)?,
                    opcode => {
                        self.opcode = opcode;
                        Map::L0F
                    }
                }
            }
            _ => {
                self.set_rex();
                self.opcode = opcode;
                Map::Legacy
            }
        };

        if map.has_modrm(self.opcode) {
            self.modrm = ModRm(self.bytes.read_u8()?);
            self.has_modrm = true;
        }

        let entry = self.find_entry(map)?;
        self.operand_size = self.operand_size_for(entry);
        if matches!(entry.prefix, PrefixSel::PF3 | PrefixSel::PF2) {
            // consumed as a mandatory prefix
            self.repeat = Repeat::None;
        }
        out.set_code(entry.code);

        self.decode_operands(out, entry)?;

        if self.is_evex() {
            self.decode_evex_decorations(out, entry)?;
        }

        if self.encoding != EncodingKind::Legacy && self.encoding != EncodingKind::D3now {
            // EVEX.V' extends the VSIB index
            let v2 = if entry.ops.iter().any(Op::is_vsib) {
                0
            } else {
                self.v2
            };
            self.check(
                !entry.uses_vvvv() && (self.vvvv_raw | v2) != 0,
                Invalid::UnusedVvvv,
            )?;
        }

        let lockable = entry.has(attr::LOCK) && self.has_modrm && !self.is_reg_form();
        self.check(self.lock && !lockable, Invalid::Lock)?;

        if out.memory().is_some() {
            let size = if out.is_broadcast() { entry.bcst } else { entry.mem };
            out.set_memory_size(size);
        }

        out.flags_mut()
            .set_if(LOCK, self.lock)
            .set_if(REPE, self.repeat == Repeat::RepZ)
            .set_if(REPNE, self.repeat == Repeat::RepNZ)
            .field_set(FIELD_ENCODING, self.encoding.raw());
        out.set_segment_prefix(self.segment);

        let len = self.bytes.offset();
        out.set_len(len);

        if let Some((index, disp)) = self.branch {
            let width = self.operand_size as u32;
            let target = truncate(out.next_ip().wrapping_add(disp as u64), width);
            *out.op_mut(index) = match width {
                16 => OpKind::NearBranch16(target as u16),
                32 => OpKind::NearBranch32(target as u32),
                _ => OpKind::NearBranch64(target),
            };
        }

        Ok(len)
    }
}

impl SelectEntry for Inner<'_> {
    type Error = Error;

    fn select_entry(&mut self, index: usize) {
        self.entry = index;
    }
}

impl TableDecode for Inner<'_> {
    fn fail(&self) -> Self::Error {
        Error::InvalidOpcode
    }
}

/// x86 instruction decoder.
///
/// The decoder holds only its options, so one value can be shared between
/// threads.
#[derive(Copy, Clone, Debug, Default)]
pub struct Decoder {
    opts: Options,
}

impl Decoder {
    pub fn new(opts: Options) -> Self {
        Self { opts }
    }

    pub fn options(&self) -> &Options {
        &self.opts
    }

    /// Decodes one instruction located at `ip`.
    pub fn decode(&self, ip: u64, bytes: &[u8]) -> Result<Instruction> {
        let mut out = Instruction::new(ip);
        Inner {
            opts: &self.opts,
            bytes: Bytes::new(bytes),
            ip,
            state: State::default(),
        }
        .decode(&mut out)?;
        Ok(out)
    }

    /// Returns an iterator that decodes `bytes` linearly.
    ///
    /// After an error the iterator advances by one byte.
    pub fn iter<'a>(&'a self, ip: u64, bytes: &'a [u8]) -> Iter<'a> {
        Iter {
            decoder: self,
            ip,
            bytes,
        }
    }
}

/// Linear sweep over a byte slice, see [`Decoder::iter`].
pub struct Iter<'a> {
    decoder: &'a Decoder,
    ip: u64,
    bytes: &'a [u8],
}

impl<'a> Iterator for Iter<'a> {
    type Item = (u64, Result<Instruction>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.bytes.is_empty() {
            return None;
        }
        let ip = self.ip;
        let result = self.decoder.decode(ip, self.bytes);
        let len = match &result {
            Ok(insn) => insn.len(),
            Err(Error::More(need)) => {
                debug!("{ip:#x}: need {need} bytes, {} left", self.bytes.len());
                1
            }
            Err(_) => 1,
        };
        self.bytes = &self.bytes[len..];
        self.ip = self.ip.wrapping_add(len as u64);
        Some((ip, result))
    }
}

/// Decodes one instruction with default options for `bitness`.
///
/// Returns the instruction and the number of bytes consumed.
pub fn decode(bytes: &[u8], ip: u64, bitness: Bitness) -> Result<(Instruction, usize)> {
    let insn = Decoder::new(Options::new(bitness)).decode(ip, bytes)?;
    Ok((insn, insn.len()))
}

/// Returns the location of the displacement and the immediates of a decoded
/// instruction.
pub fn get_constant_offsets(insn: &Instruction) -> ConstantOffsets {
    insn.constant_offsets()
}
