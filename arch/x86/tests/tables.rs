//! Decodes an encoding built for every opcode table entry.
//!
//! The generator's key lowering tells which entry a key selects, the test
//! fills the fields an entry leaves open, emits the bytes for that key and
//! checks the decoded code, operands and EVEX decorations.

use std::collections::BTreeSet;

use x86_decode::{Bitness, Decoder, Instruction, OpKind, Options, Register, RoundingControl};
use x86_decode_gen::{
    parse::{self, Entry, ModSel, MAP_D3NOW},
    pattern::{
        entry_patterns, KeyField, KeyIndex, Pattern, AMD, ASIZE, BITNESS, L, MAP, OPCODE, P66,
        PREFIX, REG, REG_FORM, REX_B, RM, W,
    },
};

const SOURCES: &[(&str, &str)] = &[
    ("legacy.tbl", include_str!("../tables/legacy.tbl")),
    ("fpu.tbl", include_str!("../tables/fpu.tbl")),
    ("sse.tbl", include_str!("../tables/sse.tbl")),
    ("vex.tbl", include_str!("../tables/vex.tbl")),
    ("evex.tbl", include_str!("../tables/evex.tbl")),
    ("xop.tbl", include_str!("../tables/xop.tbl")),
    ("3dnow.tbl", include_str!("../tables/3dnow.tbl")),
];

/// Key fields the test picks values for.
const OPEN: [KeyField; 7] = [BITNESS, P66, W, PREFIX, L, REX_B, AMD];

const REGISTER_ONLY: &[&str] = &["Rw", "Rd", "Rq", "N", "UX", "UY", "UZ", "RK", "STi"];
const MEMORY_ONLY: &[&str] = &["M", "VsibX", "VsibY", "VsibZ"];
const VVVV: &[&str] = &["HX", "HY", "HZ", "Bd", "Bq", "HK"];

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Family {
    Legacy,
    Vex,
    Evex,
    Xop,
}

fn family(map: usize) -> Family {
    match map {
        0..=4 => Family::Legacy,
        5..=7 => Family::Vex,
        8..=10 => Family::Evex,
        _ => Family::Xop,
    }
}

fn has(entry: &Entry, attr: &str) -> bool {
    entry.attrs.contains(&attr)
}

fn has_op(entry: &Entry, ops: &[&str]) -> bool {
    entry.ops.iter().any(|op| ops.contains(&op.as_str()))
}

fn entries() -> Vec<(&'static str, Entry)> {
    let mut out = Vec::new();
    for (file, src) in SOURCES {
        let entries = parse::parse(src).unwrap_or_else(|errors| panic!("{file}:{}", errors[0]));
        out.extend(entries.into_iter().map(|entry| (*file, entry)));
    }
    out
}

#[derive(Copy, Clone, Debug, Default)]
struct Encoding {
    map: usize,
    opcode: u8,
    modrm: bool,
    reg_form: bool,
    reg: u8,
    rm: u8,
    prefix: u8,
    p66: bool,
    w: bool,
    bitness: u8,
    addr67: bool,
    l: u8,
    rexb: bool,
    amd: bool,
    vvvv: u8,
    aaa: u8,
    z: bool,
    bcst: bool,
    disp8: bool,
}

impl Encoding {
    fn new(entry: &Entry, key: u32, opcode: u8, reg_form: bool, addr67: bool) -> Self {
        let modrm = entry.modrm || entry.map == MAP_D3NOW;
        let reg_form = modrm && reg_form;
        let rm = match (modrm, reg_form) {
            (false, _) => 0,
            (true, true) => entry.sel.rm.unwrap_or(1),
            (true, false) if has_op(entry, &MEMORY_ONLY[1..]) => 4,
            (true, false) => 0,
        };
        let opmask = has(entry, "OPMASK") || has(entry, "OPMASK_REQ");
        Self {
            map: entry.map,
            opcode,
            modrm,
            reg_form,
            reg: if modrm { entry.sel.reg.unwrap_or(3) } else { 0 },
            rm,
            prefix: PREFIX.extract(key) as u8,
            p66: P66.extract(key) != 0,
            w: W.extract(key) != 0,
            bitness: BITNESS.extract(key) as u8,
            addr67,
            l: L.extract(key) as u8,
            rexb: REX_B.extract(key) != 0,
            amd: AMD.extract(key) != 0,
            vvvv: if has_op(entry, VVVV) { 2 } else { 0 },
            aaa: (family(entry.map) == Family::Evex && opmask) as u8,
            ..Self::default()
        }
    }

    fn address_size(&self) -> u32 {
        match (self.bitness, self.addr67) {
            (0, false) | (1, true) => 0,
            (2, false) => 2,
            _ => 1,
        }
    }

    fn vector_length(&self) -> u8 {
        if self.bcst && self.reg_form {
            2
        } else {
            self.l
        }
    }

    /// Key the decoder builds for these bytes.
    fn key(&self) -> u32 {
        MAP.encode(self.map as u32)
            | OPCODE.encode(self.opcode as u32)
            | REG.encode(self.reg as u32)
            | RM.encode(self.rm as u32)
            | REG_FORM.encode(self.reg_form as u32)
            | PREFIX.encode(self.prefix as u32)
            | P66.encode(self.p66 as u32)
            | W.encode(self.w as u32)
            | BITNESS.encode(self.bitness as u32)
            | ASIZE.encode(self.address_size())
            | L.encode(self.vector_length() as u32)
            | REX_B.encode(self.rexb as u32)
            | AMD.encode(self.amd as u32)
    }

    fn is_encodable(&self) -> bool {
        let family = family(self.map);
        let max_l = match family {
            Family::Legacy => 0,
            Family::Evex => 2,
            _ => 1,
        };
        if self.bitness > 2 || self.l > max_l {
            return false;
        }
        if self.bitness != 2 && (self.rexb || (family == Family::Legacy && self.w)) {
            return false;
        }
        match family {
            Family::Legacy => self.prefix >= 2 || (self.prefix == 1) == self.p66,
            _ => !self.p66,
        }
    }

    fn bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32);
        if self.addr67 {
            out.push(0x67);
        }
        let vvvv = (!self.vvvv & 15) << 3;
        match family(self.map) {
            Family::Legacy => {
                if self.p66 {
                    out.push(0x66);
                }
                match self.prefix {
                    2 => out.push(0xf3),
                    3 => out.push(0xf2),
                    _ => {}
                }
                if self.w || self.rexb {
                    out.push(0x40 | (self.w as u8) << 3 | self.rexb as u8);
                }
                let escape: &[u8] = match self.map {
                    1 => &[0x0f],
                    2 => &[0x0f, 0x38],
                    3 => &[0x0f, 0x3a],
                    MAP_D3NOW => &[0x0f, 0x0f],
                    _ => &[],
                };
                out.extend_from_slice(escape);
                if self.map != MAP_D3NOW {
                    out.push(self.opcode);
                }
            }
            family @ (Family::Vex | Family::Xop) => {
                let (escape, map) = if family == Family::Vex {
                    (0xc4, self.map - 4)
                } else {
                    (0x8f, self.map - 3)
                };
                out.push(escape);
                out.push(0xc0 | (!self.rexb as u8) << 5 | map as u8);
                out.push((self.w as u8) << 7 | vvvv | self.l << 2 | self.prefix);
                out.push(self.opcode);
            }
            Family::Evex => {
                out.push(0x62);
                out.push(0xd0 | (!self.rexb as u8) << 5 | (self.map - 7) as u8);
                out.push((self.w as u8) << 7 | vvvv | 4 | self.prefix);
                out.push((self.z as u8) << 7 | self.l << 5 | (self.bcst as u8) << 4 | 8 | self.aaa);
                out.push(self.opcode);
            }
        }
        if self.modrm {
            let mode = match (self.reg_form, self.disp8) {
                (true, _) => 3,
                (false, true) => 1,
                (false, false) => 0,
            };
            out.push(mode << 6 | self.reg << 3 | self.rm);
            if !self.reg_form && self.rm == 4 {
                // index 1, base 0
                out.push(0x08);
            }
            if !self.reg_form && self.disp8 {
                out.push(1);
            }
        }
        if self.map == MAP_D3NOW {
            out.push(self.opcode);
        }
        // immediates
        out.extend_from_slice(&[0; 16]);
        out
    }

    fn decode(&self) -> Result<Instruction, String> {
        let bitness = match self.bitness {
            0 => Bitness::Bits16,
            1 => Bitness::Bits32,
            _ => Bitness::Bits64,
        };
        let opts = Options {
            bitness,
            invalid_check: true,
            amd_branches: self.amd,
        };
        let bytes = self.bytes();
        Decoder::new(opts)
            .decode(0x1000, &bytes)
            .map_err(|err| format!("{bitness:?} {:02x?}: {err}", &bytes[..bytes.len() - 16]))
    }
}

/// Keys matching `pattern` with every choice of the open fields, 64-bit
/// mode first.
fn open_keys(pattern: &Pattern) -> Vec<u32> {
    let open = OPEN
        .iter()
        .fold(0, |acc, field| acc | field.encode(u32::MAX))
        & !pattern.mask;
    let flip = BITNESS.encode(2) & open;
    let mut out = Vec::new();
    let mut sub = 0u32;
    loop {
        out.push(pattern.bits | (sub ^ flip));
        if sub == open {
            break;
        }
        sub = sub.wrapping_sub(open) & open;
    }
    out
}

fn operand_matches(op: &str, kind: &OpKind) -> bool {
    let reg = kind.register();
    let is = |f: fn(&Register) -> bool| reg.map_or(false, |r| f(&r));
    let class = |prefix: &str| reg.map_or(false, |r| r.name().starts_with(prefix));
    let vector = |size: usize| reg.map_or(false, |r| r.is_vector() && r.size() == size);
    let mem = kind.memory().is_some();
    if let Some(name) = op.strip_prefix('%') {
        return reg.map_or(false, |r| r.name() == name);
    }
    match op {
        "Gb" | "Zb" => is(Register::is_gpr8),
        "Gw" | "Rw" | "Zw" => is(Register::is_gpr16),
        "Gd" | "Rd" | "Zd" | "Bd" => is(Register::is_gpr32),
        "Gq" | "Rq" | "Zq" | "Bq" => is(Register::is_gpr64),
        "Eb" => mem || is(Register::is_gpr8),
        "Ew" => mem || is(Register::is_gpr16),
        "Ed" => mem || is(Register::is_gpr32),
        "Eq" => mem || is(Register::is_gpr64),
        "M" | "VsibX" | "VsibY" | "VsibZ" | "Ob" | "Ow" | "Od" | "Oq" | "Xb" | "Xw" | "Xd"
        | "Xq" | "Yb" | "Yw" | "Yd" | "Yq" | "Xlat" => mem,
        "Sw" => is(Register::is_segment),
        "Cd" | "Cq" => class("CR"),
        "Dd" | "Dq" => class("DR"),
        "Td" => class("TR"),
        "STi" => class("ST"),
        "P" | "N" => class("MM"),
        "Q" => mem || class("MM"),
        "VX" | "UX" | "HX" | "IsX" => vector(16),
        "VY" | "UY" | "HY" | "IsY" => vector(32),
        "VZ" | "UZ" | "HZ" => vector(64),
        "WX" => mem || vector(16),
        "WY" => mem || vector(32),
        "WZ" => mem || vector(64),
        "VK" | "RK" | "HK" => is(Register::is_mask),
        "WK" => mem || is(Register::is_mask),
        "BndG" => class("BND"),
        "BndE" => mem || class("BND"),
        "Jb" | "Jw" | "Jd" => kind.near_branch_target().is_some(),
        "Ap" => matches!(kind, OpKind::FarBranch16 { .. } | OpKind::FarBranch32 { .. }),
        _ => kind.is_immediate(),
    }
}

fn disp8_scale(tuple: &str, w: bool, bcst: bool) -> i64 {
    let w = |yes, no| if w { yes } else { no };
    match tuple {
        "Full_128" | "Full_256" | "Full_512" if bcst => w(8, 4),
        "Half_128" | "Half_256" | "Half_512" if bcst => 4,
        "Full_128" | "Full_Mem_128" | "Mem128" => 16,
        "Full_256" | "Full_Mem_256" => 32,
        "Full_512" | "Full_Mem_512" => 64,
        "Half_128" | "Half_Mem_128" => 8,
        "Half_256" | "Half_Mem_256" => 16,
        "Half_512" | "Half_Mem_512" => 32,
        "Quarter_Mem_128" => 4,
        "Quarter_Mem_256" => 8,
        "Quarter_Mem_512" => 16,
        "Eighth_Mem_128" => 2,
        "Eighth_Mem_256" => 4,
        "Eighth_Mem_512" => 8,
        "Tuple1_Scalar" | "Tuple1_Fixed" => w(8, 4),
        "Tuple1_Scalar_1" => 1,
        "Tuple1_Scalar_2" => 2,
        "Tuple2" => w(16, 8),
        "Tuple4" => w(32, 16),
        "Tuple8" => 32,
        "MOVDDUP_128" => 8,
        "MOVDDUP_256" => 32,
        "MOVDDUP_512" => 64,
        _ => panic!("unexpected tuple type {tuple}"),
    }
}

struct Checker {
    entries: Vec<(&'static str, Entry)>,
    index: KeyIndex,
}

impl Checker {
    fn new() -> Self {
        let entries = entries();
        let list: Vec<Entry> = entries.iter().map(|(_, entry)| entry.clone()).collect();
        let index = KeyIndex::new(&list);
        Self { entries, index }
    }

    fn forms(entry: &Entry) -> Vec<bool> {
        if !(entry.modrm || entry.map == MAP_D3NOW) {
            return vec![false];
        }
        [true, false]
            .into_iter()
            .filter(|&reg_form| match entry.sel.mode {
                Some(ModSel::Reg) => reg_form,
                Some(ModSel::Mem) => !reg_form,
                None if reg_form => !has_op(entry, MEMORY_ONLY),
                None => !has(entry, "NO_MOD") && !has_op(entry, REGISTER_ONLY),
            })
            .collect()
    }

    fn verify(&self, i: usize, enc: &Encoding) -> Result<(), String> {
        let entry = &self.entries[i].1;
        let insn = enc.decode()?;
        if insn.code().name() != entry.code {
            return Err(format!("decoded as {}", insn.code().name()));
        }
        if insn.op_count() != entry.ops.len() {
            return Err(format!("decoded {} operands", insn.op_count()));
        }
        for (op, kind) in entry.ops.iter().zip(insn.ops()) {
            if !operand_matches(op, kind) {
                return Err(format!("{op} decoded as {kind:?}"));
            }
        }
        if insn.memory().is_some() && insn.memory_size().name() != entry.mem {
            return Err(format!("memory size {}", insn.memory_size().name()));
        }
        if family(entry.map) == Family::Evex {
            self.verify_evex(i, enc, &insn)?;
        }
        Ok(())
    }

    fn verify_evex(&self, i: usize, enc: &Encoding, insn: &Instruction) -> Result<(), String> {
        let entry = &self.entries[i].1;
        if enc.aaa != 0 && insn.opmask() != Some(Register::K1) {
            return Err(format!("opmask {:?}", insn.opmask()));
        }

        if enc.reg_form {
            if has(entry, "ZEROING") {
                let insn = Encoding { z: true, ..*enc }.decode()?;
                if !insn.zeroing() {
                    return Err("zeroing dropped".into());
                }
            }
            for (attr, l) in [("ER", 1), ("SAE", 0)] {
                let variant = Encoding {
                    bcst: true,
                    l,
                    ..*enc
                };
                // EVEX.b in the register form selects the 512-bit entry
                if !has(entry, attr) || self.index.select(variant.key()) != Some(i) {
                    continue;
                }
                let insn = variant.decode()?;
                let decorated = match attr {
                    "ER" => insn.rounding() == RoundingControl::RoundDown,
                    _ => insn.suppress_all_exceptions(),
                };
                if insn.code().name() != entry.code || !decorated {
                    return Err(format!("{attr} decoded as {}", insn.code().name()));
                }
            }
            return Ok(());
        }

        let tuple = match &entry.tuple {
            Some(tuple) => tuple,
            None => return Ok(()),
        };
        let mut variants = vec![(false, entry.mem.as_str())];
        if let Some(bcst) = &entry.bcst {
            variants.push((true, bcst.as_str()));
        }
        for (bcst, size) in variants {
            let insn = Encoding {
                disp8: true,
                bcst,
                ..*enc
            }
            .decode()?;
            let expected = disp8_scale(tuple, enc.w, bcst);
            let disp = insn.memory().map(|mem| mem.displacement);
            if disp != Some(expected) {
                return Err(format!("{tuple} disp8 scaled to {disp:?}, expected {expected}"));
            }
            if insn.is_broadcast() != bcst || insn.memory_size().name() != size {
                return Err(format!("{tuple} memory size {}", insn.memory_size().name()));
            }
        }
        Ok(())
    }

    /// Searches for an encoding which selects entry `i` and decodes as it.
    fn cover(&self, i: usize, reg_form: bool) -> Result<Encoding, String> {
        let entry = &self.entries[i].1;
        let mut error = None;
        for pattern in entry_patterns(entry) {
            for &opcode in entry.opcodes.iter().rev() {
                for key in open_keys(&pattern) {
                    for addr67 in [false, true] {
                        let enc = Encoding::new(entry, key, opcode, reg_form, addr67);
                        if !enc.is_encodable()
                            || !pattern.matches(enc.key())
                            || self.index.select(enc.key()) != Some(i)
                        {
                            continue;
                        }
                        match self.verify(i, &enc) {
                            Ok(()) => return Ok(enc),
                            Err(err) => {
                                error.get_or_insert(err);
                            }
                        }
                    }
                }
            }
        }
        Err(error.unwrap_or_else(|| String::from("no encoding selects it")))
    }
}

#[test]
fn every_entry_decodes() {
    let checker = Checker::new();
    let mut total = 0;
    let mut failed = Vec::new();
    let mut tuples = BTreeSet::new();
    for (i, (file, entry)) in checker.entries.iter().enumerate() {
        for reg_form in Checker::forms(entry) {
            total += 1;
            match checker.cover(i, reg_form) {
                Ok(enc) => {
                    if family(entry.map) == Family::Evex && !enc.reg_form {
                        tuples.extend(entry.tuple.clone());
                    }
                }
                Err(err) => {
                    let form = if reg_form { "reg" } else { "mem" };
                    failed.push(format!("{file}:{} {} ({form}): {err}", entry.line, entry.code));
                }
            }
        }
    }

    assert!(total > 3000, "{total} entry forms");
    assert!(
        failed.len() * 50 <= total,
        "{} of {total} entry forms do not decode:\n{}",
        failed.len(),
        failed.join("\n")
    );

    // every tuple type had its compressed displacement checked
    let used: BTreeSet<String> = checker
        .entries
        .iter()
        .filter_map(|(_, entry)| entry.tuple.clone())
        .collect();
    let missing: Vec<_> = used.difference(&tuples).collect();
    assert!(missing.is_empty(), "disp8*N not checked for {missing:?}");
}

#[test]
fn vector_lengths() {
    let checker = Checker::new();
    let lengths: BTreeSet<u8> = checker
        .entries
        .iter()
        .enumerate()
        .filter(|(_, (_, entry))| family(entry.map) == Family::Evex)
        .filter_map(|(i, (_, entry))| {
            let reg_form = *Checker::forms(entry).first()?;
            checker.cover(i, reg_form).ok().map(|enc| enc.vector_length())
        })
        .collect();
    assert_eq!(lengths, BTreeSet::from([0, 1, 2]));
}

#[test]
fn open_key_order() {
    let entries = parse::parse("00 : Add_Eb_Gb Eb Gb").unwrap();
    let patterns = entry_patterns(&entries[0]);
    let keys = open_keys(&patterns[0]);
    assert_eq!(BITNESS.extract(keys[0]), 2);
    assert_eq!(keys.len(), 1 << 10);
    assert!(keys.iter().all(|&key| patterns[0].matches(key)));

    let enc = Encoding::new(&entries[0], keys[0], 0x00, true, false);
    assert_eq!(&enc.bytes()[..2], [0x00, 0xd9]);
}
