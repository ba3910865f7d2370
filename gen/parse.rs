//! Opcode table parser.
//!
//! Each non-empty line describes one table entry:
//!
//! ```text
//! <key> [selectors...] : <Code> [operands...] [attributes...]
//! ```
//!
//! The key is an opcode path (`80`, `0F AF`, `0F 38 00`, `0F 0F 9E`,
//! `VEX.0F38 F2`, `EVEX.0F 58`, `XOP.9 01`), the last byte may carry a `+r`
//! suffix to cover eight consecutive opcodes. Text after `#` is a comment.

use std::fmt;

/// Opcode maps in dispatch order.
pub const MAPS: &[&str] = &[
    "Legacy", "L0F", "L0F38", "L0F3A", "D3Now", "Vex0F", "Vex0F38", "Vex0F3A", "Evex0F",
    "Evex0F38", "Evex0F3A", "Xop8", "Xop9", "XopA",
];

pub const MAP_D3NOW: usize = 4;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ModSel {
    Mem,
    Reg,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PrefixSel {
    None,
    P66,
    PF3,
    PF2,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ModeSel {
    Not64,
    Only64,
}

/// Conditions an entry puts on the decode state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selector {
    pub reg: Option<u8>,
    pub rm: Option<u8>,
    pub mode: Option<ModSel>,
    pub prefix: Option<PrefixSel>,
    pub osize: Option<u8>,
    pub asize: Option<u8>,
    pub bitness: Option<ModeSel>,
    pub w: Option<bool>,
    pub l: Option<u8>,
    pub rexb0: bool,
}

impl Selector {
    pub fn specificity(&self) -> usize {
        self.reg.is_some() as usize
            + self.rm.is_some() as usize
            + self.mode.is_some() as usize
            + self.prefix.is_some() as usize
            + self.osize.is_some() as usize
            + self.asize.is_some() as usize
            + self.bitness.is_some() as usize
            + self.w.is_some() as usize
            + self.l.is_some() as usize
            + self.rexb0 as usize
    }

    fn uses_modrm(&self) -> bool {
        self.reg.is_some() || self.rm.is_some() || self.mode.is_some()
    }
}

struct OpInfo {
    name: &'static str,
    modrm: bool,
    memory: bool,
    mem: Option<&'static str>,
}

const fn op(name: &'static str, modrm: bool, memory: bool, mem: Option<&'static str>) -> OpInfo {
    OpInfo {
        name,
        modrm,
        memory,
        mem,
    }
}

#[rustfmt::skip]
const OPS: &[OpInfo] = &[
    op("Gb", true, false, None),
    op("Gw", true, false, None),
    op("Gd", true, false, None),
    op("Gq", true, false, None),
    op("Eb", true, true, Some("UInt8")),
    op("Ew", true, true, Some("UInt16")),
    op("Ed", true, true, Some("UInt32")),
    op("Eq", true, true, Some("UInt64")),
    op("Rw", true, false, None),
    op("Rd", true, false, None),
    op("Rq", true, false, None),
    op("M", true, true, None),
    op("Sw", true, false, None),
    op("Cd", true, false, None),
    op("Cq", true, false, None),
    op("Dd", true, false, None),
    op("Dq", true, false, None),
    op("Td", true, false, None),
    op("P", true, false, None),
    op("Q", true, true, Some("UInt64")),
    op("N", true, false, None),
    op("VX", true, false, None),
    op("VY", true, false, None),
    op("VZ", true, false, None),
    op("WX", true, true, None),
    op("WY", true, true, None),
    op("WZ", true, true, None),
    op("UX", true, false, None),
    op("UY", true, false, None),
    op("UZ", true, false, None),
    op("HX", false, false, None),
    op("HY", false, false, None),
    op("HZ", false, false, None),
    op("IsX", false, false, None),
    op("IsY", false, false, None),
    op("Bd", false, false, None),
    op("Bq", false, false, None),
    op("VK", true, false, None),
    op("WK", true, true, None),
    op("RK", true, false, None),
    op("HK", false, false, None),
    op("BndG", true, false, None),
    op("BndE", true, true, None),
    op("Ib", false, false, None),
    op("Iw", false, false, None),
    op("Id", false, false, None),
    op("Iq", false, false, None),
    op("Ib16", false, false, None),
    op("Ib32", false, false, None),
    op("Ib64", false, false, None),
    op("Id64", false, false, None),
    op("Ib2", false, false, None),
    op("I1", false, false, None),
    op("Jb", false, false, None),
    op("Jw", false, false, None),
    op("Jd", false, false, None),
    op("Ap", false, false, None),
    op("Ob", false, true, Some("UInt8")),
    op("Ow", false, true, Some("UInt16")),
    op("Od", false, true, Some("UInt32")),
    op("Oq", false, true, Some("UInt64")),
    op("Xb", false, true, Some("UInt8")),
    op("Xw", false, true, Some("UInt16")),
    op("Xd", false, true, Some("UInt32")),
    op("Xq", false, true, Some("UInt64")),
    op("Yb", false, true, Some("UInt8")),
    op("Yw", false, true, Some("UInt16")),
    op("Yd", false, true, Some("UInt32")),
    op("Yq", false, true, Some("UInt64")),
    op("Xlat", false, true, Some("UInt8")),
    op("Zb", false, false, None),
    op("Zw", false, false, None),
    op("Zd", false, false, None),
    op("Zq", false, false, None),
    op("STi", true, false, None),
    op("VsibX", true, true, None),
    op("VsibY", true, true, None),
    op("VsibZ", true, true, None),
];

const ATTRS: &[(&str, &str)] = &[
    ("lock", "LOCK"),
    ("d64", "D64"),
    ("f64", "F64"),
    ("k", "OPMASK"),
    ("kreq", "OPMASK_REQ"),
    ("z", "ZEROING"),
    ("er", "ER"),
    ("sae", "SAE"),
    ("nomod", "NO_MOD"),
    ("crlock", "CR_LOCK"),
    ("br", "BRANCH"),
];

const TUPLES: &[&str] = &[
    "Full_128",
    "Full_256",
    "Full_512",
    "Half_128",
    "Half_256",
    "Half_512",
    "Full_Mem_128",
    "Full_Mem_256",
    "Full_Mem_512",
    "Tuple1_Scalar",
    "Tuple1_Scalar_1",
    "Tuple1_Scalar_2",
    "Tuple1_Fixed",
    "Tuple2",
    "Tuple4",
    "Tuple8",
    "Half_Mem_128",
    "Half_Mem_256",
    "Half_Mem_512",
    "Quarter_Mem_128",
    "Quarter_Mem_256",
    "Quarter_Mem_512",
    "Eighth_Mem_128",
    "Eighth_Mem_256",
    "Eighth_Mem_512",
    "Mem128",
    "MOVDDUP_128",
    "MOVDDUP_256",
    "MOVDDUP_512",
];

/// A parsed table line.
#[derive(Clone, Debug)]
pub struct Entry {
    pub line: usize,
    pub map: usize,
    pub opcodes: Vec<u8>,
    pub sel: Selector,
    pub code: String,
    pub ops: Vec<String>,
    pub attrs: Vec<&'static str>,
    pub mem: String,
    pub bcst: Option<String>,
    pub tuple: Option<String>,
    pub modrm: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseError {
    pub line: usize,
    pub msg: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "line {}: {}", self.line, self.msg)
    }
}

fn parse_hex(s: &str) -> Option<u8> {
    if s.len() != 2 {
        return None;
    }
    u8::from_str_radix(s, 16).ok()
}

fn is_ident(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

struct LineParser {
    line: usize,
}

impl LineParser {
    fn error<T>(&self, msg: impl Into<String>) -> Result<T, ParseError> {
        Err(ParseError {
            line: self.line,
            msg: msg.into(),
        })
    }

    /// Parses the key and returns (map, opcodes, remaining tokens).
    fn key<'a>(&self, tokens: &'a [&'a str]) -> Result<(usize, Vec<u8>, &'a [&'a str]), ParseError> {
        let (map, rest) = match tokens.first() {
            Some(family) if family.contains('.') => {
                let map = match *family {
                    "VEX.0F" => 5,
                    "VEX.0F38" => 6,
                    "VEX.0F3A" => 7,
                    "EVEX.0F" => 8,
                    "EVEX.0F38" => 9,
                    "EVEX.0F3A" => 10,
                    "XOP.8" => 11,
                    "XOP.9" => 12,
                    "XOP.A" => 13,
                    _ => return self.error(format!("unknown opcode map \"{family}\"")),
                };
                (map, &tokens[1..])
            }
            _ => match tokens {
                ["0F", "38", rest @ ..] => (2, rest),
                ["0F", "3A", rest @ ..] => (3, rest),
                ["0F", "0F", rest @ ..] => (MAP_D3NOW, rest),
                ["0F", rest @ ..] => (1, rest),
                _ => (0, tokens),
            },
        };

        let opcode = match rest.first() {
            Some(opcode) => opcode,
            None => return self.error("missing opcode byte"),
        };
        let (opcode, plus_r) = match opcode.strip_suffix("+r") {
            Some(opcode) => (opcode, true),
            None => (*opcode, false),
        };
        let opcode = match parse_hex(opcode) {
            Some(value) => value,
            None => return self.error(format!("invalid opcode byte \"{opcode}\"")),
        };
        let opcodes = if plus_r {
            if opcode & 7 != 0 {
                return self.error("+r opcode must have low three bits cleared");
            }
            (opcode..opcode + 8).collect()
        } else {
            vec![opcode]
        };
        Ok((map, opcodes, &rest[1..]))
    }

    fn selectors(&self, tokens: &[&str]) -> Result<Selector, ParseError> {
        let mut sel = Selector::default();
        for token in tokens {
            match *token {
                "mem" => sel.mode = Some(ModSel::Mem),
                "reg" => sel.mode = Some(ModSel::Reg),
                "NP" => sel.prefix = Some(PrefixSel::None),
                "p66" => sel.prefix = Some(PrefixSel::P66),
                "pF3" => sel.prefix = Some(PrefixSel::PF3),
                "pF2" => sel.prefix = Some(PrefixSel::PF2),
                "o16" => sel.osize = Some(16),
                "o32" => sel.osize = Some(32),
                "o64" => sel.osize = Some(64),
                "a16" => sel.asize = Some(16),
                "a32" => sel.asize = Some(32),
                "a64" => sel.asize = Some(64),
                "no64" => sel.bitness = Some(ModeSel::Not64),
                "only64" => sel.bitness = Some(ModeSel::Only64),
                "W0" => sel.w = Some(false),
                "W1" => sel.w = Some(true),
                "L0" => sel.l = Some(0),
                "L1" => sel.l = Some(1),
                "L2" => sel.l = Some(2),
                "rexb0" => sel.rexb0 = true,
                _ => {
                    if let Some(reg) = token.strip_prefix('/') {
                        match reg.parse::<u8>() {
                            Ok(reg) if reg < 8 => sel.reg = Some(reg),
                            _ => return self.error(format!("invalid ModRM.reg \"{token}\"")),
                        }
                    } else if let Some(modrm) = token.strip_prefix('=') {
                        match parse_hex(modrm) {
                            Some(modrm) if modrm >= 0xc0 => {
                                sel.mode = Some(ModSel::Reg);
                                sel.reg = Some((modrm >> 3) & 7);
                                sel.rm = Some(modrm & 7);
                            }
                            _ => return self.error(format!("invalid exact ModRM \"{token}\"")),
                        }
                    } else {
                        return self.error(format!("unknown selector \"{token}\""));
                    }
                }
            }
        }
        Ok(sel)
    }

    fn parse(&self, text: &str) -> Result<Option<Entry>, ParseError> {
        let text = text.split_once('#').map_or(text, |(head, _)| head).trim();
        if text.is_empty() {
            return Ok(None);
        }

        let (lhs, rhs) = match text.split_once(':') {
            Some(split) => split,
            None => return self.error("missing ':' separator"),
        };

        let lhs: Vec<&str> = lhs.split_whitespace().collect();
        let (map, opcodes, selectors) = self.key(&lhs)?;
        let sel = self.selectors(selectors)?;

        let mut rhs = rhs.split_whitespace();
        let code = match rhs.next() {
            Some(code) if is_ident(code) => code.to_owned(),
            Some(code) => return self.error(format!("invalid code name \"{code}\"")),
            None => return self.error("missing code name"),
        };

        let mut ops = Vec::new();
        let mut attrs = Vec::new();
        let mut mem = None;
        let mut bcst = None;
        let mut tuple = None;
        let mut modrm = sel.uses_modrm();
        let mut memory = false;
        let mut default_mem = None;

        for token in rhs {
            if let Some(reg) = token.strip_prefix('%') {
                if !is_ident(reg) {
                    return self.error(format!("invalid register \"{token}\""));
                }
                ops.push(token.to_owned());
            } else if let Some(info) = OPS.iter().find(|i| i.name == token) {
                modrm |= info.modrm;
                memory |= info.memory;
                if default_mem.is_none() {
                    default_mem = info.mem;
                }
                ops.push(token.to_owned());
            } else if let Some((_, name)) = ATTRS.iter().find(|(i, _)| *i == token) {
                attrs.push(*name);
            } else if let Some(size) = token.strip_prefix("mem=") {
                mem = Some(size.to_owned());
            } else if let Some(size) = token.strip_prefix("bcst=") {
                bcst = Some(size.to_owned());
            } else if let Some(name) = token.strip_prefix("tuple=") {
                if !TUPLES.contains(&name) {
                    return self.error(format!("unknown tuple type \"{name}\""));
                }
                tuple = Some(name.to_owned());
            } else {
                return self.error(format!("unknown operand or attribute \"{token}\""));
            }
        }

        if ops.len() > 5 {
            return self.error("too many operands");
        }

        let mem = match mem.or_else(|| default_mem.map(String::from)) {
            Some(mem) => mem,
            None if memory && sel.mode != Some(ModSel::Reg) => {
                return self.error(format!("{code}: memory operand without mem="));
            }
            None => String::from("Unknown"),
        };

        if map == MAP_D3NOW {
            // ModRM is consumed before the suffix byte is known
            modrm = false;
        }

        Ok(Some(Entry {
            line: self.line,
            map,
            opcodes,
            sel,
            code,
            ops,
            attrs,
            mem,
            bcst,
            tuple,
            modrm,
        }))
    }
}

/// Parses a whole table file.
pub fn parse(src: &str) -> Result<Vec<Entry>, Vec<ParseError>> {
    let mut entries = Vec::new();
    let mut errors = Vec::new();
    for (i, line) in src.lines().enumerate() {
        match (LineParser { line: i + 1 }).parse(line) {
            Ok(Some(entry)) => entries.push(entry),
            Ok(None) => {}
            Err(err) => errors.push(err),
        }
    }
    if errors.is_empty() {
        Ok(entries)
    } else {
        Err(errors)
    }
}
