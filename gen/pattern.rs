//! Lowering of table entries to decodetree patterns.
//!
//! The decoder packs its state into a 32-bit key and the generated matcher
//! selects an entry by that key. Selectors which depend on the effective
//! operand size are expanded here, decodetree only sees fixed bits.

use std::{cmp::Reverse, collections::BTreeMap, fmt::Write as _};

use crate::parse::{Entry, ModSel, ModeSel, PrefixSel, MAPS};

/// Bit field of the lookup key.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct KeyField {
    pub name: &'static str,
    pub start: u32,
    pub size: u32,
}

const fn field(name: &'static str, start: u32, size: u32) -> KeyField {
    KeyField { name, start, size }
}

impl KeyField {
    fn mask(&self) -> u32 {
        ((1 << self.size) - 1) << self.start
    }

    /// Places `value` into the field.
    pub fn encode(&self, value: u32) -> u32 {
        (value << self.start) & self.mask()
    }

    pub fn extract(&self, key: u32) -> u32 {
        (key & self.mask()) >> self.start
    }
}

pub const RM: KeyField = field("RM", 0, 3);
pub const REG: KeyField = field("REG", 3, 3);
/// ModRM.mod is 3.
pub const REG_FORM: KeyField = field("REG_FORM", 6, 1);
pub const OPCODE: KeyField = field("OPCODE", 7, 8);
/// Mandatory prefix: none, 66, F3 or F2.
pub const PREFIX: KeyField = field("PREFIX", 15, 2);
/// Operand size prefix present.
pub const P66: KeyField = field("P66", 17, 1);
pub const W: KeyField = field("W", 18, 1);
/// 16, 32 or 64-bit mode.
pub const BITNESS: KeyField = field("BITNESS", 19, 2);
pub const ASIZE: KeyField = field("ASIZE", 21, 2);
pub const L: KeyField = field("L", 23, 2);
pub const REX_B: KeyField = field("REX_B", 25, 1);
/// 66 shrinks near branches in 64-bit mode.
pub const AMD: KeyField = field("AMD", 26, 1);
pub const MAP: KeyField = field("MAP", 27, 4);

/// Key fields from the most significant.
pub const FIELDS: &[KeyField] = &[
    MAP, AMD, REX_B, L, ASIZE, BITNESS, W, P66, PREFIX, OPCODE, REG_FORM, REG, RM,
];

pub const KEY_SIZE: u32 = 32;

fn size_index(bits: u8) -> u32 {
    match bits {
        16 => 0,
        32 => 1,
        _ => 2,
    }
}

pub fn prefix_index(prefix: PrefixSel) -> u32 {
    match prefix {
        PrefixSel::None => 0,
        PrefixSel::P66 => 1,
        PrefixSel::PF3 => 2,
        PrefixSel::PF2 => 3,
    }
}

/// Fixed bits of a key pattern.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Pattern {
    pub mask: u32,
    pub bits: u32,
}

impl Pattern {
    fn set(&mut self, field: KeyField, value: u32) {
        self.set_masked(field, value, u32::MAX);
    }

    fn set_masked(&mut self, field: KeyField, value: u32, mask: u32) {
        let mask = (mask << field.start) & field.mask();
        self.mask = (self.mask & !field.mask()) | mask;
        self.bits = (self.bits & !field.mask()) | ((value << field.start) & mask);
    }

    /// Returns the value of a fully fixed field.
    pub fn get(&self, field: KeyField) -> Option<u32> {
        let mask = field.mask();
        (self.mask & mask == mask).then(|| (self.bits & mask) >> field.start)
    }

    pub fn matches(&self, key: u32) -> bool {
        key & self.mask == self.bits
    }

    pub fn overlaps(&self, other: &Pattern) -> bool {
        (self.bits ^ other.bits) & self.mask & other.mask == 0
    }

    /// Merges two patterns which differ in exactly one fixed bit.
    fn merge(&self, other: &Pattern) -> Option<Pattern> {
        let diff = self.bits ^ other.bits;
        (self.mask == other.mask && diff.count_ones() == 1).then(|| Pattern {
            mask: self.mask & !diff,
            bits: self.bits & !diff,
        })
    }

    /// Returns the pattern in decodetree syntax, one group per key field.
    pub fn to_bits(&self) -> String {
        let mut out = String::with_capacity(48);
        let bit = |out: &mut String, i: u32| {
            out.push(match ((self.mask >> i) & 1, (self.bits >> i) & 1) {
                (0, _) => '-',
                (_, 0) => '0',
                _ => '1',
            });
        };
        for i in (MAP.start + MAP.size..KEY_SIZE).rev() {
            bit(&mut out, i);
        }
        for field in FIELDS {
            out.push(' ');
            for i in (field.start..field.start + field.size).rev() {
                bit(&mut out, i);
            }
        }
        out
    }
}

/// Operand size seen by an entry, must agree with the decoder.
fn operand_size(entry: &Entry, bitness: u32, p66: bool, w: bool, amd: bool) -> u8 {
    let p66 = p66 && entry.sel.prefix != Some(PrefixSel::P66);
    let has = |attr| entry.attrs.contains(&attr);
    let near_branch = has("BRANCH")
        || entry
            .ops
            .iter()
            .any(|op| matches!(op.as_str(), "Jb" | "Jw" | "Jd"));
    if bitness == 2 {
        if has("F64") || w {
            64
        } else if has("D64") {
            if p66 && (amd || !near_branch) {
                16
            } else {
                64
            }
        } else if p66 {
            16
        } else {
            32
        }
    } else {
        let size = if bitness == 0 { 16 } else { 32 };
        if p66 {
            48 - size
        } else {
            size
        }
    }
}

fn minimize(mut terms: Vec<Pattern>) -> Vec<Pattern> {
    'outer: loop {
        terms.dedup();
        for i in 0..terms.len() {
            for j in i + 1..terms.len() {
                if let Some(merged) = terms[i].merge(&terms[j]) {
                    terms[i] = merged;
                    terms.remove(j);
                    continue 'outer;
                }
            }
        }
        return terms;
    }
}

/// Returns the key patterns which select `entry`.
pub fn entry_patterns(entry: &Entry) -> Vec<Pattern> {
    let sel = &entry.sel;
    let mut base = Pattern::default();
    base.set(MAP, entry.map as u32);
    let opcode = entry.opcodes[0] as u32;
    if entry.opcodes.len() == 8 {
        base.set_masked(OPCODE, opcode, !7);
    } else {
        base.set(OPCODE, opcode);
    }
    if let Some(reg) = sel.reg {
        base.set(REG, reg as u32);
    }
    if let Some(rm) = sel.rm {
        base.set(RM, rm as u32);
    }
    match sel.mode {
        Some(ModSel::Mem) => base.set(REG_FORM, 0),
        Some(ModSel::Reg) => base.set(REG_FORM, 1),
        None => {}
    }
    if let Some(prefix) = sel.prefix {
        base.set(PREFIX, prefix_index(prefix));
    }
    if let Some(size) = sel.asize {
        base.set(ASIZE, size_index(size));
    }
    match sel.bitness {
        Some(ModeSel::Not64) => base.set_masked(BITNESS, 0, 2),
        Some(ModeSel::Only64) => base.set(BITNESS, 2),
        None => {}
    }
    if let Some(w) = sel.w {
        base.set(W, w as u32);
    }
    if let Some(l) = sel.l {
        base.set(L, l as u32);
    }
    if sel.rexb0 {
        base.set(REX_B, 0);
    }

    let osize = match sel.osize {
        Some(osize) => osize,
        None => return vec![base],
    };

    let mut terms = Vec::new();
    for bitness in 0..3 {
        for p66 in [false, true] {
            for w in [false, true] {
                for amd in [false, true] {
                    if operand_size(entry, bitness, p66, w, amd) != osize {
                        continue;
                    }
                    let mut term = base;
                    term.set(BITNESS, bitness);
                    term.set(P66, p66 as u32);
                    term.set(W, w as u32);
                    term.set(AMD, amd as u32);
                    if base.overlaps(&term) {
                        terms.push(term);
                    }
                }
            }
        }
    }
    minimize(terms)
}

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

/// Returns the decodetree source which selects entries by key.
///
/// Overlapping patterns are placed in one group ordered from the most
/// specific selector, other patterns stay at the top level.
pub fn gen_source(entries: &[Entry]) -> String {
    let mut patterns = Vec::new();
    for (index, entry) in entries.iter().enumerate() {
        for (n, pattern) in entry_patterns(entry).into_iter().enumerate() {
            patterns.push((index, n, pattern));
        }
    }

    // patterns can overlap only inside one map and opcode row
    let mut buckets: BTreeMap<(u32, u32), Vec<usize>> = BTreeMap::new();
    for (i, (_, _, pattern)) in patterns.iter().enumerate() {
        let map = pattern.get(MAP).unwrap_or(0);
        let row = (pattern.bits >> OPCODE.start >> 3) & 0x1f;
        buckets.entry((map, row)).or_default().push(i);
    }

    let mut parent: Vec<usize> = (0..patterns.len()).collect();
    for bucket in buckets.values() {
        for (n, &i) in bucket.iter().enumerate() {
            for &j in &bucket[n + 1..] {
                if patterns[i].2.overlaps(&patterns[j].2) {
                    let (a, b) = (find(&mut parent, i), find(&mut parent, j));
                    parent[a.max(b)] = a.min(b);
                }
            }
        }
    }

    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for i in 0..patterns.len() {
        let root = find(&mut parent, i);
        groups.entry(root).or_default().push(i);
    }

    let mut out = String::new();
    for group in groups.values_mut() {
        // stable, so equal selectors keep file order
        group.sort_by_key(|&i| Reverse(entries[patterns[i].0].sel.specificity()));

        let first = &entries[patterns[group[0]].0];
        let _ = writeln!(out, "# {} {:02X}", MAPS[first.map], first.opcodes[0]);
        let pad = if group.len() > 1 {
            out.push_str("{\n");
            "  "
        } else {
            ""
        };
        for &i in group.iter() {
            let (index, n, pattern) = &patterns[i];
            let _ = writeln!(out, "{pad}e{index}_{n} {}", pattern.to_bits());
        }
        if group.len() > 1 {
            out.push_str("}\n");
        }
    }
    out
}

/// Entry lookup by key with the priority of the generated matcher.
pub struct KeyIndex {
    rows: BTreeMap<(u32, u32), Vec<(usize, usize, Pattern)>>,
}

impl KeyIndex {
    pub fn new(entries: &[Entry]) -> Self {
        let mut rows: BTreeMap<(u32, u32), Vec<_>> = BTreeMap::new();
        for (index, entry) in entries.iter().enumerate() {
            let specificity = entry.sel.specificity();
            for pattern in entry_patterns(entry) {
                for &opcode in &entry.opcodes {
                    rows.entry((entry.map as u32, opcode as u32))
                        .or_default()
                        .push((index, specificity, pattern));
                }
            }
        }
        Self { rows }
    }

    /// Returns the index of the entry selected by `key`.
    pub fn select(&self, key: u32) -> Option<usize> {
        let row = self.rows.get(&(MAP.extract(key), OPCODE.extract(key)))?;
        let mut best: Option<(usize, usize)> = None;
        for &(index, specificity, pattern) in row {
            if pattern.matches(key) && best.map_or(true, |(_, s)| specificity > s) {
                best = Some((index, specificity));
            }
        }
        best.map(|(index, _)| index)
    }
}

/// Returns the entry index of a pattern name.
pub fn entry_index(name: &str) -> Option<usize> {
    name.strip_prefix('e')?.split('_').next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse;

    fn patterns(line: &str) -> Vec<String> {
        let entries = parse(line).unwrap();
        entry_patterns(&entries[0]).iter().map(Pattern::to_bits).collect()
    }

    #[test]
    fn fixed_bits() {
        assert_eq!(
            patterns("80 /0 : Add_Eb_Ib Eb Ib"),
            ["- 0000 - - -- -- -- - - -- 10000000 - 000 ---"]
        );
        assert_eq!(
            patterns("0F 01 =F8 only64 : Swapgs"),
            ["- 0001 - - -- -- 10 - - -- 00000001 1 111 000"]
        );
        assert_eq!(
            patterns("90 rexb0 : Nopd"),
            ["- 0000 - 0 -- -- -- - - -- 10010000 - --- ---"]
        );
        assert_eq!(
            patterns("B8+r no64 : Mov_Rd_Id Zd Id"),
            ["- 0000 - - -- -- 0- - - -- 10111--- - --- ---"]
        );
    }

    #[test]
    fn operand_size_terms() {
        // o16 in 16-bit mode without 66, elsewhere with 66
        assert_eq!(
            patterns("01 o16 : Add_Ew_Gw Ew Gw"),
            [
                "- 0000 - - -- -- 00 - 0 -- 00000001 - --- ---",
                "- 0000 - - -- -- 01 - 1 -- 00000001 - --- ---",
                "- 0000 - - -- -- 10 0 1 -- 00000001 - --- ---",
            ]
        );
        assert_eq!(
            patterns("01 o64 : Add_Eq_Gq Eq Gq"),
            ["- 0000 - - -- -- 10 1 - -- 00000001 - --- ---"]
        );
        // near branches ignore 66 unless AMD sizing is requested
        assert_eq!(
            patterns("EB o16 : Jmp_Jb16 Jb d64"),
            [
                "- 0000 - - -- -- 00 - 0 -- 11101011 - --- ---",
                "- 0000 - - -- -- 01 - 1 -- 11101011 - --- ---",
                "- 0000 1 - -- -- 10 0 1 -- 11101011 - --- ---",
            ]
        );
        assert_eq!(
            patterns("EB o64 : Jmp_Jb64 Jb d64"),
            [
                "- 0000 - - -- -- 10 - 0 -- 11101011 - --- ---",
                "- 0000 0 - -- -- 10 - 1 -- 11101011 - --- ---",
                "- 0000 1 - -- -- 10 1 1 -- 11101011 - --- ---",
            ]
        );
        // a 66 mandatory prefix does not change the operand size
        assert_eq!(
            patterns("0F 7E p66 o64 : Movq_Eq_VX Eq VX"),
            ["- 0001 - - -- -- 10 1 - 01 01111110 - --- ---"]
        );
    }

    #[test]
    fn groups() {
        let entries = parse("90 rexb0 : Nopd\n90+r o32 : Xchg_Zd_EAX Zd %EAX\n00 : Add_Eb_Gb Eb Gb").unwrap();
        let src = gen_source(&entries);
        let lines: Vec<String> = src
            .lines()
            .filter(|line| !line.starts_with('#'))
            .map(|line| line.split(' ').take(3).collect::<Vec<_>>().join(" "))
            .collect();
        assert_eq!(
            lines,
            ["{", "  e0_0", "  e1_0", "  e1_1", "  e1_2", "}", "e2_0 - 0000"]
        );
        assert_eq!(entry_index("e12_3"), Some(12));
        assert_eq!(entry_index("x12"), None);
    }

    #[test]
    fn key_index() {
        let entries = parse("90 rexb0 : Nopd\n90+r o32 : Xchg_Zd_EAX Zd %EAX").unwrap();
        let index = KeyIndex::new(&entries);
        let key = |opcode: u32, rexb: u32| {
            OPCODE.encode(opcode) | BITNESS.encode(2) | ASIZE.encode(2) | REX_B.encode(rexb)
        };
        assert_eq!(index.select(key(0x90, 0)), Some(0));
        assert_eq!(index.select(key(0x90, 1)), Some(1));
        assert_eq!(index.select(key(0x97, 0)), Some(1));
        assert_eq!(index.select(key(0x98, 0)), None);
        assert_eq!(index.select(key(0x90, 0) | W.encode(1)), Some(0));
        assert_eq!(index.select(key(0x97, 0) | W.encode(1)), None);
        assert_eq!(OPCODE.extract(key(0x97, 1)), 0x97);
    }
}
