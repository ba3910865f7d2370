//! Build-time generator for the x86 opcode tables.
//!
//! Table lines are parsed into entries with operand templates, the opcode
//! and selector part of each entry is lowered to decodetree patterns over a
//! lookup key and decodetree generates the matcher.

pub mod parse;
pub mod pattern;

use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    fmt::{self, Write as _},
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use decodetree::{
    gen::{Gen, Pad},
    Parser, Pattern,
};

use crate::parse::{Entry, ModSel, PrefixSel, MAPS};

#[derive(Debug)]
pub enum ErrorKind {
    SourceFile(io::Error),
    OutputDir(io::Error),
    OutputFile(io::Error),
    Parse(String),
    Table(String),
    Generate(io::Error),
}

#[derive(Debug)]
pub struct Error {
    path: PathBuf,
    kind: ErrorKind,
}

impl Error {
    fn new<S: Into<PathBuf>>(path: S, kind: ErrorKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        use ErrorKind as E;

        let path = self.path.display();
        match &self.kind {
            E::SourceFile(error) => {
                write!(fmt, "failed to read source file \"{path}\", {error}")
            }
            E::OutputDir(error) => {
                write!(fmt, "failed to create output directory \"{path}\", {error}")
            }
            E::OutputFile(error) => {
                write!(fmt, "failed to create output file \"{path}\", {error}")
            }
            E::Parse(errors) => errors.fmt(fmt),
            E::Table(error) => write!(fmt, "{path}: {error}"),
            E::Generate(error) => {
                write!(fmt, "failed to generate output file \"{path}\", {error}")
            }
        }
    }
}

impl std::error::Error for Error {}

fn create_file(path: &Path) -> Result<File, Error> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|error| Error::new(parent, ErrorKind::OutputDir(error)))?;
    }
    File::create(path).map_err(|error| Error::new(path, ErrorKind::OutputFile(error)))
}

struct TableGen {
    entries: usize,
}

impl<'src, T> Gen<T, &'src str> for TableGen {
    fn trait_attrs(&self) -> &[&str] {
        &[]
    }

    fn trait_parents(&self) -> &[&str] {
        &["SelectEntry"]
    }

    fn decode_args(&self) -> &[(&str, &str)] {
        &[]
    }

    fn cond_args(&self, _: &str) -> &[(&str, &str)] {
        &[]
    }

    fn trans_proto_check(&self, _: &str) -> bool {
        false
    }

    fn trait_body<W: Write>(&mut self, _: &mut W, _: Pad) -> io::Result<()> {
        Ok(())
    }

    fn trans_success<W: Write>(
        &mut self,
        out: &mut W,
        pad: Pad,
        pattern: &Pattern<T, &'src str>,
    ) -> io::Result<()> {
        let name: &str = pattern.name();
        match pattern::entry_index(name) {
            Some(index) => writeln!(out, "{pad}self.select_entry({index});"),
            None => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected pattern name \"{name}\""),
            )),
        }
    }

    fn end<W: Write>(&mut self, _: &mut W, _: Pad, opcodes: &HashSet<&str>) -> io::Result<()> {
        let selected: BTreeSet<usize> = opcodes
            .iter()
            .filter_map(|name| pattern::entry_index(name))
            .collect();
        match (0..self.entries).find(|index| !selected.contains(index)) {
            Some(index) => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("entry {index} is unreachable"),
            )),
            None => Ok(()),
        }
    }
}

/// Returns the mnemonic part of a code name.
///
/// `EVEX_Vaddps_VZ_k1z_HZ_WZ_er_b` becomes `Vaddps`.
pub fn mnemonic_of(code: &str) -> &str {
    let code = ["VEX_", "EVEX_", "XOP_", "D3NOW_"]
        .iter()
        .find_map(|prefix| code.strip_prefix(prefix))
        .unwrap_or(code);
    code.split('_').next().unwrap_or(code)
}

struct Source {
    path: PathBuf,
    entries: Vec<Entry>,
}

type SlotKey = (usize, u8);

pub struct Tables {
    sources: Vec<PathBuf>,
    code_output: PathBuf,
    tables_output: PathBuf,
    patterns_output: PathBuf,
    decode_output: PathBuf,
}

impl Tables {
    pub fn new(out_dir: impl AsRef<Path>) -> Self {
        let out_dir = out_dir.as_ref();
        Self {
            sources: Vec::new(),
            code_output: out_dir.join("generated_code.rs"),
            tables_output: out_dir.join("generated_tables.rs"),
            patterns_output: out_dir.join("tables.decode"),
            decode_output: out_dir.join("generated_decode.rs"),
        }
    }

    pub fn source(mut self, path: impl AsRef<Path>) -> Self {
        self.sources.push(path.as_ref().into());
        self
    }

    fn parse(&self) -> Result<Vec<Source>, Error> {
        let mut sources = Vec::with_capacity(self.sources.len());
        for path in &self.sources {
            println!("cargo:rerun-if-changed={}", path.display());

            let src = fs::read_to_string(path)
                .map_err(|error| Error::new(path, ErrorKind::SourceFile(error)))?;
            let entries = parse::parse(&src).map_err(|errors| {
                let mut buffer = String::new();
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        buffer.push('\n');
                    }
                    let _ = write!(&mut buffer, "{}:{err}", path.display());
                }
                Error::new(path, ErrorKind::Parse(buffer))
            })?;
            sources.push(Source {
                path: path.clone(),
                entries,
            });
        }
        Ok(sources)
    }

    /// Checks that entries of one opcode agree on ModRM and do not shadow
    /// each other, returns which opcodes are followed by ModRM.
    fn check_slots(sources: &[Source]) -> Result<BTreeMap<SlotKey, bool>, Error> {
        let mut slots: BTreeMap<SlotKey, Vec<(&Path, &Entry)>> = BTreeMap::new();
        for source in sources {
            for entry in &source.entries {
                for opcode in &entry.opcodes {
                    slots
                        .entry((entry.map, *opcode))
                        .or_default()
                        .push((&source.path, entry));
                }
            }
        }

        let mut out = BTreeMap::new();
        for ((map, opcode), entries) in slots {
            let (path, first) = entries[0];
            for (i, (other_path, other)) in entries.iter().enumerate().skip(1) {
                if other.modrm != first.modrm {
                    let msg = format!(
                        "{} {opcode:02X}: ModRM mismatch between line {} and {}:{}",
                        MAPS[map],
                        first.line,
                        other_path.display(),
                        other.line
                    );
                    return Err(Error::new(path, ErrorKind::Table(msg)));
                }
                if let Some((_, prev)) = entries[..i].iter().find(|(_, prev)| prev.sel == other.sel) {
                    let msg = format!(
                        "{} {opcode:02X}: line {} shadows line {}",
                        MAPS[map], prev.line, other.line
                    );
                    return Err(Error::new(*other_path, ErrorKind::Table(msg)));
                }
            }
            out.insert((map, opcode), first.modrm);
        }
        Ok(out)
    }

    fn gen_code<W: Write>(&self, mut out: W, entries: &[Entry]) -> io::Result<()> {
        let out = &mut out;
        let codes: BTreeSet<&str> = entries.iter().map(|entry| entry.code.as_str()).collect();
        let mnemonics: BTreeSet<&str> = codes.iter().map(|code| mnemonic_of(code)).collect();

        writeln!(out, "x86_decode_core::define_enum! {{")?;
        writeln!(out, "    /// Instruction mnemonic together with its operand shape.")?;
        writeln!(out, "    #[allow(non_camel_case_types)]")?;
        writeln!(out, "    pub enum Code: u16 {{")?;
        writeln!(out, "        INVALID,")?;
        for code in &codes {
            writeln!(out, "        {code},")?;
        }
        writeln!(out, "    }}")?;
        writeln!(out, "}}")?;

        writeln!(out)?;
        writeln!(out, "#[cfg(feature = \"mnemonic\")]")?;
        writeln!(out, "x86_decode_core::define_enum! {{")?;
        writeln!(out, "    /// Instruction mnemonic.")?;
        writeln!(out, "    #[allow(non_camel_case_types)]")?;
        writeln!(out, "    pub enum Mnemonic: u16 {{")?;
        writeln!(out, "        INVALID,")?;
        for mnemonic in &mnemonics {
            writeln!(out, "        {mnemonic},")?;
        }
        writeln!(out, "    }}")?;
        writeln!(out, "}}")?;

        writeln!(out)?;
        writeln!(out, "#[cfg(feature = \"mnemonic\")]")?;
        writeln!(out, "static CODE_MNEMONIC: [Mnemonic; Code::COUNT] = [")?;
        writeln!(out, "    Mnemonic::INVALID,")?;
        for code in &codes {
            writeln!(out, "    Mnemonic::{},", mnemonic_of(code))?;
        }
        writeln!(out, "];")?;

        Ok(())
    }

    fn write_entry<W: Write>(out: &mut W, entry: &Entry) -> io::Result<()> {
        let sel = &entry.sel;
        writeln!(out, "    // {} line {}", MAPS[entry.map], entry.line)?;
        writeln!(out, "    Entry {{")?;
        writeln!(out, "        code: Code::{},", entry.code)?;
        let mode = match sel.mode {
            Some(ModSel::Mem) => "Mem",
            Some(ModSel::Reg) => "Reg",
            None => "Any",
        };
        writeln!(out, "        mode: ModSel::{mode},")?;
        let prefix = match sel.prefix {
            Some(PrefixSel::None) => "None",
            Some(PrefixSel::P66) => "P66",
            Some(PrefixSel::PF3) => "PF3",
            Some(PrefixSel::PF2) => "PF2",
            None => "Any",
        };
        writeln!(out, "        prefix: PrefixSel::{prefix},")?;

        if entry.attrs.is_empty() {
            writeln!(out, "        attr: 0,")?;
        } else {
            let attrs: Vec<String> = entry.attrs.iter().map(|a| format!("attr::{a}")).collect();
            writeln!(out, "        attr: {},", attrs.join(" | "))?;
        }

        write!(out, "        ops: &[")?;
        for (i, op) in entry.ops.iter().enumerate() {
            if i != 0 {
                write!(out, ", ")?;
            }
            match op.strip_prefix('%') {
                Some(reg) => write!(out, "Op::Reg(Register::{reg})")?,
                None => write!(out, "Op::{op}")?,
            }
        }
        writeln!(out, "],")?;

        writeln!(out, "        mem: MemorySize::{},", entry.mem)?;
        writeln!(
            out,
            "        bcst: MemorySize::{},",
            entry.bcst.as_deref().unwrap_or("Unknown")
        )?;
        writeln!(
            out,
            "        tuple: TupleType::{},",
            entry.tuple.as_deref().unwrap_or("None")
        )?;
        writeln!(out, "    }},")?;
        Ok(())
    }

    fn gen_tables<W: Write>(
        &self,
        mut out: W,
        entries: &[Entry],
        modrm: &BTreeMap<SlotKey, bool>,
    ) -> io::Result<()> {
        let out = &mut out;

        writeln!(out, "x86_decode_core::define_enum! {{")?;
        writeln!(out, "    /// Opcode map selected by escape bytes or VEX/EVEX/XOP.")?;
        writeln!(out, "    pub(crate) enum Map: u8 {{")?;
        for map in MAPS {
            writeln!(out, "        {map},")?;
        }
        writeln!(out, "    }}")?;
        writeln!(out, "}}")?;
        writeln!(out)?;

        writeln!(out, "/// Fields of the lookup key passed to [`TableDecode::decode`].")?;
        writeln!(out, "pub(crate) mod key {{")?;
        writeln!(out, "    use x86_decode_core::flags::Field;")?;
        writeln!(out)?;
        for field in pattern::FIELDS.iter().rev() {
            writeln!(
                out,
                "    pub const {}: Field = Field::new({}, {});",
                field.name, field.start, field.size
            )?;
        }
        writeln!(out, "}}")?;
        writeln!(out)?;

        writeln!(out, "pub(crate) static ENTRIES: &[Entry] = &[")?;
        for entry in entries {
            Self::write_entry(out, entry)?;
        }
        writeln!(out, "];")?;
        writeln!(out)?;

        writeln!(out, "/// Opcodes followed by a ModRM byte.")?;
        writeln!(out, "static MODRM: [[bool; 256]; {}] = [", MAPS.len())?;
        for (map, name) in MAPS.iter().enumerate() {
            writeln!(out, "    // {name}")?;
            writeln!(out, "    [")?;
            for row in 0..16u8 {
                write!(out, "       ")?;
                for col in 0..16u8 {
                    let opcode = row * 16 + col;
                    let has = modrm.get(&(map, opcode)).copied().unwrap_or(false);
                    write!(out, " {has},")?;
                }
                writeln!(out)?;
            }
            writeln!(out, "    ],")?;
        }
        writeln!(out, "];")?;

        Ok(())
    }

    fn gen_decode(&self, entries: &[Entry]) -> Result<(), Error> {
        let path = &self.patterns_output;
        let src = pattern::gen_source(entries);
        fs::write(path, &src).map_err(|error| Error::new(path, ErrorKind::OutputFile(error)))?;

        let parser = Parser::<u64, &str>::new(&src).set_insn_size(&[pattern::KEY_SIZE]);
        let mut tree = match parser.parse() {
            Ok(tree) => tree,
            Err(errors) => {
                let mut buffer = String::new();
                for (i, err) in errors.iter(&path.to_string_lossy()).enumerate() {
                    if i > 0 {
                        buffer.push('\n');
                    }
                    let _ = write!(&mut buffer, "{err}");
                }
                return Err(Error::new(path, ErrorKind::Parse(buffer)));
            }
        };
        tree.optimize();

        let path = &self.decode_output;
        let mut out = create_file(path).map(BufWriter::new)?;
        decodetree::Generator::builder()
            .trait_name("TableDecode")
            .insn_type("u32")
            .value_type("i32")
            .stubs(false)
            .variable_size(false)
            .error_type(false)
            .build(
                &tree,
                TableGen {
                    entries: entries.len(),
                },
            )
            .generate(&mut out)
            .and_then(|_| out.flush())
            .map_err(|error| Error::new(path, ErrorKind::Generate(error)))
    }

    pub fn generate(self) -> Result<(), Error> {
        let sources = self.parse()?;
        let modrm = Self::check_slots(&sources)?;
        let entries: Vec<Entry> = sources
            .into_iter()
            .flat_map(|source| source.entries)
            .collect();

        let mut out = create_file(&self.code_output).map(BufWriter::new)?;
        self.gen_code(&mut out, &entries)
            .and_then(|_| out.flush())
            .map_err(|error| Error::new(&self.code_output, ErrorKind::Generate(error)))?;

        let mut out = create_file(&self.tables_output).map(BufWriter::new)?;
        self.gen_tables(&mut out, &entries, &modrm)
            .and_then(|_| out.flush())
            .map_err(|error| Error::new(&self.tables_output, ErrorKind::Generate(error)))?;

        self.gen_decode(&entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mnemonic() {
        assert_eq!(mnemonic_of("Add_Eb_Gb"), "Add");
        assert_eq!(mnemonic_of("Nopw"), "Nopw");
        assert_eq!(mnemonic_of("EVEX_Vaddps_VZ_k1z_HZ_WZ_er_b"), "Vaddps");
        assert_eq!(mnemonic_of("D3NOW_Pfadd_P_Q"), "Pfadd");
    }

    fn slots(src: &str) -> Result<usize, String> {
        let sources = vec![Source {
            path: PathBuf::from("test.tbl"),
            entries: parse::parse(src).map_err(|e| e[0].to_string())?,
        }];
        Tables::check_slots(&sources)
            .map(|slots| slots.len())
            .map_err(|e| e.to_string())
    }

    #[test]
    fn slot_checks() {
        assert_eq!(slots("00 : Add_Eb_Gb Eb Gb\n01 o16 : Add_Ew_Gw Ew Gw"), Ok(2));
        assert_eq!(slots("B0+r : Mov_Rb_Ib Zb Ib"), Ok(8));
        assert_eq!(
            slots("90 : Nopd\n90 /0 : Pop_Ed Ed"),
            Err("test.tbl: Legacy 90: ModRM mismatch between line 1 and test.tbl:2".into())
        );
        assert_eq!(
            slots("00 : Add_Eb_Gb Eb Gb\n00 : Adc_Eb_Gb Eb Gb"),
            Err("test.tbl: Legacy 00: line 1 shadows line 2".into())
        );
    }

    #[test]
    fn generate() {
        let dir = std::env::temp_dir().join(format!("x86-decode-gen-{}", std::process::id()));
        let table = dir.join("test.tbl");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            &table,
            "00 : Add_Eb_Gb Eb Gb\n\
             90 rexb0 : Nopd\n\
             90+r o32 : Xchg_Zd_EAX Zd %EAX\n\
             0F 01 =F8 only64 : Swapgs\n\
             0F 01 /7 mem : Invlpg_M M mem=UInt8\n",
        )
        .unwrap();
        Tables::new(&dir).source(&table).generate().unwrap();

        let decode = fs::read_to_string(dir.join("generated_decode.rs")).unwrap();
        assert!(decode.contains("trait TableDecode"));
        for index in 0..5 {
            assert!(decode.contains(&format!("self.select_entry({index});")));
        }
        let tables = fs::read_to_string(dir.join("generated_tables.rs")).unwrap();
        assert!(tables.contains("pub const OPCODE: Field = Field::new(7, 8);"));
        assert!(tables.contains("mode: ModSel::Mem,"));
        fs::remove_dir_all(&dir).unwrap();
    }
}
