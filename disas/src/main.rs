#[macro_use]
extern crate log;

mod cli;

#[cfg(feature = "parallel")]
mod parallel;

use std::{
    error::Error,
    fmt, fs,
    io::{self, BufWriter, Write},
    process,
};

use object::{Object, ObjectSection, SymbolMap, SymbolMapName};
use x86_decode::{Bitness, ConstantOffsets, Decoder, Instruction, Options};

use crate::cli::Cli;

/// Raw bytes printed on the first line of an instruction.
const RAW_BYTES_PER_LINE: usize = 7;

fn unsupported_arch() -> ! {
    eprintln!("error: unsupported architecture");
    process::exit(1);
}

// ignore broken pipe error
fn ignore_broken_pipe(result: io::Result<()>) -> io::Result<()> {
    if matches!(result, Err(ref e) if e.kind() == io::ErrorKind::BrokenPipe) {
        Ok(())
    } else {
        result
    }
}

struct Offsets(ConstantOffsets);

impl fmt::Display for Offsets {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        let o = &self.0;
        let mut sep = "";
        if o.has_displacement() {
            write!(fmt, "disp@{}:{}", o.displacement_offset, o.displacement_size)?;
            sep = " ";
        }
        if o.has_immediate() {
            write!(fmt, "{sep}imm@{}:{}", o.immediate_offset, o.immediate_size)?;
            sep = " ";
        }
        if o.has_immediate2() {
            write!(fmt, "{sep}imm2@{}:{}", o.immediate_offset2, o.immediate_size2)?;
        }
        Ok(())
    }
}

pub(crate) struct App<'a> {
    decoder: Decoder,
    symbols: Option<SymbolMap<SymbolMapName<'a>>>,

    show_raw_insn: bool,
    offsets: bool,

    start_address: u64,
    stop_address: u64,

    #[cfg_attr(not(feature = "parallel"), allow(dead_code))]
    threads: usize,
    #[cfg_attr(not(feature = "parallel"), allow(dead_code))]
    threads_block_size: usize,
}

impl<'a> App<'a> {
    fn new(cli: &Cli, bitness: Bitness, symbols: Option<SymbolMap<SymbolMapName<'a>>>) -> Self {
        let mut opts = Options::new(bitness);
        for i in cli.disassembler_options.iter() {
            match i.as_str() {
                "amd-branches" => opts.amd_branches = true,
                "intel-branches" => opts.amd_branches = false,
                "no-check" => opts.invalid_check = false,
                "check" => opts.invalid_check = true,
                _ => eprintln!("warning: unsupported option `{i}`"),
            }
        }
        debug!("decoder options {opts:?}");

        Self {
            decoder: Decoder::new(opts),
            symbols,
            show_raw_insn: cli.show_raw_insn,
            offsets: cli.offsets,
            start_address: cli.start_address,
            stop_address: cli.stop_address,
            threads: cli.threads,
            threads_block_size: cli.threads_block_size,
        }
    }

    fn get_bitness(file: &object::File) -> Bitness {
        use object::Architecture as A;

        match file.architecture() {
            A::I386 => Bitness::Bits32,
            A::X86_64 | A::X86_64_X32 => Bitness::Bits64,
            _ => unsupported_arch(),
        }
    }

    fn get_file_format(file: &object::File) -> String {
        use object::{Architecture as A, BinaryFormat as F};

        let mut format = String::new();

        match (file.format(), file.is_64()) {
            (F::Elf, false) => format.push_str("elf32"),
            (F::Elf, true) => format.push_str("elf64"),
            (F::Pe, _) => format.push_str("pei"),
            (F::Coff, _) => format.push_str("coff"),
            (F::MachO, _) => format.push_str("mach-o"),
            _ => format.push_str("unknown"),
        }

        format.push('-');

        match file.architecture() {
            A::I386 => format.push_str("i386"),
            A::X86_64 | A::X86_64_X32 => format.push_str("x86-64"),
            _ => format.push_str("unknown"),
        }

        format
    }

    /// Clips `data` located at `address` to the requested address range.
    fn clip<'d>(&self, address: u64, data: &'d [u8]) -> Option<(u64, &'d [u8])> {
        let end = address.saturating_add(data.len() as u64);
        let start = address.max(self.start_address);
        let stop = end.min(self.stop_address);
        if start >= stop {
            return None;
        }
        let data = &data[(start - address) as usize..(stop - address) as usize];
        Some((start, data))
    }

    fn print_symbol(&self, out: &mut impl Write, address: u64) -> io::Result<()> {
        if let Some(symbol) = self.symbols.as_ref().and_then(|s| s.get(address)) {
            if symbol.address() == address {
                writeln!(out, "\n{address:016x} <{}>:", symbol.name())?;
            }
        }
        Ok(())
    }

    fn print_insn(
        &self,
        out: &mut impl Write,
        address: u64,
        raw: &[u8],
        insn: Option<&Instruction>,
    ) -> io::Result<()> {
        write!(out, "{address:8x}:\t")?;
        let (head, tail) = raw.split_at(raw.len().min(RAW_BYTES_PER_LINE));
        if self.show_raw_insn {
            for b in head {
                write!(out, "{b:02x} ")?;
            }
            for _ in head.len()..RAW_BYTES_PER_LINE {
                out.write_all(b"   ")?;
            }
            out.write_all(b"\t")?;
        }
        match insn {
            Some(insn) => {
                write!(out, "{insn}")?;
                if self.offsets {
                    let offsets = Offsets(insn.constant_offsets());
                    write!(out, "\t; {offsets}")?;
                }
            }
            None => out.write_all(b"(bad)")?,
        }
        writeln!(out)?;

        if self.show_raw_insn && !tail.is_empty() {
            let next = address.wrapping_add(head.len() as u64);
            write!(out, "{next:8x}:\t")?;
            for (i, b) in tail.iter().enumerate() {
                let sep = if i == 0 { "" } else { " " };
                write!(out, "{sep}{b:02x}")?;
            }
            writeln!(out)?;
        }
        Ok(())
    }

    /// Decodes `data` located at `address` and prints every instruction.
    fn print_code(&self, out: &mut impl Write, address: u64, data: &[u8]) -> io::Result<()> {
        for (ip, res) in self.decoder.iter(address, data) {
            self.print_symbol(out, ip)?;
            let offset = ip.wrapping_sub(address) as usize;
            match res {
                Ok(insn) => {
                    let raw = &data[offset..offset + insn.len()];
                    self.print_insn(out, ip, raw, Some(&insn))?;
                }
                Err(err) => {
                    debug!("{ip:#x}: skip byte {:02x}, {err}", data[offset]);
                    self.print_insn(out, ip, &data[offset..offset + 1], None)?;
                }
            }
        }
        Ok(())
    }

    fn disassemble_code(&self, address: u64, data: &[u8]) -> io::Result<()> {
        let stdout = io::stdout();
        let mut out = BufWriter::new(stdout.lock());
        self.print_code(&mut out, address, data)?;
        out.flush()
    }

    fn disassemble(&self, name: &str, address: u64, data: &[u8]) -> Result<(), Box<dyn Error>> {
        let (address, data) = match self.clip(address, data) {
            Some(clipped) => clipped,
            None => {
                debug!("skip section {name}, out of address range");
                return Ok(());
            }
        };
        debug!("disassemble {name} {address:#x}, {} bytes", data.len());

        ignore_broken_pipe({
            let mut stdout = io::stdout().lock();
            writeln!(stdout, "\nDisassembly of section {name}:")
        })?;

        #[cfg(feature = "parallel")]
        if self.threads > 1 && data.len() >= self.threads_block_size * 2 {
            ignore_broken_pipe(parallel::disassemble_code(self, address, data))?;
            return Ok(());
        }
        ignore_broken_pipe(self.disassemble_code(address, data))?;
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = cli::parse_cli();
    let data = fs::read(&cli.path)?;

    if cli.raw {
        let bitness = cli.bitness.unwrap_or_default();
        println!();
        println!("{}:     file format binary ({bitness})", cli.path);
        let app = App::new(&cli, bitness, None);
        app.disassemble(".data", 0, &data)?;
        return Ok(());
    }

    let file = object::File::parse(&*data)?;
    let bitness = cli.bitness.unwrap_or_else(|| App::get_bitness(&file));
    let format = App::get_file_format(&file);

    println!();
    println!("{}:     file format {format}", cli.path);

    let app = App::new(&cli, bitness, Some(file.symbol_map()));

    if cli.sections.is_empty() {
        for section in file.sections() {
            if object::SectionKind::Text == section.kind() {
                app.disassemble(section.name()?, section.address(), section.data()?)?;
            }
        }
    } else {
        for section_name in &cli.sections {
            match file.section_by_name(section_name) {
                Some(section) => {
                    app.disassemble(section.name()?, section.address(), section.data()?)?
                }
                None => eprintln!("warning: section `{section_name}` not found"),
            }
        }
    }

    Ok(())
}
