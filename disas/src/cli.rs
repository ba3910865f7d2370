use std::{cmp, num::ParseIntError};

use bpaf::{doc::Style, *};
use x86_decode::Bitness;

#[derive(Debug, Clone)]
pub struct Cli {
    pub raw: bool,
    pub bitness: Option<Bitness>,
    pub sections: Vec<String>,
    pub disassembler_options: Vec<String>,
    pub show_raw_insn: bool,
    pub offsets: bool,
    pub start_address: u64,
    pub stop_address: u64,
    pub threads: usize,
    pub threads_block_size: usize,
    pub path: String,
}

fn parse_address(s: &str) -> Result<u64, ParseIntError> {
    if s.starts_with("0x") || s.starts_with("0X") {
        u64::from_str_radix(&s[2..], 16)
    } else {
        s.parse()
    }
}

pub fn parse_cli() -> Cli {
    let raw = long("raw")
        .help("Treat FILE as a flat code image loaded at address 0")
        .switch();

    let bitness = short('b')
        .long("bitness")
        .help("Decode 16, 32 or 64-bit code [default: 64 or the object file architecture]")
        .argument::<u32>("BITS")
        .parse(|bits| Bitness::from_bits(bits).ok_or(format!("invalid bitness {bits}")))
        .optional();

    let sections = short('j')
        .long("section")
        .help("Only display information for section NAME")
        .argument("NAME")
        .many();

    let disassembler_options = short('M')
        .long("disassembler-options")
        .help("Pass comma-separated OPT on to the decoder (amd-branches, no-check)")
        .argument::<String>("OPT")
        .many()
        .map(|v| {
            v.join(",")
                .split(',')
                .map(|i| i.trim())
                .filter(|i| !i.is_empty())
                .map(|i| i.into())
                .collect()
        })
        .fallback(Vec::new());

    let show_raw_insn = long("show-raw-insn")
        .help("Display hex alongside the decoded instruction")
        .switch()
        .map(|_| true);
    let no_show_raw_insn = long("no-show-raw-insn")
        .switch()
        .hide_usage()
        .map(|_| false);
    let show_raw_insn = construct!([show_raw_insn, no_show_raw_insn])
        .custom_usage(&[("--[no-]show-raw-insn", Style::Literal)])
        .fallback(true)
        .last();

    let offsets = long("offsets")
        .help("Display offsets of the displacement and immediates")
        .switch();

    let start_address = long("start-address")
        .help("Only process data whose address is >= ADDR")
        .argument::<String>("ADDR")
        .parse(move |s| parse_address(&s))
        .fallback(0);

    let stop_address = long("stop-address")
        .help("Only process data whose address is < ADDR")
        .argument::<String>("ADDR")
        .parse(move |s| parse_address(&s))
        .fallback(u64::MAX);

    let num_cpus = std::thread::available_parallelism()
        .map(|i| i.get())
        .unwrap_or(1);

    #[cfg(feature = "parallel")]
    let threads_help = &*format!("Set the number of threads to use [default: {num_cpus}]");

    #[cfg(not(feature = "parallel"))]
    let threads_help = "Set the number of threads to use [disabled at compile]";

    let threads = long("threads")
        .help(threads_help)
        .argument("NUM")
        .map(move |i| match i {
            0 => num_cpus,
            _ => i,
        })
        .fallback(cmp::min(4, num_cpus));

    let threads_block_size = long("threads-block-size")
        .help("Set the number of bytes decoded per thread [default: 4096]")
        .argument("BYTES")
        .map(|i: usize| i.clamp(256, 1024 * 1024))
        .fallback(4096);

    let path = positional("FILE")
        .help("File to process")
        .fallback("a.out".into());

    construct!(Cli {
        raw,
        bitness,
        sections,
        disassembler_options,
        show_raw_insn,
        offsets,
        start_address,
        stop_address,
        threads,
        threads_block_size,
        path,
    })
    .to_options()
    .version(env!("CARGO_PKG_VERSION"))
    .descr("Decode x86 and x86-64 machine code")
    .fallback_to_usage()
    .run()
}
