#![cfg(feature = "print")]

use x86_decode::{Bitness, Decoder, Options};
use x86_decode_test::test::{self, Runner, Test};

#[derive(Default)]
struct X86 {
    flags: &'static str,
}

impl X86 {
    fn options(&self, test: &Test) -> Options {
        let mut opts = Options::default();
        let flags = test::parse_flags(self.flags).chain(test::parse_flags(test.comment));
        for (name, state) in flags {
            match (name, state) {
                ("bits16", true) => opts.bitness = Bitness::Bits16,
                ("bits32", true) => opts.bitness = Bitness::Bits32,
                ("bits64", true) => opts.bitness = Bitness::Bits64,
                ("check", _) => opts.invalid_check = state,
                ("amd", _) => opts.amd_branches = state,
                _ => panic!("unexpected flag {name}"),
            }
        }
        opts
    }
}

impl Runner for X86 {
    fn decode(&mut self, test: &Test) -> Result<(usize, String), String> {
        let decoder = Decoder::new(self.options(test));
        match decoder.decode(test.address, &test.bytes) {
            Ok(insn) => Ok((insn.len(), insn.to_string())),
            Err(err) => Err(err.to_string()),
        }
    }
}

macro_rules! test {
    ($name:ident, $file:expr, $flags:expr) => {
        #[test]
        fn $name() -> Result<(), String> {
            X86 { flags: $flags }.run($file, include_str!($file))
        }
    };
}

test!(legacy16, "legacy16.test", "+bits16");
test!(legacy32, "legacy32.test", "+bits32");
test!(legacy64, "legacy64.test", "+bits64");
test!(prefixes, "prefixes.test", "");
test!(x87, "x87.test", "");
test!(sse, "sse.test", "");
test!(vex, "vex.test", "");
test!(evex, "evex.test", "");
test!(xop, "xop.test", "");
test!(d3now, "3dnow.test", "");
test!(invalid, "invalid.test", "");
