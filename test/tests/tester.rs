use x86_decode_test::test::{parse_flags, Parser, Runner, Test};

#[test]
fn flags() {
    let src = " +a\t+b  -abc-foo -foo  +bar+foo";
    let mut flags = parse_flags(src);
    assert_eq!(flags.next(), Some(("a", true)));
    assert_eq!(flags.next(), Some(("b", true)));
    assert_eq!(flags.next(), Some(("abc-foo", false)));
    assert_eq!(flags.next(), Some(("foo", false)));
    assert_eq!(flags.next(), Some(("bar+foo", true)));
    assert_eq!(flags.next(), None);
}

#[test]
fn parse() -> Result<(), String> {
    let src = r#"# comment
        1000: 90        Nopd # +bits32
        1001: 68 5aa51234   Push_Id   i32:0x3412a55a
              0f0b      Ud2

        00002000: c4  error: need more bytes
    "#;

    let mut parser = Parser::new("input", src);
    let mut test = Test::default();

    assert!(parser.parse(&mut test)?);
    assert_eq!(test.line, 2);
    assert_eq!(test.address, 0x1000);
    assert_eq!(test.bytes, &[0x90]);
    assert_eq!(test.expect, "Nopd");
    assert_eq!(test.comment, "+bits32");

    assert!(parser.parse(&mut test)?);
    assert_eq!(test.line, 3);
    assert_eq!(test.address, 0x1001);
    assert_eq!(test.bytes, &[0x68, 0x5a, 0xa5, 0x12, 0x34]);
    assert_eq!(test.expect, "Push_Id   i32:0x3412a55a");
    assert_eq!(test.comment, "");

    assert!(parser.parse(&mut test)?);
    assert_eq!(test.address, 0x1006);
    assert_eq!(test.bytes, &[0x0f, 0x0b]);
    assert_eq!(test.expect, "Ud2");

    assert!(parser.parse(&mut test)?);
    assert_eq!(test.address, 0x2000);
    assert!(test.is_error());

    assert!(!parser.parse(&mut test)?);
    Ok(())
}

#[test]
fn parse_errors() {
    let mut test = Test::default();
    assert!(Parser::new("input", "1000: 0f0  Ud2")
        .parse(&mut test)
        .is_err());
    assert!(Parser::new("input", "1000: 0f0b").parse(&mut test).is_err());
}

#[test]
fn parse_all() -> Result<(), String> {
    let src = "90  Nopd\nc4  error: short\n0f 0b  Ud2\n";
    assert_eq!(Parser::parse_all(src)?, [0x90, 0x0f, 0x0b]);
    Ok(())
}

struct Echo;

impl Runner for Echo {
    fn decode(&mut self, test: &Test) -> Result<(usize, String), String> {
        match test.bytes.as_slice() {
            [0x90] => Ok((1, "Nopd".to_owned())),
            _ => Err("invalid opcode".to_owned()),
        }
    }
}

#[test]
fn runner() {
    assert_eq!(Echo.run("input", "90  Nopd\n0f  error: invalid opcode\n"), Ok(()));
    assert!(Echo.run("input", "90  Nopw\n").is_err());
}
