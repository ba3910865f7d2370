use std::fmt::{self, Write as _};

pub struct Bytes<'a>(pub &'a [u8]);

impl fmt::Display for Bytes<'_> {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if i != 0 {
                fmt.write_char(' ')?;
            }
            write!(fmt, "{b:02x}")?;
        }
        Ok(())
    }
}

/// Splits an instruction dump into the head (prefixes and code name) and
/// operand records.
fn fields(s: &str) -> Vec<&str> {
    let s = s.trim();
    let mut end = 0;
    for word in s.split(' ') {
        end += word.len();
        if !matches!(word, "lock" | "repe" | "repne") {
            break;
        }
        end += 1;
    }
    let (head, ops) = s.split_at(end.min(s.len()));
    let mut out = vec![head];
    out.extend(ops.split(", ").map(str::trim).filter(|s| !s.is_empty()));
    out
}

/// Operand-wise difference between an expected and a decoded instruction.
pub struct Diff<'a> {
    file: &'a str,
    line: usize,
    bytes: &'a [u8],
    expect: &'a str,
    result: &'a str,
}

impl<'a> Diff<'a> {
    pub fn new(
        file: &'a str,
        line: usize,
        bytes: &'a [u8],
        expect: &'a str,
        result: &'a str,
    ) -> Self {
        Self {
            file,
            line,
            bytes,
            expect,
            result,
        }
    }
}

impl fmt::Display for Diff<'_> {
    fn fmt(&self, out: &mut fmt::Formatter) -> fmt::Result {
        use diff::Result as E;

        if !self.file.is_empty() {
            writeln!(out, "  --> {}:{}", self.file, self.line)?;
        }
        if !self.bytes.is_empty() {
            writeln!(out, "  raw | {}", Bytes(self.bytes))?;
        }
        let expect = fields(self.expect);
        let result = fields(self.result);
        for diff in diff::slice(&expect, &result) {
            match diff {
                E::Left(l) => writeln!(out, "      - {l}")?,
                E::Both(l, _) => writeln!(out, "      | {l}")?,
                E::Right(r) => writeln!(out, "      + {r}")?,
            }
        }
        Ok(())
    }
}

pub fn check(file: &str, line: usize, left: &str, right: &str) -> Result<(), String> {
    if left != right {
        let err = "invalid result";
        eprintln!("error: {err}");
        eprintln!("{}", Diff::new(file, line, &[], left, right));
        return Err(err.to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_fields() {
        assert_eq!(
            fields("Add_Eq_Gq UInt64[ds:rax], rdx"),
            ["Add_Eq_Gq", "UInt64[ds:rax]", "rdx"]
        );
        assert_eq!(fields("Nopd"), ["Nopd"]);
        assert_eq!(
            fields("lock Xadd_Ed_Gd UInt32[ds:eax], ecx"),
            ["lock Xadd_Ed_Gd", "UInt32[ds:eax]", "ecx"]
        );
        assert_eq!(Bytes(&[0x0f, 0x0b]).to_string(), "0f 0b");
    }
}
