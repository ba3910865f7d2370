use crate::{
    error::{Error, Invalid},
    INSN_MAX_LEN,
};

/// Little-endian reader over the bytes of a single instruction.
///
/// The cursor starts at the first byte of the instruction, so `offset` is
/// always the number of bytes consumed so far. Reads past the end of the
/// buffer fail with [`Error::More`], reads past the architectural limit fail
/// with [`Invalid::TooLong`].
#[derive(Clone, Debug)]
pub struct Bytes<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Bytes<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Returns bytes consumed so far.
    pub fn consumed(&self) -> &'a [u8] {
        &self.data[..self.offset]
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    pub fn peek_u8(&self) -> Option<u8> {
        if self.offset < INSN_MAX_LEN {
            self.data.get(self.offset).copied()
        } else {
            None
        }
    }

    pub fn read(&mut self, len: usize) -> Result<&'a [u8], Error> {
        let end = self.offset + len;
        if end > INSN_MAX_LEN {
            return Err(Error::InvalidEncoding(Invalid::TooLong));
        }
        if end > self.data.len() {
            return Err(Error::More(end));
        }
        let bytes = &self.data[self.offset..end];
        self.offset = end;
        Ok(bytes)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], Error> {
        let mut raw = [0; N];
        raw.copy_from_slice(self.read(N)?);
        Ok(raw)
    }

    pub fn read_u8(&mut self) -> Result<u8, Error> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, Error> {
        Ok(u16::from_le_bytes(self.read_array::<2>()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, Error> {
        Ok(u32::from_le_bytes(self.read_array::<4>()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, Error> {
        Ok(u64::from_le_bytes(self.read_array::<8>()?))
    }

    pub fn read_i8(&mut self) -> Result<i8, Error> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_i16(&mut self) -> Result<i16, Error> {
        Ok(self.read_u16()? as i16)
    }

    pub fn read_i32(&mut self) -> Result<i32, Error> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_i64(&mut self) -> Result<i64, Error> {
        Ok(self.read_u64()? as i64)
    }
}
