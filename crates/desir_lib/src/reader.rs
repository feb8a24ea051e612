use byteorder::{ByteOrder, LittleEndian};

use crate::error::DesirError;

/// Maximum number of 7-bit groups in a literal varint.
pub const MAX_VARINT_GROUPS: usize = 5;

/// Bounds-checked little-endian cursor over an image buffer. Positions are
/// absolute offsets into the buffer.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn at(buf: &'a [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    fn need(&self, n: usize) -> Result<(), DesirError> {
        if self.remaining() < n {
            return Err(DesirError::Eof { offset: self.pos, needed: n });
        }
        Ok(())
    }

    pub fn get_u8(&mut self) -> Result<u8, DesirError> {
        self.need(1)?;
        let v = self.buf[self.pos];
        self.pos += 1;
        Ok(v)
    }

    pub fn get_u16(&mut self) -> Result<u16, DesirError> {
        self.need(2)?;
        let v = LittleEndian::read_u16(&self.buf[self.pos..self.pos + 2]);
        self.pos += 2;
        Ok(v)
    }

    pub fn get_i16(&mut self) -> Result<i16, DesirError> {
        self.need(2)?;
        let v = LittleEndian::read_i16(&self.buf[self.pos..self.pos + 2]);
        self.pos += 2;
        Ok(v)
    }

    pub fn get_u32(&mut self) -> Result<u32, DesirError> {
        self.need(4)?;
        let v = LittleEndian::read_u32(&self.buf[self.pos..self.pos + 4]);
        self.pos += 4;
        Ok(v)
    }

    pub fn get_bytes(&mut self, n: usize) -> Result<&'a [u8], DesirError> {
        self.need(n)?;
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    /// Returns the bytes up to (not including) the next NUL and steps past it.
    pub fn get_cstr(&mut self) -> Result<&'a [u8], DesirError> {
        let start = self.pos;
        let rest = self.buf.get(start..).unwrap_or_default();
        let len = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(DesirError::UnterminatedString(start))?;
        self.pos += len + 1;
        Ok(&rest[..len])
    }

    /// Little-endian base-128 integer, at most `MAX_VARINT_GROUPS` groups.
    /// `op_offset` is the owning instruction, used for error reporting.
    pub fn get_varint(&mut self, op_offset: u32) -> Result<u64, DesirError> {
        let mut result: u64 = 0;
        for group in 0..MAX_VARINT_GROUPS {
            let b = self.get_u8()?;
            result |= u64::from(b & 0x7f) << (7 * group);
            if (b & 0x80) == 0 {
                return Ok(result);
            }
        }
        Err(DesirError::VarintTooLong { offset: op_offset })
    }
}
