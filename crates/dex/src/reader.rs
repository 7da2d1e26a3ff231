//! Bounds-checked little-endian cursor over the raw file bytes.

use crate::error::DexError;

#[derive(Debug, Clone)]
pub(crate) struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Cursor positioned at `offset` (an absolute file offset).
    pub(crate) fn at(data: &'a [u8], offset: usize) -> Self {
        Self { data, pos: offset }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn bytes(&mut self, need: usize) -> Result<&'a [u8], DexError> {
        let end = self.pos.checked_add(need).filter(|&end| end <= self.data.len());
        let end = end.ok_or(DexError::Truncated {
            offset: self.pos,
            need,
            len: self.data.len(),
        })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub(crate) fn u8(&mut self) -> Result<u8, DexError> {
        Ok(self.bytes(1)?[0])
    }

    pub(crate) fn u16(&mut self) -> Result<u16, DexError> {
        let b = self.bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub(crate) fn u32(&mut self) -> Result<u32, DexError> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Unsigned LEB128, at most five bytes.
    pub(crate) fn uleb128(&mut self) -> Result<u32, DexError> {
        let start = self.pos;
        let mut value = 0u32;
        for i in 0..5 {
            let byte = self.u8()?;
            value |= u32::from(byte & 0x7f) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(DexError::Leb128 { offset: start })
    }
}
