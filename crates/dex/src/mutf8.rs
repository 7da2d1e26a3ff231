//! Modified UTF-8, the string encoding of dex string data.
//!
//! Differs from UTF-8 in two ways: NUL is encoded as `C0 80`, and
//! supplementary characters are stored as two 3-byte surrogate halves.

use crate::error::DexError;

/// Decode a NUL-terminated MUTF-8 string starting at `offset`.
pub(crate) fn decode(data: &[u8], offset: usize) -> Result<String, DexError> {
    let bad = || DexError::BadString { offset };
    let mut units: Vec<u16> = Vec::new();
    let mut i = offset;
    loop {
        let b0 = *data.get(i).ok_or_else(bad)?;
        if b0 == 0 {
            break;
        }
        let cont = |at: usize| -> Result<u16, DexError> {
            match data.get(at) {
                Some(&b) if b & 0xc0 == 0x80 => Ok(u16::from(b & 0x3f)),
                _ => Err(bad()),
            }
        };
        match b0 >> 4 {
            0x0..=0x7 => {
                units.push(u16::from(b0));
                i += 1;
            }
            0xc | 0xd => {
                units.push((u16::from(b0 & 0x1f) << 6) | cont(i + 1)?);
                i += 2;
            }
            0xe => {
                units.push((u16::from(b0 & 0x0f) << 12) | (cont(i + 1)? << 6) | cont(i + 2)?);
                i += 3;
            }
            _ => return Err(bad()),
        }
    }
    String::from_utf16(&units).map_err(|_| bad())
}

/// Encode `text` as MUTF-8 (without the terminating NUL). Returns the
/// encoded bytes and the UTF-16 length that prefixes string data.
pub(crate) fn encode(text: &str) -> (Vec<u8>, u32) {
    let mut out = Vec::with_capacity(text.len());
    let mut units = 0u32;
    for unit in text.encode_utf16() {
        units += 1;
        match unit {
            0x01..=0x7f => out.push(unit as u8),
            0x00 | 0x80..=0x7ff => {
                out.push(0xc0 | (unit >> 6) as u8);
                out.push(0x80 | (unit & 0x3f) as u8);
            }
            _ => {
                out.push(0xe0 | (unit >> 12) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3f) as u8);
                out.push(0x80 | (unit & 0x3f) as u8);
            }
        }
    }
    (out, units)
}
