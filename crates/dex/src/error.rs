//! Errors produced while reading a dex container or resolving its indices.

use thiserror::Error;

/// Errors from parsing a dex file or looking up one of its tables.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DexError {
    /// The file does not start with `dex\n` and a NUL-terminated version.
    #[error("bad magic: {0:02x?}")]
    BadMagic([u8; 8]),

    /// Only little-endian containers are supported.
    #[error("unsupported endian tag {0:#010x}")]
    BadEndianTag(u32),

    /// A read ran past the end of the input.
    #[error("truncated input: need {need} bytes at offset {offset:#x}, file has {len}")]
    Truncated { offset: usize, need: usize, len: usize },

    /// A ULEB128 value used more than five bytes.
    #[error("malformed uleb128 at offset {offset:#x}")]
    Leb128 { offset: usize },

    /// String data is not valid MUTF-8.
    #[error("malformed MUTF-8 string at offset {offset:#x}")]
    BadString { offset: usize },

    /// An index does not fit the table it refers to.
    #[error("{table} index {index} out of range ({len} entries)")]
    IndexOutOfRange {
        table: &'static str,
        index: u32,
        len: usize,
    },
}
