//! Decode errors for Dalvik instruction streams.

use thiserror::Error;

/// Errors that occur while decoding a single instruction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The opcode byte is not part of the supported instruction set.
    #[error("unknown opcode: {0:#04x}")]
    UnknownOpcode(u8),

    /// The code buffer ends before the instruction's encoded width.
    #[error("truncated instruction at pc {pc:#06x}: needs {width} bytes, buffer has {len}")]
    Truncated { pc: usize, width: usize, len: usize },
}
