//! Error types for the sdvm assembler.

use sdvm_common::DecodeError;
use thiserror::Error;

/// Errors produced while assembling text or disassembling bytes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AsmError {
    /// An unrecognized opcode mnemonic was encountered.
    #[error("line {line}: unknown opcode '{token}'")]
    UnknownOpcode { line: usize, token: String },

    /// An instruction ended before all of its operands were given.
    #[error("line {line}: {opcode} expects {expected}")]
    MissingOperand {
        line: usize,
        opcode: &'static str,
        expected: &'static str,
    },

    /// A numeric literal could not be parsed.
    #[error("line {line}: invalid number '{token}'")]
    InvalidNumber { line: usize, token: String },

    /// A register number does not fit the operand's width.
    #[error("line {line}: register v{register} out of range (max v{max})")]
    RegisterOutOfRange { line: usize, register: u32, max: u32 },

    /// A literal or offset does not fit the operand's width.
    #[error("line {line}: value {value} out of range")]
    ValueOutOfRange { line: usize, value: i64 },

    /// A pool reference names the wrong pool for the opcode.
    #[error("line {line}: expected a {expected}@ reference, found '{token}'")]
    WrongPool {
        line: usize,
        expected: &'static str,
        token: String,
    },

    /// A token appeared where it was not expected.
    #[error("line {line}: unexpected token '{token}'")]
    UnexpectedToken { line: usize, token: String },

    /// The bytes being disassembled do not decode.
    #[error("offset {offset:#06x}: {source}")]
    Decode { offset: usize, source: DecodeError },
}
