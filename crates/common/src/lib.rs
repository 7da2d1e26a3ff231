//! sdvm common types and instruction decoding.
//!
//! This crate provides the foundational data structures for the Dalvik-style
//! instruction set executed by `sdvm-vm`:
//!
//! - [`Opcode`]: every supported opcode with its byte value and mnemonic
//! - [`Format`]: operand layouts and encoded widths
//! - [`Instruction`]: a decoded instruction with decode/encode
//! - [`DecodeError`]: errors from decoding byte streams
//!
//! # Dependencies
//!
//! This crate uses `thiserror` and has no other dependencies.

pub mod error;
pub mod format;
pub mod instruction;
pub mod opcode;

// Re-export commonly used types at the crate root.
pub use error::DecodeError;
pub use format::{Format, PoolKind};
pub use instruction::{Instruction, MAX_INVOKE_ARGS};
pub use opcode::Opcode;
