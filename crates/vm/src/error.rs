//! Runtime errors and recoverable faults for the sdvm VM.
//!
//! [`RuntimeError`] is fatal: it unwinds out of the dispatch loop to the
//! caller of [`Vm::start`](crate::Vm::start) or
//! [`Vm::run_method`](crate::Vm::run_method). [`Fault`] is recoverable:
//! the offending instruction becomes a no-op, the fault is logged and
//! recorded, and execution continues. Every variant that can be tied to
//! an instruction carries its byte pc as `at`.

use sdvm_common::DecodeError;
use sdvm_dex::DexError;
use thiserror::Error;

use crate::stack::StackError;

/// Errors that stop execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// The instruction at `at` does not decode.
    #[error("decode error at pc {at:#06x}: {source}")]
    Decode { at: usize, source: DecodeError },

    /// An instruction names a register past the end of the register file.
    #[error("register v{register} out of range at pc {at:#06x}")]
    RegisterOutOfRange { at: usize, register: usize },

    /// Call stack overflow, underflow or depth limit.
    #[error("stack error at pc {at:#06x}: {source}")]
    Stack { at: usize, source: StackError },

    /// The superclass chain of `class` loops back on itself.
    #[error("class hierarchy cycle through {class} at pc {at:#06x}")]
    ClassHierarchyCycle { at: usize, class: String },

    /// A user class is referenced but not defined in the dex file.
    #[error("class {class} not found at pc {at:#06x}")]
    ClassNotFound { at: usize, class: String },

    /// Integer division by zero.
    #[error("division by zero at pc {at:#06x}")]
    DivisionByZero { at: usize },

    /// A null reference was dereferenced.
    #[error("null reference at pc {at:#06x}")]
    NullReference { at: usize },

    /// A register holds something that is not a reference of the expected kind.
    #[error("reference {reference:#x} is not {expected} at pc {at:#06x}")]
    InvalidReference {
        at: usize,
        reference: u32,
        expected: &'static str,
    },

    /// A packed-switch payload is missing, has a bad ident, or is indexed
    /// outside its target table.
    #[error("malformed packed-switch at pc {at:#06x}")]
    MalformedSwitch { at: usize },

    /// A branch targets a negative pc.
    #[error("branch to {target} out of range at pc {at:#06x}")]
    BranchOutOfRange { at: usize, target: i64 },

    /// `new-array` with a negative length.
    #[error("negative array size {size} at pc {at:#06x}")]
    NegativeArraySize { at: usize, size: i32 },

    /// An invoke carries more arguments than a 35c instruction can marshal.
    #[error("{count} invoke arguments at pc {at:#06x} (max 5)")]
    TooManyArguments { at: usize, count: usize },

    /// A pool index did not resolve against the dex file.
    #[error("dex lookup failed: {source}")]
    Dex {
        #[from]
        source: DexError,
    },

    /// The requested entry method does not exist.
    #[error("entry method '{entry}' not found")]
    EntryNotFound { entry: String },

    /// A library call could not read or write its host stream.
    #[error("i/o error at pc {at:#06x}: {message}")]
    Io { at: usize, message: String },
}

/// Recoverable conditions. The instruction that raised one has no effect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
    #[error("no field {field} on {class} at pc {at:#06x}")]
    FieldNotFound {
        at: usize,
        class: String,
        field: String,
    },

    #[error("no static field {class}.{field} at pc {at:#06x}")]
    StaticFieldNotFound {
        at: usize,
        class: String,
        field: String,
    },

    #[error("no method found: {class}.{method} at pc {at:#06x}")]
    MethodNotFound {
        at: usize,
        class: String,
        method: String,
    },

    #[error("method {class}.{method} has no code at pc {at:#06x}")]
    NoCode {
        at: usize,
        class: String,
        method: String,
    },

    #[error("array index {index} out of bounds (length {length}) at pc {at:#06x}")]
    ArrayIndexOutOfBounds { at: usize, index: i32, length: u32 },

    #[error("string index {index} out of bounds (length {length}) at pc {at:#06x}")]
    StringIndexOutOfBounds { at: usize, index: i32, length: usize },
}
