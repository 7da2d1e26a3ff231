//! sdvm virtual machine: executes Dalvik bytecode straight from dex metadata.
//!
//! The VM is a register machine with:
//! - 32 four-byte registers and an 8-byte result buffer
//! - A byte-addressed call stack that saves caller frames across invokes
//! - An append-only heap of instances, arrays, strings and class mirrors
//! - Lazily materialized classes with vtables and static initializers
//! - A [`NativeLibrary`] hook that emulates `java.lang` and `java.io`
//!
//! Errors come in two kinds. A [`RuntimeError`] aborts execution; a
//! [`Fault`] (missing field or method, out-of-bounds index) is recorded
//! and execution continues.
//!
//! # Usage
//!
//! ```
//! use sdvm_dex::{CodeItem, DexBuilder, ACC_STATIC};
//! use sdvm_vm::{Vm, VmConfig};
//!
//! let mut b = DexBuilder::new();
//! let class = b.class("LMain;", Some("Ljava/lang/Object;"));
//! let main = b.method("LMain;", "main", "V", &[]);
//! // const/4 v0, 5 ; add-int/lit8 v0, v0, 2 ; return-void
//! let code = vec![0x12, 0x50, 0xd8, 0x00, 0x00, 0x02, 0x0e, 0x00];
//! b.add_direct_method(class, main, ACC_STATIC, Some(CodeItem::new(1, 0, code)));
//! let dex = b.build();
//!
//! let mut vm = Vm::new(&dex, VmConfig::default());
//! vm.start("main").unwrap();
//! assert_eq!(vm.registers().get_int(0), Some(7));
//! ```

pub mod class;
pub mod config;
pub mod error;
pub mod heap;
pub mod javalib;
pub mod library;
pub mod registers;
pub mod stack;

mod execute;
mod invoke;
mod machine;
mod object;

pub use class::{ClassKind, ClassObject, ClassRegistry};
pub use config::{SwitchBounds, VmConfig};
pub use error::{Fault, RuntimeError};
pub use heap::{Heap, HeapObject};
pub use javalib::JavaLang;
pub use library::{NativeCall, NativeContext, NativeLibrary};
pub use machine::Vm;
pub use registers::{RegisterFile, ResultBuffer, NUM_REGISTERS};
pub use stack::{CallStack, StackError};

use sdvm_dex::DexFile;

/// Run the method named `entry` with the default configuration and the
/// process's stdin and stdout.
///
/// Returns the recoverable faults recorded during the run.
///
/// # Errors
///
/// Returns [`RuntimeError`] if the entry method does not exist or
/// execution hits a fatal condition (division by zero, null reference,
/// stack overflow, malformed bytecode, etc.).
pub fn run(dex: &DexFile, entry: &str) -> Result<Vec<Fault>, RuntimeError> {
    let mut vm = Vm::new(dex, VmConfig::default());
    vm.start(entry)?;
    Ok(vm.take_faults())
}
