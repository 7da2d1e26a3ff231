//! The hook through which invokes and static fields of library classes
//! reach host code.
//!
//! Every invoke is offered to the [`NativeLibrary`] before user methods
//! are looked up. A handler reads its arguments from the caller's
//! registers and leaves its result in the result buffer, exactly as a
//! returning user method would.

use log::warn;
use sdvm_common::MAX_INVOKE_ARGS;

use crate::class::ClassRegistry;
use crate::error::{Fault, RuntimeError};
use crate::heap::{Heap, HeapObject, Instance};
use crate::object::allocate_array;
use crate::registers::{OrRegister, RegisterFile, ResultBuffer};

/// An invoke as seen by the library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeCall<'c> {
    /// Declaring type of the invoked method, e.g. `Ljava/io/PrintStream;`.
    pub class: &'c str,
    pub method: &'c str,
    /// Type of the first declared parameter, if any.
    pub param_type: Option<&'c str>,
    /// Argument registers of the invoke.
    pub args: [u8; MAX_INVOKE_ARGS],
    pub count: usize,
}

impl NativeCall<'_> {
    pub fn is(&self, class: &str, method: &str) -> bool {
        self.class == class && self.method == method
    }

    /// Register number of argument `n`.
    pub fn arg(&self, n: usize) -> usize {
        self.args.get(n).map_or(0, |&r| usize::from(r))
    }
}

/// Mutable view of the VM handed to library code.
pub struct NativeContext<'v, 'a> {
    pub registers: &'v mut RegisterFile,
    pub result: &'v mut ResultBuffer,
    pub heap: &'v mut Heap,
    pub classes: &'v mut ClassRegistry<'a>,
    pub faults: &'v mut Vec<Fault>,
    pub pc: usize,
}

impl NativeContext<'_, '_> {
    pub fn int(&self, register: usize) -> Result<i32, RuntimeError> {
        self.registers.get_int(register).or_register(self.pc, register)
    }

    pub fn reference(&self, register: usize) -> Result<u32, RuntimeError> {
        self.registers.get_ref(register).or_register(self.pc, register)
    }

    /// A wide argument split across two argument registers.
    pub fn long(&self, high: usize, low: usize) -> Result<i64, RuntimeError> {
        let high = self.registers.load_wide(high).or_register(self.pc, high)?;
        let low = self.registers.load_wide(low).or_register(self.pc, low)?;
        Ok(i64::from_le_bytes([
            low[0], low[1], low[2], low[3], high[0], high[1], high[2], high[3],
        ]))
    }

    /// The text of a string argument; `None` for null.
    pub fn string(&self, register: usize) -> Result<Option<String>, RuntimeError> {
        match self.reference(register)? {
            0 => Ok(None),
            reference => Ok(Some(self.heap.string(self.pc, reference)?.to_string())),
        }
    }

    /// Allocate an instance of a library class.
    pub fn new_instance(&mut self, class: &str) -> u32 {
        self.classes.register_library(class);
        self.heap
            .alloc(HeapObject::Instance(Instance::new(class, Vec::new())))
    }

    pub fn new_array(&mut self, descriptor: &str, count: i32) -> Result<u32, RuntimeError> {
        allocate_array(self.heap, self.classes, self.pc, descriptor, count)
    }

    /// Record a recoverable fault.
    pub fn fault(&mut self, fault: Fault) {
        warn!("{fault}");
        self.faults.push(fault);
    }
}

/// Host implementation of library classes.
pub trait NativeLibrary {
    /// Handle `call` if it names a known library method. Returning
    /// `Ok(false)` lets user method resolution proceed.
    fn try_dispatch(
        &mut self,
        ctx: &mut NativeContext<'_, '_>,
        call: &NativeCall<'_>,
    ) -> Result<bool, RuntimeError>;

    /// The value of a static field of a library class, or `None` if the
    /// library does not provide it.
    fn static_field(
        &mut self,
        ctx: &mut NativeContext<'_, '_>,
        class: &str,
        field: &str,
    ) -> Result<Option<u32>, RuntimeError>;
}
