//! VM state: registers, result buffer, call stack, heap and class registry.

use log::{debug, warn};
use sdvm_dex::DexFile;

use crate::class::{ClassObject, ClassRegistry};
use crate::config::VmConfig;
use crate::error::{Fault, RuntimeError};
use crate::heap::Heap;
use crate::javalib::JavaLang;
use crate::library::{NativeCall, NativeContext, NativeLibrary};
use crate::registers::{OrRegister, RegisterFile, ResultBuffer};
use crate::stack::CallStack;

/// The sdvm virtual machine.
///
/// One instance owns all mutable interpreter state; nothing is shared
/// between instances.
pub struct Vm<'a> {
    pub(crate) dex: &'a DexFile,
    pub(crate) config: VmConfig,
    pub(crate) registers: RegisterFile,
    pub(crate) result: ResultBuffer,
    pub(crate) stack: CallStack,
    pub(crate) heap: Heap,
    pub(crate) classes: ClassRegistry<'a>,
    pub(crate) library: Box<dyn NativeLibrary + 'a>,
    pub(crate) faults: Vec<Fault>,
    /// Byte offset of the current instruction in the running method.
    pub(crate) pc: usize,
    /// Number of active invokes.
    pub(crate) depth: usize,
    /// `registers_size` of the running method.
    pub(crate) frame_size: usize,
}

impl<'a> Vm<'a> {
    /// Create a VM whose library talks to the process's stdin and stdout.
    pub fn new(dex: &'a DexFile, config: VmConfig) -> Self {
        Self::with_library(dex, config, Box::new(JavaLang::stdio()))
    }

    pub fn with_library(
        dex: &'a DexFile,
        config: VmConfig,
        library: Box<dyn NativeLibrary + 'a>,
    ) -> Self {
        let stack = CallStack::new(config.stack_size);
        Self {
            dex,
            config,
            registers: RegisterFile::new(),
            result: ResultBuffer::new(),
            stack,
            heap: Heap::new(),
            classes: ClassRegistry::new(),
            library,
            faults: Vec::new(),
            pc: 0,
            depth: 0,
            frame_size: 0,
        }
    }

    // ---- Accessors ----

    pub fn dex(&self) -> &'a DexFile {
        self.dex
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn registers(&self) -> &RegisterFile {
        &self.registers
    }

    pub fn registers_mut(&mut self) -> &mut RegisterFile {
        &mut self.registers
    }

    pub fn result(&self) -> &ResultBuffer {
        &self.result
    }

    pub fn stack(&self) -> &CallStack {
        &self.stack
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn classes(&self) -> &ClassRegistry<'a> {
        &self.classes
    }

    /// Recoverable faults recorded since the last [`start`](Self::start).
    pub fn faults(&self) -> &[Fault] {
        &self.faults
    }

    pub fn take_faults(&mut self) -> Vec<Fault> {
        std::mem::take(&mut self.faults)
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    // ---- Lifecycle ----

    /// Zero all state: registers, result, stack pointers, heap, class
    /// registry and fault log.
    pub fn reset(&mut self) {
        self.registers.clear();
        self.result.clear();
        self.stack.reset();
        self.heap = Heap::new();
        self.classes.clear();
        self.faults.clear();
        self.pc = 0;
        self.depth = 0;
        self.frame_size = 0;
    }

    /// Run the method named `entry` from a freshly reset state.
    ///
    /// The name is looked up in the string table; the first method id with
    /// that name picks the class, whose direct method of that name runs.
    pub fn start(&mut self, entry: &str) -> Result<(), RuntimeError> {
        let dex = self.dex;
        let not_found = || RuntimeError::EntryNotFound {
            entry: entry.to_string(),
        };
        let name_idx = dex.find_string(entry).ok_or_else(not_found)?;
        let method_idx = dex.find_method_by_name(name_idx).ok_or_else(not_found)?;
        let class_idx = dex
            .methods
            .get(method_idx as usize)
            .map(|m| u32::from(m.class_idx))
            .ok_or_else(not_found)?;
        let method = dex
            .direct_method(class_idx, name_idx)
            .ok_or_else(not_found)?;

        self.reset();
        debug!("start {}.{}", dex.type_name(class_idx)?, entry);
        self.run_method(method)
    }

    /// Materialize a class, running its static initializer the first time.
    pub fn resolve_class(&mut self, name: &str) -> Result<&ClassObject<'a>, RuntimeError> {
        self.ensure_class(name)?;
        self.classes
            .get(name)
            .ok_or_else(|| RuntimeError::ClassNotFound {
                at: self.pc,
                class: name.to_string(),
            })
    }

    // ---- Helpers shared by the opcode handlers ----

    pub(crate) fn fault(&mut self, fault: Fault) {
        warn!("{fault}");
        self.faults.push(fault);
    }

    pub(crate) fn word(&self, register: usize) -> Result<[u8; 4], RuntimeError> {
        self.registers.load(register).or_register(self.pc, register)
    }

    pub(crate) fn set_word(&mut self, register: usize, word: [u8; 4]) -> Result<(), RuntimeError> {
        self.registers
            .store(register, word)
            .or_register(self.pc, register)
    }

    pub(crate) fn int(&self, register: usize) -> Result<i32, RuntimeError> {
        self.registers.get_int(register).or_register(self.pc, register)
    }

    pub(crate) fn set_int(&mut self, register: usize, value: i32) -> Result<(), RuntimeError> {
        self.registers
            .set_int(register, value)
            .or_register(self.pc, register)
    }

    pub(crate) fn reference(&self, register: usize) -> Result<u32, RuntimeError> {
        self.registers.get_ref(register).or_register(self.pc, register)
    }

    pub(crate) fn set_ref(&mut self, register: usize, reference: u32) -> Result<(), RuntimeError> {
        self.registers
            .set_ref(register, reference)
            .or_register(self.pc, register)
    }

    pub(crate) fn long(&self, register: usize) -> Result<i64, RuntimeError> {
        self.registers
            .get_long(register)
            .or_register(self.pc, register + 1)
    }

    pub(crate) fn set_long(&mut self, register: usize, value: i64) -> Result<(), RuntimeError> {
        self.registers
            .set_long(register, value)
            .or_register(self.pc, register + 1)
    }

    pub(crate) fn double(&self, register: usize) -> Result<f64, RuntimeError> {
        self.registers
            .get_double(register)
            .or_register(self.pc, register + 1)
    }

    pub(crate) fn set_double(&mut self, register: usize, value: f64) -> Result<(), RuntimeError> {
        self.registers
            .set_double(register, value)
            .or_register(self.pc, register + 1)
    }

    /// Split-borrow the VM into the view a library handler works on.
    pub(crate) fn native_context(
        &mut self,
    ) -> (&mut (dyn NativeLibrary + 'a), NativeContext<'_, 'a>) {
        let ctx = NativeContext {
            registers: &mut self.registers,
            result: &mut self.result,
            heap: &mut self.heap,
            classes: &mut self.classes,
            faults: &mut self.faults,
            pc: self.pc,
        };
        (self.library.as_mut(), ctx)
    }

    pub(crate) fn dispatch_native(&mut self, call: &NativeCall<'_>) -> Result<bool, RuntimeError> {
        let (library, mut ctx) = self.native_context();
        let handled = library.try_dispatch(&mut ctx, call)?;
        if handled {
            debug!("library {}.{}", call.class, call.method);
        }
        Ok(handled)
    }
}
