//! The invoke protocol.
//!
//! ```text
//! operands -> library dispatch -> resolve target -> marshal args
//!          -> push frame -> run callee -> pop frame
//! ```
//!
//! The callee leaves its return value in the result buffer; the caller
//! picks it up with the `move-result` family.

use log::debug;
use sdvm_common::{Instruction, MAX_INVOKE_ARGS};
use sdvm_dex::EncodedMethod;

use crate::class::OBJECT_CLASS;
use crate::error::{Fault, RuntimeError};
use crate::heap::HeapObject;
use crate::library::NativeCall;
use crate::machine::Vm;
use crate::registers::{OrRegister, NUM_REGISTERS};
use crate::stack::StackError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InvokeKind {
    Virtual,
    Direct,
    Static,
}

impl<'a> Vm<'a> {
    pub(crate) fn exec_invoke(
        &mut self,
        instr: &Instruction,
        kind: InvokeKind,
    ) -> Result<(), RuntimeError> {
        let count = usize::from(instr.a);
        if count > MAX_INVOKE_ARGS {
            return Err(RuntimeError::TooManyArguments { at: self.pc, count });
        }
        let dex = self.dex;
        let method_idx = u32::from(instr.index());
        let target = dex.method(method_idx)?;
        let proto = dex.proto(target.proto_idx)?;

        let call = NativeCall {
            class: target.class,
            method: target.name,
            param_type: proto.parameters.first().copied(),
            args: instr.args,
            count,
        };
        if self.dispatch_native(&call)? {
            return Ok(());
        }

        let method = match kind {
            InvokeKind::Virtual => self.virtual_target(instr.arg_registers(), target.name)?,
            InvokeKind::Direct | InvokeKind::Static => dex
                .methods
                .get(method_idx as usize)
                .and_then(|id| dex.direct_method(u32::from(id.class_idx), id.name_idx)),
        };
        match method {
            Some(method) => {
                self.call_method(target.class, target.name, method, instr.arg_registers())
            }
            None => {
                if target.class != OBJECT_CLASS {
                    self.fault(Fault::MethodNotFound {
                        at: self.pc,
                        class: target.class.to_string(),
                        method: target.name.to_string(),
                    });
                }
                Ok(())
            }
        }
    }

    /// Look `name` up in the vtable of the receiver's class.
    fn virtual_target(
        &self,
        args: &[u8],
        name: &str,
    ) -> Result<Option<&'a EncodedMethod>, RuntimeError> {
        let receiver_reg = args.first().map_or(0, |&r| usize::from(r));
        let receiver = self.reference(receiver_reg)?;
        let class = match self.heap.get(receiver) {
            Some(HeapObject::Instance(instance)) => &instance.class,
            // Strings, arrays and mirrors only have library methods.
            Some(_) => return Ok(None),
            None if receiver == 0 => return Err(RuntimeError::NullReference { at: self.pc }),
            None => {
                return Err(RuntimeError::InvalidReference {
                    at: self.pc,
                    reference: receiver,
                    expected: "an object",
                })
            }
        };
        Ok(self
            .classes
            .get(class)
            .and_then(|c| c.vtable_entry(name))
            .map(|entry| entry.method))
    }

    /// Run a resolved user method with the given caller argument registers.
    ///
    /// The callee's `ins_size` highest registers receive the arguments and
    /// every lower register is zeroed. The caller's registers, pc and frame
    /// pointer are saved on the call stack and restored when the callee
    /// finishes, whether or not it executed a return instruction.
    pub(crate) fn call_method(
        &mut self,
        class: &str,
        name: &str,
        method: &'a EncodedMethod,
        args: &[u8],
    ) -> Result<(), RuntimeError> {
        let at = self.pc;
        let Some(code) = method.code.as_ref() else {
            self.fault(Fault::NoCode {
                at,
                class: class.to_string(),
                method: name.to_string(),
            });
            return Ok(());
        };
        if self.depth >= self.config.max_call_depth {
            return Err(RuntimeError::Stack {
                at,
                source: StackError::TooDeep {
                    limit: self.config.max_call_depth,
                },
            });
        }

        let mut values = [[0u8; 4]; MAX_INVOKE_ARGS];
        for (value, &register) in values.iter_mut().zip(args) {
            *value = self.word(usize::from(register))?;
        }

        let registers_size = usize::from(code.registers_size);
        let ins = usize::from(code.ins_size);
        let spill = self.frame_size.max(registers_size).min(NUM_REGISTERS);
        self.stack
            .push_frame(at, &self.registers, spill)
            .map_err(|source| RuntimeError::Stack { at, source })?;
        debug!(
            "invoke {class}.{name}: {} args, {registers_size} registers, depth {}",
            args.len(),
            self.depth + 1
        );

        self.registers.clear();
        let base = registers_size.saturating_sub(ins);
        for i in 0..ins {
            let word = if i < args.len() { values[i] } else { [0; 4] };
            self.registers
                .store(base + i, word)
                .or_register(at, base + i)?;
        }

        let saved_frame_size = self.frame_size;
        self.depth += 1;
        self.run_method(method)?;
        self.depth -= 1;

        let return_pc = self
            .stack
            .pop_frame(&mut self.registers)
            .map_err(|source| RuntimeError::Stack {
                at: self.pc,
                source,
            })?;
        self.pc = return_pc;
        self.frame_size = saved_frame_size;
        Ok(())
    }
}
