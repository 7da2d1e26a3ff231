//! Main execution loop and opcode dispatch.

use log::trace;
use sdvm_common::{Instruction, Opcode};
use sdvm_dex::EncodedMethod;

use crate::config::SwitchBounds;
use crate::error::RuntimeError;
use crate::heap::HeapObject;
use crate::invoke::InvokeKind;
use crate::machine::Vm;

/// Ident of a packed-switch payload.
const PACKED_SWITCH_IDENT: u16 = 0x0100;

/// What the dispatch loop does after a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    /// Advance by the instruction's width.
    Next,
    /// Jump by a signed offset in 16-bit code units.
    Branch(i32),
    Return,
}

/// Relation tested by the comparison branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Relation {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
}

impl Relation {
    pub(crate) fn holds(self, x: i32, y: i32) -> bool {
        match self {
            Relation::Eq => x == y,
            Relation::Ne => x != y,
            Relation::Lt => x < y,
            Relation::Ge => x >= y,
            Relation::Gt => x > y,
            Relation::Le => x <= y,
        }
    }
}

// ---- Integer operations ----
//
// Each takes the pc for error reporting.

type IntOp = fn(usize, i32, i32) -> Result<i32, RuntimeError>;

fn add_int(_: usize, x: i32, y: i32) -> Result<i32, RuntimeError> {
    Ok(x.wrapping_add(y))
}

fn sub_int(_: usize, x: i32, y: i32) -> Result<i32, RuntimeError> {
    Ok(x.wrapping_sub(y))
}

fn mul_int(_: usize, x: i32, y: i32) -> Result<i32, RuntimeError> {
    Ok(x.wrapping_mul(y))
}

fn rsub_int(_: usize, x: i32, y: i32) -> Result<i32, RuntimeError> {
    Ok(y.wrapping_sub(x))
}

fn and_int(_: usize, x: i32, y: i32) -> Result<i32, RuntimeError> {
    Ok(x & y)
}

/// `y / z` computed as `(y - y % z) / z`, wrapping.
pub(crate) fn div_int(at: usize, y: i32, z: i32) -> Result<i32, RuntimeError> {
    if z == 0 {
        return Err(RuntimeError::DivisionByZero { at });
    }
    let rem = y.wrapping_rem(z);
    Ok(y.wrapping_sub(rem).wrapping_div(z))
}

pub(crate) fn rem_int(at: usize, y: i32, z: i32) -> Result<i32, RuntimeError> {
    if z == 0 {
        return Err(RuntimeError::DivisionByZero { at });
    }
    Ok(y.wrapping_rem(z))
}

fn le_u16(code: &[u8], at: usize) -> Option<u16> {
    let bytes = code.get(at..at.checked_add(2)?)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn le_i32(code: &[u8], at: usize) -> Option<i32> {
    let bytes = code.get(at..at.checked_add(4)?)?;
    Some(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

impl<'a> Vm<'a> {
    /// Execute `method` until it returns or runs off the end of its code.
    ///
    /// The caller is responsible for the register frame; see the invoke
    /// protocol for how callees are set up.
    pub fn run_method(&mut self, method: &'a EncodedMethod) -> Result<(), RuntimeError> {
        let Some(code) = method.code.as_ref() else {
            return Ok(());
        };
        let insns = code.insns.as_slice();
        self.pc = 0;
        self.frame_size = usize::from(code.registers_size);

        while self.pc < insns.len() {
            let instr = Instruction::decode(insns, self.pc)
                .map_err(|source| RuntimeError::Decode { at: self.pc, source })?;
            trace!("{:04x}: {}", self.pc, instr);

            match self.step(&instr, insns)? {
                Flow::Next => self.pc += instr.width(),
                Flow::Branch(units) => {
                    let target = self.pc as i64 + i64::from(units) * 2;
                    if target < 0 {
                        return Err(RuntimeError::BranchOutOfRange {
                            at: self.pc,
                            target,
                        });
                    }
                    self.pc = target as usize;
                }
                Flow::Return => return Ok(()),
            }
        }
        Ok(())
    }

    fn step(&mut self, instr: &Instruction, insns: &[u8]) -> Result<Flow, RuntimeError> {
        let a = usize::from(instr.a);
        let b = usize::from(instr.b);
        let c = usize::from(instr.c);
        let lit = instr.operand;
        let dex = self.dex;

        match instr.opcode {
            Opcode::Nop => {}

            // ---- Moves and returns ----
            Opcode::Move | Opcode::MoveObject => {
                let word = self.word(b)?;
                self.set_word(a, word)?;
            }
            Opcode::MoveWide => {
                let high = self.word(b)?;
                let low = self.word(b + 1)?;
                self.set_word(a, high)?;
                self.set_word(a + 1, low)?;
            }
            Opcode::MoveResult | Opcode::MoveResultObject => {
                let word = self.result.word();
                self.set_word(a, word)?;
            }
            Opcode::MoveResultWide => {
                let (high, low) = self.result.pair();
                self.set_word(a, high)?;
                self.set_word(a + 1, low)?;
            }
            Opcode::ReturnVoid => return Ok(Flow::Return),
            Opcode::Return | Opcode::ReturnObject => {
                let word = self.word(a)?;
                self.result.set_word(word);
                return Ok(Flow::Return);
            }
            Opcode::ReturnWide => {
                let high = self.word(a)?;
                let low = self.word(a + 1)?;
                self.result.set_pair(high, low);
                return Ok(Flow::Return);
            }

            // ---- Constants ----
            Opcode::Const4 | Opcode::Const16 | Opcode::Const => self.set_int(a, lit)?,
            Opcode::ConstWide16 | Opcode::ConstWide32 => self.set_long(a, i64::from(lit))?,
            Opcode::ConstWideHigh16 => self.set_long(a, i64::from(lit) << 48)?,
            Opcode::ConstString => {
                let id = u32::from(instr.index());
                let text = dex.string(id)?;
                let reference = self.heap.intern_string(id, text);
                self.set_ref(a, reference)?;
            }
            Opcode::ConstClass => {
                let name = dex.type_name(u32::from(instr.index()))?;
                if dex.class_def_by_name(name).is_some() {
                    self.ensure_class(name)?;
                }
                let mirror = self.heap.class_mirror(name);
                self.set_ref(a, mirror)?;
            }

            // ---- Objects and arrays ----
            Opcode::NewInstance => {
                let name = dex.type_name(u32::from(instr.index()))?;
                let reference = self.instantiate(name)?;
                self.set_ref(a, reference)?;
            }
            Opcode::NewArray => {
                let count = self.int(b)?;
                let name = dex.type_name(u32::from(instr.index()))?;
                let reference = self.new_array(name, count)?;
                self.set_ref(a, reference)?;
            }
            Opcode::FilledNewArray => self.exec_filled_new_array(instr)?,
            Opcode::ArrayLength => {
                let array = self.reference(b)?;
                let length = self.heap.array(self.pc, array)?.length;
                self.set_int(a, length as i32)?;
            }
            Opcode::Aget
            | Opcode::AgetObject
            | Opcode::AgetBoolean
            | Opcode::AgetByte
            | Opcode::AgetChar
            | Opcode::AgetShort => self.exec_aget(instr, false)?,
            Opcode::AgetWide => self.exec_aget(instr, true)?,
            Opcode::Aput
            | Opcode::AputObject
            | Opcode::AputBoolean
            | Opcode::AputByte
            | Opcode::AputChar
            | Opcode::AputShort => self.exec_aput(instr, false)?,
            Opcode::AputWide => self.exec_aput(instr, true)?,

            // ---- Fields ----
            Opcode::Iget
            | Opcode::IgetObject
            | Opcode::IgetBoolean
            | Opcode::IgetByte
            | Opcode::IgetChar
            | Opcode::IgetShort => self.exec_iget(instr, false)?,
            Opcode::IgetWide => self.exec_iget(instr, true)?,
            Opcode::Iput
            | Opcode::IputObject
            | Opcode::IputBoolean
            | Opcode::IputByte
            | Opcode::IputChar
            | Opcode::IputShort => self.exec_iput(instr, false)?,
            Opcode::IputWide => self.exec_iput(instr, true)?,
            Opcode::Sget
            | Opcode::SgetObject
            | Opcode::SgetBoolean
            | Opcode::SgetByte
            | Opcode::SgetChar
            | Opcode::SgetShort => self.exec_sget(instr, false)?,
            Opcode::SgetWide => self.exec_sget(instr, true)?,
            Opcode::Sput
            | Opcode::SputObject
            | Opcode::SputBoolean
            | Opcode::SputByte
            | Opcode::SputChar
            | Opcode::SputShort => self.exec_sput(instr, false)?,
            Opcode::SputWide => self.exec_sput(instr, true)?,

            // ---- Control flow ----
            Opcode::Goto | Opcode::Goto16 | Opcode::Goto32 => return Ok(Flow::Branch(lit)),
            Opcode::PackedSwitch => return self.exec_packed_switch(a, lit, insns),
            Opcode::IfEq => return self.exec_if(Relation::Eq, a, Some(b), lit),
            Opcode::IfNe => return self.exec_if(Relation::Ne, a, Some(b), lit),
            Opcode::IfLt => return self.exec_if(Relation::Lt, a, Some(b), lit),
            Opcode::IfGe => return self.exec_if(Relation::Ge, a, Some(b), lit),
            Opcode::IfGt => return self.exec_if(Relation::Gt, a, Some(b), lit),
            Opcode::IfLe => return self.exec_if(Relation::Le, a, Some(b), lit),
            Opcode::IfEqz => return self.exec_if(Relation::Eq, a, None, lit),
            Opcode::IfNez => return self.exec_if(Relation::Ne, a, None, lit),
            Opcode::IfLtz => return self.exec_if(Relation::Lt, a, None, lit),
            Opcode::IfGez => return self.exec_if(Relation::Ge, a, None, lit),
            Opcode::IfGtz => return self.exec_if(Relation::Gt, a, None, lit),
            Opcode::IfLez => return self.exec_if(Relation::Le, a, None, lit),

            // ---- Invokes ----
            Opcode::InvokeVirtual => self.exec_invoke(instr, InvokeKind::Virtual)?,
            Opcode::InvokeDirect => self.exec_invoke(instr, InvokeKind::Direct)?,
            Opcode::InvokeStatic => self.exec_invoke(instr, InvokeKind::Static)?,

            // ---- Conversions ----
            Opcode::IntToDouble => {
                let value = self.int(b)?;
                self.set_double(a, f64::from(value))?;
            }
            Opcode::DoubleToInt => {
                let value = self.double(b)?;
                self.set_int(a, value as i32)?;
            }

            // ---- Integer arithmetic ----
            Opcode::AddInt => self.exec_binop(a, b, Operand::Reg(c), add_int)?,
            Opcode::SubInt => self.exec_binop(a, b, Operand::Reg(c), sub_int)?,
            Opcode::MulInt => self.exec_binop(a, b, Operand::Reg(c), mul_int)?,
            Opcode::DivInt => self.exec_binop(a, b, Operand::Reg(c), div_int)?,
            Opcode::RemInt => self.exec_binop(a, b, Operand::Reg(c), rem_int)?,
            Opcode::AddInt2Addr => self.exec_binop(a, a, Operand::Reg(b), add_int)?,
            Opcode::SubInt2Addr => self.exec_binop(a, a, Operand::Reg(b), sub_int)?,
            Opcode::MulInt2Addr => self.exec_binop(a, a, Operand::Reg(b), mul_int)?,
            Opcode::AddIntLit8 => self.exec_binop(a, b, Operand::Lit(lit), add_int)?,
            Opcode::RsubIntLit8 => self.exec_binop(a, b, Operand::Lit(lit), rsub_int)?,
            Opcode::MulIntLit8 => self.exec_binop(a, b, Operand::Lit(lit), mul_int)?,
            Opcode::DivIntLit8 => self.exec_binop(a, b, Operand::Lit(lit), div_int)?,
            Opcode::RemIntLit8 => self.exec_binop(a, b, Operand::Lit(lit), rem_int)?,
            Opcode::AndIntLit8 => self.exec_binop(a, b, Operand::Lit(lit), and_int)?,

            // ---- Double arithmetic ----
            Opcode::AddDouble2Addr => {
                let sum = self.double(a)? + self.double(b)?;
                self.set_double(a, sum)?;
            }
            Opcode::MulDouble2Addr => {
                let product = self.double(a)? * self.double(b)?;
                self.set_double(a, product)?;
            }
        }
        Ok(Flow::Next)
    }

    fn exec_binop(
        &mut self,
        dest: usize,
        src: usize,
        rhs: Operand,
        op: IntOp,
    ) -> Result<(), RuntimeError> {
        let x = self.int(src)?;
        let y = match rhs {
            Operand::Reg(r) => self.int(r)?,
            Operand::Lit(value) => value,
        };
        let value = op(self.pc, x, y)?;
        self.set_int(dest, value)
    }

    /// Compare `va` with `vb`, or with zero when `b` is `None`.
    fn exec_if(
        &self,
        relation: Relation,
        a: usize,
        b: Option<usize>,
        offset: i32,
    ) -> Result<Flow, RuntimeError> {
        let x = self.int(a)?;
        let y = match b {
            Some(b) => self.int(b)?,
            None => 0,
        };
        Ok(if relation.holds(x, y) {
            Flow::Branch(offset)
        } else {
            Flow::Next
        })
    }

    fn exec_packed_switch(
        &self,
        a: usize,
        offset: i32,
        insns: &[u8],
    ) -> Result<Flow, RuntimeError> {
        let at = self.pc;
        let malformed = || RuntimeError::MalformedSwitch { at };
        let payload =
            usize::try_from(at as i64 + i64::from(offset) * 2).map_err(|_| malformed())?;
        if le_u16(insns, payload) != Some(PACKED_SWITCH_IDENT) {
            return Err(malformed());
        }
        let size = le_u16(insns, payload + 2).ok_or_else(malformed)?;
        let first_key = le_i32(insns, payload + 4).ok_or_else(malformed)?;

        let value = i64::from(self.int(a)?);
        let first = i64::from(first_key);
        let end = first + i64::from(size);
        let hit = match self.config.switch_bounds {
            SwitchBounds::Strict => value >= first && value < end,
            SwitchBounds::Legacy => value >= first || value < end,
        };
        if !hit {
            return Ok(Flow::Next);
        }
        let index = value - first;
        if index < 0 || index >= i64::from(size) {
            return Err(malformed());
        }
        let target = le_i32(insns, payload + 8 + index as usize * 4).ok_or_else(malformed)?;
        Ok(Flow::Branch(target))
    }

    fn exec_filled_new_array(&mut self, instr: &Instruction) -> Result<(), RuntimeError> {
        let dex = self.dex;
        let name = dex.type_name(u32::from(instr.index()))?;
        let args = instr.arg_registers();
        let mut words = Vec::with_capacity(args.len());
        for &register in args {
            words.push(self.word(usize::from(register))?);
        }
        let reference = self.new_array(name, words.len() as i32)?;
        if let Some(HeapObject::Array(array)) = self.heap.get_mut(reference) {
            for (slot, word) in array.slots.iter_mut().zip(words) {
                *slot = word;
            }
        }
        self.result.set_ref(reference);
        Ok(())
    }
}

/// Right-hand side of an integer operation.
#[derive(Debug, Clone, Copy)]
enum Operand {
    Reg(usize),
    Lit(i32),
}
