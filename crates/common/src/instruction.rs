//! Decoding and encoding of single Dalvik instructions.
//!
//! Instructions are variable width (2, 4 or 6 bytes) and little-endian.
//! The operand layout is fixed by the opcode's [`Format`]:
//! ```text
//! 12x   op  B|A                  two 4-bit registers (A in the low nibble)
//! 23x   op  AA  BB  CC           three 8-bit registers
//! 22c   op  B|A CCCC             two 4-bit registers and a pool index
//! 35c   op  A|G BBBB F|E D|C     argument count, pool index, five registers
//! ```
//! Decoded operands are normalized into the flat [`Instruction`] struct so
//! the VM and the disassembler can read them without re-parsing bytes.

use std::fmt;

use crate::error::DecodeError;
use crate::format::Format;
use crate::opcode::Opcode;

/// Maximum number of argument registers carried by a 35c instruction.
pub const MAX_INVOKE_ARGS: usize = 5;

/// A single decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    /// The operation to perform.
    pub opcode: Opcode,
    /// vA / vAA, or the argument count for 35c.
    pub a: u8,
    /// vB / vBB.
    pub b: u8,
    /// vCC for 23x.
    pub c: u8,
    /// Literal, branch offset (in 16-bit code units) or pool index,
    /// depending on the format. Signed formats are sign-extended.
    pub operand: i32,
    /// Argument registers C, D, E, F, G of a 35c instruction.
    pub args: [u8; MAX_INVOKE_ARGS],
}

fn le16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn le32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

impl Instruction {
    /// Create an instruction with every operand zeroed.
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            a: 0,
            b: 0,
            c: 0,
            operand: 0,
            args: [0; MAX_INVOKE_ARGS],
        }
    }

    /// Encoded width in bytes.
    pub fn width(&self) -> usize {
        self.opcode.format().width()
    }

    /// The 16-bit pool index of a 21c, 22c or 35c instruction.
    pub fn index(&self) -> u16 {
        self.operand as u16
    }

    /// The argument registers actually used by a 35c instruction.
    pub fn arg_registers(&self) -> &[u8] {
        let count = usize::from(self.a).min(MAX_INVOKE_ARGS);
        &self.args[..count]
    }

    /// Decode the instruction starting at byte offset `pc` of `code`.
    pub fn decode(code: &[u8], pc: usize) -> Result<Self, DecodeError> {
        let byte = *code.get(pc).ok_or(DecodeError::Truncated {
            pc,
            width: 1,
            len: code.len(),
        })?;
        let opcode = Opcode::try_from(byte)?;
        let format = opcode.format();
        let width = format.width();
        let bytes = code.get(pc..pc + width).ok_or(DecodeError::Truncated {
            pc,
            width,
            len: code.len(),
        })?;

        let low = bytes[1] & 0x0f;
        let high = bytes[1] >> 4;
        let mut instr = Instruction::new(opcode);

        match format {
            Format::F10x => {}
            Format::F12x => {
                instr.a = low;
                instr.b = high;
            }
            Format::F11n => {
                instr.a = low;
                instr.operand = i32::from((bytes[1] as i8) >> 4);
            }
            Format::F11x => instr.a = bytes[1],
            Format::F10t => instr.operand = i32::from(bytes[1] as i8),
            Format::F20t => instr.operand = i32::from(le16(bytes, 2) as i16),
            Format::F30t => instr.operand = le32(bytes, 2) as i32,
            Format::F21t | Format::F21s | Format::F21h => {
                instr.a = bytes[1];
                instr.operand = i32::from(le16(bytes, 2) as i16);
            }
            Format::F21c => {
                instr.a = bytes[1];
                instr.operand = i32::from(le16(bytes, 2));
            }
            Format::F22c => {
                instr.a = low;
                instr.b = high;
                instr.operand = i32::from(le16(bytes, 2));
            }
            Format::F22t => {
                instr.a = low;
                instr.b = high;
                instr.operand = i32::from(le16(bytes, 2) as i16);
            }
            Format::F22b => {
                instr.a = bytes[1];
                instr.b = bytes[2];
                instr.operand = i32::from(bytes[3] as i8);
            }
            Format::F23x => {
                instr.a = bytes[1];
                instr.b = bytes[2];
                instr.c = bytes[3];
            }
            Format::F31i | Format::F31t => {
                instr.a = bytes[1];
                instr.operand = le32(bytes, 2) as i32;
            }
            Format::F35c => {
                instr.a = high;
                instr.operand = i32::from(le16(bytes, 2));
                instr.args = [
                    bytes[4] & 0x0f,
                    bytes[4] >> 4,
                    bytes[5] & 0x0f,
                    bytes[5] >> 4,
                    low,
                ];
            }
        }

        Ok(instr)
    }

    /// Encode this instruction into its byte form.
    ///
    /// Register and literal fields are truncated to the width their format
    /// allows; callers that need range checking (the assembler) do it first.
    pub fn encode(&self) -> Vec<u8> {
        let format = self.opcode.format();
        let mut bytes = vec![0u8; format.width()];
        bytes[0] = self.opcode as u8;
        let nibbles = |low: u8, high: u8| (low & 0x0f) | (high << 4);

        match format {
            Format::F10x => {}
            Format::F12x => bytes[1] = nibbles(self.a, self.b),
            Format::F11n => bytes[1] = nibbles(self.a, self.operand as u8),
            Format::F11x => bytes[1] = self.a,
            Format::F10t => bytes[1] = self.operand as u8,
            Format::F20t => bytes[2..4].copy_from_slice(&(self.operand as u16).to_le_bytes()),
            Format::F30t => bytes[2..6].copy_from_slice(&(self.operand as u32).to_le_bytes()),
            Format::F21t | Format::F21s | Format::F21h | Format::F21c => {
                bytes[1] = self.a;
                bytes[2..4].copy_from_slice(&(self.operand as u16).to_le_bytes());
            }
            Format::F22c | Format::F22t => {
                bytes[1] = nibbles(self.a, self.b);
                bytes[2..4].copy_from_slice(&(self.operand as u16).to_le_bytes());
            }
            Format::F22b => {
                bytes[1] = self.a;
                bytes[2] = self.b;
                bytes[3] = self.operand as u8;
            }
            Format::F23x => {
                bytes[1] = self.a;
                bytes[2] = self.b;
                bytes[3] = self.c;
            }
            Format::F31i | Format::F31t => {
                bytes[1] = self.a;
                bytes[2..6].copy_from_slice(&(self.operand as u32).to_le_bytes());
            }
            Format::F35c => {
                bytes[1] = nibbles(self.args[4], self.a);
                bytes[2..4].copy_from_slice(&(self.operand as u16).to_le_bytes());
                bytes[4] = nibbles(self.args[0], self.args[1]);
                bytes[5] = nibbles(self.args[2], self.args[3]);
            }
        }

        bytes
    }
}

/// Canonical assembly text, e.g. `add-int v0, v1, v2` or
/// `invoke-static {v0, v1}, method@3`.
impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.opcode.mnemonic();
        let pool = self.opcode.pool_kind().map(|k| k.prefix()).unwrap_or("");
        match self.opcode.format() {
            Format::F10x => write!(f, "{m}"),
            Format::F12x => write!(f, "{m} v{}, v{}", self.a, self.b),
            Format::F11x => write!(f, "{m} v{}", self.a),
            Format::F11n | Format::F21s | Format::F21h | Format::F31i => {
                write!(f, "{m} v{}, {}", self.a, self.operand)
            }
            Format::F10t | Format::F20t | Format::F30t => write!(f, "{m} {:+}", self.operand),
            Format::F21t | Format::F31t => write!(f, "{m} v{}, {:+}", self.a, self.operand),
            Format::F21c => write!(f, "{m} v{}, {pool}@{}", self.a, self.index()),
            Format::F22c => write!(f, "{m} v{}, v{}, {pool}@{}", self.a, self.b, self.index()),
            Format::F22t => write!(f, "{m} v{}, v{}, {:+}", self.a, self.b, self.operand),
            Format::F22b => write!(f, "{m} v{}, v{}, {}", self.a, self.b, self.operand),
            Format::F23x => write!(f, "{m} v{}, v{}, v{}", self.a, self.b, self.c),
            Format::F35c => {
                let regs: Vec<String> = self
                    .arg_registers()
                    .iter()
                    .map(|r| format!("v{r}"))
                    .collect();
                write!(f, "{m} {{{}}}, {pool}@{}", regs.join(", "), self.index())
            }
        }
    }
}
