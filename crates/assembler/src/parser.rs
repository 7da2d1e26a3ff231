//! Parser for sdvm assembly tokens → instruction bytes.
//!
//! Dispatches on the opcode's format to the matching operand pattern.

use sdvm_common::{Format, Instruction, Opcode, PoolKind, MAX_INVOKE_ARGS};

use crate::error::AsmError;
use crate::lexer::Token;

/// Mnemonic of the packed-switch data block.
pub(crate) const PACKED_SWITCH_PAYLOAD: &str = "packed-switch-payload";
/// Leading code unit of a packed-switch payload.
pub(crate) const PACKED_SWITCH_IDENT: u16 = 0x0100;

/// Cursor over the operand tokens of one line.
struct Operands<'t> {
    tokens: &'t [Token],
    pos: usize,
    line: usize,
    opcode: &'static str,
}

impl<'t> Operands<'t> {
    fn next(&mut self, expected: &'static str) -> Result<&'t Token, AsmError> {
        let token = self.tokens.get(self.pos).ok_or(AsmError::MissingOperand {
            line: self.line,
            opcode: self.opcode,
            expected,
        })?;
        self.pos += 1;
        Ok(token)
    }

    fn unexpected(&self, token: &Token) -> AsmError {
        AsmError::UnexpectedToken {
            line: self.line,
            token: token.to_string(),
        }
    }

    fn comma(&mut self) -> Result<(), AsmError> {
        match self.next("','")? {
            Token::Comma => Ok(()),
            other => Err(self.unexpected(other)),
        }
    }

    fn register(&mut self, max: u32) -> Result<u8, AsmError> {
        match self.next("a register")? {
            Token::Register(r) if *r <= max => Ok(*r as u8),
            Token::Register(r) => Err(AsmError::RegisterOutOfRange {
                line: self.line,
                register: *r,
                max,
            }),
            other => Err(self.unexpected(other)),
        }
    }

    fn number(&mut self, min: i64, max: i64) -> Result<i64, AsmError> {
        match self.next("a number")? {
            Token::Number(n) if (min..=max).contains(n) => Ok(*n),
            Token::Number(n) => Err(AsmError::ValueOutOfRange {
                line: self.line,
                value: *n,
            }),
            other => Err(self.unexpected(other)),
        }
    }

    fn pool(&mut self, kind: PoolKind) -> Result<u16, AsmError> {
        match self.next(kind.prefix())? {
            Token::Pool(k, idx) if *k == kind => {
                u16::try_from(*idx).map_err(|_| AsmError::ValueOutOfRange {
                    line: self.line,
                    value: i64::from(*idx),
                })
            }
            other => Err(AsmError::WrongPool {
                line: self.line,
                expected: kind.prefix(),
                token: other.to_string(),
            }),
        }
    }

    fn end(&self) -> Result<(), AsmError> {
        match self.tokens.get(self.pos) {
            None => Ok(()),
            Some(extra) => Err(self.unexpected(extra)),
        }
    }
}

const NIBBLE: u32 = 0x0f;
const BYTE: u32 = 0xff;
const I8: (i64, i64) = (i8::MIN as i64, i8::MAX as i64);
const I16: (i64, i64) = (i16::MIN as i64, i16::MAX as i64);
const I32: (i64, i64) = (i32::MIN as i64, u32::MAX as i64);

/// Parse one line of tokens into encoded bytes.
///
/// Returns `Ok(None)` for blank lines (empty token list).
pub(crate) fn parse_line(tokens: &[Token], line: usize) -> Result<Option<Vec<u8>>, AsmError> {
    let Some(first) = tokens.first() else {
        return Ok(None);
    };
    let mnemonic = match first {
        Token::Ident(s) => s.as_str(),
        other => {
            return Err(AsmError::UnexpectedToken {
                line,
                token: other.to_string(),
            })
        }
    };

    if mnemonic == PACKED_SWITCH_PAYLOAD {
        return parse_payload(&tokens[1..], line).map(Some);
    }

    let opcode = Opcode::from_mnemonic(mnemonic).ok_or_else(|| AsmError::UnknownOpcode {
        line,
        token: mnemonic.to_string(),
    })?;

    let mut ops = Operands {
        tokens: &tokens[1..],
        pos: 0,
        line,
        opcode: opcode.mnemonic(),
    };
    let mut instr = Instruction::new(opcode);
    let pool = opcode.pool_kind();

    match opcode.format() {
        Format::F10x => {}
        Format::F12x => {
            instr.a = ops.register(NIBBLE)?;
            ops.comma()?;
            instr.b = ops.register(NIBBLE)?;
        }
        Format::F11n => {
            instr.a = ops.register(NIBBLE)?;
            ops.comma()?;
            instr.operand = ops.number(-8, 7)? as i32;
        }
        Format::F11x => instr.a = ops.register(BYTE)?,
        Format::F10t => instr.operand = ops.number(I8.0, I8.1)? as i32,
        Format::F20t => instr.operand = ops.number(I16.0, I16.1)? as i32,
        Format::F30t => instr.operand = ops.number(I32.0, I32.1)? as i32,
        Format::F21t | Format::F21s => {
            instr.a = ops.register(BYTE)?;
            ops.comma()?;
            instr.operand = ops.number(I16.0, I16.1)? as i32;
        }
        Format::F21h => {
            instr.a = ops.register(BYTE)?;
            ops.comma()?;
            instr.operand = ops.number(I16.0, i64::from(u16::MAX))? as i32;
        }
        Format::F21c => {
            instr.a = ops.register(BYTE)?;
            ops.comma()?;
            instr.operand = i32::from(ops.pool(pool.unwrap_or(PoolKind::Field))?);
        }
        Format::F22c => {
            instr.a = ops.register(NIBBLE)?;
            ops.comma()?;
            instr.b = ops.register(NIBBLE)?;
            ops.comma()?;
            instr.operand = i32::from(ops.pool(pool.unwrap_or(PoolKind::Field))?);
        }
        Format::F22t => {
            instr.a = ops.register(NIBBLE)?;
            ops.comma()?;
            instr.b = ops.register(NIBBLE)?;
            ops.comma()?;
            instr.operand = ops.number(I16.0, I16.1)? as i32;
        }
        Format::F22b => {
            instr.a = ops.register(BYTE)?;
            ops.comma()?;
            instr.b = ops.register(BYTE)?;
            ops.comma()?;
            instr.operand = ops.number(I8.0, I8.1)? as i32;
        }
        Format::F23x => {
            instr.a = ops.register(BYTE)?;
            ops.comma()?;
            instr.b = ops.register(BYTE)?;
            ops.comma()?;
            instr.c = ops.register(BYTE)?;
        }
        Format::F31i | Format::F31t => {
            instr.a = ops.register(BYTE)?;
            ops.comma()?;
            instr.operand = ops.number(I32.0, I32.1)? as i32;
        }
        Format::F35c => {
            match ops.next("'{'")? {
                Token::LBrace => {}
                other => return Err(ops.unexpected(other)),
            }
            let mut count = 0usize;
            loop {
                match ops.tokens.get(ops.pos) {
                    Some(Token::RBrace) => {
                        ops.pos += 1;
                        break;
                    }
                    Some(Token::Comma) if count > 0 => ops.pos += 1,
                    _ => {}
                }
                if count == MAX_INVOKE_ARGS {
                    return Err(AsmError::ValueOutOfRange {
                        line,
                        value: count as i64 + 1,
                    });
                }
                instr.args[count] = ops.register(NIBBLE)?;
                count += 1;
            }
            instr.a = count as u8;
            ops.comma()?;
            instr.operand = i32::from(ops.pool(pool.unwrap_or(PoolKind::Method))?);
        }
    }

    ops.end()?;
    Ok(Some(instr.encode()))
}

/// `packed-switch-payload first_key, target, target, ...`
fn parse_payload(tokens: &[Token], line: usize) -> Result<Vec<u8>, AsmError> {
    let mut ops = Operands {
        tokens,
        pos: 0,
        line,
        opcode: PACKED_SWITCH_PAYLOAD,
    };
    let first_key = ops.number(I32.0, I32.1)? as i32;
    let mut targets = Vec::new();
    while ops.pos < tokens.len() {
        ops.comma()?;
        targets.push(ops.number(I32.0, I32.1)? as i32);
    }

    let mut bytes = Vec::with_capacity(8 + 4 * targets.len());
    bytes.extend_from_slice(&PACKED_SWITCH_IDENT.to_le_bytes());
    bytes.extend_from_slice(&(targets.len() as u16).to_le_bytes());
    bytes.extend_from_slice(&first_key.to_le_bytes());
    for t in targets {
        bytes.extend_from_slice(&t.to_le_bytes());
    }
    Ok(bytes)
}
