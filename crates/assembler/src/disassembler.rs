//! Disassembler: method bytecode → canonical assembly text.
//!
//! One instruction per line, no indentation, no comments. A
//! packed-switch payload embedded in the code stream becomes a single
//! `packed-switch-payload` line.

use sdvm_common::{DecodeError, Instruction};

use crate::error::AsmError;
use crate::parser::{PACKED_SWITCH_IDENT, PACKED_SWITCH_PAYLOAD};

/// One decoded unit of a code stream.
enum Item {
    Instr(Instruction),
    Payload { first_key: i32, targets: Vec<i32> },
}

impl Item {
    fn text(&self) -> String {
        match self {
            Item::Instr(instr) => instr.to_string(),
            Item::Payload { first_key, targets } => {
                let mut line = format!("{PACKED_SWITCH_PAYLOAD} {first_key}");
                for t in targets {
                    line.push_str(&format!(", {t:+}"));
                }
                line
            }
        }
    }
}

fn is_payload(code: &[u8], pc: usize) -> bool {
    code.get(pc..pc + 2) == Some(&PACKED_SWITCH_IDENT.to_le_bytes()[..])
}

fn decode_payload(code: &[u8], pc: usize) -> Result<(Item, usize), AsmError> {
    let truncated = |width| AsmError::Decode {
        offset: pc,
        source: DecodeError::Truncated {
            pc,
            width,
            len: code.len(),
        },
    };
    let head = code.get(pc..pc + 8).ok_or_else(|| truncated(8))?;
    let size = usize::from(u16::from_le_bytes([head[2], head[3]]));
    let first_key = i32::from_le_bytes([head[4], head[5], head[6], head[7]]);
    let width = 8 + 4 * size;
    let body = code.get(pc + 8..pc + width).ok_or_else(|| truncated(width))?;
    let targets = body
        .chunks_exact(4)
        .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok((Item::Payload { first_key, targets }, width))
}

/// Walk `code`, yielding each unit with its byte offset.
fn walk(code: &[u8]) -> Result<Vec<(usize, Item)>, AsmError> {
    let mut items = Vec::new();
    let mut pc = 0;
    while pc < code.len() {
        let (item, width) = if is_payload(code, pc) {
            decode_payload(code, pc)?
        } else {
            let instr = Instruction::decode(code, pc)
                .map_err(|source| AsmError::Decode { offset: pc, source })?;
            (Item::Instr(instr), instr.width())
        };
        items.push((pc, item));
        pc += width;
    }
    Ok(items)
}

fn join(lines: Vec<String>) -> String {
    let mut result = lines.join("\n");
    if !result.is_empty() {
        result.push('\n');
    }
    result
}

/// Disassemble bytecode into canonical assembly text.
///
/// For canonically encoded code, `assemble(disassemble(code)) == code`.
pub fn disassemble(code: &[u8]) -> Result<String, AsmError> {
    let lines = walk(code)?.iter().map(|(_, item)| item.text()).collect();
    Ok(join(lines))
}

/// Like [`disassemble`], but each line is prefixed with its byte offset.
/// The output is for reading; it does not reassemble.
pub fn listing(code: &[u8]) -> Result<String, AsmError> {
    let lines = walk(code)?
        .iter()
        .map(|(pc, item)| format!("{pc:04x}: {}", item.text()))
        .collect();
    Ok(join(lines))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_code() {
        assert_eq!(disassemble(&[]).unwrap(), "");
    }

    #[test]
    fn mixed_widths() {
        let code = [
            0x12, 0x10, // const/4 v0, 1
            0x13, 0x01, 0x2a, 0x00, // const/16 v1, 42
            0x90, 0x02, 0x00, 0x01, // add-int v2, v0, v1
            0x0f, 0x02, // return v2
        ];
        assert_eq!(
            disassemble(&code).unwrap(),
            "const/4 v0, 1\nconst/16 v1, 42\nadd-int v2, v0, v1\nreturn v2\n"
        );
    }

    #[test]
    fn listing_has_offsets() {
        let code = [0x12, 0x10, 0x0e, 0x00];
        assert_eq!(
            listing(&code).unwrap(),
            "0000: const/4 v0, 1\n0002: return-void\n"
        );
    }

    #[test]
    fn payload_is_one_line() {
        let code = [
            0x0e, 0x00, // return-void
            0x00, 0x01, 0x01, 0x00, 0x05, 0x00, 0x00, 0x00, 0x03, 0x00, 0x00, 0x00,
        ];
        assert_eq!(
            disassemble(&code).unwrap(),
            "return-void\npacked-switch-payload 5, +3\n"
        );
    }

    #[test]
    fn truncated_payload() {
        let code = [0x00, 0x01, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00];
        assert!(matches!(
            disassemble(&code).unwrap_err(),
            AsmError::Decode { offset: 0, .. }
        ));
    }

    #[test]
    fn unknown_opcode_reports_offset() {
        let code = [0x0e, 0x00, 0xff, 0x00];
        assert_eq!(
            disassemble(&code).unwrap_err(),
            AsmError::Decode {
                offset: 2,
                source: DecodeError::UnknownOpcode(0xff)
            }
        );
    }
}
