//! sdvm assembler: text ↔ Dalvik bytecode.
//!
//! A mechanical 1:1 translation used to write method bodies for tests and
//! to inspect code items. Labels and symbolic pool names are not
//! supported; branch offsets and pool indices are written as numbers.
//!
//! # Usage
//!
//! ```
//! use sdvm_asm::{assemble, disassemble};
//!
//! let text = "const/4 v0, 7\nreturn v0\n";
//! let code = assemble(text).unwrap();
//! assert_eq!(code, vec![0x12, 0x70, 0x0f, 0x00]);
//! assert_eq!(disassemble(&code).unwrap(), text);
//! ```
//!
//! # Roundtrip Guarantee
//!
//! `assemble(disassemble(code)) == code` holds for canonically encoded
//! code (unused operand bits zero). The assembler also accepts
//! non-canonical input such as hex literals or uppercase mnemonics.

pub mod error;

mod disassembler;
mod lexer;
mod parser;

pub use disassembler::{disassemble, listing};
pub use error::AsmError;

use lexer::tokenize_line;
use parser::parse_line;

/// Assemble text into method bytecode.
///
/// Returns the first error encountered.
pub fn assemble(text: &str) -> Result<Vec<u8>, AsmError> {
    let mut code = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line_num = idx + 1;
        let tokens = tokenize_line(line, line_num)?;
        if let Some(bytes) = parse_line(&tokens, line_num)? {
            code.extend_from_slice(&bytes);
        }
    }
    Ok(code)
}
