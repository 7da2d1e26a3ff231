//! Instruction format families.
//!
//! Every opcode belongs to exactly one format, which fixes its encoded
//! width and where each operand lives inside the instruction bytes. Format
//! names follow the Dalvik convention: the first digit is the width in
//! 16-bit code units, the second the register count, and the letter the
//! kind of extra data.

/// Operand layout of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// `op 00`
    F10x,
    /// `op B|A`
    F12x,
    /// `op B|A` with B a signed 4-bit literal.
    F11n,
    /// `op AA`
    F11x,
    /// `op AA` with AA a signed 8-bit branch offset.
    F10t,
    /// `op 00 AAAA`
    F20t,
    /// `op AA BBBB` with BBBB a signed branch offset.
    F21t,
    /// `op AA BBBB` with BBBB a signed literal.
    F21s,
    /// `op AA BBBB` with BBBB the high 16 bits of a literal.
    F21h,
    /// `op AA BBBB` with BBBB a pool index.
    F21c,
    /// `op AA BB CC` with CC a signed 8-bit literal.
    F22b,
    /// `op B|A CCCC` with CCCC a signed branch offset.
    F22t,
    /// `op B|A CCCC` with CCCC a pool index.
    F22c,
    /// `op AA BB CC`
    F23x,
    /// `op 00 AAAAAAAA`
    F30t,
    /// `op AA BBBBBBBB` with a 32-bit literal.
    F31i,
    /// `op AA BBBBBBBB` with a 32-bit offset to a payload.
    F31t,
    /// `op A|G BBBB F|E D|C`: up to five argument registers.
    F35c,
}

impl Format {
    /// Encoded width in bytes.
    pub fn width(self) -> usize {
        match self {
            Format::F10x | Format::F12x | Format::F11n | Format::F11x | Format::F10t => 2,
            Format::F20t
            | Format::F21t
            | Format::F21s
            | Format::F21h
            | Format::F21c
            | Format::F22b
            | Format::F22t
            | Format::F22c
            | Format::F23x => 4,
            Format::F30t | Format::F31i | Format::F31t | Format::F35c => 6,
        }
    }

    /// Whether the variable operand of this format is a branch offset.
    pub fn is_branch(self) -> bool {
        matches!(
            self,
            Format::F10t | Format::F20t | Format::F30t | Format::F21t | Format::F22t | Format::F31t
        )
    }
}

/// The constant pool a 16-bit index operand refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolKind {
    String,
    Type,
    Field,
    Method,
}

impl PoolKind {
    /// Prefix used in assembly text, e.g. `method` in `method@3`.
    pub fn prefix(self) -> &'static str {
        match self {
            PoolKind::String => "string",
            PoolKind::Type => "type",
            PoolKind::Field => "field",
            PoolKind::Method => "method",
        }
    }

    /// Parse an assembly prefix back into a pool kind.
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "string" => Some(PoolKind::String),
            "type" => Some(PoolKind::Type),
            "field" => Some(PoolKind::Field),
            "method" => Some(PoolKind::Method),
            _ => None,
        }
    }
}
