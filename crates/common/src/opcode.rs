//! Opcode definitions for the supported Dalvik instruction subset.
//!
//! The table below is the single source of truth for byte values,
//! mnemonics and operand formats. [`Opcode::try_from`], [`Opcode::mnemonic`],
//! [`Opcode::format`] and [`ALL_OPCODES`] are all generated from it.

use crate::error::DecodeError;
use crate::format::{Format, PoolKind};

macro_rules! opcodes {
    ($( $(#[$doc:meta])* $name:ident = $byte:literal, $mnemonic:literal, $format:ident; )*) => {
        /// Identifies the operation to perform.
        ///
        /// The `#[repr(u8)]` attribute pins each variant to its Dalvik byte value.
        #[repr(u8)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Opcode {
            $( $(#[$doc])* $name = $byte, )*
        }

        /// All supported opcodes, in byte order. Useful for exhaustive testing.
        pub const ALL_OPCODES: &[Opcode] = &[ $( Opcode::$name, )* ];

        impl TryFrom<u8> for Opcode {
            type Error = DecodeError;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $( $byte => Ok(Opcode::$name), )*
                    _ => Err(DecodeError::UnknownOpcode(value)),
                }
            }
        }

        impl Opcode {
            /// Returns the assembly mnemonic for this opcode.
            pub fn mnemonic(&self) -> &'static str {
                match self {
                    $( Opcode::$name => $mnemonic, )*
                }
            }

            /// Returns the operand layout of this opcode.
            pub fn format(&self) -> Format {
                match self {
                    $( Opcode::$name => Format::$format, )*
                }
            }
        }
    };
}

opcodes! {
    Nop = 0x00, "nop", F10x;
    Move = 0x01, "move", F12x;
    MoveWide = 0x04, "move-wide", F12x;
    MoveObject = 0x07, "move-object", F12x;
    /// Copy the bottom half of the result buffer into vAA.
    MoveResult = 0x0a, "move-result", F11x;
    /// Copy the whole result buffer into the pair vAA, vAA+1.
    MoveResultWide = 0x0b, "move-result-wide", F11x;
    MoveResultObject = 0x0c, "move-result-object", F11x;
    ReturnVoid = 0x0e, "return-void", F10x;
    Return = 0x0f, "return", F11x;
    ReturnWide = 0x10, "return-wide", F11x;
    ReturnObject = 0x11, "return-object", F11x;
    Const4 = 0x12, "const/4", F11n;
    Const16 = 0x13, "const/16", F21s;
    Const = 0x14, "const", F31i;
    ConstWide16 = 0x16, "const-wide/16", F21s;
    ConstWide32 = 0x17, "const-wide/32", F31i;
    ConstWideHigh16 = 0x19, "const-wide/high16", F21h;
    ConstString = 0x1a, "const-string", F21c;
    ConstClass = 0x1c, "const-class", F21c;
    ArrayLength = 0x21, "array-length", F12x;
    NewInstance = 0x22, "new-instance", F21c;
    NewArray = 0x23, "new-array", F22c;
    /// Build an array from up to five registers; the reference lands in
    /// the result buffer.
    FilledNewArray = 0x24, "filled-new-array", F35c;
    Goto = 0x28, "goto", F10t;
    Goto16 = 0x29, "goto/16", F20t;
    Goto32 = 0x2a, "goto/32", F30t;
    PackedSwitch = 0x2b, "packed-switch", F31t;
    IfEq = 0x32, "if-eq", F22t;
    IfNe = 0x33, "if-ne", F22t;
    IfLt = 0x34, "if-lt", F22t;
    IfGe = 0x35, "if-ge", F22t;
    IfGt = 0x36, "if-gt", F22t;
    IfLe = 0x37, "if-le", F22t;
    IfEqz = 0x38, "if-eqz", F21t;
    IfNez = 0x39, "if-nez", F21t;
    IfLtz = 0x3a, "if-ltz", F21t;
    IfGez = 0x3b, "if-gez", F21t;
    IfGtz = 0x3c, "if-gtz", F21t;
    IfLez = 0x3d, "if-lez", F21t;
    Aget = 0x44, "aget", F23x;
    AgetWide = 0x45, "aget-wide", F23x;
    AgetObject = 0x46, "aget-object", F23x;
    AgetBoolean = 0x47, "aget-boolean", F23x;
    AgetByte = 0x48, "aget-byte", F23x;
    AgetChar = 0x49, "aget-char", F23x;
    AgetShort = 0x4a, "aget-short", F23x;
    Aput = 0x4b, "aput", F23x;
    AputWide = 0x4c, "aput-wide", F23x;
    AputObject = 0x4d, "aput-object", F23x;
    AputBoolean = 0x4e, "aput-boolean", F23x;
    AputByte = 0x4f, "aput-byte", F23x;
    AputChar = 0x50, "aput-char", F23x;
    AputShort = 0x51, "aput-short", F23x;
    Iget = 0x52, "iget", F22c;
    IgetWide = 0x53, "iget-wide", F22c;
    IgetObject = 0x54, "iget-object", F22c;
    IgetBoolean = 0x55, "iget-boolean", F22c;
    IgetByte = 0x56, "iget-byte", F22c;
    IgetChar = 0x57, "iget-char", F22c;
    IgetShort = 0x58, "iget-short", F22c;
    Iput = 0x59, "iput", F22c;
    IputWide = 0x5a, "iput-wide", F22c;
    IputObject = 0x5b, "iput-object", F22c;
    IputBoolean = 0x5c, "iput-boolean", F22c;
    IputByte = 0x5d, "iput-byte", F22c;
    IputChar = 0x5e, "iput-char", F22c;
    IputShort = 0x5f, "iput-short", F22c;
    Sget = 0x60, "sget", F21c;
    SgetWide = 0x61, "sget-wide", F21c;
    SgetObject = 0x62, "sget-object", F21c;
    SgetBoolean = 0x63, "sget-boolean", F21c;
    SgetByte = 0x64, "sget-byte", F21c;
    SgetChar = 0x65, "sget-char", F21c;
    SgetShort = 0x66, "sget-short", F21c;
    Sput = 0x67, "sput", F21c;
    SputWide = 0x68, "sput-wide", F21c;
    SputObject = 0x69, "sput-object", F21c;
    SputBoolean = 0x6a, "sput-boolean", F21c;
    SputByte = 0x6b, "sput-byte", F21c;
    SputChar = 0x6c, "sput-char", F21c;
    SputShort = 0x6d, "sput-short", F21c;
    InvokeVirtual = 0x6e, "invoke-virtual", F35c;
    InvokeDirect = 0x70, "invoke-direct", F35c;
    InvokeStatic = 0x71, "invoke-static", F35c;
    IntToDouble = 0x83, "int-to-double", F12x;
    DoubleToInt = 0x8a, "double-to-int", F12x;
    AddInt = 0x90, "add-int", F23x;
    SubInt = 0x91, "sub-int", F23x;
    MulInt = 0x92, "mul-int", F23x;
    DivInt = 0x93, "div-int", F23x;
    RemInt = 0x94, "rem-int", F23x;
    AddInt2Addr = 0xb0, "add-int/2addr", F12x;
    SubInt2Addr = 0xb1, "sub-int/2addr", F12x;
    MulInt2Addr = 0xb2, "mul-int/2addr", F12x;
    AddDouble2Addr = 0xcb, "add-double/2addr", F12x;
    MulDouble2Addr = 0xcd, "mul-double/2addr", F12x;
    AddIntLit8 = 0xd8, "add-int/lit8", F22b;
    RsubIntLit8 = 0xd9, "rsub-int/lit8", F22b;
    MulIntLit8 = 0xda, "mul-int/lit8", F22b;
    DivIntLit8 = 0xdb, "div-int/lit8", F22b;
    RemIntLit8 = 0xdc, "rem-int/lit8", F22b;
    AndIntLit8 = 0xdd, "and-int/lit8", F22b;
}

impl Opcode {
    /// Look an opcode up by its assembly mnemonic.
    pub fn from_mnemonic(mnemonic: &str) -> Option<Opcode> {
        ALL_OPCODES
            .iter()
            .find(|op| op.mnemonic() == mnemonic)
            .copied()
    }

    /// Which constant pool the 16-bit index operand refers to, if any.
    pub fn pool_kind(&self) -> Option<PoolKind> {
        match self {
            Opcode::ConstString => Some(PoolKind::String),
            Opcode::ConstClass | Opcode::NewInstance | Opcode::NewArray | Opcode::FilledNewArray => {
                Some(PoolKind::Type)
            }
            Opcode::InvokeVirtual | Opcode::InvokeDirect | Opcode::InvokeStatic => {
                Some(PoolKind::Method)
            }
            op if matches!(op.format(), Format::F21c | Format::F22c) => Some(PoolKind::Field),
            _ => None,
        }
    }

    /// Whether the opcode is one of the `-wide` data movement variants.
    pub fn is_wide(&self) -> bool {
        matches!(
            self,
            Opcode::MoveWide
                | Opcode::MoveResultWide
                | Opcode::ReturnWide
                | Opcode::ConstWide16
                | Opcode::ConstWide32
                | Opcode::ConstWideHigh16
                | Opcode::AgetWide
                | Opcode::AputWide
                | Opcode::IgetWide
                | Opcode::IputWide
                | Opcode::SgetWide
                | Opcode::SputWide
        )
    }
}
