//! Dex container support for sdvm.
//!
//! - [`parse`] reads a `.dex` file into a [`DexFile`]
//! - [`DexFile`] resolves string, type, field, method and prototype ids and
//!   exposes class metadata to the VM
//! - [`DexBuilder`] constructs files programmatically and
//!   [`DexFile::to_bytes`] writes them back out
//!
//! # Example
//!
//! ```
//! use sdvm_dex::{parse, CodeItem, DexBuilder, ACC_STATIC};
//!
//! let mut b = DexBuilder::new();
//! let class = b.class("LHello;", Some("Ljava/lang/Object;"));
//! let main = b.method("LHello;", "main", "V", &["[Ljava/lang/String;"]);
//! b.add_direct_method(class, main, ACC_STATIC, Some(CodeItem::new(1, 1, vec![0x0e, 0x00])));
//!
//! let bytes = b.build().to_bytes();
//! let dex = parse(&bytes).unwrap();
//! assert_eq!(dex.class_defs.len(), 1);
//! assert_eq!(dex.type_name(dex.class_defs[0].class_idx).unwrap(), "LHello;");
//! ```

pub mod builder;
pub mod error;
pub mod model;
pub mod parser;
pub mod writer;

mod mutf8;
mod reader;

pub use builder::{ClassHandle, DexBuilder};
pub use error::DexError;
pub use model::{
    ClassData, ClassDef, CodeItem, DexFile, EncodedField, EncodedMethod, FieldId, FieldRef,
    Header, MapItem, MethodId, MethodRef, ProtoId, Prototype, ACC_ABSTRACT, ACC_CONSTRUCTOR,
    ACC_FINAL, ACC_PRIVATE, ACC_PUBLIC, ACC_STATIC, NO_INDEX,
};
pub use parser::parse;
pub use writer::adler32;

impl DexFile {
    /// Parse a complete dex file.
    pub fn parse(data: &[u8]) -> Result<DexFile, DexError> {
        parser::parse(data)
    }

    /// Whether the stored header checksum matches the file contents.
    pub fn checksum_matches(data: &[u8]) -> bool {
        match data.get(8..12) {
            Some(stored) => {
                let stored = u32::from_le_bytes([stored[0], stored[1], stored[2], stored[3]]);
                stored == adler32(&data[12..])
            }
            None => false,
        }
    }
}
