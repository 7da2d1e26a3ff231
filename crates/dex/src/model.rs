//! In-memory model of a dex container and its lookup accessors.
//!
//! Index tables are stored exactly as they appear in the file; accessors
//! resolve indices into names on demand and report out-of-range indices
//! as [`DexError::IndexOutOfRange`].

use crate::error::DexError;

/// Marker for an absent index (e.g. a class with no superclass).
pub const NO_INDEX: u32 = 0xffff_ffff;
/// The only supported byte-order tag.
pub const ENDIAN_CONSTANT: u32 = 0x1234_5678;
/// Size of the fixed header.
pub const HEADER_SIZE: u32 = 0x70;
/// Magic written by [`DexFile::to_bytes`].
pub const DEX_MAGIC: [u8; 8] = *b"dex\n035\0";

pub const ACC_PUBLIC: u32 = 0x0001;
pub const ACC_PRIVATE: u32 = 0x0002;
pub const ACC_STATIC: u32 = 0x0008;
pub const ACC_FINAL: u32 = 0x0010;
pub const ACC_ABSTRACT: u32 = 0x0400;
pub const ACC_CONSTRUCTOR: u32 = 0x1_0000;

/// The fixed 0x70-byte file header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    pub magic: [u8; 8],
    pub checksum: u32,
    pub signature: [u8; 20],
    pub file_size: u32,
    pub header_size: u32,
    pub endian_tag: u32,
    pub link_size: u32,
    pub link_off: u32,
    pub map_off: u32,
    pub string_ids_size: u32,
    pub string_ids_off: u32,
    pub type_ids_size: u32,
    pub type_ids_off: u32,
    pub proto_ids_size: u32,
    pub proto_ids_off: u32,
    pub field_ids_size: u32,
    pub field_ids_off: u32,
    pub method_ids_size: u32,
    pub method_ids_off: u32,
    pub class_defs_size: u32,
    pub class_defs_off: u32,
    pub data_size: u32,
    pub data_off: u32,
}

impl Header {
    /// The format version embedded in the magic, e.g. `"035"`.
    pub fn version(&self) -> String {
        String::from_utf8_lossy(&self.magic[4..7]).into_owned()
    }
}

/// One entry of the map list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapItem {
    pub kind: u16,
    pub size: u32,
    pub offset: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtoId {
    pub shorty_idx: u32,
    pub return_type_idx: u32,
    /// Parameter types as type ids.
    pub parameters: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldId {
    pub class_idx: u16,
    pub type_idx: u16,
    pub name_idx: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodId {
    pub class_idx: u16,
    pub proto_idx: u16,
    pub name_idx: u32,
}

/// A method body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeItem {
    pub registers_size: u16,
    /// Number of trailing registers that receive the arguments.
    pub ins_size: u16,
    pub outs_size: u16,
    pub tries_size: u16,
    pub debug_info_off: u32,
    /// Instruction bytes; always an even number of bytes.
    pub insns: Vec<u8>,
}

impl CodeItem {
    /// A code item with no try blocks or debug info.
    pub fn new(registers_size: u16, ins_size: u16, mut insns: Vec<u8>) -> Self {
        if insns.len() % 2 != 0 {
            insns.push(0);
        }
        Self {
            registers_size,
            ins_size,
            outs_size: 0,
            tries_size: 0,
            debug_info_off: 0,
            insns,
        }
    }
}

/// A field declared by a class, with its absolute field id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedField {
    pub field_idx: u32,
    pub access_flags: u32,
}

/// A method declared by a class, with its absolute method id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedMethod {
    pub method_idx: u32,
    pub access_flags: u32,
    /// `None` for abstract and native methods.
    pub code: Option<CodeItem>,
}

/// Fields and methods declared by one class, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassData {
    pub static_fields: Vec<EncodedField>,
    pub instance_fields: Vec<EncodedField>,
    pub direct_methods: Vec<EncodedMethod>,
    pub virtual_methods: Vec<EncodedMethod>,
}

impl ClassData {
    pub fn is_empty(&self) -> bool {
        self.static_fields.is_empty()
            && self.instance_fields.is_empty()
            && self.direct_methods.is_empty()
            && self.virtual_methods.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDef {
    pub class_idx: u32,
    pub access_flags: u32,
    /// Type id of the superclass, or [`NO_INDEX`].
    pub superclass_idx: u32,
    pub interfaces: Vec<u32>,
    pub source_file_idx: u32,
    pub class_data: ClassData,
}

/// A method id with its names resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodRef<'a> {
    pub class: &'a str,
    pub name: &'a str,
    pub proto_idx: u32,
}

/// A field id with its names resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRef<'a> {
    pub class: &'a str,
    pub name: &'a str,
    pub type_name: &'a str,
}

/// A prototype with its type names resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prototype<'a> {
    pub return_type: &'a str,
    pub parameters: Vec<&'a str>,
}

/// A parsed (or built) dex container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DexFile {
    pub header: Header,
    pub strings: Vec<String>,
    /// Descriptor string id of each type.
    pub type_ids: Vec<u32>,
    pub protos: Vec<ProtoId>,
    pub fields: Vec<FieldId>,
    pub methods: Vec<MethodId>,
    pub class_defs: Vec<ClassDef>,
    pub map: Vec<MapItem>,
}

fn lookup<'a, T>(table: &'static str, items: &'a [T], index: u32) -> Result<&'a T, DexError> {
    items
        .get(index as usize)
        .ok_or(DexError::IndexOutOfRange {
            table,
            index,
            len: items.len(),
        })
}

impl DexFile {
    pub fn string(&self, id: u32) -> Result<&str, DexError> {
        lookup("string_ids", &self.strings, id).map(String::as_str)
    }

    /// Type descriptor such as `Ljava/lang/String;` or `[I`.
    pub fn type_name(&self, id: u32) -> Result<&str, DexError> {
        let descriptor = *lookup("type_ids", &self.type_ids, id)?;
        self.string(descriptor)
    }

    pub fn method(&self, id: u32) -> Result<MethodRef<'_>, DexError> {
        let m = lookup("method_ids", &self.methods, id)?;
        Ok(MethodRef {
            class: self.type_name(u32::from(m.class_idx))?,
            name: self.string(m.name_idx)?,
            proto_idx: u32::from(m.proto_idx),
        })
    }

    pub fn field(&self, id: u32) -> Result<FieldRef<'_>, DexError> {
        let f = lookup("field_ids", &self.fields, id)?;
        Ok(FieldRef {
            class: self.type_name(u32::from(f.class_idx))?,
            name: self.string(f.name_idx)?,
            type_name: self.type_name(u32::from(f.type_idx))?,
        })
    }

    pub fn proto(&self, id: u32) -> Result<Prototype<'_>, DexError> {
        let p = lookup("proto_ids", &self.protos, id)?;
        let parameters = p
            .parameters
            .iter()
            .map(|&t| self.type_name(t))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Prototype {
            return_type: self.type_name(p.return_type_idx)?,
            parameters,
        })
    }

    /// Class metadata for a type id, if the class is defined in this file.
    pub fn class_def(&self, type_idx: u32) -> Option<&ClassDef> {
        self.class_defs.iter().find(|c| c.class_idx == type_idx)
    }

    /// Class metadata by descriptor.
    pub fn class_def_by_name(&self, descriptor: &str) -> Option<&ClassDef> {
        self.class_defs
            .iter()
            .find(|c| self.type_name(c.class_idx).is_ok_and(|n| n == descriptor))
    }

    /// Superclass descriptor of a class, `None` for a root class.
    pub fn superclass_name(&self, class: &ClassDef) -> Result<Option<&str>, DexError> {
        if class.superclass_idx == NO_INDEX {
            return Ok(None);
        }
        self.type_name(class.superclass_idx).map(Some)
    }

    /// String id of an exact string.
    pub fn find_string(&self, text: &str) -> Option<u32> {
        self.strings.iter().position(|s| s == text).map(|i| i as u32)
    }

    /// Type id of a descriptor.
    pub fn find_type(&self, descriptor: &str) -> Option<u32> {
        let string_id = self.find_string(descriptor)?;
        self.type_ids
            .iter()
            .position(|&s| s == string_id)
            .map(|i| i as u32)
    }

    /// First method id whose name is the string `name_idx`.
    pub fn find_method_by_name(&self, name_idx: u32) -> Option<u32> {
        self.methods
            .iter()
            .position(|m| m.name_idx == name_idx)
            .map(|i| i as u32)
    }

    /// A direct method of class `class_idx` whose name is `name_idx`.
    pub fn direct_method(&self, class_idx: u32, name_idx: u32) -> Option<&EncodedMethod> {
        let class = self.class_def(class_idx)?;
        class.class_data.direct_methods.iter().find(|m| {
            self.methods
                .get(m.method_idx as usize)
                .is_some_and(|id| id.name_idx == name_idx)
        })
    }

    /// Name of a declared method.
    pub fn method_name(&self, method: &EncodedMethod) -> Result<&str, DexError> {
        Ok(self.method(method.method_idx)?.name)
    }
}
