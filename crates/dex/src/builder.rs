//! Programmatic construction of dex files.
//!
//! Pools are interned in creation order, so an index returned by
//! [`DexBuilder::method`] or [`DexBuilder::field`] is final and can be
//! embedded in bytecode before the method that uses it is attached.
//!
//! ```
//! use sdvm_dex::{CodeItem, DexBuilder, ACC_STATIC};
//!
//! let mut b = DexBuilder::new();
//! let main = b.class("LMain;", Some("Ljava/lang/Object;"));
//! let run = b.method("LMain;", "main", "V", &[]);
//! b.add_direct_method(main, run, ACC_STATIC, Some(CodeItem::new(1, 0, vec![0x0e, 0x00])));
//! let dex = b.build();
//! assert_eq!(dex.method(run).unwrap().name, "main");
//! ```

use std::collections::HashMap;

use crate::model::{
    ClassData, ClassDef, CodeItem, DexFile, EncodedField, EncodedMethod, FieldId, MethodId,
    ProtoId, ACC_PUBLIC, NO_INDEX,
};
use crate::writer;

/// Handle to a class declared with [`DexBuilder::class`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassHandle(usize);

#[derive(Debug, Default)]
pub struct DexBuilder {
    dex: DexFile,
    strings: HashMap<String, u32>,
    types: HashMap<u32, u32>,
    protos: HashMap<(u32, Vec<u32>), u32>,
    fields: HashMap<(u16, u16, u32), u32>,
    methods: HashMap<(u16, u16, u32), u32>,
}

/// Shorty character of a type descriptor: references and arrays collapse to `L`.
fn shorty_char(descriptor: &str) -> char {
    match descriptor.chars().next() {
        Some('[') | Some('L') | None => 'L',
        Some(c) => c,
    }
}

impl DexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn string(&mut self, text: &str) -> u32 {
        if let Some(&id) = self.strings.get(text) {
            return id;
        }
        let id = self.dex.strings.len() as u32;
        self.dex.strings.push(text.to_string());
        self.strings.insert(text.to_string(), id);
        id
    }

    pub fn type_id(&mut self, descriptor: &str) -> u32 {
        let string_id = self.string(descriptor);
        if let Some(&id) = self.types.get(&string_id) {
            return id;
        }
        let id = self.dex.type_ids.len() as u32;
        self.dex.type_ids.push(string_id);
        self.types.insert(string_id, id);
        id
    }

    pub fn proto(&mut self, return_type: &str, params: &[&str]) -> u32 {
        let return_type_idx = self.type_id(return_type);
        let parameters: Vec<u32> = params.iter().map(|p| self.type_id(p)).collect();
        let key = (return_type_idx, parameters);
        if let Some(&id) = self.protos.get(&key) {
            return id;
        }
        let shorty: String = std::iter::once(return_type)
            .chain(params.iter().copied())
            .map(shorty_char)
            .collect();
        let shorty_idx = self.string(&shorty);
        let id = self.dex.protos.len() as u32;
        self.dex.protos.push(ProtoId {
            shorty_idx,
            return_type_idx,
            parameters: key.1.clone(),
        });
        self.protos.insert(key, id);
        id
    }

    pub fn field(&mut self, class: &str, name: &str, type_name: &str) -> u32 {
        let class_idx = self.type_id(class) as u16;
        let type_idx = self.type_id(type_name) as u16;
        let name_idx = self.string(name);
        let key = (class_idx, type_idx, name_idx);
        if let Some(&id) = self.fields.get(&key) {
            return id;
        }
        let id = self.dex.fields.len() as u32;
        self.dex.fields.push(FieldId {
            class_idx,
            type_idx,
            name_idx,
        });
        self.fields.insert(key, id);
        id
    }

    pub fn method(&mut self, class: &str, name: &str, return_type: &str, params: &[&str]) -> u32 {
        let class_idx = self.type_id(class) as u16;
        let proto_idx = self.proto(return_type, params) as u16;
        let name_idx = self.string(name);
        let key = (class_idx, proto_idx, name_idx);
        if let Some(&id) = self.methods.get(&key) {
            return id;
        }
        let id = self.dex.methods.len() as u32;
        self.dex.methods.push(MethodId {
            class_idx,
            proto_idx,
            name_idx,
        });
        self.methods.insert(key, id);
        id
    }

    /// Declare a class. `superclass` is `None` only for a root class.
    pub fn class(&mut self, descriptor: &str, superclass: Option<&str>) -> ClassHandle {
        let class_idx = self.type_id(descriptor);
        let superclass_idx = superclass.map_or(NO_INDEX, |s| self.type_id(s));
        self.dex.class_defs.push(ClassDef {
            class_idx,
            access_flags: ACC_PUBLIC,
            superclass_idx,
            interfaces: Vec::new(),
            source_file_idx: NO_INDEX,
            class_data: ClassData::default(),
        });
        ClassHandle(self.dex.class_defs.len() - 1)
    }

    fn data(&mut self, class: ClassHandle) -> &mut ClassData {
        &mut self.dex.class_defs[class.0].class_data
    }

    pub fn add_static_field(&mut self, class: ClassHandle, field_idx: u32, access_flags: u32) {
        self.data(class).static_fields.push(EncodedField {
            field_idx,
            access_flags,
        });
    }

    pub fn add_instance_field(&mut self, class: ClassHandle, field_idx: u32, access_flags: u32) {
        self.data(class).instance_fields.push(EncodedField {
            field_idx,
            access_flags,
        });
    }

    pub fn add_direct_method(
        &mut self,
        class: ClassHandle,
        method_idx: u32,
        access_flags: u32,
        code: Option<CodeItem>,
    ) {
        self.data(class).direct_methods.push(EncodedMethod {
            method_idx,
            access_flags,
            code,
        });
    }

    pub fn add_virtual_method(
        &mut self,
        class: ClassHandle,
        method_idx: u32,
        access_flags: u32,
        code: Option<CodeItem>,
    ) {
        self.data(class).virtual_methods.push(EncodedMethod {
            method_idx,
            access_flags,
            code,
        });
    }

    /// Finish the file. Class member lists are sorted by index, as the
    /// diff encoding on disk requires, and the header is generated.
    pub fn build(self) -> DexFile {
        let mut dex = self.dex;
        for class in &mut dex.class_defs {
            let data = &mut class.class_data;
            data.static_fields.sort_by_key(|f| f.field_idx);
            data.instance_fields.sort_by_key(|f| f.field_idx);
            data.direct_methods.sort_by_key(|m| m.method_idx);
            data.virtual_methods.sort_by_key(|m| m.method_idx);
        }
        let encoded = writer::encode(&dex);
        dex.header = encoded.header;
        dex.map = encoded.map;
        dex
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_stable() {
        let mut b = DexBuilder::new();
        let s = b.string("hello");
        assert_eq!(b.string("hello"), s);
        let t = b.type_id("LFoo;");
        assert_eq!(b.type_id("LFoo;"), t);
        let m1 = b.method("LFoo;", "run", "V", &["I"]);
        let m2 = b.method("LFoo;", "run", "V", &["I"]);
        let m3 = b.method("LFoo;", "run", "V", &[]);
        assert_eq!(m1, m2);
        assert_ne!(m1, m3);
    }

    #[test]
    fn shorty_collapses_references() {
        let mut b = DexBuilder::new();
        let p = b.proto("V", &["[I", "Ljava/lang/String;", "J"]);
        let dex = b.build();
        let shorty = dex.string(dex.protos[p as usize].shorty_idx).unwrap();
        assert_eq!(shorty, "VLLJ");
    }

    #[test]
    fn build_sorts_members_by_index() {
        let mut b = DexBuilder::new();
        let foo = b.class("LFoo;", Some("Ljava/lang/Object;"));
        let late = b.method("LFoo;", "b", "V", &[]);
        let early = b.method("LFoo;", "a", "V", &[]);
        b.add_virtual_method(foo, early, ACC_PUBLIC, None);
        b.add_virtual_method(foo, late, ACC_PUBLIC, None);
        let dex = b.build();
        let ids: Vec<u32> = dex.class_defs[0]
            .class_data
            .virtual_methods
            .iter()
            .map(|m| m.method_idx)
            .collect();
        assert_eq!(ids, vec![0, 1]);
        assert_eq!(dex.header.class_defs_size, 1);
    }
}
