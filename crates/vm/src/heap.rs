//! Append-only object arena.
//!
//! A reference is `index + 1` into the arena, so `0` is null. Nothing is
//! ever freed; the arena is dropped as a whole when the VM resets.

use rustc_hash::FxHashMap;

use crate::error::RuntimeError;

/// A named 8-byte field slot, used for both instance and static fields.
///
/// Narrow values occupy bytes `0..4` as raw register contents. Wide values
/// occupy all 8 bytes as a little-endian `i64`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub type_name: String,
    pub value: [u8; 8],
}

impl Field {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            value: [0; 8],
        }
    }

    pub fn word(&self) -> [u8; 4] {
        [self.value[0], self.value[1], self.value[2], self.value[3]]
    }

    pub fn set_word(&mut self, word: [u8; 4]) {
        self.value[0..4].copy_from_slice(&word);
    }

    pub fn int(&self) -> i32 {
        i32::from_le_bytes(self.word())
    }

    pub fn long(&self) -> i64 {
        i64::from_le_bytes(self.value)
    }

    pub fn set_long(&mut self, value: i64) {
        self.value = value.to_le_bytes();
    }
}

/// Host-side state behind library objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeState {
    StringBuilder(String),
    Long(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub class: String,
    /// Flattened fields, most-derived class first.
    pub fields: Vec<Field>,
    pub native: Option<NativeState>,
}

impl Instance {
    pub fn new(class: impl Into<String>, fields: Vec<Field>) -> Self {
        Self {
            class: class.into(),
            fields,
            native: None,
        }
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Array {
    pub class: String,
    pub length: u32,
    /// One 4-byte slot per element; wide element types use two.
    pub slots: Vec<[u8; 4]>,
}

impl Array {
    pub fn int(&self, index: usize) -> Option<i32> {
        self.slots.get(index).map(|s| i32::from_le_bytes(*s))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeapObject {
    Instance(Instance),
    Array(Array),
    Str(String),
    /// The `java.lang.Class` object of a type descriptor.
    ClassMirror(String),
}

#[derive(Debug, Default)]
pub struct Heap {
    objects: Vec<HeapObject>,
    strings: FxHashMap<u32, u32>,
    mirrors: FxHashMap<String, u32>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn alloc(&mut self, object: HeapObject) -> u32 {
        self.objects.push(object);
        self.objects.len() as u32
    }

    pub fn alloc_string(&mut self, text: impl Into<String>) -> u32 {
        self.alloc(HeapObject::Str(text.into()))
    }

    /// The shared string object for a dex string id.
    pub fn intern_string(&mut self, string_id: u32, text: &str) -> u32 {
        if let Some(&reference) = self.strings.get(&string_id) {
            return reference;
        }
        let reference = self.alloc_string(text);
        self.strings.insert(string_id, reference);
        reference
    }

    /// The shared class mirror for a type descriptor.
    pub fn class_mirror(&mut self, descriptor: &str) -> u32 {
        if let Some(&reference) = self.mirrors.get(descriptor) {
            return reference;
        }
        let reference = self.alloc(HeapObject::ClassMirror(descriptor.to_string()));
        self.mirrors.insert(descriptor.to_string(), reference);
        reference
    }

    pub fn get(&self, reference: u32) -> Option<&HeapObject> {
        let index = reference.checked_sub(1)?;
        self.objects.get(index as usize)
    }

    pub fn get_mut(&mut self, reference: u32) -> Option<&mut HeapObject> {
        let index = reference.checked_sub(1)?;
        self.objects.get_mut(index as usize)
    }

    // ---- Typed access ----

    fn missing(at: usize, reference: u32, expected: &'static str) -> RuntimeError {
        if reference == 0 {
            RuntimeError::NullReference { at }
        } else {
            RuntimeError::InvalidReference {
                at,
                reference,
                expected,
            }
        }
    }

    pub fn instance(&self, at: usize, reference: u32) -> Result<&Instance, RuntimeError> {
        match self.get(reference) {
            Some(HeapObject::Instance(instance)) => Ok(instance),
            _ => Err(Self::missing(at, reference, "an instance")),
        }
    }

    pub fn instance_mut(
        &mut self,
        at: usize,
        reference: u32,
    ) -> Result<&mut Instance, RuntimeError> {
        match self.get_mut(reference) {
            Some(HeapObject::Instance(instance)) => Ok(instance),
            _ => Err(Self::missing(at, reference, "an instance")),
        }
    }

    pub fn array(&self, at: usize, reference: u32) -> Result<&Array, RuntimeError> {
        match self.get(reference) {
            Some(HeapObject::Array(array)) => Ok(array),
            _ => Err(Self::missing(at, reference, "an array")),
        }
    }

    pub fn array_mut(&mut self, at: usize, reference: u32) -> Result<&mut Array, RuntimeError> {
        match self.get_mut(reference) {
            Some(HeapObject::Array(array)) => Ok(array),
            _ => Err(Self::missing(at, reference, "an array")),
        }
    }

    pub fn string(&self, at: usize, reference: u32) -> Result<&str, RuntimeError> {
        match self.get(reference) {
            Some(HeapObject::Str(text)) => Ok(text),
            _ => Err(Self::missing(at, reference, "a string")),
        }
    }

    pub fn mirror(&self, at: usize, reference: u32) -> Result<&str, RuntimeError> {
        match self.get(reference) {
            Some(HeapObject::ClassMirror(name)) => Ok(name),
            _ => Err(Self::missing(at, reference, "a class")),
        }
    }
}
