//! Class objects, vtables and the class registry.
//!
//! The registry owns every materialized class. Everything else refers to
//! a class by its descriptor and looks it up here.

use rustc_hash::{FxHashMap, FxHashSet};
use sdvm_dex::{ClassDef, EncodedMethod};

use crate::heap::Field;

/// Root of every user class hierarchy.
pub const OBJECT_CLASS: &str = "Ljava/lang/Object;";

/// Classes emulated by the library rather than loaded from the dex file.
pub fn is_library_class(descriptor: &str) -> bool {
    descriptor.starts_with("Ljava/")
}

/// Element types whose array slots are doubled.
pub fn is_wide_type(descriptor: &str) -> bool {
    matches!(descriptor, "J" | "D")
}

/// One dispatchable virtual method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VtableEntry<'a> {
    pub name: &'a str,
    pub method: &'a EncodedMethod,
    pub method_idx: u32,
}

/// Own methods first, then the parent's entries that none of them override.
pub fn build_vtable<'a>(
    own: Vec<VtableEntry<'a>>,
    parent: &[VtableEntry<'a>],
) -> Vec<VtableEntry<'a>> {
    let mut vtable = own;
    let inherited: Vec<VtableEntry<'a>> = parent
        .iter()
        .filter(|entry| !vtable.iter().any(|o| o.name == entry.name))
        .copied()
        .collect();
    vtable.extend(inherited);
    vtable
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassKind {
    /// Defined in the dex file.
    User,
    /// A `Ljava/...` placeholder.
    Library,
    Array,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassObject<'a> {
    pub name: String,
    pub kind: ClassKind,
    pub parent: Option<String>,
    pub static_fields: Vec<Field>,
    pub vtable: Vec<VtableEntry<'a>>,
    pub def: Option<&'a ClassDef>,
}

impl<'a> ClassObject<'a> {
    /// A class with no fields, methods or parent.
    pub fn placeholder(name: impl Into<String>, kind: ClassKind) -> Self {
        Self {
            name: name.into(),
            kind,
            parent: None,
            static_fields: Vec::new(),
            vtable: Vec::new(),
            def: None,
        }
    }

    pub fn static_field(&self, name: &str) -> Option<&Field> {
        self.static_fields.iter().find(|f| f.name == name)
    }

    pub fn vtable_entry(&self, name: &str) -> Option<&VtableEntry<'a>> {
        self.vtable.iter().find(|e| e.name == name)
    }
}

#[derive(Debug, Default)]
pub struct ClassRegistry<'a> {
    classes: FxHashMap<String, ClassObject<'a>>,
    in_progress: FxHashSet<String>,
}

impl<'a> ClassRegistry<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.classes.clear();
        self.in_progress.clear();
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&ClassObject<'a>> {
        self.classes.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ClassObject<'a>> {
        self.classes.get_mut(name)
    }

    pub fn insert(&mut self, class: ClassObject<'a>) {
        self.in_progress.remove(&class.name);
        self.classes.insert(class.name.clone(), class);
    }

    /// Mark `name` as being resolved. Returns `false` if it already is,
    /// which means its superclass chain loops.
    pub(crate) fn begin(&mut self, name: &str) -> bool {
        self.in_progress.insert(name.to_string())
    }

    /// Register a library placeholder class if it is not present yet.
    pub fn register_library(&mut self, name: &str) {
        if !self.contains(name) {
            self.insert(ClassObject::placeholder(name, ClassKind::Library));
        }
    }

    /// Register an array class by descriptor if it is not present yet.
    pub fn register_array(&mut self, descriptor: &str) {
        if !self.contains(descriptor) {
            self.insert(ClassObject::placeholder(descriptor, ClassKind::Array));
        }
    }

    /// `name` followed by its registered ancestors.
    pub fn ancestors<'r>(&'r self, name: &str) -> Ancestors<'r, 'a> {
        Ancestors {
            registry: self,
            next: self.get(name),
        }
    }

    /// A static field of `class` or of the nearest ancestor declaring it.
    pub fn find_static(&self, class: &str, field: &str) -> Option<(&str, usize)> {
        self.ancestors(class).find_map(|c| {
            c.static_fields
                .iter()
                .position(|f| f.name == field)
                .map(|slot| (c.name.as_str(), slot))
        })
    }
}

pub struct Ancestors<'r, 'a> {
    registry: &'r ClassRegistry<'a>,
    next: Option<&'r ClassObject<'a>>,
}

impl<'r, 'a> Iterator for Ancestors<'r, 'a> {
    type Item = &'r ClassObject<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current
            .parent
            .as_deref()
            .and_then(|parent| self.registry.get(parent));
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn method(idx: u32) -> EncodedMethod {
        EncodedMethod {
            method_idx: idx,
            access_flags: 0,
            code: None,
        }
    }

    fn names<'a>(vtable: &[VtableEntry<'a>]) -> Vec<(&'a str, u32)> {
        vtable.iter().map(|e| (e.name, e.method_idx)).collect()
    }

    #[test]
    fn vtable_override_moves_to_front() {
        let methods: Vec<EncodedMethod> = (0..4).map(method).collect();
        let entry = |name, i: usize| VtableEntry {
            name,
            method: &methods[i],
            method_idx: i as u32,
        };
        let parent = vec![entry("a", 0), entry("b", 1), entry("c", 2)];
        let child = build_vtable(vec![entry("b", 3)], &parent);
        assert_eq!(names(&child), vec![("b", 3), ("a", 0), ("c", 2)]);
    }

    #[test]
    fn vtable_without_parent() {
        let methods: Vec<EncodedMethod> = (0..2).map(method).collect();
        let own = vec![
            VtableEntry {
                name: "x",
                method: &methods[0],
                method_idx: 0,
            },
            VtableEntry {
                name: "y",
                method: &methods[1],
                method_idx: 1,
            },
        ];
        assert_eq!(names(&build_vtable(own, &[])), vec![("x", 0), ("y", 1)]);
    }

    #[test]
    fn ancestors_and_static_lookup() {
        let mut registry = ClassRegistry::new();
        let mut base = ClassObject::placeholder("LBase;", ClassKind::User);
        base.static_fields.push(Field::new("count", "I"));
        let mut derived = ClassObject::placeholder("LDerived;", ClassKind::User);
        derived.parent = Some("LBase;".into());
        registry.insert(base);
        registry.insert(derived);

        let chain: Vec<&str> = registry
            .ancestors("LDerived;")
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(chain, vec!["LDerived;", "LBase;"]);
        assert_eq!(registry.find_static("LDerived;", "count"), Some(("LBase;", 0)));
        assert_eq!(registry.find_static("LDerived;", "missing"), None);
    }

    #[test]
    fn begin_detects_reentry() {
        let mut registry = ClassRegistry::new();
        assert!(registry.begin("LA;"));
        assert!(!registry.begin("LA;"));
        registry.insert(ClassObject::placeholder("LA;", ClassKind::User));
        assert!(registry.begin("LA;"));
    }

    #[test]
    fn placeholders_register_once() {
        let mut registry = ClassRegistry::new();
        registry.register_array("[I");
        registry.register_library("Ljava/lang/String;");
        registry.register_array("[I");
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("[I").unwrap().kind, ClassKind::Array);
        assert!(is_library_class("Ljava/io/PrintStream;"));
        assert!(!is_library_class("LFoo;"));
        assert!(is_wide_type("D") && is_wide_type("J") && !is_wide_type("I"));
    }
}
