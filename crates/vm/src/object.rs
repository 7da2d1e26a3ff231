//! Class materialization, instantiation, arrays and field access.

use log::debug;
use sdvm_common::Instruction;

use crate::class::{
    build_vtable, is_library_class, is_wide_type, ClassKind, ClassObject, ClassRegistry,
    VtableEntry, OBJECT_CLASS,
};
use crate::error::{Fault, RuntimeError};
use crate::heap::{Array, Field, Heap, HeapObject, Instance};
use crate::machine::Vm;

/// Allocate an array of `count` elements, registering its class.
pub(crate) fn allocate_array(
    heap: &mut Heap,
    classes: &mut ClassRegistry<'_>,
    at: usize,
    descriptor: &str,
    count: i32,
) -> Result<u32, RuntimeError> {
    let length =
        u32::try_from(count).map_err(|_| RuntimeError::NegativeArraySize { at, size: count })?;
    let element = descriptor.strip_prefix('[').unwrap_or(descriptor);
    let slots = if is_wide_type(element) {
        length as usize * 2
    } else {
        length as usize
    };
    classes.register_array(descriptor);
    Ok(heap.alloc(HeapObject::Array(Array {
        class: descriptor.to_string(),
        length,
        slots: vec![[0; 4]; slots],
    })))
}

/// Position of instance field `name` declared by `class` or an ancestor.
fn instance_slot(
    classes: &ClassRegistry<'_>,
    instance: &Instance,
    class: &str,
    name: &str,
) -> Option<usize> {
    let declared_by = |field: &Field, owner: &str| {
        field
            .name
            .strip_prefix(owner)
            .and_then(|rest| rest.strip_prefix('.'))
            == Some(name)
    };
    if let Some(slot) = instance.fields.iter().position(|f| declared_by(f, class)) {
        return Some(slot);
    }
    classes
        .ancestors(class)
        .skip(1)
        .find_map(|c| instance.fields.iter().position(|f| declared_by(f, &c.name)))
}

impl<'a> Vm<'a> {
    /// Materialize `name` and its ancestors if they are not registered yet.
    pub(crate) fn ensure_class(&mut self, name: &str) -> Result<(), RuntimeError> {
        if self.classes.contains(name) {
            return Ok(());
        }
        if name.starts_with('[') {
            self.classes.register_array(name);
            return Ok(());
        }
        if is_library_class(name) {
            self.classes.register_library(name);
            return Ok(());
        }

        let dex = self.dex;
        let at = self.pc;
        let def = dex
            .class_def_by_name(name)
            .ok_or_else(|| RuntimeError::ClassNotFound {
                at,
                class: name.to_string(),
            })?;
        if !self.classes.begin(name) {
            return Err(RuntimeError::ClassHierarchyCycle {
                at,
                class: name.to_string(),
            });
        }

        let parent = match dex.superclass_name(def)? {
            Some(parent) if !is_library_class(parent) => {
                self.ensure_class(parent)?;
                Some(parent.to_string())
            }
            _ => None,
        };

        let mut own = Vec::with_capacity(def.class_data.virtual_methods.len());
        for method in &def.class_data.virtual_methods {
            own.push(VtableEntry {
                name: dex.method_name(method)?,
                method,
                method_idx: method.method_idx,
            });
        }
        let inherited = parent
            .as_deref()
            .and_then(|p| self.classes.get(p))
            .map(|p| p.vtable.as_slice())
            .unwrap_or_default();
        let vtable = build_vtable(own, inherited);

        let mut static_fields = Vec::with_capacity(def.class_data.static_fields.len());
        for field in &def.class_data.static_fields {
            let field = dex.field(field.field_idx)?;
            static_fields.push(Field::new(field.name, field.type_name));
        }

        debug!(
            "class {name}: parent {}, {} vtable entries, {} static fields",
            parent.as_deref().unwrap_or(OBJECT_CLASS),
            vtable.len(),
            static_fields.len()
        );
        self.classes.insert(ClassObject {
            name: name.to_string(),
            kind: ClassKind::User,
            parent,
            static_fields,
            vtable,
            def: Some(def),
        });

        let clinit = dex
            .find_string("<clinit>")
            .and_then(|idx| dex.direct_method(def.class_idx, idx));
        if let Some(clinit) = clinit {
            debug!("class {name}: running <clinit>");
            self.call_method(name, "<clinit>", clinit, &[])?;
        }
        Ok(())
    }

    /// Allocate an instance of `class` with its flattened field list.
    pub fn instantiate(&mut self, class: &str) -> Result<u32, RuntimeError> {
        self.ensure_class(class)?;
        let dex = self.dex;
        let mut fields = Vec::new();
        for owner in self.classes.ancestors(class) {
            let Some(def) = owner.def else { continue };
            for field in &def.class_data.instance_fields {
                let field = dex.field(field.field_idx)?;
                fields.push(Field::new(
                    format!("{}.{}", owner.name, field.name),
                    field.type_name,
                ));
            }
        }
        Ok(self
            .heap
            .alloc(HeapObject::Instance(Instance::new(class, fields))))
    }

    pub fn new_array(&mut self, descriptor: &str, count: i32) -> Result<u32, RuntimeError> {
        allocate_array(&mut self.heap, &mut self.classes, self.pc, descriptor, count)
    }

    // ---- Instance fields ----

    pub(crate) fn exec_iget(&mut self, instr: &Instruction, wide: bool) -> Result<(), RuntimeError> {
        let dex = self.dex;
        let field = dex.field(u32::from(instr.index()))?;
        let object = self.reference(usize::from(instr.b))?;
        let instance = self.heap.instance(self.pc, object)?;
        let Some(slot) = instance_slot(&self.classes, instance, field.class, field.name) else {
            let class = instance.class.clone();
            self.fault(Fault::FieldNotFound {
                at: self.pc,
                class,
                field: format!("{}.{}", field.class, field.name),
            });
            return Ok(());
        };
        let value = instance.fields[slot].clone();
        let a = usize::from(instr.a);
        if wide {
            self.set_long(a, value.long())
        } else {
            self.set_word(a, value.word())
        }
    }

    pub(crate) fn exec_iput(&mut self, instr: &Instruction, wide: bool) -> Result<(), RuntimeError> {
        let dex = self.dex;
        let field = dex.field(u32::from(instr.index()))?;
        let a = usize::from(instr.a);
        let object = self.reference(usize::from(instr.b))?;
        let long = if wide { self.long(a)? } else { 0 };
        let word = self.word(a)?;

        let at = self.pc;
        let instance = self.heap.instance(at, object)?;
        let Some(slot) = instance_slot(&self.classes, instance, field.class, field.name) else {
            let class = instance.class.clone();
            self.fault(Fault::FieldNotFound {
                at,
                class,
                field: format!("{}.{}", field.class, field.name),
            });
            return Ok(());
        };
        let target = &mut self.heap.instance_mut(at, object)?.fields[slot];
        if wide {
            target.set_long(long);
        } else {
            target.set_word(word);
        }
        Ok(())
    }

    // ---- Static fields ----

    pub(crate) fn exec_sget(&mut self, instr: &Instruction, wide: bool) -> Result<(), RuntimeError> {
        let dex = self.dex;
        let field = dex.field(u32::from(instr.index()))?;
        let a = usize::from(instr.a);

        if is_library_class(field.class) {
            let (library, mut ctx) = self.native_context();
            if let Some(reference) = library.static_field(&mut ctx, field.class, field.name)? {
                self.set_ref(a, reference)?;
            }
            return Ok(());
        }

        self.ensure_class(field.class)?;
        let Some((owner, slot)) = self.classes.find_static(field.class, field.name) else {
            self.static_miss(field.class, field.name);
            return Ok(());
        };
        let value = self
            .classes
            .get(owner)
            .map(|c| c.static_fields[slot].clone())
            .ok_or_else(|| RuntimeError::ClassNotFound {
                at: self.pc,
                class: owner.to_string(),
            })?;
        if wide {
            self.set_long(a, value.long())
        } else {
            self.set_word(a, value.word())
        }
    }

    pub(crate) fn exec_sput(&mut self, instr: &Instruction, wide: bool) -> Result<(), RuntimeError> {
        let dex = self.dex;
        let field = dex.field(u32::from(instr.index()))?;
        if is_library_class(field.class) {
            debug!("ignoring sput to {}.{}", field.class, field.name);
            return Ok(());
        }

        let a = usize::from(instr.a);
        let long = if wide { self.long(a)? } else { 0 };
        let word = self.word(a)?;
        self.ensure_class(field.class)?;
        let Some((owner, slot)) = self.classes.find_static(field.class, field.name) else {
            self.static_miss(field.class, field.name);
            return Ok(());
        };
        let owner = owner.to_string();
        if let Some(class) = self.classes.get_mut(&owner) {
            let target = &mut class.static_fields[slot];
            if wide {
                target.set_long(long);
            } else {
                target.set_word(word);
            }
        }
        Ok(())
    }

    fn static_miss(&mut self, class: &str, field: &str) {
        self.fault(Fault::StaticFieldNotFound {
            at: self.pc,
            class: class.to_string(),
            field: field.to_string(),
        });
    }

    // ---- Arrays ----

    /// Bounds-check `index`. A miss is recorded as a fault and yields `None`.
    fn array_index(&mut self, array: u32, index: i32) -> Result<Option<usize>, RuntimeError> {
        let length = self.heap.array(self.pc, array)?.length;
        match u32::try_from(index) {
            Ok(i) if i < length => Ok(Some(i as usize)),
            _ => {
                self.fault(Fault::ArrayIndexOutOfBounds {
                    at: self.pc,
                    index,
                    length,
                });
                Ok(None)
            }
        }
    }

    pub(crate) fn exec_aget(&mut self, instr: &Instruction, wide: bool) -> Result<(), RuntimeError> {
        let array = self.reference(usize::from(instr.b))?;
        let index = self.int(usize::from(instr.c))?;
        let Some(i) = self.array_index(array, index)? else {
            return Ok(());
        };
        let slots = &self.heap.array(self.pc, array)?.slots;
        let a = usize::from(instr.a);
        if wide {
            let (low, high) = match (slots.get(2 * i), slots.get(2 * i + 1)) {
                (Some(low), Some(high)) => (*low, *high),
                _ => return Err(self.not_wide(array)),
            };
            let value = i64::from_le_bytes([
                low[0], low[1], low[2], low[3], high[0], high[1], high[2], high[3],
            ]);
            self.set_long(a, value)
        } else {
            let word = slots[i];
            self.set_word(a, word)
        }
    }

    pub(crate) fn exec_aput(&mut self, instr: &Instruction, wide: bool) -> Result<(), RuntimeError> {
        let a = usize::from(instr.a);
        let array = self.reference(usize::from(instr.b))?;
        let index = self.int(usize::from(instr.c))?;
        let long = if wide { self.long(a)? } else { 0 };
        let word = self.word(a)?;
        let Some(i) = self.array_index(array, index)? else {
            return Ok(());
        };
        if wide && self.heap.array(self.pc, array)?.slots.len() < 2 * i + 2 {
            return Err(self.not_wide(array));
        }
        let slots = &mut self.heap.array_mut(self.pc, array)?.slots;
        if wide {
            let bytes = long.to_le_bytes();
            slots[2 * i] = [bytes[0], bytes[1], bytes[2], bytes[3]];
            slots[2 * i + 1] = [bytes[4], bytes[5], bytes[6], bytes[7]];
        } else {
            slots[i] = word;
        }
        Ok(())
    }

    fn not_wide(&self, array: u32) -> RuntimeError {
        RuntimeError::InvalidReference {
            at: self.pc,
            reference: array,
            expected: "a wide array",
        }
    }
}
