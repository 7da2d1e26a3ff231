//! Integration tests for the sdvm VM.
//!
//! Each test builds a small dex file with `DexBuilder`, assembles the
//! method bodies with `sdvm-asm`, and runs a static `main`.

use std::cell::RefCell;
use std::io::{self, Cursor, Write};
use std::rc::Rc;

use rand_core::RngCore;
use sdvm_asm::assemble;
use sdvm_common::DecodeError;
use sdvm_dex::{CodeItem, DexBuilder, DexFile, ACC_CONSTRUCTOR, ACC_PUBLIC, ACC_STATIC};
use sdvm_vm::{
    run, Fault, JavaLang, RuntimeError, StackError, SwitchBounds, Vm, VmConfig,
};

const OBJECT: &str = "Ljava/lang/Object;";
const STRING: &str = "Ljava/lang/String;";
const PRINT_STREAM: &str = "Ljava/io/PrintStream;";
const STRING_BUILDER: &str = "Ljava/lang/StringBuilder;";

// ============================================================
// Helpers
// ============================================================

fn code(registers: u16, ins: u16, text: &str) -> CodeItem {
    CodeItem::new(registers, ins, assemble(text).unwrap())
}

/// Declare `LMain;` with a static `main` running `text`.
fn add_main(b: &mut DexBuilder, registers: u16, text: &str) {
    let class = b.class("LMain;", Some(OBJECT));
    let main = b.method("LMain;", "main", "V", &[]);
    b.add_direct_method(class, main, ACC_STATIC, Some(code(registers, 0, text)));
}

fn main_only(registers: u16, text: &str) -> DexFile {
    let mut b = DexBuilder::new();
    add_main(&mut b, registers, text);
    b.build()
}

/// Output sink shared between the test and the VM's library.
#[derive(Clone, Default)]
struct Captured(Rc<RefCell<Vec<u8>>>);

impl Captured {
    fn text(&self) -> String {
        String::from_utf8(self.0.borrow().clone()).unwrap()
    }
}

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct FixedRng(u64);

impl RngCore for FixedRng {
    fn next_u32(&mut self) -> u32 {
        self.0 as u32
    }

    fn next_u64(&mut self) -> u64 {
        self.0
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        dest.fill(0);
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        dest.fill(0);
        Ok(())
    }
}

fn quiet_vm(dex: &DexFile, config: VmConfig) -> Vm<'_> {
    let library = JavaLang::new(Box::new(io::sink()), Box::new(io::empty()));
    Vm::with_library(dex, config, Box::new(library))
}

/// Run `main` with default configuration and no console.
fn run_main(dex: &DexFile) -> Vm<'_> {
    let mut vm = quiet_vm(dex, VmConfig::default());
    vm.start("main").unwrap();
    vm
}

fn run_err(dex: &DexFile) -> RuntimeError {
    quiet_vm(dex, VmConfig::default())
        .start("main")
        .unwrap_err()
}

/// Run `main` feeding `input` to stdin; returns the VM result and stdout.
fn run_with_io(dex: &DexFile, input: &str) -> (Result<Vec<Fault>, RuntimeError>, String) {
    let out = Captured::default();
    let library = JavaLang::new(
        Box::new(out.clone()),
        Box::new(Cursor::new(input.as_bytes().to_vec())),
    );
    let mut vm = Vm::with_library(dex, VmConfig::default(), Box::new(library));
    let result = vm.start("main").map(|()| vm.take_faults());
    (result, out.text())
}

// ============================================================
// Arithmetic and constants
// ============================================================

#[test]
fn int_arithmetic() {
    let dex = main_only(
        6,
        "const/4 v0, 7
         const/4 v1, 2
         add-int v2, v0, v1
         sub-int v3, v0, v1
         mul-int v4, v0, v1
         div-int v5, v0, v1
         return-void",
    );
    let vm = run_main(&dex);
    let regs = vm.registers();
    assert_eq!(regs.get_int(2), Some(9));
    assert_eq!(regs.get_int(3), Some(5));
    assert_eq!(regs.get_int(4), Some(14));
    assert_eq!(regs.get_int(5), Some(3));
}

#[test]
fn negative_division_and_remainder() {
    let dex = main_only(
        6,
        "const/16 v0, -7
         const/4 v1, 2
         div-int v2, v0, v1
         rem-int v3, v0, v1
         const/4 v0, 7
         const/4 v1, -2
         div-int v4, v0, v1
         rem-int/lit8 v5, v0, -2
         return-void",
    );
    let vm = run_main(&dex);
    let regs = vm.registers();
    assert_eq!(regs.get_int(2), Some(-3));
    assert_eq!(regs.get_int(3), Some(-1));
    assert_eq!(regs.get_int(4), Some(-3));
    assert_eq!(regs.get_int(5), Some(1));
}

#[test]
fn literal_forms() {
    let dex = main_only(
        12,
        "const/4 v0, -8
         const/16 v1, -300
         const v2, 0x12345678
         add-int/lit8 v3, v1, 100
         rsub-int/lit8 v4, v0, 10
         and-int/lit8 v5, v2, 15
         mul-int/lit8 v6, v0, -3
         const-wide/16 v7, -2
         const-wide/high16 v9, 0x4000
         add-int/2addr v0, v1
         return-void",
    );
    let vm = run_main(&dex);
    let regs = vm.registers();
    assert_eq!(regs.get_int(0), Some(-308));
    assert_eq!(regs.get_int(1), Some(-300));
    assert_eq!(regs.get_int(2), Some(0x1234_5678));
    assert_eq!(regs.get_int(3), Some(-200));
    assert_eq!(regs.get_int(4), Some(18));
    assert_eq!(regs.get_int(5), Some(8));
    assert_eq!(regs.get_int(6), Some(24));
    assert_eq!(regs.get_long(7), Some(-2));
    assert_eq!(regs.get_double(9), Some(2.0));
}

#[test]
fn double_conversions() {
    let dex = main_only(
        6,
        "const/4 v0, 3
         int-to-double v2, v0
         add-double/2addr v2, v2
         mul-double/2addr v2, v2
         double-to-int v4, v2
         return-void",
    );
    let vm = run_main(&dex);
    assert_eq!(vm.registers().get_double(2), Some(36.0));
    assert_eq!(vm.registers().get_int(4), Some(36));
}

#[test]
fn division_by_zero_is_fatal() {
    let dex = main_only(
        3,
        "const/4 v0, 1
         const/4 v1, 0
         div-int v2, v0, v1",
    );
    assert_eq!(run_err(&dex), RuntimeError::DivisionByZero { at: 4 });
}

#[test]
fn const_string_is_interned() {
    let mut b = DexBuilder::new();
    let hi = b.string("hi");
    add_main(
        &mut b,
        2,
        &format!("const-string v0, string@{hi}\nconst-string v1, string@{hi}\nreturn-void"),
    );
    let dex = b.build();
    let vm = run_main(&dex);
    let first = vm.registers().get_ref(0).unwrap();
    assert_eq!(vm.registers().get_ref(1), Some(first));
    assert_eq!(vm.heap().string(0, first).unwrap(), "hi");
}

// ============================================================
// Branches and switches
// ============================================================

fn branch_program(second: i32) -> DexFile {
    main_only(
        4,
        &format!(
            "const/4 v0, 1
             const/4 v1, {second}
             if-eq v0, v1, +3
             const/4 v2, 5
             const/4 v3, 6
             return-void"
        ),
    )
}

#[test]
fn if_eq_taken_skips_by_offset() {
    let dex = branch_program(1);
    let vm = run_main(&dex);
    assert_eq!(vm.registers().get_int(2), Some(0));
    assert_eq!(vm.registers().get_int(3), Some(6));
}

#[test]
fn if_eq_not_taken_falls_through_four_bytes() {
    let dex = branch_program(2);
    let vm = run_main(&dex);
    assert_eq!(vm.registers().get_int(2), Some(5));
    assert_eq!(vm.registers().get_int(3), Some(6));
}

#[test]
fn zero_compare_loop() {
    // Sum 5 + 4 + 3 + 2 + 1.
    let dex = main_only(
        2,
        "const/4 v0, 5
         const/4 v1, 0
         add-int/2addr v1, v0
         add-int/lit8 v0, v0, -1
         if-nez v0, -3
         return-void",
    );
    let vm = run_main(&dex);
    assert_eq!(vm.registers().get_int(1), Some(15));
}

#[test]
fn backward_branch_past_start_is_fatal() {
    let dex = main_only(1, "goto -1");
    assert_eq!(
        run_err(&dex),
        RuntimeError::BranchOutOfRange { at: 0, target: -2 }
    );
}

/// `v1` ends up 1 for the default arm, 2 for key 10 and 3 for key 11.
fn switch_program(value: i32) -> DexFile {
    main_only(
        2,
        &format!(
            "const/16 v0, {value}
             const/4 v1, 0
             packed-switch v0, +9
             const/4 v1, 1
             return-void
             const/4 v1, 2
             return-void
             const/4 v1, 3
             return-void
             packed-switch-payload 10, +5, +7"
        ),
    )
}

fn run_switch(value: i32, bounds: SwitchBounds) -> Result<i32, RuntimeError> {
    let dex = switch_program(value);
    let config = VmConfig {
        switch_bounds: bounds,
        ..VmConfig::default()
    };
    let mut vm = quiet_vm(&dex, config);
    vm.start("main")?;
    Ok(vm.registers().get_int(1).unwrap())
}

#[test]
fn packed_switch_strict_bounds() {
    assert_eq!(run_switch(10, SwitchBounds::Strict), Ok(2));
    assert_eq!(run_switch(11, SwitchBounds::Strict), Ok(3));
    assert_eq!(run_switch(12, SwitchBounds::Strict), Ok(1));
    assert_eq!(run_switch(9, SwitchBounds::Strict), Ok(1));
}

#[test]
fn packed_switch_legacy_bounds() {
    assert_eq!(run_switch(10, SwitchBounds::Legacy), Ok(2));
    assert_eq!(run_switch(11, SwitchBounds::Legacy), Ok(3));
    assert_eq!(
        run_switch(12, SwitchBounds::Legacy),
        Err(RuntimeError::MalformedSwitch { at: 6 })
    );
    assert_eq!(
        run_switch(9, SwitchBounds::Legacy),
        Err(RuntimeError::MalformedSwitch { at: 6 })
    );
}

// ============================================================
// Invokes and the call stack
// ============================================================

#[test]
fn invoke_marshals_arguments_into_highest_registers() {
    let mut b = DexBuilder::new();
    let class = b.class("LMain;", Some(OBJECT));
    let main = b.method("LMain;", "main", "V", &[]);
    let first = b.method("LMain;", "first", "I", &["I", "I"]);
    let second = b.method("LMain;", "second", "I", &["I", "I"]);
    let lower = b.method("LMain;", "lower", "I", &["I", "I"]);
    b.add_direct_method(class, first, ACC_STATIC, Some(code(4, 2, "return v2")));
    b.add_direct_method(class, second, ACC_STATIC, Some(code(4, 2, "return v3")));
    b.add_direct_method(class, lower, ACC_STATIC, Some(code(4, 2, "return v1")));
    let main_code = format!(
        "const/4 v0, 5
         const/4 v1, 3
         invoke-static {{v0, v1}}, method@{first}
         move-result v2
         invoke-static {{v0, v1}}, method@{second}
         move-result v3
         invoke-static {{v0, v1}}, method@{lower}
         move-result v4
         return-void"
    );
    b.add_direct_method(class, main, ACC_STATIC, Some(code(6, 0, &main_code)));
    let dex = b.build();

    let vm = run_main(&dex);
    let regs = vm.registers();
    assert_eq!(regs.get_int(2), Some(5));
    assert_eq!(regs.get_int(3), Some(3));
    assert_eq!(regs.get_int(4), Some(0));
    // Caller registers survive the calls.
    assert_eq!(regs.get_int(0), Some(5));
    assert_eq!(regs.get_int(1), Some(3));
    assert_eq!(vm.stack().sp(), vm.stack().capacity());
    assert!(vm.faults().is_empty());
}

#[test]
fn wide_return_through_result_buffer() {
    let mut b = DexBuilder::new();
    let class = b.class("LMain;", Some(OBJECT));
    let main = b.method("LMain;", "main", "V", &[]);
    let big = b.method("LMain;", "big", "J", &[]);
    b.add_direct_method(
        class,
        big,
        ACC_STATIC,
        Some(code(2, 0, "const-wide/32 v0, -123456789\nreturn-wide v0")),
    );
    let main_code = format!("invoke-static {{}}, method@{big}\nmove-result-wide v4\nreturn-void");
    b.add_direct_method(class, main, ACC_STATIC, Some(code(6, 0, &main_code)));
    let dex = b.build();

    let vm = run_main(&dex);
    assert_eq!(vm.registers().get_long(4), Some(-123_456_789));
}

/// `countdown(n)` recurses to depth `n` and returns `n`.
fn countdown_dex(n: i32) -> DexFile {
    let mut b = DexBuilder::new();
    let class = b.class("LMain;", Some(OBJECT));
    let main = b.method("LMain;", "main", "V", &[]);
    let countdown = b.method("LMain;", "countdown", "I", &["I"]);
    let body = format!(
        "if-eqz v1, +11
         add-int/lit8 v0, v1, -1
         invoke-static {{v0}}, method@{countdown}
         move-result v0
         add-int/lit8 v0, v0, 1
         return v0
         return v1"
    );
    b.add_direct_method(class, countdown, ACC_STATIC, Some(code(2, 1, &body)));
    let main_code = format!(
        "const/16 v0, {n}
         const/16 v1, 77
         invoke-static {{v0}}, method@{countdown}
         move-result v2
         return-void"
    );
    b.add_direct_method(class, main, ACC_STATIC, Some(code(3, 0, &main_code)));
    b.build()
}

#[test]
fn nested_invokes_keep_stack_symmetric() {
    let dex = countdown_dex(10);
    let vm = run_main(&dex);
    assert_eq!(vm.registers().get_int(2), Some(10));
    assert_eq!(vm.registers().get_int(1), Some(77));
    assert_eq!(vm.stack().sp(), vm.stack().capacity());
    assert_eq!(vm.stack().fp(), vm.stack().capacity());
}

#[test]
fn call_depth_limit() {
    let config = VmConfig {
        max_call_depth: 5,
        ..VmConfig::default()
    };
    let shallow = countdown_dex(3);
    let mut vm = quiet_vm(&shallow, config.clone());
    vm.start("main").unwrap();
    assert_eq!(vm.registers().get_int(2), Some(3));

    let deep = countdown_dex(10);
    let err = quiet_vm(&deep, config).start("main").unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Stack {
            source: StackError::TooDeep { limit: 5 },
            ..
        }
    ));
}

#[test]
fn small_stack_overflows() {
    let config = VmConfig {
        stack_size: 64,
        ..VmConfig::default()
    };
    let dex = countdown_dex(10);
    let err = quiet_vm(&dex, config).start("main").unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Stack {
            source: StackError::Overflow,
            ..
        }
    ));
}

#[test]
fn fallthrough_without_return_pops_frame() {
    let mut b = DexBuilder::new();
    let class = b.class("LMain;", Some(OBJECT));
    let main = b.method("LMain;", "main", "V", &[]);
    let spin = b.method("LMain;", "spin", "V", &[]);
    b.add_direct_method(class, spin, ACC_STATIC, Some(code(1, 0, "const/4 v0, 7")));
    let main_code = format!("const/4 v0, 1\ninvoke-static {{}}, method@{spin}\nreturn-void");
    b.add_direct_method(class, main, ACC_STATIC, Some(code(1, 0, &main_code)));
    let dex = b.build();

    let vm = run_main(&dex);
    assert_eq!(vm.registers().get_int(0), Some(1));
    assert_eq!(vm.stack().sp(), vm.stack().capacity());
}

#[test]
fn too_many_invoke_arguments() {
    // invoke-static with an argument count of 6.
    let mut b = DexBuilder::new();
    let class = b.class("LMain;", Some(OBJECT));
    let main = b.method("LMain;", "main", "V", &[]);
    let insns = vec![0x71, 0x60, main as u8, 0x00, 0x00, 0x00, 0x0e, 0x00];
    b.add_direct_method(class, main, ACC_STATIC, Some(CodeItem::new(6, 0, insns)));
    let dex = b.build();
    assert_eq!(
        run_err(&dex),
        RuntimeError::TooManyArguments { at: 0, count: 6 }
    );
}

// ============================================================
// Classes, objects and fields
// ============================================================

/// `LFoo;` extends `LBar;`; `LFoo;.<clinit>` stores 42 into static `x`.
fn foo_bar_dex() -> DexFile {
    let mut b = DexBuilder::new();
    b.class("LBar;", Some(OBJECT));
    let foo = b.class("LFoo;", Some("LBar;"));
    let x = b.field("LFoo;", "x", "I");
    b.add_static_field(foo, x, ACC_STATIC);
    let clinit = b.method("LFoo;", "<clinit>", "V", &[]);
    let body = format!("const/16 v0, 42\nsput v0, field@{x}\nreturn-void");
    b.add_direct_method(
        foo,
        clinit,
        ACC_STATIC | ACC_CONSTRUCTOR,
        Some(code(1, 0, &body)),
    );
    add_main(&mut b, 1, &format!("sget v0, field@{x}\nreturn-void"));
    b.build()
}

#[test]
fn resolving_class_runs_static_initializer() {
    let dex = foo_bar_dex();
    let mut vm = quiet_vm(&dex, VmConfig::default());
    let foo = vm.resolve_class("LFoo;").unwrap();
    assert_eq!(foo.parent.as_deref(), Some("LBar;"));
    assert_eq!(foo.static_field("x").unwrap().int(), 42);
    assert!(vm.classes().contains("LBar;"));
    assert!(vm.classes().get("LBar;").unwrap().parent.is_none());
}

#[test]
fn static_get_triggers_initializer() {
    let dex = foo_bar_dex();
    let vm = run_main(&dex);
    assert_eq!(vm.registers().get_int(0), Some(42));
}

#[test]
fn hierarchy_cycle_is_fatal() {
    let mut b = DexBuilder::new();
    b.class("LA;", Some("LB;"));
    b.class("LB;", Some("LA;"));
    let dex = b.build();
    let mut vm = quiet_vm(&dex, VmConfig::default());
    assert_eq!(
        vm.resolve_class("LA;").unwrap_err(),
        RuntimeError::ClassHierarchyCycle {
            at: 0,
            class: "LA;".into()
        }
    );
}

#[test]
fn unknown_class_is_fatal() {
    let mut b = DexBuilder::new();
    let missing = b.type_id("LMissing;");
    add_main(&mut b, 1, &format!("new-instance v0, type@{missing}"));
    let dex = b.build();
    assert_eq!(
        run_err(&dex),
        RuntimeError::ClassNotFound {
            at: 0,
            class: "LMissing;".into()
        }
    );
}

/// `LDog;` extends `LAnimal;` and overrides `sound`; `legs` is inherited.
struct Zoo {
    animal: u32,
    dog: u32,
    sound: u32,
    legs: u32,
    count: u32,
    dog_count: u32,
    ghost: u32,
}

fn zoo(main_body: impl Fn(&Zoo) -> String) -> DexFile {
    let mut b = DexBuilder::new();
    let animal_class = b.class("LAnimal;", Some(OBJECT));
    let dog_class = b.class("LDog;", Some("LAnimal;"));
    let animal = b.type_id("LAnimal;");
    let dog = b.type_id("LDog;");

    let count = b.field("LAnimal;", "count", "I");
    b.add_instance_field(animal_class, count, ACC_PUBLIC);
    let dog_count = b.field("LDog;", "count", "I");
    let ghost = b.field("LDog;", "ghost", "I");

    let sound = b.method("LAnimal;", "sound", "I", &[]);
    let legs = b.method("LAnimal;", "legs", "I", &[]);
    let dog_sound = b.method("LDog;", "sound", "I", &[]);
    let ret = |n: i32| code(2, 1, &format!("const/4 v0, {n}\nreturn v0"));
    b.add_virtual_method(animal_class, sound, ACC_PUBLIC, Some(ret(1)));
    b.add_virtual_method(animal_class, legs, ACC_PUBLIC, Some(ret(4)));
    b.add_virtual_method(dog_class, dog_sound, ACC_PUBLIC, Some(ret(2)));

    let ids = Zoo {
        animal,
        dog,
        sound,
        legs,
        count,
        dog_count,
        ghost,
    };
    add_main(&mut b, 8, &main_body(&ids));
    b.build()
}

#[test]
fn virtual_dispatch_uses_receiver_vtable() {
    let dex = zoo(|z| {
        format!(
            "new-instance v0, type@{dog}
             invoke-virtual {{v0}}, method@{sound}
             move-result v1
             invoke-virtual {{v0}}, method@{legs}
             move-result v2
             new-instance v3, type@{animal}
             invoke-virtual {{v3}}, method@{sound}
             move-result v4
             return-void",
            dog = z.dog,
            animal = z.animal,
            sound = z.sound,
            legs = z.legs,
        )
    });
    let vm = run_main(&dex);
    assert_eq!(vm.registers().get_int(1), Some(2));
    assert_eq!(vm.registers().get_int(2), Some(4));
    assert_eq!(vm.registers().get_int(4), Some(1));
    let dog = vm.classes().get("LDog;").unwrap();
    let names: Vec<&str> = dog.vtable.iter().map(|e| e.name).collect();
    assert_eq!(names, vec!["sound", "legs"]);
}

#[test]
fn instance_fields_resolve_through_ancestors() {
    let dex = zoo(|z| {
        format!(
            "new-instance v0, type@{dog}
             const/16 v1, 9
             iput v1, v0, field@{count}
             iget v2, v0, field@{dog_count}
             iget v3, v0, field@{ghost}
             return-void",
            dog = z.dog,
            count = z.count,
            dog_count = z.dog_count,
            ghost = z.ghost,
        )
    });
    let vm = run_main(&dex);
    assert_eq!(vm.registers().get_int(2), Some(9));
    assert_eq!(vm.registers().get_int(3), Some(0));
    assert_eq!(
        vm.faults(),
        &[Fault::FieldNotFound {
            at: 16,
            class: "LDog;".into(),
            field: "LDog;.ghost".into(),
        }]
    );
}

#[test]
fn field_access_on_null_is_fatal() {
    let dex = zoo(|z| format!("const/4 v0, 0\niget v1, v0, field@{}", z.count));
    assert_eq!(run_err(&dex), RuntimeError::NullReference { at: 2 });
}

#[test]
fn missing_methods_are_recorded() {
    let mut b = DexBuilder::new();
    let thing_class = b.class("LThing;", Some(OBJECT));
    let thing = b.type_id("LThing;");
    let missing = b.method("LThing;", "missing", "V", &[]);
    let object_init = b.method(OBJECT, "<init>", "V", &[]);
    let bodiless = b.method("LThing;", "bodiless", "V", &[]);
    b.add_direct_method(thing_class, bodiless, ACC_STATIC, None);
    add_main(
        &mut b,
        1,
        &format!(
            "new-instance v0, type@{thing}
             invoke-direct {{v0}}, method@{object_init}
             invoke-virtual {{v0}}, method@{missing}
             invoke-static {{}}, method@{bodiless}
             return-void"
        ),
    );
    let dex = b.build();

    let vm = run_main(&dex);
    assert_eq!(
        vm.faults(),
        &[
            Fault::MethodNotFound {
                at: 10,
                class: "LThing;".into(),
                method: "missing".into(),
            },
            Fault::NoCode {
                at: 16,
                class: "LThing;".into(),
                method: "bodiless".into(),
            },
        ]
    );
}

// ============================================================
// Arrays
// ============================================================

#[test]
fn array_access_and_bounds() {
    let mut b = DexBuilder::new();
    let ints = b.type_id("[I");
    let longs = b.type_id("[J");
    add_main(
        &mut b,
        14,
        &format!(
            "const/4 v0, 3
             new-array v1, v0, type@{ints}
             const/4 v2, 2
             const/4 v3, 9
             aput v3, v1, v2
             aget v4, v1, v2
             array-length v5, v1
             aget v6, v1, v0
             const-wide/16 v8, -5
             new-array v10, v0, type@{longs}
             aput-wide v8, v10, v2
             aget-wide v12, v10, v2
             return-void"
        ),
    );
    let dex = b.build();

    let vm = run_main(&dex);
    let regs = vm.registers();
    assert_eq!(regs.get_int(4), Some(9));
    assert_eq!(regs.get_int(5), Some(3));
    assert_eq!(regs.get_int(6), Some(0));
    assert_eq!(regs.get_long(12), Some(-5));
    assert!(matches!(
        vm.faults(),
        [Fault::ArrayIndexOutOfBounds {
            index: 3,
            length: 3,
            ..
        }]
    ));
    assert!(vm.classes().contains("[I"));
    assert!(vm.classes().contains("[J"));
    let longs = vm.heap().array(0, regs.get_ref(10).unwrap()).unwrap();
    assert_eq!(longs.slots.len(), 6);
}

#[test]
fn negative_array_size_is_fatal() {
    let mut b = DexBuilder::new();
    let ints = b.type_id("[I");
    add_main(
        &mut b,
        2,
        &format!("const/4 v0, -1\nnew-array v1, v0, type@{ints}"),
    );
    let dex = b.build();
    assert_eq!(
        run_err(&dex),
        RuntimeError::NegativeArraySize { at: 2, size: -1 }
    );
}

#[test]
fn filled_new_array_lands_in_result() {
    let mut b = DexBuilder::new();
    let ints = b.type_id("[I");
    add_main(
        &mut b,
        5,
        &format!(
            "const/4 v0, 7
             const/4 v1, 8
             filled-new-array {{v0, v1}}, type@{ints}
             move-result-object v2
             const/4 v4, 1
             aget v3, v2, v4
             return-void"
        ),
    );
    let dex = b.build();
    let vm = run_main(&dex);
    assert_eq!(vm.registers().get_int(3), Some(8));
}

// ============================================================
// Library classes
// ============================================================

#[test]
fn println_writes_to_injected_stream() {
    let mut b = DexBuilder::new();
    let out = b.field("Ljava/lang/System;", "out", PRINT_STREAM);
    let hello = b.string("hello");
    let println_s = b.method(PRINT_STREAM, "println", "V", &[STRING]);
    let println_i = b.method(PRINT_STREAM, "println", "V", &["I"]);
    let println_j = b.method(PRINT_STREAM, "println", "V", &["J"]);
    let println = b.method(PRINT_STREAM, "println", "V", &[]);
    let print_c = b.method(PRINT_STREAM, "print", "V", &["C"]);
    let print_z = b.method(PRINT_STREAM, "print", "V", &["Z"]);
    add_main(
        &mut b,
        4,
        &format!(
            "sget-object v0, field@{out}
             const-string v1, string@{hello}
             invoke-virtual {{v0, v1}}, method@{println_s}
             const/16 v2, -12
             invoke-virtual {{v0, v2}}, method@{println_i}
             const-wide/16 v2, 1234
             invoke-virtual {{v0, v2, v3}}, method@{println_j}
             const/16 v2, 65
             invoke-virtual {{v0, v2}}, method@{print_c}
             const/4 v2, 1
             invoke-virtual {{v0, v2}}, method@{print_z}
             invoke-virtual {{v0}}, method@{println}
             const/4 v1, 0
             invoke-virtual {{v0, v1}}, method@{println_s}
             return-void"
        ),
    );
    let dex = b.build();

    let (result, output) = run_with_io(&dex, "");
    assert_eq!(result, Ok(vec![]));
    assert_eq!(output, "hello\n-12\n1234\nAtrue\nnull\n");
}

#[test]
fn string_builder_and_string_methods() {
    let mut b = DexBuilder::new();
    let sb = b.type_id(STRING_BUILDER);
    let prefix = b.string("x=");
    let init = b.method(STRING_BUILDER, "<init>", "V", &[]);
    let append_s = b.method(STRING_BUILDER, "append", STRING_BUILDER, &[STRING]);
    let append_i = b.method(STRING_BUILDER, "append", STRING_BUILDER, &["I"]);
    let to_string = b.method(STRING_BUILDER, "toString", STRING, &[]);
    let char_at = b.method(STRING, "charAt", "C", &["I"]);
    let length = b.method(STRING, "length", "I", &[]);
    let compare = b.method(STRING, "compareTo", "I", &[STRING]);
    add_main(
        &mut b,
        8,
        &format!(
            "new-instance v0, type@{sb}
             invoke-direct {{v0}}, method@{init}
             const-string v1, string@{prefix}
             invoke-virtual {{v0, v1}}, method@{append_s}
             move-result-object v0
             const/16 v2, 42
             invoke-virtual {{v0, v2}}, method@{append_i}
             move-result-object v0
             invoke-virtual {{v0}}, method@{to_string}
             move-result-object v3
             invoke-virtual {{v3}}, method@{length}
             move-result v4
             const/4 v2, 2
             invoke-virtual {{v3, v2}}, method@{char_at}
             move-result v5
             const/4 v2, 7
             invoke-virtual {{v3, v2}}, method@{char_at}
             move-result v6
             invoke-virtual {{v3, v1}}, method@{compare}
             move-result v7
             return-void"
        ),
    );
    let dex = b.build();

    let vm = run_main(&dex);
    let regs = vm.registers();
    let text = regs.get_ref(3).unwrap();
    assert_eq!(vm.heap().string(0, text).unwrap(), "x=42");
    assert_eq!(regs.get_int(4), Some(4));
    assert_eq!(regs.get_int(5), Some(i32::from(b'4')));
    assert_eq!(regs.get_int(6), Some(0));
    assert_eq!(regs.get_int(7), Some(2));
    assert!(matches!(
        vm.faults(),
        [Fault::StringIndexOutOfBounds {
            index: 7,
            length: 4,
            ..
        }]
    ));
}

#[test]
fn read_line_until_eof() {
    let mut b = DexBuilder::new();
    let reader = b.type_id("Ljava/io/BufferedReader;");
    let init = b.method("Ljava/io/BufferedReader;", "<init>", "V", &["Ljava/io/Reader;"]);
    let read_line = b.method("Ljava/io/BufferedReader;", "readLine", STRING, &[]);
    add_main(
        &mut b,
        4,
        &format!(
            "new-instance v0, type@{reader}
             invoke-direct {{v0, v1}}, method@{init}
             invoke-virtual {{v0}}, method@{read_line}
             move-result-object v1
             invoke-virtual {{v0}}, method@{read_line}
             move-result-object v2
             invoke-virtual {{v0}}, method@{read_line}
             move-result-object v3
             return-void"
        ),
    );
    let dex = b.build();

    let library = JavaLang::new(
        Box::new(io::sink()),
        Box::new(Cursor::new(b"first line\r\nsecond\n".to_vec())),
    );
    let mut vm = Vm::with_library(&dex, VmConfig::default(), Box::new(library));
    vm.start("main").unwrap();
    let regs = vm.registers();
    assert_eq!(vm.heap().string(0, regs.get_ref(1).unwrap()).unwrap(), "first line");
    assert_eq!(vm.heap().string(0, regs.get_ref(2).unwrap()).unwrap(), "second");
    assert_eq!(regs.get_ref(3), Some(0));
}

#[test]
fn boxed_long_roundtrip() {
    let mut b = DexBuilder::new();
    let text = b.string("  -123abc");
    let value_of = b.method("Ljava/lang/Long;", "valueOf", "Ljava/lang/Long;", &[STRING]);
    let long_value = b.method("Ljava/lang/Long;", "longValue", "J", &[]);
    add_main(
        &mut b,
        4,
        &format!(
            "const-string v0, string@{text}
             invoke-static {{v0}}, method@{value_of}
             move-result-object v1
             invoke-virtual {{v1}}, method@{long_value}
             move-result-wide v2
             return-void"
        ),
    );
    let dex = b.build();
    let vm = run_main(&dex);
    assert_eq!(vm.registers().get_long(2), Some(-123));
}

#[test]
fn math_random_uses_injected_rng() {
    let mut b = DexBuilder::new();
    let random = b.method("Ljava/lang/Math;", "random", "D", &[]);
    add_main(
        &mut b,
        2,
        &format!("invoke-static {{}}, method@{random}\nmove-result-wide v0\nreturn-void"),
    );
    let dex = b.build();

    let library = JavaLang::new(Box::new(io::sink()), Box::new(io::empty()))
        .with_rng(Box::new(FixedRng(1 << 63)));
    let mut vm = Vm::with_library(&dex, VmConfig::default(), Box::new(library));
    vm.start("main").unwrap();
    assert_eq!(vm.registers().get_double(0), Some(0.5));
}

#[test]
fn reflective_multi_dimensional_array() {
    let mut b = DexBuilder::new();
    let int_type = b.field("Ljava/lang/Integer;", "TYPE", "Ljava/lang/Class;");
    let ints = b.type_id("[I");
    let new_instance = b.method(
        "Ljava/lang/reflect/Array;",
        "newInstance",
        OBJECT,
        &["Ljava/lang/Class;", "[I"],
    );
    add_main(
        &mut b,
        9,
        &format!(
            "sget-object v0, field@{int_type}
             const/4 v1, 2
             new-array v2, v1, type@{ints}
             const/4 v3, 0
             const/4 v4, 3
             aput v4, v2, v3
             const/4 v3, 1
             const/4 v4, 4
             aput v4, v2, v3
             invoke-static {{v0, v2}}, method@{new_instance}
             move-result-object v5
             array-length v6, v5
             const/4 v3, 2
             aget-object v7, v5, v3
             array-length v8, v7
             return-void"
        ),
    );
    let dex = b.build();

    let vm = run_main(&dex);
    let regs = vm.registers();
    assert_eq!(regs.get_int(6), Some(3));
    assert_eq!(regs.get_int(8), Some(4));
    let outer = vm.heap().array(0, regs.get_ref(5).unwrap()).unwrap();
    assert_eq!(outer.class, "[[I");
    let inner = vm.heap().array(0, regs.get_ref(7).unwrap()).unwrap();
    assert_eq!(inner.class, "[I");
}

// ============================================================
// Whole programs
// ============================================================

#[test]
fn program_survives_serialization() {
    let mut b = DexBuilder::new();
    let out = b.field("Ljava/lang/System;", "out", PRINT_STREAM);
    let println_i = b.method(PRINT_STREAM, "println", "V", &["I"]);
    let class = b.class("LMain;", Some(OBJECT));
    let main = b.method("LMain;", "main", "V", &[]);
    let square = b.method("LMain;", "square", "I", &["I"]);
    b.add_direct_method(
        class,
        square,
        ACC_STATIC,
        Some(code(2, 1, "mul-int v0, v1, v1\nreturn v0")),
    );
    let main_code = format!(
        "sget-object v0, field@{out}
         const/4 v1, 1
         invoke-static {{v1}}, method@{square}
         move-result v2
         invoke-virtual {{v0, v2}}, method@{println_i}
         add-int/lit8 v1, v1, 1
         const/4 v3, 4
         if-le v1, v3, -10
         return-void"
    );
    b.add_direct_method(class, main, ACC_STATIC, Some(code(4, 0, &main_code)));
    let bytes = b.build().to_bytes();

    let dex = DexFile::parse(&bytes).unwrap();
    let (result, output) = run_with_io(&dex, "");
    assert_eq!(result, Ok(vec![]));
    assert_eq!(output, "1\n4\n9\n16\n");
}

#[test]
fn run_reports_missing_entry() {
    let dex = main_only(1, "return-void");
    assert_eq!(
        run(&dex, "nope"),
        Err(RuntimeError::EntryNotFound {
            entry: "nope".into()
        })
    );
}

#[test]
fn unknown_opcode_is_fatal() {
    let mut b = DexBuilder::new();
    let class = b.class("LMain;", Some(OBJECT));
    let main = b.method("LMain;", "main", "V", &[]);
    b.add_direct_method(
        class,
        main,
        ACC_STATIC,
        Some(CodeItem::new(1, 0, vec![0x00, 0x00, 0xff, 0x00])),
    );
    let dex = b.build();
    assert_eq!(
        run_err(&dex),
        RuntimeError::Decode {
            at: 2,
            source: DecodeError::UnknownOpcode(0xff)
        }
    );
}
