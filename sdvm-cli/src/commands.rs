//! CLI command implementations.
//!
//! Each command prints its own diagnostics and returns the exit code on
//! failure.

use std::fs;
use std::path::Path;

use log::warn;
use sdvm_dex::{DexError, DexFile};
use sdvm_vm::{RuntimeError, SwitchBounds, Vm, VmConfig};

const EXIT_INPUT: i32 = 1;
const EXIT_DECODE: i32 = 2;
const EXIT_RUNTIME: i32 = 3;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub entry: String,
    pub legacy_switch: bool,
    pub stack_size: usize,
    pub max_depth: usize,
}

impl RunOptions {
    fn config(&self) -> VmConfig {
        VmConfig {
            stack_size: self.stack_size,
            switch_bounds: if self.legacy_switch {
                SwitchBounds::Legacy
            } else {
                SwitchBounds::Strict
            },
            max_call_depth: self.max_depth,
        }
    }
}

/// Read and parse a dex file.
fn load(path: &Path) -> Result<DexFile, i32> {
    let bytes = fs::read(path).map_err(|e| {
        eprintln!("error: cannot read '{}': {e}", path.display());
        EXIT_INPUT
    })?;
    let dex = DexFile::parse(&bytes).map_err(|e| {
        eprintln!("error: {}: {e}", path.display());
        EXIT_INPUT
    })?;
    if !DexFile::checksum_matches(&bytes) {
        warn!("{}: checksum mismatch", path.display());
    }
    Ok(dex)
}

fn malformed(e: DexError) -> i32 {
    eprintln!("error: {e}");
    EXIT_INPUT
}

/// Exit code for a fatal VM error.
fn exit_code(error: &RuntimeError) -> i32 {
    match error {
        RuntimeError::Decode { .. } => EXIT_DECODE,
        RuntimeError::EntryNotFound { .. } | RuntimeError::Dex { .. } => EXIT_INPUT,
        _ => EXIT_RUNTIME,
    }
}

/// Run the entry method. Program output goes to stdout; recorded faults
/// and the fatal error, if any, go to stderr.
pub fn run(path: &Path, options: &RunOptions) -> Result<(), i32> {
    let dex = load(path)?;
    let mut vm = Vm::new(&dex, options.config());
    let result = vm.start(&options.entry);

    for fault in vm.faults() {
        eprintln!("warning: {fault}");
    }
    result.map_err(|e| {
        let code = exit_code(&e);
        if code == EXIT_RUNTIME {
            eprintln!("runtime error: {e}");
        } else {
            eprintln!("error: {e}");
        }
        code
    })
}

/// Print the header summary, table sizes and class list.
pub fn info(path: &Path) -> Result<(), i32> {
    let dex = load(path)?;
    let header = &dex.header;

    println!("version:    {}", header.version());
    println!("checksum:   {:#010x}", header.checksum);
    println!("file size:  {}", header.file_size);
    println!("strings:    {}", dex.strings.len());
    println!("types:      {}", dex.type_ids.len());
    println!("protos:     {}", dex.protos.len());
    println!("fields:     {}", dex.fields.len());
    println!("methods:    {}", dex.methods.len());
    println!("classes:    {}", dex.class_defs.len());

    for class in &dex.class_defs {
        let name = dex.type_name(class.class_idx).map_err(malformed)?;
        let parent = dex.superclass_name(class).map_err(malformed)?;
        let data = &class.class_data;
        println!(
            "  {name} extends {} ({} fields, {} methods)",
            parent.unwrap_or("-"),
            data.static_fields.len() + data.instance_fields.len(),
            data.direct_methods.len() + data.virtual_methods.len(),
        );
    }
    Ok(())
}

/// Disassemble every method that has code.
pub fn disasm(path: &Path) -> Result<(), i32> {
    let dex = load(path)?;

    for class in &dex.class_defs {
        let name = dex.type_name(class.class_idx).map_err(malformed)?;
        println!("class {name}");
        let data = &class.class_data;
        for method in data.direct_methods.iter().chain(&data.virtual_methods) {
            let Some(code) = &method.code else { continue };
            let method_name = dex.method_name(method).map_err(malformed)?;
            println!(
                "  method {method_name} (registers {}, ins {})",
                code.registers_size, code.ins_size
            );
            let text = sdvm_asm::listing(&code.insns).map_err(|e| {
                eprintln!("error: {name}.{method_name}: {e}");
                EXIT_DECODE
            })?;
            for line in text.lines() {
                println!("    {line}");
            }
        }
    }
    Ok(())
}
