//! sdvm CLI: run, inspect and disassemble dex files.
//!
//! Exit codes:
//! - 0: Success
//! - 1: Input error (unreadable file, malformed dex, missing entry, bad usage)
//! - 2: Decode error
//! - 3: Runtime error

mod commands;

use std::path::PathBuf;
use std::process;

use clap::{ArgAction, Parser, Subcommand};
use log::LevelFilter;
use sdvm_vm::config::{DEFAULT_MAX_CALL_DEPTH, DEFAULT_STACK_SIZE};

use commands::RunOptions;

#[derive(Parser, Debug)]
#[command(name = "sdvm", author, version, about = "Run Dalvik bytecode from dex files")]
struct Cli {
    /// Log more (-v for debug, -vv for trace). RUST_LOG takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute a static method and report recorded faults
    Run {
        /// The .dex file to load
        file: PathBuf,

        /// Name of the method to start from
        #[arg(long, default_value = "main")]
        entry: String,

        /// Use the historical `||` bounds check for packed-switch
        #[arg(long)]
        legacy_switch: bool,

        /// Call stack size in bytes
        #[arg(long, default_value_t = DEFAULT_STACK_SIZE)]
        stack_size: usize,

        /// Maximum nesting of invokes
        #[arg(long, default_value_t = DEFAULT_MAX_CALL_DEPTH)]
        max_depth: usize,
    },
    /// Print the header, table sizes and class list
    Info {
        /// The .dex file to inspect
        file: PathBuf,
    },
    /// Disassemble every method body, grouped by class
    Disasm {
        /// The .dex file to disassemble
        file: PathBuf,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Error,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            process::exit(if e.use_stderr() { 1 } else { 0 });
        }
    };
    init_logging(cli.verbose);

    let result = match cli.command {
        Command::Run {
            file,
            entry,
            legacy_switch,
            stack_size,
            max_depth,
        } => commands::run(
            &file,
            &RunOptions {
                entry,
                legacy_switch,
                stack_size,
                max_depth,
            },
        ),
        Command::Info { file } => commands::info(&file),
        Command::Disasm { file } => commands::disasm(&file),
    };

    if let Err(code) = result {
        process::exit(code);
    }
}
