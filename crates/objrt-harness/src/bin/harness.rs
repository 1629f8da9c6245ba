//! CLI entrypoint for the objrt diagnostics harness.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;

use objrt_core::config::os_config;
use objrt_harness::{HarnessError, commands, logger};

/// Diagnostics for the objrt runtime OS layer.
#[derive(Debug, Parser)]
#[command(name = "objrt-harness")]
#[command(about = "Inspect images, sections, shared objects and debugger mode")]
struct Cli {
    /// Log more (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Compact JSON instead of pretty-printed.
    #[arg(long, global = true)]
    compact: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the objects the host loader has mapped.
    Images {
        /// Register them with the process runtime first.
        #[arg(long)]
        sync: bool,
    },
    /// Show the runtime segment/section map of an ELF file.
    Sections {
        /// ELF file to read.
        #[arg(long)]
        file: PathBuf,
    },
    /// Look up a loaded object by its exact recorded name.
    FindSo {
        /// Name as recorded by the loader (usually the full path).
        #[arg(long)]
        name: String,
    },
    /// Enter and leave debugger mode on a private runtime.
    DebuggerProbe,
}

fn emit<T: Serialize>(report: &T, compact: bool) -> Result<(), HarnessError> {
    let text = if compact {
        serde_json::to_string(report)?
    } else {
        serde_json::to_string_pretty(report)?
    };
    println!("{text}");
    Ok(())
}

fn run(cli: Cli) -> Result<(), HarnessError> {
    logger::init(logger::level_for(cli.verbose))?;
    let config = os_config();
    match cli.command {
        Command::Images { sync } => {
            emit(&commands::images(objrt_abi::runtime(), sync)?, cli.compact)
        }
        Command::Sections { file } => emit(&commands::sections(&file)?, cli.compact),
        Command::FindSo { name } => emit(&commands::find_so(&name, &config), cli.compact),
        Command::DebuggerProbe => emit(&commands::debugger_probe(config), cli.compact),
    }
}

fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("objrt-harness: {err}");
            ExitCode::FAILURE
        }
    }
}
