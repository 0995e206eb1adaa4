// CyberBasic VM CLI
// Usage: cyber [FILE] [OPTIONS]

use clap::Parser;
use colored::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use cyber_core::binary;
use cyber_core::builtins;
use cyber_core::config::VmConfig;
use cyber_core::driver::{self, HeadlessHost};
use cyber_core::VM;

/// Run compiled CyberBasic programs (.cbc)
#[derive(Parser)]
#[command(name = "cyber")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "CyberBasic bytecode VM", long_about = None)]
struct Cli {
    /// Compiled program to run; defaults to `main` from cyber.json
    file: Option<PathBuf>,

    /// Configuration file (default: ./cyber.json when present)
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Print the disassembly instead of running
    #[arg(short = 'd', long = "disasm")]
    disasm: bool,

    /// Run this many update/draw frames after the main program
    #[arg(short = 'f', long = "frames")]
    frames: Option<u64>,

    /// Show at most 10 stack frames on error
    #[arg(long = "no-trace")]
    no_trace: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,cyber_core=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{}", message);
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> Result<VmConfig, String> {
    let config = match &cli.config {
        Some(path) => VmConfig::load(path),
        None => VmConfig::discover(Path::new(".")),
    };
    config.map_err(|e| format!("{} {}", "error:".red().bold(), e))
}

fn run(cli: Cli) -> Result<(), String> {
    let mut config = load_config(&cli)?;
    if let Some(frames) = cli.frames {
        config.frames = frames;
    }
    if cli.no_trace {
        config.full_trace = false;
    }

    let path = cli
        .file
        .clone()
        .or_else(|| config.main.clone())
        .ok_or_else(|| format!("{} no program given", "error:".red().bold()))?;

    let bytes = fs::read(&path)
        .map_err(|e| format!("Error reading file '{}': {}", path.display(), e))?;
    let chunk = binary::deserialize(&bytes)
        .map_err(|e| format!("{} '{}': {}", "error:".red().bold(), path.display(), e))?;
    debug!(
        code = chunk.code.len(),
        constants = chunk.constants.len(),
        "chunk decoded"
    );

    if cli.disasm {
        print!("{}", chunk.disassemble(&path.to_string_lossy()));
        return Ok(());
    }

    let mut vm = VM::new();
    builtins::install(&mut vm);
    vm.apply_config(&config);
    vm.load_chunk(chunk);

    let report = |e: cyber_core::CyberError| e.format_with_options(config.full_trace);
    vm.run().map_err(report)?;

    if config.frames > 0 && !vm.quit_requested() {
        let mut host = HeadlessHost::new(config.frame_time);
        let ran = driver::run_frames(&mut vm, &mut host, config.frames).map_err(report)?;
        info!(frames = ran, "frame loop finished");
    }
    Ok(())
}
