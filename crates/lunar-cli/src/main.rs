use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use lunar_vm::{LuaState, VmConfig};

const DEFAULT_LOG_FILTER: &str = "warn";

#[derive(Debug, Parser)]
#[command(name = "lunar", version, about = "Run precompiled Lua 5.3 chunks")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log filter, e.g. `lunar::vm=trace` (defaults to `RUST_LOG`)
    #[arg(long, global = true, value_name = "FILTER")]
    log: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Execute a binary chunk produced by `luac`
    Run {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Maximum call depth before `stack overflow`
        #[arg(long, value_name = "N")]
        max_depth: Option<usize>,
    },
    /// Print a `luac -l -l` style listing of a binary chunk
    List {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

fn init_logging(filter: Option<&str>) {
    let expr = filter
        .map(str::to_owned)
        .or_else(|| std::env::var("RUST_LOG").ok());
    let filter = expr
        .and_then(|e| EnvFilter::try_new(e).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .try_init();
}

fn read_chunk(path: &Path) -> anyhow::Result<Vec<u8>> {
    let bytes =
        std::fs::read(path).with_context(|| format!("cannot read '{}'", path.display()))?;
    if !lunar_chunk::is_binary_chunk(&bytes) {
        bail!(
            "'{}' is not a precompiled chunk (compile it with luac 5.3 first)",
            path.display()
        );
    }
    Ok(bytes)
}

fn run_file(path: &Path, max_depth: Option<usize>) -> anyhow::Result<()> {
    let bytes = read_chunk(path)?;
    let mut config = VmConfig::default();
    if let Some(depth) = max_depth {
        config = config.with_max_call_depth(depth);
    }
    let mut state = LuaState::with_config(config);
    let results = state
        .execute(&bytes)
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    debug!(target: "lunar::cli", returned = results.len(), "chunk finished");
    Ok(())
}

fn list_file(path: &Path) -> anyhow::Result<()> {
    let bytes = read_chunk(path)?;
    let proto = lunar_chunk::undump(&bytes)
        .with_context(|| format!("cannot load '{}'", path.display()))?;
    print!("{}", lunar_chunk::disassemble(&proto));
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log.as_deref());

    let outcome = match &cli.command {
        Command::Run { file, max_depth } => run_file(file, *max_depth),
        Command::List { file } => list_file(file),
    };
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("lunar: {e:#}");
            ExitCode::FAILURE
        }
    }
}
