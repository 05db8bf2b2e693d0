//! Standalone worker binary serving the built-in task set.
//!
//! Spawned by the parent with `--socket-file`; binds the socket, accepts
//! one connection, runs one task, and exits with the worker's exit code.
//! Logs go to stderr, which the parent inherits.

mod tasks;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

#[derive(Parser)]
#[command(name = "spindle-worker")]
#[command(about = "Run one spindle task over a unix socket")]
#[command(version)]
struct Cli {
    /// Path of the unix socket to bind for the parent connection
    #[arg(long)]
    socket_file: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let registry = tasks::builtin_registry();
    let code = spindle::run_worker(&cli.socket_file, &registry)?;
    Ok(ExitCode::from(code as u8))
}
