//! `wharf`: list, inspect, copy and move files across configured storage
//! providers.
//!
//! Locations are written `<provider>:<path>`, where `<provider>` is a name
//! from the configuration file's `[providers]` table. Paths ending in `/`
//! are folders.

mod commands;
mod error;
mod location;

use crate::commands::{Command, Context};
use crate::error::{ErrorKind, Result};
use clap::{ArgAction, Parser};
use exn::ResultExt;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use wharf_config::Config;

#[derive(Debug, Parser)]
#[command(name = "wharf", version, about = "Copy and move files between storage providers")]
struct Cli {
    /// Configuration file (defaults to wharf.toml in the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Print metadata as JSON
    #[arg(long, global = true)]
    json: bool,
    /// More logging (-v, -vv); RUST_LOG takes precedence
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).with_target(false).init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err:?}");
            ExitCode::FAILURE
        },
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    let ctx = Context { config, json: cli.json };
    cli.command.execute(&ctx).await
}
