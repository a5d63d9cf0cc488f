//! `flowctl` CLI entry-point.
//!
//! Available sub-commands:
//! - `validate`: check an execution plan JSON file and print its warnings.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flowctl", about = "Workflow plan tooling", version)]
struct Cli {
    /// Log filter, e.g. `info` or `engine=debug`. `RUST_LOG` wins when set.
    #[arg(long, env = "FLOWCTL_LOG", default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate an execution plan JSON file.
    Validate {
        /// Path to the plan JSON file.
        path: PathBuf,
        /// Treat warnings as errors.
        #[arg(long)]
        strict: bool,
    },
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match cli.command {
        Command::Validate { path, strict } => validate(&path, strict),
    }
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn validate(path: &Path, strict: bool) -> anyhow::Result<ExitCode> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    let plan: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("invalid JSON in {}", path.display()))?;
    debug!(path = %path.display(), "validating plan");

    let outcome = engine::inspect(&plan);
    for warning in &outcome.warnings {
        warn!("{warning}");
    }

    match outcome.fatal {
        Some(err) => {
            eprintln!("❌ Validation failed:\n{err}");
            Ok(ExitCode::FAILURE)
        }
        None if strict && !outcome.warnings.is_empty() => {
            eprintln!(
                "❌ Validation failed: {} warning(s) in strict mode",
                outcome.warnings.len()
            );
            Ok(ExitCode::FAILURE)
        }
        None => {
            println!("✅ Plan is valid.");
            Ok(ExitCode::SUCCESS)
        }
    }
}
