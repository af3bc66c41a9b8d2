//! # ddmon - entry point
//!
//! Parses the command line, loads configuration, installs tracing and hands
//! off to the command handlers.

#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use ddmon::cli::Cli;
use ddmon::commands::execute_command;
use ddmon::config::OperatorConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    let config = OperatorConfig::load(cli.config.as_deref(), &cli.command.overrides())
        .context("Failed to load configuration")?;

    execute_command(cli.command, config).await
}

/// Initialize tracing subscriber.
///
/// `--log-level` wins over `RUST_LOG`; without either the filter is `info`.
fn init_tracing(level: Option<&str>) {
    let filter = level
        .map(EnvFilter::try_new)
        .and_then(Result::ok)
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
