//! CLI command definitions using clap.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// ddmon - Datadog monitor reconciler
#[derive(Parser, Debug)]
#[command(name = "ddmon")]
#[command(version)]
#[command(about = "Keeps Datadog monitors in sync with declarative monitor manifests")]
#[command(
    long_about = "ddmon watches a directory of monitor manifests, creates or updates the matching Datadog monitors, and deletes them before a manifest marked for deletion is released."
)]
pub struct Cli {
    /// Configuration file (TOML or JSON)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log filter, e.g. `info` or `ddmon_reconciler=debug`
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the controller over a directory of manifests
    Run {
        /// Directory holding one manifest per monitor
        #[arg(short, long)]
        manifests: Option<PathBuf>,

        /// Maximum number of concurrent reconcile cycles
        #[arg(short, long)]
        workers: Option<usize>,

        /// Seconds between full resyncs (0 disables)
        #[arg(long)]
        resync_secs: Option<u64>,

        /// Rely on resyncs only; do not watch the manifest directory
        #[arg(long, default_value_t = false)]
        no_watch: bool,
    },

    /// Reconcile a single manifest once
    Reconcile {
        /// Manifest file (YAML or JSON)
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Check the configured Datadog credentials
    Check,
}

impl Commands {
    /// Overrides this command contributes to the loaded configuration.
    pub fn overrides(&self) -> crate::config::Overrides {
        match self {
            Self::Run {
                manifests,
                workers,
                resync_secs,
                no_watch,
            } => crate::config::Overrides {
                manifests_dir: manifests.clone(),
                workers: *workers,
                resync_secs: *resync_secs,
                no_watch: *no_watch,
            },
            Self::Reconcile { .. } | Self::Check => crate::config::Overrides::default(),
        }
    }
}
