//! CLI command handlers.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context as _, Result, bail};
use ddmon_datadog::DatadogClient;
use ddmon_reconciler::{
    Context, Controller, FileResourceStore, ManifestWatcher, ReconcileOutcome, Reconciler,
    load_manifest,
};
use tokio::signal;
use tracing::{error, info};

use crate::cli::Commands;
use crate::config::OperatorConfig;

/// Execute a CLI command against an already loaded configuration.
///
/// # Errors
///
/// Returns an error if the command fails to start or its work fails.
pub async fn execute_command(command: Commands, config: OperatorConfig) -> Result<()> {
    match command {
        Commands::Run { .. } => cmd_run(config).await,
        Commands::Reconcile { file } => cmd_reconcile(&file, config).await.map(|outcome| {
            println!("{}: {outcome:?}", file.display());
        }),
        Commands::Check => cmd_check(config).await,
    }
}

fn datadog_client(config: &OperatorConfig) -> Result<Arc<DatadogClient>> {
    DatadogClient::with_config(config.datadog.clone())
        .map(Arc::new)
        .context("Failed to build Datadog client")
}

/// Run the controller over the manifest directory until Ctrl+C.
async fn cmd_run(config: OperatorConfig) -> Result<()> {
    let client = datadog_client(&config)?;
    let store = FileResourceStore::open(&config.manifests_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to open manifest directory {}",
                config.manifests_dir.display()
            )
        })?;

    let reconciler = Reconciler::builder()
        .with_client(client)
        .with_store(Arc::new(store))
        .build()
        .context("Failed to build reconciler")?;
    let controller = Controller::new(Arc::new(reconciler), config.controller.clone())
        .context("Failed to start controller")?;
    let watcher = if config.watch.enabled {
        let watcher =
            ManifestWatcher::watch(&config.manifests_dir, &config.watch, controller.handle())
                .context("Failed to watch manifest directory")?;
        Some(watcher)
    } else {
        info!("Manifest watching disabled; relying on resync");
        None
    };
    let stopper = controller.stopper();
    let task = tokio::spawn(controller.run());

    info!(
        manifests = %config.manifests_dir.display(),
        "ddmon is running. Press Ctrl+C to stop."
    );
    wait_for_shutdown().await;

    drop(watcher);
    stopper.stop();
    task.await.context("Controller task failed")?;
    info!("ddmon stopped gracefully");
    Ok(())
}

/// Run one cycle for the record held in `file`.
///
/// The manifest's directory is opened as the store so status and
/// finalizer writes land back in the same file.
async fn cmd_reconcile(file: &Path, config: OperatorConfig) -> Result<ReconcileOutcome> {
    let manifest = load_manifest(file)
        .await
        .with_context(|| format!("Failed to load manifest {}", file.display()))?;
    let key = manifest.key();

    let dir = match file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let store = FileResourceStore::open(dir)
        .await
        .with_context(|| format!("Failed to open manifest directory {}", dir.display()))?;

    let reconciler = Reconciler::new(datadog_client(&config)?, Arc::new(store));
    let ctx = Context::background().with_timeout(config.controller.reconcile_timeout);

    reconciler
        .reconcile(&ctx, &key)
        .await
        .with_context(|| format!("Reconcile of {key} failed"))
}

/// Validate credentials against the configured Datadog site.
async fn cmd_check(config: OperatorConfig) -> Result<()> {
    let client = datadog_client(&config)?;
    let valid = client
        .validate_credentials()
        .await
        .context("Failed to reach the Datadog API")?;

    if !valid {
        bail!("Datadog rejected the configured credentials");
    }
    println!("Credentials valid for {}", config.datadog.base_url);
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C).
async fn wait_for_shutdown() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown"),
        Err(err) => error!("Failed to listen for shutdown signal: {}", err),
    }
}
