//! Manifest directory watching.
//!
//! Tests verify that:
//! - A new manifest is reconciled as soon as it is written
//! - An edited manifest updates its monitor without waiting for a resync
//! - Marking a manifest for deletion removes the monitor and the file

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ddmon_reconciler::{
    has_finalizer, load_manifest, Context, Controller, ControllerConfig, FileResourceStore,
    InMemoryRuleClient, ManifestFormat, ManifestWatcher, Reconciler, ResourceKey, ResourceStore,
    WatchConfig, FINALIZER,
};
use tempfile::TempDir;

type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

const MANIFEST: &str = "\
metadata:
  namespace: monitoring
  name: cpu
spec:
  name: cpu-high
  type: metric alert
  query: avg:cpu>80
  options:
    thresholds:
      critical: 80
";

async fn wait_until<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..500 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

async fn rewrite(path: &Path, edit: impl FnOnce(&mut ddmon_reconciler::MonitorResource)) -> TestResult {
    let mut resource = load_manifest(path).await?;
    edit(&mut resource);
    std::fs::write(path, ManifestFormat::Yaml.render(&resource)?)?;
    Ok(())
}

/// Given a running controller with resync disabled, watching its manifest directory
/// When a manifest is written, edited and then marked for deletion
/// Then each change is reconciled from the file event alone
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn manifest_changes_are_reconciled_without_resync() -> TestResult {
    let dir = TempDir::new()?;
    let store = Arc::new(FileResourceStore::open(dir.path()).await?);
    let client = Arc::new(InMemoryRuleClient::new());
    let reconciler = Arc::new(Reconciler::new(client.clone(), store.clone()));
    let config = ControllerConfig::default()
        .with_backoff(1, 10)
        .with_resync_interval(Duration::ZERO);
    let controller = Controller::new(reconciler, config)?;
    let watch = WatchConfig {
        enabled: true,
        debounce_ms: 20,
    };
    let _watcher = ManifestWatcher::watch(dir.path(), &watch, controller.handle())?;
    let stopper = controller.stopper();
    let task = tokio::spawn(controller.run());

    let key = ResourceKey::new("monitoring", "cpu");
    let path = dir.path().join("monitoring.cpu.yaml");

    // WHEN: a manifest appears
    std::fs::write(&path, MANIFEST)?;

    // THEN: the monitor is created and the record guarded
    let linked = wait_until(|| {
        let store = Arc::clone(&store);
        let key = key.clone();
        async move {
            store
                .get(&Context::background(), &key)
                .await
                .ok()
                .flatten()
                .is_some_and(|r| r.status.monitor_id == 1 && has_finalizer(&r.metadata, FINALIZER))
        }
    })
    .await;
    assert!(linked, "new manifest should be reconciled");

    // WHEN: the owner edits the query
    rewrite(&path, |r| r.spec.query = "avg:cpu>92.5".into()).await?;

    // THEN: the monitor follows
    let updated = wait_until(|| {
        let client = Arc::clone(&client);
        async move { client.rule(1).await.is_some_and(|r| r.query == "avg:cpu>92.5") }
    })
    .await;
    assert!(updated, "edited manifest should update the monitor");
    assert_eq!(client.calls().await.create, 1);

    // WHEN: the owner requests deletion
    rewrite(&path, |r| r.metadata.deletion_timestamp = Some(chrono::Utc::now())).await?;

    // THEN: the monitor is deleted and the file purged
    let purged = wait_until(|| {
        let client = Arc::clone(&client);
        let path = path.clone();
        async move { client.is_empty().await && !path.exists() }
    })
    .await;
    assert!(purged, "deletion should be reconciled");

    stopper.stop();
    assert!(tokio::time::timeout(Duration::from_secs(2), task).await.is_ok());
    Ok(())
}

#[tokio::test]
async fn disabled_watcher_is_refused() -> TestResult {
    let dir = TempDir::new()?;
    let store = Arc::new(FileResourceStore::open(dir.path()).await?);
    let reconciler = Arc::new(Reconciler::new(Arc::new(InMemoryRuleClient::new()), store));
    let controller = Controller::new(reconciler, ControllerConfig::default())?;

    let config = WatchConfig {
        enabled: false,
        ..WatchConfig::default()
    };
    assert!(ManifestWatcher::watch(dir.path(), &config, controller.handle()).is_err());
    Ok(())
}
