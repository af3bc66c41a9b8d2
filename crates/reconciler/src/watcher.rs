//! File watching for the manifest directory.
//!
//! Changes are debounced and turned into notifications for the
//! [`Controller`](crate::Controller), so an edited manifest is reconciled
//! without waiting for the next resync. Removed or unreadable files are
//! ignored; the resync still covers anything a notification misses.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::Path;
//!
//! use ddmon_reconciler::{ControllerHandle, ManifestWatcher, WatchConfig};
//!
//! # fn example(handle: ControllerHandle) -> ddmon_reconciler::Result<()> {
//! let _watcher = ManifestWatcher::watch(Path::new("monitors"), &WatchConfig::default(), handle)?;
//! // Watching stops when `_watcher` is dropped.
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::controller::ControllerHandle;
use crate::error::{Error, Result};
use crate::file_store::{is_manifest_path, load_manifest};

/// Watcher settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Watch the manifest directory at all.
    pub enabled: bool,
    /// Quiet period before a burst of changes is reported.
    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: 250,
        }
    }
}

impl WatchConfig {
    /// Check the debounce window is within 10..=5000 ms.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] when it is not.
    pub fn validate(&self) -> Result<()> {
        if !(10..=5000).contains(&self.debounce_ms) {
            return Err(Error::invalid_config(format!(
                "debounce_ms must be between 10 and 5000, got {}",
                self.debounce_ms
            )));
        }
        Ok(())
    }
}

/// Active watch on a manifest directory. Dropping it stops watching.
pub struct ManifestWatcher {
    _debouncer: Debouncer<RecommendedWatcher>,
    forwarder: JoinHandle<()>,
}

impl ManifestWatcher {
    /// Watch `dir` and enqueue the key of every manifest that changes.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Watching is disabled in `config`
    /// - The debounce window is out of range
    /// - The platform watcher cannot be created or cannot watch `dir`
    pub fn watch(dir: &Path, config: &WatchConfig, handle: ControllerHandle) -> Result<Self> {
        if !config.enabled {
            return Err(Error::invalid_config("file watcher is disabled"));
        }
        config.validate()?;

        let (tx, rx) = mpsc::channel(256);
        let mut debouncer = new_debouncer(
            Duration::from_millis(config.debounce_ms),
            move |res: DebounceEventResult| match res {
                Ok(events) => {
                    for event in events {
                        if is_manifest_path(&event.path) {
                            let _ = tx.blocking_send(event.path);
                        }
                    }
                }
                Err(errors) => warn!(error = ?errors, "File watcher error"),
            },
        )
        .map_err(|e| Error::store(format!("cannot create file watcher: {e}")))?;

        debouncer
            .watcher()
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|e| Error::store(format!("cannot watch {}: {e}", dir.display())))?;

        debug!(dir = %dir.display(), debounce_ms = config.debounce_ms, "Watching manifests");
        Ok(Self {
            _debouncer: debouncer,
            forwarder: tokio::spawn(forward(rx, handle)),
        })
    }
}

impl Drop for ManifestWatcher {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

/// Resolve changed paths to keys and hand them to the controller.
async fn forward(mut rx: mpsc::Receiver<PathBuf>, handle: ControllerHandle) {
    while let Some(path) = rx.recv().await {
        let key = match load_manifest(&path).await {
            Ok(resource) => resource.key(),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Ignoring change to unreadable manifest");
                continue;
            }
        };

        debug!(resource = %key, "Manifest changed");
        if handle.enqueue(key).await.is_err() {
            debug!("Controller stopped; no longer forwarding manifest changes");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = WatchConfig::default();
        assert!(config.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_debounce_out_of_range() {
        for debounce_ms in [0, 5, 5001] {
            let config = WatchConfig {
                enabled: true,
                debounce_ms,
            };
            assert!(matches!(
                config.validate(),
                Err(Error::InvalidConfig { .. })
            ));
        }
    }

    #[test]
    fn test_config_from_toml() {
        let config: std::result::Result<WatchConfig, _> = toml::from_str("enabled = false");
        assert_eq!(
            config.ok(),
            Some(WatchConfig {
                enabled: false,
                debounce_ms: 250,
            })
        );
    }
}
