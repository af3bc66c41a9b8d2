//! Operator configuration.
//!
//! Layers, lowest precedence first: defaults, the `--config` file (TOML or
//! JSON), `DD_*` and `DDMON_*` environment variables, then CLI flags.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use ddmon_datadog::DatadogConfig;
use ddmon_reconciler::{ControllerConfig, WatchConfig};
use serde::{Deserialize, Serialize};

/// Default manifest directory, relative to the working directory.
pub const DEFAULT_MANIFESTS_DIR: &str = "monitors";

/// Everything the binary needs to wire a controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorConfig {
    pub datadog: DatadogConfig,
    pub controller: ControllerConfig,
    pub watch: WatchConfig,
    pub manifests_dir: PathBuf,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            datadog: DatadogConfig::default(),
            controller: ControllerConfig::default(),
            watch: WatchConfig::default(),
            manifests_dir: PathBuf::from(DEFAULT_MANIFESTS_DIR),
        }
    }
}

/// Values supplied on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub manifests_dir: Option<PathBuf>,
    pub workers: Option<usize>,
    pub resync_secs: Option<u64>,
    pub no_watch: bool,
}

impl OperatorConfig {
    /// Build the effective configuration from every layer.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The config file cannot be read or parsed
    /// - The controller or watch settings fail validation
    pub fn load(path: Option<&Path>, overrides: &Overrides) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.datadog.merge_env();
        config.apply_env(|name| std::env::var(name).ok());
        config.apply_overrides(overrides);
        config
            .controller
            .validate()
            .context("Invalid controller configuration")?;
        if config.watch.enabled {
            config
                .watch
                .validate()
                .context("Invalid watch configuration")?;
        }
        Ok(config)
    }

    /// Parse a configuration file, JSON by extension and TOML otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid TOML or JSON.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(path, &content)
    }

    fn parse(path: &Path, content: &str) -> Result<Self> {
        if path.extension().is_some_and(|e| e == "json") {
            serde_json::from_str(content)
                .with_context(|| format!("Failed to parse JSON config {}", path.display()))
        } else {
            toml::from_str(content)
                .with_context(|| format!("Failed to parse TOML config {}", path.display()))
        }
    }

    /// Apply `DDMON_*` variables through `lookup`. Unparsable numbers are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("DDMON_MANIFESTS_DIR") {
            self.manifests_dir = PathBuf::from(dir);
        }
        if let Some(workers) = lookup("DDMON_WORKERS").and_then(|v| v.parse().ok()) {
            self.controller.workers = workers;
        }
        if let Some(secs) = lookup("DDMON_RESYNC_SECS").and_then(|v| v.parse().ok()) {
            self.controller.resync_interval = Duration::from_secs(secs);
        }
    }

    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(dir) = &overrides.manifests_dir {
            self.manifests_dir.clone_from(dir);
        }
        if let Some(workers) = overrides.workers {
            self.controller.workers = workers;
        }
        if let Some(secs) = overrides.resync_secs {
            self.controller.resync_interval = Duration::from_secs(secs);
        }
        if overrides.no_watch {
            self.watch.enabled = false;
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::panic)]

    use std::collections::HashMap;

    use super::*;

    fn unwrap_result<T, E: std::fmt::Display>(result: std::result::Result<T, E>, context: &str) -> T {
        match result {
            Ok(value) => value,
            Err(e) => panic!("{}: {}", context, e),
        }
    }

    #[test]
    fn test_toml_sections_fill_nested_configs() {
        let config = unwrap_result(
            OperatorConfig::parse(
                Path::new("ddmon.toml"),
                r#"
                manifests_dir = "/etc/ddmon/monitors"

                [datadog]
                base_url = "https://api.datadoghq.eu/"

                [controller]
                workers = 2
                resync_interval = 60

                [watch]
                debounce_ms = 500
                "#,
            ),
            "parse toml",
        );
        assert_eq!(config.manifests_dir, PathBuf::from("/etc/ddmon/monitors"));
        assert_eq!(config.datadog.base_url, "https://api.datadoghq.eu/");
        assert_eq!(config.controller.workers, 2);
        assert_eq!(config.controller.resync_interval, Duration::from_secs(60));
        assert!(config.watch.enabled);
        assert_eq!(config.watch.debounce_ms, 500);
        assert_eq!(
            config.controller.base_backoff_ms,
            ControllerConfig::default().base_backoff_ms
        );
    }

    #[test]
    fn test_json_by_extension() {
        let config = unwrap_result(
            OperatorConfig::parse(Path::new("ddmon.json"), r#"{"controller": {"workers": 9}}"#),
            "parse json",
        );
        assert_eq!(config.controller.workers, 9);
        assert_eq!(config.manifests_dir, PathBuf::from(DEFAULT_MANIFESTS_DIR));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        assert!(OperatorConfig::parse(Path::new("ddmon.toml"), "workers = [").is_err());
    }

    #[test]
    fn test_flags_beat_environment() {
        let env: HashMap<&str, &str> = [
            ("DDMON_MANIFESTS_DIR", "/from/env"),
            ("DDMON_WORKERS", "6"),
            ("DDMON_RESYNC_SECS", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = OperatorConfig::default();
        config.apply_env(|name| env.get(name).map(ToString::to_string));
        assert_eq!(config.manifests_dir, PathBuf::from("/from/env"));
        assert_eq!(config.controller.workers, 6);
        assert_eq!(
            config.controller.resync_interval,
            ControllerConfig::default().resync_interval
        );

        config.apply_overrides(&Overrides {
            workers: Some(1),
            resync_secs: Some(0),
            no_watch: true,
            ..Overrides::default()
        });
        assert!(!config.watch.enabled);
        assert_eq!(config.manifests_dir, PathBuf::from("/from/env"));
        assert_eq!(config.controller.workers, 1);
        assert!(config.controller.resync_interval.is_zero());
    }

    #[test]
    fn test_load_reads_file_from_disk() {
        let dir = unwrap_result(tempfile::tempdir(), "tempdir");
        let path = dir.path().join("ddmon.toml");
        unwrap_result(
            std::fs::write(&path, "[controller]\nworkers = 3\n"),
            "write config",
        );

        let config = unwrap_result(
            OperatorConfig::load(Some(&path), &Overrides::default()),
            "load",
        );
        assert_eq!(config.controller.workers, 3);
    }

    #[test]
    fn test_load_rejects_zero_workers() {
        let overrides = Overrides {
            workers: Some(0),
            ..Overrides::default()
        };
        assert!(OperatorConfig::load(None, &overrides).is_err());
    }
}
