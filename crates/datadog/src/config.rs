//! Configuration for the Datadog client.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

/// Default Datadog site.
pub const DEFAULT_BASE_URL: &str = "https://api.datadoghq.com/";

/// A credential value that never shows up in logs.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Wrap a secret value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw value, for building request headers.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether the secret is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Configuration for the `DatadogClient`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatadogConfig {
    /// Datadog API key.
    #[serde(default)]
    pub api_key: Secret,

    /// Datadog application key.
    #[serde(default)]
    pub app_key: Secret,

    /// Base URL of the Datadog site, e.g. `https://api.datadoghq.eu/`.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout.
    #[serde(with = "duration_secs", default = "default_timeout")]
    pub timeout: Duration,
}

impl Default for DatadogConfig {
    fn default() -> Self {
        Self {
            api_key: Secret::default(),
            app_key: Secret::default(),
            base_url: default_base_url(),
            timeout: default_timeout(),
        }
    }
}

impl DatadogConfig {
    /// Create a config with the given credentials.
    pub fn new(api_key: impl Into<String>, app_key: impl Into<String>) -> Self {
        Self {
            api_key: Secret::new(api_key),
            app_key: Secret::new(app_key),
            ..Default::default()
        }
    }

    /// Set the base URL.
    #[must_use]
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.merge_env();
        config
    }

    /// Override fields with any `DD_*` environment variables that are set.
    pub fn merge_env(&mut self) {
        if let Ok(key) = std::env::var("DD_API_KEY") {
            self.api_key = Secret::new(key);
        }

        if let Ok(key) = std::env::var("DD_APPLICATION_KEY") {
            self.app_key = Secret::new(key);
        }

        if let Ok(url) = std::env::var("DD_API_URL") {
            self.base_url = url;
        }

        if let Ok(secs) = std::env::var("DD_TIMEOUT_SECS") {
            if let Ok(secs) = secs.parse() {
                self.timeout = Duration::from_secs(secs);
            }
        }
    }

    /// Parse the configured base URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UrlParse`] if `base_url` is not a valid URL.
    pub fn parsed_base_url(&self) -> Result<Url> {
        Ok(Url::parse(&self.base_url)?)
    }

    /// Both credentials and a valid base URL are required to build a client.
    ///
    /// # Errors
    ///
    /// Returns an error if either key is empty or the base URL is invalid.
    pub fn validate(&self) -> Result<()> {
        self.parsed_base_url()?;
        if self.api_key.is_empty() {
            return Err(Error::config_error("missing API key (DD_API_KEY)"));
        }
        if self.app_key.is_empty() {
            return Err(Error::config_error(
                "missing application key (DD_APPLICATION_KEY)",
            ));
        }
        Ok(())
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

const fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Serialization helper for Duration as seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
