#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # ddmon-datadog
//!
//! Thin client for the Datadog v1 monitor API.
//!
//! Requests are authenticated with the `DD-API-KEY` and `DD-APPLICATION-KEY`
//! headers. Non-success responses surface as [`Error::Api`], which can be
//! classified with [`Error::is_not_found`], [`Error::is_bad_request`] and
//! [`Error::is_forbidden`]. The client never retries on its own.
//!
//! ## Example
//!
//! ```ignore
//! use ddmon_datadog::{DatadogClient, DatadogConfig, Monitor};
//!
//! let client = DatadogClient::with_config(DatadogConfig::from_env())?;
//!
//! let created = client
//!     .create_monitor(&Monitor {
//!         name: Some("cpu-high".into()),
//!         monitor_type: Some("metric alert".into()),
//!         query: Some("avg(last_5m):avg:system.cpu.user{*} > 80".into()),
//!         ..Default::default()
//!     })
//!     .await?;
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod monitor;

pub use client::DatadogClient;
pub use config::{DatadogConfig, Secret, DEFAULT_BASE_URL};
pub use error::{Error, Result};
pub use monitor::{Creator, Monitor};
