#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # ddmon
//!
//! Keeps Datadog monitors in sync with a directory of monitor manifests.
//!
//! The reconciliation core lives in `ddmon-reconciler` and the HTTP client
//! in `ddmon-datadog`; this crate wires them behind a CLI.

pub mod cli;
pub mod commands;
pub mod config;

pub use ddmon_datadog;
pub use ddmon_reconciler;
