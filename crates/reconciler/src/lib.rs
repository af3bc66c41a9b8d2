//! Keeps Datadog monitors in sync with declarative monitor records.
//!
//! Each [`MonitorResource`] describes one monitor. The [`Reconciler`] drives
//! the external monitor towards the record's spec, one idempotent cycle at a
//! time:
//!
//! - **Creating**: no monitor linked yet. Create one, persist its id, then
//!   add the [`FINALIZER`].
//! - **Syncing**: fetch the linked monitor, map the spec onto it and update
//!   it only if a mapped field changed. A monitor deleted out of band is
//!   recreated.
//! - **Deleting**: removal requested. Delete the monitor (already gone is
//!   fine), then release the finalizer so the store can drop the record.
//! - **Terminal**: removal requested and nothing left to clean up.
//!
//! Malformed specs and permanent remote rejections end the cycle without a
//! retryable error and are recorded in `status.message`. Everything else is
//! returned to the caller; the [`Controller`] requeues it with backoff.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use ddmon_reconciler::{
//!     Context, Controller, ControllerConfig, InMemoryResourceStore, InMemoryRuleClient,
//!     Reconciler, ResourceKey,
//! };
//!
//! #[tokio::main]
//! async fn main() -> ddmon_reconciler::Result<()> {
//!     let store = InMemoryResourceStore::new_arc();
//!     let client = Arc::new(InMemoryRuleClient::new());
//!     let reconciler = Arc::new(Reconciler::new(client, store));
//!
//!     // One cycle, directly:
//!     let key: ResourceKey = "monitoring/cpu".parse()?;
//!     reconciler.reconcile(&Context::background(), &key).await?;
//!
//!     // Or continuously, from a work queue:
//!     let controller = Controller::new(reconciler, ControllerConfig::default())?;
//!     let handle = controller.handle();
//!     tokio::spawn(controller.run());
//!     handle.enqueue(key).await?;
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod adapter;
pub mod change;
pub mod client;
pub mod context;
pub mod controller;
pub mod error;
pub mod file_store;
pub mod finalizer;
pub mod mapper;
pub mod reconciler;
pub mod rule;
pub mod store;
pub mod types;
pub mod watcher;

// Re-export main types
pub use change::{detect, fingerprint, has_changed, Fingerprint, MappedRule};
pub use client::{CallCounts, ClientError, ClientErrorKind, InMemoryRuleClient, Operation, RuleClient};
pub use context::{Canceller, Context, Interrupted};
pub use controller::{calculate_backoff, Controller, ControllerConfig, ControllerHandle, LoopStopper};
pub use error::{Error, RejectionKind, Result};
pub use file_store::{is_manifest_path, load_manifest, FileResourceStore, ManifestFormat};
pub use finalizer::{add_finalizer, has_finalizer, remove_finalizer, FINALIZER};
pub use reconciler::{Reconciler, ReconcilerBuilder};
pub use rule::{RemoteRule, RuleOptions, ServerFields, Thresholds};
pub use store::{InMemoryResourceStore, ResourceStore, StoreOperation};
pub use types::{
    classify, MonitorResource, MonitorSpec, MonitorStatus, ObjectMeta, Phase, ReconcileOutcome,
    ResourceKey, DEFAULT_NAMESPACE,
};
pub use watcher::{ManifestWatcher, WatchConfig};
