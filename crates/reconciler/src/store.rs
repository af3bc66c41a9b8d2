//! Desired-record store trait and the in-memory implementation.
//!
//! The store is the declarative side of the system: owners write specs and
//! request deletion, the reconciler writes status and finalizers. Writes
//! are checked against `metadata.resource_version`; a write based on a stale
//! copy fails with [`Error::Conflict`].

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::types::{MonitorResource, ResourceKey};

/// Storage backend for desired records.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Load a record. `Ok(None)` means it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the record exists but cannot be loaded.
    async fn get(&self, ctx: &Context, key: &ResourceKey) -> Result<Option<MonitorResource>>;

    /// Persist `resource.status`.
    ///
    /// Returns the stored record with its new `resource_version`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conflict`] when `resource` is stale.
    async fn update_status(&self, ctx: &Context, resource: &MonitorResource)
    -> Result<MonitorResource>;

    /// Persist `resource.metadata.finalizers`.
    ///
    /// A record that has a deletion timestamp and no finalizers left is
    /// removed from the store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conflict`] when `resource` is stale.
    async fn update_metadata(
        &self,
        ctx: &Context,
        resource: &MonitorResource,
    ) -> Result<MonitorResource>;

    /// Keys of every stored record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the backend cannot be enumerated.
    async fn list(&self, ctx: &Context) -> Result<Vec<ResourceKey>>;
}

/// A store write, for failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOperation {
    Get,
    UpdateStatus,
    UpdateMetadata,
    List,
}

/// Check that `incoming` was read at the version currently stored.
pub(crate) fn check_version(stored: &MonitorResource, incoming: &MonitorResource) -> Result<()> {
    let expected = incoming.metadata.resource_version;
    let current = stored.metadata.resource_version;
    if expected == current {
        Ok(())
    } else {
        Err(Error::conflict(incoming.key().to_string(), expected, current))
    }
}

/// Whether the store must drop `resource`.
pub(crate) const fn should_purge(resource: &MonitorResource) -> bool {
    resource.is_deletion_requested() && resource.metadata.finalizers.is_empty()
}

/// Merge an owner-authored record onto what is stored.
///
/// The owner controls the spec; status and finalizers belong to the
/// reconciler and survive the write.
pub(crate) fn merge_owner_write(
    existing: Option<&MonitorResource>,
    mut incoming: MonitorResource,
) -> MonitorResource {
    match existing {
        Some(stored) => {
            let spec_changed = stored.spec != incoming.spec;
            incoming.status = stored.status.clone();
            incoming.metadata.finalizers = stored.metadata.finalizers.clone();
            incoming.metadata.deletion_timestamp = stored.metadata.deletion_timestamp;
            incoming.metadata.resource_version = stored.metadata.resource_version.saturating_add(1);
            incoming.metadata.generation = if spec_changed {
                stored.metadata.generation.saturating_add(1)
            } else {
                stored.metadata.generation
            };
        }
        None => {
            incoming.metadata.resource_version = 1;
            incoming.metadata.generation = 1;
        }
    }
    incoming
}

pub(crate) fn not_found(key: &ResourceKey) -> Error {
    Error::store(format!("record '{key}' not found"))
}

#[derive(Default)]
struct InMemoryState {
    records: HashMap<ResourceKey, MonitorResource>,
    failures: VecDeque<(StoreOperation, Error)>,
}

impl InMemoryState {
    fn take_failure(&mut self, op: StoreOperation) -> Result<()> {
        match self.failures.iter().position(|(o, _)| *o == op) {
            Some(pos) => match self.failures.remove(pos) {
                Some((_, error)) => Err(error),
                None => Ok(()),
            },
            None => Ok(()),
        }
    }
}

/// In-memory record store for testing and embedding.
#[derive(Default)]
pub struct InMemoryResourceStore {
    state: RwLock<InMemoryState>,
}

impl InMemoryResourceStore {
    /// Create a new, empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new store wrapped in an Arc.
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Owner write: create a record or replace its spec.
    pub async fn apply(&self, resource: MonitorResource) -> MonitorResource {
        let mut state = self.state.write().await;
        let key = resource.key();
        let merged = merge_owner_write(state.records.get(&key), resource);
        state.records.insert(key, merged.clone());
        merged
    }

    /// Owner write: request removal of a record.
    ///
    /// A record without finalizers is removed at once. Returns the record as
    /// it stands afterwards, or `None` if it never existed.
    pub async fn request_deletion(&self, key: &ResourceKey) -> Option<MonitorResource> {
        let mut state = self.state.write().await;
        let record = state.records.get_mut(key)?;

        if record.metadata.deletion_timestamp.is_none() {
            record.metadata.deletion_timestamp = Some(Utc::now());
            record.metadata.resource_version = record.metadata.resource_version.saturating_add(1);
        }
        let snapshot = record.clone();

        if should_purge(&snapshot) {
            state.records.remove(key);
        }
        Some(snapshot)
    }

    /// Whether a record is stored under `key`.
    pub async fn contains(&self, key: &ResourceKey) -> bool {
        self.state.read().await.records.contains_key(key)
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Make the next `op` fail with `error`.
    pub async fn fail_next(&self, op: StoreOperation, error: Error) {
        self.state.write().await.failures.push_back((op, error));
    }
}

#[async_trait]
impl ResourceStore for InMemoryResourceStore {
    async fn get(&self, ctx: &Context, key: &ResourceKey) -> Result<Option<MonitorResource>> {
        ctx.run(async {
            let mut state = self.state.write().await;
            state.take_failure(StoreOperation::Get)?;
            Ok::<_, Error>(state.records.get(key).cloned())
        })
        .await?
    }

    async fn update_status(
        &self,
        ctx: &Context,
        resource: &MonitorResource,
    ) -> Result<MonitorResource> {
        ctx.run(async {
            let mut state = self.state.write().await;
            state.take_failure(StoreOperation::UpdateStatus)?;

            let key = resource.key();
            let stored = state.records.get_mut(&key).ok_or_else(|| not_found(&key))?;
            check_version(stored, resource)?;

            stored.status = resource.status.clone();
            stored.metadata.resource_version = stored.metadata.resource_version.saturating_add(1);
            Ok::<_, Error>(stored.clone())
        })
        .await?
    }

    async fn update_metadata(
        &self,
        ctx: &Context,
        resource: &MonitorResource,
    ) -> Result<MonitorResource> {
        ctx.run(async {
            let mut state = self.state.write().await;
            state.take_failure(StoreOperation::UpdateMetadata)?;

            let key = resource.key();
            let stored = state.records.get_mut(&key).ok_or_else(|| not_found(&key))?;
            check_version(stored, resource)?;

            stored.metadata.finalizers = resource.metadata.finalizers.clone();
            stored.metadata.resource_version = stored.metadata.resource_version.saturating_add(1);
            let snapshot = stored.clone();

            if should_purge(&snapshot) {
                tracing::debug!(key = %key, "Purging record");
                state.records.remove(&key);
            }
            Ok::<_, Error>(snapshot)
        })
        .await?
    }

    async fn list(&self, ctx: &Context) -> Result<Vec<ResourceKey>> {
        ctx.run(async {
            let mut state = self.state.write().await;
            state.take_failure(StoreOperation::List)?;
            let mut keys: Vec<_> = state.records.keys().cloned().collect();
            keys.sort();
            Ok::<_, Error>(keys)
        })
        .await?
    }
}
