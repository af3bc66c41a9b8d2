//! Reconciler implementation.

use std::sync::Arc;

use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::change;
use crate::client::RuleClient;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::finalizer::{add_finalizer, has_finalizer, remove_finalizer, FINALIZER};
use crate::mapper;
use crate::rule::RemoteRule;
use crate::store::ResourceStore;
use crate::types::{classify, MonitorResource, Phase, ReconcileOutcome, ResourceKey};

/// Converges one external monitor per desired record.
///
/// Each call to [`Reconciler::reconcile`] is a single idempotent step: load
/// the record, derive its [`Phase`], perform at most one remote mutation and
/// persist the result. Transient failures are returned for the caller to
/// retry; permanent ones are recorded on the record and swallowed.
pub struct Reconciler {
    client: Arc<dyn RuleClient>,
    store: Arc<dyn ResourceStore>,
}

impl Reconciler {
    /// Create a new reconciler.
    pub fn new(client: Arc<dyn RuleClient>, store: Arc<dyn ResourceStore>) -> Self {
        Self { client, store }
    }

    /// Start building a reconciler.
    pub fn builder() -> ReconcilerBuilder {
        ReconcilerBuilder::new()
    }

    /// Run one convergence cycle for `key`.
    ///
    /// # Errors
    ///
    /// Returns retryable errors only: remote failures, store failures,
    /// write conflicts and context interruption. Malformed specs and
    /// permanent remote rejections yield `Ok(ReconcileOutcome::Rejected)`.
    pub async fn reconcile(&self, ctx: &Context, key: &ResourceKey) -> Result<ReconcileOutcome> {
        let span = info_span!("reconcile", resource = %key);
        self.reconcile_inner(ctx, key).instrument(span).await
    }

    async fn reconcile_inner(&self, ctx: &Context, key: &ResourceKey) -> Result<ReconcileOutcome> {
        let Some(resource) = self.store.get(ctx, key).await? else {
            debug!("Record not found; nothing to do");
            return Ok(ReconcileOutcome::NotFound);
        };

        let phase = classify(&resource);
        debug!(
            phase = %phase,
            monitor_id = resource.status.monitor_id,
            version = resource.metadata.resource_version,
            generation = resource.metadata.generation,
            "Reconciling"
        );

        let result = match phase {
            Phase::Creating => self.create(ctx, resource, None).await,
            Phase::Syncing => self.sync(ctx, resource).await,
            Phase::Deleting => self.delete(ctx, resource).await,
            Phase::Terminal => {
                debug!("Deletion requested and finalizer released; awaiting removal");
                Ok(ReconcileOutcome::Terminal)
            }
        };

        match result {
            Err(e) if e.is_terminal() => Ok(self.reject(ctx, key, &e).await),
            other => other,
        }
    }

    /// Create a monitor from the spec and link it to the record.
    ///
    /// `previous` is the id of a linked monitor that went missing remotely.
    async fn create(
        &self,
        ctx: &Context,
        mut resource: MonitorResource,
        previous: Option<i64>,
    ) -> Result<ReconcileOutcome> {
        let rule = mapper::apply(&RemoteRule::empty(), &resource.spec)?;
        let monitor_id = self.client.create(ctx, &rule).await?;
        info!(monitor_id, "Created monitor");

        // The monitor exists but is not linked until this write lands.
        resource.status.monitor_id = monitor_id;
        resource.status.message = None;
        let resource = self.persist_status(ctx, &resource).await?;
        self.ensure_finalizer(ctx, resource).await?;

        Ok(match previous {
            Some(previous_id) => ReconcileOutcome::Recreated {
                previous_id,
                monitor_id,
            },
            None => ReconcileOutcome::Created { monitor_id },
        })
    }

    /// Bring the linked monitor in line with the spec.
    async fn sync(&self, ctx: &Context, resource: MonitorResource) -> Result<ReconcileOutcome> {
        let monitor_id = resource.status.monitor_id;

        let snapshot = match self.client.get(ctx, monitor_id).await {
            Ok(snapshot) => snapshot,
            Err(e) if e.is_not_found() => {
                warn!(monitor_id, "Monitor missing remotely; recreating");
                return self.create(ctx, resource, Some(monitor_id)).await;
            }
            Err(e) => return Err(e.into()),
        };

        let mapped = change::detect(&snapshot, &resource.spec)?;
        let outcome = if mapped.changed {
            let mut rule = mapped.rule;
            rule.id = Some(monitor_id);
            self.client.update(ctx, &rule).await?;
            info!(monitor_id, "Updated monitor");
            ReconcileOutcome::Updated { monitor_id }
        } else {
            debug!(monitor_id, "Monitor up to date");
            ReconcileOutcome::Unchanged { monitor_id }
        };

        let resource = if resource.status.message.is_some() {
            let mut cleared = resource;
            cleared.status.message = None;
            self.persist_status(ctx, &cleared).await?
        } else {
            resource
        };
        // A previous cycle may have linked the monitor but failed to add the marker.
        self.ensure_finalizer(ctx, resource).await?;

        Ok(outcome)
    }

    /// Delete the linked monitor and release the finalizer.
    async fn delete(&self, ctx: &Context, mut resource: MonitorResource) -> Result<ReconcileOutcome> {
        match resource.monitor_id() {
            Some(monitor_id) => match self.client.delete(ctx, monitor_id).await {
                Ok(()) => info!(monitor_id, "Deleted monitor"),
                Err(e) if e.is_not_found() => info!(monitor_id, "Monitor already gone"),
                Err(e) => return Err(e.into()),
            },
            None => debug!("No monitor linked; releasing finalizer"),
        }

        remove_finalizer(&mut resource.metadata, FINALIZER);
        self.store
            .update_metadata(ctx, &resource)
            .await
            .map_err(|e| e.while_persisting("finalizer"))?;
        info!("Finalizer released");

        Ok(ReconcileOutcome::Deleted)
    }

    /// Persist status, retrying once against a fresh copy on conflict.
    ///
    /// Losing this write after a create orphans the new monitor, so an owner
    /// edit racing with the cycle must not be enough to lose it.
    async fn persist_status(
        &self,
        ctx: &Context,
        resource: &MonitorResource,
    ) -> Result<MonitorResource> {
        let written = match self.store.update_status(ctx, resource).await {
            Err(Error::Conflict { .. }) => {
                debug!("Status write conflicted; retrying against fresh copy");
                let mut fresh = self
                    .store
                    .get(ctx, &resource.key())
                    .await?
                    .ok_or_else(|| Error::persistence("status", "record vanished"))?;
                fresh.status = resource.status.clone();
                self.store.update_status(ctx, &fresh).await
            }
            other => other,
        };
        written.map_err(|e| e.while_persisting("status"))
    }

    async fn ensure_finalizer(&self, ctx: &Context, mut resource: MonitorResource) -> Result<()> {
        if has_finalizer(&resource.metadata, FINALIZER) {
            return Ok(());
        }
        add_finalizer(&mut resource.metadata, FINALIZER);
        self.store
            .update_metadata(ctx, &resource)
            .await
            .map_err(|e| e.while_persisting("finalizer"))?;
        debug!("Finalizer added");
        Ok(())
    }

    /// Record a permanent failure on the record and end the cycle.
    async fn reject(&self, ctx: &Context, key: &ResourceKey, err: &Error) -> ReconcileOutcome {
        let reason = err.to_string();
        error!(error = %reason, "Permanent failure; not retrying until the record changes");

        if let Err(e) = self.record_message(ctx, key, &reason).await {
            warn!(error = %e, "Could not record failure on status");
        }
        ReconcileOutcome::Rejected { reason }
    }

    async fn record_message(&self, ctx: &Context, key: &ResourceKey, reason: &str) -> Result<()> {
        let Some(mut resource) = self.store.get(ctx, key).await? else {
            return Ok(());
        };
        if resource.status.message.as_deref() == Some(reason) {
            return Ok(());
        }
        resource.status.message = Some(reason.to_string());
        self.store.update_status(ctx, &resource).await?;
        Ok(())
    }

    /// Get the record store.
    pub fn store(&self) -> &Arc<dyn ResourceStore> {
        &self.store
    }
}

/// Builder for Reconciler.
#[derive(Default)]
pub struct ReconcilerBuilder {
    client: Option<Arc<dyn RuleClient>>,
    store: Option<Arc<dyn ResourceStore>>,
}

impl ReconcilerBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the rule client.
    #[must_use]
    pub fn with_client(mut self, client: Arc<dyn RuleClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Set the record store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn ResourceStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Build the reconciler.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the client or store is missing.
    pub fn build(self) -> Result<Reconciler> {
        let client = self
            .client
            .ok_or_else(|| Error::invalid_config("Rule client is required"))?;
        let store = self
            .store
            .ok_or_else(|| Error::invalid_config("Resource store is required"))?;

        Ok(Reconciler::new(client, store))
    }
}
