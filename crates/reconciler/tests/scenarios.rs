//! End-to-end convergence scenarios against the in-memory collaborators.
//!
//! Tests verify that:
//! - A new record gets exactly one monitor, linked and guarded by the finalizer
//! - Converged records cause no remote writes
//! - Monitors deleted out of band are recreated
//! - Deletion releases the finalizer only after the monitor is gone
//! - Permanent rejections end the cycle without a retryable error

use std::sync::Arc;

use ddmon_reconciler::{
    detect, has_finalizer, mapper, ClientError, Context, Error, InMemoryResourceStore,
    InMemoryRuleClient, MonitorResource, MonitorSpec, Operation, ReconcileOutcome, Reconciler,
    RemoteRule, ResourceKey, ResourceStore, RuleClient, StoreOperation, FINALIZER,
};
use serde_json::json;

/// Test helper: Unwrap a Result or panic with context
fn unwrap_result<T, E: std::fmt::Display>(result: std::result::Result<T, E>, context: &str) -> T {
    match result {
        Ok(value) => value,
        Err(e) => panic!("{}: {}", context, e),
    }
}

/// Test helper: Unwrap an Option or panic with context
fn unwrap_option<T>(option: Option<T>, context: &str) -> T {
    match option {
        Some(value) => value,
        None => panic!("{}", context),
    }
}

struct Harness {
    client: Arc<InMemoryRuleClient>,
    store: Arc<InMemoryResourceStore>,
    reconciler: Reconciler,
    ctx: Context,
}

impl Harness {
    fn new() -> Self {
        let client = Arc::new(InMemoryRuleClient::starting_at(1000));
        let store = InMemoryResourceStore::new_arc();
        let reconciler = Reconciler::new(client.clone(), store.clone());
        Self {
            client,
            store,
            reconciler,
            ctx: Context::background(),
        }
    }

    async fn reconcile(&self) -> ddmon_reconciler::Result<ReconcileOutcome> {
        self.reconciler.reconcile(&self.ctx, &key()).await
    }

    async fn record(&self) -> Option<MonitorResource> {
        unwrap_result(self.store.get(&self.ctx, &key()).await, "store get")
    }

    /// Store a record already linked to `monitor_id` and guarded by the finalizer.
    async fn linked(&self, monitor_id: i64) {
        let mut resource = MonitorResource::new(&key(), spec());
        resource.status.monitor_id = monitor_id;
        resource.metadata.finalizers.push(FINALIZER.to_string());
        self.store.apply(resource).await;
    }
}

fn key() -> ResourceKey {
    ResourceKey::new("monitoring", "cpu")
}

fn spec() -> MonitorSpec {
    MonitorSpec {
        name: "cpu-high".into(),
        monitor_type: "metric alert".into(),
        query: "avg:cpu>80".into(),
        message: "CPU is high @ops".into(),
        tags: vec!["team:infra".into(), "env:prod".into()],
        options: json!({"thresholds": {"critical": 80}, "notify_no_data": false}),
    }
}

fn converged_rule() -> RemoteRule {
    unwrap_result(mapper::apply(&RemoteRule::empty(), &spec()), "mapping spec")
}

// ==========================================================================
// CREATION
// ==========================================================================

#[tokio::test]
async fn scenario_a_new_record_creates_and_links_monitor() {
    // GIVEN: a record with no linked monitor
    let h = Harness::new();
    h.store.apply(MonitorResource::new(&key(), spec())).await;

    // WHEN: one cycle runs
    let outcome = unwrap_result(h.reconcile().await, "reconcile");

    // THEN: exactly one create, id persisted, finalizer added
    assert_eq!(outcome, ReconcileOutcome::Created { monitor_id: 1000 });
    let calls = h.client.calls().await;
    assert_eq!(calls.create, 1);
    assert_eq!(calls.update, 0);

    let record = unwrap_option(h.record().await, "record should exist");
    assert_eq!(record.status.monitor_id, 1000);
    assert!(has_finalizer(&record.metadata, FINALIZER));

    let remote = unwrap_option(h.client.rule(1000).await, "monitor should exist");
    assert_eq!(remote.name, "cpu-high");
    assert_eq!(remote.query, "avg:cpu>80");
    assert_eq!(remote.tags, spec().tags);
}

#[tokio::test]
async fn creation_is_exactly_once_across_repeated_notifications() {
    let h = Harness::new();
    h.store.apply(MonitorResource::new(&key(), spec())).await;

    for _ in 0..5 {
        unwrap_result(h.reconcile().await, "reconcile");
    }

    assert_eq!(h.client.calls().await.create, 1);
    assert_eq!(h.client.len().await, 1);
}

#[tokio::test]
async fn failed_status_persist_surfaces_for_retry() {
    // The monitor exists remotely but was never linked: a known gap.
    let h = Harness::new();
    h.store.apply(MonitorResource::new(&key(), spec())).await;
    h.store
        .fail_next(StoreOperation::UpdateStatus, Error::store("disk full"))
        .await;

    let result = h.reconcile().await;

    assert!(matches!(result, Err(Error::Persistence { ref what, .. }) if what == "status"));
    let record = unwrap_option(h.record().await, "record should exist");
    assert_eq!(record.status.monitor_id, 0);
    assert!(!has_finalizer(&record.metadata, FINALIZER));
    assert_eq!(h.client.len().await, 1);
}

// ==========================================================================
// SYNCING
// ==========================================================================

#[tokio::test]
async fn scenario_b_converged_monitor_is_not_updated() {
    // GIVEN: a linked record whose monitor already matches, plus server fields
    let h = Harness::new();
    let mut remote = converged_rule();
    remote.server.overall_state = Some("OK".into());
    remote.server.creator = Some("ops@example.com".into());
    h.client.seed(42, remote).await;
    h.linked(42).await;

    // WHEN: one cycle runs
    let outcome = unwrap_result(h.reconcile().await, "reconcile");

    // THEN: no remote writes
    assert_eq!(outcome, ReconcileOutcome::Unchanged { monitor_id: 42 });
    assert_eq!(h.client.calls().await.writes(), 0);
}

#[tokio::test]
async fn spec_edit_updates_monitor_in_place() {
    let h = Harness::new();
    h.client.seed(42, converged_rule()).await;
    h.linked(42).await;

    let mut edited = MonitorResource::new(&key(), spec());
    edited.spec.query = "avg:cpu>95".into();
    h.store.apply(edited).await;

    let outcome = unwrap_result(h.reconcile().await, "reconcile");

    assert_eq!(outcome, ReconcileOutcome::Updated { monitor_id: 42 });
    let remote = unwrap_option(h.client.rule(42).await, "monitor should exist");
    assert_eq!(remote.query, "avg:cpu>95");
    assert_eq!(h.client.calls().await.create, 0);
}

#[tokio::test]
async fn scenario_c_missing_monitor_is_recreated() {
    // GIVEN: a record linked to a monitor that no longer exists remotely
    let h = Harness::new();
    h.linked(42).await;

    // WHEN: one cycle runs
    let outcome = unwrap_result(h.reconcile().await, "reconcile");

    // THEN: a new monitor is created and its id persisted
    assert_eq!(
        outcome,
        ReconcileOutcome::Recreated {
            previous_id: 42,
            monitor_id: 1000
        }
    );
    assert_eq!(h.client.calls().await.create, 1);
    let record = unwrap_option(h.record().await, "record should exist");
    assert_eq!(record.status.monitor_id, 1000);
    assert!(has_finalizer(&record.metadata, FINALIZER));
}

#[tokio::test]
async fn idempotence_second_cycle_writes_nothing() {
    let h = Harness::new();
    h.store.apply(MonitorResource::new(&key(), spec())).await;
    unwrap_result(h.reconcile().await, "first reconcile");
    let writes_after_create = h.client.calls().await.writes();
    let version_after_create = unwrap_option(h.record().await, "record").metadata.resource_version;

    let outcome = unwrap_result(h.reconcile().await, "second reconcile");

    assert_eq!(outcome, ReconcileOutcome::Unchanged { monitor_id: 1000 });
    assert_eq!(h.client.calls().await.writes(), writes_after_create);
    assert_eq!(
        unwrap_option(h.record().await, "record").metadata.resource_version,
        version_after_create
    );
}

#[tokio::test]
async fn service_default_options_settle_after_one_cycle() {
    // GIVEN: a linked monitor carrying options the service filled in
    let h = Harness::new();
    let mut remote = converged_rule();
    remote.options.notify_audit = Some(false);
    remote.options.include_tags = Some(true);
    remote.options.new_host_delay = Some(300);
    remote.options.silenced = Some(Default::default());
    remote
        .options
        .extra
        .insert("on_missing_data".into(), json!("default"));
    h.client.seed(42, remote).await;
    h.linked(42).await;

    // WHEN: several cycles run
    for _ in 0..3 {
        let outcome = unwrap_result(h.reconcile().await, "reconcile");
        assert_eq!(outcome, ReconcileOutcome::Unchanged { monitor_id: 42 });
    }

    // THEN: nothing is written back
    assert_eq!(h.client.calls().await.writes(), 0);
}

#[tokio::test]
async fn round_trip_get_apply_update_get_is_unchanged() {
    let h = Harness::new();
    h.client.seed(42, RemoteRule::empty()).await;

    let fetched = unwrap_result(h.client.get(&h.ctx, 42).await, "get");
    let mapped = unwrap_result(detect(&fetched, &spec()), "detect");
    assert!(mapped.changed);
    unwrap_result(h.client.update(&h.ctx, &mapped.rule).await, "update");

    let refetched = unwrap_result(h.client.get(&h.ctx, 42).await, "get again");
    let again = unwrap_result(detect(&refetched, &spec()), "detect again");
    assert!(!again.changed);
}

// ==========================================================================
// DELETION
// ==========================================================================

#[tokio::test]
async fn scenario_d_deletion_removes_monitor_then_finalizer() {
    // GIVEN: a linked record marked for deletion
    let h = Harness::new();
    h.client.seed(42, converged_rule()).await;
    h.linked(42).await;
    h.store.request_deletion(&key()).await;

    // WHEN: one cycle runs
    let outcome = unwrap_result(h.reconcile().await, "reconcile");

    // THEN: the monitor is deleted once and the record is released
    assert_eq!(outcome, ReconcileOutcome::Deleted);
    assert_eq!(h.client.calls().await.delete, 1);
    assert!(h.client.rule(42).await.is_none());
    assert!(h.record().await.is_none());

    // A late notification finds nothing to do.
    assert_eq!(
        unwrap_result(h.reconcile().await, "late reconcile"),
        ReconcileOutcome::NotFound
    );
}

#[tokio::test]
async fn scenario_d_already_gone_monitor_still_releases_finalizer() {
    let h = Harness::new();
    h.linked(42).await;
    h.store.request_deletion(&key()).await;

    let outcome = unwrap_result(h.reconcile().await, "reconcile");

    assert_eq!(outcome, ReconcileOutcome::Deleted);
    assert_eq!(h.client.calls().await.delete, 1);
    assert!(h.record().await.is_none());
}

#[tokio::test]
async fn deletion_marked_record_is_never_created() {
    let h = Harness::new();
    let mut resource = MonitorResource::new(&key(), spec());
    resource.metadata.finalizers.push("other.example.com/hold".into());
    h.store.apply(resource).await;
    h.store.request_deletion(&key()).await;

    let outcome = unwrap_result(h.reconcile().await, "reconcile");

    assert_eq!(outcome, ReconcileOutcome::Terminal);
    assert_eq!(h.client.calls().await.writes(), 0);
}

#[tokio::test]
async fn finalizer_outlives_monitor_on_failed_delete() {
    let h = Harness::new();
    h.client.seed(42, converged_rule()).await;
    h.linked(42).await;
    h.store.request_deletion(&key()).await;
    h.client
        .fail_next(Operation::Delete, ClientError::other("503 Service Unavailable"))
        .await;

    let result = h.reconcile().await;

    assert!(result.is_err_and(|e| e.is_retryable()));
    assert!(h.client.rule(42).await.is_some());
    let record = unwrap_option(h.record().await, "record should still exist");
    assert!(has_finalizer(&record.metadata, FINALIZER));
}

#[tokio::test]
async fn finalizer_persist_failure_after_delete_recovers_on_retry() {
    let h = Harness::new();
    h.client.seed(42, converged_rule()).await;
    h.linked(42).await;
    h.store.request_deletion(&key()).await;
    h.store
        .fail_next(StoreOperation::UpdateMetadata, Error::store("disk full"))
        .await;

    // Monitor gone, marker still present: the allowed transient window.
    assert!(h.reconcile().await.is_err());
    assert!(h.client.rule(42).await.is_none());
    let record = unwrap_option(h.record().await, "record should still exist");
    assert!(has_finalizer(&record.metadata, FINALIZER));

    // Retry: delete answers not-found, marker is released.
    assert_eq!(
        unwrap_result(h.reconcile().await, "retry"),
        ReconcileOutcome::Deleted
    );
    assert!(h.record().await.is_none());
}

// ==========================================================================
// PERMANENT FAILURES
// ==========================================================================

#[tokio::test]
async fn scenario_e_bad_request_on_create_is_not_retried() {
    // GIVEN: a remote service that rejects the monitor as malformed
    let h = Harness::new();
    h.store.apply(MonitorResource::new(&key(), spec())).await;
    h.client
        .fail_next(
            Operation::Create,
            ClientError::bad_request("The value provided for parameter 'query' is invalid"),
        )
        .await;

    // WHEN: one cycle runs
    let outcome = unwrap_result(h.reconcile().await, "reconcile should not error");

    // THEN: rejected, nothing linked, no finalizer, reason on status
    assert!(matches!(outcome, ReconcileOutcome::Rejected { ref reason } if reason.contains("query")));
    let record = unwrap_option(h.record().await, "record should exist");
    assert_eq!(record.status.monitor_id, 0);
    assert!(!has_finalizer(&record.metadata, FINALIZER));
    assert!(record
        .status
        .message
        .as_deref()
        .is_some_and(|m| m.contains("bad request")));
}

#[tokio::test]
async fn forbidden_on_update_is_not_retried() {
    let h = Harness::new();
    h.client.seed(42, RemoteRule::empty()).await;
    h.linked(42).await;
    h.client
        .fail_next(Operation::Update, ClientError::forbidden("Forbidden"))
        .await;

    let outcome = unwrap_result(h.reconcile().await, "reconcile should not error");

    assert!(matches!(outcome, ReconcileOutcome::Rejected { .. }));
    let record = unwrap_option(h.record().await, "record should exist");
    assert_eq!(record.status.monitor_id, 42);
}

#[tokio::test]
async fn malformed_options_never_reach_remote() {
    let h = Harness::new();
    h.client.seed(42, converged_rule()).await;
    h.linked(42).await;

    let mut edited = MonitorResource::new(&key(), spec());
    edited.spec.options = json!({"notify_no_data": "sometimes"});
    h.store.apply(edited).await;

    let outcome = unwrap_result(h.reconcile().await, "reconcile should not error");

    assert!(matches!(outcome, ReconcileOutcome::Rejected { .. }));
    assert_eq!(h.client.calls().await.writes(), 0);
    assert_eq!(
        unwrap_option(h.client.rule(42).await, "monitor").query,
        "avg:cpu>80"
    );
}
