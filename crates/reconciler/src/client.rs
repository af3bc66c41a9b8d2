//! External rule client: the remote CRUD collaborator.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use async_trait::async_trait;
use tokio::sync::{Mutex, MutexGuard};

use crate::context::{Context, Interrupted};
use crate::rule::{RemoteRule, RuleOptions};

/// Classified failure kind of a remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientErrorKind {
    /// The monitor does not exist.
    NotFound,
    /// The request was malformed for the service.
    BadRequest,
    /// Credentials were refused.
    Forbidden,
    /// The context fired before the call finished.
    Interrupted(Interrupted),
    /// Anything else.
    Other,
}

impl fmt::Display for ClientErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not found"),
            Self::BadRequest => write!(f, "bad request"),
            Self::Forbidden => write!(f, "forbidden"),
            Self::Interrupted(i) => write!(f, "{i}"),
            Self::Other => write!(f, "error"),
        }
    }
}

/// Error returned by a [`RuleClient`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ClientError {
    pub kind: ClientErrorKind,
    pub message: String,
}

impl ClientError {
    /// Create an error of the given kind.
    pub fn new(kind: ClientErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Create a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ClientErrorKind::NotFound, message)
    }

    /// Create a bad-request error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ClientErrorKind::BadRequest, message)
    }

    /// Create a forbidden error.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ClientErrorKind::Forbidden, message)
    }

    /// Create an unclassified error.
    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ClientErrorKind::Other, message)
    }

    /// Whether the monitor does not exist.
    pub fn is_not_found(&self) -> bool {
        self.kind == ClientErrorKind::NotFound
    }
}

impl From<Interrupted> for ClientError {
    fn from(interrupted: Interrupted) -> Self {
        Self::new(ClientErrorKind::Interrupted(interrupted), interrupted.to_string())
    }
}

/// Remote CRUD interface for monitors.
#[async_trait]
pub trait RuleClient: Send + Sync {
    /// Create a monitor and return its id.
    ///
    /// # Errors
    ///
    /// Returns a [`ClientError`] classified by the service response.
    async fn create(&self, ctx: &Context, rule: &RemoteRule) -> Result<i64, ClientError>;

    /// Fetch a monitor.
    ///
    /// # Errors
    ///
    /// Returns a [`ClientError`] of kind `NotFound` when no monitor has `id`.
    async fn get(&self, ctx: &Context, id: i64) -> Result<RemoteRule, ClientError>;

    /// Write a monitor's desired fields; `rule.id` selects the monitor.
    ///
    /// # Errors
    ///
    /// Returns a [`ClientError`] classified by the service response.
    async fn update(&self, ctx: &Context, rule: &RemoteRule) -> Result<(), ClientError>;

    /// Delete a monitor.
    ///
    /// # Errors
    ///
    /// Returns a [`ClientError`] of kind `NotFound` when the monitor is already gone.
    async fn delete(&self, ctx: &Context, id: i64) -> Result<(), ClientError>;
}

/// A remote operation, for call counting and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Get,
    Update,
    Delete,
}

/// Number of calls made to an [`InMemoryRuleClient`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub create: usize,
    pub get: usize,
    pub update: usize,
    pub delete: usize,
}

impl CallCounts {
    /// Calls that mutate remote state.
    pub const fn writes(&self) -> usize {
        self.create
            .saturating_add(self.update)
            .saturating_add(self.delete)
    }

    fn record(&mut self, op: Operation) {
        let counter = match op {
            Operation::Create => &mut self.create,
            Operation::Get => &mut self.get,
            Operation::Update => &mut self.update,
            Operation::Delete => &mut self.delete,
        };
        *counter = counter.saturating_add(1);
    }
}

#[derive(Debug)]
struct InMemoryState {
    rules: BTreeMap<i64, RemoteRule>,
    next_id: i64,
    calls: CallCounts,
    failures: VecDeque<(Operation, ClientError)>,
}

/// In-memory monitor service for tests and dry runs.
///
/// Behaves like the real service: ids are assigned on create, service
/// fields are filled in, and missing ids answer not-found.
#[derive(Debug)]
pub struct InMemoryRuleClient {
    state: Mutex<InMemoryState>,
}

impl InMemoryRuleClient {
    /// Create an empty service whose first id is 1.
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Create an empty service whose first id is `next_id`.
    pub fn starting_at(next_id: i64) -> Self {
        Self {
            state: Mutex::new(InMemoryState {
                rules: BTreeMap::new(),
                next_id,
                calls: CallCounts::default(),
                failures: VecDeque::new(),
            }),
        }
    }

    /// Store `rule` under `id`, as if created out of band.
    pub async fn seed(&self, id: i64, mut rule: RemoteRule) {
        rule.id = Some(id);
        self.state.lock().await.rules.insert(id, rule);
    }

    /// Delete a monitor out of band.
    pub async fn remove(&self, id: i64) -> Option<RemoteRule> {
        self.state.lock().await.rules.remove(&id)
    }

    /// Current copy of a monitor.
    pub async fn rule(&self, id: i64) -> Option<RemoteRule> {
        self.state.lock().await.rules.get(&id).cloned()
    }

    /// Number of monitors stored.
    pub async fn len(&self) -> usize {
        self.state.lock().await.rules.len()
    }

    /// Whether no monitors are stored.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Calls made so far.
    pub async fn calls(&self) -> CallCounts {
        self.state.lock().await.calls
    }

    /// Make the next call of `op` fail with `error`.
    pub async fn fail_next(&self, op: Operation, error: ClientError) {
        self.state.lock().await.failures.push_back((op, error));
    }

    async fn begin(&self, op: Operation) -> Result<MutexGuard<'_, InMemoryState>, ClientError> {
        let mut state = self.state.lock().await;
        state.calls.record(op);

        if let Some(pos) = state.failures.iter().position(|(o, _)| *o == op) {
            if let Some((_, error)) = state.failures.remove(pos) {
                return Err(error);
            }
        }
        Ok(state)
    }
}

/// Options the service fills in when a create leaves them out.
fn fill_service_defaults(options: &mut RuleOptions) {
    options.notify_no_data.get_or_insert(false);
    options.notify_audit.get_or_insert(false);
    options.include_tags.get_or_insert(true);
    options.new_host_delay.get_or_insert(300);
    options.silenced.get_or_insert_with(BTreeMap::new);
}

impl Default for InMemoryRuleClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RuleClient for InMemoryRuleClient {
    async fn create(&self, ctx: &Context, rule: &RemoteRule) -> Result<i64, ClientError> {
        ctx.run(async {
            let mut state = self.begin(Operation::Create).await?;
            let id = state.next_id;
            state.next_id = id.saturating_add(1);

            let mut stored = rule.clone();
            stored.id = Some(id);
            fill_service_defaults(&mut stored.options);
            stored.server.overall_state = Some("No Data".to_string());
            stored.server.created = Some(chrono::Utc::now().to_rfc3339());
            state.rules.insert(id, stored);
            Ok::<_, ClientError>(id)
        })
        .await?
    }

    async fn get(&self, ctx: &Context, id: i64) -> Result<RemoteRule, ClientError> {
        ctx.run(async {
            let state = self.begin(Operation::Get).await?;
            state
                .rules
                .get(&id)
                .cloned()
                .ok_or_else(|| ClientError::not_found(format!("monitor {id} not found")))
        })
        .await?
    }

    async fn update(&self, ctx: &Context, rule: &RemoteRule) -> Result<(), ClientError> {
        ctx.run(async {
            let mut state = self.begin(Operation::Update).await?;
            let id = rule
                .id
                .ok_or_else(|| ClientError::bad_request("monitor id is required"))?;
            let stored = state
                .rules
                .get_mut(&id)
                .ok_or_else(|| ClientError::not_found(format!("monitor {id} not found")))?;

            let server = stored.server.clone();
            *stored = rule.clone();
            stored.server = server;
            stored.server.modified = Some(chrono::Utc::now().to_rfc3339());
            Ok::<_, ClientError>(())
        })
        .await?
    }

    async fn delete(&self, ctx: &Context, id: i64) -> Result<(), ClientError> {
        ctx.run(async {
            let mut state = self.begin(Operation::Delete).await?;
            state
                .rules
                .remove(&id)
                .map(|_| ())
                .ok_or_else(|| ClientError::not_found(format!("monitor {id} not found")))
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(name: &str) -> RemoteRule {
        RemoteRule {
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_assigns_sequential_ids() {
        let client = InMemoryRuleClient::starting_at(100);
        let ctx = Context::background();

        assert_eq!(client.create(&ctx, &rule("a")).await, Ok(100));
        assert_eq!(client.create(&ctx, &rule("b")).await, Ok(101));
        assert_eq!(client.len().await, 2);
        assert_eq!(client.calls().await.create, 2);
    }

    #[tokio::test]
    async fn test_missing_ids_are_not_found() {
        let client = InMemoryRuleClient::new();
        let ctx = Context::background();

        assert!(client.get(&ctx, 9).await.is_err_and(|e| e.is_not_found()));
        assert!(client.delete(&ctx, 9).await.is_err_and(|e| e.is_not_found()));

        let mut missing = rule("x");
        missing.id = Some(9);
        assert!(client
            .update(&ctx, &missing)
            .await
            .is_err_and(|e| e.is_not_found()));
    }

    #[tokio::test]
    async fn test_update_preserves_server_fields() {
        let client = InMemoryRuleClient::new();
        let ctx = Context::background();
        let id = client.create(&ctx, &rule("a")).await.unwrap_or_default();

        let mut edited = rule("b");
        edited.id = Some(id);
        assert!(client.update(&ctx, &edited).await.is_ok());

        let stored = client.rule(id).await.unwrap_or_default();
        assert_eq!(stored.name, "b");
        assert_eq!(stored.server.overall_state.as_deref(), Some("No Data"));
        assert!(stored.server.modified.is_some());
    }

    #[tokio::test]
    async fn test_create_fills_service_defaults() {
        let client = InMemoryRuleClient::new();
        let ctx = Context::background();
        let mut sent = rule("a");
        sent.options.new_host_delay = Some(60);
        let id = client.create(&ctx, &sent).await.unwrap_or_default();

        let stored = client.rule(id).await.unwrap_or_default();
        assert_eq!(stored.options.new_host_delay, Some(60));
        assert_eq!(stored.options.include_tags, Some(true));
        assert_eq!(stored.options.notify_audit, Some(false));
        assert_eq!(stored.options.silenced, Some(BTreeMap::new()));
    }

    #[tokio::test]
    async fn test_injected_failure_fires_once() {
        let client = InMemoryRuleClient::new();
        let ctx = Context::background();
        client
            .fail_next(Operation::Create, ClientError::bad_request("nope"))
            .await;

        assert_eq!(
            client.create(&ctx, &rule("a")).await,
            Err(ClientError::bad_request("nope"))
        );
        assert!(client.create(&ctx, &rule("a")).await.is_ok());
        assert_eq!(client.calls().await.create, 2);
    }
}
