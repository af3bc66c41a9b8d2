//! Binds the Datadog HTTP client to [`RuleClient`].
//!
//! This is the only module that knows the wire shape of a monitor.

use async_trait::async_trait;
use ddmon_datadog::{DatadogClient, Monitor};

use crate::client::{ClientError, ClientErrorKind, RuleClient};
use crate::context::Context;
use crate::rule::{RemoteRule, RuleOptions, ServerFields};

/// Convert a snapshot into the Datadog wire representation.
///
/// # Errors
///
/// Returns a [`ClientError`] if the options cannot be encoded.
pub fn to_monitor(rule: &RemoteRule) -> Result<Monitor, ClientError> {
    let options = serde_json::to_value(&rule.options)
        .map_err(|e| ClientError::other(format!("cannot encode options: {e}")))?;

    Ok(Monitor {
        id: rule.id,
        name: Some(rule.name.clone()),
        monitor_type: Some(rule.rule_type.clone()),
        query: Some(rule.query.clone()),
        message: Some(rule.message.clone()),
        tags: rule.tags.clone(),
        options: Some(options),
        ..Default::default()
    })
}

/// Convert a Datadog monitor into a snapshot.
///
/// # Errors
///
/// Returns a [`ClientError`] if the response carries options of the wrong shape.
pub fn from_monitor(monitor: Monitor) -> Result<RemoteRule, ClientError> {
    let options = match monitor.options {
        None | Some(serde_json::Value::Null) => RuleOptions::default(),
        Some(raw) => serde_json::from_value(raw)
            .map_err(|e| ClientError::other(format!("unexpected options in response: {e}")))?,
    };

    let creator = monitor
        .creator
        .and_then(|c| c.email.or(c.handle).or(c.name));

    Ok(RemoteRule {
        id: monitor.id,
        name: monitor.name.unwrap_or_default(),
        rule_type: monitor.monitor_type.unwrap_or_default(),
        query: monitor.query.unwrap_or_default(),
        message: monitor.message.unwrap_or_default(),
        tags: monitor.tags,
        options,
        server: ServerFields {
            creator,
            created: monitor.created,
            modified: monitor.modified,
            overall_state: monitor.overall_state,
            org_id: monitor.org_id,
            other: monitor.extra,
        },
    })
}

/// Classify a Datadog error by status.
pub fn classify(err: &ddmon_datadog::Error) -> ClientErrorKind {
    if err.is_not_found() {
        ClientErrorKind::NotFound
    } else if err.is_bad_request() {
        ClientErrorKind::BadRequest
    } else if err.is_forbidden() {
        ClientErrorKind::Forbidden
    } else {
        ClientErrorKind::Other
    }
}

impl From<ddmon_datadog::Error> for ClientError {
    fn from(err: ddmon_datadog::Error) -> Self {
        Self::new(classify(&err), err.to_string())
    }
}

#[async_trait]
impl RuleClient for DatadogClient {
    async fn create(&self, ctx: &Context, rule: &RemoteRule) -> Result<i64, ClientError> {
        let mut payload = to_monitor(rule)?;
        payload.id = None;

        let created = ctx.run(self.create_monitor(&payload)).await??;

        created
            .id
            .ok_or_else(|| ClientError::other("create response carried no monitor id"))
    }

    async fn get(&self, ctx: &Context, id: i64) -> Result<RemoteRule, ClientError> {
        let monitor = ctx.run(self.get_monitor(id)).await??;
        from_monitor(monitor)
    }

    async fn update(&self, ctx: &Context, rule: &RemoteRule) -> Result<(), ClientError> {
        let payload = to_monitor(rule)?;
        ctx.run(self.update_monitor(&payload)).await??;
        Ok(())
    }

    async fn delete(&self, ctx: &Context, id: i64) -> Result<(), ClientError> {
        ctx.run(self.delete_monitor(id)).await??;
        Ok(())
    }
}
