//! In-memory snapshot of an external monitor.
//!
//! This is the operator's own view of a remote monitor, independent of any
//! wire format. [`crate::adapter`] converts it to and from the Datadog API.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Alert thresholds.
///
/// Numeric values are held as `f64` so `80` and `80.0` compare equal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ok: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critical: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unknown: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critical_recovery: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning_recovery: Option<f64>,
}

/// Monitor options.
///
/// Known keys are typed; anything else is carried through untouched in
/// `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_no_data: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_data_timeframe: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_host_delay: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation_delay: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_h: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renotify_interval: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_audit: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_tags: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_full_window: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thresholds: Option<Thresholds>,
    /// Scope -> mute-until timestamp (`None` mutes indefinitely).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub silenced: Option<BTreeMap<String, Option<i64>>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Service-assigned fields. The mapper never writes these.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerFields {
    pub creator: Option<String>,
    pub created: Option<String>,
    pub modified: Option<String>,
    pub overall_state: Option<String>,
    pub org_id: Option<i64>,
    pub other: BTreeMap<String, Value>,
}

/// Snapshot of an external monitor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteRule {
    /// Remote identity; `None` until the service assigns one.
    pub id: Option<i64>,
    pub name: String,
    pub rule_type: String,
    pub query: String,
    pub message: String,
    pub tags: Vec<String>,
    pub options: RuleOptions,
    pub server: ServerFields,
}

impl RemoteRule {
    /// An empty snapshot, the starting point for a create.
    pub fn empty() -> Self {
        Self::default()
    }
}
