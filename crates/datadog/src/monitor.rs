//! Wire representation of a Datadog monitor.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A monitor as exchanged with `/api/v1/monitor`.
///
/// Only the top-level shape is typed here. `options` is passed through as
/// raw JSON so callers decide how strictly to interpret it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Monitor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub monitor_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,

    // Read-only, assigned by Datadog.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<Creator>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_state: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<i64>,

    /// Any field this client does not know about.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Author of a monitor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Creator {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Monitor {
    /// Copy of this monitor carrying only the fields Datadog accepts on writes.
    #[must_use]
    pub fn writable(&self) -> Self {
        Self {
            id: self.id,
            name: self.name.clone(),
            monitor_type: self.monitor_type.clone(),
            query: self.query.clone(),
            message: self.message.clone(),
            tags: self.tags.clone(),
            options: self.options.clone(),
            ..Default::default()
        }
    }
}
