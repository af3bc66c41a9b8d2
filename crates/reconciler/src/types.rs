//! Core types for the reconciler.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::finalizer::{has_finalizer, FINALIZER};

/// Namespace used when a key or manifest does not name one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Namespaced identifier of a desired record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    /// Create a key.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for ResourceKey {
    type Err = Error;

    /// Parse `namespace/name`, or a bare `name` in the default namespace.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace, name) = match s.split_once('/') {
            Some((namespace, name)) => (namespace, name),
            None => (DEFAULT_NAMESPACE, s),
        };

        if namespace.is_empty() || name.is_empty() || name.contains('/') {
            return Err(Error::invalid_config(format!("invalid resource key '{s}'")));
        }

        Ok(Self::new(namespace, name))
    }
}

/// Store-managed metadata of a desired record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Markers that block physical removal while present.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,

    /// Set by the owner to request removal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,

    /// Bumped by the store on every write.
    #[serde(default)]
    pub resource_version: u64,

    /// Bumped by the store whenever the spec changes.
    #[serde(default)]
    pub generation: u64,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

/// Desired monitor, as authored by the owner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitorSpec {
    pub name: String,

    #[serde(rename = "type")]
    pub monitor_type: String,

    pub query: String,

    #[serde(default)]
    pub message: String,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Opaque options payload, interpreted when the spec is mapped.
    #[serde(default)]
    pub options: serde_json::Value,
}

/// Observed state written by the reconciler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStatus {
    /// Id of the external monitor; `0` until one has been created.
    #[serde(default)]
    pub monitor_id: i64,

    /// Last permanent failure, cleared by the next successful write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A desired record: one monitor managed by this operator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitorResource {
    pub metadata: ObjectMeta,
    pub spec: MonitorSpec,
    #[serde(default)]
    pub status: MonitorStatus,
}

impl MonitorResource {
    /// Create a record with the given key and spec.
    pub fn new(key: &ResourceKey, spec: MonitorSpec) -> Self {
        Self {
            metadata: ObjectMeta {
                name: key.name.clone(),
                namespace: key.namespace.clone(),
                ..Default::default()
            },
            spec,
            status: MonitorStatus::default(),
        }
    }

    /// The record's key.
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(&self.metadata.namespace, &self.metadata.name)
    }

    /// Whether the owner asked for removal.
    pub const fn is_deletion_requested(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Id of the linked external monitor, if one was recorded.
    pub const fn monitor_id(&self) -> Option<i64> {
        match self.status.monitor_id {
            0 => None,
            id => Some(id),
        }
    }
}

/// Where a record sits in the convergence state machine.
///
/// Derived from the record on every cycle; never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No external monitor yet; create one.
    Creating,
    /// Linked to an external monitor; bring it in line with the spec.
    Syncing,
    /// Removal requested while cleanup is pending.
    Deleting,
    /// Removal requested and cleanup done; nothing to do.
    Terminal,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Creating => write!(f, "creating"),
            Self::Syncing => write!(f, "syncing"),
            Self::Deleting => write!(f, "deleting"),
            Self::Terminal => write!(f, "terminal"),
        }
    }
}

/// Classify a record. Deletion is checked before creation, so a record
/// marked for removal is never (re)created.
pub fn classify(resource: &MonitorResource) -> Phase {
    if resource.is_deletion_requested() {
        if has_finalizer(&resource.metadata, FINALIZER) {
            Phase::Deleting
        } else {
            Phase::Terminal
        }
    } else if resource.monitor_id().is_none() {
        Phase::Creating
    } else {
        Phase::Syncing
    }
}

/// What one convergence cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// A new external monitor was created and linked.
    Created { monitor_id: i64 },
    /// The linked monitor was missing remotely and has been created again.
    Recreated { previous_id: i64, monitor_id: i64 },
    /// The external monitor was updated.
    Updated { monitor_id: i64 },
    /// The external monitor already matched the spec.
    Unchanged { monitor_id: i64 },
    /// The external monitor is gone and the finalizer was released.
    Deleted,
    /// The record no longer exists.
    NotFound,
    /// Removal requested and nothing left to clean up.
    Terminal,
    /// A permanent failure ended the cycle; retrying the same input is pointless.
    Rejected { reason: String },
}

impl ReconcileOutcome {
    /// Whether the cycle wrote to the remote service.
    pub const fn wrote_remote(&self) -> bool {
        matches!(
            self,
            Self::Created { .. } | Self::Recreated { .. } | Self::Updated { .. } | Self::Deleted
        )
    }
}
