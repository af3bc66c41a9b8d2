//! Error types for the reconciler crate.

use thiserror::Error;

use crate::client::{ClientError, ClientErrorKind};
use crate::context::Interrupted;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Why the remote service refused a request for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    /// The rule is malformed for the remote service.
    BadRequest,
    /// Credentials or authorization were refused.
    Forbidden,
}

impl std::fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadRequest => write!(f, "bad request"),
            Self::Forbidden => write!(f, "forbidden"),
        }
    }
}

/// Reconciler error types.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The options payload of the spec does not parse.
    #[error("malformed monitor spec: {reason}")]
    MalformedSpec { reason: String },

    /// The remote service rejected the request and will keep doing so.
    #[error("remote rejected request ({kind}): {reason}")]
    Rejected { kind: RejectionKind, reason: String },

    /// The remote service failed in a way that may go away.
    #[error("remote call failed: {reason}")]
    Remote { reason: String },

    /// A store write after a successful remote mutation failed.
    #[error("failed to persist {what}: {reason}")]
    Persistence { what: String, reason: String },

    /// Loading a record failed for a reason other than absence.
    #[error("store error: {reason}")]
    Store { reason: String },

    /// A store write raced with another writer.
    #[error("conflict writing '{key}': stored version {stored}, write based on {expected}")]
    Conflict {
        key: String,
        expected: u64,
        stored: u64,
    },

    /// The cycle was cancelled.
    #[error("reconciliation cancelled")]
    Cancelled,

    /// The cycle ran past its deadline.
    #[error("reconciliation deadline exceeded")]
    DeadlineExceeded,

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// The controller is no longer accepting work.
    #[error("controller stopped")]
    ControllerStopped,
}

impl Error {
    /// Create a malformed spec error.
    pub fn malformed_spec(reason: impl Into<String>) -> Self {
        Self::MalformedSpec {
            reason: reason.into(),
        }
    }

    /// Create a rejection error.
    pub fn rejected(kind: RejectionKind, reason: impl Into<String>) -> Self {
        Self::Rejected {
            kind,
            reason: reason.into(),
        }
    }

    /// Create a transient remote error.
    pub fn remote(reason: impl Into<String>) -> Self {
        Self::Remote {
            reason: reason.into(),
        }
    }

    /// Create a persistence error.
    pub fn persistence(what: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Persistence {
            what: what.into(),
            reason: reason.into(),
        }
    }

    /// Create a store error.
    pub fn store(reason: impl Into<String>) -> Self {
        Self::Store {
            reason: reason.into(),
        }
    }

    /// Create a conflict error.
    pub fn conflict(key: impl Into<String>, expected: u64, stored: u64) -> Self {
        Self::Conflict {
            key: key.into(),
            expected,
            stored,
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Retrying with the same input cannot succeed; an operator has to act.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::MalformedSpec { .. } | Self::Rejected { .. })
    }

    /// The dispatch layer should retry with backoff.
    pub const fn is_retryable(&self) -> bool {
        !self.is_terminal()
    }

    /// Re-label a store failure as a failed persist of `what`.
    #[must_use]
    pub fn while_persisting(self, what: &str) -> Self {
        match self {
            Self::Store { reason } => Self::persistence(what, reason),
            other => other,
        }
    }
}

impl From<Interrupted> for Error {
    fn from(interrupted: Interrupted) -> Self {
        match interrupted {
            Interrupted::Cancelled => Self::Cancelled,
            Interrupted::DeadlineExceeded => Self::DeadlineExceeded,
        }
    }
}

/// Classify a client failure.
///
/// Not-found is mapped to a transient error here; callers that treat absence
/// specially must check [`ClientError::is_not_found`] before converting.
impl From<ClientError> for Error {
    fn from(err: ClientError) -> Self {
        match err.kind {
            ClientErrorKind::BadRequest => Self::rejected(RejectionKind::BadRequest, err.message),
            ClientErrorKind::Forbidden => Self::rejected(RejectionKind::Forbidden, err.message),
            ClientErrorKind::Interrupted(interrupted) => Self::from(interrupted),
            ClientErrorKind::NotFound | ClientErrorKind::Other => Self::remote(err.message),
        }
    }
}
