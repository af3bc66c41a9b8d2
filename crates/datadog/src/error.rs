//! Error types for the Datadog client.

use thiserror::Error;

/// Result type for Datadog API operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to the Datadog API.
#[derive(Error, Debug)]
pub enum Error {
    /// The API answered with a non-success status.
    ///
    /// The message mirrors the API's own convention, e.g.
    /// `API error 404 Not Found: {"errors":["Monitor not found"]}`.
    #[error("API error {status} {reason}: {body}")]
    Api {
        status: u16,
        reason: String,
        body: String,
    },

    /// Configuration error.
    #[error("configuration error: {reason}")]
    Config { reason: String },

    /// Response body could not be understood.
    #[error("invalid response: {reason}")]
    InvalidResponse { reason: String },

    /// HTTP error from reqwest.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parse error.
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create an API error from a status code and response body.
    pub fn api(status: reqwest::StatusCode, body: impl Into<String>) -> Self {
        Self::Api {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
            body: body.into(),
        }
    }

    /// Create a config error.
    pub fn config_error(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Create an invalid response error.
    pub fn invalid_response(reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            reason: reason.into(),
        }
    }

    /// HTTP status of an API error, if this is one.
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The monitor (or endpoint) does not exist.
    pub const fn is_not_found(&self) -> bool {
        matches!(self.status(), Some(404))
    }

    /// The request was rejected as malformed.
    pub const fn is_bad_request(&self) -> bool {
        matches!(self.status(), Some(400))
    }

    /// The credentials were rejected.
    pub const fn is_forbidden(&self) -> bool {
        matches!(self.status(), Some(401 | 403))
    }
}
