//! Error taxonomy for synchronization operations.

use thiserror::Error;

/// Errors that can occur while synchronizing findings with tracker issues.
///
/// The taxonomy partitions into terminal errors (surfaced per link to the
/// operator, never auto-retried) and transient errors (retried with backoff
/// by the scheduler, invisible to the operator unless the retry bound is
/// exhausted).
#[derive(Debug, Error)]
pub enum SyncError {
    /// Incomplete or contradictory configuration. Blocks activation and push.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Credentials rejected by the tracker. Terminal per configuration.
    #[error("authentication rejected by tracker: {0}")]
    Authentication(String),

    /// Remote entity missing (issue deleted on the tracker side).
    #[error("remote entity not found: {0}")]
    NotFound(String),

    /// Network failure, rate limit or tracker 5xx. Retried with backoff.
    #[error("transient tracker failure: {0}")]
    Transient(String),

    /// Malformed payload or mapping rejected by the tracker.
    #[error("validation failed on {field}: {message}")]
    Validation { field: String, message: String },

    /// Both sides changed since the last sync.
    #[error("conflicting change on {issue_key}: {detail}")]
    Conflict { issue_key: String, detail: String },

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    /// Whether this error must not be retried automatically.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Transient(_))
    }

    /// Classify an HTTP response status from the tracker.
    #[must_use]
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let detail = if body.is_empty() {
            format!("status {status}")
        } else {
            format!("status {status}: {body}")
        };

        match status.as_u16() {
            401 | 403 => Self::Authentication(detail),
            404 => Self::NotFound(detail),
            400 | 422 => Self::Validation {
                field: "payload".to_string(),
                message: detail,
            },
            429 => Self::Transient(format!("rate limited, {detail}")),
            _ => Self::Transient(detail),
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        // Transport-level failures (connect, timeout, dns) are retryable.
        // Status errors are classified separately before this point.
        Self::Transient(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            SyncError::from_status(reqwest::StatusCode::UNAUTHORIZED, ""),
            SyncError::Authentication(_)
        ));
        assert!(matches!(
            SyncError::from_status(reqwest::StatusCode::FORBIDDEN, ""),
            SyncError::Authentication(_)
        ));
        assert!(matches!(
            SyncError::from_status(reqwest::StatusCode::NOT_FOUND, ""),
            SyncError::NotFound(_)
        ));
        assert!(matches!(
            SyncError::from_status(reqwest::StatusCode::BAD_REQUEST, ""),
            SyncError::Validation { .. }
        ));
        assert!(matches!(
            SyncError::from_status(reqwest::StatusCode::TOO_MANY_REQUESTS, ""),
            SyncError::Transient(_)
        ));
        assert!(matches!(
            SyncError::from_status(reqwest::StatusCode::INTERNAL_SERVER_ERROR, ""),
            SyncError::Transient(_)
        ));
    }

    #[test]
    fn test_terminal_partition() {
        assert!(SyncError::Authentication("bad token".into()).is_terminal());
        assert!(SyncError::NotFound("PROJ-1".into()).is_terminal());
        assert!(SyncError::Configuration("missing mapping".into()).is_terminal());
        assert!(!SyncError::Transient("502".into()).is_terminal());
    }
}
