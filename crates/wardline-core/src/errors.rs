use std::time::Duration;

use thiserror::Error;

/// Relay-level error taxonomy.
///
/// Every failure a session can observe is one of these; the relay renders
/// them to clients via [`RelayError::client_message`] so raw backend
/// internals never reach the wire.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RelayError {
    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("stream timed out after {0:?}")]
    StreamTimeout(Duration),

    #[error("stream failed: {reason}")]
    StreamError { partial: String, reason: String },

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("invalid arguments for {action}: missing {missing:?}, invalid {invalid:?}")]
    InvalidArguments {
        action: String,
        /// Required keys that were absent or blank.
        missing: Vec<String>,
        /// Keys that were supplied but carry an unusable value.
        invalid: Vec<String>,
    },

    #[error("persistence failure: {0}")]
    PersistenceError(String),

    #[error("generation cancelled")]
    Cancelled,
}

impl RelayError {
    /// Sanitized text for the `[ERROR] …` fragment shown to clients.
    pub fn client_message(&self) -> String {
        match self {
            Self::UnknownSession(_) => "session not found".to_string(),
            Self::BackendUnavailable(_) => {
                "the assistant is unavailable right now, please try again".to_string()
            }
            Self::StreamTimeout(_) => "the assistant took too long to respond".to_string(),
            Self::StreamError { .. } => "the response was interrupted".to_string(),
            Self::UnknownAction(name) => format!("unsupported action: {name}"),
            Self::InvalidArguments { action, missing, invalid } => {
                let mut parts = Vec::new();
                if !missing.is_empty() {
                    parts.push(format!("missing required fields: {}", missing.join(", ")));
                }
                if !invalid.is_empty() {
                    parts.push(format!("invalid values for: {}", invalid.join(", ")));
                }
                format!("{action}: {}", parts.join("; "))
            }
            Self::PersistenceError(_) => "the request could not be saved".to_string(),
            Self::Cancelled => "the response was cancelled".to_string(),
        }
    }

    /// Classification string for structured log fields.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::UnknownSession(_) => "unknown_session",
            Self::BackendUnavailable(_) => "backend_unavailable",
            Self::StreamTimeout(_) => "stream_timeout",
            Self::StreamError { .. } => "stream_error",
            Self::UnknownAction(_) => "unknown_action",
            Self::InvalidArguments { .. } => "invalid_arguments",
            Self::PersistenceError(_) => "persistence_error",
            Self::Cancelled => "cancelled",
        }
    }

    /// True when the client may retry the same message immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable(_) | Self::StreamTimeout(_) | Self::StreamError { .. }
        )
    }
}
