use crate::config::ConfigError;

/// Error type used across the client.
///
/// Wire-level oddities (non-JSON payloads, frames without a content field,
/// terminal events after close) are not errors and never reach this type.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Timed out after {secs}s waiting for the service")]
    Timeout { secs: u64 },
    #[error("Upstream error: status={status}, message={message}")]
    Upstream { status: u16, message: String },
    #[error("Service reported an error: {0}")]
    Service(String),
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("A stream is already in flight for conversation {session_id}")]
    StreamInFlight { session_id: String },
    #[error("Message {id} is closed")]
    MessageClosed { id: String },
    #[error("Identity store error: {0}")]
    Identity(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Broad error category, used to pick the user-facing wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Connection,
    RateLimit,
    ServerError,
    Rejected,
    Unknown,
}

/// Map an upstream HTTP status code to an error category.
#[must_use]
pub fn category_from_upstream_status(status: u16) -> ErrorCategory {
    match status {
        429 => ErrorCategory::RateLimit,
        400..=499 => ErrorCategory::Rejected,
        500..=599 => ErrorCategory::ServerError,
        _ => ErrorCategory::Unknown,
    }
}

impl ClientError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            ClientError::Transport(_) | ClientError::Timeout { .. } => ErrorCategory::Connection,
            ClientError::Upstream { status, .. } => category_from_upstream_status(*status),
            ClientError::Service(_) => ErrorCategory::ServerError,
            ClientError::StreamInFlight { .. } | ClientError::MessageClosed { .. } => {
                ErrorCategory::Rejected
            }
            ClientError::Config(_)
            | ClientError::Decode(_)
            | ClientError::Identity(_)
            | ClientError::Internal(_) => ErrorCategory::Unknown,
        }
    }

    /// Short diagnostic string suitable for showing in place of a failed reply.
    #[must_use]
    pub fn diagnostic(&self) -> String {
        match self {
            ClientError::Transport(message) => format!("Connection failed: {message}"),
            ClientError::Upstream { status, message } => {
                let label = match self.category() {
                    ErrorCategory::RateLimit => "Rate limited",
                    ErrorCategory::Rejected => "Request rejected",
                    ErrorCategory::ServerError => "Service error",
                    _ => "Unexpected response",
                };
                if message.is_empty() {
                    format!("{label} (HTTP {status})")
                } else {
                    format!("{label} (HTTP {status}): {message}")
                }
            }
            ClientError::Service(message) => message.clone(),
            other => other.to_string(),
        }
    }

    pub(crate) fn transport(err: impl std::fmt::Display) -> Self {
        ClientError::Transport(err.to_string())
    }
}
