//! Error taxonomy for the client components.
//!
//! | Variant | Raised when | Retried |
//! |---------|-------------|---------|
//! | [`ClientError::Validation`] | empty input, missing credential, bad extension | never |
//! | [`ClientError::Transport`] | request failed, timed out, or returned non-success | only by the job poller |
//! | [`ClientError::Backend`] | the backend reported a job as `failed` | never (terminal) |
//! | [`ClientError::Malformed`] | a response did not match its schema | never |
//!
//! Configuration and the CLI use `anyhow` on top of this type.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("{0}")]
    Validation(String),
    #[error("{message}")]
    Transport {
        status: Option<u16>,
        message: String,
    },
    /// The backend reported that an analysis job failed.
    #[error("analysis failed: {0}")]
    Backend(String),
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ClientError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            status: None,
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }

    /// Machine-readable code, for structured logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Transport { .. } => "transport",
            Self::Backend(_) => "backend_failure",
            Self::Malformed(_) => "malformed_response",
        }
    }

    /// Whether a recurring operation may retry after this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(value: reqwest::Error) -> Self {
        // Bodies are parsed by serde_json, so a reqwest decode error is a
        // broken body stream.
        let message = if value.is_timeout() {
            format!("request timed out: {value}")
        } else {
            value.to_string()
        };
        Self::Transport {
            status: value.status().map(|s| s.as_u16()),
            message,
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(value: serde_json::Error) -> Self {
        Self::Malformed(value.to_string())
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
