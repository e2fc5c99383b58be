use shared::error::{ErrorBody, ErrorKind};
use thiserror::Error;

/// Classified failure of a client operation.
///
/// Every network, decode and validation failure is converted into one of
/// these at the call site; nothing else escapes to callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("{0}")]
    Validation(String),
    #[error("authentication required: {0}")]
    Unauthorized(String),
    #[error("access denied: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("network problem, try again: {0}")]
    Transient(String),
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },
}

impl ClientError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn malformed(path: &str, detail: impl std::fmt::Display) -> Self {
        Self::Transient(format!("malformed response from {path}: {detail}"))
    }

    /// Builds the error for a non-2xx response.
    pub fn from_status(status: u16, body: Option<ErrorBody>) -> Self {
        let message = body
            .unwrap_or_default()
            .describe(&format!("HTTP {status}"));
        match ErrorKind::from_status(status) {
            Some(ErrorKind::Unauthorized) => Self::Unauthorized(message),
            Some(ErrorKind::Forbidden) => Self::Forbidden(message),
            Some(ErrorKind::NotFound) => Self::NotFound(message),
            Some(ErrorKind::Rejected) => Self::Rejected(message),
            Some(ErrorKind::Server) => Self::Server { status, message },
            _ => Self::Transient(format!("unexpected status {status}: {message}")),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Rejected(_) => ErrorKind::Rejected,
            Self::Transient(_) => ErrorKind::Transient,
            Self::Server { .. } => ErrorKind::Server,
        }
    }

    pub fn requires_reauth(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Server { .. })
    }

    /// No response reached us, so the remote side effect may or may not have
    /// happened.
    pub fn is_outcome_unknown(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Transient(format!("request timed out: {err}"))
        } else if err.is_decode() {
            Self::Transient(format!("malformed response: {err}"))
        } else if let Some(status) = err.status() {
            Self::from_status(status.as_u16(), None)
        } else {
            Self::Transient(err.to_string())
        }
    }
}
