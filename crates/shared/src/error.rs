use serde::{Deserialize, Serialize};

/// Failure taxonomy shared by every remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Caught locally before any request was sent.
    Validation,
    Unauthorized,
    Forbidden,
    NotFound,
    /// The service understood the request and refused it (4xx business rule).
    Rejected,
    /// No usable response: connection failure, timeout, malformed body.
    Transient,
    Server,
}

impl ErrorKind {
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            401 => Some(Self::Unauthorized),
            403 => Some(Self::Forbidden),
            404 => Some(Self::NotFound),
            400..=499 => Some(Self::Rejected),
            500..=599 => Some(Self::Server),
            _ => None,
        }
    }
}

/// Error body returned by the booking backend on non-2xx responses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error: None,
        }
    }

    /// Human readable summary, falling back to `fallback` for empty bodies.
    pub fn describe(&self, fallback: &str) -> String {
        match (self.message.trim(), self.error.as_deref()) {
            ("", None) => fallback.to_string(),
            ("", Some(detail)) => detail.to_string(),
            (message, _) => message.to_string(),
        }
    }
}
