//! Executor failure taxonomy and its wire form.

use crate::http::{TransportError, TransportErrorKind};
use crate::protocol::{ErrorKind, ErrorPayload};

/// Why a fetch did not produce a response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// URL did not parse or is not http/https. Never retried.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    /// Method is not in the configured allow-list. Never retried.
    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),
    /// Origin exceeded its admission window. Never retried.
    #[error("rate limit exceeded for {0}")]
    RateLimited(String),
    /// Every attempt (including retries) timed out.
    #[error("request timed out ({timeout_ms} ms)")]
    Timeout {
        timeout_ms: u64,
        trace: Option<String>,
    },
    /// Connection-level failure after retries were exhausted.
    #[error("network error: {message}")]
    Network {
        message: String,
        trace: Option<String>,
    },
    /// Any other failure, surfaced as-is.
    #[error("{message}")]
    Other {
        message: String,
        trace: Option<String>,
    },
}

impl FetchError {
    /// Final error for a transport failure that will not be retried.
    pub(crate) fn from_transport(err: TransportError, timeout_ms: u64) -> Self {
        match err.kind {
            TransportErrorKind::Timeout => FetchError::Timeout {
                timeout_ms,
                trace: err.trace.or(Some(err.message)),
            },
            TransportErrorKind::Network => FetchError::Network {
                message: err.message,
                trace: err.trace,
            },
            TransportErrorKind::Other => FetchError::Other {
                message: err.message,
                trace: err.trace,
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::Timeout { .. } => ErrorKind::Timeout,
            FetchError::Network { .. } => ErrorKind::Network,
            _ => ErrorKind::Other,
        }
    }

    /// Short error name reported as `name` on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            FetchError::InvalidUrl(_) => "InvalidUrl",
            FetchError::MethodNotAllowed(_) => "MethodNotAllowed",
            FetchError::RateLimited(_) => "RateLimited",
            FetchError::Timeout { .. } => "TimeoutError",
            FetchError::Network { .. } => "NetworkError",
            FetchError::Other { .. } => "Error",
        }
    }

    pub fn trace(&self) -> Option<&str> {
        match self {
            FetchError::Timeout { trace, .. }
            | FetchError::Network { trace, .. }
            | FetchError::Other { trace, .. } => trace.as_deref(),
            _ => None,
        }
    }

    pub fn to_payload(&self) -> ErrorPayload {
        let details = match self {
            FetchError::Timeout { timeout_ms, .. } => {
                Some(format!("request timed out ({timeout_ms} ms)"))
            }
            FetchError::Network { .. } => Some("network error".to_string()),
            _ => None,
        };
        ErrorPayload {
            error: true,
            message: self.to_string(),
            name: self.name().to_string(),
            kind: self.kind(),
            details,
            stack: self.trace().map(str::to_string),
        }
    }
}
