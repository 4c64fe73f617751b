//! Network call used by the executor.
//!
//! [`HttpClient`] is the seam between the executor's retry/timeout logic and
//! the actual transfer. [`CurlClient`] is the production implementation
//! (libcurl easy handle on the blocking pool).

mod classify;
mod cookies;
mod curl_client;
mod parse;

pub use cookies::CookieJar;
pub use curl_client::CurlClient;
pub use classify::classify_curl_error;

use std::fmt;
use std::future::Future;
use std::time::Duration;

use crate::protocol::{FilePart, Method};

/// Body of an outgoing request, already encoded.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Bytes(Vec<u8>),
    Multipart(Vec<FilePart>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

/// Raw response of the final hop (after redirects).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub status_text: String,
    /// Header lines in arrival order; names lower-cased.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// Retry-relevant class of a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Attempt exceeded its timeout.
    Timeout,
    /// Connection-level failure (DNS, refused, reset, empty reply, ...).
    Network,
    /// Anything else; not retried.
    Other,
}

/// Failure of one network attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
    /// Extra diagnostic detail from the transport, if any.
    pub trace: Option<String>,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            trace: None,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Timeout, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Network, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Other, message)
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for TransportError {}

/// Performs a single HTTP exchange with credentials (cookies) included.
///
/// `timeout` bounds the whole exchange; the executor additionally enforces it
/// with its own timer, so implementations may treat it as advisory.
pub trait HttpClient: Send + Sync + 'static {
    fn execute(
        &self,
        request: HttpRequest,
        timeout: Duration,
    ) -> impl Future<Output = Result<HttpResponse, TransportError>> + Send;
}
