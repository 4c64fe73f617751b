use std::time::Duration;

use crate::config::RelayConfig;
use crate::http::TransportErrorKind;

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Do not retry this error.
    NoRetry,
    /// Retry after the given delay.
    RetryAfter(Duration),
}

/// Linear backoff: the n-th retry (0-based) waits `retry_delay * (n + 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RelayConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(cfg: &RelayConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            retry_delay: cfg.retry_delay(),
        }
    }

    /// `retry_count` is the number of retries already performed (0 after the
    /// first attempt fails).
    pub fn decide(&self, retry_count: u32, kind: TransportErrorKind) -> RetryDecision {
        if retry_count >= self.max_retries {
            return RetryDecision::NoRetry;
        }

        match kind {
            TransportErrorKind::Other => RetryDecision::NoRetry,
            TransportErrorKind::Timeout | TransportErrorKind::Network => {
                RetryDecision::RetryAfter(self.retry_delay.saturating_mul(retry_count + 1))
            }
        }
    }
}
