//! Privileged request executor.
//!
//! One [`Executor::fetch`] call walks a single request through
//! validate → rate-check → rule-install → timed fetch with retry → normalize.
//! Every attempt installs its own CORS rule and removes it when the attempt
//! settles, so no rule outlives the request that needed it.
//!
//! The config is re-read on every attempt: a settings change while a request
//! is retrying affects that request's later timeouts and backoff.

mod body;
mod error;
mod guard;
mod policy;
mod state;

pub use error::FetchError;
pub use policy::{RetryDecision, RetryPolicy};
pub use state::FetchState;

use std::sync::Arc;
use std::time::Duration;

use crate::config::{ConfigStore, RelayConfig};
use crate::header_rules::{HeaderRuleManager, HeaderRules};
use crate::http::{HttpClient, HttpRequest, HttpResponse, TransportError};
use crate::protocol::{Method, RequestEnvelope, ResponsePayload};
use crate::rate_limit::RateLimiter;

use guard::RuleGuard;
use state::StateTracker;

/// Accept only absolute http/https URLs; returns the serialized origin.
pub fn validate_url(raw: &str) -> Result<String, FetchError> {
    let parsed = url::Url::parse(raw).map_err(|_| FetchError::InvalidUrl(raw.to_string()))?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => {
            Ok(parsed.origin().ascii_serialization())
        }
        _ => Err(FetchError::InvalidUrl(raw.to_string())),
    }
}

fn validate_method(raw: &str, cfg: &RelayConfig) -> Result<Method, FetchError> {
    raw.parse::<Method>()
        .ok()
        .filter(|m| cfg.allows(*m))
        .ok_or_else(|| FetchError::MethodNotAllowed(raw.to_string()))
}

pub struct Executor<C> {
    config: Arc<ConfigStore>,
    limiter: Arc<RateLimiter>,
    rules: Arc<dyn HeaderRuleManager>,
    client: C,
}

impl<C: HttpClient> Executor<C> {
    pub fn new(
        config: Arc<ConfigStore>,
        limiter: Arc<RateLimiter>,
        rules: Arc<dyn HeaderRuleManager>,
        client: C,
    ) -> Self {
        Self {
            config,
            limiter,
            rules,
            client,
        }
    }

    /// Executor with its own fresh rate limiter and in-process rule table.
    pub fn with_defaults(config: Arc<ConfigStore>, client: C) -> Self {
        Self::new(
            config,
            Arc::new(RateLimiter::new()),
            Arc::new(HeaderRules::new()),
            client,
        )
    }

    pub fn config(&self) -> &Arc<ConfigStore> {
        &self.config
    }

    /// Run one request to completion.
    pub async fn fetch(&self, req: &RequestEnvelope) -> Result<ResponsePayload, FetchError> {
        let mut tracker = StateTracker::new(&req.request_id);
        let result = self.run(req, &mut tracker).await;
        tracker.enter(FetchState::Completed {
            success: result.is_ok(),
        });
        match &result {
            Ok(res) => {
                tracing::debug!(request_id = %req.request_id, status = res.status, "fetch completed")
            }
            Err(e) => {
                tracing::warn!(request_id = %req.request_id, url = %req.url, "fetch failed: {}", e)
            }
        }
        result
    }

    async fn run(
        &self,
        req: &RequestEnvelope,
        tracker: &mut StateTracker<'_>,
    ) -> Result<ResponsePayload, FetchError> {
        let origin = validate_url(&req.url)?;
        let cfg = self.config.get();
        let method = validate_method(&req.method, &cfg)?;

        tracker.enter(FetchState::RateChecking);
        if !self.limiter.check(&origin, &cfg.rate_limit) {
            return Err(FetchError::RateLimited(origin));
        }

        let request = HttpRequest {
            url: req.url.clone(),
            method,
            headers: req
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            body: body::encode_request_body(method, &req.headers, &req.data),
        };
        let response = self
            .fetch_with_retry(&request, &origin, req.timeout, tracker)
            .await?;
        Ok(body::normalize_response(response))
    }

    async fn fetch_with_retry(
        &self,
        request: &HttpRequest,
        origin: &str,
        requested_timeout_ms: u64,
        tracker: &mut StateTracker<'_>,
    ) -> Result<HttpResponse, FetchError> {
        let mut retry_count = 0u32;
        tracker.enter(FetchState::RuleInstalling);
        loop {
            let cfg = self.config.get();
            let timeout_ms = match requested_timeout_ms {
                0 => cfg.timeout_ms,
                requested => cfg.timeout_ms.min(requested),
            };
            let timeout = Duration::from_millis(timeout_ms);

            let outcome = {
                let _rule = RuleGuard::install(self.rules.as_ref(), origin);
                tracker.enter(FetchState::Fetching {
                    attempt: retry_count,
                });
                let call = self.client.execute(request.clone(), timeout);
                match tokio::time::timeout(timeout, call).await {
                    Ok(Ok(mut response)) => {
                        self.rules.apply(origin, &mut response.headers);
                        Ok(response)
                    }
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(TransportError::timeout(format!(
                        "no response within {timeout_ms} ms"
                    ))),
                }
            };

            let err = match outcome {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };

            let policy = RetryPolicy::from_config(&self.config.get());
            match policy.decide(retry_count, err.kind) {
                RetryDecision::NoRetry => return Err(FetchError::from_transport(err, timeout_ms)),
                RetryDecision::RetryAfter(delay) => {
                    tracker.enter(FetchState::Retrying {
                        attempt: retry_count + 1,
                        delay,
                    });
                    tracing::warn!(
                        url = %request.url,
                        retry = retry_count + 1,
                        max_retries = policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "retrying after: {}",
                        err
                    );
                    tokio::time::sleep(delay).await;
                    retry_count += 1;
                }
            }
        }
    }
}
