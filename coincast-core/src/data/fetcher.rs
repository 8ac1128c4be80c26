//! Rate-limited fetcher for the upstream market-data API.
//!
//! Retries are an explicit bounded loop:
//! - 429 (or a rate-limit payload): wait the current backoff, retry the same
//!   request, up to `max_rate_limit_retries`.
//! - 5xx / transport failure: wait `server_retry_delay`, retry, up to
//!   `max_server_retries`.
//! - 2xx that is not JSON: `Malformed`, no retry.
//! - Any other status: surfaced immediately.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::NaiveDateTime;
use serde_json::Value;
use thiserror::Error;

use super::rate_limit::{RateLimitPolicy, RateLimitState, Sleeper};
use super::transport::{HttpResponse, HttpTransport};

/// Category of an upstream failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamErrorKind {
    RateLimited,
    ServerError,
    Network,
    Malformed,
}

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("rate limited on {endpoint} (gave up after {retries} retries)")]
    RateLimited { endpoint: String, retries: u32 },

    #[error("server error on {endpoint}{}: {detail}", http_status_suffix(.status))]
    ServerError {
        endpoint: String,
        status: Option<u16>,
        detail: String,
    },

    #[error("network failure on {endpoint}: {detail}")]
    Network { endpoint: String, detail: String },

    #[error("malformed response from {endpoint}: {detail}")]
    Malformed { endpoint: String, detail: String },
}

impl UpstreamError {
    pub fn kind(&self) -> UpstreamErrorKind {
        match self {
            UpstreamError::RateLimited { .. } => UpstreamErrorKind::RateLimited,
            UpstreamError::ServerError { .. } => UpstreamErrorKind::ServerError,
            UpstreamError::Network { .. } => UpstreamErrorKind::Network,
            UpstreamError::Malformed { .. } => UpstreamErrorKind::Malformed,
        }
    }

    /// True when the retry ceiling was exhausted: the upstream is unusable
    /// for now and the current stage should stop instead of skipping ahead.
    pub fn is_retry_exhaustion(&self) -> bool {
        match self {
            UpstreamError::RateLimited { .. } | UpstreamError::Network { .. } => true,
            UpstreamError::ServerError { status, .. } => status.map_or(true, |s| s >= 500),
            UpstreamError::Malformed { .. } => false,
        }
    }

    pub fn malformed(endpoint: &str, detail: impl Into<String>) -> Self {
        UpstreamError::Malformed {
            endpoint: endpoint.to_string(),
            detail: detail.into(),
        }
    }
}

/// Wraps an [`HttpTransport`] with backoff, bounded retries and a call counter.
pub struct RateLimitedFetcher {
    transport: Arc<dyn HttpTransport>,
    sleeper: Arc<dyn Sleeper>,
    base_url: String,
    policy: RateLimitPolicy,
    state: Mutex<RateLimitState>,
}

impl RateLimitedFetcher {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        sleeper: Arc<dyn Sleeper>,
        base_url: impl Into<String>,
        policy: RateLimitPolicy,
    ) -> Self {
        let state = Mutex::new(RateLimitState::new(&policy));
        Self {
            transport,
            sleeper,
            base_url: base_url.into(),
            policy,
            state,
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Total calls issued so far, retries included.
    pub fn call_count(&self) -> u64 {
        self.state().call_count
    }

    pub fn last_call_at(&self) -> Option<NaiveDateTime> {
        self.state().last_call_at
    }

    /// Snapshot of the current backoff state.
    pub fn rate_limit_state(&self) -> RateLimitState {
        self.state().clone()
    }

    fn state(&self) -> MutexGuard<'_, RateLimitState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }

    /// GET `endpoint` with `params` and parse the body as JSON.
    pub fn fetch(&self, endpoint: &str, params: &[(&str, String)]) -> Result<Value, UpstreamError> {
        let url = self.url(endpoint);
        let query: Vec<(String, String)> = params
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();

        let mut rate_limit_retries = 0u32;
        let mut server_retries = 0u32;

        loop {
            let throttle = self.state().throttle_delay(&self.policy);
            self.sleeper.sleep(throttle);
            self.state().record_call();

            tracing::debug!(endpoint, attempt = rate_limit_retries + server_retries, "upstream call");

            match self.transport.get(&url, &query) {
                Ok(resp) if is_rate_limited(&resp) => {
                    if rate_limit_retries >= self.policy.max_rate_limit_retries {
                        return Err(UpstreamError::RateLimited {
                            endpoint: endpoint.to_string(),
                            retries: rate_limit_retries,
                        });
                    }
                    let backoff = self.state().on_rate_limited(&self.policy);
                    let wait = match resp.retry_after_secs {
                        Some(secs) => backoff
                            .max(std::time::Duration::from_secs(secs))
                            .min(self.policy.max_backoff),
                        None => backoff,
                    };
                    tracing::warn!(endpoint, wait_secs = wait.as_secs(), "rate limited, backing off");
                    self.sleeper.sleep(wait);
                    rate_limit_retries += 1;
                }
                Ok(resp) if resp.status >= 500 => {
                    if server_retries >= self.policy.max_server_retries {
                        return Err(UpstreamError::ServerError {
                            endpoint: endpoint.to_string(),
                            status: Some(resp.status),
                            detail: format!("gave up after {server_retries} retries"),
                        });
                    }
                    tracing::warn!(endpoint, status = resp.status, "server error, retrying");
                    self.sleeper.sleep(self.policy.server_retry_delay);
                    server_retries += 1;
                }
                Ok(resp) if (200..300).contains(&resp.status) => {
                    self.state().on_success(&self.policy);
                    return serde_json::from_str(&resp.body)
                        .map_err(|e| UpstreamError::malformed(endpoint, format!("invalid JSON: {e}")));
                }
                Ok(resp) => {
                    return Err(UpstreamError::ServerError {
                        endpoint: endpoint.to_string(),
                        status: Some(resp.status),
                        detail: truncate(&resp.body, 200),
                    });
                }
                Err(detail) => {
                    if server_retries >= self.policy.max_server_retries {
                        return Err(UpstreamError::Network {
                            endpoint: endpoint.to_string(),
                            detail,
                        });
                    }
                    tracing::warn!(endpoint, %detail, "network failure, retrying");
                    self.sleeper.sleep(self.policy.server_retry_delay);
                    server_retries += 1;
                }
            }
        }
    }
}

fn http_status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

/// HTTP 429, or a 2xx whose payload carries `{"status": {"error_code": 429}}`.
fn is_rate_limited(resp: &HttpResponse) -> bool {
    if resp.status == 429 {
        return true;
    }
    if !resp.body.contains("error_code") {
        return false;
    }
    serde_json::from_str::<Value>(&resp.body)
        .ok()
        .and_then(|v| v.pointer("/status/error_code").and_then(Value::as_u64))
        == Some(429)
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
