//! Backoff and throttle state for the upstream API.
//!
//! On HTTP 429 the fetcher waits `backoff`, which starts at 60s, doubles on
//! each consecutive rate-limit signal up to 300s, and resets after a success.
//! The state is an explicit value owned by one fetcher, so independent
//! fetchers (and tests) never share a hidden counter.

use chrono::NaiveDateTime;
use std::time::Duration;

/// Tunables for the fetcher's retry behaviour.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Consecutive rate-limit retries for one request before giving up.
    pub max_rate_limit_retries: u32,
    /// Fixed wait after a 5xx or transport failure.
    pub server_retry_delay: Duration,
    /// Retries after a 5xx or transport failure before giving up.
    pub max_server_retries: u32,
    /// Minimum spacing between two calls; zero disables the throttle.
    pub min_call_interval: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(60),
            max_backoff: Duration::from_secs(300),
            max_rate_limit_retries: 5,
            server_retry_delay: Duration::from_secs(2),
            max_server_retries: 3,
            min_call_interval: Duration::ZERO,
        }
    }
}

/// Mutable rate-limit state of one fetcher.
#[derive(Debug, Clone)]
pub struct RateLimitState {
    pub backoff: Duration,
    pub consecutive_rate_limits: u32,
    /// Total calls issued, including retries. Never decreases.
    pub call_count: u64,
    /// Wall-clock time of the last call (local, timezone-naive).
    pub last_call_at: Option<NaiveDateTime>,
    /// Monotonic time of the last call, for the inter-call throttle.
    pub last_call_instant: Option<std::time::Instant>,
}

impl RateLimitState {
    pub fn new(policy: &RateLimitPolicy) -> Self {
        Self {
            backoff: policy.initial_backoff,
            consecutive_rate_limits: 0,
            call_count: 0,
            last_call_at: None,
            last_call_instant: None,
        }
    }

    /// Register a rate-limit signal and return how long to wait before retrying.
    pub fn on_rate_limited(&mut self, policy: &RateLimitPolicy) -> Duration {
        let wait = self.backoff.min(policy.max_backoff);
        self.consecutive_rate_limits += 1;
        self.backoff = (self.backoff * 2).min(policy.max_backoff);
        wait
    }

    /// A successful call resets the backoff.
    pub fn on_success(&mut self, policy: &RateLimitPolicy) {
        self.backoff = policy.initial_backoff;
        self.consecutive_rate_limits = 0;
    }

    pub fn record_call(&mut self) {
        self.call_count += 1;
        self.last_call_at = Some(chrono::Local::now().naive_local());
        self.last_call_instant = Some(std::time::Instant::now());
    }

    /// Time still to wait before the next call honours `min_call_interval`.
    pub fn throttle_delay(&self, policy: &RateLimitPolicy) -> Duration {
        match self.last_call_instant {
            Some(last) if !policy.min_call_interval.is_zero() => {
                policy.min_call_interval.saturating_sub(last.elapsed())
            }
            _ => Duration::ZERO,
        }
    }
}

/// Where backoff sleeps go. Tests record instead of sleeping.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Sleeps the current thread.
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}
