//! Automatic retry with exponential backoff and jitter.
//!
//! Retries idempotent requests that hit a transient failure (connection
//! error, timeout, 429, most 5xx) with configurable exponential backoff.
//! Never retries other 4xx responses. A `Retry-After` header overrides the
//! computed delay.
//!
//! The decision logic here is shared by the blocking and async transports in
//! [`super::transport`]; only the way they sleep differs.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Method, StatusCode};

use crate::error::{Error, Result};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total number of attempts per request, including the first.
    pub max_attempts: u32,
    /// Upper bound on any single delay, including `Retry-After` values.
    pub max_backoff_wait: Duration,
    /// Delay before the second attempt; doubles for each later attempt.
    pub backoff_factor: Duration,
    /// Uniform jitter applied as `± jitter_ratio * delay`. Must be in `[0, 0.5]`.
    pub jitter_ratio: f64,
    /// Methods that are safe to send more than once.
    pub retryable_methods: HashSet<Method>,
    /// Status codes treated as transient.
    pub retryable_status_codes: HashSet<StatusCode>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            max_backoff_wait: Duration::from_secs(60),
            backoff_factor: Duration::from_millis(100),
            jitter_ratio: 0.1,
            retryable_methods: [
                Method::GET,
                Method::HEAD,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
                Method::TRACE,
            ]
            .into_iter()
            .collect(),
            retryable_status_codes: [
                StatusCode::TOO_MANY_REQUESTS,
                StatusCode::INTERNAL_SERVER_ERROR,
                StatusCode::BAD_GATEWAY,
                StatusCode::SERVICE_UNAVAILABLE,
                StatusCode::GATEWAY_TIMEOUT,
            ]
            .into_iter()
            .collect(),
        }
    }
}

/// What came back from one attempt, reduced to what the policy looks at.
#[derive(Debug, Clone, Copy)]
pub enum Outcome<'a> {
    Response {
        status: StatusCode,
        headers: &'a HeaderMap,
    },
    /// `transient` is true for connection errors and timeouts.
    Failure { transient: bool },
}

impl Outcome<'_> {
    pub(crate) fn from_error(error: &reqwest::Error) -> Self {
        Outcome::Failure {
            transient: error.is_connect() || error.is_timeout(),
        }
    }
}

impl RetryConfig {
    /// Create a config allowing the given number of attempts. Uses sensible defaults.
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// A config that sends every request exactly once.
    pub fn disabled() -> Self {
        Self::with_attempts(1)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=0.5).contains(&self.jitter_ratio) {
            return Err(Error::config(format!(
                "jitter ratio should be between 0 and 0.5, actual {}",
                self.jitter_ratio
            )));
        }
        if self.max_attempts == 0 {
            return Err(Error::config("max_attempts must be at least 1"));
        }
        Ok(())
    }

    /// Delay before attempt `attempts_made + 1`, before jitter.
    pub fn backoff(&self, attempts_made: u32) -> Duration {
        let exponent = attempts_made.saturating_sub(1).min(62) as i32;
        let base = self.backoff_factor.as_secs_f64() * 2f64.powi(exponent);
        Duration::from_secs_f64(base.min(self.max_backoff_wait.as_secs_f64()))
    }

    /// Backoff with uniform `± jitter_ratio` perturbation, never above the max wait.
    pub fn delay_for_attempt(&self, attempts_made: u32) -> Duration {
        let base = self.backoff(attempts_made).as_secs_f64();
        let spread = base * self.jitter_ratio;
        let jitter = if spread > 0.0 {
            rand::thread_rng().gen_range(-spread..=spread)
        } else {
            0.0
        };
        let total = (base + jitter).clamp(0.0, self.max_backoff_wait.as_secs_f64());
        Duration::from_secs_f64(total)
    }

    /// Delay requested by a `Retry-After` header, clamped to the max wait.
    ///
    /// Accepts delta-seconds, an HTTP-date, or an RFC 3339 timestamp. Dates in
    /// the past and unparseable values are ignored.
    pub fn retry_after(&self, headers: &HeaderMap) -> Option<Duration> {
        let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
        if value.is_empty() {
            return None;
        }
        let wait = if value.bytes().all(|b| b.is_ascii_digit()) {
            Duration::from_secs(value.parse().ok()?)
        } else {
            let at = DateTime::parse_from_rfc2822(value)
                .or_else(|_| DateTime::parse_from_rfc3339(value))
                .ok()?
                .with_timezone(&Utc);
            (at - Utc::now()).to_std().ok()?
        };
        Some(wait.min(self.max_backoff_wait))
    }

    /// Decide whether to send the request again after `attempts_made`
    /// attempts, and how long to wait first.
    pub fn plan(&self, method: &Method, attempts_made: u32, outcome: Outcome<'_>) -> Option<Duration> {
        if attempts_made >= self.max_attempts {
            return None;
        }
        let idempotent = self.retryable_methods.contains(method);
        match outcome {
            Outcome::Failure { transient } => {
                (transient && idempotent).then(|| self.delay_for_attempt(attempts_made))
            }
            Outcome::Response { status, headers } => {
                if !self.retryable_status_codes.contains(&status) {
                    return None;
                }
                let retry_after = self.retry_after(headers);
                // A 429 with Retry-After is an explicit instruction that the
                // request was not processed, so it holds for any method.
                let instructed = status == StatusCode::TOO_MANY_REQUESTS && retry_after.is_some();
                if !idempotent && !instructed {
                    return None;
                }
                Some(retry_after.unwrap_or_else(|| self.delay_for_attempt(attempts_made)))
            }
        }
    }
}
