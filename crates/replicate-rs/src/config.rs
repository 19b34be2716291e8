//! Client configuration with environment-variable overrides.
//!
//! # Examples
//!
//! Everything from the environment:
//!
//! ```no_run
//! let config = replicate_rs::ClientConfig::from_env();
//! ```
//!
//! Customized with builder methods:
//!
//! ```
//! use std::time::Duration;
//! use replicate_rs::{ClientConfig, RetryConfig};
//!
//! let config = ClientConfig::default()
//!     .with_api_token("r8_example")
//!     .with_poll_interval(Duration::from_millis(250))
//!     .with_retry(RetryConfig::with_attempts(3));
//! assert_eq!(config.retry.max_attempts, 3);
//! ```

use std::time::Duration;

use crate::api::retry::RetryConfig;
use crate::{DEFAULT_BASE_URL, USER_AGENT};

pub const API_TOKEN_ENV: &str = "REPLICATE_API_TOKEN";
pub const BASE_URL_ENV: &str = "REPLICATE_BASE_URL";
pub const POLL_INTERVAL_ENV: &str = "REPLICATE_POLL_INTERVAL";

/// Settings shared by every request a client makes.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Bearer credential. A missing token fails the first request, not construction.
    pub api_token: Option<String>,
    /// API root. Default: `https://api.replicate.com`.
    pub base_url: String,
    /// Per-request timeout. Default: 30 s.
    pub timeout: Duration,
    /// First delay between polls in `wait` and output iteration. Default: 500 ms.
    pub poll_interval: Duration,
    /// Ceiling for the growing poll delay. Default: 5 s.
    pub max_poll_interval: Duration,
    pub user_agent: String,
    pub retry: RetryConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_token: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
            max_poll_interval: Duration::from_secs(5),
            user_agent: USER_AGENT.to_string(),
            retry: RetryConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `REPLICATE_API_TOKEN`, `REPLICATE_BASE_URL` and
    /// `REPLICATE_POLL_INTERVAL` (seconds). Empty or unparseable values are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(token) = lookup(API_TOKEN_ENV).filter(|t| !t.is_empty()) {
            config.api_token = Some(token);
        }
        if let Some(url) = lookup(BASE_URL_ENV).filter(|u| !u.is_empty()) {
            config.base_url = url;
        }
        if let Some(secs) = lookup(POLL_INTERVAL_ENV)
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|s| s.is_finite() && *s >= 0.0)
        {
            config.poll_interval = Duration::from_secs_f64(secs);
            config.max_poll_interval = config.max_poll_interval.max(config.poll_interval);
        }
        config
    }

    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the first poll delay; the ceiling is raised to match if needed.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self.max_poll_interval = self.max_poll_interval.max(interval);
        self
    }

    pub fn with_max_poll_interval(mut self, interval: Duration) -> Self {
        self.max_poll_interval = interval.max(self.poll_interval);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}
