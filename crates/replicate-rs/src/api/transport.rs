//! The "perform one HTTP exchange" seam, in blocking and async flavors.
//!
//! [`RetryTransport`] decorates either flavor with the policy from
//! [`super::retry`]. Both implementations run the same [`RetryConfig::plan`];
//! the blocking one sleeps the calling thread, the async one yields to the
//! runtime.

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use tracing::{debug, warn};

use super::retry::{Outcome, RetryConfig};
use crate::error::Result;

/// Boxed future returned by [`AsyncTransport::send`], so the trait stays
/// dyn-compatible.
pub type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = reqwest::Result<reqwest::Response>> + Send + 'a>>;

/// Sends one request on the calling thread.
pub trait Transport: Send + Sync {
    fn send(&self, request: reqwest::blocking::Request) -> reqwest::Result<reqwest::blocking::Response>;
}

/// Sends one request without blocking the calling task.
pub trait AsyncTransport: Send + Sync {
    fn send(&self, request: reqwest::Request) -> TransportFuture<'_>;
}

impl Transport for reqwest::blocking::Client {
    fn send(&self, request: reqwest::blocking::Request) -> reqwest::Result<reqwest::blocking::Response> {
        self.execute(request)
    }
}

impl AsyncTransport for reqwest::Client {
    fn send(&self, request: reqwest::Request) -> TransportFuture<'_> {
        Box::pin(self.execute(request))
    }
}

/// Retries transient failures of the wrapped transport.
///
/// The configuration is immutable after construction and shared by every
/// request; attempt counting is per request.
#[derive(Debug, Clone)]
pub struct RetryTransport<T> {
    inner: T,
    config: RetryConfig,
}

impl<T> RetryTransport<T> {
    pub fn new(inner: T, config: RetryConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { inner, config })
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

/// Status line and headers of a response, whichever flavor it is.
trait ResponseHead {
    fn head(&self) -> (StatusCode, &HeaderMap);
}

impl ResponseHead for reqwest::Response {
    fn head(&self) -> (StatusCode, &HeaderMap) {
        (self.status(), self.headers())
    }
}

impl ResponseHead for reqwest::blocking::Response {
    fn head(&self) -> (StatusCode, &HeaderMap) {
        (self.status(), self.headers())
    }
}

impl<T> RetryTransport<T> {
    /// The retry decision shared by both flavors.
    fn next_delay<R: ResponseHead>(
        &self,
        method: &Method,
        url: &str,
        attempt: u32,
        result: &reqwest::Result<R>,
    ) -> Option<Duration> {
        let outcome = match result {
            Ok(resp) => {
                let (status, headers) = resp.head();
                Outcome::Response { status, headers }
            }
            Err(e) => Outcome::from_error(e),
        };
        let delay = self.config.plan(method, attempt, outcome)?;
        let max = self.config.max_attempts;
        match outcome {
            Outcome::Response { status, .. } => warn!(
                "{method} {url} returned HTTP {status} (attempt {attempt}/{max}). Retrying in {delay:?}..."
            ),
            Outcome::Failure { .. } => warn!(
                "{method} {url} failed to connect (attempt {attempt}/{max}). Retrying in {delay:?}..."
            ),
        }
        Some(delay)
    }
}

impl<T: Transport> Transport for RetryTransport<T> {
    fn send(&self, request: reqwest::blocking::Request) -> reqwest::Result<reqwest::blocking::Response> {
        let method = request.method().clone();
        let url = request.url().to_string();
        let mut request = request;
        let mut attempt = 1;
        loop {
            // A body that cannot be cloned is a single-use stream: send once.
            let spare = request.try_clone();
            let start = Instant::now();
            let result = self.inner.send(request);
            debug!("{method} {url} attempt {attempt} finished in {:?}", start.elapsed());
            let Some(next) = spare else {
                return result;
            };
            let Some(delay) = self.next_delay(&method, &url, attempt, &result) else {
                return result;
            };
            // Release the connection before sleeping.
            drop(result);
            std::thread::sleep(delay);
            request = next;
            attempt += 1;
        }
    }
}

impl<T: AsyncTransport> AsyncTransport for RetryTransport<T> {
    fn send(&self, request: reqwest::Request) -> TransportFuture<'_> {
        Box::pin(async move {
            let method = request.method().clone();
            let url = request.url().to_string();
            let mut request = request;
            let mut attempt = 1;
            loop {
                let spare = request.try_clone();
                let start = Instant::now();
                let result = self.inner.send(request).await;
                debug!("{method} {url} attempt {attempt} finished in {:?}", start.elapsed());
                let Some(next) = spare else {
                    return result;
                };
                let Some(delay) = self.next_delay(&method, &url, attempt, &result) else {
                    return result;
                };
                drop(result);
                tokio::time::sleep(delay).await;
                request = next;
                attempt += 1;
            }
        })
    }
}
