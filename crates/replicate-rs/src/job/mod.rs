//! Lifecycle core shared by predictions and trainings.
//!
//! A job moves `starting → processing → {succeeded | failed | canceled}`.
//! The local handle is a cache of server state; [`absorb`] is the only way a
//! fresh server response is merged into it, and it keeps the observed status
//! monotonic: a terminal handle never changes again and a response that
//! reports an earlier state than the one already seen does not move the
//! status backwards.
//!
//! Polling delays come from [`PollSchedule`]; incremental output delivery
//! lives in [`output`].

pub mod output;

use std::fmt;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::config::ClientConfig;
use crate::error::{ModelError, Result};

pub use output::{OutputCursor, OutputKind};
pub(crate) use output::{FeedStep, OutputFeed};

// ── Status ─────────────────────────────────────────────────────────

/// Server-reported state of a prediction or training.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Starting,
    Processing,
    Succeeded,
    Failed,
    Canceled,
}

impl Status {
    /// `succeeded`, `failed` and `canceled` are absorbing.
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Succeeded | Status::Failed | Status::Canceled)
    }

    /// Position in the state order. All terminal states share the last rank.
    pub fn rank(self) -> u8 {
        match self {
            Status::Starting => 0,
            Status::Processing => 1,
            Status::Succeeded | Status::Failed | Status::Canceled => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Starting => "starting",
            Status::Processing => "processing",
            Status::Succeeded => "succeeded",
            Status::Failed => "failed",
            Status::Canceled => "canceled",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Job handle ─────────────────────────────────────────────────────

/// Links the server attaches to a job. `cancel` is present only while the
/// job can still be canceled; `stream` only while it can be joined.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobUrls {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub get: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web: Option<String>,
}

/// A remote job driven by the lifecycle operations of both clients.
pub trait Job: DeserializeOwned + Clone + fmt::Debug + Send + Sync + 'static {
    /// Singular name used in logs and errors.
    const KIND: &'static str;
    /// Collection path, e.g. `/v1/predictions`.
    const COLLECTION: &'static str;

    fn id(&self) -> &str;
    fn status(&self) -> Status;
    fn set_status(&mut self, status: Status);
    fn urls(&self) -> &JobUrls;
    fn output(&self) -> Option<&serde_json::Value>;

    /// The error raised when this job is run to completion and fails.
    fn into_model_error(self) -> ModelError;

    /// Where `reload` fetches from: `urls.get`, else the canonical path.
    fn get_target(&self) -> String {
        match &self.urls().get {
            Some(url) => url.clone(),
            None => format!("{}/{}", Self::COLLECTION, self.id()),
        }
    }

    /// Where `cancel` posts to: `urls.cancel`, else the canonical path.
    fn cancel_target(&self) -> String {
        match &self.urls().cancel {
            Some(url) => url.clone(),
            None => format!("{}/{}/cancel", Self::COLLECTION, self.id()),
        }
    }

    fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }
}

/// Merge a fresh server response into the local handle.
///
/// A terminal handle is left untouched, which keeps `output` and `error`
/// immutable once set. Otherwise every field is overwritten, except that a
/// status earlier in the state order than the current one is ignored.
pub fn absorb<J: Job>(current: &mut J, fresh: J) {
    let before = current.status();
    if before.is_terminal() {
        if fresh.status() != before {
            debug!(
                "{} {} is already {before}; ignoring reported status {}",
                J::KIND,
                current.id(),
                fresh.status()
            );
        }
        return;
    }
    let reported = fresh.status();
    *current = fresh;
    if reported.rank() < before.rank() {
        debug!(
            "{} {} reported {reported} after {before}; keeping {before}",
            J::KIND,
            current.id()
        );
        current.set_status(before);
    }
    trace!("{} {} is {}", J::KIND, current.id(), current.status());
}

/// Output of a job run to completion, assembled according to `kind`.
/// A job that did not succeed becomes [`Error::Model`](crate::Error::Model).
pub fn completed_output<J: Job>(job: J, kind: OutputKind) -> Result<serde_json::Value> {
    if job.status() != Status::Succeeded {
        return Err(job.into_model_error().into());
    }
    let output = job.output().cloned().unwrap_or(serde_json::Value::Null);
    Ok(kind.finish(output))
}

// ── Poll schedule ──────────────────────────────────────────────────

/// Delays between polls: starts at the configured interval and grows by half
/// each poll up to a ceiling. Never decreases and never stops on its own.
#[derive(Debug, Clone)]
pub struct PollSchedule {
    next: Duration,
    max: Duration,
}

impl PollSchedule {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            next: initial.min(max),
            max,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.poll_interval, config.max_poll_interval)
    }

    /// The delay before the next poll.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = self.next.mul_f64(1.5).min(self.max);
        delay
    }
}
