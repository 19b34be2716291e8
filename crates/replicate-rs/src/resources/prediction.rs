use chrono::{DateTime, Utc};
use reqwest::header::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::request::ApiRequest;
use crate::error::{Error, FailedJob, ModelError, Result};
use crate::job::{Job, JobUrls, Status};

/// Longest server-side wait a create call may ask for.
pub const MAX_SYNC_WAIT_SECS: u64 = 60;

/// One run of a model version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub id: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    pub status: Status,
    #[serde(default)]
    pub input: Option<Value>,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub logs: Option<String>,
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub metrics: Option<Value>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub urls: JobUrls,
}

impl Job for Prediction {
    const KIND: &'static str = "prediction";
    const COLLECTION: &'static str = "/v1/predictions";

    fn id(&self) -> &str {
        &self.id
    }

    fn status(&self) -> Status {
        self.status
    }

    fn set_status(&mut self, status: Status) {
        self.status = status;
    }

    fn urls(&self) -> &JobUrls {
        &self.urls
    }

    fn output(&self) -> Option<&Value> {
        self.output.as_ref()
    }

    fn into_model_error(self) -> ModelError {
        ModelError {
            job: FailedJob::Prediction(Box::new(self)),
        }
    }
}

/// Events a webhook can be subscribed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookEvent {
    Start,
    Output,
    Logs,
    Completed,
}

/// Parameters for creating a prediction.
///
/// The same parameters serve `/v1/predictions` (which needs a version),
/// model predictions and deployment predictions.
#[derive(Debug, Clone, Serialize)]
pub struct CreatePrediction {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub input: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_completed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_events_filter: Option<Vec<WebhookEvent>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    /// Seconds the server may hold the create call open waiting for a
    /// terminal state. `None` or 0 disables the wait.
    #[serde(skip)]
    pub wait: Option<u64>,
}

impl CreatePrediction {
    pub fn new(input: Value) -> Self {
        Self {
            version: None,
            input,
            webhook: None,
            webhook_completed: None,
            webhook_events_filter: None,
            stream: None,
            wait: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_webhook(mut self, url: impl Into<String>) -> Self {
        self.webhook = Some(url.into());
        self
    }

    pub fn with_webhook_completed(mut self, url: impl Into<String>) -> Self {
        self.webhook_completed = Some(url.into());
        self
    }

    pub fn with_webhook_events(mut self, events: impl IntoIterator<Item = WebhookEvent>) -> Self {
        self.webhook_events_filter = Some(events.into_iter().collect());
        self
    }

    /// Ask the server for a `urls.stream` link.
    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = Some(stream);
        self
    }

    pub fn with_wait(mut self, seconds: u64) -> Self {
        self.wait = Some(seconds);
        self
    }

    /// The POST for these parameters. Validates before anything is sent.
    pub(crate) fn to_request(&self, path: impl Into<String>) -> Result<ApiRequest> {
        let body = serde_json::to_value(self)
            .map_err(|e| Error::config(format!("unserializable prediction input: {e}")))?;
        let mut request = ApiRequest::post(path).with_json(body);
        if let Some(header) = prefer_wait(self.wait)? {
            request = request.with_header(HeaderName::from_static("prefer"), header);
        }
        Ok(request)
    }
}

/// `Prefer: wait=N` for a sync wait of 1..=60 seconds.
fn prefer_wait(wait: Option<u64>) -> Result<Option<HeaderValue>> {
    match wait {
        None | Some(0) => Ok(None),
        Some(secs) if secs > MAX_SYNC_WAIT_SECS => Err(Error::config(format!(
            "wait must be between 0 and {MAX_SYNC_WAIT_SECS} seconds, got {secs}"
        ))),
        Some(secs) => HeaderValue::from_str(&format!("wait={secs}"))
            .map(Some)
            .map_err(|e| Error::config(e.to_string())),
    }
}
