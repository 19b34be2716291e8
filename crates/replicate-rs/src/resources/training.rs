use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::prediction::WebhookEvent;
use crate::api::request::ApiRequest;
use crate::error::{Error, FailedJob, ModelError, Result};
use crate::job::{Job, JobUrls, Status};

/// A fine-tuning run that produces a new version under `destination`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Training {
    pub id: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub destination: Option<String>,
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
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub urls: JobUrls,
}

impl Job for Training {
    const KIND: &'static str = "training";
    const COLLECTION: &'static str = "/v1/trainings";

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
            job: FailedJob::Training(Box::new(self)),
        }
    }
}

/// Parameters for creating a training.
#[derive(Debug, Clone, Serialize)]
pub struct CreateTraining {
    /// Model (`owner/name`) that receives the trained version.
    pub destination: String,
    pub input: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_events_filter: Option<Vec<WebhookEvent>>,
}

impl CreateTraining {
    pub fn new(destination: impl Into<String>, input: Value) -> Self {
        Self {
            destination: destination.into(),
            input,
            webhook: None,
            webhook_events_filter: None,
        }
    }

    pub fn with_webhook(mut self, url: impl Into<String>) -> Self {
        self.webhook = Some(url.into());
        self
    }

    pub fn with_webhook_events(mut self, events: impl IntoIterator<Item = WebhookEvent>) -> Self {
        self.webhook_events_filter = Some(events.into_iter().collect());
        self
    }

    pub(crate) fn to_request(&self, path: impl Into<String>) -> Result<ApiRequest> {
        if !self.destination.contains('/') {
            return Err(Error::config(format!(
                "invalid training destination {:?}; expected owner/name",
                self.destination
            )));
        }
        let body = serde_json::to_value(self)
            .map_err(|e| Error::config(format!("unserializable training input: {e}")))?;
        Ok(ApiRequest::post(path).with_json(body))
    }
}
