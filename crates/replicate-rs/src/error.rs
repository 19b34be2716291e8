//! Error taxonomy for every public operation.
//!
//! Transient transport failures are retried inside
//! [`RetryTransport`](crate::api::transport::RetryTransport) and only surface
//! here as [`Error::Transport`] once attempts are exhausted. Everything else
//! propagates immediately.

use std::fmt;

use reqwest::StatusCode;
use serde::Deserialize;

use crate::job::Status;
use crate::resources::{Prediction, Training};
use crate::webhook::WebhookError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Connection failure or timeout that outlived the retry budget.
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-2xx response from the API.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// A job ended `failed` or `canceled` while being run to completion.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Invalid usage detected before any request was sent.
    #[error("configuration error: {0}")]
    Config(String),

    /// A successful response whose body is not the expected record.
    #[error("failed to decode {what}: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// The server emitted an `error` event on a stream, or the stream's
    /// connection dropped.
    #[error("stream error: {0}")]
    Stream(String),

    /// A webhook delivery failed signature validation.
    #[error(transparent)]
    Webhook(#[from] WebhookError),

    /// Writing output (CLI) failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    /// HTTP status of an API error, if this is one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Api(e) => StatusCode::from_u16(e.status).ok(),
            Error::Transport(e) => e.status(),
            _ => None,
        }
    }
}

/// RFC 7807 problem details returned with a non-2xx response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ApiError {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub title: Option<String>,
    /// Falls back to the HTTP status when the body omits it.
    #[serde(default)]
    pub status: u16,
    pub detail: Option<String>,
    pub instance: Option<String>,
}

impl ApiError {
    /// Build from a raw error response. Bodies that are not problem details
    /// keep the HTTP status and carry the text as `detail`.
    pub fn from_response(status: StatusCode, body: &str) -> Self {
        let mut err = match serde_json::from_str::<ApiError>(body) {
            Ok(parsed) => parsed,
            Err(_) => ApiError {
                detail: (!body.trim().is_empty()).then(|| body.trim().to_string()),
                ..Default::default()
            },
        };
        if err.status == 0 {
            err.status = status.as_u16();
        }
        err
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "API error (HTTP {})", self.status)?;
        if let Some(title) = &self.title {
            write!(f, ": {title}")?;
        }
        if let Some(detail) = &self.detail {
            write!(f, ": {detail}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ApiError {}

/// The job whose failure produced a [`ModelError`].
#[derive(Debug, Clone)]
pub enum FailedJob {
    Prediction(Box<Prediction>),
    Training(Box<Training>),
}

/// A prediction or training run to completion ended `failed` or `canceled`.
#[derive(Debug, Clone)]
pub struct ModelError {
    pub job: FailedJob,
}

impl ModelError {
    pub fn id(&self) -> &str {
        match &self.job {
            FailedJob::Prediction(p) => &p.id,
            FailedJob::Training(t) => &t.id,
        }
    }

    /// The server-reported error, rendered as text.
    pub fn error(&self) -> Option<String> {
        let value = match &self.job {
            FailedJob::Prediction(p) => p.error.as_ref(),
            FailedJob::Training(t) => t.error.as_ref(),
        }?;
        Some(match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    pub fn logs(&self) -> Option<&str> {
        match &self.job {
            FailedJob::Prediction(p) => p.logs.as_deref(),
            FailedJob::Training(t) => t.logs.as_deref(),
        }
    }

    /// `failed` or `canceled`.
    pub fn status(&self) -> Status {
        match &self.job {
            FailedJob::Prediction(p) => p.status,
            FailedJob::Training(t) => t.status,
        }
    }

    pub fn prediction(&self) -> Option<&Prediction> {
        match &self.job {
            FailedJob::Prediction(p) => Some(p),
            FailedJob::Training(_) => None,
        }
    }
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.job {
            FailedJob::Prediction(_) => "prediction",
            FailedJob::Training(_) => "training",
        };
        write!(f, "{kind} {} {}", self.id(), self.status())?;
        if let Some(error) = self.error() {
            write!(f, ": {error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ModelError {}
