//! Webhook signature validation.
//!
//! Deliveries carry `webhook-id`, `webhook-timestamp` and
//! `webhook-signature` headers. The signature is an HMAC-SHA256 over
//! `{id}.{timestamp}.{body}` keyed with the account's signing secret
//! (`whsec_<base64>`), fetched with `webhooks().default_secret()`.
//!
//! ```
//! use replicate_rs::webhook::{WebhookSigningSecret, validate};
//! # use reqwest::header::HeaderMap;
//! # fn handle(headers: &HeaderMap, body: &str, secret: &WebhookSigningSecret) {
//! if validate(headers, body, secret, Some(std::time::Duration::from_secs(300))).is_err() {
//!     // reject the delivery
//! }
//! # }
//! ```

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

pub const ID_HEADER: &str = "webhook-id";
pub const TIMESTAMP_HEADER: &str = "webhook-timestamp";
pub const SIGNATURE_HEADER: &str = "webhook-signature";

/// The key webhook deliveries are signed with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookSigningSecret {
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WebhookError {
    #[error("missing webhook header {0:?}")]
    MissingHeader(&'static str),

    #[error("missing webhook body")]
    MissingBody,

    #[error("invalid webhook secret key format")]
    InvalidSecret,

    #[error("invalid webhook timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("invalid webhook signature: {0}")]
    InvalidSignature(String),
}

/// Check a delivery against `secret`. With a `tolerance`, the delivery's
/// timestamp must also be within that distance of the current time.
pub fn validate(
    headers: &HeaderMap,
    body: &str,
    secret: &WebhookSigningSecret,
    tolerance: Option<Duration>,
) -> Result<(), WebhookError> {
    validate_at(headers, body, secret, tolerance, Utc::now())
}

/// [`validate`] against a fixed clock.
pub fn validate_at(
    headers: &HeaderMap,
    body: &str,
    secret: &WebhookSigningSecret,
    tolerance: Option<Duration>,
    now: DateTime<Utc>,
) -> Result<(), WebhookError> {
    let id = header(headers, ID_HEADER)?;
    let timestamp = header(headers, TIMESTAMP_HEADER)?;
    let signatures = header(headers, SIGNATURE_HEADER)?;
    if body.is_empty() {
        return Err(WebhookError::MissingBody);
    }

    if let Some(tolerance) = tolerance {
        let sent: i64 = timestamp
            .trim()
            .parse()
            .map_err(|_| WebhookError::InvalidTimestamp(format!("{timestamp:?} is not a unix time")))?;
        let skew = now.timestamp().abs_diff(sent);
        if skew > tolerance.as_secs() {
            return Err(WebhookError::InvalidTimestamp(format!(
                "outside the allowed tolerance of {} seconds",
                tolerance.as_secs()
            )));
        }
    }

    let key = match secret.key.split('_').collect::<Vec<_>>().as_slice() {
        [_, encoded] => STANDARD.decode(encoded).map_err(|_| WebhookError::InvalidSecret)?,
        _ => return Err(WebhookError::InvalidSecret),
    };
    let mut mac = HmacSha256::new_from_slice(&key).map_err(|_| WebhookError::InvalidSecret)?;
    mac.update(format!("{id}.{timestamp}.{body}").as_bytes());

    // `v1,<base64>` entries separated by spaces; any match is enough.
    for entry in signatures.split_whitespace() {
        let (_, encoded) = entry
            .split_once(',')
            .ok_or_else(|| WebhookError::InvalidSignature(format!("malformed entry {entry:?}")))?;
        let Ok(candidate) = STANDARD.decode(encoded) else {
            continue;
        };
        if mac.clone().verify_slice(&candidate).is_ok() {
            debug!("Validated webhook {id}");
            return Ok(());
        }
    }
    Err(WebhookError::InvalidSignature("no signature matches".into()))
}

fn header<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<&'a str, WebhookError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or(WebhookError::MissingHeader(name))
}
