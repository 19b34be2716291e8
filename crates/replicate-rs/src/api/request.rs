//! One API exchange: building the request and classifying the response.
//!
//! Both clients describe calls as an [`ApiRequest`], turn it into a
//! [`Prepared`] request (credential check, URL resolution, JSON encoding) and
//! hand the flavor-specific `reqwest` request to their transport. The
//! response side goes back through [`status_error`] and [`decode`].

use std::time::Duration;

use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;

use crate::config::{API_TOKEN_ENV, ClientConfig};
use crate::error::{ApiError, Error, Result};

/// Description of one API call, independent of the execution model.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// A path below the base URL, or an absolute URL returned by the server.
    pub target: String,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    pub headers: Vec<(HeaderName, HeaderValue)>,
    /// Exempt from the per-request timeout (event streams stay open for as
    /// long as the job runs).
    pub long_lived: bool,
}

impl ApiRequest {
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            query: Vec::new(),
            body: None,
            headers: Vec::new(),
            long_lived: false,
        }
    }

    pub fn get(target: impl Into<String>) -> Self {
        Self::new(Method::GET, target)
    }

    pub fn post(target: impl Into<String>) -> Self {
        Self::new(Method::POST, target)
    }

    pub fn with_json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.push((name, value));
        self
    }

    pub fn long_lived(mut self) -> Self {
        self.long_lived = true;
        self
    }

    /// Resolve the target against the base URL. Absolute targets (links the
    /// server handed back) are used untouched.
    pub(crate) fn url(&self, base_url: &str) -> Result<Url> {
        let raw = if self.target.starts_with("http://") || self.target.starts_with("https://") {
            self.target.clone()
        } else {
            format!(
                "{}/{}",
                base_url.trim_end_matches('/'),
                self.target.trim_start_matches('/')
            )
        };
        let mut url = Url::parse(&raw).map_err(|e| Error::config(format!("invalid URL {raw:?}: {e}")))?;
        if !self.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&self.query);
        }
        Ok(url)
    }

    /// Apply the client configuration. Fails without I/O when the credential
    /// is missing or the URL does not parse.
    pub(crate) fn prepare(&self, config: &ClientConfig) -> Result<Prepared> {
        let token = config
            .api_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                Error::config(format!(
                    "no API token configured; pass one to ClientConfig::with_api_token or set {API_TOKEN_ENV}"
                ))
            })?;

        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| Error::config("API token contains characters not allowed in a header"))?;
        headers.insert(AUTHORIZATION, auth);
        if let Ok(agent) = HeaderValue::from_str(&config.user_agent) {
            headers.insert(USER_AGENT, agent);
        }
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let body = match &self.body {
            Some(json) => {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                Some(serde_json::to_vec(json).map_err(|e| Error::config(format!("unserializable body: {e}")))?)
            }
            None => None,
        };
        for (name, value) in &self.headers {
            headers.insert(name.clone(), value.clone());
        }

        Ok(Prepared {
            method: self.method.clone(),
            url: self.url(&config.base_url)?,
            headers,
            body,
            timeout: (!self.long_lived).then_some(config.timeout),
        })
    }
}

/// A fully resolved request, ready to become either `reqwest` flavor.
///
/// Bodies are buffered bytes, so the retry transport can always clone them.
#[derive(Debug)]
pub(crate) struct Prepared {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
    pub timeout: Option<Duration>,
}

impl Prepared {
    pub fn into_async(self) -> reqwest::Request {
        let mut request = reqwest::Request::new(self.method, self.url);
        *request.headers_mut() = self.headers;
        *request.timeout_mut() = self.timeout;
        if let Some(body) = self.body {
            *request.body_mut() = Some(body.into());
        }
        request
    }

    pub fn into_blocking(self) -> reqwest::blocking::Request {
        let mut request = reqwest::blocking::Request::new(self.method, self.url);
        *request.headers_mut() = self.headers;
        *request.timeout_mut() = self.timeout;
        if let Some(body) = self.body {
            *request.body_mut() = Some(body.into());
        }
        request
    }
}

/// The error for a non-2xx response, built from its body.
pub(crate) fn status_error(status: StatusCode, body: &str) -> Error {
    Error::Api(ApiError::from_response(status, body))
}

/// Parse a successful body into the expected record.
pub(crate) fn decode<T: DeserializeOwned>(what: &'static str, body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|source| Error::Decode { what, source })
}
