//! Endpoint table: the request for every operation, shared by both clients.
//!
//! Each function validates its arguments and returns an [`ApiRequest`]
//! without touching the network, so usage errors surface before any I/O.

use reqwest::header::{ACCEPT, CACHE_CONTROL, HeaderValue};

use super::pagination::{Cursor, list_request};
use super::request::ApiRequest;
use crate::error::{Error, Result};
use crate::resources::{CreatePrediction, CreateTraining, ModelIdentifier, ModelRef, ModelVersionIdentifier};

// ── Accounts, collections, hardware ────────────────────────────────

pub(crate) fn account() -> ApiRequest {
    ApiRequest::get("/v1/account")
}

pub(crate) fn collection(slug: &str) -> Result<ApiRequest> {
    non_empty("collection slug", slug)?;
    Ok(ApiRequest::get(format!("/v1/collections/{slug}")))
}

pub(crate) fn collections(cursor: &Cursor) -> Result<ApiRequest> {
    list_request("/v1/collections", cursor)
}

pub(crate) fn hardware() -> ApiRequest {
    ApiRequest::get("/v1/hardware")
}

pub(crate) fn default_webhook_secret() -> ApiRequest {
    ApiRequest::get("/v1/webhooks/default/secret")
}

// ── Deployments ────────────────────────────────────────────────────

fn deployment_path(reference: &str) -> Result<String> {
    let id: ModelIdentifier = reference
        .parse()
        .map_err(|_| Error::config(format!("invalid deployment {reference:?}; expected owner/name")))?;
    Ok(format!("/v1/deployments/{}/{}", id.owner, id.name))
}

pub(crate) fn deployment(reference: &str) -> Result<ApiRequest> {
    Ok(ApiRequest::get(deployment_path(reference)?))
}

pub(crate) fn deployments(cursor: &Cursor) -> Result<ApiRequest> {
    list_request("/v1/deployments", cursor)
}

pub(crate) fn deployment_prediction(reference: &str, params: &CreatePrediction) -> Result<ApiRequest> {
    params.to_request(format!("{}/predictions", deployment_path(reference)?))
}

// ── Models and versions ────────────────────────────────────────────

pub(crate) fn model(reference: &str) -> Result<ApiRequest> {
    let id: ModelIdentifier = reference.parse()?;
    Ok(ApiRequest::get(id.path()))
}

pub(crate) fn models(cursor: &Cursor) -> Result<ApiRequest> {
    list_request("/v1/models", cursor)
}

pub(crate) fn model_prediction(reference: &str, params: &CreatePrediction) -> Result<ApiRequest> {
    let id: ModelIdentifier = reference.parse()?;
    params.to_request(format!("{}/predictions", id.path()))
}

pub(crate) fn version(model: &str, id: &str) -> Result<ApiRequest> {
    let model: ModelIdentifier = model.parse()?;
    non_empty("version id", id)?;
    Ok(ApiRequest::get(format!("{}/versions/{id}", model.path())))
}

pub(crate) fn versions(model: &str, cursor: &Cursor) -> Result<ApiRequest> {
    let model: ModelIdentifier = model.parse()?;
    list_request(&format!("{}/versions", model.path()), cursor)
}

// ── Predictions and trainings ──────────────────────────────────────

pub(crate) fn prediction(id: &str) -> Result<ApiRequest> {
    non_empty("prediction id", id)?;
    Ok(ApiRequest::get(format!("/v1/predictions/{id}")))
}

pub(crate) fn predictions(cursor: &Cursor) -> Result<ApiRequest> {
    list_request("/v1/predictions", cursor)
}

pub(crate) fn create_prediction(params: &CreatePrediction) -> Result<ApiRequest> {
    if params.version.as_deref().is_none_or(str::is_empty) {
        return Err(Error::config(
            "a version is required to create a prediction; use the model or deployment endpoints otherwise",
        ));
    }
    params.to_request("/v1/predictions")
}

pub(crate) fn cancel_prediction(id: &str) -> Result<ApiRequest> {
    non_empty("prediction id", id)?;
    Ok(ApiRequest::post(format!("/v1/predictions/{id}/cancel")))
}

pub(crate) fn training(id: &str) -> Result<ApiRequest> {
    non_empty("training id", id)?;
    Ok(ApiRequest::get(format!("/v1/trainings/{id}")))
}

pub(crate) fn trainings(cursor: &Cursor) -> Result<ApiRequest> {
    list_request("/v1/trainings", cursor)
}

/// `reference` is `owner/name:version`.
pub(crate) fn create_training(reference: &str, params: &CreateTraining) -> Result<ApiRequest> {
    let id: ModelVersionIdentifier = reference.parse()?;
    params.to_request(format!("{}/versions/{}/trainings", id.model().path(), id.version))
}

pub(crate) fn cancel_training(id: &str) -> Result<ApiRequest> {
    non_empty("training id", id)?;
    Ok(ApiRequest::post(format!("/v1/trainings/{id}/cancel")))
}

/// Create request for `run`/`stream`, plus the version whose schema decides
/// how output is assembled (only known for `owner/name:version`).
pub(crate) fn run(reference: &str, params: CreatePrediction) -> Result<(ApiRequest, Option<ModelVersionIdentifier>)> {
    match reference.parse::<ModelRef>()? {
        ModelRef::Version(id) => {
            let request = create_prediction(&params.with_version(id.version.clone()))?;
            Ok((request, Some(id)))
        }
        ModelRef::VersionId(version) => Ok((create_prediction(&params.with_version(version))?, None)),
        ModelRef::Model(id) => Ok((model_prediction(&id.to_string(), &params)?, None)),
    }
}

/// GET on a job's stream link with the event-stream headers.
pub(crate) fn event_stream(url: &str) -> ApiRequest {
    ApiRequest::get(url)
        .with_header(ACCEPT, HeaderValue::from_static("text/event-stream"))
        .with_header(CACHE_CONTROL, HeaderValue::from_static("no-store"))
        .long_lived()
}

fn non_empty(what: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(Error::config(format!("{what} must not be empty")))
    } else {
        Ok(())
    }
}
