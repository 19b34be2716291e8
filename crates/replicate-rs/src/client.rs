//! Async client.
//!
//! [`Client`] is cheap to clone and safe to share across tasks: the
//! configuration and connection pool are read-only after construction. Every
//! operation yields to the runtime while a request, a backoff delay, a poll
//! delay or the next stream chunk is pending. The blocking mirror lives in
//! [`crate::blocking`].
//!
//! ```no_run
//! # async fn demo() -> replicate_rs::Result<()> {
//! use replicate_rs::Client;
//! use serde_json::json;
//!
//! let client = Client::from_env()?;
//! let output = client
//!     .run("stability-ai/sdxl:39ed52f2", json!({"prompt": "an astronaut riding a rainbow unicorn"}))
//!     .await?;
//! println!("{output}");
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Instant;

use futures::Stream;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, trace};

use crate::api::pagination::{Cursor, Page, paginate_async};
use crate::api::request::{ApiRequest, decode, status_error};
use crate::api::routes;
use crate::api::streaming::{AsyncEventStream, check_event_stream};
use crate::api::transport::{AsyncTransport, RetryTransport};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::job::{FeedStep, Job, OutputFeed, OutputKind, PollSchedule, absorb, completed_output};
use crate::resources::{
    Account, Collection, CreatePrediction, CreateTraining, Deployment, Hardware, Model, Prediction, Training,
    Version,
};
use crate::webhook::WebhookSigningSecret;

/// Async client for the prediction and training API.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    transport: Box<dyn AsyncTransport>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.inner.config.base_url)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Build a client over a pooled `reqwest::Client`. A missing token is
    /// reported by the first request, not here.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.timeout)
            .build()?;
        Self::with_transport(config, http)
    }

    /// [`ClientConfig::from_env`] plus [`Client::new`].
    pub fn from_env() -> Result<Self> {
        Self::new(ClientConfig::from_env())
    }

    /// Use a custom transport. It is wrapped in a [`RetryTransport`] built
    /// from `config.retry`.
    pub fn with_transport(config: ClientConfig, transport: impl AsyncTransport + 'static) -> Result<Self> {
        let transport = RetryTransport::new(transport, config.retry.clone())?;
        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                transport: Box::new(transport),
            }),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    // ── Exchange ───────────────────────────────────────────────────

    /// Send one request and return the successful response.
    pub async fn execute(&self, request: ApiRequest) -> Result<reqwest::Response> {
        let prepared = request.prepare(&self.inner.config)?;
        let method = prepared.method.clone();
        let url = prepared.url.clone();
        let start = Instant::now();
        let response = self.inner.transport.send(prepared.into_async()).await?;
        let status = response.status();
        debug!("{method} {url}: HTTP {status} in {:.2}s", start.elapsed().as_secs_f64());
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }
        Ok(response)
    }

    /// Send one request and decode the JSON body as `T`.
    pub async fn call<T: DeserializeOwned>(&self, what: &'static str, request: ApiRequest) -> Result<T> {
        let response = self.execute(request).await?;
        let body = response.bytes().await?;
        trace!("Decoding {what} from {} bytes", body.len());
        decode(what, &body)
    }

    // ── Namespaces ─────────────────────────────────────────────────

    pub fn accounts(&self) -> Accounts<'_> {
        Accounts { client: self }
    }

    pub fn collections(&self) -> Collections<'_> {
        Collections { client: self }
    }

    pub fn deployments(&self) -> Deployments<'_> {
        Deployments { client: self }
    }

    pub fn hardware(&self) -> Hardwares<'_> {
        Hardwares { client: self }
    }

    pub fn models(&self) -> Models<'_> {
        Models { client: self }
    }

    pub fn predictions(&self) -> Predictions<'_> {
        Predictions { client: self }
    }

    pub fn trainings(&self) -> Trainings<'_> {
        Trainings { client: self }
    }

    pub fn webhooks(&self) -> Webhooks<'_> {
        Webhooks { client: self }
    }

    // ── Run to completion ──────────────────────────────────────────

    /// Create a prediction for `reference` (`owner/name`,
    /// `owner/name:version` or a version id), wait for it, and return its
    /// output. Iterator output the version marks for concatenation is
    /// returned as one string. A failed or canceled prediction becomes
    /// [`Error::Model`].
    pub async fn run(&self, reference: &str, input: Value) -> Result<Value> {
        self.run_with(reference, CreatePrediction::new(input)).await
    }

    /// [`Client::run`] with full create parameters.
    pub async fn run_with(&self, reference: &str, params: CreatePrediction) -> Result<Value> {
        let (request, version) = routes::run(reference, params)?;
        let mut prediction: Prediction = self.call("prediction", request).await?;
        debug!("Created prediction {} for {reference}", prediction.id);
        let kind = match version {
            Some(id) => self
                .models()
                .versions(&id.model().to_string())
                .get(&id.version)
                .await?
                .output_kind(),
            None => OutputKind::Plain,
        };
        self.wait_job(&mut prediction).await?;
        completed_output(prediction, kind)
    }

    /// Create a streaming prediction for `reference` and open its event
    /// stream.
    pub async fn stream(&self, reference: &str, input: Value) -> Result<AsyncEventStream> {
        self.stream_with(reference, CreatePrediction::new(input)).await
    }

    pub async fn stream_with(&self, reference: &str, params: CreatePrediction) -> Result<AsyncEventStream> {
        let (request, _) = routes::run(reference, params.with_stream(true))?;
        let prediction: Prediction = self.call("prediction", request).await?;
        debug!("Created streaming prediction {} for {reference}", prediction.id);
        self.predictions().stream(&prediction).await
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    async fn reload_job<J: Job>(&self, job: &mut J) -> Result<()> {
        let fresh: J = self.call(J::KIND, ApiRequest::get(job.get_target())).await?;
        absorb(job, fresh);
        Ok(())
    }

    async fn wait_job<J: Job>(&self, job: &mut J) -> Result<()> {
        let mut schedule = PollSchedule::from_config(&self.inner.config);
        while !job.is_terminal() {
            let delay = schedule.next_delay();
            trace!("{} {} is {}; polling in {delay:?}", J::KIND, job.id(), job.status());
            tokio::time::sleep(delay).await;
            self.reload_job(job).await?;
        }
        debug!("{} {} finished: {}", J::KIND, job.id(), job.status());
        Ok(())
    }

    async fn cancel_job<J: Job>(&self, job: &mut J) -> Result<()> {
        let fresh: J = self.call(J::KIND, ApiRequest::post(job.cancel_target())).await?;
        absorb(job, fresh);
        Ok(())
    }

    async fn open_stream(&self, url: &str) -> Result<AsyncEventStream> {
        let response = self.execute(routes::event_stream(url)).await?;
        check_event_stream(response.headers())?;
        Ok(AsyncEventStream::new(response))
    }
}

// ── Accounts, collections, hardware ────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct Accounts<'a> {
    client: &'a Client,
}

impl Accounts<'_> {
    /// The account that owns the API token.
    pub async fn current(&self) -> Result<Account> {
        self.client.call("account", routes::account()).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Collections<'a> {
    client: &'a Client,
}

impl<'a> Collections<'a> {
    pub async fn get(&self, slug: &str) -> Result<Collection> {
        self.client.call("collection", routes::collection(slug)?).await
    }

    pub async fn list(&self, cursor: Cursor) -> Result<Page<Collection>> {
        self.client.call("collection page", routes::collections(&cursor)?).await
    }

    /// Every page, fetched lazily.
    pub fn pages(self) -> impl Stream<Item = Result<Page<Collection>>> + 'a {
        paginate_async(move |cursor| async move { self.list(cursor).await })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Hardwares<'a> {
    client: &'a Client,
}

impl Hardwares<'_> {
    /// Hardware available for running models. Not paginated.
    pub async fn list(&self) -> Result<Vec<Hardware>> {
        self.client.call("hardware list", routes::hardware()).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Webhooks<'a> {
    client: &'a Client,
}

impl Webhooks<'_> {
    /// The secret the account's webhook deliveries are signed with. Check
    /// deliveries with [`crate::webhook::validate`].
    pub async fn default_secret(&self) -> Result<WebhookSigningSecret> {
        self.client.call("webhook secret", routes::default_webhook_secret()).await
    }
}

// ── Deployments ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct Deployments<'a> {
    client: &'a Client,
}

impl<'a> Deployments<'a> {
    /// `reference` is `owner/name`.
    pub async fn get(&self, reference: &str) -> Result<Deployment> {
        self.client.call("deployment", routes::deployment(reference)?).await
    }

    pub async fn list(&self, cursor: Cursor) -> Result<Page<Deployment>> {
        self.client.call("deployment page", routes::deployments(&cursor)?).await
    }

    pub fn pages(self) -> impl Stream<Item = Result<Page<Deployment>>> + 'a {
        paginate_async(move |cursor| async move { self.list(cursor).await })
    }

    pub fn predictions(&self) -> DeploymentPredictions<'a> {
        DeploymentPredictions { client: self.client }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DeploymentPredictions<'a> {
    client: &'a Client,
}

impl DeploymentPredictions<'_> {
    pub async fn create(&self, deployment: &str, params: CreatePrediction) -> Result<Prediction> {
        let request = routes::deployment_prediction(deployment, &params)?;
        self.client.call("prediction", request).await
    }
}

// ── Models and versions ────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct Models<'a> {
    client: &'a Client,
}

impl<'a> Models<'a> {
    /// `reference` is `owner/name`.
    pub async fn get(&self, reference: &str) -> Result<Model> {
        self.client.call("model", routes::model(reference)?).await
    }

    pub async fn list(&self, cursor: Cursor) -> Result<Page<Model>> {
        self.client.call("model page", routes::models(&cursor)?).await
    }

    pub fn pages(self) -> impl Stream<Item = Result<Page<Model>>> + 'a {
        paginate_async(move |cursor| async move { self.list(cursor).await })
    }

    /// Predictions against a model's current version (official models).
    pub fn predictions(&self) -> ModelPredictions<'a> {
        ModelPredictions { client: self.client }
    }

    pub fn versions(&self, model: &str) -> Versions<'a> {
        Versions {
            client: self.client,
            model: model.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ModelPredictions<'a> {
    client: &'a Client,
}

impl ModelPredictions<'_> {
    pub async fn create(&self, model: &str, params: CreatePrediction) -> Result<Prediction> {
        let request = routes::model_prediction(model, &params)?;
        self.client.call("prediction", request).await
    }
}

#[derive(Debug, Clone)]
pub struct Versions<'a> {
    client: &'a Client,
    model: String,
}

impl<'a> Versions<'a> {
    pub async fn get(&self, id: &str) -> Result<Version> {
        self.client.call("version", routes::version(&self.model, id)?).await
    }

    pub async fn list(&self, cursor: Cursor) -> Result<Page<Version>> {
        self.client.call("version page", routes::versions(&self.model, &cursor)?).await
    }

    pub fn pages(self) -> impl Stream<Item = Result<Page<Version>>> + 'a {
        paginate_async(move |cursor| {
            let versions = self.clone();
            async move { versions.list(cursor).await }
        })
    }
}

// ── Predictions ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct Predictions<'a> {
    client: &'a Client,
}

impl<'a> Predictions<'a> {
    /// Create a prediction of a specific version (`params.version` is
    /// required). Returns as soon as the server has accepted it, or after
    /// the sync wait if one was requested.
    pub async fn create(&self, params: CreatePrediction) -> Result<Prediction> {
        let prediction: Prediction = self.client.call("prediction", routes::create_prediction(&params)?).await?;
        debug!("Created prediction {} ({})", prediction.id, prediction.status);
        Ok(prediction)
    }

    pub async fn get(&self, id: &str) -> Result<Prediction> {
        self.client.call("prediction", routes::prediction(id)?).await
    }

    pub async fn list(&self, cursor: Cursor) -> Result<Page<Prediction>> {
        self.client.call("prediction page", routes::predictions(&cursor)?).await
    }

    pub fn pages(self) -> impl Stream<Item = Result<Page<Prediction>>> + 'a {
        paginate_async(move |cursor| async move { self.list(cursor).await })
    }

    /// Refresh `prediction` from the server.
    pub async fn reload(&self, prediction: &mut Prediction) -> Result<()> {
        self.client.reload_job(prediction).await
    }

    /// Poll until `prediction` is terminal. Does not fail on a failed
    /// prediction; inspect `status` or use [`Client::run`].
    pub async fn wait(&self, prediction: &mut Prediction) -> Result<()> {
        self.client.wait_job(prediction).await
    }

    /// Request cancellation and merge the server's answer into
    /// `prediction`. A prediction that already finished keeps its state.
    pub async fn cancel(&self, prediction: &mut Prediction) -> Result<()> {
        self.client.cancel_job(prediction).await
    }

    /// Cancel by id, returning the server's view of the prediction.
    pub async fn cancel_by_id(&self, id: &str) -> Result<Prediction> {
        self.client.call("prediction", routes::cancel_prediction(id)?).await
    }

    /// Open the prediction's event stream. Requires a prediction created
    /// with streaming enabled.
    pub async fn stream(&self, prediction: &Prediction) -> Result<AsyncEventStream> {
        let url = prediction
            .urls
            .stream
            .as_deref()
            .ok_or_else(|| Error::config(format!("prediction {} does not support streaming", prediction.id)))?;
        self.client.open_stream(url).await
    }

    /// Chunks of a growing array output, each delivered once, polling until
    /// the prediction finishes. Ends with [`Error::Model`] if it fails.
    pub fn output_iterator(self, prediction: Prediction) -> impl Stream<Item = Result<Value>> + 'a {
        let client = self.client;
        let schedule = PollSchedule::from_config(client.config());
        let state = (prediction, OutputFeed::default(), schedule);
        futures::stream::unfold(state, move |(mut prediction, mut feed, mut schedule)| async move {
            loop {
                match feed.step(&prediction) {
                    FeedStep::Chunk(chunk) => return Some((Ok(chunk), (prediction, feed, schedule))),
                    FeedStep::Failed(error) => return Some((Err(error.into()), (prediction, feed, schedule))),
                    FeedStep::Done => return None,
                    FeedStep::Poll => {
                        tokio::time::sleep(schedule.next_delay()).await;
                        if let Err(e) = client.reload_job(&mut prediction).await {
                            feed.abort();
                            return Some((Err(e), (prediction, feed, schedule)));
                        }
                    }
                }
            }
        })
    }
}

// ── Trainings ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct Trainings<'a> {
    client: &'a Client,
}

impl<'a> Trainings<'a> {
    /// Train `version` (`owner/name:version`) into `params.destination`.
    pub async fn create(&self, version: &str, params: CreateTraining) -> Result<Training> {
        let training: Training = self
            .client
            .call("training", routes::create_training(version, &params)?)
            .await?;
        debug!("Created training {} ({})", training.id, training.status);
        Ok(training)
    }

    pub async fn get(&self, id: &str) -> Result<Training> {
        self.client.call("training", routes::training(id)?).await
    }

    pub async fn list(&self, cursor: Cursor) -> Result<Page<Training>> {
        self.client.call("training page", routes::trainings(&cursor)?).await
    }

    pub fn pages(self) -> impl Stream<Item = Result<Page<Training>>> + 'a {
        paginate_async(move |cursor| async move { self.list(cursor).await })
    }

    pub async fn reload(&self, training: &mut Training) -> Result<()> {
        self.client.reload_job(training).await
    }

    pub async fn wait(&self, training: &mut Training) -> Result<()> {
        self.client.wait_job(training).await
    }

    pub async fn cancel(&self, training: &mut Training) -> Result<()> {
        self.client.cancel_job(training).await
    }

    pub async fn cancel_by_id(&self, id: &str) -> Result<Training> {
        self.client.call("training", routes::cancel_training(id)?).await
    }
}
