//! Blocking client, the thread-per-call mirror of [`crate::Client`].
//!
//! Same namespaces, same operations, same errors. Waiting for a request, a
//! backoff delay or a poll delay parks the calling thread. Do not use it from
//! inside an async runtime; use [`crate::Client`] there.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, trace};

use crate::api::pagination::{Cursor, Page, Paginator, paginate};
use crate::api::request::{ApiRequest, decode, status_error};
use crate::api::routes;
use crate::api::streaming::{EventStream, check_event_stream};
use crate::api::transport::{RetryTransport, Transport};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::job::{FeedStep, Job, OutputFeed, OutputKind, PollSchedule, absorb, completed_output};
use crate::resources::{
    Account, Collection, CreatePrediction, CreateTraining, Deployment, Hardware, Model, Prediction, Training,
    Version,
};
use crate::webhook::WebhookSigningSecret;

/// Blocking client for the prediction and training API.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    transport: Box<dyn Transport>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("blocking::Client")
            .field("base_url", &self.inner.config.base_url)
            .finish_non_exhaustive()
    }
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        // Timeouts are set per request so event streams can stay open.
        let http = reqwest::blocking::Client::builder()
            .connect_timeout(config.timeout)
            .timeout(None::<Duration>)
            .build()?;
        Self::with_transport(config, http)
    }

    pub fn from_env() -> Result<Self> {
        Self::new(ClientConfig::from_env())
    }

    pub fn with_transport(config: ClientConfig, transport: impl Transport + 'static) -> Result<Self> {
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

    pub fn execute(&self, request: ApiRequest) -> Result<reqwest::blocking::Response> {
        let prepared = request.prepare(&self.inner.config)?;
        let method = prepared.method.clone();
        let url = prepared.url.clone();
        let start = Instant::now();
        let response = self.inner.transport.send(prepared.into_blocking())?;
        let status = response.status();
        debug!("{method} {url}: HTTP {status} in {:.2}s", start.elapsed().as_secs_f64());
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(status_error(status, &body));
        }
        Ok(response)
    }

    pub fn call<T: DeserializeOwned>(&self, what: &'static str, request: ApiRequest) -> Result<T> {
        let body = self.execute(request)?.bytes()?;
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

    /// See [`crate::Client::run`].
    pub fn run(&self, reference: &str, input: Value) -> Result<Value> {
        self.run_with(reference, CreatePrediction::new(input))
    }

    pub fn run_with(&self, reference: &str, params: CreatePrediction) -> Result<Value> {
        let (request, version) = routes::run(reference, params)?;
        let mut prediction: Prediction = self.call("prediction", request)?;
        debug!("Created prediction {} for {reference}", prediction.id);
        let kind = match version {
            Some(id) => self
                .models()
                .versions(&id.model().to_string())
                .get(&id.version)?
                .output_kind(),
            None => OutputKind::Plain,
        };
        self.wait_job(&mut prediction)?;
        completed_output(prediction, kind)
    }

    pub fn stream(&self, reference: &str, input: Value) -> Result<EventStream> {
        self.stream_with(reference, CreatePrediction::new(input))
    }

    pub fn stream_with(&self, reference: &str, params: CreatePrediction) -> Result<EventStream> {
        let (request, _) = routes::run(reference, params.with_stream(true))?;
        let prediction: Prediction = self.call("prediction", request)?;
        debug!("Created streaming prediction {} for {reference}", prediction.id);
        self.predictions().stream(&prediction)
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    fn reload_job<J: Job>(&self, job: &mut J) -> Result<()> {
        let fresh: J = self.call(J::KIND, ApiRequest::get(job.get_target()))?;
        absorb(job, fresh);
        Ok(())
    }

    fn wait_job<J: Job>(&self, job: &mut J) -> Result<()> {
        let mut schedule = PollSchedule::from_config(&self.inner.config);
        while !job.is_terminal() {
            let delay = schedule.next_delay();
            trace!("{} {} is {}; polling in {delay:?}", J::KIND, job.id(), job.status());
            std::thread::sleep(delay);
            self.reload_job(job)?;
        }
        debug!("{} {} finished: {}", J::KIND, job.id(), job.status());
        Ok(())
    }

    fn cancel_job<J: Job>(&self, job: &mut J) -> Result<()> {
        let fresh: J = self.call(J::KIND, ApiRequest::post(job.cancel_target()))?;
        absorb(job, fresh);
        Ok(())
    }

    fn open_stream(&self, url: &str) -> Result<EventStream> {
        let response = self.execute(routes::event_stream(url))?;
        check_event_stream(response.headers())?;
        Ok(EventStream::new(response))
    }
}

// ── Accounts, collections, hardware ────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct Accounts<'a> {
    client: &'a Client,
}

impl Accounts<'_> {
    pub fn current(&self) -> Result<Account> {
        self.client.call("account", routes::account())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Collections<'a> {
    client: &'a Client,
}

impl<'a> Collections<'a> {
    pub fn get(&self, slug: &str) -> Result<Collection> {
        self.client.call("collection", routes::collection(slug)?)
    }

    pub fn list(&self, cursor: Cursor) -> Result<Page<Collection>> {
        self.client.call("collection page", routes::collections(&cursor)?)
    }

    pub fn pages(self) -> Paginator<impl FnMut(Cursor) -> Result<Page<Collection>> + 'a> {
        paginate(move |cursor| self.list(cursor))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Hardwares<'a> {
    client: &'a Client,
}

impl Hardwares<'_> {
    pub fn list(&self) -> Result<Vec<Hardware>> {
        self.client.call("hardware list", routes::hardware())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Webhooks<'a> {
    client: &'a Client,
}

impl Webhooks<'_> {
    pub fn default_secret(&self) -> Result<WebhookSigningSecret> {
        self.client.call("webhook secret", routes::default_webhook_secret())
    }
}

// ── Deployments ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct Deployments<'a> {
    client: &'a Client,
}

impl<'a> Deployments<'a> {
    pub fn get(&self, reference: &str) -> Result<Deployment> {
        self.client.call("deployment", routes::deployment(reference)?)
    }

    pub fn list(&self, cursor: Cursor) -> Result<Page<Deployment>> {
        self.client.call("deployment page", routes::deployments(&cursor)?)
    }

    pub fn pages(self) -> Paginator<impl FnMut(Cursor) -> Result<Page<Deployment>> + 'a> {
        paginate(move |cursor| self.list(cursor))
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
    pub fn create(&self, deployment: &str, params: CreatePrediction) -> Result<Prediction> {
        self.client
            .call("prediction", routes::deployment_prediction(deployment, &params)?)
    }
}

// ── Models and versions ────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct Models<'a> {
    client: &'a Client,
}

impl<'a> Models<'a> {
    pub fn get(&self, reference: &str) -> Result<Model> {
        self.client.call("model", routes::model(reference)?)
    }

    pub fn list(&self, cursor: Cursor) -> Result<Page<Model>> {
        self.client.call("model page", routes::models(&cursor)?)
    }

    pub fn pages(self) -> Paginator<impl FnMut(Cursor) -> Result<Page<Model>> + 'a> {
        paginate(move |cursor| self.list(cursor))
    }

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
    pub fn create(&self, model: &str, params: CreatePrediction) -> Result<Prediction> {
        self.client.call("prediction", routes::model_prediction(model, &params)?)
    }
}

#[derive(Debug, Clone)]
pub struct Versions<'a> {
    client: &'a Client,
    model: String,
}

impl<'a> Versions<'a> {
    pub fn get(&self, id: &str) -> Result<Version> {
        self.client.call("version", routes::version(&self.model, id)?)
    }

    pub fn list(&self, cursor: Cursor) -> Result<Page<Version>> {
        self.client.call("version page", routes::versions(&self.model, &cursor)?)
    }

    pub fn pages(self) -> Paginator<impl FnMut(Cursor) -> Result<Page<Version>> + 'a> {
        paginate(move |cursor| self.list(cursor))
    }
}

// ── Predictions ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct Predictions<'a> {
    client: &'a Client,
}

impl<'a> Predictions<'a> {
    pub fn create(&self, params: CreatePrediction) -> Result<Prediction> {
        let prediction: Prediction = self.client.call("prediction", routes::create_prediction(&params)?)?;
        debug!("Created prediction {} ({})", prediction.id, prediction.status);
        Ok(prediction)
    }

    pub fn get(&self, id: &str) -> Result<Prediction> {
        self.client.call("prediction", routes::prediction(id)?)
    }

    pub fn list(&self, cursor: Cursor) -> Result<Page<Prediction>> {
        self.client.call("prediction page", routes::predictions(&cursor)?)
    }

    pub fn pages(self) -> Paginator<impl FnMut(Cursor) -> Result<Page<Prediction>> + 'a> {
        paginate(move |cursor| self.list(cursor))
    }

    pub fn reload(&self, prediction: &mut Prediction) -> Result<()> {
        self.client.reload_job(prediction)
    }

    pub fn wait(&self, prediction: &mut Prediction) -> Result<()> {
        self.client.wait_job(prediction)
    }

    pub fn cancel(&self, prediction: &mut Prediction) -> Result<()> {
        self.client.cancel_job(prediction)
    }

    pub fn cancel_by_id(&self, id: &str) -> Result<Prediction> {
        self.client.call("prediction", routes::cancel_prediction(id)?)
    }

    pub fn stream(&self, prediction: &Prediction) -> Result<EventStream> {
        let url = prediction
            .urls
            .stream
            .as_deref()
            .ok_or_else(|| Error::config(format!("prediction {} does not support streaming", prediction.id)))?;
        self.client.open_stream(url)
    }

    pub fn output_iterator(self, prediction: Prediction) -> OutputIterator<'a> {
        OutputIterator {
            client: self.client,
            schedule: PollSchedule::from_config(self.client.config()),
            prediction,
            feed: OutputFeed::default(),
        }
    }
}

/// Blocking iterator over the chunks of a growing array output.
pub struct OutputIterator<'a> {
    client: &'a Client,
    prediction: Prediction,
    feed: OutputFeed,
    schedule: PollSchedule,
}

impl OutputIterator<'_> {
    /// The prediction as of the last poll.
    pub fn prediction(&self) -> &Prediction {
        &self.prediction
    }

    pub fn into_prediction(self) -> Prediction {
        self.prediction
    }
}

impl Iterator for OutputIterator<'_> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.feed.step(&self.prediction) {
                FeedStep::Chunk(chunk) => return Some(Ok(chunk)),
                FeedStep::Failed(error) => return Some(Err(error.into())),
                FeedStep::Done => return None,
                FeedStep::Poll => {
                    std::thread::sleep(self.schedule.next_delay());
                    if let Err(e) = self.client.reload_job(&mut self.prediction) {
                        self.feed.abort();
                        return Some(Err(e));
                    }
                }
            }
        }
    }
}

// ── Trainings ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct Trainings<'a> {
    client: &'a Client,
}

impl<'a> Trainings<'a> {
    pub fn create(&self, version: &str, params: CreateTraining) -> Result<Training> {
        let training: Training = self.client.call("training", routes::create_training(version, &params)?)?;
        debug!("Created training {} ({})", training.id, training.status);
        Ok(training)
    }

    pub fn get(&self, id: &str) -> Result<Training> {
        self.client.call("training", routes::training(id)?)
    }

    pub fn list(&self, cursor: Cursor) -> Result<Page<Training>> {
        self.client.call("training page", routes::trainings(&cursor)?)
    }

    pub fn pages(self) -> Paginator<impl FnMut(Cursor) -> Result<Page<Training>> + 'a> {
        paginate(move |cursor| self.list(cursor))
    }

    pub fn reload(&self, training: &mut Training) -> Result<()> {
        self.client.reload_job(training)
    }

    pub fn wait(&self, training: &mut Training) -> Result<()> {
        self.client.wait_job(training)
    }

    pub fn cancel(&self, training: &mut Training) -> Result<()> {
        self.client.cancel_job(training)
    }

    pub fn cancel_by_id(&self, id: &str) -> Result<Training> {
        self.client.call("training", routes::cancel_training(id)?)
    }
}
