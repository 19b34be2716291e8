//! Rust client for the Replicate prediction and training API.
//!
//! `replicate-rs` creates, polls, cancels and streams remote jobs
//! ("predictions" and "trainings") and exposes models, versions,
//! deployments, collections and hardware as typed records. No computation
//! happens locally; every operation is one or more HTTPS calls.
//!
//! Three pieces carry the weight:
//!
//! - a retry transport ([`RetryTransport`]) with exponential backoff, jitter
//!   and `Retry-After` support, shared by every request;
//! - the job lifecycle (create, reload, wait, cancel, stream, output
//!   iteration) in [`job`] and the two clients;
//! - lazy cursor pagination ([`paginate`], [`paginate_async`]).
//!
//! # Getting started
//!
//! ```no_run
//! use replicate_rs::blocking::Client;
//! use replicate_rs::{ClientConfig, CreatePrediction};
//! use serde_json::json;
//!
//! fn main() -> replicate_rs::Result<()> {
//!     // Reads REPLICATE_API_TOKEN.
//!     let client = Client::new(ClientConfig::from_env())?;
//!
//!     // Run to completion.
//!     let output = client.run("replicate/hello-world", json!({"text": "Alice"}))?;
//!     println!("{output}");
//!
//!     // Or drive the lifecycle yourself.
//!     let mut prediction = client
//!         .models()
//!         .predictions()
//!         .create("replicate/hello-world", CreatePrediction::new(json!({"text": "Bob"})))?;
//!     client.predictions().wait(&mut prediction)?;
//!     println!("{} {:?}", prediction.status, prediction.output);
//!     Ok(())
//! }
//! ```
//!
//! The async [`Client`] has the same namespaces with `async` methods,
//! `Stream`s in place of iterators, and [`AsyncEventStream`] for SSE.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`api`] | Requests, retry transport, pagination, SSE streaming |
//! | [`job`] | Job status machine, polling schedule, incremental output |
//! | [`resources`] | Typed records and create parameters |
//! | [`client`] / [`blocking`] | Async and blocking clients |
//! | [`config`] | [`ClientConfig`] and environment variables |
//! | [`error`] | [`Error`], [`ApiError`], [`ModelError`] |
//! | [`webhook`] | Webhook signing secret and delivery validation |

pub mod api;
pub mod blocking;
pub mod client;
pub mod config;
pub mod error;
pub mod job;
pub mod prelude;
pub mod resources;
pub mod webhook;

// ── Constants ──────────────────────────────────────────────────────

pub const DEFAULT_BASE_URL: &str = "https://api.replicate.com";

/// Sent as `User-Agent` unless overridden in [`ClientConfig`].
pub const USER_AGENT: &str = concat!("replicate-rs/", env!("CARGO_PKG_VERSION"));

// ── Re-exports ─────────────────────────────────────────────────────

pub use api::{
    AsyncEventStream, AsyncTransport, Cursor, EventStream, EventType, Page, Paginator, RetryConfig, RetryTransport,
    ServerSentEvent, Transport, paginate, paginate_async,
};
pub use client::Client;
pub use config::ClientConfig;
pub use error::{ApiError, Error, ModelError, Result};
pub use job::{Job, JobUrls, OutputKind, Status};
pub use resources::{
    Account, Collection, CreatePrediction, CreateTraining, Deployment, Hardware, Model, ModelIdentifier, ModelRef,
    ModelVersionIdentifier, Prediction, Training, Version, WebhookEvent,
};
pub use webhook::{WebhookError, WebhookSigningSecret};
