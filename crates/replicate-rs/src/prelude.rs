//! Convenience re-exports for common `replicate-rs` types.
//!
//! ```ignore
//! use replicate_rs::prelude::*;
//! ```
//!
//! Covers the clients, configuration, records and errors most programs
//! touch. Transport internals and the SSE decoder are left out; import
//! those from [`crate::api`] when needed.

// ── Clients and configuration ───────────────────────────────────────
pub use crate::blocking::Client as BlockingClient;
pub use crate::{Client, ClientConfig, RetryConfig};

// ── Records ─────────────────────────────────────────────────────────
pub use crate::{CreatePrediction, CreateTraining, Model, Prediction, Status, Training, Version};

// ── Iteration ───────────────────────────────────────────────────────
pub use crate::{Cursor, EventType, Page, ServerSentEvent};

// ── Errors ──────────────────────────────────────────────────────────
pub use crate::{ApiError, Error, ModelError, Result};
