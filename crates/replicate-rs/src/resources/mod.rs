//! Typed records for every resource the API returns, plus the parameter
//! types for creating predictions and trainings.
//!
//! Records are plain `serde` structs; parsing a response body is the only
//! validation boundary. Fields the server may omit are `Option`.

pub mod model;
pub mod platform;
pub mod prediction;
pub mod training;

pub use model::{Model, ModelIdentifier, ModelRef, ModelVersionIdentifier, Version};
pub use platform::{Account, Collection, Deployment, DeploymentRelease, Hardware};
pub use prediction::{CreatePrediction, MAX_SYNC_WAIT_SECS, Prediction, WebhookEvent};
pub use training::{CreateTraining, Training};
