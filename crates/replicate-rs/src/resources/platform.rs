//! Read-only platform records: accounts, collections, deployments, hardware.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::model::Model;

/// The account that owns the API token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// `user` or `organization`.
    #[serde(rename = "type")]
    pub kind: String,
    pub username: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub github_url: Option<String>,
}

/// A curated group of models.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Only populated when fetching a single collection.
    #[serde(default)]
    pub models: Option<Vec<Model>>,
}

/// A deployment: a named, configurable endpoint in front of a model version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub owner: String,
    pub name: String,
    #[serde(default)]
    pub current_release: Option<DeploymentRelease>,
}

impl Deployment {
    /// `owner/name`.
    pub fn id(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRelease {
    pub number: u64,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub configuration: Value,
}

/// A hardware class a model can run on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hardware {
    pub sku: String,
    pub name: String,
}
