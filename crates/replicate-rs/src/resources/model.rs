use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::job::OutputKind;

/// A model hosted on the platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub owner: String,
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub visibility: Option<String>,
    #[serde(default)]
    pub github_url: Option<String>,
    #[serde(default)]
    pub paper_url: Option<String>,
    #[serde(default)]
    pub license_url: Option<String>,
    #[serde(default)]
    pub run_count: Option<u64>,
    #[serde(default)]
    pub cover_image_url: Option<String>,
    #[serde(default)]
    pub default_example: Option<Value>,
    #[serde(default)]
    pub latest_version: Option<Version>,
}

impl Model {
    pub fn identifier(&self) -> ModelIdentifier {
        ModelIdentifier {
            owner: self.owner.clone(),
            name: self.name.clone(),
        }
    }
}

/// An immutable snapshot of a model's code and weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Version {
    pub id: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cog_version: Option<String>,
    #[serde(default)]
    pub openapi_schema: Value,
}

impl Version {
    /// How this version declares its output.
    pub fn output_kind(&self) -> OutputKind {
        OutputKind::from_schema(&self.openapi_schema, self.cog_version.as_deref())
    }
}

// ── Identifiers ────────────────────────────────────────────────────

/// `owner/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelIdentifier {
    pub owner: String,
    pub name: String,
}

impl ModelIdentifier {
    pub(crate) fn path(&self) -> String {
        format!("/v1/models/{}/{}", self.owner, self.name)
    }
}

impl FromStr for ModelIdentifier {
    type Err = Error;

    fn from_str(reference: &str) -> Result<Self> {
        match reference.split_once('/') {
            Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains(':') => Ok(Self {
                owner: owner.to_string(),
                name: name.to_string(),
            }),
            _ => Err(Error::config(format!(
                "invalid model reference {reference:?}; expected owner/name"
            ))),
        }
    }
}

impl fmt::Display for ModelIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// `owner/name:version`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelVersionIdentifier {
    pub owner: String,
    pub name: String,
    pub version: String,
}

impl ModelVersionIdentifier {
    pub fn model(&self) -> ModelIdentifier {
        ModelIdentifier {
            owner: self.owner.clone(),
            name: self.name.clone(),
        }
    }
}

impl FromStr for ModelVersionIdentifier {
    type Err = Error;

    fn from_str(reference: &str) -> Result<Self> {
        let invalid = || {
            Error::config(format!(
                "invalid model version reference {reference:?}; expected owner/name:version"
            ))
        };
        let (owner, rest) = reference.split_once('/').ok_or_else(invalid)?;
        let (name, version) = rest.split_once(':').ok_or_else(invalid)?;
        if owner.is_empty() || name.is_empty() || version.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
            version: version.to_string(),
        })
    }
}

impl fmt::Display for ModelVersionIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.owner, self.name, self.version)
    }
}

/// What `run` and `stream` accept: a model, a pinned version of a model, or
/// a bare version id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelRef {
    Model(ModelIdentifier),
    Version(ModelVersionIdentifier),
    VersionId(String),
}

impl FromStr for ModelRef {
    type Err = Error;

    fn from_str(reference: &str) -> Result<Self> {
        if reference.contains(':') {
            reference.parse().map(ModelRef::Version)
        } else if reference.contains('/') {
            reference.parse().map(ModelRef::Model)
        } else if reference.is_empty() {
            Err(Error::config(
                "empty model reference; expected owner/name, owner/name:version or a version id",
            ))
        } else {
            Ok(ModelRef::VersionId(reference.to_string()))
        }
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelRef::Model(m) => fmt::Display::fmt(m, f),
            ModelRef::Version(v) => fmt::Display::fmt(v, f),
            ModelRef::VersionId(id) => f.write_str(id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_model_identifier() {
        let id: ModelIdentifier = "meta/llama-2-70b-chat".parse().unwrap();
        assert_eq!(id.owner, "meta");
        assert_eq!(id.name, "llama-2-70b-chat");
        assert_eq!(id.path(), "/v1/models/meta/llama-2-70b-chat");
        assert!("llama".parse::<ModelIdentifier>().is_err());
        assert!("/name".parse::<ModelIdentifier>().is_err());
        assert!("owner/name:v".parse::<ModelIdentifier>().is_err());
    }

    #[test]
    fn parses_model_version_identifier() {
        let id: ModelVersionIdentifier = "stability-ai/sdxl:39ed52f2".parse().unwrap();
        assert_eq!(id.owner, "stability-ai");
        assert_eq!(id.name, "sdxl");
        assert_eq!(id.version, "39ed52f2");
        assert_eq!(id.to_string(), "stability-ai/sdxl:39ed52f2");
        assert!("stability-ai/sdxl".parse::<ModelVersionIdentifier>().is_err());
        assert!("stability-ai/sdxl:".parse::<ModelVersionIdentifier>().is_err());
    }

    #[test]
    fn model_ref_forms() {
        assert!(matches!("a/b".parse::<ModelRef>().unwrap(), ModelRef::Model(_)));
        assert!(matches!("a/b:c".parse::<ModelRef>().unwrap(), ModelRef::Version(_)));
        assert_eq!("5c7d5dc6".parse::<ModelRef>().unwrap(), ModelRef::VersionId("5c7d5dc6".into()));
        assert!(matches!("".parse::<ModelRef>(), Err(Error::Config(_))));
        assert!(matches!("a:b".parse::<ModelRef>(), Err(Error::Config(_))));
    }

    #[test]
    fn version_output_kind_reads_schema() {
        let version: Version = serde_json::from_value(json!({
            "id": "v1",
            "cog_version": "0.8.6",
            "openapi_schema": {"components": {"schemas": {"Output": {
                "type": "array",
                "items": {"type": "string"},
                "x-cog-array-type": "iterator",
                "x-cog-array-display": "concatenate"
            }}}}
        }))
        .unwrap();
        assert_eq!(version.output_kind(), OutputKind::ConcatenateIterator);
    }

    #[test]
    fn model_with_latest_version() {
        let model: Model = serde_json::from_value(json!({
            "owner": "replicate",
            "name": "hello-world",
            "visibility": "public",
            "run_count": 12345,
            "latest_version": {"id": "5c7d", "openapi_schema": {}}
        }))
        .unwrap();
        assert_eq!(model.identifier().to_string(), "replicate/hello-world");
        assert_eq!(model.latest_version.map(|v| v.id).as_deref(), Some("5c7d"));
    }
}
