//! Request payloads for ingestion and retrieval.
//!
//! An [`IngestionPayload`] is the single serialized argument of an ingestion
//! job. It is validated with [`IngestionPayload::validate`] before any
//! worker is created: the asset type must be known and `reader_kwargs`
//! must have exactly the shape that asset type's reader expects.
//!
//! ```json
//! {
//!   "asset_type": "github",
//!   "asset_id": "repo-42",
//!   "owner": "alice",
//!   "reader_kwargs": { "owner": "acme", "repo": "widgets", "branch": "main" },
//!   "extra_metadata": { "team": "platform" }
//! }
//! ```

use std::fmt;
use std::str::FromStr;

use context_pipeline_core::models::Metadata;
use context_pipeline_core::{PipelineError, Result};
use serde::{Deserialize, Serialize};

/// Source kinds an ingestion job can read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    Github,
    S3,
}

impl AssetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::Github => "github",
            AssetType::S3 => "s3",
        }
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetType {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "github" => Ok(AssetType::Github),
            "s3" => Ok(AssetType::S3),
            other => Err(PipelineError::UnsupportedAssetType(other.to_string())),
        }
    }
}

/// Arguments of the GitHub reader.
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GithubReaderArgs {
    pub owner: String,
    pub repo: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default)]
    pub github_token: Option<String>,
}

fn default_branch() -> String {
    "main".to_string()
}

impl fmt::Debug for GithubReaderArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GithubReaderArgs")
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .field("branch", &self.branch)
            .field("github_token", &self.github_token.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Arguments of the S3 reader.
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct S3ReaderArgs {
    pub bucket_name: String,
    pub access_key: String,
    pub secret_key: String,
    /// Custom endpoint (MinIO, R2, ...). Uses path-style addressing.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub prefix: Option<String>,
}

impl fmt::Debug for S3ReaderArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3ReaderArgs")
            .field("bucket_name", &self.bucket_name)
            .field("access_key", &self.access_key)
            .field("secret_key", &"***")
            .field("endpoint", &self.endpoint)
            .field("prefix", &self.prefix)
            .finish()
    }
}

/// Reader arguments resolved against the declared asset type.
#[derive(Debug, Clone)]
pub enum ReaderSpec {
    Github(GithubReaderArgs),
    S3(S3ReaderArgs),
}

impl ReaderSpec {
    pub fn asset_type(&self) -> AssetType {
        match self {
            ReaderSpec::Github(_) => AssetType::Github,
            ReaderSpec::S3(_) => AssetType::S3,
        }
    }
}

/// The ingestion job argument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionPayload {
    pub asset_type: String,
    pub asset_id: String,
    /// Uploader identity stamped on every document.
    pub owner: String,
    pub reader_kwargs: serde_json::Value,
    #[serde(default)]
    pub extra_metadata: Metadata,
}

impl IngestionPayload {
    /// Parse a payload from its serialized JSON form.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| PipelineError::InvalidPayload(e.to_string()))
    }

    /// Resolve the reader arguments, failing closed on unknown asset types
    /// and on arguments that do not match the declared type.
    pub fn validate(&self) -> Result<ReaderSpec> {
        let asset_type: AssetType = self.asset_type.parse()?;

        if self.asset_id.trim().is_empty() {
            return Err(PipelineError::InvalidPayload(
                "asset_id must not be empty".to_string(),
            ));
        }

        let kwargs = self.reader_kwargs.clone();
        let spec = match asset_type {
            AssetType::Github => ReaderSpec::Github(
                serde_json::from_value(kwargs).map_err(|e| kwargs_error(asset_type, e))?,
            ),
            AssetType::S3 => ReaderSpec::S3(
                serde_json::from_value(kwargs).map_err(|e| kwargs_error(asset_type, e))?,
            ),
        };
        Ok(spec)
    }
}

fn kwargs_error(asset_type: AssetType, e: serde_json::Error) -> PipelineError {
    PipelineError::InvalidPayload(format!(
        "reader_kwargs do not match asset type '{}': {}",
        asset_type, e
    ))
}

/// A retrieval request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalPayload {
    pub query: String,
    #[serde(default)]
    pub asset_ids: Vec<String>,
    #[serde(default = "default_num_contexts")]
    pub num_contexts: usize,
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,
}

fn default_num_contexts() -> usize {
    10
}
fn default_score_threshold() -> f32 {
    1.0
}
