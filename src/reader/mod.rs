//! Readers: turn an external source into normalized [`Document`]s.
//!
//! Every source kind implements the [`Reader`] trait, which only fetches raw
//! items (`text` + source metadata). Normalization is shared and lives in
//! [`into_documents`]:
//!
//! 1. start from the item's own metadata,
//! 2. apply the caller's `extra_metadata` on top (caller wins on collision),
//! 3. stamp `doc_id`, `asset_id` and `uploaded_by`,
//! 4. take `filename` / `filepath` from the `file_name` / `file_path` keys,
//! 5. mark the document with the read-successful status.
//!
//! [`create_reader`] is the only place that maps an asset type to a reader
//! variant; it fails closed on anything it does not know.
//!
//! | Asset type | Reader | Source |
//! |------------|--------|--------|
//! | `github` | [`github::GithubReader`] | shallow `git clone` of a repository |
//! | `s3` | [`s3::S3Reader`] | `ListObjectsV2` + `GetObject`, SigV4 signed |

pub mod github;
pub mod s3;

use async_trait::async_trait;
use context_pipeline_core::models::{Document, Metadata};
use context_pipeline_core::{PipelineError, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::config::Config;
use crate::payload::{AssetType, IngestionPayload, ReaderSpec};

/// Metadata key a reader stores the item's file name under.
pub const FILE_NAME_KEY: &str = "file_name";
/// Metadata key a reader stores the item's path under.
pub const FILE_PATH_KEY: &str = "file_path";

/// One item fetched from a source, before normalization.
#[derive(Debug, Clone)]
pub struct RawItem {
    pub text: String,
    pub metadata: Metadata,
}

/// A source of raw items for one asset.
#[async_trait]
pub trait Reader: Send + Sync {
    fn asset_type(&self) -> AssetType;

    /// Fetch every item of the source. Fails with
    /// [`PipelineError::SourceUnavailable`] when the source cannot be reached.
    async fn load_raw(&self) -> Result<Vec<RawItem>>;
}

/// Identity and caller metadata applied to every document of a job.
#[derive(Debug, Clone)]
pub struct ReaderContext {
    pub asset_id: String,
    pub uploaded_by: String,
    pub extra_metadata: Metadata,
}

impl ReaderContext {
    pub fn from_payload(payload: &IngestionPayload) -> Self {
        Self {
            asset_id: payload.asset_id.clone(),
            uploaded_by: payload.owner.clone(),
            extra_metadata: payload.extra_metadata.clone(),
        }
    }
}

/// Normalize raw items into documents, each with a fresh `doc_id`.
pub fn into_documents(items: Vec<RawItem>, ctx: &ReaderContext) -> Vec<Document> {
    items
        .into_iter()
        .map(|item| {
            let mut doc = Document::new(&ctx.asset_id, &ctx.uploaded_by, item.text);

            let mut metadata = item.metadata;
            for (key, value) in &ctx.extra_metadata {
                metadata.insert(key.clone(), value.clone());
            }
            metadata.insert("doc_id".into(), doc.doc_id.clone().into());
            metadata.insert("asset_id".into(), ctx.asset_id.clone().into());
            metadata.insert("uploaded_by".into(), ctx.uploaded_by.clone().into());

            doc.filename = string_field(&metadata, FILE_NAME_KEY);
            doc.filepath = string_field(&metadata, FILE_PATH_KEY);
            doc.metadata = metadata;
            doc
        })
        .collect()
}

fn string_field(metadata: &Metadata, key: &str) -> Option<String> {
    metadata.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

/// Load and normalize every document of the reader's source.
pub async fn load_documents(reader: &dyn Reader, ctx: &ReaderContext) -> Result<Vec<Document>> {
    let items = reader.load_raw().await?;
    Ok(into_documents(items, ctx))
}

/// Build the reader for a payload. Unknown asset types and reader arguments
/// of the wrong shape are rejected here, before any work starts.
pub fn create_reader(payload: &IngestionPayload, config: &Config) -> Result<Box<dyn Reader>> {
    match payload.validate()? {
        ReaderSpec::Github(args) => Ok(Box::new(github::GithubReader::new(
            args,
            config.github.clone(),
        )?)),
        ReaderSpec::S3(args) => Ok(Box::new(s3::S3Reader::new(args, config.s3.clone())?)),
    }
}

/// Build a [`GlobSet`] from a list of glob pattern strings.
pub(crate) fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| PipelineError::Config(format!("invalid glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| PipelineError::Config(format!("invalid glob set: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(extra: serde_json::Value) -> ReaderContext {
        ReaderContext {
            asset_id: "asset-7".into(),
            uploaded_by: "alice".into(),
            extra_metadata: extra.as_object().cloned().unwrap_or_default(),
        }
    }

    fn item(text: &str, metadata: serde_json::Value) -> RawItem {
        RawItem {
            text: text.into(),
            metadata: metadata.as_object().cloned().unwrap(),
        }
    }

    #[test]
    fn test_metadata_merge_order() {
        let docs = into_documents(
            vec![item(
                "body",
                json!({"file_name": "a.py", "file_path": "src/a.py", "team": "base", "lang": "py"}),
            )],
            &ctx(json!({"team": "override", "project": "x"})),
        );
        let doc = &docs[0];

        assert_eq!(doc.metadata["team"], "override");
        assert_eq!(doc.metadata["lang"], "py");
        assert_eq!(doc.metadata["project"], "x");
        assert_eq!(doc.metadata["doc_id"], doc.doc_id.as_str());
        assert_eq!(doc.metadata["asset_id"], "asset-7");
        assert_eq!(doc.metadata["uploaded_by"], "alice");
        assert_eq!(doc.filename.as_deref(), Some("a.py"));
        assert_eq!(doc.filepath.as_deref(), Some("src/a.py"));
        assert_eq!(doc.status, "Read");
        assert_eq!(doc.uploaded_by, "alice");
    }

    #[test]
    fn test_fresh_doc_ids() {
        let docs = into_documents(
            vec![item("a", json!({})), item("a", json!({}))],
            &ctx(json!({})),
        );
        assert_ne!(docs[0].doc_id, docs[1].doc_id);
        assert!(docs[0].filename.is_none());
    }

    #[test]
    fn test_create_reader_rejects_unknown_type() {
        let payload = IngestionPayload {
            asset_type: "ftp".into(),
            asset_id: "a".into(),
            owner: "o".into(),
            reader_kwargs: json!({}),
            extra_metadata: Metadata::new(),
        };
        let err = create_reader(&payload, &Config::default()).err().unwrap();
        assert!(matches!(err, PipelineError::UnsupportedAssetType(_)));
    }

    #[test]
    fn test_create_reader_github() {
        let payload = IngestionPayload {
            asset_type: "github".into(),
            asset_id: "a".into(),
            owner: "o".into(),
            reader_kwargs: json!({"owner": "acme", "repo": "widgets"}),
            extra_metadata: Metadata::new(),
        };
        let reader = create_reader(&payload, &Config::default()).unwrap();
        assert_eq!(reader.asset_type(), AssetType::Github);
    }

    #[test]
    fn test_bad_glob_is_config_error() {
        assert!(matches!(
            build_globset(&["a[".to_string()]),
            Err(PipelineError::Config(_))
        ));
    }
}
