//! Deterministic fakes shared by the integration tests. Nothing here loads
//! a model or touches the network.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use context_pipeline::config::Config;
use context_pipeline_core::embedding::Embedder;
use context_pipeline_core::models::Metadata;
use context_pipeline_core::rerank::CrossEncoder;
use context_pipeline_core::{PipelineError, Result};
use context_pipeline::embedding::EmbedderFactory;
use context_pipeline::ingest::IngestStage;
use context_pipeline::payload::AssetType;
use context_pipeline::progress::{ProgressEvent, ProgressReporter};
use context_pipeline::reader::{RawItem, Reader, ReaderContext};

pub const DIMS: usize = 16;

pub fn config(toml: &str) -> Arc<Config> {
    Arc::new(Config::from_toml(toml).expect("test config"))
}

/// Bag-of-words hashing embedder: identical text gives identical vectors.
pub struct HashEmbedder;

impl HashEmbedder {
    pub fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; DIMS];
        for token in text.split_whitespace() {
            let h = token
                .bytes()
                .fold(2166136261u32, |h, b| (h ^ b as u32).wrapping_mul(16777619));
            v[h as usize % DIMS] += 1.0;
        }
        if v.iter().all(|x| *x == 0.0) {
            v[0] = 1.0;
        }
        v
    }
}

impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash"
    }
    fn dims(&self) -> usize {
        DIMS
    }
    fn embed_texts(&mut self, texts: &[String], _batch_size: usize) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }
}

/// Factory for [`HashEmbedder`] that counts how many models were built.
pub fn hash_factory(built: Arc<AtomicUsize>) -> EmbedderFactory {
    Arc::new(move || {
        built.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(HashEmbedder) as Box<dyn Embedder>)
    })
}

/// Embedder whose every call fails.
pub struct BrokenEmbedder;

impl Embedder for BrokenEmbedder {
    fn model_name(&self) -> &str {
        "broken"
    }
    fn dims(&self) -> usize {
        DIMS
    }
    fn embed_texts(&mut self, _texts: &[String], _batch_size: usize) -> Result<Vec<Vec<f32>>> {
        Err(PipelineError::Embedding {
            provider: "broken".into(),
            message: "model crashed".into(),
        })
    }
}

/// Embedder that returns one vector fewer than asked for.
pub struct ShortEmbedder;

impl Embedder for ShortEmbedder {
    fn model_name(&self) -> &str {
        "short"
    }
    fn dims(&self) -> usize {
        DIMS
    }
    fn embed_texts(&mut self, texts: &[String], _batch_size: usize) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().skip(1).map(|t| HashEmbedder::vector(t)).collect())
    }
}

/// Embedder with a fixed text → vector table; unknown text maps to the
/// last axis.
pub struct TableEmbedder {
    pub table: HashMap<String, Vec<f32>>,
    pub dims: usize,
}

impl Embedder for TableEmbedder {
    fn model_name(&self) -> &str {
        "table"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    fn embed_texts(&mut self, texts: &[String], _batch_size: usize) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                self.table.get(t).cloned().unwrap_or_else(|| {
                    let mut v = vec![0.0; self.dims];
                    v[self.dims - 1] = 1.0;
                    v
                })
            })
            .collect())
    }
}

/// Cross-encoder with a fixed text → score table (0.0 for unknown text).
/// Records every candidate list it was asked to score.
#[derive(Clone, Default)]
pub struct TableEncoder {
    pub scores: HashMap<String, f32>,
    pub calls: Arc<Mutex<Vec<Vec<String>>>>,
}

impl TableEncoder {
    pub fn new(scores: &[(&str, f32)]) -> Self {
        Self {
            scores: scores.iter().map(|(t, s)| (t.to_string(), *s)).collect(),
            calls: Arc::default(),
        }
    }

    pub fn seen(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

impl CrossEncoder for TableEncoder {
    fn model_name(&self) -> &str {
        "table"
    }
    fn score(&mut self, _query: &str, documents: &[String], _batch_size: usize) -> Result<Vec<f32>> {
        self.calls.lock().unwrap().push(documents.to_vec());
        Ok(documents
            .iter()
            .map(|d| self.scores.get(d).copied().unwrap_or(0.0))
            .collect())
    }
}

/// Reader serving a fixed list of files.
pub struct StaticReader {
    pub files: Vec<(String, String)>,
}

impl StaticReader {
    pub fn new(files: &[(&str, &str)]) -> Self {
        Self {
            files: files
                .iter()
                .map(|(n, t)| (n.to_string(), t.to_string()))
                .collect(),
        }
    }
}

#[async_trait]
impl Reader for StaticReader {
    fn asset_type(&self) -> AssetType {
        AssetType::Github
    }

    async fn load_raw(&self) -> Result<Vec<RawItem>> {
        Ok(self
            .files
            .iter()
            .map(|(name, text)| {
                let mut metadata = Metadata::new();
                metadata.insert("file_name".into(), name.clone().into());
                metadata.insert("file_path".into(), format!("src/{}", name).into());
                RawItem {
                    text: text.clone(),
                    metadata,
                }
            })
            .collect())
    }
}

/// Reader whose source is always unreachable.
pub struct UnreachableReader;

#[async_trait]
impl Reader for UnreachableReader {
    fn asset_type(&self) -> AssetType {
        AssetType::S3
    }

    async fn load_raw(&self) -> Result<Vec<RawItem>> {
        Err(PipelineError::SourceUnavailable {
            source_kind: "s3".into(),
            message: "connection refused".into(),
        })
    }
}

pub fn reader_context(asset_id: &str) -> ReaderContext {
    ReaderContext {
        asset_id: asset_id.to_string(),
        uploaded_by: "tester".to_string(),
        extra_metadata: Metadata::new(),
    }
}

/// Progress reporter that keeps every event.
#[derive(Default)]
pub struct RecordingProgress {
    pub events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgress {
    pub fn started_stages(&self) -> Vec<IngestStage> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::StageStarted { stage, .. } => Some(*stage),
                _ => None,
            })
            .collect()
    }
}

impl ProgressReporter for RecordingProgress {
    fn report(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// One object served by [`spawn_mock_s3`].
#[derive(Clone)]
pub struct MockObject {
    pub key: String,
    pub body: Vec<u8>,
}

impl MockObject {
    pub fn text(key: &str, body: &str) -> Self {
        Self {
            key: key.to_string(),
            body: body.as_bytes().to_vec(),
        }
    }
}

pub const MOCK_ACCESS_KEY: &str = "AKIDTEST";
/// Objects per `ListObjectsV2` page, small so pagination is exercised.
const MOCK_PAGE_SIZE: usize = 2;

#[derive(Clone)]
struct MockBucket {
    name: String,
    objects: Arc<Vec<MockObject>>,
}

/// Serve `objects` from `bucket` with path-style S3 routes on an ephemeral
/// port. Returns the endpoint URL.
pub async fn spawn_mock_s3(bucket: &str, objects: Vec<MockObject>) -> String {
    use axum::routing::get;

    let state = MockBucket {
        name: bucket.to_string(),
        objects: Arc::new(objects),
    };
    let app = axum::Router::new()
        .route("/{bucket}", get(mock_list))
        .route("/{bucket}/{*key}", get(mock_get))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn authorized(headers: &axum::http::HeaderMap) -> bool {
    let expected = format!("AWS4-HMAC-SHA256 Credential={}/", MOCK_ACCESS_KEY);
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with(&expected) && v.contains("Signature="))
        .unwrap_or(false)
        && headers.contains_key("x-amz-date")
}

async fn mock_list(
    axum::extract::State(state): axum::extract::State<MockBucket>,
    axum::extract::Path(bucket): axum::extract::Path<String>,
    axum::extract::Query(params): axum::extract::Query<HashMap<String, String>>,
    headers: axum::http::HeaderMap,
) -> axum::response::Response {
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    if !authorized(&headers) {
        return (StatusCode::FORBIDDEN, "<Error><Code>AccessDenied</Code></Error>").into_response();
    }
    if bucket != state.name {
        return (StatusCode::NOT_FOUND, "<Error><Code>NoSuchBucket</Code></Error>").into_response();
    }

    let prefix = params.get("prefix").cloned().unwrap_or_default();
    let start: usize = params
        .get("continuation-token")
        .and_then(|t| t.parse().ok())
        .unwrap_or(0);
    let matching: Vec<&MockObject> = state
        .objects
        .iter()
        .filter(|o| o.key.starts_with(&prefix))
        .collect();
    let page: Vec<&&MockObject> = matching.iter().skip(start).take(MOCK_PAGE_SIZE).collect();
    let next = start + page.len();
    let truncated = next < matching.len();

    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?><ListBucketResult>");
    xml.push_str(&format!("<Name>{}</Name><Prefix>{}</Prefix>", state.name, prefix));
    for object in page {
        xml.push_str(&format!(
            "<Contents><Key>{}</Key><ETag>&quot;etag-{}&quot;</ETag><Size>{}</Size></Contents>",
            object.key,
            object.body.len(),
            object.body.len()
        ));
    }
    xml.push_str(&format!("<IsTruncated>{}</IsTruncated>", truncated));
    if truncated {
        xml.push_str(&format!("<NextContinuationToken>{}</NextContinuationToken>", next));
    }
    xml.push_str("</ListBucketResult>");
    xml.into_response()
}

async fn mock_get(
    axum::extract::State(state): axum::extract::State<MockBucket>,
    axum::extract::Path((bucket, key)): axum::extract::Path<(String, String)>,
    headers: axum::http::HeaderMap,
) -> axum::response::Response {
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    if !authorized(&headers) {
        return StatusCode::FORBIDDEN.into_response();
    }
    match state.objects.iter().find(|o| bucket == state.name && o.key == key) {
        Some(object) => object.body.clone().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
