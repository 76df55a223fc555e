//! TOML configuration.
//!
//! One [`Config`] is loaded at startup and handed to every component
//! constructor. Every section and key has a default, so an empty file (or
//! no file at all) yields a working local setup:
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8000"
//!
//! [ingestion]
//! max_job_workers = 2
//! parallel_jobs = 1
//! embed_job_batch_size = 2
//!
//! [chunking]
//! chunk_size = 1000
//! chunk_overlap = 100
//!
//! [embedding]
//! provider = "local"          # local | openai
//! model = "bge-small-en-v1.5"
//! dims = 384
//!
//! [vector_store]
//! url = "http://127.0.0.1:6334"
//! collection = "default"
//! ```
//!
//! `vector_store.api_key` falls back to the `QDRANT_API_KEY` environment
//! variable when not set in the file.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub reranker: RerankerConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub s3: S3Config,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestionConfig {
    /// Compute slots available to all ingestion jobs together.
    #[serde(default = "default_max_job_workers")]
    pub max_job_workers: usize,
    /// Jobs allowed to run at the same time.
    #[serde(default = "default_parallel_jobs")]
    pub parallel_jobs: usize,
    /// Chunks per embedding work unit.
    #[serde(default = "default_embed_job_batch_size")]
    pub embed_job_batch_size: usize,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            max_job_workers: default_max_job_workers(),
            parallel_jobs: default_parallel_jobs(),
            embed_job_batch_size: default_embed_job_batch_size(),
        }
    }
}

impl IngestionConfig {
    /// Workers each job's pools are sized to.
    pub fn workers_per_job(&self) -> usize {
        (self.max_job_workers / self.parallel_jobs.max(1)).max(1)
    }
}

fn default_max_job_workers() -> usize {
    2
}
fn default_parallel_jobs() -> usize {
    1
}
fn default_embed_job_batch_size() -> usize {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Base URL of an OpenAI-compatible API (`openai` provider only).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_embedding_model(),
            dims: default_dims(),
            batch_size: default_batch_size(),
            url: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_embedding_model() -> String {
    "bge-small-en-v1.5".to_string()
}
fn default_dims() -> usize {
    384
}
fn default_batch_size() -> usize {
    10
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RerankerConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_reranker_model")]
    pub model: String,
    #[serde(default = "default_rerank_batch_size")]
    pub batch_size: usize,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_reranker_model(),
            batch_size: default_rerank_batch_size(),
        }
    }
}

fn default_reranker_model() -> String {
    "bge-reranker-base".to_string()
}
fn default_rerank_batch_size() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Candidates requested from the index per requested result.
    #[serde(default = "default_over_fetch_factor")]
    pub over_fetch_factor: usize,
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    #[serde(default = "default_score_threshold")]
    pub default_score_threshold: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            over_fetch_factor: default_over_fetch_factor(),
            default_limit: default_limit(),
            default_score_threshold: default_score_threshold(),
        }
    }
}

fn default_over_fetch_factor() -> usize {
    10
}
fn default_limit() -> usize {
    10
}
fn default_score_threshold() -> f32 {
    1.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorStoreConfig {
    #[serde(default = "default_qdrant_url")]
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_upload_batch_size")]
    pub upload_batch_size: usize,
    #[serde(default = "default_upload_parallelism")]
    pub upload_parallelism: usize,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            url: default_qdrant_url(),
            api_key: None,
            collection: default_collection(),
            upload_batch_size: default_upload_batch_size(),
            upload_parallelism: default_upload_parallelism(),
        }
    }
}

fn default_qdrant_url() -> String {
    "http://127.0.0.1:6334".to_string()
}
fn default_collection() -> String {
    "default".to_string()
}
fn default_upload_batch_size() -> usize {
    64
}
fn default_upload_parallelism() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct GithubConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_true")]
    pub shallow: bool,
    #[serde(default = "default_github_base")]
    pub api_base: String,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            shallow: true,
            api_base: default_github_base(),
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*".to_string()]
}
fn default_true() -> bool {
    true
}
fn default_github_base() -> String {
    "https://github.com".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct S3Config {
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            region: default_region(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Level for everything without a module override.
    #[serde(default = "default_log_level")]
    pub default: String,
    /// Per-module levels, e.g. `context_pipeline::pool = "debug"`.
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Parse a TOML string, apply environment fallbacks, and validate.
    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(content).with_context(|| "Failed to parse config file")?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if self.vector_store.api_key.is_none() {
            self.vector_store.api_key = std::env::var("QDRANT_API_KEY")
                .ok()
                .filter(|k| !k.is_empty());
        }
    }

    /// Reject settings no component can run with.
    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            bail!("chunking.chunk_size must be > 0");
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            bail!(
                "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
                self.chunking.chunk_overlap,
                self.chunking.chunk_size
            );
        }

        if self.ingestion.max_job_workers == 0 || self.ingestion.parallel_jobs == 0 {
            bail!("ingestion.max_job_workers and ingestion.parallel_jobs must be >= 1");
        }
        if self.ingestion.embed_job_batch_size == 0 {
            bail!("ingestion.embed_job_batch_size must be > 0");
        }

        if self.embedding.dims == 0 {
            bail!("embedding.dims must be > 0");
        }
        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
        match self.embedding.provider.as_str() {
            "local" | "openai" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be local or openai.",
                other
            ),
        }

        if self.reranker.batch_size == 0 {
            bail!("reranker.batch_size must be > 0");
        }
        if self.reranker.provider != "local" {
            bail!(
                "Unknown reranker provider: '{}'. Must be local.",
                self.reranker.provider
            );
        }

        if self.retrieval.over_fetch_factor < 1 {
            bail!("retrieval.over_fetch_factor must be >= 1");
        }
        if self.retrieval.default_limit < 1 {
            bail!("retrieval.default_limit must be >= 1");
        }

        if self.vector_store.collection.is_empty() {
            bail!("vector_store.collection must not be empty");
        }
        if self.vector_store.upload_batch_size == 0 || self.vector_store.upload_parallelism == 0 {
            bail!("vector_store.upload_batch_size and upload_parallelism must be >= 1");
        }

        Ok(())
    }
}

/// Load and validate the config file at `path`.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    Config::from_toml(&content)
}

/// Load `path` if given, otherwise use defaults (still honoring env fallbacks).
pub fn load_or_default(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => load_config(path),
        None => Config::from_toml(""),
    }
}
