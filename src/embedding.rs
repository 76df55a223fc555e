//! Embedding backends.
//!
//! Concrete implementations of the core [`Embedder`] trait:
//! - **[`LocalEmbedder`]** runs a fastembed model in-process (feature
//!   `local-models`, on by default). No network calls after the model
//!   download.
//! - **[`OpenAiEmbedder`]** calls an OpenAI-compatible `POST /v1/embeddings`
//!   endpoint with batching, retry, and backoff.
//!
//! Each worker of the embedding pool owns one embedder, built once by an
//! [`EmbedderFactory`] and reused for every batch it receives.
//!
//! # Retry Strategy
//!
//! The OpenAI backend uses exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::sync::Arc;
use std::time::Duration;

use context_pipeline_core::embedding::Embedder;
use context_pipeline_core::{PipelineError, Result};

use crate::config::EmbeddingConfig;

/// Builds one embedder per worker.
pub type EmbedderFactory = Arc<dyn Fn() -> Result<Box<dyn Embedder>> + Send + Sync>;

/// Factory producing embedders from configuration.
pub fn embedder_factory(config: &EmbeddingConfig) -> EmbedderFactory {
    let config = config.clone();
    Arc::new(move || create_embedder(&config))
}

/// Create the embedder selected by `embedding.provider`.
///
/// | Config Value | Embedder |
/// |-------------|----------|
/// | `"local"` | [`LocalEmbedder`] (requires feature `local-models`) |
/// | `"openai"` | [`OpenAiEmbedder`] |
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Box<dyn Embedder>> {
    match config.provider.as_str() {
        #[cfg(feature = "local-models")]
        "local" => Ok(Box::new(LocalEmbedder::new(config)?)),
        #[cfg(not(feature = "local-models"))]
        "local" => Err(PipelineError::Config(
            "Local embedding provider requires --features local-models".to_string(),
        )),
        "openai" => Ok(Box::new(OpenAiEmbedder::new(config)?)),
        other => Err(PipelineError::Config(format!(
            "Unknown embedding provider: {}",
            other
        ))),
    }
}

fn embedding_error(provider: &str, message: impl Into<String>) -> PipelineError {
    PipelineError::Embedding {
        provider: provider.to_string(),
        message: message.into(),
    }
}

// ============ Local Embedder ============

/// Dimensionality of the local models we know how to load.
pub fn local_model_dims(name: &str) -> Option<usize> {
    match name {
        "all-minilm-l6-v2" => Some(384),
        "bge-small-en-v1.5" => Some(384),
        "bge-base-en-v1.5" => Some(768),
        "bge-large-en-v1.5" => Some(1024),
        "nomic-embed-text-v1" | "nomic-embed-text-v1.5" => Some(768),
        "multilingual-e5-small" => Some(384),
        "multilingual-e5-base" => Some(768),
        "multilingual-e5-large" => Some(1024),
        _ => None,
    }
}

#[cfg(feature = "local-models")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV1),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        other => Err(PipelineError::Config(format!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1, nomic-embed-text-v1.5, \
             multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
            other
        ))),
    }
}

/// In-process fastembed model, loaded once in [`LocalEmbedder::new`].
#[cfg(feature = "local-models")]
pub struct LocalEmbedder {
    model_name: String,
    dims: usize,
    model: fastembed::TextEmbedding,
}

#[cfg(feature = "local-models")]
impl LocalEmbedder {
    /// Load the configured model. Blocking: downloads the model on first use.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let fastembed_model = config_to_fastembed_model(&config.model)?;
        if let Some(known) = local_model_dims(&config.model) {
            if known != config.dims {
                return Err(PipelineError::Config(format!(
                    "embedding.dims is {} but model '{}' produces {} dimensions",
                    config.dims, config.model, known
                )));
            }
        }

        let model = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(fastembed_model).with_show_download_progress(false),
        )
        .map_err(|e| {
            embedding_error("local", format!("Failed to initialize local embedding model: {}", e))
        })?;

        tracing::info!(model = %config.model, dims = config.dims, "local embedding model loaded");
        Ok(Self {
            model_name: config.model.clone(),
            dims: config.dims,
            model,
        })
    }
}

#[cfg(feature = "local-models")]
impl Embedder for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    fn embed_texts(&mut self, texts: &[String], batch_size: usize) -> Result<Vec<Vec<f32>>> {
        self.model
            .embed(texts.to_vec(), Some(batch_size))
            .map_err(|e| embedding_error("local", format!("Local embedding failed: {}", e)))
    }
}

// ============ OpenAI-compatible Embedder ============

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com";

/// Embedder backed by an OpenAI-compatible HTTP API.
///
/// Reads the API key from `OPENAI_API_KEY`; the key is required when talking
/// to the default OpenAI URL and optional for a custom `embedding.url`.
pub struct OpenAiEmbedder {
    model: String,
    dims: usize,
    endpoint: String,
    api_key: Option<String>,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let base = config
            .url
            .clone()
            .unwrap_or_else(|| OPENAI_DEFAULT_URL.to_string());
        let api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty());
        if api_key.is_none() && base == OPENAI_DEFAULT_URL {
            return Err(PipelineError::Config(
                "OPENAI_API_KEY environment variable not set".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| embedding_error("openai", e.to_string()))?;

        Ok(Self {
            model: config.model.clone(),
            dims: config.dims,
            endpoint: format!("{}/v1/embeddings", base.trim_end_matches('/')),
            api_key,
            max_retries: config.max_retries,
            client,
        })
    }

    /// One request with retry/backoff.
    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::debug!(attempt, delay_secs = delay.as_secs(), "retrying embedding request");
                tokio::time::sleep(delay).await;
            }

            let mut req = self.client.post(&self.endpoint).json(&body);
            if let Some(key) = &self.api_key {
                req = req.header("Authorization", format!("Bearer {}", key));
            }

            match req.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| embedding_error("openai", e.to_string()))?;
                        return parse_openai_response(&json);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err = embedding_error("openai", format!("API error {}: {}", status, body_text));
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
                Err(e) => {
                    last_err = Some(embedding_error("openai", e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| embedding_error("openai", "Embedding failed after retries")))
    }
}

impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    /// Runs on a blocking worker thread; drives the async client on the
    /// ambient runtime.
    fn embed_texts(&mut self, texts: &[String], batch_size: usize) -> Result<Vec<Vec<f32>>> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| embedding_error("openai", format!("no async runtime: {}", e)))?;

        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(batch_size.max(1)) {
            vectors.extend(handle.block_on(self.request(batch))?);
        }
        Ok(vectors)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index` when present.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| embedding_error("openai", "Invalid response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| embedding_error("openai", "Invalid response: missing embedding"))?;

        let vec = embedding
            .iter()
            .map(|v| {
                v.as_f64().map(|x| x as f32).ok_or_else(|| {
                    embedding_error("openai", "Invalid response: non-numeric embedding value")
                })
            })
            .collect::<Result<Vec<f32>>>()?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        indexed.push((index, vec));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}
