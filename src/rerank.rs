//! Cross-encoder backends.
//!
//! [`LocalCrossEncoder`] wraps a fastembed `TextRerank` model. It is loaded
//! once per process and shared by every retrieval request.

use context_pipeline_core::rerank::CrossEncoder;
use context_pipeline_core::{PipelineError, Result};

use crate::config::RerankerConfig;

/// Create the cross-encoder selected by `reranker.provider`.
pub fn create_cross_encoder(config: &RerankerConfig) -> Result<Box<dyn CrossEncoder>> {
    match config.provider.as_str() {
        #[cfg(feature = "local-models")]
        "local" => Ok(Box::new(LocalCrossEncoder::new(config)?)),
        #[cfg(not(feature = "local-models"))]
        "local" => Err(PipelineError::Config(
            "Local reranker requires --features local-models".to_string(),
        )),
        other => Err(PipelineError::Config(format!(
            "Unknown reranker provider: {}",
            other
        ))),
    }
}

#[cfg(feature = "local-models")]
fn config_to_reranker_model(name: &str) -> Result<fastembed::RerankerModel> {
    match name {
        "bge-reranker-base" => Ok(fastembed::RerankerModel::BGERerankerBase),
        "bge-reranker-v2-m3" => Ok(fastembed::RerankerModel::BGERerankerV2M3),
        "jina-reranker-v1-turbo-en" => Ok(fastembed::RerankerModel::JINARerankerV1TurboEn),
        "jina-reranker-v2-base-multilingual" => {
            Ok(fastembed::RerankerModel::JINARerankerV2BaseMultiligual)
        }
        other => Err(PipelineError::Config(format!(
            "Unknown reranker model: '{}'. Supported models: bge-reranker-base, \
             bge-reranker-v2-m3, jina-reranker-v1-turbo-en, jina-reranker-v2-base-multilingual",
            other
        ))),
    }
}

#[cfg(feature = "local-models")]
pub struct LocalCrossEncoder {
    model_name: String,
    model: fastembed::TextRerank,
}

#[cfg(feature = "local-models")]
impl LocalCrossEncoder {
    /// Load the configured model. Blocking: downloads the model on first use.
    pub fn new(config: &RerankerConfig) -> Result<Self> {
        let model = fastembed::TextRerank::try_new(
            fastembed::RerankInitOptions::new(config_to_reranker_model(&config.model)?)
                .with_show_download_progress(false),
        )
        .map_err(|e| PipelineError::Rerank(format!("Failed to initialize reranker: {}", e)))?;

        tracing::info!(model = %config.model, "reranker model loaded");
        Ok(Self {
            model_name: config.model.clone(),
            model,
        })
    }
}

#[cfg(feature = "local-models")]
impl CrossEncoder for LocalCrossEncoder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn score(&mut self, query: &str, documents: &[String], batch_size: usize) -> Result<Vec<f32>> {
        let docs: Vec<&str> = documents.iter().map(String::as_str).collect();
        let results = self
            .model
            .rerank(query, docs, false, Some(batch_size))
            .map_err(|e| PipelineError::Rerank(e.to_string()))?;

        // Results come back sorted by score; put them back in input order.
        let mut scores = vec![f32::NEG_INFINITY; documents.len()];
        for result in results {
            if let Some(slot) = scores.get_mut(result.index) {
                *slot = result.score;
            }
        }
        Ok(scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_provider() {
        let config = RerankerConfig {
            provider: "remote".into(),
            ..RerankerConfig::default()
        };
        assert!(matches!(
            create_cross_encoder(&config),
            Err(PipelineError::Config(_))
        ));
    }

    #[cfg(feature = "local-models")]
    #[test]
    fn test_unknown_model_name() {
        assert!(config_to_reranker_model("not-a-model").is_err());
        assert!(config_to_reranker_model("bge-reranker-base").is_ok());
    }
}
