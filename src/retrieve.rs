//! Two-stage retrieval.
//!
//! `embed query → over-fetch search → dedup by score → truncate → rerank`.
//!
//! The index is asked for `num_contexts × over_fetch_factor` candidates,
//! restricted to the requested asset ids (global when none are given).
//! Candidates with an exactly repeated similarity score are dropped (first
//! wins), the rest is cut to `num_contexts` and handed to the cross-encoder,
//! which applies the score threshold and the final ordering. Fewer results
//! than requested is not an error.
//!
//! Both models are loaded once and reused for every request; inference runs
//! on the blocking pool.

use std::sync::{Arc, Mutex};

use context_pipeline_core::embedding::{embed_query, Embedder};
use context_pipeline_core::models::Context;
use context_pipeline_core::rerank::{rerank, CrossEncoder};
use context_pipeline_core::store::{dedup_by_score, VectorIndex};
use context_pipeline_core::{PipelineError, Result};
use tracing::{debug, info};

use crate::config::Config;
use crate::payload::RetrievalPayload;

pub struct Retriever {
    config: Arc<Config>,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<Mutex<Box<dyn Embedder>>>,
    encoder: Arc<Mutex<Box<dyn CrossEncoder>>>,
}

impl Retriever {
    pub fn new(
        config: Arc<Config>,
        index: Arc<dyn VectorIndex>,
        embedder: Box<dyn Embedder>,
        encoder: Box<dyn CrossEncoder>,
    ) -> Self {
        Self {
            config,
            index,
            embedder: Arc::new(Mutex::new(embedder)),
            encoder: Arc::new(Mutex::new(encoder)),
        }
    }

    pub async fn retrieve(&self, request: &RetrievalPayload) -> Result<Vec<Context>> {
        let limit = request.num_contexts;
        if limit == 0 {
            return Ok(Vec::new());
        }

        let query = request.query.clone();
        let embedder = self.embedder.clone();
        let vector = run_blocking("retrieval", move || {
            let mut embedder = embedder
                .lock()
                .map_err(|_| poisoned("embedding model"))?;
            embed_query(embedder.as_mut(), &query)
        })
        .await?;

        let fetch = limit.saturating_mul(self.config.retrieval.over_fetch_factor.max(1));
        let hits = self
            .index
            .search(
                &self.config.vector_store.collection,
                &request.asset_ids,
                &vector,
                fetch,
            )
            .await?;
        let fetched = hits.len();

        let mut candidates = dedup_by_score(hits);
        candidates.truncate(limit);
        debug!(fetched, candidates = candidates.len(), "vector search");

        let query = request.query.clone();
        let threshold = request.score_threshold;
        let batch_size = self.config.reranker.batch_size;
        let encoder = self.encoder.clone();
        let contexts = run_blocking("retrieval", move || {
            let mut encoder = encoder.lock().map_err(|_| poisoned("reranker model"))?;
            rerank(encoder.as_mut(), &query, candidates, threshold, batch_size)
        })
        .await?;

        info!(
            assets = request.asset_ids.len(),
            fetched,
            count = contexts.len(),
            "retrieval complete"
        );
        Ok(contexts)
    }
}

async fn run_blocking<T, F>(stage: &'static str, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PipelineError::WorkerFailed {
            stage: stage.to_string(),
            message: e.to_string(),
        })?
}

fn poisoned(what: &str) -> PipelineError {
    PipelineError::WorkerFailed {
        stage: "retrieval".to_string(),
        message: format!("{} lock poisoned", what),
    }
}
