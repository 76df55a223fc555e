//! Cross-encoder reranking.
//!
//! The second ranking stage: every (query, candidate) pair is scored by a
//! [`CrossEncoder`], then
//!
//! 1. pairs scoring strictly below `score_threshold` are discarded,
//! 2. pairs whose score exactly equals an already-kept score are discarded,
//! 3. survivors are sorted by descending score.
//!
//! An empty candidate list returns immediately without touching the model.

use crate::error::{PipelineError, Result};
use crate::models::Context;
use crate::store::SearchHit;

/// A loaded cross-encoder relevance model.
pub trait CrossEncoder: Send {
    fn model_name(&self) -> &str;
    /// Score `query` against each document, returning one score per
    /// document in input order. Pairs are scored in batches of `batch_size`.
    fn score(&mut self, query: &str, documents: &[String], batch_size: usize) -> Result<Vec<f32>>;
}

/// Rerank `candidates` against `query`.
pub fn rerank(
    encoder: &mut dyn CrossEncoder,
    query: &str,
    candidates: Vec<SearchHit>,
    score_threshold: f32,
    batch_size: usize,
) -> Result<Vec<Context>> {
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let documents: Vec<String> = candidates.iter().map(|c| c.text.clone()).collect();
    let scores = encoder.score(query, &documents, batch_size.max(1))?;
    if scores.len() != candidates.len() {
        return Err(PipelineError::Rerank(format!(
            "{} scored {} of {} candidates",
            encoder.model_name(),
            scores.len(),
            candidates.len()
        )));
    }

    let mut seen: Vec<f32> = Vec::new();
    let mut contexts = Vec::new();
    for (hit, score) in candidates.into_iter().zip(scores) {
        if score < score_threshold || seen.contains(&score) {
            continue;
        }
        seen.push(score);
        contexts.push(Context {
            metadata: parse_metadata(&hit.metadata),
            text: hit.text,
            score,
        });
    }

    contexts.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    Ok(contexts)
}

/// Stored metadata is a JSON string; anything unparseable is passed through
/// as a plain string value.
fn parse_metadata(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}
