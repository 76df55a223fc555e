//! Vector index abstraction.
//!
//! The [`VectorIndex`] trait is the only storage surface the pipelines use:
//! idempotent collection bootstrap, durable bulk upsert, and similarity
//! search pre-filtered by asset identifier. The Qdrant implementation lives
//! in the app crate; [`memory::InMemoryIndex`] backs tests.
//!
//! # Index point layout
//!
//! | Field | Value |
//! |-------|-------|
//! | id | `chunk_id` (UUID) |
//! | vector | chunk embedding |
//! | payload `doc_id` | parent document |
//! | payload `asset_id` | keyword-indexed filter field |
//! | payload `metadata` | metadata serialized as a JSON string |
//! | payload `text` | chunk text |

pub mod memory;

use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::Chunk;

/// Payload field the asset filter and its keyword index apply to.
pub const ASSET_ID_FIELD: &str = "asset_id";

/// A candidate returned by similarity search, payload only.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub chunk_id: String,
    pub doc_id: String,
    pub asset_id: String,
    pub text: String,
    /// Metadata as stored: a serialized JSON object.
    pub metadata: String,
    /// Cosine similarity to the query vector.
    pub score: f32,
}

/// Abstract similarity index.
///
/// Implementations must be safe to share across concurrent ingestion jobs.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create the collection if it does not exist, with cosine distance,
    /// `dims`-dimensional vectors and a keyword index on `asset_id`.
    /// Repeated and concurrent calls are no-ops once it exists.
    async fn ensure_collection(&self, collection: &str, dims: usize) -> Result<()>;

    /// Store embedded chunks as index points, returning once the index has
    /// acknowledged them. Chunks without an embedding are rejected.
    async fn upsert(&self, collection: &str, chunks: &[Chunk]) -> Result<()>;

    /// Return up to `limit` hits ordered by descending similarity, restricted
    /// to `asset_ids` (no restriction when empty).
    async fn search(
        &self,
        collection: &str,
        asset_ids: &[String],
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchHit>>;
}

/// Serialize chunk metadata the way it is stored in the point payload.
pub fn metadata_json(chunk: &Chunk) -> String {
    serde_json::Value::Object(chunk.metadata.clone()).to_string()
}

/// Drop every hit whose score exactly equals an earlier hit's score.
///
/// First occurrence wins; relative order of survivors is preserved.
/// Scores compare by value, so `0.0` and `-0.0` are the same score.
pub fn dedup_by_score(hits: Vec<SearchHit>) -> Vec<SearchHit> {
    let mut seen = HashSet::new();
    hits.into_iter()
        .filter(|hit| seen.insert(score_key(hit.score)))
        .collect()
}

fn score_key(score: f32) -> u32 {
    if score == 0.0 {
        0.0f32.to_bits()
    } else {
        score.to_bits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: &str, score: f32) -> SearchHit {
        SearchHit {
            chunk_id: id.to_string(),
            doc_id: "d".to_string(),
            asset_id: "a".to_string(),
            text: id.to_string(),
            metadata: "{}".to_string(),
            score,
        }
    }

    #[test]
    fn test_dedup_keeps_first() {
        let out = dedup_by_score(vec![hit("a", 0.9), hit("b", 0.5), hit("c", 0.5), hit("d", 0.2)]);
        let ids: Vec<&str> = out.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "d"]);
    }

    #[test]
    fn test_dedup_independent_of_order() {
        let forward = dedup_by_score(vec![hit("x", 0.7), hit("y", 0.7)]);
        let backward = dedup_by_score(vec![hit("y", 0.7), hit("x", 0.7)]);
        assert_eq!(forward.len(), 1);
        assert_eq!(backward.len(), 1);
    }

    #[test]
    fn test_dedup_signed_zero() {
        let out = dedup_by_score(vec![hit("p", 0.0), hit("n", -0.0), hit("q", 0.1)]);
        let ids: Vec<&str> = out.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["p", "q"]);
    }

    #[test]
    fn test_metadata_json() {
        let doc = crate::models::Document::new("a", "u", "t");
        let mut chunk = Chunk::from_document(&doc, "t");
        chunk.metadata.insert("k".into(), serde_json::json!(1));
        assert_eq!(metadata_json(&chunk), r#"{"k":1}"#);
    }
}
