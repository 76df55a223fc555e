//! Core data models shared by the ingestion and retrieval pipelines.
//!
//! # Data Flow
//!
//! ```text
//! Reader ──► Document ──► Chunker ──► Chunk ──► Embedder ──► Chunk (+vector)
//!                                                               │
//!                                                               ▼
//!                       Context ◄── Reranker ◄── SearchHit ◄── VectorIndex
//! ```
//!
//! A [`Document`] is discarded as soon as its chunks exist; only chunks are
//! persisted, as index points keyed by `chunk_id`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Free-form metadata map carried by documents and chunks.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Status label stamped on every document a reader produces successfully.
pub const READ_SUCCESSFULLY: &str = "Read";

/// One normalized unit read from a source.
///
/// `doc_id` is assigned once, at creation, by [`Document::new`] and never
/// reused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Groups all documents produced by one ingestion job.
    pub asset_id: String,
    /// Unique identifier generated at read time.
    pub doc_id: String,
    pub filename: Option<String>,
    pub filepath: Option<String>,
    /// Full document text.
    pub text: String,
    pub metadata: Metadata,
    /// Identity of the uploader (the payload owner).
    pub uploaded_by: String,
    pub status: String,
    pub error: bool,
    pub message: Option<String>,
}

impl Document {
    /// Create a document with a freshly generated `doc_id` and the
    /// read-successful status.
    pub fn new(asset_id: impl Into<String>, uploaded_by: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            asset_id: asset_id.into(),
            doc_id: Uuid::new_v4().to_string(),
            filename: None,
            filepath: None,
            text: text.into(),
            metadata: Metadata::new(),
            uploaded_by: uploaded_by.into(),
            status: READ_SUCCESSFULLY.to_string(),
            error: false,
            message: None,
        }
    }
}

/// A retrievable slice of a document's text.
///
/// Created by the chunker without a vector; the embedder attaches the vector
/// exactly once. `chunk_id` becomes the index primary key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub asset_id: String,
    pub doc_id: String,
    pub chunk_id: String,
    pub text: String,
    /// Copied verbatim from the parent document.
    pub metadata: Metadata,
    pub embedding: Option<Vec<f32>>,
}

impl Chunk {
    /// Create an embedding-less chunk of `doc` holding `text`.
    pub fn from_document(doc: &Document, text: impl Into<String>) -> Self {
        Self {
            asset_id: doc.asset_id.clone(),
            doc_id: doc.doc_id.clone(),
            chunk_id: Uuid::new_v4().to_string(),
            text: text.into(),
            metadata: doc.metadata.clone(),
            embedding: None,
        }
    }
}

/// A ranked retrieval result returned to a query caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Context {
    pub text: String,
    pub metadata: serde_json::Value,
    pub score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_ids_are_unique() {
        let a = Document::new("asset", "alice", "text");
        let b = Document::new("asset", "alice", "text");
        assert_ne!(a.doc_id, b.doc_id);
        assert_eq!(a.status, READ_SUCCESSFULLY);
        assert!(!a.error);
    }

    #[test]
    fn test_chunk_inherits_document_identity() {
        let mut doc = Document::new("asset-1", "alice", "hello world");
        doc.metadata.insert("lang".into(), serde_json::json!("en"));
        let chunk = Chunk::from_document(&doc, "hello");

        assert_eq!(chunk.asset_id, "asset-1");
        assert_eq!(chunk.doc_id, doc.doc_id);
        assert_eq!(chunk.metadata, doc.metadata);
        assert!(chunk.embedding.is_none());
        assert_ne!(chunk.chunk_id, doc.doc_id);
    }
}
