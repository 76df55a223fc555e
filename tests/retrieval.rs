//! Retrieval over the in-memory index with table-driven models.

mod common;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::*;
use context_pipeline::payload::RetrievalPayload;
use context_pipeline::retrieve::Retriever;
use context_pipeline_core::models::{Chunk, Document};
use context_pipeline_core::store::memory::InMemoryIndex;
use context_pipeline_core::store::{SearchHit, VectorIndex};
use context_pipeline_core::Result;

const CONFIG: &str = "[embedding]\ndims = 3\n";

fn embedder() -> TableEmbedder {
    let table: HashMap<String, Vec<f32>> = [
        ("query", vec![1.0, 0.0, 0.0]),
        ("alpha", vec![1.0, 0.0, 0.0]),
        ("beta", vec![0.8, 0.6, 0.0]),
        ("gamma", vec![0.6, 0.8, 0.0]),
        ("delta", vec![0.0, 0.6, 0.8]),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();
    TableEmbedder { table, dims: 3 }
}

async fn seeded(points: &[(&str, &str)]) -> Arc<InMemoryIndex> {
    let index = Arc::new(InMemoryIndex::new());
    index.ensure_collection("default", 3).await.unwrap();

    let mut vectors = embedder();
    let chunks: Vec<Chunk> = points
        .iter()
        .map(|(asset, text)| {
            let mut doc = Document::new(*asset, "tester", *text);
            doc.metadata.insert("asset_id".into(), (*asset).into());
            let mut chunk = Chunk::from_document(&doc, *text);
            chunk.embedding = Some(
                context_pipeline_core::embedding::embed_query(&mut vectors, text).unwrap(),
            );
            chunk
        })
        .collect();
    index.upsert("default", &chunks).await.unwrap();
    index
}

fn request(num_contexts: usize, threshold: f32, asset_ids: &[&str]) -> RetrievalPayload {
    RetrievalPayload {
        query: "query".to_string(),
        asset_ids: asset_ids.iter().map(|s| s.to_string()).collect(),
        num_contexts,
        score_threshold: threshold,
    }
}

fn retriever(index: Arc<dyn VectorIndex>, encoder: &TableEncoder) -> Retriever {
    Retriever::new(
        config(CONFIG),
        index,
        Box::new(embedder()),
        Box::new(encoder.clone()),
    )
}

#[tokio::test]
async fn test_threshold_and_duplicate_scores() {
    let index = seeded(&[("A", "alpha"), ("A", "beta"), ("A", "gamma"), ("A", "delta")]).await;
    let encoder = TableEncoder::new(&[("alpha", 0.9), ("beta", 0.5), ("gamma", 0.5), ("delta", 0.2)]);

    let contexts = retriever(index, &encoder)
        .retrieve(&request(10, 0.5, &[]))
        .await
        .unwrap();

    let scores: Vec<f32> = contexts.iter().map(|c| c.score).collect();
    assert_eq!(scores, vec![0.9, 0.5]);
    assert_eq!(contexts[0].text, "alpha");
    // beta ranks above gamma in vector search, so it is the 0.5 kept.
    assert_eq!(contexts[1].text, "beta");
}

#[tokio::test]
async fn test_equal_similarity_candidates_collapse() {
    let index = seeded(&[("A", "alpha"), ("A", "alpha"), ("A", "beta")]).await;
    let encoder = TableEncoder::new(&[("alpha", 0.9), ("beta", 0.8)]);

    let contexts = retriever(index, &encoder)
        .retrieve(&request(10, 0.0, &[]))
        .await
        .unwrap();

    assert_eq!(contexts.len(), 2);
    assert_eq!(encoder.seen(), vec![vec!["alpha".to_string(), "beta".to_string()]]);
}

#[tokio::test]
async fn test_candidates_truncated_to_limit() {
    let index = seeded(&[("A", "alpha"), ("A", "beta"), ("A", "gamma"), ("A", "delta")]).await;
    let encoder = TableEncoder::new(&[("alpha", 0.9), ("beta", 0.8), ("gamma", 0.7)]);

    let contexts = retriever(index, &encoder)
        .retrieve(&request(2, 0.0, &[]))
        .await
        .unwrap();

    assert_eq!(contexts.len(), 2);
    assert_eq!(encoder.seen(), vec![vec!["alpha".to_string(), "beta".to_string()]]);
}

#[tokio::test]
async fn test_asset_scoping() {
    let index = seeded(&[("X", "alpha"), ("Y", "beta"), ("X", "gamma")]).await;
    let encoder = TableEncoder::new(&[("alpha", 0.9), ("beta", 0.8), ("gamma", 0.7)]);
    let retriever = retriever(index, &encoder);

    let scoped = retriever.retrieve(&request(10, 0.0, &["X"])).await.unwrap();
    assert_eq!(scoped.len(), 2);
    assert!(scoped.iter().all(|c| c.metadata["asset_id"] == "X"));

    let global = retriever.retrieve(&request(10, 0.0, &[])).await.unwrap();
    assert_eq!(global.len(), 3);
}

#[tokio::test]
async fn test_no_candidates_skips_reranker() {
    let index = seeded(&[]).await;
    let encoder = TableEncoder::new(&[]);

    let contexts = retriever(index, &encoder)
        .retrieve(&request(5, 0.0, &["missing"]))
        .await
        .unwrap();

    assert!(contexts.is_empty());
    assert!(encoder.seen().is_empty());
}

#[tokio::test]
async fn test_zero_contexts_requested() {
    let index = seeded(&[("A", "alpha")]).await;
    let encoder = TableEncoder::new(&[("alpha", 0.9)]);

    let contexts = retriever(index, &encoder)
        .retrieve(&request(0, 0.0, &[]))
        .await
        .unwrap();
    assert!(contexts.is_empty());
    assert!(encoder.seen().is_empty());
}

#[tokio::test]
async fn test_request_defaults() {
    let index = seeded(&[("A", "alpha"), ("A", "beta")]).await;
    let encoder = TableEncoder::new(&[("alpha", 1.0), ("beta", 0.99)]);

    let request: RetrievalPayload = serde_json::from_str(r#"{"query": "query"}"#).unwrap();
    assert_eq!(request.num_contexts, 10);
    assert_eq!(request.score_threshold, 1.0);

    // The default threshold keeps only scores of at least 1.0.
    let contexts = retriever(index, &encoder).retrieve(&request).await.unwrap();
    assert_eq!(contexts.len(), 1);
    assert_eq!(contexts[0].text, "alpha");
}

/// Wraps an index and records the limit of every search.
struct RecordingIndex {
    inner: Arc<InMemoryIndex>,
    limits: Mutex<Vec<usize>>,
}

#[async_trait]
impl VectorIndex for RecordingIndex {
    async fn ensure_collection(&self, collection: &str, dims: usize) -> Result<()> {
        self.inner.ensure_collection(collection, dims).await
    }

    async fn upsert(&self, collection: &str, chunks: &[Chunk]) -> Result<()> {
        self.inner.upsert(collection, chunks).await
    }

    async fn search(
        &self,
        collection: &str,
        asset_ids: &[String],
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        self.limits.lock().unwrap().push(limit);
        self.inner.search(collection, asset_ids, vector, limit).await
    }
}

#[tokio::test]
async fn test_over_fetch() {
    let index = Arc::new(RecordingIndex {
        inner: seeded(&[("A", "alpha")]).await,
        limits: Mutex::new(Vec::new()),
    });
    let encoder = TableEncoder::new(&[("alpha", 0.9)]);

    retriever(index.clone(), &encoder)
        .retrieve(&request(3, 0.0, &[]))
        .await
        .unwrap();

    assert_eq!(*index.limits.lock().unwrap(), vec![30]);
}
