//! Embedding trait and the chunk/query embedding operations.
//!
//! Defines the [`Embedder`] trait that every embedding backend implements,
//! plus the two operations the pipelines call:
//!
//! - [`embed_chunks`] attaches a vector to every chunk of a batch.
//! - [`embed_query`] turns a query string into one vector.
//!
//! Both run the text through [`remove_stopwords`] first, so index-time and
//! query-time vectors are produced from identically normalized text.
//!
//! Concrete backends (fastembed, OpenAI-compatible HTTP) live in the
//! `context-pipeline` app crate.

use crate::error::{PipelineError, Result};
use crate::models::Chunk;
use crate::text::remove_stopwords;

/// A loaded embedding model.
///
/// Implementations hold their model for their whole lifetime; construction
/// is the expensive part, `embed_texts` is called many times. Methods take
/// `&mut self` because model sessions are not shareable across threads.
pub trait Embedder: Send {
    /// Returns the model identifier (e.g. `"bge-small-en-v1.5"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `384`).
    fn dims(&self) -> usize;
    /// Encode `texts` in batches of `batch_size`, one vector per text.
    fn embed_texts(&mut self, texts: &[String], batch_size: usize) -> Result<Vec<Vec<f32>>>;
}

/// Attach an embedding to every chunk.
///
/// Returns the same chunks, in the same order, with `embedding` set. A model
/// that returns a different number of vectors than inputs, or vectors of the
/// wrong dimension, aborts with an error; output is never truncated.
pub fn embed_chunks(
    embedder: &mut dyn Embedder,
    mut chunks: Vec<Chunk>,
    batch_size: usize,
) -> Result<Vec<Chunk>> {
    if chunks.is_empty() {
        return Ok(chunks);
    }

    let texts: Vec<String> = chunks.iter().map(|c| remove_stopwords(&c.text)).collect();
    let vectors = embedder.embed_texts(&texts, batch_size.max(1))?;

    if vectors.len() != texts.len() {
        return Err(PipelineError::EmbeddingCountMismatch {
            inputs: texts.len(),
            outputs: vectors.len(),
        });
    }

    let dims = embedder.dims();
    for (chunk, vector) in chunks.iter_mut().zip(vectors) {
        check_dims(embedder.model_name(), dims, &vector)?;
        chunk.embedding = Some(vector);
    }

    Ok(chunks)
}

/// Embed a single query string.
pub fn embed_query(embedder: &mut dyn Embedder, query: &str) -> Result<Vec<f32>> {
    let text = remove_stopwords(query);
    let mut vectors = embedder.embed_texts(std::slice::from_ref(&text), 1)?;

    if vectors.len() != 1 {
        return Err(PipelineError::EmbeddingCountMismatch {
            inputs: 1,
            outputs: vectors.len(),
        });
    }
    let vector = vectors.remove(0);
    check_dims(embedder.model_name(), embedder.dims(), &vector)?;
    Ok(vector)
}

fn check_dims(model: &str, dims: usize, vector: &[f32]) -> Result<()> {
    if vector.is_empty() || vector.len() != dims {
        return Err(PipelineError::Embedding {
            provider: model.to_string(),
            message: format!("expected {} dimensions, got {}", dims, vector.len()),
        });
    }
    Ok(())
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors, vectors of
/// different lengths, or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
