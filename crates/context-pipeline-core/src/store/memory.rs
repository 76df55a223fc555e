//! In-memory [`VectorIndex`] for tests and local experimentation.
//!
//! Collections live in a `HashMap` behind `std::sync::RwLock`. Search is
//! brute-force cosine similarity, with the asset filter applied before
//! scoring so results never contain points outside the requested assets.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use super::{metadata_json, SearchHit, VectorIndex};
use crate::embedding::cosine_similarity;
use crate::error::{PipelineError, Result};
use crate::models::Chunk;

struct StoredPoint {
    id: String,
    vector: Vec<f32>,
    doc_id: String,
    asset_id: String,
    metadata: String,
    text: String,
}

struct Collection {
    dims: usize,
    points: Vec<StoredPoint>,
    /// Point id to position in `points`.
    positions: HashMap<String, usize>,
}

/// In-memory similarity index.
pub struct InMemoryIndex {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// Number of collections created so far.
    pub fn collection_count(&self) -> usize {
        self.read().map(|c| c.len()).unwrap_or(0)
    }

    /// Number of points stored in `collection` (0 if it does not exist).
    pub fn point_count(&self, collection: &str) -> usize {
        self.read()
            .ok()
            .and_then(|c| c.get(collection).map(|c| c.points.len()))
            .unwrap_or(0)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Collection>>> {
        self.collections
            .read()
            .map_err(|_| PipelineError::IndexUnavailable("index lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Collection>>> {
        self.collections
            .write()
            .map_err(|_| PipelineError::IndexUnavailable("index lock poisoned".to_string()))
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn ensure_collection(&self, collection: &str, dims: usize) -> Result<()> {
        let mut collections = self.write()?;
        collections
            .entry(collection.to_string())
            .or_insert_with(|| Collection {
                dims,
                points: Vec::new(),
                positions: HashMap::new(),
            });
        Ok(())
    }

    async fn upsert(&self, collection: &str, chunks: &[Chunk]) -> Result<()> {
        let mut collections = self.write()?;
        let target = collections.get_mut(collection).ok_or_else(|| {
            PipelineError::IndexUnavailable(format!("collection '{}' not found", collection))
        })?;

        for chunk in chunks {
            let vector = chunk.embedding.as_ref().ok_or_else(|| {
                PipelineError::IndexUnavailable(format!("chunk {} has no embedding", chunk.chunk_id))
            })?;
            if vector.len() != target.dims {
                return Err(PipelineError::IndexUnavailable(format!(
                    "vector dimension {} does not match collection dimension {}",
                    vector.len(),
                    target.dims
                )));
            }

            let point = StoredPoint {
                id: chunk.chunk_id.clone(),
                vector: vector.clone(),
                doc_id: chunk.doc_id.clone(),
                asset_id: chunk.asset_id.clone(),
                metadata: metadata_json(chunk),
                text: chunk.text.clone(),
            };
            match target.positions.get(&point.id) {
                Some(&pos) => target.points[pos] = point,
                None => {
                    target.positions.insert(point.id.clone(), target.points.len());
                    target.points.push(point);
                }
            }
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        asset_ids: &[String],
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let collections = self.read()?;
        let target = collections.get(collection).ok_or_else(|| {
            PipelineError::IndexUnavailable(format!("collection '{}' not found", collection))
        })?;

        let mut hits: Vec<SearchHit> = target
            .points
            .iter()
            .filter(|p| asset_ids.is_empty() || asset_ids.contains(&p.asset_id))
            .map(|p| SearchHit {
                chunk_id: p.id.clone(),
                doc_id: p.doc_id.clone(),
                asset_id: p.asset_id.clone(),
                text: p.text.clone(),
                metadata: p.metadata.clone(),
                score: cosine_similarity(vector, &p.vector),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        Ok(hits)
    }
}
