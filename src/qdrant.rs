//! Qdrant-backed [`VectorIndex`].
//!
//! Talks to Qdrant over gRPC with the `qdrant-client` crate.
//!
//! # Collection layout
//!
//! One collection per deployment (`vector_store.collection`), created on
//! first use with:
//!
//! | Setting | Value |
//! |---------|-------|
//! | distance | cosine |
//! | vectors | `on_disk = true` |
//! | payload | `on_disk_payload = true` |
//! | HNSW | `m = 0`, `payload_m = 16`, `on_disk = true` |
//! | payload index | keyword on `asset_id` |
//!
//! Bootstrap is serialized by a process-level async lock, and a collection
//! or index that another process created first counts as success.

use std::collections::HashSet;

use async_trait::async_trait;
use context_pipeline_core::models::Chunk;
use context_pipeline_core::store::{metadata_json, SearchHit, VectorIndex, ASSET_ID_FIELD};
use context_pipeline_core::{PipelineError, Result};
use futures::stream::{self, TryStreamExt};
use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder, Distance, FieldType,
    Filter, HnswConfigDiffBuilder, PointStruct, SearchPointsBuilder, UpsertPointsBuilder,
    Value as QdrantValue, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::VectorStoreConfig;

pub struct QdrantIndex {
    client: Qdrant,
    upload_batch_size: usize,
    upload_parallelism: usize,
    /// Collections known to be bootstrapped by this process.
    ready: Mutex<HashSet<String>>,
}

impl QdrantIndex {
    pub fn new(config: &VectorStoreConfig) -> Result<Self> {
        let mut builder = Qdrant::from_url(&config.url);
        if let Some(key) = &config.api_key {
            builder = builder.api_key(key.clone());
        }
        let client = builder.build().map_err(map_err)?;

        Ok(Self {
            client,
            upload_batch_size: config.upload_batch_size.max(1),
            upload_parallelism: config.upload_parallelism.max(1),
            ready: Mutex::new(HashSet::new()),
        })
    }

    async fn create_collection(&self, collection: &str, dims: usize) -> Result<()> {
        let created = self
            .client
            .create_collection(
                CreateCollectionBuilder::new(collection)
                    .vectors_config(
                        VectorParamsBuilder::new(dims as u64, Distance::Cosine).on_disk(true),
                    )
                    .on_disk_payload(true)
                    .hnsw_config(
                        HnswConfigDiffBuilder::default()
                            .m(0)
                            .payload_m(16)
                            .on_disk(true),
                    ),
            )
            .await;
        match created {
            Ok(_) => info!(collection, dims, "created qdrant collection"),
            Err(e) if is_already_exists(&e.to_string()) => {
                debug!(collection, "collection created concurrently by another process");
            }
            Err(e) => return Err(map_err(e)),
        }

        let indexed = self
            .client
            .create_field_index(
                CreateFieldIndexCollectionBuilder::new(collection, ASSET_ID_FIELD, FieldType::Keyword)
                    .wait(true),
            )
            .await;
        match indexed {
            Ok(_) => info!(collection, field = ASSET_ID_FIELD, "created keyword payload index"),
            Err(e) if is_already_exists(&e.to_string()) => {}
            Err(e) => return Err(map_err(e)),
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn ensure_collection(&self, collection: &str, dims: usize) -> Result<()> {
        let mut ready = self.ready.lock().await;
        if ready.contains(collection) {
            return Ok(());
        }

        let exists = self
            .client
            .collection_exists(collection)
            .await
            .map_err(map_err)?;
        if exists {
            debug!(collection, "qdrant collection already exists, skipping creation");
        } else {
            self.create_collection(collection, dims).await?;
        }

        ready.insert(collection.to_string());
        Ok(())
    }

    async fn upsert(&self, collection: &str, chunks: &[Chunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }

        let points = chunks.iter().map(to_point).collect::<Result<Vec<_>>>()?;
        let batches: Vec<Vec<PointStruct>> = points
            .chunks(self.upload_batch_size)
            .map(|batch| batch.to_vec())
            .collect();
        let batch_count = batches.len();

        stream::iter(batches.into_iter().map(Ok::<_, PipelineError>))
            .try_for_each_concurrent(self.upload_parallelism, |batch| async move {
                self.client
                    .upsert_points(UpsertPointsBuilder::new(collection, batch).wait(true))
                    .await
                    .map(|_| ())
                    .map_err(map_err)
            })
            .await?;

        debug!(collection, count = chunks.len(), batches = batch_count, "upserted chunks to qdrant");
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        asset_ids: &[String],
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let mut request = SearchPointsBuilder::new(collection, vector.to_vec(), limit as u64)
            .with_payload(true)
            .with_vectors(false);
        if let Some(filter) = asset_filter(asset_ids) {
            request = request.filter(filter);
        }

        let response = self.client.search_points(request).await.map_err(map_err)?;

        let hits = response
            .result
            .into_iter()
            .map(|scored| {
                let chunk_id = scored
                    .id
                    .as_ref()
                    .and_then(|pid| match &pid.point_id_options {
                        Some(PointIdOptions::Uuid(s)) => Some(s.clone()),
                        Some(PointIdOptions::Num(n)) => Some(n.to_string()),
                        None => None,
                    })
                    .unwrap_or_default();
                let field = |name: &str| {
                    scored
                        .payload
                        .get(name)
                        .and_then(extract_string)
                        .unwrap_or_default()
                };

                SearchHit {
                    chunk_id,
                    doc_id: field("doc_id"),
                    asset_id: field(ASSET_ID_FIELD),
                    text: field("text"),
                    metadata: field("metadata"),
                    score: scored.score,
                }
            })
            .collect::<Vec<_>>();

        debug!(collection, limit, hits = hits.len(), "qdrant search");
        Ok(hits)
    }
}

fn map_err(e: qdrant_client::QdrantError) -> PipelineError {
    PipelineError::IndexUnavailable(e.to_string())
}

fn is_already_exists(message: &str) -> bool {
    message.to_ascii_lowercase().contains("already exists")
}

fn extract_string(value: &QdrantValue) -> Option<String> {
    match &value.kind {
        Some(Kind::StringValue(s)) => Some(s.clone()),
        _ => None,
    }
}

/// Payload stored with every point.
pub(crate) fn point_payload(chunk: &Chunk) -> serde_json::Value {
    serde_json::json!({
        "doc_id": chunk.doc_id,
        ASSET_ID_FIELD: chunk.asset_id,
        "metadata": metadata_json(chunk),
        "text": chunk.text,
    })
}

fn to_point(chunk: &Chunk) -> Result<PointStruct> {
    let vector = chunk.embedding.clone().ok_or_else(|| {
        PipelineError::IndexUnavailable(format!("chunk {} has no embedding", chunk.chunk_id))
    })?;
    let payload = Payload::try_from(point_payload(chunk)).map_err(map_err)?;
    Ok(PointStruct::new(chunk.chunk_id.clone(), vector, payload))
}

/// `should` filter matching any of `asset_ids`; `None` searches globally.
pub(crate) fn asset_filter(asset_ids: &[String]) -> Option<Filter> {
    if asset_ids.is_empty() {
        return None;
    }
    Some(Filter::should(
        asset_ids
            .iter()
            .map(|id| Condition::matches(ASSET_ID_FIELD, id.clone())),
    ))
}
