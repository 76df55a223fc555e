//! Ingestion pipeline orchestration.
//!
//! Runs one asset through `Reading → Chunking → Embedding → Storing → Done`:
//!
//! 1. **Reading**: one reader loads every document of the asset, then is
//!    dropped before any worker starts.
//! 2. **Chunking**: a pool of `workers_per_job` chunkers; documents are
//!    assigned round-robin and chunk lists are flattened in completion order.
//! 3. **Embedding**: chunks are cut into `embed_job_batch_size` batches and
//!    handed round-robin to a fresh pool of embedders, each holding its own
//!    loaded model.
//! 4. **Storing**: the collection is bootstrapped and all embedded chunks are
//!    upserted in one call that returns only once the index acknowledged them.
//!
//! Any failure aborts the job before anything is written to the index. Each
//! pool is shut down when its stage ends, on the error path too.

use std::fmt;
use std::sync::Arc;

use context_pipeline_core::chunk::Chunker;
use context_pipeline_core::embedding::{embed_chunks, Embedder};
use context_pipeline_core::models::{Chunk, Document};
use context_pipeline_core::store::VectorIndex;
use context_pipeline_core::Result;
use serde::{Deserialize, Serialize};
use tracing::{info, info_span, Instrument};

use crate::config::Config;
use crate::embedding::EmbedderFactory;
use crate::payload::IngestionPayload;
use crate::pool::{ActorGauge, Worker, WorkerPool};
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::reader::{create_reader, load_documents, Reader, ReaderContext};

/// Where a job is in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStage {
    Reading,
    Chunking,
    Embedding,
    Storing,
    Done,
    Failed,
}

impl IngestStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestStage::Reading => "reading",
            IngestStage::Chunking => "chunking",
            IngestStage::Embedding => "embedding",
            IngestStage::Storing => "storing",
            IngestStage::Done => "done",
            IngestStage::Failed => "failed",
        }
    }
}

impl fmt::Display for IngestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counts produced by a successful ingestion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub asset_id: String,
    pub documents: usize,
    pub chunks: usize,
    pub points: usize,
}

struct ChunkWorker {
    chunker: Chunker,
}

impl Worker for ChunkWorker {
    type Input = Document;
    type Output = Vec<Chunk>;

    fn process(&mut self, doc: Document) -> Result<Vec<Chunk>> {
        Ok(self.chunker.chunk(&doc))
    }
}

struct EmbedWorker {
    embedder: Box<dyn Embedder>,
    batch_size: usize,
}

impl Worker for EmbedWorker {
    type Input = Vec<Chunk>;
    type Output = Vec<Chunk>;

    fn process(&mut self, batch: Vec<Chunk>) -> Result<Vec<Chunk>> {
        embed_chunks(self.embedder.as_mut(), batch, self.batch_size)
    }
}

/// Runs ingestion jobs against one vector index.
///
/// Cheap to share: jobs running concurrently use the same pipeline and
/// only share the index.
pub struct IngestionPipeline {
    config: Arc<Config>,
    index: Arc<dyn VectorIndex>,
    embedder_factory: EmbedderFactory,
    gauge: ActorGauge,
}

impl IngestionPipeline {
    pub fn new(
        config: Arc<Config>,
        index: Arc<dyn VectorIndex>,
        embedder_factory: EmbedderFactory,
    ) -> Self {
        Self {
            config,
            index,
            embedder_factory,
            gauge: ActorGauge::new(),
        }
    }

    /// Workers currently alive across every pool of this pipeline.
    pub fn active_workers(&self) -> usize {
        self.gauge.active()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Ingest the asset described by `payload`: the single batch entrypoint.
    pub async fn ingest_asset(
        &self,
        payload: &IngestionPayload,
        progress: &dyn ProgressReporter,
    ) -> Result<IngestReport> {
        let reader = create_reader(payload, &self.config)?;
        let ctx = ReaderContext::from_payload(payload);
        self.ingest_with_reader(reader, &ctx, progress).await
    }

    /// Run the pipeline with an already-built reader.
    pub async fn ingest_with_reader(
        &self,
        reader: Box<dyn Reader>,
        ctx: &ReaderContext,
        progress: &dyn ProgressReporter,
    ) -> Result<IngestReport> {
        let span = info_span!("ingest", asset_id = %ctx.asset_id, asset_type = %reader.asset_type());
        let mut tracker = StageTracker::new(&ctx.asset_id, progress);

        let result = self.run(reader, ctx, &mut tracker).instrument(span).await;
        if let Err(e) = &result {
            tracker.fail(e);
        }
        result
    }

    async fn run(
        &self,
        reader: Box<dyn Reader>,
        ctx: &ReaderContext,
        tracker: &mut StageTracker<'_>,
    ) -> Result<IngestReport> {
        let asset_id = ctx.asset_id.clone();

        tracker.start(IngestStage::Reading, 0);
        let documents = load_documents(reader.as_ref(), ctx).await?;
        drop(reader);
        tracker.finish(documents.len());

        let document_count = documents.len();
        let chunks = self.chunk_documents(documents, tracker).await?;
        let chunk_count = chunks.len();

        let embedded = self.embed(chunks, tracker).await?;

        tracker.start(IngestStage::Storing, embedded.len());
        let collection = &self.config.vector_store.collection;
        self.index
            .ensure_collection(collection, self.config.embedding.dims)
            .await?;
        self.index.upsert(collection, &embedded).await?;
        tracker.finish(embedded.len());

        tracker.start(IngestStage::Done, 0);
        let report = IngestReport {
            asset_id,
            documents: document_count,
            chunks: chunk_count,
            points: embedded.len(),
        };
        info!(
            documents = report.documents,
            chunks = report.chunks,
            points = report.points,
            "ingestion complete"
        );
        Ok(report)
    }

    async fn chunk_documents(
        &self,
        documents: Vec<Document>,
        tracker: &mut StageTracker<'_>,
    ) -> Result<Vec<Chunk>> {
        tracker.start(IngestStage::Chunking, documents.len());
        if documents.is_empty() {
            tracker.finish(0);
            return Ok(Vec::new());
        }

        let size = self.config.chunking.chunk_size;
        let overlap = self.config.chunking.chunk_overlap;
        let workers = self.pool_size(documents.len());
        let pool = WorkerPool::spawn("chunking", workers, &self.gauge, move || {
            Ok(ChunkWorker {
                chunker: Chunker::new(size, overlap)?,
            })
        })
        .await?;
        info!(stage = "chunking", workers, count = documents.len(), "chunking documents");

        let result = pool.run_all(documents, |done, total| tracker.unit(done, total)).await;
        pool.shutdown().await;

        let chunks: Vec<Chunk> = result?.into_iter().flatten().collect();
        tracker.finish(chunks.len());
        Ok(chunks)
    }

    async fn embed(&self, chunks: Vec<Chunk>, tracker: &mut StageTracker<'_>) -> Result<Vec<Chunk>> {
        let batches = into_batches(chunks, self.config.ingestion.embed_job_batch_size);
        tracker.start(IngestStage::Embedding, batches.len());
        if batches.is_empty() {
            tracker.finish(0);
            return Ok(Vec::new());
        }

        let workers = self.pool_size(batches.len());
        let factory = self.embedder_factory.clone();
        let batch_size = self.config.embedding.batch_size;
        let pool = WorkerPool::spawn("embedding", workers, &self.gauge, move || {
            Ok(EmbedWorker {
                embedder: factory()?,
                batch_size,
            })
        })
        .await?;
        info!(stage = "embedding", workers, count = batches.len(), "embedding chunk batches");

        let result = pool.run_all(batches, |done, total| tracker.unit(done, total)).await;
        pool.shutdown().await;

        let embedded: Vec<Chunk> = result?.into_iter().flatten().collect();
        tracker.finish(embedded.len());
        Ok(embedded)
    }

    /// `workers_per_job`, never more than there are units to process.
    fn pool_size(&self, units: usize) -> usize {
        self.config.ingestion.workers_per_job().min(units).max(1)
    }
}

/// Split `items` into consecutive batches of at most `size`.
fn into_batches<T>(items: Vec<T>, size: usize) -> Vec<Vec<T>> {
    let size = size.max(1);
    let mut batches = Vec::with_capacity(items.len().div_ceil(size));
    let mut current = Vec::with_capacity(size);
    for item in items {
        current.push(item);
        if current.len() == size {
            batches.push(std::mem::replace(&mut current, Vec::with_capacity(size)));
        }
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

/// Remembers the current stage and forwards events to the reporter.
struct StageTracker<'a> {
    asset_id: &'a str,
    stage: IngestStage,
    progress: &'a dyn ProgressReporter,
}

impl<'a> StageTracker<'a> {
    fn new(asset_id: &'a str, progress: &'a dyn ProgressReporter) -> Self {
        Self {
            asset_id,
            stage: IngestStage::Reading,
            progress,
        }
    }

    fn start(&mut self, stage: IngestStage, total: usize) {
        self.stage = stage;
        self.progress.report(ProgressEvent::StageStarted {
            asset_id: self.asset_id.to_string(),
            stage,
            total,
        });
    }

    fn unit(&self, done: usize, total: usize) {
        self.progress.report(ProgressEvent::UnitCompleted {
            asset_id: self.asset_id.to_string(),
            stage: self.stage,
            done,
            total,
        });
    }

    fn finish(&self, count: usize) {
        self.progress.report(ProgressEvent::StageFinished {
            asset_id: self.asset_id.to_string(),
            stage: self.stage,
            count,
        });
    }

    fn fail(&self, error: &context_pipeline_core::PipelineError) {
        self.progress.report(ProgressEvent::Failed {
            asset_id: self.asset_id.to_string(),
            stage: self.stage,
            error: error.to_string(),
        });
    }
}
