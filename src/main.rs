//! # Context Pipeline CLI (`ctxp`)
//!
//! ## Usage
//!
//! ```bash
//! ctxp --config ./config/ctxp.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ctxp init` | Create the vector collection and its payload index |
//! | `ctxp ingest --payload <json>` | Run one ingestion job to completion |
//! | `ctxp retrieve "<query>"` | Print ranked contexts as JSON |
//! | `ctxp serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! # Ingest a repository
//! ctxp ingest --payload '{"asset_type":"github","asset_id":"repo-42","owner":"alice",
//!   "reader_kwargs":{"owner":"acme","repo":"widgets","branch":"main"}}'
//!
//! # Same, payload read from a file
//! ctxp ingest --payload @payload.json
//!
//! # Query two assets
//! ctxp retrieve "retry policy" --asset-id repo-42 --asset-id docs-7 --limit 5
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use context_pipeline::config;
use context_pipeline_core::store::VectorIndex;
use context_pipeline::embedding::{create_embedder, embedder_factory};
use context_pipeline::ingest::IngestionPipeline;
use context_pipeline::logging;
use context_pipeline::payload::{IngestionPayload, RetrievalPayload};
use context_pipeline::progress::ProgressMode;
use context_pipeline::qdrant::QdrantIndex;
use context_pipeline::rerank::create_cross_encoder;
use context_pipeline::retrieve::Retriever;
use context_pipeline::server;

/// Context Pipeline: parallel ingestion and two-stage retrieval for
/// repository and bucket content.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/ctxp.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "ctxp", version, about)]
struct Cli {
    /// Path to configuration file (TOML). Built-in defaults when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the vector collection if it does not exist.
    ///
    /// Idempotent: running it against an existing collection is a no-op.
    Init,

    /// Run one ingestion job and exit.
    ///
    /// Exits non-zero when the job fails; nothing is written to the index
    /// unless every document was chunked and embedded.
    Ingest {
        /// Ingestion payload as JSON, or `@path` to read it from a file.
        #[arg(long)]
        payload: String,

        /// Progress output on stderr. Defaults to `human` on a terminal.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Retrieve ranked contexts for a query.
    Retrieve {
        query: String,

        /// Restrict the search to this asset (repeatable). Searches every
        /// asset when omitted.
        #[arg(long = "asset-id")]
        asset_ids: Vec<String>,

        /// Number of contexts to request.
        #[arg(long)]
        limit: Option<usize>,

        /// Minimum reranker score a context must reach.
        #[arg(long)]
        threshold: Option<f32>,
    },

    /// Start the HTTP server.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_or_default(cli.config.as_deref())?;
    logging::init_with_config(&cfg.logging);

    match cli.command {
        Commands::Init => {
            let index = QdrantIndex::new(&cfg.vector_store)?;
            index
                .ensure_collection(&cfg.vector_store.collection, cfg.embedding.dims)
                .await
                .with_context(|| {
                    format!("Failed to bootstrap collection '{}'", cfg.vector_store.collection)
                })?;
            println!(
                "Collection '{}' ready ({} dims) at {}",
                cfg.vector_store.collection, cfg.embedding.dims, cfg.vector_store.url
            );
        }
        Commands::Ingest { payload, progress } => {
            let payload = read_payload(&payload)?;
            let reporter = progress.unwrap_or_else(ProgressMode::default_for_tty).reporter();

            let cfg = Arc::new(cfg);
            let index: Arc<dyn VectorIndex> = Arc::new(QdrantIndex::new(&cfg.vector_store)?);
            let pipeline =
                IngestionPipeline::new(cfg.clone(), index, embedder_factory(&cfg.embedding));

            let report = pipeline
                .ingest_asset(&payload, reporter.as_ref())
                .await
                .with_context(|| format!("Ingestion of asset '{}' failed", payload.asset_id))?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Retrieve {
            query,
            asset_ids,
            limit,
            threshold,
        } => {
            let request = RetrievalPayload {
                query,
                asset_ids,
                num_contexts: limit.unwrap_or(cfg.retrieval.default_limit),
                score_threshold: threshold.unwrap_or(cfg.retrieval.default_score_threshold),
            };

            let cfg = Arc::new(cfg);
            let index: Arc<dyn VectorIndex> = Arc::new(QdrantIndex::new(&cfg.vector_store)?);
            let model_cfg = cfg.clone();
            let (embedder, encoder) = tokio::task::spawn_blocking(move || {
                let embedder = create_embedder(&model_cfg.embedding)?;
                let encoder = create_cross_encoder(&model_cfg.reranker)?;
                Ok::<_, context_pipeline_core::PipelineError>((embedder, encoder))
            })
            .await?
            .context("Failed to load models")?;

            let retriever = Retriever::new(cfg, index, embedder, encoder);
            let contexts = retriever.retrieve(&request).await?;
            println!("{}", serde_json::to_string_pretty(&contexts)?);
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

/// Parse `--payload`: inline JSON, or `@path` to a JSON file.
fn read_payload(arg: &str) -> Result<IngestionPayload> {
    let raw = match arg.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(Path::new(path))
            .with_context(|| format!("Failed to read payload file: {}", path))?,
        None => arg.to_string(),
    };
    Ok(IngestionPayload::from_json(&raw)?)
}
