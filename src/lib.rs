//! # Context Pipeline
//!
//! Parallel ingestion and two-stage retrieval for repository and bucket
//! content.
//!
//! Ingestion reads an asset (a GitHub repository or an S3 bucket), splits
//! its files into chunks (syntax-aware for known programming languages,
//! prose otherwise), embeds them on a pool of workers and stores them in a
//! Qdrant collection. Retrieval over-fetches candidates by vector
//! similarity, suppresses duplicates and reranks them with a cross-encoder.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────┐
//! │  Reader  │──▶│ Chunker pool │──▶│ Embedder pool│──▶│  Qdrant  │
//! │ GitHub/S3│   │  N workers   │   │  N workers   │   │  index   │
//! └──────────┘   └──────────────┘   └──────────────┘   └────┬─────┘
//!                                                           │
//!                 query ──▶ embed ──▶ search ×10 ──▶ dedup ──▶ rerank
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ctxp init                                   # bootstrap the collection
//! ctxp ingest --payload @payload.json         # run one ingestion job
//! ctxp retrieve "how are tokens refreshed" --asset-id repo-42
//! ctxp serve                                  # HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`payload`] | Ingestion and retrieval request schemas |
//! | [`reader`] | GitHub and S3 readers |
//! | [`embedding`] | Local and OpenAI-compatible embedders |
//! | [`rerank`] | Local cross-encoder |
//! | [`qdrant`] | Qdrant vector index |
//! | [`pool`] | Actor-style worker pool |
//! | [`ingest`] | Ingestion pipeline |
//! | [`retrieve`] | Retrieval pipeline |
//! | [`progress`] | Ingestion progress reporting |
//! | [`jobs`] | In-process job manager |
//! | [`server`] | HTTP server |
//!
//! Data model, chunking, the embedding and reranking algorithms and the
//! index trait live in the `context-pipeline-core` crate.

pub mod config;
pub mod embedding;
pub mod ingest;
pub mod jobs;
pub mod logging;
pub mod payload;
pub mod pool;
pub mod progress;
pub mod qdrant;
pub mod reader;
pub mod rerank;
pub mod retrieve;
pub mod server;
