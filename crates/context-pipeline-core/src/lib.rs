//! # Context Pipeline Core
//!
//! Shared logic for Context Pipeline: data models, chunking, text
//! normalization, the vector index abstraction, and the two-stage ranking
//! algorithm.
//!
//! This crate contains no tokio, network clients, or model runtimes. Concrete
//! readers, embedding backends, cross-encoders and the Qdrant client live in
//! the `context-pipeline` application crate and plug into the traits defined
//! here.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod models;
pub mod rerank;
pub mod store;
pub mod text;

pub use error::{PipelineError, Result};
