//! Error taxonomy shared by the ingestion and retrieval pipelines.

use thiserror::Error;

/// Errors that can occur while ingesting or retrieving context.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The reader could not reach its external source (repository, bucket).
    #[error("Source unavailable ({source_kind}): {message}")]
    SourceUnavailable {
        /// Reader variant that failed, e.g. `"github"` or `"s3"`.
        source_kind: String,
        /// A description of the failure.
        message: String,
    },

    /// No reader variant matches the requested asset type.
    #[error("Asset type '{0}' is not supported. Available: github, s3")]
    UnsupportedAssetType(String),

    /// The request payload does not match the shape its asset type requires.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// A structure-aware splitter could not parse the document text.
    #[error("Splitter failure ({language}): {message}")]
    SplitterFailure {
        /// Language the splitter was configured for.
        language: String,
        /// A description of the failure.
        message: String,
    },

    /// The embedding model returned a different number of vectors than inputs.
    #[error("Embedding count mismatch: {inputs} inputs produced {outputs} vectors")]
    EmbeddingCountMismatch {
        /// Number of texts sent to the model.
        inputs: usize,
        /// Number of vectors the model returned.
        outputs: usize,
    },

    /// The embedding backend failed.
    #[error("Embedding error ({provider}): {message}")]
    Embedding {
        /// Embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// The similarity index could not be reached or rejected a request.
    #[error("Index unavailable: {0}")]
    IndexUnavailable(String),

    /// The cross-encoder failed to score candidates.
    #[error("Rerank error: {0}")]
    Rerank(String),

    /// A pool worker died or its result channel closed.
    #[error("Worker failed ({stage}): {message}")]
    WorkerFailed {
        /// Pipeline stage the worker belonged to.
        stage: String,
        /// A description of the failure.
        message: String,
    },

    /// Configuration rejected at load or construction time.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    /// Short machine-readable code used in job status and HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::SourceUnavailable { .. } => "source_unavailable",
            PipelineError::UnsupportedAssetType(_) => "unsupported_asset_type",
            PipelineError::InvalidPayload(_) => "bad_request",
            PipelineError::SplitterFailure { .. } => "splitter_failure",
            PipelineError::EmbeddingCountMismatch { .. } => "embedding_count_mismatch",
            PipelineError::Embedding { .. } => "embedding_error",
            PipelineError::IndexUnavailable(_) => "index_unavailable",
            PipelineError::Rerank(_) => "rerank_error",
            PipelineError::WorkerFailed { .. } => "worker_failed",
            PipelineError::Config(_) => "config_error",
        }
    }
}

/// A convenience result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
