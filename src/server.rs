//! HTTP server for ingestion jobs and retrieval.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Liveness text (`RUNNING`) |
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/ingest` | Submit an ingestion payload, returns `{ "job_id" }` |
//! | `GET`  | `/ingest/jobs` | List all jobs |
//! | `GET`  | `/ingest/{job_id}` | Status, stage, logs and report of one job |
//! | `DELETE` | `/ingest/{job_id}` | Stop a job |
//! | `POST` | `/retrieve` | Ranked contexts for a query |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "unsupported_asset_type", "message": "unsupported asset type: ftp" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unsupported_asset_type` (400),
//! `not_found` (404), `index_unavailable` (503), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use context_pipeline_core::models::Context;
use context_pipeline_core::store::VectorIndex;
use context_pipeline_core::PipelineError;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::config::Config;
use crate::embedding::{create_embedder, embedder_factory};
use crate::ingest::IngestionPipeline;
use crate::jobs::{JobInfo, JobManager};
use crate::payload::{IngestionPayload, RetrievalPayload};
use crate::qdrant::QdrantIndex;
use crate::rerank::create_cross_encoder;
use crate::retrieve::Retriever;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    jobs: Arc<JobManager>,
    retriever: Arc<Retriever>,
}

impl AppState {
    pub fn new(jobs: Arc<JobManager>, retriever: Arc<Retriever>) -> Self {
        Self { jobs, retriever }
    }
}

/// Build the router with all routes and CORS.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/ingest", axum::routing::post(handle_ingest))
        .route("/ingest/jobs", get(handle_list_jobs))
        .route("/ingest/{job_id}", get(handle_job_info).delete(handle_stop_job))
        .route("/retrieve", axum::routing::post(handle_retrieve))
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server.
///
/// Connects to Qdrant, loads the query embedder and the cross-encoder once,
/// then serves on `[server].bind` until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let config = Arc::new(config.clone());
    let index: Arc<dyn VectorIndex> = Arc::new(QdrantIndex::new(&config.vector_store)?);

    let model_config = config.clone();
    let (embedder, encoder) = tokio::task::spawn_blocking(move || {
        let embedder = create_embedder(&model_config.embedding)?;
        let encoder = create_cross_encoder(&model_config.reranker)?;
        Ok::<_, PipelineError>((embedder, encoder))
    })
    .await??;

    let pipeline = Arc::new(IngestionPipeline::new(
        config.clone(),
        index.clone(),
        embedder_factory(&config.embedding),
    ));
    let retriever = Arc::new(Retriever::new(config.clone(), index, embedder, encoder));
    let state = AppState::new(Arc::new(JobManager::new(pipeline)), retriever);

    let bind_addr = config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "server listening");
    println!("Listening on http://{}", bind_addr);

    axum::serve(listener, router(state)).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"not_found"`).
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        let message = err.to_string();
        match err {
            PipelineError::UnsupportedAssetType(_) => AppError {
                status: StatusCode::BAD_REQUEST,
                code: "unsupported_asset_type".to_string(),
                message,
            },
            PipelineError::InvalidPayload(_) => bad_request(message),
            PipelineError::IndexUnavailable(_) => AppError {
                status: StatusCode::SERVICE_UNAVAILABLE,
                code: "index_unavailable".to_string(),
                message,
            },
            other => {
                error!(code = other.code(), error = %message, "request failed");
                AppError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    code: "internal".to_string(),
                    message,
                }
            }
        }
    }
}

// ============ GET / and GET /health ============

async fn handle_root() -> &'static str {
    "RUNNING"
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ /ingest ============

#[derive(Serialize)]
struct SubmitResponse {
    job_id: String,
}

/// Handler for `POST /ingest`.
///
/// The body is parsed by hand rather than with the `Json` extractor so that
/// malformed payloads get the JSON error contract instead of a plain-text
/// rejection.
async fn handle_ingest(
    State(state): State<AppState>,
    body: String,
) -> Result<Json<SubmitResponse>, AppError> {
    let payload = IngestionPayload::from_json(&body)?;
    let job_id = state.jobs.submit(payload)?;
    Ok(Json(SubmitResponse { job_id }))
}

#[derive(Serialize)]
struct JobListResponse {
    jobs: Vec<JobInfo>,
}

async fn handle_list_jobs(State(state): State<AppState>) -> Json<JobListResponse> {
    Json(JobListResponse {
        jobs: state.jobs.list(),
    })
}

async fn handle_job_info(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobInfo>, AppError> {
    state
        .jobs
        .info(&job_id)
        .map(Json)
        .ok_or_else(|| not_found(format!("no job with id: {}", job_id)))
}

async fn handle_stop_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobInfo>, AppError> {
    state
        .jobs
        .stop(&job_id)
        .map(Json)
        .ok_or_else(|| not_found(format!("no job with id: {}", job_id)))
}

// ============ POST /retrieve ============

async fn handle_retrieve(
    State(state): State<AppState>,
    body: String,
) -> Result<Json<Vec<Context>>, AppError> {
    let request: RetrievalPayload =
        serde_json::from_str(&body).map_err(|e| bad_request(e.to_string()))?;
    if request.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let contexts = state.retriever.retrieve(&request).await?;
    Ok(Json(contexts))
}
