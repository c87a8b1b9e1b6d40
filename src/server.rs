//! JSON HTTP API over the document-chat pipeline.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/` | API info and endpoint list |
//! | `POST`   | `/upload-files` | Multipart upload (field `files`), replaces the corpus |
//! | `POST`   | `/chat` | Answer `{message}` with conversation history |
//! | `POST`   | `/chat-no-memory` | Answer `{message}` without history |
//! | `GET`    | `/memory` | Full conversation log |
//! | `DELETE` | `/memory` | Clear the conversation log |
//! | `GET`    | `/memory/recent/{n}` | Last `n` exchanges |
//! | `POST`   | `/memory/search?limit=5` | Substring search, body `{message}` |
//! | `GET`    | `/memory/summary` | Log size, fullness, latest timestamp |
//! | `PUT`    | `/memory/max-length/{n}` | Change memory capacity |
//! | `GET`    | `/health` | Health check with pipeline status |
//! | `POST`   | `/reset` | Drop documents and conversation |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_ready", "message": "No documents loaded. Please upload and process files first." } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_ready` (400),
//! `ingestion_failed` (500), `internal` (500).
//!
//! A query whose answer generation failed is still `200`; the body carries
//! `success: false` and an `Error: ...` response.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser front-ends on
//! other ports can call the API.

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::config::Config;
use crate::error::PipelineError;
use crate::models::{Exchange, MemorySummary, PipelineStatus, QueryResponse, UploadedFile};
use crate::pipeline::RagPipeline;

/// Largest accepted upload request body.
const MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

/// Shared application state passed to all route handlers.
type AppState = Arc<RagPipeline>;

/// Starts the HTTP server on `[server].bind` and runs until the process is
/// terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let pipeline = Arc::new(RagPipeline::from_config(config.clone())?);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("listening on http://{}", bind_addr);
    axum::serve(listener, build_router(pipeline)).await?;

    Ok(())
}

/// Builds the router with every endpoint bound to `pipeline`.
pub fn build_router(pipeline: Arc<RagPipeline>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_root))
        .route("/upload-files", post(handle_upload))
        .route("/chat", post(handle_chat))
        .route("/chat-no-memory", post(handle_chat_no_memory))
        .route("/memory", get(handle_memory).delete(handle_clear_memory))
        .route("/memory/recent/{n}", get(handle_recent_memory))
        .route("/memory/search", post(handle_search_memory))
        .route("/memory/summary", get(handle_memory_summary))
        .route("/memory/max-length/{n}", put(handle_max_length))
        .route("/health", get(handle_health))
        .route("/reset", post(handle_reset))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .with_state(pipeline)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"not_ready"`).
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

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        let (status, code) = match &err {
            PipelineError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            PipelineError::NotReady => (StatusCode::BAD_REQUEST, "not_ready"),
            PipelineError::Ingestion(_) => (StatusCode::INTERNAL_SERVER_ERROR, "ingestion_failed"),
            PipelineError::Generation(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        AppError {
            status,
            code: code.to_string(),
            message: err.to_string(),
        }
    }
}

// ============ Request / response bodies ============

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
}

#[derive(Serialize)]
struct MessageResponse {
    message: String,
}

impl MessageResponse {
    fn new(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            message: message.into(),
        })
    }
}

#[derive(Serialize)]
struct MemoryResponse {
    memory: Vec<Exchange>,
    total_exchanges: usize,
}

impl From<Vec<Exchange>> for MemoryResponse {
    fn from(memory: Vec<Exchange>) -> Self {
        Self {
            total_exchanges: memory.len(),
            memory,
        }
    }
}

// ============ GET / ============

async fn handle_root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "message": "Document chat API is running",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "healthy",
        "endpoints": {
            "upload": "/upload-files",
            "chat": "/chat",
            "chat_no_memory": "/chat-no-memory",
            "memory": "/memory",
            "memory_recent": "/memory/recent/{n}",
            "memory_search": "/memory/search",
            "memory_summary": "/memory/summary",
            "memory_max_length": "/memory/max-length/{n}",
            "health": "/health",
            "reset": "/reset",
        }
    }))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    pipeline: PipelineStatus,
}

async fn handle_health(State(pipeline): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        pipeline: pipeline.status().await,
    })
}

// ============ POST /upload-files ============

#[derive(Serialize)]
struct UploadResponse {
    message: String,
    processed_files: Vec<String>,
    total_chunks: usize,
    errors: Vec<String>,
}

/// Handler for `POST /upload-files`.
///
/// Collects every multipart field named `files` and ingests them as one
/// batch. Returns `400` when no file was sent and `500` when nothing in the
/// batch could be indexed.
async fn handle_upload(
    State(pipeline): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut files = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("invalid multipart body: {}", e)))?
    {
        if field.name() != Some("files") {
            continue;
        }
        let filename = field.file_name().unwrap_or("upload").to_string();
        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| bad_request(format!("failed to read {}: {}", filename, e)))?;
        files.push(UploadedFile {
            filename,
            content_type,
            bytes: bytes.to_vec(),
        });
    }

    if files.is_empty() {
        return Err(bad_request("No files uploaded"));
    }

    let report = pipeline.ingest(files).await?;
    Ok(Json(UploadResponse {
        message: format!(
            "Successfully processed {} files with {} chunks",
            report.processed_files.len(),
            report.total_chunks
        ),
        processed_files: report.processed_files,
        total_chunks: report.total_chunks,
        errors: report.errors,
    }))
}

// ============ POST /chat, /chat-no-memory ============

async fn handle_chat(
    State(pipeline): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<QueryResponse>, AppError> {
    Ok(Json(pipeline.query(&req.message).await?))
}

async fn handle_chat_no_memory(
    State(pipeline): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<QueryResponse>, AppError> {
    Ok(Json(pipeline.query_without_memory(&req.message).await?))
}

// ============ /memory ============

async fn handle_memory(State(pipeline): State<AppState>) -> Json<MemoryResponse> {
    Json(pipeline.memory().await.into())
}

async fn handle_clear_memory(State(pipeline): State<AppState>) -> Json<MessageResponse> {
    pipeline.clear_memory().await;
    MessageResponse::new("Conversation memory cleared successfully")
}

/// Negative `n` yields an empty list.
async fn handle_recent_memory(
    State(pipeline): State<AppState>,
    Path(n): Path<i64>,
) -> Json<MemoryResponse> {
    let n = usize::try_from(n).unwrap_or(0);
    Json(pipeline.recent_memory(n).await.into())
}

#[derive(Deserialize)]
struct SearchParams {
    limit: Option<usize>,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<Exchange>,
    query: String,
    total_found: usize,
}

async fn handle_search_memory(
    State(pipeline): State<AppState>,
    Query(params): Query<SearchParams>,
    Json(req): Json<ChatRequest>,
) -> Json<SearchResponse> {
    let results = pipeline
        .search_memory(&req.message, params.limit.unwrap_or(5))
        .await;
    Json(SearchResponse {
        total_found: results.len(),
        results,
        query: req.message,
    })
}

async fn handle_memory_summary(State(pipeline): State<AppState>) -> Json<MemorySummary> {
    Json(pipeline.memory_summary().await)
}

async fn handle_max_length(
    State(pipeline): State<AppState>,
    Path(n): Path<i64>,
) -> Result<Json<MessageResponse>, AppError> {
    let n = usize::try_from(n)
        .ok()
        .filter(|n| *n >= 1)
        .ok_or_else(|| bad_request("Max length must be at least 1"))?;
    pipeline.set_memory_capacity(n).await?;
    Ok(MessageResponse::new(format!(
        "Memory max length set to {}",
        n
    )))
}

// ============ POST /reset ============

async fn handle_reset(State(pipeline): State<AppState>) -> Json<MessageResponse> {
    pipeline.reset().await;
    MessageResponse::new("Pipeline reset successfully")
}
