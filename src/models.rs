//! Core data models used throughout docchat.
//!
//! These types represent the uploads, documents, chunks, conversation
//! exchanges, and reports that flow through the ingestion and query pipeline.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A file as received from the upload surface, before decoding.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    /// Declared MIME type, if the client sent one.
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            content_type: None,
            bytes: bytes.into(),
        }
    }
}

/// How an uploaded file is decoded into text. Resolved once from the filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Text,
    Markdown,
    /// Anything else: decoded as UTF-8, invalid bytes dropped.
    Other,
}

/// Decoded text of one uploaded file (or one part of it).
#[derive(Debug, Clone)]
pub struct Document {
    pub source: String,
    pub text: String,
    pub format: DocumentFormat,
}

/// A contiguous slice of a document's text.
#[derive(Debug, Clone, Serialize)]
pub struct Chunk {
    pub id: String,
    /// Filename of the originating upload.
    pub source: String,
    pub chunk_index: i64,
    /// Character offset of the chunk's first character within its document.
    pub offset: usize,
    pub text: String,
    pub hash: String,
}

/// One question/answer turn recorded in conversation memory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Exchange {
    pub exchange_id: u64,
    pub timestamp: DateTime<Utc>,
    pub question: String,
    pub response: String,
    pub sources: Vec<String>,
}

/// Point-in-time description of the memory log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemorySummary {
    pub total: usize,
    pub is_empty: bool,
    pub is_full: bool,
    pub latest_timestamp: Option<DateTime<Utc>>,
}

/// Outcome of one ingestion batch.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub processed_files: Vec<String>,
    pub total_chunks: usize,
    /// Per-file failures, formatted as `Error with <file>: <reason>`.
    pub errors: Vec<String>,
    pub success: bool,
}

/// Answer to one question. `success` is false when generation failed.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub response: String,
    pub sources: Vec<String>,
    pub num_sources: usize,
    pub memory_length: usize,
    pub success: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub documents_loaded: bool,
    pub index_ready: bool,
    pub memory_summary: MemorySummary,
    pub max_memory: usize,
}
