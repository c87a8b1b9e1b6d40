//! Typed failures of the ingestion and query pipeline.
//!
//! Batch-level and readiness errors propagate to callers as
//! [`PipelineError`]. Per-file decode failures never abort a batch; they are
//! reported as [`DecodeError`] text in the ingest report. Generation failures
//! are downgraded to a failed answer inside [`crate::pipeline`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The batch produced nothing to index. State is left unchanged.
    #[error("{0}")]
    Ingestion(String),

    /// A query arrived before any documents were loaded.
    #[error("No documents loaded. Please upload and process files first.")]
    NotReady,

    /// The caller sent an empty batch or an empty question.
    #[error("{0}")]
    InvalidInput(String),

    /// Retrieval or the answer generator failed.
    #[error("{0}")]
    Generation(String),
}

/// Why a single uploaded file could not be turned into documents.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("file is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("no extractable text")]
    Empty,

    #[error("decoder task failed: {0}")]
    Task(String),
}
