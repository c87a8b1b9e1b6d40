//! # docchat
//!
//! Retrieval-augmented chat over uploaded documents.
//!
//! Uploaded files are decoded to text, split into overlapping chunks, and
//! embedded into an in-memory vector index. Each question retrieves the most
//! similar chunks, combines them with a short window of recent conversation,
//! and asks an answer generator for a grounded reply. Every exchange is kept
//! in a bounded conversation log.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌─────────────┐
//! │ Uploads  │──▶│  Decode   │──▶│ Chunk+Embed │──▶ VectorIndex
//! │ PDF/TXT  │   │ per file  │   │             │         │
//! └──────────┘   └───────────┘   └─────────────┘         ▼
//!                                  question ──▶ Context + History ──▶ Generator
//!                                                        ▲               │
//!                                            ConversationMemory ◀────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docchat serve                                   # HTTP API on 127.0.0.1:8000
//! docchat ask notes.md --question "What changed?" # one-shot answer
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Pipeline and decode errors |
//! | [`extract`] | Per-format text decoding |
//! | [`chunk`] | Overlapping text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | In-memory vector index |
//! | [`memory`] | Bounded conversation log |
//! | [`context`] | Context assembly and prompt rendering |
//! | [`generation`] | Answer generator abstraction |
//! | [`pipeline`] | Ingestion and query orchestration |
//! | [`server`] | HTTP API |

pub mod chunk;
pub mod config;
pub mod context;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generation;
mod http;
pub mod index;
pub mod memory;
pub mod models;
pub mod pipeline;
pub mod server;
