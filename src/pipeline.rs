//! The document-chat pipeline.
//!
//! [`RagPipeline`] owns the current vector index and the conversation log
//! and coordinates ingestion and question answering over them. One pipeline
//! is shared per process as `Arc<RagPipeline>`.
//!
//! # State
//!
//! The pipeline is *empty* until a batch is ingested and *loaded* after.
//! Readiness is derived from whether an index exists, so the two can never
//! disagree. [`RagPipeline::reset`] returns to empty.
//!
//! # Locking
//!
//! State sits behind a `tokio::sync::RwLock`. Queries hold a read guard for
//! their whole run, so many can proceed at once; the conversation log has its
//! own short-lived `std::sync::Mutex` for appends. Reset and the commit step
//! of an ingestion take the write guard. Ingestion batches are serialised by
//! a separate async mutex, and the new index is built before the write guard
//! is taken, so a partially built index is never visible.
//!
//! # Query flow
//!
//! ```text
//! question ─┬─► retrieve top_k chunks ─┐
//!           └─► format history ────────┴─► prompt ─► generator ─► record exchange
//! ```

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::chunk::split_documents;
use crate::config::Config;
use crate::context::{assemble, build_prompt, MemoryContext};
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::error::{DecodeError, PipelineError};
use crate::extract::decode_file;
use crate::generation::{create_generator, AnswerGenerator, GenerationRequest};
use crate::index::VectorIndex;
use crate::memory::ConversationMemory;
use crate::models::{
    Document, Exchange, IngestReport, MemorySummary, PipelineStatus, QueryResponse, UploadedFile,
};

struct PipelineState {
    index: Option<Arc<VectorIndex>>,
    memory: Mutex<ConversationMemory>,
}

pub struct RagPipeline {
    config: Config,
    embedder: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn AnswerGenerator>,
    state: RwLock<PipelineState>,
    ingest_lock: tokio::sync::Mutex<()>,
}

impl RagPipeline {
    /// Build a pipeline around explicit providers.
    pub fn new(
        config: Config,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn AnswerGenerator>,
    ) -> Self {
        let memory = ConversationMemory::new(config.memory.max_memory).with_prompt_window(
            config.memory.prompt_window,
            config.memory.answer_preview_chars,
        );
        Self {
            config,
            embedder,
            generator,
            state: RwLock::new(PipelineState {
                index: None,
                memory: Mutex::new(memory),
            }),
            ingest_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Build a pipeline with the providers named in `config`.
    pub fn from_config(config: Config) -> Result<Self> {
        let embedder = create_provider(&config.embedding)?;
        let generator = create_generator(&config.generation)?;
        info!(
            embedding = embedder.model_name(),
            generator = generator.name(),
            "pipeline initialised"
        );
        Ok(Self::new(config, embedder, generator))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // ============ Ingestion ============

    /// Decode, chunk, and index a batch of uploads, replacing the corpus.
    ///
    /// Files that cannot be decoded are reported in
    /// [`IngestReport::errors`] and do not fail the batch. Conversation
    /// memory is left untouched.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::InvalidInput`] for an empty batch.
    /// - [`PipelineError::Ingestion`] if no file yielded text or the index
    ///   could not be built. The previous corpus stays in place.
    pub async fn ingest(&self, files: Vec<UploadedFile>) -> Result<IngestReport, PipelineError> {
        if files.is_empty() {
            return Err(PipelineError::InvalidInput("No files provided".to_string()));
        }

        let _batch = self.ingest_lock.lock().await;
        let started = Instant::now();
        let file_count = files.len();

        let (documents, processed_files, errors) = decode_batch(files).await;
        if documents.is_empty() {
            warn!(files = file_count, "no documents decoded from batch");
            return Err(PipelineError::Ingestion(
                "No documents processed".to_string(),
            ));
        }

        let chunks = split_documents(
            &documents,
            self.config.chunking.chunk_size,
            self.config.chunking.chunk_overlap,
        )?;
        let index = VectorIndex::build(chunks, self.embedder.as_ref(), self.config.embedding.batch_size)
            .await
            .map_err(|e| PipelineError::Ingestion(format!("Failed to build index: {}", e)))?;
        let total_chunks = index.len();
        let model = index.model().to_string();

        self.state.write().await.index = Some(Arc::new(index));

        info!(
            files = processed_files.len(),
            model = %model,
            failed = errors.len(),
            chunks = total_chunks,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "ingested batch"
        );

        Ok(IngestReport {
            processed_files,
            total_chunks,
            errors,
            success: true,
        })
    }

    // ============ Query ============

    /// Answer `question` using the retrieved context and the recent
    /// conversation, then record the exchange.
    pub async fn query(&self, question: &str) -> Result<QueryResponse, PipelineError> {
        self.answer(question, true).await
    }

    /// Answer as if no conversation had happened. The exchange is still
    /// recorded.
    pub async fn query_without_memory(
        &self,
        question: &str,
    ) -> Result<QueryResponse, PipelineError> {
        self.answer(question, false).await
    }

    async fn answer(
        &self,
        question: &str,
        with_history: bool,
    ) -> Result<QueryResponse, PipelineError> {
        if question.trim().is_empty() {
            return Err(PipelineError::InvalidInput(
                "Message cannot be empty".to_string(),
            ));
        }

        let state = self.state.read().await;
        let index = state.index.clone().ok_or(PipelineError::NotReady)?;
        let history = if with_history {
            MemoryContext::Conversation(&state.memory)
        } else {
            MemoryContext::Stateless
        };

        let started = Instant::now();
        let limit = Duration::from_secs(self.config.generation.timeout_secs);
        let outcome = tokio::time::timeout(limit, self.generate(question, &index, history)).await;

        let (response, sources, success) = match outcome {
            Ok(Ok((answer, sources))) => (answer, sources, true),
            Ok(Err(e)) => {
                warn!(error = %e, "query failed");
                (format!("Error: {}", e), Vec::new(), false)
            }
            Err(_) => {
                warn!(timeout_secs = limit.as_secs(), "query timed out");
                (
                    format!(
                        "Error: answer generation timed out after {}s",
                        limit.as_secs()
                    ),
                    Vec::new(),
                    false,
                )
            }
        };

        let memory_length = {
            let mut log = lock(&state.memory);
            log.append(question, response.clone(), sources.clone());
            log.len()
        };

        info!(
            success,
            sources = sources.len(),
            with_history,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "answered query"
        );

        Ok(QueryResponse {
            num_sources: sources.len(),
            response,
            sources,
            memory_length,
            success,
        })
    }

    async fn generate(
        &self,
        question: &str,
        index: &VectorIndex,
        history: MemoryContext<'_>,
    ) -> Result<(String, Vec<String>), PipelineError> {
        let assembled = assemble(
            question,
            index,
            self.embedder.as_ref(),
            self.config.retrieval.top_k,
            history,
        )
        .await
        .map_err(|e| PipelineError::Generation(format!("Retrieval failed: {}", e)))?;

        let request = GenerationRequest {
            prompt: build_prompt(&assembled, question),
            question: question.to_string(),
            context: assembled.context,
        };
        debug!(prompt_chars = request.prompt.len(), generator = self.generator.name(), "generating");

        let answer = self
            .generator
            .generate(&request)
            .await
            .map_err(|e| PipelineError::Generation(e.to_string()))?;
        Ok((answer, assembled.sources))
    }

    // ============ Lifecycle ============

    /// Drop the corpus and the conversation. Memory capacity is kept.
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        state.index = None;
        lock(&state.memory).clear();
        info!("pipeline reset");
    }

    pub async fn status(&self) -> PipelineStatus {
        let state = self.state.read().await;
        let loaded = state.index.is_some();
        let memory = lock(&state.memory);
        PipelineStatus {
            documents_loaded: loaded,
            index_ready: loaded,
            memory_summary: memory.summary(),
            max_memory: memory.capacity(),
        }
    }

    // ============ Memory ============

    pub async fn memory(&self) -> Vec<Exchange> {
        lock(&self.state.read().await.memory).get_all()
    }

    pub async fn recent_memory(&self, n: usize) -> Vec<Exchange> {
        lock(&self.state.read().await.memory).get_recent(n)
    }

    pub async fn search_memory(&self, query: &str, limit: usize) -> Vec<Exchange> {
        lock(&self.state.read().await.memory).search(query, limit)
    }

    pub async fn clear_memory(&self) {
        lock(&self.state.read().await.memory).clear();
        info!("conversation memory cleared");
    }

    pub async fn memory_summary(&self) -> MemorySummary {
        lock(&self.state.read().await.memory).summary()
    }

    /// Change how many exchanges are kept, dropping the oldest if needed.
    pub async fn set_memory_capacity(&self, n: usize) -> Result<(), PipelineError> {
        if n < 1 {
            return Err(PipelineError::InvalidInput(
                "Max length must be at least 1".to_string(),
            ));
        }
        lock(&self.state.read().await.memory).set_capacity(n);
        info!(max_memory = n, "memory capacity changed");
        Ok(())
    }
}

fn lock(memory: &Mutex<ConversationMemory>) -> std::sync::MutexGuard<'_, ConversationMemory> {
    memory.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Decode every file on the blocking pool, keeping input order.
///
/// Returns the decoded documents, the names of files that decoded, and one
/// `Error with <file>: <reason>` line per failure.
async fn decode_batch(files: Vec<UploadedFile>) -> (Vec<Document>, Vec<String>, Vec<String>) {
    let tasks: Vec<_> = files
        .into_iter()
        .map(|file| {
            let name = file.filename.clone();
            (name, tokio::task::spawn_blocking(move || decode_file(&file)))
        })
        .collect();

    let mut documents = Vec::new();
    let mut processed = Vec::new();
    let mut errors = Vec::new();
    for (name, task) in tasks {
        let decoded = match task.await {
            Ok(result) => result,
            Err(e) => Err(DecodeError::Task(e.to_string())),
        };
        match decoded {
            Ok(docs) => {
                let format = docs.first().map(|d| d.format);
                debug!(file = %name, ?format, parts = docs.len(), "decoded");
                documents.extend(docs);
                processed.push(name);
            }
            Err(e) => {
                warn!(file = %name, error = %e, "skipping file");
                errors.push(format!("Error with {}: {}", name, e));
            }
        }
    }
    (documents, processed, errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::generation::ExtractiveGenerator;

    fn pipeline() -> RagPipeline {
        let mut config = Config::default();
        config.chunking.chunk_size = 200;
        config.chunking.chunk_overlap = 20;
        RagPipeline::new(
            config,
            Arc::new(HashEmbedder::new(128)),
            Arc::new(ExtractiveGenerator::default()),
        )
    }

    #[tokio::test]
    async fn query_before_ingest_is_not_ready() {
        let p = pipeline();
        assert!(matches!(p.query("hello?").await, Err(PipelineError::NotReady)));
        assert!(p.memory().await.is_empty());
        assert!(!p.status().await.documents_loaded);
    }

    #[tokio::test]
    async fn empty_batch_rejected() {
        let p = pipeline();
        assert!(matches!(p.ingest(vec![]).await, Err(PipelineError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn decode_batch_keeps_order_and_reports_failures() {
        let (docs, processed, errors) = decode_batch(vec![
            UploadedFile::new("b.txt", "bravo"),
            UploadedFile::new("bad.txt", vec![0xffu8, 0xfe, 0x41]),
            UploadedFile::new("a.md", "alpha"),
        ])
        .await;
        assert_eq!(processed, vec!["b.txt".to_string(), "a.md".to_string()]);
        assert_eq!(docs.len(), 2);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("Error with bad.txt: "));
    }

    #[tokio::test]
    async fn memory_capacity_must_be_positive() {
        let p = pipeline();
        assert!(p.set_memory_capacity(0).await.is_err());
        p.set_memory_capacity(3).await.unwrap();
        assert_eq!(p.status().await.max_memory, 3);
    }

    #[tokio::test]
    async fn reset_keeps_capacity() {
        let p = pipeline();
        p.ingest(vec![UploadedFile::new("a.txt", "Paris is in France.")])
            .await
            .unwrap();
        p.set_memory_capacity(7).await.unwrap();
        p.query("Where is Paris?").await.unwrap();
        p.reset().await;
        let status = p.status().await;
        assert!(!status.documents_loaded);
        assert!(!status.index_ready);
        assert_eq!(status.memory_summary.total, 0);
        assert_eq!(status.max_memory, 7);
    }
}
