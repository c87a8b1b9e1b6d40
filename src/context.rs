//! Context assembly and prompt rendering.
//!
//! For one question this produces the three prompt inputs: the retrieved
//! chunks rendered as text, the recent conversation history, and the
//! deduplicated list of source filenames the answer is grounded on.

use anyhow::Result;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

use crate::embedding::EmbeddingProvider;
use crate::index::{ScoredChunk, VectorIndex};
use crate::memory::{ConversationMemory, NO_HISTORY};

/// Which history a query is answered with.
#[derive(Clone, Copy)]
pub enum MemoryContext<'a> {
    /// Render history from this log.
    Conversation(&'a Mutex<ConversationMemory>),
    /// Answer as if nothing had been asked before.
    Stateless,
}

impl MemoryContext<'_> {
    fn render(self) -> String {
        match self {
            MemoryContext::Conversation(log) => log
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .format_for_prompt(),
            MemoryContext::Stateless => NO_HISTORY.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AssembledContext {
    pub context: String,
    pub history: String,
    /// Distinct filenames of the retrieved chunks, first-seen order.
    pub sources: Vec<String>,
    pub hits: Vec<ScoredChunk>,
}

/// Retrieve the top `k` chunks for `question` and render history alongside.
pub async fn assemble(
    question: &str,
    index: &VectorIndex,
    provider: &dyn EmbeddingProvider,
    top_k: usize,
    memory: MemoryContext<'_>,
) -> Result<AssembledContext> {
    let (hits, history) = tokio::join!(index.retrieve(provider, question, top_k), async {
        memory.render()
    });
    let hits = hits?;

    debug!(
        hits = hits.len(),
        best = hits.first().map(|h| h.score).unwrap_or(0.0),
        "retrieved context"
    );

    Ok(AssembledContext {
        context: format_chunks(&hits),
        history,
        sources: distinct_sources(&hits),
        hits,
    })
}

/// Render chunks as `[<filename>]\n<text>` blocks separated by a blank line.
pub fn format_chunks(hits: &[ScoredChunk]) -> String {
    hits.iter()
        .map(|h| format!("[{}]\n{}", h.chunk.source, h.chunk.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn distinct_sources(hits: &[ScoredChunk]) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();
    for h in hits {
        if !sources.iter().any(|s| s == &h.chunk.source) {
            sources.push(h.chunk.source.clone());
        }
    }
    sources
}

const INSTRUCTIONS: &str = concat!(
    "You are a helpful assistant.\n",
    "Answer based on the provided context and conversation history.\n",
    "Also explain as deeply as possible, highlighting the important portions too.\n",
    "If the content is insufficient, just say you don't know.\n",
    "But if the user asks for code, write it according to the context, and if the context ",
    "is incomplete, complete the code on your own.\n",
    "If the context contains code, reproduce it exactly as it is ",
    "(keep indentation, spacing, and formatting).\n",
    "Do not explain or modify it unless explicitly asked.\n",
    "Wrap all code inside ```language blocks.\n",
    "Answer based on context and chat history:\n\n",
);

/// Render the fixed answer prompt.
///
/// The inputs are substituted in one pass, so braces or section labels
/// inside the context never disturb the template.
pub fn build_prompt(assembled: &AssembledContext, question: &str) -> String {
    format!(
        "{}CONTEXT: {}\n\nCHAT HISTORY: {}\n\nQUESTION: {}\n\nANSWER:",
        INSTRUCTIONS, assembled.context, assembled.history, question
    )
}
