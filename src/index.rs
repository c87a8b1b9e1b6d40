//! Immutable in-memory vector index.
//!
//! Built once per ingestion batch from every chunk of every file in the
//! batch; a new batch builds a new index rather than mutating the old one.
//! Retrieval is brute-force cosine similarity over all stored vectors,
//! with ties broken by the chunk's position in the batch.

use anyhow::{bail, Result};
use serde::Serialize;
use tracing::debug;

use crate::embedding::{cosine_similarity, embed_query, EmbeddingProvider};
use crate::models::Chunk;

/// A retrieved chunk and its cosine relevance score.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

struct StoredVector {
    chunk: Chunk,
    vector: Vec<f32>,
}

pub struct VectorIndex {
    entries: Vec<StoredVector>,
    model: String,
}

impl VectorIndex {
    /// Embed `chunks` in batches of `batch_size` and build the index.
    ///
    /// Fails as a whole if any batch fails or returns the wrong number of
    /// vectors; no partially built index is ever returned.
    pub async fn build(
        chunks: Vec<Chunk>,
        provider: &dyn EmbeddingProvider,
        batch_size: usize,
    ) -> Result<Self> {
        if chunks.is_empty() {
            bail!("cannot build an index from zero chunks");
        }

        let mut vectors = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embedded = provider.embed(&texts).await?;
            if embedded.len() != texts.len() {
                bail!(
                    "embedding provider returned {} vectors for {} texts",
                    embedded.len(),
                    texts.len()
                );
            }
            vectors.extend(embedded);
        }

        let entries: Vec<StoredVector> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| StoredVector { chunk, vector })
            .collect();

        debug!(chunks = entries.len(), model = provider.model_name(), "index built");

        Ok(Self {
            entries,
            model: provider.model_name().to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Model that produced the stored vectors.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// The `k` chunks most similar to `query`, best first.
    pub async fn retrieve(
        &self,
        provider: &dyn EmbeddingProvider,
        query: &str,
        k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let query_vec = embed_query(provider, query).await?;
        Ok(self.nearest(&query_vec, k))
    }

    /// Rank stored vectors against a pre-computed query vector.
    pub fn nearest(&self, query_vec: &[f32], k: usize) -> Vec<ScoredChunk> {
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i, cosine_similarity(query_vec, &e.vector)))
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(k);
        scored
            .into_iter()
            .map(|(i, score)| ScoredChunk {
                chunk: self.entries[i].chunk.clone(),
                score,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::split_text;
    use crate::embedding::HashEmbedder;
    use async_trait::async_trait;

    fn chunk(source: &str, text: &str) -> Chunk {
        split_text(source, text, 1000, 10).unwrap().remove(0)
    }

    #[tokio::test]
    async fn retrieves_most_similar_first() {
        let embedder = HashEmbedder::new(256);
        let index = VectorIndex::build(
            vec![
                chunk("rust.md", "Rust borrow checker and ownership."),
                chunk("france.txt", "Paris is the capital of France."),
                chunk("cooking.txt", "Whisk eggs with sugar until fluffy."),
            ],
            &embedder,
            2,
        )
        .await
        .unwrap();
        assert_eq!(index.len(), 3);

        let hits = index
            .retrieve(&embedder, "What is the capital of France?", 2)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.source, "france.txt");
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn ties_break_by_insertion_order() {
        let embedder = HashEmbedder::new(64);
        let index = VectorIndex::build(
            vec![
                chunk("a.txt", "same words here"),
                chunk("b.txt", "same words here"),
                chunk("c.txt", "same words here"),
            ],
            &embedder,
            64,
        )
        .await
        .unwrap();
        let hits = index.retrieve(&embedder, "same words", 3).await.unwrap();
        let order: Vec<&str> = hits.iter().map(|h| h.chunk.source.as_str()).collect();
        assert_eq!(order, vec!["a.txt", "b.txt", "c.txt"]);
    }

    #[tokio::test]
    async fn k_larger_than_index_returns_all() {
        let embedder = HashEmbedder::new(64);
        let index = VectorIndex::build(vec![chunk("a.txt", "alpha")], &embedder, 8)
            .await
            .unwrap();
        assert_eq!(index.retrieve(&embedder, "alpha", 4).await.unwrap().len(), 1);
        assert_eq!(index.model(), embedder.model_name());
    }

    #[tokio::test]
    async fn empty_build_rejected() {
        let embedder = HashEmbedder::new(8);
        assert!(VectorIndex::build(Vec::new(), &embedder, 8).await.is_err());
    }

    struct ShortProvider;

    #[async_trait]
    impl EmbeddingProvider for ShortProvider {
        fn model_name(&self) -> &str {
            "short"
        }
        fn dims(&self) -> usize {
            1
        }
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(vec![vec![1.0]])
        }
    }

    #[tokio::test]
    async fn mismatched_vector_count_fails_whole_build() {
        let result = VectorIndex::build(
            vec![chunk("a.txt", "one"), chunk("b.txt", "two")],
            &ShortProvider,
            8,
        )
        .await;
        assert!(result.is_err());
    }
}
