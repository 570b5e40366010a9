// src/embed.rs
//! Chunking/embedding collaborator boundary. Vectors are opaque to the
//! pipeline; only the clusterer consumes them, via cosine distance. The
//! `HashingEmbedder` is a deterministic offline fallback so the pipeline
//! and its tests run without a model service.

use anyhow::Result;
use async_trait::async_trait;

use crate::dedup::token_hash64;
use crate::text;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub text: String,
}

#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Split text into chunks suitable for indexing.
    fn chunk(&self, text: &str) -> Vec<Chunk>;
    /// Fixed-length vector for one text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Sentence-accumulating chunker: sentences are packed into chunks of at
/// most `max_chars` characters; an oversized sentence becomes its own chunk.
pub fn chunk_by_sentences(input: &str, max_chars: usize) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for sentence in text::split_sentences(input) {
        if !current.is_empty() && current.len() + sentence.len() + 1 > max_chars {
            chunks.push(Chunk {
                index: chunks.len(),
                text: std::mem::take(&mut current),
            });
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&sentence);
    }
    if !current.is_empty() {
        chunks.push(Chunk {
            index: chunks.len(),
            text: current,
        });
    }
    chunks
}

/// Token-hash bag-of-words embedding, L2-normalized. Deterministic for a
/// fixed input; similar token distributions land near each other, which
/// is all the clusterer needs from the fallback.
pub struct HashingEmbedder {
    dim: usize,
    chunk_chars: usize,
}

impl HashingEmbedder {
    pub fn new(dim: usize, chunk_chars: usize) -> Self {
        Self {
            dim: dim.max(8),
            chunk_chars: chunk_chars.max(200),
        }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(64, 1200)
    }
}

#[async_trait]
impl EmbeddingService for HashingEmbedder {
    fn chunk(&self, text: &str) -> Vec<Chunk> {
        chunk_by_sentences(text, self.chunk_chars)
    }

    async fn embed(&self, input: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0f32; self.dim];
        for token in text::tokenize(input) {
            let bucket = (token_hash64(&token) % self.dim as u64) as usize;
            vector[bucket] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunker_packs_sentences() {
        let text = "One sentence here. Another sentence there. A third one now.";
        let chunks = chunk_by_sentences(text, 45);
        assert!(chunks.len() >= 2);
        assert_eq!(chunks[0].index, 0);
        assert!(chunks.iter().all(|c| !c.text.is_empty()));
    }

    #[tokio::test]
    async fn embedding_is_deterministic_and_normalized() {
        let embedder = HashingEmbedder::default();
        let a = embedder.embed("refinery output fell sharply").await.unwrap();
        let b = embedder.embed("refinery output fell sharply").await.unwrap();
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }
}
