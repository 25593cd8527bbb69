//! Text embeddings for the knowledge stores.
//!
//! The [`Embedder`] trait is the seam for a real embedding model. The default
//! [`HashEmbedder`] uses hashed word and character-trigram features, which is
//! deterministic, needs no model download, and ranks texts sharing
//! vocabulary (error names, component names) close together.

use async_trait::async_trait;
use ndarray::Array1;
use sha2::{Digest, Sha256};

use crate::error::StoreError;

/// Dense embedding vector.
pub type Embedding = Array1<f64>;

/// Default embedding dimension.
pub const DEFAULT_DIMENSION: usize = 256;

/// Produces fixed-dimension embeddings for text.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Dimension of every vector this embedder returns.
    fn dimension(&self) -> usize;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Embedding, StoreError>;
}

/// Hash-based embedder over words and character trigrams.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

impl HashEmbedder {
    /// Creates an embedder producing vectors of `dimension` (minimum 8).
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(8),
        }
    }

    /// Embed text synchronously.
    ///
    /// Layout: the first half holds word features, the next quarter
    /// character trigrams, the rest simple length statistics.
    pub fn embed_text(&self, text: &str) -> Embedding {
        let mut embedding = Array1::zeros(self.dimension);

        let text_lower = text.to_lowercase();
        let words: Vec<&str> = text_lower
            .split(|c: char| !(c.is_alphanumeric() || c == '_'))
            .filter(|w| !w.is_empty())
            .collect();
        if words.is_empty() {
            return embedding;
        }

        let word_dim = self.dimension / 2;
        for word in &words {
            let pos = hash_to_index(word, word_dim);
            embedding[pos] += 1.0 / words.len() as f64;
        }

        let offset = word_dim;
        let trigram_dim = self.dimension / 4;
        let chars: Vec<char> = text_lower.chars().collect();
        let trigram_count = chars.len().saturating_sub(2).max(1) as f64;
        for window in chars.windows(3) {
            let trigram: String = window.iter().collect();
            let pos = offset + hash_to_index(&trigram, trigram_dim);
            embedding[pos] += 1.0 / trigram_count;
        }

        let stats_offset = offset + trigram_dim;
        embedding[stats_offset] = (text.len() as f64 / 2000.0).min(1.0) * 0.1;
        embedding[stats_offset + 1] = (words.len() as f64 / 300.0).min(1.0) * 0.1;

        normalize(&mut embedding);
        embedding
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Embedding, StoreError> {
        Ok(self.embed_text(text))
    }
}

/// Hashes a string to an index in [0, max_index).
fn hash_to_index(input: &str, max_index: usize) -> usize {
    if max_index == 0 {
        return 0;
    }
    let hash_bytes = Sha256::digest(input.as_bytes());
    let hash_val = u32::from_be_bytes([hash_bytes[0], hash_bytes[1], hash_bytes[2], hash_bytes[3]]);
    hash_val as usize % max_index
}

/// Normalizes a vector to unit length (L2 norm).
fn normalize(v: &mut Embedding) {
    let norm = v.dot(v).sqrt();
    if norm > 1e-10 {
        v.mapv_inplace(|x| x / norm);
    }
}

/// Cosine similarity; 0.0 for mismatched lengths or zero vectors.
pub fn cosine_similarity(a: &Embedding, b: &Embedding) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }
    let norm_a = a.dot(a).sqrt();
    let norm_b = b.dot(b).sqrt();
    if norm_a < 1e-10 || norm_b < 1e-10 {
        return 0.0;
    }
    a.dot(b) / (norm_a * norm_b)
}
