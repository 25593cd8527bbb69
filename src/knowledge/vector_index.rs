//! Exact nearest-neighbour search over store embeddings.
//!
//! Store sizes are in the thousands at most, so a flat scan with cosine
//! similarity is enough. Entries carry the store's append sequence number,
//! which breaks score ties in favour of the most recent entry.

use std::cmp::Reverse;

use ordered_float::OrderedFloat;

use super::embedding::{cosine_similarity, Embedding};
use crate::error::StoreError;

/// A scored search hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Append sequence number of the matching entry.
    pub seq: u64,
    pub score: f64,
}

/// Flat in-memory vector index.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    dimension: usize,
    entries: Vec<(u64, Embedding)>,
}

impl VectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            entries: Vec::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add an entry. Fails when the vector has the wrong dimension.
    pub fn insert(&mut self, seq: u64, embedding: Embedding) -> Result<(), StoreError> {
        if embedding.len() != self.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }
        self.entries.push((seq, embedding));
        Ok(())
    }

    /// Top `k` entries by cosine similarity, ties broken most-recent-first.
    pub fn search(&self, query: &Embedding, k: usize) -> Vec<Neighbor> {
        if k == 0 || self.entries.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<Neighbor> = self
            .entries
            .iter()
            .map(|(seq, embedding)| Neighbor {
                seq: *seq,
                score: cosine_similarity(query, embedding),
            })
            .collect();

        scored.sort_by_key(|n| (Reverse(OrderedFloat(n.score)), Reverse(n.seq)));
        scored.truncate(k);
        scored
    }
}
