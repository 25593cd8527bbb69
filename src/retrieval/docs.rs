//! Read-only documentation index.
//!
//! The index is built offline and shipped as JSONL, one chunk per line:
//!
//! ```json
//! {"title": "schemdraw: Resistor", "content": "elm.Resistor() ...", "embedding": [0.01, ...]}
//! ```
//!
//! `embedding` is optional; chunks without one (or with a vector of the wrong
//! dimension) are embedded on load.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::StoreError;
use crate::knowledge::{Embedder, Embedding, VectorIndex};

/// One documentation chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct DocChunk {
    pub title: String,
    pub content: String,
}

/// Nearest-neighbour query interface over documentation.
#[async_trait]
pub trait DocumentIndex: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The `k` chunks closest to `query`, best first, with scores.
    async fn query(&self, query: &str, k: usize) -> Result<Vec<(DocChunk, f64)>, StoreError>;
}

#[derive(Debug, Deserialize)]
struct DocLine {
    #[serde(default)]
    title: String,
    content: String,
    #[serde(default)]
    embedding: Option<Vec<f64>>,
}

/// Documentation index loaded from a JSONL file.
pub struct StaticDocIndex {
    chunks: Vec<DocChunk>,
    index: VectorIndex,
    embedder: Arc<dyn Embedder>,
}

impl StaticDocIndex {
    /// An index with no chunks.
    pub fn empty(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            chunks: Vec::new(),
            index: VectorIndex::new(embedder.dimension()),
            embedder,
        }
    }

    /// Load the index from `path`. A missing file gives an empty index.
    pub async fn load(path: &Path, embedder: Arc<dyn Embedder>) -> Result<Self, StoreError> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    path = %path.display(),
                    "Documentation index not found, documentation retrieval disabled"
                );
                return Ok(Self::empty(embedder));
            }
            Err(e) => return Err(e.into()),
        };

        let mut index = Self::empty(embedder);
        for (line_no, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let parsed: DocLine = serde_json::from_str(line).map_err(|e| StoreError::Corrupt {
                path: path.to_path_buf(),
                line: line_no + 1,
                reason: e.to_string(),
            })?;
            index
                .push(
                    DocChunk {
                        title: parsed.title,
                        content: parsed.content,
                    },
                    parsed.embedding,
                )
                .await?;
        }

        info!(path = %path.display(), chunks = index.chunks.len(), "Documentation index loaded");
        Ok(index)
    }

    /// Add a chunk, embedding it when no usable vector is supplied.
    pub async fn push(
        &mut self,
        chunk: DocChunk,
        embedding: Option<Vec<f64>>,
    ) -> Result<(), StoreError> {
        let embedding = match embedding {
            Some(v) if v.len() == self.index.dimension() => Embedding::from_vec(v),
            _ => {
                self.embedder
                    .embed(&format!("{}\n{}", chunk.title, chunk.content))
                    .await?
            }
        };
        let seq = self.chunks.len() as u64;
        self.index.insert(seq, embedding)?;
        self.chunks.push(chunk);
        Ok(())
    }
}

#[async_trait]
impl DocumentIndex for StaticDocIndex {
    fn len(&self) -> usize {
        self.chunks.len()
    }

    async fn query(&self, query: &str, k: usize) -> Result<Vec<(DocChunk, f64)>, StoreError> {
        if k == 0 || self.chunks.is_empty() {
            return Ok(Vec::new());
        }
        let query = self.embedder.embed(query).await?;
        Ok(self
            .index
            .search(&query, k)
            .into_iter()
            .filter_map(|n| {
                self.chunks
                    .get(n.seq as usize)
                    .map(|chunk| (chunk.clone(), n.score))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::HashEmbedder;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_is_empty_index() {
        let tmp = TempDir::new().expect("tempdir");
        let index = StaticDocIndex::load(&tmp.path().join("none.jsonl"), Arc::new(HashEmbedder::default()))
            .await
            .expect("loads");
        assert!(index.is_empty());
        assert!(index.query("anything", 3).await.expect("query").is_empty());
    }

    #[tokio::test]
    async fn test_loads_and_queries() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("docs.jsonl");
        std::fs::write(
            &path,
            concat!(
                "{\"title\": \"Resistor\", \"content\": \"elm.Resistor draws a resistor; use .label() for text\"}\n",
                "\n",
                "{\"title\": \"Drawing.save\", \"content\": \"d.save(fname) writes svg or png output\"}\n",
            ),
        )
        .expect("write");

        let index = StaticDocIndex::load(&path, Arc::new(HashEmbedder::default()))
            .await
            .expect("loads");
        assert_eq!(index.len(), 2);

        let hits = index.query("how do I save the drawing to svg", 1).await.expect("query");
        assert_eq!(hits[0].0.title, "Drawing.save");
    }

    #[tokio::test]
    async fn test_corrupt_line_reports_position() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("docs.jsonl");
        std::fs::write(&path, "{\"content\": \"ok\"}\n{broken\n").expect("write");

        let result = StaticDocIndex::load(&path, Arc::new(HashEmbedder::default())).await;
        assert!(matches!(result, Err(StoreError::Corrupt { line: 2, .. })));
    }
}
