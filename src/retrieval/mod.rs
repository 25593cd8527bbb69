//! Retrieval layer.
//!
//! Answers "what do we already know about this?" for a circuit concept or an
//! error description, from up to three independently queryable sources:
//!
//! - [`Source::Docs`] - the static documentation index
//! - [`Source::Corrective`] - mined error to fix records
//! - [`Source::Creative`] - previously successful scripts
//!
//! Each source ranks by embedding similarity (ties most-recent-first) and
//! every snippet is tagged with its source. A source that is empty or fails
//! contributes nothing; retrieval never returns an error.

pub mod docs;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::knowledge::{CorrectiveStore, CreativeStore};

pub use docs::{DocChunk, DocumentIndex, StaticDocIndex};

/// A queryable knowledge source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Docs,
    Corrective,
    Creative,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Docs => write!(f, "docs"),
            Source::Corrective => write!(f, "corrective"),
            Source::Creative => write!(f, "creative"),
        }
    }
}

/// One retrieved piece of context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snippet {
    pub source: Source,
    /// Doc title, error pattern, or originating concept.
    pub title: String,
    /// Doc text, fix strategy, or script text.
    pub content: String,
    pub score: f64,
}

/// Queries the documentation index and both knowledge stores.
#[derive(Clone)]
pub struct Retriever {
    docs: Arc<dyn DocumentIndex>,
    corrective: Arc<CorrectiveStore>,
    creative: Arc<CreativeStore>,
}

impl Retriever {
    pub fn new(
        docs: Arc<dyn DocumentIndex>,
        corrective: Arc<CorrectiveStore>,
        creative: Arc<CreativeStore>,
    ) -> Self {
        Self {
            docs,
            corrective,
            creative,
        }
    }

    pub fn corrective(&self) -> &Arc<CorrectiveStore> {
        &self.corrective
    }

    pub fn creative(&self) -> &Arc<CreativeStore> {
        &self.creative
    }

    /// Up to `k` snippets from each requested source, grouped in the order
    /// the sources were given and ranked within each group.
    pub async fn retrieve(&self, query: &str, sources: &[Source], k: usize) -> Vec<Snippet> {
        let lookups = sources.iter().map(|source| self.retrieve_one(query, *source, k));
        futures::future::join_all(lookups)
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    async fn retrieve_one(&self, query: &str, source: Source, k: usize) -> Vec<Snippet> {
        let result = match source {
            Source::Docs => self.docs.query(query, k).await.map(|hits| {
                hits.into_iter()
                    .map(|(chunk, score)| Snippet {
                        source,
                        title: chunk.title,
                        content: chunk.content,
                        score,
                    })
                    .collect::<Vec<_>>()
            }),
            Source::Corrective => self.corrective.search(query, k).await.map(|hits| {
                hits.into_iter()
                    .map(|(record, score)| Snippet {
                        source,
                        title: record.error_pattern,
                        content: record.solution,
                        score,
                    })
                    .collect()
            }),
            Source::Creative => self.creative.search(query, k).await.map(|hits| {
                hits.into_iter()
                    .map(|hit| Snippet {
                        source,
                        title: hit.record.concept,
                        content: hit.script,
                        score: hit.score,
                    })
                    .collect()
            }),
        };

        result.unwrap_or_else(|e| {
            warn!(source = %source, error = %e, "Retrieval source failed, continuing without it");
            Vec::new()
        })
    }
}
