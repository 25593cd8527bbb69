//! Persistent knowledge stores.
//!
//! Two independent, append-only stores feed later generations:
//!
//! - [`CorrectiveStore`] - mined error pattern to fix records (SQLite)
//! - [`CreativeStore`] - fully successful scripts with concept embeddings (files + JSONL)
//!
//! Both allow concurrent readers and serialise writers internally. Embeddings
//! come from an [`Embedder`]; [`HashEmbedder`] is the built-in implementation.

pub mod corrective;
pub mod creative;
pub mod embedding;
pub mod retry;
pub mod vector_index;

pub use corrective::{CorrectiveRecord, CorrectiveStore, NewCorrectiveRecord};
pub use creative::{CreativeStore, ExampleHit, RecordOutcome, SuccessRecord};
pub use embedding::{cosine_similarity, Embedder, Embedding, HashEmbedder};
pub use retry::with_retries;
pub use vector_index::{Neighbor, VectorIndex};
