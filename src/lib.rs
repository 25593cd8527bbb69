//! circuit-weaver: a factory for working circuit-diagram scripts.
//!
//! Jobs ideate a circuit, generate a drawing script, run it in a sandbox and
//! repair it by racing several generation backends. Working scripts and mined
//! fixes feed two append-only knowledge stores that later jobs retrieve from.

pub mod agents;
pub mod cli;
pub mod config;
pub mod error;
pub mod knowledge;
pub mod llm;
pub mod metrics;
pub mod prompts;
pub mod retrieval;
pub mod sandbox;
pub mod utils;

pub use agents::{JobFactory, JobOrchestrator, JobOutcome, JobSpec, SharedResources};
pub use config::WeaverConfig;
pub use error::{ConfigError, LlmError, SandboxError, StoreError};
