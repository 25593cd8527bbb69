//! Generation backends for circuit-weaver.
//!
//! Every model call in the factory goes through the [`LlmProvider`] trait. The
//! production implementation is [`LiteLlmClient`], which speaks the
//! OpenAI-compatible chat completions protocol. [`BackendSet`] binds the
//! configured planner, coder, miner and fixer backends to a provider.
//!
//! ```ignore
//! use circuit_weaver::llm::{BackendSet, LiteLlmClient};
//! use std::sync::Arc;
//!
//! let client = Arc::new(LiteLlmClient::from_env()?);
//! let backends = BackendSet::from_config(&config.backends, client);
//! let concept = backends.planner.complete(messages).await?;
//! ```

pub mod backend;
pub mod litellm;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{Backend, BackendSet};
pub use litellm::{
    Choice, GenerationRequest, GenerationResponse, LiteLlmClient, LlmProvider, Message, Usage,
};
