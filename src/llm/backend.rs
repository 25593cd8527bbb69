//! Named generation backends.
//!
//! A [`Backend`] binds a [`BackendSpec`] (name, model, sampling settings) to a
//! provider. The racing coordinator addresses each fixer backend
//! independently by name.

use std::fmt;
use std::sync::Arc;

use crate::config::{BackendSpec, BackendsConfig};
use crate::error::LlmError;
use crate::llm::litellm::{GenerationRequest, LlmProvider, Message};

const DEFAULT_MAX_TOKENS: u32 = 8192;

/// A generation backend addressable by name.
#[derive(Clone)]
pub struct Backend {
    spec: BackendSpec,
    provider: Arc<dyn LlmProvider>,
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend").field("spec", &self.spec).finish()
    }
}

impl Backend {
    pub fn new(spec: BackendSpec, provider: Arc<dyn LlmProvider>) -> Self {
        Self { spec, provider }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &BackendSpec {
        &self.spec
    }

    /// Send the conversation and return the text of the first choice.
    ///
    /// An empty or whitespace-only completion is an error.
    pub async fn complete(&self, messages: Vec<Message>) -> Result<String, LlmError> {
        let request = GenerationRequest::new(self.spec.model.clone().unwrap_or_default(), messages)
            .with_temperature(self.spec.temperature)
            .with_max_tokens(self.spec.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS));

        let response = self.provider.generate(request).await?;
        let content = response
            .first_content()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| LlmError::EmptyCompletion(self.spec.name.clone()))?;

        Ok(content.to_string())
    }
}

/// All backends a job needs.
#[derive(Debug, Clone)]
pub struct BackendSet {
    pub planner: Backend,
    pub coder: Backend,
    pub miner: Backend,
    pub fixers: Vec<Backend>,
}

impl BackendSet {
    /// Build every configured backend on top of one shared provider.
    pub fn from_config(config: &BackendsConfig, provider: Arc<dyn LlmProvider>) -> Self {
        let bind = |spec: &BackendSpec| Backend::new(spec.clone(), Arc::clone(&provider));
        Self {
            planner: bind(&config.planner),
            coder: bind(&config.coder),
            miner: bind(&config.miner),
            fixers: config.fixers.iter().map(bind).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::MockLlmProvider;

    #[tokio::test]
    async fn test_complete_returns_trimmed_content() {
        let provider = Arc::new(MockLlmProvider::new(vec!["  hello  \n"]));
        let backend = Backend::new(BackendSpec::new("planner", 0.9), provider.clone());

        let text = backend
            .complete(vec![Message::user("hi")])
            .await
            .expect("completion");
        assert_eq!(text, "hello");

        let requests = provider.requests();
        assert_eq!(requests[0].temperature, Some(0.9));
        assert_eq!(requests[0].model, "");
    }

    #[tokio::test]
    async fn test_complete_rejects_blank() {
        let provider = Arc::new(MockLlmProvider::new(vec!["   "]));
        let backend = Backend::new(BackendSpec::new("coder", 0.4), provider);

        let result = backend.complete(vec![Message::user("hi")]).await;
        assert!(matches!(result, Err(LlmError::EmptyCompletion(name)) if name == "coder"));
    }

    #[test]
    fn test_backend_set_from_config() {
        let provider = Arc::new(MockLlmProvider::new(Vec::<String>::new()));
        let set = BackendSet::from_config(&BackendsConfig::default(), provider);
        assert_eq!(set.planner.name(), "planner");
        let names: Vec<&str> = set.fixers.iter().map(Backend::name).collect();
        assert_eq!(names, vec!["fixer-0", "fixer-1", "fixer-2"]);
    }
}
