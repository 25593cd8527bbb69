//! Concept ideation through the planner backend.

use crate::llm::Backend;
use crate::prompts::build_ideation_prompt;

use super::error::{AgentError, AgentResult};

/// Produces a one-paragraph diagram concept for a job.
#[derive(Debug, Clone)]
pub struct Ideator {
    backend: Backend,
}

impl Ideator {
    pub fn new(backend: Backend) -> Self {
        Self { backend }
    }

    /// Ask the planner for a concept.
    pub async fn ideate(&self, job_id: &str) -> AgentResult<String> {
        let prompt = build_ideation_prompt(job_id)?;
        let reply = self.backend.complete(prompt.into_messages()).await?;

        let concept = clean_concept(&reply);
        if concept.is_empty() {
            return Err(AgentError::Ideation(format!(
                "planner '{}' returned no concept",
                self.backend.name()
            )));
        }

        tracing::debug!(job_id, chars = concept.len(), "Concept generated");
        Ok(concept)
    }
}

/// Strip fences, markdown headings and a leading "Concept:" label.
fn clean_concept(reply: &str) -> String {
    let body: Vec<&str> = reply
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with("```") && !line.starts_with('#'))
        .collect();
    let joined = body.join(" ");
    let trimmed = joined.trim();
    trimmed
        .strip_prefix("Concept:")
        .or_else(|| trimmed.strip_prefix("**Concept:**"))
        .unwrap_or(trimmed)
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendSpec;
    use crate::llm::testing::MockLlmProvider;
    use std::sync::Arc;

    fn ideator(provider: MockLlmProvider) -> Ideator {
        Ideator::new(Backend::new(
            BackendSpec::new("planner", 0.9),
            Arc::new(provider),
        ))
    }

    #[tokio::test]
    async fn test_ideate_returns_clean_concept() {
        let ideator = ideator(MockLlmProvider::new(vec![
            "# Idea\nConcept: A Simple AGC Loop where a detector\nfeeds a VGA.",
        ]));
        let concept = ideator.ideate("job-1").await.expect("concept");
        assert_eq!(concept, "A Simple AGC Loop where a detector feeds a VGA.");
    }

    #[tokio::test]
    async fn test_ideate_rejects_heading_only_reply() {
        let ideator = ideator(MockLlmProvider::new(vec!["# Title only"]));
        let result = ideator.ideate("job-1").await;
        assert!(matches!(result, Err(AgentError::Ideation(_))));
    }

    #[tokio::test]
    async fn test_ideate_propagates_backend_error() {
        let ideator = ideator(MockLlmProvider::failing("connection refused"));
        let result = ideator.ideate("job-1").await;
        assert!(matches!(result, Err(AgentError::Llm(_))));
    }
}
