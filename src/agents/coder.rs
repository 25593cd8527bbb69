//! Initial script generation through the coder backend.

use std::sync::Arc;

use crate::llm::Backend;
use crate::prompts::{build_codegen_prompt, CodegenExample};
use crate::retrieval::Snippet;
use crate::utils::extract_script;

use super::error::{AgentError, AgentResult};

/// Writes the first candidate script for a concept.
#[derive(Debug, Clone)]
pub struct ScriptCoder {
    backend: Backend,
    style_guide: Arc<str>,
    artifacts: Vec<String>,
    language: String,
}

impl ScriptCoder {
    pub fn new(
        backend: Backend,
        style_guide: Arc<str>,
        artifacts: Vec<String>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            style_guide,
            artifacts,
            language: language.into(),
        }
    }

    /// Generate a script for `concept`.
    ///
    /// `examples` are creative-store snippets (title is the concept, content
    /// the script) shown as few-shot context.
    pub async fn generate(&self, concept: &str, examples: &[Snippet]) -> AgentResult<String> {
        let examples: Vec<CodegenExample> = examples
            .iter()
            .map(|snippet| CodegenExample {
                concept: snippet.title.clone(),
                script: snippet.content.clone(),
            })
            .collect();

        let prompt = build_codegen_prompt(
            concept,
            &self.style_guide,
            &examples,
            &self.artifacts,
            &self.language,
        )?;
        let reply = self.backend.complete(prompt.into_messages()).await?;

        extract_script(&reply, Some(self.language.as_str())).ok_or_else(|| {
            AgentError::GenerationFailed(format!(
                "coder '{}' reply contained no script",
                self.backend.name()
            ))
        })
    }
}
