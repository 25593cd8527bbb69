//! Prompt templates for every generation stage.
//!
//! Templates are rendered with Tera against a serializable context.
//!
//! - [`ideation`] - turning a diagram category into a concrete concept
//! - [`codegen`] - the first script for a concept, with retrieved examples
//! - [`repair`] - one debug round for the racing backends
//! - [`finalize`] - code appended to the winner for its finalization run
//! - [`mining`] - extracting corrective records from a resolved chain
//!
//! # Usage
//!
//! ```ignore
//! use circuit_weaver::prompts::{build_ideation_prompt, build_codegen_prompt};
//!
//! let ideation = build_ideation_prompt("job-7")?;
//! let messages = ideation.into_messages();
//! ```

pub mod codegen;
pub mod finalize;
pub mod ideation;
pub mod mining;
pub mod repair;

use serde::Serialize;

use crate::llm::Message;

pub use codegen::{build_codegen_prompt, CodegenExample, STYLE_GUIDE_SAMPLE};
pub use finalize::{default_epilogue, METADATA_FILE_NAME, PYTHON_METADATA_EPILOGUE};
pub use ideation::{build_ideation_prompt, category_for_job, DIAGRAM_CATEGORIES};
pub use mining::{build_mining_prompt, MiningFailure, MINER_SYSTEM_PROMPT};
pub use repair::{build_repair_prompt, REPAIR_SYSTEM_PROMPT};

/// A system/user prompt pair for one backend call.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }

    pub fn into_messages(self) -> Vec<Message> {
        vec![Message::system(self.system), Message::user(self.user)]
    }
}

/// Render a Tera template against any serializable context.
pub fn render<T: Serialize>(template: &str, context: &T) -> Result<String, tera::Error> {
    let context = tera::Context::from_serialize(context)?;
    tera::Tera::one_off(template, &context, false)
}
