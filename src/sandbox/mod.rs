//! Sandbox executor for generated scripts.
//!
//! Runs one candidate script per call in its own empty working directory,
//! with a hard wall-clock limit, and returns a structured [`AttemptResult`]
//! carrying a tagged [`Verdict`].
//!
//! # Example
//!
//! ```rust,ignore
//! use circuit_weaver::sandbox::{SandboxConfig, SandboxExecutor};
//! use std::time::Duration;
//!
//! let executor = SandboxExecutor::new(
//!     SandboxConfig::new("python3", "circuit.py")
//!         .with_required_artifacts(vec!["circuit_diagram.svg".into()]),
//! );
//! let result = executor
//!     .execute(script, &workspace.create_attempt_dir(0, "initial").await?, Duration::from_secs(120))
//!     .await?;
//! if let Some(signature) = result.verdict.signature() {
//!     println!("failed with {}", signature);
//! }
//! ```

pub mod executor;
pub mod result;
pub mod signature;
pub mod workspace;

pub use executor::{SandboxConfig, SandboxExecutor, STDERR_LOG, STDOUT_LOG};
pub use result::{AttemptResult, Verdict};
pub use signature::{core_error_line, ErrorSignature};
pub use workspace::{sanitize_label, JobWorkspace};
