//! Outcome of a single sandboxed run.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::signature::ErrorSignature;

/// Tagged verdict of one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    /// The script exited cleanly and produced every required artifact.
    Success { artifacts: Vec<PathBuf> },
    /// The script raised an error, crashed, or left out a required artifact.
    Failure {
        signature: ErrorSignature,
        error_text: String,
    },
    /// The script was killed after exceeding its wall-clock limit.
    Timeout { limit_ms: u64 },
}

impl Verdict {
    pub fn is_success(&self) -> bool {
        matches!(self, Verdict::Success { .. })
    }

    /// Signature used for retrieval and mining; `None` on success.
    pub fn signature(&self) -> Option<ErrorSignature> {
        match self {
            Verdict::Success { .. } => None,
            Verdict::Failure { signature, .. } => Some(signature.clone()),
            Verdict::Timeout { .. } => Some(ErrorSignature::timeout()),
        }
    }

    /// Error description fed back to repair backends; `None` on success.
    pub fn error_text(&self) -> Option<String> {
        match self {
            Verdict::Success { .. } => None,
            Verdict::Failure { error_text, .. } => Some(error_text.clone()),
            Verdict::Timeout { limit_ms } => Some(format!(
                "Execution timed out after {:.1} seconds and the process was killed. \
                 The script may contain an infinite loop or a blocking call.",
                *limit_ms as f64 / 1000.0
            )),
        }
    }

    /// Label used in metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Success { .. } => "success",
            Verdict::Failure { .. } => "failure",
            Verdict::Timeout { .. } => "timeout",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Structured result of [`super::SandboxExecutor::execute`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptResult {
    pub verdict: Verdict,
    pub stdout: String,
    pub stderr: String,
    /// Exit code, absent when killed or terminated by a signal.
    pub exit_code: Option<i32>,
    pub working_dir: PathBuf,
    pub script_path: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl AttemptResult {
    pub fn is_success(&self) -> bool {
        self.verdict.is_success()
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }

    /// Artifact paths on success, empty otherwise.
    pub fn artifacts(&self) -> &[PathBuf] {
        match &self.verdict {
            Verdict::Success { artifacts } => artifacts,
            _ => &[],
        }
    }
}
