//! Per-job and per-attempt directory allocation.
//!
//! Layout under the results directory:
//!
//! ```text
//! results/
//!   20250101_120000_job-3f2a9c1d/
//!     job.json
//!     attempt_000_initial/
//!     attempt_001_fixer-0/
//!     attempt_002_fixer-1/
//!     attempt_003_final/
//!     final_script.py
//!     final_circuit_diagram.svg
//! ```
//!
//! Directories are created with `create_dir`, never `create_dir_all`, on the
//! leaf so that a name collision fails loudly instead of sharing a directory.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::error::SandboxError;

/// Root directory of a single job's artifacts.
#[derive(Debug, Clone)]
pub struct JobWorkspace {
    root: PathBuf,
}

impl JobWorkspace {
    /// Create the job directory `{date}_{time}_job-{job_id}` under `results_dir`.
    pub async fn create(
        results_dir: &Path,
        job_id: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Self, SandboxError> {
        tokio::fs::create_dir_all(results_dir)
            .await
            .map_err(|source| SandboxError::Workspace {
                path: results_dir.to_path_buf(),
                source,
            })?;

        let name = format!(
            "{}_job-{}",
            created_at.format("%Y%m%d_%H%M%S"),
            sanitize_label(job_id)
        );
        let root = results_dir.join(name);
        create_unique_dir(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the attempt directory for `index` and `label`, without creating it.
    pub fn attempt_path(&self, index: u32, label: &str) -> PathBuf {
        self.root
            .join(format!("attempt_{:03}_{}", index, sanitize_label(label)))
    }

    /// Create a fresh, empty attempt directory.
    pub async fn create_attempt_dir(&self, index: u32, label: &str) -> Result<PathBuf, SandboxError> {
        let path = self.attempt_path(index, label);
        create_unique_dir(&path).await?;
        Ok(path)
    }
}

async fn create_unique_dir(path: &Path) -> Result<(), SandboxError> {
    match tokio::fs::create_dir(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            Err(SandboxError::WorkspaceExists(path.to_path_buf()))
        }
        Err(source) => Err(SandboxError::Workspace {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Keep only characters safe in a directory name.
pub fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches(|c| c == '.' || c == '-');
    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned.to_string()
    }
}
