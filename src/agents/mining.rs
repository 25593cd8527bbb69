//! Asynchronous dispatch of solution mining.
//!
//! A job hands its resolved chain to the dispatcher and continues at once.
//! Mining tasks share a semaphore so they never starve job workers, and the
//! factory drains every pending task before it exits.

use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::solution_miner::{MiningReport, SolutionMiner};
use super::types::ResolvedChain;

/// Bounded background pool for mining tasks.
#[derive(Clone)]
pub struct MiningDispatcher {
    miner: Arc<SolutionMiner>,
    permits: Arc<Semaphore>,
    handles: Arc<Mutex<Vec<JoinHandle<Option<MiningReport>>>>>,
}

impl MiningDispatcher {
    pub fn new(miner: Arc<SolutionMiner>, concurrency: usize) -> Self {
        Self {
            miner,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            handles: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queue `chain` for mining. Returns immediately.
    pub async fn dispatch(&self, chain: ResolvedChain) {
        let miner = Arc::clone(&self.miner);
        let permits = Arc::clone(&self.permits);
        let job_id = chain.job_id.clone();

        let handle = tokio::spawn(async move {
            let _permit = permits.acquire_owned().await.ok()?;
            match miner.mine(chain).await {
                Ok(report) => {
                    info!(
                        job_id = %report.job_id,
                        committed = report.committed.len(),
                        duplicates = report.duplicates,
                        failed = report.failed,
                        "Mining finished"
                    );
                    Some(report)
                }
                Err(e) => {
                    warn!(job_id = %job_id, error = %e, "Mining failed");
                    None
                }
            }
        });

        let mut handles = self.handles.lock().await;
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
        debug!(pending = handles.len(), "Mining task queued");
    }

    /// Wait for every queued mining task, including ones queued while draining.
    pub async fn drain(&self) -> Vec<MiningReport> {
        let mut reports = Vec::new();
        loop {
            let batch: Vec<_> = std::mem::take(&mut *self.handles.lock().await);
            if batch.is_empty() {
                break;
            }
            for handle in batch {
                match handle.await {
                    Ok(Some(report)) => reports.push(report),
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "Mining task panicked"),
                }
            }
        }
        reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::types::{Attempt, FailureChain};
    use crate::config::BackendSpec;
    use crate::knowledge::{CorrectiveStore, HashEmbedder};
    use crate::llm::testing::MockLlmProvider;
    use crate::llm::Backend;
    use crate::sandbox::{ErrorSignature, Verdict};
    use chrono::Utc;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;

    fn attempt(job: &str, index: u32, failed: Option<&str>) -> Attempt {
        Attempt {
            job_id: job.to_string(),
            index,
            round: index,
            origin: "fixer-0".to_string(),
            script: "pass".to_string(),
            working_dir: PathBuf::from("/tmp"),
            stdout: String::new(),
            stderr: String::new(),
            verdict: match failed {
                Some(line) => Verdict::Failure {
                    signature: ErrorSignature::from_core_line(line),
                    error_text: line.to_string(),
                },
                None => Verdict::Success { artifacts: vec![] },
            },
            started_at: Utc::now(),
            finished_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_drain_waits_for_all_chains() {
        let dir = TempDir::new().expect("tempdir");
        let store = Arc::new(
            CorrectiveStore::open(
                &dir.path().join("kb.db"),
                &dir.path().join("log.md"),
                Arc::new(HashEmbedder::new(32)),
            )
            .await
            .expect("store"),
        );
        let provider = MockLlmProvider::new(vec![
            r#"[{"chain_positions":[0],"error_pattern":"NameError: a","solution":"Define a."}]"#,
            r#"[{"chain_positions":[0],"error_pattern":"NameError: b","solution":"Define b."}]"#,
            r#"[{"chain_positions":[0],"error_pattern":"NameError: c","solution":"Define c."}]"#,
        ])
        .with_delay(Duration::from_millis(20));
        let miner = SolutionMiner::new(
            Backend::new(BackendSpec::new("miner", 0.1), Arc::new(provider)),
            store.clone(),
            "python",
            2,
        );
        let dispatcher = MiningDispatcher::new(Arc::new(miner), 1);

        for (i, name) in ["a", "b", "c"].iter().enumerate() {
            let job = format!("job-{}", i);
            let mut chain = FailureChain::new(job.clone());
            chain.push(attempt(&job, 0, Some(&format!("NameError: {}", name))));
            dispatcher.dispatch(chain.close(attempt(&job, 1, None))).await;
        }

        let reports = dispatcher.drain().await;
        assert_eq!(reports.len(), 3);
        assert_eq!(store.len().await, 3);
        assert!(dispatcher.drain().await.is_empty());
    }
}
