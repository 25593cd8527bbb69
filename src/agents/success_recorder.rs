//! Records finalized scripts in the creative store.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::StoreError;
use crate::knowledge::{with_retries, CreativeStore, RecordOutcome};
use crate::metrics::MetricsCollector;

const WRITE_BACKOFF: Duration = Duration::from_millis(100);

/// Writes successes to the creative store, at most once per job.
#[derive(Clone)]
pub struct SuccessRecorder {
    store: Arc<CreativeStore>,
    write_attempts: u32,
    metrics: MetricsCollector,
}

impl SuccessRecorder {
    pub fn new(store: Arc<CreativeStore>, write_attempts: u32) -> Self {
        Self {
            store,
            write_attempts,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn store(&self) -> &Arc<CreativeStore> {
        &self.store
    }

    /// Record `script` for `job_id`.
    ///
    /// Retries transient failures; a job that was already recorded returns
    /// [`RecordOutcome::AlreadyRecorded`] without writing anything.
    pub async fn record(
        &self,
        script: &str,
        concept: &str,
        job_id: &str,
    ) -> Result<RecordOutcome, StoreError> {
        let store = &self.store;
        let result = with_retries("creative_record", self.write_attempts, WRITE_BACKOFF, move || {
            store.record(script, concept, job_id)
        })
        .await;

        match &result {
            Ok(RecordOutcome::Recorded(record)) => {
                info!(job_id, seq = record.seq, "Creative store updated");
            }
            Ok(RecordOutcome::AlreadyRecorded { seq }) => {
                info!(job_id, seq, "Job already recorded in creative store");
            }
            Err(e) => {
                self.metrics.record_store_write_failure("creative");
                warn!(job_id, error = %e, "Failed to record success");
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::HashEmbedder;
    use tempfile::TempDir;

    async fn recorder(dir: &TempDir) -> SuccessRecorder {
        let store = CreativeStore::open(dir.path(), "py", Arc::new(HashEmbedder::new(32)))
            .await
            .expect("store");
        SuccessRecorder::new(Arc::new(store), 3)
    }

    #[tokio::test]
    async fn test_record_is_idempotent_per_job() {
        let dir = TempDir::new().expect("tempdir");
        let recorder = recorder(&dir).await;

        let first = recorder
            .record("print('a')", "An RC filter", "job-1")
            .await
            .expect("record");
        let second = recorder
            .record("print('b')", "An RC filter", "job-1")
            .await
            .expect("record");

        let RecordOutcome::Recorded(record) = first else {
            panic!("expected a new record");
        };
        assert_eq!(second, RecordOutcome::AlreadyRecorded { seq: record.seq });
        assert_eq!(recorder.store().len().await, 1);
    }

    #[tokio::test]
    async fn test_blank_script_fails_after_retries() {
        let dir = TempDir::new().expect("tempdir");
        let recorder = recorder(&dir).await;
        let result = recorder.record("  ", "concept", "job-2").await;
        assert!(matches!(result, Err(StoreError::InvalidRecord(_))));
    }
}
