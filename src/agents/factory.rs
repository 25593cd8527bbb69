//! Job factory.
//!
//! Shared resources are initialized serially, then up to `workers` job
//! orchestrators run at once. A job's panic or internal error is contained
//! as an abandoned job; siblings keep running. Interruption stops dispatch,
//! lets running jobs reach a terminal state and drains pending mining.

use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::WeaverConfig;
use crate::error::StoreError;
use crate::knowledge::embedding::DEFAULT_DIMENSION;
use crate::knowledge::{CorrectiveStore, CreativeStore, Embedder, HashEmbedder};
use crate::llm::BackendSet;
use crate::metrics::{init_metrics, write_metrics_file, MetricsCollector};
use crate::prompts::STYLE_GUIDE_SAMPLE;
use crate::retrieval::{Retriever, StaticDocIndex};
use crate::sandbox::JobWorkspace;

use super::mining::MiningDispatcher;
use super::orchestrator::{read_job_record, write_job_record, JobOrchestrator, JobSpec};
use super::solution_miner::SolutionMiner;
use super::types::{AbandonReason, Job, JobOutcome};

/// Text embedded once before any worker starts.
pub const WARM_UP_QUERY: &str = "warm-up query";

/// Name of the metrics dump written to the results directory at shutdown.
pub const METRICS_FILE: &str = "metrics.prom";

/// Read-only resources shared by every job.
#[derive(Clone)]
pub struct SharedResources {
    pub config: Arc<WeaverConfig>,
    pub embedder: Arc<dyn Embedder>,
    pub retriever: Retriever,
    pub style_guide: Arc<str>,
}

impl SharedResources {
    /// Warm up the embedder, open both stores and load the docs index, in that
    /// order, on the calling task.
    pub async fn initialize(config: Arc<WeaverConfig>) -> Result<Self, StoreError> {
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(DEFAULT_DIMENSION));
        Self::initialize_with(config, embedder).await
    }

    pub async fn initialize_with(
        config: Arc<WeaverConfig>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, StoreError> {
        let started = Instant::now();
        let paths = &config.paths;

        embedder.embed(WARM_UP_QUERY).await?;

        let corrective = CorrectiveStore::open(
            &paths.corrective_db,
            &paths.solutions_log,
            Arc::clone(&embedder),
        )
        .await?;
        let creative = CreativeStore::open(
            &paths.success_repo_dir,
            config.script_extension(),
            Arc::clone(&embedder),
        )
        .await?;
        let docs = StaticDocIndex::load(&paths.docs_index, Arc::clone(&embedder)).await?;

        let style_guide: Arc<str> = match &paths.style_guide {
            Some(path) => Arc::from(tokio::fs::read_to_string(path).await?),
            None => Arc::from(STYLE_GUIDE_SAMPLE),
        };

        info!(
            corrective_records = corrective.len().await,
            creative_records = creative.len().await,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Shared resources ready"
        );

        Ok(Self {
            retriever: Retriever::new(Arc::new(docs), Arc::new(corrective), Arc::new(creative)),
            config,
            embedder,
            style_guide,
        })
    }
}

/// Summary of a factory run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FactoryReport {
    pub dispatched: usize,
    pub done: usize,
    pub abandoned: usize,
    pub mined_records: usize,
    pub interrupted: bool,
    pub elapsed: Duration,
    pub metrics_file: Option<PathBuf>,
}

impl FactoryReport {
    fn tally(&mut self, joined: Result<Job, JoinError>) {
        match joined {
            Ok(job) if job.is_done() => self.done += 1,
            Ok(_) => self.abandoned += 1,
            Err(e) => {
                error!(error = %e, "Job task was lost");
                self.abandoned += 1;
            }
        }
    }
}

/// Runs many jobs over a bounded worker pool.
pub struct JobFactory {
    resources: SharedResources,
    backends: BackendSet,
}

impl JobFactory {
    pub fn new(resources: SharedResources, backends: BackendSet) -> Self {
        Self {
            resources,
            backends,
        }
    }

    pub fn resources(&self) -> &SharedResources {
        &self.resources
    }

    /// Run `total_jobs` jobs (0 runs until `shutdown` turns true) with at
    /// most `workers` jobs in flight.
    pub async fn run(
        &self,
        total_jobs: usize,
        workers: usize,
        mut shutdown: watch::Receiver<bool>,
    ) -> FactoryReport {
        let started = Instant::now();
        let config = Arc::clone(&self.resources.config);
        let workers = workers.max(1);

        if let Err(e) = init_metrics() {
            warn!(error = %e, "Metrics registry unavailable");
        }

        let miner = SolutionMiner::new(
            self.backends.miner.clone(),
            Arc::clone(self.resources.retriever.corrective()),
            config.script_language(),
            config.store_write_retries,
        );
        let mining =
            MiningDispatcher::new(Arc::new(miner), config.mining_concurrency_for(workers));
        let orchestrator = Arc::new(JobOrchestrator::new(
            Arc::clone(&config),
            self.backends.clone(),
            self.resources.retriever.clone(),
            mining.clone(),
            Arc::clone(&self.resources.style_guide),
        ));

        info!(
            total_jobs,
            workers,
            fixers = self.backends.fixers.len(),
            "Factory started"
        );

        let permits = Arc::new(Semaphore::new(workers));
        let mut tasks: JoinSet<Job> = JoinSet::new();
        let mut report = FactoryReport::default();

        loop {
            if total_jobs > 0 && report.dispatched >= total_jobs {
                break;
            }

            tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => {
                    info!(running = tasks.len(), "Shutdown requested, no new jobs will start");
                    report.interrupted = true;
                    break;
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => report.tally(joined),
                permit = Arc::clone(&permits).acquire_owned() => {
                    let Ok(permit) = permit else { break };
                    report.dispatched += 1;
                    let job_id = next_job_id(report.dispatched);
                    let orchestrator = Arc::clone(&orchestrator);
                    tasks.spawn(async move {
                        let _permit = permit;
                        run_contained(&orchestrator, job_id).await
                    });
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            report.tally(joined);
        }

        let mined = mining.drain().await;
        report.mined_records = mined.iter().map(|r| r.committed.len()).sum();

        let metrics_path = config.paths.results_dir.join(METRICS_FILE);
        match write_metrics_file(&metrics_path).await {
            Ok(()) => report.metrics_file = Some(metrics_path),
            Err(e) => warn!(path = %metrics_path.display(), error = %e, "Failed to write metrics"),
        }

        report.elapsed = started.elapsed();
        info!(
            dispatched = report.dispatched,
            done = report.done,
            abandoned = report.abandoned,
            mined_records = report.mined_records,
            interrupted = report.interrupted,
            elapsed_secs = report.elapsed.as_secs_f64(),
            "Factory finished"
        );
        report
    }
}

/// Run one job, turning a panic into an abandoned job.
///
/// The job directory is created up front so a panicked job still leaves its
/// `job.json` behind.
async fn run_contained(orchestrator: &JobOrchestrator, job_id: String) -> Job {
    let workspace = match JobWorkspace::create(
        &orchestrator.config().paths.results_dir,
        &job_id,
        Utc::now(),
    )
    .await
    {
        Ok(workspace) => Some(workspace),
        Err(e) => {
            warn!(job_id = %job_id, error = %e, "Could not pre-create job directory");
            None
        }
    };
    let root = workspace.as_ref().map(|w| w.root().to_path_buf());

    let spec = match workspace {
        Some(workspace) => JobSpec::new(job_id.clone()).with_workspace(workspace),
        None => JobSpec::new(job_id.clone()),
    };

    match AssertUnwindSafe(orchestrator.run(spec)).catch_unwind().await {
        Ok(job) => job,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(job_id = %job_id, panic = %message, "Job panicked");

            let metrics = MetricsCollector::new();
            metrics.job_finished();
            metrics.record_job("abandoned", 0.0);

            let mut job = match &root {
                Some(root) => read_job_record(root).await,
                None => None,
            }
            .unwrap_or_else(|| Job::new(job_id));
            job.workspace = root.clone();
            job.finish(JobOutcome::Abandoned {
                reason: AbandonReason::Internal {
                    message: format!("job panicked: {}", message),
                },
            });
            if let Some(root) = &root {
                write_job_record(root, &job).await;
            }
            job
        }
    }
}

/// Resolves once shutdown is requested. Never resolves if the sender is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let sender_alive = shutdown.wait_for(|stop| *stop).await.is_ok();
    if !sender_alive {
        std::future::pending::<()>().await;
    }
}

fn next_job_id(seq: usize) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("job-{:05}-{}", seq, &suffix[..8])
}
