//! Job orchestrator.
//!
//! Drives one job through its states:
//!
//! ```text
//! Ideating -> ContextBuilding -> InitialGenerating -> Validating
//!     -> Finalizing -> Done                      (first script works)
//!     -> Debugging{1..=max} -> Finalizing -> Done
//!     -> Debugging{1..=max} -> Abandoned         (rounds exhausted)
//! InitialGenerating -> Debugging{1..=max} -> ... (no script generated)
//! ```
//!
//! Every round's repair context is rebuilt from the latest failed attempt;
//! earlier errors survive only in the bounded conversation log. Every
//! attempt and the job itself are written to the job directory as JSON.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::config::WeaverConfig;
use crate::llm::{Backend, BackendSet};
use crate::metrics::MetricsCollector;
use crate::retrieval::{Retriever, Source};
use crate::sandbox::{JobWorkspace, SandboxConfig, SandboxExecutor};

use super::coder::ScriptCoder;
use super::error::{AgentError, AgentResult};
use super::ideator::Ideator;
use super::mining::MiningDispatcher;
use super::racing::{RaceOutcome, RacingCoordinator};
use super::success_recorder::SuccessRecorder;
use super::types::{
    AbandonReason, Attempt, CollectiveFailureReport, ConversationLog, CurrentError,
    FailureChain, Job, JobOutcome, JobState, RepairContext,
};

pub const JOB_FILE: &str = "job.json";
pub const ATTEMPT_FILE: &str = "attempt.json";
pub const CONCEPT_FILE: &str = "idea.txt";

/// What a job should do.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub id: String,
    /// Skip ideation and use this concept.
    pub concept: Option<String>,
    /// Use this already created job directory.
    pub workspace: Option<JobWorkspace>,
}

impl JobSpec {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            concept: None,
            workspace: None,
        }
    }

    pub fn with_concept(mut self, concept: impl Into<String>) -> Self {
        self.concept = Some(concept.into());
        self
    }

    pub fn with_workspace(mut self, workspace: JobWorkspace) -> Self {
        self.workspace = Some(workspace);
        self
    }
}

/// Runs single jobs end to end. Shared by all workers; holds no per-job state.
#[derive(Clone)]
pub struct JobOrchestrator {
    config: Arc<WeaverConfig>,
    ideator: Ideator,
    coder: ScriptCoder,
    fixers: Vec<Backend>,
    sandbox: SandboxExecutor,
    racing: RacingCoordinator,
    retriever: Retriever,
    recorder: SuccessRecorder,
    mining: MiningDispatcher,
    metrics: MetricsCollector,
}

/// Mutable state of one job run.
struct Run<'a> {
    job: Job,
    workspace: Option<JobWorkspace>,
    next_index: u32,
    orchestrator: &'a JobOrchestrator,
}

impl JobOrchestrator {
    pub fn new(
        config: Arc<WeaverConfig>,
        backends: BackendSet,
        retriever: Retriever,
        mining: MiningDispatcher,
        style_guide: Arc<str>,
    ) -> Self {
        let sandbox = SandboxExecutor::new(SandboxConfig::from_config(&config));
        let language = config.script_language().to_string();
        let racing = RacingCoordinator::new(sandbox.clone(), config.sandbox_timeout(), &language);
        let coder = ScriptCoder::new(
            backends.coder,
            style_guide,
            config.required_artifacts.clone(),
            language,
        );
        let recorder =
            SuccessRecorder::new(Arc::clone(retriever.creative()), config.store_write_retries);

        Self {
            ideator: Ideator::new(backends.planner),
            coder,
            fixers: backends.fixers,
            sandbox,
            racing,
            retriever,
            recorder,
            mining,
            metrics: MetricsCollector::new(),
            config,
        }
    }

    pub fn config(&self) -> &WeaverConfig {
        &self.config
    }

    /// Run one job to a terminal state.
    ///
    /// Never fails: internal errors become [`AbandonReason::Internal`].
    pub async fn run(&self, spec: JobSpec) -> Job {
        let started = Instant::now();
        self.metrics.job_started();
        info!(job_id = %spec.id, "Job started");

        let mut run = Run {
            job: Job::new(spec.id.clone()),
            workspace: None,
            next_index: 0,
            orchestrator: self,
        };

        let outcome = match run.drive(spec).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(job_id = %run.job.id, error = %e, "Job failed with internal error");
                JobOutcome::Abandoned {
                    reason: AbandonReason::Internal {
                        message: e.to_string(),
                    },
                }
            }
        };

        run.job.finish(outcome);
        run.persist_job().await;

        let elapsed = started.elapsed().as_secs_f64();
        let label = run.job.outcome.as_ref().map(JobOutcome::label).unwrap_or("abandoned");
        self.metrics.record_job(label, elapsed);
        self.metrics.job_finished();

        match &run.job.outcome {
            Some(JobOutcome::Abandoned { reason }) => {
                warn!(job_id = %run.job.id, reason = %reason, elapsed_secs = elapsed, "Job abandoned")
            }
            _ => info!(
                job_id = %run.job.id,
                attempts = run.job.attempts.len(),
                elapsed_secs = elapsed,
                "Job done"
            ),
        }

        run.job
    }

    /// Rebuild the repair context for `round` from `current`.
    async fn repair_context(
        &self,
        job_id: &str,
        round: u32,
        concept: &str,
        current: &Attempt,
        history: ConversationLog,
        last_report: Option<CollectiveFailureReport>,
    ) -> RepairContext {
        let signature = current.signature().unwrap_or_else(|| {
            crate::sandbox::ErrorSignature::from_core_line("UnknownError: attempt failed")
        });
        let query = signature.core_line.clone();

        let (docs, fixes) = tokio::join!(
            self.retriever.retrieve(&query, &[Source::Docs], self.config.docs_k),
            self.retriever
                .retrieve(&query, &[Source::Corrective], self.config.corrective_k),
        );

        RepairContext {
            job_id: job_id.to_string(),
            round,
            concept: concept.to_string(),
            current: CurrentError {
                attempt_index: current.index,
                script: current.script.clone(),
                error_text: current.error_text().unwrap_or_default(),
                signature,
            },
            docs,
            fixes,
            history,
            last_report,
        }
    }
}

impl Run<'_> {
    fn enter(&mut self, state: JobState) {
        if self.job.transition(state) {
            info!(job_id = %self.job.id, state = %state, "Job state changed");
        }
    }

    fn workspace(&self) -> AgentResult<&JobWorkspace> {
        self.workspace
            .as_ref()
            .ok_or_else(|| AgentError::ConfigurationError("job workspace not created".to_string()))
    }

    fn take_index(&mut self, count: u32) -> u32 {
        let first = self.next_index;
        self.next_index += count;
        first
    }

    async fn drive(&mut self, spec: JobSpec) -> AgentResult<JobOutcome> {
        let o = self.orchestrator;
        let config = &o.config;

        let workspace = match spec.workspace {
            Some(workspace) => workspace,
            None => {
                JobWorkspace::create(&config.paths.results_dir, &self.job.id, self.job.created_at)
                    .await?
            }
        };
        self.job.workspace = Some(workspace.root().to_path_buf());
        self.workspace = Some(workspace);

        // Ideating
        let concept = match spec.concept {
            Some(concept) => concept,
            None => match o.ideator.ideate(&self.job.id).await {
                Ok(concept) => concept,
                Err(e) => {
                    return Ok(JobOutcome::Abandoned {
                        reason: AbandonReason::IdeationFailed {
                            message: e.to_string(),
                        },
                    })
                }
            },
        };
        self.job.concept = Some(concept.clone());
        tokio::fs::write(self.workspace()?.root().join(CONCEPT_FILE), &concept).await?;

        // ContextBuilding
        self.enter(JobState::ContextBuilding);
        let examples = o
            .retriever
            .retrieve(&concept, &[Source::Creative], config.creative_k)
            .await;
        info!(job_id = %self.job.id, examples = examples.len(), "Generation context assembled");

        // InitialGenerating
        self.enter(JobState::InitialGenerating);
        let index = self.take_index(1);
        let dir = self.workspace()?.create_attempt_dir(index, "initial").await?;
        let initial = match o.coder.generate(&concept, &examples).await {
            Ok(script) => {
                // Validating
                self.enter(JobState::Validating);
                let result = o.sandbox.execute(&script, &dir, config.sandbox_timeout()).await?;
                o.metrics.record_attempt("initial", result.verdict.label());
                Attempt::from_result(&self.job.id, index, 0, "initial", script, result)
            }
            Err(e) => {
                warn!(job_id = %self.job.id, error = %e, "Initial generation failed, handing the concept to the fixers");
                o.metrics.record_attempt("initial", "generation_error");
                Attempt::generation_failure(&self.job.id, index, 0, "initial", dir, &e.to_string())
            }
        };
        self.record_attempt(&initial).await;

        if initial.is_success() {
            return self.finalize(&concept, initial, 0).await;
        }

        self.debug_loop(&concept, initial).await
    }

    async fn debug_loop(&mut self, concept: &str, initial: Attempt) -> AgentResult<JobOutcome> {
        let o = self.orchestrator;
        let max_rounds = o.config.max_debug_rounds;

        let mut chain = FailureChain::new(self.job.id.clone());
        let mut history = ConversationLog::new(o.config.conversation_limit)
            .with_entry(failure_entry(&initial));
        chain.push(initial.clone());
        let mut current = initial;
        let mut last_report: Option<CollectiveFailureReport> = None;
        let mut round = 1;

        loop {
            if round > max_rounds {
                return Ok(JobOutcome::Abandoned {
                    reason: AbandonReason::Exhausted { rounds: max_rounds },
                });
            }

            self.enter(JobState::Debugging { round });
            self.persist_job().await;

            let context = o
                .repair_context(
                    &self.job.id,
                    round,
                    concept,
                    &current,
                    history.clone(),
                    last_report.take(),
                )
                .await;

            let first_index = self.take_index(o.fixers.len() as u32);
            let race = o
                .racing
                .race(&context, &o.fixers, self.workspace()?, first_index)
                .await?;

            let next_current = pick_next_current(&race.failed_attempts, &current);
            for attempt in &race.failed_attempts {
                self.record_attempt(attempt).await;
                chain.push(attempt.clone());
            }

            match race.outcome {
                RaceOutcome::Winner(winner) => {
                    self.record_attempt(&winner).await;
                    o.mining.dispatch(chain.close(winner.clone())).await;
                    return self.finalize(concept, winner, round).await;
                }
                RaceOutcome::AllFailed(report) => {
                    history = history.with_entry(report.summary());
                    if let Some(next) = next_current {
                        current = next;
                    }
                    last_report = Some(report);
                    round += 1;
                }
            }
        }
    }

    /// Rerun the winner in a clean directory and publish the final files.
    async fn finalize(
        &mut self,
        concept: &str,
        winner: Attempt,
        rounds: u32,
    ) -> AgentResult<JobOutcome> {
        let o = self.orchestrator;
        let config = &o.config;
        self.enter(JobState::Finalizing);

        let mut final_script = winner.script.clone();
        if let Some(epilogue) = config.epilogue() {
            final_script.push_str("\n\n");
            final_script.push_str(epilogue);
            final_script.push('\n');
        }

        let index = self.take_index(1);
        let dir = self.workspace()?.create_attempt_dir(index, "final").await?;
        let result = o
            .sandbox
            .execute(&final_script, &dir, config.sandbox_timeout())
            .await?;
        o.metrics.record_attempt("final", result.verdict.label());
        let final_attempt =
            Attempt::from_result(&self.job.id, index, rounds, "final", final_script, result);
        self.record_attempt(&final_attempt).await;

        let source_dir = if final_attempt.is_success() {
            final_attempt.working_dir.clone()
        } else {
            warn!(
                job_id = %self.job.id,
                verdict = %final_attempt.verdict,
                "Finalization run failed, publishing the winning attempt's output"
            );
            winner.working_dir.clone()
        };

        let root = self.workspace()?.root().to_path_buf();
        let mut artifacts = Vec::new();
        for name in &config.final_artifacts {
            let candidates = [source_dir.join(name), winner.working_dir.join(name)];
            let Some(source) = candidates.iter().find(|p| p.is_file()) else {
                continue;
            };
            let target = root.join(format!("final_{}", name));
            tokio::fs::copy(source, &target).await?;
            artifacts.push(target);
        }

        let final_script_path = root.join(format!("final_script.{}", config.script_extension()));
        tokio::fs::write(&final_script_path, &winner.script).await?;

        // A failed write is logged and counted by the recorder; the job still succeeded.
        let _ = o.recorder.record(&winner.script, concept, &self.job.id).await;

        Ok(JobOutcome::Done {
            final_script: final_script_path,
            artifacts,
            rounds,
        })
    }

    async fn record_attempt(&mut self, attempt: &Attempt) {
        write_json(&attempt.working_dir.join(ATTEMPT_FILE), attempt).await;
        self.job.attempts.push(attempt.clone());
    }

    async fn persist_job(&self) {
        if let Some(workspace) = &self.workspace {
            write_job_record(workspace.root(), &self.job).await;
        }
    }
}

/// Write `job` as [`JOB_FILE`] under `root`. Failures are logged.
pub(crate) async fn write_job_record(root: &Path, job: &Job) {
    write_json(&root.join(JOB_FILE), job).await;
}

/// Last record written by [`write_job_record`], if readable.
pub(crate) async fn read_job_record(root: &Path) -> Option<Job> {
    let raw = tokio::fs::read(root.join(JOB_FILE)).await.ok()?;
    serde_json::from_slice(&raw).ok()
}

/// Choose the attempt the next round repairs.
///
/// Prefers the first failure whose error differs from the current one (the
/// old error was fixed and a new one surfaced), then any executed failure.
/// Returns `None` when no candidate was executed.
fn pick_next_current(failed: &[Attempt], current: &Attempt) -> Option<Attempt> {
    let current_fp = current.signature().map(|s| s.fingerprint);
    failed
        .iter()
        .find(|a| a.signature().map(|s| s.fingerprint) != current_fp)
        .or_else(|| failed.first())
        .cloned()
}

fn failure_entry(attempt: &Attempt) -> String {
    format!(
        "Attempt {} ({}) failed: {}",
        attempt.index,
        attempt.origin,
        attempt
            .signature()
            .map(|s| s.core_line)
            .unwrap_or_else(|| attempt.verdict.label().to_string())
    )
}

async fn write_json<T: serde::Serialize>(path: &Path, value: &T) {
    let result = match serde_json::to_vec_pretty(value) {
        Ok(bytes) => tokio::fs::write(path, bytes).await.map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };
    if let Err(e) = result {
        warn!(path = %path.display(), error = %e, "Failed to write job record");
    }
}
