//! Model-racing coordinator.
//!
//! One debug round sends the same repair prompt to every fixer backend in
//! parallel. Each reply is validated in its own sandbox directory as soon as
//! it arrives. The first candidate to succeed wins; the others are cancelled
//! and their directories removed. When every candidate fails the round yields
//! a [`CollectiveFailureReport`] for the next round.

use std::collections::HashSet;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, info, warn};

use crate::llm::{Backend, Message};
use crate::metrics::MetricsCollector;
use crate::prompts::build_repair_prompt;
use crate::sandbox::{ErrorSignature, JobWorkspace, SandboxExecutor};
use crate::utils::extract_script;

use super::error::AgentResult;
use super::types::{Attempt, CollectiveFailureReport, FailedCandidate, RepairContext};

/// How a debug round ended.
#[derive(Debug, Clone)]
pub enum RaceOutcome {
    Winner(Attempt),
    AllFailed(CollectiveFailureReport),
}

/// Result of one debug round.
#[derive(Debug, Clone)]
pub struct RaceResult {
    pub round: u32,
    /// Failed candidates that were executed, ordered by attempt index.
    pub failed_attempts: Vec<Attempt>,
    pub outcome: RaceOutcome,
}

impl RaceResult {
    pub fn winner(&self) -> Option<&Attempt> {
        match &self.outcome {
            RaceOutcome::Winner(attempt) => Some(attempt),
            RaceOutcome::AllFailed(_) => None,
        }
    }
}

enum CandidateOutcome {
    Executed(Attempt),
    Rejected(FailedCandidate),
}

/// Races fixer backends against each other.
#[derive(Debug, Clone)]
pub struct RacingCoordinator {
    sandbox: SandboxExecutor,
    timeout: Duration,
    language: String,
    metrics: MetricsCollector,
}

impl RacingCoordinator {
    pub fn new(sandbox: SandboxExecutor, timeout: Duration, language: impl Into<String>) -> Self {
        Self {
            sandbox,
            timeout,
            language: language.into(),
            metrics: MetricsCollector::new(),
        }
    }

    /// Run one debug round across `backends`.
    ///
    /// Candidate `i` uses attempt index `first_index + i`. Backend errors and
    /// replies without a script count as failed candidates.
    pub async fn race(
        &self,
        context: &RepairContext,
        backends: &[Backend],
        workspace: &JobWorkspace,
        first_index: u32,
    ) -> AgentResult<RaceResult> {
        let messages = build_repair_prompt(context, &self.language)?.into_messages();

        info!(
            job_id = %context.job_id,
            round = context.round,
            backends = backends.len(),
            error = %context.current.signature.core_line,
            "Starting debug race"
        );

        let mut pending: FuturesUnordered<_> = backends
            .iter()
            .enumerate()
            .map(|(position, backend)| {
                let index = first_index + position as u32;
                let messages = messages.clone();
                async move {
                    let outcome = self
                        .run_candidate(context, backend, messages, workspace, index)
                        .await;
                    (position, outcome)
                }
            })
            .collect();

        let mut finished: HashSet<usize> = HashSet::new();
        let mut failed_attempts: Vec<Attempt> = Vec::new();
        let mut candidates: Vec<(usize, FailedCandidate)> = Vec::new();
        let mut winner: Option<Attempt> = None;

        while let Some((position, outcome)) = pending.next().await {
            finished.insert(position);
            match outcome {
                CandidateOutcome::Executed(attempt) if attempt.is_success() => {
                    winner = Some(attempt);
                    break;
                }
                CandidateOutcome::Executed(attempt) => {
                    candidates.push((position, FailedCandidate::from_attempt(&attempt)));
                    failed_attempts.push(attempt);
                }
                CandidateOutcome::Rejected(candidate) => candidates.push((position, candidate)),
            }
        }

        // Cancels the remaining candidates; their sandboxes are killed on drop.
        drop(pending);

        failed_attempts.sort_by_key(|a| a.index);

        let Some(winner) = winner else {
            candidates.sort_by_key(|(position, _)| *position);
            let report = CollectiveFailureReport {
                round: context.round,
                candidates: candidates.into_iter().map(|(_, c)| c).collect(),
            };
            self.metrics.record_race("all_failed");
            info!(
                job_id = %context.job_id,
                round = context.round,
                "All candidates failed"
            );
            return Ok(RaceResult {
                round: context.round,
                failed_attempts,
                outcome: RaceOutcome::AllFailed(report),
            });
        };

        for (position, backend) in backends.iter().enumerate() {
            if finished.contains(&position) {
                continue;
            }
            let path = workspace.attempt_path(first_index + position as u32, backend.name());
            match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => debug!(path = %path.display(), "Removed cancelled candidate directory"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove cancelled candidate directory"),
            }
        }

        self.metrics.record_race("winner");
        info!(
            job_id = %context.job_id,
            round = context.round,
            backend = %winner.origin,
            attempt = winner.index,
            "Debug race won"
        );

        Ok(RaceResult {
            round: context.round,
            failed_attempts,
            outcome: RaceOutcome::Winner(winner),
        })
    }

    async fn run_candidate(
        &self,
        context: &RepairContext,
        backend: &Backend,
        messages: Vec<Message>,
        workspace: &JobWorkspace,
        index: u32,
    ) -> CandidateOutcome {
        let reply = match backend.complete(messages).await {
            Ok(reply) => {
                self.metrics.record_backend_call(backend.name(), true);
                reply
            }
            Err(e) => {
                self.metrics.record_backend_call(backend.name(), false);
                warn!(backend = backend.name(), error = %e, "Fixer backend failed");
                return CandidateOutcome::Rejected(FailedCandidate::generation_error(
                    backend.name(),
                    &e.to_string(),
                ));
            }
        };

        let Some(script) = extract_script(&reply, Some(self.language.as_str())) else {
            return CandidateOutcome::Rejected(FailedCandidate::generation_error(
                backend.name(),
                "reply contained no script",
            ));
        };

        let executed = async {
            let dir = workspace.create_attempt_dir(index, backend.name()).await?;
            self.sandbox.execute(&script, &dir, self.timeout).await
        }
        .await;

        match executed {
            Ok(result) => {
                self.metrics.record_attempt("repair", result.verdict.label());
                debug!(
                    backend = backend.name(),
                    attempt = index,
                    verdict = %result.verdict,
                    "Candidate validated"
                );
                CandidateOutcome::Executed(Attempt::from_result(
                    &context.job_id,
                    index,
                    context.round,
                    backend.name(),
                    script,
                    result,
                ))
            }
            Err(e) => {
                warn!(backend = backend.name(), attempt = index, error = %e, "Sandbox failed");
                CandidateOutcome::Rejected(FailedCandidate {
                    backend: backend.name().to_string(),
                    script: Some(script),
                    signature: ErrorSignature::from_core_line(&format!("SandboxError: {}", e)),
                    error_text: e.to_string(),
                    attempt_index: None,
                })
            }
        }
    }
}
