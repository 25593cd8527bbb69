//! Job data model shared by the orchestrator, racing coordinator and miner.

use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::retrieval::Snippet;
use crate::sandbox::{AttemptResult, ErrorSignature, Verdict};

// ============================================================================
// Job lifecycle
// ============================================================================

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Ideating,
    ContextBuilding,
    InitialGenerating,
    Validating,
    Debugging { round: u32 },
    Finalizing,
    Done,
    Abandoned,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Abandoned)
    }

    /// Position in the forward-only state order.
    ///
    /// Debugging rounds order among themselves by round number.
    pub fn rank(&self) -> (u8, u32) {
        match self {
            JobState::Ideating => (0, 0),
            JobState::ContextBuilding => (1, 0),
            JobState::InitialGenerating => (2, 0),
            JobState::Validating => (3, 0),
            JobState::Debugging { round } => (4, *round),
            JobState::Finalizing => (5, 0),
            JobState::Done | JobState::Abandoned => (6, 0),
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Ideating => write!(f, "ideating"),
            JobState::ContextBuilding => write!(f, "context_building"),
            JobState::InitialGenerating => write!(f, "initial_generating"),
            JobState::Validating => write!(f, "validating"),
            JobState::Debugging { round } => write!(f, "debugging(round {})", round),
            JobState::Finalizing => write!(f, "finalizing"),
            JobState::Done => write!(f, "done"),
            JobState::Abandoned => write!(f, "abandoned"),
        }
    }
}

/// A recorded state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub state: JobState,
    pub at: DateTime<Utc>,
}

/// Why a job was abandoned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum AbandonReason {
    /// Debug rounds ran out.
    Exhausted { rounds: u32 },
    /// No concept could be obtained.
    IdeationFailed { message: String },
    /// Infrastructure failure (workspace, sandbox, panic).
    Internal { message: String },
    /// Operator interruption reached the job before it started.
    Cancelled,
}

impl fmt::Display for AbandonReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbandonReason::Exhausted { rounds } => {
                write!(f, "exhausted after {} debug rounds", rounds)
            }
            AbandonReason::IdeationFailed { message } => write!(f, "ideation failed: {}", message),
            AbandonReason::Internal { message } => write!(f, "internal error: {}", message),
            AbandonReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Terminal outcome of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    Done {
        final_script: PathBuf,
        artifacts: Vec<PathBuf>,
        /// Debug rounds used before success (0 when the first script worked).
        rounds: u32,
    },
    Abandoned { reason: AbandonReason },
}

impl JobOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, JobOutcome::Done { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            JobOutcome::Done { .. } => "done",
            JobOutcome::Abandoned { .. } => "abandoned",
        }
    }
}

/// One end-to-end circuit task. Owned by a single orchestrator run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub concept: Option<String>,
    pub state: JobState,
    pub workspace: Option<PathBuf>,
    pub attempts: Vec<Attempt>,
    pub transitions: Vec<StateTransition>,
    pub outcome: Option<JobOutcome>,
}

impl Job {
    pub fn new(id: impl Into<String>) -> Self {
        let created_at = Utc::now();
        Self {
            id: id.into(),
            created_at,
            concept: None,
            state: JobState::Ideating,
            workspace: None,
            attempts: Vec::new(),
            transitions: vec![StateTransition {
                state: JobState::Ideating,
                at: created_at,
            }],
            outcome: None,
        }
    }

    /// Move to `next`. Returns `false` (and stays put) for a backward move.
    pub fn transition(&mut self, next: JobState) -> bool {
        if self.state.is_terminal() || next.rank() <= self.state.rank() {
            return false;
        }
        self.state = next;
        self.transitions.push(StateTransition {
            state: next,
            at: Utc::now(),
        });
        true
    }

    /// Enter a terminal state with `outcome`.
    pub fn finish(&mut self, outcome: JobOutcome) {
        let terminal = if outcome.is_done() {
            JobState::Done
        } else {
            JobState::Abandoned
        };
        self.transition(terminal);
        self.outcome = Some(outcome);
    }

    pub fn is_done(&self) -> bool {
        self.outcome.as_ref().is_some_and(JobOutcome::is_done)
    }
}

// ============================================================================
// Attempts and failure chains
// ============================================================================

/// One sandboxed execution of one candidate script. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    pub job_id: String,
    pub index: u32,
    /// 0 for the initial script, then the debug round that produced it.
    pub round: u32,
    /// Backend that generated the script, or a stage label.
    pub origin: String,
    pub script: String,
    pub working_dir: PathBuf,
    pub stdout: String,
    pub stderr: String,
    pub verdict: Verdict,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl Attempt {
    pub fn from_result(
        job_id: &str,
        index: u32,
        round: u32,
        origin: &str,
        script: String,
        result: AttemptResult,
    ) -> Self {
        Self {
            job_id: job_id.to_string(),
            index,
            round,
            origin: origin.to_string(),
            script,
            working_dir: result.working_dir,
            stdout: result.stdout,
            stderr: result.stderr,
            verdict: result.verdict,
            started_at: result.started_at,
            finished_at: result.finished_at,
        }
    }

    /// An attempt whose script could not be generated. Nothing was executed.
    pub fn generation_failure(
        job_id: &str,
        index: u32,
        round: u32,
        origin: &str,
        working_dir: PathBuf,
        message: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.to_string(),
            index,
            round,
            origin: origin.to_string(),
            script: String::new(),
            working_dir,
            stdout: String::new(),
            stderr: String::new(),
            verdict: Verdict::Failure {
                signature: ErrorSignature::from_core_line(&format!("GenerationError: {}", message)),
                error_text: format!("The model failed to generate any script: {}", message),
            },
            started_at: now,
            finished_at: now,
        }
    }

    pub fn is_success(&self) -> bool {
        self.verdict.is_success()
    }

    /// Whether a script was actually run in the sandbox.
    pub fn was_executed(&self) -> bool {
        !self.script.is_empty()
    }

    pub fn signature(&self) -> Option<ErrorSignature> {
        self.verdict.signature()
    }

    pub fn error_text(&self) -> Option<String> {
        self.verdict.error_text()
    }

    pub fn artifacts(&self) -> &[PathBuf] {
        match &self.verdict {
            Verdict::Success { artifacts } => artifacts,
            _ => &[],
        }
    }
}

/// Failed attempts accumulated since the last success.
#[derive(Debug, Clone, Default)]
pub struct FailureChain {
    job_id: String,
    failures: Vec<Attempt>,
}

impl FailureChain {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            failures: Vec::new(),
        }
    }

    /// Append a failed attempt. Successful attempts are ignored.
    /// Add a failed, executed attempt. Successes and generation failures are ignored.
    pub fn push(&mut self, attempt: Attempt) {
        if !attempt.is_success() && attempt.was_executed() {
            self.failures.push(attempt);
        }
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failures(&self) -> &[Attempt] {
        &self.failures
    }

    /// Close the chain with the attempt that resolved it.
    ///
    /// Consumes the chain, so a chain can be handed to the miner only once.
    pub fn close(self, winner: Attempt) -> ResolvedChain {
        ResolvedChain {
            job_id: self.job_id,
            failures: self.failures,
            winner,
        }
    }
}

/// A failure chain closed by a success, ready for mining.
#[derive(Debug, Clone)]
pub struct ResolvedChain {
    pub job_id: String,
    pub failures: Vec<Attempt>,
    pub winner: Attempt,
}

impl ResolvedChain {
    /// Failures with distinct signatures, first occurrence kept, with their chain positions.
    pub fn distinct_failures(&self) -> Vec<(u32, &Attempt, ErrorSignature)> {
        let mut seen = std::collections::HashSet::new();
        self.failures
            .iter()
            .enumerate()
            .filter_map(|(pos, attempt)| {
                let signature = attempt.signature()?;
                seen.insert(signature.fingerprint.clone())
                    .then_some((pos as u32, attempt, signature))
            })
            .collect()
    }
}

// ============================================================================
// Racing
// ============================================================================

/// A racing candidate that did not succeed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedCandidate {
    pub backend: String,
    /// Script text, absent when the backend produced none.
    pub script: Option<String>,
    pub signature: ErrorSignature,
    pub error_text: String,
    /// Attempt index when the script was executed.
    pub attempt_index: Option<u32>,
}

impl FailedCandidate {
    pub fn from_attempt(attempt: &Attempt) -> Self {
        Self {
            backend: attempt.origin.clone(),
            script: Some(attempt.script.clone()),
            signature: attempt
                .signature()
                .unwrap_or_else(|| ErrorSignature::from_core_line("UnknownError")),
            error_text: attempt.error_text().unwrap_or_default(),
            attempt_index: Some(attempt.index),
        }
    }

    /// A backend that errored or returned no usable script.
    pub fn generation_error(backend: &str, message: &str) -> Self {
        Self {
            backend: backend.to_string(),
            script: None,
            signature: ErrorSignature::from_core_line(&format!("GenerationError: {}", message)),
            error_text: message.to_string(),
            attempt_index: None,
        }
    }
}

/// All failed candidates of one debug round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectiveFailureReport {
    pub round: u32,
    pub candidates: Vec<FailedCandidate>,
}

impl CollectiveFailureReport {
    /// One line per candidate, for the conversation log.
    pub fn summary(&self) -> String {
        let lines: Vec<String> = self
            .candidates
            .iter()
            .map(|c| format!("- {}: {}", c.backend, c.signature.core_line))
            .collect();
        format!(
            "Round {}: all {} candidates failed\n{}",
            self.round,
            self.candidates.len(),
            lines.join("\n")
        )
    }
}

// ============================================================================
// Conversation log and repair context
// ============================================================================

/// Bounded history of what has happened in a job.
///
/// Passed by value into each generation call; when full, the oldest entries
/// are dropped and counted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationLog {
    limit: usize,
    entries: VecDeque<String>,
    omitted: usize,
}

impl ConversationLog {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            entries: VecDeque::new(),
            omitted: 0,
        }
    }

    /// A new log with `entry` appended.
    pub fn with_entry(mut self, entry: impl Into<String>) -> Self {
        self.entries.push_back(entry.into());
        while self.entries.len() > self.limit {
            self.entries.pop_front();
            self.omitted += 1;
        }
        self
    }

    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn omitted(&self) -> usize {
        self.omitted
    }

    /// Render as a numbered list.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if self.omitted > 0 {
            out.push_str(&format!("({} earlier entries omitted)\n", self.omitted));
        }
        for (i, entry) in self.entries.iter().enumerate() {
            out.push_str(&format!("{}. {}\n", self.omitted + i + 1, entry));
        }
        out
    }
}

/// The error a repair round is asked to fix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentError {
    pub attempt_index: u32,
    pub script: String,
    pub signature: ErrorSignature,
    pub error_text: String,
}

/// Everything a repair backend sees in one debug round.
///
/// Rebuilt from scratch every round from the latest attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairContext {
    pub job_id: String,
    pub round: u32,
    pub concept: String,
    pub current: CurrentError,
    pub docs: Vec<Snippet>,
    pub fixes: Vec<Snippet>,
    pub history: ConversationLog,
    pub last_report: Option<CollectiveFailureReport>,
}
