//! Agents that generate, repair, validate and learn from circuit scripts.
//!
//! A [`JobFactory`] runs many [`JobOrchestrator`] jobs in parallel. Each job
//! asks the [`Ideator`] for a concept, the [`ScriptCoder`] for a first script,
//! and on failure races the fixer backends through the [`RacingCoordinator`].
//! Resolved failure chains go to the [`SolutionMiner`] via the
//! [`MiningDispatcher`]; finalized scripts go to the [`SuccessRecorder`].

pub mod coder;
pub mod error;
pub mod factory;
pub mod ideator;
pub mod mining;
pub mod orchestrator;
pub mod racing;
pub mod solution_miner;
pub mod success_recorder;
pub mod types;

pub use coder::ScriptCoder;
pub use error::{AgentError, AgentResult};
pub use factory::{FactoryReport, JobFactory, SharedResources, METRICS_FILE, WARM_UP_QUERY};
pub use ideator::Ideator;
pub use mining::MiningDispatcher;
pub use orchestrator::{JobOrchestrator, JobSpec, ATTEMPT_FILE, CONCEPT_FILE, JOB_FILE};
pub use racing::{RaceOutcome, RaceResult, RacingCoordinator};
pub use solution_miner::{parse_mined_records, MinedRecord, MiningReport, SolutionMiner};
pub use success_recorder::SuccessRecorder;
pub use types::{
    AbandonReason, Attempt, CollectiveFailureReport, ConversationLog, CurrentError,
    FailedCandidate, FailureChain, Job, JobOutcome, JobState, RepairContext, ResolvedChain,
    StateTransition,
};
