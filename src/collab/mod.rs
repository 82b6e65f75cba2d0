//! Interfaces to the external collaborators of the optimization loop.
//!
//! Every nondeterministic or remote step sits behind one of these traits:
//! sub-agent generation, warmup refinement, orchestrator assembly, instance
//! execution and hindsight judging. The bandit core only ever sees typed
//! results or typed failures, so tests swap in scripted fakes.
//!
//! Concrete implementations live next door: [`assembler::BundleAssembler`],
//! [`harness::HarnessExecutor`], and the genai-backed types in
//! [`crate::llm`].

pub mod assembler;
pub mod harness;
pub mod retry;

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

pub use assembler::{BundleAssembler, RunnableAgentConfig};
pub use retry::{with_retry, RetryPolicy, Retryable};

use crate::archive::{Candidate, CandidateConfig, CandidateId};
use crate::error::{ExecutionError, GenerationError, JudgeError, ValidationError};
use crate::experiment::{InstanceRun, TaskInstance, Trajectory};

/// A short description of an existing candidate, shown to the generator.
#[derive(Clone, Debug, Serialize)]
pub struct CandidateSummary {
    pub id: CandidateId,
    pub name: String,
    pub docstring: String,
}

/// A fully described candidate the generator can use as a starting point.
#[derive(Clone, Debug, Serialize)]
pub struct Exemplar {
    pub id: CandidateId,
    pub config: CandidateConfig,
    pub pull_count: u64,
    pub mean_reward: f64,
    pub average_tokens: f64,
}

/// Everything the generator is told about the run when minting a candidate.
#[derive(Clone, Debug, Serialize)]
pub struct GenerationContext {
    pub iteration: u64,
    pub existing: Vec<CandidateSummary>,
    pub exemplars: Vec<Exemplar>,
}

/// A judge's verdict for one (instance, candidate) pair.
#[derive(Clone, Debug, PartialEq)]
pub struct Judgement {
    /// Helpfulness in `[0, 1]`.
    pub score: f64,
    pub rationale: String,
}

/// Mints new sub-agent configurations.
#[async_trait]
pub trait SubagentGenerator: Send + Sync {
    async fn generate(&self, context: &GenerationContext)
    -> Result<CandidateConfig, GenerationError>;
}

/// Rewrites a warmup candidate's config against a small calibration set.
#[async_trait]
pub trait WarmupRefiner: Send + Sync {
    /// Calibration runs must stop when `cancel` fires; the refiner then
    /// returns [`ValidationError::Cancelled`].
    async fn refine(
        &self,
        candidate: &Candidate,
        calibration: &[TaskInstance],
        cancel: &CancellationToken,
    ) -> Result<CandidateConfig, ValidationError>;
}

/// Turns the selected candidates into a runnable orchestrator config.
pub trait OrchestratorAssembler: Send + Sync {
    fn assemble(&self, selected: &[Candidate]) -> RunnableAgentConfig;
}

/// Runs the assembled orchestrator on one task instance.
///
/// The [`crate::experiment::ExperimentRunner`] fans a batch out over this
/// trait and owns timeouts, cost limits and crash isolation. Implementations
/// should stop work promptly once `cancel` fires.
#[async_trait]
pub trait ExperimentExecutor: Send + Sync {
    async fn run_instance(
        &self,
        agent: &RunnableAgentConfig,
        instance: &TaskInstance,
        cancel: CancellationToken,
    ) -> Result<InstanceRun, ExecutionError>;
}

/// Scores how much one candidate helped in one trajectory.
#[async_trait]
pub trait Judge: Send + Sync {
    async fn score(
        &self,
        trajectory: &Trajectory,
        resolved: bool,
        candidate: &Candidate,
    ) -> Result<Judgement, JudgeError>;
}
