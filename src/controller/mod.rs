//! The optimization loop.
//!
//! [`Optimizer`] owns the archive and drives iterations strictly in sequence:
//! grow, admit pending warmups, select, execute the batch, assign credit, then
//! fold observations into the statistics. Each iteration works on a copy of
//! the archive that replaces the live one only once the iteration has been
//! persisted, so a cancelled iteration leaves no trace on disk or in memory.
//!
//! All randomness for iteration `t` comes from an RNG seeded with
//! `(seed, t)`. Reloading a snapshot taken after iteration `t` therefore
//! replays iteration `t + 1` exactly, given the same collaborator responses.

pub mod stop;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::archive::snapshot::snapshot_path;
use crate::archive::{Archive, Candidate, CandidateId};
use crate::bandit::{GrowthOutcome, GrowthProcess, Selection, select_top_k};
use crate::collab::{
    ExperimentExecutor, Judge, OrchestratorAssembler, SubagentGenerator, WarmupRefiner,
};
use crate::config::AppConfig;
use crate::credit::{CreditAssigner, CreditObservation, Score};
use crate::error::ArchiveError;
use crate::experiment::{ExperimentResult, ExperimentRunner, InstancePool};
use crate::logging::{RunEvent, RunLogger, now_iso};
use crate::warmup::{AdmissionOutcome, WarmupAdmission};

pub use stop::{ArchiveFingerprint, StopCriterion, StopReason, StopRule};

/// The external collaborators the loop talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub generator: Arc<dyn SubagentGenerator>,
    pub refiner: Arc<dyn WarmupRefiner>,
    pub assembler: Arc<dyn OrchestratorAssembler>,
    pub executor: Arc<dyn ExperimentExecutor>,
    pub judge: Arc<dyn Judge>,
}

/// What one completed iteration did.
#[derive(Clone, Debug, Default, Serialize)]
pub struct IterationReport {
    pub iteration: u64,
    pub minted: Option<CandidateId>,
    pub admitted: Vec<CandidateId>,
    pub discarded: Vec<CandidateId>,
    pub selection: Vec<Selection>,
    pub instances: usize,
    pub resolved: usize,
    /// Sum of instance costs reported by the executor.
    pub cost: f64,
    pub observations: usize,
    pub missing: usize,
}

#[derive(Clone, Debug)]
pub enum StepOutcome {
    Completed(IterationReport),
    /// The root token fired mid-iteration; nothing was persisted.
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunSummary {
    pub iterations_run: u64,
    pub stop_reason: StopReason,
    pub archive_size: usize,
    pub active_count: usize,
}

/// RNG for one iteration, independent of how many draws earlier iterations made.
pub fn iteration_rng(seed: u64, iteration: u64) -> StdRng {
    StdRng::seed_from_u64(seed ^ iteration.wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

/// Directory holding the audit record of one iteration.
pub fn iteration_dir(output_dir: &Path, iteration: u64) -> PathBuf {
    output_dir.join("iterations").join(format!("iter_{iteration:03}"))
}

pub struct Optimizer {
    config: AppConfig,
    archive: Archive,
    pool: InstancePool,
    collab: Collaborators,
    growth: GrowthProcess,
    warmup: WarmupAdmission,
    runner: ExperimentRunner,
    credit: CreditAssigner,
    stop: StopCriterion,
    logger: RunLogger,
    cancel: CancellationToken,
}

impl Optimizer {
    /// Start a fresh run in `config.output_dir`. Refuses to overwrite an
    /// existing run there.
    pub fn new(
        config: AppConfig,
        pool: InstancePool,
        collab: Collaborators,
        cancel: CancellationToken,
    ) -> anyhow::Result<Self> {
        let existing = snapshot_path(&config.output_dir);
        if existing.exists() {
            anyhow::bail!(
                "{} already holds a run; use `armory resume` or pick another output directory",
                config.output_dir.display()
            );
        }
        let archive = Archive::new(config.seed);
        Self::with_archive(config, archive, pool, collab, cancel)
    }

    /// Continue the run persisted at `snapshot`. The snapshot's seed wins
    /// over the configured one.
    pub fn resume(
        snapshot: &Path,
        config: AppConfig,
        pool: InstancePool,
        collab: Collaborators,
        cancel: CancellationToken,
    ) -> anyhow::Result<Self> {
        let archive = Archive::load(snapshot)
            .with_context(|| format!("Failed to load archive snapshot {}", snapshot.display()))?;
        if archive.seed() != config.seed {
            tracing::warn!(
                snapshot_seed = archive.seed(),
                config_seed = config.seed,
                "Configured seed differs from the snapshot; using the snapshot's"
            );
        }
        tracing::info!(
            run_id = %archive.run_id(),
            iteration = archive.iteration(),
            candidates = archive.len(),
            "Resuming run"
        );
        Self::with_archive(config, archive, pool, collab, cancel)
    }

    fn with_archive(
        config: AppConfig,
        archive: Archive,
        pool: InstancePool,
        collab: Collaborators,
        cancel: CancellationToken,
    ) -> anyhow::Result<Self> {
        if pool.is_empty() {
            anyhow::bail!("Instance pool is empty");
        }
        let growth = GrowthProcess::new(config.theta, config.retry.clone());
        let warmup = WarmupAdmission::new(
            config.retry_budget,
            config.calibration_size,
            config.retry.clone(),
        )?;
        let runner = ExperimentRunner::new(
            config.workers,
            Duration::from_secs(config.instance_timeout_secs),
            config.cost_limit,
        );
        let credit = CreditAssigner::new(config.judge_concurrency, config.retry.clone());
        let stop = StopCriterion {
            rule: config.stop_rule,
            max_iterations: config.max_iterations,
            threshold: config.convergence_threshold,
            patience: config.convergence_patience,
        };
        let logger = RunLogger::new(&config.output_dir)?;

        Ok(Self {
            config,
            archive,
            pool,
            collab,
            growth,
            warmup,
            runner,
            credit,
            stop,
            logger,
            cancel,
        })
    }

    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    pub fn log_path(&self) -> &Path {
        self.logger.log_path()
    }

    /// Iterate until the stop rule fires or the run is cancelled.
    pub async fn run(&mut self) -> anyhow::Result<RunSummary> {
        self.logger.log_event(&RunEvent::RunStart {
            timestamp: now_iso(),
            run_id: self.archive.run_id().to_string(),
            model: self.config.model.clone(),
            seed: self.archive.seed(),
            start_iteration: self.archive.iteration(),
        })?;
        tracing::info!(
            rule = %self.stop.rule,
            max_iterations = self.stop.max_iterations,
            start = self.archive.iteration(),
            "Optimization run starting"
        );

        let mut iterations_run = 0;
        let stop_reason = loop {
            if let Some(reason) = self.stop.should_stop(&self.archive) {
                break reason;
            }
            if self.cancel.is_cancelled() {
                break StopReason::Cancelled;
            }
            match self.step().await? {
                StepOutcome::Completed(_) => iterations_run += 1,
                StepOutcome::Cancelled => break StopReason::Cancelled,
            }
        };

        self.logger.log_event(&RunEvent::RunEnd {
            timestamp: now_iso(),
            iterations_run,
            reason: stop_reason.to_string(),
        })?;
        let summary = RunSummary {
            iterations_run,
            stop_reason,
            archive_size: self.archive.len(),
            active_count: self.archive.active().count(),
        };
        tracing::info!(
            iterations_run,
            reason = %stop_reason,
            archive_size = summary.archive_size,
            active = summary.active_count,
            "Optimization run finished"
        );
        Ok(summary)
    }

    /// Run one full iteration and persist it.
    pub async fn step(&mut self) -> anyhow::Result<StepOutcome> {
        let mut archive = self.archive.clone();
        let iteration = archive.iteration() + 1;
        let mut rng = iteration_rng(archive.seed(), iteration);
        let before = ArchiveFingerprint::of(&archive);
        let mut report = IterationReport {
            iteration,
            ..Default::default()
        };

        // -- Growth
        let generator = self.collab.generator.as_ref();
        let outcome = tokio::select! {
            outcome = self.growth.grow(&mut archive, generator, iteration, &mut rng) => outcome,
            _ = self.cancel.cancelled() => {
                tracing::warn!(iteration, "Run cancelled during growth");
                return Ok(StepOutcome::Cancelled);
            }
        };
        match outcome {
            GrowthOutcome::NoGrowth { probability } => {
                tracing::debug!(iteration, probability, "No growth this iteration");
            }
            GrowthOutcome::Minted { id, probability } => {
                report.minted = Some(id);
                let candidate = archive.get(id).ok_or(ArchiveError::UnknownCandidate(id))?;
                self.logger.log_event(&RunEvent::Growth {
                    timestamp: now_iso(),
                    iteration,
                    probability,
                    candidate_id: id,
                    name: candidate.config.name.clone(),
                    parent: candidate.parent,
                })?;
            }
            GrowthOutcome::Skipped { probability, error } => {
                self.logger.log_event(&RunEvent::GrowthSkipped {
                    timestamp: now_iso(),
                    iteration,
                    probability,
                    error: error.to_string(),
                })?;
            }
        }

        // -- Warmup admission, oldest first
        for id in archive.pending_warmup() {
            let outcome = self
                .warmup
                .admit(
                    &mut archive,
                    id,
                    self.collab.refiner.as_ref(),
                    &self.pool,
                    &mut rng,
                    &self.cancel,
                )
                .await?;
            for round in outcome.history() {
                self.logger.log_event(&RunEvent::WarmupRound {
                    timestamp: now_iso(),
                    iteration,
                    candidate_id: id,
                    round: round.round,
                    calibration: round.calibration.clone(),
                    error: round.error.as_ref().map(ToString::to_string),
                })?;
            }
            match outcome {
                AdmissionOutcome::Admitted { rounds, .. } => {
                    report.admitted.push(id);
                    self.logger.log_event(&RunEvent::Admitted {
                        timestamp: now_iso(),
                        iteration,
                        candidate_id: id,
                        rounds,
                    })?;
                }
                AdmissionOutcome::Discarded {
                    rounds, last_error, ..
                } => {
                    report.discarded.push(id);
                    self.logger.log_event(&RunEvent::Discarded {
                        timestamp: now_iso(),
                        iteration,
                        candidate_id: id,
                        rounds,
                        reason: last_error.to_string(),
                    })?;
                }
                AdmissionOutcome::Cancelled { .. } => {
                    tracing::warn!(iteration, candidate_id = %id, "Run cancelled during warmup");
                    return Ok(StepOutcome::Cancelled);
                }
            }
        }
        if self.cancel.is_cancelled() {
            tracing::warn!(iteration, "Run cancelled before execution");
            return Ok(StepOutcome::Cancelled);
        }

        // -- Selection
        let selection = select_top_k(&archive, self.config.top_k, self.config.exploration_c);
        self.logger.log_event(&RunEvent::Selection {
            timestamp: now_iso(),
            iteration,
            selected: selection.clone(),
        })?;
        report.selection = selection.clone();

        // -- Execution and credit assignment
        let (result, observations) = if selection.is_empty() {
            tracing::info!(iteration, "No active candidates, skipping execution");
            (
                ExperimentResult {
                    iteration,
                    records: Vec::new(),
                },
                Vec::new(),
            )
        } else {
            let selected: Vec<Candidate> = selection
                .iter()
                .filter_map(|s| archive.get(s.id).cloned())
                .collect();
            let agent = Arc::new(self.collab.assembler.assemble(&selected));
            let batch = self.pool.sample_batch(&mut rng, self.config.batch_size);
            tracing::info!(
                iteration,
                tools = ?agent.candidate_ids(),
                instances = batch.len(),
                "Executing batch"
            );

            let result = self
                .runner
                .run(self.collab.executor.clone(), agent, &batch, iteration, &self.cancel)
                .await;
            if self.cancel.is_cancelled() {
                tracing::warn!(iteration, "Run cancelled during execution");
                return Ok(StepOutcome::Cancelled);
            }
            for record in &result.records {
                self.logger.log_event(&RunEvent::InstanceOutcome {
                    timestamp: now_iso(),
                    iteration,
                    instance_id: record.instance_id.clone(),
                    resolved: record.resolved,
                    cost: record.cost,
                    error: record.error,
                    message: record.error_message.clone(),
                })?;
            }

            let observations = self
                .credit
                .assign(self.collab.judge.as_ref(), &result, &selected)
                .await;
            if self.cancel.is_cancelled() {
                tracing::warn!(iteration, "Run cancelled during credit assignment");
                return Ok(StepOutcome::Cancelled);
            }

            record_token_usage(&mut archive, &result, &selected)?;
            (result, observations)
        };

        // -- Statistics update, after every observation is in
        for obs in &observations {
            match obs.score {
                Score::Value(score) => {
                    archive.apply_observation(obs.candidate_id, score)?;
                    report.observations += 1;
                    self.logger.log_event(&RunEvent::Observation {
                        timestamp: now_iso(),
                        iteration,
                        instance_id: obs.instance_id.clone(),
                        candidate_id: obs.candidate_id,
                        score,
                        rationale: obs.rationale.clone(),
                    })?;
                }
                Score::Missing => {
                    report.missing += 1;
                    self.logger.log_event(&RunEvent::MissingObservation {
                        timestamp: now_iso(),
                        iteration,
                        instance_id: obs.instance_id.clone(),
                        candidate_id: obs.candidate_id,
                        reason: obs.rationale.clone(),
                    })?;
                }
            }
        }
        report.instances = result.records.len();
        report.resolved = result.resolved_count();
        report.cost = result.total_cost();

        let quiet = before.is_quiet(&archive, self.config.convergence_threshold);
        let streak = if quiet { archive.quiet_iterations() + 1 } else { 0 };
        archive.set_quiet_iterations(streak);
        archive.advance_iteration();

        if self.cancel.is_cancelled() {
            tracing::warn!(iteration, "Run cancelled before persisting");
            return Ok(StepOutcome::Cancelled);
        }

        // The live snapshot is written last; it marks the iteration as done.
        self.persist_iteration(&archive, &report.selection, &result, &observations)?;
        archive.save(&snapshot_path(&self.config.output_dir))?;

        self.logger.log_event(&RunEvent::IterationEnd {
            timestamp: now_iso(),
            iteration,
            archive_size: archive.len(),
            active_count: archive.active().count(),
            total_pulls: archive.total_pulls(),
            instances: report.instances,
            resolved: report.resolved,
            cost: report.cost,
        })?;
        tracing::info!(
            iteration,
            archive_size = archive.len(),
            active = archive.active().count(),
            resolved = report.resolved,
            instances = report.instances,
            cost = report.cost,
            observations = report.observations,
            missing = report.missing,
            quiet_streak = streak,
            "Iteration complete"
        );

        self.archive = archive;
        Ok(StepOutcome::Completed(report))
    }

    fn persist_iteration(
        &self,
        archive: &Archive,
        selection: &[Selection],
        result: &ExperimentResult,
        observations: &[CreditObservation],
    ) -> Result<(), ArchiveError> {
        let dir = iteration_dir(&self.config.output_dir, archive.iteration());
        archive.save(&dir.join("archive.json"))?;
        write_json(&dir.join("selection.json"), &selection)?;
        write_json(&dir.join("result.json"), result)?;
        write_json(&dir.join("credit.json"), &observations)
    }
}

/// Add reported sub-agent token usage to the selected candidates.
fn record_token_usage(
    archive: &mut Archive,
    result: &ExperimentResult,
    selected: &[Candidate],
) -> Result<(), ArchiveError> {
    let steps = result
        .records
        .iter()
        .filter_map(|r| r.trajectory.as_ref())
        .flat_map(|t| t.steps.iter());
    for step in steps {
        if let (Some(id), Some(tokens)) = (step.candidate_id, step.tokens) {
            if selected.iter().any(|c| c.id == id) {
                archive.record_tokens(id, tokens)?;
            }
        }
    }
    Ok(())
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), ArchiveError> {
    let json = serde_json::to_vec_pretty(value).map_err(|e| ArchiveError::Malformed {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    std::fs::write(path, json).map_err(|source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    })
}
