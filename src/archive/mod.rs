//! Append-only registry of candidate sub-agents.
//!
//! [`Archive`] is the single source of truth for every candidate ever minted
//! during a run and for the global counters the selection policy reads. It is
//! owned by the loop controller and mutated strictly between iterations, so
//! it needs no interior locking.
//!
//! Candidates are stored in a `Vec` ordered by id. Ids are allocated by the
//! archive and strictly increase, which makes lookup a binary search and
//! keeps the snapshot stable across save/load.

pub mod export;
pub mod snapshot;
pub mod types;

pub use export::export_top_k;
pub use types::*;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ArchiveError;

/// The growing candidate registry plus global run counters.
///
/// Serialized as-is to form the archive snapshot (see [`snapshot`]).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Archive {
    run_id: Uuid,
    seed: u64,
    /// Number of completed iterations.
    iteration: u64,
    /// Sum of every candidate's `pull_count`.
    total_pulls: u64,
    next_id: u64,
    /// Consecutive quiet iterations observed by the convergence stop rule.
    #[serde(default)]
    quiet_iterations: u32,
    candidates: Vec<Candidate>,
}

impl Archive {
    /// Create an empty archive for a new run.
    pub fn new(seed: u64) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            seed,
            iteration: 0,
            total_pulls: 0,
            next_id: 1,
            quiet_iterations: 0,
            candidates: Vec::new(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn total_pulls(&self) -> u64 {
        self.total_pulls
    }

    pub fn quiet_iterations(&self) -> u32 {
        self.quiet_iterations
    }

    pub fn set_quiet_iterations(&mut self, n: u32) {
        self.quiet_iterations = n;
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// All candidates in id order, including retired ones.
    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    pub fn get(&self, id: CandidateId) -> Option<&Candidate> {
        self.index_of(id).map(|i| &self.candidates[i])
    }

    /// Candidates eligible for selection.
    pub fn active(&self) -> impl Iterator<Item = &Candidate> {
        self.candidates.iter().filter(|c| c.is_active())
    }

    /// Ids of candidates still in warmup, ascending.
    pub fn pending_warmup(&self) -> Vec<CandidateId> {
        self.candidates
            .iter()
            .filter(|c| c.status == CandidateStatus::Warmup)
            .map(|c| c.id)
            .collect()
    }

    /// Number of active plus warmup candidates (the `n` of the growth rule).
    pub fn open_count(&self) -> usize {
        self.candidates
            .iter()
            .filter(|c| c.status != CandidateStatus::Retired)
            .count()
    }

    /// Register a freshly generated candidate in `Warmup` and return its id.
    pub fn mint(
        &mut self,
        config: CandidateConfig,
        parent: Option<CandidateId>,
        iteration: u64,
    ) -> CandidateId {
        let id = CandidateId(self.next_id);
        self.next_id += 1;
        // A parent must already exist, which rules out cycles.
        let parent = parent.filter(|p| self.get(*p).is_some());
        self.candidates.push(Candidate {
            id,
            created_at_iteration: iteration,
            config,
            status: CandidateStatus::Warmup,
            retire_reason: None,
            stats: CandidateStats::default(),
            parent,
            warmup_rounds: 0,
        });
        id
    }

    /// Replace a warmup candidate's config with a refined version.
    pub fn refine(&mut self, id: CandidateId, config: CandidateConfig) -> Result<(), ArchiveError> {
        let candidate = self.get_mut(id)?;
        if candidate.status != CandidateStatus::Warmup {
            return Err(ArchiveError::IllegalTransition {
                id,
                from: candidate.status.as_str(),
                to: "refined",
            });
        }
        candidate.config = config;
        Ok(())
    }

    /// Count one warmup round against a candidate.
    pub fn record_warmup_round(&mut self, id: CandidateId) -> Result<u32, ArchiveError> {
        let candidate = self.get_mut(id)?;
        candidate.warmup_rounds += 1;
        Ok(candidate.warmup_rounds)
    }

    /// `Warmup -> Active`.
    pub fn activate(&mut self, id: CandidateId) -> Result<(), ArchiveError> {
        self.transition(id, CandidateStatus::Active, None)
    }

    /// `Warmup | Active -> Retired`. The candidate stays in the archive.
    pub fn retire(&mut self, id: CandidateId, reason: impl Into<String>) -> Result<(), ArchiveError> {
        self.transition(id, CandidateStatus::Retired, Some(reason.into()))
    }

    /// Fold one reward observation into an active candidate's statistics.
    pub fn apply_observation(&mut self, id: CandidateId, score: f64) -> Result<(), ArchiveError> {
        if !(0.0..=1.0).contains(&score) {
            return Err(ArchiveError::ScoreOutOfRange { id, score });
        }
        let candidate = self.get_mut(id)?;
        if !candidate.is_active() {
            return Err(ArchiveError::NotActive(id));
        }
        candidate.stats.observe(score);
        self.total_pulls += 1;
        Ok(())
    }

    /// Record token usage for one sub-agent invocation.
    pub fn record_tokens(&mut self, id: CandidateId, tokens: u64) -> Result<(), ArchiveError> {
        self.get_mut(id)?.stats.record_tokens(tokens);
        Ok(())
    }

    /// Mark the current iteration as complete.
    pub fn advance_iteration(&mut self) {
        self.iteration += 1;
    }

    /// Check the structural invariants. Used after loading a snapshot.
    pub fn check_invariants(&self) -> Result<(), String> {
        let mut prev: Option<CandidateId> = None;
        for c in &self.candidates {
            if let Some(p) = prev {
                if c.id <= p {
                    return Err(format!("candidate ids not strictly increasing at {}", c.id));
                }
            }
            if c.id.0 >= self.next_id {
                return Err(format!("candidate {} not below next_id {}", c.id, self.next_id));
            }
            if let Some(parent) = c.parent {
                if parent >= c.id {
                    return Err(format!("candidate {} has a non-earlier parent {parent}", c.id));
                }
            }
            prev = Some(c.id);
        }

        let pulls: u64 = self.candidates.iter().map(|c| c.stats.pull_count).sum();
        if pulls != self.total_pulls {
            return Err(format!(
                "total_pulls {} does not match sum of pull counts {pulls}",
                self.total_pulls
            ));
        }
        Ok(())
    }

    fn index_of(&self, id: CandidateId) -> Option<usize> {
        self.candidates.binary_search_by_key(&id, |c| c.id).ok()
    }

    fn get_mut(&mut self, id: CandidateId) -> Result<&mut Candidate, ArchiveError> {
        let idx = self.index_of(id).ok_or(ArchiveError::UnknownCandidate(id))?;
        Ok(&mut self.candidates[idx])
    }

    fn transition(
        &mut self,
        id: CandidateId,
        to: CandidateStatus,
        reason: Option<String>,
    ) -> Result<(), ArchiveError> {
        let candidate = self.get_mut(id)?;
        let legal = matches!(
            (candidate.status, to),
            (CandidateStatus::Warmup, CandidateStatus::Active)
                | (CandidateStatus::Warmup, CandidateStatus::Retired)
                | (CandidateStatus::Active, CandidateStatus::Retired)
        );
        if !legal {
            return Err(ArchiveError::IllegalTransition {
                id,
                from: candidate.status.as_str(),
                to: to.as_str(),
            });
        }
        candidate.status = to;
        candidate.retire_reason = reason;
        Ok(())
    }
}
