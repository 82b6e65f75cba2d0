//! Warmup admission: `warmup -> {active, retired}`.
//!
//! A freshly minted candidate is refined against a small calibration set and
//! validated, up to `retry_budget` rounds. The first round whose config
//! validates activates the candidate. When the budget runs out it is retired
//! and never becomes selectable. A cancelled admission leaves the candidate
//! in warmup; the caller discards the iteration.

pub mod validate;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::archive::{Archive, CandidateId};
use crate::collab::{RetryPolicy, WarmupRefiner, with_retry};
use crate::error::{ArchiveError, ValidationError};
use crate::experiment::InstancePool;

pub use validate::{BUILTIN_PLACEHOLDERS, ConfigValidator};

/// What happened in one warmup round.
#[derive(Clone, Debug, PartialEq)]
pub struct WarmupRound {
    pub round: u32,
    pub calibration: Vec<String>,
    pub error: Option<ValidationError>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum AdmissionOutcome {
    Admitted {
        rounds: u32,
        history: Vec<WarmupRound>,
    },
    Discarded {
        rounds: u32,
        last_error: ValidationError,
        history: Vec<WarmupRound>,
    },
    Cancelled {
        rounds: u32,
        history: Vec<WarmupRound>,
    },
}

impl AdmissionOutcome {
    pub fn history(&self) -> &[WarmupRound] {
        match self {
            AdmissionOutcome::Admitted { history, .. }
            | AdmissionOutcome::Discarded { history, .. }
            | AdmissionOutcome::Cancelled { history, .. } => history,
        }
    }
}

pub struct WarmupAdmission {
    retry_budget: u32,
    calibration_size: usize,
    retry: RetryPolicy,
    validator: ConfigValidator,
}

impl WarmupAdmission {
    pub fn new(
        retry_budget: u32,
        calibration_size: usize,
        retry: RetryPolicy,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            retry_budget,
            calibration_size,
            retry,
            validator: ConfigValidator::new()?,
        })
    }

    /// Drive one warmup candidate to a terminal admission decision.
    ///
    /// With a zero budget the current config is validated once without
    /// refinement. Archive errors (unknown id, candidate not in warmup) are
    /// returned as-is; they indicate a controller bug, not a bad candidate.
    pub async fn admit<R: Rng + ?Sized>(
        &self,
        archive: &mut Archive,
        id: CandidateId,
        refiner: &dyn WarmupRefiner,
        pool: &InstancePool,
        rng: &mut R,
        cancel: &CancellationToken,
    ) -> Result<AdmissionOutcome, ArchiveError> {
        let mut history = Vec::new();

        if self.retry_budget == 0 {
            let config = &archive.get(id).ok_or(ArchiveError::UnknownCandidate(id))?.config;
            return match self.validator.validate_config(config) {
                Ok(()) => {
                    archive.activate(id)?;
                    Ok(AdmissionOutcome::Admitted { rounds: 0, history })
                }
                Err(error) => {
                    archive.retire(id, format!("validation failed: {error}"))?;
                    Ok(AdmissionOutcome::Discarded {
                        rounds: 0,
                        last_error: error,
                        history,
                    })
                }
            };
        }

        let mut last_error = ValidationError::Refiner("no warmup round ran".to_string());
        let mut rounds = 0;
        for _ in 0..self.retry_budget {
            if cancel.is_cancelled() {
                return Ok(AdmissionOutcome::Cancelled { rounds, history });
            }
            let calibration = pool.sample_batch(rng, self.calibration_size);
            let candidate = archive
                .get(id)
                .ok_or(ArchiveError::UnknownCandidate(id))?
                .clone();

            let token = cancel.child_token();
            let refined = with_retry(&self.retry, "refine", || {
                refiner.refine(&candidate, &calibration, &token)
            })
            .await;
            if cancel.is_cancelled() || matches!(refined, Err(ValidationError::Cancelled)) {
                tracing::info!(candidate_id = %id, rounds, "Warmup cancelled");
                return Ok(AdmissionOutcome::Cancelled { rounds, history });
            }
            rounds = archive.record_warmup_round(id)?;

            let verdict = match refined {
                Ok(config) => {
                    let checked = self.validator.validate_config(&config);
                    archive.refine(id, config)?;
                    checked
                }
                Err(e) => Err(e),
            };

            let calibration = calibration.into_iter().map(|i| i.instance_id).collect();
            match verdict {
                Ok(()) => {
                    history.push(WarmupRound {
                        round: rounds,
                        calibration,
                        error: None,
                    });
                    archive.activate(id)?;
                    tracing::info!(candidate_id = %id, rounds, "Candidate admitted");
                    return Ok(AdmissionOutcome::Admitted { rounds, history });
                }
                Err(error) => {
                    tracing::warn!(
                        candidate_id = %id,
                        round = rounds,
                        budget = self.retry_budget,
                        error = %error,
                        "Warmup round failed"
                    );
                    history.push(WarmupRound {
                        round: rounds,
                        calibration,
                        error: Some(error.clone()),
                    });
                    last_error = error;
                }
            }
        }

        archive.retire(id, format!("warmup failed after {rounds} rounds: {last_error}"))?;
        tracing::info!(candidate_id = %id, rounds, "Candidate discarded");
        Ok(AdmissionOutcome::Discarded {
            rounds,
            last_error,
            history,
        })
    }
}
