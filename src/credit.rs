//! Hindsight credit assignment.
//!
//! A resolved or failed instance is a single outcome, but its trajectory may
//! have called several sub-agents. Each (instance, candidate) pair whose
//! candidate actually appears in the trajectory is handed to the judge, which
//! scores how much that candidate helped. Candidates that were not invoked get
//! nothing from the instance, and a judge failure yields [`Score::Missing`]
//! instead of a zero.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};

use crate::archive::{Candidate, CandidateId};
use crate::collab::{Judge, Judgement, RetryPolicy, with_retry};
use crate::error::JudgeError;
use crate::experiment::{ExperimentResult, Trajectory};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Score {
    Value(f64),
    /// The judge could not score the pair; excluded from aggregation.
    Missing,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreditObservation {
    pub instance_id: String,
    pub candidate_id: CandidateId,
    pub score: Score,
    pub rationale: String,
}

impl CreditObservation {
    pub fn value(&self) -> Option<f64> {
        match self.score {
            Score::Value(v) => Some(v),
            Score::Missing => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CreditAssigner {
    concurrency: usize,
    retry: RetryPolicy,
}

impl CreditAssigner {
    pub fn new(concurrency: usize, retry: RetryPolicy) -> Self {
        Self {
            concurrency: concurrency.max(1),
            retry,
        }
    }

    /// Judge every invoked, selected candidate of every record with a
    /// trajectory. Calls run up to `concurrency` at a time; the output is
    /// ordered by record, then by first invocation within the trajectory.
    pub async fn assign(
        &self,
        judge: &dyn Judge,
        result: &ExperimentResult,
        selected: &[Candidate],
    ) -> Vec<CreditObservation> {
        let mut pairs: Vec<(&str, &Trajectory, bool, &Candidate)> = Vec::new();
        for record in &result.records {
            let Some(trajectory) = &record.trajectory else {
                continue;
            };
            for id in trajectory.invoked_candidates() {
                match selected.iter().find(|c| c.id == id) {
                    Some(candidate) => pairs.push((
                        record.instance_id.as_str(),
                        trajectory,
                        record.resolved,
                        candidate,
                    )),
                    None => tracing::warn!(
                        iteration = result.iteration,
                        instance_id = %record.instance_id,
                        candidate_id = %id,
                        "Trajectory references a candidate outside the selection, ignoring"
                    ),
                }
            }
        }

        stream::iter(pairs)
            .map(|(instance_id, trajectory, resolved, candidate)| async move {
                let judged = with_retry(&self.retry, "judge", || {
                    judge_once(judge, trajectory, resolved, candidate)
                })
                .await;

                let (score, rationale) = match judged {
                    Ok(j) => (Score::Value(j.score), j.rationale),
                    Err(e) => {
                        tracing::warn!(
                            iteration = result.iteration,
                            instance_id,
                            candidate_id = %candidate.id,
                            attempts = self.retry.max_attempts,
                            error = %e,
                            "Judge failed, recording missing observation"
                        );
                        (Score::Missing, e.to_string())
                    }
                };
                CreditObservation {
                    instance_id: instance_id.to_string(),
                    candidate_id: candidate.id,
                    score,
                    rationale,
                }
            })
            .buffered(self.concurrency)
            .collect()
            .await
    }
}

/// One judge call with the score range enforced, so an out-of-range verdict
/// goes through the same retry path as a transport failure.
async fn judge_once(
    judge: &dyn Judge,
    trajectory: &Trajectory,
    resolved: bool,
    candidate: &Candidate,
) -> Result<Judgement, JudgeError> {
    let judgement = judge.score(trajectory, resolved, candidate).await?;
    if !(0.0..=1.0).contains(&judgement.score) {
        return Err(JudgeError::OutOfRange(judgement.score));
    }
    Ok(judgement)
}
