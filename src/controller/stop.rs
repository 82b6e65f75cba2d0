//! Stopping rules.
//!
//! Exactly one rule is in force per run and it is always named in the
//! configuration. `max_iterations` caps the run under either rule.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::archive::{Archive, CandidateId, CandidateStatus};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopRule {
    /// Run exactly `max_iterations` iterations.
    #[default]
    MaxIterations,
    /// Stop once `patience` consecutive iterations were quiet: no candidate
    /// minted or changing status, and no mean moving by more than `threshold`.
    Convergence,
}

impl fmt::Display for StopRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopRule::MaxIterations => write!(f, "max_iterations"),
            StopRule::Convergence => write!(f, "convergence"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    MaxIterations,
    Converged,
    Cancelled,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::MaxIterations => write!(f, "max_iterations"),
            StopReason::Converged => write!(f, "converged"),
            StopReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct StopCriterion {
    pub rule: StopRule,
    pub max_iterations: u64,
    pub threshold: f64,
    pub patience: u32,
}

impl StopCriterion {
    /// Checked at iteration boundaries, against the persisted counters.
    pub fn should_stop(&self, archive: &Archive) -> Option<StopReason> {
        if archive.iteration() >= self.max_iterations {
            return Some(StopReason::MaxIterations);
        }
        if self.rule == StopRule::Convergence && archive.quiet_iterations() >= self.patience {
            return Some(StopReason::Converged);
        }
        None
    }
}

/// Per-candidate state captured before an iteration, to detect change.
#[derive(Clone, Debug)]
pub struct ArchiveFingerprint {
    entries: Vec<(CandidateId, CandidateStatus, f64)>,
}

impl ArchiveFingerprint {
    pub fn of(archive: &Archive) -> Self {
        Self {
            entries: archive
                .candidates()
                .iter()
                .map(|c| (c.id, c.status, c.stats.mean_reward))
                .collect(),
        }
    }

    /// An iteration is quiet when the archive did not grow, no status
    /// changed, and every mean moved by at most `threshold`.
    pub fn is_quiet(&self, after: &Archive, threshold: f64) -> bool {
        if after.len() != self.entries.len() {
            return false;
        }
        self.entries.iter().zip(after.candidates()).all(|((id, status, mean), c)| {
            *id == c.id && *status == c.status && (c.stats.mean_reward - mean).abs() <= threshold
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::tests::sample_config;

    fn criterion(rule: StopRule) -> StopCriterion {
        StopCriterion {
            rule,
            max_iterations: 5,
            threshold: 0.05,
            patience: 2,
        }
    }

    #[test]
    fn max_iterations_caps_both_rules() {
        let mut archive = Archive::new(0);
        for _ in 0..5 {
            archive.advance_iteration();
        }
        assert_eq!(
            criterion(StopRule::MaxIterations).should_stop(&archive),
            Some(StopReason::MaxIterations)
        );
        assert_eq!(
            criterion(StopRule::Convergence).should_stop(&archive),
            Some(StopReason::MaxIterations)
        );
    }

    #[test]
    fn convergence_needs_patience_quiet_iterations() {
        let mut archive = Archive::new(0);
        archive.advance_iteration();
        archive.set_quiet_iterations(1);
        assert_eq!(criterion(StopRule::Convergence).should_stop(&archive), None);

        archive.set_quiet_iterations(2);
        assert_eq!(
            criterion(StopRule::Convergence).should_stop(&archive),
            Some(StopReason::Converged)
        );
        // The fixed-budget rule ignores the streak entirely.
        assert_eq!(criterion(StopRule::MaxIterations).should_stop(&archive), None);
    }

    #[test]
    fn fingerprint_detects_growth_status_and_mean_changes() {
        let mut archive = Archive::new(0);
        let id = archive.mint(sample_config("steady_tool"), None, 1);
        archive.activate(id).unwrap();
        archive.apply_observation(id, 0.5).unwrap();

        let before = ArchiveFingerprint::of(&archive);
        assert!(before.is_quiet(&archive, 0.0));

        archive.apply_observation(id, 0.52).unwrap();
        assert!(before.is_quiet(&archive, 0.05));
        assert!(!before.is_quiet(&archive, 0.001));

        let mut grown = archive.clone();
        grown.mint(sample_config("new_tool"), None, 2);
        assert!(!before.is_quiet(&grown, 1.0));

        archive.retire(id, "test").unwrap();
        assert!(!before.is_quiet(&archive, 1.0));
    }
}
