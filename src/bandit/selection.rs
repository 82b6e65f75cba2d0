//! Upper-confidence-bound selection over active candidates.
//!
//! `score = mean + c * sqrt(ln(total_pulls) / pulls)` for pulled candidates;
//! unpulled candidates score `+inf` so every active candidate is tried once
//! before exploitation takes over. Ties go to the lower id, which makes the
//! selection a pure function of the archive and `(k, c)`.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::archive::{Archive, CandidateId, CandidateStats};

/// One selected candidate with the score it was selected on.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub id: CandidateId,
    /// `None` stands for the unconditional maximal score of an unpulled candidate.
    pub score: Option<f64>,
}

/// UCB score for one candidate. `None` means "unpulled", which outranks every
/// finite score.
pub fn ucb_score(stats: &CandidateStats, total_pulls: u64, c: f64) -> Option<f64> {
    if stats.pull_count == 0 {
        return None;
    }
    let ln_total = (total_pulls.max(1) as f64).ln();
    let bonus = c * (ln_total / stats.pull_count as f64).sqrt();
    Some(stats.mean_reward + bonus)
}

/// Pick the top `k` distinct active candidates.
pub fn select_top_k(archive: &Archive, k: usize, c: f64) -> Vec<Selection> {
    let total = archive.total_pulls();
    let mut scored: Vec<Selection> = archive
        .active()
        .map(|cand| Selection {
            id: cand.id,
            score: ucb_score(&cand.stats, total, c),
        })
        .collect();

    scored.sort_by(|a, b| compare(a, b));
    scored.truncate(k);
    scored
}

/// Descending by score (unpulled first), then ascending id.
fn compare(a: &Selection, b: &Selection) -> Ordering {
    let by_score = match (a.score, b.score) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => y.total_cmp(&x),
    };
    by_score.then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::tests::sample_config;

    fn stats(mean: f64, pulls: u64) -> CandidateStats {
        CandidateStats {
            pull_count: pulls,
            cumulative_reward: mean * pulls as f64,
            mean_reward: mean,
            ..Default::default()
        }
    }

    /// Active candidate with `pulls` observations averaging `mean`.
    fn add_active(archive: &mut Archive, name: &str, mean: f64, pulls: u64) -> CandidateId {
        let id = archive.mint(sample_config(name), None, 1);
        archive.activate(id).unwrap();
        let ones = (mean * pulls as f64).round() as u64;
        for i in 0..pulls {
            let score = if i < ones { 1.0 } else { 0.0 };
            archive.apply_observation(id, score).unwrap();
        }
        id
    }

    #[test]
    fn exploration_bonus_can_beat_higher_mean() {
        let a = ucb_score(&stats(0.8, 10), 12, 1.0).unwrap();
        let b = ucb_score(&stats(0.5, 2), 12, 1.0).unwrap();

        assert!((a - 1.2985).abs() < 1e-3, "UCB(A) = {a}");
        assert!((b - 1.6146).abs() < 1e-3, "UCB(B) = {b}");
        assert!(b > a);
    }

    #[test]
    fn skewed_pulls_select_less_explored_candidate() {
        let mut archive = Archive::new(0);
        let a = add_active(&mut archive, "a", 0.8, 10);
        let b = add_active(&mut archive, "b", 0.5, 2);
        assert_eq!(archive.total_pulls(), 12);

        let top = select_top_k(&archive, 1, 1.0);
        assert_eq!(top[0].id, b);
        assert_ne!(top[0].id, a);
    }

    #[test]
    fn unpulled_candidates_come_first() {
        let mut archive = Archive::new(0);
        let strong = add_active(&mut archive, "strong", 1.0, 4);
        let fresh = add_active(&mut archive, "fresh", 0.0, 0);

        let top = select_top_k(&archive, 1, 1.0);
        assert_eq!(top, vec![Selection { id: fresh, score: None }]);

        let both = select_top_k(&archive, 2, 1.0);
        assert_eq!(both[1].id, strong);
    }

    #[test]
    fn ties_go_to_lower_id() {
        let mut archive = Archive::new(0);
        let first = add_active(&mut archive, "first", 0.0, 0);
        let second = add_active(&mut archive, "second", 0.0, 0);
        let third = add_active(&mut archive, "third", 0.0, 0);

        let ids: Vec<_> = select_top_k(&archive, 3, 1.0).iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![first, second, third]);
    }

    #[test]
    fn only_active_candidates_are_selected() {
        let mut archive = Archive::new(0);
        let warm = archive.mint(sample_config("warm"), None, 1);
        let gone = archive.mint(sample_config("gone"), None, 1);
        archive.retire(gone, "validation failed").unwrap();
        let live = add_active(&mut archive, "live", 0.5, 2);

        let ids: Vec<_> = select_top_k(&archive, 5, 1.0).iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![live]);
        assert!(!ids.contains(&warm));
    }

    #[test]
    fn selection_is_deterministic() {
        let mut archive = Archive::new(0);
        add_active(&mut archive, "a", 0.5, 4);
        add_active(&mut archive, "b", 0.5, 4);
        add_active(&mut archive, "c", 0.25, 4);

        let first = select_top_k(&archive, 2, 1.4);
        for _ in 0..10 {
            assert_eq!(select_top_k(&archive, 2, 1.4), first);
        }
    }

    #[test]
    fn single_total_pull_has_no_bonus() {
        let score = ucb_score(&stats(0.5, 1), 1, 2.0).unwrap();
        assert_eq!(score, 0.5);
    }
}
