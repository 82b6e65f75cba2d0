//! Top-K export of the best candidates in a finished (or in-progress) run.

use std::cmp::Ordering;

use super::{Archive, Candidate, CandidateStatus};

/// Return the `k` best candidates in `archive`.
///
/// Ranking: highest `mean_reward`, then lowest reward variance, then lowest
/// (earliest) id. Retired candidates are never exported. An unpulled
/// candidate ranks with a mean of 0.
pub fn export_top_k(archive: &Archive, k: usize) -> Vec<Candidate> {
    let mut ranked: Vec<&Candidate> = archive
        .candidates()
        .iter()
        .filter(|c| c.status != CandidateStatus::Retired)
        .collect();
    ranked.sort_by(|a, b| compare_for_export(a, b));
    ranked.into_iter().take(k).cloned().collect()
}

fn compare_for_export(a: &Candidate, b: &Candidate) -> Ordering {
    b.stats
        .mean_reward
        .total_cmp(&a.stats.mean_reward)
        .then_with(|| a.stats.variance().total_cmp(&b.stats.variance()))
        .then_with(|| a.id.cmp(&b.id))
}
