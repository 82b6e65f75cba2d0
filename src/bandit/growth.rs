//! Chinese-Restaurant-Process growth of the candidate pool.
//!
//! Each iteration a single uniform draw decides whether to mint a new
//! candidate, with probability `theta / (n + theta)` where `n` counts active
//! and warmup candidates. The draw is always taken, even when `theta == 0`,
//! so the RNG stream does not depend on the outcome.

use rand::Rng;
use rand::seq::SliceRandom;

use crate::archive::{Archive, Candidate, CandidateId};
use crate::collab::{
    CandidateSummary, Exemplar, GenerationContext, RetryPolicy, SubagentGenerator, with_retry,
};
use crate::error::GenerationError;

/// Maximum number of exemplar candidates shown to the generator.
pub const MAX_EXEMPLARS: usize = 2;

/// Probability of minting a new candidate given `n` open candidates.
pub fn growth_probability(n: usize, theta: f64) -> f64 {
    if theta <= 0.0 {
        return 0.0;
    }
    theta / (n as f64 + theta)
}

/// What the growth step did this iteration.
#[derive(Debug)]
pub enum GrowthOutcome {
    /// The draw said no.
    NoGrowth { probability: f64 },
    /// A candidate was minted and is now in warmup.
    Minted { id: CandidateId, probability: f64 },
    /// The draw said yes but the generator failed; growth is skipped.
    Skipped {
        probability: f64,
        error: GenerationError,
    },
}

#[derive(Clone, Debug)]
pub struct GrowthProcess {
    theta: f64,
    retry: RetryPolicy,
}

impl GrowthProcess {
    pub fn new(theta: f64, retry: RetryPolicy) -> Self {
        Self {
            theta: theta.max(0.0),
            retry,
        }
    }

    /// Run the growth rule for `iteration`, minting into `archive` on success.
    pub async fn grow<R: Rng + ?Sized>(
        &self,
        archive: &mut Archive,
        generator: &dyn SubagentGenerator,
        iteration: u64,
        rng: &mut R,
    ) -> GrowthOutcome {
        let probability = growth_probability(archive.open_count(), self.theta);
        let draw: f64 = rng.gen_range(0.0..1.0);
        if draw >= probability {
            return GrowthOutcome::NoGrowth { probability };
        }

        let context = build_context(archive, iteration, rng);
        let parent = context.exemplars.first().map(|e| e.id);

        let generated = with_retry(&self.retry, "generate", || generator.generate(&context)).await;
        match generated {
            Ok(config) => {
                let id = archive.mint(config, parent, iteration);
                tracing::info!(
                    iteration,
                    candidate_id = %id,
                    name = %archive.get(id).map(Candidate::name).unwrap_or_default(),
                    probability,
                    "Minted new candidate"
                );
                GrowthOutcome::Minted { id, probability }
            }
            Err(error) => {
                tracing::warn!(iteration, probability, error = %error, "Growth skipped: generator failed");
                GrowthOutcome::Skipped { probability, error }
            }
        }
    }
}

/// Describe the archive to the generator. Exemplars are drawn from
/// non-retired candidates weighted by mean reward, uniformly when every
/// weight is zero.
pub fn build_context<R: Rng + ?Sized>(
    archive: &Archive,
    iteration: u64,
    rng: &mut R,
) -> GenerationContext {
    let existing = archive
        .candidates()
        .iter()
        .map(|c| CandidateSummary {
            id: c.id,
            name: c.config.name.clone(),
            docstring: c.config.docstring.clone(),
        })
        .collect();

    let pool: Vec<&Candidate> = archive.active().collect();
    let all_zero = pool.iter().all(|c| c.stats.mean_reward <= 0.0);
    let picked: Vec<&Candidate> = if all_zero {
        pool.choose_multiple(rng, MAX_EXEMPLARS).copied().collect()
    } else {
        pool.choose_multiple_weighted(rng, MAX_EXEMPLARS, |c| c.stats.mean_reward.max(0.0))
            .map(|it| it.copied().collect())
            .unwrap_or_default()
    };

    let exemplars = picked
        .into_iter()
        .map(|c| Exemplar {
            id: c.id,
            config: c.config.clone(),
            pull_count: c.stats.pull_count,
            mean_reward: c.stats.mean_reward,
            average_tokens: c.stats.average_tokens(),
        })
        .collect();

    GenerationContext {
        iteration,
        existing,
        exemplars,
    }
}
