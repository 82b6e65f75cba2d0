//! Bandit core: stochastic growth of the action space and UCB selection.

pub mod growth;
pub mod selection;

pub use growth::{GrowthOutcome, GrowthProcess, growth_probability};
pub use selection::{Selection, select_top_k, ucb_score};
