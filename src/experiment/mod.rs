//! Experiment execution boundary.
//!
//! Provides the [`ExperimentRunner`] that executes one iteration's batch in
//! parallel, the [`InstancePool`] batches are drawn from, and the shared
//! [`types`] describing instances, trajectories and outcomes.

pub mod instances;
pub mod render;
pub mod runner;
pub mod types;

pub use instances::InstancePool;
pub use runner::ExperimentRunner;
pub use types::*;
