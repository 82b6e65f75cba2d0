//! Type definitions for the candidate archive.
//!
//! These types form the shared vocabulary between the [`super::Archive`], the
//! growth and warmup stages, the selection policy and the snapshot format.
//! Everything derives [`serde::Serialize`] / [`serde::Deserialize`] since the
//! whole archive is persisted at each iteration boundary.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Monotonic candidate identifier, allocated by the archive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateId(pub u64);

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One argument in a candidate tool's schema.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolArgument {
    pub name: String,
    #[serde(rename = "type", default = "default_arg_type")]
    pub arg_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_arg_type() -> String {
    "string".to_string()
}

fn default_required() -> bool {
    true
}

/// Sub-agent specification: the tool the orchestrator sees plus the prompt
/// templates the sub-agent runs with. Opaque to the bandit core.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CandidateConfig {
    pub name: String,
    pub signature: String,
    pub docstring: String,
    #[serde(default)]
    pub arguments: Vec<ToolArgument>,
    #[serde(default)]
    pub system_template: String,
    #[serde(default)]
    pub instance_template: String,
}

/// Lifecycle status of a candidate.
///
/// `Warmup -> Active`, `Warmup -> Retired` and `Active -> Retired` are the
/// only legal transitions. Retired is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStatus {
    Warmup,
    Active,
    Retired,
}

impl CandidateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateStatus::Warmup => "warmup",
            CandidateStatus::Active => "active",
            CandidateStatus::Retired => "retired",
        }
    }
}

/// Running reward statistics for one candidate.
///
/// `pull_count` counts applied observations; `mean_reward` is maintained
/// incrementally. `sum_squared_reward` backs [`CandidateStats::variance`].
/// Token accounting is tracked per sub-agent invocation and is independent
/// of pulls.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateStats {
    pub pull_count: u64,
    pub cumulative_reward: f64,
    pub mean_reward: f64,
    #[serde(default)]
    pub sum_squared_reward: f64,
    #[serde(default)]
    pub invocation_count: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl CandidateStats {
    /// Apply one reward observation.
    pub fn observe(&mut self, score: f64) {
        self.pull_count += 1;
        self.cumulative_reward += score;
        self.sum_squared_reward += score * score;
        self.mean_reward += (score - self.mean_reward) / self.pull_count as f64;
    }

    /// Population variance of the observed rewards (0 with fewer than two pulls).
    pub fn variance(&self) -> f64 {
        if self.pull_count < 2 {
            return 0.0;
        }
        let n = self.pull_count as f64;
        (self.sum_squared_reward / n - self.mean_reward * self.mean_reward).max(0.0)
    }

    /// Record one sub-agent invocation's token usage.
    pub fn record_tokens(&mut self, tokens: u64) {
        self.invocation_count = self.invocation_count.saturating_add(1);
        self.total_tokens = self.total_tokens.saturating_add(tokens);
    }

    pub fn average_tokens(&self) -> f64 {
        if self.invocation_count == 0 {
            0.0
        } else {
            self.total_tokens as f64 / self.invocation_count as f64
        }
    }
}

/// A candidate sub-agent tracked by the archive.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Candidate {
    pub id: CandidateId,
    /// Iteration in which the growth process minted this candidate.
    pub created_at_iteration: u64,
    pub config: CandidateConfig,
    pub status: CandidateStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retire_reason: Option<String>,
    pub stats: CandidateStats,
    /// Non-owning back-reference to the exemplar this candidate was derived from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<CandidateId>,
    /// Number of warmup rounds spent before admission or retirement.
    #[serde(default)]
    pub warmup_rounds: u32,
}

impl Candidate {
    pub fn is_active(&self) -> bool {
        self.status == CandidateStatus::Active
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }
}
