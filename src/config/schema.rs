use serde::Deserialize;
use std::path::PathBuf;

use crate::collab::RetryPolicy;
use crate::controller::StopRule;

/// The TOML file structure for armory.toml.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub general: Option<GeneralConfig>,
    #[serde(rename = "loop")]
    pub iteration: Option<LoopConfig>,
    pub growth: Option<GrowthConfig>,
    pub selection: Option<SelectionConfig>,
    pub warmup: Option<WarmupConfig>,
    pub execution: Option<ExecutionConfig>,
    pub credit: Option<CreditConfig>,
    pub retry: Option<RetryConfig>,
}

#[derive(Debug, Deserialize)]
pub struct GeneralConfig {
    pub model: Option<String>,
    pub output_dir: Option<String>,
    pub seed: Option<u64>,
    /// JSON array or JSONL file of task instances.
    pub instances: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoopConfig {
    pub max_iterations: Option<u64>,
    pub stop_rule: Option<StopRule>,
    pub convergence_threshold: Option<f64>,
    pub convergence_patience: Option<u32>,
    pub batch_size: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct GrowthConfig {
    pub theta: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct SelectionConfig {
    pub top_k: Option<usize>,
    pub exploration_c: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct WarmupConfig {
    pub retry_budget: Option<u32>,
    pub calibration_size: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct ExecutionConfig {
    pub workers: Option<usize>,
    pub instance_timeout_secs: Option<u64>,
    pub cost_limit: Option<f64>,
    /// Shell command run once per instance; see `HarnessExecutor`.
    pub harness_command: Option<String>,
    /// JSON file with the base orchestrator template.
    pub agent_template: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreditConfig {
    pub judge_concurrency: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
}

impl ConfigFile {
    /// Flatten the sectioned file into a merge layer.
    pub fn to_partial(self) -> PartialConfig {
        let general = self.general;
        let iteration = self.iteration;
        let execution = self.execution;
        let retry = self.retry;
        let warmup = self.warmup;
        let selection = self.selection;

        PartialConfig {
            model: general.as_ref().and_then(|g| g.model.clone()),
            output_dir: general
                .as_ref()
                .and_then(|g| g.output_dir.as_ref().map(PathBuf::from)),
            seed: general.as_ref().and_then(|g| g.seed),
            instances: general
                .as_ref()
                .and_then(|g| g.instances.as_ref().map(PathBuf::from)),
            max_iterations: iteration.as_ref().and_then(|l| l.max_iterations),
            stop_rule: iteration.as_ref().and_then(|l| l.stop_rule),
            convergence_threshold: iteration.as_ref().and_then(|l| l.convergence_threshold),
            convergence_patience: iteration.as_ref().and_then(|l| l.convergence_patience),
            batch_size: iteration.as_ref().and_then(|l| l.batch_size),
            theta: self.growth.and_then(|g| g.theta),
            top_k: selection.as_ref().and_then(|s| s.top_k),
            exploration_c: selection.as_ref().and_then(|s| s.exploration_c),
            retry_budget: warmup.as_ref().and_then(|w| w.retry_budget),
            calibration_size: warmup.as_ref().and_then(|w| w.calibration_size),
            workers: execution.as_ref().and_then(|e| e.workers),
            instance_timeout_secs: execution.as_ref().and_then(|e| e.instance_timeout_secs),
            cost_limit: execution.as_ref().and_then(|e| e.cost_limit),
            harness_command: execution.as_ref().and_then(|e| e.harness_command.clone()),
            agent_template: execution
                .as_ref()
                .and_then(|e| e.agent_template.as_ref().map(PathBuf::from)),
            judge_concurrency: self.credit.and_then(|c| c.judge_concurrency),
            max_attempts: retry.as_ref().and_then(|r| r.max_attempts),
            base_delay_ms: retry.as_ref().and_then(|r| r.base_delay_ms),
            max_delay_ms: retry.as_ref().and_then(|r| r.max_delay_ms),
        }
    }
}

/// Fully-resolved runtime configuration. All fields have values.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub model: String,
    pub output_dir: PathBuf,
    pub seed: u64,
    pub instances: Option<PathBuf>,
    pub max_iterations: u64,
    pub stop_rule: StopRule,
    pub convergence_threshold: f64,
    pub convergence_patience: u32,
    pub batch_size: usize,
    pub theta: f64,
    pub top_k: usize,
    pub exploration_c: f64,
    pub retry_budget: u32,
    pub calibration_size: usize,
    pub workers: usize,
    pub instance_timeout_secs: u64,
    /// `None` disables the per-instance cost limit.
    pub cost_limit: Option<f64>,
    pub harness_command: Option<String>,
    pub agent_template: Option<PathBuf>,
    pub judge_concurrency: usize,
    pub retry: RetryPolicy,
}

/// Partial config used during merge. All fields are Option so that
/// missing fields don't override lower-priority values.
#[derive(Debug, Clone, Default)]
pub struct PartialConfig {
    pub model: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub seed: Option<u64>,
    pub instances: Option<PathBuf>,
    pub max_iterations: Option<u64>,
    pub stop_rule: Option<StopRule>,
    pub convergence_threshold: Option<f64>,
    pub convergence_patience: Option<u32>,
    pub batch_size: Option<usize>,
    pub theta: Option<f64>,
    pub top_k: Option<usize>,
    pub exploration_c: Option<f64>,
    pub retry_budget: Option<u32>,
    pub calibration_size: Option<usize>,
    pub workers: Option<usize>,
    pub instance_timeout_secs: Option<u64>,
    pub cost_limit: Option<f64>,
    pub harness_command: Option<String>,
    pub agent_template: Option<PathBuf>,
    pub judge_concurrency: Option<usize>,
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
}
