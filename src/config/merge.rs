use super::schema::{AppConfig, PartialConfig};
use crate::collab::RetryPolicy;
use crate::controller::StopRule;
use crate::error::ConfigError;
use std::path::PathBuf;
use std::time::Duration;

impl PartialConfig {
    /// Merge self with a lower-priority fallback.
    /// Self's non-None values take precedence.
    pub fn with_fallback(self, fallback: PartialConfig) -> PartialConfig {
        PartialConfig {
            model: self.model.or(fallback.model),
            output_dir: self.output_dir.or(fallback.output_dir),
            seed: self.seed.or(fallback.seed),
            instances: self.instances.or(fallback.instances),
            max_iterations: self.max_iterations.or(fallback.max_iterations),
            stop_rule: self.stop_rule.or(fallback.stop_rule),
            convergence_threshold: self.convergence_threshold.or(fallback.convergence_threshold),
            convergence_patience: self.convergence_patience.or(fallback.convergence_patience),
            batch_size: self.batch_size.or(fallback.batch_size),
            theta: self.theta.or(fallback.theta),
            top_k: self.top_k.or(fallback.top_k),
            exploration_c: self.exploration_c.or(fallback.exploration_c),
            retry_budget: self.retry_budget.or(fallback.retry_budget),
            calibration_size: self.calibration_size.or(fallback.calibration_size),
            workers: self.workers.or(fallback.workers),
            instance_timeout_secs: self.instance_timeout_secs.or(fallback.instance_timeout_secs),
            cost_limit: self.cost_limit.or(fallback.cost_limit),
            harness_command: self.harness_command.or(fallback.harness_command),
            agent_template: self.agent_template.or(fallback.agent_template),
            judge_concurrency: self.judge_concurrency.or(fallback.judge_concurrency),
            max_attempts: self.max_attempts.or(fallback.max_attempts),
            base_delay_ms: self.base_delay_ms.or(fallback.base_delay_ms),
            max_delay_ms: self.max_delay_ms.or(fallback.max_delay_ms),
        }
    }

    /// Convert to AppConfig, filling any remaining gaps with defaults.
    pub fn finalize(self) -> AppConfig {
        let retry_defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: self.max_attempts.unwrap_or(retry_defaults.max_attempts),
            base_delay: self
                .base_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(retry_defaults.base_delay),
            max_delay: self
                .max_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(retry_defaults.max_delay),
        };

        AppConfig {
            model: self.model.unwrap_or_else(|| "llama3.2".to_string()),
            output_dir: self
                .output_dir
                .unwrap_or_else(|| PathBuf::from("./armory-run")),
            seed: self.seed.unwrap_or(0),
            instances: self.instances,
            max_iterations: self.max_iterations.unwrap_or(20),
            stop_rule: self.stop_rule.unwrap_or(StopRule::MaxIterations),
            convergence_threshold: self.convergence_threshold.unwrap_or(0.01),
            convergence_patience: self.convergence_patience.unwrap_or(3),
            batch_size: self.batch_size.unwrap_or(10),
            theta: self.theta.unwrap_or(1.0),
            top_k: self.top_k.unwrap_or(3),
            exploration_c: self.exploration_c.unwrap_or(1.0),
            retry_budget: self.retry_budget.unwrap_or(3),
            calibration_size: self.calibration_size.unwrap_or(2),
            workers: self.workers.unwrap_or(4),
            instance_timeout_secs: self.instance_timeout_secs.unwrap_or(1800),
            cost_limit: self.cost_limit,
            harness_command: self.harness_command,
            agent_template: self.agent_template,
            judge_concurrency: self.judge_concurrency.unwrap_or(4),
            retry,
        }
    }
}

impl AppConfig {
    /// Reject values the loop cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, message: impl Into<String>) -> ConfigError {
            ConfigError::InvalidValue {
                field,
                message: message.into(),
            }
        }

        if !(self.theta.is_finite() && self.theta >= 0.0) {
            return Err(invalid("growth.theta", format!("must be >= 0, got {}", self.theta)));
        }
        if !(self.exploration_c.is_finite() && self.exploration_c >= 0.0) {
            return Err(invalid(
                "selection.exploration_c",
                format!("must be >= 0, got {}", self.exploration_c),
            ));
        }
        if self.top_k == 0 {
            return Err(invalid("selection.top_k", "must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(invalid("loop.batch_size", "must be at least 1"));
        }
        if self.workers == 0 {
            return Err(invalid("execution.workers", "must be at least 1"));
        }
        if self.instance_timeout_secs == 0 {
            return Err(invalid("execution.instance_timeout_secs", "must be positive"));
        }
        if let Some(limit) = self.cost_limit {
            if !(limit.is_finite() && limit > 0.0) {
                return Err(invalid("execution.cost_limit", format!("must be > 0, got {limit}")));
            }
        }
        if self.judge_concurrency == 0 {
            return Err(invalid("credit.judge_concurrency", "must be at least 1"));
        }
        if !(self.convergence_threshold.is_finite() && self.convergence_threshold >= 0.0) {
            return Err(invalid("loop.convergence_threshold", "must be >= 0"));
        }
        if self.stop_rule == StopRule::Convergence && self.convergence_patience == 0 {
            return Err(invalid("loop.convergence_patience", "must be at least 1"));
        }
        Ok(())
    }
}
