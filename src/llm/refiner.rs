//! Warmup refinement: run a lone candidate on the calibration instances and
//! let the model rewrite the parts of its config the orchestrator reads.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::prompts::{REFINER_SYSTEM, refinement_prompt};
use super::safety::ContentFilter;
use super::{LlmClient, extract_json};
use crate::archive::{Candidate, CandidateConfig};
use crate::collab::{ExperimentExecutor, OrchestratorAssembler, WarmupRefiner};
use crate::error::ValidationError;
use crate::experiment::render::render_trajectory;
use crate::experiment::{ExperimentResult, ExperimentRunner, TaskInstance};

/// Argument whose description `context_description` rewrites.
const CONTEXT_ARGUMENT: &str = "context";

pub struct LlmRefiner {
    llm: LlmClient,
    assembler: Arc<dyn OrchestratorAssembler>,
    executor: Arc<dyn ExperimentExecutor>,
    runner: ExperimentRunner,
    filter: ContentFilter,
}

impl LlmRefiner {
    /// Calibration runs go through `runner`, so they share the main batch's
    /// worker, timeout and cost limits.
    pub fn new(
        llm: LlmClient,
        assembler: Arc<dyn OrchestratorAssembler>,
        executor: Arc<dyn ExperimentExecutor>,
        runner: ExperimentRunner,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            llm,
            assembler,
            executor,
            runner,
            filter: ContentFilter::with_defaults()?,
        })
    }

    /// Run the single-candidate orchestrator on each calibration instance and
    /// render what happened. Failed runs are described, not dropped.
    async fn calibrate(
        &self,
        candidate: &Candidate,
        calibration: &[TaskInstance],
        cancel: &CancellationToken,
    ) -> Result<String, ValidationError> {
        let agent = Arc::new(self.assembler.assemble(std::slice::from_ref(candidate)));
        let result = self
            .runner
            .run(self.executor.clone(), agent, calibration, 0, cancel)
            .await;
        if cancel.is_cancelled() {
            return Err(ValidationError::Cancelled);
        }
        Ok(render_calibration(&result))
    }
}

#[async_trait]
impl WarmupRefiner for LlmRefiner {
    async fn refine(
        &self,
        candidate: &Candidate,
        calibration: &[TaskInstance],
        cancel: &CancellationToken,
    ) -> Result<CandidateConfig, ValidationError> {
        let transcripts = self.calibrate(candidate, calibration, cancel).await?;
        let prompt = refinement_prompt(candidate, &transcripts);

        let response = tokio::select! {
            response = self.llm.complete(REFINER_SYSTEM, &prompt) => response?,
            _ = cancel.cancelled() => return Err(ValidationError::Cancelled),
        };
        let value = extract_json(&response)?;

        let Some(updates) = value.get("updates") else {
            tracing::debug!(candidate = %candidate.id, "Refiner proposed no updates");
            return Ok(candidate.config.clone());
        };
        let refined = apply_updates(&candidate.config, updates);

        for text in [&refined.docstring, &refined.instance_template] {
            if let Some(reason) = self.filter.check(text) {
                return Err(ValidationError::Refiner(format!("unsafe update: {reason}")));
            }
        }
        Ok(refined)
    }
}

fn render_calibration(result: &ExperimentResult) -> String {
    let mut out = String::new();
    for (i, record) in result.records.iter().enumerate() {
        out.push_str(&format!("--- Trajectory {} ({}) ---\n", i + 1, record.instance_id));
        if let Some(trajectory) = &record.trajectory {
            out.push_str(&render_trajectory(trajectory, record.resolved));
        }
        if let Some(message) = &record.error_message {
            out.push_str(&format!("RUN FAILED: {message}\n"));
        }
        out.push('\n');
    }
    out
}

/// Apply the refiner's `updates` object. Unknown keys and non-string values
/// are ignored; blank strings leave the field unchanged.
pub fn apply_updates(config: &CandidateConfig, updates: &Value) -> CandidateConfig {
    let mut refined = config.clone();
    let field = |key: &str| {
        updates
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    };

    if let Some(docstring) = field("docstring") {
        refined.docstring = docstring.to_string();
    }
    if let Some(template) = field("instance_template") {
        refined.instance_template = template.to_string();
    }
    if let Some(description) = field("context_description") {
        let target = refined
            .arguments
            .iter()
            .position(|a| a.name == CONTEXT_ARGUMENT)
            .or_else(|| (!refined.arguments.is_empty()).then_some(0));
        match target {
            Some(i) => refined.arguments[i].description = description.to_string(),
            None => tracing::debug!(tool = %refined.name, "No argument to describe; ignoring context_description"),
        }
    }
    refined
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::tests::sample_config;
    use crate::collab::BundleAssembler;
    use crate::error::ExecutionError;
    use crate::experiment::InstanceRun;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Blocks every instance until its token fires.
    struct StalledExecutor {
        started: AtomicUsize,
    }

    #[async_trait]
    impl ExperimentExecutor for StalledExecutor {
        async fn run_instance(
            &self,
            _agent: &crate::collab::RunnableAgentConfig,
            _instance: &TaskInstance,
            cancel: CancellationToken,
        ) -> Result<InstanceRun, ExecutionError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            cancel.cancelled().await;
            Err(ExecutionError::Cancelled)
        }
    }

    #[tokio::test]
    async fn cancellation_stops_calibration_before_the_model_is_asked() {
        let executor = Arc::new(StalledExecutor {
            started: AtomicUsize::new(0),
        });
        let refiner = LlmRefiner::new(
            LlmClient::new("armory-test-model"),
            Arc::new(BundleAssembler::default()),
            executor.clone(),
            ExperimentRunner::new(2, Duration::from_secs(600), None),
        )
        .unwrap();
        let mut archive = crate::archive::Archive::new(0);
        let id = archive.mint(sample_config("scout"), None, 1);
        let candidate = archive.get(id).unwrap().clone();
        let calibration = vec![TaskInstance::new("cal-1"), TaskInstance::new("cal-2")];

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let refined = tokio::time::timeout(
            Duration::from_secs(5),
            refiner.refine(&candidate, &calibration, &cancel),
        )
        .await
        .expect("refine returns promptly once cancelled");
        assert_eq!(refined, Err(ValidationError::Cancelled));
        assert_eq!(executor.started.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failed_calibration_runs_are_described() {
        let result = ExperimentResult {
            iteration: 0,
            records: vec![crate::experiment::InstanceRecord::failed(
                "cal-1",
                &ExecutionError::Timeout { secs: 30 },
                None,
                0.0,
            )],
        };
        let text = render_calibration(&result);
        assert!(text.contains("--- Trajectory 1 (cal-1) ---"));
        assert!(text.contains("RUN FAILED: Instance timed out after 30s"));
    }

    #[test]
    fn updates_named_fields_only() {
        let config = sample_config("scout");
        let refined = apply_updates(
            &config,
            &json!({
                "docstring": "Scout the repo layout before editing.",
                "context_description": "Which module to scout",
                "instance_template": "Scout: {{context}}",
                "signature": "ignored <x>",
            }),
        );
        assert_eq!(refined.docstring, "Scout the repo layout before editing.");
        assert_eq!(refined.arguments[0].description, "Which module to scout");
        assert_eq!(refined.instance_template, "Scout: {{context}}");
        assert_eq!(refined.signature, config.signature);
        assert_eq!(refined.system_template, config.system_template);
    }

    #[test]
    fn blank_or_non_string_updates_are_ignored() {
        let config = sample_config("scout");
        let refined = apply_updates(&config, &json!({"docstring": "  ", "instance_template": 3}));
        assert_eq!(refined, config);
    }

    #[test]
    fn context_description_without_arguments_is_dropped() {
        let mut config = sample_config("scout");
        config.arguments.clear();
        let refined = apply_updates(&config, &json!({"context_description": "anything"}));
        assert_eq!(refined, config);
    }
}
