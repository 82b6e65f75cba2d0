//! Data exchanged with the experiment executor.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::archive::CandidateId;
use crate::error::ExecutionError;

/// One software-engineering task. Only `instance_id` is interpreted; the rest
/// is passed through to the executor untouched.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskInstance {
    pub instance_id: String,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl TaskInstance {
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            payload: Map::new(),
        }
    }
}

/// One tool invocation inside an instance's run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryStep {
    /// Tool name as the orchestrator called it.
    pub tool: String,
    /// Set when the tool is a candidate sub-agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_id: Option<CandidateId>,
    #[serde(default)]
    pub arguments: Value,
    #[serde(default)]
    pub result: String,
    /// Tokens consumed by the sub-agent for this invocation, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u64>,
}

/// Ordered record of what happened in one instance's run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    #[serde(default)]
    pub steps: Vec<TrajectoryStep>,
    /// Final patch or answer, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission: Option<String>,
}

impl Trajectory {
    /// Distinct candidate ids invoked, in order of first invocation.
    pub fn invoked_candidates(&self) -> Vec<CandidateId> {
        let mut seen = Vec::new();
        for id in self.steps.iter().filter_map(|s| s.candidate_id) {
            if !seen.contains(&id) {
                seen.push(id);
            }
        }
        seen
    }
}

/// What the executor reports for one instance that ran to completion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InstanceRun {
    pub resolved: bool,
    pub trajectory: Trajectory,
    #[serde(default)]
    pub cost: f64,
}

/// Why an instance did not produce a normal outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorState {
    Timeout,
    Crash,
    CostExceeded,
}

impl From<&ExecutionError> for ErrorState {
    fn from(e: &ExecutionError) -> Self {
        match e {
            ExecutionError::Timeout { .. } => ErrorState::Timeout,
            ExecutionError::CostExceeded { .. } => ErrorState::CostExceeded,
            ExecutionError::Crash(_) | ExecutionError::Harness(_) | ExecutionError::Cancelled => {
                ErrorState::Crash
            }
        }
    }
}

/// Per-instance entry of an [`ExperimentResult`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub instance_id: String,
    pub resolved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trajectory: Option<Trajectory>,
    #[serde(default)]
    pub cost: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl InstanceRecord {
    pub fn completed(instance_id: impl Into<String>, run: InstanceRun) -> Self {
        Self {
            instance_id: instance_id.into(),
            resolved: run.resolved,
            trajectory: Some(run.trajectory),
            cost: run.cost,
            error: None,
            error_message: None,
        }
    }

    /// A failed instance. Never counts as resolved.
    pub fn failed(
        instance_id: impl Into<String>,
        error: &ExecutionError,
        trajectory: Option<Trajectory>,
        cost: f64,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            resolved: false,
            trajectory,
            cost,
            error: Some(ErrorState::from(error)),
            error_message: Some(error.to_string()),
        }
    }
}

/// Outcome of one iteration's batch, ordered like the sampled instances.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperimentResult {
    pub iteration: u64,
    pub records: Vec<InstanceRecord>,
}

impl ExperimentResult {
    pub fn resolved_count(&self) -> usize {
        self.records.iter().filter(|r| r.resolved).count()
    }

    pub fn error_count(&self) -> usize {
        self.records.iter().filter(|r| r.error.is_some()).count()
    }

    pub fn total_cost(&self) -> f64 {
        self.records.iter().map(|r| r.cost).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(tool: &str, id: Option<u64>) -> TrajectoryStep {
        TrajectoryStep {
            tool: tool.to_string(),
            candidate_id: id.map(CandidateId),
            arguments: Value::Null,
            result: String::new(),
            tokens: None,
        }
    }

    #[test]
    fn invoked_candidates_are_distinct_in_first_use_order() {
        let traj = Trajectory {
            steps: vec![
                step("bash", None),
                step("b", Some(2)),
                step("a", Some(1)),
                step("b", Some(2)),
                step("edit", None),
            ],
            submission: None,
        };
        assert_eq!(traj.invoked_candidates(), vec![CandidateId(2), CandidateId(1)]);
    }

    #[test]
    fn task_instance_keeps_unknown_fields() {
        let inst: TaskInstance = serde_json::from_str(
            r#"{"instance_id":"django__django-11099","repo":"django/django","base_commit":"abc"}"#,
        )
        .unwrap();
        assert_eq!(inst.instance_id, "django__django-11099");
        assert_eq!(inst.payload["repo"], "django/django");

        let back = serde_json::to_value(&inst).unwrap();
        assert_eq!(back["base_commit"], "abc");
    }

    #[test]
    fn failed_record_is_never_resolved() {
        let err = ExecutionError::Timeout { secs: 30 };
        let rec = InstanceRecord::failed("x", &err, None, 0.0);
        assert!(!rec.resolved);
        assert_eq!(rec.error, Some(ErrorState::Timeout));
        assert!(rec.error_message.unwrap().contains("30s"));
    }

    #[test]
    fn result_aggregates() {
        let result = ExperimentResult {
            iteration: 1,
            records: vec![
                InstanceRecord::completed(
                    "a",
                    InstanceRun {
                        resolved: true,
                        trajectory: Trajectory::default(),
                        cost: 0.5,
                    },
                ),
                InstanceRecord::failed("b", &ExecutionError::Crash("segfault".into()), None, 0.25),
            ],
        };
        assert_eq!(result.resolved_count(), 1);
        assert_eq!(result.error_count(), 1);
        assert!((result.total_cost() - 0.75).abs() < 1e-12);
    }
}
