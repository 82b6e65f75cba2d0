//! Parallel batch execution with per-instance isolation.
//!
//! Each instance runs in its own tokio task, gated by a semaphore sized to the
//! configured worker count. A task that exceeds its time limit has its
//! cancellation token fired and is recorded as a timeout; a task that panics
//! is recorded as a crash; a run that reports more than the cost limit is
//! recorded as cost-exceeded. None of these abort sibling instances.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{ExperimentResult, InstanceRecord, TaskInstance};
use crate::collab::{ExperimentExecutor, RunnableAgentConfig};
use crate::error::ExecutionError;

/// Fans a batch of instances out over an [`ExperimentExecutor`].
#[derive(Clone, Debug)]
pub struct ExperimentRunner {
    workers: usize,
    instance_timeout: Duration,
    cost_limit: Option<f64>,
}

impl ExperimentRunner {
    pub fn new(workers: usize, instance_timeout: Duration, cost_limit: Option<f64>) -> Self {
        Self {
            workers: workers.max(1),
            instance_timeout,
            cost_limit,
        }
    }

    /// Run every instance and return one record per instance, in input order.
    ///
    /// Cancelling `cancel` stops in-flight instances; they are recorded as
    /// crashed with a "cancelled" message.
    pub async fn run(
        &self,
        executor: Arc<dyn ExperimentExecutor>,
        agent: Arc<RunnableAgentConfig>,
        instances: &[TaskInstance],
        iteration: u64,
        cancel: &CancellationToken,
    ) -> ExperimentResult {
        let permits = Arc::new(Semaphore::new(self.workers));

        let handles: Vec<(String, JoinHandle<Result<InstanceRecord, ExecutionError>>)> = instances
            .iter()
            .map(|instance| {
                let executor = executor.clone();
                let agent = agent.clone();
                let instance = instance.clone();
                let permits = permits.clone();
                let token = cancel.child_token();
                let timeout = self.instance_timeout;
                let cost_limit = self.cost_limit;
                let id = instance.instance_id.clone();

                let handle = tokio::spawn(async move {
                    let _permit = permits
                        .acquire_owned()
                        .await
                        .map_err(|_| ExecutionError::Cancelled)?;
                    if token.is_cancelled() {
                        return Err(ExecutionError::Cancelled);
                    }
                    run_one(executor, agent, instance, token, timeout, cost_limit).await
                });
                (id, handle)
            })
            .collect();

        let mut records = Vec::with_capacity(handles.len());
        for (instance_id, handle) in handles {
            let record = match handle.await {
                Ok(Ok(record)) => record,
                Ok(Err(e)) => InstanceRecord::failed(&instance_id, &e, None, 0.0),
                Err(join_err) => {
                    let e = ExecutionError::Crash(format!("executor task panicked: {join_err}"));
                    InstanceRecord::failed(&instance_id, &e, None, 0.0)
                }
            };

            if let Some(msg) = &record.error_message {
                tracing::warn!(iteration, instance_id = %record.instance_id, error = %msg, "Instance failed");
            } else {
                tracing::debug!(
                    iteration,
                    instance_id = %record.instance_id,
                    resolved = record.resolved,
                    "Instance finished"
                );
            }
            records.push(record);
        }

        ExperimentResult { iteration, records }
    }
}

async fn run_one(
    executor: Arc<dyn ExperimentExecutor>,
    agent: Arc<RunnableAgentConfig>,
    instance: TaskInstance,
    token: CancellationToken,
    timeout: Duration,
    cost_limit: Option<f64>,
) -> Result<InstanceRecord, ExecutionError> {
    let fut = executor.run_instance(&agent, &instance, token.clone());

    let outcome = tokio::select! {
        res = fut => res,
        _ = tokio::time::sleep(timeout) => {
            token.cancel();
            Err(ExecutionError::Timeout { secs: timeout.as_secs() })
        }
        _ = token.cancelled() => Err(ExecutionError::Cancelled),
    };

    match outcome {
        Ok(run) => match cost_limit {
            Some(limit) if run.cost > limit => {
                let e = ExecutionError::CostExceeded {
                    cost: run.cost,
                    limit,
                };
                Ok(InstanceRecord::failed(
                    &instance.instance_id,
                    &e,
                    Some(run.trajectory),
                    run.cost,
                ))
            }
            _ => Ok(InstanceRecord::completed(&instance.instance_id, run)),
        },
        Err(e) => Ok(InstanceRecord::failed(&instance.instance_id, &e, None, 0.0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::CandidateId;
    use crate::collab::BundleAssembler;
    use crate::collab::OrchestratorAssembler;
    use crate::experiment::{ErrorState, InstanceRun, Trajectory, TrajectoryStep};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Behaves according to the instance id prefix.
    struct ScriptedExecutor {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ScriptedExecutor {
        fn new() -> Self {
            Self {
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ExperimentExecutor for ScriptedExecutor {
        async fn run_instance(
            &self,
            _agent: &RunnableAgentConfig,
            instance: &TaskInstance,
            cancel: CancellationToken,
        ) -> Result<InstanceRun, ExecutionError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            let id = instance.instance_id.as_str();
            let out = if id.starts_with("hang") {
                cancel.cancelled().await;
                Err(ExecutionError::Cancelled)
            } else if id.starts_with("panic") {
                panic!("harness exploded");
            } else if id.starts_with("pricey") {
                Ok(InstanceRun {
                    resolved: true,
                    trajectory: Trajectory {
                        steps: vec![TrajectoryStep {
                            tool: "helper".into(),
                            candidate_id: Some(CandidateId(1)),
                            arguments: serde_json::Value::Null,
                            result: "ok".into(),
                            tokens: Some(10),
                        }],
                        submission: None,
                    },
                    cost: 99.0,
                })
            } else {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(InstanceRun {
                    resolved: id.ends_with("ok"),
                    trajectory: Trajectory::default(),
                    cost: 0.1,
                })
            };

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            out
        }
    }

    fn instances(ids: &[&str]) -> Vec<TaskInstance> {
        ids.iter().map(|id| TaskInstance::new(*id)).collect()
    }

    fn agent() -> Arc<RunnableAgentConfig> {
        Arc::new(BundleAssembler::default().assemble(&[]))
    }

    #[tokio::test]
    async fn failures_are_isolated_and_order_is_preserved() {
        let runner = ExperimentRunner::new(4, Duration::from_millis(200), Some(5.0));
        let batch = instances(&["a-ok", "hang-1", "panic-1", "pricey-1", "b-fail"]);

        let result = runner
            .run(
                Arc::new(ScriptedExecutor::new()),
                agent(),
                &batch,
                3,
                &CancellationToken::new(),
            )
            .await;

        let ids: Vec<_> = result.records.iter().map(|r| r.instance_id.as_str()).collect();
        assert_eq!(ids, vec!["a-ok", "hang-1", "panic-1", "pricey-1", "b-fail"]);
        assert_eq!(result.iteration, 3);

        assert!(result.records[0].resolved);
        assert_eq!(result.records[1].error, Some(ErrorState::Timeout));
        assert_eq!(result.records[2].error, Some(ErrorState::Crash));

        let pricey = &result.records[3];
        assert_eq!(pricey.error, Some(ErrorState::CostExceeded));
        assert!(!pricey.resolved);
        assert!(pricey.trajectory.is_some(), "trajectory kept for credit");

        assert!(!result.records[4].resolved);
        assert!(result.records[4].error.is_none());
        assert_eq!(result.resolved_count(), 1);
    }

    #[tokio::test]
    async fn worker_limit_bounds_parallelism() {
        let runner = ExperimentRunner::new(2, Duration::from_secs(5), None);
        let exec = Arc::new(ScriptedExecutor::new());
        let batch = instances(&["1", "2", "3", "4", "5", "6"]);

        runner
            .run(exec.clone(), agent(), &batch, 1, &CancellationToken::new())
            .await;

        assert!(exec.max_in_flight.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn cancellation_marks_in_flight_instances_crashed() {
        let runner = ExperimentRunner::new(2, Duration::from_secs(30), None);
        let cancel = CancellationToken::new();
        let batch = instances(&["hang-1", "hang-2"]);

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result = runner
            .run(Arc::new(ScriptedExecutor::new()), agent(), &batch, 1, &cancel)
            .await;

        assert_eq!(result.error_count(), 2);
        for rec in &result.records {
            assert_eq!(rec.error, Some(ErrorState::Crash));
            assert!(rec.error_message.as_deref().unwrap().contains("cancelled"));
        }
    }
}
