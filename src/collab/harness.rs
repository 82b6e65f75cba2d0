//! Executor that shells out to an external agent-run + grading harness.
//!
//! For each instance the harness command runs under `sh -c` in a fresh
//! per-instance directory containing `agent.json` (the assembled
//! orchestrator) and `instance.json`. Their paths are exported as
//! `ARMORY_AGENT_CONFIG` and `ARMORY_INSTANCE`, the raw id as
//! `ARMORY_INSTANCE_ID`, and the per-instance cost ceiling, when one is
//! configured, as `ARMORY_COST_LIMIT`. The harness must print one JSON
//! [`InstanceRun`] on stdout and exit 0.
//!
//! The child is spawned with `kill_on_drop`, so a timeout or cancellation in
//! the runner reliably terminates it.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::{ExperimentExecutor, RunnableAgentConfig};
use crate::error::ExecutionError;
use crate::experiment::{InstanceRun, TaskInstance};

/// Bytes of stderr kept in a harness failure message.
const STDERR_TAIL: usize = 2000;

pub struct HarnessExecutor {
    command: String,
    work_dir: PathBuf,
    cost_limit: Option<f64>,
}

impl HarnessExecutor {
    /// `work_dir` receives one sub-directory per instance run.
    pub fn new(command: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            work_dir: work_dir.into(),
            cost_limit: None,
        }
    }

    /// Tell the harness the cost ceiling so it can stop the agent early.
    /// The runner still rejects runs that report more.
    pub fn with_cost_limit(mut self, cost_limit: Option<f64>) -> Self {
        self.cost_limit = cost_limit;
        self
    }

    async fn prepare(
        &self,
        agent: &RunnableAgentConfig,
        instance: &TaskInstance,
    ) -> Result<(PathBuf, PathBuf, PathBuf), ExecutionError> {
        let dir = self.work_dir.join(dir_name(&instance.instance_id));
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| ExecutionError::Harness(format!("create {}: {e}", dir.display())))?;

        let agent_path = dir.join("agent.json");
        let instance_path = dir.join("instance.json");
        write_json(&agent_path, agent).await?;
        write_json(&instance_path, instance).await?;
        Ok((dir, agent_path, instance_path))
    }
}

#[async_trait]
impl ExperimentExecutor for HarnessExecutor {
    async fn run_instance(
        &self,
        agent: &RunnableAgentConfig,
        instance: &TaskInstance,
        cancel: CancellationToken,
    ) -> Result<InstanceRun, ExecutionError> {
        let (dir, agent_path, instance_path) = self.prepare(agent, instance).await?;

        let mut command = Command::new("sh");
        if let Some(limit) = self.cost_limit {
            command.env("ARMORY_COST_LIMIT", limit.to_string());
        }
        let mut child = command
            .arg("-c")
            .arg(&self.command)
            .current_dir(&dir)
            .env("ARMORY_AGENT_CONFIG", &agent_path)
            .env("ARMORY_INSTANCE", &instance_path)
            .env("ARMORY_INSTANCE_ID", &instance.instance_id)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecutionError::Crash(format!("failed to spawn harness: {e}")))?;

        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();

        let read_out = async {
            let mut buf = Vec::new();
            if let Some(ref mut s) = stdout {
                let _ = s.read_to_end(&mut buf).await;
            }
            buf
        };
        let read_err = async {
            let mut buf = Vec::new();
            if let Some(ref mut s) = stderr {
                let _ = s.read_to_end(&mut buf).await;
            }
            buf
        };

        let (status, out, err) = tokio::select! {
            res = async { tokio::join!(child.wait(), read_out, read_err) } => res,
            // Dropping the child on return kills it.
            _ = cancel.cancelled() => return Err(ExecutionError::Cancelled),
        };

        let status =
            status.map_err(|e| ExecutionError::Crash(format!("failed to wait on harness: {e}")))?;
        if !status.success() {
            let stderr = String::from_utf8_lossy(&err);
            return Err(ExecutionError::Harness(format!(
                "harness exited with {status}: {}",
                tail(&stderr, STDERR_TAIL)
            )));
        }

        let stdout = String::from_utf8_lossy(&out);
        parse_run(&stdout)
    }
}

/// Parse the harness's stdout. The last non-empty line must be the JSON run,
/// which lets harnesses print progress before it.
fn parse_run(stdout: &str) -> Result<InstanceRun, ExecutionError> {
    let line = stdout
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .ok_or_else(|| ExecutionError::Harness("harness produced no output".to_string()))?;
    serde_json::from_str(line.trim())
        .map_err(|e| ExecutionError::Harness(format!("invalid harness output: {e}")))
}

async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), ExecutionError> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| ExecutionError::Harness(format!("serialize {}: {e}", path.display())))?;
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| ExecutionError::Harness(format!("write {}: {e}", path.display())))
}

/// Escape an instance id into a single path component. `_` is the escape
/// character, so distinct ids always get distinct directories.
fn dir_name(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for byte in id.bytes() {
        match byte {
            b'_' => out.push_str("__"),
            b if b.is_ascii_alphanumeric() || b == b'-' => out.push(char::from(b)),
            b => out.push_str(&format!("_{b:02x}")),
        }
    }
    out
}

fn tail(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{BundleAssembler, OrchestratorAssembler};
    use tempfile::TempDir;

    fn agent() -> RunnableAgentConfig {
        BundleAssembler::default().assemble(&[])
    }

    #[test]
    fn parse_run_uses_last_line() {
        let out = "starting...\n{\"resolved\":true,\"trajectory\":{\"steps\":[]},\"cost\":0.2}\n\n";
        let run = parse_run(out).unwrap();
        assert!(run.resolved);
        assert!((run.cost - 0.2).abs() < 1e-12);
    }

    #[test]
    fn parse_run_rejects_garbage() {
        assert!(matches!(parse_run("nope"), Err(ExecutionError::Harness(_))));
        assert!(matches!(parse_run(""), Err(ExecutionError::Harness(_))));
    }

    #[test]
    fn dir_names_escape_separators() {
        assert_eq!(dir_name("astropy/astropy-12907"), "astropy_2fastropy-12907");
        assert_eq!(dir_name("django__django-11099"), "django____django-11099");
        assert_eq!(dir_name(".."), "_2e_2e");
    }

    #[test]
    fn ids_differing_only_in_separators_get_distinct_dirs() {
        let ids = ["a/b", "a_b", "a:b", "a_2fb", "a.b"];
        let mut names: Vec<_> = ids.iter().map(|id| dir_name(id)).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), ids.len());
    }

    #[tokio::test]
    async fn colliding_ids_do_not_share_a_work_dir() {
        let tmp = TempDir::new().expect("tempdir");
        let cmd = r#"echo '{"resolved":true,"trajectory":{"steps":[]},"cost":0}'"#;
        let exec = HarnessExecutor::new(cmd, tmp.path());

        for id in ["repo/inst", "repo_inst"] {
            exec.run_instance(&agent(), &TaskInstance::new(id), CancellationToken::new())
                .await
                .unwrap();
        }

        for (dir, id) in [("repo_2finst", "repo/inst"), ("repo__inst", "repo_inst")] {
            let written = std::fs::read_to_string(tmp.path().join(dir).join("instance.json")).unwrap();
            let instance: TaskInstance = serde_json::from_str(&written).unwrap();
            assert_eq!(instance.instance_id, id);
        }
    }

    #[tokio::test]
    async fn cost_limit_is_exported_to_the_harness() {
        let tmp = TempDir::new().expect("tempdir");
        let cmd = r#"echo "{\"resolved\":true,\"trajectory\":{\"steps\":[],\"submission\":\"limit=${ARMORY_COST_LIMIT:-unset}\"},\"cost\":0.1}""#;

        let limited = HarnessExecutor::new(cmd, tmp.path()).with_cost_limit(Some(2.5));
        let run = limited
            .run_instance(&agent(), &TaskInstance::new("capped"), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(run.trajectory.submission.as_deref(), Some("limit=2.5"));

        let unlimited = HarnessExecutor::new(cmd, tmp.path());
        let run = unlimited
            .run_instance(&agent(), &TaskInstance::new("open"), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(run.trajectory.submission.as_deref(), Some("limit=unset"));
    }

    #[tokio::test]
    async fn runs_harness_and_reads_result() {
        let tmp = TempDir::new().expect("tempdir");
        let cmd = r#"test -f "$ARMORY_AGENT_CONFIG" && test -f "$ARMORY_INSTANCE" && echo '{"resolved":true,"trajectory":{"steps":[{"tool":"locate","candidate_id":1,"result":"ok"}]},"cost":0.5}'"#;
        let exec = HarnessExecutor::new(cmd, tmp.path());

        let run = exec
            .run_instance(&agent(), &TaskInstance::new("repo/inst-1"), CancellationToken::new())
            .await
            .unwrap();

        assert!(run.resolved);
        assert_eq!(run.trajectory.steps.len(), 1);
        assert!(tmp.path().join("repo_2finst-1").join("agent.json").exists());
    }

    #[tokio::test]
    async fn nonzero_exit_is_harness_error() {
        let tmp = TempDir::new().expect("tempdir");
        let exec = HarnessExecutor::new("echo boom >&2; exit 3", tmp.path());

        let err = exec
            .run_instance(&agent(), &TaskInstance::new("x"), CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            ExecutionError::Harness(msg) => assert!(msg.contains("boom")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancellation_kills_harness() {
        let tmp = TempDir::new().expect("tempdir");
        let exec = HarnessExecutor::new("sleep 60", tmp.path());
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let start = std::time::Instant::now();
        let err = exec
            .run_instance(&agent(), &TaskInstance::new("x"), cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Cancelled));
        assert!(start.elapsed().as_secs() < 5);
    }
}
