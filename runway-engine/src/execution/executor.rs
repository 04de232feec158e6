// Instance Executor
// Runs one job instance's setup and script commands in an isolated
// workspace, streaming output and recording exit status

use crate::artifacts::ArtifactStore;
use crate::execution::context::ExecutionContext;
use crate::execution::events::{EventSender, ExecutionEvent, InstanceOutcome, ProgressSender};
use crate::execution::graph::JobInstance;
use crate::execution::report::{FailureKind, InstanceResult, InstanceState, StepLog};

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tokio::time::Instant as TokioInstant;
use tracing::{debug, warn};

/// How a single command finished.
enum CommandOutcome {
    Exited(Option<i32>),
    TimedOut,
    Canceled,
    SpawnFailed(String),
}

/// Executes one job instance at a time. Holds the run-shared context and
/// artifact store; the scheduler provisions the per-instance workspace.
pub struct InstanceExecutor {
    context: Arc<ExecutionContext>,
    store: Arc<ArtifactStore>,
    event_tx: Option<ProgressSender>,
}

impl InstanceExecutor {
    pub fn new(
        context: Arc<ExecutionContext>,
        store: Arc<ArtifactStore>,
        event_tx: Option<ProgressSender>,
    ) -> Self {
        Self {
            context,
            store,
            event_tx,
        }
    }

    /// Execute the instance's setup then script commands in declared order.
    ///
    /// Any non-zero exit halts the remaining commands and fails the
    /// instance (FailedTolerated when the template allows failure).
    /// Exceeding `timeout` kills the child and is recorded as a Timeout
    /// failure. Raising the cancel flag kills the child and records a
    /// Canceled failure.
    pub async fn execute(
        &self,
        instance: &JobInstance,
        pipeline_variables: &HashMap<String, String>,
        workspace: &Path,
        timeout: Duration,
        cancel: watch::Receiver<bool>,
    ) -> InstanceResult {
        let start = Instant::now();
        let stage = instance.template.stage.clone();
        let mut result = InstanceResult::pending(&instance.id, &stage);
        result.state = InstanceState::Running;

        debug!(instance = %instance.id, workspace = %workspace.display(), "instance starting");

        // Prior stages' artifacts are visible before any command runs.
        if let Err(e) = self.store.materialize_into(workspace) {
            result.state = InstanceState::Failed;
            result.failure = Some(FailureKind::Internal(format!(
                "failed to materialize artifacts: {}",
                e
            )));
            result.duration = start.elapsed();
            return result;
        }

        let env = self.command_env(instance, pipeline_variables);
        let deadline = TokioInstant::now() + timeout;

        let commands: Vec<&String> = instance
            .template
            .setup
            .iter()
            .chain(instance.template.script.iter())
            .collect();

        let mut failure: Option<FailureKind> = None;

        for (index, command) in commands.iter().enumerate() {
            // The abort flag may rise between commands; never spawn another.
            if *cancel.borrow() {
                failure = Some(FailureKind::Canceled);
                break;
            }

            self.event_tx.send_event(ExecutionEvent::CommandStarted {
                instance_id: instance.id.clone(),
                command: (*command).clone(),
                step_index: index,
            });

            let step_start = Instant::now();
            let (outcome, lines) = self
                .run_command(command, index, &instance.id, workspace, &env, deadline, cancel.clone())
                .await;

            let (exit_code, step_failure) = match outcome {
                CommandOutcome::Exited(code) => {
                    let failed = code != Some(0);
                    (
                        code,
                        failed.then_some(FailureKind::CommandFailure { exit_code: code }),
                    )
                }
                CommandOutcome::TimedOut => (None, Some(FailureKind::Timeout)),
                CommandOutcome::Canceled => (None, Some(FailureKind::Canceled)),
                CommandOutcome::SpawnFailed(msg) => (None, Some(FailureKind::Internal(msg))),
            };

            let step_duration = step_start.elapsed();
            self.event_tx.send_event(ExecutionEvent::CommandCompleted {
                instance_id: instance.id.clone(),
                step_index: index,
                exit_code,
                duration: step_duration,
            });

            result.steps.push(StepLog {
                command: (*command).clone(),
                lines,
                exit_code,
                duration: step_duration,
            });

            if let Some(kind) = step_failure {
                failure = Some(kind);
                break;
            }
        }

        match failure {
            Some(kind) => {
                warn!(instance = %instance.id, failure = ?kind, "instance failed");
                result.failure = Some(kind);
                result.state = if instance.template.allow_failure {
                    InstanceState::FailedTolerated
                } else {
                    InstanceState::Failed
                };
            }
            None => {
                result.state = InstanceState::Succeeded;
                self.capture_artifacts(instance, workspace);
            }
        }

        result.duration = start.elapsed();

        let outcome = match result.state {
            InstanceState::Succeeded => InstanceOutcome::Succeeded,
            InstanceState::FailedTolerated => InstanceOutcome::FailedTolerated,
            _ => InstanceOutcome::Failed,
        };
        self.event_tx.send_event(ExecutionEvent::instance_completed(
            &stage,
            &instance.id,
            outcome,
            result.duration,
        ));

        result
    }

    /// Environment for every command of an instance: run variables, then
    /// pipeline variables, then matrix bindings, then the engine's own
    /// RUNWAY_* exports.
    fn command_env(
        &self,
        instance: &JobInstance,
        pipeline_variables: &HashMap<String, String>,
    ) -> HashMap<String, String> {
        let mut env = self.context.variables.clone();
        env.extend(pipeline_variables.clone());
        for (axis, value) in &instance.binding {
            env.insert(axis.clone(), value.clone());
        }
        env.insert(
            "RUNWAY_ENVIRONMENT".to_string(),
            instance.template.environment.clone(),
        );
        env.insert("RUNWAY_JOB".to_string(), instance.id.clone());
        env.insert("RUNWAY_STAGE".to_string(), instance.template.stage.clone());
        env.insert("RUNWAY_REF".to_string(), self.context.git_ref.clone());
        env
    }

    async fn run_command(
        &self,
        command: &str,
        step_index: usize,
        instance_id: &str,
        workspace: &Path,
        env: &HashMap<String, String>,
        deadline: TokioInstant,
        mut cancel: watch::Receiver<bool>,
    ) -> (CommandOutcome, Vec<String>) {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(workspace)
            .envs(env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return (
                    CommandOutcome::SpawnFailed(format!("failed to spawn '{}': {}", command, e)),
                    Vec::new(),
                );
            }
        };

        let stdout = child.stdout.take().expect("stdout piped");
        let stderr = child.stderr.take().expect("stderr piped");

        let stdout_task = Self::stream_lines(
            BufReader::new(stdout),
            self.event_tx.clone(),
            instance_id.to_string(),
            step_index,
            false,
        );
        let stderr_task = Self::stream_lines(
            BufReader::new(stderr),
            self.event_tx.clone(),
            instance_id.to_string(),
            step_index,
            true,
        );

        let outcome = tokio::select! {
            status = child.wait() => match status {
                Ok(s) => CommandOutcome::Exited(s.code()),
                Err(e) => CommandOutcome::SpawnFailed(format!("wait failed: {}", e)),
            },
            _ = tokio::time::sleep_until(deadline) => {
                let _ = child.kill().await;
                CommandOutcome::TimedOut
            }
            _ = wait_for_cancel(&mut cancel) => {
                let _ = child.kill().await;
                CommandOutcome::Canceled
            }
        };

        let mut lines = stdout_task.await.unwrap_or_default();
        lines.extend(stderr_task.await.unwrap_or_default());

        (outcome, lines)
    }

    fn stream_lines<R>(
        reader: BufReader<R>,
        event_tx: Option<ProgressSender>,
        instance_id: String,
        step_index: usize,
        is_error: bool,
    ) -> tokio::task::JoinHandle<Vec<String>>
    where
        R: tokio::io::AsyncRead + Unpin + Send + 'static,
    {
        tokio::spawn(async move {
            let mut lines = Vec::new();
            let mut line_reader = reader.lines();
            while let Ok(Some(line)) = line_reader.next_line().await {
                event_tx.send_event(ExecutionEvent::CommandOutput {
                    instance_id: instance_id.clone(),
                    step_index,
                    line: line.clone(),
                    is_error,
                });
                lines.push(line);
            }
            lines
        })
    }

    /// Capture each declared artifact path into the store. A missing path
    /// is a warning, not a failure.
    fn capture_artifacts(&self, instance: &JobInstance, workspace: &Path) {
        for decl in &instance.template.artifacts {
            match self.store.capture(&instance.id, workspace, decl) {
                Ok(Some(record)) => {
                    self.event_tx.send_event(ExecutionEvent::ArtifactStored {
                        instance_id: instance.id.clone(),
                        kind: decl.kind,
                        path: decl.path.clone(),
                        bytes: record.total_bytes(),
                    });
                }
                Ok(None) => {
                    warn!(instance = %instance.id, path = %decl.path, "declared artifact missing");
                    self.event_tx.send_event(ExecutionEvent::ArtifactMissing {
                        instance_id: instance.id.clone(),
                        kind: decl.kind,
                        path: decl.path.clone(),
                    });
                }
                Err(e) => {
                    self.event_tx.send_event(ExecutionEvent::warning(format!(
                        "failed to capture artifact '{}' of {}: {}",
                        decl.path, instance.id, e
                    )));
                }
            }
        }
    }
}

/// Resolve when the cancel flag turns true; never resolves if the sender
/// goes away without raising it.
async fn wait_for_cancel(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|c| *c).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{ArtifactDecl, ArtifactKind, JobTemplate, SpecParser, TriggerKind};

    fn template(yaml: &str) -> JobTemplate {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn instance(t: JobTemplate) -> JobInstance {
        JobInstance {
            id: t.name.clone(),
            template: t,
            binding: Vec::new(),
        }
    }

    fn executor() -> InstanceExecutor {
        InstanceExecutor::new(
            Arc::new(ExecutionContext::new("master", TriggerKind::Push)),
            Arc::new(ArtifactStore::new()),
            None,
        )
    }

    fn cancel_pair() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    #[tokio::test]
    async fn test_setup_files_visible_to_script() {
        let job = instance(template(
            r#"
name: build
stage: test
setup: ["echo ready > marker.txt"]
script: ["grep -q ready marker.txt"]
"#,
        ));
        let workspace = tempfile::tempdir().unwrap();
        let (_tx, rx) = cancel_pair();

        let result = executor()
            .execute(&job, &HashMap::new(), workspace.path(), Duration::from_secs(30), rx)
            .await;

        assert_eq!(result.state, InstanceState::Succeeded);
        assert_eq!(result.steps.len(), 2);
        assert_eq!(result.steps[0].exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_nonzero_exit_halts_remaining_commands() {
        let job = instance(template(
            r#"
name: failing
stage: test
script: ["exit 7", "echo never > never.txt"]
"#,
        ));
        let workspace = tempfile::tempdir().unwrap();
        let (_tx, rx) = cancel_pair();

        let result = executor()
            .execute(&job, &HashMap::new(), workspace.path(), Duration::from_secs(30), rx)
            .await;

        assert_eq!(result.state, InstanceState::Failed);
        assert_eq!(result.steps.len(), 1);
        assert_eq!(
            result.failure,
            Some(FailureKind::CommandFailure { exit_code: Some(7) })
        );
        assert!(!workspace.path().join("never.txt").exists());
    }

    #[tokio::test]
    async fn test_allow_failure_marks_tolerated() {
        let job = instance(template(
            r#"
name: flaky
stage: style
allow_failure: true
script: ["false"]
"#,
        ));
        let workspace = tempfile::tempdir().unwrap();
        let (_tx, rx) = cancel_pair();

        let result = executor()
            .execute(&job, &HashMap::new(), workspace.path(), Duration::from_secs(30), rx)
            .await;

        assert_eq!(result.state, InstanceState::FailedTolerated);
    }

    #[tokio::test]
    async fn test_timeout_kills_and_annotates() {
        let job = instance(template(
            r#"
name: slow
stage: test
script: ["sleep 30"]
"#,
        ));
        let workspace = tempfile::tempdir().unwrap();
        let (_tx, rx) = cancel_pair();

        let result = executor()
            .execute(&job, &HashMap::new(), workspace.path(), Duration::from_millis(200), rx)
            .await;

        assert_eq!(result.state, InstanceState::Failed);
        assert_eq!(result.failure, Some(FailureKind::Timeout));
    }

    #[tokio::test]
    async fn test_cancel_kills_running_command() {
        let job = instance(template(
            r#"
name: canceled
stage: test
script: ["sleep 30"]
"#,
        ));
        let workspace = tempfile::tempdir().unwrap();
        let (tx, rx) = cancel_pair();

        let exec = executor();
        let cancel_task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = tx.send(true);
            tx
        });

        let result = exec
            .execute(&job, &HashMap::new(), workspace.path(), Duration::from_secs(30), rx)
            .await;
        let _tx = cancel_task.await.unwrap();

        assert_eq!(result.state, InstanceState::Failed);
        assert_eq!(result.failure, Some(FailureKind::Canceled));
    }

    #[tokio::test]
    async fn test_raised_cancel_flag_spawns_nothing() {
        let job = instance(template(
            r#"
name: stopped
stage: test
script: ["echo started > started.txt"]
"#,
        ));
        let workspace = tempfile::tempdir().unwrap();
        let (tx, rx) = cancel_pair();
        tx.send(true).unwrap();

        let result = executor()
            .execute(&job, &HashMap::new(), workspace.path(), Duration::from_secs(30), rx)
            .await;

        assert_eq!(result.state, InstanceState::Failed);
        assert_eq!(result.failure, Some(FailureKind::Canceled));
        assert!(result.steps.is_empty());
        assert!(!workspace.path().join("started.txt").exists());
    }

    #[tokio::test]
    async fn test_artifact_capture_after_success() {
        let job = {
            let mut t = template(
                r#"
name: unit
stage: test
script: ["echo 'total: 92' > coverage.xml"]
"#,
            );
            t.artifacts = vec![ArtifactDecl {
                path: "coverage.xml".to_string(),
                kind: ArtifactKind::Report,
            }];
            instance(t)
        };
        let workspace = tempfile::tempdir().unwrap();
        let store = Arc::new(ArtifactStore::new());
        let exec = InstanceExecutor::new(
            Arc::new(ExecutionContext::new("master", TriggerKind::Push)),
            Arc::clone(&store),
            None,
        );
        let (_tx, rx) = cancel_pair();

        let result = exec
            .execute(&job, &HashMap::new(), workspace.path(), Duration::from_secs(30), rx)
            .await;

        assert_eq!(result.state, InstanceState::Succeeded);
        let record = store.get("unit", ArtifactKind::Report).unwrap();
        assert_eq!(record.files[0].rel_path, "coverage.xml");
    }

    #[tokio::test]
    async fn test_matrix_binding_exported_to_env() {
        let t = template(
            r#"
name: unit
stage: test
script: ["test \"$PYTHON_VERSION\" = 3.10"]
"#,
        );
        let job = JobInstance {
            id: "unit [PYTHON_VERSION=3.10]".to_string(),
            template: t,
            binding: vec![("PYTHON_VERSION".to_string(), "3.10".to_string())],
        };
        let workspace = tempfile::tempdir().unwrap();
        let (_tx, rx) = cancel_pair();

        let result = executor()
            .execute(&job, &HashMap::new(), workspace.path(), Duration::from_secs(30), rx)
            .await;
        assert_eq!(result.state, InstanceState::Succeeded);
    }

    #[tokio::test]
    async fn test_prior_artifacts_materialized() {
        let store = Arc::new(ArtifactStore::new());
        store.put(
            "earlier",
            ArtifactKind::Report,
            vec![crate::artifacts::ArtifactFile {
                rel_path: "coverage.xml".to_string(),
                content: b"total: 92".to_vec(),
            }],
        );

        let job = instance(template(
            r#"
name: consumer
stage: docs
script: ["grep -q total coverage.xml"]
"#,
        ));
        let workspace = tempfile::tempdir().unwrap();
        let exec = InstanceExecutor::new(
            Arc::new(ExecutionContext::new("master", TriggerKind::Push)),
            store,
            None,
        );
        let (_tx, rx) = cancel_pair();

        let result = exec
            .execute(&job, &HashMap::new(), workspace.path(), Duration::from_secs(30), rx)
            .await;
        assert_eq!(result.state, InstanceState::Succeeded);
    }

    #[test]
    fn test_parse_helper_round_trip() {
        // Guard: templates used above stay parseable by the real parser.
        let spec = SpecParser::parse_str(
            r#"
stages: [test]
jobs:
  - name: unit
    stage: test
    script: ["true"]
"#,
        )
        .unwrap();
        assert_eq!(spec.jobs.len(), 1);
    }
}
