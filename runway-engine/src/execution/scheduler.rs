// Scheduler
// Walks the graph stage by stage, dispatching instances to executors under
// a parallelism limit and aggregating stage satisfaction

use crate::artifacts::{ArtifactStore, SinkRegistry};
use crate::error::EngineResult;
use crate::execution::condition::{evaluate, Verdict};
use crate::execution::context::ExecutionContext;
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::executor::InstanceExecutor;
use crate::execution::graph::{JobInstance, PipelineGraph, StageNode};
use crate::execution::report::{FailureKind, InstanceResult, InstanceState, RunReport, RunState};

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Run-level scheduling configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum concurrently running instances within a stage (0 = unlimited).
    pub max_parallel: usize,
    /// Default execution ceiling per instance; templates may override.
    pub instance_timeout: Duration,
    /// Stages that still execute after a prior non-tolerated failure.
    pub continue_on_failure: HashSet<String>,
    /// Root directory for instance workspaces; a run-scoped temporary
    /// directory when unset.
    pub workspace_root: Option<PathBuf>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_parallel: 0,
            instance_timeout: Duration::from_secs(3600),
            continue_on_failure: HashSet::new(),
            workspace_root: None,
        }
    }
}

/// Per-run state machine: NotStarted -> stage N running, in declared order
/// -> Completed | Aborted.
pub struct Scheduler {
    graph: PipelineGraph,
    config: SchedulerConfig,
    event_tx: Option<ProgressSender>,
    store: Arc<ArtifactStore>,
    sinks: SinkRegistry,
}

impl Scheduler {
    pub fn new(graph: PipelineGraph) -> Self {
        Self {
            graph,
            config: SchedulerConfig::default(),
            event_tx: None,
            store: Arc::new(ArtifactStore::new()),
            sinks: SinkRegistry::new(),
        }
    }

    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn with_sinks(mut self, sinks: SinkRegistry) -> Self {
        self.sinks = sinks;
        self
    }

    /// The run's artifact store, shared with executors.
    pub fn store(&self) -> Arc<ArtifactStore> {
        Arc::clone(&self.store)
    }

    /// Execute the whole pipeline. The returned report always carries every
    /// instance's state and logs, even when the run aborts. Errs only when
    /// the workspace root cannot be provisioned, before anything executes.
    pub async fn run(&self, context: ExecutionContext) -> EngineResult<RunReport> {
        let start = Instant::now();
        let context = Arc::new(context);
        let pipeline_name = self
            .graph
            .pipeline_name
            .clone()
            .unwrap_or_else(|| "pipeline".to_string());

        // Run-scoped workspace root; the TempDir guard keeps it alive until
        // the run ends. Instances never share a directory with another run.
        let (_root_guard, root) = match &self.config.workspace_root {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                (None, dir.clone())
            }
            None => {
                let guard = tempfile::tempdir()?;
                let path = guard.path().to_path_buf();
                (Some(guard), path)
            }
        };

        self.event_tx.send_event(ExecutionEvent::run_started(
            &pipeline_name,
            self.graph.stages.len(),
        ));

        let mut results: HashMap<String, InstanceResult> = self
            .graph
            .instances()
            .map(|i| (i.id.clone(), InstanceResult::pending(&i.id, &i.template.stage)))
            .collect();
        let mut publish_failures = Vec::new();
        let mut aborted = false;

        for stage in &self.graph.stages {
            if aborted && !self.config.continue_on_failure.contains(&stage.name) {
                self.event_tx.send_event(ExecutionEvent::StageNotStarted {
                    stage_name: stage.name.clone(),
                    reason: "prior stage failed".to_string(),
                });
                continue;
            }

            let satisfied = self
                .run_stage(stage, &context, &root, &mut results, &mut publish_failures)
                .await;

            if !satisfied {
                aborted = true;
            }
        }

        let duration = start.elapsed();
        let state = if aborted {
            RunState::Aborted
        } else {
            RunState::Completed
        };

        info!(pipeline = %pipeline_name, ?state, "run finished");
        self.event_tx.send_event(ExecutionEvent::run_completed(
            &pipeline_name,
            aborted,
            duration,
        ));

        // Report instances in stage order.
        let instances = self
            .graph
            .instances()
            .map(|i| results.remove(&i.id).expect("result recorded for instance"))
            .collect();

        Ok(RunReport {
            pipeline_name,
            state,
            instances,
            publish_failures,
            duration,
        })
    }

    /// Run one stage to satisfaction. Returns false when a non-tolerated
    /// instance failed.
    async fn run_stage(
        &self,
        stage: &StageNode,
        context: &Arc<ExecutionContext>,
        root: &PathBuf,
        results: &mut HashMap<String, InstanceResult>,
        publish_failures: &mut Vec<String>,
    ) -> bool {
        let stage_start = Instant::now();
        self.event_tx.send_event(ExecutionEvent::stage_started(
            &stage.name,
            stage.instances.len(),
        ));
        debug!(stage = %stage.name, instances = stage.instances.len(), "stage starting");

        // Decide each instance's fate before dispatching any of them.
        let mut runnable: Vec<&JobInstance> = Vec::new();
        for instance in &stage.instances {
            match evaluate(&instance.template.name, &instance.template.condition, context) {
                Verdict::Run => runnable.push(instance),
                Verdict::Skip => {
                    if let Some(result) = results.get_mut(&instance.id) {
                        result.state = InstanceState::Skipped;
                    }
                    self.event_tx.send_event(ExecutionEvent::InstanceSkipped {
                        stage_name: stage.name.clone(),
                        instance_id: instance.id.clone(),
                        reason: "condition did not match".to_string(),
                    });
                }
                Verdict::Hold => {
                    // Stays Pending; never gates stage satisfaction.
                    self.event_tx.send_event(ExecutionEvent::InstanceHeld {
                        stage_name: stage.name.clone(),
                        instance_id: instance.id.clone(),
                    });
                }
            }
        }

        let permits = if self.config.max_parallel == 0 {
            Semaphore::MAX_PERMITS
        } else {
            self.config.max_parallel
        };
        let semaphore = Arc::new(Semaphore::new(permits));
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let cancel_tx = Arc::new(cancel_tx);

        let mut tasks: JoinSet<InstanceResult> = JoinSet::new();
        let mut task_ids: HashMap<tokio::task::Id, String> = HashMap::new();
        for (index, instance) in runnable.iter().enumerate() {
            let instance = (*instance).clone();
            let instance_id = instance.id.clone();
            let stage_name = stage.name.clone();
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel_rx.clone();
            let cancel_tx = Arc::clone(&cancel_tx);
            let event_tx = self.event_tx.clone();
            let executor = InstanceExecutor::new(
                Arc::clone(context),
                Arc::clone(&self.store),
                self.event_tx.clone(),
            );
            let variables = self.graph.variables.clone();
            let timeout = instance
                .template
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(self.config.instance_timeout);
            let workspace = root.join(format!("{}-{}", index, sanitize(&instance.id)));

            if let Some(result) = results.get_mut(&instance.id) {
                result.state = InstanceState::Running;
            }

            let handle = tasks.spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore never closed");

                // A sibling failed while this instance was queued on the
                // semaphore: it never starts and stays Pending.
                if *cancel.borrow() {
                    return InstanceResult::pending(&instance.id, &instance.template.stage);
                }

                if let Err(e) = std::fs::create_dir_all(&workspace) {
                    let mut failed =
                        InstanceResult::pending(&instance.id, &instance.template.stage);
                    failed.state = InstanceState::Failed;
                    failed.failure = Some(FailureKind::Internal(format!(
                        "failed to create workspace '{}': {}",
                        workspace.display(),
                        e
                    )));
                    let _ = cancel_tx.send(true);
                    return failed;
                }
                event_tx.send_event(ExecutionEvent::instance_started(
                    &stage_name,
                    &instance.id,
                    &instance.template.environment,
                ));
                let result = executor
                    .execute(&instance, &variables, &workspace, timeout, cancel)
                    .await;
                if result.state == InstanceState::Failed {
                    // Raised before the permit drops, so queued siblings see
                    // the flag before they can start.
                    let _ = cancel_tx.send(true);
                }
                result
            });
            task_ids.insert(handle.id(), instance_id);
        }

        let mut stage_failed = false;
        while let Some(joined) = tasks.join_next_with_id().await {
            let result = match joined {
                Ok((_, result)) => result,
                Err(e) => {
                    let id = task_ids.get(&e.id()).cloned().unwrap_or_default();
                    warn!(stage = %stage.name, instance = %id, "instance task panicked: {}", e);
                    let _ = cancel_tx.send(true);
                    let mut failed = InstanceResult::pending(&id, &stage.name);
                    failed.state = InstanceState::Failed;
                    failed.failure =
                        Some(FailureKind::Internal(format!("task panicked: {}", e)));
                    failed
                }
            };

            if result.state == InstanceState::Failed {
                stage_failed = true;
            }
            results.insert(result.id.clone(), result);
        }

        // Publication for succeeded instances; failures are reported but
        // never change recorded state.
        for instance in &stage.instances {
            let succeeded = results
                .get(&instance.id)
                .map(|r| r.state == InstanceState::Succeeded)
                .unwrap_or(false);
            if !succeeded {
                continue;
            }
            for decl in &instance.template.publish {
                self.event_tx.send_event(ExecutionEvent::PublishStarted {
                    instance_id: instance.id.clone(),
                    kind: decl.kind,
                    destination: decl.destination.clone(),
                });
                match self
                    .sinks
                    .publish(&self.store, decl.kind, &decl.destination, &context.variables)
                    .await
                {
                    Ok(()) => {
                        self.event_tx.send_event(ExecutionEvent::PublishCompleted {
                            instance_id: instance.id.clone(),
                            kind: decl.kind,
                            destination: decl.destination.clone(),
                        });
                    }
                    Err(e) => {
                        warn!(instance = %instance.id, "publish failed: {}", e);
                        publish_failures.push(format!("{}: {}", instance.id, e));
                        self.event_tx.send_event(ExecutionEvent::PublishFailed {
                            instance_id: instance.id.clone(),
                            kind: decl.kind,
                            destination: decl.destination.clone(),
                            message: e.to_string(),
                        });
                    }
                }
            }
        }

        self.event_tx.send_event(ExecutionEvent::stage_completed(
            &stage.name,
            !stage_failed,
            stage_start.elapsed(),
        ));

        !stage_failed
    }
}

fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}
