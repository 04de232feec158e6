use crate::output;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use color_eyre::Result;

use runway_engine::{
    progress_channel, ExecutionContext, ExecutionEvent, InstanceOutcome, PipelineGraph, RunState,
    Scheduler, SchedulerConfig, SpecParser, TriggerKind,
};

/// Exit code for malformed declarations.
pub const EXIT_SPEC_ERROR: i32 = 2;
/// Exit code for an aborted run.
pub const EXIT_ABORTED: i32 = 1;

/// Run a pipeline declaration
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the pipeline YAML file
    pub pipeline: PathBuf,

    /// Branch or ref the run executes against
    #[arg(long = "ref", value_name = "BRANCH", default_value = "master")]
    pub git_ref: String,

    /// What triggered the run
    #[arg(long, value_name = "KIND", default_value = "push")]
    pub trigger: TriggerKind,

    /// Approve a manual job by name (can be repeated)
    #[arg(long = "approve", value_name = "JOB")]
    pub approvals: Vec<String>,

    /// Set a run variable (can be repeated, format: name=value)
    #[arg(long = "var", short = 'v', value_name = "NAME=VALUE")]
    pub variables: Vec<String>,

    /// Maximum concurrently running instances per stage (0 = unlimited)
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub max_parallel: usize,

    /// Default per-instance execution ceiling, in seconds
    #[arg(long, value_name = "SECS", default_value_t = 3600)]
    pub timeout_secs: u64,

    /// Stage that still runs after a prior failure (can be repeated)
    #[arg(long = "continue-on-failure", value_name = "STAGE")]
    pub continue_on_failure: Vec<String>,

    /// Root directory for instance workspaces
    #[arg(long, short = 'w', value_name = "DIR")]
    pub workspace: Option<PathBuf>,
}

pub async fn execute(args: RunArgs) -> Result<i32> {
    let pipeline_path = &args.pipeline;

    let mut variables = HashMap::new();
    for var_str in &args.variables {
        if let Some((name, value)) = var_str.split_once('=') {
            variables.insert(name.to_string(), value.to_string());
        } else {
            color_eyre::eyre::bail!("Invalid variable format '{}'. Expected name=value", var_str);
        }
    }

    output::status("Parsing", &format!("{}", pipeline_path.display()));
    let spec = match SpecParser::parse_file(pipeline_path) {
        Ok(spec) => spec,
        Err(e) => {
            output::error(&e.to_string());
            return Ok(EXIT_SPEC_ERROR);
        }
    };
    let graph = match PipelineGraph::from_spec(&spec) {
        Ok(graph) => graph,
        Err(e) => {
            output::error(&e.to_string());
            return Ok(EXIT_SPEC_ERROR);
        }
    };

    output::info(&format!(
        "Pipeline '{}': {} stages, {} instances",
        graph.pipeline_name.as_deref().unwrap_or("pipeline"),
        graph.stages.len(),
        graph.instance_count()
    ));

    let context = ExecutionContext::new(args.git_ref.clone(), args.trigger)
        .with_variables(variables)
        .with_approvals(args.approvals.clone());

    let config = SchedulerConfig {
        max_parallel: args.max_parallel,
        instance_timeout: Duration::from_secs(args.timeout_secs),
        continue_on_failure: args.continue_on_failure.iter().cloned().collect::<HashSet<_>>(),
        workspace_root: args.workspace.clone(),
    };

    let (tx, mut rx) = progress_channel();
    let scheduler = Scheduler::new(graph).with_config(config).with_progress(tx);

    let exec_handle = tokio::spawn(async move { scheduler.run(context).await });

    while let Some(event) = rx.recv().await {
        render_event(&event);
    }

    let report = exec_handle.await??;

    println!();
    for id in report.pending_ids() {
        output::warning(&format!("'{}' never ran (still pending at run end)", id));
    }
    for failure in &report.publish_failures {
        output::warning(&format!("publish failed: {}", failure));
    }

    match report.state {
        RunState::Completed => {
            output::success(&format!(
                "Run completed in {:.2}s",
                report.duration.as_secs_f64()
            ));
            Ok(0)
        }
        RunState::Aborted => {
            output::failure(&format!(
                "Run aborted after {:.2}s; failed: {}",
                report.duration.as_secs_f64(),
                report.failed_ids().join(", ")
            ));
            Ok(EXIT_ABORTED)
        }
    }
}

fn render_event(event: &ExecutionEvent) {
    match event {
        ExecutionEvent::RunStarted {
            pipeline_name,
            total_stages,
        } => {
            println!();
            output::header(&format!("Pipeline '{}' ({} stages)", pipeline_name, total_stages));
        }

        ExecutionEvent::RunCompleted { .. } => {}

        ExecutionEvent::StageStarted {
            stage_name,
            total_instances,
        } => {
            output::stage_header(stage_name, *total_instances);
        }

        ExecutionEvent::StageCompleted {
            stage_name,
            satisfied,
            duration,
        } => {
            let line = format!(
                "  Stage '{}' {} ({:.2}s)",
                stage_name,
                if *satisfied { "OK" } else { "FAIL" },
                duration.as_secs_f64()
            );
            if *satisfied {
                output::dim(&line);
            } else {
                output::failure(&line);
            }
        }

        ExecutionEvent::StageNotStarted { stage_name, reason } => {
            output::warning(&format!("  Stage '{}' not started: {}", stage_name, reason));
        }

        ExecutionEvent::InstanceStarted {
            instance_id,
            environment,
            ..
        } => {
            println!("    '{}' (env: {})", instance_id, environment);
        }

        ExecutionEvent::InstanceCompleted {
            instance_id,
            outcome,
            duration,
            ..
        } => {
            let line = format!(
                "    '{}' {} ({:.2}s)",
                instance_id,
                match outcome {
                    InstanceOutcome::Succeeded => "OK",
                    InstanceOutcome::Failed => "FAIL",
                    InstanceOutcome::FailedTolerated => "FAIL (tolerated)",
                },
                duration.as_secs_f64()
            );
            match outcome {
                InstanceOutcome::Failed => output::failure(&line),
                InstanceOutcome::FailedTolerated => output::warning(&line),
                InstanceOutcome::Succeeded => output::dim(&line),
            }
        }

        ExecutionEvent::InstanceSkipped {
            instance_id, reason, ..
        } => {
            output::warning(&format!("    '{}' skipped: {}", instance_id, reason));
        }

        ExecutionEvent::InstanceHeld { instance_id, .. } => {
            output::info(&format!("    '{}' waiting for manual approval", instance_id));
        }

        ExecutionEvent::CommandStarted {
            command, step_index, ..
        } => {
            println!("      [{}] $ {}", step_index + 1, command);
        }

        ExecutionEvent::CommandOutput { line, is_error, .. } => {
            if *is_error {
                output::command_error(line);
            } else {
                output::command_output(line);
            }
        }

        ExecutionEvent::CommandCompleted { exit_code, .. } => {
            if let Some(code) = exit_code {
                if *code != 0 {
                    output::dim(&format!("        exit code: {}", code));
                }
            }
        }

        ExecutionEvent::ArtifactStored {
            instance_id,
            kind,
            path,
            bytes,
        } => {
            output::dim(&format!(
                "        [artifact] {} {} from '{}' ({} bytes)",
                kind, path, instance_id, bytes
            ));
        }

        ExecutionEvent::ArtifactMissing { path, .. } => {
            output::warning(&format!("        declared artifact '{}' not found", path));
        }

        ExecutionEvent::PublishStarted { kind, destination, .. } => {
            output::status("Publishing", &format!("{} -> {}", kind, destination));
        }

        ExecutionEvent::PublishCompleted { destination, .. } => {
            output::dim(&format!("        published to {}", destination));
        }

        ExecutionEvent::PublishFailed {
            destination, message, ..
        } => {
            output::error(&format!("publish to {} failed: {}", destination, message));
        }

        ExecutionEvent::Warning { message } => {
            output::warning(message);
        }
    }
}
