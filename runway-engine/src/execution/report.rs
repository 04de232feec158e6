// Run Report
// Per-instance lifecycle state, step logs, and the aggregated run outcome

use crate::error::AbortedPipelineError;

use std::collections::HashMap;
use std::time::Duration;

/// Lifecycle state of a job instance. Immutable once terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Pending,
    Skipped,
    Running,
    Succeeded,
    Failed,
    /// Failed, but the template's allow-failure flag tolerates it: the
    /// failure never blocks stage satisfaction.
    FailedTolerated,
}

impl InstanceState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Skipped | Self::Succeeded | Self::Failed | Self::FailedTolerated
        )
    }
}

/// Why an instance failed, beyond the exit code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// A setup or script command returned non-zero.
    CommandFailure { exit_code: Option<i32> },
    /// The instance exceeded its execution ceiling.
    Timeout,
    /// The run was aborted while the instance was still running.
    Canceled,
    /// The engine itself could not run the instance (spawn failure etc).
    Internal(String),
}

/// Append-only log of one executed command.
#[derive(Debug, Clone)]
pub struct StepLog {
    pub command: String,
    /// Captured stdout/stderr lines, in arrival order.
    pub lines: Vec<String>,
    pub exit_code: Option<i32>,
    pub duration: Duration,
}

/// Everything recorded about one instance over the run.
#[derive(Debug, Clone)]
pub struct InstanceResult {
    pub id: String,
    pub stage: String,
    pub state: InstanceState,
    pub steps: Vec<StepLog>,
    pub failure: Option<FailureKind>,
    pub duration: Duration,
}

impl InstanceResult {
    pub fn pending(id: impl Into<String>, stage: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            stage: stage.into(),
            state: InstanceState::Pending,
            steps: Vec::new(),
            failure: None,
            duration: Duration::ZERO,
        }
    }
}

/// Final state of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Completed,
    Aborted,
}

/// The full, always-surfaced outcome of a run: final state plus every
/// instance's state and logs, even on partial failure.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub pipeline_name: String,
    pub state: RunState,
    /// Instance results keyed by identity, in stage order.
    pub instances: Vec<InstanceResult>,
    /// Publish failures observed during the run (reported, non-retroactive).
    pub publish_failures: Vec<String>,
    pub duration: Duration,
}

impl RunReport {
    /// Identities of non-tolerated failed instances.
    pub fn failed_ids(&self) -> Vec<String> {
        self.instances
            .iter()
            .filter(|i| i.state == InstanceState::Failed)
            .map(|i| i.id.clone())
            .collect()
    }

    /// Instances still Pending at run end: unapproved manual jobs, and
    /// instances never dispatched because the run aborted first.
    pub fn pending_ids(&self) -> Vec<String> {
        self.instances
            .iter()
            .filter(|i| i.state == InstanceState::Pending)
            .map(|i| i.id.clone())
            .collect()
    }

    pub fn result(&self, id: &str) -> Option<&InstanceResult> {
        self.instances.iter().find(|i| i.id == id)
    }

    /// Instance states keyed by identity.
    pub fn states(&self) -> HashMap<&str, InstanceState> {
        self.instances
            .iter()
            .map(|i| (i.id.as_str(), i.state))
            .collect()
    }

    /// Convert into a Result, erroring when the run aborted.
    pub fn into_result(self) -> Result<RunReport, AbortedPipelineError> {
        match self.state {
            RunState::Completed => Ok(self),
            RunState::Aborted => Err(AbortedPipelineError {
                failed: self.failed_ids(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(InstanceState::Succeeded.is_terminal());
        assert!(InstanceState::FailedTolerated.is_terminal());
        assert!(!InstanceState::Pending.is_terminal());
        assert!(!InstanceState::Running.is_terminal());
    }

    #[test]
    fn test_aborted_report_into_result() {
        let mut failed = InstanceResult::pending("lint", "style");
        failed.state = InstanceState::Failed;
        let report = RunReport {
            pipeline_name: "demo".to_string(),
            state: RunState::Aborted,
            instances: vec![failed],
            publish_failures: Vec::new(),
            duration: Duration::ZERO,
        };

        let err = report.into_result().unwrap_err();
        assert_eq!(err.failed, vec!["lint"]);
    }
}
