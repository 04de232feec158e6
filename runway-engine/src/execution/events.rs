// Execution Events
// Progress reporting for pipeline runs; fire-and-forget channel sends

use crate::spec::ArtifactKind;

use std::time::Duration;
use tokio::sync::mpsc;

/// Sender for execution progress events.
pub type ProgressSender = mpsc::UnboundedSender<ExecutionEvent>;

/// Receiver for execution progress events.
pub type ProgressReceiver = mpsc::UnboundedReceiver<ExecutionEvent>;

/// Create a new progress channel.
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Terminal state of one instance as reported over the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceOutcome {
    Succeeded,
    Failed,
    FailedTolerated,
}

/// Events emitted during pipeline execution.
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted {
        pipeline_name: String,
        total_stages: usize,
    },

    RunCompleted {
        pipeline_name: String,
        aborted: bool,
        duration: Duration,
    },

    StageStarted {
        stage_name: String,
        total_instances: usize,
    },

    StageCompleted {
        stage_name: String,
        satisfied: bool,
        duration: Duration,
    },

    /// Stage never started: an earlier stage failed and this one is not
    /// marked continue-on-failure.
    StageNotStarted { stage_name: String, reason: String },

    InstanceStarted {
        stage_name: String,
        instance_id: String,
        environment: String,
    },

    InstanceCompleted {
        stage_name: String,
        instance_id: String,
        outcome: InstanceOutcome,
        duration: Duration,
    },

    /// Condition evaluated to Skip.
    InstanceSkipped {
        stage_name: String,
        instance_id: String,
        reason: String,
    },

    /// Manual instance without approval; stays Pending.
    InstanceHeld {
        stage_name: String,
        instance_id: String,
    },

    CommandStarted {
        instance_id: String,
        command: String,
        step_index: usize,
    },

    CommandOutput {
        instance_id: String,
        step_index: usize,
        line: String,
        is_error: bool,
    },

    CommandCompleted {
        instance_id: String,
        step_index: usize,
        exit_code: Option<i32>,
        duration: Duration,
    },

    ArtifactStored {
        instance_id: String,
        kind: ArtifactKind,
        path: String,
        bytes: usize,
    },

    /// Declared artifact path missing after the instance succeeded.
    ArtifactMissing {
        instance_id: String,
        kind: ArtifactKind,
        path: String,
    },

    PublishStarted {
        instance_id: String,
        kind: ArtifactKind,
        destination: String,
    },

    PublishCompleted {
        instance_id: String,
        kind: ArtifactKind,
        destination: String,
    },

    /// Publication failed; reported only, never retroactive.
    PublishFailed {
        instance_id: String,
        kind: ArtifactKind,
        destination: String,
        message: String,
    },

    Warning { message: String },
}

impl ExecutionEvent {
    pub fn run_started(name: impl Into<String>, total_stages: usize) -> Self {
        Self::RunStarted {
            pipeline_name: name.into(),
            total_stages,
        }
    }

    pub fn run_completed(name: impl Into<String>, aborted: bool, duration: Duration) -> Self {
        Self::RunCompleted {
            pipeline_name: name.into(),
            aborted,
            duration,
        }
    }

    pub fn stage_started(name: impl Into<String>, total_instances: usize) -> Self {
        Self::StageStarted {
            stage_name: name.into(),
            total_instances,
        }
    }

    pub fn stage_completed(name: impl Into<String>, satisfied: bool, duration: Duration) -> Self {
        Self::StageCompleted {
            stage_name: name.into(),
            satisfied,
            duration,
        }
    }

    pub fn instance_started(
        stage: impl Into<String>,
        id: impl Into<String>,
        environment: impl Into<String>,
    ) -> Self {
        Self::InstanceStarted {
            stage_name: stage.into(),
            instance_id: id.into(),
            environment: environment.into(),
        }
    }

    pub fn instance_completed(
        stage: impl Into<String>,
        id: impl Into<String>,
        outcome: InstanceOutcome,
        duration: Duration,
    ) -> Self {
        Self::InstanceCompleted {
            stage_name: stage.into(),
            instance_id: id.into(),
            outcome,
            duration,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::Warning {
            message: message.into(),
        }
    }
}

/// Helper trait for sending events, ignoring closed-channel errors.
pub trait EventSender {
    fn send_event(&self, event: ExecutionEvent);
}

impl EventSender for ProgressSender {
    fn send_event(&self, event: ExecutionEvent) {
        let _ = self.send(event);
    }
}

impl EventSender for Option<ProgressSender> {
    fn send_event(&self, event: ExecutionEvent) {
        if let Some(sender) = self {
            let _ = sender.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_progress_channel() {
        let (tx, mut rx) = progress_channel();

        tx.send_event(ExecutionEvent::run_started("demo", 3));
        tx.send_event(ExecutionEvent::stage_started("style", 1));

        assert!(matches!(
            rx.recv().await.unwrap(),
            ExecutionEvent::RunStarted { .. }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            ExecutionEvent::StageStarted { .. }
        ));
    }

    #[test]
    fn test_optional_sender_is_noop() {
        let sender: Option<ProgressSender> = None;
        sender.send_event(ExecutionEvent::warning("ignored"));
    }
}
