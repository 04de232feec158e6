// Runway Engine Library
// Core engine for parsing and executing stage-ordered pipeline declarations

pub mod artifacts;
pub mod error;
pub mod execution;
pub mod spec;

// Re-export commonly used types
pub use error::{AbortedPipelineError, EngineError, EngineResult};

// Re-export declaration types
pub use spec::{
    Applicability, ArtifactDecl, ArtifactKind, Condition, JobTemplate, PipelineSpec, PublishDecl,
    SpecError, SpecParser, TriggerKind,
};

// Re-export execution types
pub use execution::{
    progress_channel, ExecutionContext, ExecutionEvent, InstanceOutcome, InstanceResult,
    InstanceState, JobInstance, PipelineGraph, ProgressReceiver, ProgressSender, RunReport,
    RunState, Scheduler, SchedulerConfig, StageNode, Verdict,
};

// Re-export artifact types
pub use artifacts::{ArtifactRecord, ArtifactStore, PublishError, PublishSink, SinkRegistry};
