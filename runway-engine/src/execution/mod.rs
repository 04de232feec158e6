// Execution Module
// Graph building, condition evaluation, instance execution and scheduling

pub mod condition;
pub mod context;
pub mod events;
pub mod executor;
pub mod graph;
pub mod matrix;
pub mod report;
pub mod scheduler;

pub use condition::{evaluate, Verdict};
pub use context::ExecutionContext;
pub use events::{progress_channel, ExecutionEvent, InstanceOutcome, ProgressReceiver, ProgressSender};
pub use executor::InstanceExecutor;
pub use graph::{JobInstance, PipelineGraph, StageNode};
pub use matrix::{expand_axes, instance_name, AxisBinding};
pub use report::{FailureKind, InstanceResult, InstanceState, RunReport, RunState, StepLog};
pub use scheduler::{Scheduler, SchedulerConfig};
