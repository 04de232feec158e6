// Engine error taxonomy
// SpecError aborts before execution; AbortedPipelineError carries the
// failed instance identities of a halted run.

use crate::spec::SpecError;

use thiserror::Error;

/// Run-level failure: a non-tolerated instance failure halted stage
/// progression.
#[derive(Debug, Clone, Error)]
#[error("pipeline aborted; failed instances: {}", failed.join(", "))]
pub struct AbortedPipelineError {
    /// Identities of every non-tolerated failed instance.
    pub failed: Vec<String>,
}

/// Top-level engine error.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Spec(#[from] SpecError),

    #[error(transparent)]
    Aborted(#[from] AbortedPipelineError),

    /// The run's workspace root could not be provisioned. Raised before any
    /// instance starts; execution never falls back to a shared directory.
    #[error("failed to provision workspace root: {0}")]
    Workspace(#[from] std::io::Error),
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
