// Declaration error types
// A SpecError is fatal: it aborts the run before any execution side effects.

use thiserror::Error;

/// Malformed or inconsistent pipeline declaration.
#[derive(Debug, Clone, Error)]
pub enum SpecError {
    #[error("failed to parse declaration: {0}")]
    Parse(String),

    #[error("failed to read declaration file '{path}': {message}")]
    Io { path: String, message: String },

    #[error("declaration has no stages")]
    NoStages,

    #[error("duplicate stage '{0}' in stage list")]
    DuplicateStage(String),

    #[error("job '{job}' references unknown stage '{stage}'")]
    DanglingStage { job: String, stage: String },

    #[error("job '{job}' declares empty matrix axis '{axis}'")]
    EmptyAxis { job: String, axis: String },

    #[error("instance identity collision: '{0}' produced more than once")]
    InstanceCollision(String),
}

/// Result type for declaration handling.
pub type SpecResult<T> = Result<T, SpecError>;
