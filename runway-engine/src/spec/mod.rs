// Declaration Module
// YAML pipeline declarations: model, parser, validation

pub mod error;
pub mod models;
pub mod parser;

pub use error::{SpecError, SpecResult};
pub use models::{
    Applicability, ArtifactDecl, ArtifactKind, Condition, JobTemplate, PipelineSpec, PublishDecl,
    TriggerKind,
};
pub use parser::SpecParser;
