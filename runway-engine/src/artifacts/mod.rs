// Artifact Module
// Run-lifetime artifact storage and pluggable publication sinks

pub mod sinks;
pub mod store;

pub use sinks::{CommandSink, DirectorySink, PublishError, PublishSink, SinkRegistry};
pub use store::{ArtifactFile, ArtifactRecord, ArtifactStore};
