// Publish Sinks
// Pluggable destinations for pipeline-level artifact publication

use crate::artifacts::store::{ArtifactRecord, ArtifactStore};
use crate::spec::ArtifactKind;

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

/// Sink-level failure. Reported, never retroactive: a publish failure does
/// not change job/stage success state already recorded.
#[derive(Debug, Clone, Error)]
pub enum PublishError {
    #[error("unknown publish destination scheme in '{0}' (expected dir: or cmd:)")]
    UnknownScheme(String),

    #[error("no artifacts of kind '{0}' to publish")]
    NothingToPublish(ArtifactKind),

    #[error("publish sink failed: {0}")]
    Sink(String),
}

/// A pluggable publication target.
#[async_trait]
pub trait PublishSink: Send + Sync {
    /// Publish records to the destination. Credentials in `env` are passed
    /// through opaquely; the engine never interprets them.
    async fn publish(
        &self,
        records: &[Arc<ArtifactRecord>],
        destination: &str,
        env: &HashMap<String, String>,
    ) -> Result<(), PublishError>;
}

/// Writes every record's files under a destination directory.
pub struct DirectorySink;

#[async_trait]
impl PublishSink for DirectorySink {
    async fn publish(
        &self,
        records: &[Arc<ArtifactRecord>],
        destination: &str,
        _env: &HashMap<String, String>,
    ) -> Result<(), PublishError> {
        let root = PathBuf::from(destination);
        for record in records {
            for file in &record.files {
                let dest = root.join(&file.rel_path);
                if let Some(parent) = dest.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| PublishError::Sink(e.to_string()))?;
                }
                tokio::fs::write(&dest, &file.content)
                    .await
                    .map_err(|e| PublishError::Sink(e.to_string()))?;
            }
        }
        Ok(())
    }
}

/// Shells out to an external uploader. Records are staged into a temporary
/// directory; the command sees it as RUNWAY_PUBLISH_SOURCE, with the run's
/// variables (credentials, tokens) in its environment.
pub struct CommandSink;

#[async_trait]
impl PublishSink for CommandSink {
    async fn publish(
        &self,
        records: &[Arc<ArtifactRecord>],
        destination: &str,
        env: &HashMap<String, String>,
    ) -> Result<(), PublishError> {
        let staging = tempfile::tempdir().map_err(|e| PublishError::Sink(e.to_string()))?;
        for record in records {
            for file in &record.files {
                let dest = staging.path().join(&file.rel_path);
                if let Some(parent) = dest.parent() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| PublishError::Sink(e.to_string()))?;
                }
                std::fs::write(&dest, &file.content)
                    .map_err(|e| PublishError::Sink(e.to_string()))?;
            }
        }

        let output = Command::new("sh")
            .arg("-c")
            .arg(destination)
            .envs(env)
            .env("RUNWAY_PUBLISH_SOURCE", staging.path())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| PublishError::Sink(format!("failed to spawn '{}': {}", destination, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PublishError::Sink(format!(
                "'{}' exited with {:?}: {}",
                destination,
                output.status.code(),
                stderr.trim()
            )));
        }
        Ok(())
    }
}

/// Resolves destinations to sinks by scheme prefix.
pub struct SinkRegistry {
    sinks: HashMap<String, Arc<dyn PublishSink>>,
}

impl SinkRegistry {
    /// Registry with the built-in "dir" and "cmd" sinks.
    pub fn new() -> Self {
        let mut sinks: HashMap<String, Arc<dyn PublishSink>> = HashMap::new();
        sinks.insert("dir".to_string(), Arc::new(DirectorySink));
        sinks.insert("cmd".to_string(), Arc::new(CommandSink));
        Self { sinks }
    }

    /// Register a custom sink under a scheme.
    pub fn register(&mut self, scheme: impl Into<String>, sink: Arc<dyn PublishSink>) {
        self.sinks.insert(scheme.into(), sink);
    }

    fn resolve<'a>(
        &self,
        destination: &'a str,
    ) -> Result<(Arc<dyn PublishSink>, &'a str), PublishError> {
        let (scheme, rest) = destination
            .split_once(':')
            .ok_or_else(|| PublishError::UnknownScheme(destination.to_string()))?;
        let sink = self
            .sinks
            .get(scheme)
            .ok_or_else(|| PublishError::UnknownScheme(destination.to_string()))?;
        Ok((Arc::clone(sink), rest))
    }

    /// Publish every stored record of a kind to a destination.
    pub async fn publish(
        &self,
        store: &ArtifactStore,
        kind: ArtifactKind,
        destination: &str,
        env: &HashMap<String, String>,
    ) -> Result<(), PublishError> {
        let (sink, target) = self.resolve(destination)?;
        let records = store.records_of_kind(kind);
        if records.is_empty() {
            return Err(PublishError::NothingToPublish(kind));
        }
        sink.publish(&records, target, env).await
    }
}

impl Default for SinkRegistry {
    fn default() -> Self {
        Self::new()
    }
}
