// Declaration Model
// Serde types for the YAML pipeline declaration

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// A complete pipeline declaration: ordered stages plus job templates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineSpec {
    #[serde(default)]
    pub name: Option<String>,
    /// Ordered list of stage names. Jobs run stage by stage in this order.
    pub stages: Vec<String>,
    /// Pipeline-level variables exported to every instance's environment.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub variables: HashMap<String, String>,
    pub jobs: Vec<JobTemplate>,
}

/// The declarative description of one kind of work, prior to matrix
/// expansion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobTemplate {
    pub name: String,
    pub stage: String,
    /// Base image / tooling identifier. Opaque to the engine; exported to
    /// commands as RUNWAY_ENVIRONMENT.
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub setup: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub script: Vec<String>,
    /// Matrix axes: axis name -> ordered value sequence. BTreeMap keeps
    /// axis iteration order deterministic across runs.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub matrix: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub condition: Condition,
    #[serde(default)]
    pub allow_failure: bool,
    /// Per-job override of the configured instance timeout, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<ArtifactDecl>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub publish: Vec<PublishDecl>,
}

fn default_environment() -> String {
    "default".to_string()
}

/// Trigger condition gating a job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Condition {
    /// Ref patterns the run's ref must match. Empty matches everything.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub only: Vec<String>,
    /// Ref patterns the run's ref must NOT match.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub except: Vec<String>,
    /// Trigger kinds the job applies to. Empty matches every kind.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub triggers: Vec<TriggerKind>,
    #[serde(default)]
    pub when: Applicability,
}

/// What caused the pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    Push,
    Schedule,
    Manual,
}

impl std::str::FromStr for TriggerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "push" => Ok(Self::Push),
            "schedule" => Ok(Self::Schedule),
            "manual" => Ok(Self::Manual),
            other => Err(format!(
                "unknown trigger '{}', expected push, schedule or manual",
                other
            )),
        }
    }
}

/// Whether a job starts automatically or waits for an approval signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Applicability {
    #[default]
    Automatic,
    Manual,
}

/// A declared output path and its semantic kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactDecl {
    /// Path relative to the instance workspace. May name a file or a
    /// directory; a directory captures every file under it.
    pub path: String,
    pub kind: ArtifactKind,
}

/// Semantic tag for an artifact. The engine never parses artifact content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Report,
    Bundle,
    Distribution,
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Report => write!(f, "report"),
            Self::Bundle => write!(f, "bundle"),
            Self::Distribution => write!(f, "distribution"),
        }
    }
}

/// A pipeline-level publication request attached to a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishDecl {
    pub kind: ArtifactKind,
    /// Sink destination, scheme-prefixed: "dir:<path>" or "cmd:<program>".
    pub destination: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_job_defaults() {
        let yaml = r#"
name: build-job
stage: build
script:
  - make
"#;
        let job: JobTemplate = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(job.environment, "default");
        assert!(!job.allow_failure);
        assert!(job.setup.is_empty());
        assert!(job.matrix.is_empty());
        assert_eq!(job.condition.when, Applicability::Automatic);
    }

    #[test]
    fn test_spec_round_trip() {
        let yaml = r#"
name: demo
stages: [style, test]
variables:
  CACHE_DIR: .cache
jobs:
  - name: lint
    stage: style
    allow_failure: true
    script: [flake8 .]
  - name: unit
    stage: test
    matrix:
      PYTHON_VERSION: ["3.9", "3.10"]
    script: [pytest]
    artifacts:
      - path: coverage.xml
        kind: report
    condition:
      only: [master, "release/*"]
      when: manual
"#;
        let spec: PipelineSpec = serde_yaml::from_str(yaml).unwrap();
        let rendered = serde_yaml::to_string(&spec).unwrap();
        let back: PipelineSpec = serde_yaml::from_str(&rendered).unwrap();

        assert_eq!(back.stages, vec!["style", "test"]);
        assert_eq!(back.jobs.len(), 2);
        assert_eq!(back.jobs[1].matrix["PYTHON_VERSION"].len(), 2);
        assert_eq!(back.jobs[1].condition.when, Applicability::Manual);
        assert_eq!(back.jobs[1].artifacts[0].kind, ArtifactKind::Report);
        assert_eq!(back.variables["CACHE_DIR"], ".cache");
    }
}
