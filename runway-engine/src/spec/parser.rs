// Declaration Parser
// Loads YAML pipeline declarations into the PipelineSpec model

use crate::spec::error::{SpecError, SpecResult};
use crate::spec::models::PipelineSpec;

use std::collections::HashSet;
use std::path::Path;

/// Parser for YAML pipeline declarations.
pub struct SpecParser;

impl SpecParser {
    /// Parse a declaration from a YAML string and validate its structure.
    pub fn parse_str(source: &str) -> SpecResult<PipelineSpec> {
        let spec: PipelineSpec =
            serde_yaml::from_str(source).map_err(|e| SpecError::Parse(e.to_string()))?;
        Self::validate(&spec)?;
        Ok(spec)
    }

    /// Parse a declaration from a file.
    pub fn parse_file(path: impl AsRef<Path>) -> SpecResult<PipelineSpec> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| SpecError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::parse_str(&source)
    }

    /// Structural checks that must hold before any execution starts.
    pub fn validate(spec: &PipelineSpec) -> SpecResult<()> {
        if spec.stages.is_empty() {
            return Err(SpecError::NoStages);
        }

        let mut seen = HashSet::new();
        for stage in &spec.stages {
            if !seen.insert(stage.as_str()) {
                return Err(SpecError::DuplicateStage(stage.clone()));
            }
        }

        for job in &spec.jobs {
            if !seen.contains(job.stage.as_str()) {
                return Err(SpecError::DanglingStage {
                    job: job.name.clone(),
                    stage: job.stage.clone(),
                });
            }
            for (axis, values) in &job.matrix {
                if values.is_empty() {
                    return Err(SpecError::EmptyAxis {
                        job: job.name.clone(),
                        axis: axis.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}
