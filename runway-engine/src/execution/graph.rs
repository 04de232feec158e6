// Pipeline Graph Builder
// Expands a declaration into stage-ordered, matrix-expanded job instances

use crate::execution::matrix::{expand_axes, instance_name, AxisBinding};
use crate::spec::{JobTemplate, PipelineSpec, SpecError, SpecParser, SpecResult};

use std::collections::{HashMap, HashSet};

/// The executable form of a pipeline: stages in declared order, each holding
/// its expanded job instances.
#[derive(Debug, Clone)]
pub struct PipelineGraph {
    pub pipeline_name: Option<String>,
    /// Pipeline-level variables exported to every instance.
    pub variables: HashMap<String, String>,
    pub stages: Vec<StageNode>,
}

/// One ordered phase of the pipeline.
#[derive(Debug, Clone)]
pub struct StageNode {
    pub name: String,
    pub instances: Vec<JobInstance>,
}

/// One concrete, schedulable unit: a template plus a matrix-axis binding.
#[derive(Debug, Clone)]
pub struct JobInstance {
    /// Deterministic identity: template name plus the binding vector.
    pub id: String,
    pub template: JobTemplate,
    pub binding: AxisBinding,
}

impl PipelineGraph {
    /// Build the graph from a declaration.
    ///
    /// Fails with `SpecError` on dangling stage references, empty matrix
    /// axes, or colliding instance identities. Expansion is deterministic:
    /// the same spec always yields the same instances in the same order.
    pub fn from_spec(spec: &PipelineSpec) -> SpecResult<Self> {
        SpecParser::validate(spec)?;

        let mut seen_ids = HashSet::new();
        let mut stages: Vec<StageNode> = spec
            .stages
            .iter()
            .map(|name| StageNode {
                name: name.clone(),
                instances: Vec::new(),
            })
            .collect();
        let stage_index: HashMap<&str, usize> = spec
            .stages
            .iter()
            .enumerate()
            .map(|(i, s)| (s.as_str(), i))
            .collect();

        for template in &spec.jobs {
            let instances = Self::expand_template(template)?;
            // Stage reference already validated.
            let idx = stage_index[template.stage.as_str()];
            for instance in instances {
                if !seen_ids.insert(instance.id.clone()) {
                    return Err(SpecError::InstanceCollision(instance.id));
                }
                stages[idx].instances.push(instance);
            }
        }

        Ok(Self {
            pipeline_name: spec.name.clone(),
            variables: spec.variables.clone(),
            stages,
        })
    }

    fn expand_template(template: &JobTemplate) -> SpecResult<Vec<JobInstance>> {
        let bindings = expand_axes(&template.matrix);
        Ok(bindings
            .into_iter()
            .map(|binding| JobInstance {
                id: instance_name(&template.name, &binding),
                template: template.clone(),
                binding,
            })
            .collect())
    }

    /// Total number of expanded instances across every stage.
    pub fn instance_count(&self) -> usize {
        self.stages.iter().map(|s| s.instances.len()).sum()
    }

    /// Iterate every instance in stage order.
    pub fn instances(&self) -> impl Iterator<Item = &JobInstance> {
        self.stages.iter().flat_map(|s| s.instances.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::SpecParser;

    fn build(yaml: &str) -> SpecResult<PipelineGraph> {
        let spec = SpecParser::parse_str(yaml)?;
        PipelineGraph::from_spec(&spec)
    }

    #[test]
    fn test_every_instance_stage_is_declared() {
        let graph = build(
            r#"
stages: [style, test, deploy]
jobs:
  - name: lint
    stage: style
    script: [true]
  - name: unit
    stage: test
    script: [true]
"#,
        )
        .unwrap();

        let stage_names: Vec<&str> = graph.stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(stage_names, vec!["style", "test", "deploy"]);
        for stage in &graph.stages {
            for instance in &stage.instances {
                assert_eq!(instance.template.stage, stage.name);
            }
        }
    }

    #[test]
    fn test_matrix_expands_to_product() {
        let graph = build(
            r#"
stages: [test]
jobs:
  - name: unit
    stage: test
    matrix:
      PYTHON_VERSION: ["3.9", "3.10", "3.11"]
    script: [pytest]
"#,
        )
        .unwrap();

        assert_eq!(graph.instance_count(), 3);
        let ids: Vec<&str> = graph.instances().map(|i| i.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "unit [PYTHON_VERSION=3.9]",
                "unit [PYTHON_VERSION=3.10]",
                "unit [PYTHON_VERSION=3.11]",
            ]
        );
    }

    #[test]
    fn test_rebuild_is_identical() {
        let yaml = r#"
stages: [test]
jobs:
  - name: unit
    stage: test
    matrix:
      os: [linux, macos]
      py: ["3.9", "3.10"]
    script: [pytest]
"#;
        let first: Vec<String> = build(yaml).unwrap().instances().map(|i| i.id.clone()).collect();
        let second: Vec<String> = build(yaml).unwrap().instances().map(|i| i.id.clone()).collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 4);
    }

    #[test]
    fn test_identity_collision_rejected() {
        let err = build(
            r#"
stages: [test]
jobs:
  - name: unit
    stage: test
    script: [true]
  - name: unit
    stage: test
    script: [false]
"#,
        )
        .unwrap_err();
        assert!(matches!(err, SpecError::InstanceCollision(_)));
    }

    #[test]
    fn test_dangling_stage_rejected() {
        let err = build(
            r#"
stages: [test]
jobs:
  - name: deploy
    stage: release
    script: [true]
"#,
        )
        .unwrap_err();
        assert!(matches!(err, SpecError::DanglingStage { .. }));
    }
}
