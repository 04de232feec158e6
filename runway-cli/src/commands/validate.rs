use crate::commands::run::EXIT_SPEC_ERROR;
use crate::output;

use std::path::PathBuf;

use clap::Args;
use color_eyre::Result;

use runway_engine::{PipelineGraph, SpecParser};

/// Validate a declaration and show its expanded instances without running
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Path to the pipeline YAML file
    pub pipeline: PathBuf,
}

pub async fn execute(args: ValidateArgs) -> Result<i32> {
    output::status("Validating", &format!("{}", args.pipeline.display()));

    let spec = match SpecParser::parse_file(&args.pipeline) {
        Ok(spec) => spec,
        Err(e) => {
            output::error(&e.to_string());
            return Ok(EXIT_SPEC_ERROR);
        }
    };
    let graph = match PipelineGraph::from_spec(&spec) {
        Ok(graph) => graph,
        Err(e) => {
            output::error(&e.to_string());
            return Ok(EXIT_SPEC_ERROR);
        }
    };

    for stage in &graph.stages {
        output::stage_header(&stage.name, stage.instances.len());
        for instance in &stage.instances {
            println!("    {}", instance.id);
        }
    }

    output::success(&format!(
        "Declaration is valid: {} stages, {} instances",
        graph.stages.len(),
        graph.instance_count()
    ));
    Ok(0)
}
