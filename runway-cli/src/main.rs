mod commands;
mod output;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "runway", version, about = "Run stage-ordered pipeline declarations locally")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a pipeline declaration
    Run(commands::run::RunArgs),
    /// Validate a declaration without running it
    Validate(commands::validate::ValidateArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let exit_code = match cli.command {
        Commands::Run(args) => commands::run::execute(args).await?,
        Commands::Validate(args) => commands::validate::execute(args).await?,
    };

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}
