//! CLI command definitions and dispatch.

mod run;

use clap::{Parser, Subcommand};

/// gopack: build and publish Go binaries as minimal OCI images.
#[derive(Parser)]
#[command(name = "gopack", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Build and publish a Go binary as a minimal OCI image
    Run(run::RunArgs),
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Run(args) => run::execute(args).await,
    }
}
