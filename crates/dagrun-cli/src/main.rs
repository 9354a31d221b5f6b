//! dagrun CLI - run, validate, and replay pipeline manifests.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt().with_env_filter("debug").init();
    } else {
        tracing_subscriber::fmt().with_env_filter("info").init();
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run_command(cli))
}

async fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run {
            manifest,
            payload,
            trace_out,
        } => commands::run(&manifest, &payload, trace_out.as_deref()).await,
        Commands::Validate { manifest } => commands::validate(&manifest),
        Commands::Replay { trace, manifest } => commands::replay(&trace, &manifest).await,
    }
}
