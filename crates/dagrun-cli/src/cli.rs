//! CLI command definitions using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// dagrun - execute agent pipelines from a manifest
#[derive(Parser)]
#[command(name = "dagrun")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute the pipeline described by a manifest
    Run {
        /// Manifest file path
        manifest: PathBuf,

        /// Payload handed to every pipeline step
        #[arg(long, default_value = r#"{"message":"hello"}"#)]
        payload: String,

        /// Write the execution trace to this file
        #[arg(long, env = "TRACE_OUTPUT")]
        trace_out: Option<PathBuf>,
    },

    /// Parse and validate a manifest without executing it
    Validate {
        /// Manifest file path
        manifest: PathBuf,
    },

    /// Replay a recorded trace against the manifest's agents
    Replay {
        /// Trace file path
        trace: PathBuf,

        /// Manifest file path
        manifest: PathBuf,
    },
}
