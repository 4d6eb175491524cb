//! CLI command definitions for the `flowgate` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod serve;
pub mod status;
pub mod validate;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Run workflows with approvals, control commands and durable checkpoints.
#[derive(Parser)]
#[command(name = "flowgate", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    /// Flowgate home directory (config.toml, workflows, lifetimes).
    #[arg(long, global = true, env = "FLOWGATE_HOME")]
    pub home: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the engine, triggers and HTTP server.
    Serve {
        /// Port to listen on. Defaults to `app.port` from config.toml.
        #[arg(short, long, env = "FLOWGATE_PORT")]
        port: Option<u16>,

        /// Host to bind to. Defaults to `app.host` from config.toml.
        #[arg(long, env = "FLOWGATE_HOST")]
        host: Option<String>,
    },

    /// Parse and validate a workflow file and the modules it uses.
    Validate {
        /// Path to the workflow YAML.
        file: PathBuf,
    },

    /// Show the status of a run from the lifetime store.
    Status {
        /// Run id (workflow uid).
        uid: String,
    },
}
