//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Mutual-TLS artifact delivery gateway
#[derive(Parser, Debug)]
#[command(name = "artifact-gate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "ARTIFACT_GATE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "ARTIFACT_GATE_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "ARTIFACT_GATE_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "ARTIFACT_GATE_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "ARTIFACT_GATE_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Start the gateway server (default)
    Serve,

    /// Load and validate configuration, TLS material and CRL, then exit
    Check,
}
