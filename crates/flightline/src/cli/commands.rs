//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};
use uuid::Uuid;

/// Ingest command arguments.
#[derive(Debug, Args)]
pub struct IngestCommand {
    /// The device the batch belongs to
    pub device: Uuid,

    /// Path to a JSON file holding an array of telemetry samples
    pub file: PathBuf,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Sessions listing command arguments.
#[derive(Debug, Args)]
pub struct SessionsCommand {
    /// The device whose sessions to list
    pub device: Uuid,

    /// Maximum number of sessions to show
    #[arg(short, long, default_value = "20")]
    pub limit: usize,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

/// Single-session display command arguments.
#[derive(Debug, Args)]
pub struct ShowCommand {
    /// The session to display
    pub session: Uuid,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Metrics recomputation command arguments.
///
/// Recomputing is idempotent: the metrics engine is deterministic over the
/// stored sample set.
#[derive(Debug, Args)]
pub struct RecomputeCommand {
    /// The session whose metrics to recompute
    pub session: Uuid,

    /// Compute and print without writing back
    #[arg(long)]
    pub dry_run: bool,
}

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

/// Output format for commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Plain text output
    #[default]
    Plain,
    /// Formatted table
    Table,
    /// JSON output
    Json,
}
