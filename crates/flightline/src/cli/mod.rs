//! Command-line interface for flightline.
//!
//! This module provides the CLI structure and command handlers for the
//! `flightline` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    ConfigCommand, IngestCommand, OutputFormat, RecomputeCommand, SessionsCommand, ShowCommand,
    StatusCommand,
};

/// flightline - Flight detection and analytics over vehicle telemetry
///
/// Ingests raw telemetry batches, detects flight sessions from throttle
/// activity, and computes per-flight statistics once a session ends.
#[derive(Debug, Parser)]
#[command(name = "flightline")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Ingest a telemetry batch for a device
    Ingest(IngestCommand),

    /// List a device's flight sessions
    Sessions(SessionsCommand),

    /// Show one session and its metrics
    Show(ShowCommand),

    /// Recompute a closed session's metrics
    Recompute(RecomputeCommand),

    /// Show storage status
    Status(StatusCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        if self.quiet {
            crate::logging::Verbosity::Quiet
        } else {
            match self.verbose {
                0 => crate::logging::Verbosity::Normal,
                1 => crate::logging::Verbosity::Verbose,
                _ => crate::logging::Verbosity::Trace,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_name() {
        let cli = Cli::command();
        assert_eq!(cli.get_name(), "flightline");
    }

    #[test]
    fn test_cli_verify() {
        // Verify the CLI structure is valid
        Cli::command().debug_assert();
    }

    #[test]
    fn test_verbosity_quiet() {
        let cli = Cli {
            config: None,
            verbose: 0,
            quiet: true,
            command: Command::Status(StatusCommand { json: false }),
        };
        assert_eq!(cli.verbosity(), crate::logging::Verbosity::Quiet);
    }

    #[test]
    fn test_verbosity_normal() {
        let cli = Cli {
            config: None,
            verbose: 0,
            quiet: false,
            command: Command::Status(StatusCommand { json: false }),
        };
        assert_eq!(cli.verbosity(), crate::logging::Verbosity::Normal);
    }

    #[test]
    fn test_verbosity_verbose() {
        let cli = Cli {
            config: None,
            verbose: 1,
            quiet: false,
            command: Command::Status(StatusCommand { json: false }),
        };
        assert_eq!(cli.verbosity(), crate::logging::Verbosity::Verbose);
    }

    #[test]
    fn test_verbosity_trace() {
        let cli = Cli {
            config: None,
            verbose: 2,
            quiet: false,
            command: Command::Status(StatusCommand { json: false }),
        };
        assert_eq!(cli.verbosity(), crate::logging::Verbosity::Trace);
    }

    #[test]
    fn test_parse_ingest() {
        let device = uuid::Uuid::new_v4().to_string();
        let args = vec!["flightline", "ingest", device.as_str(), "batch.json"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert!(matches!(cli.command, Command::Ingest(_)));
    }

    #[test]
    fn test_parse_ingest_rejects_bad_device() {
        let args = vec!["flightline", "ingest", "not-a-uuid", "batch.json"];
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn test_parse_sessions_with_limit() {
        let device = uuid::Uuid::new_v4().to_string();
        let args = vec!["flightline", "sessions", device.as_str(), "--limit", "5"];
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Command::Sessions(cmd) => assert_eq!(cmd.limit, 5),
            _ => panic!("expected sessions command"),
        }
    }

    #[test]
    fn test_parse_recompute_dry_run() {
        let session = uuid::Uuid::new_v4().to_string();
        let args = vec!["flightline", "recompute", session.as_str(), "--dry-run"];
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Command::Recompute(cmd) => assert!(cmd.dry_run),
            _ => panic!("expected recompute command"),
        }
    }

    #[test]
    fn test_parse_status() {
        let args = vec!["flightline", "status"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert!(matches!(cli.command, Command::Status(_)));
    }

    #[test]
    fn test_parse_config_path() {
        let args = vec!["flightline", "config", "path"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert!(matches!(cli.command, Command::Config(ConfigCommand::Path)));
    }

    #[test]
    fn test_parse_with_config() {
        let args = vec!["flightline", "-c", "/custom/config.toml", "status"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/custom/config.toml")));
    }

    #[test]
    fn test_parse_with_verbose() {
        let args = vec!["flightline", "-v", "status"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert_eq!(cli.verbose, 1);
    }

    #[test]
    fn test_parse_with_quiet() {
        let args = vec!["flightline", "-q", "status"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert!(cli.quiet);
    }
}
