// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! CLI argument parsing and command definitions.
//!
//! - `run`: Start the gateway (default)
//! - `validate`: Validate the configuration file
//! - `version`: Show version information

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

// =============================================================================
// Main CLI Structure
// =============================================================================

/// tagway - industrial gateway bridging OPC UA and MQTT onto one topic bus
#[derive(Parser, Debug)]
#[command(
    name = "tagway",
    author = "Sylvex <contact@sylvex.io>",
    version = tagway_core::VERSION,
    about = "Topic-addressed industrial gateway for OPC UA and MQTT",
    long_about = None,
    propagate_version = true
)]
pub struct Cli {
    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "tagway.yaml",
        env = "TAGWAY_CONFIG",
        global = true
    )]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error). Overrides the config file.
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Log format. Overrides the config file.
    #[arg(long, global = true)]
    pub log_format: Option<LogFormat>,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Log debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

// =============================================================================
// Subcommands
// =============================================================================

/// Available subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the gateway
    ///
    /// This is the default command when no subcommand is specified.
    /// It starts one driver per enabled entry in the configuration.
    Run,

    /// Validate the configuration file
    ///
    /// Parses and validates the configuration file without starting drivers.
    Validate(ValidateArgs),

    /// Show version information
    Version,
}

/// Arguments for the `validate` command.
#[derive(Args, Debug, Clone, Default)]
pub struct ValidateArgs {
    /// Print the parsed configuration after validation
    #[arg(short, long)]
    pub show_config: bool,

    /// Output format for validation results
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

// =============================================================================
// Enums
// =============================================================================

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON format for structured logging
    Json,
    /// Compact format for minimal output
    Compact,
}

impl From<tagway_config::LogFormat> for LogFormat {
    fn from(format: tagway_config::LogFormat) -> Self {
        match format {
            tagway_config::LogFormat::Text => Self::Text,
            tagway_config::LogFormat::Json => Self::Json,
            tagway_config::LogFormat::Compact => Self::Compact,
        }
    }
}

/// Output format for command results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON format for programmatic parsing
    Json,
}

// =============================================================================
// Helper Methods
// =============================================================================

impl Cli {
    /// Parses CLI arguments from the command line.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Returns the command to run, `Run` when none was given.
    pub fn effective_command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Run)
    }

    /// Returns the log level from flags, falling back to `configured`.
    pub fn effective_log_level<'a>(&'a self, configured: &'a str) -> &'a str {
        if self.quiet {
            "warn"
        } else if self.verbose {
            "debug"
        } else {
            self.log_level.as_deref().unwrap_or(configured)
        }
    }

    /// Returns the log format from flags, falling back to `configured`.
    pub fn effective_log_format(&self, configured: tagway_config::LogFormat) -> LogFormat {
        self.log_format.unwrap_or_else(|| configured.into())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command() {
        let cli = Cli::parse_from(["tagway"]);
        assert!(cli.command.is_none());
        assert!(matches!(cli.effective_command(), Commands::Run));
    }

    #[test]
    fn test_validate_command() {
        let cli = Cli::parse_from(["tagway", "validate", "--show-config", "-f", "json"]);
        match cli.command {
            Some(Commands::Validate(args)) => {
                assert!(args.show_config);
                assert_eq!(args.format, OutputFormat::Json);
            }
            other => panic!("Expected Validate command, got {:?}", other),
        }
    }

    #[test]
    fn test_config_path() {
        let cli = Cli::parse_from(["tagway", "-c", "/etc/tagway/gateway.toml", "run"]);
        assert_eq!(cli.config, PathBuf::from("/etc/tagway/gateway.toml"));
    }

    #[test]
    fn test_log_flags_override_config() {
        let cli = Cli::parse_from(["tagway"]);
        assert_eq!(cli.effective_log_level("error"), "error");
        assert_eq!(
            cli.effective_log_format(tagway_config::LogFormat::Json),
            LogFormat::Json
        );

        let cli = Cli::parse_from(["tagway", "-l", "trace", "--log-format", "compact"]);
        assert_eq!(cli.effective_log_level("error"), "trace");
        assert_eq!(
            cli.effective_log_format(tagway_config::LogFormat::Json),
            LogFormat::Compact
        );

        let cli = Cli::parse_from(["tagway", "-q", "-l", "trace"]);
        assert_eq!(cli.effective_log_level("info"), "warn");

        let cli = Cli::parse_from(["tagway", "-v"]);
        assert_eq!(cli.effective_log_level("info"), "debug");
    }
}
