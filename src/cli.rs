//! Command-line interface definition for mcprobe
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands for running conformance checks and listing the
//! registered suites.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// mcprobe - MCP conformance and chaos-testing harness
///
/// Drive an MCP server through conformance suites over stdio, TCP, or
/// WebSocket, optionally injecting deterministic faults into the message
/// path.
#[derive(Parser, Debug, Clone)]
#[command(name = "mcprobe")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for mcprobe
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the configured suites against a target
    Check {
        /// Path to the JSON configuration file
        #[arg(short, long)]
        config: PathBuf,

        /// Restrict the run to these suites (repeatable)
        #[arg(long = "suite")]
        suites: Vec<String>,

        /// Only run suites carrying one of these tags (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Skip suites carrying one of these tags (repeatable)
        #[arg(long = "exclude-tag")]
        exclude_tags: Vec<String>,

        /// Stop after the first failed suite
        #[arg(long)]
        fail_fast: bool,

        /// Treat warnings as failures
        #[arg(long)]
        strict: bool,

        /// Write the results JSON here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List the built-in suites and their tags
    Suites,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_command_parses_filters() {
        let cli = Cli::try_parse_from([
            "mcprobe",
            "check",
            "--config",
            "check.json",
            "--suite",
            "handshake",
            "--suite",
            "tool-discovery",
            "--tag",
            "core",
            "--exclude-tag",
            "chaos",
            "--fail-fast",
        ])
        .unwrap();
        match cli.command {
            Commands::Check {
                config,
                suites,
                tags,
                exclude_tags,
                fail_fast,
                strict,
                output,
            } => {
                assert_eq!(config, PathBuf::from("check.json"));
                assert_eq!(suites, vec!["handshake", "tool-discovery"]);
                assert_eq!(tags, vec!["core"]);
                assert_eq!(exclude_tags, vec!["chaos"]);
                assert!(fail_fast);
                assert!(!strict);
                assert!(output.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_suites_command_parses() {
        let cli = Cli::try_parse_from(["mcprobe", "suites"]).unwrap();
        assert!(matches!(cli.command, Commands::Suites));
    }

    #[test]
    fn test_check_requires_config() {
        assert!(Cli::try_parse_from(["mcprobe", "check"]).is_err());
    }
}
