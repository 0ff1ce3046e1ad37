//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Per-site browsing time tracker.
///
/// Accumulates time spent on each website and reports it to the local
/// activity monitor server.
#[derive(Debug, Parser)]
#[command(name = "st", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the native messaging host on stdin/stdout.
    Run,

    /// Check whether the monitor server is reachable.
    Ping,

    /// Show the user logged in on the monitor server.
    Whoami,
}
