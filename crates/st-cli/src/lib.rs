//! Site time tracker CLI library.
//!
//! Hosts the native messaging endpoint the browser extension talks to, plus
//! a few diagnostic commands for the monitor server.

mod cli;
pub mod commands;
mod config;
pub mod host;
pub mod native;

pub use cli::{Cli, Commands};
pub use config::Config;

use tracing_subscriber::EnvFilter;

/// Initializes logging to stderr.
///
/// Stdout carries native messaging frames, so nothing else may write there.
pub fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    // Use try_init to avoid panic if tracing is already initialized (e.g., in tests)
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
