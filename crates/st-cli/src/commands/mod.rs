//! CLI subcommand implementations.

pub mod probe;
