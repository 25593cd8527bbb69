//! Command-line interface for circuit-weaver.
//!
//! Provides commands to run the job factory, seed the creative store and
//! inspect the knowledge stores and metrics.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, seed_directory, Cli, Commands, SeedSummary};
