//! Command line interface
//!
//! Argument parsing and the runner that loads configuration, builds the
//! registry clients and tool collaborators, and executes one pipeline batch.

pub mod args;
pub mod runner;

pub use args::Args;
pub use runner::Runner;
