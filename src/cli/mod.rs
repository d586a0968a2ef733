//! CLI module for docstash
//!
//! Provides a local command-line interface for:
//! - stats: Load a data file and report counts
//! - compact: Rewrite a data file without stale lines
//! - find: Print matching documents
//! - count: Print the number of matching documents

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command, Target};
pub use commands::{compact, count, find, open, run, run_command, stats, FindArgs};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{write_error, write_response};
