//! CLI argument definitions using clap
//!
//! Commands:
//! - docstash stats --file <path>
//! - docstash compact --file <path>
//! - docstash find --file <path> [--query <json>] [--sort <list>] [--skip N] [--limit N]
//! - docstash count --file <path> [--query <json>]
//!
//! Every command also takes `--config <path>` to read datastore options
//! from a JSON file; `--file` overrides the file named there.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// docstash - inspect and maintain a docstash data file
#[derive(Parser, Debug)]
#[command(name = "docstash")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Which data file to open
#[derive(Args, Debug, Clone, Default)]
pub struct Target {
    /// Path to the data file
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// Path to a JSON options file
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load the data file and report line and document counts
    Stats {
        #[command(flatten)]
        target: Target,
    },

    /// Load the data file and rewrite it without stale lines
    Compact {
        #[command(flatten)]
        target: Target,
    },

    /// Print documents matching a query
    Find {
        #[command(flatten)]
        target: Target,

        /// Query as JSON
        #[arg(long, default_value = "{}")]
        query: String,

        /// Sort list, e.g. `age,-name`
        #[arg(long, allow_hyphen_values = true)]
        sort: Option<String>,

        /// Matches to skip
        #[arg(long, default_value_t = 0)]
        skip: usize,

        /// Maximum number of documents; 0 means no limit
        #[arg(long, default_value_t = 0)]
        limit: usize,

        /// Projection as JSON
        #[arg(long)]
        projection: Option<String>,
    },

    /// Print the number of documents matching a query
    Count {
        #[command(flatten)]
        target: Target,

        /// Query as JSON
        #[arg(long, default_value = "{}")]
        query: String,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_find() {
        let cli = Cli::try_parse_from([
            "docstash", "find", "--file", "a.db", "--query", r#"{"n":1}"#, "--sort", "-n",
            "--limit", "5",
        ])
        .unwrap();
        match cli.command {
            Command::Find {
                target,
                query,
                sort,
                limit,
                skip,
                ..
            } => {
                assert_eq!(target.file, Some(PathBuf::from("a.db")));
                assert_eq!(query, r#"{"n":1}"#);
                assert_eq!(sort.as_deref(), Some("-n"));
                assert_eq!(limit, 5);
                assert_eq!(skip, 0);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_count_defaults_to_empty_query() {
        let cli = Cli::try_parse_from(["docstash", "count", "--config", "opts.json"]).unwrap();
        match cli.command {
            Command::Count { target, query } => {
                assert_eq!(target.config, Some(PathBuf::from("opts.json")));
                assert_eq!(query, "{}");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
