//! docstash CLI entry point
//!
//! Parses arguments, runs one command against a data file and exits with
//! a status that reflects the error code. The JSON response has already
//! been printed on stdout; stderr gets a one-line summary.

use docstash::cli;

fn main() {
    if let Err(e) = cli::run() {
        eprintln!("{}", e);
        std::process::exit(e.exit_code());
    }
}
