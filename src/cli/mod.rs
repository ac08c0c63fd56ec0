//! CLI module for aerofed
//!
//! Provides command-line interface for:
//! - check: Validate a repository descriptor
//! - resolve: Show the projections covering a path
//! - start: Boot a repository and serve requests from stdin
//! - query: One-shot request execution

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{
    boot, check, check_report, execute_one, load_config, query, request_report, resolve, resolve_report, run,
    run_command, start,
};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{read_request, read_requests, write_error, write_response};
