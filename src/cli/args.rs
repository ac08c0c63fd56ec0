//! CLI argument definitions using clap
//!
//! Commands:
//! - aerofed check --config <path>
//! - aerofed resolve --config <path> --path <federated path>
//! - aerofed start --config <path>
//! - aerofed query --config <path>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// aerofed - a federated content repository
#[derive(Parser, Debug)]
#[command(name = "aerofed")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Minimum log severity (trace, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Validate a repository descriptor and report its problems
    Check {
        /// Path to repository descriptor
        #[arg(long, default_value = "./aerofed.json")]
        config: PathBuf,
    },

    /// Show which projections cover a federated path
    Resolve {
        /// Path to repository descriptor
        #[arg(long, default_value = "./aerofed.json")]
        config: PathBuf,

        /// Federated path to resolve
        #[arg(long)]
        path: String,
    },

    /// Serve requests from stdin, one JSON object per line
    Start {
        /// Path to repository descriptor
        #[arg(long, default_value = "./aerofed.json")]
        config: PathBuf,
    },

    /// Execute a single request from stdin and exit
    Query {
        /// Path to repository descriptor
        #[arg(long, default_value = "./aerofed.json")]
        config: PathBuf,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
