//! Tally CLI Library
//!
//! Command-line front end of the Tally analysis engine.
//!
//! # Overview
//!
//! - **Local runs**: execute a job over a CSV file on this machine (`tally run`)
//! - **Distributed runs**: split a job into divisions and send them to
//!   `tally-worker` processes, or to in-process workers (`tally dispatch`)
//! - **Job checks**: validate a job definition without running it (`tally validate`)
//! - **Discovery**: list the available components (`tally components`)
//!
//! Results are printed to stdout as JSON; logs go to stderr.

pub mod commands;
pub mod error;

pub use error::{CliError, Result};

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Tally - distributed data analysis jobs
#[derive(Parser, Debug)]
#[command(name = "tally")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print the command reference as markdown
    #[arg(long, hide = true)]
    pub markdown_help: bool,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a job on this machine
    Run {
        /// Job definition (JSON)
        #[arg(short, long)]
        job: PathBuf,

        /// CSV file with a header row
        #[arg(short, long, env = "TALLY_DATA")]
        data: PathBuf,

        /// Pretty-print the outcome
        #[arg(long)]
        pretty: bool,
    },

    /// Run a job across workers and reduce their results
    Dispatch {
        /// Job definition (JSON)
        #[arg(short, long)]
        job: PathBuf,

        /// CSV file with a header row; workers must read the same rows
        #[arg(short, long, env = "TALLY_DATA")]
        data: PathBuf,

        /// Worker endpoint URL, e.g. http://10.0.0.5:8090/tally/worker
        #[arg(
            short,
            long = "worker",
            env = "TALLY_WORKER_ENDPOINTS",
            value_delimiter = ',',
            required_unless_present = "local_workers"
        )]
        workers: Vec<String>,

        /// Run divisions on this many in-process workers instead
        #[arg(long, conflicts_with = "workers")]
        local_workers: Option<usize>,

        /// Number of divisions (defaults to one per worker)
        #[arg(long)]
        divisions: Option<usize>,

        /// Per-request timeout in seconds
        #[arg(long, env = "TALLY_HTTP_TIMEOUT_SECS")]
        timeout_secs: Option<u64>,

        /// Pretty-print the outcome
        #[arg(long)]
        pretty: bool,
    },

    /// Check a job definition against the available components
    Validate {
        /// Job definition (JSON)
        #[arg(short, long)]
        job: PathBuf,
    },

    /// List the available components
    Components {
        /// Print as JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}
