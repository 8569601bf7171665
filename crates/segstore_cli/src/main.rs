//! Segstore CLI
//!
//! Command-line tools for inspecting segment store directories.
//!
//! # Commands
//!
//! - `inspect` - Display segments and file statistics
//! - `verify` - Verify journal and attribute index integrity
//! - `dump-log` - Dump journal records for debugging
//!
//! Every command works on in-memory copies of the store files and never
//! modifies the directory.

mod commands;
mod error;
mod snapshot;

use clap::{Parser, Subcommand};
use error::{CliError, CliResult};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Segment store command-line tools.
#[derive(Parser)]
#[command(name = "segstore")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display segments and file statistics
    Inspect {
        /// Show every cached attribute of each segment
        #[arg(short, long)]
        attributes: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify store integrity
    Verify {
        /// Check the journal
        #[arg(short, long)]
        journal: bool,

        /// Check the attribute index
        #[arg(short = 'x', long)]
        attributes: bool,

        /// Check all (default if no flags specified)
        #[arg(short, long)]
        all: bool,
    },

    /// Dump journal records for debugging
    DumpLog {
        /// Maximum number of records to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Start from this journal offset
        #[arg(short, long, default_value = "0")]
        offset: u64,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> CliResult<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { attributes, format } => {
            let path = cli.path.ok_or(CliError::PathRequired("inspect"))?;
            commands::inspect::run(&path, attributes, &format)?;
        }
        Commands::Verify {
            journal,
            attributes,
            all,
        } => {
            let path = cli.path.ok_or(CliError::PathRequired("verify"))?;
            let check_all = all || (!journal && !attributes);
            commands::verify::run(&path, journal || check_all, attributes || check_all)?;
        }
        Commands::DumpLog {
            limit,
            offset,
            format,
        } => {
            let path = cli.path.ok_or(CliError::PathRequired("dump-log"))?;
            commands::dump_log::run(&path, limit, offset, &format)?;
        }
        Commands::Version => {
            println!("segstore CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
