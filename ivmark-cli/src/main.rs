// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! ivmark CLI
//!
//! Runs the host or guest side of the shared memory benchmark, the memory
//! baseline, and channel diagnostics.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod affinity;
mod commands;

use commands::{baseline, guest, host, inspect, validate};

/// ivmark - host/guest shared memory transfer benchmark
#[derive(Parser)]
#[command(name = "ivmark")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path (built-in defaults when omitted)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the channel and send test messages
    Host(host::HostArgs),

    /// Attach to the channel and process messages
    Guest(guest::GuestArgs),

    /// Measure same-machine memory reference numbers
    Baseline(baseline::BaselineArgs),

    /// Print the channel header without modifying it
    Inspect(inspect::InspectArgs),

    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        file: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Host(args) => host::execute(cli.config.as_deref(), args),
        Commands::Guest(args) => guest::execute(cli.config.as_deref(), args),
        Commands::Baseline(args) => baseline::execute(args),
        Commands::Inspect(args) => inspect::execute(cli.config.as_deref(), args),
        Commands::Validate { file } => validate::execute(&file),
    }
}
