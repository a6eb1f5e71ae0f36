// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `ivmark baseline` command - Same-machine memory reference numbers.

use std::path::PathBuf;

use clap::Args;
use ivmark_benchmark::{render_table, run_baseline, BaselineConfig, BenchmarkReport, JsonReporter};

#[derive(Args, Debug)]
pub struct BaselineArgs {
    /// Measured iterations per test
    #[arg(short = 'n', long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    pub iterations: u64,

    /// Buffer size in bytes [default: one 4K RGB frame]
    #[arg(short, long)]
    pub size: Option<usize>,

    /// Skip the POSIX shared memory tests
    #[arg(long)]
    pub no_shm: bool,

    /// Save a JSON report into this directory
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,
}

pub fn execute(args: BaselineArgs) -> anyhow::Result<()> {
    let defaults = BaselineConfig::default();
    let config = BaselineConfig {
        size: args.size.unwrap_or(defaults.size),
        iterations: args.iterations,
        include_shm: !args.no_shm,
    };

    println!("=== Memory baseline ===");
    println!(
        "Buffer: {} bytes ({:.2} MB), {} iterations",
        config.size,
        config.size as f64 / (1024.0 * 1024.0),
        config.iterations
    );
    println!();

    let results = run_baseline(&config);
    print!("{}", render_table(&results));

    if let Some(dir) = args.output_dir {
        let mut report = BenchmarkReport::new();
        report
            .results
            .extend(results.into_iter().map(|r| r.into_result()));
        let path = JsonReporter::new(dir)?.save(&report)?;
        println!();
        println!("JSON report: {}", path.display());
    }
    Ok(())
}
