// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! ivmark benchmark reporting
//!
//! Turns the per-message reports of the shared memory channel into result
//! files and console summaries, and measures the same-machine memory
//! baseline the channel numbers are compared against.
//!
//! # Outputs
//!
//! - **CSV**: one row per latency message and per bandwidth transfer
//! - **JSON**: a timestamped suite with latency statistics and system info
//! - **Console**: overhead breakdown, bandwidth averages, baseline table

pub mod baseline;
pub mod frames;
pub mod harness;
pub mod metrics;
pub mod records;
pub mod reporter;
pub mod summary;

pub use baseline::{render_table, run_baseline, BaselineConfig, BaselineResult};
pub use frames::{FrameSpec, PayloadGenerator, BANDWIDTH_FRAMES, LATENCY_FRAME};
pub use harness::BenchmarkHarness;
pub use metrics::{
    BenchmarkCategory, BenchmarkReport, BenchmarkResult, LatencyMetrics, SystemInfo,
};
pub use records::{BandwidthRecord, CsvRow, LatencyRecord};
pub use reporter::{CsvReporter, JsonReporter, ReporterError};
pub use summary::{BandwidthSummary, OverheadBreakdown};
