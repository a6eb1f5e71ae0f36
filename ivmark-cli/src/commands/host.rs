// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `ivmark host` command - Initialize the channel and drive the tests.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use ivmark_benchmark::summary::{self, BandwidthSummary, OverheadBreakdown};
use ivmark_benchmark::{
    BandwidthRecord, BenchmarkReport, CsvReporter, FrameSpec, JsonReporter, LatencyMetrics,
    LatencyRecord, PayloadGenerator, BANDWIDTH_FRAMES, LATENCY_FRAME,
};
use ivmark_core::{probe_counters, HostEndpoint, MessageKind, MessageReport};

use super::{load_config, should_print, ModeArgs, TransportArgs};

const BANDWIDTH_GAP: Duration = Duration::from_millis(10);

#[derive(Args, Debug)]
pub struct HostArgs {
    #[command(flatten)]
    pub modes: ModeArgs,

    #[command(flatten)]
    pub transport: TransportArgs,

    /// Create the shared memory file if it does not exist
    #[arg(long)]
    pub create: bool,

    /// Flip one byte of every K-th message after its digest is taken
    #[arg(long, value_name = "K", value_parser = clap::value_parser!(u32).range(1..))]
    pub corrupt_every: Option<u32>,

    /// Directory for the CSV and JSON results
    #[arg(short, long, default_value = ".")]
    pub output_dir: PathBuf,
}

/// Sends one payload, corrupting it when this message is due.
struct Sender<'h, 'a> {
    host: &'h mut HostEndpoint<'a>,
    generator: PayloadGenerator,
    corrupt_every: Option<u32>,
    sent: u32,
}

impl Sender<'_, '_> {
    fn send(&mut self, sequence: u32, size: usize) -> anyhow::Result<MessageReport> {
        self.sent += 1;
        let corrupt = self.corrupt_every.is_some_and(|k| self.sent % k == 0);
        let offset = self.generator.corruption_offset(size);
        let payload = self.generator.fill(size);

        let report = if corrupt {
            tracing::debug!(sequence, offset, "Corrupting payload after digest");
            self.host
                .send_with(sequence, payload, |buffer| buffer[offset] ^= 0xFF)?
        } else {
            self.host.send(sequence, payload)?
        };
        Ok(report)
    }
}

pub fn execute(config_path: Option<&Path>, args: HostArgs) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let plan = args.modes.plan();

    let channel = args.transport.open_channel(&config.transport, args.create)?;
    let capacity = channel.capacity();

    let counters = probe_counters(config.pipeline.hardware_counters);
    let mut host = HostEndpoint::new(&channel, config.host).with_counters(counters);

    println!("=== ivmark host ===");
    println!("Region:    {}", channel.describe());
    println!("Capacity:  {} bytes ({:.2} MB)", capacity, capacity as f64 / (1024.0 * 1024.0));
    println!(
        "Messages:  {} latency, {} bandwidth",
        plan.latency_messages(capacity),
        plan.bandwidth_messages(capacity)
    );
    println!();

    host.initialize()?;
    println!("Waiting for guest...");
    if !host.wait_for_guest() {
        println!("Guest not ready, proceeding anyway");
    }

    let mut sender = Sender {
        host: &mut host,
        generator: PayloadGenerator::new(),
        corrupt_every: args.corrupt_every,
        sent: 0,
    };
    let mut report = BenchmarkReport::new();

    if let Some(count) = plan.latency {
        if LATENCY_FRAME.fits(capacity) {
            let records = run_latency(&mut sender, count, &args.output_dir)?;
            report.results.extend(summary::latency_results(&records));
        } else {
            tracing::warn!(
                frame = LATENCY_FRAME.name,
                size = LATENCY_FRAME.size(),
                capacity,
                "Latency frame exceeds channel capacity, skipping latency test"
            );
        }
    }

    if let Some(iterations) = plan.bandwidth {
        let records = run_bandwidth(&mut sender, iterations, capacity, &args.output_dir)?;
        report.results.extend(summary::bandwidth_results(&records));
    }

    host.shutdown()?;

    if !report.results.is_empty() {
        let path = JsonReporter::new(&args.output_dir)?.save(&report)?;
        println!("JSON report: {}", path.display());
    }
    println!("=== Host finished ===");
    Ok(())
}

fn run_latency(sender: &mut Sender<'_, '_>, count: u32, output_dir: &Path) -> anyhow::Result<Vec<LatencyRecord>> {
    println!(
        "--- Latency test: {} x {} ({:.2} MB) ---",
        count,
        LATENCY_FRAME.name,
        LATENCY_FRAME.size_mb()
    );

    let mut csv = CsvReporter::<LatencyRecord>::create(output_dir.join("latency_results.csv"))?;
    let mut records = Vec::with_capacity(count as usize);
    let mut successes = 0usize;

    for iteration in 0..count {
        let sequence = MessageKind::Latency.sequence(iteration);
        let message = sender
            .send(sequence, LATENCY_FRAME.size())
            .with_context(|| format!("Latency message {} failed", sequence))?;
        let record = LatencyRecord::from_report(iteration, &message);

        if record.success {
            successes += 1;
            if should_print(successes - 1, count as usize) {
                println!(
                    "[{:>4}] write {} | round trip {} | notification {} | total {}",
                    iteration,
                    LatencyMetrics::format_latency(record.write_ns),
                    LatencyMetrics::format_latency(record.roundtrip_ns),
                    LatencyMetrics::format_latency(record.notification_est_ns),
                    LatencyMetrics::format_latency(record.total_ns),
                );
            }
        } else {
            println!(
                "[{:>4}] FAILED: {} (error code {})",
                iteration, record.outcome, record.error_code
            );
        }

        csv.write(&record)?;
        records.push(record);
    }

    let path = csv.finish()?;
    println!();
    match OverheadBreakdown::from_records(&records) {
        Some(breakdown) => print!("{}", breakdown),
        None => println!("No latency message succeeded"),
    }
    println!("Latency results: {}", path.display());
    println!();
    Ok(records)
}

fn run_bandwidth(
    sender: &mut Sender<'_, '_>,
    iterations: u32,
    capacity: usize,
    output_dir: &Path,
) -> anyhow::Result<Vec<BandwidthRecord>> {
    println!("--- Bandwidth test: {} iterations per frame ---", iterations);

    let mut csv = CsvReporter::<BandwidthRecord>::create(output_dir.join("bandwidth_results.csv"))?;
    let mut records = Vec::new();

    for frame in BANDWIDTH_FRAMES {
        if !frame.fits(capacity) {
            tracing::warn!(
                frame = frame.name,
                size = frame.size(),
                capacity,
                "Frame exceeds channel capacity, skipping"
            );
            continue;
        }
        run_frame(sender, frame, iterations, &mut csv, &mut records)?;
    }

    let path = csv.finish()?;
    println!();
    print!("{}", summary::render_bandwidth(&BandwidthSummary::by_frame(&records)));
    println!("Bandwidth results: {}", path.display());
    println!();
    Ok(records)
}

fn run_frame(
    sender: &mut Sender<'_, '_>,
    frame: FrameSpec,
    iterations: u32,
    csv: &mut CsvReporter<BandwidthRecord>,
    records: &mut Vec<BandwidthRecord>,
) -> anyhow::Result<()> {
    println!(
        "{} ({}x{}, {:.2} MB):",
        frame.name,
        frame.width,
        frame.height,
        frame.size_mb()
    );

    for iteration in 0..iterations {
        let sequence = MessageKind::Bandwidth.sequence(iteration);
        let message = sender
            .send(sequence, frame.size())
            .with_context(|| format!("{} transfer {} failed", frame.name, iteration))?;
        let record = BandwidthRecord::from_report(iteration, frame, &message);

        if record.success {
            println!(
                "  [{:>3}] write {:>8.0} MB/s | read {:>8.0} MB/s | total {:>8.0} MB/s",
                iteration,
                record.write_mbps(),
                record.read_mbps(),
                record.total_mbps()
            );
        } else {
            println!("  [{:>3}] FAILED (error code {})", iteration, record.error_code);
        }

        csv.write(&record)?;
        records.push(record);
        thread::sleep(BANDWIDTH_GAP);
    }
    Ok(())
}
