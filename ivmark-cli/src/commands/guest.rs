// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `ivmark guest` command - Attach to the channel and process messages.

use std::path::Path;

use clap::Args;
use ivmark_benchmark::LatencyMetrics;
use ivmark_core::{
    probe_counters, GuestEndpoint, MeasurementPipeline, MessageKind, ProcessedMessage, StopReason,
};

use super::{load_config, should_print, ModeArgs, TransportArgs};

#[derive(Args, Debug)]
pub struct GuestArgs {
    // Must match the host so the guest knows when to stop
    #[command(flatten)]
    pub modes: ModeArgs,

    #[command(flatten)]
    pub transport: TransportArgs,

    /// Serve until the host signals completion instead of a fixed count
    #[arg(long)]
    pub until_shutdown: bool,
}

pub fn execute(config_path: Option<&Path>, args: GuestArgs) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let plan = args.modes.plan();

    let channel = args.transport.open_channel(&config.transport, false)?;
    let expected = (!args.until_shutdown).then(|| plan.expected_messages(channel.capacity()));

    let pipeline = MeasurementPipeline::new(
        probe_counters(config.pipeline.hardware_counters),
        &config.pipeline,
    );
    let counters = if pipeline.counters_available() {
        "hardware"
    } else {
        "unavailable"
    };
    let mut guest = GuestEndpoint::new(&channel, config.guest, pipeline);

    println!("=== ivmark guest ===");
    println!("Region:    {}", channel.describe());
    println!("Capacity:  {} bytes", channel.capacity());
    println!("Counters:  {}", counters);
    match expected {
        Some(n) => println!("Expecting: {} messages", n),
        None => println!("Expecting: messages until shutdown"),
    }
    println!();

    println!("Waiting for host...");
    guest.attach()?;
    println!("Host ready, serving");

    let total = expected.unwrap_or(usize::MAX);
    let mut seen = 0usize;
    let summary = guest.run(expected, |message| {
        if !message.success() || should_print(seen, total) {
            print_message(message);
        }
        seen += 1;
    })?;
    guest.close();

    println!();
    println!(
        "Processed: {} ({} failed)",
        summary.processed, summary.failed
    );
    println!("Stopped:   {}", stop_reason(summary.stop));
    println!("=== Guest finished ===");
    Ok(())
}

fn print_message(message: &ProcessedMessage) {
    let phases = &message.timing.phases;
    let kind = match message.kind {
        MessageKind::Latency => "lat",
        MessageKind::Bandwidth => "bw",
    };
    if message.success() {
        println!(
            "[{} {:>5}] {} bytes | hot {} | cold {} | copy {} | verify {} | total {}",
            kind,
            message.sequence,
            message.data_size,
            LatencyMetrics::format_latency(phases.hot_read_ns),
            LatencyMetrics::format_latency(phases.cold_read_ns),
            LatencyMetrics::format_latency(phases.copy_ns),
            LatencyMetrics::format_latency(phases.verify_ns),
            LatencyMetrics::format_latency(phases.total_ns),
        );
    } else {
        println!(
            "[{} {:>5}] FAILED: {} ({} bytes)",
            kind, message.sequence, message.error, message.data_size
        );
    }
}

fn stop_reason(stop: StopReason) -> &'static str {
    match stop {
        StopReason::CountReached => "expected message count reached",
        StopReason::Shutdown => "host signalled completion",
        StopReason::Idle => "no message within the idle timeout",
        StopReason::Stalled => "host never released the last message",
    }
}
