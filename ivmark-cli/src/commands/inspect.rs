// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `ivmark inspect` command - Print the channel header.

use std::path::Path;

use clap::Args;
use ivmark_core::shm::{ChannelSnapshot, CHANNEL_MAGIC};
use ivmark_core::{ErrorCode, GuestState, HostState};

use super::{load_config, TransportArgs};

#[derive(Args, Debug)]
pub struct InspectArgs {
    #[command(flatten)]
    pub transport: TransportArgs,

    /// Also print the last timing record written by the guest
    #[arg(short, long)]
    pub timing: bool,
}

pub fn execute(config_path: Option<&Path>, args: InspectArgs) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let channel = args.transport.open_channel(&config.transport, false)?;

    println!("Region: {}", channel.describe());
    print!("{}", render(&channel.snapshot()));

    if args.timing {
        let timing = channel.read_timing();
        println!();
        println!("Last timing record (ns):");
        println!("  Hot read:   {}", timing.hot_read_ns);
        println!("  Cold read:  {}", timing.cold_read_ns);
        println!("  Copy:       {}", timing.copy_ns);
        println!("  Verify:     {}", timing.verify_ns);
        println!("  Total:      {}", timing.total_ns);
        println!("  Cycles:     {}", timing.counters.cpu_cycles);
        println!("  LLC misses: {}", timing.counters.llc_misses);
    }
    Ok(())
}

fn host_state_name(raw: u32) -> String {
    HostState::from_raw(raw).map_or_else(|| format!("UNKNOWN ({})", raw), |s| s.name().to_string())
}

fn guest_state_name(raw: u32) -> String {
    GuestState::from_raw(raw).map_or_else(|| format!("UNKNOWN ({})", raw), |s| s.name().to_string())
}

fn render(snapshot: &ChannelSnapshot) -> String {
    let open = if snapshot.magic == CHANNEL_MAGIC {
        "open"
    } else {
        "not initialized"
    };
    let error = ErrorCode::from_raw(snapshot.error_code);
    format!(
        "Magic:         {:#010x} ({})\n\
         Host state:    {}\n\
         Guest state:   {}\n\
         Sequence:      {}\n\
         Data size:     {} bytes\n\
         Error code:    {} ({})\n\
         Test complete: {}\n\
         Capacity:      {} bytes\n",
        snapshot.magic,
        open,
        host_state_name(snapshot.host_state),
        guest_state_name(snapshot.guest_state),
        snapshot.sequence,
        snapshot.data_size,
        snapshot.error_code,
        error,
        snapshot.test_complete,
        snapshot.capacity,
    )
}
