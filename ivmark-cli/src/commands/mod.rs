// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! CLI command modules and the options they share.

pub mod baseline;
pub mod guest;
pub mod host;
pub mod inspect;
pub mod validate;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Args;
use ivmark_benchmark::{BANDWIDTH_FRAMES, LATENCY_FRAME};
use ivmark_core::{
    BenchConfig, Channel, ConfigLoader, Transport, TransportConfig, BANDWIDTH_SEQUENCE_BASE,
};

use crate::affinity;

pub const DEFAULT_LATENCY_COUNT: u32 = 100;
pub const DEFAULT_BANDWIDTH_ITERATIONS: u32 = 10;

/// Latency sequences must stay below the bandwidth sequence base.
pub const MAX_LATENCY_COUNT: i64 = BANDWIDTH_SEQUENCE_BASE as i64;

/// Load the config file if one was given, else the built-in defaults.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<BenchConfig> {
    match path {
        Some(path) => ConfigLoader::load_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => Ok(BenchConfig::default()),
    }
}

/// Which tests run and how many messages each sends.
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct ModeArgs {
    /// Run the latency test [default count: 100, at most 65535]
    #[arg(
        short = 'l',
        long = "latency",
        value_name = "COUNT",
        num_args = 0..=1,
        default_missing_value = "100",
        value_parser = clap::value_parser!(u32).range(1..=MAX_LATENCY_COUNT)
    )]
    pub latency: Option<u32>,

    /// Run the bandwidth test [default iterations per frame: 10]
    #[arg(
        short = 'b',
        long = "bandwidth",
        value_name = "ITERATIONS",
        num_args = 0..=1,
        default_missing_value = "10",
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub bandwidth: Option<u32>,

    /// Override the count of every selected test [at most 65535]
    #[arg(
        short = 'n',
        long = "count",
        value_parser = clap::value_parser!(u32).range(1..=MAX_LATENCY_COUNT)
    )]
    pub count: Option<u32>,
}

/// Resolved test selection. Both tests run when neither was asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestPlan {
    pub latency: Option<u32>,
    pub bandwidth: Option<u32>,
}

impl ModeArgs {
    pub fn plan(&self) -> TestPlan {
        let (latency, bandwidth) = match (self.latency, self.bandwidth) {
            (None, None) => (
                Some(DEFAULT_LATENCY_COUNT),
                Some(DEFAULT_BANDWIDTH_ITERATIONS),
            ),
            selected => selected,
        };
        TestPlan {
            latency: latency.map(|n| self.count.unwrap_or(n)),
            bandwidth: bandwidth.map(|n| self.count.unwrap_or(n)),
        }
    }
}

impl TestPlan {
    /// Latency messages actually sent over a channel of `capacity` bytes.
    pub fn latency_messages(&self, capacity: usize) -> usize {
        match self.latency {
            Some(count) if LATENCY_FRAME.fits(capacity) => count as usize,
            _ => 0,
        }
    }

    /// Bandwidth messages actually sent: oversized frames are skipped.
    pub fn bandwidth_messages(&self, capacity: usize) -> usize {
        let frames = BANDWIDTH_FRAMES.iter().filter(|f| f.fits(capacity)).count();
        self.bandwidth.map_or(0, |iterations| iterations as usize * frames)
    }

    /// Messages the guest should expect before stopping.
    pub fn expected_messages(&self, capacity: usize) -> usize {
        self.latency_messages(capacity) + self.bandwidth_messages(capacity)
    }
}

/// Where the channel lives and how this process runs against it.
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportArgs {
    /// Map this file or PCI resource instead of discovering one
    #[arg(short, long, value_name = "PATH")]
    pub device: Option<PathBuf>,

    /// Map the write-combining BAR (resource2_wc)
    #[arg(long)]
    pub wc: bool,

    /// Pin this process to the given CPUs, e.g. "2" or "0-3"
    #[arg(long, value_name = "LIST")]
    pub pin_cpu: Option<String>,
}

impl TransportArgs {
    /// Config with command-line overrides applied.
    pub fn transport_config(&self, config: &TransportConfig) -> TransportConfig {
        let mut config = config.clone();
        config.write_combining |= self.wc;
        if let Some(device) = &self.device {
            config.fallback_path = device.clone();
        }
        config
    }

    /// Pick the transport. With `create`, a missing backing file is made at
    /// the configured region size.
    pub fn transport(&self, config: &TransportConfig, create: bool) -> anyhow::Result<Transport> {
        let config = self.transport_config(config);
        let transport = match &self.device {
            Some(path) if path.starts_with("/sys/") => {
                Transport::PciResource(pci_resource_path(path, config.write_combining))
            }
            Some(path) if !create => Transport::SharedFile(path.clone()),
            _ if create => Transport::create_fallback(&config)
                .context("Failed to create shared memory file")?,
            _ => Transport::discover(&config)?,
        };
        Ok(transport)
    }

    /// Pin first, then map, so the mapping's pages are touched from the
    /// pinned CPU.
    pub fn open_channel(&self, config: &TransportConfig, create: bool) -> anyhow::Result<Channel> {
        if let Some(list) = &self.pin_cpu {
            affinity::pin_current_process(list)?;
        }

        let transport = self.transport(config, create)?;
        let region = transport
            .map()
            .with_context(|| format!("Failed to map {}", transport.path().display()))?;
        let channel = Channel::new(region)?;

        tracing::info!(
            region = %channel.describe(),
            capacity = channel.capacity(),
            "Shared memory mapped"
        );
        Ok(channel)
    }
}

/// An explicit BAR resource, switched to its `_wc` variant when asked.
fn pci_resource_path(path: &Path, write_combining: bool) -> PathBuf {
    let already_wc = path
        .file_name()
        .is_some_and(|name| name.to_string_lossy().ends_with("_wc"));
    if !write_combining || already_wc {
        return path.to_path_buf();
    }
    let config = TransportConfig {
        pci_resource: path.to_path_buf(),
        write_combining,
        ..TransportConfig::default()
    };
    config.resource_path()
}

/// Print every message for short runs, every 100th otherwise.
pub fn should_print(index: usize, total: usize) -> bool {
    total <= 10 || (index + 1) % 100 == 0
}
