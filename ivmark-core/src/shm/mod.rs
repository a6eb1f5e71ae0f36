// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Shared memory module.
//!
//! Mapped regions, transport discovery and the fixed channel layout that
//! host and guest exchange messages through.

mod channel;
mod region;
mod transport;

pub use channel::{
    Channel, ChannelSnapshot, CounterWire, StateWrite, TimingWire, CACHE_LINE_SIZE,
    CHANNEL_MAGIC, HEADER_SIZE,
};
pub use region::SharedMemoryRegion;
pub use transport::{
    Transport, TransportConfig, DEFAULT_PCI_RESOURCE, DEFAULT_REGION_SIZE, DEFAULT_SHM_PATH,
};
