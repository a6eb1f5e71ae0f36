// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Hardware performance counters for bracketed code regions.
//!
//! The pipeline talks to a [`CounterSource`]. On Linux with sufficient
//! privileges that is a [`HardwareCounters`] set backed by `perf_event_open`;
//! everywhere else it is [`NullCounters`], which reports zeros. Counter
//! availability never decides whether a message succeeds.

mod hardware;

pub use hardware::{EventCounter, HardwareCounters, HwEvent};

use serde::{Deserialize, Serialize};

/// Raw event counts for one measured region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCounts {
    pub l1_cache_misses: u64,
    pub l1_cache_references: u64,
    pub llc_misses: u64,
    pub llc_references: u64,
    pub memory_loads: u64,
    pub memory_stores: u64,
    pub tlb_misses: u64,
    pub cpu_cycles: u64,
    pub instructions: u64,
    pub context_switches: u64,
}

impl RawCounts {
    /// Store a count into the field that belongs to `event`.
    ///
    /// L1D read accesses are the load count, so `L1References` fills both
    /// `l1_cache_references` and `memory_loads`.
    pub fn set(&mut self, event: HwEvent, value: u64) {
        let slot = match event {
            HwEvent::L1Misses => &mut self.l1_cache_misses,
            HwEvent::L1References => {
                self.memory_loads = value;
                &mut self.l1_cache_references
            }
            HwEvent::LlcMisses => &mut self.llc_misses,
            HwEvent::LlcReferences => &mut self.llc_references,
            HwEvent::MemoryStores => &mut self.memory_stores,
            HwEvent::TlbMisses => &mut self.tlb_misses,
            HwEvent::CpuCycles => &mut self.cpu_cycles,
            HwEvent::Instructions => &mut self.instructions,
            HwEvent::ContextSwitches => &mut self.context_switches,
        };
        *slot = value;
    }
}

/// Raw counts plus derived rates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CounterReport {
    pub raw: RawCounts,
    pub l1_miss_rate: f64,
    pub llc_miss_rate: f64,
    pub instructions_per_cycle: f64,
    pub cycles_per_byte: f64,
    /// TLB misses per memory operation (loads + stores).
    pub tlb_miss_rate: f64,
}

impl CounterReport {
    /// All-zero report used when counters are unavailable.
    pub fn zeroed() -> Self {
        Self::default()
    }

    /// Derive rates from raw counts. Every ratio is 0 when its denominator is 0.
    pub fn derive(raw: RawCounts, byte_count: usize) -> Self {
        let ratio = |num: u64, den: u64| if den > 0 { num as f64 / den as f64 } else { 0.0 };
        let memory_ops = raw.memory_loads.saturating_add(raw.memory_stores);

        Self {
            raw,
            l1_miss_rate: ratio(raw.l1_cache_misses, raw.l1_cache_references),
            llc_miss_rate: ratio(raw.llc_misses, raw.llc_references),
            instructions_per_cycle: ratio(raw.instructions, raw.cpu_cycles),
            cycles_per_byte: ratio(raw.cpu_cycles, byte_count as u64),
            tlb_miss_rate: ratio(raw.tlb_misses, memory_ops),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.raw == RawCounts::default()
    }
}

/// A set of counters that can bracket a code region.
pub trait CounterSource {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Whether real counts will be produced.
    fn is_available(&self) -> bool;

    /// Reset and enable every counter.
    fn start(&mut self);

    /// Disable, read and derive rates over `byte_count` bytes.
    fn stop(&mut self, byte_count: usize) -> CounterReport;

    /// Release every counter. Later sessions report zeros.
    fn close(&mut self);
}

/// Fallback source that always reports zeros.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCounters;

impl CounterSource for NullCounters {
    fn name(&self) -> &'static str {
        "null"
    }

    fn is_available(&self) -> bool {
        false
    }

    fn start(&mut self) {}

    fn stop(&mut self, _byte_count: usize) -> CounterReport {
        CounterReport::zeroed()
    }

    fn close(&mut self) {}
}

impl<T: CounterSource + ?Sized> CounterSource for Box<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn is_available(&self) -> bool {
        (**self).is_available()
    }

    fn start(&mut self) {
        (**self).start()
    }

    fn stop(&mut self, byte_count: usize) -> CounterReport {
        (**self).stop(byte_count)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Probe the platform and return the best available counter source.
///
/// Falls back to [`NullCounters`] with a warning when hardware counters are
/// disabled, unsupported, or not permitted.
pub fn probe_counters(enabled: bool) -> Box<dyn CounterSource> {
    if !enabled {
        tracing::debug!("Hardware counters disabled by configuration");
        return Box::new(NullCounters);
    }

    match hardware::open() {
        Ok(counters) => {
            tracing::info!(opened = counters.opened(), "Hardware performance counters enabled");
            Box::new(counters)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Hardware counters unavailable, reporting zeros");
            Box::new(NullCounters)
        }
    }
}
