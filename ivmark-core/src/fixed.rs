// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Conversion between in-process measurement types and their channel form.
//!
//! Rates are `f64` everywhere except in shared memory, where they are
//! unsigned integers scaled by [`SCALE`]. This is the only place that
//! scaling happens.

use crate::perf::{CounterReport, RawCounts};
use crate::pipeline::PhaseTimings;
use crate::protocol::GuestTiming;
use crate::shm::{CounterWire, TimingWire};

/// Fixed-point scale for rates in shared memory (1250 = 0.125).
pub const SCALE: f64 = 10_000.0;

/// Encode a rate. NaN and negatives become 0, overflow saturates.
pub fn encode(value: f64) -> u32 {
    if value.is_nan() || value <= 0.0 {
        return 0;
    }
    let scaled = (value * SCALE).round();
    if scaled >= u32::MAX as f64 {
        u32::MAX
    } else {
        scaled as u32
    }
}

pub fn decode(raw: u32) -> f64 {
    raw as f64 / SCALE
}

pub fn encode_counters(report: &CounterReport) -> CounterWire {
    let raw = &report.raw;
    CounterWire {
        l1_cache_misses: raw.l1_cache_misses,
        l1_cache_references: raw.l1_cache_references,
        llc_misses: raw.llc_misses,
        llc_references: raw.llc_references,
        memory_loads: raw.memory_loads,
        memory_stores: raw.memory_stores,
        tlb_misses: raw.tlb_misses,
        cpu_cycles: raw.cpu_cycles,
        instructions: raw.instructions,
        context_switches: raw.context_switches,
        l1_miss_rate_x10000: encode(report.l1_miss_rate),
        llc_miss_rate_x10000: encode(report.llc_miss_rate),
        instructions_per_cycle_x10000: encode(report.instructions_per_cycle),
        cycles_per_byte_x10000: encode(report.cycles_per_byte),
        tlb_miss_rate_x10000: encode(report.tlb_miss_rate),
    }
}

pub fn decode_counters(wire: &CounterWire) -> CounterReport {
    CounterReport {
        raw: RawCounts {
            l1_cache_misses: wire.l1_cache_misses,
            l1_cache_references: wire.l1_cache_references,
            llc_misses: wire.llc_misses,
            llc_references: wire.llc_references,
            memory_loads: wire.memory_loads,
            memory_stores: wire.memory_stores,
            tlb_misses: wire.tlb_misses,
            cpu_cycles: wire.cpu_cycles,
            instructions: wire.instructions,
            context_switches: wire.context_switches,
        },
        l1_miss_rate: decode(wire.l1_miss_rate_x10000),
        llc_miss_rate: decode(wire.llc_miss_rate_x10000),
        instructions_per_cycle: decode(wire.instructions_per_cycle_x10000),
        cycles_per_byte: decode(wire.cycles_per_byte_x10000),
        tlb_miss_rate: decode(wire.tlb_miss_rate_x10000),
    }
}

pub fn encode_timing(phases: &PhaseTimings, counters: &CounterReport) -> TimingWire {
    TimingWire {
        hot_read_ns: phases.hot_read_ns,
        cold_read_ns: phases.cold_read_ns,
        copy_ns: phases.copy_ns,
        verify_ns: phases.verify_ns,
        total_ns: phases.total_ns,
        counters: encode_counters(counters),
    }
}

pub fn decode_timing(wire: &TimingWire) -> GuestTiming {
    GuestTiming {
        phases: PhaseTimings {
            hot_read_ns: wire.hot_read_ns,
            cold_read_ns: wire.cold_read_ns,
            copy_ns: wire.copy_ns,
            verify_ns: wire.verify_ns,
            total_ns: wire.total_ns,
        },
        counters: decode_counters(&wire.counters),
    }
}
