// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Guest-side phased measurement of one received payload.
//!
//! Phases, in order:
//! 1. warm-up: untimed touch of every line
//! 2. A, hot read: timed touch with the payload cached
//! 3. flush
//! 4. B, cold read: timed touch after the flush
//! 5. flush, then C: timed copy into a private buffer kept across messages
//! 6. D: timed SHA-256 over the private copy
//!
//! One counter session brackets A through C. D is excluded so hashing does
//! not drown the memory events.

pub mod cache;

use std::collections::TryReserveError;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::integrity::{Digest, IntegrityVerifier, Verdict};
use crate::perf::{CounterReport, CounterSource};
use crate::types::ErrorCode;

/// Pipeline switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Probe and use hardware performance counters.
    pub hardware_counters: bool,
    /// Flush the payload out of the cache before phases B and C.
    pub flush_cache: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            hardware_counters: true,
            flush_cache: true,
        }
    }
}

/// Phase durations in nanoseconds on the guest clock.
///
/// A phase that ran is at least 1 ns; 0 means the phase was skipped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTimings {
    pub hot_read_ns: u64,
    pub cold_read_ns: u64,
    pub copy_ns: u64,
    pub verify_ns: u64,
    pub total_ns: u64,
}

impl PhaseTimings {
    /// True if all four measured phases ran.
    pub fn all_phases_ran(&self) -> bool {
        self.hot_read_ns > 0 && self.cold_read_ns > 0 && self.copy_ns > 0 && self.verify_ns > 0
    }

    /// Sum of the four phase durations.
    pub fn phase_sum_ns(&self) -> u64 {
        self.hot_read_ns
            .saturating_add(self.cold_read_ns)
            .saturating_add(self.copy_ns)
            .saturating_add(self.verify_ns)
    }
}

/// Result of one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineReport {
    pub timings: PhaseTimings,
    pub counters: CounterReport,
    pub error: ErrorCode,
    /// `None` when verification never ran.
    pub verdict: Option<Verdict>,
}

/// Elapsed nanoseconds since `start`, never below 1.
pub(crate) fn elapsed_ns(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_nanos())
        .unwrap_or(u64::MAX)
        .max(1)
}

type Reserve = fn(&mut Vec<u8>, usize) -> Result<(), TryReserveError>;

/// Runs the measurement phases over received payloads.
pub struct MeasurementPipeline<S: CounterSource> {
    counters: S,
    flush_cache: bool,
    /// Destination of phase C. Only grows, so its pages are faulted in once.
    copy: Vec<u8>,
    reserve: Reserve,
}

impl<S: CounterSource> MeasurementPipeline<S> {
    pub fn new(counters: S, config: &PipelineConfig) -> Self {
        if config.flush_cache && !cache::flush_supported() {
            tracing::warn!("Cache flush not supported on this target, cold read runs warm");
        }
        Self {
            counters,
            flush_cache: config.flush_cache,
            copy: Vec::new(),
            reserve: Vec::<u8>::try_reserve_exact,
        }
    }

    /// Replace the private buffer reservation, e.g. with one that always fails.
    #[cfg(test)]
    pub(crate) fn with_reserve(mut self, reserve: Reserve) -> Self {
        self.reserve = reserve;
        self
    }

    pub fn counters_available(&self) -> bool {
        self.counters.is_available()
    }

    /// Measure `payload` and verify it against `expected`.
    pub fn run(&mut self, payload: &[u8], expected: &Digest) -> PipelineReport {
        let start = Instant::now();
        let mut timings = PhaseTimings::default();

        cache::touch(payload);

        self.counters.start();

        let phase = Instant::now();
        cache::touch(payload);
        timings.hot_read_ns = elapsed_ns(phase);

        self.flush(payload);

        let phase = Instant::now();
        cache::touch(payload);
        timings.cold_read_ns = elapsed_ns(phase);

        self.flush(payload);

        let len = payload.len();
        if let Err(e) = self.grow_copy_buffer(len) {
            let counters = self.counters.stop(len);
            tracing::error!(size = len, error = %e, "Private buffer allocation failed");
            timings.total_ns = elapsed_ns(start);
            return PipelineReport {
                timings,
                counters,
                error: ErrorCode::AllocationFailed,
                verdict: None,
            };
        }

        let phase = Instant::now();
        self.copy[..len].copy_from_slice(payload);
        std::hint::black_box(&self.copy);
        timings.copy_ns = elapsed_ns(phase);

        let counters = self.counters.stop(payload.len());

        let phase = Instant::now();
        let verdict = IntegrityVerifier::verify(&self.copy[..len], expected);
        timings.verify_ns = elapsed_ns(phase);

        timings.total_ns = elapsed_ns(start);

        let error = if verdict.is_match() {
            ErrorCode::None
        } else {
            ErrorCode::IntegrityMismatch
        };

        PipelineReport {
            timings,
            counters,
            error,
            verdict: Some(verdict),
        }
    }

    /// Release the counter session for good.
    pub fn close(&mut self) {
        self.counters.close();
    }

    /// Grow the private buffer to at least `len` bytes. New pages are
    /// written here, outside the timed copy.
    fn grow_copy_buffer(&mut self, len: usize) -> Result<(), TryReserveError> {
        if self.copy.len() < len {
            let additional = len - self.copy.len();
            (self.reserve)(&mut self.copy, additional)?;
            self.copy.resize(len, 0);
        }
        Ok(())
    }

    fn flush(&self, payload: &[u8]) {
        if self.flush_cache {
            cache::flush(payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perf::NullCounters;

    fn pipeline() -> MeasurementPipeline<NullCounters> {
        MeasurementPipeline::new(NullCounters, &PipelineConfig::default())
    }

    #[test]
    fn test_verified_payload_runs_every_phase() {
        let payload = vec![0xA5u8; 1000];
        let digest = IntegrityVerifier::digest(&payload);
        let report = pipeline().run(&payload, &digest);

        assert_eq!(report.error, ErrorCode::None);
        assert!(report.timings.all_phases_ran());
        assert!(report.timings.total_ns >= report.timings.verify_ns);
        assert!(report.counters.is_zero());
        assert_eq!(report.verdict, Some(Verdict::Match));
    }

    #[test]
    fn test_mismatch_is_reported() {
        let payload = vec![0x11u8; 4096];
        let report = pipeline().run(&payload, &Digest::ZERO);

        assert_eq!(report.error, ErrorCode::IntegrityMismatch);
        assert!(report.timings.all_phases_ran());
        assert!(matches!(report.verdict, Some(Verdict::Mismatch { .. })));
    }

    #[test]
    fn test_empty_payload_still_times_phases() {
        let digest = IntegrityVerifier::digest(&[]);
        let report = pipeline().run(&[], &digest);
        assert_eq!(report.error, ErrorCode::None);
        assert!(report.timings.all_phases_ran());
    }

    #[test]
    fn test_without_flush() {
        let config = PipelineConfig {
            hardware_counters: false,
            flush_cache: false,
        };
        let mut pipeline = MeasurementPipeline::new(NullCounters, &config);
        let payload = vec![7u8; 10_000];
        let digest = IntegrityVerifier::digest(&payload);
        assert_eq!(pipeline.run(&payload, &digest).error, ErrorCode::None);
    }

    fn refuse(buffer: &mut Vec<u8>, _additional: usize) -> Result<(), TryReserveError> {
        buffer.try_reserve_exact(usize::MAX)
    }

    #[test]
    fn test_allocation_failure_skips_copy_and_verify() {
        let payload = vec![0x3Cu8; 2048];
        let digest = IntegrityVerifier::digest(&payload);
        let report = pipeline().with_reserve(refuse).run(&payload, &digest);

        assert_eq!(report.error, ErrorCode::AllocationFailed);
        assert_eq!(report.verdict, None);
        assert!(report.timings.hot_read_ns > 0);
        assert!(report.timings.cold_read_ns > 0);
        assert_eq!(report.timings.copy_ns, 0);
        assert_eq!(report.timings.verify_ns, 0);
        assert!(report.timings.total_ns > 0);
    }

    #[test]
    fn test_copy_buffer_reused_across_messages() {
        let mut pipeline = pipeline();
        let large = vec![1u8; 8192];
        let small = vec![2u8; 100];

        pipeline.run(&large, &IntegrityVerifier::digest(&large));
        let buffer = pipeline.copy.as_ptr();
        assert_eq!(pipeline.copy.len(), 8192);

        // A smaller payload is verified against its own length only
        let report = pipeline.run(&small, &IntegrityVerifier::digest(&small));
        assert_eq!(report.error, ErrorCode::None);
        assert_eq!(pipeline.copy.as_ptr(), buffer);
        assert_eq!(pipeline.copy.len(), 8192);
    }
}
