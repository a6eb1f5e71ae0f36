// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Benchmark harness for running and timing operations.
//!
//! Provides utilities for measuring execution time with high precision
//! and collecting samples for statistical analysis.

use std::time::Instant;

/// A benchmark harness for measuring operation latency.
pub struct BenchmarkHarness {
    /// Number of warmup iterations before measurement
    warmup_iterations: u64,
    /// Number of measurement iterations
    measurement_iterations: u64,
}

impl BenchmarkHarness {
    /// Create a new benchmark harness with default settings.
    pub fn new() -> Self {
        Self {
            warmup_iterations: 1,
            measurement_iterations: 10,
        }
    }

    /// Set the number of warmup iterations.
    pub fn warmup(mut self, iterations: u64) -> Self {
        self.warmup_iterations = iterations;
        self
    }

    /// Set the number of measurement iterations.
    pub fn iterations(mut self, iterations: u64) -> Self {
        self.measurement_iterations = iterations;
        self
    }

    /// Run a benchmark whose iterations need untimed preparation.
    ///
    /// `setup` runs before every iteration and both closures share `state`.
    /// Only the operation time is measured.
    pub fn run_with_setup<T, S, O>(&self, state: &mut T, mut setup: S, mut operation: O) -> Vec<u64>
    where
        T: ?Sized,
        S: FnMut(&mut T),
        O: FnMut(&mut T),
    {
        for _ in 0..self.warmup_iterations {
            setup(state);
            operation(state);
        }

        let mut samples = Vec::with_capacity(self.measurement_iterations as usize);
        for _ in 0..self.measurement_iterations {
            setup(state);

            let start = Instant::now();
            operation(state);
            samples.push(elapsed_ns(start));
        }

        samples
    }
}

impl Default for BenchmarkHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn elapsed_ns(start: Instant) -> u64 {
    (start.elapsed().as_nanos() as u64).max(1)
}
