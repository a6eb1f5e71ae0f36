// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Same-machine memory reference numbers.
//!
//! Reads and copies a frame-sized buffer on the heap and in a POSIX shared
//! memory mapping, cold (after a cache flush) and hot. The channel figures
//! only mean something next to these.

use std::fmt::{self, Write as _};
use std::hint::black_box;

use ivmark_core::pipeline::cache::{flush, touch};
use ivmark_core::shm::SharedMemoryRegion;
use serde::Serialize;

use crate::frames::{PayloadGenerator, LATENCY_FRAME};
use crate::harness::BenchmarkHarness;
use crate::metrics::{mb_per_sec, BenchmarkCategory, BenchmarkResult, LatencyMetrics};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaselineConfig {
    pub size: usize,
    pub iterations: u64,
    pub include_shm: bool,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            size: LATENCY_FRAME.size(),
            iterations: 10,
            include_shm: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    Heap,
    Shm,
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryKind::Heap => write!(f, "Heap"),
            MemoryKind::Shm => write!(f, "SHM"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaselineTest {
    /// One byte per cache line after a flush.
    Stride64Cold,
    ByteCold,
    ByteHot,
    /// Copy out of the buffer into a private heap buffer after a flush.
    MemcpyCold,
    MemcpyHot,
}

impl BaselineTest {
    const HEAP: [BaselineTest; 5] = [
        BaselineTest::Stride64Cold,
        BaselineTest::ByteCold,
        BaselineTest::ByteHot,
        BaselineTest::MemcpyCold,
        BaselineTest::MemcpyHot,
    ];

    const SHM: [BaselineTest; 4] = [
        BaselineTest::Stride64Cold,
        BaselineTest::ByteCold,
        BaselineTest::MemcpyCold,
        BaselineTest::MemcpyHot,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            BaselineTest::Stride64Cold => "stride-64 cold",
            BaselineTest::ByteCold => "byte-by-byte cold",
            BaselineTest::ByteHot => "byte-by-byte hot",
            BaselineTest::MemcpyCold => "memcpy cold",
            BaselineTest::MemcpyHot => "memcpy hot",
        }
    }

    fn notes(&self) -> &'static str {
        match self {
            BaselineTest::Stride64Cold => "one load per line, prefetch-bound",
            BaselineTest::ByteCold | BaselineTest::ByteHot => "every byte summed",
            BaselineTest::MemcpyCold | BaselineTest::MemcpyHot => "copy into private heap",
        }
    }

    fn is_cold(&self) -> bool {
        matches!(
            self,
            BaselineTest::Stride64Cold | BaselineTest::ByteCold | BaselineTest::MemcpyCold
        )
    }
}

/// Buffers one test works on.
struct Workspace<'a> {
    source: &'a mut [u8],
    copy: Vec<u8>,
}

impl Workspace<'_> {
    fn prepare(&mut self, test: BaselineTest) {
        if test.is_cold() {
            flush(self.source);
            flush(&self.copy);
        } else {
            touch(self.source);
            black_box(byte_sum(self.source));
        }
    }

    fn exercise(&mut self, test: BaselineTest) {
        match test {
            BaselineTest::Stride64Cold => {
                black_box(touch(self.source));
            }
            BaselineTest::ByteCold | BaselineTest::ByteHot => {
                black_box(byte_sum(self.source));
            }
            BaselineTest::MemcpyCold | BaselineTest::MemcpyHot => {
                self.copy.copy_from_slice(self.source);
                black_box(&self.copy);
            }
        }
    }
}

fn byte_sum(data: &[u8]) -> u64 {
    data.iter()
        .fold(0u64, |acc, &b| acc.wrapping_add(u64::from(black_box(b))))
}

/// One row of the baseline table.
#[derive(Debug, Clone, Serialize)]
pub struct BaselineResult {
    pub test: BaselineTest,
    pub memory: MemoryKind,
    pub bytes: usize,
    pub latency: LatencyMetrics,
}

impl Serialize for BaselineTest {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl BaselineResult {
    pub fn name(&self) -> String {
        format!("{} {}", self.memory, self.test.label())
    }

    pub fn mean_ms(&self) -> f64 {
        self.latency.mean_ns / 1_000_000.0
    }

    pub fn mb_per_sec(&self) -> f64 {
        mb_per_sec(self.bytes as u64, self.latency.mean_ns as u64)
    }

    pub fn gb_per_sec(&self) -> f64 {
        self.mb_per_sec() / 1024.0
    }

    pub fn into_result(self) -> BenchmarkResult {
        let name = format!(
            "baseline_{}_{}",
            match self.memory {
                MemoryKind::Heap => "heap",
                MemoryKind::Shm => "shm",
            },
            self.test.label().replace(|c: char| c == '-' || c == ' ', "_")
        );
        let samples = self.latency.samples.clone().unwrap_or_default();
        BenchmarkResult::latency(name, BenchmarkCategory::Baseline, samples, true)
            .with_throughput(self.bytes as u64)
            .with_metadata("memory", self.memory)
            .with_metadata("bytes", self.bytes)
            .with_metadata("notes", self.test.notes())
    }
}

fn run_tests(
    harness: &BenchmarkHarness,
    memory: MemoryKind,
    tests: &[BaselineTest],
    source: &mut [u8],
) -> Vec<BaselineResult> {
    let bytes = source.len();
    let mut workspace = Workspace {
        copy: vec![0u8; bytes],
        source,
    };

    tests
        .iter()
        .map(|&test| {
            let samples = harness.run_with_setup(
                &mut workspace,
                |w| w.prepare(test),
                |w| w.exercise(test),
            );
            let result = BaselineResult {
                test,
                memory,
                bytes,
                latency: LatencyMetrics::from_samples(samples, true),
            };
            tracing::debug!(
                test = %result.name(),
                mean_ms = result.mean_ms(),
                mb_per_sec = result.mb_per_sec(),
                "Baseline test finished"
            );
            result
        })
        .collect()
}

/// Run every heap test, then every shm test if a POSIX region can be made.
pub fn run_baseline(config: &BaselineConfig) -> Vec<BaselineResult> {
    let harness = BenchmarkHarness::new().warmup(1).iterations(config.iterations);
    let mut generator = PayloadGenerator::new();

    let mut heap = generator.fill(config.size).to_vec();
    let mut results = run_tests(&harness, MemoryKind::Heap, &BaselineTest::HEAP, &mut heap);

    if !config.include_shm {
        return results;
    }

    let name = format!("ivmark-baseline-{}", std::process::id());
    match SharedMemoryRegion::create(&name, config.size) {
        Ok(region) => {
            // SAFETY: the region is private to this call, mapped read-write for
            // region.size() bytes, and outlives the slice.
            let shm = unsafe { std::slice::from_raw_parts_mut(region.as_ptr(), region.size()) };
            shm[..config.size].copy_from_slice(generator.fill(config.size));
            results.extend(run_tests(
                &harness,
                MemoryKind::Shm,
                &BaselineTest::SHM,
                &mut shm[..config.size],
            ));
        }
        Err(e) => {
            tracing::warn!(error = %e, "Skipping shared memory baseline");
        }
    }

    results
}

/// The console table.
pub fn render_table(results: &[BaselineResult]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<30} {:>11} {:>13} {:>11} Notes",
        "Test", "Time", "Bandwidth", ""
    );
    let _ = writeln!(out, "{}", "-".repeat(90));
    for result in results {
        let _ = writeln!(
            out,
            "{:<30} {:>8.2} ms {:>8.2} MB/s {:>6.2} GB/s {}",
            result.name(),
            result.mean_ms(),
            result.mb_per_sec(),
            result.gb_per_sec(),
            result.test.notes()
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> BaselineConfig {
        BaselineConfig {
            size: 64 * 1024,
            iterations: 3,
            include_shm: false,
        }
    }

    #[test]
    fn test_heap_baseline_runs_every_test() {
        let results = run_baseline(&small());
        assert_eq!(results.len(), 5);
        assert!(results.iter().all(|r| r.memory == MemoryKind::Heap));
        assert!(results.iter().all(|r| r.bytes == 64 * 1024));
        assert!(results.iter().all(|r| r.latency.min_ns > 0));
        assert!(results.iter().all(|r| r.mb_per_sec() > 0.0));
    }

    #[test]
    fn test_shm_baseline_adds_or_skips() {
        let config = BaselineConfig {
            include_shm: true,
            ..small()
        };
        let results = run_baseline(&config);
        let shm = results.iter().filter(|r| r.memory == MemoryKind::Shm).count();
        assert!(shm == 0 || shm == 4, "unexpected shm rows: {}", shm);
    }

    #[test]
    fn test_memcpy_copies_source() {
        let mut source: Vec<u8> = (0..4096u32).map(|i| i as u8).collect();
        let mut workspace = Workspace {
            copy: vec![0u8; 4096],
            source: &mut source,
        };
        workspace.prepare(BaselineTest::MemcpyCold);
        workspace.exercise(BaselineTest::MemcpyCold);
        assert_eq!(workspace.copy[..], workspace.source[..]);
    }

    #[test]
    fn test_byte_sum() {
        assert_eq!(byte_sum(&[1, 2, 3, 250]), 256);
        assert_eq!(byte_sum(&[]), 0);
    }

    #[test]
    fn test_table_and_result() {
        let result = BaselineResult {
            test: BaselineTest::MemcpyHot,
            memory: MemoryKind::Shm,
            bytes: 1024 * 1024,
            latency: LatencyMetrics::from_samples(vec![1_000_000, 1_000_000], true),
        };
        assert_eq!(result.name(), "SHM memcpy hot");
        assert!((result.mb_per_sec() - 1000.0).abs() < 1e-6);

        let table = render_table(std::slice::from_ref(&result));
        assert!(table.contains("SHM memcpy hot"));
        assert!(table.contains("1.00 ms"));

        let json = result.into_result();
        assert_eq!(json.name, "baseline_shm_memcpy_hot");
        assert_eq!(json.category, BenchmarkCategory::Baseline);
        assert!(json.throughput.is_some());
    }
}
