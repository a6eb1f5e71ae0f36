// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! perf_event backed counter set.

use std::io;

use crate::error::CounterError;
use crate::perf::{CounterReport, CounterSource, RawCounts};

/// Events the counter set tries to open, in opening order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HwEvent {
    L1Misses,
    L1References,
    LlcMisses,
    LlcReferences,
    TlbMisses,
    CpuCycles,
    Instructions,
    ContextSwitches,
    MemoryStores,
}

impl HwEvent {
    pub const ALL: [HwEvent; 9] = [
        Self::L1Misses,
        Self::L1References,
        Self::LlcMisses,
        Self::LlcReferences,
        Self::TlbMisses,
        Self::CpuCycles,
        Self::Instructions,
        Self::ContextSwitches,
        Self::MemoryStores,
    ];

    pub const fn name(&self) -> &'static str {
        match self {
            Self::L1Misses => "l1d-read-misses",
            Self::L1References => "l1d-read-accesses",
            Self::LlcMisses => "llc-read-misses",
            Self::LlcReferences => "llc-read-accesses",
            Self::TlbMisses => "dtlb-read-misses",
            Self::CpuCycles => "cpu-cycles",
            Self::Instructions => "instructions",
            Self::ContextSwitches => "context-switches",
            Self::MemoryStores => "memory-stores",
        }
    }

    /// Without these the set is reported as unavailable.
    pub const fn is_essential(&self) -> bool {
        matches!(self, Self::L1Misses | Self::CpuCycles | Self::Instructions)
    }
}

/// One opened hardware or software event.
pub trait EventCounter {
    fn enable(&mut self) -> io::Result<()>;
    fn disable(&mut self) -> io::Result<()>;
    fn reset(&mut self) -> io::Result<()>;
    fn read(&mut self) -> io::Result<u64>;
}

/// Every event that could be opened, started and stopped together.
pub struct HardwareCounters<C: EventCounter> {
    counters: Vec<(HwEvent, C)>,
}

impl<C: EventCounter> HardwareCounters<C> {
    /// Open every event through `opener`.
    ///
    /// Optional events that fail are skipped; a failing essential event
    /// fails the whole set.
    pub fn open_with<F>(mut opener: F) -> Result<Self, CounterError>
    where
        F: FnMut(HwEvent) -> io::Result<C>,
    {
        let mut counters = Vec::with_capacity(HwEvent::ALL.len());
        for event in HwEvent::ALL {
            match opener(event) {
                Ok(counter) => counters.push((event, counter)),
                Err(source) if event.is_essential() => {
                    return Err(CounterError::EssentialUnavailable {
                        event: event.name(),
                        source,
                    });
                }
                Err(e) => {
                    tracing::debug!(event = event.name(), error = %e, "Optional counter unavailable");
                }
            }
        }
        Ok(Self { counters })
    }

    /// Number of events currently open.
    pub fn opened(&self) -> usize {
        self.counters.len()
    }
}

impl<C: EventCounter> CounterSource for HardwareCounters<C> {
    fn name(&self) -> &'static str {
        "perf_event"
    }

    fn is_available(&self) -> bool {
        !self.counters.is_empty()
    }

    fn start(&mut self) {
        for (event, counter) in &mut self.counters {
            if let Err(e) = counter.reset().and_then(|_| counter.enable()) {
                tracing::debug!(event = event.name(), error = %e, "Counter start failed");
            }
        }
    }

    fn stop(&mut self, byte_count: usize) -> CounterReport {
        // Disable everything first so the reads do not count themselves.
        for (event, counter) in &mut self.counters {
            if let Err(e) = counter.disable() {
                tracing::debug!(event = event.name(), error = %e, "Counter stop failed");
            }
        }

        let mut raw = RawCounts::default();
        for (event, counter) in &mut self.counters {
            match counter.read() {
                Ok(value) => raw.set(*event, value),
                Err(e) => tracing::debug!(event = event.name(), error = %e, "Counter read failed"),
            }
        }
        CounterReport::derive(raw, byte_count)
    }

    fn close(&mut self) {
        self.counters.clear();
    }
}

#[cfg(target_os = "linux")]
mod linux {
    use std::io;

    use perf_event::events::{Cache, CacheId, CacheOp, CacheResult, Hardware, Software};
    use perf_event::{Builder, Counter};

    use super::{EventCounter, HwEvent};

    impl EventCounter for Counter {
        fn enable(&mut self) -> io::Result<()> {
            Counter::enable(self)
        }

        fn disable(&mut self) -> io::Result<()> {
            Counter::disable(self)
        }

        fn reset(&mut self) -> io::Result<()> {
            Counter::reset(self)
        }

        fn read(&mut self) -> io::Result<u64> {
            Counter::read(self)
        }
    }

    fn cache(which: CacheId, operation: CacheOp, result: CacheResult) -> Cache {
        Cache {
            which,
            operation,
            result,
        }
    }

    /// Open one event for the calling process on any CPU.
    pub(super) fn open_event(event: HwEvent) -> io::Result<Counter> {
        match event {
            HwEvent::L1Misses => {
                Builder::new(cache(CacheId::L1D, CacheOp::READ, CacheResult::MISS)).build()
            }
            HwEvent::L1References => {
                Builder::new(cache(CacheId::L1D, CacheOp::READ, CacheResult::ACCESS)).build()
            }
            HwEvent::MemoryStores => {
                Builder::new(cache(CacheId::L1D, CacheOp::WRITE, CacheResult::ACCESS)).build()
            }
            HwEvent::LlcMisses => {
                Builder::new(cache(CacheId::LL, CacheOp::READ, CacheResult::MISS)).build()
            }
            HwEvent::LlcReferences => {
                Builder::new(cache(CacheId::LL, CacheOp::READ, CacheResult::ACCESS)).build()
            }
            HwEvent::TlbMisses => {
                Builder::new(cache(CacheId::DTLB, CacheOp::READ, CacheResult::MISS)).build()
            }
            HwEvent::CpuCycles => Builder::new(Hardware::CPU_CYCLES).build(),
            HwEvent::Instructions => Builder::new(Hardware::INSTRUCTIONS).build(),
            HwEvent::ContextSwitches => Builder::new(Software::CONTEXT_SWITCHES).build(),
        }
    }
}

/// Open the platform counter set.
#[cfg(target_os = "linux")]
pub(crate) fn open() -> Result<HardwareCounters<perf_event::Counter>, CounterError> {
    HardwareCounters::open_with(linux::open_event)
}

/// Open the platform counter set.
#[cfg(not(target_os = "linux"))]
pub(crate) fn open() -> Result<HardwareCounters<Unsupported>, CounterError> {
    Err(CounterError::UnsupportedPlatform)
}

/// Placeholder counter type for platforms without perf_event.
#[cfg(not(target_os = "linux"))]
pub(crate) enum Unsupported {}

#[cfg(not(target_os = "linux"))]
impl EventCounter for Unsupported {
    fn enable(&mut self) -> io::Result<()> {
        match *self {}
    }

    fn disable(&mut self) -> io::Result<()> {
        match *self {}
    }

    fn reset(&mut self) -> io::Result<()> {
        match *self {}
    }

    fn read(&mut self) -> io::Result<u64> {
        match *self {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Counter that reports a fixed value once enabled.
    struct FakeCounter {
        value: u64,
        enabled: bool,
        count: u64,
    }

    impl FakeCounter {
        fn new(value: u64) -> Self {
            Self {
                value,
                enabled: false,
                count: 0,
            }
        }
    }

    impl EventCounter for FakeCounter {
        fn enable(&mut self) -> io::Result<()> {
            self.enabled = true;
            self.count = self.value;
            Ok(())
        }

        fn disable(&mut self) -> io::Result<()> {
            self.enabled = false;
            Ok(())
        }

        fn reset(&mut self) -> io::Result<()> {
            self.count = 0;
            Ok(())
        }

        fn read(&mut self) -> io::Result<u64> {
            Ok(self.count)
        }
    }

    fn denied() -> io::Error {
        io::Error::from(io::ErrorKind::PermissionDenied)
    }

    #[test]
    fn test_essential_failure_fails_the_set() {
        let result = HardwareCounters::open_with(|event| {
            if event == HwEvent::CpuCycles {
                Err(denied())
            } else {
                Ok(FakeCounter::new(1))
            }
        });
        match result {
            Err(CounterError::EssentialUnavailable { event, .. }) => assert_eq!(event, "cpu-cycles"),
            _ => panic!("expected essential counter failure"),
        }
    }

    #[test]
    fn test_optional_failure_is_skipped() {
        let counters = HardwareCounters::open_with(|event| {
            if event == HwEvent::MemoryStores {
                Err(denied())
            } else {
                Ok(FakeCounter::new(10))
            }
        })
        .unwrap();
        assert_eq!(counters.opened(), HwEvent::ALL.len() - 1);
        assert!(counters.is_available());
    }

    #[test]
    fn test_session_reads_and_derives() {
        let mut counters = HardwareCounters::open_with(|event| {
            Ok(FakeCounter::new(match event {
                HwEvent::CpuCycles => 4000,
                HwEvent::Instructions => 2000,
                _ => 10,
            }))
        })
        .unwrap();

        counters.start();
        let report = counters.stop(1000);
        assert_eq!(report.raw.cpu_cycles, 4000);
        assert_eq!(report.raw.memory_loads, report.raw.l1_cache_references);
        assert_eq!(report.instructions_per_cycle, 0.5);
        assert_eq!(report.cycles_per_byte, 4.0);
        assert_eq!(report.l1_miss_rate, 1.0);
    }

    /// Counter whose disable always fails.
    struct Stuck(FakeCounter);

    impl EventCounter for Stuck {
        fn enable(&mut self) -> io::Result<()> {
            self.0.enable()
        }

        fn disable(&mut self) -> io::Result<()> {
            Err(io::Error::from(io::ErrorKind::Other))
        }

        fn reset(&mut self) -> io::Result<()> {
            self.0.reset()
        }

        fn read(&mut self) -> io::Result<u64> {
            self.0.read()
        }
    }

    #[test]
    fn test_failed_disable_still_reads() {
        let mut counters =
            HardwareCounters::open_with(|_| Ok(Stuck(FakeCounter::new(25)))).unwrap();
        counters.start();
        let report = counters.stop(100);
        assert_eq!(report.raw.cpu_cycles, 25);
        assert_eq!(report.raw.l1_cache_misses, 25);
    }

    #[test]
    fn test_close_releases_everything() {
        let mut counters = HardwareCounters::open_with(|_| Ok(FakeCounter::new(5))).unwrap();
        counters.close();
        assert!(!counters.is_available());
        counters.start();
        assert!(counters.stop(100).is_zero());
    }
}
