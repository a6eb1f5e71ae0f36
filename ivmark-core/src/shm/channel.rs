// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Fixed binary layout of the host/guest channel.
//!
//! The header is a `#[repr(C)]` record of atomics placed at offset 0 of the
//! shared region, followed by the payload buffer at a cache-line aligned
//! offset. Both endpoints compile the same layout; the assertions at the
//! bottom of this file pin every offset so a layout change breaks the build
//! instead of the wire format.
//!
//! Ordering discipline: every update batch writes its data fields with
//! relaxed stores, issues a full fence, and only then publishes the owning
//! side's state field with a release store. Readers load state with acquire
//! ordering before touching anything else.

use std::mem::{offset_of, size_of};
use std::sync::atomic::{fence, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::thread::ThreadId;

use crate::error::SharedMemoryError;
use crate::integrity::{Digest, DIGEST_LEN};
use crate::shm::SharedMemoryRegion;
use crate::state::{GuestState, HostState, StateField};
use crate::types::ErrorCode;

/// Value of `magic` once the host has finished initializing the header.
pub const CHANNEL_MAGIC: u32 = 0xDEAD_BEEF;

/// Cache line size assumed for buffer alignment and flushing.
pub const CACHE_LINE_SIZE: usize = 64;

/// Hardware counter snapshot as stored in shared memory.
///
/// Rates are fixed-point integers scaled by 10,000; no floating point
/// ever crosses the boundary.
#[repr(C)]
pub struct CounterBlock {
    l1_cache_misses: AtomicU64,
    l1_cache_references: AtomicU64,
    llc_misses: AtomicU64,
    llc_references: AtomicU64,
    memory_loads: AtomicU64,
    memory_stores: AtomicU64,
    tlb_misses: AtomicU64,
    cpu_cycles: AtomicU64,
    instructions: AtomicU64,
    context_switches: AtomicU64,
    l1_miss_rate_x10000: AtomicU32,
    llc_miss_rate_x10000: AtomicU32,
    instructions_per_cycle_x10000: AtomicU32,
    cycles_per_byte_x10000: AtomicU32,
    tlb_miss_rate_x10000: AtomicU32,
    _reserved: AtomicU32,
}

/// Guest-measured durations in nanoseconds on the guest clock.
#[repr(C)]
pub struct TimingBlock {
    hot_read_ns: AtomicU64,
    cold_read_ns: AtomicU64,
    copy_ns: AtomicU64,
    verify_ns: AtomicU64,
    total_ns: AtomicU64,
    counters: CounterBlock,
    _reserved: AtomicU64,
}

/// Channel header at offset 0 of the shared region.
#[repr(C, align(64))]
pub struct ChannelHeader {
    magic: AtomicU32,
    test_complete: AtomicU32,
    host_state: AtomicU32,
    guest_state: AtomicU32,
    sequence: AtomicU32,
    data_size: AtomicU32,
    data_digest: [AtomicU64; DIGEST_LEN / 8],
    error_code: AtomicU32,
    _pad: AtomicU32,
    timing: TimingBlock,
}

/// Size of the header, which is also the payload buffer offset.
pub const HEADER_SIZE: usize = size_of::<ChannelHeader>();

/// Plain copy of [`CounterBlock`] values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterWire {
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
    pub l1_miss_rate_x10000: u32,
    pub llc_miss_rate_x10000: u32,
    pub instructions_per_cycle_x10000: u32,
    pub cycles_per_byte_x10000: u32,
    pub tlb_miss_rate_x10000: u32,
}

/// Plain copy of [`TimingBlock`] values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimingWire {
    pub hot_read_ns: u64,
    pub cold_read_ns: u64,
    pub copy_ns: u64,
    pub verify_ns: u64,
    pub total_ns: u64,
    pub counters: CounterWire,
}

/// One recorded write to a state field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateWrite {
    pub field: StateField,
    pub from: u32,
    pub to: u32,
    pub writer: ThreadId,
}

/// Point-in-time view of the header for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSnapshot {
    pub magic: u32,
    pub test_complete: bool,
    pub host_state: u32,
    pub guest_state: u32,
    pub sequence: u32,
    pub data_size: u32,
    pub error_code: u32,
    pub capacity: usize,
}

/// The shared channel: header plus payload buffer over a mapped region.
///
/// Read accessors are public. Writers are crate-private and only the
/// protocol endpoints call them, the host for host-owned fields and the
/// guest for guest-owned fields.
pub struct Channel {
    region: SharedMemoryRegion,
    trace: Option<Mutex<Vec<StateWrite>>>,
}

impl Channel {
    /// Wrap a mapped region. The region must hold the header plus at least
    /// one cache line of payload.
    pub fn new(region: SharedMemoryRegion) -> Result<Self, SharedMemoryError> {
        let min = HEADER_SIZE + CACHE_LINE_SIZE;
        if region.size() < min {
            return Err(SharedMemoryError::RegionTooSmall {
                size: region.size(),
                min,
            });
        }
        if region.as_ptr() as usize % CACHE_LINE_SIZE != 0 {
            return Err(SharedMemoryError::MapFailed {
                reason: "Region is not cache-line aligned".to_string(),
            });
        }

        tracing::debug!(
            region = %region.describe(),
            header_size = HEADER_SIZE,
            capacity = region.size() - HEADER_SIZE,
            "Channel mapped"
        );

        Ok(Self {
            region,
            trace: None,
        })
    }

    /// Record every state-field write from now on.
    pub fn with_state_trace(mut self) -> Self {
        self.trace = Some(Mutex::new(Vec::new()));
        self
    }

    /// State-field writes recorded so far (empty when tracing is off).
    pub fn state_trace(&self) -> Vec<StateWrite> {
        match &self.trace {
            Some(trace) => trace.lock().map(|t| t.clone()).unwrap_or_default(),
            None => Vec::new(),
        }
    }

    fn header(&self) -> &ChannelHeader {
        // SAFETY: the region is at least HEADER_SIZE bytes, 64-byte aligned
        // (checked in new), and every header field is an atomic.
        unsafe { &*(self.region.as_ptr() as *const ChannelHeader) }
    }

    /// Payload capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.region.size() - HEADER_SIZE
    }

    /// Description of the backing region.
    pub fn describe(&self) -> String {
        self.region.describe()
    }

    // =========================================================================
    // Readers
    // =========================================================================

    pub fn magic(&self) -> u32 {
        self.header().magic.load(Ordering::Acquire)
    }

    /// True once the host has published a consistent, zeroed header.
    pub fn is_open(&self) -> bool {
        self.magic() == CHANNEL_MAGIC
    }

    pub fn is_complete(&self) -> bool {
        self.header().test_complete.load(Ordering::Acquire) != 0
    }

    pub fn host_state_raw(&self) -> u32 {
        self.header().host_state.load(Ordering::Acquire)
    }

    pub fn guest_state_raw(&self) -> u32 {
        self.header().guest_state.load(Ordering::Acquire)
    }

    /// Host state, or `None` if the field holds an unknown value.
    pub fn host_state(&self) -> Option<HostState> {
        HostState::from_raw(self.host_state_raw())
    }

    /// Guest state, or `None` if the field holds an unknown value.
    pub fn guest_state(&self) -> Option<GuestState> {
        GuestState::from_raw(self.guest_state_raw())
    }

    pub fn sequence(&self) -> u32 {
        self.header().sequence.load(Ordering::Relaxed)
    }

    pub fn data_size(&self) -> u32 {
        self.header().data_size.load(Ordering::Relaxed)
    }

    pub fn digest(&self) -> Digest {
        let mut bytes = [0u8; DIGEST_LEN];
        for (chunk, word) in bytes.chunks_exact_mut(8).zip(&self.header().data_digest) {
            chunk.copy_from_slice(&word.load(Ordering::Relaxed).to_ne_bytes());
        }
        Digest::from_bytes(bytes)
    }

    pub fn error_code(&self) -> ErrorCode {
        ErrorCode::from_raw(self.header().error_code.load(Ordering::Relaxed))
    }

    /// Copy the guest timing record out of shared memory.
    pub fn read_timing(&self) -> TimingWire {
        let t = &self.header().timing;
        let c = &t.counters;
        TimingWire {
            hot_read_ns: t.hot_read_ns.load(Ordering::Relaxed),
            cold_read_ns: t.cold_read_ns.load(Ordering::Relaxed),
            copy_ns: t.copy_ns.load(Ordering::Relaxed),
            verify_ns: t.verify_ns.load(Ordering::Relaxed),
            total_ns: t.total_ns.load(Ordering::Relaxed),
            counters: CounterWire {
                l1_cache_misses: c.l1_cache_misses.load(Ordering::Relaxed),
                l1_cache_references: c.l1_cache_references.load(Ordering::Relaxed),
                llc_misses: c.llc_misses.load(Ordering::Relaxed),
                llc_references: c.llc_references.load(Ordering::Relaxed),
                memory_loads: c.memory_loads.load(Ordering::Relaxed),
                memory_stores: c.memory_stores.load(Ordering::Relaxed),
                tlb_misses: c.tlb_misses.load(Ordering::Relaxed),
                cpu_cycles: c.cpu_cycles.load(Ordering::Relaxed),
                instructions: c.instructions.load(Ordering::Relaxed),
                context_switches: c.context_switches.load(Ordering::Relaxed),
                l1_miss_rate_x10000: c.l1_miss_rate_x10000.load(Ordering::Relaxed),
                llc_miss_rate_x10000: c.llc_miss_rate_x10000.load(Ordering::Relaxed),
                instructions_per_cycle_x10000: c
                    .instructions_per_cycle_x10000
                    .load(Ordering::Relaxed),
                cycles_per_byte_x10000: c.cycles_per_byte_x10000.load(Ordering::Relaxed),
                tlb_miss_rate_x10000: c.tlb_miss_rate_x10000.load(Ordering::Relaxed),
            },
        }
    }

    pub fn snapshot(&self) -> ChannelSnapshot {
        ChannelSnapshot {
            magic: self.magic(),
            test_complete: self.is_complete(),
            host_state: self.host_state_raw(),
            guest_state: self.guest_state_raw(),
            sequence: self.sequence(),
            data_size: self.data_size(),
            error_code: self.error_code().to_raw(),
            capacity: self.capacity(),
        }
    }

    /// Payload bytes as currently resident in the buffer.
    ///
    /// # Safety
    /// The caller must own the buffer under the protocol (guest while
    /// PROCESSING, host while not SENDING) and `len <= capacity()`.
    pub unsafe fn payload(&self, len: usize) -> &[u8] {
        debug_assert!(len <= self.capacity());
        std::slice::from_raw_parts(self.region.as_ptr().add(HEADER_SIZE), len)
    }

    // =========================================================================
    // Writers (crate-private, called by the endpoint that owns the field)
    // =========================================================================

    /// Mutable view of the payload buffer for the host.
    ///
    /// # Safety
    /// Only the host may call this, and only while its state is not SENDING.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn payload_mut(&self, len: usize) -> &mut [u8] {
        debug_assert!(len <= self.capacity());
        std::slice::from_raw_parts_mut(self.region.as_ptr().add(HEADER_SIZE), len)
    }

    /// Full memory fence between data writes and the publishing state write.
    pub(crate) fn fence(&self) {
        fence(Ordering::SeqCst);
    }

    pub(crate) fn set_magic(&self, value: u32) {
        self.header().magic.store(value, Ordering::Release);
    }

    pub(crate) fn set_complete(&self, complete: bool) {
        self.header()
            .test_complete
            .store(u32::from(complete), Ordering::Release);
    }

    /// Publish a new host state. Must be the last write of an update batch.
    pub(crate) fn publish_host_state(&self, state: HostState) {
        self.fence();
        let from = self.header().host_state.swap(state as u32, Ordering::AcqRel);
        self.fence();
        self.record(StateField::Host, from, state as u32);
    }

    /// Publish a new guest state. Must be the last write of an update batch.
    pub(crate) fn publish_guest_state(&self, state: GuestState) {
        self.fence();
        let from = self
            .header()
            .guest_state
            .swap(state as u32, Ordering::AcqRel);
        self.fence();
        self.record(StateField::Guest, from, state as u32);
    }

    fn record(&self, field: StateField, from: u32, to: u32) {
        if let Some(trace) = &self.trace {
            if let Ok(mut trace) = trace.lock() {
                trace.push(StateWrite {
                    field,
                    from,
                    to,
                    writer: std::thread::current().id(),
                });
            }
        }
    }

    /// Zero every host-owned header field except `magic` and the states.
    pub(crate) fn reset_header(&self) {
        let h = self.header();
        h.sequence.store(0, Ordering::Relaxed);
        h.data_size.store(0, Ordering::Relaxed);
        h.error_code.store(0, Ordering::Relaxed);
        h.test_complete.store(0, Ordering::Relaxed);
        self.write_digest(&Digest::ZERO);
        self.write_timing(&TimingWire::default());
    }

    /// Host: describe the message about to be published.
    pub(crate) fn write_message_header(&self, sequence: u32, data_size: u32, digest: &Digest) {
        let h = self.header();
        h.sequence.store(sequence, Ordering::Relaxed);
        h.data_size.store(data_size, Ordering::Relaxed);
        self.write_digest(digest);
    }

    /// Host: clear the previous message's results before reusing the channel.
    pub(crate) fn clear_results(&self) {
        self.header().error_code.store(0, Ordering::Relaxed);
        self.write_timing(&TimingWire::default());
    }

    /// Guest: write measured results for the host.
    pub(crate) fn write_results(&self, timing: &TimingWire, error: ErrorCode) {
        self.write_timing(timing);
        self.header()
            .error_code
            .store(error.to_raw(), Ordering::Relaxed);
    }

    fn write_digest(&self, digest: &Digest) {
        for (chunk, word) in digest
            .as_bytes()
            .chunks_exact(8)
            .zip(&self.header().data_digest)
        {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(chunk);
            word.store(u64::from_ne_bytes(bytes), Ordering::Relaxed);
        }
    }

    fn write_timing(&self, wire: &TimingWire) {
        let t = &self.header().timing;
        let c = &t.counters;
        let w = &wire.counters;
        t.hot_read_ns.store(wire.hot_read_ns, Ordering::Relaxed);
        t.cold_read_ns.store(wire.cold_read_ns, Ordering::Relaxed);
        t.copy_ns.store(wire.copy_ns, Ordering::Relaxed);
        t.verify_ns.store(wire.verify_ns, Ordering::Relaxed);
        t.total_ns.store(wire.total_ns, Ordering::Relaxed);
        c.l1_cache_misses.store(w.l1_cache_misses, Ordering::Relaxed);
        c.l1_cache_references
            .store(w.l1_cache_references, Ordering::Relaxed);
        c.llc_misses.store(w.llc_misses, Ordering::Relaxed);
        c.llc_references.store(w.llc_references, Ordering::Relaxed);
        c.memory_loads.store(w.memory_loads, Ordering::Relaxed);
        c.memory_stores.store(w.memory_stores, Ordering::Relaxed);
        c.tlb_misses.store(w.tlb_misses, Ordering::Relaxed);
        c.cpu_cycles.store(w.cpu_cycles, Ordering::Relaxed);
        c.instructions.store(w.instructions, Ordering::Relaxed);
        c.context_switches.store(w.context_switches, Ordering::Relaxed);
        c.l1_miss_rate_x10000
            .store(w.l1_miss_rate_x10000, Ordering::Relaxed);
        c.llc_miss_rate_x10000
            .store(w.llc_miss_rate_x10000, Ordering::Relaxed);
        c.instructions_per_cycle_x10000
            .store(w.instructions_per_cycle_x10000, Ordering::Relaxed);
        c.cycles_per_byte_x10000
            .store(w.cycles_per_byte_x10000, Ordering::Relaxed);
        c.tlb_miss_rate_x10000
            .store(w.tlb_miss_rate_x10000, Ordering::Relaxed);
    }
}

// Wire layout. Changing any of these breaks compatibility with peers built
// from an older tree.
const _: () = {
    assert!(offset_of!(ChannelHeader, magic) == 0);
    assert!(offset_of!(ChannelHeader, test_complete) == 4);
    assert!(offset_of!(ChannelHeader, host_state) == 8);
    assert!(offset_of!(ChannelHeader, guest_state) == 12);
    assert!(offset_of!(ChannelHeader, sequence) == 16);
    assert!(offset_of!(ChannelHeader, data_size) == 20);
    assert!(offset_of!(ChannelHeader, data_digest) == 24);
    assert!(offset_of!(ChannelHeader, error_code) == 56);
    assert!(offset_of!(ChannelHeader, timing) == 64);
    assert!(size_of::<CounterBlock>() == 104);
    assert!(size_of::<TimingBlock>() == 152);
    assert!(HEADER_SIZE == 256);
    assert!(HEADER_SIZE % CACHE_LINE_SIZE == 0);
};
