// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Cache-line granular touch and flush helpers.

use std::sync::atomic::{fence, Ordering};

use crate::shm::CACHE_LINE_SIZE;

/// Read one byte of every cache line so the whole buffer is pulled in.
///
/// Returns a fold of the bytes read so the loads cannot be elided.
pub fn touch(data: &[u8]) -> u8 {
    let base = data.as_ptr();
    let mut acc = 0u8;
    for offset in (0..data.len()).step_by(CACHE_LINE_SIZE) {
        // SAFETY: offset < data.len()
        acc ^= unsafe { base.add(offset).read_volatile() };
    }
    std::hint::black_box(acc)
}

/// Evict every cache line of `data` and wait for the evictions to land.
///
/// Only x86_64 has an unprivileged flush instruction; other targets get the
/// fence alone and the cold-read phase measures a warm cache there.
pub fn flush(data: &[u8]) {
    #[cfg(target_arch = "x86_64")]
    {
        use std::arch::x86_64::{_mm_clflush, _mm_mfence};

        let base = data.as_ptr();
        for offset in (0..data.len()).step_by(CACHE_LINE_SIZE) {
            // SAFETY: offset < data.len(); clflush is baseline on x86_64
            unsafe { _mm_clflush(base.add(offset)) };
        }
        // SAFETY: mfence is baseline on x86_64
        unsafe { _mm_mfence() };
    }

    #[cfg(not(target_arch = "x86_64"))]
    let _ = data;

    fence(Ordering::SeqCst);
}

/// Whether [`flush`] actually evicts lines on this target.
pub const fn flush_supported() -> bool {
    cfg!(target_arch = "x86_64")
}
