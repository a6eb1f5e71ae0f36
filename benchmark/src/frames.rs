// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Test frames and random payload generation.

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use serde::Serialize;

use crate::metrics::MIB;

/// An uncompressed video frame used as a transfer payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameSpec {
    pub name: &'static str,
    pub width: usize,
    pub height: usize,
    pub bytes_per_pixel: usize,
}

impl FrameSpec {
    pub const fn rgb(name: &'static str, width: usize, height: usize) -> Self {
        Self {
            name,
            width,
            height,
            bytes_per_pixel: 3,
        }
    }

    pub const fn size(&self) -> usize {
        self.width * self.height * self.bytes_per_pixel
    }

    pub fn size_mb(&self) -> f64 {
        self.size() as f64 / MIB
    }

    pub fn fits(&self, capacity: usize) -> bool {
        self.size() <= capacity
    }
}

pub const FRAME_1080P: FrameSpec = FrameSpec::rgb("1080p", 1920, 1080);
pub const FRAME_1440P: FrameSpec = FrameSpec::rgb("1440p", 2560, 1440);
pub const FRAME_4K: FrameSpec = FrameSpec::rgb("4K", 3840, 2160);

/// Frame sent by the latency test.
pub const LATENCY_FRAME: FrameSpec = FRAME_4K;

/// Frames swept by the bandwidth test, smallest first.
pub const BANDWIDTH_FRAMES: [FrameSpec; 3] = [FRAME_1080P, FRAME_1440P, FRAME_4K];

/// Fresh random bytes per message so no two payloads share cache-friendly
/// structure.
pub struct PayloadGenerator {
    rng: StdRng,
    buffer: Vec<u8>,
}

impl PayloadGenerator {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Reproducible payloads.
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            rng,
            buffer: Vec::new(),
        }
    }

    /// Refill the internal buffer with `len` random bytes.
    pub fn fill(&mut self, len: usize) -> &[u8] {
        self.buffer.resize(len, 0);
        self.rng.fill_bytes(&mut self.buffer);
        &self.buffer
    }

    /// Offset of the byte to flip when corrupting a `len`-byte payload.
    pub fn corruption_offset(&mut self, len: usize) -> usize {
        if len == 0 {
            0
        } else {
            self.rng.gen_range(0..len)
        }
    }
}

impl Default for PayloadGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_sizes() {
        assert_eq!(FRAME_4K.size(), 24_883_200);
        assert_eq!(FRAME_1080P.size(), 6_220_800);
        assert_eq!(FRAME_1440P.size(), 11_059_200);
        assert!((FRAME_4K.size_mb() - 23.73).abs() < 0.01);
    }

    #[test]
    fn test_every_frame_fits_default_region() {
        let capacity = ivmark_core::shm::DEFAULT_REGION_SIZE - ivmark_core::shm::HEADER_SIZE;
        assert!(BANDWIDTH_FRAMES.iter().all(|f| f.fits(capacity)));
        assert!(!FRAME_4K.fits(FRAME_4K.size() - 1));
    }

    #[test]
    fn test_payloads_differ_between_messages() {
        let mut generator = PayloadGenerator::seeded(7);
        let first = generator.fill(4096).to_vec();
        let second = generator.fill(4096).to_vec();
        assert_eq!(first.len(), 4096);
        assert_ne!(first, second);
    }

    #[test]
    fn test_seeded_generator_is_reproducible() {
        let a = PayloadGenerator::seeded(42).fill(256).to_vec();
        let b = PayloadGenerator::seeded(42).fill(256).to_vec();
        assert_eq!(a, b);
    }

    #[test]
    fn test_corruption_offset_in_range() {
        let mut generator = PayloadGenerator::seeded(1);
        for _ in 0..100 {
            assert!(generator.corruption_offset(10) < 10);
        }
        assert_eq!(generator.corruption_offset(0), 0);
    }
}
