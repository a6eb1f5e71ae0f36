// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Small value types shared by both endpoints.

use std::fmt;

use serde::{Deserialize, Serialize};

/// First sequence number used by bandwidth messages.
///
/// Latency messages count up from zero; bandwidth messages are tagged so a
/// guest log can tell the two test modes apart.
pub const BANDWIDTH_SEQUENCE_BASE: u32 = 0xFFFF;

/// Guest-reported processing outcome, stored in the channel's `error_code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Message processed and verified.
    None,
    /// Digest of the received payload did not match the host digest.
    IntegrityMismatch,
    /// The private measurement buffer could not be allocated.
    AllocationFailed,
    /// `data_size` exceeded the channel capacity.
    PayloadTooLarge,
    /// A value this build does not know about.
    Unknown(u32),
}

impl ErrorCode {
    /// Raw value written into shared memory.
    pub const fn to_raw(self) -> u32 {
        match self {
            Self::None => 0,
            Self::IntegrityMismatch => 1,
            Self::AllocationFailed => 2,
            Self::PayloadTooLarge => 3,
            Self::Unknown(value) => value,
        }
    }

    /// Decode a raw value read from shared memory.
    pub const fn from_raw(value: u32) -> Self {
        match value {
            0 => Self::None,
            1 => Self::IntegrityMismatch,
            2 => Self::AllocationFailed,
            3 => Self::PayloadTooLarge,
            other => Self::Unknown(other),
        }
    }

    pub const fn is_error(self) -> bool {
        !matches!(self, Self::None)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::IntegrityMismatch => write!(f, "integrity mismatch"),
            Self::AllocationFailed => write!(f, "allocation failed"),
            Self::PayloadTooLarge => write!(f, "payload too large"),
            Self::Unknown(value) => write!(f, "unknown error {}", value),
        }
    }
}

/// Test mode a message belongs to, derived from its sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Latency,
    Bandwidth,
}

impl MessageKind {
    /// Sequence number for the given iteration of this mode.
    pub fn sequence(self, iteration: u32) -> u32 {
        match self {
            Self::Latency => iteration,
            Self::Bandwidth => BANDWIDTH_SEQUENCE_BASE.wrapping_add(iteration),
        }
    }

    /// Mode of a received sequence number. Latency runs are limited to
    /// `BANDWIDTH_SEQUENCE_BASE` messages so the two ranges never overlap.
    pub fn classify(sequence: u32) -> Self {
        if sequence >= BANDWIDTH_SEQUENCE_BASE {
            Self::Bandwidth
        } else {
            Self::Latency
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latency => write!(f, "latency"),
            Self::Bandwidth => write!(f, "bandwidth"),
        }
    }
}

/// How the host derives notification overhead from a round trip.
///
/// Both variants clamp at zero; the guest clock and the host clock are never
/// compared directly, only durations are subtracted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverheadFormula {
    /// `roundtrip - guest_total`
    #[default]
    GuestTotal,
    /// `roundtrip - (guest_total - verify)`
    GuestTotalExcludingVerify,
}

impl OverheadFormula {
    /// Estimate notification and polling overhead in nanoseconds.
    pub fn notification_overhead(self, roundtrip_ns: u64, guest_total_ns: u64, verify_ns: u64) -> u64 {
        let guest_share = match self {
            Self::GuestTotal => guest_total_ns,
            Self::GuestTotalExcludingVerify => guest_total_ns.saturating_sub(verify_ns),
        };
        roundtrip_ns.saturating_sub(guest_share)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_raw_values() {
        assert_eq!(ErrorCode::None.to_raw(), 0);
        assert_eq!(ErrorCode::IntegrityMismatch.to_raw(), 1);
        assert_eq!(ErrorCode::from_raw(2), ErrorCode::AllocationFailed);
        assert_eq!(ErrorCode::from_raw(42), ErrorCode::Unknown(42));
        assert!(!ErrorCode::None.is_error());
        assert!(ErrorCode::from_raw(42).is_error());
    }

    #[test]
    fn test_sequence_tagging() {
        assert_eq!(MessageKind::Latency.sequence(7), 7);
        assert_eq!(MessageKind::Bandwidth.sequence(1), 0x10000);
        assert_eq!(MessageKind::classify(3), MessageKind::Latency);
        assert_eq!(MessageKind::classify(0xFFFF), MessageKind::Bandwidth);
    }

    #[test]
    fn test_overhead_clamps_at_zero() {
        let formula = OverheadFormula::GuestTotal;
        assert_eq!(formula.notification_overhead(1_000, 400, 100), 600);
        assert_eq!(formula.notification_overhead(300, 400, 100), 0);
    }

    #[test]
    fn test_overhead_excluding_verify() {
        let formula = OverheadFormula::GuestTotalExcludingVerify;
        assert_eq!(formula.notification_overhead(1_000, 400, 100), 700);
        assert_eq!(formula.notification_overhead(1_000, 50, 100), 1_000);
    }
}
