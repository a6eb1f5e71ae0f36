// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Per-message results on both sides of the channel.

use serde::{Deserialize, Serialize};

use crate::integrity::{Digest, Verdict};
use crate::perf::CounterReport;
use crate::pipeline::PhaseTimings;
use crate::types::{ErrorCode, MessageKind};

/// What the guest wrote into the channel's timing record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GuestTiming {
    pub phases: PhaseTimings,
    pub counters: CounterReport,
}

/// Which wait of the host's message cycle gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitStage {
    /// Guest still busy with the previous message.
    GuestIdle,
    /// Guest never picked up the message.
    Processing,
    /// Guest picked it up but never acknowledged.
    Acknowledged,
}

impl WaitStage {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::GuestIdle => "guest idle",
            Self::Processing => "guest processing",
            Self::Acknowledged => "guest acknowledged",
        }
    }
}

/// How a host message ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageOutcome {
    /// Guest acknowledged with error code 0.
    Delivered,
    /// Guest acknowledged with a nonzero error code.
    GuestError(ErrorCode),
    /// A bounded wait expired; the message was withdrawn.
    TimedOut { stage: WaitStage, waited_ms: u64 },
}

/// Host-side record of one message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageReport {
    pub sequence: u32,
    pub kind: MessageKind,
    pub data_size: usize,
    pub digest: Digest,
    /// Host copy into the channel (host clock).
    pub write_ns: u64,
    /// SENDING published until ACKNOWLEDGED observed (host clock).
    pub roundtrip_ns: u64,
    /// Round trip minus guest share, clamped at zero.
    pub notification_ns: u64,
    pub guest: GuestTiming,
    /// Counter session around the host copy.
    pub host_counters: CounterReport,
    pub outcome: MessageOutcome,
    /// Guest returned to READY after the host released the message.
    pub released: bool,
}

impl MessageReport {
    pub fn success(&self) -> bool {
        self.outcome == MessageOutcome::Delivered
    }

    pub fn error_code(&self) -> ErrorCode {
        match self.outcome {
            MessageOutcome::GuestError(code) => code,
            _ => ErrorCode::None,
        }
    }

    /// Write plus round trip, the end-to-end host cost.
    pub fn total_ns(&self) -> u64 {
        self.write_ns.saturating_add(self.roundtrip_ns)
    }
}

/// Guest-side record of one processed message.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedMessage {
    pub sequence: u32,
    pub kind: MessageKind,
    pub data_size: u32,
    pub error: ErrorCode,
    pub timing: GuestTiming,
    /// `None` when verification did not run.
    pub verdict: Option<Verdict>,
    /// Host released the message and the guest is READY again.
    pub released: bool,
}

impl ProcessedMessage {
    pub fn success(&self) -> bool {
        !self.error.is_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(outcome: MessageOutcome) -> MessageReport {
        MessageReport {
            sequence: 1,
            kind: MessageKind::Latency,
            data_size: 1000,
            digest: Digest::ZERO,
            write_ns: 100,
            roundtrip_ns: 900,
            notification_ns: 400,
            guest: GuestTiming::default(),
            host_counters: CounterReport::zeroed(),
            outcome,
            released: true,
        }
    }

    #[test]
    fn test_success_only_when_delivered() {
        assert!(report(MessageOutcome::Delivered).success());
        let failed = report(MessageOutcome::GuestError(ErrorCode::IntegrityMismatch));
        assert!(!failed.success());
        assert_eq!(failed.error_code(), ErrorCode::IntegrityMismatch);
        let timed_out = report(MessageOutcome::TimedOut {
            stage: WaitStage::Processing,
            waited_ms: 1000,
        });
        assert!(!timed_out.success());
        assert_eq!(timed_out.error_code(), ErrorCode::None);
    }

    #[test]
    fn test_total_is_write_plus_roundtrip() {
        assert_eq!(report(MessageOutcome::Delivered).total_ns(), 1000);
    }
}
