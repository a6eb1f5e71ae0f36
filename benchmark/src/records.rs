// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Per-message result rows for the latency and bandwidth tests.

use std::io::{self, Write};

use ivmark_core::protocol::{MessageOutcome, MessageReport};
use serde::Serialize;

use crate::frames::FrameSpec;
use crate::metrics::{mb_per_sec, MIB};

/// A record that can be written as one CSV line.
pub trait CsvRow {
    /// Comma-separated column names, without a trailing newline.
    const HEADER: &'static str;

    fn write_row<W: Write>(&self, out: &mut W) -> io::Result<()>;
}

/// One latency test message, host and guest clocks combined.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencyRecord {
    pub iteration: u32,
    pub sequence: u32,
    pub size_bytes: usize,
    pub write_ns: u64,
    pub roundtrip_ns: u64,
    pub hot_read_ns: u64,
    pub cold_read_ns: u64,
    pub copy_ns: u64,
    pub verify_ns: u64,
    pub guest_total_ns: u64,
    pub notification_est_ns: u64,
    pub total_ns: u64,
    pub l1_miss_rate: f64,
    pub llc_miss_rate: f64,
    pub instructions_per_cycle: f64,
    pub cycles_per_byte: f64,
    pub success: bool,
    pub error_code: u32,
    /// `delivered`, `guest_error` or `timed_out`
    pub outcome: &'static str,
}

fn outcome_name(outcome: &MessageOutcome) -> &'static str {
    match outcome {
        MessageOutcome::Delivered => "delivered",
        MessageOutcome::GuestError(_) => "guest_error",
        MessageOutcome::TimedOut { .. } => "timed_out",
    }
}

impl LatencyRecord {
    pub fn from_report(iteration: u32, report: &MessageReport) -> Self {
        let phases = &report.guest.phases;
        let counters = &report.guest.counters;
        Self {
            iteration,
            sequence: report.sequence,
            size_bytes: report.data_size,
            write_ns: report.write_ns,
            roundtrip_ns: report.roundtrip_ns,
            hot_read_ns: phases.hot_read_ns,
            cold_read_ns: phases.cold_read_ns,
            copy_ns: phases.copy_ns,
            verify_ns: phases.verify_ns,
            guest_total_ns: phases.total_ns,
            notification_est_ns: report.notification_ns,
            total_ns: report.total_ns(),
            l1_miss_rate: counters.l1_miss_rate,
            llc_miss_rate: counters.llc_miss_rate,
            instructions_per_cycle: counters.instructions_per_cycle,
            cycles_per_byte: counters.cycles_per_byte,
            success: report.success(),
            error_code: report.error_code().to_raw(),
            outcome: outcome_name(&report.outcome),
        }
    }
}

impl CsvRow for LatencyRecord {
    const HEADER: &'static str = "iteration,sequence,size_bytes,write_ns,write_us,roundtrip_ns,roundtrip_us,\
hot_read_ns,cold_read_ns,copy_ns,verify_ns,guest_total_ns,notification_est_ns,notification_est_us,\
total_ns,total_us,l1_miss_rate,llc_miss_rate,ipc,cycles_per_byte,success,error_code,outcome";

    fn write_row<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let us = |ns: u64| ns as f64 / 1_000.0;
        writeln!(
            out,
            "{},{},{},{},{:.2},{},{:.2},{},{},{},{},{},{},{:.2},{},{:.2},{:.4},{:.4},{:.4},{:.4},{},{},{}",
            self.iteration,
            self.sequence,
            self.size_bytes,
            self.write_ns,
            us(self.write_ns),
            self.roundtrip_ns,
            us(self.roundtrip_ns),
            self.hot_read_ns,
            self.cold_read_ns,
            self.copy_ns,
            self.verify_ns,
            self.guest_total_ns,
            self.notification_est_ns,
            us(self.notification_est_ns),
            self.total_ns,
            us(self.total_ns),
            self.l1_miss_rate,
            self.llc_miss_rate,
            self.instructions_per_cycle,
            self.cycles_per_byte,
            u8::from(self.success),
            self.error_code,
            self.outcome,
        )
    }
}

/// One bandwidth test transfer.
///
/// The guest read figure is the copy phase: the one pass that moves every
/// byte out of the shared buffer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BandwidthRecord {
    pub iteration: u32,
    pub frame: FrameSpec,
    pub size_bytes: usize,
    pub write_ns: u64,
    pub roundtrip_ns: u64,
    pub guest_read_ns: u64,
    pub guest_verify_ns: u64,
    pub total_ns: u64,
    pub success: bool,
    pub error_code: u32,
}

impl BandwidthRecord {
    pub fn from_report(iteration: u32, frame: FrameSpec, report: &MessageReport) -> Self {
        Self {
            iteration,
            frame,
            size_bytes: report.data_size,
            write_ns: report.write_ns,
            roundtrip_ns: report.roundtrip_ns,
            guest_read_ns: report.guest.phases.copy_ns,
            guest_verify_ns: report.guest.phases.verify_ns,
            total_ns: report.total_ns(),
            success: report.success(),
            error_code: report.error_code().to_raw(),
        }
    }

    pub fn size_mb(&self) -> f64 {
        self.size_bytes as f64 / MIB
    }

    /// Bandwidth figures are only meaningful for delivered messages.
    fn rate(&self, ns: u64) -> f64 {
        if self.success {
            mb_per_sec(self.size_bytes as u64, ns)
        } else {
            0.0
        }
    }

    pub fn write_mbps(&self) -> f64 {
        self.rate(self.write_ns)
    }

    pub fn read_mbps(&self) -> f64 {
        self.rate(self.guest_read_ns)
    }

    pub fn total_mbps(&self) -> f64 {
        self.rate(self.total_ns)
    }
}

impl CsvRow for BandwidthRecord {
    const HEADER: &'static str = "iteration,frame_type,width,height,bpp,size_bytes,size_mb,\
write_ns,write_ms,write_mbps,roundtrip_ns,roundtrip_ms,guest_read_ns,guest_read_ms,read_mbps,\
guest_verify_ns,guest_verify_ms,total_ns,total_ms,total_mbps,success,error_code";

    fn write_row<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let ms = |ns: u64| ns as f64 / 1_000_000.0;
        writeln!(
            out,
            "{},{},{},{},{},{},{:.2},{},{:.2},{:.2},{},{:.2},{},{:.2},{:.2},{},{:.2},{},{:.2},{:.2},{},{}",
            self.iteration,
            self.frame.name,
            self.frame.width,
            self.frame.height,
            self.frame.bytes_per_pixel * 8,
            self.size_bytes,
            self.size_mb(),
            self.write_ns,
            ms(self.write_ns),
            self.write_mbps(),
            self.roundtrip_ns,
            ms(self.roundtrip_ns),
            self.guest_read_ns,
            ms(self.guest_read_ns),
            self.read_mbps(),
            self.guest_verify_ns,
            ms(self.guest_verify_ns),
            self.total_ns,
            ms(self.total_ns),
            self.total_mbps(),
            u8::from(self.success),
            self.error_code,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::FRAME_1080P;
    use ivmark_core::protocol::{GuestTiming, WaitStage};
    use ivmark_core::{CounterReport, Digest, ErrorCode, MessageKind, PhaseTimings};

    fn report(outcome: MessageOutcome) -> MessageReport {
        MessageReport {
            sequence: 5,
            kind: MessageKind::Latency,
            data_size: 1024 * 1024,
            digest: Digest::ZERO,
            write_ns: 1_000_000,
            roundtrip_ns: 3_000_000,
            notification_ns: 500_000,
            guest: GuestTiming {
                phases: PhaseTimings {
                    hot_read_ns: 100_000,
                    cold_read_ns: 400_000,
                    copy_ns: 500_000,
                    verify_ns: 1_000_000,
                    total_ns: 2_500_000,
                },
                counters: CounterReport::zeroed(),
            },
            host_counters: CounterReport::zeroed(),
            outcome,
            released: true,
        }
    }

    fn columns(header: &str) -> usize {
        header.split(',').count()
    }

    #[test]
    fn test_latency_row_matches_header() {
        let record = LatencyRecord::from_report(3, &report(MessageOutcome::Delivered));
        assert_eq!(record.total_ns, 4_000_000);
        assert_eq!(record.notification_est_ns, 500_000);

        let mut out = Vec::new();
        record.write_row(&mut out).unwrap();
        let line = String::from_utf8(out).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.trim_end().split(',').count(), columns(LatencyRecord::HEADER));
        assert!(line.starts_with("3,5,1048576,1000000,1000.00,"));
        assert!(line.trim_end().ends_with(",1,0,delivered"));
    }

    #[test]
    fn test_failed_latency_row() {
        let record = LatencyRecord::from_report(
            0,
            &report(MessageOutcome::GuestError(ErrorCode::IntegrityMismatch)),
        );
        assert!(!record.success);
        assert_eq!(record.error_code, 1);
        assert_eq!(record.outcome, "guest_error");
    }

    #[test]
    fn test_bandwidth_rates() {
        let record = BandwidthRecord::from_report(1, FRAME_1080P, &report(MessageOutcome::Delivered));
        // 1 MiB in 1 ms
        assert!((record.write_mbps() - 1000.0).abs() < 1e-6);
        // copy phase: 1 MiB in 0.5 ms
        assert!((record.read_mbps() - 2000.0).abs() < 1e-6);
        assert!((record.total_mbps() - 250.0).abs() < 1e-6);

        let mut out = Vec::new();
        record.write_row(&mut out).unwrap();
        let line = String::from_utf8(out).unwrap();
        assert_eq!(line.trim_end().split(',').count(), columns(BandwidthRecord::HEADER));
        assert!(line.starts_with("1,1080p,1920,1080,24,1048576,1.00,"));
    }

    #[test]
    fn test_timed_out_bandwidth_has_no_rates() {
        let record = BandwidthRecord::from_report(
            1,
            FRAME_1080P,
            &report(MessageOutcome::TimedOut {
                stage: WaitStage::Acknowledged,
                waited_ms: 10_000,
            }),
        );
        assert!(!record.success);
        assert_eq!(record.write_mbps(), 0.0);
        assert_eq!(record.total_mbps(), 0.0);
    }
}
