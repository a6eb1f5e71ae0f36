// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Console summaries and JSON results built from per-message records.

use std::fmt::{self, Write as _};

use crate::frames::FrameSpec;
use crate::metrics::{BenchmarkCategory, BenchmarkResult};
use crate::records::{BandwidthRecord, LatencyRecord};

/// Mean and range of one component.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Component {
    pub mean_ns: u64,
    pub min_ns: u64,
    pub max_ns: u64,
    /// Share of the mean end-to-end total, in percent.
    pub share: f64,
}

impl Component {
    fn from_values(values: &[u64], total_sum: u64) -> Self {
        let sum: u64 = values.iter().sum();
        let count = values.len().max(1) as u64;
        Self {
            mean_ns: sum / count,
            min_ns: values.iter().copied().min().unwrap_or(0),
            max_ns: values.iter().copied().max().unwrap_or(0),
            share: if total_sum > 0 {
                100.0 * sum as f64 / total_sum as f64
            } else {
                0.0
            },
        }
    }
}

/// Where the time of a delivered latency message goes, over all delivered
/// messages.
#[derive(Debug, Clone, PartialEq)]
pub struct OverheadBreakdown {
    pub attempted: usize,
    pub successful: usize,
    pub write: Component,
    pub roundtrip: Component,
    pub notification: Component,
    /// Guest cold read of the shared buffer.
    pub read: Component,
    pub copy: Component,
    pub verify: Component,
    pub total: Component,
}

impl OverheadBreakdown {
    /// `None` when no message was delivered.
    pub fn from_records(records: &[LatencyRecord]) -> Option<Self> {
        let ok: Vec<&LatencyRecord> = records.iter().filter(|r| r.success).collect();
        if ok.is_empty() {
            return None;
        }

        let total_sum: u64 = ok.iter().map(|r| r.total_ns).sum();
        let component = |f: fn(&LatencyRecord) -> u64| {
            let values: Vec<u64> = ok.iter().map(|r| f(r)).collect();
            Component::from_values(&values, total_sum)
        };

        Some(Self {
            attempted: records.len(),
            successful: ok.len(),
            write: component(|r| r.write_ns),
            roundtrip: component(|r| r.roundtrip_ns),
            notification: component(|r| r.notification_est_ns),
            read: component(|r| r.cold_read_ns),
            copy: component(|r| r.copy_ns),
            verify: component(|r| r.verify_ns),
            total: component(|r| r.total_ns),
        })
    }
}

fn us(ns: u64) -> f64 {
    ns as f64 / 1_000.0
}

impl fmt::Display for OverheadBreakdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Successful: {}/{}", self.successful, self.attempted)?;
        writeln!(f)?;
        writeln!(f, "OVERHEAD BREAKDOWN (Average):")?;
        let rows = [
            ("Write (host)", &self.write),
            ("Notification (est)", &self.notification),
            ("Cold read (guest)", &self.read),
            ("Copy (guest)", &self.copy),
            ("Verify (guest)", &self.verify),
        ];
        for (name, c) in rows {
            writeln!(
                f,
                "  {:<20} {:>9} ns ({:>9.2} µs) [{:>5.1}%]",
                format!("{}:", name),
                c.mean_ns,
                us(c.mean_ns),
                c.share
            )?;
        }
        writeln!(f, "  {}", "-".repeat(50))?;
        writeln!(
            f,
            "  {:<20} {:>9} ns ({:>9.2} µs) [100.0%]",
            "Total end-to-end:",
            self.total.mean_ns,
            us(self.total.mean_ns)
        )?;
        writeln!(f)?;
        writeln!(f, "MIN/MAX:")?;
        let ranges = [
            ("Write", &self.write),
            ("Round-trip", &self.roundtrip),
            ("Notification", &self.notification),
            ("Cold read", &self.read),
            ("Copy", &self.copy),
            ("Verify", &self.verify),
        ];
        for (name, c) in ranges {
            writeln!(
                f,
                "  {:<14} {} - {} ns ({:.2} - {:.2} µs)",
                format!("{}:", name),
                c.min_ns,
                c.max_ns,
                us(c.min_ns),
                us(c.max_ns)
            )?;
        }
        writeln!(f)?;
        writeln!(f, "Notification is estimated as round-trip minus guest processing.")
    }
}

/// Averages for one frame size of the bandwidth test.
#[derive(Debug, Clone, PartialEq)]
pub struct BandwidthSummary {
    pub frame: FrameSpec,
    pub attempted: usize,
    pub successful: usize,
    pub write_mbps: f64,
    pub read_mbps: f64,
    pub total_mbps: f64,
}

impl BandwidthSummary {
    /// Summaries per frame, in the order frames first appear.
    pub fn by_frame(records: &[BandwidthRecord]) -> Vec<Self> {
        let mut frames: Vec<FrameSpec> = Vec::new();
        for record in records {
            if !frames.contains(&record.frame) {
                frames.push(record.frame);
            }
        }

        frames
            .into_iter()
            .map(|frame| {
                let all: Vec<&BandwidthRecord> =
                    records.iter().filter(|r| r.frame == frame).collect();
                let ok: Vec<&&BandwidthRecord> = all.iter().filter(|r| r.success).collect();
                let mean = |f: fn(&BandwidthRecord) -> f64| {
                    if ok.is_empty() {
                        0.0
                    } else {
                        ok.iter().map(|r| f(r)).sum::<f64>() / ok.len() as f64
                    }
                };
                Self {
                    frame,
                    attempted: all.len(),
                    successful: ok.len(),
                    write_mbps: mean(BandwidthRecord::write_mbps),
                    read_mbps: mean(BandwidthRecord::read_mbps),
                    total_mbps: mean(BandwidthRecord::total_mbps),
                }
            })
            .collect()
    }
}

impl fmt::Display for BandwidthSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} Results ({}/{} successful):",
            self.frame.name, self.successful, self.attempted
        )?;
        for (name, mbps) in [
            ("Avg Write BW:", self.write_mbps),
            ("Avg Read BW:", self.read_mbps),
            ("Avg Overall BW:", self.total_mbps),
        ] {
            writeln!(f, "  {:<16} {:>8.0} MB/s ({:.2} GB/s)", name, mbps, mbps / 1024.0)?;
        }
        Ok(())
    }
}

/// JSON results for the latency test: one entry per measured component.
pub fn latency_results(records: &[LatencyRecord]) -> Vec<BenchmarkResult> {
    let ok: Vec<&LatencyRecord> = records.iter().filter(|r| r.success).collect();
    let size = ok.first().map(|r| r.size_bytes).unwrap_or(0);

    let components: [(&str, fn(&LatencyRecord) -> u64); 9] = [
        ("latency_write", |r| r.write_ns),
        ("latency_roundtrip", |r| r.roundtrip_ns),
        ("latency_notification", |r| r.notification_est_ns),
        ("latency_hot_read", |r| r.hot_read_ns),
        ("latency_cold_read", |r| r.cold_read_ns),
        ("latency_copy", |r| r.copy_ns),
        ("latency_verify", |r| r.verify_ns),
        ("latency_guest_total", |r| r.guest_total_ns),
        ("latency_total", |r| r.total_ns),
    ];

    components
        .iter()
        .map(|(name, f)| {
            BenchmarkResult::latency(
                *name,
                BenchmarkCategory::Latency,
                ok.iter().map(|r| f(r)).collect(),
                true,
            )
            .with_metadata("payload_size_bytes", size)
            .with_metadata("attempted", records.len())
            .with_metadata("successful", ok.len())
        })
        .collect()
}

/// JSON results for the bandwidth test: one entry per frame.
pub fn bandwidth_results(records: &[BandwidthRecord]) -> Vec<BenchmarkResult> {
    BandwidthSummary::by_frame(records)
        .into_iter()
        .map(|summary| {
            let samples = records
                .iter()
                .filter(|r| r.frame == summary.frame && r.success)
                .map(|r| r.total_ns)
                .collect();
            BenchmarkResult::latency(
                format!("bandwidth_{}", summary.frame.name),
                BenchmarkCategory::Bandwidth,
                samples,
                true,
            )
            .with_throughput(summary.frame.size() as u64)
            .with_metadata("frame", summary.frame)
            .with_metadata("write_mbps", summary.write_mbps)
            .with_metadata("read_mbps", summary.read_mbps)
            .with_metadata("total_mbps", summary.total_mbps)
            .with_metadata("successful", summary.successful)
        })
        .collect()
}

/// Render every bandwidth summary as one block.
pub fn render_bandwidth(summaries: &[BandwidthSummary]) -> String {
    let mut out = String::new();
    for summary in summaries {
        let _ = writeln!(out, "{}", summary);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::{FRAME_1080P, FRAME_4K};

    fn latency(write_ns: u64, roundtrip_ns: u64, success: bool) -> LatencyRecord {
        LatencyRecord {
            iteration: 0,
            sequence: 0,
            size_bytes: 1000,
            write_ns,
            roundtrip_ns,
            hot_read_ns: 10,
            cold_read_ns: 20,
            copy_ns: 30,
            verify_ns: 40,
            guest_total_ns: 100,
            notification_est_ns: roundtrip_ns - 100,
            total_ns: write_ns + roundtrip_ns,
            l1_miss_rate: 0.0,
            llc_miss_rate: 0.0,
            instructions_per_cycle: 0.0,
            cycles_per_byte: 0.0,
            success,
            error_code: u32::from(!success),
            outcome: if success { "delivered" } else { "guest_error" },
        }
    }

    #[test]
    fn test_breakdown_skips_failed_messages() {
        let records = vec![
            latency(100, 300, true),
            latency(300, 500, true),
            latency(9_999, 9_999, false),
        ];
        let breakdown = OverheadBreakdown::from_records(&records).unwrap();
        assert_eq!(breakdown.attempted, 3);
        assert_eq!(breakdown.successful, 2);
        assert_eq!(breakdown.write.mean_ns, 200);
        assert_eq!(breakdown.write.min_ns, 100);
        assert_eq!(breakdown.write.max_ns, 300);
        assert_eq!(breakdown.total.mean_ns, 600);
        // write share: 400 of 1200
        assert!((breakdown.write.share - 100.0 / 3.0).abs() < 1e-9);
        assert!((breakdown.total.share - 100.0).abs() < 1e-9);

        let text = breakdown.to_string();
        assert!(text.contains("Successful: 2/3"));
        assert!(text.contains("OVERHEAD BREAKDOWN"));
        assert!(text.contains("MIN/MAX"));
    }

    #[test]
    fn test_breakdown_none_without_success() {
        assert!(OverheadBreakdown::from_records(&[latency(1, 200, false)]).is_none());
        assert!(OverheadBreakdown::from_records(&[]).is_none());
    }

    fn bandwidth(frame: FrameSpec, write_ns: u64, success: bool) -> BandwidthRecord {
        BandwidthRecord {
            iteration: 1,
            frame,
            size_bytes: 1024 * 1024,
            write_ns,
            roundtrip_ns: 1_000_000,
            guest_read_ns: 1_000_000,
            guest_verify_ns: 1_000_000,
            total_ns: write_ns + 1_000_000,
            success,
            error_code: 0,
        }
    }

    #[test]
    fn test_bandwidth_summary_per_frame() {
        let records = vec![
            bandwidth(FRAME_1080P, 1_000_000, true),
            bandwidth(FRAME_1080P, 1_000_000, false),
            bandwidth(FRAME_4K, 2_000_000, true),
        ];
        let summaries = BandwidthSummary::by_frame(&records);
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].frame, FRAME_1080P);
        assert_eq!(summaries[0].attempted, 2);
        assert_eq!(summaries[0].successful, 1);
        assert!((summaries[0].write_mbps - 1000.0).abs() < 1e-6);
        assert!((summaries[1].write_mbps - 500.0).abs() < 1e-6);
        assert!(render_bandwidth(&summaries).contains("4K Results (1/1 successful)"));
    }

    #[test]
    fn test_latency_results_cover_each_component() {
        let results = latency_results(&[latency(100, 300, true), latency(200, 400, true)]);
        assert_eq!(results.len(), 9);
        let write = &results[0];
        assert_eq!(write.name, "latency_write");
        assert_eq!(write.iterations, 2);
        assert_eq!(write.latency.as_ref().unwrap().min_ns, 100);
    }

    #[test]
    fn test_bandwidth_results_carry_throughput() {
        let results = bandwidth_results(&[bandwidth(FRAME_1080P, 1_000_000, true)]);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "bandwidth_1080p");
        assert!(results[0].throughput.is_some());
    }
}
