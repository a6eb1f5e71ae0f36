// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Host and guest endpoints running on separate threads over one region.

use std::io;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use ivmark_core::perf::{EventCounter, HardwareCounters};
use ivmark_core::shm::HEADER_SIZE;
use ivmark_core::state::StateField;
use ivmark_core::{
    Channel, CounterSource, ErrorCode, GuestConfig, GuestEndpoint, GuestState, GuestSummary,
    HostConfig, HostEndpoint, HostState, IntegrityVerifier, MeasurementPipeline, MessageOutcome,
    MessageReport, NullCounters, PipelineConfig, ProcessedMessage, ProtocolError,
    SharedMemoryRegion, StopReason, Verdict,
};

fn channel(size: usize) -> Channel {
    Channel::new(SharedMemoryRegion::anonymous(size).unwrap()).unwrap()
}

fn host_config() -> HostConfig {
    HostConfig {
        guest_ready_timeout: Duration::from_secs(5),
        processing_timeout: Duration::from_secs(5),
        ack_timeout: Duration::from_secs(5),
        release_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

fn guest_config() -> GuestConfig {
    GuestConfig {
        attach_interval: Duration::from_millis(1),
        attach_timeout: Duration::from_secs(5),
        idle_timeout: Duration::from_secs(5),
        release_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn null_counters() -> Box<dyn CounterSource> {
    Box::new(NullCounters)
}

fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(1));
    }
}

struct Session {
    reports: Vec<MessageReport>,
    processed: Vec<ProcessedMessage>,
    summary: GuestSummary,
    guest_thread: ThreadId,
}

/// Attach a guest on its own thread, initialize the host once the guest is
/// waiting, let `drive` send messages, then signal completion.
fn run_session<'a, F>(
    host: &mut HostEndpoint<'a>,
    guest_channel: &Channel,
    expected: usize,
    make_counters: fn() -> Box<dyn CounterSource>,
    drive: F,
) -> Session
where
    F: FnOnce(&mut HostEndpoint<'a>) -> Vec<MessageReport>,
{
    thread::scope(|s| {
        let guest = s.spawn(move || {
            let pipeline = MeasurementPipeline::new(make_counters(), &PipelineConfig::default());
            let mut guest = GuestEndpoint::new(guest_channel, guest_config(), pipeline);
            guest.attach().unwrap();
            let mut processed = Vec::new();
            let summary = guest
                .run(Some(expected), |message| processed.push(message.clone()))
                .unwrap();
            guest.close();
            (processed, summary, thread::current().id())
        });

        let ch = host.channel();
        wait_until("guest to wait for host", || {
            ch.guest_state() == Some(GuestState::WaitingHostInit)
        });
        host.initialize().unwrap();
        assert!(host.wait_for_guest());

        let reports = drive(host);
        let (processed, summary, guest_thread) = guest.join().unwrap();
        host.shutdown().unwrap();

        Session {
            reports,
            processed,
            summary,
            guest_thread,
        }
    })
}

#[test]
fn test_message_delivered_with_all_phases() {
    let ch = channel(1 << 20);
    let mut host = HostEndpoint::new(&ch, host_config());
    let payload = pattern(1000);

    let session = run_session(&mut host, &ch, 1, null_counters, |host| {
        vec![host.send(1, &payload).unwrap()]
    });

    let report = &session.reports[0];
    assert!(report.success());
    assert!(report.released);
    assert_eq!(report.error_code(), ErrorCode::None);
    assert_eq!(report.digest, IntegrityVerifier::digest(&payload));
    assert!(report.write_ns > 0);
    assert!(report.guest.phases.all_phases_ran());
    assert!(report.roundtrip_ns >= report.guest.phases.total_ns);
    assert_eq!(
        report.notification_ns,
        report.roundtrip_ns - report.guest.phases.total_ns
    );

    assert_eq!(session.summary.processed, 1);
    assert_eq!(session.summary.failed, 0);
    assert_eq!(session.summary.stop, StopReason::CountReached);

    let processed = &session.processed[0];
    assert_eq!(processed.sequence, 1);
    assert_eq!(processed.data_size, 1000);
    assert_eq!(processed.verdict, Some(Verdict::Match));
    assert_eq!(processed.timing, report.guest);

    assert!(ch.is_complete());
    assert_eq!(ch.host_state(), Some(HostState::Completed));
    assert_eq!(ch.guest_state(), Some(GuestState::Ready));
}

#[test]
fn test_corruption_after_digest_is_detected() {
    let ch = channel(1 << 20);
    let mut host = HostEndpoint::new(&ch, host_config());
    let payload = pattern(4096);

    let session = run_session(&mut host, &ch, 2, null_counters, |host| {
        let corrupted = host
            .send_with(1, &payload, |buffer| buffer[17] ^= 0xFF)
            .unwrap();
        let clean = host.send(2, &payload).unwrap();
        vec![corrupted, clean]
    });

    let corrupted = &session.reports[0];
    assert!(!corrupted.success());
    assert_eq!(
        corrupted.outcome,
        MessageOutcome::GuestError(ErrorCode::IntegrityMismatch)
    );
    assert_eq!(corrupted.error_code().to_raw(), 1);
    assert!(session.reports[1].success());

    match &session.processed[0].verdict {
        Some(Verdict::Mismatch { expected, actual }) => {
            assert_eq!(*expected, IntegrityVerifier::digest(&payload));
            assert_ne!(expected, actual);
        }
        other => panic!("expected a mismatch, got {:?}", other),
    }
    assert_eq!(session.processed[1].verdict, Some(Verdict::Match));
    assert_eq!(session.summary.failed, 1);
}

#[test]
fn test_payload_at_exact_capacity() {
    let size = 64 * 1024;
    let ch = channel(size).with_state_trace();
    let mut host = HostEndpoint::new(&ch, host_config());
    assert_eq!(ch.capacity(), size - HEADER_SIZE);

    let session = run_session(&mut host, &ch, 1, null_counters, |host| {
        let capacity = host.channel().capacity();
        let full = host.send(1, &pattern(capacity)).unwrap();

        let writes = host.channel().state_trace().len();
        let oversized = host.send(2, &pattern(capacity + 1));
        assert!(matches!(
            oversized,
            Err(ProtocolError::PayloadTooLarge { size, capacity: c }) if size == c + 1
        ));
        assert_eq!(host.channel().state_trace().len(), writes);
        vec![full]
    });

    assert!(session.reports[0].success());
    assert_eq!(session.processed[0].data_size as usize, ch.capacity());
    assert_eq!(ch.sequence(), 1);
}

#[test]
fn test_withdrawn_message_is_not_processed_late() {
    let ch = channel(1 << 20);
    let impatient = HostConfig {
        guest_ready_timeout: Duration::from_millis(20),
        processing_timeout: Duration::from_millis(20),
        ..host_config()
    };
    let mut host = HostEndpoint::new(&ch, impatient);
    host.initialize().unwrap();
    assert!(!host.wait_for_guest());

    let report = host.send(1, &pattern(256)).unwrap();
    assert!(matches!(report.outcome, MessageOutcome::TimedOut { .. }));
    assert_eq!(ch.host_state(), Some(HostState::Ready));
    host.shutdown().unwrap();

    let mut host = HostEndpoint::new(&ch, host_config());
    let session = run_session(&mut host, &ch, 1, null_counters, |host| {
        vec![host.send(2, &pattern(256)).unwrap()]
    });

    assert!(session.reports[0].success());
    assert_eq!(session.processed.len(), 1);
    assert_eq!(session.processed[0].sequence, 2);
}

/// Counter that can never be opened.
struct Denied;

impl EventCounter for Denied {
    fn enable(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn disable(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn reset(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn read(&mut self) -> io::Result<u64> {
        Ok(0)
    }
}

fn denied_counters() -> Box<dyn CounterSource> {
    match HardwareCounters::open_with(|_| {
        Err::<Denied, _>(io::Error::new(io::ErrorKind::PermissionDenied, "perf_event_paranoid"))
    }) {
        Ok(counters) => Box::new(counters),
        Err(_) => Box::new(NullCounters),
    }
}

#[test]
fn test_unavailable_counters_still_measure_phases() {
    let ch = channel(1 << 20);
    let mut host = HostEndpoint::new(&ch, host_config());

    let session = run_session(&mut host, &ch, 1, denied_counters, |host| {
        vec![host.send(1, &pattern(8192)).unwrap()]
    });

    let report = &session.reports[0];
    assert!(report.success());
    assert!(report.guest.phases.all_phases_ran());
    assert!(report.guest.counters.is_zero());
    assert_eq!(report.guest.counters.l1_miss_rate, 0.0);
    assert_eq!(report.guest.counters.instructions_per_cycle, 0.0);
}

#[test]
fn test_each_state_field_has_one_writer() {
    let ch = channel(1 << 20).with_state_trace();
    let mut host = HostEndpoint::new(&ch, host_config());

    let session = run_session(&mut host, &ch, 3, null_counters, |host| {
        (1..=3)
            .map(|seq| host.send(seq, &pattern(512)).unwrap())
            .collect()
    });
    assert!(session.reports.iter().all(|r| r.success()));

    let host_thread = thread::current().id();
    let trace = ch.state_trace();
    assert!(!trace.is_empty());
    for write in &trace {
        match write.field {
            StateField::Host => assert_eq!(write.writer, host_thread),
            StateField::Guest => assert_eq!(write.writer, session.guest_thread),
        }
    }
}

#[test]
fn test_rehandshake_repeats_host_sequence() {
    let ch = channel(1 << 20).with_state_trace();
    let mut host = HostEndpoint::new(&ch, host_config());

    let host_writes = |ch: &Channel| -> Vec<u32> {
        ch.state_trace()
            .into_iter()
            .filter(|w| w.field == StateField::Host)
            .map(|w| w.to)
            .collect()
    };

    let first = run_session(&mut host, &ch, 1, null_counters, |host| {
        vec![host.send(1, &pattern(100)).unwrap()]
    });
    let after_first = host_writes(&ch);

    let second = run_session(&mut host, &ch, 1, null_counters, |host| {
        vec![host.send(1, &pattern(100)).unwrap()]
    });
    let all = host_writes(&ch);

    assert!(first.reports[0].success());
    assert!(second.reports[0].success());

    let expected: Vec<u32> = [
        HostState::Initializing,
        HostState::Ready,
        HostState::Sending,
        HostState::Ready,
        HostState::Completed,
    ]
    .iter()
    .map(|s| *s as u32)
    .collect();
    assert_eq!(after_first, expected);
    assert_eq!(&all[after_first.len()..], expected.as_slice());
}

#[test]
fn test_posix_region_shared_between_mappings() {
    let name = format!("ivmark-test-{}", std::process::id());
    let size = 256 * 1024;
    let host_region = SharedMemoryRegion::create(&name, size).unwrap();
    let guest_region = SharedMemoryRegion::open(&name, size).unwrap();
    let host_channel = Channel::new(host_region).unwrap();
    let guest_channel = Channel::new(guest_region).unwrap();

    let mut host = HostEndpoint::new(&host_channel, host_config());
    let payload = pattern(100_000);
    let session = run_session(&mut host, &guest_channel, 1, null_counters, |host| {
        vec![host.send(7, &payload).unwrap()]
    });

    assert!(session.reports[0].success());
    assert_eq!(session.processed[0].verdict, Some(Verdict::Match));
    assert_eq!(guest_channel.sequence(), 7);
    assert_eq!(guest_channel.digest(), IntegrityVerifier::digest(&payload));
}
