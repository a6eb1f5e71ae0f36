// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Host endpoint: owns `host_state`, the header fields and the payload
//! buffer while not SENDING.

use std::time::{Duration, Instant};

use crate::error::{ProtocolError, StateTransitionError};
use crate::fixed;
use crate::integrity::{Digest, IntegrityVerifier};
use crate::perf::{CounterReport, CounterSource, NullCounters};
use crate::pipeline::elapsed_ns;
use crate::protocol::poll::{PollOutcome, Poller};
use crate::protocol::report::{GuestTiming, MessageOutcome, MessageReport, WaitStage};
use crate::shm::{Channel, CHANNEL_MAGIC};
use crate::state::{GuestState, HostState};
use crate::types::{MessageKind, OverheadFormula};

/// Host-side waits and overhead formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostConfig {
    pub poll_interval: Duration,
    /// Wait for the guest after initialization. Expiry is only a warning.
    pub guest_ready_timeout: Duration,
    /// Wait for the guest to pick up a message.
    pub processing_timeout: Duration,
    /// Wait for the guest to acknowledge a picked-up message.
    pub ack_timeout: Duration,
    /// Wait for the guest to return to READY after release.
    pub release_timeout: Duration,
    pub overhead: OverheadFormula,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_micros(10),
            guest_ready_timeout: Duration::from_secs(10),
            processing_timeout: Duration::from_secs(2),
            ack_timeout: Duration::from_secs(10),
            release_timeout: Duration::from_secs(1),
            overhead: OverheadFormula::default(),
        }
    }
}

/// The host side of the channel.
pub struct HostEndpoint<'a> {
    channel: &'a Channel,
    config: HostConfig,
    state: HostState,
    counters: Box<dyn CounterSource>,
}

impl<'a> HostEndpoint<'a> {
    pub fn new(channel: &'a Channel, config: HostConfig) -> Self {
        let state = channel.host_state().unwrap_or(HostState::Uninitialized);
        Self {
            channel,
            config,
            state,
            counters: Box::new(NullCounters),
        }
    }

    /// Bracket the host copy with a counter session.
    pub fn with_counters(mut self, counters: Box<dyn CounterSource>) -> Self {
        self.counters = counters;
        self
    }

    pub fn state(&self) -> HostState {
        self.state
    }

    pub fn channel(&self) -> &'a Channel {
        self.channel
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// (Re)initialize the header and publish READY.
    ///
    /// `magic` is cleared before anything else and only set again once every
    /// host-owned field is zeroed, so a guest that sees the magic value sees
    /// a consistent header.
    pub fn initialize(&mut self) -> Result<(), ProtocolError> {
        let guest = self.channel.guest_state();
        if guest != Some(GuestState::Uninitialized) {
            tracing::info!(
                guest_state = guest.map(|s| s.name()).unwrap_or("UNKNOWN"),
                "Guest started first"
            );
        }

        self.channel.set_magic(0);
        self.transition(HostState::Initializing)?;

        self.channel.reset_header();
        self.channel.fence();

        self.channel.set_magic(CHANNEL_MAGIC);
        self.transition(HostState::Ready)?;

        tracing::info!(
            region = %self.channel.describe(),
            capacity = self.channel.capacity(),
            "Channel initialized"
        );
        Ok(())
    }

    /// Wait for the guest to reach READY. Returns false on timeout; the host
    /// proceeds either way.
    pub fn wait_for_guest(&self) -> bool {
        let poller = Poller::new(self.config.poll_interval, self.config.guest_ready_timeout);
        match poller.poll(self.channel, |c| {
            (c.guest_state() == Some(GuestState::Ready)).then_some(())
        }) {
            PollOutcome::Ready(()) => {
                tracing::info!("Guest ready, synchronization complete");
                true
            }
            PollOutcome::TimedOut { waited } => {
                tracing::warn!(
                    waited_ms = waited.as_millis() as u64,
                    guest_state = guest_state_name(self.channel),
                    "Guest not ready, proceeding anyway"
                );
                false
            }
            PollOutcome::Shutdown => false,
        }
    }

    /// Send one message and wait for its acknowledgement.
    pub fn send(&mut self, sequence: u32, payload: &[u8]) -> Result<MessageReport, ProtocolError> {
        self.send_with(sequence, payload, |_| {})
    }

    /// Like [`send`](Self::send), with `after_digest` applied to the channel
    /// buffer after the digest is computed and before the message is
    /// published. Used for fault injection.
    pub fn send_with<F>(
        &mut self,
        sequence: u32,
        payload: &[u8],
        after_digest: F,
    ) -> Result<MessageReport, ProtocolError>
    where
        F: FnOnce(&mut [u8]),
    {
        if self.state != HostState::Ready {
            return Err(ProtocolError::HostNotReady {
                state: self.state.name(),
            });
        }

        let capacity = self.channel.capacity();
        let data_size = u32::try_from(payload.len())
            .ok()
            .filter(|_| payload.len() <= capacity)
            .ok_or(ProtocolError::PayloadTooLarge {
                size: payload.len(),
                capacity,
            })?;

        let mut report = MessageReport {
            sequence,
            kind: MessageKind::classify(sequence),
            data_size: payload.len(),
            digest: Digest::ZERO,
            write_ns: 0,
            roundtrip_ns: 0,
            notification_ns: 0,
            guest: GuestTiming::default(),
            host_counters: CounterReport::zeroed(),
            outcome: MessageOutcome::Delivered,
            released: false,
        };

        // The buffer may only be rewritten once the guest is done with it.
        let idle = Poller::new(self.config.poll_interval, self.config.processing_timeout);
        match idle.poll(self.channel, |c| {
            (!matches!(
                c.guest_state(),
                Some(GuestState::Processing | GuestState::Acknowledged)
            ))
            .then_some(())
        }) {
            PollOutcome::Ready(()) => {}
            PollOutcome::TimedOut { waited } => {
                return Ok(self.timed_out(report, WaitStage::GuestIdle, waited));
            }
            PollOutcome::Shutdown => return Err(ProtocolError::Shutdown),
        }

        self.channel.clear_results();
        report.digest = IntegrityVerifier::digest(payload);

        self.counters.start();
        let channel = self.channel;
        let write_start = Instant::now();
        // SAFETY: the host owns the buffer while not SENDING, and the guest
        // is idle (checked above). Length is within capacity.
        let buffer = unsafe { channel.payload_mut(payload.len()) };
        buffer.copy_from_slice(payload);
        report.write_ns = elapsed_ns(write_start);
        report.host_counters = self.counters.stop(payload.len());

        after_digest(buffer);

        self.channel
            .write_message_header(sequence, data_size, &report.digest);

        let roundtrip_start = Instant::now();
        self.transition(HostState::Sending)?;

        let pickup = Poller::new(self.config.poll_interval, self.config.processing_timeout);
        // A fast guest can be past PROCESSING before the first poll.
        match pickup.poll(self.channel, |c| {
            matches!(
                c.guest_state(),
                Some(GuestState::Processing | GuestState::Acknowledged)
            )
            .then_some(())
        }) {
            PollOutcome::Ready(()) => {}
            PollOutcome::TimedOut { waited } => {
                self.transition(HostState::Ready)?;
                return Ok(self.timed_out(report, WaitStage::Processing, waited));
            }
            PollOutcome::Shutdown => return Err(ProtocolError::Shutdown),
        }

        let ack = Poller::new(self.config.poll_interval, self.config.ack_timeout);
        match ack.poll(self.channel, |c| {
            (c.guest_state() == Some(GuestState::Acknowledged)).then_some(())
        }) {
            PollOutcome::Ready(()) => {}
            PollOutcome::TimedOut { waited } => {
                self.transition(HostState::Ready)?;
                return Ok(self.timed_out(report, WaitStage::Acknowledged, waited));
            }
            PollOutcome::Shutdown => return Err(ProtocolError::Shutdown),
        }
        report.roundtrip_ns = elapsed_ns(roundtrip_start);

        let error = self.channel.error_code();
        report.guest = fixed::decode_timing(&self.channel.read_timing());

        self.transition(HostState::Ready)?;
        report.released = self.wait_for_release();

        report.notification_ns = self.config.overhead.notification_overhead(
            report.roundtrip_ns,
            report.guest.phases.total_ns,
            report.guest.phases.verify_ns,
        );

        if error.is_error() {
            tracing::warn!(sequence, error = %error, "Guest reported failure");
            report.outcome = MessageOutcome::GuestError(error);
        }

        tracing::debug!(
            sequence,
            write_ns = report.write_ns,
            roundtrip_ns = report.roundtrip_ns,
            guest_total_ns = report.guest.phases.total_ns,
            notification_ns = report.notification_ns,
            "Message acknowledged"
        );

        Ok(report)
    }

    /// Raise `test_complete` and publish COMPLETED.
    pub fn shutdown(&mut self) -> Result<(), ProtocolError> {
        self.channel.set_complete(true);
        self.transition(HostState::Completed)?;
        tracing::info!("Test completion signalled");
        Ok(())
    }

    fn wait_for_release(&self) -> bool {
        let poller = Poller::new(self.config.poll_interval, self.config.release_timeout);
        match poller.poll(self.channel, |c| {
            (c.guest_state() == Some(GuestState::Ready)).then_some(())
        }) {
            PollOutcome::Ready(()) => true,
            _ => {
                tracing::warn!(
                    guest_state = guest_state_name(self.channel),
                    "Guest did not return to READY"
                );
                false
            }
        }
    }

    fn timed_out(&self, mut report: MessageReport, stage: WaitStage, waited: Duration) -> MessageReport {
        let waited_ms = waited.as_millis() as u64;
        tracing::warn!(
            sequence = report.sequence,
            stage = stage.name(),
            waited_ms,
            guest_state = guest_state_name(self.channel),
            "Message timed out"
        );
        report.outcome = MessageOutcome::TimedOut { stage, waited_ms };
        report
    }

    fn transition(&mut self, to: HostState) -> Result<(), StateTransitionError> {
        if !self.state.can_transition_to(to) {
            return Err(StateTransitionError::InvalidTransition {
                side: "host",
                from: self.state.name(),
                to: to.name(),
            });
        }
        self.channel.publish_host_state(to);
        tracing::debug!(from = self.state.name(), to = to.name(), "Host state");
        self.state = to;
        Ok(())
    }
}

fn guest_state_name(channel: &Channel) -> &'static str {
    channel.guest_state().map(|s| s.name()).unwrap_or("UNKNOWN")
}
