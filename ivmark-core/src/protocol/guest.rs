// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Guest endpoint: owns `guest_state`, the result fields, and read access
//! to the payload buffer while PROCESSING.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, StateTransitionError};
use crate::fixed;
use crate::integrity::Verdict;
use crate::perf::{CounterReport, CounterSource};
use crate::pipeline::{elapsed_ns, MeasurementPipeline, PhaseTimings};
use crate::protocol::poll::{PollOutcome, Poller};
use crate::protocol::report::{GuestTiming, ProcessedMessage};
use crate::shm::Channel;
use crate::state::{GuestState, HostState};
use crate::types::{ErrorCode, MessageKind};

/// Guest-side waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuestConfig {
    /// Interval for per-message waits.
    pub poll_interval: Duration,
    /// Interval for the attach wait.
    pub attach_interval: Duration,
    /// Attach deadline. Expiry is fatal to the guest.
    pub attach_timeout: Duration,
    /// How long to wait for the next message before giving up.
    pub idle_timeout: Duration,
    /// Wait for the host to release an acknowledged message.
    pub release_timeout: Duration,
}

impl Default for GuestConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_micros(10),
            attach_interval: Duration::from_millis(10),
            attach_timeout: Duration::from_secs(50),
            idle_timeout: Duration::from_secs(60),
            release_timeout: Duration::from_secs(10),
        }
    }
}

/// Result of one [`GuestEndpoint::serve_next`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum GuestEvent {
    Processed(ProcessedMessage),
    /// No message arrived within the idle timeout.
    Idle,
    /// The host never released the previous acknowledged message.
    Stalled,
    Shutdown,
}

/// Why [`GuestEndpoint::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    CountReached,
    Shutdown,
    Idle,
    Stalled,
}

/// Totals from a guest run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuestSummary {
    pub processed: usize,
    pub failed: usize,
    pub stop: StopReason,
}

/// The guest side of the channel.
pub struct GuestEndpoint<'a, S: CounterSource> {
    channel: &'a Channel,
    config: GuestConfig,
    state: GuestState,
    pipeline: MeasurementPipeline<S>,
}

impl<'a, S: CounterSource> GuestEndpoint<'a, S> {
    pub fn new(channel: &'a Channel, config: GuestConfig, pipeline: MeasurementPipeline<S>) -> Self {
        let state = channel.guest_state().unwrap_or(GuestState::Uninitialized);
        Self {
            channel,
            config,
            state,
            pipeline,
        }
    }

    pub fn state(&self) -> GuestState {
        self.state
    }

    /// Wait for the host handshake and publish READY.
    ///
    /// # Errors
    /// `HandshakeTimeout` if the host is not READY with the channel open
    /// within `attach_timeout`.
    pub fn attach(&mut self) -> Result<(), ProtocolError> {
        self.transition(GuestState::WaitingHostInit)?;

        let host = self.channel.host_state();
        if !matches!(host, Some(HostState::Uninitialized | HostState::Ready)) {
            tracing::info!(
                host_state = host_state_name(self.channel),
                "Host busy, waiting for initialization"
            );
        }

        let poller =
            Poller::new(self.config.attach_interval, self.config.attach_timeout).ignoring_shutdown();
        match poller.poll(self.channel, |c| {
            (c.is_open() && c.host_state() == Some(HostState::Ready)).then_some(())
        }) {
            PollOutcome::Ready(()) => {}
            PollOutcome::TimedOut { waited } => {
                let err = ProtocolError::HandshakeTimeout {
                    waited_ms: waited.as_millis() as u64,
                    magic: self.channel.magic(),
                    host_state: host_state_name(self.channel),
                };
                tracing::error!(error = %err, "Host handshake failed");
                return Err(err);
            }
            PollOutcome::Shutdown => return Err(ProtocolError::Shutdown),
        }

        self.transition(GuestState::Ready)?;
        tracing::info!("Host initialization complete, ready for messages");
        Ok(())
    }

    /// Wait for, process and acknowledge one message.
    ///
    /// A guest left in ACKNOWLEDGED by an earlier call first waits for the
    /// host to release that message; it never processes a message twice.
    pub fn serve_next(&mut self) -> Result<GuestEvent, ProtocolError> {
        if self.state == GuestState::Acknowledged {
            match self.await_release()? {
                PollOutcome::Ready(()) => {}
                PollOutcome::TimedOut { .. } => return Ok(GuestEvent::Stalled),
                PollOutcome::Shutdown => return Ok(GuestEvent::Shutdown),
            }
        }

        let poller = Poller::new(self.config.poll_interval, self.config.idle_timeout);
        match poller.poll(self.channel, |c| {
            (c.host_state() == Some(HostState::Sending)).then_some(())
        }) {
            PollOutcome::Ready(()) => {}
            PollOutcome::TimedOut { waited } => {
                tracing::info!(waited_ms = waited.as_millis() as u64, "No message, idle timeout");
                return Ok(GuestEvent::Idle);
            }
            PollOutcome::Shutdown => {
                tracing::info!("Test completion signal received");
                return Ok(GuestEvent::Shutdown);
            }
        }

        let processing_start = Instant::now();
        self.transition(GuestState::Processing)?;

        let sequence = self.channel.sequence();
        let data_size = self.channel.data_size();
        let expected = self.channel.digest();
        let capacity = self.channel.capacity();
        tracing::debug!(sequence, data_size, "Message received");

        let (mut phases, counters, error, verdict) = if data_size as usize > capacity {
            tracing::warn!(sequence, data_size, capacity, "Payload exceeds channel capacity");
            (
                PhaseTimings::default(),
                CounterReport::zeroed(),
                ErrorCode::PayloadTooLarge,
                None,
            )
        } else {
            let channel = self.channel;
            // SAFETY: the guest owns the buffer while PROCESSING and
            // data_size is within capacity.
            let payload = unsafe { channel.payload(data_size as usize) };
            let report = self.pipeline.run(payload, &expected);
            (report.timings, report.counters, report.error, report.verdict)
        };

        if let Some(Verdict::Mismatch { expected, actual }) = &verdict {
            tracing::error!(
                sequence,
                expected = %expected,
                actual = %actual,
                "Data integrity check failed"
            );
        }

        phases.total_ns = elapsed_ns(processing_start);
        let timing = GuestTiming { phases, counters };
        self.channel
            .write_results(&fixed::encode_timing(&timing.phases, &timing.counters), error);
        self.transition(GuestState::Acknowledged)?;

        let released = match self.await_release()? {
            PollOutcome::Ready(()) => true,
            PollOutcome::TimedOut { waited } => {
                tracing::warn!(
                    sequence,
                    waited_ms = waited.as_millis() as u64,
                    "Host did not release message"
                );
                false
            }
            PollOutcome::Shutdown => false,
        };

        Ok(GuestEvent::Processed(ProcessedMessage {
            sequence,
            kind: MessageKind::classify(sequence),
            data_size,
            error,
            timing,
            verdict,
            released,
        }))
    }

    /// Serve messages until `expected` have been processed, shutdown is
    /// signalled, or the channel goes idle.
    pub fn run<F>(&mut self, expected: Option<usize>, mut on_message: F) -> Result<GuestSummary, ProtocolError>
    where
        F: FnMut(&ProcessedMessage),
    {
        let mut processed = 0;
        let mut failed = 0;

        let stop = loop {
            if expected.is_some_and(|limit| processed >= limit) {
                break StopReason::CountReached;
            }
            match self.serve_next()? {
                GuestEvent::Processed(message) => {
                    processed += 1;
                    if !message.success() {
                        failed += 1;
                    }
                    on_message(&message);
                }
                GuestEvent::Idle => break StopReason::Idle,
                GuestEvent::Stalled => break StopReason::Stalled,
                GuestEvent::Shutdown => break StopReason::Shutdown,
            }
        };

        tracing::info!(processed, failed, stop = ?stop, "Guest loop ended");
        Ok(GuestSummary {
            processed,
            failed,
            stop,
        })
    }

    /// Release the counter session.
    pub fn close(&mut self) {
        self.pipeline.close();
    }

    fn await_release(&mut self) -> Result<PollOutcome<()>, ProtocolError> {
        let poller = Poller::new(self.config.poll_interval, self.config.release_timeout);
        let outcome = poller.poll(self.channel, |c| {
            (c.host_state() == Some(HostState::Ready)).then_some(())
        });
        if outcome.is_ready() {
            self.transition(GuestState::Ready)?;
        }
        Ok(outcome)
    }

    fn transition(&mut self, to: GuestState) -> Result<(), StateTransitionError> {
        if !self.state.can_transition_to(to) {
            return Err(StateTransitionError::InvalidTransition {
                side: "guest",
                from: self.state.name(),
                to: to.name(),
            });
        }
        self.channel.publish_guest_state(to);
        tracing::debug!(from = self.state.name(), to = to.name(), "Guest state");
        self.state = to;
        Ok(())
    }
}

fn host_state_name(channel: &Channel) -> &'static str {
    channel.host_state().map(|s| s.name()).unwrap_or("UNKNOWN")
}
