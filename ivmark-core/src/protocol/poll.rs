// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Bounded polling of the shared channel.

use std::time::{Duration, Instant};

use crate::shm::Channel;

/// Result of a bounded wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Ready(T),
    TimedOut { waited: Duration },
    /// The host raised `test_complete` while we were waiting.
    Shutdown,
}

impl<T> PollOutcome<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

/// Sleep-and-check loop with a deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Poller {
    interval: Duration,
    timeout: Duration,
    honor_shutdown: bool,
}

impl Poller {
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            honor_shutdown: true,
        }
    }

    /// Do not stop on `test_complete`.
    ///
    /// Only for the guest attach wait: a channel left behind by a finished
    /// run still carries the flag until the next host clears it.
    pub const fn ignoring_shutdown(mut self) -> Self {
        self.honor_shutdown = false;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Poll `check` until it yields a value, the deadline passes, or shutdown
    /// is observed. `test_complete` is checked on every iteration.
    pub fn poll<T>(&self, channel: &Channel, mut check: impl FnMut(&Channel) -> Option<T>) -> PollOutcome<T> {
        let start = Instant::now();
        loop {
            if self.honor_shutdown && channel.is_complete() {
                return PollOutcome::Shutdown;
            }
            if let Some(value) = check(channel) {
                return PollOutcome::Ready(value);
            }
            let waited = start.elapsed();
            if waited >= self.timeout {
                return PollOutcome::TimedOut { waited };
            }
            if self.interval.is_zero() {
                std::hint::spin_loop();
            } else {
                std::thread::sleep(self.interval);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shm::SharedMemoryRegion;
    use crate::state::HostState;

    fn channel() -> Channel {
        Channel::new(SharedMemoryRegion::anonymous(8192).unwrap()).unwrap()
    }

    #[test]
    fn test_ready_immediately() {
        let ch = channel();
        let poller = Poller::new(Duration::from_micros(10), Duration::from_millis(10));
        assert_eq!(poller.poll(&ch, |_| Some(5)), PollOutcome::Ready(5));
    }

    #[test]
    fn test_times_out() {
        let ch = channel();
        let poller = Poller::new(Duration::from_micros(10), Duration::from_millis(5));
        match poller.poll(&ch, |c| (c.host_state() == Some(HostState::Sending)).then_some(())) {
            PollOutcome::TimedOut { waited } => assert!(waited >= Duration::from_millis(5)),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_shutdown_wins_over_condition() {
        let ch = channel();
        ch.set_complete(true);
        let poller = Poller::new(Duration::from_micros(10), Duration::from_secs(1));
        assert_eq!(poller.poll(&ch, |_| Some(())), PollOutcome::Shutdown);
        assert_eq!(
            poller.ignoring_shutdown().poll(&ch, |_| Some(())),
            PollOutcome::Ready(())
        );
    }
}
