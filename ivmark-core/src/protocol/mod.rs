// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Handshake and per-message state machine.
//!
//! Each endpoint writes only its own state field. Every update batch is
//! data first, then a full fence, then the state write:
//!
//! ```text
//! host:  READY ──► SENDING ─────────────────────────► READY
//! guest:             └─► PROCESSING ──► ACKNOWLEDGED ──┘──► READY
//! ```
//!
//! All waits are bounded [`Poller`] loops that also watch `test_complete`.

mod guest;
mod host;
mod poll;
mod report;

pub use guest::{GuestConfig, GuestEndpoint, GuestEvent, GuestSummary, StopReason};
pub use host::{HostConfig, HostEndpoint};
pub use poll::{PollOutcome, Poller};
pub use report::{GuestTiming, MessageOutcome, MessageReport, ProcessedMessage, WaitStage};
