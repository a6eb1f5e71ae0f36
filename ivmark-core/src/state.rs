// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Host and guest state enums with typed transitions.
//!
//! Each side owns exactly one state field in the channel. The values are
//! part of the wire layout and must never be renumbered.
//!
//! Host:  Uninitialized → Initializing → Ready → Sending → (Ready | Completed)
//! Guest: Uninitialized → WaitingHostInit → Ready → Processing → Acknowledged → Ready

use serde::{Deserialize, Serialize};

use crate::error::StateTransitionError;

/// Host lifecycle states. Only the host writes this field.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HostState {
    Uninitialized = 0,
    Initializing = 1,
    Ready = 2,
    Sending = 3,
    Completed = 4,
}

impl HostState {
    /// Get the state name for logs and error messages.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Uninitialized => "UNINITIALIZED",
            Self::Initializing => "INITIALIZING",
            Self::Ready => "READY",
            Self::Sending => "SENDING",
            Self::Completed => "COMPLETED",
        }
    }

    /// Check if transition to the target state is valid.
    ///
    /// Re-initialization is allowed from any state so a restarted host can
    /// re-arm a channel left behind by a previous run.
    pub fn can_transition_to(&self, target: HostState) -> bool {
        matches!(
            (self, target),
            (_, Self::Initializing) |
            (Self::Initializing, Self::Ready) |
            (Self::Ready, Self::Sending) |
            (Self::Ready, Self::Completed) |
            // Acknowledged, or withdrawn after a timeout
            (Self::Sending, Self::Ready) |
            (Self::Sending, Self::Completed)
        )
    }

    /// Decode a raw value read from shared memory.
    pub fn from_raw(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Uninitialized),
            1 => Some(Self::Initializing),
            2 => Some(Self::Ready),
            3 => Some(Self::Sending),
            4 => Some(Self::Completed),
            _ => None,
        }
    }
}

impl TryFrom<u32> for HostState {
    type Error = StateTransitionError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::from_raw(value).ok_or(StateTransitionError::UnknownState {
            field: "host_state",
            value,
        })
    }
}

impl std::fmt::Display for HostState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Guest lifecycle states. Only the guest writes this field.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GuestState {
    Uninitialized = 0,
    WaitingHostInit = 1,
    Ready = 2,
    Processing = 3,
    Acknowledged = 4,
}

impl GuestState {
    /// Get the state name for logs and error messages.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Uninitialized => "UNINITIALIZED",
            Self::WaitingHostInit => "WAITING_HOST_INIT",
            Self::Ready => "READY",
            Self::Processing => "PROCESSING",
            Self::Acknowledged => "ACKNOWLEDGED",
        }
    }

    /// Check if transition to the target state is valid.
    pub fn can_transition_to(&self, target: GuestState) -> bool {
        matches!(
            (self, target),
            // A guest may restart at any point
            (_, Self::Uninitialized) |
            (_, Self::WaitingHostInit) |
            (Self::WaitingHostInit, Self::Ready) |
            (Self::Ready, Self::Processing) |
            (Self::Processing, Self::Acknowledged) |
            (Self::Acknowledged, Self::Ready)
        )
    }

    /// Decode a raw value read from shared memory.
    pub fn from_raw(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Uninitialized),
            1 => Some(Self::WaitingHostInit),
            2 => Some(Self::Ready),
            3 => Some(Self::Processing),
            4 => Some(Self::Acknowledged),
            _ => None,
        }
    }
}

impl TryFrom<u32> for GuestState {
    type Error = StateTransitionError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::from_raw(value).ok_or(StateTransitionError::UnknownState {
            field: "guest_state",
            value,
        })
    }
}

impl std::fmt::Display for GuestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Which state field of the channel a write targeted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateField {
    Host,
    Guest,
}

impl StateField {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Host => "host_state",
            Self::Guest => "guest_state",
        }
    }
}
