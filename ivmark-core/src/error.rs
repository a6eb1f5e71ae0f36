// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Custom error types for ivmark.
//!
//! Every failure is an explicit enum variant. No `Box<dyn Error>`, no
//! `anyhow::Result` inside the library.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for the benchmark core.
#[derive(Debug, Error)]
pub enum IvError {
    // =========================================================================
    // Configuration Errors - Fail-Fast on Invalid Config
    // =========================================================================
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    // =========================================================================
    // State Machine Errors
    // =========================================================================
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(#[from] StateTransitionError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    // =========================================================================
    // Shared Memory Errors
    // =========================================================================
    #[error("Shared memory error: {0}")]
    SharedMemory(#[from] SharedMemoryError),

    // =========================================================================
    // Hardware Counter Errors - callers degrade to zero-filled results
    // =========================================================================
    #[error("Hardware counter error: {0}")]
    Counter(#[from] CounterError),

    // =========================================================================
    // System Errors
    // =========================================================================
    #[error("IO error: {context} - {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Configuration errors abort startup before any region is mapped.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Configuration parse error: {message}")]
    Parse { message: String },

    #[error("Invalid field value: {field} = {value} - {reason}")]
    InvalidFieldValue {
        field: &'static str,
        value: String,
        reason: String,
    },
}

/// Local state machine misuse. Indicates a bug in the caller, never a peer failure.
#[derive(Debug, Error)]
pub enum StateTransitionError {
    #[error("{side} cannot transition from {from} to {to}")]
    InvalidTransition {
        side: &'static str,
        from: &'static str,
        to: &'static str,
    },

    #[error("Unknown {field} value in shared memory: {value}")]
    UnknownState { field: &'static str, value: u32 },
}

/// Shared memory mapping and layout errors.
#[derive(Debug, Error)]
pub enum SharedMemoryError {
    #[error("Failed to create shared memory region: {name} - {reason}")]
    CreateFailed { name: String, reason: String },

    #[error("Failed to open shared memory device {path}: {reason}")]
    OpenFailed { path: PathBuf, reason: String },

    #[error("Failed to map shared memory: {reason}")]
    MapFailed { reason: String },

    #[error("Region too small for channel: {size} bytes (need at least {min})")]
    RegionTooSmall { size: usize, min: usize },

    #[error("No shared memory transport found (tried {tried:?})")]
    TransportNotFound { tried: Vec<PathBuf> },
}

/// Handshake and per-message protocol errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Host not ready after {waited_ms}ms (magic: {magic:#010x}, host state: {host_state})")]
    HandshakeTimeout {
        waited_ms: u64,
        magic: u32,
        host_state: &'static str,
    },

    #[error("Payload size exceeds channel capacity: {size} > {capacity}")]
    PayloadTooLarge { size: usize, capacity: usize },

    #[error("Host must be READY to send, current state: {state}")]
    HostNotReady { state: &'static str },

    #[error("Test completion flag observed")]
    Shutdown,

    #[error("Invalid state transition: {0}")]
    Transition(#[from] StateTransitionError),
}

/// Hardware performance counter errors.
#[derive(Debug, Error)]
pub enum CounterError {
    #[error("Hardware performance counters are not supported on this platform")]
    UnsupportedPlatform,

    #[error("Essential counter '{event}' could not be opened: {source}")]
    EssentialUnavailable {
        event: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias using IvError.
pub type IvResult<T> = Result<T, IvError>;
