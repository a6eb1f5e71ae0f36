// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! ivmark Core Library
//!
//! Host/guest shared-memory transfer benchmark over an ivshmem region.
//! Provides the shared channel layout, the lock-free handshake protocol,
//! the guest's phased cache measurement pipeline, hardware counter access,
//! and SHA-256 payload verification.

pub mod config;
pub mod error;
pub mod fixed;
pub mod integrity;
pub mod perf;
pub mod pipeline;
pub mod protocol;
pub mod shm;
pub mod state;
pub mod types;

// Re-export commonly used types
pub use config::{BenchConfig, ConfigLoader};
pub use error::{
    ConfigError, CounterError, IvError, IvResult, ProtocolError, SharedMemoryError,
    StateTransitionError,
};
pub use integrity::{Digest, IntegrityVerifier, Verdict};
pub use perf::{probe_counters, CounterReport, CounterSource, NullCounters};
pub use pipeline::{MeasurementPipeline, PhaseTimings, PipelineConfig, PipelineReport};
pub use protocol::{
    GuestConfig, GuestEndpoint, GuestEvent, GuestSummary, HostConfig, HostEndpoint,
    MessageOutcome, MessageReport, ProcessedMessage, StopReason,
};
pub use shm::{Channel, SharedMemoryRegion, Transport, TransportConfig};
pub use state::{GuestState, HostState};
pub use types::{ErrorCode, MessageKind, OverheadFormula, BANDWIDTH_SEQUENCE_BASE};
