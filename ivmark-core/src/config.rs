// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! YAML benchmark configuration with strict range validation.
//!
//! Every field has a default, so an empty document is a valid config.
//! Out-of-range values fail before any region is mapped.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ConfigError, IvError, IvResult};
use crate::pipeline::PipelineConfig;
use crate::protocol::{GuestConfig, HostConfig};
use crate::shm::{TransportConfig, DEFAULT_PCI_RESOURCE, DEFAULT_SHM_PATH, DEFAULT_REGION_SIZE};
use crate::types::OverheadFormula;

const MIB: usize = 1024 * 1024;

/// Raw transport section.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawTransportConfig {
    pci_resource: String,
    write_combining: bool,
    fallback_path: String,
    region_size_mb: usize,
}

impl Default for RawTransportConfig {
    fn default() -> Self {
        Self {
            pci_resource: DEFAULT_PCI_RESOURCE.to_string(),
            write_combining: false,
            fallback_path: DEFAULT_SHM_PATH.to_string(),
            region_size_mb: DEFAULT_REGION_SIZE / MIB,
        }
    }
}

/// Raw protocol timing section.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawProtocolConfig {
    poll_interval_us: u64,
    attach_interval_ms: u64,
    attach_timeout_ms: u64,
    guest_ready_timeout_ms: u64,
    processing_timeout_ms: u64,
    ack_timeout_ms: u64,
    host_release_timeout_ms: u64,
    guest_release_timeout_ms: u64,
    idle_timeout_ms: u64,
}

impl Default for RawProtocolConfig {
    fn default() -> Self {
        let host = HostConfig::default();
        let guest = GuestConfig::default();
        Self {
            poll_interval_us: host.poll_interval.as_micros() as u64,
            attach_interval_ms: guest.attach_interval.as_millis() as u64,
            attach_timeout_ms: guest.attach_timeout.as_millis() as u64,
            guest_ready_timeout_ms: host.guest_ready_timeout.as_millis() as u64,
            processing_timeout_ms: host.processing_timeout.as_millis() as u64,
            ack_timeout_ms: host.ack_timeout.as_millis() as u64,
            host_release_timeout_ms: host.release_timeout.as_millis() as u64,
            guest_release_timeout_ms: guest.release_timeout.as_millis() as u64,
            idle_timeout_ms: guest.idle_timeout.as_millis() as u64,
        }
    }
}

/// Raw pipeline section.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawPipelineConfig {
    hardware_counters: bool,
    flush_cache: bool,
}

impl Default for RawPipelineConfig {
    fn default() -> Self {
        let defaults = PipelineConfig::default();
        Self {
            hardware_counters: defaults.hardware_counters,
            flush_cache: defaults.flush_cache,
        }
    }
}

/// Raw root document.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawConfig {
    transport: RawTransportConfig,
    protocol: RawProtocolConfig,
    pipeline: RawPipelineConfig,
    overhead_formula: OverheadFormula,
}

/// Validated benchmark configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BenchConfig {
    pub transport: TransportConfig,
    pub host: HostConfig,
    pub guest: GuestConfig,
    pub pipeline: PipelineConfig,
}

/// Configuration loader with strict validation.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate configuration from a YAML file.
    pub fn load_file(path: impl AsRef<Path>) -> IvResult<BenchConfig> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            }
            .into());
        }

        let content = std::fs::read_to_string(path).map_err(|e| IvError::Io {
            context: "reading config file",
            source: e,
        })?;

        Self::load_string(&content)
    }

    /// Load and validate configuration from a YAML string.
    pub fn load_string(content: &str) -> IvResult<BenchConfig> {
        // serde_yaml reads an empty document as unit, not as an empty map.
        if content.trim().is_empty() {
            return Ok(BenchConfig::default());
        }

        let raw: RawConfig = serde_yaml::from_str(content).map_err(|e| ConfigError::Parse {
            message: format!("YAML parse error: {}", e),
        })?;

        Ok(Self::validate(raw)?)
    }

    fn validate(raw: RawConfig) -> Result<BenchConfig, ConfigError> {
        let transport = Self::validate_transport(raw.transport)?;
        let (mut host, guest) = Self::validate_protocol(raw.protocol)?;
        host.overhead = raw.overhead_formula;

        Ok(BenchConfig {
            transport,
            host,
            guest,
            pipeline: PipelineConfig {
                hardware_counters: raw.pipeline.hardware_counters,
                flush_cache: raw.pipeline.flush_cache,
            },
        })
    }

    fn validate_transport(raw: RawTransportConfig) -> Result<TransportConfig, ConfigError> {
        // 1 MiB to 1 GiB, matching what a region can be mapped with
        if raw.region_size_mb == 0 || raw.region_size_mb > 1024 {
            return Err(ConfigError::InvalidFieldValue {
                field: "region_size_mb",
                value: raw.region_size_mb.to_string(),
                reason: "Must be between 1 and 1024".to_string(),
            });
        }

        for (field, value) in [
            ("pci_resource", &raw.pci_resource),
            ("fallback_path", &raw.fallback_path),
        ] {
            if value.is_empty() {
                return Err(ConfigError::InvalidFieldValue {
                    field,
                    value: String::new(),
                    reason: "Path cannot be empty".to_string(),
                });
            }
        }

        Ok(TransportConfig {
            pci_resource: PathBuf::from(raw.pci_resource),
            write_combining: raw.write_combining,
            fallback_path: PathBuf::from(raw.fallback_path),
            region_size: raw.region_size_mb * MIB,
        })
    }

    fn validate_protocol(raw: RawProtocolConfig) -> Result<(HostConfig, GuestConfig), ConfigError> {
        if raw.poll_interval_us > 10_000 {
            return Err(ConfigError::InvalidFieldValue {
                field: "poll_interval_us",
                value: raw.poll_interval_us.to_string(),
                reason: "Poll interval must not exceed 10000us".to_string(),
            });
        }

        if raw.attach_interval_ms == 0 || raw.attach_interval_ms > 1_000 {
            return Err(ConfigError::InvalidFieldValue {
                field: "attach_interval_ms",
                value: raw.attach_interval_ms.to_string(),
                reason: "Must be between 1 and 1000".to_string(),
            });
        }

        let timeouts = [
            ("attach_timeout_ms", raw.attach_timeout_ms),
            ("guest_ready_timeout_ms", raw.guest_ready_timeout_ms),
            ("processing_timeout_ms", raw.processing_timeout_ms),
            ("ack_timeout_ms", raw.ack_timeout_ms),
            ("host_release_timeout_ms", raw.host_release_timeout_ms),
            ("guest_release_timeout_ms", raw.guest_release_timeout_ms),
            ("idle_timeout_ms", raw.idle_timeout_ms),
        ];
        for (field, value) in timeouts {
            // 1ms to 1 hour
            if value == 0 || value > 3_600_000 {
                return Err(ConfigError::InvalidFieldValue {
                    field,
                    value: value.to_string(),
                    reason: "Timeout must be between 1 and 3600000ms".to_string(),
                });
            }
        }

        let poll_interval = Duration::from_micros(raw.poll_interval_us);
        let host = HostConfig {
            poll_interval,
            guest_ready_timeout: Duration::from_millis(raw.guest_ready_timeout_ms),
            processing_timeout: Duration::from_millis(raw.processing_timeout_ms),
            ack_timeout: Duration::from_millis(raw.ack_timeout_ms),
            release_timeout: Duration::from_millis(raw.host_release_timeout_ms),
            overhead: OverheadFormula::default(),
        };
        let guest = GuestConfig {
            poll_interval,
            attach_interval: Duration::from_millis(raw.attach_interval_ms),
            attach_timeout: Duration::from_millis(raw.attach_timeout_ms),
            idle_timeout: Duration::from_millis(raw.idle_timeout_ms),
            release_timeout: Duration::from_millis(raw.guest_release_timeout_ms),
        };
        Ok((host, guest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_CONFIG: &str = r#"
transport:
  pci_resource: /sys/bus/pci/devices/0000:00:04.0/resource2
  write_combining: true
  fallback_path: /dev/shm/ivmark-test
  region_size_mb: 16

protocol:
  poll_interval_us: 0
  attach_interval_ms: 5
  attach_timeout_ms: 1000
  guest_ready_timeout_ms: 2000
  processing_timeout_ms: 500
  ack_timeout_ms: 3000
  host_release_timeout_ms: 250
  guest_release_timeout_ms: 750
  idle_timeout_ms: 4000

pipeline:
  hardware_counters: false
  flush_cache: false

overhead_formula: guest_total_excluding_verify
"#;

    #[test]
    fn test_full_config() {
        let config = ConfigLoader::load_string(FULL_CONFIG).unwrap();
        assert_eq!(config.transport.region_size, 16 * MIB);
        assert!(config.transport.write_combining);
        assert_eq!(
            config.transport.resource_path(),
            PathBuf::from("/sys/bus/pci/devices/0000:00:04.0/resource2_wc")
        );
        assert_eq!(config.host.poll_interval, Duration::ZERO);
        assert_eq!(config.host.processing_timeout, Duration::from_millis(500));
        assert_eq!(config.host.release_timeout, Duration::from_millis(250));
        assert_eq!(config.guest.release_timeout, Duration::from_millis(750));
        assert_eq!(config.guest.attach_interval, Duration::from_millis(5));
        assert_eq!(config.guest.idle_timeout, Duration::from_secs(4));
        assert_eq!(config.host.overhead, OverheadFormula::GuestTotalExcludingVerify);
        assert!(!config.pipeline.hardware_counters);
        assert!(!config.pipeline.flush_cache);
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        assert_eq!(ConfigLoader::load_string("").unwrap(), BenchConfig::default());
        assert_eq!(ConfigLoader::load_string("{}").unwrap(), BenchConfig::default());
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = ConfigLoader::load_string("protocol:\n  ack_timeout_ms: 42\n").unwrap();
        assert_eq!(config.host.ack_timeout, Duration::from_millis(42));
        assert_eq!(config.host.processing_timeout, HostConfig::default().processing_timeout);
        assert_eq!(config.transport, TransportConfig::default());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let result = ConfigLoader::load_string("protocol:\n  ack_timeout_ms: 0\n");
        assert!(matches!(
            result,
            Err(IvError::Config(ConfigError::InvalidFieldValue {
                field: "ack_timeout_ms",
                ..
            }))
        ));
    }

    #[test]
    fn test_region_size_out_of_range() {
        assert!(ConfigLoader::load_string("transport:\n  region_size_mb: 0\n").is_err());
        assert!(ConfigLoader::load_string("transport:\n  region_size_mb: 2048\n").is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = ConfigLoader::load_string("transport:\n  region_size: 16\n");
        assert!(matches!(result, Err(IvError::Config(ConfigError::Parse { .. }))));
    }

    #[test]
    fn test_unknown_overhead_formula() {
        assert!(ConfigLoader::load_string("overhead_formula: wall_clock\n").is_err());
    }

    #[test]
    fn test_missing_file() {
        let result = ConfigLoader::load_file("/nonexistent/ivmark.yaml");
        assert!(matches!(result, Err(IvError::Config(ConfigError::NotFound { .. }))));
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ivmark.yaml");
        std::fs::write(&path, FULL_CONFIG).unwrap();
        let config = ConfigLoader::load_file(&path).unwrap();
        assert_eq!(config.transport.fallback_path, PathBuf::from("/dev/shm/ivmark-test"));
    }
}
