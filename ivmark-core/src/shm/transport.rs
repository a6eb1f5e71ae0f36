// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Locating the memory that backs the channel.
//!
//! Inside a VM the ivshmem device exposes its shared BAR as a PCI resource
//! file. On the host (or in a VM-less test setup) the same bytes live in a
//! plain file under `/dev/shm`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::SharedMemoryError;
use crate::shm::SharedMemoryRegion;

/// Default ivshmem BAR resource inside the guest.
pub const DEFAULT_PCI_RESOURCE: &str = "/sys/bus/pci/devices/0000:00:03.0/resource2";

/// Default host-side backing file handed to QEMU as the ivshmem memory.
pub const DEFAULT_SHM_PATH: &str = "/dev/shm/ivshmem";

/// Default region size (64 MiB).
pub const DEFAULT_REGION_SIZE: usize = 64 * 1024 * 1024;

/// Where to look for the shared region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// PCI BAR resource of the ivshmem device.
    pub pci_resource: PathBuf,
    /// Map the write-combining variant of the BAR (`resource2_wc`).
    pub write_combining: bool,
    /// File used when no PCI device is present.
    pub fallback_path: PathBuf,
    /// Size used when the host creates the fallback file.
    pub region_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            pci_resource: PathBuf::from(DEFAULT_PCI_RESOURCE),
            write_combining: false,
            fallback_path: PathBuf::from(DEFAULT_SHM_PATH),
            region_size: DEFAULT_REGION_SIZE,
        }
    }
}

impl TransportConfig {
    /// The PCI resource path actually mapped, honoring `write_combining`.
    pub fn resource_path(&self) -> PathBuf {
        if self.write_combining {
            let mut name = self.pci_resource.clone().into_os_string();
            name.push("_wc");
            PathBuf::from(name)
        } else {
            self.pci_resource.clone()
        }
    }
}

/// A discovered transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    /// ivshmem PCI BAR, seen from inside the guest.
    PciResource(PathBuf),
    /// Regular file, seen from the host or a VM-less setup.
    SharedFile(PathBuf),
}

impl Transport {
    /// Pick the PCI resource if it exists, else the fallback file.
    pub fn discover(config: &TransportConfig) -> Result<Self, SharedMemoryError> {
        let resource = config.resource_path();
        if resource.exists() {
            tracing::info!(path = %resource.display(), "Using ivshmem PCI resource");
            return Ok(Self::PciResource(resource));
        }

        if config.fallback_path.exists() {
            tracing::info!(
                path = %config.fallback_path.display(),
                "PCI device not found, using shared memory file"
            );
            return Ok(Self::SharedFile(config.fallback_path.clone()));
        }

        Err(SharedMemoryError::TransportNotFound {
            tried: vec![resource, config.fallback_path.clone()],
        })
    }

    /// Create the fallback file at the configured size, then discover.
    ///
    /// Only the host does this; a guest must never invent its own region.
    pub fn create_fallback(config: &TransportConfig) -> Result<Self, SharedMemoryError> {
        SharedMemoryRegion::ensure_file(&config.fallback_path, config.region_size)?;
        Ok(Self::SharedFile(config.fallback_path.clone()))
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::PciResource(path) | Self::SharedFile(path) => path,
        }
    }

    /// Map the transport in full.
    pub fn map(&self) -> Result<SharedMemoryRegion, SharedMemoryError> {
        match self {
            // Uncached view of device memory
            Self::PciResource(path) => SharedMemoryRegion::open_path(path, true),
            Self::SharedFile(path) => SharedMemoryRegion::open_path(path, false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_combining_path() {
        let config = TransportConfig {
            write_combining: true,
            ..Default::default()
        };
        assert_eq!(
            config.resource_path(),
            PathBuf::from("/sys/bus/pci/devices/0000:00:03.0/resource2_wc")
        );
        assert_eq!(
            TransportConfig::default().resource_path(),
            PathBuf::from(DEFAULT_PCI_RESOURCE)
        );
    }

    #[test]
    fn test_discover_falls_back_to_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let fallback = dir.path().join("ivshmem");
        std::fs::write(&fallback, vec![0u8; 8192]).unwrap();

        let config = TransportConfig {
            pci_resource: dir.path().join("resource2"),
            fallback_path: fallback.clone(),
            ..Default::default()
        };
        assert_eq!(
            Transport::discover(&config).unwrap(),
            Transport::SharedFile(fallback)
        );
    }

    #[test]
    fn test_discover_prefers_pci_resource() {
        let dir = tempfile::TempDir::new().unwrap();
        let resource = dir.path().join("resource2");
        std::fs::write(&resource, vec![0u8; 8192]).unwrap();

        let config = TransportConfig {
            pci_resource: resource.clone(),
            fallback_path: dir.path().join("missing"),
            ..Default::default()
        };
        assert_eq!(
            Transport::discover(&config).unwrap(),
            Transport::PciResource(resource)
        );
    }

    #[test]
    fn test_discover_reports_every_path_tried() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = TransportConfig {
            pci_resource: dir.path().join("resource2"),
            fallback_path: dir.path().join("ivshmem"),
            ..Default::default()
        };
        match Transport::discover(&config) {
            Err(SharedMemoryError::TransportNotFound { tried }) => assert_eq!(tried.len(), 2),
            other => panic!("unexpected: {:?}", other.map(|t| t.path().to_path_buf())),
        }
    }

    #[test]
    fn test_create_fallback_sizes_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = TransportConfig {
            pci_resource: dir.path().join("resource2"),
            fallback_path: dir.path().join("ivshmem"),
            region_size: 64 * 1024,
            ..Default::default()
        };
        let transport = Transport::create_fallback(&config).unwrap();
        let region = transport.map().unwrap();
        assert_eq!(region.size(), 64 * 1024);
    }
}
