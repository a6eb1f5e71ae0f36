// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! SharedMemoryRegion - mmap wrapper over every backing the channel can live in.
//!
//! A region is a raw, page-resident, cache-coherent byte range. It can come
//! from a named POSIX shm object, from a file or device resource (the ivshmem
//! PCI BAR or `/dev/shm/ivshmem`), or from an anonymous shared mapping used
//! when both endpoints live in one process.

use std::ffi::CString;
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{IntoRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

use crate::error::SharedMemoryError;

/// Where the mapped bytes come from.
#[derive(Debug)]
enum Backing {
    /// Named POSIX shared memory object.
    Posix { name: String, fd: RawFd, is_owner: bool },
    /// Regular file or device resource.
    File { path: PathBuf, fd: RawFd },
    /// MAP_SHARED | MAP_ANONYMOUS, visible to this process only.
    Anonymous,
}

/// Represents a mapped shared memory region.
///
/// This struct owns the mapping and will unmap it on drop.
pub struct SharedMemoryRegion {
    backing: Backing,
    /// Pointer to the mapped memory.
    ptr: NonNull<u8>,
    /// Size of the mapped region in bytes.
    size: usize,
}

// SAFETY: SharedMemoryRegion owns its mapping; access is coordinated by the
// channel protocol, never by Rust references handed out across threads.
unsafe impl Send for SharedMemoryRegion {}

// SAFETY: All header accesses go through atomics; payload accesses are
// serialized by the host/guest state handoff.
unsafe impl Sync for SharedMemoryRegion {}

impl SharedMemoryRegion {
    /// Minimum size for a shared memory region.
    pub const MIN_SIZE: usize = 4096;

    /// Maximum size for a shared memory region (1 GB).
    pub const MAX_SIZE: usize = 1024 * 1024 * 1024;

    /// Create a new named POSIX shared memory region.
    ///
    /// # Arguments
    /// * `name` - Name of the shared memory object (will be prefixed with /)
    /// * `size` - Size in bytes (must be between MIN_SIZE and MAX_SIZE)
    ///
    /// # Errors
    /// Returns SharedMemoryError if creation or mapping fails.
    pub fn create(name: &str, size: usize) -> Result<Self, SharedMemoryError> {
        Self::validate_size(name, size)?;

        if name.is_empty() {
            return Err(SharedMemoryError::CreateFailed {
                name: name.to_string(),
                reason: "Name cannot be empty".to_string(),
            });
        }

        let c_name = Self::posix_name(name)?;

        // SAFETY: c_name is a valid CString, flags are valid POSIX flags
        let fd = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_RDWR | libc::O_EXCL,
                0o600,
            )
        };

        if fd < 0 {
            let errno = std::io::Error::last_os_error();
            if errno.raw_os_error() == Some(libc::EEXIST) {
                return Err(SharedMemoryError::CreateFailed {
                    name: name.to_string(),
                    reason: "Shared memory already exists".to_string(),
                });
            }
            return Err(SharedMemoryError::CreateFailed {
                name: name.to_string(),
                reason: format!("shm_open failed: {}", errno),
            });
        }

        // SAFETY: fd is a valid file descriptor
        let result = unsafe { libc::ftruncate(fd, size as libc::off_t) };
        if result < 0 {
            let errno = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            unsafe { libc::shm_unlink(c_name.as_ptr()) };
            return Err(SharedMemoryError::CreateFailed {
                name: name.to_string(),
                reason: format!("ftruncate failed: {}", errno),
            });
        }

        let ptr = match Self::map(fd, size) {
            Ok(ptr) => ptr,
            Err(e) => {
                unsafe { libc::close(fd) };
                unsafe { libc::shm_unlink(c_name.as_ptr()) };
                return Err(e);
            }
        };

        tracing::debug!(name = %name, size = size, "Created shared memory region");

        Ok(Self {
            backing: Backing::Posix {
                name: name.to_string(),
                fd,
                is_owner: true,
            },
            ptr,
            size,
        })
    }

    /// Open an existing named POSIX shared memory region.
    pub fn open(name: &str, size: usize) -> Result<Self, SharedMemoryError> {
        Self::validate_size(name, size)?;
        let c_name = Self::posix_name(name)?;

        // SAFETY: c_name is a valid CString
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0) };

        if fd < 0 {
            return Err(SharedMemoryError::CreateFailed {
                name: name.to_string(),
                reason: format!("shm_open failed: {}", std::io::Error::last_os_error()),
            });
        }

        let ptr = match Self::map(fd, size) {
            Ok(ptr) => ptr,
            Err(e) => {
                unsafe { libc::close(fd) };
                return Err(e);
            }
        };

        tracing::debug!(name = %name, size = size, "Opened shared memory region");

        Ok(Self {
            backing: Backing::Posix {
                name: name.to_string(),
                fd,
                is_owner: false,
            },
            ptr,
            size,
        })
    }

    /// Map a file or device resource in full.
    ///
    /// The size is taken from the file itself. Device resources are opened
    /// with `O_SYNC` so the guest sees an uncached view of the PCI BAR.
    pub fn open_path(path: impl AsRef<Path>, sync: bool) -> Result<Self, SharedMemoryError> {
        let path = path.as_ref();
        let mut options = OpenOptions::new();
        options.read(true).write(true);
        if sync {
            options.custom_flags(libc::O_SYNC);
        }

        let file = options
            .open(path)
            .map_err(|e| SharedMemoryError::OpenFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        let size = file
            .metadata()
            .map_err(|e| SharedMemoryError::OpenFailed {
                path: path.to_path_buf(),
                reason: format!("fstat failed: {}", e),
            })?
            .len() as usize;

        if !(Self::MIN_SIZE..=Self::MAX_SIZE).contains(&size) {
            return Err(SharedMemoryError::OpenFailed {
                path: path.to_path_buf(),
                reason: format!("Invalid size: {}", size),
            });
        }

        let fd = file.into_raw_fd();
        let ptr = match Self::map(fd, size) {
            Ok(ptr) => ptr,
            Err(e) => {
                unsafe { libc::close(fd) };
                return Err(e);
            }
        };

        tracing::debug!(path = %path.display(), size = size, "Mapped shared memory resource");

        Ok(Self {
            backing: Backing::File {
                path: path.to_path_buf(),
                fd,
            },
            ptr,
            size,
        })
    }

    /// Create a backing file of the given size if it does not exist yet.
    ///
    /// Used by the host for same-machine runs where no VM provides the device.
    pub fn ensure_file(path: impl AsRef<Path>, size: usize) -> Result<(), SharedMemoryError> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o666)
            .open(path)
            .map_err(|e| SharedMemoryError::OpenFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        let current = file.metadata().map(|m| m.len()).unwrap_or(0) as usize;
        if current < size {
            file.set_len(size as u64)
                .map_err(|e| SharedMemoryError::OpenFailed {
                    path: path.to_path_buf(),
                    reason: format!("set_len failed: {}", e),
                })?;
            tracing::info!(path = %path.display(), size = size, "Sized shared memory backing file");
        }
        Ok(())
    }

    /// Create an anonymous shared mapping, zero-filled by the kernel.
    pub fn anonymous(size: usize) -> Result<Self, SharedMemoryError> {
        Self::validate_size("anonymous", size)?;

        // SAFETY: anonymous mapping, no fd, size validated
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(SharedMemoryError::MapFailed {
                reason: format!("mmap failed: {}", std::io::Error::last_os_error()),
            });
        }

        let ptr = NonNull::new(ptr as *mut u8).ok_or_else(|| SharedMemoryError::MapFailed {
            reason: "mmap returned null".to_string(),
        })?;

        Ok(Self {
            backing: Backing::Anonymous,
            ptr,
            size,
        })
    }

    fn validate_size(name: &str, size: usize) -> Result<(), SharedMemoryError> {
        if size < Self::MIN_SIZE {
            return Err(SharedMemoryError::CreateFailed {
                name: name.to_string(),
                reason: format!("Size {} is below minimum {}", size, Self::MIN_SIZE),
            });
        }
        if size > Self::MAX_SIZE {
            return Err(SharedMemoryError::CreateFailed {
                name: name.to_string(),
                reason: format!("Size {} exceeds maximum {}", size, Self::MAX_SIZE),
            });
        }
        Ok(())
    }

    fn posix_name(name: &str) -> Result<CString, SharedMemoryError> {
        CString::new(format!("/{}", name)).map_err(|e| SharedMemoryError::CreateFailed {
            name: name.to_string(),
            reason: format!("Invalid name: {}", e),
        })
    }

    fn map(fd: RawFd, size: usize) -> Result<NonNull<u8>, SharedMemoryError> {
        // SAFETY: fd is valid, size is validated, offset 0 is valid
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(SharedMemoryError::MapFailed {
                reason: format!("mmap failed: {}", std::io::Error::last_os_error()),
            });
        }

        NonNull::new(ptr as *mut u8).ok_or_else(|| SharedMemoryError::MapFailed {
            reason: "mmap returned null".to_string(),
        })
    }

    /// Human-readable description of the backing, for logs.
    pub fn describe(&self) -> String {
        match &self.backing {
            Backing::Posix { name, .. } => format!("shm:/{}", name),
            Backing::File { path, .. } => path.display().to_string(),
            Backing::Anonymous => "anonymous".to_string(),
        }
    }

    /// Get the size of this shared memory region.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Get a raw pointer to the shared memory.
    ///
    /// Callers must ensure proper synchronization when accessing the memory.
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

impl Drop for SharedMemoryRegion {
    fn drop(&mut self) {
        // SAFETY: ptr and size were set during creation
        let result = unsafe { libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.size) };
        if result < 0 {
            tracing::error!(
                region = %self.describe(),
                error = %std::io::Error::last_os_error(),
                "Failed to unmap shared memory"
            );
        }

        match &self.backing {
            Backing::Posix { name, fd, is_owner } => {
                // SAFETY: fd was opened during creation
                unsafe { libc::close(*fd) };
                if *is_owner {
                    if let Ok(c_name) = CString::new(format!("/{}", name)) {
                        // SAFETY: c_name is a valid CString
                        unsafe { libc::shm_unlink(c_name.as_ptr()) };
                        tracing::debug!(name = %name, "Unlinked shared memory region");
                    }
                }
            }
            Backing::File { fd, .. } => {
                // SAFETY: fd was taken from the opened file
                unsafe { libc::close(*fd) };
            }
            Backing::Anonymous => {}
        }
    }
}
