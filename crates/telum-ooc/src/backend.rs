//! Physical byte storage behind a chunk store
//!
//! A backend is a flat, zero-initialized byte buffer. The chunk store owns
//! exactly one backend and performs all addressing itself; backends never see
//! shapes or chunk coordinates.
//!
//! # Backends
//!
//! - [`MemoryBackend`]: heap buffer, bounded by the configured memory limit
//! - [`MmapBackend`]: memory-mapped file under the registry's data directory,
//!   so tensors larger than RAM are paged in and out by the OS
//!   (`mmap` feature, enabled by default)

use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

#[cfg(feature = "mmap")]
use memmap2::MmapMut;
#[cfg(feature = "mmap")]
use std::fs::{File, OpenOptions};
#[cfg(feature = "mmap")]
use std::path::PathBuf;

/// Which kind of backend new tensors are allocated in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Heap memory; contents are lost when the tensor is dropped
    #[default]
    Memory,
    /// Memory-mapped file; contents persist across registry reopen
    Mmap,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::Mmap => "mmap",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" | "mem" => Ok(BackendKind::Memory),
            "mmap" | "file" => Ok(BackendKind::Mmap),
            other => Err(StoreError::invalid(format!("unknown backend '{other}'"))),
        }
    }
}

/// Flat byte storage owned by a single chunk store.
pub trait StorageBackend: Send + Sync + fmt::Debug {
    fn kind(&self) -> BackendKind;

    fn bytes(&self) -> &[u8];

    fn bytes_mut(&mut self) -> &mut [u8];

    fn len(&self) -> usize {
        self.bytes().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Persist outstanding writes. A no-op for volatile backends.
    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Backing file, if any.
    fn path(&self) -> Option<&Path> {
        None
    }
}

/// Heap-allocated backend.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    bytes: Vec<u8>,
}

impl MemoryBackend {
    /// Reserve `len` zeroed bytes.
    ///
    /// # Errors
    ///
    /// `OutOfMemory` if `len` exceeds `limit` or the allocator refuses the
    /// reservation.
    pub fn zeroed(len: usize, limit: usize) -> Result<Self, StoreError> {
        if len > limit {
            return Err(StoreError::OutOfMemory {
                bytes: len,
                reason: format!("exceeds in-memory limit of {limit} bytes"),
            });
        }

        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(len)
            .map_err(|e| StoreError::OutOfMemory {
                bytes: len,
                reason: e.to_string(),
            })?;
        bytes.resize(len, 0);

        Ok(Self { bytes })
    }
}

impl StorageBackend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

/// File-backed backend using a shared writable memory map.
///
/// Zero-length tensors keep no mapping, since empty files cannot be mapped.
#[cfg(feature = "mmap")]
#[derive(Debug)]
pub struct MmapBackend {
    path: PathBuf,
    map: Option<MmapMut>,
}

#[cfg(feature = "mmap")]
impl MmapBackend {
    /// Create a new zero-filled file of `len` bytes and map it.
    ///
    /// Fails if the file already exists, so two tensors can never share a file.
    /// A file this call created is removed again if sizing or mapping fails.
    pub fn create(path: &Path, len: usize) -> Result<Self, StoreError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        let mapped = file
            .set_len(len as u64)
            .map_err(StoreError::from)
            .and_then(|()| Self::map(path, &file, len));
        if mapped.is_err() {
            drop(file);
            if let Err(e) = std::fs::remove_file(path) {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove partial tensor file");
            }
        }
        mapped
    }

    /// Map an existing tensor file, checking it holds exactly `len` bytes.
    pub fn open(path: &Path, len: usize) -> Result<Self, StoreError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let actual = file.metadata()?.len();
        if actual != len as u64 {
            return Err(StoreError::invalid(format!(
                "{} holds {actual} bytes, expected {len}",
                path.display()
            )));
        }
        Self::map(path, &file, len)
    }

    fn map(path: &Path, file: &File, len: usize) -> Result<Self, StoreError> {
        let map = if len == 0 {
            None
        } else {
            // SAFETY: the file was opened by this backend and is only accessed
            // through this mapping while the owning store is alive.
            Some(unsafe { MmapMut::map_mut(file)? })
        };

        Ok(Self {
            path: path.to_path_buf(),
            map,
        })
    }
}

#[cfg(feature = "mmap")]
impl StorageBackend for MmapBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Mmap
    }

    fn bytes(&self) -> &[u8] {
        self.map.as_deref().unwrap_or(&[])
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        match self.map.as_mut() {
            Some(map) => &mut map[..],
            None => &mut [],
        }
    }

    fn flush(&self) -> Result<(), StoreError> {
        if let Some(map) = &self.map {
            map.flush()?;
        }
        Ok(())
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}
