//! Store configuration
//!
//! [`StoreConfig`] decides where new tensors live and how much memory the
//! store and the algebra may use. It can be built in code, read from a JSON
//! file, or taken from the environment.
//!
//! # Environment Variables
//!
//! - `TELUM_BACKEND`: `memory` or `mmap`
//! - `TELUM_DATA_DIR`: directory for tensor files and the manifest
//! - `TELUM_MEMORY_LIMIT_MB`: per-tensor limit for the memory backend
//! - `TELUM_TILE_BYTES`: buffer budget for one algebra tile
//!
//! # Example
//!
//! ```
//! use telum_ooc::{BackendKind, StoreConfig};
//!
//! let config = StoreConfig::new()
//!     .memory_limit_mb(256)
//!     .tile_bytes(1 << 20);
//! assert_eq!(config.backend, BackendKind::Memory);
//! assert!(config.validate().is_ok());
//! ```

use crate::backend::BackendKind;
use crate::error::StoreError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_MEMORY_LIMIT: usize = 1024 * 1024 * 1024; // 1GB
const DEFAULT_TILE_BYTES: usize = 4 * 1024 * 1024; // 4MB

/// Configuration shared by the registry, the stores it allocates and the algebra.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Backend for newly created tensors (default: memory)
    pub backend: BackendKind,
    /// Directory holding `<name>.tensor` files and `manifest.json`
    pub data_dir: Option<PathBuf>,
    /// Largest single allocation the memory backend accepts (default: 1GB)
    pub memory_limit_bytes: usize,
    /// Buffer budget per operand tile in algebra (default: 4MB)
    pub tile_bytes: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            data_dir: None,
            memory_limit_bytes: DEFAULT_MEMORY_LIMIT,
            tile_bytes: DEFAULT_TILE_BYTES,
        }
    }
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// File-backed configuration rooted at `dir`.
    pub fn mmap(dir: impl Into<PathBuf>) -> Self {
        Self::new().backend(BackendKind::Mmap).data_dir(dir)
    }

    pub fn backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    /// Set the memory backend limit in megabytes
    pub fn memory_limit_mb(mut self, mb: usize) -> Self {
        self.memory_limit_bytes = mb.saturating_mul(1024 * 1024);
        self
    }

    pub fn memory_limit_bytes(mut self, bytes: usize) -> Self {
        self.memory_limit_bytes = bytes;
        self
    }

    pub fn tile_bytes(mut self, bytes: usize) -> Self {
        self.tile_bytes = bytes;
        self
    }

    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by any `TELUM_*` variables that are set.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(backend) = std::env::var("TELUM_BACKEND") {
            config.backend = backend.parse()?;
        }
        if let Ok(dir) = std::env::var("TELUM_DATA_DIR") {
            config.data_dir = Some(PathBuf::from(dir));
        }
        if let Ok(mb) = std::env::var("TELUM_MEMORY_LIMIT_MB") {
            let mb: usize = mb
                .trim()
                .parse()
                .with_context(|| format!("TELUM_MEMORY_LIMIT_MB={mb}"))?;
            config = config.memory_limit_mb(mb);
        }
        if let Ok(bytes) = std::env::var("TELUM_TILE_BYTES") {
            config.tile_bytes = bytes
                .trim()
                .parse()
                .with_context(|| format!("TELUM_TILE_BYTES={bytes}"))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the configuration is usable.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` if the tile budget is zero, or the mmap backend is
    /// selected without a data directory or without the `mmap` feature.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.tile_bytes == 0 {
            return Err(StoreError::invalid("tile_bytes must be positive"));
        }

        if self.backend == BackendKind::Mmap {
            if !cfg!(feature = "mmap") {
                return Err(StoreError::invalid(
                    "mmap backend requested but the `mmap` feature is disabled",
                ));
            }
            if self.data_dir.is_none() {
                return Err(StoreError::invalid("mmap backend requires a data_dir"));
            }
        }

        Ok(())
    }

    /// File that holds tensor `name`, when a data directory is configured.
    pub fn tensor_path(&self, name: &str) -> Option<PathBuf> {
        self.data_dir
            .as_ref()
            .map(|dir| dir.join(format!("{name}.tensor")))
    }

    pub fn manifest_path(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|dir| dir.join("manifest.json"))
    }
}
