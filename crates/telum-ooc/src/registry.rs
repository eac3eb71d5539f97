//! Named tensor registry
//!
//! [`TensorRegistry`] is the entry point applications use: it owns every
//! tensor it creates, hands out [`TensorHandle`]s by name, runs algebra on
//! named operands and persists file-backed tensors across restarts.
//!
//! # Persistence
//!
//! With a data directory configured, each mmap-backed tensor lives in
//! `<data_dir>/<name>.tensor` (raw row-major little-endian bytes).
//! [`sync`](TensorRegistry::sync) flushes every store and writes
//! `<data_dir>/manifest.json` recording names, shapes, dtypes and metadata;
//! [`open`](TensorRegistry::open) maps the listed files back in.
//!
//! A tensor file outlives the registry only once `sync` has recorded it.
//! Unrecorded files are deleted when their tensor drops, and `open` removes
//! any `.tensor` file the manifest does not list (left behind by a crash).
//!
//! # Concurrency
//!
//! The name map has its own lock, held only for lookups and inserts. Chunk
//! I/O, algebra and flushing run on handles after the map lock is released.
//! A name is reserved before its tensor is built, so concurrent creations
//! and algebra results never race for the same name.
//!
//! # Example
//!
//! ```
//! use telum_core::{DType, Shape};
//! use telum_ooc::TensorRegistry;
//!
//! let registry = TensorRegistry::in_memory();
//! let a = registry.create_tensor("a", Shape::from_dims(&[4])?, DType::Int64)?;
//! a.store_elements(&[0], &[4], &[1i64, 2, 3, 4])?;
//!
//! let total = registry.reduce("a", telum_ooc::ReduceOp::Sum)?;
//! assert_eq!(total, 10.0);
//! assert_eq!(registry.list_tensors(), vec!["a".to_string()]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::algebra::{BinaryOp, ReduceOp, TensorAlgebra, UnaryOp};
use crate::backend::BackendKind;
use crate::config::StoreConfig;
use crate::error::{RegistryError, StoreError};
use crate::handle::{Tensor, TensorHandle};
use crate::tracing_support::record_io;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::ErrorKind as IoErrorKind;
use std::time::Instant;
use telum_core::{validate_shape, DType, Shape};

const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    version: u32,
    tensors: Vec<ManifestEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ManifestEntry {
    name: String,
    shape: Shape,
    dtype: DType,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

/// Registry statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub tensors: usize,
    pub total_bytes: usize,
    /// Tensors recorded by `sync`, whose file survives the registry
    pub persistent: usize,
}

/// Owner of named tensors.
#[derive(Debug)]
pub struct TensorRegistry {
    config: StoreConfig,
    algebra: TensorAlgebra,
    tensors: RwLock<HashMap<String, Tensor>>,
    /// Names claimed by tensors still being built
    reserved: Mutex<HashSet<String>>,
}

/// Claim on a name, released on drop.
struct Reservation<'a> {
    reserved: &'a Mutex<HashSet<String>>,
    name: String,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.reserved.lock().remove(&self.name);
    }
}

impl TensorRegistry {
    /// Volatile registry with the default configuration.
    pub fn in_memory() -> Self {
        Self::with_config(StoreConfig::default())
    }

    fn with_config(config: StoreConfig) -> Self {
        Self {
            algebra: TensorAlgebra::new(config.clone()),
            config,
            tensors: RwLock::new(HashMap::new()),
            reserved: Mutex::new(HashSet::new()),
        }
    }

    /// Open a registry, creating the data directory if needed and reloading
    /// every tensor listed in its manifest.
    ///
    /// Listed tensors whose file is gone are skipped, and `.tensor` files
    /// the manifest does not list are removed.
    ///
    /// # Errors
    ///
    /// - `InvalidParameter` for an unusable configuration or unsupported manifest
    /// - `Manifest` if `manifest.json` cannot be parsed
    /// - `Io` if the directory or a tensor file cannot be opened
    #[tracing::instrument(level = "info", skip(config), fields(data_dir = ?config.data_dir))]
    pub fn open(config: StoreConfig) -> Result<Self, RegistryError> {
        config.validate()?;
        if let Some(dir) = &config.data_dir {
            std::fs::create_dir_all(dir)?;
        }

        let registry = Self::with_config(config);
        registry.load_manifest()?;
        registry.remove_unlisted_files()?;
        Ok(registry)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Create a zero-initialized tensor.
    ///
    /// # Errors
    ///
    /// - `InvalidName` if `name` is empty or not a safe file stem
    /// - `AlreadyExists` if the name is taken
    /// - `FileConflict` if a file this registry does not own already holds the name
    /// - Store errors from allocation (`InvalidShape`, `OutOfMemory`, `Io`)
    pub fn create_tensor(
        &self,
        name: &str,
        shape: Shape,
        dtype: DType,
    ) -> Result<TensorHandle, RegistryError> {
        validate_name(name)?;
        let _reservation = self.reserve(name)?;

        let tensor = self.create_named(name, shape, dtype)?;
        tracing::info!(tensor = name, shape = %tensor.shape(), %dtype, "created tensor");
        self.adopt(tensor)
    }

    /// [`create_tensor`](Self::create_tensor) from signed dimensions.
    pub fn create_tensor_from_dims(
        &self,
        name: &str,
        dims: &[i64],
        dtype: DType,
    ) -> Result<TensorHandle, RegistryError> {
        let shape = validate_shape(dims)?;
        self.create_tensor(name, shape, dtype)
    }

    /// Take ownership of an existing tensor, e.g. an algebra result.
    pub fn insert(&self, tensor: Tensor) -> Result<TensorHandle, RegistryError> {
        validate_name(tensor.name())?;
        let _reservation = self.reserve(tensor.name())?;
        self.adopt(tensor)
    }

    pub fn get_tensor(&self, name: &str) -> Result<TensorHandle, RegistryError> {
        self.tensors
            .read()
            .get(name)
            .map(Tensor::handle)
            .ok_or_else(|| RegistryError::NotFound { name: name.into() })
    }

    /// Remove a tensor and release its storage, including its file.
    ///
    /// Outstanding handles fail with `NotConnected` afterwards.
    pub fn drop_tensor(&self, name: &str) -> Result<(), RegistryError> {
        let tensor = self
            .tensors
            .write()
            .remove(name)
            .ok_or_else(|| RegistryError::NotFound { name: name.into() })?;

        tensor.store().set_persistent(false);
        drop(tensor);

        tracing::info!(tensor = name, "dropped tensor");
        Ok(())
    }

    /// Registered names in sorted order.
    pub fn list_tensors(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tensors.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tensors.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tensors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.read().is_empty()
    }

    pub fn stats(&self) -> RegistryStats {
        let tensors = self.tensors.read();
        RegistryStats {
            tensors: tensors.len(),
            total_bytes: tensors.values().map(Tensor::byte_size).sum(),
            persistent: tensors.values().filter(|t| t.store().is_persistent()).count(),
        }
    }

    pub fn set_metadata(&self, name: &str, key: &str, value: &str) -> Result<(), RegistryError> {
        let tensors = self.tensors.read();
        let tensor = tensors
            .get(name)
            .ok_or_else(|| RegistryError::NotFound { name: name.into() })?;
        tensor.store().set_metadata(key, value);
        Ok(())
    }

    pub fn metadata(&self, name: &str) -> Result<BTreeMap<String, String>, RegistryError> {
        self.tensors
            .read()
            .get(name)
            .map(|t| t.store().metadata())
            .ok_or_else(|| RegistryError::NotFound { name: name.into() })
    }

    pub fn add(&self, a: &str, b: &str) -> Result<TensorHandle, RegistryError> {
        self.apply(BinaryOp::Add, a, b)
    }

    pub fn subtract(&self, a: &str, b: &str) -> Result<TensorHandle, RegistryError> {
        self.apply(BinaryOp::Subtract, a, b)
    }

    pub fn multiply(&self, a: &str, b: &str) -> Result<TensorHandle, RegistryError> {
        self.apply(BinaryOp::Multiply, a, b)
    }

    pub fn divide(&self, a: &str, b: &str) -> Result<TensorHandle, RegistryError> {
        self.apply(BinaryOp::Divide, a, b)
    }

    /// Run `a op b` and register the result under a fresh name derived from
    /// the operands (`a_plus_b`, then `a_plus_b_1`, ...).
    pub fn apply(&self, op: BinaryOp, a: &str, b: &str) -> Result<TensorHandle, RegistryError> {
        let (lhs, rhs) = (self.get_tensor(a)?, self.get_tensor(b)?);
        let reservation = self.reserve_unique(&format!("{a}_{}_{b}", op.word()));

        let result = self.algebra.apply(op, &lhs, &rhs, Some(&reservation.name))?;
        self.adopt(result)
    }

    /// Apply an activation, registering the result as `<name>_<op>`.
    pub fn unary(&self, op: UnaryOp, name: &str) -> Result<TensorHandle, RegistryError> {
        let handle = self.get_tensor(name)?;
        let reservation = self.reserve_unique(&format!("{name}_{op}"));

        let result = self.algebra.unary(op, &handle, Some(&reservation.name))?;
        self.adopt(result)
    }

    /// Permute axes (reverse them when `axes` is `None`), registering the
    /// result as `<name>_transpose`.
    pub fn transpose(
        &self,
        name: &str,
        axes: Option<&[usize]>,
    ) -> Result<TensorHandle, RegistryError> {
        let handle = self.get_tensor(name)?;
        let reservation = self.reserve_unique(&format!("{name}_transpose"));

        let result = self.algebra.transpose(&handle, axes, Some(&reservation.name))?;
        self.adopt(result)
    }

    /// Reduce along `axis`, registering the result as `<name>_<op>_<axis>`.
    pub fn reduce_axis(
        &self,
        name: &str,
        op: ReduceOp,
        axis: usize,
    ) -> Result<TensorHandle, RegistryError> {
        let handle = self.get_tensor(name)?;
        let reservation = self.reserve_unique(&format!("{name}_{op}_{axis}"));

        let result = self
            .algebra
            .reduce_axis(&handle, op, axis, Some(&reservation.name))?;
        self.adopt(result)
    }

    pub fn cosine_similarity(&self, a: &str, b: &str) -> Result<f64, RegistryError> {
        let (lhs, rhs) = (self.get_tensor(a)?, self.get_tensor(b)?);
        Ok(self.algebra.cosine_similarity(&lhs, &rhs)?)
    }

    pub fn reduce(&self, name: &str, op: ReduceOp) -> Result<f64, RegistryError> {
        let handle = self.get_tensor(name)?;
        Ok(self.algebra.reduce(&handle, op)?)
    }

    /// Flush every store and, with a data directory, rewrite the manifest.
    ///
    /// Only tensors stored in their own file under the data directory are
    /// listed; memory tensors are not persisted. Listed tensors keep their
    /// file when the registry drops.
    pub fn sync(&self) -> Result<(), RegistryError> {
        let started = Instant::now();
        let stores: Vec<_> = self.tensors.read().values().map(Tensor::shared_store).collect();

        let mut entries = Vec::new();
        for store in &stores {
            store.flush()?;

            let expected = self.config.tensor_path(store.name());
            if store.backend_kind() == BackendKind::Mmap && store.path() == expected {
                entries.push(ManifestEntry {
                    name: store.name().to_string(),
                    shape: store.shape(),
                    dtype: store.dtype(),
                    metadata: store.metadata(),
                });
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        let Some(path) = self.config.manifest_path() else {
            return Ok(());
        };

        let manifest = Manifest {
            version: MANIFEST_VERSION,
            tensors: entries,
        };
        let json = serde_json::to_vec_pretty(&manifest)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &json)?;
        std::fs::rename(&tmp, &path)?;

        for store in &stores {
            if manifest.tensors.iter().any(|e| e.name == store.name()) {
                store.set_persistent(true);
            }
        }

        record_io(
            "sync",
            &path.display().to_string(),
            json.len(),
            started.elapsed().as_millis() as u64,
        );
        Ok(())
    }

    fn load_manifest(&self) -> Result<(), RegistryError> {
        let Some(path) = self.config.manifest_path() else {
            return Ok(());
        };
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let manifest: Manifest = serde_json::from_str(&text)?;
        if manifest.version != MANIFEST_VERSION {
            return Err(StoreError::invalid(format!(
                "unsupported manifest version {}",
                manifest.version
            ))
            .into());
        }

        for entry in manifest.tensors {
            validate_name(&entry.name)?;
            let file = self.config.tensor_path(&entry.name);
            if file.as_deref().is_some_and(|f| !f.exists()) {
                tracing::warn!(tensor = %entry.name, "tensor file missing, skipping manifest entry");
                continue;
            }
            let tensor = Tensor::open(&entry.name, entry.shape, entry.dtype, &self.config)?;
            tensor.store().replace_metadata(entry.metadata);
            self.adopt(tensor)?;
        }

        tracing::info!(tensors = self.len(), "loaded manifest");
        Ok(())
    }

    /// Delete `.tensor` files in the data directory that no loaded tensor owns.
    fn remove_unlisted_files(&self) -> Result<(), RegistryError> {
        let Some(dir) = &self.config.data_dir else {
            return Ok(());
        };

        let tensors = self.tensors.read();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("tensor") {
                continue;
            }
            let owned = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .is_some_and(|stem| tensors.contains_key(stem));
            if !owned {
                std::fs::remove_file(&path)?;
                tracing::warn!(path = %path.display(), "removed tensor file not listed in manifest");
            }
        }
        Ok(())
    }

    fn create_named(&self, name: &str, shape: Shape, dtype: DType) -> Result<Tensor, RegistryError> {
        match Tensor::create(name, shape, dtype, &self.config) {
            Ok(tensor) => Ok(tensor),
            Err(StoreError::Io(e)) if e.kind() == IoErrorKind::AlreadyExists => {
                Err(RegistryError::FileConflict {
                    name: name.into(),
                    path: self.config.tensor_path(name).unwrap_or_default(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn adopt(&self, tensor: Tensor) -> Result<TensorHandle, RegistryError> {
        let mut tensors = self.tensors.write();
        if tensors.contains_key(tensor.name()) {
            return Err(RegistryError::AlreadyExists {
                name: tensor.name().into(),
            });
        }

        let handle = tensor.handle();
        tensors.insert(tensor.name().to_string(), tensor);
        Ok(handle)
    }

    /// Claim `name` exactly.
    fn reserve(&self, name: &str) -> Result<Reservation<'_>, RegistryError> {
        let tensors = self.tensors.read();
        let mut reserved = self.reserved.lock();
        if tensors.contains_key(name) || !reserved.insert(name.to_string()) {
            return Err(RegistryError::AlreadyExists { name: name.into() });
        }
        Ok(Reservation {
            reserved: &self.reserved,
            name: name.to_string(),
        })
    }

    /// Claim `base`, or the first free `base_1`, `base_2`, ...
    fn reserve_unique(&self, base: &str) -> Reservation<'_> {
        let tensors = self.tensors.read();
        let mut reserved = self.reserved.lock();
        let free = |candidate: &String| {
            !tensors.contains_key(candidate) && !reserved.contains(candidate)
        };

        let name = std::iter::once(base.to_string())
            .chain((1..).map(|n| format!("{base}_{n}")))
            .find(free)
            .unwrap_or_else(|| base.to_string());
        reserved.insert(name.clone());
        Reservation {
            reserved: &self.reserved,
            name,
        }
    }
}

/// Names become file stems, so they are restricted to a portable alphabet.
fn validate_name(name: &str) -> Result<(), RegistryError> {
    let invalid = |reason| RegistryError::InvalidName {
        name: name.into(),
        reason,
    };

    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    if name.starts_with('.') {
        return Err(invalid("name cannot start with '.'"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(invalid("only ASCII alphanumerics, '_', '-' and '.' are allowed"));
    }
    Ok(())
}
