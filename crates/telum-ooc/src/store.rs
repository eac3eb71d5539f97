//! Chunk store: the physical bytes of one tensor
//!
//! A [`ChunkStore`] owns a single flat backend holding the tensor in
//! row-major order, together with the tensor's current shape. Chunk payloads
//! are packed row-major buffers of exactly `count(chunk_shape) * width`
//! bytes; writes scatter them into the backend and reads gather them out, one
//! copy per contiguous run.
//!
//! # Concurrency
//!
//! One reader-writer lock guards shape and bytes together. Chunk writes and
//! reshape hold it exclusively, chunk reads share it, so overlapping writes
//! are serialized and a read never observes a torn write.

use crate::backend::{BackendKind, MemoryBackend, StorageBackend};
use crate::chunking::contiguous_runs;
use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::tracing_support::record_bytes;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use telum_core::{check_chunk_bounds, check_reshape, element_count, DType, Shape};

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

struct StoreState {
    shape: Shape,
    backend: Box<dyn StorageBackend>,
}

/// Backing storage and current shape of one tensor.
pub struct ChunkStore {
    id: u64,
    name: String,
    dtype: DType,
    state: RwLock<StoreState>,
    metadata: RwLock<BTreeMap<String, String>>,
    /// When unset, a backing file is deleted together with the store
    persistent: AtomicBool,
}

impl std::fmt::Debug for ChunkStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("ChunkStore")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("dtype", &self.dtype)
            .field("shape", &state.shape)
            .field("backend", &state.backend.kind())
            .finish()
    }
}

impl ChunkStore {
    /// Allocate a zero-filled store for `shape` in the configured backend.
    ///
    /// # Errors
    ///
    /// - `InvalidShape` if the byte size overflows
    /// - `OutOfMemory` if the memory backend cannot reserve the bytes
    /// - `Io` if the backing file cannot be created
    #[tracing::instrument(level = "debug", skip(config), fields(backend = %config.backend))]
    pub fn allocate(
        name: &str,
        shape: Shape,
        dtype: DType,
        config: &StoreConfig,
    ) -> Result<Self, StoreError> {
        config.validate()?;
        let len = shape.byte_size(dtype)?;

        let backend: Box<dyn StorageBackend> = match config.backend {
            BackendKind::Memory => Box::new(MemoryBackend::zeroed(len, config.memory_limit_bytes)?),
            BackendKind::Mmap => mmap_backend(config, name, len, true)?,
        };

        tracing::debug!(bytes = len, "allocated chunk store");
        Self::from_backend(name, shape, dtype, backend)
    }

    /// Map an existing tensor file written by an earlier process.
    pub fn open(
        name: &str,
        shape: Shape,
        dtype: DType,
        config: &StoreConfig,
    ) -> Result<Self, StoreError> {
        config.validate()?;
        let len = shape.byte_size(dtype)?;
        let backend = mmap_backend(config, name, len, false)?;
        let store = Self::from_backend(name, shape, dtype, backend)?;
        store.set_persistent(true);
        Ok(store)
    }

    /// Wrap an already allocated backend.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` if the backend length disagrees with `shape` and `dtype`.
    pub fn from_backend(
        name: &str,
        shape: Shape,
        dtype: DType,
        backend: Box<dyn StorageBackend>,
    ) -> Result<Self, StoreError> {
        let expected = shape.byte_size(dtype)?;
        if backend.len() != expected {
            return Err(StoreError::invalid(format!(
                "backend holds {} bytes, {shape} of {dtype} needs {expected}",
                backend.len()
            )));
        }

        Ok(Self {
            id: NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed),
            name: name.to_string(),
            dtype,
            state: RwLock::new(StoreState { shape, backend }),
            metadata: RwLock::new(BTreeMap::new()),
            persistent: AtomicBool::new(false),
        })
    }

    /// Process-unique identity of this store.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Current shape; changes only through [`reshape`](Self::reshape).
    pub fn shape(&self) -> Shape {
        self.state.read().shape.clone()
    }

    pub fn byte_size(&self) -> usize {
        self.state.read().backend.len()
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.state.read().backend.kind()
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.state.read().backend.path().map(|p| p.to_path_buf())
    }

    /// Scatter a packed row-major chunk into the rectangle at `start`.
    ///
    /// Everything is validated before the first byte is copied.
    ///
    /// # Errors
    ///
    /// - `ShapeMismatch` if `start` or `chunk_shape` has the wrong rank
    /// - `IndexOutOfBounds` if the rectangle leaves the tensor
    /// - `InvalidParameter` if the chunk is empty or `bytes` has the wrong length
    pub fn write_chunk(
        &self,
        start: &[usize],
        chunk_shape: &[usize],
        bytes: &[u8],
    ) -> Result<(), StoreError> {
        let mut state = self.state.write();
        let StoreState { shape, backend } = &mut *state;

        let expected = self.payload_len(shape, start, chunk_shape)?;
        if bytes.len() != expected {
            return Err(StoreError::invalid(format!(
                "chunk {chunk_shape:?} of {} needs {expected} bytes, got {}",
                self.dtype,
                bytes.len()
            )));
        }

        let width = self.dtype.width();
        let dst = backend.bytes_mut();
        for run in contiguous_runs(shape.dims(), start, chunk_shape) {
            let p = run.parent_offset * width;
            let c = run.chunk_offset * width;
            let n = run.len * width;
            dst[p..p + n].copy_from_slice(&bytes[c..c + n]);
        }

        tracing::trace!(tensor = %self.name, ?start, ?chunk_shape, "chunk written");
        record_bytes("write_chunk", expected);
        Ok(())
    }

    /// Gather the rectangle at `start` into a fresh packed buffer.
    ///
    /// # Errors
    ///
    /// Same validation as [`write_chunk`](Self::write_chunk), minus the length check.
    pub fn read_chunk(&self, start: &[usize], chunk_shape: &[usize]) -> Result<Vec<u8>, StoreError> {
        let state = self.state.read();

        let len = self.payload_len(&state.shape, start, chunk_shape)?;
        let width = self.dtype.width();
        let src = state.backend.bytes();

        let mut out = vec![0u8; len];
        for run in contiguous_runs(state.shape.dims(), start, chunk_shape) {
            let p = run.parent_offset * width;
            let c = run.chunk_offset * width;
            let n = run.len * width;
            out[c..c + n].copy_from_slice(&src[p..p + n]);
        }

        tracing::trace!(tensor = %self.name, ?start, ?chunk_shape, "chunk read");
        record_bytes("read_chunk", len);
        Ok(out)
    }

    /// Copy of every byte in row-major order.
    pub fn read_all(&self) -> Vec<u8> {
        self.state.read().backend.bytes().to_vec()
    }

    /// Reinterpret the tensor under `new_shape`; bytes are not moved.
    ///
    /// # Errors
    ///
    /// `TensorShapeMismatch` if the element counts differ.
    pub fn reshape(&self, new_shape: Shape) -> Result<(), StoreError> {
        let mut state = self.state.write();
        check_reshape(&state.shape, &new_shape)?;

        tracing::debug!(tensor = %self.name, from = %state.shape, to = %new_shape, "reshape");
        state.shape = new_shape;
        Ok(())
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.state.read().backend.flush()
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent.load(Ordering::Acquire)
    }

    /// Keep (or stop keeping) the backing file after this store is dropped.
    pub fn set_persistent(&self, persistent: bool) {
        self.persistent.store(persistent, Ordering::Release);
    }

    pub fn metadata(&self) -> BTreeMap<String, String> {
        self.metadata.read().clone()
    }

    pub fn metadata_value(&self, key: &str) -> Option<String> {
        self.metadata.read().get(key).cloned()
    }

    pub fn set_metadata(&self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.write().insert(key.into(), value.into());
    }

    pub(crate) fn replace_metadata(&self, metadata: BTreeMap<String, String>) {
        *self.metadata.write() = metadata;
    }

    fn payload_len(
        &self,
        shape: &Shape,
        start: &[usize],
        chunk_shape: &[usize],
    ) -> Result<usize, StoreError> {
        check_chunk_bounds(shape.dims(), start, chunk_shape)?;

        let count = element_count(chunk_shape);
        if count == 0 {
            return Err(StoreError::invalid(format!(
                "chunk {chunk_shape:?} contains no elements"
            )));
        }
        Ok(count * self.dtype.width())
    }
}

impl Drop for ChunkStore {
    fn drop(&mut self) {
        if *self.persistent.get_mut() {
            return;
        }

        let state = self.state.get_mut();
        let Some(path) = state.backend.path().map(|p| p.to_path_buf()) else {
            return;
        };

        // Unmap before unlinking
        state.backend = Box::new(MemoryBackend::default());
        match std::fs::remove_file(&path) {
            Ok(()) => tracing::debug!(path = %path.display(), "removed tensor file"),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove tensor file"),
        }
    }
}

#[cfg(feature = "mmap")]
fn mmap_backend(
    config: &StoreConfig,
    name: &str,
    len: usize,
    create: bool,
) -> Result<Box<dyn StorageBackend>, StoreError> {
    use crate::backend::MmapBackend;

    let path = config
        .tensor_path(name)
        .ok_or_else(|| StoreError::invalid("mmap backend requires a data_dir"))?;
    let backend = if create {
        MmapBackend::create(&path, len)?
    } else {
        MmapBackend::open(&path, len)?
    };
    Ok(Box::new(backend))
}

#[cfg(not(feature = "mmap"))]
fn mmap_backend(
    _config: &StoreConfig,
    _name: &str,
    _len: usize,
    _create: bool,
) -> Result<Box<dyn StorageBackend>, StoreError> {
    Err(StoreError::invalid(
        "mmap backend requested but the `mmap` feature is disabled",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use telum_core::{decode_elements, encode_elements, ErrorKind};

    fn store(dims: &[usize], dtype: DType) -> ChunkStore {
        let shape = Shape::from_dims(dims).unwrap();
        ChunkStore::allocate("t", shape, dtype, &StoreConfig::default()).unwrap()
    }

    #[test]
    fn test_allocate_zeroed() {
        let s = store(&[3, 4], DType::Float64);
        assert_eq!(s.byte_size(), 96);
        assert!(s.read_all().iter().all(|&b| b == 0));
        assert_eq!(s.backend_kind(), BackendKind::Memory);
    }

    #[test]
    fn test_allocate_over_limit() {
        let config = StoreConfig::new().memory_limit_bytes(100);
        let shape = Shape::from_dims(&[100]).unwrap();
        let err = ChunkStore::allocate("big", shape, DType::Int32, &config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfMemory);
    }

    #[test]
    fn test_write_read_subrectangle() {
        let s = store(&[4, 6], DType::Int32);
        let payload = encode_elements(&[1i32, 2, 3, 4, 5, 6]);
        s.write_chunk(&[1, 2], &[2, 3], &payload).unwrap();

        assert_eq!(s.read_chunk(&[1, 2], &[2, 3]).unwrap(), payload);

        let all: Vec<i32> = decode_elements(&s.read_all());
        let mut expected = vec![0i32; 24];
        expected[8..11].copy_from_slice(&[1, 2, 3]);
        expected[14..17].copy_from_slice(&[4, 5, 6]);
        assert_eq!(all, expected);
    }

    #[test]
    fn test_write_is_idempotent() {
        let s = store(&[5], DType::Float32);
        let payload = encode_elements(&[0.5f32, 1.5]);
        s.write_chunk(&[2], &[2], &payload).unwrap();
        let once = s.read_all();
        s.write_chunk(&[2], &[2], &payload).unwrap();
        assert_eq!(s.read_all(), once);
    }

    #[test]
    fn test_validation_precedes_mutation() {
        let s = store(&[4, 6], DType::Int32);

        let err = s.write_chunk(&[3, 0], &[2, 6], &[0u8; 48]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IndexOutOfBounds);

        let err = s.write_chunk(&[0, 0], &[2, 2], &[1u8; 15]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);

        let err = s.write_chunk(&[0], &[2], &[1u8; 8]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ShapeMismatch);

        let err = s.read_chunk(&[0, 0], &[0, 6]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);

        assert!(s.read_all().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_scalar_store() {
        let s = store(&[], DType::Int64);
        s.write_chunk(&[], &[], &encode_elements(&[-7i64])).unwrap();
        assert_eq!(decode_elements::<i64>(&s.read_chunk(&[], &[]).unwrap()), vec![-7]);
    }

    #[test]
    fn test_reshape_keeps_bytes() {
        let s = store(&[2, 6], DType::Int32);
        let values: Vec<i32> = (0..12).collect();
        s.write_chunk(&[0, 0], &[2, 6], &encode_elements(&values)).unwrap();

        s.reshape(Shape::from_dims(&[3, 4]).unwrap()).unwrap();
        assert_eq!(s.shape().dims(), &[3, 4]);
        assert_eq!(decode_elements::<i32>(&s.read_all()), values);

        let err = s.reshape(Shape::from_dims(&[5]).unwrap()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TensorShapeMismatch);
        assert_eq!(s.shape().dims(), &[3, 4]);
    }

    #[test]
    fn test_from_backend_length_check() {
        let backend = Box::new(MemoryBackend::zeroed(8, 1024).unwrap());
        let shape = Shape::from_dims(&[3]).unwrap();
        assert!(ChunkStore::from_backend("t", shape, DType::Int32, backend).is_err());
    }

    #[test]
    fn test_metadata() {
        let s = store(&[1], DType::Int32);
        s.set_metadata("unit", "meters");
        assert_eq!(s.metadata_value("unit").as_deref(), Some("meters"));
        assert_eq!(s.metadata().len(), 1);
    }

    #[test]
    fn test_ids_are_unique() {
        let a = store(&[1], DType::Int32);
        let b = store(&[1], DType::Int32);
        assert_ne!(a.id(), b.id());
    }
}
