//! Tensor ownership and views
//!
//! - [`Tensor`] owns a chunk store. Dropping the last `Tensor` for a store
//!   releases its memory (and, for non-persistent file-backed stores, its file).
//! - [`TensorHandle`] is a cheap, cloneable view. It either covers the whole
//!   tensor or a rectangular window of it, and holds only a weak reference to
//!   the store: once the owner is gone every access fails with
//!   [`StoreError::Released`].
//!
//! Window coordinates are relative to the window. Each access translates them
//! to store coordinates and the store re-validates the rectangle against its
//! *current* shape, so a view never reads past a tensor that was reshaped
//! underneath it.
//!
//! # Example
//!
//! ```
//! use telum_core::{DType, Shape};
//! use telum_ooc::{StoreConfig, Tensor};
//!
//! let tensor = Tensor::create("m", Shape::from_dims(&[4, 4])?, DType::Int32, &StoreConfig::default())?;
//! let handle = tensor.handle();
//! handle.store_elements(&[0, 0], &[1, 4], &[1i32, 2, 3, 4])?;
//!
//! let row = handle.slice(&[0, 1], &[1, 3])?;
//! assert_eq!(row.get_elements::<i32>(&[0, 0], &[1, 2])?, vec![2, 3]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::store::ChunkStore;
use std::sync::{Arc, Weak};
use telum_core::{
    check_chunk_bounds, check_slice_range, decode_elements, encode_elements, validate_shape,
    DType, Dims, Element, Shape,
};

/// Owner of one tensor's storage.
#[derive(Debug)]
pub struct Tensor {
    store: Arc<ChunkStore>,
}

impl Tensor {
    /// Allocate a zero-initialized tensor.
    pub fn create(
        name: &str,
        shape: Shape,
        dtype: DType,
        config: &StoreConfig,
    ) -> Result<Self, StoreError> {
        let store = ChunkStore::allocate(name, shape, dtype, config)?;
        Ok(Self::from_store(store))
    }

    /// Like [`create`](Self::create), validating signed dimensions first.
    pub fn create_from_dims(
        name: &str,
        dims: &[i64],
        dtype: DType,
        config: &StoreConfig,
    ) -> Result<Self, StoreError> {
        let shape = validate_shape(dims)?;
        Self::create(name, shape, dtype, config)
    }

    pub(crate) fn open(
        name: &str,
        shape: Shape,
        dtype: DType,
        config: &StoreConfig,
    ) -> Result<Self, StoreError> {
        Ok(Self::from_store(ChunkStore::open(name, shape, dtype, config)?))
    }

    pub fn from_store(store: ChunkStore) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    /// Whole-tensor view.
    pub fn handle(&self) -> TensorHandle {
        TensorHandle {
            name: Arc::from(self.store.name()),
            dtype: self.store.dtype(),
            store: Arc::downgrade(&self.store),
            window: None,
        }
    }

    pub fn name(&self) -> &str {
        self.store.name()
    }

    pub fn dtype(&self) -> DType {
        self.store.dtype()
    }

    pub fn shape(&self) -> Shape {
        self.store.shape()
    }

    pub fn byte_size(&self) -> usize {
        self.store.byte_size()
    }

    pub fn element_count(&self) -> usize {
        self.store.shape().element_count()
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    pub(crate) fn shared_store(&self) -> Arc<ChunkStore> {
        Arc::clone(&self.store)
    }
}

#[derive(Debug, Clone)]
struct Window {
    origin: Dims,
    shape: Shape,
}

/// Non-owning view of a tensor or of a rectangular window into it.
#[derive(Debug, Clone)]
pub struct TensorHandle {
    name: Arc<str>,
    dtype: DType,
    store: Weak<ChunkStore>,
    window: Option<Window>,
}

impl TensorHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Whether this handle is a window rather than the whole tensor.
    pub fn is_view(&self) -> bool {
        self.window.is_some()
    }

    /// Whether both handles address the same underlying storage.
    pub fn same_store(&self, other: &TensorHandle) -> bool {
        Weak::ptr_eq(&self.store, &other.store)
    }

    /// Whether the owning [`Tensor`] is still alive.
    pub fn is_connected(&self) -> bool {
        self.store.strong_count() > 0
    }

    /// Shape seen through this handle: the window extents, or the store's
    /// current shape.
    pub fn shape(&self) -> Result<Shape, StoreError> {
        let store = self.upgrade()?;
        Ok(match &self.window {
            Some(window) => window.shape.clone(),
            None => store.shape(),
        })
    }

    pub fn element_count(&self) -> Result<usize, StoreError> {
        Ok(self.shape()?.element_count())
    }

    pub fn byte_size(&self) -> Result<usize, StoreError> {
        Ok(self.element_count()? * self.dtype.width())
    }

    /// Read a packed row-major chunk.
    ///
    /// # Errors
    ///
    /// - `Released` if the owning tensor was dropped
    /// - `ShapeMismatch` / `IndexOutOfBounds` if the rectangle leaves this view
    /// - `InvalidParameter` if the chunk is empty
    pub fn get_chunk(&self, start: &[usize], chunk_shape: &[usize]) -> Result<Vec<u8>, StoreError> {
        let store = self.upgrade()?;
        let start = self.translate(start, chunk_shape)?;
        store.read_chunk(&start, chunk_shape)
    }

    /// Write a packed row-major chunk of exactly `count(chunk_shape) * width` bytes.
    pub fn store_chunk(
        &self,
        start: &[usize],
        chunk_shape: &[usize],
        bytes: &[u8],
    ) -> Result<(), StoreError> {
        let store = self.upgrade()?;
        let start = self.translate(start, chunk_shape)?;
        store.write_chunk(&start, chunk_shape, bytes)
    }

    /// Typed [`get_chunk`](Self::get_chunk).
    ///
    /// # Errors
    ///
    /// `TypeMismatch` if `T` is not the tensor's element type.
    pub fn get_elements<T: Element>(
        &self,
        start: &[usize],
        chunk_shape: &[usize],
    ) -> Result<Vec<T>, StoreError> {
        self.check_element::<T>()?;
        Ok(decode_elements(&self.get_chunk(start, chunk_shape)?))
    }

    /// Typed [`store_chunk`](Self::store_chunk).
    pub fn store_elements<T: Element>(
        &self,
        start: &[usize],
        chunk_shape: &[usize],
        values: &[T],
    ) -> Result<(), StoreError> {
        self.check_element::<T>()?;
        self.store_chunk(start, chunk_shape, &encode_elements(values))
    }

    /// Every byte visible through this handle, row-major.
    pub fn read_all(&self) -> Result<Vec<u8>, StoreError> {
        let shape = self.shape()?;
        if shape.element_count() == 0 {
            return Ok(Vec::new());
        }
        let origin = vec![0; shape.rank()];
        self.get_chunk(&origin, shape.dims())
    }

    /// Window over `start .. end` (exclusive) of this view, sharing storage.
    ///
    /// # Errors
    ///
    /// - `ShapeMismatch` if `start` or `end` has the wrong rank
    /// - `IndexOutOfBounds` if `start > end` or `end` exceeds this view
    pub fn slice(&self, start: &[usize], end: &[usize]) -> Result<TensorHandle, StoreError> {
        let shape = self.shape()?;
        let extents = check_slice_range(shape.dims(), start, end)?;

        let origin = match &self.window {
            Some(window) => window.origin.iter().zip(start).map(|(o, s)| o + s).collect(),
            None => Dims::from_slice(start),
        };

        Ok(TensorHandle {
            name: Arc::clone(&self.name),
            dtype: self.dtype,
            store: Weak::clone(&self.store),
            window: Some(Window {
                origin,
                shape: extents,
            }),
        })
    }

    /// Reinterpret the whole tensor under `new_shape`, in place.
    ///
    /// Every handle to the tensor observes the new shape.
    ///
    /// # Errors
    ///
    /// - `InvalidParameter` when called on a window view
    /// - `TensorShapeMismatch` if the element counts differ
    pub fn reshape(&self, new_shape: &[usize]) -> Result<(), StoreError> {
        let store = self.upgrade()?;
        if self.window.is_some() {
            return Err(StoreError::invalid("cannot reshape a window view"));
        }
        store.reshape(Shape::from_dims(new_shape)?)
    }

    fn upgrade(&self) -> Result<Arc<ChunkStore>, StoreError> {
        self.store.upgrade().ok_or_else(|| StoreError::Released {
            name: self.name.to_string(),
        })
    }

    /// Map view coordinates to store coordinates.
    fn translate(&self, start: &[usize], chunk_shape: &[usize]) -> Result<Dims, StoreError> {
        match &self.window {
            None => Ok(Dims::from_slice(start)),
            Some(window) => {
                check_chunk_bounds(window.shape.dims(), start, chunk_shape)?;
                Ok(window.origin.iter().zip(start).map(|(o, s)| o + s).collect())
            }
        }
    }

    fn check_element<T: Element>(&self) -> Result<(), StoreError> {
        if T::DTYPE != self.dtype {
            return Err(StoreError::TypeMismatch {
                expected: self.dtype,
                got: T::DTYPE,
            });
        }
        Ok(())
    }
}
