//! Error types for chunk storage, algebra and the registry
//!
//! Each operation family has its own enum, and each enum reports the flat
//! [`ErrorKind`] through `kind()`:
//!
//! - **[`StoreError`]**: allocation, chunk I/O, reshape, stale handles
//! - **[`AlgebraError`]**: operand compatibility plus the store errors it reads through
//! - **[`RegistryError`]**: name lookup, persistence, and everything below it
//!
//! # Examples
//!
//! ```
//! use telum_core::ErrorKind;
//! use telum_ooc::error::RegistryError;
//!
//! let err = RegistryError::NotFound { name: "embeddings".into() };
//! assert_eq!(err.kind(), ErrorKind::QueryFailed);
//! ```

use std::path::PathBuf;
use telum_core::{DType, ErrorKind, ShapeError};
use thiserror::Error;

/// Errors from [`ChunkStore`](crate::store::ChunkStore) and
/// [`TensorHandle`](crate::handle::TensorHandle).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Shape(#[from] ShapeError),

    #[error("Invalid parameter: {reason}")]
    InvalidParameter { reason: String },

    #[error("Out of memory: cannot reserve {bytes} bytes ({reason})")]
    OutOfMemory { bytes: usize, reason: String },

    #[error("Storage of tensor '{name}' has been released")]
    Released { name: String },

    #[error("Element type mismatch: tensor holds {expected}, caller used {got}")]
    TypeMismatch { expected: DType, got: DType },

    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Shape(e) => e.kind(),
            StoreError::InvalidParameter { .. } => ErrorKind::InvalidParameter,
            StoreError::OutOfMemory { .. } => ErrorKind::OutOfMemory,
            StoreError::Released { .. } => ErrorKind::NotConnected,
            StoreError::TypeMismatch { .. } => ErrorKind::TensorTypeMismatch,
            StoreError::Io(_) => ErrorKind::Io,
        }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        StoreError::InvalidParameter {
            reason: reason.into(),
        }
    }
}

/// Errors from [`TensorAlgebra`](crate::algebra::TensorAlgebra).
#[derive(Error, Debug)]
pub enum AlgebraError {
    #[error("Tensor shape mismatch: {lhs:?} vs {rhs:?}")]
    ShapeMismatch { lhs: Vec<usize>, rhs: Vec<usize> },

    #[error("Tensor type mismatch: {lhs} vs {rhs}")]
    TypeMismatch { lhs: DType, rhs: DType },

    #[error("Operation requires rank-1 operands, got shape {shape:?}")]
    NotAVector { shape: Vec<usize> },

    #[error("Cannot compute {op} of an empty tensor")]
    EmptyReduction { op: &'static str },

    #[error("{op} is not defined for {dtype} tensors")]
    UnsupportedDType { op: &'static str, dtype: DType },

    #[error("Axis {axis} out of range for a rank-{rank} tensor")]
    AxisOutOfRange { axis: usize, rank: usize },

    #[error("Axes {axes:?} are not a permutation of 0..{rank}")]
    InvalidPermutation { axes: Vec<usize>, rank: usize },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AlgebraError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AlgebraError::ShapeMismatch { .. } | AlgebraError::NotAVector { .. } => {
                ErrorKind::TensorShapeMismatch
            }
            AlgebraError::TypeMismatch { .. } | AlgebraError::UnsupportedDType { .. } => {
                ErrorKind::TensorTypeMismatch
            }
            AlgebraError::EmptyReduction { .. }
            | AlgebraError::AxisOutOfRange { .. }
            | AlgebraError::InvalidPermutation { .. } => ErrorKind::InvalidParameter,
            AlgebraError::Store(e) => e.kind(),
        }
    }
}

/// Errors from [`TensorRegistry`](crate::registry::TensorRegistry).
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Tensor not found: {name}")]
    NotFound { name: String },

    #[error("Tensor already exists: {name}")]
    AlreadyExists { name: String },

    #[error("File for tensor '{name}' already exists: {}", .path.display())]
    FileConflict { name: String, path: PathBuf },

    #[error("Invalid tensor name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("Corrupt manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Algebra(#[from] AlgebraError),
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::NotFound { .. } => ErrorKind::QueryFailed,
            RegistryError::AlreadyExists { .. } | RegistryError::InvalidName { .. } => {
                ErrorKind::InvalidParameter
            }
            RegistryError::FileConflict { .. } | RegistryError::Manifest(_) => ErrorKind::Io,
            RegistryError::Store(e) => e.kind(),
            RegistryError::Algebra(e) => e.kind(),
        }
    }
}

impl From<ShapeError> for RegistryError {
    fn from(e: ShapeError) -> Self {
        RegistryError::Store(StoreError::Shape(e))
    }
}

impl From<std::io::Error> for RegistryError {
    fn from(e: std::io::Error) -> Self {
        RegistryError::Store(StoreError::Io(e))
    }
}
