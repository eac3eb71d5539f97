//! Error taxonomy shared by every Telum crate
//!
//! Each operation family owns its own error enum so that a call site only
//! sees the failures it can actually produce:
//!
//! - **[`ShapeError`]**: dimension and index arithmetic (this crate)
//! - `StoreError`, `AlgebraError`, `RegistryError`: defined in `telum-ooc`
//!
//! All of them report a flat [`ErrorKind`] through `kind()`, which is what the
//! session layer translates into protocol status codes.
//!
//! # Examples
//!
//! ```
//! use telum_core::error::{ErrorKind, ShapeError};
//! use telum_core::shape::validate_shape;
//!
//! let err = validate_shape(&[2, -1]).unwrap_err();
//! assert!(matches!(err, ShapeError::InvalidShape { .. }));
//! assert_eq!(err.kind(), ErrorKind::InvalidShape);
//! assert_eq!(err.kind().code(), -3);
//! ```

use std::fmt;
use thiserror::Error;

/// Flat error classification used at the registry/transport boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed shape (negative dimension, overflowing element count)
    InvalidShape,
    /// Malformed argument (wrong buffer length, empty chunk, bad name)
    InvalidParameter,
    /// Chunk or slice rectangle exceeds tensor extents
    IndexOutOfBounds,
    /// Rank disagreement between shape, start and extent vectors
    ShapeMismatch,
    /// Operands disagree on shape where equality is required
    TensorShapeMismatch,
    /// Operands disagree on element type
    TensorTypeMismatch,
    /// Storage could not be reserved
    OutOfMemory,
    /// Backing store was released while a handle still referenced it
    NotConnected,
    /// Lookup of an unknown tensor
    QueryFailed,
    /// Underlying file or mapping failure
    Io,
}

impl ErrorKind {
    /// Numeric status code understood by the C client binding.
    pub fn code(self) -> i32 {
        match self {
            ErrorKind::Io => -1,
            ErrorKind::OutOfMemory => -2,
            ErrorKind::InvalidShape | ErrorKind::InvalidParameter => -3,
            ErrorKind::QueryFailed => -5,
            ErrorKind::NotConnected => -9,
            ErrorKind::ShapeMismatch | ErrorKind::TensorShapeMismatch => -11,
            ErrorKind::TensorTypeMismatch => -12,
            ErrorKind::IndexOutOfBounds => -13,
        }
    }

    /// Stable lowercase name for logs and protocol messages.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidShape => "invalid_shape",
            ErrorKind::InvalidParameter => "invalid_parameter",
            ErrorKind::IndexOutOfBounds => "index_out_of_bounds",
            ErrorKind::ShapeMismatch => "shape_mismatch",
            ErrorKind::TensorShapeMismatch => "tensor_shape_mismatch",
            ErrorKind::TensorTypeMismatch => "tensor_type_mismatch",
            ErrorKind::OutOfMemory => "out_of_memory",
            ErrorKind::NotConnected => "not_connected",
            ErrorKind::QueryFailed => "query_failed",
            ErrorKind::Io => "io",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by shape validation and index arithmetic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShapeError {
    #[error("Invalid shape {dims:?}: {reason}")]
    InvalidShape { dims: Vec<i64>, reason: String },

    #[error("Rank mismatch in {context}: expected {expected}, got {got}")]
    RankMismatch {
        context: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("Index rank mismatch: expected {expected} indices, got {got}")]
    IndexRankMismatch { expected: usize, got: usize },

    #[error("Index out of bounds on axis {axis}: {start}+{extent} exceeds dimension {dim}")]
    IndexOutOfBounds {
        axis: usize,
        start: usize,
        extent: usize,
        dim: usize,
    },

    #[error("Slice start {start} exceeds end {end} on axis {axis}")]
    InvertedRange {
        axis: usize,
        start: usize,
        end: usize,
    },

    #[error("Element count mismatch: {from:?} has {from_count} elements, {to:?} has {to_count}")]
    ElementCountMismatch {
        from: Vec<usize>,
        from_count: usize,
        to: Vec<usize>,
        to_count: usize,
    },
}

impl ShapeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ShapeError::InvalidShape { .. } => ErrorKind::InvalidShape,
            ShapeError::RankMismatch { .. } => ErrorKind::ShapeMismatch,
            ShapeError::IndexRankMismatch { .. }
            | ShapeError::IndexOutOfBounds { .. }
            | ShapeError::InvertedRange { .. } => ErrorKind::IndexOutOfBounds,
            ShapeError::ElementCountMismatch { .. } => ErrorKind::TensorShapeMismatch,
        }
    }

    pub(crate) fn invalid(dims: &[i64], reason: impl Into<String>) -> Self {
        ShapeError::InvalidShape {
            dims: dims.to_vec(),
            reason: reason.into(),
        }
    }
}
