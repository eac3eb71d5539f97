//! # telum-core
//!
//! Shape arithmetic, element types and the error taxonomy for the Telum
//! chunked tensor store.
//!
//! This crate has no I/O. It provides:
//!
//! - **Shape math** ([`shape`]): validation, element counts, row-major offsets,
//!   chunk and slice rectangle checks
//! - **Element types** ([`dtype`]): [`DType`] and the little-endian [`Element`]
//!   codec used at the store boundary
//! - **Errors** ([`error`]): [`ShapeError`] and the flat [`ErrorKind`]
//!   classification shared with `telum-ooc`
//!
//! ## Quick Start
//!
//! ```
//! use telum_core::{validate_shape, DType};
//!
//! let shape = validate_shape(&[4, 16])?;
//! assert_eq!(shape.element_count(), 64);
//! assert_eq!(shape.byte_size(DType::Float32)?, 256);
//! # Ok::<(), telum_core::ShapeError>(())
//! ```
//!
//! ## Features
//!
//! - `serde`: serialization for [`DType`] and [`Shape`]

pub mod dtype;
pub mod error;
pub mod shape;


pub use dtype::{decode_elements, encode_elements, DType, Element, ParseDTypeError};
pub use error::{ErrorKind, ShapeError};
pub use shape::{
    broadcastable, check_chunk_bounds, check_reshape, check_slice_range, element_count,
    linear_offset, row_major_strides, validate_shape, Dims, Shape,
};
