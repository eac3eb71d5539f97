//! # Telum - Chunked Tensor Store
//!
//! Named N-dimensional tensors stored in memory or in memory-mapped files,
//! addressed by rectangular chunks, with streaming elementwise algebra.
//!
//! This is the **meta crate** that re-exports all Telum components for convenient access.
//!
//! ## Quick Start
//!
//! ```
//! use telum::prelude::*;
//!
//! let registry = TensorRegistry::in_memory();
//! let a = registry.create_tensor("a", Shape::from_dims(&[2, 2])?, DType::Int32)?;
//! let b = registry.create_tensor("b", Shape::from_dims(&[2, 2])?, DType::Int32)?;
//! a.store_elements(&[0, 0], &[2, 2], &[1i32, 2, 3, 4])?;
//! b.store_elements(&[0, 0], &[2, 2], &[10i32, 10, 10, 10])?;
//!
//! let sum = registry.add("a", "b")?;
//! assert_eq!(sum.get_elements::<i32>(&[1, 0], &[1, 2])?, vec![13, 14]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Components
//!
//! ### Shapes and Element Types ([`core`])
//!
//! Shape validation, row-major offsets, chunk bounds, dtypes and the
//! [`ErrorKind`](core::ErrorKind) taxonomy.
//!
//! ```
//! use telum::core::{linear_offset, validate_shape};
//!
//! let shape = validate_shape(&[3, 4])?;
//! assert_eq!(linear_offset(shape.dims(), &[2, 1])?, 9);
//! # Ok::<(), telum::core::ShapeError>(())
//! ```
//!
//! ### Storage, Views and Algebra ([`ooc`])
//!
//! Chunk stores, tensor handles and windows, the registry and streaming algebra.
//!
//! ## Features
//!
//! - `mmap` (default): memory-mapped file backend and persistence

pub use telum_core as core;
pub use telum_ooc as ooc;

pub mod prelude {
    //! Prelude module for convenient imports
    //!
    //! # Example
    //!
    //! ```
    //! use telum::prelude::*;
    //!
    //! let registry = TensorRegistry::in_memory();
    //! assert!(registry.is_empty());
    //! ```

    // Shapes, dtypes and errors
    pub use crate::core::{validate_shape, DType, Element, ErrorKind, Shape, ShapeError};

    // Tensors and views
    pub use crate::ooc::{Tensor, TensorHandle};

    // Registry and configuration
    pub use crate::ooc::{BackendKind, RegistryError, StoreConfig, StoreError, TensorRegistry};

    // Algebra
    pub use crate::ooc::{AlgebraError, BinaryOp, ReduceOp, TensorAlgebra, UnaryOp};
}
