//! # telum-ooc
//!
//! Chunked, out-of-core tensor storage for Telum.
//!
//! This crate provides:
//! - Chunk stores over heap or memory-mapped file backends
//! - Owning tensors and cheap, weakly-referenced views with rectangular windows
//! - Streaming elementwise algebra, activations, transposes, cosine similarity
//!   and reductions (whole-tensor or along an axis)
//! - A named registry with a JSON manifest for persistence
//! - `tracing` instrumentation and a ready-made subscriber setup
//!
//! ## Quick Start
//!
//! ```
//! use telum_core::{DType, Shape};
//! use telum_ooc::TensorRegistry;
//!
//! let registry = TensorRegistry::in_memory();
//! let image = registry.create_tensor("image", Shape::from_dims(&[64, 64])?, DType::Float32)?;
//!
//! // Write an 8x8 tile and read it back
//! let tile = vec![1.0f32; 64];
//! image.store_elements(&[8, 8], &[8, 8], &tile)?;
//! assert_eq!(image.get_elements::<f32>(&[8, 8], &[8, 8])?, tile);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Features
//!
//! - `mmap` (default): memory-mapped file backend and registry persistence

pub mod algebra;
pub mod backend;
pub mod chunking;
pub mod config;
pub mod error;
pub mod handle;
pub mod registry;
pub mod store;
pub mod tracing_support;

pub use algebra::{BinaryOp, ReduceOp, TensorAlgebra, UnaryOp};
pub use backend::{BackendKind, MemoryBackend, StorageBackend};
pub use chunking::{contiguous_runs, ChunkIndex, ChunkIterator, ChunkSpec, Run};
pub use config::StoreConfig;
pub use error::{AlgebraError, RegistryError, StoreError};
pub use handle::{Tensor, TensorHandle};
pub use registry::{RegistryStats, TensorRegistry};
pub use store::ChunkStore;
pub use tracing_support::{init_tracing, TracingConfig, TracingFormat};

#[cfg(feature = "mmap")]
pub use backend::MmapBackend;
