//! End-to-end integration tests for telum-ooc
//!
//! Complete workflows through the registry: creation, chunked I/O, views,
//! reshape, algebra and persistence.

use anyhow::Result;
use std::env::temp_dir;
use std::path::PathBuf;
use telum_core::{decode_elements, encode_elements, DType, ErrorKind, Shape};
use telum_ooc::{ReduceOp, StoreConfig, TensorAlgebra, TensorRegistry};

#[cfg(feature = "mmap")]
use telum_ooc::BackendKind;

fn scratch_dir(tag: &str) -> PathBuf {
    let dir = temp_dir().join(format!("telum_e2e_{tag}_{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

#[test]
fn test_e2e_create_reports_metadata() -> Result<()> {
    let registry = TensorRegistry::in_memory();
    let handle = registry.create_tensor("cube", Shape::from_dims(&[2, 3, 4])?, DType::Float32)?;

    assert_eq!(handle.shape()?.dims(), &[2, 3, 4]);
    assert_eq!(handle.dtype(), DType::Float32);
    assert_eq!(handle.byte_size()?, 96);

    // Fresh tensors are zero-initialized
    assert!(handle.read_all()?.iter().all(|&b| b == 0));
    Ok(())
}

#[test]
fn test_e2e_tiled_write_then_full_read() -> Result<()> {
    let registry = TensorRegistry::in_memory();
    let handle = registry.create_tensor("grid", Shape::from_dims(&[6, 8])?, DType::Int32)?;

    // Fill with 2x4 tiles, each tagged with its tile number
    let mut tag = 0i32;
    for row in (0..6).step_by(2) {
        for col in (0..8).step_by(4) {
            handle.store_elements(&[row, col], &[2, 4], &[tag; 8])?;
            tag += 1;
        }
    }

    let all: Vec<i32> = decode_elements(&handle.read_all()?);
    for r in 0..6 {
        for c in 0..8 {
            let expected = (r / 2 * 2 + c / 4) as i32;
            assert_eq!(all[r * 8 + c], expected, "element ({r}, {c})");
        }
    }
    Ok(())
}

#[test]
fn test_e2e_bounds_and_length_errors() -> Result<()> {
    let registry = TensorRegistry::in_memory();
    let handle = registry.create_tensor("m", Shape::from_dims(&[4, 4])?, DType::Float64)?;

    let err = handle.store_chunk(&[3, 3], &[2, 2], &[0u8; 32]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IndexOutOfBounds);

    let err = handle.store_chunk(&[0, 0], &[2, 2], &[0u8; 31]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidParameter);

    let err = handle.get_chunk(&[0, 0, 0], &[1, 1, 1]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ShapeMismatch);
    Ok(())
}

#[test]
fn test_e2e_reshape_preserves_row_major_bytes() -> Result<()> {
    let registry = TensorRegistry::in_memory();
    let handle = registry.create_tensor("r", Shape::from_dims(&[2, 6])?, DType::Int64)?;
    let values: Vec<i64> = (0..12).collect();
    handle.store_elements(&[0, 0], &[2, 6], &values)?;

    handle.reshape(&[4, 3])?;
    assert_eq!(handle.shape()?.dims(), &[4, 3]);
    assert_eq!(handle.get_elements::<i64>(&[1, 0], &[1, 3])?, vec![3, 4, 5]);

    handle.reshape(&[12])?;
    assert_eq!(decode_elements::<i64>(&handle.read_all()?), values);
    Ok(())
}

#[test]
fn test_e2e_slice_matches_direct_read() -> Result<()> {
    let registry = TensorRegistry::in_memory();
    let handle = registry.create_tensor("s", Shape::from_dims(&[5, 5, 5])?, DType::Float32)?;
    let values: Vec<f32> = (0..125).map(|v| v as f32).collect();
    handle.store_elements(&[0, 0, 0], &[5, 5, 5], &values)?;

    let view = handle.slice(&[1, 2, 0], &[4, 5, 3])?;
    assert_eq!(view.shape()?.dims(), &[3, 3, 3]);

    let sub = view.get_chunk(&[1, 1, 1], &[2, 2, 2])?;
    let direct = handle.get_chunk(&[2, 3, 1], &[2, 2, 2])?;
    assert_eq!(sub, direct);
    Ok(())
}

#[test]
fn test_e2e_algebra_pipeline() -> Result<()> {
    let config = StoreConfig::new().tile_bytes(64);
    let registry = TensorRegistry::open(config)?;
    let shape = Shape::from_dims(&[16, 16])?;

    let a = registry.create_tensor("a", shape.clone(), DType::Float64)?;
    let b = registry.create_tensor("b", shape.clone(), DType::Float64)?;
    let c = registry.create_tensor("c", shape, DType::Float64)?;
    a.store_elements(&[0, 0], &[16, 16], &[1.0f64; 256])?;
    b.store_elements(&[0, 0], &[16, 16], &[2.0f64; 256])?;
    c.store_elements(&[0, 0], &[16, 16], &[3.0f64; 256])?;

    // (a + b) * c = 9 everywhere
    let sum = registry.add("a", "b")?;
    let product = registry.multiply(sum.name(), "c")?;
    assert_eq!(product.name(), "a_plus_b_times_c");

    let values: Vec<f64> = decode_elements(&product.read_all()?);
    assert!(values.iter().all(|&v| (v - 9.0).abs() < 1e-12));
    assert_eq!(registry.reduce(product.name(), ReduceOp::Sum)?, 9.0 * 256.0);
    assert_eq!(registry.reduce(product.name(), ReduceOp::Mean)?, 9.0);
    Ok(())
}

#[test]
fn test_e2e_cosine_cases() -> Result<()> {
    let registry = TensorRegistry::in_memory();
    let shape = Shape::from_dims(&[3])?;
    let x = registry.create_tensor("x", shape.clone(), DType::Float32)?;
    let y = registry.create_tensor("y", shape.clone(), DType::Float32)?;
    let z = registry.create_tensor("z", shape, DType::Float32)?;
    x.store_elements(&[0], &[3], &[1.0f32, 0.0, 0.0])?;
    y.store_elements(&[0], &[3], &[0.0f32, 1.0, 0.0])?;
    z.store_elements(&[0], &[3], &[-2.0f32, 0.0, 0.0])?;

    assert!((registry.cosine_similarity("x", "x")? - 1.0).abs() < 1e-9);
    assert!(registry.cosine_similarity("x", "y")?.abs() < 1e-9);
    assert!((registry.cosine_similarity("x", "z")? + 1.0).abs() < 1e-9);
    Ok(())
}

#[test]
fn test_e2e_mismatched_operands() -> Result<()> {
    let registry = TensorRegistry::in_memory();
    registry.create_tensor("i", Shape::from_dims(&[4])?, DType::Int32)?;
    registry.create_tensor("f", Shape::from_dims(&[4])?, DType::Float32)?;
    registry.create_tensor("g", Shape::from_dims(&[2, 2])?, DType::Float32)?;

    assert_eq!(registry.add("i", "f").unwrap_err().kind(), ErrorKind::TensorTypeMismatch);
    assert_eq!(registry.add("f", "g").unwrap_err().kind(), ErrorKind::TensorShapeMismatch);
    assert_eq!(
        registry.cosine_similarity("g", "g").unwrap_err().kind(),
        ErrorKind::TensorShapeMismatch
    );

    // Failed operations leave nothing behind
    assert_eq!(registry.len(), 3);
    Ok(())
}

#[test]
fn test_e2e_standalone_algebra_result() -> Result<()> {
    let registry = TensorRegistry::in_memory();
    let a = registry.create_tensor("a", Shape::from_dims(&[2])?, DType::Int32)?;
    a.store_chunk(&[0], &[2], &encode_elements(&[7i32, -7]))?;

    let doubled = TensorAlgebra::default().add(&a, &a)?;
    let handle = registry.insert(doubled)?;
    assert_eq!(handle.get_elements::<i32>(&[0], &[2])?, vec![14, -14]);
    Ok(())
}

#[cfg(feature = "mmap")]
#[test]
fn test_e2e_mmap_persistence_roundtrip() -> Result<()> {
    let dir = scratch_dir("persist");
    let config = StoreConfig::mmap(&dir);

    {
        let registry = TensorRegistry::open(config.clone())?;
        let w = registry.create_tensor("weights", Shape::from_dims(&[3, 4])?, DType::Int64)?;
        let values: Vec<i64> = (0..12).map(|v| v * 100).collect();
        w.store_elements(&[0, 0], &[3, 4], &values)?;
        registry.set_metadata("weights", "layer", "dense_1")?;

        let scratch = registry.create_tensor("scratch", Shape::from_dims(&[2])?, DType::Int32)?;
        scratch.store_elements(&[0], &[2], &[1i32, 2])?;
        registry.drop_tensor("scratch")?;

        registry.sync()?;
        assert!(dir.join("weights.tensor").exists());
        assert!(!dir.join("scratch.tensor").exists());
        assert!(dir.join("manifest.json").exists());
    }

    let registry = TensorRegistry::open(config)?;
    assert_eq!(registry.list_tensors(), vec!["weights".to_string()]);

    let w = registry.get_tensor("weights")?;
    assert_eq!(w.shape()?.dims(), &[3, 4]);
    assert_eq!(w.dtype(), DType::Int64);
    assert_eq!(w.get_elements::<i64>(&[2, 0], &[1, 4])?, vec![800, 900, 1000, 1100]);
    assert_eq!(
        registry.metadata("weights")?.get("layer").map(String::as_str),
        Some("dense_1")
    );
    assert_eq!(registry.stats().persistent, 1);

    drop(registry);
    std::fs::remove_dir_all(&dir)?;
    Ok(())
}

#[cfg(feature = "mmap")]
#[test]
fn test_e2e_mmap_algebra_results_are_files() -> Result<()> {
    let dir = scratch_dir("algebra");
    let registry = TensorRegistry::open(StoreConfig::mmap(&dir).tile_bytes(16))?;
    assert_eq!(registry.config().backend, BackendKind::Mmap);

    let a = registry.create_tensor("a", Shape::from_dims(&[10])?, DType::Float32)?;
    a.store_elements(&[0], &[10], &[1.5f32; 10])?;

    let sum = registry.add("a", "a")?;
    assert!(dir.join("a_plus_a.tensor").exists());
    assert_eq!(sum.get_elements::<f32>(&[9], &[1])?, vec![3.0]);

    registry.drop_tensor("a_plus_a")?;
    assert!(!dir.join("a_plus_a.tensor").exists());

    drop(registry);
    std::fs::remove_dir_all(&dir)?;
    Ok(())
}

#[cfg(feature = "mmap")]
#[test]
fn test_e2e_corrupt_manifest_is_reported() -> Result<()> {
    let dir = scratch_dir("corrupt");
    std::fs::create_dir_all(&dir)?;
    std::fs::write(dir.join("manifest.json"), b"{ not json")?;

    let err = TensorRegistry::open(StoreConfig::mmap(&dir)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);

    std::fs::remove_dir_all(&dir)?;
    Ok(())
}

#[cfg(feature = "mmap")]
#[test]
fn test_e2e_reopen_without_sync_frees_names() -> Result<()> {
    let dir = scratch_dir("nosync");
    let config = StoreConfig::mmap(&dir);

    {
        let registry = TensorRegistry::open(config.clone())?;
        registry.create_tensor("x", Shape::from_dims(&[4])?, DType::Int32)?;
        assert!(dir.join("x.tensor").exists());
        assert_eq!(registry.stats().persistent, 0);
    }
    // Never recorded by sync, so the file went with the registry
    assert!(!dir.join("x.tensor").exists());

    let registry = TensorRegistry::open(config.clone())?;
    assert!(!registry.contains("x"));
    let x = registry.create_tensor("x", Shape::from_dims(&[4])?, DType::Int32)?;
    x.store_elements(&[0], &[4], &[1i32, 2, 3, 4])?;
    registry.sync()?;
    assert_eq!(registry.stats().persistent, 1);

    // Dropped after the last sync: the stale manifest entry is skipped
    registry.drop_tensor("x")?;
    drop(registry);

    let registry = TensorRegistry::open(config)?;
    assert!(registry.is_empty());
    registry.create_tensor("x", Shape::from_dims(&[2])?, DType::Int64)?;

    drop(registry);
    std::fs::remove_dir_all(&dir)?;
    Ok(())
}

#[cfg(feature = "mmap")]
#[test]
fn test_e2e_unlisted_files_are_cleared_on_open() -> Result<()> {
    let dir = scratch_dir("unlisted");
    std::fs::create_dir_all(&dir)?;
    // Leftover of a process that died before syncing
    std::fs::write(dir.join("orphan.tensor"), [0u8; 16])?;
    std::fs::write(dir.join("notes.txt"), b"keep me")?;

    let registry = TensorRegistry::open(StoreConfig::mmap(&dir))?;
    assert!(!dir.join("orphan.tensor").exists());
    assert!(dir.join("notes.txt").exists());

    let orphan = registry.create_tensor("orphan", Shape::from_dims(&[4])?, DType::Float32)?;
    assert_eq!(orphan.byte_size()?, 16);
    assert!(registry.drop_tensor("orphan").is_ok());

    drop(registry);
    std::fs::remove_dir_all(&dir)?;
    Ok(())
}

#[cfg(feature = "mmap")]
#[test]
fn test_e2e_foreign_file_is_a_conflict() -> Result<()> {
    let dir = scratch_dir("conflict");
    let registry = TensorRegistry::open(StoreConfig::mmap(&dir))?;

    // Appears after open, so the registry does not own it
    std::fs::write(dir.join("late.tensor"), [1u8; 8])?;
    let err = registry
        .create_tensor("late", Shape::from_dims(&[2])?, DType::Int32)
        .unwrap_err();
    assert!(matches!(err, telum_ooc::RegistryError::FileConflict { .. }));
    assert_eq!(err.kind(), ErrorKind::Io);
    assert!(!registry.contains("late"));

    // The foreign file is left alone and the name is not reserved
    assert_eq!(std::fs::read(dir.join("late.tensor"))?, vec![1u8; 8]);
    std::fs::remove_file(dir.join("late.tensor"))?;
    registry.create_tensor("late", Shape::from_dims(&[2])?, DType::Int32)?;

    drop(registry);
    std::fs::remove_dir_all(&dir)?;
    Ok(())
}

