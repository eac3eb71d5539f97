//! Concurrent access tests
//!
//! Disjoint chunk writes from many threads must all land; overlapping writes
//! must be serialized, so every chunk read observes exactly one writer's
//! payload.

use anyhow::Result;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use telum_core::{decode_elements, DType, Shape};
use telum_ooc::TensorRegistry;

const THREADS: usize = 8;

#[test]
fn test_disjoint_writes_all_land() -> Result<()> {
    let registry = TensorRegistry::in_memory();
    let handle = registry.create_tensor("rows", Shape::from_dims(&[THREADS, 256])?, DType::Int64)?;

    let workers: Vec<_> = (0..THREADS)
        .map(|row| {
            let handle = handle.clone();
            thread::spawn(move || {
                let values = vec![row as i64 + 1; 256];
                for _ in 0..50 {
                    handle.store_elements(&[row, 0], &[1, 256], &values)?;
                }
                Ok::<_, telum_ooc::StoreError>(())
            })
        })
        .collect();

    for worker in workers {
        worker.join().expect("worker panicked")?;
    }

    let all: Vec<i64> = decode_elements(&handle.read_all()?);
    for (row, values) in all.chunks(256).enumerate() {
        assert!(values.iter().all(|&v| v == row as i64 + 1), "row {row}");
    }
    Ok(())
}

#[test]
fn test_overlapping_writes_are_not_interleaved() -> Result<()> {
    let registry = TensorRegistry::in_memory();
    let handle = registry.create_tensor("shared", Shape::from_dims(&[64, 64])?, DType::Int32)?;

    let writers: Vec<_> = (0..THREADS)
        .map(|id| {
            let handle = handle.clone();
            thread::spawn(move || {
                let values = vec![id as i32 + 1; 64 * 64];
                for _ in 0..20 {
                    handle.store_elements(&[0, 0], &[64, 64], &values)?;
                }
                Ok::<_, telum_ooc::StoreError>(())
            })
        })
        .collect();

    let reader = {
        let handle = handle.clone();
        thread::spawn(move || {
            for _ in 0..100 {
                let snapshot: Vec<i32> = handle.get_elements(&[0, 0], &[64, 64])?;
                let first = snapshot[0];
                assert!(snapshot.iter().all(|&v| v == first), "torn read");
            }
            Ok::<_, telum_ooc::StoreError>(())
        })
    };

    for writer in writers {
        writer.join().expect("writer panicked")?;
    }
    reader.join().expect("reader panicked")?;

    let final_values: Vec<i32> = handle.get_elements(&[0, 0], &[64, 64])?;
    let winner = final_values[0];
    assert!((1..=THREADS as i32).contains(&winner));
    assert!(final_values.iter().all(|&v| v == winner));
    Ok(())
}

#[test]
fn test_registry_shared_across_threads() -> Result<()> {
    let registry = Arc::new(TensorRegistry::in_memory());

    let workers: Vec<_> = (0..THREADS)
        .map(|id| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || -> Result<()> {
                let name = format!("t{id}");
                let handle = registry.create_tensor(&name, Shape::from_dims(&[16])?, DType::Float32)?;
                handle.store_elements(&[0], &[16], &[id as f32; 16])?;
                let total = registry.reduce(&name, telum_ooc::ReduceOp::Sum)?;
                assert_eq!(total, 16.0 * id as f32 as f64);
                Ok(())
            })
        })
        .collect();

    for worker in workers {
        worker.join().expect("worker panicked")?;
    }

    assert_eq!(registry.len(), THREADS);
    Ok(())
}

#[test]
fn test_drop_while_views_in_other_threads() -> Result<()> {
    let registry = TensorRegistry::in_memory();
    let handle = registry.create_tensor("ephemeral", Shape::from_dims(&[32])?, DType::Int32)?;
    let view = handle.slice(&[8], &[16])?;

    registry.drop_tensor("ephemeral")?;

    let err = thread::spawn(move || view.get_chunk(&[0], &[8]).unwrap_err())
        .join()
        .expect("reader panicked");
    assert_eq!(err.kind(), telum_core::ErrorKind::NotConnected);
    Ok(())
}

/// Every worker adds the same operands; each result must get its own name.
fn concurrent_adds(registry: Arc<TensorRegistry>, rounds: usize) -> Result<()> {
    let a = registry.create_tensor("a", Shape::from_dims(&[8])?, DType::Int32)?;
    let b = registry.create_tensor("b", Shape::from_dims(&[8])?, DType::Int32)?;
    a.store_elements(&[0], &[8], &[1i32; 8])?;
    b.store_elements(&[0], &[8], &[2i32; 8])?;

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || -> Result<Vec<String>> {
                let mut names = Vec::new();
                for _ in 0..rounds {
                    let sum = registry.add("a", "b")?;
                    assert_eq!(sum.get_elements::<i32>(&[0], &[8])?, vec![3; 8]);
                    names.push(sum.name().to_string());
                }
                Ok(names)
            })
        })
        .collect();

    let mut names = HashSet::new();
    for worker in workers {
        for name in worker.join().expect("worker panicked")? {
            assert!(names.insert(name.clone()), "duplicate result name {name}");
        }
    }

    assert_eq!(names.len(), 4 * rounds);
    assert!(names.contains("a_plus_b"));
    assert_eq!(registry.len(), 4 * rounds + 2);
    Ok(())
}

#[test]
fn test_concurrent_algebra_results_get_distinct_names() -> Result<()> {
    concurrent_adds(Arc::new(TensorRegistry::in_memory()), 50)
}

#[cfg(feature = "mmap")]
#[test]
fn test_concurrent_algebra_results_on_files() -> Result<()> {
    let dir = std::env::temp_dir().join(format!("telum_concurrent_adds_{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);

    let registry = Arc::new(TensorRegistry::open(telum_ooc::StoreConfig::mmap(&dir))?);
    concurrent_adds(Arc::clone(&registry), 10)?;

    drop(registry);
    std::fs::remove_dir_all(&dir)?;
    Ok(())
}
