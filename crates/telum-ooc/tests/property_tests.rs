//! Property-based tests for chunk storage
//!
//! These use proptest to check chunk planning and chunk I/O against a plain
//! row-major reference model.

use proptest::prelude::*;
use telum_core::{element_count, linear_offset, DType, Shape};
use telum_ooc::{contiguous_runs, ChunkSpec, ReduceOp, StoreConfig, Tensor, TensorAlgebra};

// ============================================================================
// Test Utilities
// ============================================================================

/// Shape of rank 1..=4 with small dims, plus a chunk rectangle inside it
fn shape_and_chunk() -> impl Strategy<Value = (Vec<usize>, Vec<usize>, Vec<usize>)> {
    prop::collection::vec(1usize..6, 1..=4).prop_flat_map(|shape| {
        let starts: Vec<_> = shape.iter().map(|&d| 0..d).collect();
        (Just(shape), starts).prop_flat_map(|(shape, start)| {
            let extents: Vec<_> = shape
                .iter()
                .zip(&start)
                .map(|(&d, &s)| 1..=(d - s))
                .collect();
            (Just(shape), Just(start), extents)
        })
    })
}

fn all_indices(shape: &[usize]) -> Vec<Vec<usize>> {
    let mut out = vec![vec![]];
    for &dim in shape {
        out = out
            .into_iter()
            .flat_map(|prefix| {
                (0..dim).map(move |i| {
                    let mut next = prefix.clone();
                    next.push(i);
                    next
                })
            })
            .collect();
    }
    out
}

fn memory_tensor(shape: &[usize], dtype: DType) -> Tensor {
    Tensor::create("p", Shape::from_dims(shape).unwrap(), dtype, &StoreConfig::default()).unwrap()
}

// ============================================================================
// Chunk Planning Properties
// ============================================================================

proptest! {
    /// Property: runs cover exactly the chunk's elements, in chunk order
    #[test]
    fn prop_runs_match_reference((shape, start, chunk) in shape_and_chunk()) {
        let mut from_runs = Vec::new();
        let mut next_chunk_offset = 0;
        for run in contiguous_runs(&shape, &start, &chunk) {
            prop_assert_eq!(run.chunk_offset, next_chunk_offset);
            next_chunk_offset += run.len;
            from_runs.extend(run.parent_offset..run.parent_offset + run.len);
        }

        let expected: Vec<usize> = all_indices(&chunk)
            .into_iter()
            .map(|idx| {
                let abs: Vec<usize> = idx.iter().zip(&start).map(|(i, s)| i + s).collect();
                linear_offset(&shape, &abs).unwrap()
            })
            .collect();

        prop_assert_eq!(from_runs, expected);
    }

    /// Property: budget tiling covers the tensor exactly once within budget
    #[test]
    fn prop_budget_tiling_covers_once(
        shape in prop::collection::vec(1usize..8, 1..=3),
        budget in 1usize..64,
    ) {
        let spec = ChunkSpec::for_budget(&shape, budget);
        let mut covered = vec![0u8; element_count(&shape)];

        for idx in spec.iter() {
            let (start, extents) = spec.chunk_rect(&idx);
            prop_assert!(element_count(&extents) <= budget);
            for run in contiguous_runs(&shape, &start, &extents) {
                for cell in &mut covered[run.parent_offset..run.parent_offset + run.len] {
                    *cell += 1;
                }
            }
        }

        prop_assert!(covered.iter().all(|&c| c == 1));
    }
}

// ============================================================================
// Chunk I/O Properties
// ============================================================================

proptest! {
    /// Property: get_chunk returns what store_chunk wrote, and nothing else moved
    #[test]
    fn prop_write_read_roundtrip((shape, start, chunk) in shape_and_chunk(), seed in any::<i32>()) {
        let tensor = memory_tensor(&shape, DType::Int32);
        let handle = tensor.handle();

        let values: Vec<i32> = (0..element_count(&chunk) as i32)
            .map(|i| i.wrapping_mul(31).wrapping_add(seed) | 1)
            .collect();
        handle.store_elements(&start, &chunk, &values).unwrap();
        prop_assert_eq!(handle.get_elements::<i32>(&start, &chunk).unwrap(), values);

        // Elements outside the rectangle stay zero
        let all: Vec<i32> = telum_core::decode_elements(&handle.read_all().unwrap());
        let inside = all.iter().filter(|&&v| v != 0).count();
        prop_assert_eq!(inside, element_count(&chunk));
    }

    /// Property: reading through a slice equals reading the translated rectangle
    #[test]
    fn prop_slice_equivalence((shape, start, extents) in shape_and_chunk()) {
        let tensor = memory_tensor(&shape, DType::Float64);
        let handle = tensor.handle();
        let values: Vec<f64> = (0..element_count(&shape)).map(|v| v as f64).collect();
        handle.store_elements(&vec![0; shape.len()], &shape, &values).unwrap();

        let end: Vec<usize> = start.iter().zip(&extents).map(|(s, e)| s + e).collect();
        let view = handle.slice(&start, &end).unwrap();

        let through_view = view.get_chunk(&vec![0; shape.len()], &extents).unwrap();
        let direct = handle.get_chunk(&start, &extents).unwrap();
        prop_assert_eq!(through_view, direct);
    }

    /// Property: tiled addition agrees with elementwise reference for any tile budget
    #[test]
    fn prop_add_matches_reference(
        shape in prop::collection::vec(1usize..7, 1..=3),
        tile_bytes in 1usize..128,
    ) {
        let count = element_count(&shape);
        let lhs: Vec<i64> = (0..count as i64).collect();
        let rhs: Vec<i64> = (0..count as i64).map(|v| v * v - 3).collect();

        let a = memory_tensor(&shape, DType::Int64);
        let b = memory_tensor(&shape, DType::Int64);
        let origin = vec![0; shape.len()];
        a.handle().store_elements(&origin, &shape, &lhs).unwrap();
        b.handle().store_elements(&origin, &shape, &rhs).unwrap();

        let algebra = TensorAlgebra::new(StoreConfig::new().tile_bytes(tile_bytes));
        let sum = algebra.add(&a.handle(), &b.handle()).unwrap();
        let got: Vec<i64> = sum.handle().get_elements(&origin, &shape).unwrap();

        let expected: Vec<i64> = lhs.iter().zip(&rhs).map(|(x, y)| x + y).collect();
        prop_assert_eq!(got, expected.clone());

        let total = algebra.reduce(&sum.handle(), ReduceOp::Sum).unwrap();
        prop_assert_eq!(total, expected.iter().sum::<i64>() as f64);
    }
}
