//! Chunk geometry for row-major tensors
//!
//! Two related tools live here:
//!
//! - [`ChunkSpec`] tiles a whole tensor into a deterministic grid of chunks,
//!   used by the algebra to stream operands through bounded buffers
//! - [`ContiguousRuns`] decomposes one chunk rectangle into the maximal
//!   contiguous byte runs of its parent, used by the store to scatter and
//!   gather chunk payloads with one copy per run
//!
//! # Example
//!
//! ```
//! use telum_ooc::chunking::{contiguous_runs, ChunkSpec};
//!
//! let spec = ChunkSpec::tile_size(&[100, 100], &[50, 100])?;
//! assert_eq!(spec.total_chunks(), 2);
//!
//! // A chunk covering two full rows is a single run
//! let runs: Vec<_> = contiguous_runs(&[4, 6], &[1, 0], &[2, 6]).collect();
//! assert_eq!(runs.len(), 1);
//! assert_eq!(runs[0].len, 12);
//! # Ok::<(), telum_core::ShapeError>(())
//! ```

use telum_core::{element_count, row_major_strides, Dims, ShapeError};

/// Deterministic tiling of a tensor into a grid of chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpec {
    tensor_shape: Dims,
    chunk_size: Dims,
    num_chunks: Dims,
}

impl ChunkSpec {
    /// Tile `tensor_shape` with chunks of `chunk_size`.
    ///
    /// Edge chunks are truncated to the tensor. A tensor with a zero
    /// dimension has no chunks at all.
    ///
    /// # Errors
    ///
    /// - `RankMismatch` if the ranks differ
    /// - `InvalidShape` if any tile dimension is zero
    pub fn tile_size(tensor_shape: &[usize], chunk_size: &[usize]) -> Result<Self, ShapeError> {
        if tensor_shape.len() != chunk_size.len() {
            return Err(ShapeError::RankMismatch {
                context: "tile size",
                expected: tensor_shape.len(),
                got: chunk_size.len(),
            });
        }

        if chunk_size.contains(&0) {
            return Err(ShapeError::InvalidShape {
                dims: chunk_size
                    .iter()
                    .map(|&d| i64::try_from(d).unwrap_or(i64::MAX))
                    .collect(),
                reason: "tile dimensions must be positive".into(),
            });
        }

        let num_chunks = tensor_shape
            .iter()
            .zip(chunk_size)
            .map(|(&t, &c)| t.div_ceil(c))
            .collect();

        Ok(Self {
            tensor_shape: Dims::from_slice(tensor_shape),
            chunk_size: Dims::from_slice(chunk_size),
            num_chunks,
        })
    }

    /// Tile `tensor_shape` so that no chunk holds more than `max_elements`.
    ///
    /// Innermost axes are kept whole for as long as the budget allows, so
    /// each chunk stays a single contiguous run of the parent whenever
    /// possible. A budget below one element is treated as one.
    pub fn for_budget(tensor_shape: &[usize], max_elements: usize) -> Self {
        let mut budget = max_elements.max(1);
        let mut chunk_size: Dims = tensor_shape.iter().map(|_| 1).collect();

        for axis in (0..tensor_shape.len()).rev() {
            let dim = tensor_shape[axis].max(1);
            if dim <= budget {
                chunk_size[axis] = dim;
                budget /= dim;
            } else {
                chunk_size[axis] = budget;
                break;
            }
        }

        let num_chunks = tensor_shape
            .iter()
            .zip(&chunk_size)
            .map(|(&t, &c)| t.div_ceil(c))
            .collect();

        Self {
            tensor_shape: Dims::from_slice(tensor_shape),
            chunk_size,
            num_chunks,
        }
    }

    pub fn tensor_shape(&self) -> &[usize] {
        &self.tensor_shape
    }

    pub fn chunk_size(&self) -> &[usize] {
        &self.chunk_size
    }

    pub fn num_chunks(&self) -> &[usize] {
        &self.num_chunks
    }

    /// Total number of chunks; 1 for a scalar, 0 for an empty tensor.
    pub fn total_chunks(&self) -> usize {
        self.num_chunks.iter().product()
    }

    pub fn rank(&self) -> usize {
        self.tensor_shape.len()
    }

    /// Half-open bounds `(start, end)` of a chunk in element coordinates.
    pub fn chunk_bounds(&self, chunk_idx: &ChunkIndex) -> (Dims, Dims) {
        debug_assert_eq!(chunk_idx.coords.len(), self.rank());

        let mut start = Dims::with_capacity(self.rank());
        let mut end = Dims::with_capacity(self.rank());

        for axis in 0..self.rank() {
            let s = chunk_idx.coords[axis] * self.chunk_size[axis];
            let e = (s + self.chunk_size[axis]).min(self.tensor_shape[axis]);
            start.push(s);
            end.push(e);
        }

        (start, end)
    }

    /// Start and extents of a chunk, the form chunk I/O takes.
    ///
    /// Edge chunks may be smaller than `chunk_size`.
    pub fn chunk_rect(&self, chunk_idx: &ChunkIndex) -> (Dims, Dims) {
        let (start, end) = self.chunk_bounds(chunk_idx);
        let extents = start.iter().zip(&end).map(|(s, e)| e - s).collect();
        (start, extents)
    }

    pub fn is_valid_chunk(&self, chunk_idx: &ChunkIndex) -> bool {
        chunk_idx.coords.len() == self.rank()
            && chunk_idx
                .coords
                .iter()
                .zip(&self.num_chunks)
                .all(|(&coord, &num)| coord < num)
    }

    pub fn iter(&self) -> ChunkIterator<'_> {
        ChunkIterator::new(self)
    }
}

/// Position of a chunk in chunk space (not element space).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkIndex {
    pub coords: Dims,
}

impl ChunkIndex {
    pub fn new(coords: &[usize]) -> Self {
        Self {
            coords: Dims::from_slice(coords),
        }
    }

    /// Row-major decomposition of `linear_idx` over the chunk grid.
    pub fn from_linear(linear_idx: usize, num_chunks: &[usize]) -> Self {
        let mut coords = Dims::from_elem(0, num_chunks.len());
        let mut remaining = linear_idx;

        for axis in (0..num_chunks.len()).rev() {
            coords[axis] = remaining % num_chunks[axis];
            remaining /= num_chunks[axis];
        }

        Self { coords }
    }

    pub fn to_linear(&self, num_chunks: &[usize]) -> usize {
        debug_assert_eq!(self.coords.len(), num_chunks.len());

        self.coords
            .iter()
            .zip(num_chunks)
            .fold(0, |acc, (&c, &n)| acc * n + c)
    }
}

/// Iterator over the chunks of a [`ChunkSpec`] in row-major order.
pub struct ChunkIterator<'a> {
    spec: &'a ChunkSpec,
    current_linear: usize,
    total_chunks: usize,
}

impl<'a> ChunkIterator<'a> {
    pub fn new(spec: &'a ChunkSpec) -> Self {
        Self {
            spec,
            current_linear: 0,
            total_chunks: spec.total_chunks(),
        }
    }
}

impl Iterator for ChunkIterator<'_> {
    type Item = ChunkIndex;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_linear >= self.total_chunks {
            return None;
        }

        let chunk_idx = ChunkIndex::from_linear(self.current_linear, self.spec.num_chunks());
        self.current_linear += 1;

        Some(chunk_idx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.total_chunks - self.current_linear;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for ChunkIterator<'_> {}

/// One contiguous stretch shared by a chunk and its parent, in elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Run {
    /// Element offset in the parent tensor
    pub parent_offset: usize,
    /// Element offset in the packed chunk payload
    pub chunk_offset: usize,
    pub len: usize,
}

/// Plan the contiguous runs of the rectangle `start .. start + chunk_shape`.
///
/// The caller must have checked the rectangle with
/// [`check_chunk_bounds`](telum_core::check_chunk_bounds). Runs are yielded in
/// chunk order, so their `chunk_offset`s are consecutive.
pub fn contiguous_runs(shape: &[usize], start: &[usize], chunk_shape: &[usize]) -> ContiguousRuns {
    ContiguousRuns::new(shape, start, chunk_shape)
}

/// Iterator produced by [`contiguous_runs`].
#[derive(Debug, Clone)]
pub struct ContiguousRuns {
    strides: Dims,
    /// Outer axes walked by the odometer; axes at or past `split` form one run
    split: usize,
    chunk_shape: Dims,
    counter: Dims,
    base: usize,
    run_len: usize,
    emitted: usize,
    total: usize,
}

impl ContiguousRuns {
    fn new(shape: &[usize], start: &[usize], chunk_shape: &[usize]) -> Self {
        let rank = shape.len();
        let strides = row_major_strides(shape);
        let base = start.iter().zip(&strides).map(|(s, st)| s * st).sum();

        let (split, run_len, total) = if element_count(chunk_shape) == 0 {
            (0, 0, 0)
        } else if rank == 0 {
            (0, 1, 1)
        } else {
            let mut split = rank - 1;
            while split > 0 && chunk_shape[split] == shape[split] {
                split -= 1;
            }
            (
                split,
                element_count(&chunk_shape[split..]),
                element_count(&chunk_shape[..split]),
            )
        };

        Self {
            strides,
            split,
            chunk_shape: Dims::from_slice(chunk_shape),
            counter: Dims::from_elem(0, split),
            base,
            run_len,
            emitted: 0,
            total,
        }
    }

    pub fn run_len(&self) -> usize {
        self.run_len
    }
}

impl Iterator for ContiguousRuns {
    type Item = Run;

    fn next(&mut self) -> Option<Run> {
        if self.emitted >= self.total {
            return None;
        }

        let parent_offset = self.base
            + self
                .counter
                .iter()
                .zip(&self.strides)
                .map(|(c, st)| c * st)
                .sum::<usize>();

        let run = Run {
            parent_offset,
            chunk_offset: self.emitted * self.run_len,
            len: self.run_len,
        };
        self.emitted += 1;

        for axis in (0..self.split).rev() {
            self.counter[axis] += 1;
            if self.counter[axis] < self.chunk_shape[axis] {
                break;
            }
            self.counter[axis] = 0;
        }

        Some(run)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.total - self.emitted;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for ContiguousRuns {}
