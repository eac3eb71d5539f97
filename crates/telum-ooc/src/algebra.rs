//! Elementwise algebra over chunked tensors
//!
//! All operations stream their operands tile by tile through chunk reads, so
//! memory use is bounded by [`StoreConfig::tile_bytes`] regardless of tensor
//! size. Operands are only read; binary operations allocate a new result
//! tensor with the algebra's configuration.
//!
//! # Semantics
//!
//! - Operand shapes must be identical (no broadcasting), then dtypes
//! - Integers wrap on overflow, floats follow IEEE 754
//! - `multiply` is the elementwise (Hadamard) product
//! - `divide` follows IEEE 754 for floats; integer division by zero yields 0
//! - `sigmoid` and `tanh` need a float dtype, `relu` takes any
//! - Similarity and reductions accumulate in `f64`; axis reductions
//!   produce `float64` tensors
//!
//! # Example
//!
//! ```
//! use telum_core::{DType, Shape};
//! use telum_ooc::{StoreConfig, Tensor, TensorAlgebra};
//!
//! let config = StoreConfig::default();
//! let a = Tensor::create("a", Shape::from_dims(&[3])?, DType::Float64, &config)?;
//! let b = Tensor::create("b", Shape::from_dims(&[3])?, DType::Float64, &config)?;
//! a.handle().store_elements(&[0], &[3], &[1.0f64, 2.0, 3.0])?;
//! b.handle().store_elements(&[0], &[3], &[4.0f64, 5.0, 6.0])?;
//!
//! let algebra = TensorAlgebra::new(config);
//! let sum = algebra.add(&a.handle(), &b.handle())?;
//! assert_eq!(sum.handle().get_elements::<f64>(&[0], &[3])?, vec![5.0, 7.0, 9.0]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::chunking::ChunkSpec;
use crate::config::StoreConfig;
use crate::error::{AlgebraError, StoreError};
use crate::handle::{Tensor, TensorHandle};
use serde::{Deserialize, Serialize};
use std::fmt;
use telum_core::{
    broadcastable, dispatch_dtype, element_count, row_major_strides, DType, Dims, Element, Shape,
};

/// Elementwise binary operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl BinaryOp {
    /// Infix word used in default result names.
    pub fn word(self) -> &'static str {
        match self {
            BinaryOp::Add => "plus",
            BinaryOp::Subtract => "minus",
            BinaryOp::Multiply => "times",
            BinaryOp::Divide => "over",
        }
    }

    fn apply<T: Element>(self, x: T, y: T) -> T {
        match self {
            BinaryOp::Add => x.elem_add(y),
            BinaryOp::Subtract => x.elem_sub(y),
            BinaryOp::Multiply => x.elem_mul(y),
            BinaryOp::Divide => x.elem_div(y),
        }
    }
}

/// Elementwise activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnaryOp {
    Relu,
    Sigmoid,
    Tanh,
}

impl UnaryOp {
    pub fn as_str(self) -> &'static str {
        match self {
            UnaryOp::Relu => "relu",
            UnaryOp::Sigmoid => "sigmoid",
            UnaryOp::Tanh => "tanh",
        }
    }

    fn supports(self, dtype: DType) -> bool {
        self == UnaryOp::Relu || dtype.is_float()
    }

    fn apply<T: Element>(self, x: T) -> T {
        match self {
            UnaryOp::Relu => {
                if x > T::zero() {
                    x
                } else {
                    T::zero()
                }
            }
            UnaryOp::Sigmoid => T::from_f64(1.0 / (1.0 + (-x.as_f64()).exp())).unwrap_or(x),
            UnaryOp::Tanh => T::from_f64(x.as_f64().tanh()).unwrap_or(x),
        }
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reduction over a whole tensor or along one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReduceOp {
    Sum,
    Mean,
    Min,
    Max,
}

impl ReduceOp {
    pub fn as_str(self) -> &'static str {
        match self {
            ReduceOp::Sum => "sum",
            ReduceOp::Mean => "mean",
            ReduceOp::Min => "min",
            ReduceOp::Max => "max",
        }
    }
}

impl fmt::Display for ReduceOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dot product and squared norms of two vectors, each operand divided by its
/// running maximum magnitude so no partial sum overflows or underflows.
#[derive(Debug, Default)]
struct CosineAcc {
    scale_a: f64,
    scale_b: f64,
    dot: f64,
    ssq_a: f64,
    ssq_b: f64,
}

impl CosineAcc {
    fn push(&mut self, x: f64, y: f64) {
        let (ax, ay) = (x.abs(), y.abs());
        if ax > self.scale_a {
            let r = self.scale_a / ax;
            self.ssq_a *= r * r;
            self.dot *= r;
            self.scale_a = ax;
        }
        if ay > self.scale_b {
            let r = self.scale_b / ay;
            self.ssq_b *= r * r;
            self.dot *= r;
            self.scale_b = ay;
        }

        // A zero scale means every value so far, this one included, was zero
        let xs = if self.scale_a > 0.0 { x / self.scale_a } else { 0.0 };
        let ys = if self.scale_b > 0.0 { y / self.scale_b } else { 0.0 };
        self.dot += xs * ys;
        self.ssq_a += xs * xs;
        self.ssq_b += ys * ys;
    }

    fn similarity(&self) -> f64 {
        if self.scale_a == 0.0 || self.scale_b == 0.0 {
            return 0.0;
        }
        self.dot / (self.ssq_a.sqrt() * self.ssq_b.sqrt())
    }
}

#[derive(Debug, Clone)]
struct ReduceAcc {
    sum: f64,
    min: f64,
    max: f64,
    count: usize,
}

impl Default for ReduceAcc {
    fn default() -> Self {
        // NaN seeds let f64::min/max pick the first real value
        Self {
            sum: 0.0,
            min: f64::NAN,
            max: f64::NAN,
            count: 0,
        }
    }
}

impl ReduceAcc {
    fn push(&mut self, v: f64) {
        self.sum += v;
        self.min = self.min.min(v);
        self.max = self.max.max(v);
        self.count += 1;
    }

    fn finish(&self, op: ReduceOp) -> f64 {
        match op {
            ReduceOp::Sum => self.sum,
            ReduceOp::Mean => self.sum / self.count as f64,
            ReduceOp::Min => self.min,
            ReduceOp::Max => self.max,
        }
    }
}

/// Streaming elementwise operations.
#[derive(Debug, Clone, Default)]
pub struct TensorAlgebra {
    config: StoreConfig,
}

impl TensorAlgebra {
    pub fn new(config: StoreConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn add(&self, a: &TensorHandle, b: &TensorHandle) -> Result<Tensor, AlgebraError> {
        self.apply(BinaryOp::Add, a, b, None)
    }

    pub fn subtract(&self, a: &TensorHandle, b: &TensorHandle) -> Result<Tensor, AlgebraError> {
        self.apply(BinaryOp::Subtract, a, b, None)
    }

    /// Elementwise (Hadamard) product.
    pub fn multiply(&self, a: &TensorHandle, b: &TensorHandle) -> Result<Tensor, AlgebraError> {
        self.apply(BinaryOp::Multiply, a, b, None)
    }

    pub fn divide(&self, a: &TensorHandle, b: &TensorHandle) -> Result<Tensor, AlgebraError> {
        self.apply(BinaryOp::Divide, a, b, None)
    }

    /// Compute `a op b` into a new tensor.
    ///
    /// The result is named `result_name`, or `<a>_<word>_<b>` when none is given.
    ///
    /// # Errors
    ///
    /// - `ShapeMismatch` if the shapes differ (checked first)
    /// - `TypeMismatch` if the dtypes differ
    /// - Any store error from allocating the result or reading operands
    #[tracing::instrument(level = "debug", skip(self, a, b), fields(lhs = a.name(), rhs = b.name()))]
    pub fn apply(
        &self,
        op: BinaryOp,
        a: &TensorHandle,
        b: &TensorHandle,
        result_name: Option<&str>,
    ) -> Result<Tensor, AlgebraError> {
        let shape = check_operands(a, b)?;
        let dtype = a.dtype();

        let name = match result_name {
            Some(name) => name.to_string(),
            None => format!("{}_{}_{}", a.name(), op.word(), b.name()),
        };
        let result = Tensor::create(&name, shape.clone(), dtype, &self.config)?;
        let out = result.handle();

        self.for_each_tile(&shape, dtype, |start, extents| {
            let lhs = a.get_chunk(start, extents)?;
            let rhs = b.get_chunk(start, extents)?;
            let bytes = dispatch_dtype!(dtype, combine_tile(op, &lhs, &rhs));
            out.store_chunk(start, extents, &bytes)?;
            Ok(())
        })?;

        tracing::debug!(result = %name, %shape, "binary op complete");
        Ok(result)
    }

    /// Apply an activation to every element of `a`, named `<a>_<op>` by default.
    ///
    /// # Errors
    ///
    /// `UnsupportedDType` for `sigmoid` or `tanh` on an integer tensor.
    #[tracing::instrument(level = "debug", skip(self, a), fields(tensor = a.name()))]
    pub fn unary(
        &self,
        op: UnaryOp,
        a: &TensorHandle,
        result_name: Option<&str>,
    ) -> Result<Tensor, AlgebraError> {
        let shape = a.shape()?;
        let dtype = a.dtype();
        if !op.supports(dtype) {
            return Err(AlgebraError::UnsupportedDType {
                op: op.as_str(),
                dtype,
            });
        }

        let name = match result_name {
            Some(name) => name.to_string(),
            None => format!("{}_{op}", a.name()),
        };
        let result = Tensor::create(&name, shape.clone(), dtype, &self.config)?;
        let out = result.handle();

        self.for_each_tile(&shape, dtype, |start, extents| {
            let bytes = a.get_chunk(start, extents)?;
            let bytes = dispatch_dtype!(dtype, map_tile(op, &bytes));
            out.store_chunk(start, extents, &bytes)?;
            Ok(())
        })?;

        Ok(result)
    }

    /// Permute the axes of `a` into a new tensor.
    ///
    /// Output axis `i` is input axis `axes[i]`. Without `axes` the axis
    /// order is reversed, which for a matrix is the usual transpose. The
    /// result is named `<a>_transpose` by default.
    ///
    /// # Errors
    ///
    /// `InvalidPermutation` unless `axes` lists every axis of `a` exactly once.
    #[tracing::instrument(level = "debug", skip(self, a), fields(tensor = a.name()))]
    pub fn transpose(
        &self,
        a: &TensorHandle,
        axes: Option<&[usize]>,
        result_name: Option<&str>,
    ) -> Result<Tensor, AlgebraError> {
        let shape = a.shape()?;
        let dtype = a.dtype();
        let rank = shape.rank();

        let perm: Dims = match axes {
            Some(axes) => {
                let mut seen = vec![false; rank];
                let valid = axes.len() == rank
                    && axes
                        .iter()
                        .all(|&axis| axis < rank && !std::mem::replace(&mut seen[axis], true));
                if !valid {
                    return Err(AlgebraError::InvalidPermutation {
                        axes: axes.to_vec(),
                        rank,
                    });
                }
                Dims::from_slice(axes)
            }
            None => (0..rank).rev().collect(),
        };

        let out_dims: Dims = perm.iter().map(|&p| shape[p]).collect();
        let out_shape = Shape::from_dims(&out_dims).map_err(StoreError::from)?;
        let name = match result_name {
            Some(name) => name.to_string(),
            None => format!("{}_transpose", a.name()),
        };
        let result = Tensor::create(&name, out_shape.clone(), dtype, &self.config)?;
        let out = result.handle();

        self.for_each_tile(&out_shape, dtype, |start, extents| {
            let mut src_start = Dims::from_elem(0, rank);
            let mut src_extents = Dims::from_elem(0, rank);
            for (i, &p) in perm.iter().enumerate() {
                src_start[p] = start[i];
                src_extents[p] = extents[i];
            }
            let bytes = a.get_chunk(&src_start, &src_extents)?;
            let permuted = permute_tile(&bytes, &src_extents, &perm, dtype.width());
            out.store_chunk(start, extents, &permuted)?;
            Ok(())
        })?;

        Ok(result)
    }

    /// Cosine similarity of two rank-1 tensors.
    ///
    /// Returns 0 when either vector has zero norm.
    ///
    /// # Errors
    ///
    /// - `ShapeMismatch` if the shapes differ
    /// - `NotAVector` if the operands are not rank 1
    /// - `TypeMismatch` if the dtypes differ
    #[tracing::instrument(level = "debug", skip(self, a, b), fields(lhs = a.name(), rhs = b.name()))]
    pub fn cosine_similarity(&self, a: &TensorHandle, b: &TensorHandle) -> Result<f64, AlgebraError> {
        let (shape_a, shape_b) = (a.shape()?, b.shape()?);
        if !broadcastable(shape_a.dims(), shape_b.dims()) {
            return Err(AlgebraError::ShapeMismatch {
                lhs: shape_a.to_vec(),
                rhs: shape_b.to_vec(),
            });
        }
        if shape_a.rank() != 1 {
            return Err(AlgebraError::NotAVector {
                shape: shape_a.to_vec(),
            });
        }
        check_dtypes(a, b)?;

        let dtype = a.dtype();
        let mut acc = CosineAcc::default();
        self.for_each_tile(&shape_a, dtype, |start, extents| {
            let lhs = a.get_chunk(start, extents)?;
            let rhs = b.get_chunk(start, extents)?;
            dispatch_dtype!(dtype, cosine_tile(&lhs, &rhs, &mut acc));
            Ok(())
        })?;

        Ok(acc.similarity())
    }

    /// Reduce every element of `a` to one `f64`.
    ///
    /// `Min` and `Max` skip NaN elements.
    ///
    /// # Errors
    ///
    /// `EmptyReduction` for `Mean`, `Min` or `Max` of a tensor with no
    /// elements. `Sum` of an empty tensor is 0.
    #[tracing::instrument(level = "debug", skip(self, a), fields(tensor = a.name()))]
    pub fn reduce(&self, a: &TensorHandle, op: ReduceOp) -> Result<f64, AlgebraError> {
        let shape = a.shape()?;
        let dtype = a.dtype();

        let mut acc = ReduceAcc::default();
        self.for_each_tile(&shape, dtype, |start, extents| {
            let bytes = a.get_chunk(start, extents)?;
            dispatch_dtype!(dtype, reduce_tile(&bytes, &mut acc));
            Ok(())
        })?;

        if acc.count == 0 && op != ReduceOp::Sum {
            return Err(AlgebraError::EmptyReduction { op: op.as_str() });
        }

        Ok(acc.finish(op))
    }

    /// Reduce `a` along `axis` into a `float64` tensor of rank one less.
    ///
    /// The result is named `<a>_<op>_<axis>` by default. Output tiles are
    /// filled one at a time, each reading the reduced axis in slabs that keep
    /// every read within the tile budget.
    ///
    /// # Errors
    ///
    /// - `AxisOutOfRange` if `axis >= rank`
    /// - `EmptyReduction` for `Mean`, `Min` or `Max` along an axis of length 0
    #[tracing::instrument(level = "debug", skip(self, a), fields(tensor = a.name()))]
    pub fn reduce_axis(
        &self,
        a: &TensorHandle,
        op: ReduceOp,
        axis: usize,
        result_name: Option<&str>,
    ) -> Result<Tensor, AlgebraError> {
        let shape = a.shape()?;
        let dtype = a.dtype();
        if axis >= shape.rank() {
            return Err(AlgebraError::AxisOutOfRange {
                axis,
                rank: shape.rank(),
            });
        }

        let len = shape[axis];
        let mut out_dims = Dims::from_slice(&shape);
        out_dims.remove(axis);
        if len == 0 && op != ReduceOp::Sum && element_count(&out_dims) > 0 {
            return Err(AlgebraError::EmptyReduction { op: op.as_str() });
        }

        let out_shape = Shape::from_dims(&out_dims).map_err(StoreError::from)?;
        let name = match result_name {
            Some(name) => name.to_string(),
            None => format!("{}_{op}_{axis}", a.name()),
        };
        let result = Tensor::create(&name, out_shape, DType::Float64, &self.config)?;
        let out = result.handle();

        let budget = self.tile_elements(dtype);
        let spec = ChunkSpec::for_budget(&out_dims, budget);
        for idx in spec.iter() {
            let (start, extents) = spec.chunk_rect(&idx);
            let cells = element_count(&extents);
            let outer: usize = extents[..axis].iter().product();
            let inner: usize = extents[axis..].iter().product();
            let slab = (budget / cells).max(1);

            let mut accs = vec![ReduceAcc::default(); cells];
            let mut offset = 0;
            while offset < len {
                let take = slab.min(len - offset);
                let mut src_start = start.clone();
                let mut src_extents = extents.clone();
                src_start.insert(axis, offset);
                src_extents.insert(axis, take);

                let bytes = a.get_chunk(&src_start, &src_extents)?;
                dispatch_dtype!(dtype, reduce_slab(&bytes, [outer, take, inner], &mut accs));
                offset += take;
            }

            let values: Vec<f64> = accs.iter().map(|acc| acc.finish(op)).collect();
            out.store_elements(&start, &extents, &values)?;
        }

        tracing::debug!(result = %name, axis, "axis reduction complete");
        Ok(result)
    }

    fn for_each_tile<F>(&self, shape: &Shape, dtype: DType, mut f: F) -> Result<(), AlgebraError>
    where
        F: FnMut(&[usize], &[usize]) -> Result<(), AlgebraError>,
    {
        let spec = ChunkSpec::for_budget(shape.dims(), self.tile_elements(dtype));

        for idx in spec.iter() {
            let (start, extents) = spec.chunk_rect(&idx);
            f(&start, &extents)?;
        }
        Ok(())
    }

    fn tile_elements(&self, dtype: DType) -> usize {
        (self.config.tile_bytes / dtype.width()).max(1)
    }
}

/// Shapes first, then dtypes.
fn check_operands(a: &TensorHandle, b: &TensorHandle) -> Result<Shape, AlgebraError> {
    let (shape_a, shape_b) = (a.shape()?, b.shape()?);
    if !broadcastable(shape_a.dims(), shape_b.dims()) {
        return Err(AlgebraError::ShapeMismatch {
            lhs: shape_a.to_vec(),
            rhs: shape_b.to_vec(),
        });
    }
    check_dtypes(a, b)?;
    Ok(shape_a)
}

fn check_dtypes(a: &TensorHandle, b: &TensorHandle) -> Result<(), AlgebraError> {
    if a.dtype() != b.dtype() {
        return Err(AlgebraError::TypeMismatch {
            lhs: a.dtype(),
            rhs: b.dtype(),
        });
    }
    Ok(())
}

fn combine_tile<T: Element>(op: BinaryOp, lhs: &[u8], rhs: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; lhs.len()];
    for ((o, l), r) in out
        .chunks_exact_mut(T::WIDTH)
        .zip(lhs.chunks_exact(T::WIDTH))
        .zip(rhs.chunks_exact(T::WIDTH))
    {
        op.apply(T::read_le(l), T::read_le(r)).write_le(o);
    }
    out
}

fn map_tile<T: Element>(op: UnaryOp, bytes: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; bytes.len()];
    for (o, v) in out.chunks_exact_mut(T::WIDTH).zip(bytes.chunks_exact(T::WIDTH)) {
        op.apply(T::read_le(v)).write_le(o);
    }
    out
}

/// Reorder a row-major tile of extents `src_extents` so that output axis `i`
/// walks source axis `perm[i]`.
fn permute_tile(src: &[u8], src_extents: &[usize], perm: &[usize], width: usize) -> Vec<u8> {
    let src_strides = row_major_strides(src_extents);
    let extents: Dims = perm.iter().map(|&p| src_extents[p]).collect();
    let strides: Dims = perm.iter().map(|&p| src_strides[p]).collect();

    let mut out = vec![0u8; element_count(&extents) * width];
    let mut index = Dims::from_elem(0, extents.len());
    let mut src_offset = 0;
    for dst in out.chunks_exact_mut(width) {
        let at = src_offset * width;
        dst.copy_from_slice(&src[at..at + width]);

        for axis in (0..index.len()).rev() {
            index[axis] += 1;
            src_offset += strides[axis];
            if index[axis] < extents[axis] {
                break;
            }
            src_offset -= strides[axis] * extents[axis];
            index[axis] = 0;
        }
    }
    out
}

fn cosine_tile<T: Element>(lhs: &[u8], rhs: &[u8], acc: &mut CosineAcc) {
    for (l, r) in lhs.chunks_exact(T::WIDTH).zip(rhs.chunks_exact(T::WIDTH)) {
        acc.push(T::read_le(l).as_f64(), T::read_le(r).as_f64());
    }
}

fn reduce_tile<T: Element>(bytes: &[u8], acc: &mut ReduceAcc) {
    for chunk in bytes.chunks_exact(T::WIDTH) {
        acc.push(T::read_le(chunk).as_f64());
    }
}

/// Fold a `[outer, len, inner]` slab into `outer * inner` accumulators.
fn reduce_slab<T: Element>(bytes: &[u8], [outer, len, inner]: [usize; 3], accs: &mut [ReduceAcc]) {
    let mut values = bytes.chunks_exact(T::WIDTH).map(T::read_le);
    for o in 0..outer {
        for _ in 0..len {
            for (acc, v) in accs[o * inner..(o + 1) * inner].iter_mut().zip(values.by_ref()) {
                acc.push(v.as_f64());
            }
        }
    }
}
