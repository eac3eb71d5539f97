//! Shape arithmetic
//!
//! Every dimension and index computation in the store goes through this module:
//! shape validation, element counting, row-major offsets and the rectangle
//! checks used by chunk I/O and slicing. Nothing here performs I/O.
//!
//! Layout is row-major (C order): the last axis varies fastest. For shape
//! `[2, 3, 4]` the strides are `[12, 4, 1]`.
//!
//! # Examples
//!
//! ```
//! use telum_core::shape::{check_chunk_bounds, linear_offset, validate_shape};
//!
//! let shape = validate_shape(&[2, 3, 4])?;
//! assert_eq!(shape.element_count(), 24);
//! assert_eq!(linear_offset(shape.dims(), &[1, 2, 3])?, 23);
//!
//! // A [1, 2, 2] chunk starting at [1, 1, 2] fits exactly
//! check_chunk_bounds(shape.dims(), &[1, 1, 2], &[1, 2, 2])?;
//! assert!(check_chunk_bounds(shape.dims(), &[1, 2, 2], &[1, 2, 2]).is_err());
//! # Ok::<(), telum_core::error::ShapeError>(())
//! ```

use crate::dtype::DType;
use crate::error::ShapeError;
use smallvec::SmallVec;
use std::fmt;
use std::ops::Deref;

/// Inline storage for dimension vectors; tensors up to rank 6 never allocate.
pub type Dims = SmallVec<[usize; 6]>;

/// Validated N-dimensional shape.
///
/// The element count of a `Shape` is guaranteed to fit in `usize`. A rank-0
/// shape is a scalar with exactly one element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "Vec<usize>", into = "Vec<usize>"))]
pub struct Shape(Dims);

impl Shape {
    /// Build a shape from unsigned dimensions, rejecting overflowing counts.
    pub fn from_dims(dims: &[usize]) -> Result<Self, ShapeError> {
        if checked_element_count(dims).is_none() {
            return Err(ShapeError::invalid(
                &signed_dims(dims),
                "element count overflows the addressable size",
            ));
        }
        Ok(Shape(SmallVec::from_slice(dims)))
    }

    /// The rank-0 shape.
    pub fn scalar() -> Self {
        Shape(SmallVec::new())
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn is_scalar(&self) -> bool {
        self.0.is_empty()
    }

    pub fn element_count(&self) -> usize {
        element_count(&self.0)
    }

    /// Total byte size for elements of `dtype`.
    ///
    /// Fails with `InvalidShape` when the byte count would exceed `isize::MAX`,
    /// the largest allocation Rust can address.
    pub fn byte_size(&self, dtype: DType) -> Result<usize, ShapeError> {
        self.element_count()
            .checked_mul(dtype.width())
            .filter(|&bytes| bytes <= isize::MAX as usize)
            .ok_or_else(|| {
                ShapeError::invalid(
                    &signed_dims(&self.0),
                    format!("byte size overflows for {dtype}"),
                )
            })
    }

    pub fn to_vec(&self) -> Vec<usize> {
        self.0.to_vec()
    }
}

impl Deref for Shape {
    type Target = [usize];

    fn deref(&self) -> &[usize] {
        &self.0
    }
}

impl AsRef<[usize]> for Shape {
    fn as_ref(&self) -> &[usize] {
        &self.0
    }
}

impl TryFrom<Vec<usize>> for Shape {
    type Error = ShapeError;

    fn try_from(dims: Vec<usize>) -> Result<Self, Self::Error> {
        Shape::from_dims(&dims)
    }
}

impl From<Shape> for Vec<usize> {
    fn from(shape: Shape) -> Self {
        shape.0.into_vec()
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "]")
    }
}

/// Validate client-supplied (signed) dimensions.
///
/// # Errors
///
/// `InvalidShape` if any dimension is negative or the element count
/// overflows `usize`.
pub fn validate_shape(dims: &[i64]) -> Result<Shape, ShapeError> {
    let mut out = Dims::with_capacity(dims.len());
    for (axis, &d) in dims.iter().enumerate() {
        if d < 0 {
            return Err(ShapeError::invalid(
                dims,
                format!("negative dimension {d} on axis {axis}"),
            ));
        }
        let d = usize::try_from(d)
            .map_err(|_| ShapeError::invalid(dims, format!("dimension {d} on axis {axis} too large")))?;
        out.push(d);
    }
    if checked_element_count(&out).is_none() {
        return Err(ShapeError::invalid(
            dims,
            "element count overflows the addressable size",
        ));
    }
    Ok(Shape(out))
}

/// Product of dimensions; a rank-0 shape has one element.
///
/// Callers pass dimensions already known not to overflow (a validated
/// [`Shape`] or a rectangle accepted by [`check_chunk_bounds`]).
pub fn element_count(dims: &[usize]) -> usize {
    dims.iter().product()
}

pub fn checked_element_count(dims: &[usize]) -> Option<usize> {
    dims.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
}

/// Row-major strides, in elements.
pub fn row_major_strides(dims: &[usize]) -> Dims {
    let mut strides: Dims = SmallVec::from_elem(1, dims.len());
    for i in (0..dims.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * dims[i + 1];
    }
    strides
}

/// Row-major linear offset of a multi-index.
pub fn linear_offset(shape: &[usize], indices: &[usize]) -> Result<usize, ShapeError> {
    if shape.len() != indices.len() {
        return Err(ShapeError::IndexRankMismatch {
            expected: shape.len(),
            got: indices.len(),
        });
    }

    let mut offset = 0;
    let mut stride = 1;
    for axis in (0..shape.len()).rev() {
        if indices[axis] >= shape[axis] {
            return Err(ShapeError::IndexOutOfBounds {
                axis,
                start: indices[axis],
                extent: 1,
                dim: shape[axis],
            });
        }
        offset += indices[axis] * stride;
        stride *= shape[axis];
    }
    Ok(offset)
}

/// Check that the rectangle `start .. start + chunk_shape` lies inside `shape`.
///
/// # Errors
///
/// - `RankMismatch` if `start`, `chunk_shape` and `shape` differ in length
/// - `IndexOutOfBounds` if the rectangle exceeds the shape on any axis
pub fn check_chunk_bounds(
    shape: &[usize],
    start: &[usize],
    chunk_shape: &[usize],
) -> Result<(), ShapeError> {
    check_rank("chunk start", shape.len(), start.len())?;
    check_rank("chunk shape", shape.len(), chunk_shape.len())?;

    for (axis, ((&dim, &s), &extent)) in shape.iter().zip(start).zip(chunk_shape).enumerate() {
        let fits = s.checked_add(extent).is_some_and(|end| end <= dim);
        if !fits {
            return Err(ShapeError::IndexOutOfBounds {
                axis,
                start: s,
                extent,
                dim,
            });
        }
    }
    Ok(())
}

/// Validate a half-open slice range and return the extents of the result.
///
/// # Errors
///
/// - `RankMismatch` if `start`/`end` do not match the rank
/// - `InvertedRange` if `start[i] > end[i]`
/// - `IndexOutOfBounds` if `end[i]` exceeds the dimension
pub fn check_slice_range(
    shape: &[usize],
    start: &[usize],
    end: &[usize],
) -> Result<Shape, ShapeError> {
    check_rank("slice start", shape.len(), start.len())?;
    check_rank("slice end", shape.len(), end.len())?;

    let mut extents = Dims::with_capacity(shape.len());
    for axis in 0..shape.len() {
        if start[axis] > end[axis] {
            return Err(ShapeError::InvertedRange {
                axis,
                start: start[axis],
                end: end[axis],
            });
        }
        if end[axis] > shape[axis] {
            return Err(ShapeError::IndexOutOfBounds {
                axis,
                start: start[axis],
                extent: end[axis] - start[axis],
                dim: shape[axis],
            });
        }
        extents.push(end[axis] - start[axis]);
    }
    Ok(Shape(extents))
}

/// Reshape is legal only between shapes with the same element count.
pub fn check_reshape(from: &Shape, to: &Shape) -> Result<(), ShapeError> {
    if from.element_count() != to.element_count() {
        return Err(ShapeError::ElementCountMismatch {
            from: from.to_vec(),
            from_count: from.element_count(),
            to: to.to_vec(),
            to_count: to.element_count(),
        });
    }
    Ok(())
}

/// Binary operations require identical shapes; there is no implicit broadcasting.
pub fn broadcastable(a: &[usize], b: &[usize]) -> bool {
    a == b
}

fn check_rank(context: &'static str, expected: usize, got: usize) -> Result<(), ShapeError> {
    if expected != got {
        return Err(ShapeError::RankMismatch {
            context,
            expected,
            got,
        });
    }
    Ok(())
}

/// Dimensions for error reports; values above `i64::MAX` saturate.
fn signed_dims(dims: &[usize]) -> Vec<i64> {
    dims.iter()
        .map(|&d| i64::try_from(d).unwrap_or(i64::MAX))
        .collect()
}
