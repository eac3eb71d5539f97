//! Element types and their little-endian byte codec.
//!
//! Tensors cross the store boundary as opaque byte buffers. [`DType`] names the
//! element type of those bytes, and [`Element`] ties each supported Rust scalar
//! to its dtype together with the arithmetic the algebra kernels need.
//!
//! Integer arithmetic wraps at the native width; floating point follows IEEE
//! semantics, so NaN and infinities propagate.
//!
//! # Examples
//!
//! ```
//! use telum_core::dtype::{decode_elements, encode_elements, DType, Element};
//!
//! assert_eq!(DType::Float64.width(), 8);
//! assert_eq!("int32".parse::<DType>().unwrap(), DType::Int32);
//!
//! let bytes = encode_elements(&[1i32, -2, 3]);
//! assert_eq!(bytes.len(), 3 * i32::WIDTH);
//! assert_eq!(decode_elements::<i32>(&bytes), vec![1, -2, 3]);
//! ```

use scirs2_core::numeric::NumCast;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Element type of a tensor, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum DType {
    Int32,
    Int64,
    Float32,
    Float64,
}

impl DType {
    /// All supported dtypes, in wire-code order.
    pub const ALL: [DType; 4] = [DType::Int32, DType::Int64, DType::Float32, DType::Float64];

    /// Width of one element in bytes.
    pub fn width(self) -> usize {
        match self {
            DType::Int32 | DType::Float32 => 4,
            DType::Int64 | DType::Float64 => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DType::Int32 => "int32",
            DType::Int64 => "int64",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
        }
    }

    /// Wire code used by the client binding.
    pub fn code(self) -> u8 {
        match self {
            DType::Int32 => 0,
            DType::Int64 => 1,
            DType::Float32 => 2,
            DType::Float64 => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        DType::ALL.get(code as usize).copied()
    }

    pub fn is_float(self) -> bool {
        matches!(self, DType::Float32 | DType::Float64)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when a dtype name is not recognised.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown dtype: {0}")]
pub struct ParseDTypeError(pub String);

impl FromStr for DType {
    type Err = ParseDTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "int32" | "i32" => Ok(DType::Int32),
            "int64" | "i64" => Ok(DType::Int64),
            "float32" | "f32" => Ok(DType::Float32),
            "float64" | "f64" => Ok(DType::Float64),
            _ => Err(ParseDTypeError(s.to_string())),
        }
    }
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for i32 {}
    impl Sealed for i64 {}
    impl Sealed for f32 {}
    impl Sealed for f64 {}
}

/// Rust scalar backing one [`DType`].
///
/// Sealed: only `i32`, `i64`, `f32` and `f64` implement it.
pub trait Element:
    sealed::Sealed + NumCast + Copy + PartialOrd + fmt::Debug + Send + Sync + 'static
{
    const DTYPE: DType;
    const WIDTH: usize;

    /// Decode one element. `bytes.len()` must equal [`Self::WIDTH`].
    fn read_le(bytes: &[u8]) -> Self;

    /// Encode one element into `out`, which must be [`Self::WIDTH`] long.
    fn write_le(self, out: &mut [u8]);

    fn elem_add(self, rhs: Self) -> Self;
    fn elem_sub(self, rhs: Self) -> Self;
    fn elem_mul(self, rhs: Self) -> Self;

    /// Elementwise division. Integer division by zero yields zero.
    fn elem_div(self, rhs: Self) -> Self;

    /// Additive identity.
    fn zero() -> Self;

    /// Narrowing from `f64`, `None` when the value has no integer representation.
    fn from_f64(value: f64) -> Option<Self> {
        <Self as NumCast>::from(value)
    }

    /// Lossy widening used by reductions and similarity.
    fn as_f64(self) -> f64 {
        <f64 as NumCast>::from(self).unwrap_or(f64::NAN)
    }
}

macro_rules! impl_int_element {
    ($t:ty, $dtype:expr) => {
        impl Element for $t {
            const DTYPE: DType = $dtype;
            const WIDTH: usize = std::mem::size_of::<$t>();

            fn read_le(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(bytes);
                <$t>::from_le_bytes(raw)
            }

            fn write_le(self, out: &mut [u8]) {
                out.copy_from_slice(&self.to_le_bytes());
            }

            fn elem_add(self, rhs: Self) -> Self {
                self.wrapping_add(rhs)
            }

            fn elem_sub(self, rhs: Self) -> Self {
                self.wrapping_sub(rhs)
            }

            fn elem_mul(self, rhs: Self) -> Self {
                self.wrapping_mul(rhs)
            }

            fn elem_div(self, rhs: Self) -> Self {
                if rhs == 0 {
                    0
                } else {
                    self.wrapping_div(rhs)
                }
            }

            fn zero() -> Self {
                0
            }
        }
    };
}

macro_rules! impl_float_element {
    ($t:ty, $dtype:expr) => {
        impl Element for $t {
            const DTYPE: DType = $dtype;
            const WIDTH: usize = std::mem::size_of::<$t>();

            fn read_le(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(bytes);
                <$t>::from_le_bytes(raw)
            }

            fn write_le(self, out: &mut [u8]) {
                out.copy_from_slice(&self.to_le_bytes());
            }

            fn elem_add(self, rhs: Self) -> Self {
                self + rhs
            }

            fn elem_sub(self, rhs: Self) -> Self {
                self - rhs
            }

            fn elem_mul(self, rhs: Self) -> Self {
                self * rhs
            }

            fn elem_div(self, rhs: Self) -> Self {
                self / rhs
            }

            fn zero() -> Self {
                0.0
            }

            fn from_f64(value: f64) -> Option<Self> {
                Some(value as $t)
            }
        }
    };
}

impl_int_element!(i32, DType::Int32);
impl_int_element!(i64, DType::Int64);
impl_float_element!(f32, DType::Float32);
impl_float_element!(f64, DType::Float64);

/// Decode a little-endian buffer into elements.
///
/// Trailing bytes that do not form a whole element are ignored; callers
/// validate buffer lengths before decoding.
pub fn decode_elements<T: Element>(bytes: &[u8]) -> Vec<T> {
    bytes.chunks_exact(T::WIDTH).map(T::read_le).collect()
}

/// Encode elements into a freshly allocated little-endian buffer.
pub fn encode_elements<T: Element>(values: &[T]) -> Vec<u8> {
    let mut out = vec![0u8; values.len() * T::WIDTH];
    for (slot, value) in out.chunks_exact_mut(T::WIDTH).zip(values) {
        value.write_le(slot);
    }
    out
}

/// Monomorphise a generic function over the element type named by a [`DType`].
///
/// ```
/// use telum_core::dispatch_dtype;
/// use telum_core::dtype::{DType, Element};
///
/// fn width_of<T: Element>() -> usize {
///     T::WIDTH
/// }
///
/// assert_eq!(dispatch_dtype!(DType::Int64, width_of()), 8);
/// ```
#[macro_export]
macro_rules! dispatch_dtype {
    ($dtype:expr, $func:ident ( $($arg:expr),* $(,)? )) => {
        match $dtype {
            $crate::dtype::DType::Int32 => $func::<i32>($($arg),*),
            $crate::dtype::DType::Int64 => $func::<i64>($($arg),*),
            $crate::dtype::DType::Float32 => $func::<f32>($($arg),*),
            $crate::dtype::DType::Float64 => $func::<f64>($($arg),*),
        }
    };
}
