//! Tensors exchanged between providers, backends and the comparator.
//!
//! A [`Tensor`] is kept in the same shape it crosses process and file
//! boundaries in: a list of dimensions, an element type, and the little-endian
//! bytes of its elements. Numeric views ([`Tensor::to_f32_vec`]) and element
//! type conversions ([`Tensor::cast`]) are computed on demand.

use half::{bf16, f16};
use serde_derive::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The element type of a [`Tensor`].
///
/// Names follow numpy's dtype spelling since that is how model metadata
/// describes them (e.g. `float32`, `uint8`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorType {
    Float16,
    Bfloat16,
    Float32,
    Float64,
    Uint8,
    Int8,
    Int32,
    Int64,
}

impl TensorType {
    /// Size in bytes of a single element.
    pub fn byte_size(&self) -> usize {
        match self {
            TensorType::Uint8 | TensorType::Int8 => 1,
            TensorType::Float16 | TensorType::Bfloat16 => 2,
            TensorType::Float32 | TensorType::Int32 => 4,
            TensorType::Float64 | TensorType::Int64 => 8,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            TensorType::Float16 => "float16",
            TensorType::Bfloat16 => "bfloat16",
            TensorType::Float32 => "float32",
            TensorType::Float64 => "float64",
            TensorType::Uint8 => "uint8",
            TensorType::Int8 => "int8",
            TensorType::Int32 => "int32",
            TensorType::Int64 => "int64",
        }
    }
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TensorType {
    type Err = TensorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ty = match s {
            "float16" | "f16" => TensorType::Float16,
            "bfloat16" | "bf16" => TensorType::Bfloat16,
            "float32" | "f32" | "single" => TensorType::Float32,
            "float64" | "f64" | "double" => TensorType::Float64,
            "uint8" | "u8" => TensorType::Uint8,
            "int8" | "i8" => TensorType::Int8,
            "int32" | "i32" => TensorType::Int32,
            "int64" | "i64" => TensorType::Int64,
            _ => return Err(TensorError::UnknownType(s.to_string())),
        };
        Ok(ty)
    }
}

/// Possible errors while building or converting a [`Tensor`].
#[derive(Debug, Error)]
pub enum TensorError {
    #[error("tensor data has {actual} bytes but dimensions {dimensions:?} of type {ty} need {expected}")]
    InvalidDataLength {
        dimensions: Vec<u32>,
        ty: TensorType,
        expected: usize,
        actual: usize,
    },
    #[error("tensor dimensions {dimensions:?} of type {ty} do not fit in memory")]
    TooLarge {
        dimensions: Vec<u32>,
        ty: TensorType,
    },
    #[error("unknown tensor element type: {0}")]
    UnknownType(String),
    #[error("unable to convert dimension to u32: {0}")]
    InvalidDimension(i64),
}

/// An n-dimensional array of numbers.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    pub dimensions: Vec<u32>,
    pub ty: TensorType,
    pub data: Vec<u8>,
}

impl Tensor {
    /// Build a tensor from raw little-endian element bytes.
    pub fn new(dimensions: Vec<u32>, ty: TensorType, data: Vec<u8>) -> Result<Self, TensorError> {
        let Some(expected) =
            element_count(&dimensions).and_then(|n| n.checked_mul(ty.byte_size()))
        else {
            return Err(TensorError::TooLarge { dimensions, ty });
        };
        if data.len() != expected {
            return Err(TensorError::InvalidDataLength {
                dimensions,
                ty,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            dimensions,
            ty,
            data,
        })
    }

    /// Build a `float32` tensor from `values`, which must fill `dimensions`.
    pub fn from_f32(dimensions: Vec<u32>, values: &[f32]) -> Result<Self, TensorError> {
        Self::new(dimensions, TensorType::Float32, f32_vec_to_bytes(values))
    }

    /// Build a `uint8` tensor from `values`, which must fill `dimensions`.
    pub fn from_u8(dimensions: Vec<u32>, values: Vec<u8>) -> Result<Self, TensorError> {
        Self::new(dimensions, TensorType::Uint8, values)
    }

    /// Number of whole elements held in `data`.
    pub fn len(&self) -> usize {
        self.data.len() / self.ty.byte_size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read every element as an `f64`.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        let size = self.ty.byte_size();
        self.data
            .chunks_exact(size)
            .map(|c| read_element(self.ty, c).as_f64())
            .collect()
    }

    /// Read every element as an `f32`.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        match self.ty {
            TensorType::Float32 => bytes_to_f32_vec(&self.data),
            _ => self.to_f64_vec().into_iter().map(|v| v as f32).collect(),
        }
    }

    /// Convert the elements to `ty`, keeping the dimensions.
    ///
    /// Floating point values converted to integers are truncated toward zero
    /// and saturate at the bounds of the target type; NaN becomes zero.
    pub fn cast(&self, ty: TensorType) -> Tensor {
        if ty == self.ty {
            return self.clone();
        }
        let size = self.ty.byte_size();
        let mut data = Vec::with_capacity(self.len() * ty.byte_size());
        for chunk in self.data.chunks_exact(size) {
            write_element(ty, read_element(self.ty, chunk), &mut data);
        }
        Tensor {
            dimensions: self.dimensions.clone(),
            ty,
            data,
        }
    }
}

/// Number of elements described by `dimensions`, or `None` if it overflows
/// `usize`; a scalar has one.
pub fn element_count(dimensions: &[u32]) -> Option<usize> {
    dimensions
        .iter()
        .try_fold(1usize, |n, d| n.checked_mul(*d as usize))
}

/// Convert signed (possibly dynamic) model dimensions into tensor dimensions.
pub fn to_dimensions(shape: &[i64]) -> Result<Vec<u32>, TensorError> {
    shape
        .iter()
        .map(|d| u32::try_from(*d).map_err(|_| TensorError::InvalidDimension(*d)))
        .collect()
}

/// A single element, widened to the lossless carrier for its class.
#[derive(Clone, Copy)]
enum Scalar {
    Float(f64),
    Int(i64),
}

impl Scalar {
    fn as_f64(self) -> f64 {
        match self {
            Scalar::Float(f) => f,
            Scalar::Int(i) => i as f64,
        }
    }

    fn as_i64(self) -> i64 {
        match self {
            // `as` truncates toward zero, saturates, and maps NaN to zero.
            Scalar::Float(f) => f as i64,
            Scalar::Int(i) => i,
        }
    }
}

fn read_element(ty: TensorType, c: &[u8]) -> Scalar {
    match ty {
        TensorType::Float16 => Scalar::Float(f16::from_le_bytes([c[0], c[1]]).to_f64()),
        TensorType::Bfloat16 => Scalar::Float(bf16::from_le_bytes([c[0], c[1]]).to_f64()),
        TensorType::Float32 => Scalar::Float(f32::from_le_bytes([c[0], c[1], c[2], c[3]]).into()),
        TensorType::Float64 => Scalar::Float(f64::from_le_bytes(c.try_into().unwrap())),
        TensorType::Uint8 => Scalar::Int(c[0].into()),
        TensorType::Int8 => Scalar::Int((c[0] as i8).into()),
        TensorType::Int32 => Scalar::Int(i32::from_le_bytes([c[0], c[1], c[2], c[3]]).into()),
        TensorType::Int64 => Scalar::Int(i64::from_le_bytes(c.try_into().unwrap())),
    }
}

fn write_element(ty: TensorType, value: Scalar, out: &mut Vec<u8>) {
    match ty {
        TensorType::Float16 => out.extend_from_slice(&f16::from_f64(value.as_f64()).to_le_bytes()),
        TensorType::Bfloat16 => {
            out.extend_from_slice(&bf16::from_f64(value.as_f64()).to_le_bytes())
        }
        TensorType::Float32 => out.extend_from_slice(&(value.as_f64() as f32).to_le_bytes()),
        TensorType::Float64 => out.extend_from_slice(&value.as_f64().to_le_bytes()),
        TensorType::Uint8 => out.push(value.as_i64().clamp(0, u8::MAX.into()) as u8),
        TensorType::Int8 => {
            out.push(value.as_i64().clamp(i8::MIN.into(), i8::MAX.into()) as i8 as u8)
        }
        TensorType::Int32 => {
            let v = value.as_i64().clamp(i32::MIN.into(), i32::MAX.into()) as i32;
            out.extend_from_slice(&v.to_le_bytes())
        }
        TensorType::Int64 => out.extend_from_slice(&value.as_i64().to_le_bytes()),
    }
}

pub fn f32_vec_to_bytes(data: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(data.len() * 4);
    for f in data {
        bytes.extend_from_slice(&f.to_le_bytes());
    }
    bytes
}

/// Trailing bytes that do not make up a whole `f32` are ignored.
pub fn bytes_to_f32_vec(data: &[u8]) -> Vec<f32> {
    data.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
