//! Metadata describing a model's input and output slots.

use crate::tensor::{Tensor, TensorType, element_count, to_dimensions};
use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

/// Describes one input or output slot of a model: where it sits, what it is
/// called, its declared shape and its element type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TensorDetails {
    pub name: String,
    pub index: u32,
    /// Declared dimensions; `-1` marks a dimension left to the caller.
    pub shape: Vec<i64>,
    pub dtype: TensorType,
}

impl TensorDetails {
    pub fn new(name: impl Into<String>, index: u32, shape: Vec<i64>, dtype: TensorType) -> Self {
        Self {
            name: name.into(),
            index,
            shape,
            dtype,
        }
    }

    /// Check that `tensor` fits this slot.
    ///
    /// Dynamic dimensions accept any extent; with `dynamic` set every
    /// dimension does, but the rank and element type must still agree.
    pub fn matches(&self, tensor: &Tensor, dynamic: bool) -> Result<(), MismatchError> {
        if self.shape.len() != tensor.dimensions.len() {
            return Err(MismatchError::Rank {
                name: self.name.clone(),
                expected: self.shape.clone(),
                actual: tensor.dimensions.clone(),
            });
        }
        for (&shape_dim, &tensor_dim) in self.shape.iter().zip(tensor.dimensions.iter()) {
            if !dynamic && !is_dynamic_dimension(shape_dim) && shape_dim != i64::from(tensor_dim) {
                return Err(MismatchError::Dimensions {
                    name: self.name.clone(),
                    expected: self.shape.clone(),
                    actual: tensor.dimensions.clone(),
                });
            }
        }
        if self.dtype != tensor.ty {
            return Err(MismatchError::Type {
                name: self.name.clone(),
                expected: self.dtype,
                actual: tensor.ty,
            });
        }
        Ok(())
    }

    /// Resolve the declared shape against a buffer of `byte_len` bytes.
    ///
    /// At most one dynamic dimension can be inferred. Declared extents that
    /// do not fit a `u32`, or whose product overflows, cannot be resolved.
    pub fn resolve_dimensions(&self, byte_len: usize) -> Result<Vec<u32>, MismatchError> {
        let unresolvable = || MismatchError::Unresolvable {
            name: self.name.clone(),
            shape: self.shape.clone(),
            byte_len,
        };
        let size = self.dtype.byte_size();
        if byte_len % size != 0 {
            return Err(unresolvable());
        }
        let static_shape: Vec<i64> = self
            .shape
            .iter()
            .copied()
            .filter(|d| !is_dynamic_dimension(*d))
            .collect();
        let known = to_dimensions(&static_shape).map_err(|_| unresolvable())?;
        let known_count = element_count(&known).ok_or_else(unresolvable)?;
        match self.shape.len() - known.len() {
            0 => Ok(known),
            1 => {
                let elements = byte_len / size;
                if known_count == 0 || elements % known_count != 0 {
                    return Err(unresolvable());
                }
                let inferred =
                    u32::try_from(elements / known_count).map_err(|_| unresolvable())?;
                let mut known = known.into_iter();
                self.shape
                    .iter()
                    .map(|d| {
                        if is_dynamic_dimension(*d) {
                            Some(inferred)
                        } else {
                            known.next()
                        }
                    })
                    .collect::<Option<Vec<u32>>>()
                    .ok_or_else(unresolvable)
            }
            _ => Err(unresolvable()),
        }
    }
}

/// Returns whether the dimension is dynamic.
///
/// Importers mark dimensions that are left to the caller (typically the
/// batch dimension) as `-1`.
pub fn is_dynamic_dimension(d: i64) -> bool {
    d < 0
}

/// A tensor did not fit the slot it was given to.
#[derive(Debug, Error, PartialEq)]
pub enum MismatchError {
    #[error("tensor `{name}` cardinality does not match model: {expected:?} != {actual:?}")]
    Rank {
        name: String,
        expected: Vec<i64>,
        actual: Vec<u32>,
    },
    #[error("tensor `{name}` dimensions do not match model: {expected:?} != {actual:?}")]
    Dimensions {
        name: String,
        expected: Vec<i64>,
        actual: Vec<u32>,
    },
    #[error("tensor `{name}` type does not match model: {expected} != {actual}")]
    Type {
        name: String,
        expected: TensorType,
        actual: TensorType,
    },
    #[error("cannot resolve shape {shape:?} of `{name}` from {byte_len} bytes")]
    Unresolvable {
        name: String,
        shape: Vec<i64>,
        byte_len: usize,
    },
}
