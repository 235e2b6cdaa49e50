//! Compare candidate results against reference results.

use crate::details::TensorDetails;
use crate::tensor::{Tensor, TensorType};
use thiserror::Error;

/// The element type both sides are converted to before subtracting.
const COMPARISON_TYPE: TensorType = TensorType::Float32;

/// What the comparator observed for one output slot.
#[derive(Clone, Debug, PartialEq)]
pub struct SlotReport {
    pub index: usize,
    pub name: String,
    /// Largest absolute elementwise difference between the two tensors.
    pub max_error: f32,
}

#[derive(Debug, Error, PartialEq)]
pub enum CompareError {
    #[error("Number of results do not match: {candidate} != {reference}")]
    LengthMismatch { candidate: usize, reference: usize },
    #[error("shape doesnot match: output {index} is {candidate:?} but reference is {reference:?}")]
    ShapeMismatch {
        index: usize,
        candidate: Vec<u32>,
        reference: Vec<u32>,
    },
    #[error("no result for output slot {index}")]
    MissingSlot { index: usize },
}

/// Compare `candidate` against `reference`, slot by slot over `details`.
///
/// Both result sets must have the same length and each compared slot the same
/// shape. The maximum absolute error of every slot is logged and returned;
/// its magnitude is never asserted on.
pub fn compare_results(
    candidate: &[Tensor],
    reference: &[Tensor],
    details: &[TensorDetails],
) -> Result<Vec<SlotReport>, CompareError> {
    tracing::info!("Compare candidate results VS reference results");
    if candidate.len() != reference.len() {
        return Err(CompareError::LengthMismatch {
            candidate: candidate.len(),
            reference: reference.len(),
        });
    }

    let mut reports = Vec::with_capacity(details.len());
    for (index, detail) in details.iter().enumerate() {
        let (Some(c), Some(r)) = (candidate.get(index), reference.get(index)) else {
            return Err(CompareError::MissingSlot { index });
        };
        let c = c.cast(COMPARISON_TYPE);
        let r = r.cast(COMPARISON_TYPE);
        if c.dimensions != r.dimensions {
            return Err(CompareError::ShapeMismatch {
                index,
                candidate: c.dimensions,
                reference: r.dimensions,
            });
        }
        let max_error = max_abs_error(&c.to_f32_vec(), &r.to_f32_vec());
        tracing::info!("Max error ({index}): {max_error}");
        reports.push(SlotReport {
            index,
            name: detail.name.clone(),
            max_error,
        });
    }
    Ok(reports)
}

/// `max(|a - b|)` over paired elements; `0.0` when there are none.
///
/// A NaN difference propagates so that diverging outputs are not hidden.
pub fn max_abs_error(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).fold(0.0f32, |max, (x, y)| {
        let diff = (x - y).abs();
        if diff.is_nan() || max.is_nan() {
            f32::NAN
        } else {
            max.max(diff)
        }
    })
}
