//! Flat parameter vectors.
//!
//! `parameters()` concatenates a layer's trainable tensors in their declared
//! order; `set_parameters` splits a vector back along the same boundaries.
//! Incoming vectors are wrapped in a [`briny`] `TrustedData` before any tensor
//! is touched, so a rejected vector leaves the layer unchanged.

use crate::error::{LayerError, LayerResult};
use crate::scalar::Scalar;
use crate::tensors::Tensor;
use briny::prelude::*;

/// Untrusted parameter vector awaiting validation.
struct ParameterVector<T> {
    values: Vec<T>,
    expected: usize,
}

impl<T: Scalar> Validate for ParameterVector<T> {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.values.len() != self.expected {
            return Err(ValidationError);
        }
        if !self.values.iter().all(|v| v.is_finite()) {
            return Err(ValidationError);
        }
        Ok(())
    }
}

/// Concatenates tensors into one vector.
pub(crate) fn flatten<T: Scalar>(tensors: &[&Tensor<T>]) -> Vec<T> {
    let mut out = Vec::with_capacity(tensors.iter().map(|t| t.len()).sum());
    for t in tensors {
        out.extend_from_slice(&t.data);
    }
    out
}

/// Overwrites `tensors` in order with consecutive runs of `values`.
///
/// # Errors
/// [`LayerError::Configuration`] if the length differs from the total element
/// count or any value is not finite.
pub(crate) fn assign<T: Scalar>(tensors: &mut [&mut Tensor<T>], values: &[T]) -> LayerResult<()> {
    let expected = tensors.iter().map(|t| t.len()).sum();
    let trusted = TrustedData::new(ParameterVector {
        values: values.to_vec(),
        expected,
    })
    .map_err(|_| {
        LayerError::config(format!(
            "expected {expected} finite parameters, got {}",
            values.len()
        ))
    })?;
    let values = trusted.into_inner().values;

    let mut offset = 0;
    for t in tensors.iter_mut() {
        let n = t.len();
        t.data.copy_from_slice(&values[offset..offset + n]);
        offset += n;
    }
    Ok(())
}

/// `set_parameters` for layers without trainable state.
///
/// # Errors
/// [`LayerError::Configuration`] unless `values` is empty.
pub(crate) fn assign_none<T: Scalar>(values: &[T]) -> LayerResult<()> {
    assign::<T>(&mut [], values)
}
