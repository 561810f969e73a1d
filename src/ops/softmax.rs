//! Softmax along the last axis of an arbitrary-rank tensor.

use crate::error::LayerResult;
use crate::scalar::Scalar;
use crate::tensors::Tensor;

/// Softmax along the last axis. Each row is shifted by its maximum before
/// exponentiation.
#[must_use]
pub fn softmax<T: Scalar>(input: &Tensor<T>) -> Tensor<T> {
    let last_dim = input.shape.last().copied().unwrap_or(1).max(1);
    let mut out_data = vec![T::zero(); input.data.len()];

    for (slice, out) in input
        .data
        .chunks(last_dim)
        .zip(out_data.chunks_mut(last_dim))
    {
        let max_val = slice.iter().copied().fold(T::neg_infinity(), T::max);
        let exp_sum = slice
            .iter()
            .fold(T::zero(), |acc, &x| acc + (x - max_val).exp());

        for (o, &x) in out.iter_mut().zip(slice) {
            *o = (x - max_val).exp() / exp_sum;
        }
    }

    Tensor::new(input.shape.clone(), out_data)
}

/// Backward pass of softmax given its output `y` and `dL/dy`:
/// `dx = y ⊙ (dy − ⟨y, dy⟩)` per row.
///
/// # Errors
/// [`LayerError::ShapeMismatch`](crate::error::LayerError::ShapeMismatch)
/// if `grad_output` is not shaped like `output`.
pub fn softmax_backward<T: Scalar>(
    output: &Tensor<T>,
    grad_output: &Tensor<T>,
) -> LayerResult<Tensor<T>> {
    grad_output.ensure_shape(&output.shape)?;
    let last_dim = output.shape.last().copied().unwrap_or(1).max(1);
    let mut grad = vec![T::zero(); output.data.len()];

    for ((y, dy), g) in output
        .data
        .chunks(last_dim)
        .zip(grad_output.data.chunks(last_dim))
        .zip(grad.chunks_mut(last_dim))
    {
        let dot = y
            .iter()
            .zip(dy)
            .fold(T::zero(), |acc, (&yi, &dyi)| acc + yi * dyi);

        for j in 0..y.len() {
            g[j] = y[j] * (dy[j] - dot);
        }
    }

    Ok(Tensor::new(output.shape.clone(), grad))
}
