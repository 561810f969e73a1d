//! Parameter update rules.
//!
//! Both steps update the parameter tensor in place and check that the
//! gradient (and velocity) share its shape.

use crate::error::LayerResult;
use crate::scalar::Scalar;
use crate::tensors::Tensor;

/// Momentum coefficient used by the ConvLSTM cell.
pub const MOMENTUM: f64 = 0.9;

/// Performs an in-place Stochastic Gradient Descent (SGD) update.
///
/// Applies: `param = param - learning_rate * gradient`.
///
/// # Errors
/// [`LayerError::ShapeMismatch`](crate::error::LayerError::ShapeMismatch)
/// if the gradient is not shaped like the parameter.
pub fn sgd<T: Scalar>(param: &mut Tensor<T>, grad: &Tensor<T>, lr: T) -> LayerResult<()> {
    grad.ensure_shape(&param.shape)?;
    for (p, &g) in param.data.iter_mut().zip(&grad.data) {
        *p = *p - lr * g;
    }
    Ok(())
}

/// Performs one momentum step:
///
/// - `velocity = beta * velocity + lr * gradient`
/// - `param -= velocity`
///
/// With a constant gradient the velocity converges geometrically to
/// `lr * gradient / (1 - beta)`.
///
/// # Errors
/// [`LayerError::ShapeMismatch`](crate::error::LayerError::ShapeMismatch)
/// if the three tensors do not share a shape.
pub fn momentum<T: Scalar>(
    param: &mut Tensor<T>,
    velocity: &mut Tensor<T>,
    grad: &Tensor<T>,
    lr: T,
    beta: T,
) -> LayerResult<()> {
    grad.ensure_shape(&param.shape)?;
    velocity.ensure_shape(&param.shape)?;
    for ((p, v), &g) in param
        .data
        .iter_mut()
        .zip(velocity.data.iter_mut())
        .zip(&grad.data)
    {
        *v = beta * *v + lr * g;
        *p = *p - *v;
    }
    Ok(())
}
