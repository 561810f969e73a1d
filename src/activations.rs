//! Activation functions.
//!
//! Two flavours share one enum:
//! - elementwise scalar activations (identity, sigmoid, tanh, ReLU, leaky ReLU),
//!   whose derivative is a pointwise multiplier;
//! - the vector activation softmax, applied along the last axis, whose
//!   derivative is a Jacobian-vector product.
//!
//! Layers keep both the pre-activation and the activated output from the
//! forward pass, so [`Activation::backward`] receives both and each variant
//! picks whichever makes its derivative cheapest.

use crate::error::LayerResult;
use crate::ops::softmax::{softmax, softmax_backward};
use crate::scalar::{Scalar, sigmoid};
use crate::tensors::Tensor;
use serde::Deserialize;

/// An enumeration of activation functions.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    /// `f(x) = x`.
    #[default]
    Identity,
    /// `f(x) = 1 / (1 + e^-x)`.
    Sigmoid,
    /// `f(x) = tanh(x)`.
    Tanh,
    /// `f(x) = max(0, x)`.
    Relu,
    /// `f(x) = x` for positive `x`, `alpha * x` otherwise.
    LeakyRelu(f64),
    /// Softmax along the last axis.
    Softmax,
}

impl Activation {
    /// Whether the activation acts on each element independently.
    #[must_use]
    pub const fn is_elementwise(self) -> bool {
        !matches!(self, Self::Softmax)
    }

    /// Applies an elementwise activation to one value.
    ///
    /// Softmax has no scalar form; it is treated as identity here and must be
    /// applied through [`Activation::activate`].
    #[inline]
    pub fn activate_scalar<T: Scalar>(self, x: T) -> T {
        match self {
            Self::Identity | Self::Softmax => x,
            Self::Sigmoid => sigmoid(x),
            Self::Tanh => x.tanh(),
            Self::Relu => x.max(T::zero()),
            Self::LeakyRelu(alpha) => {
                if x > T::zero() {
                    x
                } else {
                    x * T::from_f64(alpha)
                }
            }
        }
    }

    /// Derivative of an elementwise activation, given the pre-activation `x`
    /// and the activated value `y = f(x)`.
    #[inline]
    pub fn derivative_scalar<T: Scalar>(self, x: T, y: T) -> T {
        match self {
            Self::Identity | Self::Softmax => T::one(),
            Self::Sigmoid => y * (T::one() - y),
            Self::Tanh => T::one() - y * y,
            Self::Relu => {
                if x > T::zero() {
                    T::one()
                } else {
                    T::zero()
                }
            }
            Self::LeakyRelu(alpha) => {
                if x > T::zero() {
                    T::one()
                } else {
                    T::from_f64(alpha)
                }
            }
        }
    }

    /// Applies the activation to a whole tensor.
    #[must_use]
    pub fn activate<T: Scalar>(self, input: &Tensor<T>) -> Tensor<T> {
        match self {
            Self::Identity => input.clone(),
            Self::Softmax => softmax(input),
            _ => input.map(|x| self.activate_scalar(x)),
        }
    }

    /// Maps `dL/dy` to `dL/dx`.
    ///
    /// # Errors
    /// [`LayerError::ShapeMismatch`](crate::error::LayerError::ShapeMismatch)
    /// if the three tensors disagree in shape.
    pub fn backward<T: Scalar>(
        self,
        pre: &Tensor<T>,
        post: &Tensor<T>,
        grad_output: &Tensor<T>,
    ) -> LayerResult<Tensor<T>> {
        match self {
            Self::Identity => {
                grad_output.ensure_shape(&pre.shape)?;
                Ok(grad_output.clone())
            }
            Self::Softmax => softmax_backward(post, grad_output),
            _ => {
                pre.ensure_shape(&post.shape)?;
                grad_output.ensure_shape(&post.shape)?;
                let data = pre
                    .data
                    .iter()
                    .zip(&post.data)
                    .zip(&grad_output.data)
                    .map(|((&x, &y), &dy)| dy * self.derivative_scalar(x, y))
                    .collect();
                Ok(Tensor::new(post.shape.clone(), data))
            }
        }
    }
}
