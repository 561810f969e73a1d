//! Layers and the contract they share.
//!
//! Every layer implements [`Layer`]: a forward pass that caches what the
//! backward pass needs, a backward pass that returns the input gradient and
//! stores parameter gradients, and an update that consumes those gradients.
//! Layers that take two inputs additionally implement [`DualInputLayer`].
//!
//! # Lifecycle
//!
//! ```text
//! construct -> (forward -> backward -> update_parameters)* -> reset_state
//! ```
//!
//! Out-of-order calls fail with [`LayerError::State`](crate::error::LayerError::State):
//! `backward` before `forward`, `update_parameters` before `backward`, and
//! `backward` after `reset_state`.
//!
//! # Core layers
//! - [`ConvolutionalLayer`]: strided 2D convolution with bias and activation
//! - [`ConvLstmLayer`]: convolutional LSTM over `[batch, time, h, w, c]` with BPTT
//! - [`MemoryReadLayer`]: attention read of a memory matrix driven by a query
//!
//! # Peripheral layers
//! Pooling, cropping, activation, split, multiply, residual, time-distributed,
//! positional encoding and log-variance.

pub mod activation;
pub mod conv;
pub mod conv_lstm;
pub mod cropping;
mod lifecycle;
pub mod log_variance;
pub mod memory_read;
pub mod multiply;
mod params;
pub mod pooling;
pub mod positional_encoding;
pub mod residual;
pub mod split;
pub mod time_distributed;

pub use activation::ActivationLayer;
pub use conv::ConvolutionalLayer;
pub use conv_lstm::{ConvLstmLayer, ConvLstmParams};
pub use cropping::CroppingLayer;
pub use lifecycle::LayerPhase;
pub use log_variance::LogVarianceLayer;
pub use memory_read::MemoryReadLayer;
pub use multiply::MultiplyLayer;
pub use pooling::MaxPoolingLayer;
pub use positional_encoding::PositionalEncodingLayer;
pub use residual::ResidualLayer;
pub use split::SplitLayer;
pub use time_distributed::TimeDistributedLayer;

use crate::error::LayerResult;
use crate::scalar::Scalar;
use crate::tensors::Tensor;

/// The uniform interface of a trainable unit.
pub trait Layer<T: Scalar> {
    /// Short human-readable layer name used in logs.
    fn name(&self) -> &'static str;

    /// Computes the output and caches what [`Layer::backward`] needs.
    ///
    /// # Errors
    /// [`LayerError::ShapeMismatch`](crate::error::LayerError::ShapeMismatch)
    /// if the input does not have the declared shape.
    fn forward(&mut self, input: &Tensor<T>) -> LayerResult<Tensor<T>>;

    /// Maps `dL/doutput` to `dL/dinput`, storing parameter gradients.
    ///
    /// # Errors
    /// [`LayerError::State`](crate::error::LayerError::State) without a cached
    /// forward pass.
    fn backward(&mut self, output_gradient: &Tensor<T>) -> LayerResult<Tensor<T>>;

    /// Applies and clears the gradients of the last backward pass.
    ///
    /// # Errors
    /// [`LayerError::State`](crate::error::LayerError::State) if no gradients
    /// are pending.
    fn update_parameters(&mut self, learning_rate: T) -> LayerResult<()>;

    /// All trainable values, in the layer's documented order.
    fn parameters(&self) -> Vec<T>;

    /// Replaces all trainable values from a vector laid out like
    /// [`Layer::parameters`].
    ///
    /// # Errors
    /// [`LayerError::Configuration`](crate::error::LayerError::Configuration)
    /// on a length mismatch or non-finite value.
    fn set_parameters(&mut self, values: &[T]) -> LayerResult<()>;

    /// Number of trainable values.
    fn parameter_count(&self) -> usize;

    /// Drops cached forward and backward state. Parameters and optimiser
    /// buffers are kept.
    fn reset_state(&mut self);

    /// Whether the layer has trainable parameters.
    fn supports_training(&self) -> bool;

    /// Current lifecycle phase.
    fn phase(&self) -> LayerPhase;
}

/// Gradients with respect to both inputs of a [`DualInputLayer`].
#[derive(Debug, Clone, PartialEq)]
pub struct DualGradient<T> {
    /// Gradient with respect to the first input.
    pub first: Tensor<T>,
    /// Gradient with respect to the second input.
    pub second: Tensor<T>,
}

/// A layer whose forward pass consumes two tensors.
///
/// The single-input [`Layer::forward`] and [`Layer::backward`] of such layers
/// fail with [`LayerError::UnsupportedOperation`](crate::error::LayerError::UnsupportedOperation).
pub trait DualInputLayer<T: Scalar>: Layer<T> {
    /// Two-input forward pass.
    ///
    /// # Errors
    /// [`LayerError::ShapeMismatch`](crate::error::LayerError::ShapeMismatch)
    /// if either input has the wrong shape.
    fn forward_dual(&mut self, first: &Tensor<T>, second: &Tensor<T>) -> LayerResult<Tensor<T>>;

    /// Backward pass returning one gradient per input.
    ///
    /// # Errors
    /// [`LayerError::State`](crate::error::LayerError::State) without a cached
    /// forward pass.
    fn backward_dual(&mut self, output_gradient: &Tensor<T>) -> LayerResult<DualGradient<T>>;
}
