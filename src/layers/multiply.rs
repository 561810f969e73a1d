//! Elementwise product of two inputs.

use super::lifecycle::{LayerPhase, Lifecycle};
use super::{DualGradient, DualInputLayer, Layer, params};
use crate::error::{LayerError, LayerResult};
use crate::scalar::Scalar;
use crate::tensors::Tensor;
use log::{trace, warn};

const NAME: &str = "multiply";

/// `y = a ⊙ b`; gradients are `dy ⊙ b` and `dy ⊙ a`.
#[derive(Debug)]
pub struct MultiplyLayer<T: Scalar> {
    state: Lifecycle<(Tensor<T>, Tensor<T>), ()>,
}

impl<T: Scalar> Default for MultiplyLayer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Scalar> MultiplyLayer<T> {
    /// A fresh element-wise product layer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Lifecycle::default(),
        }
    }
}

impl<T: Scalar> Layer<T> for MultiplyLayer<T> {
    fn name(&self) -> &'static str {
        NAME
    }

    fn forward(&mut self, _input: &Tensor<T>) -> LayerResult<Tensor<T>> {
        warn!("multiply: single-input forward rejected");
        Err(LayerError::UnsupportedOperation(
            "multiply needs two inputs; use forward_dual",
        ))
    }

    fn backward(&mut self, _output_gradient: &Tensor<T>) -> LayerResult<Tensor<T>> {
        warn!("multiply: single-output backward rejected");
        Err(LayerError::UnsupportedOperation(
            "multiply has two input gradients; use backward_dual",
        ))
    }

    fn update_parameters(&mut self, _learning_rate: T) -> LayerResult<()> {
        self.state.take_gradients(NAME)?;
        Ok(())
    }

    fn parameters(&self) -> Vec<T> {
        Vec::new()
    }

    fn set_parameters(&mut self, values: &[T]) -> LayerResult<()> {
        params::assign_none(values)
    }

    fn parameter_count(&self) -> usize {
        0
    }

    fn reset_state(&mut self) {
        self.state.reset();
    }

    fn supports_training(&self) -> bool {
        false
    }

    fn phase(&self) -> LayerPhase {
        self.state.phase()
    }
}

impl<T: Scalar> DualInputLayer<T> for MultiplyLayer<T> {
    fn forward_dual(&mut self, first: &Tensor<T>, second: &Tensor<T>) -> LayerResult<Tensor<T>> {
        let out = first.mul(second)?;
        trace!("multiply: forward {:?}", out.shape);
        self.state.forwarded((first.clone(), second.clone()));
        Ok(out)
    }

    fn backward_dual(&mut self, output_gradient: &Tensor<T>) -> LayerResult<DualGradient<T>> {
        let (a, b) = self.state.cache(NAME)?;
        let grads = DualGradient {
            first: output_gradient.mul(b)?,
            second: output_gradient.mul(a)?,
        };
        self.state.store_gradients(NAME, ())?;
        Ok(grads)
    }
}
