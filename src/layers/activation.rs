//! A layer that only applies an [`Activation`].

use super::lifecycle::{LayerPhase, Lifecycle};
use super::{Layer, params};
use crate::activations::Activation;
use crate::error::LayerResult;
use crate::scalar::Scalar;
use crate::tensors::Tensor;
use log::trace;

const NAME: &str = "activation";

#[derive(Debug)]
struct ActivationCache<T> {
    pre: Tensor<T>,
    post: Tensor<T>,
}

/// Applies an activation to the whole input. Softmax acts on the last axis.
#[derive(Debug)]
pub struct ActivationLayer<T: Scalar> {
    activation: Activation,
    state: Lifecycle<ActivationCache<T>, ()>,
}

impl<T: Scalar> ActivationLayer<T> {
    /// Applies `activation` element-wise.
    #[must_use]
    pub fn new(activation: Activation) -> Self {
        Self {
            activation,
            state: Lifecycle::default(),
        }
    }
}

impl<T: Scalar> Layer<T> for ActivationLayer<T> {
    fn name(&self) -> &'static str {
        NAME
    }

    fn forward(&mut self, input: &Tensor<T>) -> LayerResult<Tensor<T>> {
        let post = self.activation.activate(input);
        trace!("activation: {:?} over {:?}", self.activation, input.shape);
        self.state.forwarded(ActivationCache {
            pre: input.clone(),
            post: post.clone(),
        });
        Ok(post)
    }

    fn backward(&mut self, output_gradient: &Tensor<T>) -> LayerResult<Tensor<T>> {
        let cache = self.state.cache(NAME)?;
        let grad = self
            .activation
            .backward(&cache.pre, &cache.post, output_gradient)?;
        self.state.store_gradients(NAME, ())?;
        Ok(grad)
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relu_masks_gradient() {
        let mut layer = ActivationLayer::new(Activation::Relu);
        let out = layer.forward(&Tensor::new(vec![3], vec![-1.0, 0.5, 2.0])).unwrap();
        assert_eq!(out.data, vec![0.0, 0.5, 2.0]);
        let grad = layer.backward(&Tensor::full(vec![3], 3.0)).unwrap();
        assert_eq!(grad.data, vec![0.0, 3.0, 3.0]);
        assert!(!layer.supports_training());
    }

    #[test]
    fn test_update_needs_backward() {
        let mut layer = ActivationLayer::<f64>::new(Activation::Tanh);
        layer.forward(&Tensor::zeros(vec![2])).unwrap();
        assert!(layer.update_parameters(0.1).is_err());
    }
}
