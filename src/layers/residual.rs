//! Skip connection around an optional inner layer: `y = φ(x + inner(x))`.
//!
//! Without an inner layer only the skip branch remains: `y = φ(x)`.

use super::lifecycle::{LayerPhase, Lifecycle};
use super::Layer;
use crate::activations::Activation;
use crate::error::LayerResult;
use crate::scalar::Scalar;
use crate::tensors::Tensor;
use log::trace;

const NAME: &str = "residual";

#[derive(Debug)]
struct ResidualCache<T> {
    pre: Tensor<T>,
    post: Tensor<T>,
}

/// Residual block. Training, parameters and updates are delegated to the
/// inner layer.
pub struct ResidualLayer<T: Scalar> {
    inner: Option<Box<dyn Layer<T>>>,
    activation: Activation,
    state: Lifecycle<ResidualCache<T>, ()>,
}

impl<T: Scalar> ResidualLayer<T> {
    /// Wraps `inner`, whose output must have the shape of its input.
    #[must_use]
    pub fn new(inner: Box<dyn Layer<T>>, activation: Activation) -> Self {
        Self {
            inner: Some(inner),
            activation,
            state: Lifecycle::default(),
        }
    }

    /// A block with only the skip branch.
    #[must_use]
    pub fn identity(activation: Activation) -> Self {
        Self {
            inner: None,
            activation,
            state: Lifecycle::default(),
        }
    }

    /// The wrapped layer, if any.
    #[must_use]
    pub fn inner(&self) -> Option<&dyn Layer<T>> {
        self.inner.as_deref()
    }
}

impl<T: Scalar> Layer<T> for ResidualLayer<T> {
    fn name(&self) -> &'static str {
        NAME
    }

    fn forward(&mut self, input: &Tensor<T>) -> LayerResult<Tensor<T>> {
        let pre = match self.inner.as_mut() {
            Some(inner) => input.add(&inner.forward(input)?)?,
            None => input.clone(),
        };
        let post = self.activation.activate(&pre);
        trace!("residual: forward {:?}", input.shape);
        self.state.forwarded(ResidualCache {
            pre,
            post: post.clone(),
        });
        Ok(post)
    }

    fn backward(&mut self, output_gradient: &Tensor<T>) -> LayerResult<Tensor<T>> {
        let cache = self.state.cache(NAME)?;
        let d_pre = self
            .activation
            .backward(&cache.pre, &cache.post, output_gradient)?;
        let grad = match self.inner.as_mut() {
            Some(inner) => d_pre.add(&inner.backward(&d_pre)?)?,
            None => d_pre,
        };
        self.state.store_gradients(NAME, ())?;
        Ok(grad)
    }

    fn update_parameters(&mut self, learning_rate: T) -> LayerResult<()> {
        self.state.take_gradients(NAME)?;
        match self.inner.as_mut() {
            Some(inner) => inner.update_parameters(learning_rate),
            None => Ok(()),
        }
    }

    fn parameters(&self) -> Vec<T> {
        self.inner.as_ref().map_or_else(Vec::new, |inner| inner.parameters())
    }

    fn set_parameters(&mut self, values: &[T]) -> LayerResult<()> {
        match self.inner.as_mut() {
            Some(inner) => inner.set_parameters(values),
            None => super::params::assign_none(values),
        }
    }

    fn parameter_count(&self) -> usize {
        self.inner.as_ref().map_or(0, |inner| inner.parameter_count())
    }

    fn reset_state(&mut self) {
        self.state.reset();
        if let Some(inner) = self.inner.as_mut() {
            inner.reset_state();
        }
    }

    fn supports_training(&self) -> bool {
        self.inner
            .as_ref()
            .is_some_and(|inner| inner.supports_training())
    }

    fn phase(&self) -> LayerPhase {
        self.state.phase()
    }
}
