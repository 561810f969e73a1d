//! Applies one layer to every step of a sequence.
//!
//! A `[batch, time, ...]` input is folded into `[batch · time, ...]`, run
//! through the inner layer as a single batch, and unfolded again. Because the
//! data is row-major the fold is a reshape, and the inner layer sees every step
//! in one forward pass, so its parameter gradients already sum over time.

use super::Layer;
use super::lifecycle::{LayerPhase, Lifecycle};
use crate::error::{LayerError, LayerResult};
use crate::scalar::Scalar;
use crate::tensors::Tensor;
use log::trace;

const NAME: &str = "time_distributed";

#[derive(Debug)]
struct FoldCache {
    batch: usize,
    time: usize,
}

/// Wraps a layer that expects `[batch, ...]` so it accepts `[batch, time, ...]`.
pub struct TimeDistributedLayer<T: Scalar> {
    inner: Box<dyn Layer<T>>,
    state: Lifecycle<FoldCache, ()>,
}

fn fold(shape: &[usize]) -> Vec<usize> {
    let mut folded = vec![shape[0] * shape[1]];
    folded.extend_from_slice(&shape[2..]);
    folded
}

fn unfold(batch: usize, time: usize, folded: &[usize]) -> Vec<usize> {
    let mut shape = vec![batch, time];
    shape.extend_from_slice(&folded[1..]);
    shape
}

impl<T: Scalar> TimeDistributedLayer<T> {
    /// Applies `inner` independently at every time step.
    #[must_use]
    pub fn new(inner: Box<dyn Layer<T>>) -> Self {
        Self {
            inner,
            state: Lifecycle::default(),
        }
    }

    /// The wrapped layer.
    #[must_use]
    pub fn inner(&self) -> &dyn Layer<T> {
        self.inner.as_ref()
    }
}

impl<T: Scalar> Layer<T> for TimeDistributedLayer<T> {
    fn name(&self) -> &'static str {
        NAME
    }

    fn forward(&mut self, input: &Tensor<T>) -> LayerResult<Tensor<T>> {
        if input.rank() < 3 {
            return Err(LayerError::shape(&[3], &[input.rank()]));
        }
        let (batch, time) = (input.shape[0], input.shape[1]);
        let folded = input.clone().reshape(fold(&input.shape))?;
        let out = self.inner.forward(&folded)?;
        let out_shape = unfold(batch, time, &out.shape);
        trace!("time_distributed: {} x {} steps through {}", batch, time, self.inner.name());
        self.state.forwarded(FoldCache { batch, time });
        out.reshape(out_shape)
    }

    fn backward(&mut self, output_gradient: &Tensor<T>) -> LayerResult<Tensor<T>> {
        let &FoldCache { batch, time } = self.state.cache(NAME)?;
        if output_gradient.rank() < 3 || output_gradient.shape[..2] != [batch, time] {
            return Err(LayerError::shape(
                &[batch, time],
                &output_gradient.shape,
            ));
        }
        let folded = output_gradient.clone().reshape(fold(&output_gradient.shape))?;
        let grad = self.inner.backward(&folded)?;
        let grad_shape = unfold(batch, time, &grad.shape);
        self.state.store_gradients(NAME, ())?;
        grad.reshape(grad_shape)
    }

    fn update_parameters(&mut self, learning_rate: T) -> LayerResult<()> {
        self.state.take_gradients(NAME)?;
        self.inner.update_parameters(learning_rate)
    }

    fn parameters(&self) -> Vec<T> {
        self.inner.parameters()
    }

    fn set_parameters(&mut self, values: &[T]) -> LayerResult<()> {
        self.inner.set_parameters(values)
    }

    fn parameter_count(&self) -> usize {
        self.inner.parameter_count()
    }

    fn reset_state(&mut self) {
        self.state.reset();
        self.inner.reset_state();
    }

    fn supports_training(&self) -> bool {
        self.inner.supports_training()
    }

    fn phase(&self) -> LayerPhase {
        self.state.phase()
    }
}
