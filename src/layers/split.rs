//! Splits a feature axis into equal groups.

use super::lifecycle::{LayerPhase, Lifecycle};
use super::{Layer, params};
use crate::error::{LayerError, LayerResult};
use crate::scalar::Scalar;
use crate::tensors::Tensor;
use log::trace;

const NAME: &str = "split";

/// Reshapes `[batch, features]` into `[batch, splits, features / splits]`.
/// The gradient is reshaped back.
#[derive(Debug)]
pub struct SplitLayer {
    splits: usize,
    state: Lifecycle<Vec<usize>, ()>,
}

impl SplitLayer {
    /// # Errors
    /// [`LayerError::Configuration`] if `splits` is zero.
    pub fn new(splits: usize) -> LayerResult<Self> {
        if splits == 0 {
            return Err(LayerError::config("split count must be positive"));
        }
        Ok(Self {
            splits,
            state: Lifecycle::default(),
        })
    }
}

impl<T: Scalar> Layer<T> for SplitLayer {
    fn name(&self) -> &'static str {
        NAME
    }

    fn forward(&mut self, input: &Tensor<T>) -> LayerResult<Tensor<T>> {
        input.ensure_rank(2)?;
        let (batch, features) = (input.shape[0], input.shape[1]);
        if features % self.splits != 0 {
            return Err(LayerError::config(format!(
                "{features} features cannot be split into {} equal groups",
                self.splits
            )));
        }
        let out = input
            .clone()
            .reshape(vec![batch, self.splits, features / self.splits])?;
        trace!("split: {:?} -> {:?}", input.shape, out.shape);
        self.state.forwarded(input.shape.clone());
        Ok(out)
    }

    fn backward(&mut self, output_gradient: &Tensor<T>) -> LayerResult<Tensor<T>> {
        let input_shape = self.state.cache(NAME)?.clone();
        output_gradient.ensure_shape(&[
            input_shape[0],
            self.splits,
            input_shape[1] / self.splits,
        ])?;
        let grad = output_gradient.clone().reshape(input_shape)?;
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
