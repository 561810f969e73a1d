//! Sinusoidal positional encoding for `[batch, sequence, dim]` inputs.

use super::lifecycle::{LayerPhase, Lifecycle};
use super::{Layer, params};
use crate::error::{LayerError, LayerResult};
use crate::scalar::Scalar;
use crate::tensors::Tensor;
use log::{debug, trace};

const NAME: &str = "positional_encoding";

/// Adds a fixed sinusoidal table to every sequence:
///
/// - `pe[pos, 2i]   = sin(pos / 10000^(2i / dim))`
/// - `pe[pos, 2i+1] = cos(pos / 10000^(2i / dim))`
///
/// The table is not trainable and the gradient passes through unchanged.
#[derive(Debug)]
pub struct PositionalEncodingLayer<T: Scalar> {
    encoding: Tensor<T>,
    state: Lifecycle<Vec<usize>, ()>,
}

impl<T: Scalar> PositionalEncodingLayer<T> {
    /// Precomputes the table for sequences up to `max_len` positions.
    ///
    /// # Errors
    /// [`LayerError::Configuration`] if either size is zero.
    pub fn new(max_len: usize, dim: usize) -> LayerResult<Self> {
        if max_len == 0 || dim == 0 {
            return Err(LayerError::config(
                "positional encoding needs a positive length and dimension",
            ));
        }
        #[allow(clippy::cast_precision_loss)]
        let encoding = Tensor::from_fn(vec![max_len, dim], |idx| {
            let (pos, j) = (idx / dim, idx % dim);
            let exponent = (2 * (j / 2)) as f64 / dim as f64;
            let angle = pos as f64 / 10_000f64.powf(exponent);
            T::from_f64(if j % 2 == 0 { angle.sin() } else { angle.cos() })
        });
        debug!("positional_encoding: table [{max_len}, {dim}]");
        Ok(Self {
            encoding,
            state: Lifecycle::default(),
        })
    }

    /// The `[max_len, dim]` table.
    #[must_use]
    pub const fn encoding(&self) -> &Tensor<T> {
        &self.encoding
    }
}

impl<T: Scalar> Layer<T> for PositionalEncodingLayer<T> {
    fn name(&self) -> &'static str {
        NAME
    }

    fn forward(&mut self, input: &Tensor<T>) -> LayerResult<Tensor<T>> {
        input.ensure_rank(3)?;
        let (max_len, dim) = (self.encoding.shape[0], self.encoding.shape[1]);
        let (seq, width) = (input.shape[1], input.shape[2]);
        if seq > max_len || width != dim {
            return Err(LayerError::shape(&[input.shape[0], seq.min(max_len), dim], &input.shape));
        }

        let mut out = input.clone();
        let table = &self.encoding.data[..seq * dim];
        if !table.is_empty() {
            for sequence in out.data.chunks_mut(seq * dim) {
                for (v, &p) in sequence.iter_mut().zip(table) {
                    *v = *v + p;
                }
            }
        }
        trace!("positional_encoding: forward {:?}", input.shape);
        self.state.forwarded(input.shape.clone());
        Ok(out)
    }

    fn backward(&mut self, output_gradient: &Tensor<T>) -> LayerResult<Tensor<T>> {
        output_gradient.ensure_shape(self.state.cache(NAME)?)?;
        self.state.store_gradients(NAME, ())?;
        Ok(output_gradient.clone())
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
