//! Max pooling over `[batch, height, width, channels]`.

use super::lifecycle::{LayerPhase, Lifecycle};
use super::{Layer, params};
use crate::error::{LayerError, LayerResult};
use crate::scalar::Scalar;
use crate::tensors::Tensor;
use log::{debug, trace};

const NAME: &str = "max_pool";

#[derive(Debug)]
struct PoolCache {
    input_shape: Vec<usize>,
    output_shape: Vec<usize>,
    /// Flat input index of the maximum of every output element.
    argmax: Vec<usize>,
}

/// Square-window max pooling with a configurable stride.
///
/// The gradient of each output is routed to the input element that won the
/// max. Overlapping windows accumulate.
#[derive(Debug)]
pub struct MaxPoolingLayer {
    pool_size: usize,
    stride: usize,
    state: Lifecycle<PoolCache, ()>,
}

impl MaxPoolingLayer {
    /// Creates a pooling layer.
    ///
    /// # Errors
    /// [`LayerError::Configuration`] if the pool size or stride is zero.
    pub fn new(pool_size: usize, stride: usize) -> LayerResult<Self> {
        if pool_size == 0 || stride == 0 {
            return Err(LayerError::config("pool size and stride must be positive"));
        }
        debug!("max_pool: window {pool_size}, stride {stride}");
        Ok(Self {
            pool_size,
            stride,
            state: Lifecycle::default(),
        })
    }

    fn output_extent(&self, extent: usize) -> Option<usize> {
        (extent >= self.pool_size).then(|| (extent - self.pool_size) / self.stride + 1)
    }
}

impl<T: Scalar> Layer<T> for MaxPoolingLayer {
    fn name(&self) -> &'static str {
        NAME
    }

    fn forward(&mut self, input: &Tensor<T>) -> LayerResult<Tensor<T>> {
        input.ensure_rank(4)?;
        let (batch, h, w, c) = (input.shape[0], input.shape[1], input.shape[2], input.shape[3]);
        let (Some(oh), Some(ow)) = (self.output_extent(h), self.output_extent(w)) else {
            return Err(LayerError::shape(
                &[batch, self.pool_size, self.pool_size, c],
                &input.shape,
            ));
        };

        let mut out = Vec::with_capacity(batch * oh * ow * c);
        let mut argmax = Vec::with_capacity(batch * oh * ow * c);
        for b in 0..batch {
            for oy in 0..oh {
                for ox in 0..ow {
                    for ch in 0..c {
                        let mut best_idx = ((b * h + oy * self.stride) * w + ox * self.stride) * c + ch;
                        let mut best = input.data[best_idx];
                        for py in 0..self.pool_size {
                            for px in 0..self.pool_size {
                                let iy = oy * self.stride + py;
                                let ix = ox * self.stride + px;
                                let idx = ((b * h + iy) * w + ix) * c + ch;
                                if input.data[idx] > best {
                                    best = input.data[idx];
                                    best_idx = idx;
                                }
                            }
                        }
                        out.push(best);
                        argmax.push(best_idx);
                    }
                }
            }
        }

        let output_shape = vec![batch, oh, ow, c];
        trace!("max_pool: forward {:?} -> {:?}", input.shape, output_shape);
        self.state.forwarded(PoolCache {
            input_shape: input.shape.clone(),
            output_shape: output_shape.clone(),
            argmax,
        });
        Ok(Tensor::new(output_shape, out))
    }

    fn backward(&mut self, output_gradient: &Tensor<T>) -> LayerResult<Tensor<T>> {
        let cache = self.state.cache(NAME)?;
        output_gradient.ensure_shape(&cache.output_shape)?;
        let mut grad = Tensor::zeros(cache.input_shape.clone());
        for (&idx, &g) in cache.argmax.iter().zip(&output_gradient.data) {
            grad.data[idx] = grad.data[idx] + g;
        }
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
