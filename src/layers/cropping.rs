//! Spatial cropping of `[batch, height, width, channels]` tensors.

use super::lifecycle::{LayerPhase, Lifecycle};
use super::{Layer, params};
use crate::error::{LayerError, LayerResult};
use crate::scalar::Scalar;
use crate::tensors::Tensor;
use log::trace;

const NAME: &str = "cropping";

/// Removes fixed margins from the spatial axes. The gradient is zero-padded
/// back to the input shape.
#[derive(Debug)]
pub struct CroppingLayer {
    top: usize,
    bottom: usize,
    left: usize,
    right: usize,
    state: Lifecycle<Vec<usize>, ()>,
}

/// Extent left after removing both margins, if any remains.
fn remaining(extent: usize, before: usize, after: usize) -> Option<usize> {
    before
        .checked_add(after)
        .and_then(|margin| extent.checked_sub(margin))
        .filter(|&n| n > 0)
}

impl CroppingLayer {
    /// Crops `top`/`bottom` rows and `left`/`right` columns.
    #[must_use]
    pub fn new(top: usize, bottom: usize, left: usize, right: usize) -> Self {
        Self {
            top,
            bottom,
            left,
            right,
            state: Lifecycle::default(),
        }
    }

    /// Same margin on every side.
    #[must_use]
    pub fn symmetric(margin: usize) -> Self {
        Self::new(margin, margin, margin, margin)
    }

    /// Copies the `[rows, cols]` window starting at `(top, left)` of every
    /// `src` image into `dst`, or the reverse when `scatter` is set.
    fn window<T: Scalar>(&self, full: &[usize], src: &[T], dst: &mut [T], scatter: bool) {
        let (batch, h, w, c) = (full[0], full[1], full[2], full[3]);
        let rows = h - self.top - self.bottom;
        let cols = w - self.left - self.right;
        for b in 0..batch {
            for y in 0..rows {
                let inner = ((b * rows + y) * cols) * c;
                let outer = ((b * h + y + self.top) * w + self.left) * c;
                let n = cols * c;
                if scatter {
                    dst[outer..outer + n].copy_from_slice(&src[inner..inner + n]);
                } else {
                    dst[inner..inner + n].copy_from_slice(&src[outer..outer + n]);
                }
            }
        }
    }
}

impl<T: Scalar> Layer<T> for CroppingLayer {
    fn name(&self) -> &'static str {
        NAME
    }

    fn forward(&mut self, input: &Tensor<T>) -> LayerResult<Tensor<T>> {
        input.ensure_rank(4)?;
        let (h, w) = (input.shape[1], input.shape[2]);
        let (Some(rows), Some(cols)) = (
            remaining(h, self.top, self.bottom),
            remaining(w, self.left, self.right),
        ) else {
            return Err(LayerError::shape(
                &[
                    input.shape[0],
                    self.top.saturating_add(self.bottom).saturating_add(1),
                    self.left.saturating_add(self.right).saturating_add(1),
                    input.shape[3],
                ],
                &input.shape,
            ));
        };
        let out_shape = vec![input.shape[0], rows, cols, input.shape[3]];
        let mut out = Tensor::zeros(out_shape);
        self.window(&input.shape, &input.data, &mut out.data, false);
        trace!("cropping: forward {:?} -> {:?}", input.shape, out.shape);
        self.state.forwarded(input.shape.clone());
        Ok(out)
    }

    fn backward(&mut self, output_gradient: &Tensor<T>) -> LayerResult<Tensor<T>> {
        let input_shape = self.state.cache(NAME)?.clone();
        let expected = [
            input_shape[0],
            input_shape[1] - self.top - self.bottom,
            input_shape[2] - self.left - self.right,
            input_shape[3],
        ];
        output_gradient.ensure_shape(&expected)?;
        let mut grad = Tensor::zeros(input_shape.clone());
        self.window(&input_shape, &output_gradient.data, &mut grad.data, true);
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
