//! Log-variance reduction along one axis.

use super::lifecycle::{LayerPhase, Lifecycle};
use super::{Layer, params};
use crate::error::{LayerError, LayerResult};
use crate::scalar::Scalar;
use crate::tensors::Tensor;
use log::trace;

const NAME: &str = "log_variance";

/// Added to the variance before the logarithm.
pub const LOG_EPSILON: f64 = 1e-8;

#[derive(Debug)]
struct VarianceCache<T> {
    input: Tensor<T>,
    output_shape: Vec<usize>,
    mean: Vec<T>,
    variance: Vec<T>,
}

/// `y = log(var(x) + 1e-8)` along `axis`, keeping the axis with size one.
///
/// The variance is the population variance (divides by `n`), so
/// `dy/dx_j = 2 (x_j − μ) / (n (var + ε))`.
#[derive(Debug)]
pub struct LogVarianceLayer<T: Scalar> {
    axis: usize,
    state: Lifecycle<VarianceCache<T>, ()>,
}

/// `(outer, n, inner)` sizes around `axis`.
fn split_axis(shape: &[usize], axis: usize) -> (usize, usize, usize) {
    (
        shape[..axis].iter().product(),
        shape[axis],
        shape[axis + 1..].iter().product(),
    )
}

impl<T: Scalar> LogVarianceLayer<T> {
    /// Reduces along `axis`.
    #[must_use]
    pub fn new(axis: usize) -> Self {
        Self {
            axis,
            state: Lifecycle::default(),
        }
    }
}

impl<T: Scalar> Layer<T> for LogVarianceLayer<T> {
    fn name(&self) -> &'static str {
        NAME
    }

    fn forward(&mut self, input: &Tensor<T>) -> LayerResult<Tensor<T>> {
        if self.axis >= input.rank() || input.shape[self.axis] == 0 {
            return Err(LayerError::shape(&[self.axis + 1], &input.shape));
        }
        let (outer, n, inner) = split_axis(&input.shape, self.axis);
        let count = T::from_usize(n);
        let eps = T::from_f64(LOG_EPSILON);

        let mut mean = vec![T::zero(); outer * inner];
        let mut variance = vec![T::zero(); outer * inner];
        for o in 0..outer {
            for i in 0..inner {
                let at = |j: usize| input.data[(o * n + j) * inner + i];
                let mu = (0..n).fold(T::zero(), |acc, j| acc + at(j)) / count;
                let var = (0..n).fold(T::zero(), |acc, j| {
                    let d = at(j) - mu;
                    acc + d * d
                }) / count;
                mean[o * inner + i] = mu;
                variance[o * inner + i] = var;
            }
        }

        let mut output_shape = input.shape.clone();
        output_shape[self.axis] = 1;
        let output = Tensor::new(
            output_shape.clone(),
            variance.iter().map(|&v| (v + eps).ln()).collect(),
        );
        trace!("log_variance: {:?} -> {:?}", input.shape, output.shape);
        self.state.forwarded(VarianceCache {
            input: input.clone(),
            output_shape,
            mean,
            variance,
        });
        Ok(output)
    }

    fn backward(&mut self, output_gradient: &Tensor<T>) -> LayerResult<Tensor<T>> {
        let cache = self.state.cache(NAME)?;
        output_gradient.ensure_shape(&cache.output_shape)?;
        let (outer, n, inner) = split_axis(&cache.input.shape, self.axis);
        let two = T::from_f64(2.0);
        let count = T::from_usize(n);
        let eps = T::from_f64(LOG_EPSILON);

        let mut grad = Tensor::zeros(cache.input.shape.clone());
        for o in 0..outer {
            for i in 0..inner {
                let r = o * inner + i;
                let scale = output_gradient.data[r] * two / (count * (cache.variance[r] + eps));
                for j in 0..n {
                    let idx = (o * n + j) * inner + i;
                    grad.data[idx] = scale * (cache.input.data[idx] - cache.mean[r]);
                }
            }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_variance_of_rows() {
        let mut layer = LogVarianceLayer::new(1);
        let x = Tensor::new(vec![2, 2], vec![1.0, 3.0, 5.0, 5.0]);
        let y = layer.forward(&x).unwrap();
        assert_eq!(y.shape, vec![2, 1]);
        assert!((y.data[0] - (1.0f64 + 1e-8).ln()).abs() < 1e-12);
        assert!((y.data[1] - 1e-8f64.ln()).abs() < 1e-6);
    }

    #[test]
    fn test_gradient_matches_finite_differences() {
        let x = Tensor::<f64>::new(vec![1, 4], vec![0.3, -1.1, 2.0, 0.7]);
        let mut layer = LogVarianceLayer::new(1);
        layer.forward(&x).unwrap();
        let grad = layer.backward(&Tensor::full(vec![1, 1], 1.0)).unwrap();
        let h = 1e-6;
        for j in 0..4 {
            let mut plus = x.clone();
            plus.data[j] += h;
            let mut minus = x.clone();
            minus.data[j] -= h;
            let mut fresh = LogVarianceLayer::new(1);
            let numeric = (fresh.forward(&plus).unwrap().data[0]
                - fresh.forward(&minus).unwrap().data[0])
                / (2.0 * h);
            assert!((numeric - grad.data[j]).abs() < 1e-6);
        }
    }

    #[test]
    fn test_axis_out_of_range() {
        let mut layer = LogVarianceLayer::<f64>::new(2);
        assert!(layer.forward(&Tensor::zeros(vec![2, 2])).is_err());
    }
}
