//! 2D convolutional layer.
//!
//! Wraps the engine in [`crate::ops::conv`] with a learnable kernel
//! `[k, k, in_depth, filters]`, a per-filter bias and an activation.
//! Parameters are laid out as kernel then bias.

use super::lifecycle::{LayerPhase, Lifecycle};
use super::{Layer, params};
use crate::activations::Activation;
use crate::config::{ConvConfig, LayerConfig};
use crate::error::{LayerError, LayerResult};
use crate::init::glorot_uniform;
use crate::ops::conv::{
    Conv2dGeometry, add_channel_bias, conv2d, conv2d_bias_grad, conv2d_input_grad,
    conv2d_kernel_grad,
};
use crate::optim::sgd;
use crate::scalar::Scalar;
use crate::tensors::Tensor;
use log::{debug, trace};
use rand::Rng;

#[derive(Debug)]
struct ConvCache<T> {
    input: Tensor<T>,
    pre: Tensor<T>,
    post: Tensor<T>,
}

#[derive(Debug)]
struct ConvGradients<T> {
    kernel: Tensor<T>,
    bias: Tensor<T>,
}

/// Convolution over `[batch, height, width, depth]` inputs.
#[derive(Debug)]
pub struct ConvolutionalLayer<T: Scalar> {
    input_hwc: [usize; 3],
    output_hwc: [usize; 3],
    geometry: Conv2dGeometry,
    activation: Activation,
    kernel: Tensor<T>,
    bias: Tensor<T>,
    state: Lifecycle<ConvCache<T>, ConvGradients<T>>,
}

impl<T: Scalar> ConvolutionalLayer<T> {
    /// Builds a layer with Glorot-uniform kernel and zero bias.
    ///
    /// # Errors
    /// [`LayerError::Configuration`] if the configuration is invalid.
    pub fn from_config<R: Rng + ?Sized>(config: &ConvConfig, rng: &mut R) -> LayerResult<Self> {
        config.validate()?;
        let k = config.kernel_size;
        let fan_in = k * k * config.input_depth;
        let fan_out = k * k * config.filters;
        let kernel = glorot_uniform(
            vec![k, k, config.input_depth, config.filters],
            fan_in,
            fan_out,
            rng,
        );
        Self::with_weights(config, kernel, Tensor::zeros(vec![config.filters]))
    }

    /// Builds a layer from explicit weights.
    ///
    /// # Errors
    /// [`LayerError::Configuration`] if the configuration is invalid or the
    /// weights are not shaped `[k, k, depth, filters]` and `[filters]`.
    pub fn with_weights(config: &ConvConfig, kernel: Tensor<T>, bias: Tensor<T>) -> LayerResult<Self> {
        config.validate()?;
        let k = config.kernel_size;
        let kernel_shape = [k, k, config.input_depth, config.filters];
        if kernel.shape != kernel_shape || bias.shape != [config.filters] {
            return Err(LayerError::config(format!(
                "expected kernel {kernel_shape:?} and bias [{}], got {:?} and {:?}",
                config.filters, kernel.shape, bias.shape
            )));
        }
        let (out_h, out_w) = config.output_hw()?;
        let layer = Self {
            input_hwc: [config.input_height, config.input_width, config.input_depth],
            output_hwc: [out_h, out_w, config.filters],
            geometry: config.geometry(),
            activation: config.activation,
            kernel,
            bias,
            state: Lifecycle::default(),
        };
        debug!(
            "conv: input {:?} -> output {:?}, {} parameters",
            layer.input_hwc,
            layer.output_hwc,
            layer.parameter_count()
        );
        Ok(layer)
    }

    /// Per-example output shape `[out_h, out_w, filters]`.
    #[must_use]
    pub const fn output_shape(&self) -> [usize; 3] {
        self.output_hwc
    }

    /// The kernel `[k, k, depth, filters]`.
    #[must_use]
    pub const fn kernel(&self) -> &Tensor<T> {
        &self.kernel
    }

    /// The per-filter bias.
    #[must_use]
    pub const fn bias(&self) -> &Tensor<T> {
        &self.bias
    }

    fn check_input(&self, input: &Tensor<T>) -> LayerResult<()> {
        input.ensure_rank(4)?;
        if input.shape[1..] != self.input_hwc {
            let mut expected = vec![input.shape[0]];
            expected.extend_from_slice(&self.input_hwc);
            return Err(LayerError::shape(&expected, &input.shape));
        }
        Ok(())
    }
}

impl<T: Scalar> Layer<T> for ConvolutionalLayer<T> {
    fn name(&self) -> &'static str {
        "conv"
    }

    fn forward(&mut self, input: &Tensor<T>) -> LayerResult<Tensor<T>> {
        self.check_input(input)?;
        let mut pre = conv2d(input, &self.kernel, self.geometry)?;
        add_channel_bias(&mut pre, &self.bias)?;
        let post = self.activation.activate(&pre);
        trace!("conv: forward {:?} -> {:?}", input.shape, post.shape);

        let output = post.clone();
        self.state.forwarded(ConvCache {
            input: input.clone(),
            pre,
            post,
        });
        Ok(output)
    }

    fn backward(&mut self, output_gradient: &Tensor<T>) -> LayerResult<Tensor<T>> {
        let cache = self.state.cache(self.name())?;
        let d_pre = self
            .activation
            .backward(&cache.pre, &cache.post, output_gradient)?;

        let kernel = conv2d_kernel_grad(&cache.input, &d_pre, &self.kernel.shape, self.geometry)?;
        let bias = conv2d_bias_grad(&d_pre);
        let d_input = conv2d_input_grad(&d_pre, &self.kernel, &cache.input.shape, self.geometry)?;
        trace!("conv: backward {:?} -> {:?}", output_gradient.shape, d_input.shape);

        self.state
            .store_gradients(self.name(), ConvGradients { kernel, bias })?;
        Ok(d_input)
    }

    fn update_parameters(&mut self, learning_rate: T) -> LayerResult<()> {
        let grads = self.state.take_gradients(self.name())?;
        sgd(&mut self.kernel, &grads.kernel, learning_rate)?;
        sgd(&mut self.bias, &grads.bias, learning_rate)?;
        trace!("conv: sgd step, lr {:?}", learning_rate);
        Ok(())
    }

    fn parameters(&self) -> Vec<T> {
        params::flatten(&[&self.kernel, &self.bias])
    }

    fn set_parameters(&mut self, values: &[T]) -> LayerResult<()> {
        params::assign(&mut [&mut self.kernel, &mut self.bias], values)
    }

    fn parameter_count(&self) -> usize {
        self.kernel.len() + self.bias.len()
    }

    fn reset_state(&mut self) {
        self.state.reset();
    }

    fn supports_training(&self) -> bool {
        true
    }

    fn phase(&self) -> LayerPhase {
        self.state.phase()
    }
}
