//! Attention read over an external memory.
//!
//! A query batch `[batch, input_dim]` attends over the rows of a memory
//! `[slots, memory_dim]`:
//!
//! ```text
//! keys    = query · W_key                   [batch, memory_dim]
//! scores  = keys · memoryᵀ                  [batch, slots]
//! weights = softmax(scores) per row
//! read    = weights · memory                [batch, memory_dim]
//! value   = read · W_value                  [batch, output_dim]
//! output  = φ(value · W_output + bias)      [batch, output_dim]
//! ```
//!
//! The layer needs both tensors, so it only runs through
//! [`DualInputLayer`]. Backward returns the query and memory gradients as two
//! separate tensors. Updates are plain SGD over `W_key`, `W_value`,
//! `W_output` and `bias`, which is also the flat parameter order.

use super::lifecycle::{LayerPhase, Lifecycle};
use super::{DualGradient, DualInputLayer, Layer, params};
use crate::activations::Activation;
use crate::config::{LayerConfig, MemoryReadConfig};
use crate::error::{LayerError, LayerResult};
use crate::init::glorot_uniform;
use crate::ops::conv::add_channel_bias;
use crate::ops::matmul::{matmul, matmul_nt, matmul_tn};
use crate::ops::softmax::{softmax, softmax_backward};
use crate::optim::sgd;
use crate::scalar::Scalar;
use crate::tensors::Tensor;
use log::{debug, trace, warn};
use rand::Rng;

#[derive(Debug)]
struct ReadCache<T> {
    query: Tensor<T>,
    memory: Tensor<T>,
    keys: Tensor<T>,
    weights: Tensor<T>,
    read: Tensor<T>,
    value: Tensor<T>,
    pre: Tensor<T>,
    post: Tensor<T>,
}

#[derive(Debug)]
struct ReadGradients<T> {
    w_key: Tensor<T>,
    w_value: Tensor<T>,
    w_output: Tensor<T>,
    bias: Tensor<T>,
}

/// Attention-weighted read of a memory matrix.
#[derive(Debug)]
pub struct MemoryReadLayer<T: Scalar> {
    input_dim: usize,
    memory_dim: usize,
    output_dim: usize,
    activation: Activation,
    w_key: Tensor<T>,
    w_value: Tensor<T>,
    w_output: Tensor<T>,
    bias: Tensor<T>,
    state: Lifecycle<ReadCache<T>, ReadGradients<T>>,
}

impl<T: Scalar> MemoryReadLayer<T> {
    /// Builds a layer with Glorot-uniform projections and zero bias.
    ///
    /// # Errors
    /// [`LayerError::Configuration`] if any dimension is zero.
    pub fn from_config<R: Rng + ?Sized>(config: &MemoryReadConfig, rng: &mut R) -> LayerResult<Self> {
        config.validate()?;
        let (din, dm, dout) = (
            config.input_dimension,
            config.memory_dimension,
            config.output_dimension,
        );
        let w_key = glorot_uniform(vec![din, dm], din, dm, rng);
        let w_value = glorot_uniform(vec![dm, dout], dm, dout, rng);
        let w_output = glorot_uniform(vec![dout, dout], dout, dout, rng);
        Self::with_weights(config, w_key, w_value, w_output, Tensor::zeros(vec![dout]))
    }

    /// Builds a layer from explicit weights.
    ///
    /// # Errors
    /// [`LayerError::Configuration`] if any dimension is zero or a matrix does
    /// not match the declared dimensions.
    pub fn with_weights(
        config: &MemoryReadConfig,
        w_key: Tensor<T>,
        w_value: Tensor<T>,
        w_output: Tensor<T>,
        bias: Tensor<T>,
    ) -> LayerResult<Self> {
        config.validate()?;
        let (din, dm, dout) = (
            config.input_dimension,
            config.memory_dimension,
            config.output_dimension,
        );
        for (name, tensor, expected) in [
            ("W_key", &w_key, vec![din, dm]),
            ("W_value", &w_value, vec![dm, dout]),
            ("W_output", &w_output, vec![dout, dout]),
            ("bias", &bias, vec![dout]),
        ] {
            if tensor.shape != expected {
                return Err(LayerError::config(format!(
                    "{name} must be {expected:?}, got {:?}",
                    tensor.shape
                )));
            }
        }

        let layer = Self {
            input_dim: din,
            memory_dim: dm,
            output_dim: dout,
            activation: config.activation,
            w_key,
            w_value,
            w_output,
            bias,
            state: Lifecycle::default(),
        };
        debug!(
            "memory_read: query {din}, memory {dm}, output {dout}, {} parameters",
            layer.parameter_count()
        );
        Ok(layer)
    }

    /// Softmax attention weights `[batch, slots]` of the last forward pass.
    #[must_use]
    pub fn attention_weights(&self) -> Option<&Tensor<T>> {
        match &self.state {
            Lifecycle::Idle => None,
            Lifecycle::Forwarded(cache) | Lifecycle::Backpropagated(cache, _) => Some(&cache.weights),
        }
    }

    /// Weighted memory read `[batch, memory_dim]` of the last forward pass.
    #[must_use]
    pub fn last_read(&self) -> Option<&Tensor<T>> {
        match &self.state {
            Lifecycle::Idle => None,
            Lifecycle::Forwarded(cache) | Lifecycle::Backpropagated(cache, _) => Some(&cache.read),
        }
    }

    fn check_inputs(&self, query: &Tensor<T>, memory: &Tensor<T>) -> LayerResult<()> {
        query.ensure_rank(2)?;
        memory.ensure_rank(2)?;
        if query.shape[1] != self.input_dim {
            return Err(LayerError::shape(&[query.shape[0], self.input_dim], &query.shape));
        }
        if memory.shape[1] != self.memory_dim || memory.shape[0] == 0 {
            return Err(LayerError::shape(
                &[memory.shape[0].max(1), self.memory_dim],
                &memory.shape,
            ));
        }
        Ok(())
    }
}

impl<T: Scalar> Layer<T> for MemoryReadLayer<T> {
    fn name(&self) -> &'static str {
        "memory_read"
    }

    fn forward(&mut self, _input: &Tensor<T>) -> LayerResult<Tensor<T>> {
        warn!("memory_read: single-input forward rejected");
        Err(LayerError::UnsupportedOperation(
            "memory read needs a query and a memory; use forward_dual",
        ))
    }

    fn backward(&mut self, _output_gradient: &Tensor<T>) -> LayerResult<Tensor<T>> {
        warn!("memory_read: single-output backward rejected");
        Err(LayerError::UnsupportedOperation(
            "memory read has two input gradients; use backward_dual",
        ))
    }

    fn update_parameters(&mut self, learning_rate: T) -> LayerResult<()> {
        let grads = self.state.take_gradients(self.name())?;
        sgd(&mut self.w_key, &grads.w_key, learning_rate)?;
        sgd(&mut self.w_value, &grads.w_value, learning_rate)?;
        sgd(&mut self.w_output, &grads.w_output, learning_rate)?;
        sgd(&mut self.bias, &grads.bias, learning_rate)?;
        trace!("memory_read: sgd step, lr {:?}", learning_rate);
        Ok(())
    }

    fn parameters(&self) -> Vec<T> {
        params::flatten(&[&self.w_key, &self.w_value, &self.w_output, &self.bias])
    }

    fn set_parameters(&mut self, values: &[T]) -> LayerResult<()> {
        params::assign(
            &mut [
                &mut self.w_key,
                &mut self.w_value,
                &mut self.w_output,
                &mut self.bias,
            ],
            values,
        )
    }

    fn parameter_count(&self) -> usize {
        self.w_key.len() + self.w_value.len() + self.w_output.len() + self.bias.len()
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

impl<T: Scalar> DualInputLayer<T> for MemoryReadLayer<T> {
    fn forward_dual(&mut self, query: &Tensor<T>, memory: &Tensor<T>) -> LayerResult<Tensor<T>> {
        self.check_inputs(query, memory)?;
        let keys = matmul(query, &self.w_key)?;
        let scores = matmul_nt(&keys, memory)?;
        let weights = softmax(&scores);
        let read = matmul(&weights, memory)?;
        let value = matmul(&read, &self.w_value)?;
        let mut pre = matmul(&value, &self.w_output)?;
        add_channel_bias(&mut pre, &self.bias)?;
        let post = self.activation.activate(&pre);
        trace!(
            "memory_read: {} queries over {} slots -> {:?}",
            query.shape[0], memory.shape[0], post.shape
        );

        let output = post.clone();
        self.state.forwarded(ReadCache {
            query: query.clone(),
            memory: memory.clone(),
            keys,
            weights,
            read,
            value,
            pre,
            post,
        });
        Ok(output)
    }

    fn backward_dual(&mut self, output_gradient: &Tensor<T>) -> LayerResult<DualGradient<T>> {
        let c = self.state.cache(self.name())?;
        let d_pre = self.activation.backward(&c.pre, &c.post, output_gradient)?;

        // output projection
        let w_output = matmul_tn(&c.value, &d_pre)?;
        let bias = d_pre.sum_rows()?;
        let d_value = matmul_nt(&d_pre, &self.w_output)?;

        // value projection
        let w_value = matmul_tn(&c.read, &d_value)?;
        let d_read = matmul_nt(&d_value, &self.w_value)?;

        // read = weights · memory
        let d_weights = matmul_nt(&d_read, &c.memory)?;
        let mut d_memory = matmul_tn(&c.weights, &d_read)?;

        // scores = keys · memoryᵀ
        let d_scores = softmax_backward(&c.weights, &d_weights)?;
        d_memory.add_assign(&matmul_tn(&d_scores, &c.keys)?)?;
        let d_keys = matmul(&d_scores, &c.memory)?;

        // keys = query · W_key
        let w_key = matmul_tn(&c.query, &d_keys)?;
        let d_query = matmul_nt(&d_keys, &self.w_key)?;
        trace!(
            "memory_read: backward -> query {:?}, memory {:?}",
            d_query.shape, d_memory.shape
        );

        self.state.store_gradients(
            self.name(),
            ReadGradients {
                w_key,
                w_value,
                w_output,
                bias,
            },
        )?;
        Ok(DualGradient {
            first: d_query,
            second: d_memory,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init::identity;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn identity_layer(n: usize) -> MemoryReadLayer<f64> {
        MemoryReadLayer::with_weights(
            &MemoryReadConfig::new(n, n, n),
            identity(n),
            identity(n),
            identity(n),
            Tensor::zeros(vec![n]),
        )
        .unwrap()
    }

    #[test]
    fn test_single_input_calls_are_unsupported() {
        let mut layer = identity_layer(2);
        let x = Tensor::zeros(vec![1, 2]);
        assert!(matches!(layer.forward(&x), Err(LayerError::UnsupportedOperation(_))));
        assert!(matches!(layer.backward(&x), Err(LayerError::UnsupportedOperation(_))));
    }

    #[test]
    fn test_uniform_attention_on_zero_query() {
        let mut layer = identity_layer(3);
        let memory = identity::<f64>(3);
        layer.forward_dual(&Tensor::zeros(vec![1, 3]), &memory).unwrap();
        for &w in &layer.attention_weights().unwrap().data {
            assert!((w - 1.0 / 3.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_gradient_shapes_follow_inputs() {
        let cfg = MemoryReadConfig::new(3, 4, 2).with_activation(Activation::Tanh);
        let mut layer = MemoryReadLayer::<f64>::from_config(&cfg, &mut StdRng::seed_from_u64(5)).unwrap();
        let query = Tensor::from_fn(vec![2, 3], |i| i as f64 * 0.1);
        let memory = Tensor::from_fn(vec![5, 4], |i| (i as f64).cos());
        let out = layer.forward_dual(&query, &memory).unwrap();
        assert_eq!(out.shape, vec![2, 2]);
        let grads = layer.backward_dual(&Tensor::full(vec![2, 2], 1.0)).unwrap();
        assert_eq!(grads.first.shape, query.shape);
        assert_eq!(grads.second.shape, memory.shape);
    }

    #[test]
    fn test_misshaped_weights_are_rejected() {
        let err = MemoryReadLayer::<f64>::with_weights(
            &MemoryReadConfig::new(2, 3, 2),
            identity(2),
            Tensor::zeros(vec![3, 2]),
            identity(2),
            Tensor::zeros(vec![2]),
        )
        .unwrap_err();
        assert!(matches!(err, LayerError::Configuration(_)));
    }

    #[test]
    fn test_memory_width_is_checked() {
        let mut layer = identity_layer(2);
        let err = layer
            .forward_dual(&Tensor::zeros(vec![1, 2]), &Tensor::zeros(vec![4, 3]))
            .unwrap_err();
        assert!(matches!(err, LayerError::ShapeMismatch { .. }));
    }
}
