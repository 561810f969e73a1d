//! briny_layers: hand-differentiated neural network layers in Rust.
//!
//! Every layer computes its own gradients. There is no autograd graph: a
//! layer caches what it needs during `forward`, turns an output gradient into
//! an input gradient during `backward`, and applies its parameter gradients in
//! `update_parameters`.
//!
//! # Features
//!
//! - Direct strided 2D convolution with implicit zero padding and both of its
//!   gradients, parallelised with `rayon`.
//! - A convolutional LSTM with backpropagation through time and momentum
//!   updates.
//! - An attention memory-read layer that returns separate gradients for its
//!   query and memory inputs.
//! - Pooling, cropping, activation, split, multiply, residual,
//!   time-distributed, positional-encoding and log-variance layers.
//! - JSON layer configurations via `serde`.
//!
//! # Modules
//!
//! - [`tensors`]: Core tensor data structure and operations.
//! - [`ops`]: Convolution, matrix product and softmax kernels with gradients.
//! - [`layers`]: The [`Layer`](layers::Layer) contract and every layer.
//! - [`config`]: Layer configurations and JSON loading.
//! - [`activations`]: Activation functions and their derivatives.
//! - [`optim`]: SGD and momentum steps.
//! - [`init`]: Weight initialisation from an injected RNG.
//! - [`error`]: The [`LayerError`](error::LayerError) taxonomy.
//! - [`scalar`]: The `f32`/`f64` element abstraction.
//!
//! # Logging
//!
//! Layers log through the `log` facade: construction at `debug`, every
//! forward, backward and update at `trace`, and lifecycle violations at
//! `warn`. No logger is installed by the library.
//!
//! # Example
//!
//! ```rust
//! use briny_layers::config::ConvLstmConfig;
//! use briny_layers::layers::{ConvLstmLayer, Layer};
//! use briny_layers::tensors::Tensor;
//! use rand::SeedableRng;
//!
//! let mut rng = rand::rngs::StdRng::seed_from_u64(42);
//! let config = ConvLstmConfig::new(4, 4, 1, 3, 2).with_padding(1);
//! let mut cell = ConvLstmLayer::<f64>::from_config(&config, &mut rng).unwrap();
//!
//! let input = Tensor::zeros(vec![1, 2, 4, 4, 1]);
//! let output = cell.forward(&input).unwrap();
//! assert_eq!(output.shape, vec![1, 2, 4, 4, 2]);
//!
//! cell.backward(&Tensor::full(output.shape.clone(), 1.0)).unwrap();
//! cell.update_parameters(0.01).unwrap();
//! ```

pub mod activations;
pub mod config;
pub mod error;
pub mod init;
pub mod layers;
pub mod ops;
pub mod optim;
pub mod scalar;
pub mod tensors;

pub use error::{LayerError, LayerResult};
pub use scalar::Scalar;
pub use tensors::Tensor;
