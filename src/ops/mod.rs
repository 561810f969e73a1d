//! # Differentiable Kernels
//!
//! Pure functions shared by the layers. Each forward kernel has a matching
//! gradient function next to it; none of them hold state.
//!
//! ## Submodules
//!
//! - [`conv`]: strided 2D convolution with implicit zero padding, plus the
//!   kernel, input and bias gradients
//! - [`matmul`]: 2D matrix products, including the transposed variants used
//!   by backward passes
//! - [`softmax`]: last-axis softmax and its Jacobian-vector product
//!
//! ## Parallelism
//!
//! Convolution and matrix multiplication split their outputs into
//! write-disjoint chunks and fill them on the `rayon` thread pool. Results
//! match a sequential loop up to floating point reassociation.
//!
//! ## Example
//!
//! ```rust
//! use briny_layers::ops::conv::{conv2d, Conv2dGeometry};
//! use briny_layers::tensors::Tensor;
//!
//! let input = Tensor::new(vec![1, 2, 2, 1], vec![1.0, 2.0, 3.0, 4.0]);
//! let kernel = Tensor::new(vec![1, 1, 1, 1], vec![2.0]);
//! let out = conv2d(&input, &kernel, Conv2dGeometry::default()).unwrap();
//! assert_eq!(out.data, vec![2.0, 4.0, 6.0, 8.0]);
//! ```

pub mod conv;
pub mod matmul;
pub mod softmax;
