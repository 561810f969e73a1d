//! Core tensor data structure and the handful of operations layers rely on.
//!
//! # Core Tensor Utilities
//!
//! A [`Tensor`] is a shape plus a flat, row-major `Vec` of elements. It
//! supports:
//! - Construction from shape + data, zeros, constants or an index function
//! - Elementwise arithmetic that checks shapes and reports
//!   [`LayerError::ShapeMismatch`]
//! - Axis-1 slicing and stacking, used to walk the time axis of sequences
//! - 2D transpose and row/column reductions
//! - Compile-time tensor literals through [`tensor!`](crate::tensor)
//!
//! ## Design Highlights
//! - Shape is a `Vec<usize>` and enforced at runtime
//! - No broadcasting; callers reshape explicitly
//! - Matrix multiplication lives in [`crate::ops::matmul`] so it can be
//!   parallelised with `rayon`
//!
//! ## Example
//!
//! ```rust
//! use briny_layers::tensors::Tensor;
//! let t = Tensor::new(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
//! assert_eq!(t.shape, vec![2, 3]);
//! ```

use crate::error::{LayerError, LayerResult};
use crate::scalar::Scalar;

/// Represents an N-dimensional tensor with a shape and flat row-major data.
///
/// - All elements must be the same type (`T`).
/// - `shape` defines the structure, e.g., `[2, 3]` for a 2×3 matrix.
/// - `data` holds the flattened content in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<T> {
    pub shape: Vec<usize>,
    pub data: Vec<T>,
}

impl<T> Tensor<T> {
    /// Creates a new tensor with the given shape and flat data.
    ///
    /// # Panics
    /// Panics if the number of elements in `data` does not match the shape product.
    pub fn new(shape: impl Into<Vec<usize>>, data: Vec<T>) -> Self {
        let shape = shape.into();
        assert_eq!(
            shape.iter().product::<usize>(),
            data.len(),
            "shape {:?} is incompatible with {} data elements",
            shape,
            data.len()
        );
        Self { shape, data }
    }

    /// Creates a tensor, reporting a shape/data mismatch as an error instead of panicking.
    ///
    /// # Errors
    /// [`LayerError::ShapeMismatch`] when `data.len()` differs from the shape product.
    pub fn try_new(shape: impl Into<Vec<usize>>, data: Vec<T>) -> LayerResult<Self> {
        let shape = shape.into();
        let expected = shape.iter().product::<usize>();
        if expected != data.len() {
            return Err(LayerError::shape(&[expected], &[data.len()]));
        }
        Ok(Self { shape, data })
    }

    /// Number of elements.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the tensor holds no elements.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of dimensions.
    #[inline]
    #[must_use]
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Replaces this tensor's data with another tensor of the same shape.
    ///
    /// # Errors
    /// [`LayerError::ShapeMismatch`] if shapes do not match.
    pub fn update(&mut self, mut other: Self) -> LayerResult<()> {
        self.ensure_shape(&other.shape)?;
        core::mem::swap(&mut self.data, &mut other.data);
        Ok(())
    }

    /// Fails unless this tensor has exactly `shape`.
    ///
    /// # Errors
    /// [`LayerError::ShapeMismatch`] naming both shapes.
    #[inline]
    pub fn ensure_shape(&self, shape: &[usize]) -> LayerResult<()> {
        if self.shape == shape {
            Ok(())
        } else {
            Err(LayerError::shape(shape, &self.shape))
        }
    }

    /// Fails unless this tensor has the given rank.
    ///
    /// # Errors
    /// [`LayerError::ShapeMismatch`]; the expected shape is reported as the rank.
    #[inline]
    pub fn ensure_rank(&self, rank: usize) -> LayerResult<()> {
        if self.shape.len() == rank {
            Ok(())
        } else {
            Err(LayerError::shape(&[rank], &[self.shape.len()]))
        }
    }

    /// Reinterprets the data under a new shape with the same element count.
    ///
    /// # Errors
    /// [`LayerError::ShapeMismatch`] if the element counts differ.
    pub fn reshape(self, shape: impl Into<Vec<usize>>) -> LayerResult<Self> {
        let shape = shape.into();
        if shape.iter().product::<usize>() != self.data.len() {
            return Err(LayerError::shape(&shape, &self.shape));
        }
        Ok(Self {
            shape,
            data: self.data,
        })
    }

    /// Row-major flat offset of a multi-index.
    ///
    /// Per-axis bounds are not checked: an index past the end of one axis
    /// aliases into the next.
    ///
    /// # Panics
    /// Panics if the index rank differs from the tensor rank.
    #[inline]
    #[must_use]
    pub fn offset(&self, idx: &[usize]) -> usize {
        assert_eq!(idx.len(), self.shape.len(), "index rank mismatch");
        let mut stride = 1;
        let mut out = 0;
        for d in (0..idx.len()).rev() {
            out += idx[d] * stride;
            stride *= self.shape[d];
        }
        out
    }
}

impl<T: Scalar> Tensor<T> {
    /// A tensor of zeros.
    #[must_use]
    pub fn zeros(shape: impl Into<Vec<usize>>) -> Self {
        Self::full(shape, T::zero())
    }

    /// A tensor filled with `value`.
    #[must_use]
    pub fn full(shape: impl Into<Vec<usize>>, value: T) -> Self {
        let shape = shape.into();
        let n = shape.iter().product();
        Self {
            shape,
            data: vec![value; n],
        }
    }

    /// Builds a tensor by evaluating `f` at every flat index.
    #[must_use]
    pub fn from_fn(shape: impl Into<Vec<usize>>, f: impl FnMut(usize) -> T) -> Self {
        let shape = shape.into();
        let n = shape.iter().product();
        Self {
            shape,
            data: (0..n).map(f).collect(),
        }
    }

    /// Element at a multi-index.
    ///
    /// # Panics
    /// Panics on a rank mismatch or when the flat offset falls outside the
    /// data.
    #[inline]
    #[must_use]
    pub fn get(&self, idx: &[usize]) -> T {
        self.data[self.offset(idx)]
    }

    /// Applies `f` to every element.
    #[must_use]
    pub fn map(&self, f: impl Fn(T) -> T) -> Self {
        Self {
            shape: self.shape.clone(),
            data: self.data.iter().map(|&x| f(x)).collect(),
        }
    }

    /// Combines two same-shaped tensors elementwise.
    ///
    /// # Errors
    /// [`LayerError::ShapeMismatch`] if shapes differ.
    pub fn zip_map(&self, other: &Self, f: impl Fn(T, T) -> T) -> LayerResult<Self> {
        other.ensure_shape(&self.shape)?;
        Ok(Self {
            shape: self.shape.clone(),
            data: self
                .data
                .iter()
                .zip(&other.data)
                .map(|(&a, &b)| f(a, b))
                .collect(),
        })
    }

    /// Elementwise sum.
    ///
    /// # Errors
    /// [`LayerError::ShapeMismatch`] if shapes differ.
    pub fn add(&self, other: &Self) -> LayerResult<Self> {
        self.zip_map(other, |a, b| a + b)
    }

    /// Elementwise difference.
    ///
    /// # Errors
    /// [`LayerError::ShapeMismatch`] if shapes differ.
    pub fn sub(&self, other: &Self) -> LayerResult<Self> {
        self.zip_map(other, |a, b| a - b)
    }

    /// Elementwise (Hadamard) product.
    ///
    /// # Errors
    /// [`LayerError::ShapeMismatch`] if shapes differ.
    pub fn mul(&self, other: &Self) -> LayerResult<Self> {
        self.zip_map(other, |a, b| a * b)
    }

    /// In-place `self += other`.
    ///
    /// # Errors
    /// [`LayerError::ShapeMismatch`] if shapes differ.
    pub fn add_assign(&mut self, other: &Self) -> LayerResult<()> {
        other.ensure_shape(&self.shape)?;
        for (a, &b) in self.data.iter_mut().zip(&other.data) {
            *a = *a + b;
        }
        Ok(())
    }

    /// Multiplies every element by `factor`.
    #[must_use]
    pub fn scale(&self, factor: T) -> Self {
        self.map(|x| x * factor)
    }

    /// Sum of all elements.
    #[must_use]
    pub fn sum(&self) -> T {
        self.data.iter().fold(T::zero(), |acc, &x| acc + x)
    }

    /// Sums a 2D tensor over its rows, producing one value per column.
    ///
    /// # Errors
    /// [`LayerError::ShapeMismatch`] if the tensor is not 2D.
    pub fn sum_rows(&self) -> LayerResult<Self> {
        self.ensure_rank(2)?;
        let cols = self.shape[1];
        let mut out = vec![T::zero(); cols];
        for row in self.data.chunks(cols.max(1)) {
            for (o, &v) in out.iter_mut().zip(row) {
                *o = *o + v;
            }
        }
        Ok(Self::new(vec![cols], out))
    }

    /// Transposes a 2D tensor.
    ///
    /// # Errors
    /// [`LayerError::ShapeMismatch`] if the tensor is not 2D.
    pub fn transpose(&self) -> LayerResult<Self> {
        self.ensure_rank(2)?;
        let (rows, cols) = (self.shape[0], self.shape[1]);
        let mut out = vec![T::zero(); rows * cols];
        for r in 0..rows {
            for c in 0..cols {
                out[c * rows + r] = self.data[r * cols + c];
            }
        }
        Ok(Self::new(vec![cols, rows], out))
    }

    /// Removes axis 1 by selecting index `t` along it.
    ///
    /// For a sequence `[batch, time, ...]` this yields the `[batch, ...]` slice
    /// at step `t`.
    ///
    /// # Errors
    /// [`LayerError::ShapeMismatch`] if the tensor has fewer than two axes or
    /// `t` is out of range.
    pub fn select_axis1(&self, t: usize) -> LayerResult<Self> {
        if self.shape.len() < 2 || t >= self.shape[1] {
            return Err(LayerError::shape(&[t + 1], &self.shape));
        }
        let outer = self.shape[0];
        let steps = self.shape[1];
        let inner: usize = self.shape[2..].iter().product();
        let mut data = Vec::with_capacity(outer * inner);
        for b in 0..outer {
            let start = (b * steps + t) * inner;
            data.extend_from_slice(&self.data[start..start + inner]);
        }
        let mut shape = vec![outer];
        shape.extend_from_slice(&self.shape[2..]);
        Ok(Self::new(shape, data))
    }

    /// Stacks same-shaped `[batch, ...]` tensors into `[batch, n, ...]`.
    ///
    /// Inverse of repeated [`Tensor::select_axis1`].
    ///
    /// # Errors
    /// [`LayerError::ShapeMismatch`] if `slices` is empty or shapes disagree.
    pub fn stack_axis1(slices: &[Self]) -> LayerResult<Self> {
        let first = slices
            .first()
            .ok_or_else(|| LayerError::shape(&[1], &[0]))?;
        if first.shape.is_empty() {
            return Err(LayerError::shape(&[1], &[]));
        }
        for s in slices {
            s.ensure_shape(&first.shape)?;
        }
        let outer = first.shape[0];
        let inner: usize = first.shape[1..].iter().product();
        let steps = slices.len();
        let mut data = vec![T::zero(); outer * steps * inner];
        for (t, s) in slices.iter().enumerate() {
            for b in 0..outer {
                let dst = (b * steps + t) * inner;
                data[dst..dst + inner].copy_from_slice(&s.data[b * inner..(b + 1) * inner]);
            }
        }
        let mut shape = vec![outer, steps];
        shape.extend_from_slice(&first.shape[1..]);
        Ok(Self::new(shape, data))
    }

    /// Largest absolute elementwise difference against `other`.
    ///
    /// # Errors
    /// [`LayerError::ShapeMismatch`] if shapes differ.
    pub fn max_abs_diff(&self, other: &Self) -> LayerResult<T> {
        other.ensure_shape(&self.shape)?;
        Ok(self
            .data
            .iter()
            .zip(&other.data)
            .fold(T::zero(), |acc, (&a, &b)| acc.max((a - b).abs())))
    }
}

/// Defines a tensor from nested literal arrays.
///
/// Supports arbitrary dimensionality as long as sublists are uniform in shape.
///
/// # Example
/// ```
/// use briny_layers::tensor;
/// let t: briny_layers::tensors::Tensor<f64> = tensor!([[1.0, 2.0], [3.0, 4.0]]);
/// assert_eq!(t.shape, vec![2, 2]);
/// ```
#[macro_export]
macro_rules! tensor {
    ($lit:literal) => {
        $crate::tensors::Tensor::new(Vec::<usize>::new(), vec![$lit])
    };

    ([ $( $inner:tt ),+ $(,)? ]) => {{
        let children = vec![ $( $crate::tensor!($inner) ),+ ];
        let first_shape = children[0].shape.clone();
        assert!(children.iter().all(|c| c.shape == first_shape),
            "ragged tensor literal (rows have mismatched shapes)");
        let mut shape = vec![children.len()];
        shape.extend_from_slice(&first_shape);
        let mut data = Vec::with_capacity(children.len() * children[0].data.len());
        for c in children { data.extend(c.data); }
        $crate::tensors::Tensor::new(shape, data)
    }};
}
