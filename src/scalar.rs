//! Numeric field abstraction shared by every layer.
//!
//! Layers are generic over a [`Scalar`], which is any [`num_traits::Float`]
//! that can also cross the `f64` boundary losslessly enough for constants
//! (momentum, epsilon, initialisation limits) to be written once.
//!
//! Both `f32` and `f64` are supported. Gradient checks in the test-suite run
//! in `f64`; training code usually picks `f32`.

use core::fmt::Debug;
use num_traits::Float;

/// Conversions between primitive floats and the element type of a tensor.
pub trait Scalar: Float + Debug + Default + Send + Sync + 'static {
    /// Convert from `f64`.
    fn from_f64(x: f64) -> Self;

    /// Convert to `f64`.
    fn into_f64(self) -> f64;

    /// Convert from a count, used for means and fan-in/fan-out.
    #[inline]
    #[allow(clippy::cast_precision_loss)]
    fn from_usize(n: usize) -> Self {
        Self::from_f64(n as f64)
    }
}

impl Scalar for f32 {
    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    fn from_f64(x: f64) -> Self {
        x as Self
    }

    #[inline]
    fn into_f64(self) -> f64 {
        f64::from(self)
    }
}

impl Scalar for f64 {
    #[inline]
    fn from_f64(x: Self) -> Self {
        x
    }

    #[inline]
    fn into_f64(self) -> Self {
        self
    }
}

/// Logistic sigmoid, `1 / (1 + e^-x)`.
#[inline]
pub fn sigmoid<T: Scalar>(x: T) -> T {
    T::one() / (T::one() + (-x).exp())
}
