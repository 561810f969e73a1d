//! Weight initialisation.
//!
//! Every constructor takes the random source explicitly, so two layers built
//! from generators seeded the same way hold identical weights.

use crate::scalar::Scalar;
use crate::tensors::Tensor;
use rand::Rng;

/// Glorot/Xavier uniform initialisation: samples from `[-limit, limit]`
/// where `limit = sqrt(6 / (fan_in + fan_out))`.
pub fn glorot_uniform<T: Scalar, R: Rng + ?Sized>(
    shape: impl Into<Vec<usize>>,
    fan_in: usize,
    fan_out: usize,
    rng: &mut R,
) -> Tensor<T> {
    #[allow(clippy::cast_precision_loss)]
    let limit = (6.0 / (fan_in + fan_out).max(1) as f64).sqrt();
    Tensor::from_fn(shape, |_| T::from_f64(rng.random_range(-limit..=limit)))
}

/// Square identity matrix `[n, n]`.
#[must_use]
pub fn identity<T: Scalar>(n: usize) -> Tensor<T> {
    Tensor::from_fn(vec![n, n], |i| {
        if i / n == i % n { T::one() } else { T::zero() }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_glorot_bounds() {
        let mut rng = StdRng::seed_from_u64(42);
        let w: Tensor<f64> = glorot_uniform(vec![3, 3, 1, 8], 9, 72, &mut rng);
        let limit = (6.0f64 / 81.0).sqrt();
        assert!(w.data.iter().all(|&x| x.abs() <= limit));
    }

    #[test]
    fn test_glorot_is_reproducible() {
        let a: Tensor<f32> = glorot_uniform(vec![4, 4], 4, 4, &mut StdRng::seed_from_u64(7));
        let b: Tensor<f32> = glorot_uniform(vec![4, 4], 4, 4, &mut StdRng::seed_from_u64(7));
        assert_eq!(a, b);
    }

    #[test]
    fn test_identity() {
        let i: Tensor<f64> = identity(3);
        assert_eq!(i.data, vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]);
    }
}
