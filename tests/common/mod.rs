//! Finite-difference helpers shared by the integration tests.

#![allow(dead_code)]

use approx::relative_eq;
use briny_layers::layers::Layer;
use briny_layers::tensors::Tensor;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

/// Central-difference step.
pub const STEP: f64 = 1e-5;

pub fn rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Uniform values in `[-1, 1]`.
pub fn random_tensor(shape: &[usize], rng: &mut StdRng) -> Tensor<f64> {
    Tensor::from_fn(shape.to_vec(), |_| rng.random_range(-1.0..=1.0))
}

/// `L = Σ w ⊙ y`, so `dL/dy = w`.
pub fn weighted_sum(y: &Tensor<f64>, w: &Tensor<f64>) -> f64 {
    assert_eq!(y.shape, w.shape);
    y.data.iter().zip(&w.data).map(|(a, b)| a * b).sum()
}

/// Asserts two gradients agree to a relative error of `1e-4`.
pub fn assert_gradients_close(analytic: &[f64], numeric: &[f64], what: &str) {
    assert_eq!(analytic.len(), numeric.len(), "{what}: length");
    for (i, (&a, &n)) in analytic.iter().zip(numeric).enumerate() {
        assert!(
            relative_eq!(a, n, epsilon = 1e-7, max_relative = 1e-4),
            "{what}[{i}]: analytic {a} vs numeric {n}"
        );
    }
}

/// Derivative of `f` with respect to every element of `x`.
pub fn numeric_gradient(x: &Tensor<f64>, mut f: impl FnMut(&Tensor<f64>) -> f64) -> Vec<f64> {
    let mut nudged = x.clone();
    (0..x.len())
        .map(|i| {
            let original = nudged.data[i];
            nudged.data[i] = original + STEP;
            let plus = f(&nudged);
            nudged.data[i] = original - STEP;
            let minus = f(&nudged);
            nudged.data[i] = original;
            (plus - minus) / (2.0 * STEP)
        })
        .collect()
}

/// Derivative of `loss` with respect to every parameter of `layer`,
/// restoring the parameters afterwards.
pub fn numeric_parameter_gradient<L: Layer<f64> + ?Sized>(
    layer: &mut L,
    mut loss: impl FnMut(&mut L) -> f64,
) -> Vec<f64> {
    let base = layer.parameters();
    let mut nudged = base.clone();
    let grads = (0..base.len())
        .map(|i| {
            nudged[i] = base[i] + STEP;
            layer.set_parameters(&nudged).unwrap();
            let plus = loss(layer);
            nudged[i] = base[i] - STEP;
            layer.set_parameters(&nudged).unwrap();
            let minus = loss(layer);
            nudged[i] = base[i];
            (plus - minus) / (2.0 * STEP)
        })
        .collect();
    layer.set_parameters(&base).unwrap();
    grads
}

/// Reads the pending parameter gradients back out of a layer by applying a
/// unit-rate update from rest and diffing the parameters, then restores them.
///
/// Valid for plain SGD and for the first momentum step, where both reduce to
/// `p -= g`.
pub fn applied_parameter_gradient<L: Layer<f64> + ?Sized>(layer: &mut L) -> Vec<f64> {
    let before = layer.parameters();
    layer.update_parameters(1.0).unwrap();
    let after = layer.parameters();
    layer.set_parameters(&before).unwrap();
    before.iter().zip(&after).map(|(b, a)| b - a).collect()
}
