mod common;

use approx::assert_abs_diff_eq;
use briny_layers::activations::Activation;
use briny_layers::config::MemoryReadConfig;
use briny_layers::init::identity;
use briny_layers::layers::{DualInputLayer, Layer, LayerPhase, MemoryReadLayer};
use briny_layers::tensors::Tensor;
use briny_layers::LayerError;
use common::{random_tensor, rng};

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
fn test_sharp_query_reads_one_slot() {
    let mut layer = identity_layer(4);
    let memory = identity::<f64>(4);
    let mut query = Tensor::zeros(vec![1, 4]);
    query.data[2] = 10.0;

    let output = layer.forward_dual(&query, &memory).unwrap();
    let weights = layer.attention_weights().unwrap();
    assert!(weights.data[2] > 0.99);
    assert_abs_diff_eq!(weights.data.iter().sum::<f64>(), 1.0, epsilon = 1e-12);

    let read = layer.last_read().unwrap();
    for (j, &v) in read.data.iter().enumerate() {
        let expected = if j == 2 { 1.0 } else { 0.0 };
        assert_abs_diff_eq!(v, expected, epsilon = 1e-2);
    }
    assert_eq!(&output, read);
}

#[test]
fn test_attention_rows_are_distributions() {
    let mut r = rng(21);
    let config = MemoryReadConfig::new(3, 5, 2).with_activation(Activation::Tanh);
    let mut layer = MemoryReadLayer::<f64>::from_config(&config, &mut r).unwrap();
    let query = random_tensor(&[4, 3], &mut r);
    let memory = random_tensor(&[6, 5], &mut r);

    let output = layer.forward_dual(&query, &memory).unwrap();
    assert_eq!(output.shape, vec![4, 2]);
    let weights = layer.attention_weights().unwrap();
    assert_eq!(weights.shape, vec![4, 6]);
    for row in weights.data.chunks(6) {
        assert!(row.iter().all(|&w| w > 0.0));
        assert_abs_diff_eq!(row.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
    }
}

#[test]
fn test_large_scores_do_not_overflow() {
    let mut layer = identity_layer(2);
    let memory = Tensor::new(vec![2, 2], vec![500.0, 0.0, 0.0, 500.0]);
    let query = Tensor::new(vec![1, 2], vec![3.0, 0.0]);
    let output = layer.forward_dual(&query, &memory).unwrap();
    assert!(output.data.iter().all(|v| v.is_finite()));
    assert_abs_diff_eq!(output.data[0], 500.0, epsilon = 1e-9);
}

#[test]
fn test_gradients_have_input_shapes() {
    let mut r = rng(22);
    let mut layer = MemoryReadLayer::<f64>::from_config(&MemoryReadConfig::new(3, 4, 5), &mut r).unwrap();
    let query = random_tensor(&[2, 3], &mut r);
    let memory = random_tensor(&[7, 4], &mut r);
    let output = layer.forward_dual(&query, &memory).unwrap();
    let grads = layer.backward_dual(&Tensor::full(output.shape.clone(), 1.0)).unwrap();
    assert_eq!(grads.first.shape, query.shape);
    assert_eq!(grads.second.shape, memory.shape);
    assert_eq!(layer.phase(), LayerPhase::BackwardDone);
}

#[test]
fn test_single_input_calls_are_unsupported() {
    let mut layer = identity_layer(2);
    let x = Tensor::zeros(vec![1, 2]);
    assert!(matches!(layer.forward(&x), Err(LayerError::UnsupportedOperation(_))));
    assert!(matches!(layer.backward(&x), Err(LayerError::UnsupportedOperation(_))));
}

#[test]
fn test_lifecycle_violations() {
    let mut layer = identity_layer(2);
    let grad = Tensor::zeros(vec![1, 2]);
    assert!(matches!(layer.backward_dual(&grad), Err(LayerError::State(_))));
    assert!(matches!(layer.update_parameters(0.1), Err(LayerError::State(_))));

    let query = Tensor::new(vec![1, 2], vec![1.0, 0.0]);
    layer.forward_dual(&query, &identity(2)).unwrap();
    assert!(matches!(layer.update_parameters(0.1), Err(LayerError::State(_))));
    layer.backward_dual(&Tensor::full(vec![1, 2], 1.0)).unwrap();
    layer.update_parameters(0.1).unwrap();

    layer.reset_state();
    assert!(layer.attention_weights().is_none());
    assert!(matches!(layer.backward_dual(&grad), Err(LayerError::State(_))));
}

#[test]
fn test_mismatched_inputs_are_rejected() {
    let mut layer = identity_layer(3);
    let query = Tensor::zeros(vec![1, 3]);
    assert!(matches!(
        layer.forward_dual(&query, &Tensor::zeros(vec![4, 2])),
        Err(LayerError::ShapeMismatch { .. })
    ));
    assert!(layer.forward_dual(&Tensor::zeros(vec![1, 2]), &identity(3)).is_err());
    assert!(layer.forward_dual(&query, &Tensor::zeros(vec![0, 3])).is_err());
}

#[test]
fn test_misshaped_weights_are_rejected() {
    let config = MemoryReadConfig::new(2, 3, 2);
    let result = MemoryReadLayer::<f64>::with_weights(
        &config,
        Tensor::zeros(vec![3, 2]),
        Tensor::zeros(vec![3, 2]),
        Tensor::zeros(vec![2, 2]),
        Tensor::zeros(vec![2]),
    );
    assert!(matches!(result, Err(LayerError::Configuration(_))));
}

#[test]
fn test_update_moves_every_parameter_group() {
    let mut r = rng(23);
    let mut layer = MemoryReadLayer::<f64>::from_config(&MemoryReadConfig::new(2, 3, 2), &mut r).unwrap();
    let query = random_tensor(&[3, 2], &mut r);
    let memory = random_tensor(&[4, 3], &mut r);
    let before = layer.parameters();
    let output = layer.forward_dual(&query, &memory).unwrap();
    layer.backward_dual(&random_tensor(&output.shape, &mut r)).unwrap();
    layer.update_parameters(0.1).unwrap();
    let after = layer.parameters();

    // W_key 2x3, W_value 3x2, W_output 2x2, bias 2
    let groups = [0..6, 6..12, 12..16, 16..18];
    for group in groups {
        assert!(group.clone().any(|i| before[i] != after[i]), "{group:?} did not move");
    }
}
