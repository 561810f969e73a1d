mod common;

use briny_layers::activations::Activation;
use briny_layers::config::ConvConfig;
use briny_layers::layers::{
    ActivationLayer, ConvolutionalLayer, CroppingLayer, DualInputLayer, Layer, LayerPhase,
    LogVarianceLayer, MaxPoolingLayer, MultiplyLayer, PositionalEncodingLayer, ResidualLayer,
    SplitLayer, TimeDistributedLayer,
};
use briny_layers::tensors::Tensor;
use briny_layers::LayerError;
use common::{random_tensor, rng};

fn entry(layer: impl Layer<f64> + 'static, shape: &[usize]) -> (Box<dyn Layer<f64>>, Vec<usize>) {
    (Box::new(layer), shape.to_vec())
}

/// Every stateless layer paired with an input it accepts.
fn stateless_layers() -> Vec<(Box<dyn Layer<f64>>, Vec<usize>)> {
    vec![
        entry(MaxPoolingLayer::new(2, 2).unwrap(), &[1, 4, 4, 2]),
        entry(CroppingLayer::symmetric(1), &[2, 5, 5, 1]),
        entry(ActivationLayer::new(Activation::Sigmoid), &[3, 4]),
        entry(SplitLayer::new(2).unwrap(), &[3, 6]),
        entry(PositionalEncodingLayer::new(8, 4).unwrap(), &[2, 5, 4]),
        entry(LogVarianceLayer::new(1), &[2, 6]),
        entry(ResidualLayer::identity(Activation::Relu), &[2, 3]),
    ]
}

#[test]
fn test_stateless_layers_follow_the_contract() {
    let mut r = rng(31);
    for (mut layer, shape) in stateless_layers() {
        let name = layer.name();
        assert!(!layer.supports_training(), "{name}");
        assert_eq!(layer.parameter_count(), 0, "{name}");
        assert!(layer.parameters().is_empty(), "{name}");
        layer.set_parameters(&[]).unwrap();
        assert!(
            matches!(layer.set_parameters(&[1.0]), Err(LayerError::Configuration(_))),
            "{name}"
        );

        let input = random_tensor(&shape, &mut r);
        assert!(matches!(layer.backward(&input), Err(LayerError::State(_))), "{name}");
        let output = layer.forward(&input).unwrap();
        assert!(matches!(layer.update_parameters(0.1), Err(LayerError::State(_))), "{name}");
        let grad = layer.backward(&Tensor::full(output.shape.clone(), 1.0)).unwrap();
        assert_eq!(grad.shape, input.shape, "{name}");
        layer.update_parameters(0.1).unwrap();

        layer.reset_state();
        layer.reset_state();
        assert_eq!(layer.phase(), LayerPhase::Idle, "{name}");
    }
}

#[test]
fn test_max_pool_routes_gradient_to_winner() {
    let mut pool = MaxPoolingLayer::new(2, 2).unwrap();
    let input = Tensor::new(
        vec![1, 2, 4, 1],
        vec![1.0, 5.0, 2.0, 0.0, 3.0, 4.0, 8.0, 7.0],
    );
    let out: Tensor<f64> = pool.forward(&input).unwrap();
    assert_eq!(out.shape, vec![1, 1, 2, 1]);
    assert_eq!(out.data, vec![5.0, 8.0]);
    let grad = pool.backward(&Tensor::new(vec![1, 1, 2, 1], vec![1.0, 2.0])).unwrap();
    assert_eq!(grad.data, vec![0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 2.0, 0.0]);
}

#[test]
fn test_crop_then_pad_gradient() {
    let mut crop = CroppingLayer::new(1, 0, 0, 1);
    let input = Tensor::from_fn(vec![1, 3, 3, 1], |i| i as f64);
    let out: Tensor<f64> = crop.forward(&input).unwrap();
    assert_eq!(out.shape, vec![1, 2, 2, 1]);
    assert_eq!(out.data, vec![3.0, 4.0, 6.0, 7.0]);
    let grad = crop.backward(&Tensor::full(vec![1, 2, 2, 1], 1.0)).unwrap();
    assert_eq!(grad.data, vec![0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 1.0, 1.0, 0.0]);
}

#[test]
fn test_crop_larger_than_input_is_rejected() {
    let mut crop = CroppingLayer::symmetric(2);
    let result: Result<Tensor<f64>, _> = crop.forward(&Tensor::zeros(vec![1, 4, 6, 1]));
    assert!(matches!(result, Err(LayerError::ShapeMismatch { .. })));
}

#[test]
fn test_split_requires_even_groups() {
    let mut split = SplitLayer::new(4).unwrap();
    let result: Result<Tensor<f64>, _> = split.forward(&Tensor::zeros(vec![2, 6]));
    assert!(matches!(result, Err(LayerError::Configuration(_))));
    assert!(SplitLayer::new(0).is_err());
}

#[test]
fn test_multiply_gradients_swap_operands() {
    let mut layer = MultiplyLayer::<f64>::new();
    let a = Tensor::new(vec![1, 3], vec![1.0, 2.0, 3.0]);
    let b = Tensor::new(vec![1, 3], vec![4.0, 5.0, 6.0]);
    assert_eq!(layer.forward_dual(&a, &b).unwrap().data, vec![4.0, 10.0, 18.0]);
    let grads = layer.backward_dual(&Tensor::full(vec![1, 3], 2.0)).unwrap();
    assert_eq!(grads.first.data, vec![8.0, 10.0, 12.0]);
    assert_eq!(grads.second.data, vec![2.0, 4.0, 6.0]);
    assert!(matches!(layer.forward(&a), Err(LayerError::UnsupportedOperation(_))));
    assert!(layer.forward_dual(&a, &Tensor::zeros(vec![1, 2])).is_err());
}

#[test]
fn test_residual_adds_the_skip_gradient() {
    let cfg = ConvConfig::new(4, 4, 2, 3, 2).with_padding(1);
    let conv = ConvolutionalLayer::<f64>::from_config(&cfg, &mut rng(32)).unwrap();
    let conv_params = conv.parameters();
    let mut block = ResidualLayer::<f64>::new(Box::new(conv), Activation::Identity);
    assert!(block.supports_training());
    assert_eq!(block.parameters(), conv_params);

    let input = random_tensor(&[1, 4, 4, 2], &mut rng(33));
    let mut reference = ConvolutionalLayer::<f64>::from_config(&cfg, &mut rng(32)).unwrap();
    let out = block.forward(&input).unwrap();
    let inner_out = reference.forward(&input).unwrap();
    assert!(out.max_abs_diff(&input.add(&inner_out).unwrap()).unwrap() < 1e-12);

    let g = random_tensor(&out.shape, &mut rng(34));
    let grad = block.backward(&g).unwrap();
    let inner_grad = reference.backward(&g).unwrap();
    assert!(grad.max_abs_diff(&g.add(&inner_grad).unwrap()).unwrap() < 1e-12);

    block.update_parameters(0.1).unwrap();
    assert_ne!(block.parameters(), conv_params);
}

#[test]
fn test_time_distributed_matches_per_step_application() {
    let cfg = ConvConfig::new(3, 3, 1, 2, 2);
    let mut wrapped = TimeDistributedLayer::<f64>::new(Box::new(
        ConvolutionalLayer::<f64>::from_config(&cfg, &mut rng(35)).unwrap(),
    ));
    let mut single = ConvolutionalLayer::<f64>::from_config(&cfg, &mut rng(35)).unwrap();

    let input = random_tensor(&[2, 3, 3, 3, 1], &mut rng(36));
    let out = wrapped.forward(&input).unwrap();
    assert_eq!(out.shape, vec![2, 3, 2, 2, 2]);
    for t in 0..3 {
        let expected = single.forward(&input.select_axis1(t).unwrap()).unwrap();
        let got = out.select_axis1(t).unwrap();
        assert!(got.max_abs_diff(&expected).unwrap() < 1e-12);
    }

    let grad = wrapped.backward(&Tensor::full(out.shape.clone(), 1.0)).unwrap();
    assert_eq!(grad.shape, input.shape);
    assert_eq!(wrapped.parameter_count(), single.parameter_count());
    assert!(wrapped.supports_training());
}

#[test]
fn test_positional_encoding_is_additive() {
    let mut layer = PositionalEncodingLayer::<f64>::new(6, 4).unwrap();
    let input = random_tensor(&[2, 3, 4], &mut rng(37));
    let out = layer.forward(&input).unwrap();
    let offset = out.sub(&input).unwrap();
    let table = &layer.encoding().data[..12];
    assert!(offset.data[..12].iter().zip(table).all(|(a, b)| (a - b).abs() < 1e-12));
    assert!(offset.data[12..].iter().zip(table).all(|(a, b)| (a - b).abs() < 1e-12));
    assert!(matches!(
        layer.forward(&Tensor::zeros(vec![1, 3, 5])),
        Err(LayerError::ShapeMismatch { .. })
    ));
}
