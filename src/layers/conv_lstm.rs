//! Convolutional LSTM.
//!
//! Every gate is a pair of convolutions, one over the current frame and one
//! over the previous hidden state:
//!
//! ```text
//! f  = σ(conv(x_t, W_fi) + conv(h_{t-1}, W_fh) + b_f)
//! i  = σ(conv(x_t, W_ii) + conv(h_{t-1}, W_ih) + b_i)
//! c~ = φ(conv(x_t, W_ci) + conv(h_{t-1}, W_ch) + b_c)
//! o  = σ(conv(x_t, W_oi) + conv(h_{t-1}, W_oh) + b_o)
//! c_t = f ⊙ c_{t-1} + i ⊙ c~
//! h_t = o ⊙ φ(c_t)
//! ```
//!
//! Input-side kernels use the configured padding and stride. Hidden-side
//! kernels always use stride 1 and padding `k / 2`, so `h` keeps the output
//! spatial shape. `h` and `c` start at zero for each sequence.
//!
//! Backward is full backpropagation through time. The gradient carried out of
//! step 0 towards the (constant zero) initial state is discarded.
//!
//! Parameters update with momentum 0.9; the velocity buffers survive
//! [`Layer::reset_state`].

use super::lifecycle::{LayerPhase, Lifecycle};
use super::{Layer, params};
use crate::activations::Activation;
use crate::config::{ConvLstmConfig, LayerConfig};
use crate::error::{LayerError, LayerResult};
use crate::init::glorot_uniform;
use crate::ops::conv::{
    Conv2dGeometry, add_channel_bias, conv2d, conv2d_bias_grad, conv2d_input_grad,
    conv2d_kernel_grad,
};
use crate::optim::{MOMENTUM, momentum};
use crate::scalar::{Scalar, sigmoid};
use crate::tensors::Tensor;
use log::{debug, trace};
use rand::Rng;

/// Number of gates: forget, input, candidate, output.
const GATES: usize = 4;

/// The twelve tensors of a ConvLSTM cell.
///
/// The same record holds parameters, their gradients and their momentum
/// buffers. Field order is the flat parameter order.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvLstmParams<T> {
    /// Forget gate, input side `[k, k, c_in, filters]`.
    pub w_fi: Tensor<T>,
    /// Input gate, input side.
    pub w_ii: Tensor<T>,
    /// Candidate, input side.
    pub w_ci: Tensor<T>,
    /// Output gate, input side.
    pub w_oi: Tensor<T>,
    /// Forget gate, hidden side `[k, k, filters, filters]`.
    pub w_fh: Tensor<T>,
    /// Input gate, hidden side.
    pub w_ih: Tensor<T>,
    /// Candidate, hidden side.
    pub w_ch: Tensor<T>,
    /// Output gate, hidden side.
    pub w_oh: Tensor<T>,
    /// Forget gate bias `[filters]`.
    pub b_f: Tensor<T>,
    /// Input gate bias.
    pub b_i: Tensor<T>,
    /// Candidate bias.
    pub b_c: Tensor<T>,
    /// Output gate bias.
    pub b_o: Tensor<T>,
}

impl<T: Scalar> ConvLstmParams<T> {
    /// All-zero tensors shaped for the given cell.
    #[must_use]
    pub fn zeros(kernel_size: usize, in_channels: usize, filters: usize) -> Self {
        let wi = || Tensor::zeros(vec![kernel_size, kernel_size, in_channels, filters]);
        let wh = || Tensor::zeros(vec![kernel_size, kernel_size, filters, filters]);
        let b = || Tensor::zeros(vec![filters]);
        Self {
            w_fi: wi(),
            w_ii: wi(),
            w_ci: wi(),
            w_oi: wi(),
            w_fh: wh(),
            w_ih: wh(),
            w_ch: wh(),
            w_oh: wh(),
            b_f: b(),
            b_i: b(),
            b_c: b(),
            b_o: b(),
        }
    }

    fn glorot<R: Rng + ?Sized>(kernel_size: usize, in_channels: usize, filters: usize, rng: &mut R) -> Self {
        let area = kernel_size * kernel_size;
        let mut wi = || {
            glorot_uniform(
                vec![kernel_size, kernel_size, in_channels, filters],
                area * in_channels,
                area * filters,
                rng,
            )
        };
        let (w_fi, w_ii, w_ci, w_oi) = (wi(), wi(), wi(), wi());
        let mut wh = || {
            glorot_uniform(
                vec![kernel_size, kernel_size, filters, filters],
                area * filters,
                area * filters,
                rng,
            )
        };
        let (w_fh, w_ih, w_ch, w_oh) = (wh(), wh(), wh(), wh());
        let b = || Tensor::zeros(vec![filters]);
        Self {
            w_fi,
            w_ii,
            w_ci,
            w_oi,
            w_fh,
            w_ih,
            w_ch,
            w_oh,
            b_f: b(),
            b_i: b(),
            b_c: b(),
            b_o: b(),
        }
    }

    /// Borrows the tensors in parameter order.
    #[must_use]
    pub fn tensors(&self) -> [&Tensor<T>; 12] {
        [
            &self.w_fi, &self.w_ii, &self.w_ci, &self.w_oi, &self.w_fh, &self.w_ih, &self.w_ch,
            &self.w_oh, &self.b_f, &self.b_i, &self.b_c, &self.b_o,
        ]
    }

    /// Mutably borrows the tensors in parameter order.
    pub fn tensors_mut(&mut self) -> [&mut Tensor<T>; 12] {
        [
            &mut self.w_fi,
            &mut self.w_ii,
            &mut self.w_ci,
            &mut self.w_oi,
            &mut self.w_fh,
            &mut self.w_ih,
            &mut self.w_ch,
            &mut self.w_oh,
            &mut self.b_f,
            &mut self.b_i,
            &mut self.b_c,
            &mut self.b_o,
        ]
    }

    /// `(input kernel, hidden kernel, bias)` of gate `g` in f, i, c, o order.
    fn gate(&self, g: usize) -> (&Tensor<T>, &Tensor<T>, &Tensor<T>) {
        match g {
            0 => (&self.w_fi, &self.w_fh, &self.b_f),
            1 => (&self.w_ii, &self.w_ih, &self.b_i),
            2 => (&self.w_ci, &self.w_ch, &self.b_c),
            _ => (&self.w_oi, &self.w_oh, &self.b_o),
        }
    }

    fn gate_mut(&mut self, g: usize) -> (&mut Tensor<T>, &mut Tensor<T>, &mut Tensor<T>) {
        match g {
            0 => (&mut self.w_fi, &mut self.w_fh, &mut self.b_f),
            1 => (&mut self.w_ii, &mut self.w_ih, &mut self.b_i),
            2 => (&mut self.w_ci, &mut self.w_ch, &mut self.b_c),
            _ => (&mut self.w_oi, &mut self.w_oh, &mut self.b_o),
        }
    }

    fn element_count(&self) -> usize {
        self.tensors().iter().map(|t| t.len()).sum()
    }

    fn shapes(&self) -> Vec<Vec<usize>> {
        self.tensors().iter().map(|t| t.shape.clone()).collect()
    }
}

/// Everything one time step needs during BPTT.
#[derive(Debug)]
struct StepCache<T> {
    x: Tensor<T>,
    h_prev: Tensor<T>,
    c_prev: Tensor<T>,
    /// Activated gates in f, i, c~, o order.
    gates: [Tensor<T>; GATES],
    /// Candidate pre-activation, needed by φ' for non-saturating φ.
    candidate_pre: Tensor<T>,
    c: Tensor<T>,
    c_squashed: Tensor<T>,
    h: Tensor<T>,
}

#[derive(Debug)]
struct SequenceCache<T> {
    input_shape: Vec<usize>,
    output_shape: Vec<usize>,
    steps: Vec<StepCache<T>>,
}

/// Convolutional LSTM over `[batch, time, height, width, channels]`.
#[derive(Debug)]
pub struct ConvLstmLayer<T: Scalar> {
    input_hwc: [usize; 3],
    output_hwc: [usize; 3],
    input_geometry: Conv2dGeometry,
    hidden_geometry: Conv2dGeometry,
    activation: Activation,
    params: ConvLstmParams<T>,
    velocity: ConvLstmParams<T>,
    state: Lifecycle<SequenceCache<T>, ConvLstmParams<T>>,
}

impl<T: Scalar> ConvLstmLayer<T> {
    /// Builds a cell with Glorot-uniform kernels and zero biases.
    ///
    /// # Errors
    /// [`LayerError::Configuration`] if the configuration is invalid.
    pub fn from_config<R: Rng + ?Sized>(config: &ConvLstmConfig, rng: &mut R) -> LayerResult<Self> {
        config.validate()?;
        let params = ConvLstmParams::glorot(config.kernel_size, config.input_channels, config.filters, rng);
        Self::with_params(config, params)
    }

    /// Builds a cell from explicit parameters.
    ///
    /// # Errors
    /// [`LayerError::Configuration`] if the configuration is invalid or any
    /// tensor is misshaped.
    pub fn with_params(config: &ConvLstmConfig, params: ConvLstmParams<T>) -> LayerResult<Self> {
        config.validate()?;
        let velocity = ConvLstmParams::zeros(config.kernel_size, config.input_channels, config.filters);
        if params.shapes() != velocity.shapes() {
            return Err(LayerError::config(format!(
                "parameter shapes {:?} do not match kernel {} with {} input channels and {} filters",
                params.shapes(),
                config.kernel_size,
                config.input_channels,
                config.filters
            )));
        }
        let (out_h, out_w) = config.output_hw()?;
        let layer = Self {
            input_hwc: [config.input_height, config.input_width, config.input_channels],
            output_hwc: [out_h, out_w, config.filters],
            input_geometry: config.input_geometry(),
            hidden_geometry: config.hidden_geometry(),
            activation: config.activation,
            params,
            velocity,
            state: Lifecycle::default(),
        };
        debug!(
            "conv_lstm: frames {:?} -> hidden {:?}, {} parameters",
            layer.input_hwc,
            layer.output_hwc,
            layer.parameter_count()
        );
        Ok(layer)
    }

    /// Per-frame output shape `[out_h, out_w, filters]`.
    #[must_use]
    pub const fn output_shape(&self) -> [usize; 3] {
        self.output_hwc
    }

    /// Current parameters.
    #[must_use]
    pub const fn params(&self) -> &ConvLstmParams<T> {
        &self.params
    }

    /// Current momentum buffers.
    #[must_use]
    pub const fn velocity(&self) -> &ConvLstmParams<T> {
        &self.velocity
    }

    /// Gradients of the last backward pass, if they have not been applied yet.
    #[must_use]
    pub fn pending_gradients(&self) -> Option<&ConvLstmParams<T>> {
        match &self.state {
            Lifecycle::Backpropagated(_, grads) => Some(grads),
            _ => None,
        }
    }

    /// One momentum step with the given gradients:
    /// `v = 0.9·v + lr·g; p -= v` for every tensor.
    ///
    /// # Errors
    /// [`LayerError::ShapeMismatch`] if any gradient is misshaped.
    pub fn apply_gradients(&mut self, grads: &ConvLstmParams<T>, learning_rate: T) -> LayerResult<()> {
        let beta = T::from_f64(MOMENTUM);
        for ((p, v), g) in self
            .params
            .tensors_mut()
            .into_iter()
            .zip(self.velocity.tensors_mut())
            .zip(grads.tensors())
        {
            momentum(p, v, g, learning_rate, beta)?;
        }
        Ok(())
    }

    fn check_input(&self, input: &Tensor<T>) -> LayerResult<()> {
        input.ensure_rank(5)?;
        if input.shape[2..] != self.input_hwc || input.shape[1] == 0 {
            let mut expected = vec![input.shape[0], input.shape[1].max(1)];
            expected.extend_from_slice(&self.input_hwc);
            return Err(LayerError::shape(&expected, &input.shape));
        }
        Ok(())
    }

    fn gate_pre(&self, g: usize, x: &Tensor<T>, h_prev: &Tensor<T>) -> LayerResult<Tensor<T>> {
        let (w_x, w_h, b) = self.params.gate(g);
        let mut pre = conv2d(x, w_x, self.input_geometry)?;
        pre.add_assign(&conv2d(h_prev, w_h, self.hidden_geometry)?)?;
        add_channel_bias(&mut pre, b)?;
        Ok(pre)
    }

    /// Runs the cell for a single frame.
    fn forward_step(&self, x: Tensor<T>, h_prev: Tensor<T>, c_prev: Tensor<T>) -> LayerResult<StepCache<T>> {
        let phi = self.activation;
        let forget = self.gate_pre(0, &x, &h_prev)?.map(sigmoid);
        let input = self.gate_pre(1, &x, &h_prev)?.map(sigmoid);
        let candidate_pre = self.gate_pre(2, &x, &h_prev)?;
        let candidate = phi.activate(&candidate_pre);
        let output = self.gate_pre(3, &x, &h_prev)?.map(sigmoid);

        let c = forget.mul(&c_prev)?.add(&input.mul(&candidate)?)?;
        let c_squashed = phi.activate(&c);
        let h = output.mul(&c_squashed)?;

        Ok(StepCache {
            x,
            h_prev,
            c_prev,
            gates: [forget, input, candidate, output],
            candidate_pre,
            c,
            c_squashed,
            h,
        })
    }

    /// Pre-activation gradients of the four gates for one step, plus the
    /// cell-state gradient flowing to the previous step.
    fn step_gate_gradients(
        &self,
        step: &StepCache<T>,
        dh: &Tensor<T>,
        dc_next: &Tensor<T>,
    ) -> LayerResult<([Tensor<T>; GATES], Tensor<T>)> {
        dh.ensure_shape(&step.h.shape)?;
        dc_next.ensure_shape(&step.c.shape)?;
        let phi = self.activation;
        let one = T::one();
        let n = step.c.len();
        let shape = step.c.shape.clone();
        let [f, i, g, o] = &step.gates;

        let mut d_pre: [Vec<T>; GATES] = core::array::from_fn(|_| vec![T::zero(); n]);
        let mut dc_prev = vec![T::zero(); n];
        for k in 0..n {
            let (fk, ik, gk, ok) = (f.data[k], i.data[k], g.data[k], o.data[k]);
            let squashed = step.c_squashed.data[k];
            let d_o = dh.data[k] * squashed;
            let d_c = dh.data[k] * ok * phi.derivative_scalar(step.c.data[k], squashed) + dc_next.data[k];

            d_pre[0][k] = d_c * step.c_prev.data[k] * fk * (one - fk);
            d_pre[1][k] = d_c * gk * ik * (one - ik);
            d_pre[2][k] = d_c * ik * phi.derivative_scalar(step.candidate_pre.data[k], gk);
            d_pre[3][k] = d_o * ok * (one - ok);
            dc_prev[k] = d_c * fk;
        }

        let d_pre = d_pre.map(|data| Tensor::new(shape.clone(), data));
        Ok((d_pre, Tensor::new(shape, dc_prev)))
    }
}

impl<T: Scalar> Layer<T> for ConvLstmLayer<T> {
    fn name(&self) -> &'static str {
        "conv_lstm"
    }

    fn forward(&mut self, input: &Tensor<T>) -> LayerResult<Tensor<T>> {
        self.check_input(input)?;
        let (batch, time) = (input.shape[0], input.shape[1]);
        let [oh, ow, filters] = self.output_hwc;
        let state_shape = vec![batch, oh, ow, filters];

        let mut h = Tensor::zeros(state_shape.clone());
        let mut c = Tensor::zeros(state_shape);
        let mut steps = Vec::with_capacity(time);
        for t in 0..time {
            let step = self.forward_step(input.select_axis1(t)?, h, c)?;
            h = step.h.clone();
            c = step.c.clone();
            steps.push(step);
        }

        let hidden: Vec<Tensor<T>> = steps.iter().map(|s| s.h.clone()).collect();
        let output = Tensor::stack_axis1(&hidden)?;
        trace!("conv_lstm: forward {:?} -> {:?} over {time} steps", input.shape, output.shape);

        self.state.forwarded(SequenceCache {
            input_shape: input.shape.clone(),
            output_shape: output.shape.clone(),
            steps,
        });
        Ok(output)
    }

    fn backward(&mut self, output_gradient: &Tensor<T>) -> LayerResult<Tensor<T>> {
        let cache = self.state.cache(self.name())?;
        output_gradient.ensure_shape(&cache.output_shape)?;

        let [oh, ow, filters] = self.output_hwc;
        let state_shape = vec![cache.input_shape[0], oh, ow, filters];
        let k = self.params.w_fi.shape[0];
        let mut grads = ConvLstmParams::zeros(k, self.input_hwc[2], filters);
        let mut dh_next = Tensor::zeros(state_shape.clone());
        let mut dc_next = Tensor::zeros(state_shape);
        let mut dx_steps = Vec::with_capacity(cache.steps.len());

        for (t, step) in cache.steps.iter().enumerate().rev() {
            let mut dh = output_gradient.select_axis1(t)?;
            dh.add_assign(&dh_next)?;
            let (d_pre, dc_prev) = self.step_gate_gradients(step, &dh, &dc_next)?;

            let mut dx = Tensor::zeros(step.x.shape.clone());
            let mut dh_prev = Tensor::zeros(step.h_prev.shape.clone());
            for (g, dp) in d_pre.iter().enumerate() {
                let (w_x, w_h, _) = self.params.gate(g);
                let (gw_x, gw_h, gb) = grads.gate_mut(g);
                gw_x.add_assign(&conv2d_kernel_grad(&step.x, dp, &w_x.shape, self.input_geometry)?)?;
                gw_h.add_assign(&conv2d_kernel_grad(&step.h_prev, dp, &w_h.shape, self.hidden_geometry)?)?;
                gb.add_assign(&conv2d_bias_grad(dp))?;
                dx.add_assign(&conv2d_input_grad(dp, w_x, &step.x.shape, self.input_geometry)?)?;
                dh_prev.add_assign(&conv2d_input_grad(dp, w_h, &step.h_prev.shape, self.hidden_geometry)?)?;
            }
            dx_steps.push(dx);

            // step 0 reads the zero initial state; its gradient goes nowhere
            if t > 0 {
                dh_next = dh_prev;
                dc_next = dc_prev;
            }
        }

        dx_steps.reverse();
        let d_input = Tensor::stack_axis1(&dx_steps)?;
        trace!("conv_lstm: backward {:?} -> {:?}", output_gradient.shape, d_input.shape);
        self.state.store_gradients(self.name(), grads)?;
        Ok(d_input)
    }

    fn update_parameters(&mut self, learning_rate: T) -> LayerResult<()> {
        let grads = self.state.take_gradients(self.name())?;
        self.apply_gradients(&grads, learning_rate)?;
        trace!("conv_lstm: momentum step, lr {:?}", learning_rate);
        Ok(())
    }

    fn parameters(&self) -> Vec<T> {
        params::flatten(&self.params.tensors())
    }

    fn set_parameters(&mut self, values: &[T]) -> LayerResult<()> {
        params::assign(&mut self.params.tensors_mut(), values)
    }

    fn parameter_count(&self) -> usize {
        self.params.element_count()
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

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn small_cell() -> ConvLstmLayer<f64> {
        let cfg = ConvLstmConfig::new(3, 3, 1, 3, 2).with_padding(1);
        ConvLstmLayer::from_config(&cfg, &mut StdRng::seed_from_u64(11)).unwrap()
    }

    #[test]
    fn test_parameter_count() {
        let cell = small_cell();
        // 4 * (3*3*1*2) + 4 * (3*3*2*2) + 4 * 2
        assert_eq!(cell.parameter_count(), 72 + 144 + 8);
        assert_eq!(cell.parameters().len(), cell.parameter_count());
    }

    #[test]
    fn test_parameter_order_starts_with_forget_input_kernel() {
        let cell = small_cell();
        let flat = cell.parameters();
        assert_eq!(flat[..18], cell.params().w_fi.data[..]);
        assert_eq!(flat[flat.len() - 2..], cell.params().b_o.data[..]);
    }

    #[test]
    fn test_hidden_state_stays_bounded() {
        let mut cell = small_cell();
        let input = Tensor::full(vec![1, 5, 3, 3, 1], 10.0);
        let out = cell.forward(&input).unwrap();
        assert!(out.data.iter().all(|v| v.abs() <= 1.0));
    }

    #[test]
    fn test_backward_shape_matches_input() {
        let mut cell = small_cell();
        let input = Tensor::from_fn(vec![2, 3, 3, 3, 1], |i| (i as f64 * 0.37).sin());
        let out = cell.forward(&input).unwrap();
        let dx = cell.backward(&Tensor::full(out.shape.clone(), 1.0)).unwrap();
        assert_eq!(dx.shape, input.shape);
        assert!(cell.pending_gradients().is_some());
    }

    #[test]
    fn test_misshaped_params_are_rejected() {
        let cfg = ConvLstmConfig::new(3, 3, 1, 3, 2).with_padding(1);
        let params = ConvLstmParams::<f64>::zeros(3, 2, 2);
        assert!(matches!(
            ConvLstmLayer::with_params(&cfg, params),
            Err(LayerError::Configuration(_))
        ));
    }

    #[test]
    fn test_reset_keeps_velocity() {
        let mut cell = small_cell();
        let input = Tensor::full(vec![1, 2, 3, 3, 1], 0.5);
        let out = cell.forward(&input).unwrap();
        cell.backward(&Tensor::full(out.shape.clone(), 1.0)).unwrap();
        cell.update_parameters(0.01).unwrap();
        let velocity = cell.velocity().clone();
        cell.reset_state();
        assert_eq!(cell.velocity(), &velocity);
        assert!(velocity.tensors().iter().any(|t| t.data.iter().any(|&v| v != 0.0)));
    }
}
