//! Direct strided 2D convolution and its two gradients.
//!
//! Layout conventions:
//! - input `[batch, height, width, in_channels]`
//! - kernel `[kernel_h, kernel_w, in_channels, out_channels]`
//! - output `[batch, out_h, out_w, out_channels]`
//!
//! Padding is implicit: window positions that fall outside the input after
//! removing the padding offset contribute zero. No padded buffer is built
//! except by [`pad_zeros`], which exists to cross-check that behaviour.
//!
//! Every kernel splits its output into write-disjoint chunks (batch elements
//! or kernel rows) and fills them in parallel with `rayon`. Summation order
//! differs from a sequential loop only by floating point reassociation.

use crate::error::{LayerError, LayerResult};
use crate::scalar::Scalar;
use crate::tensors::Tensor;
use rayon::prelude::*;

/// Stride and symmetric zero padding of a convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conv2dGeometry {
    /// Zero rows/columns added on every side.
    pub padding: usize,
    /// Step between neighbouring windows.
    pub stride: usize,
}

impl Default for Conv2dGeometry {
    fn default() -> Self {
        Self {
            padding: 0,
            stride: 1,
        }
    }
}

impl Conv2dGeometry {
    /// Creates a geometry from padding and stride.
    #[must_use]
    pub const fn new(padding: usize, stride: usize) -> Self {
        Self { padding, stride }
    }

    /// Output extent along one spatial axis:
    /// `(input + 2·padding − kernel) / stride + 1`, floor division.
    ///
    /// Returns `None` when the stride or kernel is zero, when the padded
    /// extent overflows `usize`, or when the kernel does not fit inside the
    /// padded input (a zero or negative extent).
    #[must_use]
    pub const fn output_extent(self, input: usize, kernel: usize) -> Option<usize> {
        let Some(border) = self.padding.checked_mul(2) else {
            return None;
        };
        let Some(padded) = input.checked_add(border) else {
            return None;
        };
        if self.stride == 0 || kernel == 0 || padded < kernel {
            return None;
        }
        Some((padded - kernel) / self.stride + 1)
    }

    fn output_hw(self, input_shape: &[usize], kernel_shape: &[usize]) -> LayerResult<(usize, usize)> {
        let out_h = self.output_extent(input_shape[1], kernel_shape[0]);
        let out_w = self.output_extent(input_shape[2], kernel_shape[1]);
        match (out_h, out_w) {
            (Some(h), Some(w)) => Ok((h, w)),
            _ => Err(LayerError::config(format!(
                "kernel {:?} with padding {} and stride {} does not fit input {:?}",
                &kernel_shape[..2],
                self.padding,
                self.stride,
                &input_shape[1..3]
            ))),
        }
    }

    /// Input coordinate read by output coordinate `out` at kernel offset `k`,
    /// or `None` when it lands in the padding.
    #[inline]
    const fn source(self, out: usize, k: usize, extent: usize) -> Option<usize> {
        let pos = out * self.stride + k;
        if pos < self.padding || pos - self.padding >= extent {
            None
        } else {
            Some(pos - self.padding)
        }
    }

    /// Output coordinate whose window reads input coordinate `pos` at kernel
    /// offset `k`, if any.
    #[inline]
    const fn target(self, pos: usize, k: usize, out_extent: usize) -> Option<usize> {
        let shifted = pos + self.padding;
        if shifted < k {
            return None;
        }
        let shifted = shifted - k;
        if shifted % self.stride != 0 || shifted / self.stride >= out_extent {
            None
        } else {
            Some(shifted / self.stride)
        }
    }
}

fn check_shapes(input_shape: &[usize], kernel_shape: &[usize]) -> LayerResult<()> {
    if input_shape.len() != 4 {
        return Err(LayerError::shape(&[4], &[input_shape.len()]));
    }
    if kernel_shape.len() != 4 {
        return Err(LayerError::shape(&[4], &[kernel_shape.len()]));
    }
    if kernel_shape.contains(&0) || input_shape[1..].contains(&0) {
        return Err(LayerError::config(format!(
            "empty axis in input {input_shape:?} or kernel {kernel_shape:?}"
        )));
    }
    if input_shape[3] != kernel_shape[2] {
        return Err(LayerError::shape(
            &[input_shape[0], input_shape[1], input_shape[2], kernel_shape[2]],
            input_shape,
        ));
    }
    Ok(())
}

/// Output shape of [`conv2d`] for the given operand shapes.
///
/// # Errors
/// [`LayerError::Configuration`] when the output would be empty.
pub fn conv2d_output_shape(
    input_shape: &[usize],
    kernel_shape: &[usize],
    geometry: Conv2dGeometry,
) -> LayerResult<Vec<usize>> {
    check_shapes(input_shape, kernel_shape)?;
    let (out_h, out_w) = geometry.output_hw(input_shape, kernel_shape)?;
    Ok(vec![input_shape[0], out_h, out_w, kernel_shape[3]])
}

/// Forward convolution.
///
/// For every output position and channel, accumulates the dot product of the
/// kernel with the (implicitly zero-padded) input window.
///
/// # Errors
/// - [`LayerError::ShapeMismatch`] on wrong ranks or channel counts
/// - [`LayerError::Configuration`] when the kernel does not fit
pub fn conv2d<T: Scalar>(
    input: &Tensor<T>,
    kernel: &Tensor<T>,
    geometry: Conv2dGeometry,
) -> LayerResult<Tensor<T>> {
    let out_shape = conv2d_output_shape(&input.shape, &kernel.shape, geometry)?;
    let (batch, h, w, ci) = (input.shape[0], input.shape[1], input.shape[2], input.shape[3]);
    let (kh, kw, co) = (kernel.shape[0], kernel.shape[1], kernel.shape[3]);
    let (oh, ow) = (out_shape[1], out_shape[2]);

    let mut out = vec![T::zero(); batch * oh * ow * co];
    let k_data = &kernel.data;

    out.par_chunks_mut(oh * ow * co)
        .zip(input.data.par_chunks(h * w * ci))
        .for_each(|(out_b, in_b)| {
            for oy in 0..oh {
                for ox in 0..ow {
                    let dst = &mut out_b[(oy * ow + ox) * co..(oy * ow + ox + 1) * co];
                    for ky in 0..kh {
                        let Some(iy) = geometry.source(oy, ky, h) else {
                            continue;
                        };
                        for kx in 0..kw {
                            let Some(ix) = geometry.source(ox, kx, w) else {
                                continue;
                            };
                            let src = &in_b[(iy * w + ix) * ci..(iy * w + ix + 1) * ci];
                            for (c, &x) in src.iter().enumerate() {
                                let base = ((ky * kw + kx) * ci + c) * co;
                                for (d, &k) in dst.iter_mut().zip(&k_data[base..base + co]) {
                                    *d = *d + x * k;
                                }
                            }
                        }
                    }
                }
            }
        });

    Ok(Tensor::new(out_shape, out))
}

/// Gradient of the loss with respect to the kernel.
///
/// Same index pattern as the forward pass with the output-side operand
/// replaced by `grad_output`:
/// `dK[ky,kx,c,o] = Σ_{b,oy,ox} x[b, oy·s+ky−p, ox·s+kx−p, c] · g[b,oy,ox,o]`.
///
/// # Errors
/// [`LayerError::ShapeMismatch`] if `grad_output` is not shaped like the
/// forward output.
pub fn conv2d_kernel_grad<T: Scalar>(
    input: &Tensor<T>,
    grad_output: &Tensor<T>,
    kernel_shape: &[usize],
    geometry: Conv2dGeometry,
) -> LayerResult<Tensor<T>> {
    let expected = conv2d_output_shape(&input.shape, kernel_shape, geometry)?;
    grad_output.ensure_shape(&expected)?;
    let (batch, h, w, ci) = (input.shape[0], input.shape[1], input.shape[2], input.shape[3]);
    let (kh, kw, co) = (kernel_shape[0], kernel_shape[1], kernel_shape[3]);
    let (oh, ow) = (expected[1], expected[2]);

    let mut grad = vec![T::zero(); kh * kw * ci * co];
    let x = &input.data;
    let g = &grad_output.data;

    grad.par_chunks_mut(kw * ci * co)
        .enumerate()
        .for_each(|(ky, gk)| {
            for b in 0..batch {
                for oy in 0..oh {
                    let Some(iy) = geometry.source(oy, ky, h) else {
                        continue;
                    };
                    for ox in 0..ow {
                        let g_base = ((b * oh + oy) * ow + ox) * co;
                        let g_row = &g[g_base..g_base + co];
                        for kx in 0..kw {
                            let Some(ix) = geometry.source(ox, kx, w) else {
                                continue;
                            };
                            let x_base = ((b * h + iy) * w + ix) * ci;
                            for c in 0..ci {
                                let xv = x[x_base + c];
                                let dst = &mut gk[(kx * ci + c) * co..(kx * ci + c + 1) * co];
                                for (d, &gv) in dst.iter_mut().zip(g_row) {
                                    *d = *d + xv * gv;
                                }
                            }
                        }
                    }
                }
            }
        });

    Ok(Tensor::new(kernel_shape.to_vec(), grad))
}

/// Gradient of the loss with respect to the input.
///
/// "Full" correlation of `grad_output` with the spatially flipped kernel whose
/// channel roles are swapped. Computed in gather form so that each input
/// element is written exactly once, which keeps strided cases correct:
/// `dX[b,iy,ix,c] = Σ_{ky,kx,o} g[b,oy,ox,o] · K[ky,kx,c,o]`
/// over all `(oy, ox)` with `oy·s = iy + p − ky` and `ox·s = ix + p − kx`.
///
/// # Errors
/// [`LayerError::ShapeMismatch`] if shapes are inconsistent.
pub fn conv2d_input_grad<T: Scalar>(
    grad_output: &Tensor<T>,
    kernel: &Tensor<T>,
    input_shape: &[usize],
    geometry: Conv2dGeometry,
) -> LayerResult<Tensor<T>> {
    let expected = conv2d_output_shape(input_shape, &kernel.shape, geometry)?;
    grad_output.ensure_shape(&expected)?;
    let (h, w, ci) = (input_shape[1], input_shape[2], input_shape[3]);
    let (kh, kw, co) = (kernel.shape[0], kernel.shape[1], kernel.shape[3]);
    let (oh, ow) = (expected[1], expected[2]);

    let mut grad = vec![T::zero(); input_shape.iter().product()];
    let k = &kernel.data;

    grad.par_chunks_mut(h * w * ci)
        .zip(grad_output.data.par_chunks(oh * ow * co))
        .for_each(|(dx_b, g_b)| {
            for iy in 0..h {
                for ix in 0..w {
                    let dst = &mut dx_b[(iy * w + ix) * ci..(iy * w + ix + 1) * ci];
                    for ky in 0..kh {
                        let Some(oy) = geometry.target(iy, ky, oh) else {
                            continue;
                        };
                        for kx in 0..kw {
                            let Some(ox) = geometry.target(ix, kx, ow) else {
                                continue;
                            };
                            let g_row = &g_b[(oy * ow + ox) * co..(oy * ow + ox + 1) * co];
                            for (c, d) in dst.iter_mut().enumerate() {
                                let base = ((ky * kw + kx) * ci + c) * co;
                                let acc = g_row
                                    .iter()
                                    .zip(&k[base..base + co])
                                    .fold(T::zero(), |acc, (&gv, &kv)| acc + gv * kv);
                                *d = *d + acc;
                            }
                        }
                    }
                }
            }
        });

    Ok(Tensor::new(input_shape.to_vec(), grad))
}

/// Bias gradient: `grad_output` summed over every axis but the last.
#[must_use]
pub fn conv2d_bias_grad<T: Scalar>(grad_output: &Tensor<T>) -> Tensor<T> {
    let channels = grad_output.shape.last().copied().unwrap_or(0);
    let mut out = vec![T::zero(); channels];
    if channels > 0 {
        for row in grad_output.data.chunks(channels) {
            for (o, &v) in out.iter_mut().zip(row) {
                *o = *o + v;
            }
        }
    }
    Tensor::new(vec![channels], out)
}

/// Adds a per-channel bias along the last axis, in place.
///
/// # Errors
/// [`LayerError::ShapeMismatch`] if `bias` length differs from the last axis.
pub fn add_channel_bias<T: Scalar>(target: &mut Tensor<T>, bias: &Tensor<T>) -> LayerResult<()> {
    let channels = target.shape.last().copied().unwrap_or(0);
    bias.ensure_shape(&[channels])?;
    if channels > 0 {
        for row in target.data.chunks_mut(channels) {
            for (v, &b) in row.iter_mut().zip(&bias.data) {
                *v = *v + b;
            }
        }
    }
    Ok(())
}

/// Materialises a zero-padded copy of a `[batch, h, w, c]` tensor.
///
/// # Errors
/// [`LayerError::ShapeMismatch`] if the input is not 4D.
pub fn pad_zeros<T: Scalar>(input: &Tensor<T>, padding: usize) -> LayerResult<Tensor<T>> {
    input.ensure_rank(4)?;
    let (batch, h, w, c) = (input.shape[0], input.shape[1], input.shape[2], input.shape[3]);
    let (ph, pw) = (h + 2 * padding, w + 2 * padding);
    let mut out = Tensor::zeros(vec![batch, ph, pw, c]);
    for b in 0..batch {
        for y in 0..h {
            let src = ((b * h + y) * w) * c;
            let dst = ((b * ph + y + padding) * pw + padding) * c;
            out.data[dst..dst + w * c].copy_from_slice(&input.data[src..src + w * c]);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_extent() {
        let g = Conv2dGeometry::new(1, 1);
        assert_eq!(g.output_extent(28, 3), Some(28));
        assert_eq!(Conv2dGeometry::new(0, 1).output_extent(28, 3), Some(26));
        assert_eq!(Conv2dGeometry::new(0, 2).output_extent(5, 3), Some(2));
        assert_eq!(Conv2dGeometry::new(0, 1).output_extent(2, 3), None);
        assert_eq!(Conv2dGeometry::new(0, 0).output_extent(4, 3), None);
    }

    #[test]
    fn test_oversized_padding_has_no_extent() {
        assert_eq!(Conv2dGeometry::new(usize::MAX / 2 + 1, 1).output_extent(4, 3), None);
        assert_eq!(Conv2dGeometry::new(usize::MAX / 2, 1).output_extent(4, 3), None);
        let x = Tensor::<f64>::zeros(vec![1, 4, 4, 1]);
        let k = Tensor::<f64>::zeros(vec![3, 3, 1, 1]);
        assert!(matches!(
            conv2d(&x, &k, Conv2dGeometry::new(usize::MAX / 2 + 1, 1)),
            Err(LayerError::Configuration(_))
        ));
    }

    #[test]
    fn test_known_values_3x3() {
        // 3x3 input, 2x2 all-ones kernel: each output is a window sum
        let input = Tensor::new(
            vec![1, 3, 3, 1],
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0],
        );
        let kernel = Tensor::full(vec![2, 2, 1, 1], 1.0);
        let out = conv2d(&input, &kernel, Conv2dGeometry::default()).unwrap();
        assert_eq!(out.shape, vec![1, 2, 2, 1]);
        assert_eq!(out.data, vec![12.0, 16.0, 24.0, 28.0]);
    }

    #[test]
    fn test_channel_mismatch_is_rejected() {
        let input = Tensor::<f64>::zeros(vec![1, 4, 4, 2]);
        let kernel = Tensor::<f64>::zeros(vec![3, 3, 1, 1]);
        assert!(matches!(
            conv2d(&input, &kernel, Conv2dGeometry::new(1, 1)),
            Err(LayerError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_bias_grad_sums_all_but_channels() {
        let g = Tensor::new(vec![2, 1, 1, 2], vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(conv2d_bias_grad(&g).data, vec![4.0, 6.0]);
    }

    #[test]
    fn test_pad_zeros_layout() {
        let input = Tensor::new(vec![1, 1, 1, 1], vec![5.0]);
        let padded = pad_zeros(&input, 1).unwrap();
        assert_eq!(padded.shape, vec![1, 3, 3, 1]);
        assert_eq!(padded.sum(), 5.0);
        assert_eq!(padded.get(&[0, 1, 1, 0]), 5.0);
    }
}
