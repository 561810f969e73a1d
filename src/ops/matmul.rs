//! Matrix multiplication on 2D tensors, parallel over output rows.

use crate::error::{LayerError, LayerResult};
use crate::scalar::Scalar;
use crate::tensors::Tensor;
use rayon::prelude::*;

/// Computes `C = A × B` for `A: m×k`, `B: k×n`.
///
/// Rows of the output are computed in parallel with `rayon`.
///
/// # Errors
/// [`LayerError::ShapeMismatch`] if either operand is not 2D or the inner
/// dimensions disagree.
pub fn matmul<T: Scalar>(a: &Tensor<T>, b: &Tensor<T>) -> LayerResult<Tensor<T>> {
    a.ensure_rank(2)?;
    b.ensure_rank(2)?;
    let (m, k) = (a.shape[0], a.shape[1]);
    let n = b.shape[1];
    if b.shape[0] != k {
        return Err(LayerError::shape(&[k, n], &b.shape));
    }

    let a_data = &a.data;
    let b_data = &b.data;
    let mut out_data = vec![T::zero(); m * n];

    if n > 0 {
        out_data
            .par_chunks_mut(n)
            .enumerate()
            .for_each(|(i, row)| {
                for (j, out) in row.iter_mut().enumerate() {
                    let mut sum = T::zero();
                    for l in 0..k {
                        sum = sum + a_data[i * k + l] * b_data[l * n + j];
                    }
                    *out = sum;
                }
            });
    }

    Ok(Tensor::new(vec![m, n], out_data))
}

/// Computes `Aᵀ × B`.
///
/// # Errors
/// [`LayerError::ShapeMismatch`] on rank or row-count mismatch.
pub fn matmul_tn<T: Scalar>(a: &Tensor<T>, b: &Tensor<T>) -> LayerResult<Tensor<T>> {
    matmul(&a.transpose()?, b)
}

/// Computes `A × Bᵀ`.
///
/// # Errors
/// [`LayerError::ShapeMismatch`] on rank or column-count mismatch.
pub fn matmul_nt<T: Scalar>(a: &Tensor<T>, b: &Tensor<T>) -> LayerResult<Tensor<T>> {
    matmul(a, &b.transpose()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matmul_values() {
        let a = Tensor::new(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let b = Tensor::new(vec![3, 2], vec![7.0, 8.0, 9.0, 10.0, 11.0, 12.0]);
        let c = matmul(&a, &b).unwrap();
        assert_eq!(c.shape, vec![2, 2]);
        assert_eq!(c.data, vec![58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn test_matmul_inner_dimension_mismatch() {
        let a = Tensor::<f64>::zeros(vec![2, 3]);
        let b = Tensor::<f64>::zeros(vec![2, 3]);
        assert!(matches!(
            matmul(&a, &b),
            Err(LayerError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_transposed_variants() {
        let a = Tensor::new(vec![3, 2], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let b = Tensor::new(vec![3, 2], vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
        let tn = matmul_tn(&a, &b).unwrap();
        assert_eq!(tn, matmul(&a.transpose().unwrap(), &b).unwrap());
        let nt = matmul_nt(&a, &b).unwrap();
        assert_eq!(nt.shape, vec![3, 3]);
    }
}
