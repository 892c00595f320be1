//! Complex exponential design matrices for frequency-domain fitting.
//!
//! For normalized angular frequencies `ω_i = 2π f_i / fs` the basis is
//!
//! ```text
//! E[i, k] = exp(-j ω_i k),   k = 0..=order
//! ```
//!
//! so that `E · c` evaluates the polynomial `Σ c_k z^-k` on the unit circle.

use crate::error::{DspError, DspResult};
use ndarray::{s, Array2, ArrayView2};
use num_complex::Complex64;

/// Builder for the complex basis and its stacked real form.
#[derive(Clone, Debug)]
pub struct DesignMatrix {
    basis: Array2<Complex64>,
}

impl DesignMatrix {
    /// Basis with columns `0..=order` for the given normalized frequencies.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientData` if `omega` is empty.
    pub fn new(omega: &[f64], order: usize) -> DspResult<Self> {
        if omega.is_empty() {
            return Err(DspError::InsufficientData { needed: 1, got: 0 });
        }
        let basis = Array2::from_shape_fn((omega.len(), order + 1), |(i, k)| {
            Complex64::from_polar(1.0, -omega[i] * k as f64)
        });
        Ok(Self { basis })
    }

    pub fn rows(&self) -> usize {
        self.basis.nrows()
    }

    pub fn order(&self) -> usize {
        self.basis.ncols() - 1
    }

    /// Complex basis `E`.
    pub fn complex(&self) -> ArrayView2<'_, Complex64> {
        self.basis.view()
    }

    /// Columns `from..=to` of the complex basis.
    pub fn columns(&self, from: usize, to: usize) -> ArrayView2<'_, Complex64> {
        self.basis.slice(s![.., from..=to])
    }

    /// Stacked real form `[Re E; Im E]` of shape `2M x (order + 1)`.
    pub fn stacked_real(&self) -> Array2<f64> {
        let m = self.rows();
        Array2::from_shape_fn((2 * m, self.basis.ncols()), |(r, k)| {
            if r < m {
                self.basis[[r, k]].re
            } else {
                self.basis[[r - m, k]].im
            }
        })
    }

    /// Stacked real form with row `r` scaled by `weights[r]`.
    pub fn weighted_stacked_real(&self, weights: &[f64]) -> DspResult<Array2<f64>> {
        if weights.len() != 2 * self.rows() {
            return Err(DspError::LengthMismatch {
                expected: 2 * self.rows(),
                actual: weights.len(),
            });
        }
        let mut x = self.stacked_real();
        for (mut row, w) in x.rows_mut().into_iter().zip(weights) {
            row *= *w;
        }
        Ok(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn test_empty_frequencies_rejected() {
        assert!(matches!(
            DesignMatrix::new(&[], 3),
            Err(DspError::InsufficientData { needed: 1, got: 0 })
        ));
    }

    #[test]
    fn test_basis_values() {
        let e = DesignMatrix::new(&[0.0, PI / 2.0], 2).unwrap();
        let c = e.complex();
        assert_eq!(c[[0, 2]], Complex64::new(1.0, 0.0));
        // exp(-j π/2) = -j
        assert!((c[[1, 1]] - Complex64::new(0.0, -1.0)).norm() < 1e-15);
        // exp(-j π) = -1
        assert!((c[[1, 2]] - Complex64::new(-1.0, 0.0)).norm() < 1e-15);
        assert_eq!(e.columns(1, 2).ncols(), 2);
    }

    #[test]
    fn test_stacked_real_layout() {
        let e = DesignMatrix::new(&[PI / 2.0], 1).unwrap();
        let x = e.stacked_real();
        assert_eq!(x.dim(), (2, 2));
        assert!((x[[0, 1]]).abs() < 1e-15);
        assert!((x[[1, 1]] + 1.0).abs() < 1e-15);

        let w = e.weighted_stacked_real(&[2.0, 3.0]).unwrap();
        assert!((w[[0, 0]] - 2.0).abs() < 1e-15);
        assert!((w[[1, 1]] + 3.0).abs() < 1e-15);
        assert!(e.weighted_stacked_real(&[1.0]).is_err());
    }
}
