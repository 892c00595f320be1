//! Sampled complex frequency responses with optional covariance.
//!
//! A `FrequencyResponse` holds `M` complex values `H(f_i)` at arbitrary,
//! non-negative frequencies together with the sampling rate of the digital
//! filter that will later be fitted to it. Its uncertainty, when known, is a
//! real `2M x 2M` covariance over the stacked vector `[Re H, Im H]`.
//!
//! ```text
//! index:   0 .. M-1          M .. 2M-1
//! value:   Re H(f_0..f_M-1)  Im H(f_0..f_M-1)
//! ```

use crate::error::{TypeError, TypeResult};
use crate::units::Hertz;
use ndarray::Array2;
use num_complex::Complex64;

/// Relative tolerance for the covariance symmetry check.
const SYMMETRY_RTOL: f64 = 1e-8;

/// Sampled complex frequency response of a measured system.
#[derive(Clone, Debug)]
pub struct FrequencyResponse {
    frequencies: Vec<Hertz>,
    values: Vec<Complex64>,
    sample_rate: Hertz,
    covariance: Option<Array2<f64>>,
}

impl FrequencyResponse {
    /// Create a response without uncertainty.
    ///
    /// # Errors
    ///
    /// Returns an error if the lengths differ, a frequency is negative or
    /// not finite, a value is not finite, or the sample rate is not positive.
    pub fn new(
        frequencies: Vec<Hertz>,
        values: Vec<Complex64>,
        sample_rate: Hertz,
    ) -> TypeResult<Self> {
        if frequencies.len() != values.len() {
            return Err(TypeError::LengthMismatch {
                what: "frequency response values",
                expected: frequencies.len(),
                actual: values.len(),
            });
        }
        if !(sample_rate.0.is_finite() && sample_rate.0 > 0.0) {
            return Err(TypeError::InvalidValue(format!(
                "sample rate must be positive, got {}",
                sample_rate.0
            )));
        }
        if let Some(f) = frequencies.iter().find(|f| !(f.0.is_finite() && f.0 >= 0.0)) {
            return Err(TypeError::InvalidValue(format!(
                "frequencies must be finite and non-negative, got {}",
                f.0
            )));
        }
        if values.iter().any(|h| !(h.re.is_finite() && h.im.is_finite())) {
            return Err(TypeError::InvalidValue(
                "frequency response contains non-finite values".to_string(),
            ));
        }

        Ok(Self {
            frequencies,
            values,
            sample_rate,
            covariance: None,
        })
    }

    /// Build a response from the stacked `[Re H, Im H]` layout.
    pub fn from_real_imag(
        frequencies: Vec<Hertz>,
        stacked: &[f64],
        sample_rate: Hertz,
    ) -> TypeResult<Self> {
        let m = frequencies.len();
        if stacked.len() != 2 * m {
            return Err(TypeError::LengthMismatch {
                what: "stacked real/imaginary values",
                expected: 2 * m,
                actual: stacked.len(),
            });
        }
        let values = (0..m)
            .map(|i| Complex64::new(stacked[i], stacked[m + i]))
            .collect();
        Self::new(frequencies, values, sample_rate)
    }

    /// Attach a `2M x 2M` covariance over `[Re H, Im H]`.
    ///
    /// # Errors
    ///
    /// Returns an error if the matrix is not square, has the wrong dimension,
    /// contains non-finite entries or is not symmetric.
    pub fn with_covariance(mut self, covariance: Array2<f64>) -> TypeResult<Self> {
        check_covariance("response covariance", &covariance, 2 * self.len())?;
        self.covariance = Some(covariance);
        Ok(self)
    }

    /// Drop the covariance, keeping the nominal values.
    pub fn without_covariance(mut self) -> Self {
        self.covariance = None;
        self
    }

    /// Number of frequency points `M`.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn frequencies(&self) -> &[Hertz] {
        &self.frequencies
    }

    pub fn values(&self) -> &[Complex64] {
        &self.values
    }

    pub fn sample_rate(&self) -> Hertz {
        self.sample_rate
    }

    pub fn covariance(&self) -> Option<&Array2<f64>> {
        self.covariance.as_ref()
    }

    /// Normalized angular frequencies `2π f_i / fs`.
    pub fn omega(&self) -> Vec<f64> {
        self.frequencies
            .iter()
            .map(|f| f.normalized_angular(self.sample_rate))
            .collect()
    }

    /// Values in the stacked `[Re H, Im H]` layout.
    pub fn stacked_real_imag(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(2 * self.len());
        out.extend(self.values.iter().map(|h| h.re));
        out.extend(self.values.iter().map(|h| h.im));
        out
    }

    /// Pointwise reciprocal `1/H`, with the covariance propagated linearly.
    ///
    /// # Errors
    ///
    /// Returns an error if any value is exactly zero.
    pub fn reciprocal(&self) -> TypeResult<Self> {
        if self.values.iter().any(|h| h.norm_sqr() == 0.0) {
            return Err(TypeError::InvalidValue(
                "cannot take the reciprocal of a zero response value".to_string(),
            ));
        }
        let values: Vec<Complex64> = self.values.iter().map(|h| h.inv()).collect();
        let derivatives: Vec<Complex64> = self.values.iter().map(|h| -(h * h).inv()).collect();
        let covariance = self
            .covariance
            .as_ref()
            .map(|u| propagate_pointwise(u, &derivatives));

        Ok(Self {
            frequencies: self.frequencies.clone(),
            values,
            sample_rate: self.sample_rate,
            covariance,
        })
    }
}

/// Propagate a stacked `[Re, Im]` covariance through a pointwise holomorphic map.
///
/// `derivatives[i]` is `g'(z_i)`. Each frequency contributes the 2x2 block
/// `[[Re c, -Im c], [Im c, Re c]]` to the Jacobian, and the result is
/// `J U Jᵀ` computed without materializing `J`.
pub fn propagate_pointwise(covariance: &Array2<f64>, derivatives: &[Complex64]) -> Array2<f64> {
    let m = derivatives.len();
    let n = 2 * m;

    // Row p of J touches columns (i, M+i) with these two weights.
    let row_weights = |p: usize| -> (usize, f64, f64) {
        if p < m {
            let c = derivatives[p];
            (p, c.re, -c.im)
        } else {
            let c = derivatives[p - m];
            (p - m, c.im, c.re)
        }
    };

    let mut out = Array2::<f64>::zeros((n, n));
    for p in 0..n {
        let (i, wr_p, wi_p) = row_weights(p);
        for q in p..n {
            let (j, wr_q, wi_q) = row_weights(q);
            let v = wr_p * (wr_q * covariance[[i, j]] + wi_q * covariance[[i, m + j]])
                + wi_p * (wr_q * covariance[[m + i, j]] + wi_q * covariance[[m + i, m + j]]);
            out[[p, q]] = v;
            out[[q, p]] = v;
        }
    }
    out
}

/// Check that `matrix` is a finite, symmetric `dim x dim` matrix.
pub fn check_covariance(what: &'static str, matrix: &Array2<f64>, dim: usize) -> TypeResult<()> {
    let (rows, cols) = matrix.dim();
    if rows != cols {
        return Err(TypeError::NotSquare { what, rows, cols });
    }
    if rows != dim {
        return Err(TypeError::LengthMismatch {
            what,
            expected: dim,
            actual: rows,
        });
    }
    if matrix.iter().any(|v| !v.is_finite()) {
        return Err(TypeError::InvalidValue(format!("{what} contains non-finite entries")));
    }

    let scale = matrix.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    let tol = SYMMETRY_RTOL * scale.max(f64::MIN_POSITIVE);
    for row in 0..rows {
        for col in (row + 1)..cols {
            let deviation = (matrix[[row, col]] - matrix[[col, row]]).abs();
            if deviation > tol {
                return Err(TypeError::NotSymmetric {
                    what,
                    row,
                    col,
                    deviation,
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(m: usize) -> Vec<Hertz> {
        (0..m).map(|i| Hertz(i as f64 * 100.0)).collect()
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let result = FrequencyResponse::new(grid(3), vec![Complex64::new(1.0, 0.0); 2], Hertz(1e3));
        assert!(matches!(
            result,
            Err(TypeError::LengthMismatch { expected: 3, actual: 2, .. })
        ));
    }

    #[test]
    fn test_negative_frequency_rejected() {
        let freqs = vec![Hertz(0.0), Hertz(-1.0)];
        let values = vec![Complex64::new(1.0, 0.0); 2];
        assert!(FrequencyResponse::new(freqs, values, Hertz(1e3)).is_err());
    }

    #[test]
    fn test_covariance_dimension_checked() {
        let h = FrequencyResponse::new(grid(3), vec![Complex64::new(1.0, 0.0); 3], Hertz(1e3))
            .unwrap();
        let bad = Array2::<f64>::eye(3);
        assert!(matches!(
            h.clone().with_covariance(bad),
            Err(TypeError::LengthMismatch { expected: 6, actual: 3, .. })
        ));

        let mut asym = Array2::<f64>::eye(6);
        asym[[0, 5]] = 0.5;
        assert!(matches!(
            h.clone().with_covariance(asym),
            Err(TypeError::NotSymmetric { row: 0, col: 5, .. })
        ));

        let with = h.with_covariance(Array2::eye(6)).unwrap();
        assert!(with.covariance().is_some());
        assert!(with.without_covariance().covariance().is_none());
    }

    #[test]
    fn test_stacked_layout() {
        let values = vec![Complex64::new(1.0, 2.0), Complex64::new(3.0, 4.0)];
        let h = FrequencyResponse::new(grid(2), values, Hertz(1e3)).unwrap();
        assert_eq!(h.stacked_real_imag(), vec![1.0, 3.0, 2.0, 4.0]);

        let back = FrequencyResponse::from_real_imag(grid(2), &[1.0, 3.0, 2.0, 4.0], Hertz(1e3))
            .unwrap();
        assert_eq!(back.values(), h.values());
    }

    #[test]
    fn test_reciprocal_covariance_matches_jacobian() {
        // 1/z at z = 2: derivative -1/4, so variances scale by 1/16.
        let h = FrequencyResponse::new(grid(1), vec![Complex64::new(2.0, 0.0)], Hertz(1e3))
            .unwrap()
            .with_covariance(Array2::eye(2) * 0.01)
            .unwrap();
        let inv = h.reciprocal().unwrap();
        assert!((inv.values()[0].re - 0.5).abs() < 1e-15);

        let u = inv.covariance().unwrap();
        assert!((u[[0, 0]] - 0.01 / 16.0).abs() < 1e-15);
        assert!((u[[1, 1]] - 0.01 / 16.0).abs() < 1e-15);
        assert!(u[[0, 1]].abs() < 1e-18);
    }

    #[test]
    fn test_pointwise_rotation_preserves_isotropic_covariance() {
        // Multiplying by a unit phasor rotates; an isotropic covariance stays put.
        let c = Complex64::from_polar(1.0, 0.7);
        let u = Array2::<f64>::eye(2) * 3.0;
        let out = propagate_pointwise(&u, &[c]);
        assert!((out[[0, 0]] - 3.0).abs() < 1e-12);
        assert!((out[[1, 1]] - 3.0).abs() < 1e-12);
        assert!(out[[0, 1]].abs() < 1e-12);
    }
}
