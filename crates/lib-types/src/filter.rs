//! Digital filter models.
//!
//! A fitted filter is the rational transfer function
//!
//! ```text
//!          b[0] + b[1] z^-1 + ... + b[Nb] z^-Nb
//! H(z) = ----------------------------------------
//!          1 + a[1] z^-1 + ... + a[Na] z^-Na
//! ```
//!
//! together with the integer bulk delay `tau` (in samples) that was applied
//! to the target response during fitting. A denominator of `[1]` denotes an
//! FIR filter.

use crate::error::{TypeError, TypeResult};
use ndarray::Array2;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// Covariance of fitted filter coefficients.
///
/// Ordered as `[a[1..], b]` for IIR fits and as `b` for FIR fits.
pub type CoefficientCovariance = Array2<f64>;

/// Rational digital filter with bulk delay.
///
/// Deserialized models go through [`FilterModel::new`], so a stored
/// denominator is normalized and empty coefficient vectors are rejected.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawFilterModel")]
pub struct FilterModel {
    /// Numerator coefficients.
    pub b: Vec<f64>,

    /// Denominator coefficients, `a[0] == 1`.
    pub a: Vec<f64>,

    /// Bulk delay in samples applied to the fitted target.
    pub tau: usize,
}

#[derive(Deserialize)]
struct RawFilterModel {
    b: Vec<f64>,
    a: Vec<f64>,
    tau: usize,
}

impl TryFrom<RawFilterModel> for FilterModel {
    type Error = TypeError;

    fn try_from(raw: RawFilterModel) -> TypeResult<Self> {
        Self::new(raw.b, raw.a, raw.tau)
    }
}

impl FilterModel {
    /// Create a filter model, normalizing the denominator so that `a[0] = 1`.
    ///
    /// # Errors
    ///
    /// Returns an error if either coefficient vector is empty, contains a
    /// non-finite value, or `a[0]` is zero.
    pub fn new(b: Vec<f64>, a: Vec<f64>, tau: usize) -> TypeResult<Self> {
        if b.is_empty() || a.is_empty() {
            return Err(TypeError::InvalidValue(
                "filter coefficient vectors must not be empty".to_string(),
            ));
        }
        if b.iter().chain(a.iter()).any(|c| !c.is_finite()) {
            return Err(TypeError::InvalidValue(
                "filter coefficients must be finite".to_string(),
            ));
        }
        let a0 = a[0];
        if a0 == 0.0 {
            return Err(TypeError::InvalidValue(
                "leading denominator coefficient must be non-zero".to_string(),
            ));
        }

        let (b, a) = if a0 == 1.0 {
            (b, a)
        } else {
            (
                b.iter().map(|c| c / a0).collect(),
                a.iter().map(|c| c / a0).collect(),
            )
        };

        Ok(Self { b, a, tau })
    }

    /// FIR filter with the given taps.
    pub fn fir(b: Vec<f64>, tau: usize) -> TypeResult<Self> {
        Self::new(b, vec![1.0], tau)
    }

    /// True if the denominator is trivial.
    #[inline]
    pub fn is_fir(&self) -> bool {
        self.a.len() == 1
    }

    #[inline]
    pub fn numerator_order(&self) -> usize {
        self.b.len() - 1
    }

    #[inline]
    pub fn denominator_order(&self) -> usize {
        self.a.len() - 1
    }

    /// Parameter vector `[a[1..], b]` matching [`CoefficientCovariance`].
    pub fn stacked_parameters(&self) -> Vec<f64> {
        self.a[1..].iter().chain(self.b.iter()).copied().collect()
    }

    /// Evaluate `H(e^{jω})` at the given normalized angular frequencies.
    pub fn frequency_response(&self, omega: &[f64]) -> Vec<Complex64> {
        omega
            .iter()
            .map(|&w| polyval_unit_circle(&self.b, w) / polyval_unit_circle(&self.a, w))
            .collect()
    }

    /// Frequency response with the bulk delay removed, `H(e^{jω}) e^{jωτ}`.
    pub fn delay_compensated_response(&self, omega: &[f64]) -> Vec<Complex64> {
        let tau = self.tau as f64;
        self.frequency_response(omega)
            .into_iter()
            .zip(omega)
            .map(|(h, &w)| h * Complex64::from_polar(1.0, w * tau))
            .collect()
    }
}

/// Evaluate `Σ c[k] e^{-jωk}` by Horner's scheme in `z^-1`.
fn polyval_unit_circle(coeffs: &[f64], omega: f64) -> Complex64 {
    let z_inv = Complex64::from_polar(1.0, -omega);
    coeffs
        .iter()
        .rev()
        .fold(Complex64::new(0.0, 0.0), |acc, &c| acc * z_inv + c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn test_denominator_normalized() {
        let model = FilterModel::new(vec![2.0, 4.0], vec![2.0, -1.0], 0).unwrap();
        assert_eq!(model.a, vec![1.0, -0.5]);
        assert_eq!(model.b, vec![1.0, 2.0]);
    }

    #[test]
    fn test_zero_leading_coefficient_rejected() {
        assert!(FilterModel::new(vec![1.0], vec![0.0, 1.0], 0).is_err());
        assert!(FilterModel::fir(vec![], 0).is_err());
    }

    #[test]
    fn test_stacked_parameters_order() {
        let model = FilterModel::new(vec![0.1, 0.2], vec![1.0, -0.9, 0.3], 2).unwrap();
        assert_eq!(model.stacked_parameters(), vec![-0.9, 0.3, 0.1, 0.2]);
    }

    #[test]
    fn test_moving_average_response() {
        let model = FilterModel::fir(vec![0.5, 0.5], 0).unwrap();
        let h = model.frequency_response(&[0.0, PI]);
        assert!((h[0].re - 1.0).abs() < 1e-12);
        assert!(h[1].norm() < 1e-12);
    }

    #[test]
    fn test_delay_compensation_undoes_pure_delay() {
        // z^-3 with tau = 3 is the identity after compensation.
        let model = FilterModel::fir(vec![0.0, 0.0, 0.0, 1.0], 3).unwrap();
        for h in model.delay_compensated_response(&[0.1, 0.7, 2.0]) {
            assert!((h.re - 1.0).abs() < 1e-12);
            assert!(h.im.abs() < 1e-12);
        }
    }

    #[test]
    fn test_serde_roundtrip() {
        let model = FilterModel::new(vec![0.1, 0.2], vec![1.0, -0.5], 4).unwrap();
        let json = serde_json::to_string(&model).unwrap();
        let back: FilterModel = serde_json::from_str(&json).unwrap();
        assert_eq!(back, model);
    }

    #[test]
    fn test_deserialize_normalizes_and_validates() {
        let model: FilterModel = serde_json::from_str(r#"{"b":[1.0],"a":[2.0],"tau":0}"#).unwrap();
        assert_eq!(model.a, vec![1.0]);
        assert_eq!(model.b, vec![0.5]);

        assert!(serde_json::from_str::<FilterModel>(r#"{"b":[],"a":[1.0],"tau":0}"#).is_err());
        assert!(serde_json::from_str::<FilterModel>(r#"{"b":[1.0],"a":[0.0, 1.0],"tau":0}"#).is_err());
    }
}
