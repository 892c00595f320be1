//! Interpolation of time series with uncertainty.
//!
//! Every supported kind is linear in the samples, so each interpolated value
//! is `y_new = C y` for a sensitivity matrix `C` with at most two non-zero
//! entries per row, and the uncertainty follows as `Uy = C Ux Cᵀ`.

use crate::error::{DspError, DspResult};
use lib_types::Uncertainty;
use ndarray::Array2;

/// How values between samples are obtained.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InterpolationKind {
    #[default]
    Linear,
    /// Value of the last sample at or before the query time.
    Previous,
    /// Value of the first sample at or after the query time.
    Next,
    /// Value of the closest sample; ties go to the earlier one.
    Nearest,
}

/// Policy for query times outside `[t[0], t[n-1]]`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum OutOfRange {
    #[default]
    Error,
    /// Use a constant value with the given standard deviation.
    Fill { value: f64, uncertainty: f64 },
    /// Use the first or last sample.
    Clamp,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct InterpolationOptions {
    pub kind: InterpolationKind,
    pub out_of_range: OutOfRange,
    /// Also return the sensitivity matrix `C`.
    pub return_sensitivities: bool,
}

/// Result of [`interpolate_with_uncertainty`].
#[derive(Clone, Debug, PartialEq)]
pub struct Interpolated {
    pub t: Vec<f64>,
    pub values: Vec<f64>,
    /// `Diagonal` standard deviations for uncorrelated input, `Full` otherwise.
    pub uncertainty: Uncertainty,
    /// `len(t_new) x len(t)` sensitivities, if requested.
    pub sensitivities: Option<Array2<f64>>,
}

/// One row of the sensitivity matrix plus the fill contribution.
#[derive(Clone, Debug, PartialEq)]
struct Row {
    weights: Vec<(usize, f64)>,
    offset: f64,
    fill_variance: f64,
}

/// Interpolate `(t, y)` with uncertainty `uy` at `t_new`.
///
/// # Errors
///
/// - `InsufficientData` for fewer than two samples.
/// - `LengthMismatch` if `t` and `y` differ in length.
/// - `InvalidInput` if `t` is not strictly increasing, a query time is not
///   finite, a query lies out of range under [`OutOfRange::Error`], or the
///   uncertainty does not match the samples.
pub fn interpolate_with_uncertainty(
    t_new: &[f64],
    t: &[f64],
    y: &[f64],
    uy: &Uncertainty,
    options: &InterpolationOptions,
) -> DspResult<Interpolated> {
    if t.len() < 2 {
        return Err(DspError::InsufficientData { needed: 2, got: t.len() });
    }
    if y.len() != t.len() {
        return Err(DspError::LengthMismatch {
            expected: t.len(),
            actual: y.len(),
        });
    }
    if t.windows(2).any(|w| !(w[1] > w[0])) || t.iter().any(|v| !v.is_finite()) {
        return Err(DspError::InvalidInput(
            "sample times must be finite and strictly increasing".to_string(),
        ));
    }
    uy.validate(t.len())?;
    if let OutOfRange::Fill { uncertainty, .. } = options.out_of_range {
        if !(uncertainty.is_finite() && uncertainty >= 0.0) {
            return Err(DspError::InvalidInput(format!(
                "fill uncertainty must be finite and non-negative, got {uncertainty}"
            )));
        }
    }

    let rows = t_new
        .iter()
        .map(|&target| sensitivity_row(t, target, options))
        .collect::<DspResult<Vec<Row>>>()?;

    let values = rows
        .iter()
        .map(|row| row.offset + row.weights.iter().map(|&(k, w)| w * y[k]).sum::<f64>())
        .collect();

    let uncertainty = match uy {
        Uncertainty::Exact | Uncertainty::Scalar(_) | Uncertainty::Diagonal(_) => {
            let var = uy.variances(t.len());
            Uncertainty::Diagonal(
                rows.iter()
                    .map(|row| {
                        let v: f64 = row.weights.iter().map(|&(k, w)| w * w * var[k]).sum();
                        (v + row.fill_variance).sqrt()
                    })
                    .collect(),
            )
        }
        Uncertainty::Autocorrelation(_) | Uncertainty::Full(_) => {
            let ux = uy.covariance(t.len());
            let m = rows.len();
            Uncertainty::Full(Array2::from_shape_fn((m, m), |(i, j)| {
                let mut acc = 0.0;
                for &(a, wa) in &rows[i].weights {
                    for &(b, wb) in &rows[j].weights {
                        acc += wa * wb * ux[[a, b]];
                    }
                }
                if i == j {
                    acc += rows[i].fill_variance;
                }
                acc
            }))
        }
    };

    let sensitivities = options.return_sensitivities.then(|| {
        let mut c = Array2::<f64>::zeros((rows.len(), t.len()));
        for (i, row) in rows.iter().enumerate() {
            for &(k, w) in &row.weights {
                c[[i, k]] += w;
            }
        }
        c
    });

    tracing::debug!(
        "Interpolated {} samples onto {} points ({:?})",
        t.len(),
        t_new.len(),
        options.kind
    );

    Ok(Interpolated {
        t: t_new.to_vec(),
        values,
        uncertainty,
        sensitivities,
    })
}

fn sensitivity_row(t: &[f64], target: f64, options: &InterpolationOptions) -> DspResult<Row> {
    let last = t.len() - 1;
    let single = |k: usize| Row {
        weights: vec![(k, 1.0)],
        offset: 0.0,
        fill_variance: 0.0,
    };

    if !target.is_finite() {
        return Err(DspError::InvalidInput(format!("query time {target} is not finite")));
    }
    if target < t[0] || target > t[last] {
        return match options.out_of_range {
            OutOfRange::Error => Err(DspError::InvalidInput(format!(
                "query time {target} lies outside [{}, {}]",
                t[0], t[last]
            ))),
            OutOfRange::Fill { value, uncertainty } => Ok(Row {
                weights: Vec::new(),
                offset: value,
                fill_variance: uncertainty * uncertainty,
            }),
            OutOfRange::Clamp => Ok(single(if target < t[0] { 0 } else { last })),
        };
    }
    if target == t[last] {
        return Ok(single(last));
    }

    // Find bracketing indices
    let mut lower = 0;
    let mut upper = last;
    while upper - lower > 1 {
        let mid = (lower + upper) / 2;
        if t[mid] <= target {
            lower = mid;
        } else {
            upper = mid;
        }
    }

    let frac = (target - t[lower]) / (t[upper] - t[lower]);
    Ok(match options.kind {
        InterpolationKind::Linear => {
            if frac == 0.0 {
                single(lower)
            } else {
                Row {
                    weights: vec![(lower, 1.0 - frac), (upper, frac)],
                    offset: 0.0,
                    fill_variance: 0.0,
                }
            }
        }
        InterpolationKind::Previous => single(lower),
        InterpolationKind::Next => single(if frac == 0.0 { lower } else { upper }),
        InterpolationKind::Nearest => single(if frac <= 0.5 { lower } else { upper }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const T: [f64; 4] = [0.0, 1.0, 2.0, 4.0];
    const Y: [f64; 4] = [0.0, 2.0, 1.0, 5.0];

    fn stds(result: &Interpolated) -> Vec<f64> {
        match &result.uncertainty {
            Uncertainty::Diagonal(s) => s.clone(),
            Uncertainty::Full(c) => c.diag().iter().map(|v| v.sqrt()).collect(),
            other => panic!("unexpected uncertainty {:?}", other),
        }
    }

    #[test]
    fn test_linear_interpolation() {
        let result = interpolate_with_uncertainty(
            &[0.5, 1.0, 3.0, 4.0],
            &T,
            &Y,
            &Uncertainty::Scalar(0.2),
            &InterpolationOptions::default(),
        )
        .unwrap();

        let expected = [1.0, 2.0, 3.0, 5.0];
        for (v, e) in result.values.iter().zip(expected) {
            assert!((v - e).abs() < 1e-12);
        }
        // Midpoint of two independent samples: 0.2 * sqrt(0.5)
        let s = stds(&result);
        assert!((s[0] - 0.2 * 0.5f64.sqrt()).abs() < 1e-12);
        assert!((s[1] - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_step_kinds() {
        let query = [0.5, 1.0, 1.7, 3.0];
        let run = |kind| {
            let options = InterpolationOptions {
                kind,
                ..Default::default()
            };
            interpolate_with_uncertainty(&query, &T, &Y, &Uncertainty::Exact, &options)
                .unwrap()
                .values
        };

        assert_eq!(run(InterpolationKind::Previous), vec![0.0, 2.0, 2.0, 1.0]);
        assert_eq!(run(InterpolationKind::Next), vec![2.0, 2.0, 1.0, 5.0]);
        assert_eq!(run(InterpolationKind::Nearest), vec![0.0, 2.0, 1.0, 1.0]);
    }

    #[test]
    fn test_out_of_range_policies() {
        let query = [-1.0, 2.0, 5.0];
        let mut options = InterpolationOptions::default();
        let err = interpolate_with_uncertainty(&query, &T, &Y, &Uncertainty::Scalar(0.1), &options)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InputContract);

        options.out_of_range = OutOfRange::Fill {
            value: -9.0,
            uncertainty: 0.5,
        };
        let filled =
            interpolate_with_uncertainty(&query, &T, &Y, &Uncertainty::Scalar(0.1), &options).unwrap();
        assert_eq!(filled.values, vec![-9.0, 1.0, -9.0]);
        for (s, e) in stds(&filled).iter().zip([0.5, 0.1, 0.5]) {
            assert!((s - e).abs() < 1e-12);
        }

        options.out_of_range = OutOfRange::Clamp;
        let clamped =
            interpolate_with_uncertainty(&query, &T, &Y, &Uncertainty::Scalar(0.1), &options).unwrap();
        assert_eq!(clamped.values, vec![0.0, 1.0, 5.0]);
    }

    #[test]
    fn test_full_covariance_and_sensitivities() {
        let ux = Array2::from_shape_fn((4, 4), |(i, j)| if i == j { 0.04 } else { 0.01 });
        let options = InterpolationOptions {
            return_sensitivities: true,
            ..Default::default()
        };
        let result =
            interpolate_with_uncertainty(&[0.5, 3.0], &T, &Y, &Uncertainty::Full(ux.clone()), &options).unwrap();

        let c = result.sensitivities.clone().unwrap();
        assert_eq!(c.dim(), (2, 4));
        assert!((c[[0, 0]] - 0.5).abs() < 1e-12);
        assert!((c[[1, 3]] - 0.5).abs() < 1e-12);

        let expected = c.dot(&ux).dot(&c.t());
        let Uncertainty::Full(uy) = result.uncertainty else {
            panic!("expected full covariance");
        };
        for (a, e) in uy.iter().zip(expected.iter()) {
            assert!((a - e).abs() < 1e-14);
        }
    }

    #[test]
    fn test_rejects_unsorted_times() {
        let err = interpolate_with_uncertainty(
            &[0.5],
            &[0.0, 2.0, 1.0],
            &[1.0, 2.0, 3.0],
            &Uncertainty::Exact,
            &InterpolationOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, DspError::InvalidInput(_)));
    }
}
