//! Time-domain signals and their uncertainty.
//!
//! Samples are point measurements at `t[i] = t_start + i * dt`. The
//! uncertainty attached to a signal is one of a small set of shapes, decided
//! once when the signal is built rather than inspected at every call site.

use crate::error::{TypeError, TypeResult};
use crate::response::check_covariance;
use crate::units::Seconds;
use ndarray::Array2;

/// Shape of the uncertainty associated with a sequence of samples.
#[derive(Clone, Debug, PartialEq)]
pub enum Uncertainty {
    /// Values are known exactly.
    Exact,

    /// Independent noise with the same standard deviation for every sample.
    Scalar(f64),

    /// Independent noise with a per-sample standard deviation.
    Diagonal(Vec<f64>),

    /// Stationary correlated noise given by its autocovariance at lags
    /// `0, 1, ..., K`; lags beyond `K` are uncorrelated.
    Autocorrelation(Vec<f64>),

    /// Full covariance matrix.
    Full(Array2<f64>),
}

impl Uncertainty {
    /// Check this uncertainty against a sequence of `n` samples.
    pub fn validate(&self, n: usize) -> TypeResult<()> {
        match self {
            Uncertainty::Exact => Ok(()),
            Uncertainty::Scalar(sigma) => {
                if sigma.is_finite() && *sigma >= 0.0 {
                    Ok(())
                } else {
                    Err(TypeError::InvalidValue(format!(
                        "standard deviation must be finite and non-negative, got {sigma}"
                    )))
                }
            }
            Uncertainty::Diagonal(sigmas) => {
                if sigmas.len() != n {
                    return Err(TypeError::LengthMismatch {
                        what: "standard deviations",
                        expected: n,
                        actual: sigmas.len(),
                    });
                }
                if sigmas.iter().any(|s| !(s.is_finite() && *s >= 0.0)) {
                    return Err(TypeError::InvalidValue(
                        "standard deviations must be finite and non-negative".to_string(),
                    ));
                }
                Ok(())
            }
            Uncertainty::Autocorrelation(acf) => {
                match acf.first() {
                    Some(v0) if v0.is_finite() && *v0 >= 0.0 => {}
                    _ => {
                        return Err(TypeError::InvalidValue(
                            "autocovariance must start with a non-negative variance".to_string(),
                        ))
                    }
                }
                if acf.iter().any(|v| !v.is_finite()) {
                    return Err(TypeError::InvalidValue(
                        "autocovariance contains non-finite values".to_string(),
                    ));
                }
                Ok(())
            }
            Uncertainty::Full(cov) => check_covariance("signal covariance", cov, n),
        }
    }

    /// True if every sample is known exactly.
    pub fn is_exact(&self) -> bool {
        match self {
            Uncertainty::Exact => true,
            Uncertainty::Scalar(s) => *s == 0.0,
            Uncertainty::Diagonal(s) => s.iter().all(|v| *v == 0.0),
            Uncertainty::Autocorrelation(acf) => acf.iter().all(|v| *v == 0.0),
            Uncertainty::Full(c) => c.iter().all(|v| *v == 0.0),
        }
    }

    /// Per-sample variances for a sequence of `n` samples.
    pub fn variances(&self, n: usize) -> Vec<f64> {
        match self {
            Uncertainty::Exact => vec![0.0; n],
            Uncertainty::Scalar(s) => vec![s * s; n],
            Uncertainty::Diagonal(s) => s.iter().map(|v| v * v).collect(),
            Uncertainty::Autocorrelation(acf) => vec![acf.first().copied().unwrap_or(0.0); n],
            Uncertainty::Full(c) => c.diag().to_vec(),
        }
    }

    /// Per-sample standard deviations for a sequence of `n` samples.
    pub fn standard_deviations(&self, n: usize) -> Vec<f64> {
        self.variances(n).into_iter().map(|v| v.max(0.0).sqrt()).collect()
    }

    /// Materialize the `n x n` covariance matrix.
    pub fn covariance(&self, n: usize) -> Array2<f64> {
        match self {
            Uncertainty::Full(c) => c.clone(),
            Uncertainty::Autocorrelation(acf) => Array2::from_shape_fn((n, n), |(i, j)| {
                acf.get(i.abs_diff(j)).copied().unwrap_or(0.0)
            }),
            other => Array2::from_diag(&ndarray::Array1::from(other.variances(n))),
        }
    }
}

/// A uniformly sampled signal with uncertainty.
#[derive(Clone, Debug, PartialEq)]
pub struct TimeSeriesSignal {
    /// Sample values.
    pub samples: Vec<f64>,

    /// Time step between consecutive samples.
    pub dt: Seconds,

    /// Time of the first sample.
    pub t_start: Seconds,

    /// Uncertainty associated with `samples`.
    pub uncertainty: Uncertainty,
}

impl TimeSeriesSignal {
    /// Create a signal, validating the uncertainty against the sample count.
    pub fn new(
        samples: Vec<f64>,
        dt: Seconds,
        t_start: Seconds,
        uncertainty: Uncertainty,
    ) -> TypeResult<Self> {
        if !(dt.0.is_finite() && dt.0 > 0.0) {
            return Err(TypeError::InvalidValue(format!(
                "sampling interval must be positive, got {}",
                dt.0
            )));
        }
        uncertainty.validate(samples.len())?;
        Ok(Self {
            samples,
            dt,
            t_start,
            uncertainty,
        })
    }

    /// Signal known exactly.
    pub fn exact(samples: Vec<f64>, dt: Seconds) -> TypeResult<Self> {
        Self::new(samples, dt, Seconds::ZERO, Uncertainty::Exact)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn standard_deviations(&self) -> Vec<f64> {
        self.uncertainty.standard_deviations(self.len())
    }
}
