//! Least-squares FIR fitting with uncertainty propagation.
//!
//! The FIR model is linear in its taps, so the fit is a single weighted
//! least-squares problem on the stacked real form
//!
//! ```text
//! min_b ‖ W (X b - t) ‖₂,   X = [Re E; Im E],   t = [Re T; Im T],
//! T(ω) = H(ω)^{±1} e^{-jωτ}
//! ```
//!
//! solved through the SVD of `W X`. The resulting linear map
//! `M = (W X)⁺ W` carries the target covariance to the taps. Two
//! uncertainty modes are available:
//!
//! - **SVD**: singular values strictly below `trunc_svd_tol` are dropped
//!   from the pseudo-inverse and `Ub = M U_t Mᵀ`, with `U_t` obtained by
//!   linear propagation of the response covariance through `H ↦ e^{-jωτ}/H`.
//! - **Monte Carlo**: the response is resampled from its covariance, each
//!   draw is mapped to a target and fitted with the same `M`, and the taps'
//!   sample mean and covariance are reported.
//!
//! Without `trunc_svd_tol` the pseudo-inverse uses the numerical rank cutoff
//! `ε · max(m, n) · s_max` of the `m x n` design matrix, as LAPACK's
//! least-squares drivers do.

use crate::design::DesignMatrix;
use crate::error::{DspError, DspResult};
use crate::events::{FitEvent, FitKind, FitObserver};
use crate::iir::{delayed_target, rms_error};
use crate::linalg::{congruence, default_cutoff, Svd};
use crate::montecarlo::{run_parallel, MultivariateNormal, RunningMoments, DEFAULT_SEED};
use lib_types::response::propagate_pointwise;
use lib_types::{CoefficientCovariance, FilterModel, FrequencyResponse};
use ndarray::Array1;
use num_complex::Complex64;

/// How the response covariance is carried to the taps.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PropagationMethod {
    /// No covariance supplied; taps only.
    None,
    /// Truncated-SVD linear propagation.
    Svd { tol: Option<f64> },
    /// Monte Carlo propagation with the given number of runs.
    MonteCarlo { runs: usize },
}

/// Configuration for [`fit_fir`].
#[derive(Clone, Debug, PartialEq)]
pub struct FirFitConfig {
    /// Filter order `N`; the fit has `N + 1` taps.
    pub order: usize,

    /// Bulk delay `tau` in samples.
    pub delay: usize,

    /// Fit `1/H` instead of `H`.
    pub inverse: bool,

    /// Optional weights for the `2M` stacked real/imaginary rows.
    pub weights: Option<Vec<f64>>,

    /// Request Monte Carlo propagation with this many runs.
    pub mc_runs: Option<usize>,

    /// Request SVD propagation, keeping singular values `>=` this cutoff.
    pub trunc_svd_tol: Option<f64>,

    /// Seed for Monte Carlo draws.
    pub seed: u64,
}

impl FirFitConfig {
    pub fn new(order: usize, delay: usize) -> Self {
        Self {
            order,
            delay,
            inverse: false,
            weights: None,
            mc_runs: None,
            trunc_svd_tol: None,
            seed: DEFAULT_SEED,
        }
    }

    pub fn inverse(mut self, inverse: bool) -> Self {
        self.inverse = inverse;
        self
    }

    pub fn with_weights(mut self, weights: Vec<f64>) -> Self {
        self.weights = Some(weights);
        self
    }

    pub fn with_mc_runs(mut self, runs: usize) -> Self {
        self.mc_runs = Some(runs);
        self
    }

    pub fn with_trunc_svd_tol(mut self, tol: f64) -> Self {
        self.trunc_svd_tol = Some(tol);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Decide the propagation method given whether a covariance is present.
    ///
    /// # Errors
    ///
    /// - `InvalidConfig` if both methods are requested, if a method is
    ///   requested without a covariance, or if fewer than two Monte Carlo
    ///   runs are requested.
    /// - `InvalidInput` for a negative or non-finite `trunc_svd_tol`.
    /// - `NotSupported` for SVD propagation of a direct (non-inverse) fit.
    pub fn resolve(&self, has_covariance: bool) -> DspResult<PropagationMethod> {
        if let (Some(runs), Some(tol)) = (self.mc_runs, self.trunc_svd_tol) {
            return Err(DspError::InvalidConfig(format!(
                "only one of mc_runs and trunc_svd_tol can be provided, got mc_runs={runs} and trunc_svd_tol={tol}"
            )));
        }
        if let Some(tol) = self.trunc_svd_tol {
            if !(tol.is_finite() && tol >= 0.0) {
                return Err(DspError::InvalidInput(format!(
                    "trunc_svd_tol must be finite and non-negative, got {tol}"
                )));
            }
        }
        if !has_covariance {
            if self.mc_runs.is_some() {
                return Err(DspError::InvalidConfig(
                    "Monte Carlo propagation requires a response covariance".to_string(),
                ));
            }
            if self.trunc_svd_tol.is_some() {
                return Err(DspError::InvalidConfig(
                    "SVD propagation requires a response covariance".to_string(),
                ));
            }
            return Ok(PropagationMethod::None);
        }
        if let Some(runs) = self.mc_runs {
            if runs <= 1 {
                return Err(DspError::InvalidConfig(format!(
                    "number of Monte Carlo runs must be greater than 1, got {runs}"
                )));
            }
            return Ok(PropagationMethod::MonteCarlo { runs });
        }
        if !self.inverse {
            return Err(DspError::NotSupported(
                "SVD propagation is only implemented for fits to the reciprocal response; \
                 use Monte Carlo for direct fits"
                    .to_string(),
            ));
        }
        Ok(PropagationMethod::Svd {
            tol: self.trunc_svd_tol,
        })
    }

    fn check_weights(&self, rows: usize) -> DspResult<()> {
        if let Some(w) = &self.weights {
            if w.len() != rows {
                return Err(DspError::LengthMismatch {
                    expected: rows,
                    actual: w.len(),
                });
            }
            if w.iter().any(|v| !(v.is_finite() && *v >= 0.0)) {
                return Err(DspError::InvalidInput(
                    "weights must be finite and non-negative".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Result of [`fit_fir`].
#[derive(Clone, Debug)]
pub struct FirFit {
    /// FIR model, `a == [1]`, `tau` as configured.
    pub model: FilterModel,

    /// Covariance of the taps, present when the response had one.
    pub covariance: Option<CoefficientCovariance>,

    /// RMS of the stacked real/imaginary residual of the delay-compensated fit.
    pub rms_error: f64,

    pub method: PropagationMethod,
}

/// Fit an order-`N` FIR filter to `response` (or its reciprocal).
///
/// # Errors
///
/// See [`FirFitConfig::resolve`]; additionally shape errors for the weights
/// and numerical failures of the SVD.
pub fn fit_fir(
    response: &FrequencyResponse,
    config: &FirFitConfig,
    observer: &dyn FitObserver,
) -> DspResult<FirFit> {
    let method = config.resolve(response.covariance().is_some())?;
    if response.is_empty() {
        return Err(DspError::InsufficientData { needed: 1, got: 0 });
    }
    config.check_weights(2 * response.len())?;
    if config.inverse && response.values().iter().any(|h| h.norm_sqr() == 0.0) {
        return Err(DspError::InvalidInput(
            "cannot fit the reciprocal of a response with zero values".to_string(),
        ));
    }

    observer.on_event(&FitEvent::Started {
        kind: FitKind::Fir,
        numerator_order: config.order,
        denominator_order: 0,
        points: response.len(),
        inverse: config.inverse,
    });

    let omega = response.omega();
    let design = DesignMatrix::new(&omega, config.order)?;
    let weighted = match &config.weights {
        Some(w) => design.weighted_stacked_real(w)?,
        None => design.stacked_real(),
    };

    let svd = Svd::new(&weighted)?;
    let (rows, cols) = weighted.dim();
    let cutoff = match method {
        PropagationMethod::Svd { tol: Some(tol) } => tol,
        _ => default_cutoff(&svd, rows, cols),
    };
    let kept = svd.rank(cutoff);
    tracing::debug!(
        "FIR design matrix {}x{}: keeping {} of {} singular values",
        rows,
        cols,
        kept,
        svd.singular_values.len()
    );

    // M = (W X)⁺ W
    let mut propagation = svd.pseudo_inverse(cutoff);
    if let Some(w) = &config.weights {
        for (mut column, wi) in propagation.columns_mut().into_iter().zip(w) {
            column *= *wi;
        }
    }

    let target_of = |values: &[Complex64]| -> Array1<f64> {
        let target = delayed_target(values, &omega, config.delay, config.inverse);
        stacked(&target)
    };

    let nominal = propagation.dot(&target_of(response.values())).to_vec();

    let (taps, covariance) = match (method, response.covariance()) {
        (PropagationMethod::Svd { .. }, Some(cov)) => {
            let derivatives = target_derivatives(response.values(), &omega, config.delay, config.inverse);
            let target_cov = propagate_pointwise(cov, &derivatives);
            (nominal, Some(congruence(&propagation, &target_cov)))
        }
        (PropagationMethod::MonteCarlo { runs }, Some(cov)) => {
            observer.on_event(&FitEvent::MonteCarloStarted {
                kind: FitKind::Fir,
                runs,
            });
            let m = response.len();
            let mvn = MultivariateNormal::new(&response.stacked_real_imag(), cov)?;
            let draws = run_parallel(runs, config.seed, |rng, _| {
                let draw = mvn.sample(rng);
                let values: Vec<Complex64> =
                    (0..m).map(|i| Complex64::new(draw[i], draw[m + i])).collect();
                propagation.dot(&target_of(&values)).to_vec()
            });

            let mut moments = RunningMoments::new(config.order + 1);
            for taps in &draws {
                moments.push(taps);
            }
            (moments.mean(), Some(moments.covariance()))
        }
        _ => (nominal, None),
    };

    let model = FilterModel::fir(taps, config.delay)?;
    let rms_error = rms_error(&model, response.values(), &omega, config.inverse);

    observer.on_event(&FitEvent::Finished {
        kind: FitKind::Fir,
        rms_error,
        tau: config.delay,
        stable: true,
    });

    Ok(FirFit {
        model,
        covariance,
        rms_error,
        method,
    })
}

fn stacked(values: &[Complex64]) -> Array1<f64> {
    values
        .iter()
        .map(|v| v.re)
        .chain(values.iter().map(|v| v.im))
        .collect()
}

/// Derivative of `H ↦ H^{±1} e^{-jωτ}` at every frequency.
fn target_derivatives(values: &[Complex64], omega: &[f64], tau: usize, inverse: bool) -> Vec<Complex64> {
    values
        .iter()
        .zip(omega)
        .map(|(h, &w)| {
            let delay = Complex64::from_polar(1.0, -w * tau as f64);
            if inverse {
                -delay / (h * h)
            } else {
                delay
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::events::testing::RecordingObserver;
    use crate::events::NullObserver;
    use lib_types::Hertz;
    use ndarray::Array2;

    const P: f64 = 0.3;

    /// Two-pole low-pass with unit DC gain and a double pole at `P`.
    fn two_pole_response(points: usize) -> FrequencyResponse {
        let fs = Hertz(500e3);
        let freqs: Vec<Hertz> = (0..points)
            .map(|i| Hertz(120e3 * i as f64 / (points - 1) as f64))
            .collect();
        let values = freqs
            .iter()
            .map(|f| {
                let z_inv = Complex64::from_polar(1.0, -f.normalized_angular(fs));
                let d = Complex64::new(1.0, 0.0) - z_inv * P;
                Complex64::new((1.0 - P) * (1.0 - P), 0.0) / (d * d)
            })
            .collect();
        FrequencyResponse::new(freqs, values, fs).unwrap()
    }

    #[test]
    fn test_direct_fit_reconstructs_lowpass() {
        let h = two_pole_response(200);
        let fit = fit_fir(&h, &FirFitConfig::new(12, 6), &NullObserver).unwrap();
        assert_eq!(fit.model.b.len(), 13);
        assert!(fit.model.is_fir());
        assert_eq!(fit.model.tau, 6);
        assert!(fit.rms_error < 1e-2, "rms error {}", fit.rms_error);
        assert_eq!(fit.method, PropagationMethod::None);
        assert!(fit.covariance.is_none());
    }

    #[test]
    fn test_inverse_fit_is_exact_for_fir_reciprocal() {
        let h = two_pole_response(200);
        let fit = fit_fir(&h, &FirFitConfig::new(12, 6).inverse(true), &NullObserver).unwrap();
        let g = (1.0 - P) * (1.0 - P);
        let expected = [1.0 / g, -2.0 * P / g, P * P / g];

        for (k, b) in fit.model.b.iter().enumerate() {
            let want = if (6..9).contains(&k) { expected[k - 6] } else { 0.0 };
            assert!((b - want).abs() < 1e-7, "tap {}: {} vs {}", k, b, want);
        }
        assert!(fit.rms_error < 1e-8);
    }

    #[test]
    fn test_uniform_weights_do_not_change_fit() {
        let h = two_pole_response(50);
        let plain = fit_fir(&h, &FirFitConfig::new(8, 4), &NullObserver).unwrap();
        let weighted = fit_fir(
            &h,
            &FirFitConfig::new(8, 4).with_weights(vec![0.5; 100]),
            &NullObserver,
        )
        .unwrap();
        for (a, b) in plain.model.b.iter().zip(&weighted.model.b) {
            assert!((a - b).abs() < 1e-10);
        }
    }

    #[test]
    fn test_zero_covariance_matches_plain_fit() {
        let h = two_pole_response(40);
        let plain = fit_fir(&h, &FirFitConfig::new(10, 5).inverse(true), &NullObserver).unwrap();
        let with_zero = h.clone().with_covariance(Array2::zeros((80, 80))).unwrap();
        let svd = fit_fir(
            &with_zero,
            &FirFitConfig::new(10, 5).inverse(true),
            &NullObserver,
        )
        .unwrap();

        assert!(matches!(svd.method, PropagationMethod::Svd { tol: None }));
        for (a, b) in plain.model.b.iter().zip(&svd.model.b) {
            assert!((a - b).abs() < 1e-12);
        }
        assert!(svd.covariance.unwrap().iter().all(|v| v.abs() < 1e-30));
    }

    #[test]
    fn test_svd_and_monte_carlo_agree() {
        let h = two_pole_response(50);
        let h = h.with_covariance(Array2::eye(100) * 1e-6).unwrap();

        let svd = fit_fir(&h, &FirFitConfig::new(8, 4).inverse(true), &NullObserver).unwrap();
        let mc = fit_fir(
            &h,
            &FirFitConfig::new(8, 4).inverse(true).with_mc_runs(10_000),
            &NullObserver,
        )
        .unwrap();

        // Bounds are five standard errors of the sample mean and sample
        // covariance over 10,000 draws. With equal real and imaginary noise
        // the second-order bias of 1/H vanishes, so the linear propagation is
        // the only other difference and lies far below these bounds.
        let runs = 10_000.0;
        let u_svd = svd.covariance.unwrap();
        let u_mc = mc.covariance.unwrap();

        for (i, (a, b)) in mc.model.b.iter().zip(&svd.model.b).enumerate() {
            let se = (u_svd[[i, i]] / runs).sqrt();
            assert!((a - b).abs() <= 5.0 * se, "tap {}: {} vs {}", i, a, b);
        }
        for ((i, j), b) in u_svd.indexed_iter() {
            let se = ((u_svd[[i, i]] * u_svd[[j, j]] + b * b) / runs).sqrt();
            let a = u_mc[[i, j]];
            assert!((a - b).abs() <= 5.0 * se, "[{}, {}]: {} vs {}", i, j, a, b);
        }
    }

    #[test]
    fn test_direct_fit_with_monte_carlo() {
        let h = two_pole_response(30);
        let h = h.with_covariance(Array2::eye(60) * 1e-8).unwrap();
        let fit = fit_fir(
            &h,
            &FirFitConfig::new(6, 3).with_mc_runs(500).with_seed(3),
            &NullObserver,
        )
        .unwrap();
        assert_eq!(fit.method, PropagationMethod::MonteCarlo { runs: 500 });
        let u = fit.covariance.unwrap();
        assert_eq!(u.dim(), (7, 7));
        assert!(u.diag().iter().all(|v| *v > 0.0));
    }

    #[test]
    fn test_option_combinations() {
        let cfg = FirFitConfig::new(4, 2).inverse(true);
        assert!(matches!(cfg.resolve(false), Ok(PropagationMethod::None)));
        assert!(matches!(cfg.resolve(true), Ok(PropagationMethod::Svd { tol: None })));

        let both = cfg.clone().with_mc_runs(10).with_trunc_svd_tol(0.0);
        assert_eq!(both.resolve(true).unwrap_err().kind(), ErrorKind::UnsupportedCombination);

        let mc_no_cov = cfg.clone().with_mc_runs(1);
        assert_eq!(
            mc_no_cov.resolve(false).unwrap_err().kind(),
            ErrorKind::UnsupportedCombination
        );

        let svd_no_cov = cfg.clone().with_trunc_svd_tol(0.0);
        assert_eq!(
            svd_no_cov.resolve(false).unwrap_err().kind(),
            ErrorKind::UnsupportedCombination
        );

        for bad in [-1e-3, f64::NAN, f64::INFINITY] {
            assert_eq!(
                cfg.clone().with_trunc_svd_tol(bad).resolve(true).unwrap_err().kind(),
                ErrorKind::InputContract
            );
        }
        assert!(matches!(
            cfg.clone().with_trunc_svd_tol(1e-8).resolve(true),
            Ok(PropagationMethod::Svd { tol: Some(_) })
        ));

        let one_run = cfg.clone().with_mc_runs(1);
        assert_eq!(one_run.resolve(true).unwrap_err().kind(), ErrorKind::UnsupportedCombination);

        let direct = FirFitConfig::new(4, 2);
        assert_eq!(direct.resolve(true).unwrap_err().kind(), ErrorKind::Unimplemented);
        assert_eq!(
            direct.clone().with_trunc_svd_tol(0.0).resolve(true).unwrap_err().kind(),
            ErrorKind::Unimplemented
        );
        assert!(direct.with_mc_runs(2).resolve(true).is_ok());
    }

    #[test]
    fn test_events_reported() {
        let h = two_pole_response(20);
        let h = h.with_covariance(Array2::eye(40) * 1e-8).unwrap();
        let observer = RecordingObserver::default();
        fit_fir(&h, &FirFitConfig::new(4, 2).with_mc_runs(10), &observer).unwrap();

        let events = observer.events();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], FitEvent::Started { kind: FitKind::Fir, points: 20, .. }));
        assert_eq!(events[1], FitEvent::MonteCarloStarted { kind: FitKind::Fir, runs: 10 });
        assert!(matches!(events[2], FitEvent::Finished { tau: 2, stable: true, .. }));
    }

    #[test]
    fn test_weights_length_checked() {
        let h = two_pole_response(10);
        let result = fit_fir(
            &h,
            &FirFitConfig::new(4, 2).with_weights(vec![1.0; 10]),
            &NullObserver,
        );
        assert!(matches!(
            result,
            Err(DspError::LengthMismatch { expected: 20, actual: 10 })
        ));
    }
}
