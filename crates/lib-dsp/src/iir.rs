//! Least-squares IIR fitting to a frequency response or its reciprocal.
//!
//! The fit linearizes the rational model by multiplying through with the
//! denominator: for the delayed target `T(ω) = e^{-jωτ} H(ω)^{±1}`,
//!
//! ```text
//! T(ω) A(ω) ≈ B(ω)   <=>   T(ω) Σ_{k≥1} a_k e^{-jωk} - Σ_k b_k e^{-jωk} ≈ -T(ω)
//! ```
//!
//! which is linear in `θ = [a_1..a_Na, b_0..b_Nb]` and solved in the real
//! least-squares sense. Unstable solutions are handed to the
//! [`StabilityEnforcer`], which refits with increasing delay.
//!
//! When the response carries a covariance, the whole procedure is repeated on
//! Monte Carlo draws of `[Re H, Im H]` and the coefficient covariance is the
//! sample covariance of the fitted parameter vectors.

use crate::design::DesignMatrix;
use crate::error::{DspError, DspResult};
use crate::events::{FitEvent, FitKind, FitObserver, NullObserver};
use crate::linalg::lstsq;
use crate::montecarlo::{run_parallel, MultivariateNormal, RunningMoments, DEFAULT_SEED};
use crate::stability::{
    is_stable, Candidate, StabilityEnforcer, StabilizationOutcome, StabilizationState,
};
use lib_types::{CoefficientCovariance, FilterModel, FrequencyResponse};
use ndarray::Array2;
use num_complex::Complex64;

/// Default iteration budget for stabilization.
pub const DEFAULT_MAX_STAB_ITER: usize = 50;

/// Default number of Monte Carlo runs when a covariance is supplied.
pub const DEFAULT_IIR_MC_RUNS: usize = 1000;

/// Warning attached to fits whose stabilization budget ran out.
pub const UNSTABLE_WARNING: &str = "stabilization did NOT result in a stable IIR filter";

/// Configuration for [`fit_iir`].
#[derive(Clone, Debug, PartialEq)]
pub struct IirFitConfig {
    /// Numerator order `Nb`.
    pub numerator_order: usize,

    /// Denominator order `Na`.
    pub denominator_order: usize,

    /// Initial bulk delay in samples; ignored when `max_stab_iter == 0`.
    pub initial_delay: usize,

    /// Stabilization budget; zero disables stabilization and forces `tau = 0`.
    pub max_stab_iter: usize,

    /// Fit `1/H` instead of `H`.
    pub inverse: bool,

    /// Monte Carlo runs, used only when the response has a covariance.
    pub mc_runs: usize,

    /// Seed for the Monte Carlo draws.
    pub seed: u64,
}

impl IirFitConfig {
    pub fn new(numerator_order: usize, denominator_order: usize) -> Self {
        Self {
            numerator_order,
            denominator_order,
            initial_delay: 0,
            max_stab_iter: DEFAULT_MAX_STAB_ITER,
            inverse: false,
            mc_runs: DEFAULT_IIR_MC_RUNS,
            seed: DEFAULT_SEED,
        }
    }

    pub fn with_initial_delay(mut self, tau: usize) -> Self {
        self.initial_delay = tau;
        self
    }

    pub fn with_max_stab_iter(mut self, iterations: usize) -> Self {
        self.max_stab_iter = iterations;
        self
    }

    pub fn inverse(mut self, inverse: bool) -> Self {
        self.inverse = inverse;
        self
    }

    pub fn with_mc_runs(mut self, runs: usize) -> Self {
        self.mc_runs = runs;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Check the configuration against the response it will be applied to.
    pub fn validate(&self, response: &FrequencyResponse) -> DspResult<()> {
        if response.is_empty() {
            return Err(DspError::InsufficientData { needed: 1, got: 0 });
        }
        if response.covariance().is_some() && self.mc_runs < 2 {
            return Err(DspError::InvalidConfig(format!(
                "a coefficient covariance needs at least 2 Monte Carlo runs, got {}",
                self.mc_runs
            )));
        }
        if self.inverse && response.values().iter().any(|h| h.norm_sqr() == 0.0) {
            return Err(DspError::InvalidInput(
                "cannot fit the reciprocal of a response with zero values".to_string(),
            ));
        }
        Ok(())
    }
}

/// Summary of the stabilization loop over all runs.
#[derive(Clone, Debug, PartialEq)]
pub struct StabilizationReport {
    /// Terminal state; `GaveUp` if any run exhausted its budget.
    pub state: StabilizationState,

    /// Iterations needed, averaged over runs.
    pub mean_iterations: f64,

    /// Runs that ended still unstable.
    pub unstable_runs: usize,

    /// Total number of fits performed.
    pub runs: usize,
}

/// Result of [`fit_iir`].
#[derive(Clone, Debug)]
pub struct IirFit {
    pub model: FilterModel,

    /// Covariance of `[a[1..], b]`, present when the response had one.
    pub covariance: Option<CoefficientCovariance>,

    pub stabilization: StabilizationReport,

    /// RMS of the stacked real/imaginary residual of the delay-compensated fit.
    pub rms_error: f64,
}

impl IirFit {
    /// True if all poles of the returned model are inside the unit circle.
    pub fn is_stable(&self) -> bool {
        is_stable(&self.model.a).unwrap_or(false)
    }

    /// Non-convergence warning, if the stabilization budget ran out.
    pub fn warning(&self) -> Option<&'static str> {
        (self.stabilization.state == StabilizationState::GaveUp).then_some(UNSTABLE_WARNING)
    }
}

/// Fit an IIR filter to `response` (or its reciprocal).
///
/// # Arguments
///
/// * `response` - Measured frequency response, optionally with covariance
/// * `config` - Orders, delay, stabilization budget and Monte Carlo settings
/// * `observer` - Receives progress and non-convergence events
///
/// # Errors
///
/// Input contract violations from [`IirFitConfig::validate`] and numerical
/// failures of the underlying decompositions. A stabilization budget that runs
/// out is not an error; see [`IirFit::warning`].
pub fn fit_iir(
    response: &FrequencyResponse,
    config: &IirFitConfig,
    observer: &dyn FitObserver,
) -> DspResult<IirFit> {
    config.validate(response)?;

    let omega = response.omega();
    let order = config.numerator_order.max(config.denominator_order);
    let design = DesignMatrix::new(&omega, order)?;
    let fitter = IirFitter {
        design: &design,
        omega: &omega,
        config,
    };

    observer.on_event(&FitEvent::Started {
        kind: FitKind::Iir,
        numerator_order: config.numerator_order,
        denominator_order: config.denominator_order,
        points: response.len(),
        inverse: config.inverse,
    });

    let (model, covariance, stabilization) = match response.covariance() {
        None => {
            let outcome = fitter.fit_and_stabilize(response.values(), observer)?;
            let report = StabilizationReport {
                state: outcome.state,
                mean_iterations: outcome.iterations as f64,
                unstable_runs: usize::from(outcome.state == StabilizationState::GaveUp),
                runs: 1,
            };
            let c = outcome.candidate;
            (FilterModel::new(c.b, c.a, c.tau)?, None, report)
        }
        Some(cov) => {
            observer.on_event(&FitEvent::MonteCarloStarted {
                kind: FitKind::Iir,
                runs: config.mc_runs,
            });
            let (model, cov, report) = fitter.monte_carlo(response, cov)?;
            if report.state == StabilizationState::GaveUp {
                observer.on_event(&FitEvent::StabilizationGaveUp {
                    iterations: report.mean_iterations.round() as usize,
                    tau: model.tau,
                });
            }
            (model, Some(cov), report)
        }
    };

    let rms_error = rms_error(&model, response.values(), &omega, config.inverse);
    let fit = IirFit {
        model,
        covariance,
        stabilization,
        rms_error,
    };

    observer.on_event(&FitEvent::Finished {
        kind: FitKind::Iir,
        rms_error,
        tau: fit.model.tau,
        stable: fit.is_stable(),
    });
    Ok(fit)
}

struct IirFitter<'a> {
    design: &'a DesignMatrix,
    omega: &'a [f64],
    config: &'a IirFitConfig,
}

impl IirFitter<'_> {
    /// One linearized least-squares solve for a fixed delay.
    fn fit_once(&self, values: &[Complex64], tau: usize) -> DspResult<(Vec<f64>, Vec<f64>)> {
        let na = self.config.denominator_order;
        let nb = self.config.numerator_order;
        let e = self.design.complex();
        let target = delayed_target(values, self.omega, tau, self.config.inverse);

        // D = [diag(T) E[:, 1..=Na], -E[:, 0..=Nb]]
        let p = na + nb + 1;
        let column = |i: usize, k: usize| -> Complex64 {
            if k < na {
                target[i] * e[[i, k + 1]]
            } else {
                -e[[i, k - na]]
            }
        };

        let m = values.len();
        let mut normal = Array2::<f64>::zeros((p, p));
        let mut rhs = vec![0.0; p];
        for i in 0..m {
            let row: Vec<Complex64> = (0..p).map(|k| column(i, k)).collect();
            for r in 0..p {
                let dr = row[r].conj();
                rhs[r] -= (dr * target[i]).re;
                for c in r..p {
                    normal[[r, c]] += (dr * row[c]).re;
                }
            }
        }
        for r in 0..p {
            for c in 0..r {
                normal[[r, c]] = normal[[c, r]];
            }
        }

        let theta = lstsq(&normal, &rhs)?;
        let mut a = Vec::with_capacity(na + 1);
        a.push(1.0);
        a.extend_from_slice(&theta[..na]);
        let b = theta[na..].to_vec();
        Ok((b, a))
    }

    fn fit_and_stabilize(
        &self,
        values: &[Complex64],
        observer: &dyn FitObserver,
    ) -> DspResult<StabilizationOutcome> {
        let tau = if self.config.max_stab_iter == 0 {
            0
        } else {
            self.config.initial_delay
        };
        let (b, a) = self.fit_once(values, tau)?;
        StabilityEnforcer::new(self.config.max_stab_iter).run(
            Candidate { b, a, tau },
            |tau| self.fit_once(values, tau),
            observer,
        )
    }

    fn monte_carlo(
        &self,
        response: &FrequencyResponse,
        cov: &Array2<f64>,
    ) -> DspResult<(FilterModel, CoefficientCovariance, StabilizationReport)> {
        let runs = self.config.mc_runs;
        let m = response.len();
        let mvn = MultivariateNormal::new(&response.stacked_real_imag(), cov)?;

        let outcomes = run_parallel(runs, self.config.seed, |rng, _| {
            let draw = mvn.sample(rng);
            let values: Vec<Complex64> = (0..m).map(|i| Complex64::new(draw[i], draw[m + i])).collect();
            self.fit_and_stabilize(&values, &NullObserver)
        });

        let na = self.config.denominator_order;
        let mut moments = RunningMoments::new(na + self.config.numerator_order + 1);
        let mut tau_sum = 0.0;
        let mut iteration_sum = 0.0;
        let mut unstable_runs = 0;
        let mut any_disabled = false;

        for outcome in outcomes {
            let outcome = outcome?;
            let c = &outcome.candidate;
            let params: Vec<f64> = c.a[1..].iter().chain(c.b.iter()).copied().collect();
            moments.push(&params);
            tau_sum += c.tau as f64;
            iteration_sum += outcome.iterations as f64;
            match outcome.state {
                StabilizationState::GaveUp => unstable_runs += 1,
                StabilizationState::Disabled => any_disabled = true,
                _ => {}
            }
        }

        let mean = moments.mean();
        let mut a = Vec::with_capacity(na + 1);
        a.push(1.0);
        a.extend_from_slice(&mean[..na]);
        let b = mean[na..].to_vec();
        let tau = (tau_sum / runs as f64) as usize;
        let model = FilterModel::new(b, a, tau)?;

        let state = if any_disabled {
            StabilizationState::Disabled
        } else if unstable_runs > 0 {
            StabilizationState::GaveUp
        } else {
            StabilizationState::Stable
        };

        tracing::debug!(
            "IIR Monte Carlo: {} runs, {} unstable, mean tau {}",
            runs,
            unstable_runs,
            tau_sum / runs as f64
        );

        Ok((
            model,
            moments.covariance(),
            StabilizationReport {
                state,
                mean_iterations: iteration_sum / runs as f64,
                unstable_runs,
                runs,
            },
        ))
    }
}

/// `e^{-jωτ} H^{±1}` at every frequency.
pub(crate) fn delayed_target(
    values: &[Complex64],
    omega: &[f64],
    tau: usize,
    inverse: bool,
) -> Vec<Complex64> {
    values
        .iter()
        .zip(omega)
        .map(|(h, &w)| {
            let h = if inverse { h.inv() } else { *h };
            h * Complex64::from_polar(1.0, -w * tau as f64)
        })
        .collect()
}

/// RMS over the stacked real/imaginary residual, normalized by the number of
/// frequencies.
pub(crate) fn rms_error(model: &FilterModel, values: &[Complex64], omega: &[f64], inverse: bool) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let fitted = model.delay_compensated_response(omega);
    let sum_sq: f64 = fitted
        .iter()
        .zip(values)
        .map(|(f, h)| {
            let target = if inverse { h.inv() } else { *h };
            (f - target).norm_sqr()
        })
        .sum();
    (sum_sq / values.len() as f64).sqrt()
}
