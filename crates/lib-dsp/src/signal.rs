//! Filtering of sampled signals.
//!
//! [`apply_filter`] picks the propagation route from the filter structure:
//! FIR filters are propagated analytically or by Monte Carlo on request,
//! IIR filters always by Monte Carlo.

use crate::error::DspResult;
use crate::montecarlo::DEFAULT_SEED;
use crate::propagate::{
    apply_fir_monte_carlo, apply_fir_with_uncertainty, apply_iir_monte_carlo, FirApplyOptions,
};
use lib_types::{CoefficientCovariance, FilterModel, TimeSeriesSignal};

/// Monte Carlo runs used for IIR filters when none are requested.
pub const DEFAULT_FILTER_MC_RUNS: usize = 10_000;

/// How uncertainty is carried through [`apply_filter`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SignalPropagation {
    /// Analytic for FIR filters; IIR filters fall back to
    /// [`DEFAULT_FILTER_MC_RUNS`] Monte Carlo runs with [`DEFAULT_SEED`].
    #[default]
    Linear,
    /// Monte Carlo with the given number of runs and seed.
    MonteCarlo { runs: usize, seed: u64 },
}

/// Apply `model` to `signal` and return the filtered signal.
///
/// The output keeps the time axis of the input. `covariance` is ordered as
/// [`FilterModel::stacked_parameters`]: `b` for FIR filters, `[a[1..], b]`
/// otherwise. FIR filtering uses zero initial conditions and no output shift.
///
/// # Errors
///
/// Propagates the input-contract and configuration errors of the underlying
/// FIR or IIR routine.
pub fn apply_filter(
    signal: &TimeSeriesSignal,
    model: &FilterModel,
    covariance: Option<&CoefficientCovariance>,
    propagation: SignalPropagation,
) -> DspResult<TimeSeriesSignal> {
    let x = &signal.samples;
    let ux = &signal.uncertainty;

    let result = if model.is_fir() {
        let options = FirApplyOptions::default();
        match propagation {
            SignalPropagation::Linear => {
                apply_fir_with_uncertainty(x, ux, &model.b, covariance, &options)?
            }
            SignalPropagation::MonteCarlo { runs, seed } => {
                apply_fir_monte_carlo(x, ux, &model.b, covariance, &options, runs, seed)?
            }
        }
    } else {
        let (runs, seed) = match propagation {
            SignalPropagation::Linear => {
                tracing::debug!(
                    "IIR filter: propagating with {} Monte Carlo runs",
                    DEFAULT_FILTER_MC_RUNS
                );
                (DEFAULT_FILTER_MC_RUNS, DEFAULT_SEED)
            }
            SignalPropagation::MonteCarlo { runs, seed } => (runs, seed),
        };
        apply_iir_monte_carlo(x, ux, model, covariance, runs, seed)?
    };

    Ok(TimeSeriesSignal::new(
        result.values,
        signal.dt,
        signal.t_start,
        result.uncertainty,
    )?)
}
