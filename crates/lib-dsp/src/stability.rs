//! Stability analysis and enforcement for rational digital filters.
//!
//! A least-squares IIR fit may place poles outside the unit circle. The
//! enforcement loop mirrors such poles to `1/conj(p)`, estimates how much
//! extra bulk delay the mirrored model needs from the median difference of
//! group delays, and asks the fitter to refit with the larger delay. The loop
//! is an explicit state machine with a bounded iteration budget:
//!
//! ```text
//!            refit, still unstable
//!              +-----------+
//!              v           |
//! Unstable -> Stabilizing -+-> Stable
//!    |             |
//!    +-------------+---------> GaveUp   (budget exhausted)
//! ```
//!
//! A budget of zero puts the enforcer in `Disabled`: the initial fit is
//! returned untouched.

use crate::error::{DspError, DspResult};
use crate::events::{FitEvent, FitObserver};
use crate::fft::FftEngine;
use crate::linalg::{poly_from_roots, poly_roots};
use num_complex::Complex64;

/// Default number of frequency bins for group delay evaluation.
pub const DEFAULT_GROUP_DELAY_BINS: usize = 512;

/// Bins whose denominator magnitude falls below this are treated as poles.
const POLE_BIN_TOL: f64 = 1e-12;

/// Poles of the filter with denominator `a`.
pub fn roots(a: &[f64]) -> DspResult<Vec<Complex64>> {
    poly_roots(a)
}

/// True if every pole lies strictly inside the unit circle.
pub fn is_stable(a: &[f64]) -> DspResult<bool> {
    Ok(roots(a)?.iter().all(|p| p.norm() < 1.0))
}

/// Mirror poles outside the unit circle to `1/conj(p)`.
///
/// The returned polynomial keeps the leading coefficient of `a`.
pub fn map_inside(a: &[f64]) -> DspResult<Vec<f64>> {
    let lead = a.first().copied().unwrap_or(1.0);
    let mapped: Vec<Complex64> = roots(a)?
        .into_iter()
        .map(|p| if p.norm() > 1.0 { p.conj().inv() } else { p })
        .collect();
    Ok(poly_from_roots(&mapped).into_iter().map(|c| c * lead).collect())
}

/// Frequency response `B(e^{jω}) / A(e^{jω})`.
pub fn freqz(b: &[f64], a: &[f64], omega: &[f64]) -> Vec<Complex64> {
    let eval = |c: &[f64], w: f64| -> Complex64 {
        let z_inv = Complex64::from_polar(1.0, -w);
        c.iter().rev().fold(Complex64::new(0.0, 0.0), |acc, &v| acc * z_inv + v)
    };
    omega.iter().map(|&w| eval(b, w) / eval(a, w)).collect()
}

/// Group delay in samples at `nfft` equally spaced frequencies in `[0, π)`.
///
/// Uses the polynomial form `c = b * reverse(a)`, `gd = Re(FFT(k c_k) / FFT(c)) - Na`.
///
/// # Errors
///
/// Returns `InvalidFftSize` unless `nfft` is a power of two, and
/// `InsufficientData` for empty coefficient vectors.
pub fn group_delay(b: &[f64], a: &[f64], nfft: usize) -> DspResult<Vec<f64>> {
    if b.is_empty() || a.is_empty() {
        return Err(DspError::InsufficientData { needed: 1, got: 0 });
    }
    if !nfft.is_power_of_two() {
        return Err(DspError::InvalidFftSize(nfft));
    }
    let na = (a.len() - 1) as f64;
    let reversed: Vec<f64> = a.iter().rev().copied().collect();
    let c = crate::convolution::direct_convolve(b, &reversed);
    let cr: Vec<f64> = c.iter().enumerate().map(|(k, v)| k as f64 * v).collect();

    let len = (2 * nfft).max(c.len().next_power_of_two());
    let mut engine = FftEngine::new();
    let num = engine.rfft_padded(&cr, len)?;
    let den = engine.rfft_padded(&c, len)?;

    // Bins are sampled at 2πk/len; resample to the first nfft bins of a 2*nfft grid.
    let step = len / (2 * nfft);
    Ok((0..nfft)
        .map(|k| {
            let (n, d) = (num[k * step], den[k * step]);
            if d.norm() < POLE_BIN_TOL {
                -na
            } else {
                (n / d).re - na
            }
        })
        .collect())
}

/// Median of the finite values in `data`, 0 if there are none.
pub(crate) fn median(data: &[f64]) -> f64 {
    let mut sorted: Vec<f64> = data.iter().filter(|x| x.is_finite()).copied().collect();
    if sorted.is_empty() {
        return 0.0;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));
    let len = sorted.len();
    if len % 2 == 0 {
        (sorted[len / 2 - 1] + sorted[len / 2]) / 2.0
    } else {
        sorted[len / 2]
    }
}

/// Additional delay (samples) suggested by mirroring the unstable poles of `a`.
pub fn stabilizing_delay(b: &[f64], a: &[f64], nfft: usize) -> DspResult<i64> {
    let a_stable = map_inside(a)?;
    let g_orig = group_delay(b, a, nfft)?;
    let g_mapped = group_delay(b, &a_stable, nfft)?;
    let diff: Vec<f64> = g_mapped.iter().zip(&g_orig).map(|(m, o)| m - o).collect();
    Ok(median(&diff).ceil() as i64)
}

/// State of the stabilization loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StabilizationState {
    /// Stabilization was not requested.
    Disabled,
    /// The current fit has poles on or outside the unit circle.
    Unstable,
    /// At least one refit was done and the model is still unstable.
    Stabilizing,
    /// All poles are strictly inside the unit circle.
    Stable,
    /// The iteration budget ran out while still unstable.
    GaveUp,
}

impl StabilizationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Disabled | Self::Stable | Self::GaveUp)
    }
}

/// Numerator, denominator and delay produced by one fit.
#[derive(Clone, Debug, PartialEq)]
pub struct Candidate {
    pub b: Vec<f64>,
    pub a: Vec<f64>,
    pub tau: usize,
}

/// Final outcome of the stabilization loop.
#[derive(Clone, Debug, PartialEq)]
pub struct StabilizationOutcome {
    pub candidate: Candidate,
    pub state: StabilizationState,
    pub iterations: usize,
}

/// Bounded pole-mapping stabilization loop.
#[derive(Clone, Debug)]
pub struct StabilityEnforcer {
    max_iterations: usize,
    group_delay_bins: usize,
}

impl StabilityEnforcer {
    pub fn new(max_iterations: usize) -> Self {
        Self {
            max_iterations,
            group_delay_bins: DEFAULT_GROUP_DELAY_BINS,
        }
    }

    pub fn with_group_delay_bins(mut self, bins: usize) -> Self {
        self.group_delay_bins = bins;
        self
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Drive `initial` to a terminal state.
    ///
    /// `refit` is called with the new delay whenever another iteration is
    /// needed and must return the refitted numerator and denominator.
    pub fn run<F>(
        &self,
        initial: Candidate,
        mut refit: F,
        observer: &dyn FitObserver,
    ) -> DspResult<StabilizationOutcome>
    where
        F: FnMut(usize) -> DspResult<(Vec<f64>, Vec<f64>)>,
    {
        let mut candidate = initial;
        let mut iterations = 0;

        let mut state = if self.max_iterations == 0 {
            StabilizationState::Disabled
        } else if is_stable(&candidate.a)? {
            StabilizationState::Stable
        } else {
            StabilizationState::Unstable
        };

        while !state.is_terminal() {
            if iterations >= self.max_iterations {
                state = StabilizationState::GaveUp;
                observer.on_event(&FitEvent::StabilizationGaveUp {
                    iterations,
                    tau: candidate.tau,
                });
                break;
            }

            let extra = stabilizing_delay(&candidate.b, &candidate.a, self.group_delay_bins)?;
            let tau = (candidate.tau as i64 + extra).max(0) as usize;
            let (b, a) = refit(tau)?;
            candidate = Candidate { b, a, tau };
            iterations += 1;
            observer.on_event(&FitEvent::StabilizationStep { iteration: iterations, tau });

            state = if is_stable(&candidate.a)? {
                StabilizationState::Stable
            } else {
                StabilizationState::Stabilizing
            };
        }

        Ok(StabilizationOutcome {
            candidate,
            state,
            iterations,
        })
    }
}
