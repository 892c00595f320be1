//! Uncertainty propagation through FIR filters.
//!
//! A filter `b` with coefficient covariance `Ub`, optionally preceded by a
//! fixed low-pass `blow`, is applied to a signal with uncertainty. The
//! cascade acts on a window of the last `K = len(b) + len(blow) - 1` raw
//! samples. For uncorrelated or stationary input noise the output variance
//! at every sample is evaluated on that window alone:
//!
//! ```text
//! Var(y_n) = cᵀ C_w c + u_nᵀ Ub u_n + tr(P C_w)
//! c = Gᵀ b,   P = Gᵀ Ub G,   u_n = G w_n
//! ```
//!
//! where `G` is the `len(b) x K` Toeplitz matrix of `blow`, `w_n` the raw
//! window and `C_w` its covariance. A full input covariance yields the full
//! output covariance
//!
//! ```text
//! Uy = A Ux Aᵀ + X Ub Xᵀ + Σ_{k,l} Ub[k,l] S_k Ux S_lᵀ
//! ```
//!
//! with `A` the convolution with `c`, `X` the matrix of low-passed windows and
//! `S_k` the shift by `k` samples after low-pass filtering. The windowed
//! variances equal the diagonal of that formula.

use crate::convolution::direct_convolve;
use crate::error::{DspError, DspResult};
use crate::linalg::congruence;
use crate::montecarlo::{run_parallel, MultivariateNormal, RunningMoments};
use lib_types::response::check_covariance;
use lib_types::{CoefficientCovariance, FilterModel, Uncertainty};
use ndarray::{Array1, Array2, ArrayView1};
use rand::Rng;
use rand_distr::StandardNormal;
use rayon::prelude::*;

/// Work (`len(x) * len(b)`) above which filtering runs in parallel.
const PARALLEL_THRESHOLD: usize = 1 << 16;

/// Monte Carlo runs evaluated per batch before reduction.
const MC_BATCH: usize = 256;

/// Samples assumed before the start of the signal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InitialConditions {
    /// Samples before the start are exactly zero.
    #[default]
    Zero,
    /// Samples before the start repeat the first sample, including its
    /// uncertainty; they are the same random variable as `x[0]`.
    Constant,
}

/// Options for applying an FIR filter with uncertainty.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FirApplyOptions {
    /// Fixed low-pass applied before the filter; its coefficients are exact.
    pub low_pass: Option<Vec<f64>>,

    /// Rotate the output left by this many samples.
    pub shift: usize,

    pub initial_conditions: InitialConditions,
}

impl FirApplyOptions {
    pub fn with_low_pass(mut self, low_pass: Vec<f64>) -> Self {
        self.low_pass = Some(low_pass);
        self
    }

    pub fn with_shift(mut self, shift: usize) -> Self {
        self.shift = shift;
        self
    }

    pub fn with_initial_conditions(mut self, initial_conditions: InitialConditions) -> Self {
        self.initial_conditions = initial_conditions;
        self
    }
}

/// Filtered values and their uncertainty.
#[derive(Clone, Debug, PartialEq)]
pub struct PropagatedSignal {
    pub values: Vec<f64>,

    /// `Diagonal` standard deviations, or `Full` for a full input covariance.
    pub uncertainty: Uncertainty,
}

/// Causal FIR filtering with zero initial conditions, output length `len(x)`.
pub fn fir_filter(b: &[f64], x: &[f64]) -> Vec<f64> {
    let tap = |n: usize| -> f64 {
        b.iter()
            .take(n + 1)
            .enumerate()
            .map(|(k, bk)| bk * x[n - k])
            .sum()
    };

    if x.len() * b.len() > PARALLEL_THRESHOLD {
        (0..x.len()).into_par_iter().map(tap).collect()
    } else {
        (0..x.len()).map(tap).collect()
    }
}

/// Apply `b` (with covariance `ub`) to `x` and propagate the uncertainty
/// analytically.
///
/// # Arguments
///
/// * `x` - Input samples
/// * `ux` - Uncertainty of `x`
/// * `b` - FIR coefficients
/// * `ub` - Optional covariance of `b`
/// * `options` - Low-pass, output shift and initial conditions
///
/// # Returns
///
/// Output samples of the same length as `x`, with `Diagonal` standard
/// deviations or a `Full` covariance when `ux` is `Full`.
///
/// # Errors
///
/// Returns an input-contract error for empty inputs, mismatched shapes, an
/// invalid covariance, or `shift >= len(x)`.
pub fn apply_fir_with_uncertainty(
    x: &[f64],
    ux: &Uncertainty,
    b: &[f64],
    ub: Option<&Array2<f64>>,
    options: &FirApplyOptions,
) -> DspResult<PropagatedSignal> {
    check_inputs(x, ux, b, ub, options)?;
    let low_pass = low_pass_of(options);
    let source = ExtendedSignal {
        x,
        uncertainty: ux,
        initial_conditions: options.initial_conditions,
    };

    tracing::debug!(
        "Applying {}-tap filter ({} low-pass taps) to {} samples",
        b.len(),
        low_pass.len(),
        x.len()
    );

    let (values, uncertainty) = match ux {
        Uncertainty::Full(_) => {
            let (values, cov) = full_propagation(&source, b, ub, low_pass);
            (values, Uncertainty::Full(cov))
        }
        _ => {
            let cascade = direct_convolve(b, low_pass);
            let values = source.filter(&cascade);
            let variances = windowed_variances(&source, &cascade, b.len(), low_pass, ub);
            let stds = variances.into_iter().map(|v| v.max(0.0).sqrt()).collect();
            (values, Uncertainty::Diagonal(stds))
        }
    };

    Ok(rotate_left(values, uncertainty, options.shift))
}

/// Apply `b` to `x` by Monte Carlo: inputs and coefficients are drawn from
/// their distributions and the filtered draws are summarized by their mean
/// and (co)variance.
///
/// # Errors
///
/// As [`apply_fir_with_uncertainty`]; additionally `InvalidConfig` for fewer
/// than two runs.
pub fn apply_fir_monte_carlo(
    x: &[f64],
    ux: &Uncertainty,
    b: &[f64],
    ub: Option<&Array2<f64>>,
    options: &FirApplyOptions,
    runs: usize,
    seed: u64,
) -> DspResult<PropagatedSignal> {
    check_inputs(x, ux, b, ub, options)?;
    if runs < 2 {
        return Err(DspError::InvalidConfig(format!(
            "number of Monte Carlo runs must be greater than 1, got {runs}"
        )));
    }
    let low_pass = low_pass_of(options);
    let n = x.len();

    let input_sampler = InputSampler::new(x, ux)?;
    let coefficient_sampler = match ub {
        Some(ub) => Some(MultivariateNormal::new(b, ub)?),
        None => None,
    };

    tracing::debug!("Monte Carlo filter application: {} runs over {} samples", runs, n);

    let full = matches!(ux, Uncertainty::Full(_));
    let mut moments = if full {
        RunningMoments::new(n)
    } else {
        RunningMoments::diagonal(n)
    };

    let mut start = 0;
    while start < runs {
        let batch = MC_BATCH.min(runs - start);
        let outputs = run_parallel(batch, seed.wrapping_add(start as u64), |rng, _| {
            let xd = input_sampler.sample(rng);
            let bd = match &coefficient_sampler {
                Some(sampler) => sampler.sample(rng),
                None => b.to_vec(),
            };
            let cascade = direct_convolve(&bd, low_pass);
            ExtendedSignal {
                x: &xd,
                uncertainty: &Uncertainty::Exact,
                initial_conditions: options.initial_conditions,
            }
            .filter(&cascade)
        });
        for y in &outputs {
            moments.push(y);
        }
        start += batch;
    }

    Ok(rotate_left(moments.mean(), summarize(&moments, full), options.shift))
}

/// Direct-form filtering by `b / a` with zero initial conditions, output
/// length `len(x)`. `a[0]` must be non-zero.
pub fn lfilter(b: &[f64], a: &[f64], x: &[f64]) -> Vec<f64> {
    let mut y = vec![0.0; x.len()];
    for n in 0..x.len() {
        let mut acc = 0.0;
        for (k, bk) in b.iter().enumerate().take(n + 1) {
            acc += bk * x[n - k];
        }
        for (k, ak) in a.iter().enumerate().skip(1).take(n) {
            acc -= ak * y[n - k];
        }
        y[n] = acc / a[0];
    }
    y
}

/// Apply the rational filter `model` to `x` by Monte Carlo.
///
/// Coefficients are drawn from `N([a[1..], b], uab)` with `a[0]` held at 1,
/// and every draw is filtered with zero initial conditions. Draws of an
/// unstable denominator are kept as they are.
///
/// # Errors
///
/// Input-contract errors for an empty signal or an uncertainty or covariance
/// of the wrong size; `InvalidConfig` for fewer than two runs.
pub fn apply_iir_monte_carlo(
    x: &[f64],
    ux: &Uncertainty,
    model: &FilterModel,
    uab: Option<&CoefficientCovariance>,
    runs: usize,
    seed: u64,
) -> DspResult<PropagatedSignal> {
    if x.is_empty() {
        return Err(DspError::InsufficientData { needed: 1, got: 0 });
    }
    ux.validate(x.len())?;
    let parameters = model.stacked_parameters();
    if let Some(uab) = uab {
        check_covariance("filter coefficient covariance", uab, parameters.len())?;
    }
    if runs < 2 {
        return Err(DspError::InvalidConfig(format!(
            "number of Monte Carlo runs must be greater than 1, got {runs}"
        )));
    }
    let n = x.len();
    let na = model.denominator_order();

    let input_sampler = InputSampler::new(x, ux)?;
    let coefficient_sampler = match uab {
        Some(uab) => Some(MultivariateNormal::new(&parameters, uab)?),
        None => None,
    };

    tracing::debug!(
        "Monte Carlo IIR application: orders ({}, {}), {} runs over {} samples",
        model.numerator_order(),
        na,
        runs,
        n
    );

    let full = matches!(ux, Uncertainty::Full(_));
    let mut moments = if full {
        RunningMoments::new(n)
    } else {
        RunningMoments::diagonal(n)
    };

    let mut start = 0;
    while start < runs {
        let batch = MC_BATCH.min(runs - start);
        let outputs = run_parallel(batch, seed.wrapping_add(start as u64), |rng, _| {
            let xd = input_sampler.sample(rng);
            match &coefficient_sampler {
                Some(sampler) => {
                    let theta = sampler.sample(rng);
                    let a: Vec<f64> = std::iter::once(1.0).chain(theta[..na].iter().copied()).collect();
                    lfilter(&theta[na..], &a, &xd)
                }
                None => lfilter(&model.b, &model.a, &xd),
            }
        });
        for y in &outputs {
            moments.push(y);
        }
        start += batch;
    }

    Ok(PropagatedSignal {
        values: moments.mean(),
        uncertainty: summarize(&moments, full),
    })
}

fn summarize(moments: &RunningMoments, full: bool) -> Uncertainty {
    if full {
        Uncertainty::Full(moments.covariance())
    } else {
        Uncertainty::Diagonal(moments.variances().into_iter().map(|v| v.max(0.0).sqrt()).collect())
    }
}

/// `θ ∗ x` truncated to `len(x)` with the full output covariance, zero
/// initial conditions.
pub(crate) fn filter_full(
    x: &[f64],
    ux: Option<&Array2<f64>>,
    theta: &[f64],
    utheta: Option<&Array2<f64>>,
) -> (Vec<f64>, Option<Array2<f64>>) {
    let y = fir_filter(theta, x);
    if ux.is_none() && utheta.is_none() {
        return (y, None);
    }

    let n = x.len();
    let l = theta.len();
    let mut uy = Array2::<f64>::zeros((n, n));

    if let Some(ux) = ux {
        // A Ux Aᵀ: filter the columns of Ux, then the rows of the result.
        let columns: Vec<Vec<f64>> = (0..n)
            .into_par_iter()
            .map(|j| fir_filter(theta, &ux.column(j).to_vec()))
            .collect();
        let rows: Vec<Vec<f64>> = (0..n)
            .into_par_iter()
            .map(|i| {
                let row: Vec<f64> = columns.iter().map(|col| col[i]).collect();
                fir_filter(theta, &row)
            })
            .collect();
        for (i, row) in rows.iter().enumerate() {
            for (j, v) in row.iter().enumerate() {
                uy[[i, j]] += v;
            }
        }
    }

    if let Some(ut) = utheta {
        let windows = Array2::from_shape_fn((n, l), |(i, k)| if i >= k { x[i - k] } else { 0.0 });
        uy += &congruence(&windows, ut);
    }

    if let (Some(ux), Some(ut)) = (ux, utheta) {
        let cross: Vec<Vec<f64>> = (0..n)
            .into_par_iter()
            .map(|i| {
                (0..n)
                    .map(|j| {
                        let mut acc = 0.0;
                        for k in 0..l.min(i + 1) {
                            for m in 0..l.min(j + 1) {
                                let u = ut[[k, m]];
                                if u != 0.0 {
                                    acc += u * ux[[i - k, j - m]];
                                }
                            }
                        }
                        acc
                    })
                    .collect()
            })
            .collect();
        for (i, row) in cross.iter().enumerate() {
            for (j, v) in row.iter().enumerate() {
                uy[[i, j]] += v;
            }
        }
    }

    (y, Some(uy))
}

fn check_inputs(
    x: &[f64],
    ux: &Uncertainty,
    b: &[f64],
    ub: Option<&Array2<f64>>,
    options: &FirApplyOptions,
) -> DspResult<()> {
    if x.is_empty() {
        return Err(DspError::InsufficientData { needed: 1, got: 0 });
    }
    if b.is_empty() {
        return Err(DspError::InvalidInput("filter has no coefficients".to_string()));
    }
    if matches!(&options.low_pass, Some(lp) if lp.is_empty()) {
        return Err(DspError::InvalidInput("low-pass filter has no coefficients".to_string()));
    }
    if options.shift >= x.len() {
        return Err(DspError::InvalidInput(format!(
            "shift {} must be smaller than the signal length {}",
            options.shift,
            x.len()
        )));
    }
    ux.validate(x.len())?;
    if let Some(ub) = ub {
        check_covariance("filter coefficient covariance", ub, b.len())?;
    }
    Ok(())
}

fn low_pass_of(options: &FirApplyOptions) -> &[f64] {
    const IDENTITY: &[f64] = &[1.0];
    options.low_pass.as_deref().unwrap_or(IDENTITY)
}

/// A signal extended to negative indices by its initial conditions.
struct ExtendedSignal<'a> {
    x: &'a [f64],
    uncertainty: &'a Uncertainty,
    initial_conditions: InitialConditions,
}

impl ExtendedSignal<'_> {
    fn index(&self, i: isize) -> Option<usize> {
        if i >= 0 {
            Some(i as usize)
        } else {
            match self.initial_conditions {
                InitialConditions::Zero => None,
                InitialConditions::Constant => Some(0),
            }
        }
    }

    fn value(&self, i: isize) -> f64 {
        self.index(i).map_or(0.0, |k| self.x[k])
    }

    fn covariance(&self, i: isize, j: isize) -> f64 {
        let (Some(a), Some(b)) = (self.index(i), self.index(j)) else {
            return 0.0;
        };
        match self.uncertainty {
            Uncertainty::Exact => 0.0,
            Uncertainty::Scalar(s) => {
                if a == b {
                    s * s
                } else {
                    0.0
                }
            }
            Uncertainty::Diagonal(s) => {
                if a == b {
                    s[a] * s[a]
                } else {
                    0.0
                }
            }
            Uncertainty::Autocorrelation(acf) => acf.get(a.abs_diff(b)).copied().unwrap_or(0.0),
            Uncertainty::Full(cov) => cov[[a, b]],
        }
    }

    /// Number of samples needed before the start to fill a window of `k`.
    fn lead(&self, k: usize) -> usize {
        match self.initial_conditions {
            InitialConditions::Zero => 0,
            InitialConditions::Constant => k.saturating_sub(1),
        }
    }

    /// Samples from index `-lead` to `len(x) - 1`.
    fn extended_values(&self, lead: usize) -> Vec<f64> {
        (0..lead + self.x.len())
            .map(|i| self.value(i as isize - lead as isize))
            .collect()
    }

    fn extended_covariance(&self, lead: usize) -> Array2<f64> {
        let m = lead + self.x.len();
        Array2::from_shape_fn((m, m), |(i, j)| {
            self.covariance(i as isize - lead as isize, j as isize - lead as isize)
        })
    }

    /// Filter with `taps`, honoring the initial conditions.
    fn filter(&self, taps: &[f64]) -> Vec<f64> {
        let lead = self.lead(taps.len());
        let y = fir_filter(taps, &self.extended_values(lead));
        y[lead..].to_vec()
    }
}

/// Output variances over a moving window of raw samples.
fn windowed_variances(
    source: &ExtendedSignal<'_>,
    cascade: &[f64],
    filter_len: usize,
    low_pass: &[f64],
    ub: Option<&Array2<f64>>,
) -> Vec<f64> {
    let k = cascade.len();
    let g = Array2::from_shape_fn((filter_len, k), |(row, col)| {
        col.checked_sub(row)
            .and_then(|j| low_pass.get(j))
            .copied()
            .unwrap_or(0.0)
    });
    let projected = ub.map(|ub| g.t().dot(ub).dot(&g));
    let c = ArrayView1::from(cascade);

    (0..source.x.len())
        .into_par_iter()
        .map(|t| {
            let t = t as isize;
            let cw = Array2::from_shape_fn((k, k), |(r, q)| {
                source.covariance(t - r as isize, t - q as isize)
            });
            let mut var = c.dot(&cw.dot(&c));
            if let (Some(ub), Some(projected)) = (ub, projected.as_ref()) {
                let w: Array1<f64> = (0..k).map(|r| source.value(t - r as isize)).collect();
                let u = g.dot(&w);
                var += u.dot(&ub.dot(&u));
                var += (projected * &cw).sum();
            }
            var
        })
        .collect()
}

fn full_propagation(
    source: &ExtendedSignal<'_>,
    b: &[f64],
    ub: Option<&Array2<f64>>,
    low_pass: &[f64],
) -> (Vec<f64>, Array2<f64>) {
    let lead = source.lead(b.len() + low_pass.len() - 1);
    let x = source.extended_values(lead);
    let ux = source.extended_covariance(lead);

    let (x_low, u_low) = filter_full(&x, Some(&ux), low_pass, None);
    let (y, uy) = filter_full(&x_low, u_low.as_ref(), b, ub);

    let n = source.x.len();
    let uy = uy.map_or_else(
        || Array2::zeros((n, n)),
        |u| u.slice(ndarray::s![lead.., lead..]).to_owned(),
    );
    (y[lead..].to_vec(), uy)
}

fn rotate_left(mut values: Vec<f64>, uncertainty: Uncertainty, shift: usize) -> PropagatedSignal {
    if shift == 0 {
        return PropagatedSignal { values, uncertainty };
    }
    values.rotate_left(shift);
    let uncertainty = match uncertainty {
        Uncertainty::Diagonal(mut s) => {
            s.rotate_left(shift);
            Uncertainty::Diagonal(s)
        }
        Uncertainty::Full(cov) => {
            let n = cov.nrows();
            Uncertainty::Full(Array2::from_shape_fn((n, n), |(i, j)| {
                cov[[(i + shift) % n, (j + shift) % n]]
            }))
        }
        other => other,
    };
    PropagatedSignal { values, uncertainty }
}

/// Draws input signals for Monte Carlo application.
enum InputSampler<'a> {
    Exact(&'a [f64]),
    Independent(&'a [f64], Vec<f64>),
    Correlated(MultivariateNormal),
}

impl<'a> InputSampler<'a> {
    fn new(x: &'a [f64], ux: &Uncertainty) -> DspResult<Self> {
        Ok(match ux {
            Uncertainty::Exact => InputSampler::Exact(x),
            Uncertainty::Scalar(_) | Uncertainty::Diagonal(_) => {
                InputSampler::Independent(x, ux.standard_deviations(x.len()))
            }
            Uncertainty::Autocorrelation(_) | Uncertainty::Full(_) => {
                InputSampler::Correlated(MultivariateNormal::new(x, &ux.covariance(x.len()))?)
            }
        })
    }

    fn sample<R: Rng>(&self, rng: &mut R) -> Vec<f64> {
        match self {
            InputSampler::Exact(x) => x.to_vec(),
            InputSampler::Independent(x, stds) => x
                .iter()
                .zip(stds)
                .map(|(v, s)| v + s * rng.sample::<f64, _>(StandardNormal))
                .collect(),
            InputSampler::Correlated(mvn) => mvn.sample(rng),
        }
    }
}
