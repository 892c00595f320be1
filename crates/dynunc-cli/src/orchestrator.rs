//! Job orchestration: fit, apply and convolve.

use crate::config::FitJob;
use crate::data::{self, SignalTable};
use anyhow::{Context, Result};
use lib_dsp::{
    apply_fir_monte_carlo, apply_fir_with_uncertainty, apply_iir_monte_carlo,
    convolve_with_uncertainty, fit_fir, fit_iir, ConvolutionMode, Convolved, FirApplyOptions,
    InitialConditions, PropagatedSignal, PropagationMethod, StabilizationReport, TracingObserver,
    DEFAULT_FILTER_MC_RUNS,
};
use lib_types::{CoefficientCovariance, FilterModel};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the coefficient covariance written next to `filter.json`.
pub const COVARIANCE_FILE: &str = "covariance.csv";

/// Fitted filter as stored in `filter.json`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilterFile {
    pub name: String,

    #[serde(flatten)]
    pub model: FilterModel,

    pub rms_error: f64,

    /// Coefficient covariance CSV, relative to this file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub covariance: Option<PathBuf>,
}

impl FilterFile {
    /// Load a filter and its coefficient covariance, if one is referenced.
    pub fn load(path: &Path) -> Result<(Self, Option<CoefficientCovariance>)> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read filter file: {:?}", path))?;
        let file: FilterFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse filter file: {:?}", path))?;

        let covariance = match &file.covariance {
            Some(relative) => {
                let full = path.parent().map_or(relative.clone(), |base| base.join(relative));
                Some(data::read_matrix(&full)?)
            }
            None => None,
        };
        Ok((file, covariance))
    }
}

/// Structure-specific part of a fit result.
#[derive(Clone, Debug)]
pub enum FitDetails {
    Fir {
        method: PropagationMethod,
    },
    Iir {
        stabilization: StabilizationReport,
        stable: bool,
        warning: Option<&'static str>,
    },
}

/// Result of a fit job.
#[derive(Clone, Debug)]
pub struct FitOutcome {
    pub name: String,
    pub model: FilterModel,
    pub covariance: Option<CoefficientCovariance>,
    pub rms_error: f64,
    pub points: usize,
    pub details: FitDetails,
}

impl FitOutcome {
    pub fn kind(&self) -> &'static str {
        match self.details {
            FitDetails::Fir { .. } => "fir",
            FitDetails::Iir { .. } => "iir",
        }
    }
}

/// Runs a [`FitJob`].
pub struct Orchestrator {
    job: FitJob,
}

impl Orchestrator {
    pub fn new(job: FitJob) -> Self {
        Self { job }
    }

    /// Load the response and run the configured fit.
    pub fn run(&self) -> Result<FitOutcome> {
        tracing::info!("Starting fit: {}", self.job.name);

        let source = &self.job.response;
        let response = data::read_response(
            &source.path,
            source.covariance.as_deref(),
            source.sample_rate,
        )?;
        tracing::info!(
            "Loaded {} frequency points{}",
            response.len(),
            if response.covariance().is_some() { " with covariance" } else { "" }
        );

        if let Some(config) = self.job.fir_config() {
            let fit = fit_fir(&response, &config, &TracingObserver).context("FIR fit failed")?;
            return Ok(FitOutcome {
                name: self.job.name.clone(),
                model: fit.model,
                covariance: fit.covariance,
                rms_error: fit.rms_error,
                points: response.len(),
                details: FitDetails::Fir { method: fit.method },
            });
        }

        let config = self
            .job
            .iir_config()
            .context("Job describes neither an FIR nor an IIR fit")?;
        let fit = fit_iir(&response, &config, &TracingObserver).context("IIR fit failed")?;
        if let Some(warning) = fit.warning() {
            tracing::warn!("{}", warning);
        }
        let stable = fit.is_stable();
        let warning = fit.warning();
        Ok(FitOutcome {
            name: self.job.name.clone(),
            model: fit.model,
            covariance: fit.covariance,
            rms_error: fit.rms_error,
            points: response.len(),
            details: FitDetails::Iir {
                stabilization: fit.stabilization,
                stable,
                warning,
            },
        })
    }
}

/// Parameters of the `apply` command.
#[derive(Clone, Debug)]
pub struct ApplyRequest {
    pub filter: PathBuf,
    pub signal: PathBuf,
    /// Common standard deviation overriding the signal file's column.
    pub noise_std: Option<f64>,
    /// Output shift; defaults to the filter delay.
    pub shift: Option<usize>,
    pub constant_start: bool,
    /// Propagate by Monte Carlo instead of analytically.
    pub mc_runs: Option<usize>,
    pub seed: u64,
}

/// Apply a fitted filter to a signal with uncertainty.
///
/// FIR filters are propagated analytically unless Monte Carlo runs are
/// requested. IIR filters are always propagated by Monte Carlo, with zero
/// initial conditions and no output shift.
pub fn run_apply(request: &ApplyRequest) -> Result<(SignalTable, PropagatedSignal)> {
    let (filter, covariance) = FilterFile::load(&request.filter)?;
    let signal = data::read_signal(&request.signal)?;
    let ux = signal.uncertainty(request.noise_std);

    if !filter.model.is_fir() {
        if request.shift.is_some() || request.constant_start {
            anyhow::bail!("--shift and --constant-start apply to FIR filters only");
        }
        let runs = request.mc_runs.unwrap_or(DEFAULT_FILTER_MC_RUNS);
        tracing::info!(
            "Applying IIR filter '{}' (orders {}/{}) to {} samples with {} Monte Carlo runs",
            filter.name,
            filter.model.numerator_order(),
            filter.model.denominator_order(),
            signal.len(),
            runs
        );
        let result = apply_iir_monte_carlo(
            &signal.values,
            &ux,
            &filter.model,
            covariance.as_ref(),
            runs,
            request.seed,
        )
        .context("Filtering failed")?;
        return Ok((signal, result));
    }

    let options = FirApplyOptions::default()
        .with_shift(request.shift.unwrap_or(filter.model.tau))
        .with_initial_conditions(if request.constant_start {
            InitialConditions::Constant
        } else {
            InitialConditions::Zero
        });

    tracing::info!(
        "Applying {}-tap filter '{}' to {} samples",
        filter.model.b.len(),
        filter.name,
        signal.len()
    );

    let result = match request.mc_runs {
        Some(runs) => apply_fir_monte_carlo(
            &signal.values,
            &ux,
            &filter.model.b,
            covariance.as_ref(),
            &options,
            runs,
            request.seed,
        ),
        None => apply_fir_with_uncertainty(
            &signal.values,
            &ux,
            &filter.model.b,
            covariance.as_ref(),
            &options,
        ),
    }
    .context("Filtering failed")?;

    Ok((signal, result))
}

/// Convolve two signals read from CSV.
pub fn run_convolve(first: &Path, second: &Path, mode: ConvolutionMode) -> Result<Convolved> {
    let a = data::read_signal(first)?;
    let b = data::read_signal(second)?;
    let ua = covariance_of(&a);
    let ub = covariance_of(&b);

    tracing::info!(
        "Convolving {} and {} samples in {} mode",
        a.len(),
        b.len(),
        mode
    );

    convolve_with_uncertainty(&a.values, ua.as_ref(), &b.values, ub.as_ref(), mode)
        .context("Convolution failed")
}

fn covariance_of(table: &SignalTable) -> Option<Array2<f64>> {
    let uncertainty = table.uncertainty(None);
    (!uncertainty.is_exact()).then(|| uncertainty.covariance(table.len()))
}
