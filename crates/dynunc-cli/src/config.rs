//! Fit job configuration loading and validation.

use anyhow::{Context, Result};
use lib_dsp::montecarlo::DEFAULT_SEED;
use lib_dsp::{FirFitConfig, IirFitConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level fit job.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FitJob {
    /// Job name, echoed in the summary.
    #[serde(default = "default_name")]
    pub name: String,

    /// Measured frequency response.
    pub response: ResponseSource,

    /// Filter structure to fit.
    pub filter: FilterSpec,

    /// Seed for Monte Carlo draws.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

/// Where the frequency response comes from.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResponseSource {
    /// CSV with columns `f,re,im`.
    pub path: PathBuf,

    /// Optional `2M x 2M` covariance CSV over `[Re H, Im H]`.
    #[serde(default)]
    pub covariance: Option<PathBuf>,

    /// Sampling rate in Hz of the filter to be fitted.
    pub sample_rate: f64,
}

/// Filter structure, tagged by `type`.
///
/// ```toml
/// [filter]
/// type = "fir"
/// order = 20
/// delay = 10
/// inverse = true
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FilterSpec {
    Fir {
        order: usize,
        #[serde(default)]
        delay: usize,
        #[serde(default)]
        inverse: bool,
        #[serde(default)]
        weights: Option<Vec<f64>>,
        #[serde(default)]
        mc_runs: Option<usize>,
        #[serde(default)]
        trunc_svd_tol: Option<f64>,
    },
    Iir {
        numerator_order: usize,
        denominator_order: usize,
        #[serde(default)]
        initial_delay: usize,
        #[serde(default = "default_max_stab_iter")]
        max_stab_iter: usize,
        #[serde(default)]
        inverse: bool,
        #[serde(default = "default_iir_mc_runs")]
        mc_runs: usize,
    },
}

fn default_name() -> String { "fit".to_string() }
fn default_seed() -> u64 { DEFAULT_SEED }
fn default_max_stab_iter() -> usize { lib_dsp::iir::DEFAULT_MAX_STAB_ITER }
fn default_iir_mc_runs() -> usize { lib_dsp::iir::DEFAULT_IIR_MC_RUNS }

impl FitJob {
    /// Library configuration for an FIR job.
    pub fn fir_config(&self) -> Option<FirFitConfig> {
        match &self.filter {
            FilterSpec::Fir {
                order,
                delay,
                inverse,
                weights,
                mc_runs,
                trunc_svd_tol,
            } => {
                let mut config = FirFitConfig::new(*order, *delay)
                    .inverse(*inverse)
                    .with_seed(self.seed);
                if let Some(w) = weights {
                    config = config.with_weights(w.clone());
                }
                if let Some(runs) = mc_runs {
                    config = config.with_mc_runs(*runs);
                }
                if let Some(tol) = trunc_svd_tol {
                    config = config.with_trunc_svd_tol(*tol);
                }
                Some(config)
            }
            FilterSpec::Iir { .. } => None,
        }
    }

    /// Library configuration for an IIR job.
    pub fn iir_config(&self) -> Option<IirFitConfig> {
        match &self.filter {
            FilterSpec::Iir {
                numerator_order,
                denominator_order,
                initial_delay,
                max_stab_iter,
                inverse,
                mc_runs,
            } => Some(
                IirFitConfig::new(*numerator_order, *denominator_order)
                    .with_initial_delay(*initial_delay)
                    .with_max_stab_iter(*max_stab_iter)
                    .inverse(*inverse)
                    .with_mc_runs(*mc_runs)
                    .with_seed(self.seed),
            ),
            FilterSpec::Fir { .. } => None,
        }
    }
}

/// Load a job from a TOML or JSON file.
///
/// Relative data paths are taken relative to the job file.
pub fn load_config(path: &Path) -> Result<FitJob> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let mut job: FitJob = if path.extension().map_or(false, |e| e == "json") {
        serde_json::from_str(&content).with_context(|| "Failed to parse config as JSON")?
    } else {
        toml::from_str(&content).with_context(|| "Failed to parse config as TOML")?
    };

    if let Some(base) = path.parent() {
        job.response.path = base.join(&job.response.path);
        job.response.covariance = job.response.covariance.map(|c| base.join(c));
    }

    validate_config(&job)?;

    Ok(job)
}

/// Validate referenced files and numeric settings.
fn validate_config(job: &FitJob) -> Result<()> {
    if !job.response.path.exists() {
        anyhow::bail!("Frequency response file not found: {:?}", job.response.path);
    }
    if let Some(ref covariance) = job.response.covariance {
        if !covariance.exists() {
            anyhow::bail!("Covariance file not found: {:?}", covariance);
        }
    }
    if !(job.response.sample_rate.is_finite() && job.response.sample_rate > 0.0) {
        anyhow::bail!(
            "Sample rate must be positive, got {}",
            job.response.sample_rate
        );
    }
    if let FilterSpec::Iir { denominator_order: 0, .. } = job.filter {
        tracing::warn!("IIR job with denominator order 0; consider an FIR job instead");
    }

    Ok(())
}
