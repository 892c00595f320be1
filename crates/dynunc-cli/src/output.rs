//! Result output formatting and writing.

use crate::orchestrator::{FilterFile, FitDetails, FitOutcome, COVARIANCE_FILE};
use crate::OutputFormat;
use anyhow::{Context, Result};
use lib_dsp::PropagationMethod;
use ndarray::Array2;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Write `filter.json`, the coefficient covariance and a summary.
pub fn write_fit(outcome: &FitOutcome, output_dir: &Path, format: OutputFormat) -> Result<()> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory {:?}", output_dir))?;

    if let Some(covariance) = &outcome.covariance {
        let cov_path = output_dir.join(COVARIANCE_FILE);
        write_matrix(&cov_path, covariance)?;
        tracing::info!("Wrote coefficient covariance to {:?}", cov_path);
    }

    let filter = FilterFile {
        name: outcome.name.clone(),
        model: outcome.model.clone(),
        rms_error: outcome.rms_error,
        covariance: outcome.covariance.as_ref().map(|_| PathBuf::from(COVARIANCE_FILE)),
    };
    let filter_path = output_dir.join("filter.json");
    std::fs::write(&filter_path, serde_json::to_string_pretty(&filter)?)
        .with_context(|| format!("Failed to write {:?}", filter_path))?;
    tracing::info!("Wrote filter to {:?}", filter_path);

    let summary = fit_summary(outcome, format)?;
    let summary_path = output_dir.join(match format {
        OutputFormat::Text => "summary.txt",
        OutputFormat::Json => "summary.json",
    });
    std::fs::write(&summary_path, &summary)?;
    tracing::info!("Wrote summary to {:?}", summary_path);

    print!("{}", summary);
    Ok(())
}

/// Render the fit summary in the requested format.
pub fn fit_summary(outcome: &FitOutcome, format: OutputFormat) -> Result<String> {
    let model = &outcome.model;
    match format {
        OutputFormat::Text => {
            let mut s = String::new();
            s.push_str(&format!("Filter Fit: {}\n", outcome.name));
            s.push_str("==========================\n");
            s.push_str(&format!("Structure:   {}\n", outcome.kind().to_uppercase()));
            s.push_str(&format!("Points:      {}\n", outcome.points));
            s.push_str(&format!("Numerator:   order {}\n", model.numerator_order()));
            s.push_str(&format!("Denominator: order {}\n", model.denominator_order()));
            s.push_str(&format!("Delay:       {} samples\n", model.tau));
            s.push_str(&format!("RMS error:   {:.6e}\n", outcome.rms_error));
            match &outcome.details {
                FitDetails::Fir { method } => {
                    s.push_str(&format!("Uncertainty: {}\n", method_name(method)));
                }
                FitDetails::Iir { stabilization, stable, warning } => {
                    s.push_str(&format!(
                        "Stability:   {} ({:?}, {:.1} iterations over {} runs)\n",
                        if *stable { "stable" } else { "UNSTABLE" },
                        stabilization.state,
                        stabilization.mean_iterations,
                        stabilization.runs
                    ));
                    if let Some(w) = warning {
                        s.push_str(&format!("Warning:     {}\n", w));
                    }
                }
            }
            Ok(s)
        }
        OutputFormat::Json => {
            let details = match &outcome.details {
                FitDetails::Fir { method } => serde_json::json!({
                    "uncertainty": method_name(method),
                }),
                FitDetails::Iir { stabilization, stable, warning } => serde_json::json!({
                    "stable": stable,
                    "stabilization": format!("{:?}", stabilization.state),
                    "mean_iterations": stabilization.mean_iterations,
                    "unstable_runs": stabilization.unstable_runs,
                    "runs": stabilization.runs,
                    "warning": warning,
                }),
            };
            let json = serde_json::json!({
                "name": outcome.name,
                "structure": outcome.kind(),
                "points": outcome.points,
                "b": model.b,
                "a": model.a,
                "tau": model.tau,
                "rms_error": outcome.rms_error,
                "details": details,
            });
            Ok(format!("{}\n", serde_json::to_string_pretty(&json)?))
        }
    }
}

fn method_name(method: &PropagationMethod) -> String {
    match method {
        PropagationMethod::None => "none".to_string(),
        PropagationMethod::Svd { tol: None } => "svd".to_string(),
        PropagationMethod::Svd { tol: Some(tol) } => format!("svd (truncated at {tol:e})"),
        PropagationMethod::MonteCarlo { runs } => format!("monte carlo ({runs} runs)"),
    }
}

/// Write `value,std` rows, readable again as a signal.
pub fn write_signal(path: &Path, values: &[f64], stds: &[f64]) -> Result<()> {
    let mut f = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {:?}", path))?;

    writeln!(f, "value,std")?;
    for (v, s) in values.iter().zip(stds) {
        writeln!(f, "{},{}", v, s)?;
    }

    tracing::info!("Wrote {} samples to {:?}", values.len(), path);
    Ok(())
}

/// Write a dense matrix, one row per line.
pub fn write_matrix(path: &Path, matrix: &Array2<f64>) -> Result<()> {
    let mut f = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {:?}", path))?;
    for row in matrix.rows() {
        let line: Vec<String> = row.iter().map(|v| format!("{:e}", v)).collect();
        writeln!(f, "{}", line.join(","))?;
    }
    Ok(())
}

/// Print a short signal summary to stdout.
pub fn print_signal_summary(label: &str, values: &[f64], stds: &[f64], format: OutputFormat) -> Result<()> {
    let max_std = stds.iter().cloned().fold(0.0_f64, f64::max);
    let mean_std = if stds.is_empty() { 0.0 } else { stds.iter().sum::<f64>() / stds.len() as f64 };
    match format {
        OutputFormat::Text => {
            println!("{}", label);
            println!("  Samples:  {}", values.len());
            println!("  Mean std: {:.6e}", mean_std);
            println!("  Max std:  {:.6e}", max_std);
        }
        OutputFormat::Json => {
            let json = serde_json::json!({
                "operation": label,
                "samples": values.len(),
                "mean_std": mean_std,
                "max_std": max_std,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
    }
    Ok(())
}
