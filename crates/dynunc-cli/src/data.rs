//! Plain CSV input for responses, covariance matrices and signals.
//!
//! Files are comma separated; blank lines and lines starting with `#` are
//! skipped, and a first line that does not parse as numbers is treated as a
//! header.

use anyhow::{Context, Result};
use lib_types::{Complex64, FrequencyResponse, Hertz, Uncertainty};
use ndarray::Array2;
use std::path::Path;

/// Signal samples with optional per-sample standard deviations.
#[derive(Clone, Debug, PartialEq)]
pub struct SignalTable {
    pub values: Vec<f64>,
    pub stds: Option<Vec<f64>>,
}

impl SignalTable {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Uncertainty shape, overridden by a common standard deviation if given.
    pub fn uncertainty(&self, common_std: Option<f64>) -> Uncertainty {
        match (common_std, &self.stds) {
            (Some(s), _) => Uncertainty::Scalar(s),
            (None, Some(stds)) => Uncertainty::Diagonal(stds.clone()),
            (None, None) => Uncertainty::Exact,
        }
    }
}

fn parse_rows(path: &Path) -> Result<Vec<Vec<f64>>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {:?}", path))?;

    let mut rows = Vec::new();
    let mut first = true;
    for (number, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let parsed: std::result::Result<Vec<f64>, _> =
            line.split(',').map(|field| field.trim().parse::<f64>()).collect();
        match parsed {
            Ok(row) => rows.push(row),
            // Header
            Err(_) if first => {}
            Err(e) => {
                return Err(e).with_context(|| format!("{:?} line {}: {:?}", path, number + 1, line))
            }
        }
        first = false;
    }
    Ok(rows)
}

/// Read a frequency response CSV with columns `f,re,im`.
pub fn read_response(
    path: &Path,
    covariance: Option<&Path>,
    sample_rate: f64,
) -> Result<FrequencyResponse> {
    let rows = parse_rows(path)?;
    let mut frequencies = Vec::with_capacity(rows.len());
    let mut values = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        if row.len() != 3 {
            anyhow::bail!(
                "{:?} row {}: expected 3 columns (f,re,im), got {}",
                path,
                i + 1,
                row.len()
            );
        }
        frequencies.push(Hertz(row[0]));
        values.push(Complex64::new(row[1], row[2]));
    }

    let response = FrequencyResponse::new(frequencies, values, Hertz(sample_rate))
        .with_context(|| format!("Invalid frequency response in {:?}", path))?;

    match covariance {
        Some(cov_path) => {
            let matrix = read_matrix(cov_path)?;
            response
                .with_covariance(matrix)
                .with_context(|| format!("Invalid covariance in {:?}", cov_path))
        }
        None => Ok(response),
    }
}

/// Read a dense square matrix, one row per line.
pub fn read_matrix(path: &Path) -> Result<Array2<f64>> {
    let rows = parse_rows(path)?;
    let n = rows.len();
    if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != n) {
        anyhow::bail!(
            "{:?} row {}: expected {} columns for a square matrix, got {}",
            path,
            i + 1,
            n,
            row.len()
        );
    }
    Ok(Array2::from_shape_fn((n, n), |(i, j)| rows[i][j]))
}

/// Read a signal CSV with columns `value[,std]`.
pub fn read_signal(path: &Path) -> Result<SignalTable> {
    let rows = parse_rows(path)?;
    if rows.is_empty() {
        anyhow::bail!("{:?} contains no samples", path);
    }

    let width = rows[0].len();
    if !(1..=2).contains(&width) || rows.iter().any(|r| r.len() != width) {
        anyhow::bail!("{:?}: every row must have 1 (value) or 2 (value,std) columns", path);
    }

    let values = rows.iter().map(|r| r[0]).collect();
    let stds = (width == 2).then(|| rows.iter().map(|r| r[1]).collect());
    Ok(SignalTable { values, stds })
}
