//! Monte Carlo support: seeded sampling, parallel runs and running moments.
//!
//! Each run owns a `StdRng` seeded with `seed + run_index`, and results are
//! gathered in run order before being reduced sequentially. The outcome of a
//! Monte Carlo evaluation therefore depends only on the seed and the number
//! of runs, never on the number of rayon worker threads.

use crate::error::{DspError, DspResult};
use crate::linalg::psd_factor;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rayon::prelude::*;

/// Default seed for reproducible Monte Carlo evaluations.
pub const DEFAULT_SEED: u64 = 0x5eed_d1a6;

/// Multivariate normal distribution with a positive semi-definite covariance.
#[derive(Clone, Debug)]
pub struct MultivariateNormal {
    mean: Array1<f64>,
    factor: Array2<f64>,
}

impl MultivariateNormal {
    /// Build the sampler for `N(mean, cov)`.
    ///
    /// # Errors
    ///
    /// Returns an error on shape mismatch or if the covariance cannot be
    /// decomposed.
    pub fn new(mean: &[f64], cov: &Array2<f64>) -> DspResult<Self> {
        let (rows, cols) = cov.dim();
        if rows != cols {
            return Err(DspError::NotSquare { rows, cols });
        }
        if rows != mean.len() {
            return Err(DspError::LengthMismatch {
                expected: mean.len(),
                actual: rows,
            });
        }
        Ok(Self {
            mean: Array1::from(mean.to_vec()),
            factor: psd_factor(cov)?,
        })
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    /// Draw one sample.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> Vec<f64> {
        let z: Array1<f64> = (0..self.dim())
            .map(|_| rng.sample::<f64, _>(StandardNormal))
            .collect();
        (&self.mean + &self.factor.dot(&z)).to_vec()
    }
}

/// Random number generator for run `run` of an evaluation seeded with `seed`.
#[inline]
pub fn run_rng(seed: u64, run: usize) -> StdRng {
    StdRng::seed_from_u64(seed.wrapping_add(run as u64))
}

/// Execute `runs` independent Monte Carlo runs in parallel, results in run order.
pub fn run_parallel<T, F>(runs: usize, seed: u64, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(&mut StdRng, usize) -> T + Sync,
{
    (0..runs)
        .into_par_iter()
        .map(|run| {
            let mut rng = run_rng(seed, run);
            f(&mut rng, run)
        })
        .collect()
}

/// Welford accumulator for the sample mean and covariance of vectors.
///
/// [`RunningMoments::diagonal`] tracks only the variances, which keeps the
/// accumulator linear in the dimension for long signals.
#[derive(Clone, Debug)]
pub struct RunningMoments {
    count: usize,
    mean: Array1<f64>,
    m2_diag: Array1<f64>,
    m2: Option<Array2<f64>>,
}

impl RunningMoments {
    pub fn new(dim: usize) -> Self {
        Self {
            count: 0,
            mean: Array1::zeros(dim),
            m2_diag: Array1::zeros(dim),
            m2: Some(Array2::zeros((dim, dim))),
        }
    }

    pub fn diagonal(dim: usize) -> Self {
        Self {
            count: 0,
            mean: Array1::zeros(dim),
            m2_diag: Array1::zeros(dim),
            m2: None,
        }
    }

    /// Add one observation.
    pub fn push(&mut self, x: &[f64]) {
        debug_assert_eq!(x.len(), self.mean.len());
        self.count += 1;
        let n = self.count as f64;

        let delta: Array1<f64> = x.iter().zip(self.mean.iter()).map(|(a, m)| a - m).collect();
        self.mean.scaled_add(1.0 / n, &delta);
        let delta2: Array1<f64> = x.iter().zip(self.mean.iter()).map(|(a, m)| a - m).collect();

        self.m2_diag += &(&delta * &delta2);
        if let Some(m2) = self.m2.as_mut() {
            let dim = delta.len();
            for i in 0..dim {
                for j in 0..dim {
                    m2[[i, j]] += delta[i] * delta2[j];
                }
            }
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn mean(&self) -> Vec<f64> {
        self.mean.to_vec()
    }

    /// Unbiased sample variances (normalized by `n - 1`).
    pub fn variances(&self) -> Vec<f64> {
        if self.count < 2 {
            return vec![0.0; self.m2_diag.len()];
        }
        let scale = 1.0 / (self.count - 1) as f64;
        self.m2_diag.iter().map(|v| v * scale).collect()
    }

    /// Unbiased sample covariance (normalized by `n - 1`).
    ///
    /// A diagonal accumulator returns the variances on the diagonal.
    pub fn covariance(&self) -> Array2<f64> {
        let dim = self.m2_diag.len();
        if self.count < 2 {
            return Array2::zeros((dim, dim));
        }
        let scale = 1.0 / (self.count - 1) as f64;
        match &self.m2 {
            Some(m2) => {
                Array2::from_shape_fn(m2.dim(), |(i, j)| 0.5 * (m2[[i, j]] + m2[[j, i]]) * scale)
            }
            None => Array2::from_diag(&self.m2_diag.mapv(|v| v * scale)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_running_moments_match_two_pass() {
        let data = [
            vec![1.0, 2.0],
            vec![2.0, 1.0],
            vec![4.0, 0.0],
            vec![3.0, 3.0],
        ];
        let mut acc = RunningMoments::new(2);
        for x in &data {
            acc.push(x);
        }
        let mean = acc.mean();
        assert!((mean[0] - 2.5).abs() < 1e-12);
        assert!((mean[1] - 1.5).abs() < 1e-12);

        // var(x0) = (2.25 + 0.25 + 2.25 + 0.25) / 3
        let cov = acc.covariance();
        assert!((cov[[0, 0]] - 5.0 / 3.0).abs() < 1e-12);
        // cov(x0, x1) = (-0.75 + 0.25 - 2.25 + 0.75) / 3
        assert!((cov[[0, 1]] + 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(cov[[0, 1]], cov[[1, 0]]);

        let mut diag = RunningMoments::diagonal(2);
        for x in &data {
            diag.push(x);
        }
        let var = diag.variances();
        assert!((var[0] - cov[[0, 0]]).abs() < 1e-12);
        assert!((var[1] - cov[[1, 1]]).abs() < 1e-12);
        assert_eq!(diag.covariance()[[0, 1]], 0.0);
    }

    #[test]
    fn test_parallel_runs_are_deterministic() {
        let draw = |rng: &mut StdRng, _run: usize| rng.gen::<f64>();
        let first = run_parallel(64, 7, draw);
        let second = run_parallel(64, 7, draw);
        assert_eq!(first, second);
        assert_ne!(run_parallel(64, 8, draw), first);
    }

    #[test]
    fn test_multivariate_normal_moments() {
        let cov = array![[1.0, 0.8], [0.8, 2.0]];
        let mvn = MultivariateNormal::new(&[1.0, -1.0], &cov).unwrap();
        let samples = run_parallel(20_000, DEFAULT_SEED, |rng, _| mvn.sample(rng));

        let mut acc = RunningMoments::new(2);
        for s in &samples {
            acc.push(s);
        }
        let mean = acc.mean();
        let est = acc.covariance();
        assert!((mean[0] - 1.0).abs() < 0.05);
        assert!((mean[1] + 1.0).abs() < 0.05);
        assert!((est[[0, 1]] - 0.8).abs() < 0.08);
        assert!((est[[1, 1]] - 2.0).abs() < 0.12);
    }

    #[test]
    fn test_multivariate_normal_shape_checked() {
        let cov = Array2::<f64>::eye(3);
        assert!(matches!(
            MultivariateNormal::new(&[0.0, 0.0], &cov),
            Err(DspError::LengthMismatch { expected: 2, actual: 3 })
        ));
    }
}
