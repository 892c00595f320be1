//! Dense linear algebra on top of `nalgebra`.
//!
//! The crate stores matrices as `ndarray::Array2<f64>`; decompositions are
//! delegated to `nalgebra` by copying into a `DMatrix` and back. Matrices in
//! this crate are at most a few hundred rows, so the copies are negligible
//! next to the decompositions themselves.

use crate::error::{DspError, DspResult};
use nalgebra::DMatrix;
use ndarray::Array2;
use num_complex::Complex64;

/// Iteration cap for the iterative decompositions.
const MAX_ITERATIONS: usize = 10_000;

/// Copy an `ndarray` matrix into a `nalgebra::DMatrix`.
pub fn to_dmatrix(a: &Array2<f64>) -> DMatrix<f64> {
    let (rows, cols) = a.dim();
    DMatrix::from_fn(rows, cols, |i, j| a[[i, j]])
}

/// Copy a `nalgebra::DMatrix` into an `ndarray` matrix.
pub fn from_dmatrix(m: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

/// Thin singular value decomposition `A = U diag(s) Vᵀ`.
#[derive(Clone, Debug)]
pub struct Svd {
    pub u: Array2<f64>,
    pub singular_values: Vec<f64>,
    pub v_t: Array2<f64>,
}

impl Svd {
    /// Decompose `a`.
    ///
    /// # Errors
    ///
    /// Returns `NumericalInstability` if the iteration does not converge or
    /// the input contains non-finite values.
    pub fn new(a: &Array2<f64>) -> DspResult<Self> {
        if a.iter().any(|v| !v.is_finite()) {
            return Err(DspError::NumericalInstability(
                "SVD input contains non-finite values".to_string(),
            ));
        }
        let m = to_dmatrix(a);
        let svd = m
            .try_svd(true, true, f64::EPSILON, MAX_ITERATIONS)
            .ok_or_else(|| DspError::NumericalInstability("SVD did not converge".to_string()))?;

        let (u, v_t) = match (svd.u.as_ref(), svd.v_t.as_ref()) {
            (Some(u), Some(v_t)) => (from_dmatrix(u), from_dmatrix(v_t)),
            _ => {
                return Err(DspError::NumericalInstability(
                    "SVD factors were not computed".to_string(),
                ))
            }
        };

        Ok(Self {
            u,
            singular_values: svd.singular_values.iter().copied().collect(),
            v_t,
        })
    }

    /// Largest singular value.
    pub fn max_singular_value(&self) -> f64 {
        self.singular_values.iter().fold(0.0_f64, |acc, s| acc.max(*s))
    }

    /// Pseudo-inverse `V diag(1/s) Uᵀ`, dropping singular values `< cutoff`
    /// and exact zeros.
    pub fn pseudo_inverse(&self, cutoff: f64) -> Array2<f64> {
        let k = self.singular_values.len();
        let rows = self.v_t.ncols();
        let cols = self.u.nrows();

        let mut pinv = Array2::<f64>::zeros((rows, cols));
        for r in 0..k {
            let s = self.singular_values[r];
            if s < cutoff || s == 0.0 {
                continue;
            }
            let inv = 1.0 / s;
            for i in 0..rows {
                let v = self.v_t[[r, i]] * inv;
                if v == 0.0 {
                    continue;
                }
                for j in 0..cols {
                    pinv[[i, j]] += v * self.u[[j, r]];
                }
            }
        }
        pinv
    }

    /// Number of singular values kept by [`Svd::pseudo_inverse`] at `cutoff`.
    pub fn rank(&self, cutoff: f64) -> usize {
        self.singular_values
            .iter()
            .filter(|s| **s >= cutoff && **s != 0.0)
            .count()
    }
}

/// Default singular value cutoff for a least-squares solve of an `m x n`
/// system: machine epsilon scaled by the larger dimension and `s_max`.
pub fn default_cutoff(svd: &Svd, rows: usize, cols: usize) -> f64 {
    f64::EPSILON * rows.max(cols) as f64 * svd.max_singular_value()
}

/// Minimum-norm least-squares solution of `A x = b`.
pub fn lstsq(a: &Array2<f64>, b: &[f64]) -> DspResult<Vec<f64>> {
    let (rows, cols) = a.dim();
    if b.len() != rows {
        return Err(DspError::LengthMismatch {
            expected: rows,
            actual: b.len(),
        });
    }
    let svd = Svd::new(a)?;
    let pinv = svd.pseudo_inverse(default_cutoff(&svd, rows, cols));
    Ok(pinv.dot(&ndarray::ArrayView1::from(b)).to_vec())
}

/// Eigen-decomposition of a symmetric matrix, eigenvalues ascending.
pub fn symmetric_eigen(a: &Array2<f64>) -> DspResult<(Vec<f64>, Array2<f64>)> {
    let (rows, cols) = a.dim();
    if rows != cols {
        return Err(DspError::NotSquare { rows, cols });
    }
    let eig = to_dmatrix(a)
        .try_symmetric_eigen(f64::EPSILON, MAX_ITERATIONS)
        .ok_or_else(|| {
            DspError::NumericalInstability("symmetric eigen-decomposition did not converge".into())
        })?;

    let mut order: Vec<usize> = (0..rows).collect();
    order.sort_by(|&i, &j| eig.eigenvalues[i].total_cmp(&eig.eigenvalues[j]));

    let values = order.iter().map(|&i| eig.eigenvalues[i]).collect();
    let vectors = Array2::from_shape_fn((rows, rows), |(r, c)| eig.eigenvectors[(r, order[c])]);
    Ok((values, vectors))
}

/// Factor `L` with `L Lᵀ = C` for a symmetric positive semi-definite `C`.
///
/// Uses the eigen-decomposition rather than Cholesky so that singular and
/// slightly indefinite covariances (from rounding) are accepted: negative
/// eigenvalues are clipped to zero.
pub fn psd_factor(cov: &Array2<f64>) -> DspResult<Array2<f64>> {
    let (values, vectors) = symmetric_eigen(cov)?;
    let n = values.len();
    let mut factor = vectors;
    for (c, lambda) in values.iter().enumerate() {
        let scale = lambda.max(0.0).sqrt();
        for r in 0..n {
            factor[[r, c]] *= scale;
        }
    }
    Ok(factor)
}

/// Roots of the polynomial `c[0] x^n + c[1] x^(n-1) + ... + c[n]`.
///
/// Leading zeros are ignored and trailing zeros contribute roots at the
/// origin. The remaining roots are the eigenvalues of the companion matrix.
pub fn poly_roots(coeffs: &[f64]) -> DspResult<Vec<Complex64>> {
    let first = match coeffs.iter().position(|c| *c != 0.0) {
        Some(i) => i,
        None => return Ok(Vec::new()),
    };
    let last = coeffs.iter().rposition(|c| *c != 0.0).unwrap_or(first);
    let trimmed = &coeffs[first..=last];
    let zero_roots = coeffs.len() - 1 - last;

    let degree = trimmed.len() - 1;
    let mut roots = Vec::with_capacity(degree + zero_roots);

    if degree == 1 {
        roots.push(Complex64::new(-trimmed[1] / trimmed[0], 0.0));
    } else if degree > 1 {
        let lead = trimmed[0];
        let companion = DMatrix::from_fn(degree, degree, |i, j| {
            if i == 0 {
                -trimmed[j + 1] / lead
            } else if i == j + 1 {
                1.0
            } else {
                0.0
            }
        });
        let schur = companion
            .try_schur(f64::EPSILON, MAX_ITERATIONS)
            .ok_or_else(|| {
                DspError::NumericalInstability("companion matrix Schur form did not converge".into())
            })?;
        roots.extend(
            schur
                .complex_eigenvalues()
                .iter()
                .map(|z| Complex64::new(z.re, z.im)),
        );
    }

    roots.extend(std::iter::repeat(Complex64::new(0.0, 0.0)).take(zero_roots));
    Ok(roots)
}

/// Monic polynomial with the given roots, real part of the coefficients.
///
/// Complex roots are expected in conjugate pairs so that the imaginary parts
/// cancel.
pub fn poly_from_roots(roots: &[Complex64]) -> Vec<f64> {
    let mut coeffs = vec![Complex64::new(1.0, 0.0)];
    for r in roots {
        let mut next = vec![Complex64::new(0.0, 0.0); coeffs.len() + 1];
        for (k, c) in coeffs.iter().enumerate() {
            next[k] += c;
            next[k + 1] -= c * r;
        }
        coeffs = next;
    }
    coeffs.into_iter().map(|c| c.re).collect()
}

/// `A B Aᵀ` for a symmetric `B`.
pub fn congruence(a: &Array2<f64>, b: &Array2<f64>) -> Array2<f64> {
    let out = a.dot(b).dot(&a.t());
    symmetrize(out)
}

/// `(M + Mᵀ) / 2`, removing asymmetry introduced by rounding.
pub fn symmetrize(m: Array2<f64>) -> Array2<f64> {
    let t = m.t().to_owned();
    (m + t) * 0.5
}
