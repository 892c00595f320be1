//! Discrete convolution of two uncertain signals.
//!
//! Convolution is filter application with the second signal as the filter,
//! so the covariance kernel is shared with [`crate::propagate`]. What differs
//! are the boundaries, chosen by [`ConvolutionMode`]:
//!
//! | mode      | padding of `x1`                | output length        |
//! |-----------|--------------------------------|----------------------|
//! | `Full`    | `n2 - 1` zeros at the end      | `n1 + n2 - 1`        |
//! | `Valid`   | none                           | `max - min + 1`      |
//! | `Same`    | `(n2 - 1) / 2` zeros at the end| `max(n1, n2)`        |
//! | `Nearest` | edge values, both sides        | `n1`                 |
//! | `Reflect` | mirrored, edge sample repeated | `n1`                 |
//! | `Mirror`  | mirrored about the edge sample | `n1`                 |
//!
//! The first three follow `numpy.convolve` and swap the inputs so that the
//! longer one is filtered. The boundary modes never swap. Covariances are
//! padded with the same index map as the values, on rows and columns.

use crate::error::{DspError, DspResult};
use crate::fft::FftEngine;
use crate::propagate::filter_full;
use lib_types::response::check_covariance;
use ndarray::{s, Array2};
use num_complex::Complex64;
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

/// Output length (`n1 + n2 - 1`) above which the exact path uses the FFT.
const FFT_THRESHOLD: usize = 1024;

/// Boundary handling for [`convolve_with_uncertainty`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConvolutionMode {
    #[default]
    Full,
    Valid,
    Same,
    Nearest,
    Reflect,
    Mirror,
}

impl ConvolutionMode {
    pub const ALL: [ConvolutionMode; 6] = [
        ConvolutionMode::Full,
        ConvolutionMode::Valid,
        ConvolutionMode::Same,
        ConvolutionMode::Nearest,
        ConvolutionMode::Reflect,
        ConvolutionMode::Mirror,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ConvolutionMode::Full => "full",
            ConvolutionMode::Valid => "valid",
            ConvolutionMode::Same => "same",
            ConvolutionMode::Nearest => "nearest",
            ConvolutionMode::Reflect => "reflect",
            ConvolutionMode::Mirror => "mirror",
        }
    }

    /// True for the modes that may swap their inputs.
    fn swaps(self) -> bool {
        matches!(
            self,
            ConvolutionMode::Full | ConvolutionMode::Valid | ConvolutionMode::Same
        )
    }

    /// Output length for inputs of lengths `n1` and `n2`.
    pub fn output_len(self, n1: usize, n2: usize) -> usize {
        let (long, short) = (n1.max(n2), n1.min(n2));
        match self {
            ConvolutionMode::Full => n1 + n2 - 1,
            ConvolutionMode::Valid => long - short + 1,
            ConvolutionMode::Same => long,
            _ => n1,
        }
    }
}

impl fmt::Display for ConvolutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ConvolutionMode {
    type Err = DspError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConvolutionMode::ALL
            .into_iter()
            .find(|mode| mode.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| DspError::InvalidInput(format!("convolution mode \"{s}\" is not supported")))
    }
}

/// Result of [`convolve_with_uncertainty`].
#[derive(Clone, Debug, PartialEq)]
pub struct Convolved {
    pub values: Vec<f64>,

    /// Output covariance, `None` when both inputs were exact.
    pub covariance: Option<Array2<f64>>,
}

/// Convolve `x1` with `x2` and propagate their covariances.
///
/// # Arguments
///
/// * `x1`, `u1` - First signal and its optional covariance
/// * `x2`, `u2` - Second signal and its optional covariance
/// * `mode` - Boundary handling
///
/// # Errors
///
/// Returns an input-contract error for empty signals or covariances that do
/// not match their signal.
pub fn convolve_with_uncertainty(
    x1: &[f64],
    u1: Option<&Array2<f64>>,
    x2: &[f64],
    u2: Option<&Array2<f64>>,
    mode: ConvolutionMode,
) -> DspResult<Convolved> {
    if x1.is_empty() || x2.is_empty() {
        return Err(DspError::InsufficientData { needed: 1, got: 0 });
    }
    if let Some(u) = u1 {
        check_covariance("covariance of x1", u, x1.len())?;
    }
    if let Some(u) = u2 {
        check_covariance("covariance of x2", u, x2.len())?;
    }

    let (x1, u1, x2, u2) = if mode.swaps() && x1.len() < x2.len() {
        (x2, u2, x1, u1)
    } else {
        (x1, u1, x2, u2)
    };
    let (n1, n2) = (x1.len(), x2.len());

    let (map, range) = boundary_map(mode, n1, n2);
    let padded: Vec<f64> = map.iter().map(|i| i.map_or(0.0, |k| x1[k])).collect();

    tracing::debug!(
        "Convolving {} x {} samples in {} mode (covariances: {}, {})",
        n1,
        n2,
        mode,
        u1.is_some(),
        u2.is_some()
    );

    if u1.is_none() && u2.is_none() {
        let full = convolve_values(&padded, x2)?;
        return Ok(Convolved {
            values: full[range].to_vec(),
            covariance: None,
        });
    }

    let u1_padded = u1.map(|u| {
        let m = map.len();
        Array2::from_shape_fn((m, m), |(i, j)| match (map[i], map[j]) {
            (Some(a), Some(b)) => u[[a, b]],
            _ => 0.0,
        })
    });

    let (y, uy) = filter_full(&padded, u1_padded.as_ref(), x2, u2);
    let covariance = uy.map(|u| u.slice(s![range.clone(), range.clone()]).to_owned());

    Ok(Convolved {
        values: y[range].to_vec(),
        covariance,
    })
}

/// Source index of every padded sample (`None` for zero padding) and the
/// range of the causal filter output that forms the result.
fn boundary_map(mode: ConvolutionMode, n1: usize, n2: usize) -> (Vec<Option<usize>>, Range<usize>) {
    let plain = |tail: usize| -> Vec<Option<usize>> {
        (0..n1).map(Some).chain(std::iter::repeat(None).take(tail)).collect()
    };
    match mode {
        ConvolutionMode::Full => (plain(n2 - 1), 0..n1 + n2 - 1),
        ConvolutionMode::Valid => (plain(0), n2 - 1..n1),
        ConvolutionMode::Same => {
            let pad = (n2 - 1) / 2;
            (plain(pad), pad..pad + n1)
        }
        ConvolutionMode::Nearest | ConvolutionMode::Reflect | ConvolutionMode::Mirror => {
            let pad = (n2 + 1) / 2;
            let map = (0..n1 + 2 * pad)
                .map(|i| Some(reflect_index(mode, i as isize - pad as isize, n1)))
                .collect();
            (map, n2..n2 + n1)
        }
    }
}

/// Map an out-of-range index into `0..n` for the boundary modes.
fn reflect_index(mode: ConvolutionMode, i: isize, n: usize) -> usize {
    let n = n as isize;
    let idx = match mode {
        ConvolutionMode::Reflect => {
            let m = i.rem_euclid(2 * n);
            if m < n {
                m
            } else {
                2 * n - 1 - m
            }
        }
        ConvolutionMode::Mirror if n > 1 => {
            let period = 2 * n - 2;
            let m = i.rem_euclid(period);
            if m < n {
                m
            } else {
                period - m
            }
        }
        _ => i.clamp(0, n - 1),
    };
    idx as usize
}

fn convolve_values(signal: &[f64], kernel: &[f64]) -> DspResult<Vec<f64>> {
    if signal.len() + kernel.len() - 1 > FFT_THRESHOLD {
        fft_convolve(signal, kernel)
    } else {
        Ok(direct_convolve(signal, kernel))
    }
}

/// Direct convolution, output length `len(signal) + len(kernel) - 1`.
///
/// This is O(n*m) and should only be used for short signals.
pub fn direct_convolve(signal: &[f64], kernel: &[f64]) -> Vec<f64> {
    if signal.is_empty() || kernel.is_empty() {
        return Vec::new();
    }
    let output_len = signal.len() + kernel.len() - 1;
    let mut output = vec![0.0; output_len];

    for (i, &s) in signal.iter().enumerate() {
        for (j, &k) in kernel.iter().enumerate() {
            output[i + j] += s * k;
        }
    }

    output
}

/// Simple FFT-based convolution (single chunk).
pub fn fft_convolve(signal: &[f64], kernel: &[f64]) -> DspResult<Vec<f64>> {
    if signal.is_empty() || kernel.is_empty() {
        return Ok(Vec::new());
    }
    let output_len = signal.len() + kernel.len() - 1;
    let fft_size = output_len.next_power_of_two();

    let mut engine = FftEngine::new();

    let mut signal_fft: Vec<Complex64> = signal
        .iter()
        .map(|&v| Complex64::new(v, 0.0))
        .collect();
    signal_fft.resize(fft_size, Complex64::new(0.0, 0.0));

    let mut kernel_fft: Vec<Complex64> = kernel
        .iter()
        .map(|&v| Complex64::new(v, 0.0))
        .collect();
    kernel_fft.resize(fft_size, Complex64::new(0.0, 0.0));

    engine.fft_inplace(&mut signal_fft)?;
    engine.fft_inplace(&mut kernel_fft)?;

    for (s, k) in signal_fft.iter_mut().zip(kernel_fft.iter()) {
        *s *= *k;
    }

    engine.ifft_inplace(&mut signal_fft)?;

    Ok(signal_fft[..output_len].iter().map(|c| c.re).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const X1: [f64; 5] = [1.0, 2.0, 3.0, 4.0, 5.0];

    fn assert_close(actual: &[f64], expected: &[f64]) {
        assert_eq!(actual.len(), expected.len(), "{:?} vs {:?}", actual, expected);
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-10, "{:?} vs {:?}", actual, expected);
        }
    }

    #[test]
    fn test_direct_convolve_shift() {
        let result = direct_convolve(&[1.0, 2.0, 3.0, 4.0], &[0.0, 1.0]);
        assert_eq!(result, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_fft_convolve_matches_direct() {
        let signal: Vec<f64> = (0..700).map(|i| (i as f64 * 0.01).cos()).collect();
        let kernel = vec![1.0, 0.5, 0.25];

        let direct = direct_convolve(&signal, &kernel);
        let fft = fft_convolve(&signal, &kernel).unwrap();
        assert_close(&fft, &direct);
    }

    #[test]
    fn test_numpy_modes() {
        let ones = [1.0; 3];
        let conv = |mode| convolve_with_uncertainty(&X1, None, &ones, None, mode).unwrap();

        assert_close(&conv(ConvolutionMode::Full).values, &[1.0, 3.0, 6.0, 9.0, 12.0, 9.0, 5.0]);
        assert_close(&conv(ConvolutionMode::Valid).values, &[6.0, 9.0, 12.0]);
        assert_close(&conv(ConvolutionMode::Same).values, &[3.0, 6.0, 9.0, 12.0, 9.0]);
        assert!(conv(ConvolutionMode::Full).covariance.is_none());
    }

    #[test]
    fn test_boundary_modes() {
        let taps = [1.0; 5];
        let conv = |mode| convolve_with_uncertainty(&X1, None, &taps, None, mode).unwrap().values;

        assert_eq!(conv(ConvolutionMode::Nearest)[0], 8.0);
        assert_eq!(conv(ConvolutionMode::Reflect)[0], 9.0);
        assert_eq!(conv(ConvolutionMode::Mirror)[0], 11.0);

        let centered = [0.0, 1.0, 0.0];
        for mode in [ConvolutionMode::Nearest, ConvolutionMode::Reflect, ConvolutionMode::Mirror] {
            let y = convolve_with_uncertainty(&X1, None, &centered, None, mode).unwrap();
            assert_close(&y.values, &X1);
        }
    }

    #[test]
    fn test_output_lengths() {
        for (n1, n2) in [(7, 3), (3, 7), (6, 4), (4, 4), (1, 3)] {
            let x1 = vec![1.0; n1];
            let x2 = vec![0.5; n2];
            let u1 = Array2::eye(n1) * 0.01;
            for mode in ConvolutionMode::ALL {
                let y = convolve_with_uncertainty(&x1, Some(&u1), &x2, None, mode).unwrap();
                let len = mode.output_len(n1, n2);
                assert_eq!(y.values.len(), len, "{} with {}x{}", mode, n1, n2);
                let u = y.covariance.unwrap();
                assert_eq!(u.dim(), (len, len));
            }
        }
    }

    #[test]
    fn test_covariance_with_exact_kernel() {
        let u1 = Array2::eye(5) * 0.04;
        let x2 = [0.5, 1.0, -0.5];
        let y = convolve_with_uncertainty(&X1, Some(&u1), &x2, None, ConvolutionMode::Full).unwrap();
        let u = y.covariance.unwrap();

        // Interior samples see all three taps.
        assert!((u[[2, 2]] - 0.04 * 1.5).abs() < 1e-12);
        // Neighbors share two taps: 0.5 * 1.0 + 1.0 * (-0.5).
        assert!(u[[2, 3]].abs() < 1e-12);
        for i in 0..7 {
            for j in 0..7 {
                assert!((u[[i, j]] - u[[j, i]]).abs() < 1e-15);
            }
        }
    }

    #[test]
    fn test_edge_padding_correlates_copies() {
        let u1 = Array2::eye(5);
        let y = convolve_with_uncertainty(&X1, Some(&u1), &[1.0; 3], None, ConvolutionMode::Nearest).unwrap();
        // y[0] = x0 + x0 + x1
        assert!((y.covariance.unwrap()[[0, 0]] - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_uncertain_kernel_and_swap() {
        let short = [1.0, 2.0];
        let u_short = Array2::eye(2) * 0.01;
        let a = convolve_with_uncertainty(&short, Some(&u_short), &X1, None, ConvolutionMode::Full).unwrap();
        let b = convolve_with_uncertainty(&X1, None, &short, Some(&u_short), ConvolutionMode::Full).unwrap();
        assert_close(&a.values, &b.values);

        let (ua, ub) = (a.covariance.unwrap(), b.covariance.unwrap());
        for (p, q) in ua.iter().zip(ub.iter()) {
            assert!((p - q).abs() < 1e-12);
        }
        // y[1] = 2 s[0] + s[1] with var(s) = 0.01
        assert!((ua[[1, 1]] - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_contract_violations() {
        let bad = Array2::eye(4);
        let err = convolve_with_uncertainty(&X1, Some(&bad), &[1.0], None, ConvolutionMode::Full).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InputContract);

        let err = convolve_with_uncertainty(&[], None, &[1.0], None, ConvolutionMode::Full).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InputContract);

        assert_eq!("Mirror".parse::<ConvolutionMode>().unwrap(), ConvolutionMode::Mirror);
        assert!("wrap".parse::<ConvolutionMode>().is_err());
    }
}
