//! Window functions and windowed-sinc low-pass design.
//!
//! Deconvolution filters fitted to `1/H` amplify high-frequency noise, so they
//! are usually cascaded with a low-pass filter. [`kaiser_lowpass`] designs that
//! filter by windowing an ideal sinc with a Kaiser window.

use crate::error::{DspError, DspResult};
use std::f64::consts::PI;

/// Default Kaiser beta for low-pass design.
pub const DEFAULT_KAISER_BETA: f64 = 8.0;

/// Compute the zeroth-order modified Bessel function of the first kind, I_0(x).
///
/// Uses the polynomial approximation for efficiency.
fn bessel_i0(x: f64) -> f64 {
    let ax = x.abs();

    if ax < 3.75 {
        let t = (x / 3.75).powi(2);
        1.0 + t * (3.5156229
            + t * (3.0899424
                + t * (1.2067492
                    + t * (0.2659732
                        + t * (0.0360768 + t * 0.0045813)))))
    } else {
        let t = 3.75 / ax;
        (ax.exp() / ax.sqrt())
            * (0.39894228
                + t * (0.01328592
                    + t * (0.00225319
                        + t * (-0.00157565
                            + t * (0.00916281
                                + t * (-0.02057706
                                    + t * (0.02635537
                                        + t * (-0.01647633 + t * 0.00392377))))))))
    }
}

/// Symmetric Kaiser window of `length` points.
fn kaiser_window(length: usize, beta: f64) -> Vec<f64> {
    if length == 1 {
        return vec![1.0];
    }
    let n = length as f64;
    let denom = bessel_i0(beta);
    (0..length)
        .map(|i| {
            let x = 2.0 * i as f64 / (n - 1.0) - 1.0;
            bessel_i0(beta * (1.0 - x * x).max(0.0).sqrt()) / denom
        })
        .collect()
}

/// Design a linear-phase FIR low-pass filter with a Kaiser window.
///
/// An even `order` is used as the number of taps minus one; an odd `order`
/// is rounded up so that the filter has an odd number of taps and an integer
/// group delay.
///
/// # Arguments
///
/// * `order` - Requested filter order
/// * `fcut` - Cut-off frequency in Hz
/// * `fs` - Sampling frequency in Hz
/// * `beta` - Kaiser window parameter
///
/// # Returns
///
/// The taps, normalized to unity gain at DC, and the group delay in samples.
///
/// # Errors
///
/// Returns `InvalidInput` unless `0 < fcut < fs / 2`.
pub fn kaiser_lowpass(order: usize, fcut: f64, fs: f64, beta: f64) -> DspResult<(Vec<f64>, usize)> {
    if !(fs > 0.0 && fcut > 0.0 && fcut < fs / 2.0) {
        return Err(DspError::InvalidInput(format!(
            "cut-off frequency must lie in (0, fs/2), got fcut={fcut}, fs={fs}"
        )));
    }

    let taps = if order % 2 == 0 { order + 1 } else { order + 2 };
    let shift = (taps - 1) / 2;
    let cutoff = fcut / fs;
    let window = kaiser_window(taps, beta);

    let mut b: Vec<f64> = window
        .iter()
        .enumerate()
        .map(|(i, w)| {
            let m = i as f64 - shift as f64;
            let ideal = if m == 0.0 {
                2.0 * cutoff
            } else {
                (2.0 * PI * cutoff * m).sin() / (PI * m)
            };
            ideal * w
        })
        .collect();

    let dc: f64 = b.iter().sum();
    for c in b.iter_mut() {
        *c /= dc;
    }

    tracing::debug!("Kaiser low-pass: {} taps, fcut={} Hz, shift={}", taps, fcut, shift);
    Ok((b, shift))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lib_types::FilterModel;

    #[test]
    fn test_bessel_i0() {
        assert!((bessel_i0(0.0) - 1.0).abs() < 1e-10);
        assert!((bessel_i0(1.0) - 1.266).abs() < 0.001);
        assert!((bessel_i0(3.0) - 4.881).abs() < 0.001);
        assert!((bessel_i0(-2.0) - bessel_i0(2.0)).abs() < 1e-10);
    }

    #[test]
    fn test_kaiser_window_symmetry() {
        let window = kaiser_window(65, 6.0);
        assert!((window[32] - 1.0).abs() < 1e-10);
        for i in 0..32 {
            assert!(
                (window[i] - window[64 - i]).abs() < 1e-10,
                "Asymmetry at index {}: {} vs {}",
                i,
                window[i],
                window[64 - i]
            );
        }
    }

    #[test]
    fn test_kaiser_lowpass_shape() {
        let (b, shift) = kaiser_lowpass(20, 20e3, 500e3, DEFAULT_KAISER_BETA).unwrap();
        assert_eq!(b.len(), 21);
        assert_eq!(shift, 10);
        assert!((b.iter().sum::<f64>() - 1.0).abs() < 1e-12);

        let (b_odd, shift_odd) = kaiser_lowpass(21, 20e3, 500e3, DEFAULT_KAISER_BETA).unwrap();
        assert_eq!(b_odd.len(), 23);
        assert_eq!(shift_odd, 11);
    }

    #[test]
    fn test_kaiser_lowpass_attenuates_stopband() {
        let fs = 500e3;
        let (b, _) = kaiser_lowpass(60, 20e3, fs, DEFAULT_KAISER_BETA).unwrap();
        let model = FilterModel::fir(b, 0).unwrap();
        let w = |f: f64| 2.0 * PI * f / fs;
        let h = model.frequency_response(&[w(2e3), w(100e3)]);
        assert!((h[0].norm() - 1.0).abs() < 1e-2);
        assert!(h[1].norm() < 1e-3);
    }

    #[test]
    fn test_kaiser_lowpass_rejects_cutoff_above_nyquist() {
        assert!(kaiser_lowpass(10, 300e3, 500e3, 8.0).is_err());
    }
}
