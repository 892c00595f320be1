//! FFT/IFFT operations using rustfft.
//!
//! Thin wrapper with planner caching, used by the group delay computation
//! and by FFT-based convolution of long nominal signals.

use crate::error::{DspError, DspResult};
use num_complex::Complex64;
use realfft::RealFftPlanner;
use rustfft::FftPlanner;

/// FFT engine with cached planners.
pub struct FftEngine {
    complex_planner: FftPlanner<f64>,
    real_planner: RealFftPlanner<f64>,
}

impl FftEngine {
    pub fn new() -> Self {
        Self {
            complex_planner: FftPlanner::new(),
            real_planner: RealFftPlanner::new(),
        }
    }

    /// Forward FFT on complex data in-place.
    pub fn fft_inplace(&mut self, data: &mut [Complex64]) -> DspResult<()> {
        let len = data.len();
        if !len.is_power_of_two() {
            return Err(DspError::InvalidFftSize(len));
        }
        self.complex_planner.plan_fft_forward(len).process(data);
        Ok(())
    }

    /// Inverse FFT on complex data in-place, normalized by `1/N`.
    pub fn ifft_inplace(&mut self, data: &mut [Complex64]) -> DspResult<()> {
        let len = data.len();
        if !len.is_power_of_two() {
            return Err(DspError::InvalidFftSize(len));
        }
        self.complex_planner.plan_fft_inverse(len).process(data);

        let scale = 1.0 / len as f64;
        for x in data.iter_mut() {
            *x *= scale;
        }
        Ok(())
    }

    /// Real-to-complex FFT of `data` zero-padded to `len` samples.
    ///
    /// Returns the `len/2 + 1` non-negative frequency bins.
    pub fn rfft_padded(&mut self, data: &[f64], len: usize) -> DspResult<Vec<Complex64>> {
        if !len.is_power_of_two() {
            return Err(DspError::InvalidFftSize(len));
        }
        if data.len() > len {
            return Err(DspError::LengthMismatch {
                expected: len,
                actual: data.len(),
            });
        }

        let r2c = self.real_planner.plan_fft_forward(len);
        let mut input = data.to_vec();
        input.resize(len, 0.0);
        let mut output = r2c.make_output_vec();

        r2c.process(&mut input, &mut output)
            .map_err(|e| DspError::NumericalInstability(e.to_string()))?;
        Ok(output)
    }
}

impl Default for FftEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn test_fft_ifft_roundtrip() {
        let mut engine = FftEngine::new();
        let n = 64;
        let signal: Vec<Complex64> = (0..n)
            .map(|i| Complex64::new((2.0 * PI * 4.0 * i as f64 / n as f64).sin(), 0.0))
            .collect();

        let mut data = signal.clone();
        engine.fft_inplace(&mut data).unwrap();
        engine.ifft_inplace(&mut data).unwrap();

        for (orig, rec) in signal.iter().zip(data.iter()) {
            assert!((orig - rec).norm() < 1e-10);
        }
    }

    #[test]
    fn test_rfft_padded_matches_dtft() {
        let mut engine = FftEngine::new();
        let x = [1.0, 2.0, 3.0];
        let spectrum = engine.rfft_padded(&x, 8).unwrap();
        assert_eq!(spectrum.len(), 5);

        for (k, bin) in spectrum.iter().enumerate() {
            let w = 2.0 * PI * k as f64 / 8.0;
            let expected: Complex64 = x
                .iter()
                .enumerate()
                .map(|(n, &v)| Complex64::from_polar(v, -w * n as f64))
                .sum();
            assert!((bin - expected).norm() < 1e-10, "bin {}", k);
        }
    }

    #[test]
    fn test_invalid_fft_size() {
        let mut engine = FftEngine::new();
        let mut data = vec![Complex64::new(1.0, 0.0); 100];
        assert!(matches!(
            engine.fft_inplace(&mut data),
            Err(DspError::InvalidFftSize(100))
        ));
        assert!(matches!(
            engine.rfft_padded(&[1.0; 9], 8),
            Err(DspError::LengthMismatch { expected: 8, actual: 9 })
        ));
    }
}
