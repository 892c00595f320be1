//! Deconvolution of a measured pulse.
//!
//! This example demonstrates:
//! 1. Sampling the frequency response of a resonant measurement system
//! 2. Fitting an FIR filter to its reciprocal with SVD uncertainty propagation
//! 3. Designing a Kaiser low-pass for noise suppression
//! 4. Applying both to a noisy measurement with uncertainty
//! 5. Fitting an IIR model of the same system for comparison

use lib_dsp::{
    apply_fir_with_uncertainty, fit_fir, fit_iir, freqz, kaiser_lowpass, lfilter,
    FirApplyOptions, FirFitConfig, IirFitConfig, TracingObserver, DEFAULT_KAISER_BETA,
};
use lib_types::{FrequencyResponse, Hertz, Uncertainty};
use ndarray::Array2;
use rand::{rngs::StdRng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::f64::consts::PI;
use tracing_subscriber::EnvFilter;

const FS: f64 = 500e3;
const NOISE_STD: f64 = 1e-3;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== Deconvolution Example ===\n");

    // Resonant measurement system with static gain 0.124 and a 36 kHz resonance.
    let (b_sys, a_sys) = measurement_system(0.124, 36e3, 0.95);

    let freqs: Vec<Hertz> = (0..200).map(|i| Hertz(120e3 * i as f64 / 199.0)).collect();
    let omega: Vec<f64> = freqs.iter().map(|f| 2.0 * PI * f.0 / FS).collect();
    let values = freqz(&b_sys, &a_sys, &omega);
    let variances: Vec<f64> = values
        .iter()
        .chain(values.iter())
        .map(|h| (1e-3 * h.norm()).powi(2))
        .collect();
    let response = FrequencyResponse::new(freqs, values, Hertz(FS))?
        .with_covariance(Array2::from_diag(&ndarray::Array1::from(variances)))?;

    println!("Fitting inverse FIR filter...");
    let order = 20;
    let tau = order / 2;
    let fit = fit_fir(
        &response,
        &FirFitConfig::new(order, tau).inverse(true),
        &TracingObserver,
    )?;
    println!("  {} taps, delay {} samples", fit.model.b.len(), fit.model.tau);
    println!("  RMS error of fit: {:.3e}", fit.rms_error);

    let (low_pass, lp_shift) = kaiser_lowpass(20, 40e3, FS, DEFAULT_KAISER_BETA)?;
    println!("  Low-pass: {} taps, shift {}", low_pass.len(), lp_shift);

    // Measured signal: a Gaussian pulse seen through the system, plus noise.
    let n = 1000;
    let dt = 1.0 / FS;
    let input: Vec<f64> = (0..n)
        .map(|i| {
            let t = i as f64 * dt - 5e-4;
            (-(t / 2e-5).powi(2)).exp()
        })
        .collect();
    let clean = lfilter(&b_sys, &a_sys, &input);
    let noise = Normal::new(0.0, NOISE_STD)?;
    let mut rng = StdRng::seed_from_u64(7);
    let measured: Vec<f64> = clean.iter().map(|v| v + noise.sample(&mut rng)).collect();

    println!("\nDeconvolving {} samples...", n);
    let options = FirApplyOptions::default()
        .with_low_pass(low_pass)
        .with_shift(tau + lp_shift);
    let estimate = apply_fir_with_uncertainty(
        &measured,
        &Uncertainty::Scalar(NOISE_STD),
        &fit.model.b,
        fit.covariance.as_ref(),
        &options,
    )?;

    let peak_error = estimate
        .values
        .iter()
        .zip(&input)
        .map(|(e, x)| (e - x).abs())
        .fold(0.0_f64, f64::max);
    let mean_std = match &estimate.uncertainty {
        Uncertainty::Diagonal(s) => s.iter().sum::<f64>() / s.len() as f64,
        _ => f64::NAN,
    };
    println!("  Peak reconstruction error: {:.4}", peak_error);
    println!("  Mean standard uncertainty: {:.4}", mean_std);

    println!("\nFitting IIR model of the measurement system...");
    let iir = fit_iir(
        &response.clone().without_covariance(),
        &IirFitConfig::new(0, 2),
        &TracingObserver,
    )?;
    println!("  b = {:?}", iir.model.b);
    println!("  a = {:?}", iir.model.a);
    println!("  stable: {}", iir.is_stable());

    Ok(())
}

/// Two-pole resonator with the given static gain, resonance and pole radius.
fn measurement_system(gain: f64, f0: f64, radius: f64) -> (Vec<f64>, Vec<f64>) {
    let theta = 2.0 * PI * f0 / FS;
    let a = vec![1.0, -2.0 * radius * theta.cos(), radius * radius];
    let dc: f64 = a.iter().sum();
    (vec![gain * dc], a)
}

