//! End-to-end deconvolution: fit, design, apply.

use lib_dsp::{
    apply_filter, apply_fir_with_uncertainty, fit_fir, fit_iir, freqz, lfilter, FirApplyOptions,
    FirFitConfig, IirFitConfig, NullObserver, PropagationMethod, SignalPropagation,
};
use lib_types::{FrequencyResponse, Hertz, Seconds, TimeSeriesSignal, Uncertainty};
use ndarray::Array2;
use std::f64::consts::PI;

const FS: f64 = 500e3;
const B_SYS: [f64; 1] = [0.49];
const A_SYS: [f64; 3] = [1.0, -0.6, 0.09];

fn system_response() -> FrequencyResponse {
    let freqs: Vec<Hertz> = (0..200).map(|i| Hertz(120e3 * i as f64 / 199.0)).collect();
    let omega: Vec<f64> = freqs.iter().map(|f| 2.0 * PI * f.0 / FS).collect();
    let values = freqz(&B_SYS, &A_SYS, &omega);
    FrequencyResponse::new(freqs, values, Hertz(FS)).unwrap()
}

fn pulse(n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| {
            let t = (i as f64 - n as f64 / 2.0) / 8.0;
            (-t * t).exp()
        })
        .collect()
}

#[test]
fn test_deconvolution_recovers_input() {
    let tau = 6;
    let fit = fit_fir(&system_response(), &FirFitConfig::new(12, tau).inverse(true), &NullObserver).unwrap();

    let input = pulse(200);
    let measured = lfilter(&B_SYS, &A_SYS, &input);
    let estimate = apply_fir_with_uncertainty(
        &measured,
        &Uncertainty::Exact,
        &fit.model.b,
        None,
        &FirApplyOptions::default().with_shift(tau),
    )
    .unwrap();

    for i in 0..input.len() - tau {
        assert!(
            (estimate.values[i] - input[i]).abs() < 1e-8,
            "sample {}: {} vs {}",
            i,
            estimate.values[i],
            input[i]
        );
    }
}

#[test]
fn test_output_uncertainty_follows_filter_norm() {
    let fit = fit_fir(&system_response(), &FirFitConfig::new(12, 6).inverse(true), &NullObserver).unwrap();
    let sigma = 1e-3;
    let measured = lfilter(&B_SYS, &A_SYS, &pulse(100));
    let estimate = apply_fir_with_uncertainty(
        &measured,
        &Uncertainty::Scalar(sigma),
        &fit.model.b,
        None,
        &FirApplyOptions::default(),
    )
    .unwrap();

    let norm = fit.model.b.iter().map(|b| b * b).sum::<f64>().sqrt();
    let Uncertainty::Diagonal(stds) = estimate.uncertainty else {
        panic!("expected standard deviations");
    };
    for s in &stds[fit.model.b.len()..] {
        assert!((s - sigma * norm).abs() < 1e-12);
    }
}

#[test]
fn test_coefficient_uncertainty_adds_to_output() {
    let h = system_response();
    let m = h.len();
    let h = h.with_covariance(Array2::eye(2 * m) * 1e-8).unwrap();
    let fit = fit_fir(&h, &FirFitConfig::new(12, 6).inverse(true), &NullObserver).unwrap();
    assert!(matches!(fit.method, PropagationMethod::Svd { .. }));

    let measured = lfilter(&B_SYS, &A_SYS, &pulse(100));
    let without = apply_fir_with_uncertainty(
        &measured,
        &Uncertainty::Scalar(1e-3),
        &fit.model.b,
        None,
        &FirApplyOptions::default(),
    )
    .unwrap();
    let with = apply_fir_with_uncertainty(
        &measured,
        &Uncertainty::Scalar(1e-3),
        &fit.model.b,
        fit.covariance.as_ref(),
        &FirApplyOptions::default(),
    )
    .unwrap();

    let (Uncertainty::Diagonal(a), Uncertainty::Diagonal(b)) = (without.uncertainty, with.uncertainty) else {
        panic!("expected standard deviations");
    };
    assert!(a.iter().zip(&b).all(|(x, y)| y >= x));
    assert!(a.iter().zip(&b).any(|(x, y)| y > x));
}

#[test]
fn test_iir_fit_identifies_system() {
    let fit = fit_iir(&system_response(), &IirFitConfig::new(0, 2), &NullObserver).unwrap();
    assert!(fit.is_stable());
    assert_eq!(fit.model.tau, 0);
    assert!((fit.model.b[0] - B_SYS[0]).abs() < 1e-8);
    for (a, e) in fit.model.a.iter().zip(A_SYS) {
        assert!((a - e).abs() < 1e-8, "{} vs {}", a, e);
    }
}

#[test]
fn test_fitted_iir_model_filters_signal() {
    let fit = fit_iir(&system_response(), &IirFitConfig::new(0, 2), &NullObserver).unwrap();
    let input = pulse(60);
    let signal = TimeSeriesSignal::new(input.clone(), Seconds(1.0 / FS), Seconds::ZERO, Uncertainty::Scalar(1e-3))
        .unwrap();

    let output = apply_filter(
        &signal,
        &fit.model,
        None,
        SignalPropagation::MonteCarlo { runs: 2000, seed: 21 },
    )
    .unwrap();

    let expected = lfilter(&B_SYS, &A_SYS, &input);
    let stds = output.standard_deviations();
    for ((y, e), s) in output.samples.iter().zip(&expected).zip(&stds) {
        assert!((y - e).abs() < 1e-3, "{} vs {}", y, e);
        assert!(*s > 0.0 && *s < 2e-3);
    }
}
