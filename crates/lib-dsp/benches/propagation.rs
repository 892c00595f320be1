//! Uncertainty propagation benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use lib_dsp::convolution::{convolve_with_uncertainty, direct_convolve, fft_convolve, ConvolutionMode};
use lib_dsp::fir::{fit_fir, FirFitConfig};
use lib_dsp::propagate::{apply_fir_with_uncertainty, FirApplyOptions};
use lib_dsp::NullObserver;
use lib_types::{FrequencyResponse, Hertz, Uncertainty};
use ndarray::Array2;
use num_complex::Complex64;

fn bench_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply_fir");

    let b: Vec<f64> = (0..32).map(|i| (-(i as f64) * 0.2).exp()).collect();
    let ub = Array2::from_diag(&ndarray::Array1::from(vec![1e-6; 32]));
    let low_pass = vec![0.25, 0.5, 0.25];

    for signal_len in [1024, 4096, 16384].iter() {
        let signal: Vec<f64> = (0..*signal_len).map(|i| (i as f64 * 0.01).sin()).collect();
        let options = FirApplyOptions::default().with_low_pass(low_pass.clone());

        group.bench_with_input(
            BenchmarkId::new("windowed", signal_len),
            &signal,
            |bench, s| {
                bench.iter(|| {
                    apply_fir_with_uncertainty(
                        black_box(s),
                        &Uncertainty::Scalar(0.01),
                        &b,
                        Some(&ub),
                        &options,
                    )
                });
            },
        );
    }

    group.finish();
}

fn bench_convolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("convolution");

    for signal_len in [1024, 4096, 65536].iter() {
        let signal: Vec<f64> = (0..*signal_len).map(|i| (i as f64 * 0.01).sin()).collect();
        let kernel: Vec<f64> = (0..256).map(|i| (-i as f64 * 0.1).exp()).collect();

        // Only benchmark direct convolution for small sizes
        if *signal_len <= 4096 {
            group.bench_with_input(
                BenchmarkId::new("direct", signal_len),
                &(&signal, &kernel),
                |b, (s, k)| {
                    b.iter(|| direct_convolve(black_box(s), black_box(k)));
                },
            );
        }

        group.bench_with_input(
            BenchmarkId::new("fft_single", signal_len),
            &(&signal, &kernel),
            |b, (s, k)| {
                b.iter(|| fft_convolve(black_box(s), black_box(k)));
            },
        );
    }

    let x1: Vec<f64> = (0..128).map(|i| (i as f64 * 0.1).cos()).collect();
    let u1 = Array2::from_shape_fn((128, 128), |(i, j)| 1e-4 * 0.9f64.powi(i.abs_diff(j) as i32));
    let x2 = vec![0.2; 9];
    group.bench_function("with_covariance_same_128", |b| {
        b.iter(|| convolve_with_uncertainty(black_box(&x1), Some(&u1), &x2, None, ConvolutionMode::Same));
    });

    group.finish();
}

fn bench_fit(c: &mut Criterion) {
    let fs = Hertz(500e3);
    let freqs: Vec<Hertz> = (0..200).map(|i| Hertz(120e3 * i as f64 / 199.0)).collect();
    let values: Vec<Complex64> = freqs
        .iter()
        .map(|f| {
            let z_inv = Complex64::from_polar(1.0, -f.normalized_angular(fs));
            let d = Complex64::new(1.0, 0.0) - z_inv * 0.3;
            Complex64::new(0.49, 0.0) / (d * d)
        })
        .collect();
    let response = FrequencyResponse::new(freqs, values, fs)
        .and_then(|h| h.with_covariance(Array2::eye(400) * 1e-8))
        .expect("valid benchmark response");

    c.bench_function("fit_fir_svd_order_12", |b| {
        let config = FirFitConfig::new(12, 6).inverse(true);
        b.iter(|| fit_fir(black_box(&response), &config, &NullObserver));
    });
}

criterion_group!(benches, bench_apply, bench_convolution, bench_fit);
criterion_main!(benches);
