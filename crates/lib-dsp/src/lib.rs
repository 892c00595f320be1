//! # lib-dsp
//!
//! Numerical core for deconvolution of dynamic measurements.
//!
//! This crate fits digital filters to measured frequency responses and
//! carries measurement uncertainty through every step:
//!
//! - **FIR fitting**: Weighted least squares with SVD or Monte Carlo propagation
//! - **IIR fitting**: Linearized least squares with iterative stabilization
//! - **Filter application**: FIR and IIR filtering of uncertain signals
//! - **Convolution**: numpy and scipy.ndimage boundary modes with covariance
//! - **Interpolation**: Linear and step interpolation with sensitivities
//! - **Filter utilities**: Roots, stability, group delay, Kaiser low-pass

pub mod error;
pub mod events;
pub mod fft;
pub mod window;
pub mod linalg;
pub mod montecarlo;
pub mod design;
pub mod stability;
pub mod iir;
pub mod fir;
pub mod propagate;
pub mod signal;
pub mod convolution;
pub mod interpolation;

pub use error::{DspError, DspResult, ErrorKind};
pub use events::{FitEvent, FitKind, FitObserver, NullObserver, TracingObserver};
pub use fft::FftEngine;
pub use window::{kaiser_lowpass, DEFAULT_KAISER_BETA};
pub use stability::{
    freqz, group_delay, is_stable, map_inside, roots, StabilityEnforcer, StabilizationState,
};
pub use iir::{fit_iir, IirFit, IirFitConfig, StabilizationReport};
pub use fir::{fit_fir, FirFit, FirFitConfig, PropagationMethod};
pub use propagate::{
    apply_fir_monte_carlo, apply_fir_with_uncertainty, apply_iir_monte_carlo, fir_filter, lfilter,
    FirApplyOptions, InitialConditions, PropagatedSignal,
};
pub use signal::{apply_filter, SignalPropagation, DEFAULT_FILTER_MC_RUNS};
pub use convolution::{convolve_with_uncertainty, ConvolutionMode, Convolved};
pub use interpolation::{
    interpolate_with_uncertainty, Interpolated, InterpolationKind, InterpolationOptions,
    OutOfRange,
};
