//! # lib-types
//!
//! Core type definitions for dynamic measurement analysis.
//!
//! This crate provides the value types shared across the workspace:
//! - Physical units with compile-time safety
//! - Sampled frequency responses with their covariance
//! - Rational filter models with bulk delay
//! - Time-domain signals with a tagged uncertainty shape

pub mod error;
pub mod units;
pub mod response;
pub mod filter;
pub mod signal;

pub use error::{TypeError, TypeResult};
pub use units::*;
pub use response::FrequencyResponse;
pub use filter::{CoefficientCovariance, FilterModel};
pub use signal::{TimeSeriesSignal, Uncertainty};

/// Re-export num_complex for convenience
pub use num_complex::Complex64;
