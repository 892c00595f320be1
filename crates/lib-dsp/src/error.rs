//! Error types for DSP operations.

use lib_types::TypeError;
use thiserror::Error;

/// Errors that can occur during DSP operations.
#[derive(Debug, Error)]
pub enum DspError {
    /// FFT size is not a power of 2.
    #[error("FFT size must be power of 2, got {0}")]
    InvalidFftSize(usize),

    /// Input length mismatch.
    #[error("Input length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    /// Insufficient data for operation.
    #[error("Insufficient data: need at least {needed}, got {got}")]
    InsufficientData { needed: usize, got: usize },

    /// Matrix is not square.
    #[error("Matrix must be square, got {rows}x{cols}")]
    NotSquare { rows: usize, cols: usize },

    /// Covariance matrix is not symmetric.
    #[error("Covariance is not symmetric: {0}")]
    NotSymmetric(String),

    /// Input violates a documented constraint.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Mutually exclusive or incomplete options were combined.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Numerical instability detected.
    #[error("Numerical instability: {0}")]
    NumericalInstability(String),

    /// Operation not supported.
    #[error("Operation not supported: {0}")]
    NotSupported(String),
}

/// Coarse classification of [`DspError`] for callers that branch on the
/// failure category rather than the exact variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input detected before any computation.
    InputContract,
    /// Options that cannot be used together, or are missing a prerequisite.
    UnsupportedCombination,
    /// A known but unimplemented path.
    Unimplemented,
    /// A decomposition or transform failed.
    Numerical,
}

impl DspError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DspError::LengthMismatch { .. }
            | DspError::InsufficientData { .. }
            | DspError::NotSquare { .. }
            | DspError::NotSymmetric(_)
            | DspError::InvalidInput(_) => ErrorKind::InputContract,
            DspError::InvalidConfig(_) => ErrorKind::UnsupportedCombination,
            DspError::NotSupported(_) => ErrorKind::Unimplemented,
            DspError::InvalidFftSize(_) | DspError::NumericalInstability(_) => {
                ErrorKind::Numerical
            }
        }
    }
}

impl From<TypeError> for DspError {
    fn from(err: TypeError) -> Self {
        match err {
            TypeError::LengthMismatch {
                expected, actual, ..
            } => DspError::LengthMismatch { expected, actual },
            TypeError::NotSquare { rows, cols, .. } => DspError::NotSquare { rows, cols },
            TypeError::NotSymmetric {
                what,
                row,
                col,
                deviation,
            } => DspError::NotSymmetric(format!(
                "{what}: entries ({row}, {col}) and ({col}, {row}) differ by {deviation:e}"
            )),
            TypeError::InvalidValue(msg) => DspError::InvalidInput(msg),
        }
    }
}

/// Result type for DSP operations.
pub type DspResult<T> = Result<T, DspError>;
