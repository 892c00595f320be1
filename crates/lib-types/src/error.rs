//! Validation errors raised by the value-type constructors.

use thiserror::Error;

/// Errors raised while constructing or validating a value type.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TypeError {
    /// Two paired sequences have different lengths.
    #[error("Length mismatch for {what}: expected {expected}, got {actual}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A matrix that must be square is not.
    #[error("{what} must be square, got {rows}x{cols}")]
    NotSquare {
        what: &'static str,
        rows: usize,
        cols: usize,
    },

    /// A covariance matrix is not symmetric within tolerance.
    #[error("{what} is not symmetric: |C[{row},{col}] - C[{col},{row}]| = {deviation:e}")]
    NotSymmetric {
        what: &'static str,
        row: usize,
        col: usize,
        deviation: f64,
    },

    /// A value violates a documented constraint.
    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

pub type TypeResult<T> = Result<T, TypeError>;
