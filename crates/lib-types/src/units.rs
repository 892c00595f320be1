//! Physical units with type safety.
//!
//! Newtypes for the two quantities that flow through the fitting and
//! propagation code: sampling intervals and frequencies.

use serde::{Deserialize, Serialize};

/// Time duration in seconds.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct Seconds(pub f64);

impl Seconds {
    pub const ZERO: Self = Self(0.0);
}

/// Frequency in Hertz.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct Hertz(pub f64);

impl Hertz {
    /// Normalized angular frequency `2π f / fs` in radians per sample.
    #[inline]
    pub fn normalized_angular(&self, sample_rate: Hertz) -> f64 {
        2.0 * std::f64::consts::PI * self.0 / sample_rate.0
    }
}
