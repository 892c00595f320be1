//! Progress and diagnostic events emitted by the fitters.
//!
//! Fitters never print. They report through a [`FitObserver`] supplied by the
//! caller; [`TracingObserver`] forwards events to `tracing`, [`NullObserver`]
//! drops them.

/// Which fitter emitted an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FitKind {
    Fir,
    Iir,
}

/// A single event in the life of a fit.
#[derive(Clone, Debug, PartialEq)]
pub enum FitEvent {
    /// A fit is about to start.
    Started {
        kind: FitKind,
        numerator_order: usize,
        denominator_order: usize,
        points: usize,
        inverse: bool,
    },

    /// One pole-mapping iteration of IIR stabilization finished.
    StabilizationStep { iteration: usize, tau: usize },

    /// The IIR stabilization budget ran out with poles still outside the unit circle.
    StabilizationGaveUp { iterations: usize, tau: usize },

    /// Monte Carlo uncertainty evaluation is about to start.
    MonteCarloStarted { kind: FitKind, runs: usize },

    /// The fit finished.
    Finished {
        kind: FitKind,
        rms_error: f64,
        tau: usize,
        stable: bool,
    },
}

/// Receiver for fitter events.
pub trait FitObserver: Send + Sync {
    fn on_event(&self, event: &FitEvent);
}

/// Forwards events to `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingObserver;

impl FitObserver for TracingObserver {
    fn on_event(&self, event: &FitEvent) {
        match event {
            FitEvent::Started {
                kind,
                numerator_order,
                denominator_order,
                points,
                inverse,
            } => {
                tracing::info!(
                    "Least-squares {:?} fit: Nb={}, Na={}, {} frequencies, inverse={}",
                    kind,
                    numerator_order,
                    denominator_order,
                    points,
                    inverse
                );
            }
            FitEvent::StabilizationStep { iteration, tau } => {
                tracing::debug!("Stabilization iteration {}: tau={}", iteration, tau);
            }
            FitEvent::StabilizationGaveUp { iterations, tau } => {
                tracing::warn!(
                    "Stabilization did NOT result in a stable IIR filter after {} iterations (tau={}); \
                     consider a larger max_stab_iter or a different filter order",
                    iterations,
                    tau
                );
            }
            FitEvent::MonteCarloStarted { kind, runs } => {
                tracing::info!("{:?} uncertainty evaluation with {} Monte Carlo runs", kind, runs);
            }
            FitEvent::Finished {
                kind,
                rms_error,
                tau,
                stable,
            } => {
                tracing::info!(
                    "{:?} fit finished: rms error={:e}, tau={}, stable={}",
                    kind,
                    rms_error,
                    tau,
                    stable
                );
            }
        }
    }
}

/// Discards all events.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullObserver;

impl FitObserver for NullObserver {
    fn on_event(&self, _event: &FitEvent) {}
}
