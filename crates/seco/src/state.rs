//! Estimator lifecycle.

/// Lifecycle of a dereverberator instance.
///
/// `estimate_filter` moves `Unestimated → Estimated`; upstream exhaustion
/// during streaming moves `Estimated → Terminated`; `reset_filter` moves
/// back to `Unestimated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EstimatorState {
    /// No prediction filters have been estimated yet.
    Unestimated,
    /// Filters are frozen; streaming may proceed.
    Estimated,
    /// The upstream source is exhausted.
    Terminated,
}
