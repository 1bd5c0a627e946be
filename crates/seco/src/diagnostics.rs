//! Per-pass estimator diagnostics.

/// One estimator pass over the selected diagnostics subband.
///
/// Recorded (and logged at debug level) once per iteration and channel when
/// [`WpeConfig::diagnostics_subband`](crate::WpeConfig::diagnostics_subband)
/// is set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationDiagnostic {
    /// Estimator pass, `0 ..` iterations.
    pub iteration: usize,
    /// Channel the values belong to (0 for single-channel).
    pub channel: usize,
    /// The selected subband.
    pub subband: usize,
    /// WPE objective `Σ |residual|²/θ + ln θ` after the normal-equation
    /// build.
    pub objective: f64,
    /// White-noise gain `20·log10 ‖g‖₂` of the freshly solved filter.
    pub white_noise_gain_db: f64,
}

pub(crate) fn emit(diagnostic: &IterationDiagnostic) {
    tracing::debug!(
        iteration = diagnostic.iteration,
        channel = diagnostic.channel,
        subband = diagnostic.subband,
        objective = diagnostic.objective,
        "wpe objective"
    );
    tracing::debug!(
        iteration = diagnostic.iteration,
        channel = diagnostic.channel,
        subband = diagnostic.subband,
        white_noise_gain_db = diagnostic.white_noise_gain_db,
        "white-noise gain"
    );
}
