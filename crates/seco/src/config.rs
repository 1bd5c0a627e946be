//! Dereverberator configuration.

use crate::error::{Error, Result};

/// Configuration shared by the single- and multi-channel dereverberators.
///
/// The prediction filter at subband `k` combines the observations delayed by
/// `lower_lag ..= upper_lag` frames; `lower_lag ≥ 1` keeps the direct path
/// and early reflections out of the predictor so that only the late tail is
/// subtracted.
///
/// # Example
///
/// ```
/// use seco::WpeConfig;
///
/// let config = WpeConfig {
///     num_subbands: 256,
///     lower_lag: 2,
///     upper_lag: 21,
///     ..Default::default()
/// };
/// assert_eq!(config.prediction_order(), 20);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct WpeConfig {
    /// Subband frame width `K`. Must be even; bin `K/2` is the Nyquist bin
    /// the Hermitian mirror pivots on.
    pub num_subbands: usize,
    /// Prediction delay `D` in frames: the newest observation the predictor
    /// may use is `D` frames old.
    pub lower_lag: usize,
    /// Last lag index (inclusive); the prediction order is
    /// `upper_lag − lower_lag + 1`.
    pub upper_lag: usize,
    /// Fixed number of estimator passes. There is no convergence test.
    pub iterations: usize,
    /// Relative diagonal load in dB; each covariance diagonal receives
    /// `max_diag · 10^(load_db/10)`.
    pub load_db: f64,
    /// Analysis band width in Hz; subbands outside the band pass through
    /// unfiltered. `0.0` means the full half-band.
    pub band_width_hz: f64,
    /// Sample rate in Hz, used to map `band_width_hz` onto subband indices.
    pub sample_rate_hz: f64,
    /// When set, the estimator emits the WPE objective and the white-noise
    /// gain for this subband on every pass, and records them for
    /// inspection.
    pub diagnostics_subband: Option<usize>,
}

impl Default for WpeConfig {
    fn default() -> Self {
        Self {
            num_subbands: 512,
            lower_lag: 2,
            upper_lag: 21,
            iterations: 2,
            load_db: -20.0,
            band_width_hz: 0.0,
            sample_rate_hz: 16_000.0,
            diagnostics_subband: None,
        }
    }
}

impl WpeConfig {
    /// Prediction delay `D`.
    #[inline]
    pub fn prediction_delay(&self) -> usize {
        self.lower_lag
    }

    /// Prediction order `P = upper_lag − lower_lag + 1`.
    #[inline]
    pub fn prediction_order(&self) -> usize {
        self.upper_lag - self.lower_lag + 1
    }

    /// Index of the Nyquist bin, `K/2`.
    #[inline]
    pub fn nyquist_bin(&self) -> usize {
        self.num_subbands / 2
    }

    /// Linear diagonal load factor `10^(load_db/10)`.
    #[inline]
    pub fn relative_load(&self) -> f64 {
        10f64.powf(self.load_db / 10.0)
    }

    /// Largest low-band subband index inside the analysis band.
    ///
    /// `band_width_hz == 0` selects the full half-band.
    pub fn active_band_edge(&self) -> usize {
        let half = self.nyquist_bin();
        if self.band_width_hz == 0.0 {
            half
        } else {
            ((self.band_width_hz / (self.sample_rate_hz / 2.0)) * half as f64).floor() as usize
        }
    }

    /// Whether `subband` is filtered. Subbands outside the analysis band
    /// pass through unchanged.
    pub fn is_active(&self, subband: usize) -> bool {
        let edge = self.active_band_edge();
        subband <= edge || subband >= self.num_subbands - edge
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.num_subbands == 0 || self.num_subbands % 2 != 0 {
            return Err(Error::OddSubbandCount(self.num_subbands));
        }
        if self.upper_lag < self.lower_lag {
            return Err(Error::LagOrder {
                lower: self.lower_lag,
                upper: self.upper_lag,
            });
        }
        let nyquist_hz = self.sample_rate_hz / 2.0;
        if self.band_width_hz > nyquist_hz {
            return Err(Error::BandWidth {
                band_width_hz: self.band_width_hz,
                nyquist_hz,
            });
        }
        Ok(())
    }
}

/// Configuration for the multi-channel dereverberator.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiChannelConfig {
    /// Per-subband estimation and filtering parameters.
    pub wpe: WpeConfig,
    /// Channel count `C`; also the capacity of `set_input`.
    pub num_channels: usize,
    /// Absolute regularizer added to every covariance diagonal before the
    /// relative load. Guards against near-singular joint covariances when
    /// the channels are highly correlated.
    pub diagonal_bias: f64,
}

impl Default for MultiChannelConfig {
    fn default() -> Self {
        Self {
            wpe: WpeConfig::default(),
            num_channels: 2,
            diagonal_bias: 0.0,
        }
    }
}

impl MultiChannelConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        self.wpe.validate()?;
        if self.num_channels == 0 {
            return Err(Error::TooFewSources {
                attached: 0,
                channels: 0,
            });
        }
        Ok(())
    }
}
