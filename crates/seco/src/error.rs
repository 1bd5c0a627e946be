//! Error type shared by the dereverberation API.

use std::result::Result as StdResult;

use seco_linalg::NotPositiveDefinite;

/// Crate-wide result alias.
pub type Result<T, E = Error> = StdResult<T, E>;

/// Errors surfaced by the dereverberators. Nothing is retried at this
/// layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Streaming was attempted before the prediction filters exist.
    #[error("prediction filters have not been estimated; call estimate_filter first")]
    NotEstimated,

    /// The caller did not advance the stream by exactly one frame.
    #[error("stream must advance by one frame: expected frame {expected}, got {got}")]
    FrameIndex {
        /// The frame index the stream is positioned at.
        expected: usize,
        /// The frame index the caller passed.
        got: usize,
    },

    /// A per-channel output was requested for a channel that does not exist.
    #[error("channel {channel} is out of range for {channels} channels")]
    ChannelIndex {
        /// The requested channel.
        channel: usize,
        /// The configured channel count.
        channels: usize,
    },

    /// `set_input` was called after every channel slot was filled.
    #[error("all {channels} input channels are already attached")]
    TooManySources {
        /// The configured channel count.
        channels: usize,
    },

    /// Estimation was attempted with unattached channel slots.
    #[error("only {attached} of {channels} input channels are attached")]
    TooFewSources {
        /// Sources attached so far.
        attached: usize,
        /// The configured channel count.
        channels: usize,
    },

    /// The configured analysis band does not fit under the Nyquist
    /// frequency.
    #[error("analysis band width {band_width_hz} Hz exceeds the Nyquist frequency {nyquist_hz} Hz")]
    BandWidth {
        /// Configured band width in Hz.
        band_width_hz: f64,
        /// Half the configured sample rate.
        nyquist_hz: f64,
    },

    /// The subband count must be even so that the Hermitian mirror has a
    /// Nyquist bin to pivot on.
    #[error("subband count {0} must be even and non-zero")]
    OddSubbandCount(usize),

    /// The lag range is empty.
    #[error("upper lag {upper} must not precede lower lag {lower}")]
    LagOrder {
        /// Configured prediction delay.
        lower: usize,
        /// Configured last lag index.
        upper: usize,
    },

    /// The loaded normal equations could not be Cholesky-factorized.
    #[error(
        "normal equations not positive definite at subband {subband}, channel {channel}: \
         channels may be too similar; raise the diagonal bias or fall back to per-channel \
         single-channel estimation"
    )]
    Factorization {
        /// Subband whose system failed.
        subband: usize,
        /// Channel whose system failed.
        channel: usize,
        /// The failed pivot.
        #[source]
        source: NotPositiveDefinite,
    },

    /// The upstream source is exhausted. Sticky: every later `next` call
    /// reports it again until `reset`.
    #[error("subband stream has ended")]
    StreamEnded,
}
