//! Single-channel WPE dereverberation.
//!
//! `estimate_filter` buffers a window of frames, alternates between the θ
//! sweep and the per-subband normal-equation solves for a fixed number of
//! passes, then rewinds the source and freezes the coefficients. `next`
//! filters the rewound stream frame by frame with those coefficients.

use num_complex::Complex64;
use seco_linalg::{dot_conjugate, norm2};

use crate::config::WpeConfig;
use crate::diagnostics::{self, IterationDiagnostic};
use crate::error::{Error, Result};
use crate::history::{EstimationBuffer, StreamingWindow};
use crate::normal_equations::NormalEquations;
use crate::power::PowerEstimate;
use crate::source::SubbandSource;
use crate::state::EstimatorState;

/// Single-channel weighted-prediction-error dereverberator.
#[derive(derive_more::Debug)]
pub struct SingleChannelWpe<S> {
    config: WpeConfig,
    state: EstimatorState,
    #[debug(skip)]
    source: S,
    buffer: EstimationBuffer,
    window: StreamingWindow,
    /// Per-subband prediction coefficients over the half-spectrum,
    /// `prediction_order` taps each. Zero until estimated; zero filters pass
    /// the signal through.
    #[debug(skip)]
    filters: Vec<Vec<Complex64>>,
    normal: NormalEquations,
    #[debug(skip)]
    output: Vec<Complex64>,
    frame_no: Option<usize>,
    diagnostics: Vec<IterationDiagnostic>,
}

impl<S: SubbandSource> SingleChannelWpe<S> {
    /// Creates a dereverberator over `source`. Fails if the configuration is
    /// inconsistent.
    pub fn new(source: S, config: WpeConfig) -> Result<Self> {
        config.validate()?;
        let order = config.prediction_order();
        let bins = config.nyquist_bin() + 1;
        Ok(Self {
            state: EstimatorState::Unestimated,
            buffer: EstimationBuffer::default(),
            window: StreamingWindow::new(config.upper_lag + 1),
            filters: vec![vec![Complex64::ZERO; order]; bins],
            normal: NormalEquations::new(order),
            output: vec![Complex64::ZERO; config.num_subbands],
            frame_no: None,
            diagnostics: Vec::new(),
            source,
            config,
        })
    }

    /// Frame width `K`.
    pub fn size(&self) -> usize {
        self.config.num_subbands
    }

    /// The estimated coefficients for `subband` (half-spectrum index).
    pub fn filter(&self, subband: usize) -> &[Complex64] {
        &self.filters[subband]
    }

    /// Diagnostics recorded by the last `estimate_filter` call.
    pub fn diagnostics(&self) -> &[IterationDiagnostic] {
        &self.diagnostics
    }

    /// Buffers frames `start..end` from the source (`end == 0` reads to
    /// exhaustion), estimates the prediction filters, rewinds the source,
    /// and returns the number of frames used.
    ///
    /// A source that ends mid-collection is not an error; estimation
    /// proceeds with the frames gathered so far.
    pub fn estimate_filter(&mut self, start: usize, end: usize) -> Result<usize> {
        self.diagnostics.clear();
        self.fill_buffer(start, end);
        let frames = self.buffer.len();

        let mut theta = PowerEstimate::new(frames, self.config.nyquist_bin() + 1);
        for iteration in 0..self.config.iterations {
            self.update_theta(&mut theta);
            self.update_filters(iteration, &theta)?;
        }

        self.buffer.clear();
        self.source.reset();
        self.window.clear();
        self.frame_no = None;
        self.state = EstimatorState::Estimated;
        Ok(frames)
    }

    /// Emits the dereverberated frame `frame_no`. Frames must be requested
    /// in order, one at a time, starting at 0 after `estimate_filter`.
    pub fn next(&mut self, frame_no: usize) -> Result<&[Complex64]> {
        match self.state {
            EstimatorState::Unestimated => return Err(Error::NotEstimated),
            EstimatorState::Terminated => return Err(Error::StreamEnded),
            EstimatorState::Estimated => {}
        }
        let expected = self.frame_no.map_or(0, |previous| previous + 1);
        if frame_no != expected {
            return Err(Error::FrameIndex {
                expected,
                got: frame_no,
            });
        }

        let Some(frame) = self.source.next() else {
            self.state = EstimatorState::Terminated;
            return Err(Error::StreamEnded);
        };
        self.window.push(frame);

        let nyquist = self.config.nyquist_bin();
        let delay = self.config.prediction_delay();
        let edge = self.config.active_band_edge();
        let sample = self.window.len() as isize - 1 - delay as isize;
        for k in 0..=nyquist {
            let mut value = self.window.latest()[k];
            if frame_no >= delay && (k <= edge || k >= self.config.num_subbands - edge) {
                self.window.lag_window(k, sample, self.normal.lag_mut());
                value -= dot_conjugate(&self.filters[k], self.normal.lag());
            }
            self.output[k] = value;
            if k > 0 && k < nyquist {
                self.output[self.config.num_subbands - k] = value.conj();
            }
        }

        self.frame_no = Some(frame_no);
        Ok(&self.output)
    }

    /// Rewinds the source and clears the frame histories. The filters are
    /// kept; a terminated stream becomes streamable again from frame 0.
    pub fn reset(&mut self) {
        self.source.reset();
        self.buffer.clear();
        self.window.clear();
        self.frame_no = None;
        if self.state == EstimatorState::Terminated {
            self.state = EstimatorState::Estimated;
        }
    }

    /// Zeroes the filters and requires a new `estimate_filter` before
    /// streaming.
    pub fn reset_filter(&mut self) {
        for filter in &mut self.filters {
            filter.fill(Complex64::ZERO);
        }
        self.frame_no = None;
        self.state = EstimatorState::Unestimated;
    }

    /// Prepares for a new talker: rewinds everything and zeroes the filters.
    pub fn next_speaker(&mut self) {
        self.reset();
        self.reset_filter();
    }

    fn fill_buffer(&mut self, start: usize, end: usize) {
        let mut frame = 0;
        while frame < start {
            if self.source.next().is_none() {
                return;
            }
            frame += 1;
        }
        while end == 0 || frame < end {
            let Some(pulled) = self.source.next() else {
                break;
            };
            self.buffer.push(pulled);
            frame += 1;
        }
    }

    /// The θ sweep: recomputes every `(n, k)` residual power from the
    /// current filters. Runs to completion before any subband's normal
    /// equations are rebuilt, so each pass stays coordinate descent on the
    /// WPE objective.
    fn update_theta(&mut self, theta: &mut PowerEstimate) {
        let nyquist = self.config.nyquist_bin();
        let delay = self.config.prediction_delay();
        for n in 0..self.buffer.len() {
            for k in 0..=nyquist {
                let mut residual = self.buffer.frame(n)[k];
                if n >= delay {
                    self.buffer
                        .lag_window(k, (n - delay) as isize, self.normal.lag_mut());
                    residual -= dot_conjugate(&self.filters[k], self.normal.lag());
                }
                theta.record_residual(n, k, residual);
            }
        }
    }

    /// Rebuilds and solves the normal equations for every active subband.
    /// Skipped subbands keep their previous coefficients.
    fn update_filters(&mut self, iteration: usize, theta: &PowerEstimate) -> Result<()> {
        let frames = self.buffer.len();
        let nyquist = self.config.nyquist_bin();
        let delay = self.config.prediction_delay();
        let relative_load = self.config.relative_load();
        for k in 0..=nyquist {
            if !self.config.is_active(k) || frames <= delay {
                continue;
            }

            self.normal.clear();
            let diagnose = self.config.diagnostics_subband == Some(k);
            let mut objective = 0.0;
            for n in delay..frames {
                self.buffer
                    .lag_window(k, (n - delay) as isize, self.normal.lag_mut());
                let weight = theta.weight(n, k);
                let observation = self.buffer.frame(n)[k];
                if diagnose {
                    let residual =
                        observation - dot_conjugate(&self.filters[k], self.normal.lag());
                    objective += residual.norm_sqr() * weight + theta.value(n, k).ln();
                }
                self.normal.accumulate(weight, observation);
            }
            if self.normal.is_degenerate() {
                // No energy reached this subband; keep the previous filter.
                continue;
            }
            self.normal.load_diagonal(relative_load, 0.0);
            self.normal
                .solve_into(&mut self.filters[k])
                .map_err(|source| Error::Factorization {
                    subband: k,
                    channel: 0,
                    source,
                })?;

            if diagnose {
                let diagnostic = IterationDiagnostic {
                    iteration,
                    channel: 0,
                    subband: k,
                    objective,
                    white_noise_gain_db: 20.0 * norm2(&self.filters[k]).log10(),
                };
                diagnostics::emit(&diagnostic);
                self.diagnostics.push(diagnostic);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::BufferedSource;

    fn config(num_subbands: usize) -> WpeConfig {
        WpeConfig {
            num_subbands,
            lower_lag: 1,
            upper_lag: 2,
            iterations: 1,
            load_db: -40.0,
            ..Default::default()
        }
    }

    fn constant_frames(value: f64, width: usize, count: usize) -> Vec<Vec<Complex64>> {
        vec![vec![Complex64::new(value, 0.0); width]; count]
    }

    #[test]
    fn next_before_estimation_fails() {
        let source = BufferedSource::new(4, constant_frames(1.0, 4, 3));
        let mut wpe = SingleChannelWpe::new(source, config(4)).unwrap();
        assert!(matches!(wpe.next(0), Err(Error::NotEstimated)));
    }

    #[test]
    fn estimation_consumes_requested_window() {
        let source = BufferedSource::new(4, constant_frames(1.0, 4, 10));
        let mut wpe = SingleChannelWpe::new(source, config(4)).unwrap();
        assert_eq!(wpe.estimate_filter(2, 7).unwrap(), 5);
    }

    #[test]
    fn estimation_survives_early_stream_end() {
        let source = BufferedSource::new(4, constant_frames(1.0, 4, 3));
        let mut wpe = SingleChannelWpe::new(source, config(4)).unwrap();
        // Asked for 100 frames, gets 3.
        assert_eq!(wpe.estimate_filter(0, 100).unwrap(), 3);
    }

    #[test]
    fn streaming_to_exhaustion_terminates_then_reset_revives() {
        let source = BufferedSource::new(4, constant_frames(1.0, 4, 2));
        let mut wpe = SingleChannelWpe::new(source, config(4)).unwrap();
        wpe.estimate_filter(0, 0).unwrap();

        wpe.next(0).unwrap();
        wpe.next(1).unwrap();
        assert!(matches!(wpe.next(2), Err(Error::StreamEnded)));
        // Sticky until reset.
        assert!(matches!(wpe.next(3), Err(Error::StreamEnded)));

        wpe.reset();
        assert_eq!(wpe.next(0).unwrap().len(), 4);
    }

    #[test]
    fn reset_filter_zeroes_coefficients() {
        let source = BufferedSource::new(4, constant_frames(1.0, 4, 8));
        let mut wpe = SingleChannelWpe::new(source, config(4)).unwrap();
        wpe.estimate_filter(0, 0).unwrap();
        assert!(wpe.filter(0).iter().any(|g| g.norm() > 0.0));

        wpe.reset_filter();
        assert!(wpe.filter(0).iter().all(|g| *g == Complex64::ZERO));
        assert!(matches!(wpe.next(0), Err(Error::NotEstimated)));
    }

    #[test]
    fn rejects_invalid_config() {
        let source = BufferedSource::new(4, vec![]);
        let bad = WpeConfig {
            num_subbands: 5,
            ..Default::default()
        };
        assert!(SingleChannelWpe::new(source, bad).is_err());
    }
}
