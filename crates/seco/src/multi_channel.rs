//! Multi-channel WPE dereverberation.
//!
//! The orchestrator owns every per-channel buffer and filter; the predictor
//! for each channel draws on the lagged observations of *all* channels, so
//! the lag window is the per-channel windows stacked end to end. Thin
//! per-channel façades share the orchestrator; the primary façade (channel
//! 0) triggers the joint per-frame computation, the others read the output
//! already computed for their channel.

use std::cell::{Ref, RefCell};
use std::rc::Rc;

use num_complex::Complex64;
use seco_linalg::{dot_conjugate, norm2};

use crate::config::MultiChannelConfig;
use crate::diagnostics::{self, IterationDiagnostic};
use crate::error::{Error, Result};
use crate::history::{EstimationBuffer, StreamingWindow};
use crate::normal_equations::NormalEquations;
use crate::power::PowerEstimate;
use crate::source::SubbandSource;
use crate::state::EstimatorState;

/// Fills `out` with the per-channel lag windows stacked end to end:
/// `out[c·order + i]` is channel `c` delayed by `i` frames from `sample`.
fn stacked_lag<'a, I>(parts: I, subband: usize, sample: isize, order: usize, out: &mut [Complex64])
where
    I: IntoIterator<Item = LagPart<'a>>,
{
    for (c, part) in parts.into_iter().enumerate() {
        let slot = &mut out[c * order..(c + 1) * order];
        match part {
            LagPart::Buffer(buffer) => buffer.lag_window(subband, sample, slot),
            LagPart::Window(window) => window.lag_window(subband, sample, slot),
        }
    }
}

enum LagPart<'a> {
    Buffer(&'a EstimationBuffer),
    Window(&'a StreamingWindow),
}

/// Multi-channel weighted-prediction-error dereverberator.
///
/// Attach one [`SubbandSource`] per channel with [`Self::set_input`], run
/// [`Self::estimate_filter`], then stream either through
/// [`Self::calc_every_channel_output`] + [`Self::get_output`] directly or
/// through [`WpeChannel`] façades.
#[derive(derive_more::Debug)]
pub struct MultiChannelWpe {
    config: MultiChannelConfig,
    state: EstimatorState,
    #[debug(skip)]
    sources: Vec<Box<dyn SubbandSource>>,
    buffers: Vec<EstimationBuffer>,
    windows: Vec<StreamingWindow>,
    /// `filters[c][k]`: the joint predictor for channel `c` at subband `k`,
    /// `prediction_order · num_channels` taps.
    #[debug(skip)]
    filters: Vec<Vec<Vec<Complex64>>>,
    normal: NormalEquations,
    #[debug(skip)]
    outputs: Vec<Vec<Complex64>>,
    frame_no: Option<usize>,
    diagnostics: Vec<IterationDiagnostic>,
}

impl MultiChannelWpe {
    /// Creates a dereverberator for `config.num_channels` channels; sources
    /// are attached separately.
    pub fn new(config: MultiChannelConfig) -> Result<Self> {
        config.validate()?;
        let channels = config.num_channels;
        let order = config.wpe.prediction_order();
        let bins = config.wpe.nyquist_bin() + 1;
        Ok(Self {
            state: EstimatorState::Unestimated,
            sources: Vec::with_capacity(channels),
            buffers: (0..channels).map(|_| EstimationBuffer::default()).collect(),
            windows: (0..channels)
                .map(|_| StreamingWindow::new(config.wpe.upper_lag + 1))
                .collect(),
            filters: vec![vec![vec![Complex64::ZERO; order * channels]; bins]; channels],
            normal: NormalEquations::new(order * channels),
            outputs: vec![vec![Complex64::ZERO; config.wpe.num_subbands]; channels],
            frame_no: None,
            diagnostics: Vec::new(),
            config,
        })
    }

    /// Frame width `K`.
    pub fn size(&self) -> usize {
        self.config.wpe.num_subbands
    }

    /// Configured channel count `C`.
    pub fn num_channels(&self) -> usize {
        self.config.num_channels
    }

    /// Diagnostics recorded by the last `estimate_filter` call.
    pub fn diagnostics(&self) -> &[IterationDiagnostic] {
        &self.diagnostics
    }

    /// The joint predictor for `channel` at `subband` (half-spectrum index).
    pub fn filter(&self, channel: usize, subband: usize) -> &[Complex64] {
        &self.filters[channel][subband]
    }

    /// Attaches the next channel's source. Fails once all channel slots are
    /// taken.
    pub fn set_input(&mut self, source: Box<dyn SubbandSource>) -> Result<()> {
        if self.sources.len() == self.config.num_channels {
            return Err(Error::TooManySources {
                channels: self.config.num_channels,
            });
        }
        self.sources.push(source);
        Ok(())
    }

    /// Buffers frames `start..end` from every source (`end == 0` reads to
    /// exhaustion), jointly estimates all channels' prediction filters,
    /// rewinds the sources, and returns the number of frames used.
    pub fn estimate_filter(&mut self, start: usize, end: usize) -> Result<usize> {
        if self.sources.len() != self.config.num_channels {
            return Err(Error::TooFewSources {
                attached: self.sources.len(),
                channels: self.config.num_channels,
            });
        }
        self.diagnostics.clear();
        self.fill_buffer(start, end);
        let frames = self.buffers[0].len();

        let bins = self.config.wpe.nyquist_bin() + 1;
        let mut theta: Vec<PowerEstimate> = (0..self.config.num_channels)
            .map(|_| PowerEstimate::new(frames, bins))
            .collect();
        for iteration in 0..self.config.wpe.iterations {
            self.update_theta(&mut theta);
            self.update_filters(iteration, &theta)?;
        }

        for buffer in &mut self.buffers {
            buffer.clear();
        }
        for source in &mut self.sources {
            source.reset();
        }
        for window in &mut self.windows {
            window.clear();
        }
        self.frame_no = None;
        self.state = EstimatorState::Estimated;
        Ok(frames)
    }

    /// Pulls one frame from every source and computes every channel's
    /// dereverberated output for `frame_no`. Runs once per stream frame;
    /// the per-channel results stay available through [`Self::get_output`].
    pub fn calc_every_channel_output(&mut self, frame_no: usize) -> Result<()> {
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

        for (source, window) in self.sources.iter_mut().zip(self.windows.iter_mut()) {
            let Some(frame) = source.next() else {
                self.state = EstimatorState::Terminated;
                return Err(Error::StreamEnded);
            };
            window.push(frame);
        }

        let num_subbands = self.config.wpe.num_subbands;
        let nyquist = self.config.wpe.nyquist_bin();
        let delay = self.config.wpe.prediction_delay();
        let edge = self.config.wpe.active_band_edge();
        let order = self.config.wpe.prediction_order();
        let sample = self.windows[0].len() as isize - 1 - delay as isize;
        for k in 0..=nyquist {
            let filtered = frame_no >= delay && (k <= edge || k >= num_subbands - edge);
            if filtered {
                stacked_lag(
                    self.windows.iter().map(LagPart::Window),
                    k,
                    sample,
                    order,
                    self.normal.lag_mut(),
                );
            }
            for c in 0..self.config.num_channels {
                let mut value = self.windows[c].latest()[k];
                if filtered {
                    value -= dot_conjugate(&self.filters[c][k], self.normal.lag());
                }
                self.outputs[c][k] = value;
                if k > 0 && k < nyquist {
                    self.outputs[c][num_subbands - k] = value.conj();
                }
            }
        }

        self.frame_no = Some(frame_no);
        Ok(())
    }

    /// The output frame most recently computed for `channel`.
    pub fn get_output(&self, channel: usize) -> Result<&[Complex64]> {
        if channel >= self.config.num_channels {
            return Err(Error::ChannelIndex {
                channel,
                channels: self.config.num_channels,
            });
        }
        Ok(&self.outputs[channel])
    }

    /// Rewinds every source and clears the frame histories. The filters are
    /// kept; a terminated stream becomes streamable again from frame 0.
    pub fn reset(&mut self) {
        for source in &mut self.sources {
            source.reset();
        }
        for buffer in &mut self.buffers {
            buffer.clear();
        }
        for window in &mut self.windows {
            window.clear();
        }
        self.frame_no = None;
        if self.state == EstimatorState::Terminated {
            self.state = EstimatorState::Estimated;
        }
    }

    /// Zeroes every channel's filters and requires a new `estimate_filter`
    /// before streaming.
    pub fn reset_filter(&mut self) {
        for channel in &mut self.filters {
            for filter in channel {
                filter.fill(Complex64::ZERO);
            }
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
        'discard: while frame < start {
            for source in &mut self.sources {
                if source.next().is_none() {
                    break 'discard;
                }
            }
            frame += 1;
        }
        if frame == start {
            'collect: while end == 0 || frame < end {
                for (source, buffer) in self.sources.iter_mut().zip(self.buffers.iter_mut()) {
                    let Some(pulled) = source.next() else {
                        break 'collect;
                    };
                    buffer.push(pulled);
                }
                frame += 1;
            }
        }
        // A source that ended mid-frame leaves the earlier channels one
        // frame ahead; keep only complete frames.
        let frames = self.buffers.iter().map(EstimationBuffer::len).min();
        if let Some(frames) = frames {
            for buffer in &mut self.buffers {
                buffer.truncate(frames);
            }
        }
    }

    /// The θ sweep over every `(channel, frame, subband)`, against each
    /// channel's own filters and the stacked lag window.
    fn update_theta(&mut self, theta: &mut [PowerEstimate]) {
        let nyquist = self.config.wpe.nyquist_bin();
        let delay = self.config.wpe.prediction_delay();
        let order = self.config.wpe.prediction_order();
        let frames = self.buffers[0].len();
        for c in 0..self.config.num_channels {
            for n in 0..frames {
                for k in 0..=nyquist {
                    let mut residual = self.buffers[c].frame(n)[k];
                    if n >= delay {
                        stacked_lag(
                            self.buffers.iter().map(LagPart::Buffer),
                            k,
                            (n - delay) as isize,
                            order,
                            self.normal.lag_mut(),
                        );
                        residual -= dot_conjugate(&self.filters[c][k], self.normal.lag());
                    }
                    theta[c].record_residual(n, k, residual);
                }
            }
        }
    }

    fn update_filters(&mut self, iteration: usize, theta: &[PowerEstimate]) -> Result<()> {
        let frames = self.buffers[0].len();
        let nyquist = self.config.wpe.nyquist_bin();
        let delay = self.config.wpe.prediction_delay();
        let order = self.config.wpe.prediction_order();
        let relative_load = self.config.wpe.relative_load();
        for k in 0..=nyquist {
            if !self.config.wpe.is_active(k) || frames <= delay {
                continue;
            }
            for c in 0..self.config.num_channels {
                self.normal.clear();
                let diagnose = self.config.wpe.diagnostics_subband == Some(k);
                let mut objective = 0.0;
                for n in delay..frames {
                    stacked_lag(
                        self.buffers.iter().map(LagPart::Buffer),
                        k,
                        (n - delay) as isize,
                        order,
                        self.normal.lag_mut(),
                    );
                    let weight = theta[c].weight(n, k);
                    let observation = self.buffers[c].frame(n)[k];
                    if diagnose {
                        let residual =
                            observation - dot_conjugate(&self.filters[c][k], self.normal.lag());
                        objective += residual.norm_sqr() * weight + theta[c].value(n, k).ln();
                    }
                    self.normal.accumulate(weight, observation);
                }
                if self.normal.is_degenerate() {
                    continue;
                }
                self.normal
                    .load_diagonal(relative_load, self.config.diagonal_bias);
                self.normal
                    .solve_into(&mut self.filters[c][k])
                    .map_err(|source| Error::Factorization {
                        subband: k,
                        channel: c,
                        source,
                    })?;

                if diagnose {
                    let diagnostic = IterationDiagnostic {
                        iteration,
                        channel: c,
                        subband: k,
                        objective,
                        white_noise_gain_db: 20.0 * norm2(&self.filters[c][k]).log10(),
                    };
                    diagnostics::emit(&diagnostic);
                    self.diagnostics.push(diagnostic);
                }
            }
        }
        Ok(())
    }
}

/// A per-channel view of a shared [`MultiChannelWpe`].
///
/// Exactly one façade is primary (channel 0): its `next` pulls the sources
/// and computes every channel's output for the frame. The remaining façades
/// must request the same frame and receive their channel's already-computed
/// output, so the sources are pulled once per stream frame regardless of
/// fan-out.
#[derive(Debug, Clone)]
pub struct WpeChannel {
    inner: Rc<RefCell<MultiChannelWpe>>,
    channel: usize,
}

impl WpeChannel {
    /// Creates one façade per configured channel.
    pub fn fan_out(shared: &Rc<RefCell<MultiChannelWpe>>) -> Vec<Self> {
        let channels = shared.borrow().num_channels();
        (0..channels)
            .map(|channel| Self {
                inner: Rc::clone(shared),
                channel,
            })
            .collect()
    }

    /// The channel this façade reads.
    pub fn channel(&self) -> usize {
        self.channel
    }

    /// Frame width `K`.
    pub fn size(&self) -> usize {
        self.inner.borrow().size()
    }

    /// The dereverberated frame `frame_no` for this façade's channel.
    pub fn next(&self, frame_no: usize) -> Result<Ref<'_, [Complex64]>> {
        if self.channel == 0 {
            self.inner.borrow_mut().calc_every_channel_output(frame_no)?;
        } else {
            let inner = self.inner.borrow();
            match inner.state {
                EstimatorState::Unestimated => return Err(Error::NotEstimated),
                EstimatorState::Terminated => return Err(Error::StreamEnded),
                EstimatorState::Estimated => {}
            }
            if inner.frame_no != Some(frame_no) {
                return Err(Error::FrameIndex {
                    expected: inner.frame_no.unwrap_or(0),
                    got: frame_no,
                });
            }
        }
        let channel = self.channel;
        Ok(Ref::map(self.inner.borrow(), |wpe| {
            wpe.outputs[channel].as_slice()
        }))
    }
}
