//! Frame histories for the two phases of dereverberation.
//!
//! Estimation buffers every pulled frame over the requested window; streaming
//! keeps only the frames the predictor can still reach. The two are the same
//! logical "past frames" under different lifetime and size constraints, so
//! they are kept as distinct types.

use std::collections::VecDeque;

use num_complex::Complex64;

/// Growable frame list captured by `fill_buffer` during filter estimation.
/// Consumed by the estimator passes, then released before streaming starts.
#[derive(Debug, Default)]
pub(crate) struct EstimationBuffer {
    frames: Vec<Vec<Complex64>>,
}

impl EstimationBuffer {
    pub(crate) fn push(&mut self, frame: &[Complex64]) {
        self.frames.push(frame.to_vec());
    }

    pub(crate) fn len(&self) -> usize {
        self.frames.len()
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        self.frames.truncate(len);
    }

    pub(crate) fn clear(&mut self) {
        self.frames.clear();
    }

    pub(crate) fn frame(&self, n: usize) -> &[Complex64] {
        &self.frames[n]
    }

    /// Fills `out[i]` with the observation `i` frames before `sample` at
    /// `subband`, zero-extended below the start of the buffer.
    pub(crate) fn lag_window(&self, subband: usize, sample: isize, out: &mut [Complex64]) {
        for (i, slot) in out.iter_mut().enumerate() {
            let n = sample - i as isize;
            *slot = if n >= 0 {
                self.frames[n as usize][subband]
            } else {
                Complex64::ZERO
            };
        }
    }
}

/// Bounded window over the most recent frames during streaming. The oldest
/// frame is dropped before a new one is appended once the predictor span is
/// full.
#[derive(Debug)]
pub(crate) struct StreamingWindow {
    capacity: usize,
    frames: VecDeque<Vec<Complex64>>,
}

impl StreamingWindow {
    /// `capacity` is the predictor span `upper_lag + 1`: the delayed lags
    /// `lower_lag ..= upper_lag` plus the frames younger than the delay.
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            frames: VecDeque::with_capacity(capacity),
        }
    }

    pub(crate) fn push(&mut self, frame: &[Complex64]) {
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame.to_vec());
    }

    pub(crate) fn len(&self) -> usize {
        self.frames.len()
    }

    pub(crate) fn clear(&mut self) {
        self.frames.clear();
    }

    /// The most recently pushed frame.
    pub(crate) fn latest(&self) -> &[Complex64] {
        &self.frames[self.frames.len() - 1]
    }

    /// Same contract as [`EstimationBuffer::lag_window`], indexed within the
    /// window.
    pub(crate) fn lag_window(&self, subband: usize, sample: isize, out: &mut [Complex64]) {
        for (i, slot) in out.iter_mut().enumerate() {
            let n = sample - i as isize;
            *slot = if n >= 0 {
                self.frames[n as usize][subband]
            } else {
                Complex64::ZERO
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(value: f64) -> Vec<Complex64> {
        vec![Complex64::new(value, 0.0); 2]
    }

    #[test]
    fn estimation_lag_window_zero_extends() {
        let mut buffer = EstimationBuffer::default();
        buffer.push(&frame(1.0));
        buffer.push(&frame(2.0));
        buffer.push(&frame(3.0));

        let mut lag = [Complex64::ZERO; 4];
        buffer.lag_window(0, 2, &mut lag);
        assert_eq!(lag[0].re, 3.0);
        assert_eq!(lag[1].re, 2.0);
        assert_eq!(lag[2].re, 1.0);
        assert_eq!(lag[3], Complex64::ZERO);
    }

    #[test]
    fn estimation_lag_window_all_zero_before_start() {
        let mut buffer = EstimationBuffer::default();
        buffer.push(&frame(5.0));
        let mut lag = [Complex64::new(9.0, 9.0); 2];
        buffer.lag_window(0, -1, &mut lag);
        assert!(lag.iter().all(|v| *v == Complex64::ZERO));
    }

    #[test]
    fn window_drops_oldest_at_capacity() {
        let mut window = StreamingWindow::new(3);
        for v in 1..=5 {
            window.push(&frame(v as f64));
            assert!(window.len() <= 3);
        }
        assert_eq!(window.len(), 3);
        assert_eq!(window.latest()[0].re, 5.0);

        let mut lag = [Complex64::ZERO; 3];
        window.lag_window(0, 2, &mut lag);
        assert_eq!(lag[0].re, 5.0);
        assert_eq!(lag[1].re, 4.0);
        assert_eq!(lag[2].re, 3.0);
    }

    #[test]
    fn window_grows_until_capacity() {
        let mut window = StreamingWindow::new(4);
        for seen in 1..=6usize {
            window.push(&frame(seen as f64));
            assert_eq!(window.len(), seen.min(4));
        }
    }

    #[test]
    fn clear_empties_but_keeps_capacity() {
        let mut window = StreamingWindow::new(2);
        window.push(&frame(1.0));
        window.push(&frame(2.0));
        window.clear();
        assert_eq!(window.len(), 0);
        window.push(&frame(3.0));
        assert_eq!(window.latest()[0].re, 3.0);
    }
}
