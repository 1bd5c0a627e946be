//! Upstream subband frame sources.

use num_complex::Complex64;

/// A stream of complex subband frames, typically the output of a short-time
/// analysis filter bank.
///
/// Frames are `size()` complex samples wide and are assumed
/// Hermitian-symmetric about bin `size()/2` (the underlying signal is
/// real). `next` yields frames in order and `None` once the stream is
/// exhausted; `reset` rewinds to the first frame.
pub trait SubbandSource {
    /// Returns the next frame, or `None` at end of stream.
    fn next(&mut self) -> Option<&[Complex64]>;

    /// Rewinds the stream to its first frame.
    fn reset(&mut self);

    /// Frame width `K`.
    fn size(&self) -> usize;
}

/// An in-memory [`SubbandSource`] backed by a frame list.
///
/// Useful for tests and for feeding pre-computed analysis output through
/// the dereverberators.
#[derive(Debug, Clone)]
pub struct BufferedSource {
    num_subbands: usize,
    frames: Vec<Vec<Complex64>>,
    cursor: usize,
}

impl BufferedSource {
    /// Wraps `frames`, each of which must be `num_subbands` wide.
    pub fn new(num_subbands: usize, frames: Vec<Vec<Complex64>>) -> Self {
        assert!(
            frames.iter().all(|f| f.len() == num_subbands),
            "every frame must be {num_subbands} samples wide"
        );
        Self {
            num_subbands,
            frames,
            cursor: 0,
        }
    }

    /// Number of frames remaining before the stream ends.
    pub fn remaining(&self) -> usize {
        self.frames.len() - self.cursor
    }
}

impl SubbandSource for BufferedSource {
    fn next(&mut self) -> Option<&[Complex64]> {
        let frame = self.frames.get(self.cursor)?;
        self.cursor += 1;
        Some(frame)
    }

    fn reset(&mut self) {
        self.cursor = 0;
    }

    fn size(&self) -> usize {
        self.num_subbands
    }
}
