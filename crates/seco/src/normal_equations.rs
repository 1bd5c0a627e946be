//! Weighted normal equations `R·g = r` for one subband.
//!
//! `R` accumulates `Σ w·v·vᴴ` into its lower triangle and `r` accumulates
//! `Σ w·conj(x)·v` over the buffered frames, where `v` is the lag window and
//! `w = 1/θ`. The storage is allocated once and reused across subbands,
//! channels, and estimator passes.

use num_complex::Complex64;
use seco_linalg::{NotPositiveDefinite, PackedHermitian};

#[derive(Debug)]
pub(crate) struct NormalEquations {
    covariance: PackedHermitian,
    cross: Vec<Complex64>,
    lag: Vec<Complex64>,
}

impl NormalEquations {
    pub(crate) fn new(dim: usize) -> Self {
        Self {
            covariance: PackedHermitian::new(dim),
            cross: vec![Complex64::ZERO; dim],
            lag: vec![Complex64::ZERO; dim],
        }
    }

    pub(crate) fn dim(&self) -> usize {
        self.cross.len()
    }

    pub(crate) fn clear(&mut self) {
        self.covariance.clear();
        self.cross.fill(Complex64::ZERO);
    }

    /// The lag-window scratch `v`; fill it before calling
    /// [`Self::accumulate`].
    pub(crate) fn lag_mut(&mut self) -> &mut [Complex64] {
        &mut self.lag
    }

    pub(crate) fn lag(&self) -> &[Complex64] {
        &self.lag
    }

    /// Rank-one update from the current lag window and one observation:
    /// `R[i,j] += w·v[i]·conj(v[j])` (lower triangle), `r[i] += w·conj(x)·v[i]`.
    pub(crate) fn accumulate(&mut self, weight: f64, observation: Complex64) {
        for i in 0..self.lag.len() {
            let weighted = self.lag[i] * weight;
            for j in 0..=i {
                self.covariance.add(i, j, weighted * self.lag[j].conj());
            }
            self.cross[i] += observation.conj() * weighted;
        }
    }

    /// Whether nothing (numerically) was accumulated; solving would be
    /// meaningless and the previous filter should be kept.
    pub(crate) fn is_degenerate(&self) -> bool {
        self.covariance.max_abs_diagonal() == 0.0
    }

    /// Applies the diagonal loading policy: an absolute `bias`, then a load
    /// relative to the largest diagonal element.
    pub(crate) fn load_diagonal(&mut self, relative_load: f64, bias: f64) {
        self.covariance.load_diagonal(relative_load, bias);
    }

    /// Solves `R·g = r` into `filter` via Cholesky factorization. The
    /// accumulated triangle is consumed; `clear` before the next build.
    pub(crate) fn solve_into(
        &mut self,
        filter: &mut [Complex64],
    ) -> Result<(), NotPositiveDefinite> {
        filter.copy_from_slice(&self.cross);
        let factor = self.covariance.factorize()?;
        factor.solve_in_place(filter);
        Ok(())
    }
}
