//! Packed lower-triangle storage for complex Hermitian matrices, with an
//! in-place Cholesky factorization and triangular solves.
//!
//! The estimator accumulates its normal equations into the lower triangle
//! only; the upper triangle is implied by Hermitian symmetry and is never
//! stored. Row-major packed layout: element `(i, j)` with `j ≤ i` lives at
//! `i·(i+1)/2 + j`.

use num_complex::Complex64;

/// Cholesky failure: a pivot came out non-positive (or non-finite), so the
/// matrix is not positive definite.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
#[error("matrix is not positive definite (pivot {pivot} = {value})")]
pub struct NotPositiveDefinite {
    /// Index of the offending pivot.
    pub pivot: usize,
    /// Value of the offending pivot before the square root.
    pub value: f64,
}

/// A complex Hermitian matrix stored as its packed lower triangle.
///
/// Only `(i, j)` with `j ≤ i` is addressable. The diagonal of a Hermitian
/// matrix is real; [`Self::load_diagonal`] and the factorization rely on
/// that and ignore any accumulated imaginary part on the diagonal.
#[derive(Debug, Clone)]
pub struct PackedHermitian {
    dim: usize,
    data: Vec<Complex64>,
}

#[inline]
fn packed_index(i: usize, j: usize) -> usize {
    debug_assert!(j <= i);
    i * (i + 1) / 2 + j
}

impl PackedHermitian {
    /// Creates a zeroed `dim × dim` matrix.
    pub fn new(dim: usize) -> Self {
        assert!(dim > 0, "matrix dimension must be positive");
        Self {
            dim,
            data: vec![Complex64::ZERO; dim * (dim + 1) / 2],
        }
    }

    /// Matrix dimension.
    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Zeroes every stored element, keeping the allocation.
    pub fn clear(&mut self) {
        self.data.fill(Complex64::ZERO);
    }

    /// Returns element `(i, j)` of the lower triangle (`j ≤ i`).
    #[inline]
    pub fn get(&self, i: usize, j: usize) -> Complex64 {
        self.data[packed_index(i, j)]
    }

    /// Adds `value` to element `(i, j)` of the lower triangle (`j ≤ i`).
    #[inline]
    pub fn add(&mut self, i: usize, j: usize, value: Complex64) {
        self.data[packed_index(i, j)] += value;
    }

    /// Largest diagonal magnitude, `max_i |A[i,i]|`.
    pub fn max_abs_diagonal(&self) -> f64 {
        (0..self.dim)
            .map(|i| self.data[packed_index(i, i)].norm())
            .fold(0.0, f64::max)
    }

    /// Regularizes the diagonal: every `A[i,i]` becomes the real value
    /// `|A[i,i] + bias| + max_abs_diagonal · relative_load`, imaginary part
    /// dropped.
    ///
    /// `bias` is applied before the maximum is taken, so an absolute bias
    /// also participates in the relative load scale.
    pub fn load_diagonal(&mut self, relative_load: f64, bias: f64) {
        if bias != 0.0 {
            for i in 0..self.dim {
                self.data[packed_index(i, i)] += Complex64::new(bias, 0.0);
            }
        }
        let load = self.max_abs_diagonal() * relative_load;
        for i in 0..self.dim {
            let magnitude = self.data[packed_index(i, i)].norm();
            self.data[packed_index(i, i)] = Complex64::new(magnitude + load, 0.0);
        }
    }

    /// Cholesky-factorizes the matrix in place (`A = L·Lᴴ`), overwriting the
    /// stored triangle with `L`, and returns a solve handle.
    ///
    /// On failure the stored triangle is left partially overwritten; callers
    /// rebuild it from scratch on the next accumulation pass.
    pub fn factorize(&mut self) -> Result<CholeskyFactor<'_>, NotPositiveDefinite> {
        let n = self.dim;
        for j in 0..n {
            let mut pivot = self.data[packed_index(j, j)].re;
            for p in 0..j {
                pivot -= self.data[packed_index(j, p)].norm_sqr();
            }
            if !(pivot.is_finite() && pivot > 0.0) {
                return Err(NotPositiveDefinite { pivot: j, value: pivot });
            }
            let l_jj = pivot.sqrt();
            self.data[packed_index(j, j)] = Complex64::new(l_jj, 0.0);

            for i in (j + 1)..n {
                let mut sum = self.data[packed_index(i, j)];
                for p in 0..j {
                    sum -= self.data[packed_index(i, p)] * self.data[packed_index(j, p)].conj();
                }
                self.data[packed_index(i, j)] = sum / l_jj;
            }
        }
        Ok(CholeskyFactor { matrix: self })
    }
}

/// A Cholesky factor `L` borrowed from a factorized [`PackedHermitian`].
#[derive(Debug)]
pub struct CholeskyFactor<'a> {
    matrix: &'a PackedHermitian,
}

impl CholeskyFactor<'_> {
    /// Solves `A·x = b` in place: forward substitution with `L`, then back
    /// substitution with `Lᴴ`. `b` must have length `dim`.
    pub fn solve_in_place(&self, b: &mut [Complex64]) {
        let n = self.matrix.dim;
        debug_assert_eq!(b.len(), n);
        let data = &self.matrix.data;

        // L·y = b
        for i in 0..n {
            let mut sum = b[i];
            for j in 0..i {
                sum -= data[packed_index(i, j)] * b[j];
            }
            b[i] = sum / data[packed_index(i, i)].re;
        }

        // Lᴴ·x = y
        for i in (0..n).rev() {
            let mut sum = b[i];
            for j in (i + 1)..n {
                sum -= data[packed_index(j, i)].conj() * b[j];
            }
            b[i] = sum / data[packed_index(i, i)].re;
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use num_complex::Complex64;
    use proptest::prop_assert;
    use test_strategy::proptest;

    use super::*;

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    /// Multiplies the full Hermitian matrix implied by the lower triangle
    /// with `x`.
    fn hermitian_multiply(m: &PackedHermitian, x: &[Complex64]) -> Vec<Complex64> {
        let n = m.dim();
        let mut y = vec![Complex64::ZERO; n];
        for i in 0..n {
            for j in 0..n {
                let a_ij = if j <= i { m.get(i, j) } else { m.get(j, i).conj() };
                y[i] += a_ij * x[j];
            }
        }
        y
    }

    #[test]
    fn identity_solve_is_identity() {
        let mut m = PackedHermitian::new(3);
        for i in 0..3 {
            m.add(i, i, c(1.0, 0.0));
        }
        let factor = m.factorize().unwrap();
        let mut b = vec![c(1.0, -2.0), c(0.5, 0.0), c(-3.0, 1.0)];
        let expected = b.clone();
        factor.solve_in_place(&mut b);
        for (got, want) in b.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(got.re, want.re, epsilon = 1e-12);
            assert_abs_diff_eq!(got.im, want.im, epsilon = 1e-12);
        }
    }

    #[test]
    fn solves_known_hermitian_system() {
        // A = [[4, 1-i], [1+i, 3]], positive definite.
        let mut m = PackedHermitian::new(2);
        m.add(0, 0, c(4.0, 0.0));
        m.add(1, 0, c(1.0, 1.0));
        m.add(1, 1, c(3.0, 0.0));
        let reference = m.clone();

        let x_true = vec![c(1.0, 1.0), c(-2.0, 0.5)];
        let mut b = hermitian_multiply(&reference, &x_true);

        let factor = m.factorize().unwrap();
        factor.solve_in_place(&mut b);

        for (got, want) in b.iter().zip(x_true.iter()) {
            assert_abs_diff_eq!(got.re, want.re, epsilon = 1e-10);
            assert_abs_diff_eq!(got.im, want.im, epsilon = 1e-10);
        }
    }

    #[test]
    fn rejects_indefinite_matrix() {
        let mut m = PackedHermitian::new(2);
        m.add(0, 0, c(1.0, 0.0));
        m.add(1, 0, c(2.0, 0.0));
        m.add(1, 1, c(1.0, 0.0));

        let err = m.factorize().unwrap_err();
        assert_eq!(err.pivot, 1);
        assert!(err.value <= 0.0);
    }

    #[test]
    fn rejects_zero_matrix() {
        let mut m = PackedHermitian::new(3);
        assert!(m.factorize().is_err());
    }

    #[test]
    fn load_diagonal_applies_bias_and_relative_load() {
        let mut m = PackedHermitian::new(2);
        m.add(0, 0, c(10.0, 0.0));
        m.add(1, 1, c(-2.0, 0.0));

        m.load_diagonal(0.1, 1.0);

        // Bias first: diag = [11, -1]; max |diag| = 11; load = 1.1.
        assert_abs_diff_eq!(m.get(0, 0).re, 11.0 + 1.1, epsilon = 1e-12);
        assert_abs_diff_eq!(m.get(1, 1).re, 1.0 + 1.1, epsilon = 1e-12);
        assert_abs_diff_eq!(m.get(0, 0).im, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(m.get(1, 1).im, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn load_diagonal_zeroes_imaginary_part() {
        let mut m = PackedHermitian::new(1);
        m.add(0, 0, c(3.0, 4.0));
        m.load_diagonal(0.0, 0.0);
        assert_abs_diff_eq!(m.get(0, 0).re, 5.0, epsilon = 1e-12);
        assert_abs_diff_eq!(m.get(0, 0).im, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn clear_keeps_dimension() {
        let mut m = PackedHermitian::new(4);
        m.add(3, 1, c(1.0, 1.0));
        m.clear();
        assert_eq!(m.dim(), 4);
        assert_eq!(m.get(3, 1), Complex64::ZERO);
    }

    #[proptest]
    fn solve_inverts_multiply(
        #[strategy(2usize..6)] dim: usize,
        #[strategy(proptest::collection::vec(-1.0f64..1.0, 64))] entries: Vec<f64>,
    ) {
        // Build A = B·Bᴴ + I from random data so it is positive definite.
        let mut b_full = vec![vec![Complex64::ZERO; dim]; dim];
        let mut it = entries.iter().cycle();
        for row in b_full.iter_mut() {
            for v in row.iter_mut() {
                *v = c(*it.next().unwrap(), *it.next().unwrap());
            }
        }

        let mut m = PackedHermitian::new(dim);
        for i in 0..dim {
            for j in 0..=i {
                let mut sum = Complex64::ZERO;
                for p in 0..dim {
                    sum += b_full[i][p] * b_full[j][p].conj();
                }
                if i == j {
                    sum += Complex64::new(1.0, 0.0);
                }
                m.add(i, j, sum);
            }
        }
        let reference = m.clone();

        let x_true: Vec<Complex64> = (0..dim).map(|i| c(i as f64 + 0.5, -(i as f64))).collect();
        let mut rhs = hermitian_multiply(&reference, &x_true);

        let factor = m.factorize().unwrap();
        factor.solve_in_place(&mut rhs);

        for (got, want) in rhs.iter().zip(x_true.iter()) {
            prop_assert!((got - want).norm() < 1e-8);
        }
    }
}
