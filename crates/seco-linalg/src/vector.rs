//! Small complex vector helpers shared by the estimator and the streaming
//! filter.

use num_complex::Complex64;

/// Hermitian inner product `Σ conj(a[i]) · b[i]`.
///
/// This is the `gᴴ·v` that appears both in the prediction residual and in
/// the filter application; `a` and `b` must have equal length.
#[inline]
pub fn dot_conjugate(a: &[Complex64], b: &[Complex64]) -> Complex64 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| x.conj() * y)
        .sum()
}

/// Euclidean norm `‖v‖₂` of a complex vector.
#[inline]
pub fn norm2(v: &[Complex64]) -> f64 {
    v.iter().map(|x| x.norm_sqr()).sum::<f64>().sqrt()
}
