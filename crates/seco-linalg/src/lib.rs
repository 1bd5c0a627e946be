#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]

pub mod packed;
pub mod vector;

pub use packed::{CholeskyFactor, NotPositiveDefinite, PackedHermitian};
pub use vector::{dot_conjugate, norm2};
