//! Scalar reference kernels.
//!
//! Plain element-at-a-time loops in natural summation order. The wide kernels
//! in [`super::avx`] are verified against these.

use super::VectorKernels;
use crate::tensors::Float;

/// Reference implementation of [`VectorKernels`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScalarKernels;

impl VectorKernels for ScalarKernels {
    fn dot(&self, a: &[Float], b: &[Float]) -> Float {
        let b = &b[..a.len()];
        let mut sum = 0.0;
        for (x, y) in a.iter().zip(b) {
            sum += x * y;
        }
        sum
    }

    fn muladd(&self, src: &[Float], c: Float, dst: &mut [Float]) {
        let src = &src[..dst.len()];
        for (d, s) in dst.iter_mut().zip(src) {
            *d += s * c;
        }
    }

    fn add(&self, src: &[Float], dst: &mut [Float]) {
        let src = &src[..dst.len()];
        for (d, s) in dst.iter_mut().zip(src) {
            *d += s;
        }
    }

    fn add_scalar(&self, c: Float, dst: &mut [Float]) {
        for d in dst {
            *d += c;
        }
    }
}
