//! # Numeric Kernels
//!
//! Every layer's arithmetic goes through the narrow [`VectorKernels`]
//! contract defined here. Implementations are plain structs; a backend is
//! chosen once, when a layer is built, and stored as a [`dispatch::Kernels`]
//! value whose `match` is the only dispatch in the hot loop.
//!
//! ## Submodules
//!
//! - [`cpu`]: scalar reference implementation, always available
//! - [`avx`]: explicitly unrolled wide implementation (AVX2/FMA intrinsics
//!   under the `simd` feature, portable 8-lane blocks otherwise)
//! - [`dispatch`]: enum switch from [`Backend`](crate::backend::Backend) to
//!   a kernel struct
//!
//! ## Contract
//!
//! The length `n` of every operation is the length of its first slice (for
//! `dot`) or of the destination. A shorter companion slice is a caller bug
//! and panics like out-of-bounds indexing. Only the destination is written.
//!
//! ## Example
//! ```rust
//! use briny_cnn::ops::{VectorKernels, cpu::ScalarKernels};
//!
//! let k = ScalarKernels;
//! let mut acc = vec![1.0, 1.0, 1.0];
//! k.muladd(&[1.0, 2.0, 3.0], 2.0, &mut acc);
//! assert_eq!(acc, vec![3.0, 5.0, 7.0]);
//! assert_eq!(k.dot(&[1.0, 2.0], &[3.0, 4.0]), 11.0);
//! ```

use crate::tensors::Float;

pub mod avx;
pub mod cpu;
pub mod dispatch;

/// Dot product, multiply-add, add and reduce over contiguous buffers.
pub trait VectorKernels {
    /// `Σ a[i] * b[i]` over `a.len()` elements.
    fn dot(&self, a: &[Float], b: &[Float]) -> Float;

    /// `dst[i] += src[i] * c`.
    fn muladd(&self, src: &[Float], c: Float, dst: &mut [Float]);

    /// `dst[i] += src[i]`.
    fn add(&self, src: &[Float], dst: &mut [Float]);

    /// `dst[i] += c`.
    fn add_scalar(&self, c: Float, dst: &mut [Float]);

    /// `dst[i] += src[i]`; merges a worker's gradient row into row 0.
    fn reduce(&self, src: &[Float], dst: &mut [Float]) {
        self.add(src, dst);
    }
}
