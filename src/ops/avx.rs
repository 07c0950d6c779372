//! Wide kernels.
//!
//! Work is split into blocks of four unrolled vector lanes, then single lanes,
//! then a scalar tail, so any length is accepted.
//!
//! ## Safety
//!
//! With `--features simd` on an x86_64 target compiled with AVX2 and FMA the
//! lane operations are AVX intrinsics over unaligned loads. Every pointer
//! offset is bounded by the slice length checked on entry. On other targets
//! the same blocking runs on plain arrays.

use super::VectorKernels;
use crate::tensors::Float;

/// Unrolled implementation of [`VectorKernels`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AvxKernels;

/// Floats per vector lane.
pub const LANE: usize = 8;
const BLOCK: usize = 4 * LANE;

impl VectorKernels for AvxKernels {
    fn dot(&self, a: &[Float], b: &[Float]) -> Float {
        let b = &b[..a.len()];
        lanes::dot(a, b)
    }

    fn muladd(&self, src: &[Float], c: Float, dst: &mut [Float]) {
        let src = &src[..dst.len()];
        lanes::muladd(src, c, dst);
    }

    fn add(&self, src: &[Float], dst: &mut [Float]) {
        let src = &src[..dst.len()];
        lanes::add(src, dst);
    }

    fn add_scalar(&self, c: Float, dst: &mut [Float]) {
        lanes::add_scalar(c, dst);
    }
}

#[cfg(all(
    feature = "simd",
    target_arch = "x86_64",
    target_feature = "avx2",
    target_feature = "fma"
))]
mod lanes {
    use super::{BLOCK, LANE};
    use crate::tensors::Float;
    use core::arch::x86_64::*;

    pub fn dot(a: &[Float], b: &[Float]) -> Float {
        let n = a.len();
        let (pa, pb) = (a.as_ptr(), b.as_ptr());
        let mut i = 0;
        let mut tmp = [0.0 as Float; LANE];
        // SAFETY: `b.len() == n` and every load reads `LANE` floats starting
        // below `n - LANE + 1`.
        unsafe {
            let mut acc0 = _mm256_setzero_ps();
            let mut acc1 = _mm256_setzero_ps();
            let mut acc2 = _mm256_setzero_ps();
            let mut acc3 = _mm256_setzero_ps();
            while i + BLOCK <= n {
                acc0 = _mm256_fmadd_ps(_mm256_loadu_ps(pa.add(i)), _mm256_loadu_ps(pb.add(i)), acc0);
                acc1 = _mm256_fmadd_ps(
                    _mm256_loadu_ps(pa.add(i + LANE)),
                    _mm256_loadu_ps(pb.add(i + LANE)),
                    acc1,
                );
                acc2 = _mm256_fmadd_ps(
                    _mm256_loadu_ps(pa.add(i + 2 * LANE)),
                    _mm256_loadu_ps(pb.add(i + 2 * LANE)),
                    acc2,
                );
                acc3 = _mm256_fmadd_ps(
                    _mm256_loadu_ps(pa.add(i + 3 * LANE)),
                    _mm256_loadu_ps(pb.add(i + 3 * LANE)),
                    acc3,
                );
                i += BLOCK;
            }
            while i + LANE <= n {
                acc0 = _mm256_fmadd_ps(_mm256_loadu_ps(pa.add(i)), _mm256_loadu_ps(pb.add(i)), acc0);
                i += LANE;
            }
            let acc = _mm256_add_ps(_mm256_add_ps(acc0, acc1), _mm256_add_ps(acc2, acc3));
            _mm256_storeu_ps(tmp.as_mut_ptr(), acc);
        }
        let mut sum: Float = tmp.iter().sum();
        for (x, y) in a[i..].iter().zip(&b[i..]) {
            sum += x * y;
        }
        sum
    }

    pub fn muladd(src: &[Float], c: Float, dst: &mut [Float]) {
        let n = dst.len();
        let mut i = 0;
        // SAFETY: `src.len() == n`; loads and stores stay below `n`.
        unsafe {
            let cv = _mm256_set1_ps(c);
            while i + LANE <= n {
                let d = dst.as_mut_ptr().add(i);
                let r = _mm256_fmadd_ps(_mm256_loadu_ps(src.as_ptr().add(i)), cv, _mm256_loadu_ps(d));
                _mm256_storeu_ps(d, r);
                i += LANE;
            }
        }
        for (d, s) in dst[i..].iter_mut().zip(&src[i..]) {
            *d += s * c;
        }
    }

    pub fn add(src: &[Float], dst: &mut [Float]) {
        let n = dst.len();
        let mut i = 0;
        // SAFETY: as in `muladd`.
        unsafe {
            while i + LANE <= n {
                let d = dst.as_mut_ptr().add(i);
                let r = _mm256_add_ps(_mm256_loadu_ps(src.as_ptr().add(i)), _mm256_loadu_ps(d));
                _mm256_storeu_ps(d, r);
                i += LANE;
            }
        }
        for (d, s) in dst[i..].iter_mut().zip(&src[i..]) {
            *d += s;
        }
    }

    pub fn add_scalar(c: Float, dst: &mut [Float]) {
        let n = dst.len();
        let mut i = 0;
        // SAFETY: stores stay below `n`.
        unsafe {
            let cv = _mm256_set1_ps(c);
            while i + LANE <= n {
                let d = dst.as_mut_ptr().add(i);
                _mm256_storeu_ps(d, _mm256_add_ps(_mm256_loadu_ps(d), cv));
                i += LANE;
            }
        }
        for d in &mut dst[i..] {
            *d += c;
        }
    }
}

#[cfg(not(all(
    feature = "simd",
    target_arch = "x86_64",
    target_feature = "avx2",
    target_feature = "fma"
)))]
mod lanes {
    use super::{BLOCK, LANE};
    use crate::tensors::Float;

    pub fn dot(a: &[Float], b: &[Float]) -> Float {
        let mut acc = [[0.0 as Float; LANE]; 4];

        let blocks_a = a.chunks_exact(BLOCK);
        let blocks_b = b.chunks_exact(BLOCK);
        let (rest_a, rest_b) = (blocks_a.remainder(), blocks_b.remainder());
        for (ba, bb) in blocks_a.zip(blocks_b) {
            for (u, lane) in acc.iter_mut().enumerate() {
                let off = u * LANE;
                for l in 0..LANE {
                    lane[l] += ba[off + l] * bb[off + l];
                }
            }
        }

        let lanes_a = rest_a.chunks_exact(LANE);
        let lanes_b = rest_b.chunks_exact(LANE);
        let (tail_a, tail_b) = (lanes_a.remainder(), lanes_b.remainder());
        for (la, lb) in lanes_a.zip(lanes_b) {
            for l in 0..LANE {
                acc[0][l] += la[l] * lb[l];
            }
        }

        let mut sum: Float = 0.0;
        for l in 0..LANE {
            sum += (acc[0][l] + acc[1][l]) + (acc[2][l] + acc[3][l]);
        }
        for (x, y) in tail_a.iter().zip(tail_b) {
            sum += x * y;
        }
        sum
    }

    pub fn muladd(src: &[Float], c: Float, dst: &mut [Float]) {
        let mut d = dst.chunks_exact_mut(LANE);
        let mut s = src.chunks_exact(LANE);
        for (dl, sl) in (&mut d).zip(&mut s) {
            for l in 0..LANE {
                dl[l] += sl[l] * c;
            }
        }
        for (x, y) in d.into_remainder().iter_mut().zip(s.remainder()) {
            *x += y * c;
        }
    }

    pub fn add(src: &[Float], dst: &mut [Float]) {
        let mut d = dst.chunks_exact_mut(LANE);
        let mut s = src.chunks_exact(LANE);
        for (dl, sl) in (&mut d).zip(&mut s) {
            for l in 0..LANE {
                dl[l] += sl[l];
            }
        }
        for (x, y) in d.into_remainder().iter_mut().zip(s.remainder()) {
            *x += y;
        }
    }

    pub fn add_scalar(c: Float, dst: &mut [Float]) {
        let mut d = dst.chunks_exact_mut(LANE);
        for dl in &mut d {
            for x in dl {
                *x += c;
            }
        }
        for x in d.into_remainder() {
            *x += c;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::cpu::ScalarKernels;
    use approx::assert_relative_eq;

    const LENGTHS: &[usize] = &[0, 1, 3, 4, 7, 8, 9, 15, 16, 17, 31, 32, 33, 63, 64, 65, 100];

    fn ramp(n: usize, seed: f32) -> Vec<Float> {
        (0..n).map(|i| ((i as f32 * 0.37 + seed).sin()) * 2.0).collect()
    }

    #[test]
    fn dot_matches_scalar_for_every_tail() {
        for &n in LENGTHS {
            let a = ramp(n, 0.1);
            let b = ramp(n, 1.3);
            let wide = AvxKernels.dot(&a, &b);
            let narrow = ScalarKernels.dot(&a, &b);
            assert_relative_eq!(wide, narrow, epsilon = 1e-4, max_relative = 1e-5);
        }
    }

    #[test]
    fn muladd_and_add_match_scalar() {
        for &n in LENGTHS {
            let src = ramp(n, 0.7);
            let mut wide = ramp(n, 2.0);
            let mut narrow = wide.clone();
            AvxKernels.muladd(&src, 0.25, &mut wide);
            ScalarKernels.muladd(&src, 0.25, &mut narrow);
            AvxKernels.add(&src, &mut wide);
            ScalarKernels.add(&src, &mut narrow);
            AvxKernels.add_scalar(-1.5, &mut wide);
            ScalarKernels.add_scalar(-1.5, &mut narrow);
            for (w, s) in wide.iter().zip(&narrow) {
                assert_relative_eq!(w, s, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn reduce_merges_rows() {
        let rows = [vec![1.0; 19], vec![2.0; 19], vec![3.0; 19]];
        let mut acc = rows[0].clone();
        for r in &rows[1..] {
            AvxKernels.reduce(r, &mut acc);
        }
        assert!(acc.iter().all(|&x| x == 6.0));
    }
}
