//! Batched tensor storage.
//!
//! # Core Tensor Utilities
//!
//! A [`Tensor`] here is a minibatch: an ordered list of samples, each sample a
//! flat feature vector of the same length. Layers read and write whole samples
//! at a time, so the sample is the unit of storage rather than a single flat
//! buffer with a leading batch dimension.
//!
//! ## Design Highlights
//! - [`Shape3d`] describes the `width × height × depth` layout of one sample
//! - [`VectorType`] tags what an edge carries (activations or parameters)
//! - Resizing a tensor keeps existing samples and allocates missing ones
//!
//! ## Example
//!
//! ```rust
//! use briny_cnn::tensors::{Shape3d, Tensor};
//! let shape = Shape3d::new(2, 2, 3);
//! let mut t = Tensor::zeros(4, shape.size());
//! t[1][shape.get_index(1, 0, 2)] = 5.0;
//! assert_eq!(t.n_samples(), 4);
//! assert_eq!(t[1][9], 5.0);
//! ```

use core::fmt;
use core::ops::{Index, IndexMut};

use crate::error::{NnError, Result};

/// Element type of every buffer in the crate.
pub type Float = f32;

/// Spatial layout of one sample: `width × height × depth`, channel-major.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Shape3d {
    pub width: usize,
    pub height: usize,
    pub depth: usize,
}

impl Shape3d {
    pub const fn new(width: usize, height: usize, depth: usize) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    /// Number of elements in one `width × height` plane.
    pub const fn area(&self) -> usize {
        self.width * self.height
    }

    /// Total number of elements.
    pub const fn size(&self) -> usize {
        self.width * self.height * self.depth
    }

    /// Flat offset of `(x, y, channel)`.
    ///
    /// Debug builds assert that the coordinate lies inside the shape.
    pub fn get_index(&self, x: usize, y: usize, channel: usize) -> usize {
        debug_assert!(x < self.width && y < self.height && channel < self.depth);
        (self.height * channel + y) * self.width + x
    }
}

impl fmt::Display for Shape3d {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.width, self.height, self.depth)
    }
}

/// What an edge carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VectorType {
    /// Activations flowing between layers.
    Data,
    /// Trainable weights.
    Weight,
    /// Trainable biases.
    Bias,
}

impl VectorType {
    /// Weights and biases are parameters; data is not.
    pub fn is_trainable(self) -> bool {
        matches!(self, Self::Weight | Self::Bias)
    }
}

/// Ordered sequence of equally sized samples.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Tensor {
    len: usize,
    samples: Vec<Vec<Float>>,
}

impl Tensor {
    /// `n_samples` zero-filled samples of `len` elements each.
    pub fn zeros(n_samples: usize, len: usize) -> Self {
        Self {
            len,
            samples: vec![vec![0.0; len]; n_samples],
        }
    }

    /// Wraps existing samples, rejecting ragged input.
    pub fn from_samples(samples: Vec<Vec<Float>>) -> Result<Self> {
        let len = samples.first().map_or(0, Vec::len);
        if let Some(bad) = samples.iter().position(|s| s.len() != len) {
            return Err(NnError::DataMismatch(format!(
                "sample {bad} has {} elements, expected {len}",
                samples[bad].len()
            )));
        }
        Ok(Self { len, samples })
    }

    /// Single-sample tensor.
    pub fn from_vec(sample: Vec<Float>) -> Self {
        Self {
            len: sample.len(),
            samples: vec![sample],
        }
    }

    /// Elements per sample.
    pub fn sample_len(&self) -> usize {
        self.len
    }

    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Grows or shrinks the sample count.
    ///
    /// Shrinking drops the trailing samples; growing appends freshly
    /// allocated zero-filled ones.
    pub fn resize(&mut self, n_samples: usize) {
        let len = self.len;
        self.samples.resize_with(n_samples, || vec![0.0; len]);
    }

    /// Sets every element of every sample to `value`.
    pub fn fill(&mut self, value: Float) {
        for s in &mut self.samples {
            s.fill(value);
        }
    }

    pub fn samples(&self) -> &[Vec<Float>] {
        &self.samples
    }

    pub fn samples_mut(&mut self) -> &mut [Vec<Float>] {
        &mut self.samples
    }

    pub fn iter(&self) -> impl Iterator<Item = &[Float]> {
        self.samples.iter().map(Vec::as_slice)
    }

    pub fn into_samples(self) -> Vec<Vec<Float>> {
        self.samples
    }
}

impl Index<usize> for Tensor {
    type Output = [Float];

    fn index(&self, index: usize) -> &[Float] {
        &self.samples[index]
    }
}

impl IndexMut<usize> for Tensor {
    fn index_mut(&mut self, index: usize) -> &mut [Float] {
        &mut self.samples[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_index_is_channel_major() {
        let s = Shape3d::new(3, 2, 2);
        assert_eq!(s.size(), 12);
        assert_eq!(s.area(), 6);
        assert_eq!(s.get_index(0, 0, 1), 6);
        assert_eq!(s.get_index(2, 1, 1), 11);
        assert_eq!(s.to_string(), "3x2x2");
    }

    #[test]
    fn resize_keeps_existing_samples() {
        let mut t = Tensor::from_vec(vec![1.0, 2.0]);
        t.resize(3);
        assert_eq!(t.n_samples(), 3);
        assert_eq!(&t[0], &[1.0, 2.0]);
        assert_eq!(&t[2], &[0.0, 0.0]);
        t[2].fill(7.0);
        t.resize(1);
        assert_eq!(t.n_samples(), 1);
        assert_eq!(&t[0], &[1.0, 2.0]);
        t.resize(3);
        assert_eq!(&t[2], &[0.0, 0.0]);
    }

    #[test]
    fn ragged_samples_are_rejected() {
        let err = Tensor::from_samples(vec![vec![1.0], vec![1.0, 2.0]]);
        assert!(matches!(err, Err(NnError::DataMismatch(_))));
    }
}
