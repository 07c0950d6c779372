//! Operation Dispatch Layer
//!
//! Turns a [`Backend`] tag into the kernel struct that serves it. The switch
//! happens once, when a layer is constructed; afterwards the layer holds a
//! [`Kernels`] value and every call is a two-arm `match` with no allocation
//! or virtual call.
//!
//! # Example
//! ```rust
//! use briny_cnn::backend::Backend;
//! use briny_cnn::ops::{VectorKernels, dispatch::Kernels};
//!
//! let k = Kernels::for_backend(Backend::Avx).unwrap();
//! assert_eq!(k.dot(&[1.0; 10], &[2.0; 10]), 20.0);
//! assert!(Kernels::for_backend(Backend::OpenCl).is_err());
//! ```

use super::VectorKernels;
use super::avx::AvxKernels;
use super::cpu::ScalarKernels;
use crate::backend::Backend;
use crate::error::{NnError, Result};
use crate::tensors::Float;

/// Kernel set selected for one layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kernels {
    Scalar(ScalarKernels),
    Avx(AvxKernels),
}

impl Kernels {
    /// Resolves a backend tag.
    ///
    /// # Errors
    /// Backends without a CPU kernel set (OpenCL, NNPACK) report
    /// [`NnError::NotImplemented`].
    pub fn for_backend(backend: Backend) -> Result<Self> {
        match backend {
            Backend::Internal => Ok(Self::Scalar(ScalarKernels)),
            Backend::Avx => Ok(Self::Avx(AvxKernels)),
            Backend::NnPack => Err(NnError::NotImplemented("nnpack backend")),
            Backend::OpenCl => Err(NnError::NotImplemented("opencl backend")),
        }
    }
}

impl Default for Kernels {
    fn default() -> Self {
        Self::Scalar(ScalarKernels)
    }
}

impl VectorKernels for Kernels {
    #[inline]
    fn dot(&self, a: &[Float], b: &[Float]) -> Float {
        match self {
            Self::Scalar(k) => k.dot(a, b),
            Self::Avx(k) => k.dot(a, b),
        }
    }

    #[inline]
    fn muladd(&self, src: &[Float], c: Float, dst: &mut [Float]) {
        match self {
            Self::Scalar(k) => k.muladd(src, c, dst),
            Self::Avx(k) => k.muladd(src, c, dst),
        }
    }

    #[inline]
    fn add(&self, src: &[Float], dst: &mut [Float]) {
        match self {
            Self::Scalar(k) => k.add(src, dst),
            Self::Avx(k) => k.add(src, dst),
        }
    }

    #[inline]
    fn add_scalar(&self, c: Float, dst: &mut [Float]) {
        match self {
            Self::Scalar(k) => k.add_scalar(c, dst),
            Self::Avx(k) => k.add_scalar(c, dst),
        }
    }

    #[inline]
    fn reduce(&self, src: &[Float], dst: &mut [Float]) {
        match self {
            Self::Scalar(k) => k.reduce(src, dst),
            Self::Avx(k) => k.reduce(src, dst),
        }
    }
}
