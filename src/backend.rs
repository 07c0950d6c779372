//! Backend selection module.
//!
//! This module defines the kernel backends a layer can be built with and a
//! process-wide default used by layer constructors that are not given one
//! explicitly.
//!
//! # Supported Backends
//!
//! - `Internal`: scalar reference kernels.
//! - `Avx`: unrolled wide kernels (AVX2 intrinsics with `--features simd`).
//! - `NnPack`, `OpenCl`: tags only; building a layer with them fails with
//!   [`NnError::NotImplemented`](crate::error::NnError::NotImplemented).
//!
//! The default is stored in an `AtomicU8`. It is read once per layer at
//! construction time, so changing it never affects layers that already exist.

use core::convert::TryFrom;
use core::fmt;
use core::sync::atomic::{AtomicU8, Ordering};

/// Enumeration of kernel backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Backend {
    /// Scalar reference kernels (default).
    #[default]
    Internal = 0,
    /// Unrolled wide kernels.
    Avx,
    /// Placeholder for an NNPACK binding.
    NnPack,
    /// Placeholder for an OpenCL device.
    OpenCl,
}

impl TryFrom<u8> for Backend {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Internal),
            1 => Ok(Self::Avx),
            2 => Ok(Self::NnPack),
            3 => Ok(Self::OpenCl),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Internal => "internal",
            Self::Avx => "avx",
            Self::NnPack => "nnpack",
            Self::OpenCl => "opencl",
        };
        f.write_str(name)
    }
}

/// Backend tag read by new layers.
static DEFAULT_BACKEND: AtomicU8 = AtomicU8::new(Backend::Internal as u8);

/// Sets the backend used by layers constructed after this call.
///
/// # Example
///
/// ```
/// use briny_cnn::backend::{default_backend, set_default_backend, Backend};
/// set_default_backend(Backend::Avx);
/// assert_eq!(default_backend(), Backend::Avx);
/// set_default_backend(Backend::Internal);
/// ```
pub fn set_default_backend(b: Backend) {
    DEFAULT_BACKEND.store(b as u8, Ordering::Relaxed);
}

/// Returns the backend new layers will use.
///
/// If the stored value is invalid, defaults to [`Backend::Internal`].
pub fn default_backend() -> Backend {
    Backend::try_from(DEFAULT_BACKEND.load(Ordering::Relaxed)).unwrap_or_default()
}
