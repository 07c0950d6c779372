//! # Layer Builders
//!
//! Each builder validates its geometry, lays out the weight and bias index
//! spaces and loads the matching adjacency into a
//! [`PartialConnected`](crate::partial::PartialConnected) engine. The result is
//! always a plain [`Layer`](crate::layer::Layer).
//!
//! ## Builders
//!
//! - [`FullyConnected`]: dense `in → out` map
//! - [`Convolutional`]: 2-D convolution with stride, padding and an optional
//!   channel [`ConnectionTable`]
//! - [`AveragePooling`]: per-channel trainable average over a window
//! - [`GlobalAveragePooling`]: fixed mean over each whole channel
//! - [`AverageUnpooling`]: spreads each value over a window, the inverse
//!   geometry of pooling
//!
//! ## Example
//! ```rust
//! use briny_cnn::activation::Activation;
//! use briny_cnn::layers::{Convolutional, FullyConnected};
//!
//! let conv = Convolutional::new(8, 8, 3, 1, 4)
//!     .activation(Activation::Tanh)
//!     .build()
//!     .unwrap();
//! assert_eq!(conv.out_data_size(), 6 * 6 * 4);
//!
//! let fc = FullyConnected::new(conv.out_data_size(), 10).build().unwrap();
//! assert_eq!(fc.param_size(), 144 * 10 + 10);
//! ```

pub mod conv;
pub mod fully_connected;
pub mod pooling;

pub use conv::{ConnectionTable, Convolutional, Padding};
pub use fully_connected::FullyConnected;
pub use pooling::{AveragePooling, AverageUnpooling, GlobalAveragePooling};

use crate::backend::{self, Backend};

/// Backend a builder uses when none is given explicitly.
pub(crate) fn default_backend(explicit: Option<Backend>) -> Backend {
    explicit.unwrap_or_else(backend::default_backend)
}
