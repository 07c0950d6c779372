//! briny_cnn: a convolutional network engine built on one sparse,
//! weight-tied linear map.
//!
//! Every layer kind (fully connected, convolution, average pooling and
//! unpooling, global average pooling) is the same [`layer::Layer`] node
//! wrapping a [`partial::PartialConnected`] engine; the kinds differ only in the
//! adjacency their builder declares. Layers exchange batched data through
//! shared [`node::Edge`] buffers and are trained by [`network::Network`].
//!
//! # Features
//!
//! - Scalar and unrolled-wide [`ops`] kernels, selected per layer through
//!   [`backend::Backend`]; AVX2/FMA intrinsics with `--features simd`.
//! - First-order backpropagation with per-worker gradient rows and a
//!   second-order pass estimating the Hessian diagonal.
//! - Minibatch training with several [`optim`] update rules, gradient
//!   checking, and text or binary (`.bpat`) parameter persistence.
//!
//! # Modules
//!
//! - [`tensors`], [`node`]: batched buffers and the edges that share them
//! - [`partial`]: the sparse connection engine
//! - [`layer`], [`layers`]: the layer node and its builders
//! - [`network`]: graph arena and training driver
//! - [`activation`], [`loss`], [`optim`], [`weight_init`]: training pieces
//! - [`modelio`]: parameter files
//!
//! # Example
//!
//! ```rust
//! use briny_cnn::activation::Activation;
//! use briny_cnn::layers::{AveragePooling, Convolutional, FullyConnected};
//! use briny_cnn::network::Network;
//!
//! let mut net = Network::with_seed(42);
//! net.add(Convolutional::new(8, 8, 3, 1, 2).activation(Activation::Tanh).build().unwrap()).unwrap();
//! net.add(AveragePooling::new(6, 6, 2, 2).activation(Activation::Tanh).build().unwrap()).unwrap();
//! net.add(FullyConnected::new(18, 3).activation(Activation::Softmax).build().unwrap()).unwrap();
//!
//! let out = net.predict(&[0.5; 64]).unwrap();
//! assert!((out.iter().sum::<f32>() - 1.0).abs() < 1e-5);
//! ```

pub mod activation;
pub mod backend;
pub mod error;
pub mod gradient_check;
pub mod layer;
pub mod layers;
pub mod loss;
pub mod modelio;
pub mod network;
pub mod node;
pub mod ops;
pub mod optim;
pub mod parallel;
pub mod partial;
pub mod tensors;
pub mod weight_init;

pub use error::{NnError, Result};
