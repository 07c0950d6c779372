//! Fully connected layer.

use crate::activation::Activation;
use crate::backend::Backend;
use crate::error::{NnError, Result};
use crate::layer::{Layer, LayerKind, LayerParts};
use crate::partial::PartialConnected;
use crate::tensors::Shape3d;

/// Builder for a dense `in_size → out_size` layer.
///
/// Weight `i * out_size + o` joins input `i` to output `o`; bias `o` feeds
/// output `o`.
#[derive(Debug, Clone, Copy)]
#[must_use]
pub struct FullyConnected {
    in_size: usize,
    out_size: usize,
    activation: Activation,
    has_bias: bool,
    backend: Option<Backend>,
}

impl FullyConnected {
    pub fn new(in_size: usize, out_size: usize) -> Self {
        Self {
            in_size,
            out_size,
            activation: Activation::Identity,
            has_bias: true,
            backend: None,
        }
    }

    pub fn activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    pub fn has_bias(mut self, has_bias: bool) -> Self {
        self.has_bias = has_bias;
        self
    }

    pub fn backend(mut self, backend: Backend) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Builds the layer.
    ///
    /// # Errors
    /// [`NnError::Config`] for a zero-sized side, or
    /// [`NnError::NotImplemented`] for a backend without kernels.
    pub fn build(self) -> Result<Layer> {
        if self.in_size == 0 || self.out_size == 0 {
            return Err(NnError::Config(format!(
                "fully-connected layer needs non-zero sizes, got {} -> {}",
                self.in_size, self.out_size
            )));
        }

        Layer::from_parts(LayerParts {
            kind: LayerKind::FullyConnected,
            engine: PartialConnected::dense(self.in_size, self.out_size, self.has_bias),
            in_shape: Shape3d::new(self.in_size, 1, 1),
            weight_shape: Shape3d::new(self.in_size, self.out_size, 1),
            bias_shape: self.has_bias.then(|| Shape3d::new(self.out_size, 1, 1)),
            out_shape: Shape3d::new(self.out_size, 1, 1),
            activation: self.activation,
            backend: super::default_backend(self.backend),
            padding: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partial::Connectivity;
    use crate::weight_init::WeightInit;

    #[test]
    fn dense_layout_and_sizes() {
        let fc = FullyConnected::new(3, 2).build().unwrap();
        assert_eq!(fc.layer_type(), "fully-connected");
        assert_eq!(fc.param_size(), 8);
        assert_eq!(fc.fan_in_size(), 3);
        assert_eq!(fc.fan_out_size(), 2);
        assert_eq!(fc.engine().connectivity(), Connectivity::Dense);
        assert_eq!(fc.in_shape().len(), 3);
    }

    #[test]
    fn constant_weights_sum_inputs() {
        let mut fc = FullyConnected::new(4, 2)
            .build()
            .unwrap()
            .with_weight_init(WeightInit::Constant(0.5))
            .with_bias_init(WeightInit::Constant(0.5));
        fc.setup(true).unwrap();
        let out = fc.forward_batch(&[vec![0.0, 1.0, 2.0, 9.0]]).unwrap();
        assert_eq!(&out[0], &[6.5, 6.5]);
    }

    #[test]
    fn no_bias_port_without_bias() {
        let mut fc = FullyConnected::new(4, 2)
            .has_bias(false)
            .build()
            .unwrap()
            .with_weight_init(WeightInit::Constant(0.5));
        fc.setup(true).unwrap();
        assert!(fc.bias().is_none());
        let out = fc.forward_batch(&[vec![0.0, 1.0, 2.0, 9.0]]).unwrap();
        assert_eq!(&out[0], &[6.0, 6.0]);
    }

    #[test]
    fn zero_size_is_rejected() {
        assert!(matches!(
            FullyConnected::new(0, 3).build(),
            Err(NnError::Config(_))
        ));
    }
}
