//! Average pooling layers.
//!
//! Both builders tie every position of one channel to a single weight and a
//! single bias, with the engine's scale factor set to `1 / window area`, so a
//! unit weight and zero bias yield the plain mean.

use crate::activation::Activation;
use crate::backend::Backend;
use crate::error::{NnError, Result};
use crate::layer::{Layer, LayerKind, LayerParts};
use crate::partial::PartialConnected;
use crate::tensors::{Float, Shape3d};
use crate::weight_init::WeightInit;

/// Connects one pooling window per output position, channel by channel.
fn pooling_engine(
    in_shape: Shape3d,
    out_shape: Shape3d,
    pool: (usize, usize),
    stride: (usize, usize),
) -> Result<PartialConnected> {
    let depth = in_shape.depth;
    let mut engine = PartialConnected::new(in_shape.size(), out_shape.size(), depth, depth);
    for c in 0..depth {
        for oy in 0..out_shape.height {
            for ox in 0..out_shape.width {
                let out_idx = out_shape.get_index(ox, oy, c);
                for dy in 0..pool.1 {
                    for dx in 0..pool.0 {
                        engine.connect_weight(
                            in_shape.get_index(ox * stride.0 + dx, oy * stride.1 + dy, c),
                            out_idx,
                            c,
                        )?;
                    }
                }
                engine.connect_bias(c, out_idx)?;
            }
        }
    }
    engine.set_scale_factor(1.0 / (pool.0 * pool.1) as Float);
    Ok(engine)
}

/// Builder for a square-window average pooling layer.
///
/// Both spatial sizes must be multiples of the window. Without an explicit
/// stride the window tiles the input; with one the output size is floored,
/// so positions no window reaches are ignored.
#[derive(Debug, Clone, Copy)]
#[must_use]
pub struct AveragePooling {
    in_width: usize,
    in_height: usize,
    in_channels: usize,
    pool: usize,
    stride: Option<usize>,
    activation: Activation,
    backend: Option<Backend>,
}

impl AveragePooling {
    pub fn new(in_width: usize, in_height: usize, in_channels: usize, pool: usize) -> Self {
        Self {
            in_width,
            in_height,
            in_channels,
            pool,
            stride: None,
            activation: Activation::Identity,
            backend: None,
        }
    }

    pub fn stride(mut self, stride: usize) -> Self {
        self.stride = Some(stride);
        self
    }

    pub fn activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    pub fn backend(mut self, backend: Backend) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Builds the layer.
    ///
    /// # Errors
    /// [`NnError::PoolingSizeMismatch`] when the window does not divide the
    /// input size, [`NnError::Config`] for zero sizes.
    pub fn build(self) -> Result<Layer> {
        let (w, h, pool) = (self.in_width, self.in_height, self.pool);
        let stride = self.stride.unwrap_or(pool);
        if [w, h, self.in_channels, pool, stride].contains(&0) {
            return Err(NnError::Config(
                "pooling sizes, channels and stride must be non-zero".into(),
            ));
        }
        if w % pool != 0 || h % pool != 0 {
            return Err(NnError::PoolingSizeMismatch {
                width: w,
                height: h,
                pool,
            });
        }

        let in_shape = Shape3d::new(w, h, self.in_channels);
        let out_shape = Shape3d::new(
            (w - pool) / stride + 1,
            (h - pool) / stride + 1,
            self.in_channels,
        );
        let engine = pooling_engine(in_shape, out_shape, (pool, pool), (stride, stride))?;

        Layer::from_parts(LayerParts {
            kind: LayerKind::AveragePooling,
            engine,
            in_shape,
            weight_shape: Shape3d::new(1, 1, self.in_channels),
            bias_shape: Some(Shape3d::new(1, 1, self.in_channels)),
            out_shape,
            activation: self.activation,
            backend: super::default_backend(self.backend),
            padding: None,
        })
    }
}

/// Builder for global average pooling: one output per channel, the mean of
/// its whole plane. Parameters are fixed and never trained.
#[derive(Debug, Clone, Copy)]
#[must_use]
pub struct GlobalAveragePooling {
    in_width: usize,
    in_height: usize,
    in_channels: usize,
    backend: Option<Backend>,
}

impl GlobalAveragePooling {
    pub fn new(in_width: usize, in_height: usize, in_channels: usize) -> Self {
        Self {
            in_width,
            in_height,
            in_channels,
            backend: None,
        }
    }

    pub fn backend(mut self, backend: Backend) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn build(self) -> Result<Layer> {
        let (w, h, c) = (self.in_width, self.in_height, self.in_channels);
        if [w, h, c].contains(&0) {
            return Err(NnError::Config("global pooling over an empty input".into()));
        }
        let in_shape = Shape3d::new(w, h, c);
        let out_shape = Shape3d::new(1, 1, c);
        let engine = pooling_engine(in_shape, out_shape, (w, h), (w, h))?;

        let mut layer = Layer::from_parts(LayerParts {
            kind: LayerKind::GlobalAveragePooling,
            engine,
            in_shape,
            weight_shape: Shape3d::new(1, 1, c),
            bias_shape: Some(Shape3d::new(1, 1, c)),
            out_shape,
            activation: Activation::Identity,
            backend: super::default_backend(self.backend),
            padding: None,
        })?
        .with_weight_init(WeightInit::Constant(1.0))
        .with_bias_init(WeightInit::Constant(0.0));
        layer.set_trainable(false);
        Ok(layer)
    }
}

/// Builder for average unpooling: every input value is spread over a
/// `pool × pool` window of the output, scaled by its channel's weight.
///
/// Windows start every `stride` positions (default `pool`), so the output is
/// `(in - 1) * stride + pool` wide and high. Where windows overlap the
/// contributions add up.
#[derive(Debug, Clone, Copy)]
#[must_use]
pub struct AverageUnpooling {
    in_width: usize,
    in_height: usize,
    in_channels: usize,
    pool: usize,
    stride: Option<usize>,
    activation: Activation,
    backend: Option<Backend>,
}

impl AverageUnpooling {
    pub fn new(in_width: usize, in_height: usize, in_channels: usize, pool: usize) -> Self {
        Self {
            in_width,
            in_height,
            in_channels,
            pool,
            stride: None,
            activation: Activation::Identity,
            backend: None,
        }
    }

    pub fn stride(mut self, stride: usize) -> Self {
        self.stride = Some(stride);
        self
    }

    pub fn activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    pub fn backend(mut self, backend: Backend) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Builds the layer.
    ///
    /// # Errors
    /// [`NnError::Config`] for zero sizes.
    pub fn build(self) -> Result<Layer> {
        let (w, h, c, pool) = (self.in_width, self.in_height, self.in_channels, self.pool);
        let stride = self.stride.unwrap_or(pool);
        if [w, h, c, pool, stride].contains(&0) {
            return Err(NnError::Config(
                "unpooling sizes, channels and stride must be non-zero".into(),
            ));
        }

        let in_shape = Shape3d::new(w, h, c);
        let out_shape = Shape3d::new((w - 1) * stride + pool, (h - 1) * stride + pool, c);
        let mut engine = PartialConnected::new(in_shape.size(), out_shape.size(), c, c);
        for ch in 0..c {
            for y in 0..h {
                for x in 0..w {
                    let in_idx = in_shape.get_index(x, y, ch);
                    for dy in 0..pool {
                        for dx in 0..pool {
                            engine.connect_weight(
                                in_idx,
                                out_shape.get_index(x * stride + dx, y * stride + dy, ch),
                                ch,
                            )?;
                        }
                    }
                }
            }
            for oy in 0..out_shape.height {
                for ox in 0..out_shape.width {
                    engine.connect_bias(ch, out_shape.get_index(ox, oy, ch))?;
                }
            }
        }

        Layer::from_parts(LayerParts {
            kind: LayerKind::AverageUnpooling,
            engine,
            in_shape,
            weight_shape: Shape3d::new(1, 1, c),
            bias_shape: Some(Shape3d::new(1, 1, c)),
            out_shape,
            activation: self.activation,
            backend: super::default_backend(self.backend),
            padding: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiling_pool_geometry() {
        let pool = AveragePooling::new(4, 6, 3, 2).build().unwrap();
        assert_eq!(pool.out_shape(), Shape3d::new(2, 3, 3));
        assert_eq!(pool.layer_type(), "ave-pool");
        assert_eq!(pool.param_size(), 6);
        assert_eq!(pool.engine().scale_factor(), 0.25);
        pool.engine().check_consistency().unwrap();
    }

    #[test]
    fn non_multiple_size_is_rejected() {
        assert!(matches!(
            AveragePooling::new(5, 4, 1, 2).build(),
            Err(NnError::PoolingSizeMismatch {
                width: 5,
                height: 4,
                pool: 2
            })
        ));
    }

    #[test]
    fn overlapping_stride_geometry() {
        let pool = AveragePooling::new(4, 4, 1, 2).stride(1).build().unwrap();
        assert_eq!(pool.out_shape(), Shape3d::new(3, 3, 1));
        assert_eq!(pool.fan_out_size(), 4);
        assert!(AveragePooling::new(5, 5, 1, 2).stride(2).build().is_err());
        assert!(AveragePooling::new(5, 5, 1, 2).stride(1).build().is_err());
    }

    #[test]
    fn wide_stride_floors_output() {
        let pool = AveragePooling::new(6, 4, 1, 2).stride(3).build().unwrap();
        assert_eq!(pool.out_shape(), Shape3d::new(2, 1, 1));
        pool.engine().check_consistency().unwrap();
        // the last column and the bottom rows are never read
        assert!(pool.engine().in2wo()[5].is_empty());
        assert!(pool.engine().in2wo()[Shape3d::new(6, 4, 1).get_index(0, 3, 0)].is_empty());
    }

    #[test]
    fn unpooling_geometry() {
        let up = AverageUnpooling::new(2, 3, 2, 2).build().unwrap();
        assert_eq!(up.out_shape(), Shape3d::new(4, 6, 2));
        assert_eq!(up.layer_type(), "ave-unpool");
        assert_eq!(up.param_size(), 4);
        assert_eq!(up.fan_in_size(), 1);
        assert_eq!(up.engine().scale_factor(), 1.0);
        up.engine().check_consistency().unwrap();

        let overlap = AverageUnpooling::new(3, 3, 1, 3).stride(2).build().unwrap();
        assert_eq!(overlap.out_shape(), Shape3d::new(7, 7, 1));
        // output (2, 2) sits under the windows of inputs (0,0), (1,0), (0,1), (1,1)
        assert_eq!(overlap.engine().out2wi()[Shape3d::new(7, 7, 1).get_index(2, 2, 0)].len(), 4);
        assert!(AverageUnpooling::new(2, 2, 1, 0).build().is_err());
    }

    #[test]
    fn unpooling_spreads_each_value() {
        let mut up = AverageUnpooling::new(2, 1, 1, 2)
            .build()
            .unwrap()
            .with_weight_init(WeightInit::Constant(2.0))
            .with_bias_init(WeightInit::Constant(0.5));
        up.setup(true).unwrap();
        let out = up.forward_batch(&[vec![1.0, -1.0]]).unwrap();
        assert_eq!(&out[0], &[2.5, 2.5, -1.5, -1.5, 2.5, 2.5, -1.5, -1.5]);
    }

    #[test]
    fn global_pool_is_frozen_mean() {
        let mut gap = GlobalAveragePooling::new(2, 2, 2).build().unwrap();
        assert!(!gap.is_trainable());
        assert_eq!(gap.layer_type(), "global-ave-pool");
        gap.setup(true).unwrap();
        let out = gap
            .forward_batch(&[vec![1.0, 2.0, 3.0, 4.0, -1.0, -1.0, -1.0, -5.0]])
            .unwrap();
        assert_eq!(&out[0], &[2.5, -2.0]);
    }
}
