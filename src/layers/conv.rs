//! 2-D convolution over the partial-connection engine.
//!
//! Every output position of channel `oc` reads a `window × window` patch of
//! every connected input channel `ic` through the same kernel, so one weight
//! slot `w = window² · (in_c · oc + ic) + wy · window + wx` is shared by all
//! output positions. Channel pairs excluded by a [`ConnectionTable`] get no
//! connections at all, which leaves their weight slots empty until
//! [`Layer::remap`](crate::layer::Layer::remap) compacts them away.

use crate::activation::Activation;
use crate::backend::Backend;
use crate::error::{NnError, Result};
use crate::layer::{Layer, LayerKind, LayerParts};
use crate::partial::PartialConnected;
use crate::tensors::{Float, Shape3d};

/// Border handling of a convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Padding {
    /// Only positions where the window fits entirely inside the input.
    #[default]
    Valid,
    /// Zero-pad so that stride 1 keeps the spatial size.
    Same,
}

/// Which `(input channel, output channel)` pairs a convolution connects.
///
/// An empty table connects every pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionTable {
    connected: Vec<bool>,
    rows: usize,
    cols: usize,
}

impl ConnectionTable {
    /// Table with `rows` input channels and `cols` output channels, where
    /// `bits[in_c * cols + out_c]` marks a connection.
    pub fn new(bits: &[bool], rows: usize, cols: usize) -> Result<Self> {
        if bits.len() != rows * cols {
            return Err(NnError::Config(format!(
                "connection table of {} entries for {rows}x{cols} channels",
                bits.len()
            )));
        }
        Ok(Self {
            connected: bits.to_vec(),
            rows,
            cols,
        })
    }

    /// Block-diagonal table: input group `g` feeds only output group `g`.
    ///
    /// # Errors
    /// [`NnError::InvalidGroupSize`] when either channel count is not a
    /// multiple of `groups`.
    pub fn grouped(groups: usize, rows: usize, cols: usize) -> Result<Self> {
        if groups == 0 || rows % groups != 0 || cols % groups != 0 {
            return Err(NnError::InvalidGroupSize { groups, rows, cols });
        }
        let (rows_per, cols_per) = (rows / groups, cols / groups);
        let mut connected = vec![false; rows * cols];
        for r in 0..rows {
            for c in 0..cols {
                connected[r * cols + c] = r / rows_per == c / cols_per;
            }
        }
        Ok(Self {
            connected,
            rows,
            cols,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0 && self.cols == 0
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn is_connected(&self, out_c: usize, in_c: usize) -> bool {
        self.is_empty() || self.connected[in_c * self.cols + out_c]
    }
}

/// Zero-padding between the user-visible input shape and the buffer the
/// engine actually reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Padder {
    pub(crate) input: Shape3d,
    pub(crate) padded: Shape3d,
    left: usize,
    top: usize,
}

impl Padder {
    fn new(input: Shape3d, window_w: usize, window_h: usize) -> Self {
        Self {
            input,
            padded: Shape3d::new(
                input.width + window_w - 1,
                input.height + window_h - 1,
                input.depth,
            ),
            left: window_w / 2,
            top: window_h / 2,
        }
    }

    /// Copies `src` into the centre of `dst`, zeroing the border.
    pub fn pad(&self, src: &[Float], dst: &mut [Float]) {
        dst.fill(0.0);
        let w = self.input.width;
        for c in 0..self.input.depth {
            for y in 0..self.input.height {
                let from = self.input.get_index(0, y, c);
                let to = self.padded.get_index(self.left, y + self.top, c);
                dst[to..to + w].copy_from_slice(&src[from..from + w]);
            }
        }
    }

    /// Adds the centre of the padded `src` into `dst`, dropping the border.
    pub fn crop_add(&self, src: &[Float], dst: &mut [Float]) {
        let w = self.input.width;
        for c in 0..self.input.depth {
            for y in 0..self.input.height {
                let to = self.input.get_index(0, y, c);
                let from = self.padded.get_index(self.left, y + self.top, c);
                for (d, s) in dst[to..to + w].iter_mut().zip(&src[from..from + w]) {
                    *d += s;
                }
            }
        }
    }
}

fn conv_out_length(padded: usize, window: usize, stride: usize) -> usize {
    (padded - window) / stride + 1
}

/// Builder for a square-kernel convolution.
#[derive(Debug, Clone)]
#[must_use]
pub struct Convolutional {
    in_width: usize,
    in_height: usize,
    window: usize,
    in_channels: usize,
    out_channels: usize,
    activation: Activation,
    padding: Padding,
    stride: (usize, usize),
    table: ConnectionTable,
    has_bias: bool,
    backend: Option<Backend>,
}

impl Convolutional {
    pub fn new(
        in_width: usize,
        in_height: usize,
        window: usize,
        in_channels: usize,
        out_channels: usize,
    ) -> Self {
        Self {
            in_width,
            in_height,
            window,
            in_channels,
            out_channels,
            activation: Activation::Identity,
            padding: Padding::Valid,
            stride: (1, 1),
            table: ConnectionTable::default(),
            has_bias: true,
            backend: None,
        }
    }

    pub fn activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    pub fn padding(mut self, padding: Padding) -> Self {
        self.padding = padding;
        self
    }

    /// Horizontal and vertical step between kernel applications.
    pub fn stride(mut self, w_stride: usize, h_stride: usize) -> Self {
        self.stride = (w_stride, h_stride);
        self
    }

    pub fn connection_table(mut self, table: ConnectionTable) -> Self {
        self.table = table;
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

    /// Builds the layer and its adjacency.
    ///
    /// # Errors
    /// [`NnError::Config`] for zero sizes or strides, a window larger than
    /// the (padded) input, or a connection table of the wrong dimensions.
    pub fn build(self) -> Result<Layer> {
        let Self {
            in_width,
            in_height,
            window,
            in_channels,
            out_channels,
            ..
        } = self;
        let (sw, sh) = self.stride;

        if [in_width, in_height, window, in_channels, out_channels, sw, sh].contains(&0) {
            return Err(NnError::Config(
                "convolution sizes, channels and strides must be non-zero".into(),
            ));
        }
        if !self.table.is_empty() && (self.table.rows() != in_channels || self.table.cols() != out_channels) {
            return Err(NnError::Config(format!(
                "connection table is {}x{}, layer has {in_channels}x{out_channels} channels",
                self.table.rows(),
                self.table.cols()
            )));
        }

        let in_shape = Shape3d::new(in_width, in_height, in_channels);
        let padder = match self.padding {
            Padding::Valid => None,
            Padding::Same => Some(Padder::new(in_shape, window, window)),
        };
        let engine_in = padder.map_or(in_shape, |p| p.padded);
        if window > engine_in.width || window > engine_in.height {
            return Err(NnError::Config(format!(
                "window {window} does not fit input {engine_in}"
            )));
        }

        let out_shape = Shape3d::new(
            conv_out_length(engine_in.width, window, sw),
            conv_out_length(engine_in.height, window, sh),
            out_channels,
        );
        let weight_shape = Shape3d::new(window, window, in_channels * out_channels);
        let bias_size = if self.has_bias { out_channels } else { 0 };

        let mut engine = PartialConnected::new(
            engine_in.size(),
            out_shape.size(),
            weight_shape.size(),
            bias_size,
        );

        for oc in 0..out_channels {
            for ic in (0..in_channels).filter(|&ic| self.table.is_connected(oc, ic)) {
                for oy in 0..out_shape.height {
                    for ox in 0..out_shape.width {
                        let out_idx = out_shape.get_index(ox, oy, oc);
                        for wy in 0..window {
                            for wx in 0..window {
                                engine.connect_weight(
                                    engine_in.get_index(ox * sw + wx, oy * sh + wy, ic),
                                    out_idx,
                                    weight_shape.get_index(wx, wy, in_channels * oc + ic),
                                )?;
                            }
                        }
                    }
                }
            }
            if self.has_bias {
                for o in 0..out_shape.area() {
                    engine.connect_bias(oc, oc * out_shape.area() + o)?;
                }
            }
        }

        Layer::from_parts(LayerParts {
            kind: LayerKind::Convolutional,
            engine,
            in_shape,
            weight_shape,
            bias_shape: self.has_bias.then(|| Shape3d::new(1, 1, out_channels)),
            out_shape,
            activation: self.activation,
            backend: super::default_backend(self.backend),
            padding: padder,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weight_init::WeightInit;

    #[test]
    fn valid_output_geometry() {
        let conv = Convolutional::new(5, 5, 3, 2, 4).build().unwrap();
        assert_eq!(conv.out_shape(), Shape3d::new(3, 3, 4));
        assert_eq!(conv.layer_type(), "conv");
        assert_eq!(conv.fan_in_size(), 9 * 2);
        assert_eq!(conv.param_size(), 9 * 8 + 4);
        conv.engine().check_consistency().unwrap();
    }

    #[test]
    fn strided_and_same_geometry() {
        let strided = Convolutional::new(7, 5, 3, 1, 1).stride(2, 2).build().unwrap();
        assert_eq!(strided.out_shape(), Shape3d::new(3, 2, 1));

        let same = Convolutional::new(6, 6, 3, 1, 2)
            .padding(Padding::Same)
            .build()
            .unwrap();
        assert_eq!(same.out_shape(), Shape3d::new(6, 6, 2));
        assert_eq!(same.in_data_size(), 36);
    }

    #[test]
    fn oversized_window_is_rejected() {
        assert!(matches!(
            Convolutional::new(2, 2, 3, 1, 1).build(),
            Err(NnError::Config(_))
        ));
        assert!(Convolutional::new(4, 4, 3, 1, 1).stride(0, 1).build().is_err());
    }

    #[test]
    fn table_disconnects_channel_pairs() {
        let table = ConnectionTable::new(&[true, false, false, true], 2, 2).unwrap();
        let mut conv = Convolutional::new(4, 4, 3, 2, 2)
            .connection_table(table)
            .build()
            .unwrap();
        assert_eq!(conv.param_size(), 2 * 9 + 2);
        assert_eq!(conv.remap().unwrap(), 2 * 9);
        assert_eq!(conv.weight().unwrap().len(), 2 * 9);
        conv.engine().check_consistency().unwrap();
    }

    #[test]
    fn grouped_table_requires_divisible_channels() {
        let t = ConnectionTable::grouped(2, 4, 6).unwrap();
        assert!(t.is_connected(0, 1));
        assert!(!t.is_connected(3, 1));
        assert!(t.is_connected(5, 3));
        assert!(matches!(
            ConnectionTable::grouped(3, 4, 6),
            Err(NnError::InvalidGroupSize { groups: 3, .. })
        ));
    }

    #[test]
    fn padder_round_trips_the_centre() {
        let p = Padder::new(Shape3d::new(2, 2, 1), 3, 3);
        let src = [1.0, 2.0, 3.0, 4.0];
        let mut padded = vec![9.0; p.padded.size()];
        p.pad(&src, &mut padded);
        assert_eq!(padded, vec![0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 2.0, 0.0, 0.0, 3.0, 4.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        let mut back = [0.0; 4];
        p.crop_add(&padded, &mut back);
        assert_eq!(back, src);
    }

    #[test]
    fn same_padding_box_filter_sums_neighbourhood() {
        let mut conv = Convolutional::new(3, 3, 3, 1, 1)
            .padding(Padding::Same)
            .has_bias(false)
            .build()
            .unwrap()
            .with_weight_init(WeightInit::Constant(1.0));
        conv.setup(true).unwrap();
        let out = conv.forward_batch(&[vec![1.0; 9]]).unwrap();
        assert_eq!(&out[0], &[4.0, 6.0, 4.0, 6.0, 9.0, 6.0, 4.0, 6.0, 4.0]);
    }
}
