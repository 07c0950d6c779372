//! Activation functions.
//!
//! Derivatives are expressed in terms of the activation's *output* `y`, which
//! is what layers keep around after the forward pass.

use crate::tensors::Float;

/// Nonlinearity applied after a layer's linear map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Activation {
    #[default]
    Identity,
    Sigmoid,
    Relu,
    /// Slope 0.01 below zero.
    LeakyRelu,
    Elu,
    Tanh,
    /// Couples all outputs; backward uses the full Jacobian.
    Softmax,
}

impl Activation {
    /// Applies the activation in place, turning pre-activations into outputs.
    pub fn apply(self, v: &mut [Float]) {
        match self {
            Self::Identity => {}
            Self::Sigmoid => v.iter_mut().for_each(|x| *x = 1.0 / (1.0 + (-*x).exp())),
            Self::Relu => v.iter_mut().for_each(|x| *x = x.max(0.0)),
            Self::LeakyRelu => v
                .iter_mut()
                .for_each(|x| *x = if *x > 0.0 { *x } else { 0.01 * *x }),
            Self::Elu => v
                .iter_mut()
                .for_each(|x| *x = if *x < 0.0 { x.exp() - 1.0 } else { *x }),
            Self::Tanh => v.iter_mut().for_each(|x| *x = x.tanh()),
            Self::Softmax => {
                let alpha = v.iter().copied().fold(Float::NEG_INFINITY, Float::max);
                let mut denom = 0.0;
                for x in v.iter_mut() {
                    *x = (*x - alpha).exp();
                    denom += *x;
                }
                v.iter_mut().for_each(|x| *x /= denom);
            }
        }
    }

    /// `dy/da` as a function of `y` (diagonal term for softmax).
    pub fn df(self, y: Float) -> Float {
        match self {
            Self::Identity => 1.0,
            Self::Sigmoid | Self::Softmax => y * (1.0 - y),
            Self::Relu => {
                if y > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Self::LeakyRelu => {
                if y > 0.0 {
                    1.0
                } else {
                    0.01
                }
            }
            Self::Elu => {
                if y > 0.0 {
                    1.0
                } else {
                    1.0 + y
                }
            }
            Self::Tanh => 1.0 - y * y,
        }
    }

    /// Chain rule through the activation: `da = J(y)ᵀ · dy`.
    pub fn backward(self, dy: &[Float], y: &[Float], da: &mut [Float]) {
        match self {
            Self::Softmax => {
                // J[j][i] = y_i (δ_ij − y_j), symmetric
                let dot: Float = dy.iter().zip(y).map(|(g, yj)| g * yj).sum();
                for ((d, &g), &yi) in da.iter_mut().zip(dy).zip(y) {
                    *d = yi * (g - dot);
                }
            }
            _ => {
                for ((d, &g), &yi) in da.iter_mut().zip(dy).zip(y) {
                    *d = g * self.df(yi);
                }
            }
        }
    }

    /// Target range `(min, max)` used to encode class labels.
    pub fn scale(self) -> (Float, Float) {
        match self {
            Self::Softmax => (0.0, 1.0),
            Self::Tanh => (-0.8, 0.8),
            _ => (0.1, 0.9),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Sigmoid => "sigmoid",
            Self::Relu => "relu",
            Self::LeakyRelu => "leaky-relu",
            Self::Elu => "elu",
            Self::Tanh => "tanh",
            Self::Softmax => "softmax",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn softmax_sums_to_one() {
        let mut v = vec![1.0, 2.0, 3.0, 1000.0];
        Activation::Softmax.apply(&mut v);
        assert_abs_diff_eq!(v.iter().sum::<Float>(), 1.0, epsilon = 1e-6);
        assert!(v[3] > 0.99);
    }

    #[test]
    fn softmax_backward_matches_jacobian() {
        let mut y = vec![0.3, -0.1, 0.8];
        Activation::Softmax.apply(&mut y);
        let dy = [1.0, -2.0, 0.5];
        let mut da = [0.0; 3];
        Activation::Softmax.backward(&dy, &y, &mut da);
        for i in 0..3 {
            let mut expect = 0.0;
            for j in 0..3 {
                let jac = if i == j { y[i] * (1.0 - y[i]) } else { -y[i] * y[j] };
                expect += dy[j] * jac;
            }
            assert_abs_diff_eq!(da[i], expect, epsilon = 1e-6);
        }
    }

    #[test]
    fn elementwise_derivatives_use_outputs() {
        let mut y = vec![0.5];
        Activation::Tanh.apply(&mut y);
        assert_abs_diff_eq!(Activation::Tanh.df(y[0]), 1.0 - 0.5f32.tanh().powi(2), epsilon = 1e-6);
        assert_eq!(Activation::Relu.df(0.0), 0.0);
        assert_eq!(Activation::LeakyRelu.df(-0.2), 0.01);
        assert_abs_diff_eq!(Activation::Elu.df(-0.25), 0.75);
    }
}
