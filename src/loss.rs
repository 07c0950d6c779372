//! Loss functions.
//!
//! Each loss is evaluated element-wise on an output vector `y` and a target
//! vector `t`; [`Loss::f`] sums the element terms.

use crate::activation::Activation;
use crate::tensors::Float;

/// Training objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Loss {
    /// `(y − t)² / 2`
    #[default]
    Mse,
    /// `|y − t|`
    Absolute,
    /// Binary cross entropy for independent outputs in `(0, 1)`.
    CrossEntropy,
    /// `−t · ln y` for a softmax output.
    CrossEntropyMulticlass,
}

impl Loss {
    fn term(self, y: Float, t: Float) -> Float {
        match self {
            Self::Mse => (y - t) * (y - t) / 2.0,
            Self::Absolute => (y - t).abs(),
            Self::CrossEntropy => -t * y.ln() - (1.0 - t) * (1.0 - y).ln(),
            Self::CrossEntropyMulticlass => -t * y.ln(),
        }
    }

    /// `∂E/∂y` of one element.
    pub fn df(self, y: Float, t: Float) -> Float {
        match self {
            Self::Mse => y - t,
            Self::Absolute => {
                if y > t {
                    1.0
                } else if y < t {
                    -1.0
                } else {
                    0.0
                }
            }
            Self::CrossEntropy => (y - t) / (y * (1.0 - y)),
            Self::CrossEntropyMulticlass => -t / y,
        }
    }

    /// Summed loss of one sample.
    pub fn f(self, y: &[Float], t: &[Float]) -> Float {
        y.iter().zip(t).map(|(&y, &t)| self.term(y, t)).sum()
    }

    /// Element-wise gradient of one sample.
    pub fn gradient(self, y: &[Float], t: &[Float]) -> Vec<Float> {
        y.iter().zip(t).map(|(&y, &t)| self.df(y, t)).collect()
    }

    /// Whether `∂E/∂a` simplifies to `y − t` for this output activation.
    pub fn is_canonical_link(self, h: Activation) -> bool {
        matches!(
            (h, self),
            (Activation::Sigmoid, Self::CrossEntropy)
                | (Activation::Tanh, Self::CrossEntropy)
                | (Activation::Identity, Self::Mse)
                | (Activation::Softmax, Self::CrossEntropyMulticlass)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn canonical_sigmoid_cross_entropy_delta_is_y_minus_t() {
        let (y, t) = (0.8, 0.3);
        let delta = Loss::CrossEntropy.df(y, t) * Activation::Sigmoid.df(y);
        assert_abs_diff_eq!(delta, y - t, epsilon = 1e-6);
        assert!(Loss::CrossEntropy.is_canonical_link(Activation::Sigmoid));
        assert!(!Loss::Mse.is_canonical_link(Activation::Sigmoid));
    }

    #[test]
    fn mse_value_and_gradient() {
        let y = [1.0, 2.0];
        let t = [0.0, 0.0];
        assert_eq!(Loss::Mse.f(&y, &t), 2.5);
        assert_eq!(Loss::Mse.gradient(&y, &t), vec![1.0, 2.0]);
    }
}
