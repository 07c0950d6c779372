//! Weight initialization policies.

use rand::Rng;

use crate::tensors::Float;

/// How a parameter vector is filled on (re)initialization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WeightInit {
    /// Uniform in `±sqrt(scale / (fan_in + fan_out))`; the usual scale is 6.
    Xavier(Float),
    /// Uniform in `±scale / sqrt(fan_in)`.
    Lecun(Float),
    /// Every element set to the value.
    Constant(Float),
}

impl Default for WeightInit {
    fn default() -> Self {
        Self::Xavier(6.0)
    }
}

impl WeightInit {
    pub fn xavier() -> Self {
        Self::Xavier(6.0)
    }

    pub fn lecun() -> Self {
        Self::Lecun(1.0)
    }

    /// Fills `w` for a layer with the given fan-in and fan-out.
    pub fn fill<R: Rng>(&self, w: &mut [Float], fan_in: usize, fan_out: usize, rng: &mut R) {
        let range = match *self {
            Self::Constant(v) => {
                w.fill(v);
                return;
            }
            Self::Xavier(scale) => (scale / (fan_in + fan_out).max(1) as Float).sqrt(),
            Self::Lecun(scale) => scale / (fan_in.max(1) as Float).sqrt(),
        };
        if range > 0.0 && range.is_finite() {
            for x in w {
                *x = rng.random_range(-range..range);
            }
        } else {
            w.fill(0.0);
        }
    }
}
