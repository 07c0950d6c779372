//! Parameter update rules.
//!
//! An optimizer receives the mean gradient `dW` of one parameter vector, the
//! Hessian diagonal accumulated for it (empty unless a second-order pass ran)
//! and the parameters `W`, and updates `W` in place.
//!
//! Stateful optimizers keep their accumulators in a map keyed by the address
//! of the gradient buffer they were first called with. Gradient buffers live
//! as long as their layer, so the key is stable for a whole training run;
//! [`Optimizer::reset`] drops all state.

use std::collections::HashMap;

use crate::error::{NnError, Result};
use crate::tensors::Float;

/// Update rule applied once per minibatch to every trainable vector.
pub trait Optimizer {
    fn update(&mut self, dw: &[Float], hessian: &[Float], w: &mut [Float]) -> Result<()>;

    /// Forgets all per-parameter state.
    fn reset(&mut self) {}

    /// Whether the network must run the Hessian pass before each epoch.
    fn requires_hessian(&self) -> bool {
        false
    }
}

/// Per-parameter accumulators, `N` vectors per key.
#[derive(Debug, Default, Clone)]
struct State<const N: usize> {
    slots: HashMap<usize, [Vec<Float>; N]>,
}

impl<const N: usize> State<N> {
    fn get(&mut self, dw: &[Float]) -> &mut [Vec<Float>; N] {
        let len = dw.len();
        let slots = self
            .slots
            .entry(dw.as_ptr() as usize)
            .or_insert_with(|| core::array::from_fn(|_| vec![0.0; len]));
        for s in slots.iter_mut() {
            if s.len() != len {
                *s = vec![0.0; len];
            }
        }
        slots
    }

    fn clear(&mut self) {
        self.slots.clear();
    }
}

fn check_len(dw: &[Float], w: &[Float]) -> Result<()> {
    if dw.len() != w.len() {
        return Err(NnError::DataMismatch(format!(
            "gradient has {} elements, parameters {}",
            dw.len(),
            w.len()
        )));
    }
    Ok(())
}

/// Adaptive gradient: `g += dW²`, `W -= α dW / (√g + ε)`.
#[derive(Debug, Clone)]
pub struct Adagrad {
    pub alpha: Float,
    eps: Float,
    state: State<1>,
}

impl Adagrad {
    pub fn with_alpha(alpha: Float) -> Self {
        Self {
            alpha,
            ..Self::default()
        }
    }
}

impl Default for Adagrad {
    fn default() -> Self {
        Self {
            alpha: 0.01,
            eps: 1e-8,
            state: State::default(),
        }
    }
}

impl Optimizer for Adagrad {
    fn update(&mut self, dw: &[Float], _hessian: &[Float], w: &mut [Float]) -> Result<()> {
        check_len(dw, w)?;
        let [g] = self.state.get(dw);
        for ((wi, &d), gi) in w.iter_mut().zip(dw).zip(g.iter_mut()) {
            *gi += d * d;
            *wi -= self.alpha * d / (gi.sqrt() + self.eps);
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.state.clear();
    }
}

/// RMSprop: `g = μg + (1 − μ)dW²`, `W -= α dW / √(g + ε)`.
#[derive(Debug, Clone)]
pub struct RmsProp {
    pub alpha: Float,
    pub mu: Float,
    eps: Float,
    state: State<1>,
}

impl Default for RmsProp {
    fn default() -> Self {
        Self {
            alpha: 0.0001,
            mu: 0.99,
            eps: 1e-8,
            state: State::default(),
        }
    }
}

impl Optimizer for RmsProp {
    fn update(&mut self, dw: &[Float], _hessian: &[Float], w: &mut [Float]) -> Result<()> {
        check_len(dw, w)?;
        let [g] = self.state.get(dw);
        for ((wi, &d), gi) in w.iter_mut().zip(dw).zip(g.iter_mut()) {
            *gi = self.mu * *gi + (1.0 - self.mu) * d * d;
            *wi -= self.alpha * d / (*gi + self.eps).sqrt();
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.state.clear();
    }
}

/// Adam with bias-corrected moments.
#[derive(Debug, Clone)]
pub struct Adam {
    pub alpha: Float,
    pub b1: Float,
    pub b2: Float,
    eps: Float,
    state: State<2>,
    steps: HashMap<usize, i32>,
}

impl Default for Adam {
    fn default() -> Self {
        Self {
            alpha: 0.001,
            b1: 0.9,
            b2: 0.999,
            eps: 1e-8,
            state: State::default(),
            steps: HashMap::new(),
        }
    }
}

impl Optimizer for Adam {
    fn update(&mut self, dw: &[Float], _hessian: &[Float], w: &mut [Float]) -> Result<()> {
        check_len(dw, w)?;
        let t = self.steps.entry(dw.as_ptr() as usize).or_insert(0);
        *t += 1;
        let b1_t = self.b1.powi(*t);
        let b2_t = self.b2.powi(*t);
        let (alpha, b1, b2, eps) = (self.alpha, self.b1, self.b2, self.eps);

        let [mt, vt] = self.state.get(dw);
        for (((wi, &d), m), v) in w.iter_mut().zip(dw).zip(mt.iter_mut()).zip(vt.iter_mut()) {
            *m = b1 * *m + (1.0 - b1) * d;
            *v = b2 * *v + (1.0 - b2) * d * d;
            *wi -= alpha * (*m / (1.0 - b1_t)) / ((*v / (1.0 - b2_t)) + eps).sqrt();
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.state.clear();
        self.steps.clear();
    }
}

/// Plain SGD with optional weight decay: `W -= α (dW + λW)`.
#[derive(Debug, Clone, Copy)]
pub struct GradientDescent {
    pub alpha: Float,
    pub lambda: Float,
}

impl GradientDescent {
    pub fn with_alpha(alpha: Float) -> Self {
        Self { alpha, lambda: 0.0 }
    }
}

impl Default for GradientDescent {
    fn default() -> Self {
        Self::with_alpha(0.01)
    }
}

impl Optimizer for GradientDescent {
    fn update(&mut self, dw: &[Float], _hessian: &[Float], w: &mut [Float]) -> Result<()> {
        check_len(dw, w)?;
        for (wi, &d) in w.iter_mut().zip(dw) {
            *wi -= self.alpha * (d + self.lambda * *wi);
        }
        Ok(())
    }
}

/// SGD with momentum: `V = μV − α(dW + λW)`, `W += V`.
#[derive(Debug, Clone)]
pub struct Momentum {
    pub alpha: Float,
    pub lambda: Float,
    pub mu: Float,
    state: State<1>,
}

impl Default for Momentum {
    fn default() -> Self {
        Self {
            alpha: 0.01,
            lambda: 0.0,
            mu: 0.9,
            state: State::default(),
        }
    }
}

impl Optimizer for Momentum {
    fn update(&mut self, dw: &[Float], _hessian: &[Float], w: &mut [Float]) -> Result<()> {
        check_len(dw, w)?;
        let (alpha, lambda, mu) = (self.alpha, self.lambda, self.mu);
        let [prev] = self.state.get(dw);
        for ((wi, &d), p) in w.iter_mut().zip(dw).zip(prev.iter_mut()) {
            let v = mu * *p - alpha * (d + *wi * lambda);
            *wi += v;
            *p = v;
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.state.clear();
    }
}

/// Levenberg–Marquardt style descent scaled by the Hessian diagonal:
/// `W -= α dW / √(H + μ)`.
///
/// Requires the network to run the second-order pass before every epoch.
#[derive(Debug, Clone, Copy)]
pub struct HessianDescent {
    pub alpha: Float,
    /// Damping added to the Hessian.
    pub mu: Float,
}

impl Default for HessianDescent {
    fn default() -> Self {
        Self {
            alpha: 0.00085,
            mu: 0.02,
        }
    }
}

impl Optimizer for HessianDescent {
    fn update(&mut self, dw: &[Float], hessian: &[Float], w: &mut [Float]) -> Result<()> {
        check_len(dw, w)?;
        if hessian.len() != w.len() {
            return Err(NnError::MissingHessian);
        }
        for ((wi, &d), &h) in w.iter_mut().zip(dw).zip(hessian) {
            *wi -= self.alpha * d / (h + self.mu).sqrt();
        }
        Ok(())
    }

    fn requires_hessian(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn adagrad_first_step_is_alpha_sized() {
        let mut opt = Adagrad::with_alpha(0.1);
        let dw = vec![2.0, -0.5];
        let mut w = vec![1.0, 1.0];
        opt.update(&dw, &[], &mut w).unwrap();
        assert_abs_diff_eq!(w[0], 0.9, epsilon = 1e-6);
        assert_abs_diff_eq!(w[1], 1.1, epsilon = 1e-6);
    }

    #[test]
    fn momentum_accumulates_velocity() {
        let mut opt = Momentum::default();
        let dw = vec![1.0];
        let mut w = vec![0.0];
        opt.update(&dw, &[], &mut w).unwrap();
        opt.update(&dw, &[], &mut w).unwrap();
        // v1 = -0.01, v2 = 0.9 * -0.01 - 0.01
        assert_abs_diff_eq!(w[0], -0.01 - 0.019, epsilon = 1e-7);
    }

    #[test]
    fn state_is_keyed_per_buffer() {
        let mut opt = Adagrad::default();
        let a = vec![1.0];
        let b = vec![1.0];
        let (mut wa, mut wb) = (vec![0.0], vec![0.0]);
        opt.update(&a, &[], &mut wa).unwrap();
        opt.update(&a, &[], &mut wa).unwrap();
        opt.update(&b, &[], &mut wb).unwrap();
        assert_abs_diff_eq!(wb[0], -0.01, epsilon = 1e-6);
        assert!(wa[0] < wb[0]);
    }

    #[test]
    fn adam_first_step_moves_by_alpha() {
        let mut opt = Adam::default();
        let mut w = vec![0.0, 0.0];
        opt.update(&[0.3, -4.0], &[], &mut w).unwrap();
        assert_abs_diff_eq!(w[0], -0.001, epsilon = 1e-5);
        assert_abs_diff_eq!(w[1], 0.001, epsilon = 1e-5);
    }

    #[test]
    fn hessian_descent_needs_hessian() {
        let mut opt = HessianDescent::default();
        let mut w = vec![0.0; 2];
        assert!(matches!(
            opt.update(&[1.0, 1.0], &[], &mut w),
            Err(NnError::MissingHessian)
        ));
        opt.update(&[1.0, 1.0], &[0.98, 3.98], &mut w).unwrap();
        assert_abs_diff_eq!(w[0], -0.00085, epsilon = 1e-7);
        assert_abs_diff_eq!(w[1], -0.000425, epsilon = 1e-7);
    }
}
