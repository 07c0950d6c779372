//! Finite-difference checks of a single layer's backward pass.
//!
//! The layer's output `out_pos` of sample 0 is treated as the scalar being
//! differentiated. The numeric side perturbs one element of one input port
//! (data, weights or biases) by `±h` and re-runs the forward pass; the
//! analytic side seeds a one-hot output gradient and runs one backward pass.
//! Both leave the perturbed element at its original value.

use crate::error::{NnError, Result};
use crate::layer::Layer;
use crate::tensors::Float;

/// Central-difference step: `√ε` of the element type.
pub fn default_step() -> Float {
    Float::EPSILON.sqrt()
}

fn check_positions(layer: &Layer, in_port: usize, in_pos: usize, out_pos: usize) -> Result<()> {
    let in_size = layer
        .in_shape()
        .get(in_port)
        .map(|s| s.size())
        .ok_or_else(|| NnError::Graph(format!("{} has no input port {in_port}", layer.layer_type())))?;
    if in_pos >= in_size {
        return Err(NnError::Index {
            kind: "input position",
            index: in_pos,
            size: in_size,
        });
    }
    if out_pos >= layer.out_data_size() {
        return Err(NnError::Index {
            kind: "output position",
            index: out_pos,
            size: layer.out_data_size(),
        });
    }
    Ok(())
}

fn run_with(layer: &mut Layer, in_port: usize, in_pos: usize, value: Float, out_pos: usize) -> Result<Float> {
    layer.in_edge(in_port)?.borrow_mut().data_mut()[0][in_pos] = value;
    layer.forward()?;
    let out = layer.out_edge(0)?.borrow().data()[0][out_pos];
    Ok(out)
}

/// `(f(x + h) − f(x − h)) / 2h` for output `out_pos` with respect to element
/// `in_pos` of input port `in_port`.
///
/// The layer must be set up and its input edge must hold at least one
/// sample.
pub fn numeric_gradient(layer: &mut Layer, in_port: usize, in_pos: usize, out_pos: usize) -> Result<Float> {
    check_positions(layer, in_port, in_pos, out_pos)?;
    let h = default_step();
    let prev = layer.in_edge(in_port)?.borrow().data()[0][in_pos];

    let plus = run_with(layer, in_port, in_pos, prev + h, out_pos)?;
    let minus = run_with(layer, in_port, in_pos, prev - h, out_pos)?;
    layer.in_edge(in_port)?.borrow_mut().data_mut()[0][in_pos] = prev;

    Ok((plus - minus) / (2.0 * h))
}

/// `∂out[out_pos] / ∂in[in_pos]` from one backward pass.
pub fn analytical_gradient(layer: &mut Layer, in_port: usize, in_pos: usize, out_pos: usize) -> Result<Float> {
    check_positions(layer, in_port, in_pos, out_pos)?;
    layer.forward()?;

    let output = layer.out_edge(0)?;
    {
        let mut out = output.borrow_mut();
        let grad = out.grad_mut();
        grad.fill(0.0);
        grad[0][out_pos] = 1.0;
    }
    layer.in_edge(0)?.borrow_mut().clear_grads();
    layer.clear_param_grads();
    layer.backward()?;

    let edge = layer.in_edge(in_port)?;
    let g = edge.borrow().grad()[0][in_pos];
    Ok(g)
}

/// `|a − b| / max(|a|, |b|)`, zero when both are zero.
pub fn relative_error(a: Float, b: Float) -> Float {
    let denom = a.abs().max(b.abs());
    if denom == 0.0 { 0.0 } else { (a - b).abs() / denom }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::Activation;
    use crate::layers::FullyConnected;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn fc_sigmoid_gradients_agree() {
        let mut fc = FullyConnected::new(4, 3)
            .activation(Activation::Sigmoid)
            .build()
            .unwrap();
        fc.setup_edges().unwrap();
        fc.init_weight_with(&mut StdRng::seed_from_u64(11));
        fc.in_edge(0)
            .unwrap()
            .borrow_mut()
            .load_samples(&[vec![0.3, -0.7, 1.1, 0.05]])
            .unwrap();

        for port in 0..3 {
            let n = fc.in_shape()[port].size();
            for pos in 0..n {
                for out in 0..3 {
                    let num = numeric_gradient(&mut fc, port, pos, out).unwrap();
                    let ana = analytical_gradient(&mut fc, port, pos, out).unwrap();
                    assert!((num - ana).abs() < 1e-3, "port {port} pos {pos} out {out}: {num} vs {ana}");
                }
            }
        }
    }

    #[test]
    fn positions_are_checked() {
        let mut fc = FullyConnected::new(2, 2).build().unwrap();
        fc.setup(false).unwrap();
        assert!(numeric_gradient(&mut fc, 0, 2, 0).is_err());
        assert!(analytical_gradient(&mut fc, 0, 0, 5).is_err());
        assert!(numeric_gradient(&mut fc, 7, 0, 0).is_err());
    }

    #[test]
    fn relative_error_is_symmetric() {
        assert_eq!(relative_error(0.0, 0.0), 0.0);
        assert_eq!(relative_error(1.0, 0.5), relative_error(0.5, 1.0));
        assert_eq!(relative_error(2.0, 1.0), 0.5);
    }
}
