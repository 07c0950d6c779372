//! Edges and layer identifiers of the computation graph.
//!
//! An [`Edge`] is a shared buffer between one producer layer and any number
//! of consumer layers. Connecting two layers does not copy anything: the
//! consumer's input slot receives a clone of the producer's [`EdgeRef`].
//!
//! Parameter edges (weights and biases) have no producer. They hold one data
//! sample plus one gradient row per worker partition, so workers can
//! accumulate without sharing a buffer; [`Edge::merge_grads`] folds the rows
//! back together once every worker has finished.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{NnError, Result};
use crate::layer::Layer;
use crate::ops::VectorKernels;
use crate::ops::dispatch::Kernels;
use crate::optim::Optimizer;
use crate::tensors::{Float, Shape3d, Tensor, VectorType};

/// Shared handle to an edge.
pub type EdgeRef = Rc<RefCell<Edge>>;

/// Stable index of a layer inside its network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(pub(crate) usize);

impl LayerId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Batched data and gradient buffers flowing between layers.
#[derive(Debug)]
pub struct Edge {
    shape: Shape3d,
    vtype: VectorType,
    data: Tensor,
    grad: Tensor,
    hessian: Vec<Float>,
    hessian_ready: bool,
    prev: Option<LayerId>,
    next: Vec<LayerId>,
}

impl Edge {
    /// One zeroed sample of `shape`, one gradient row.
    pub fn new(prev: Option<LayerId>, shape: Shape3d, vtype: VectorType) -> Self {
        let size = shape.size();
        Self {
            shape,
            vtype,
            data: Tensor::zeros(1, size),
            grad: Tensor::zeros(1, size),
            hessian: vec![0.0; size],
            hessian_ready: false,
            prev,
            next: Vec::new(),
        }
    }

    pub fn into_ref(self) -> EdgeRef {
        Rc::new(RefCell::new(self))
    }

    pub fn shape(&self) -> Shape3d {
        self.shape
    }

    pub fn vtype(&self) -> VectorType {
        self.vtype
    }

    pub fn prev(&self) -> Option<LayerId> {
        self.prev
    }

    pub fn next(&self) -> &[LayerId] {
        &self.next
    }

    pub(crate) fn set_prev(&mut self, id: LayerId) {
        self.prev = Some(id);
    }

    pub(crate) fn add_next(&mut self, id: LayerId) {
        if !self.next.contains(&id) {
            self.next.push(id);
        }
    }

    pub fn data(&self) -> &Tensor {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Tensor {
        &mut self.data
    }

    pub fn grad(&self) -> &Tensor {
        &self.grad
    }

    pub fn grad_mut(&mut self) -> &mut Tensor {
        &mut self.grad
    }

    /// Second-order buffer: the Hessian diagonal of a parameter edge, or the
    /// second-order delta of a data edge.
    pub fn hessian(&self) -> &[Float] {
        &self.hessian
    }

    pub fn hessian_mut(&mut self) -> &mut [Float] {
        &mut self.hessian
    }

    /// Whether the second-order buffer holds a finished estimate.
    pub fn hessian_ready(&self) -> bool {
        self.hessian_ready
    }

    pub(crate) fn mark_hessian_ready(&mut self) {
        self.hessian_ready = true;
    }

    /// Data for reading and gradient for writing at the same time.
    pub fn split_mut(&mut self) -> (&Tensor, &mut Tensor) {
        (&self.data, &mut self.grad)
    }

    /// Data for reading and the second-order buffer for writing.
    pub fn split_hessian_mut(&mut self) -> (&Tensor, &mut [Float]) {
        (&self.data, &mut self.hessian)
    }

    /// Resizes a data edge to `n` samples (both data and gradient).
    pub fn resize_samples(&mut self, n: usize) {
        self.data.resize(n);
        self.grad.resize(n);
    }

    /// Replaces the data with `samples` and zeroes the gradient.
    ///
    /// # Errors
    /// [`NnError::DataMismatch`] if a sample does not have the edge's size.
    pub fn load_samples(&mut self, samples: &[Vec<Float>]) -> Result<()> {
        let size = self.shape.size();
        if let Some(bad) = samples.iter().position(|s| s.len() != size) {
            return Err(NnError::DataMismatch(format!(
                "sample {bad} has {} elements, edge {} expects {size}",
                samples[bad].len(),
                self.shape
            )));
        }
        self.resize_samples(samples.len());
        for (dst, src) in self.data.samples_mut().iter_mut().zip(samples) {
            dst.copy_from_slice(src);
        }
        self.clear_grads();
        Ok(())
    }

    /// Resizes the per-worker gradient rows of a parameter edge.
    pub fn set_worker_count(&mut self, n: usize) {
        self.grad.resize(n.max(1));
    }

    pub fn clear_grads(&mut self) {
        self.grad.fill(0.0);
    }

    pub fn clear_hessian(&mut self) {
        self.hessian.fill(0.0);
        self.hessian_ready = false;
    }

    /// Replaces the single parameter sample, resizing the gradient rows and
    /// Hessian to match. Used when a layer compacts its weights.
    pub(crate) fn reshape_param(&mut self, values: Vec<Float>) {
        let n = values.len();
        let workers = self.grad.n_samples().max(1);
        self.shape = Shape3d::new(n, 1, 1);
        self.data = Tensor::from_vec(values);
        self.grad = Tensor::zeros(workers, n);
        self.hessian = vec![0.0; n];
        self.hessian_ready = false;
    }

    /// Sums every gradient row into row 0 and divides it by `batch_size`.
    pub fn merge_grads(&mut self, kernels: &Kernels, batch_size: usize) -> &[Float] {
        let rows = self.grad.samples_mut();
        if let Some((first, rest)) = rows.split_first_mut() {
            for row in rest.iter() {
                kernels.reduce(row, first);
            }
            if batch_size > 1 {
                let inv = 1.0 / batch_size as Float;
                first.iter_mut().for_each(|g| *g *= inv);
            }
        }
        &self.grad[0]
    }

    /// Merges worker rows, hands `(dW, H, W)` to the optimizer, then clears
    /// every row. `H` is empty until a second-order pass has finished.
    pub(crate) fn apply_update(
        &mut self,
        kernels: &Kernels,
        batch_size: usize,
        optimizer: &mut dyn Optimizer,
    ) -> Result<()> {
        self.merge_grads(kernels, batch_size);
        let Self {
            data,
            grad,
            hessian,
            hessian_ready,
            ..
        } = self;
        let hessian: &[Float] = if *hessian_ready { &hessian[..] } else { &[] };
        optimizer.update(&grad[0], hessian, &mut data[0])?;
        grad.fill(0.0);
        Ok(())
    }
}

/// Feeds output `head_port` of `head` into input `tail_port` of `tail`.
///
/// The head's edges are allocated first so its output edge exists; the
/// tail's input slot then shares that edge. Sizes must agree, shapes need
/// not. Parameters are left uninitialized for the caller to fill.
///
/// # Errors
/// [`NnError::ConnectionMismatch`] when the sizes differ, [`NnError::Graph`]
/// when either port does not exist.
pub fn connect(head: &mut Layer, tail: &mut Layer, head_port: usize, tail_port: usize) -> Result<()> {
    head.setup_edges()?;
    let edge = head.out_edge(head_port)?;

    let in_size = tail
        .in_shape()
        .get(tail_port)
        .map(Shape3d::size)
        .ok_or_else(|| NnError::Graph(format!("{} has no input port {tail_port}", tail.layer_type())))?;
    let out_size = edge.borrow().shape().size();
    if out_size != in_size {
        return Err(NnError::ConnectionMismatch {
            from: head.layer_type().to_string(),
            to: tail.layer_type().to_string(),
            out_size,
            in_size,
        });
    }

    if let Some(id) = tail.id() {
        edge.borrow_mut().add_next(id);
    }
    log::debug!(
        "connected {} [{}] -> {} [{}] ({out_size} values)",
        head.layer_type(),
        head_port,
        tail.layer_type(),
        tail_port
    );
    tail.set_in_edge(tail_port, edge)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_averages_worker_rows() {
        let mut e = Edge::new(None, Shape3d::new(3, 1, 1), VectorType::Weight);
        e.set_worker_count(2);
        e.grad_mut()[0].copy_from_slice(&[1.0, 2.0, 3.0]);
        e.grad_mut()[1].copy_from_slice(&[3.0, 2.0, 1.0]);
        let merged = e.merge_grads(&Kernels::default(), 4).to_vec();
        assert_eq!(merged, vec![1.0, 1.0, 1.0]);
    }

    #[test]
    fn load_rejects_wrong_sample_size() {
        let mut e = Edge::new(None, Shape3d::new(3, 1, 1), VectorType::Data);
        assert!(e.load_samples(&[vec![1.0, 2.0]]).is_err());
        e.load_samples(&[vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]).unwrap();
        assert_eq!(e.data().n_samples(), 2);
        assert_eq!(&e.data()[1], &[4.0, 5.0, 6.0]);
        assert!(e.grad()[1].iter().all(|&g| g == 0.0));
    }

    #[test]
    fn hessian_is_withheld_until_marked_ready() {
        use crate::optim::HessianDescent;

        let mut e = Edge::new(None, Shape3d::new(2, 1, 1), VectorType::Weight);
        e.grad_mut()[0].copy_from_slice(&[1.0, -1.0]);
        let mut opt = HessianDescent::default();
        assert!(matches!(
            e.apply_update(&Kernels::default(), 1, &mut opt),
            Err(NnError::MissingHessian)
        ));

        e.hessian_mut().fill(1.0);
        e.mark_hessian_ready();
        e.apply_update(&Kernels::default(), 1, &mut opt).unwrap();
        assert!(e.data()[0][0] < 0.0 && e.data()[0][1] > 0.0);

        e.clear_hessian();
        assert!(!e.hessian_ready());
    }

    #[test]
    fn data_edge_resizes_both_buffers() {
        let mut e = Edge::new(None, Shape3d::new(2, 2, 1), VectorType::Data);
        e.resize_samples(5);
        assert_eq!(e.data().n_samples(), 5);
        assert_eq!(e.grad().n_samples(), 5);
        assert_eq!(e.data().sample_len(), 4);
    }
}
