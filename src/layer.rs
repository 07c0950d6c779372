//! Layers: nodes of the computation graph.
//!
//! Every layer is the same concrete type. What differs between a convolution,
//! a pooling stage and a dense layer is only the adjacency its builder loads
//! into the [`PartialConnected`] engine, recorded as a [`LayerKind`] tag, plus
//! an optional zero-padding step for convolutions.
//!
//! ## Ports
//!
//! | in port | type     | shape                        |
//! |---------|----------|------------------------------|
//! | 0       | `Data`   | input sample                 |
//! | 1       | `Weight` | weight vector                |
//! | 2       | `Bias`   | bias vector (when present)   |
//!
//! There is a single output port carrying the activated output.
//!
//! ## Lifecycle
//!
//! A freshly built layer owns no edges. [`Layer::setup`] allocates the
//! missing ones and initializes parameters the first time (or on demand);
//! afterwards [`Layer::forward`] and [`Layer::backward`] run on whatever the
//! edges hold.

use std::cell::{Ref, RefMut};
use std::io::{BufRead, Write};

use rand::Rng;
use rayon::prelude::*;

use crate::activation::Activation;
use crate::backend::Backend;
use crate::error::{NnError, Result};
use crate::layers::conv::Padder;
use crate::modelio;
use crate::node::{Edge, EdgeRef, LayerId};
use crate::ops::dispatch::Kernels;
use crate::optim::Optimizer;
use crate::parallel;
use crate::partial::PartialConnected;
use crate::tensors::{Float, Shape3d, Tensor, VectorType};
use crate::weight_init::WeightInit;

/// Connectivity builder that produced a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerKind {
    FullyConnected,
    Convolutional,
    AveragePooling,
    GlobalAveragePooling,
    AverageUnpooling,
}

impl LayerKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::FullyConnected => "fully-connected",
            Self::Convolutional => "conv",
            Self::AveragePooling => "ave-pool",
            Self::GlobalAveragePooling => "global-ave-pool",
            Self::AverageUnpooling => "ave-unpool",
        }
    }
}

/// How the output-space second-order buffer becomes the pre-activation
/// second-order delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Curvature {
    /// Multiply by `f'(y)²`.
    Squared,
    /// Multiply by `f'(y)`; the output layer under a canonical link.
    Linear,
}

/// Everything a builder hands over to create a layer.
pub(crate) struct LayerParts {
    pub kind: LayerKind,
    pub engine: PartialConnected,
    pub in_shape: Shape3d,
    pub weight_shape: Shape3d,
    pub bias_shape: Option<Shape3d>,
    pub out_shape: Shape3d,
    pub activation: Activation,
    pub backend: Backend,
    pub padding: Option<Padder>,
}

/// One node of the network.
#[derive(Debug)]
pub struct Layer {
    id: Option<LayerId>,
    kind: LayerKind,
    engine: PartialConnected,
    activation: Activation,
    in_types: Vec<VectorType>,
    in_shapes: Vec<Shape3d>,
    out_shape: Shape3d,
    prev: Vec<Option<EdgeRef>>,
    next: Vec<Option<EdgeRef>>,
    weight_init: WeightInit,
    bias_init: WeightInit,
    backend: Backend,
    kernels: Kernels,
    padding: Option<Padder>,
    padded_in: Tensor,
    padded_grad: Tensor,
    padded_hessian: Vec<Float>,
    trainable: bool,
    initialized: bool,
}

/// Work assigned to one worker during the backward pass.
struct WorkerSlot<'a> {
    out: &'a [Vec<Float>],
    out_grad: &'a [Vec<Float>],
    prev_out: &'a [Vec<Float>],
    prev_grad: &'a mut [Vec<Float>],
    dw: &'a mut Vec<Float>,
    db: Option<&'a mut Vec<Float>>,
}

impl Layer {
    pub(crate) fn from_parts(parts: LayerParts) -> Result<Self> {
        let kernels = Kernels::for_backend(parts.backend)?;

        let mut in_types = vec![VectorType::Data, VectorType::Weight];
        let mut in_shapes = vec![parts.in_shape, parts.weight_shape];
        if let Some(bias) = parts.bias_shape {
            in_types.push(VectorType::Bias);
            in_shapes.push(bias);
        }

        let padded_len = parts.padding.map_or(0, |p| p.padded.size());
        log::debug!(
            "built {} layer {} -> {} ({} weights, backend {})",
            parts.kind.name(),
            parts.in_shape,
            parts.out_shape,
            parts.weight_shape.size(),
            parts.backend
        );

        Ok(Self {
            id: None,
            kind: parts.kind,
            engine: parts.engine,
            activation: parts.activation,
            prev: vec![None; in_types.len()],
            next: vec![None],
            in_types,
            in_shapes,
            out_shape: parts.out_shape,
            weight_init: WeightInit::default(),
            bias_init: WeightInit::Constant(0.0),
            backend: parts.backend,
            kernels,
            padding: parts.padding,
            padded_in: Tensor::zeros(0, padded_len),
            padded_grad: Tensor::zeros(0, padded_len),
            padded_hessian: vec![0.0; padded_len],
            trainable: true,
            initialized: false,
        })
    }

    pub fn with_weight_init(mut self, init: WeightInit) -> Self {
        self.weight_init = init;
        self
    }

    pub fn with_bias_init(mut self, init: WeightInit) -> Self {
        self.bias_init = init;
        self
    }

    pub fn id(&self) -> Option<LayerId> {
        self.id
    }

    /// Assigns the arena id, re-pointing existing output edges at it.
    pub(crate) fn set_id(&mut self, id: LayerId) {
        self.id = Some(id);
        for e in self.next.iter().flatten() {
            e.borrow_mut().set_prev(id);
        }
    }

    pub fn kind(&self) -> LayerKind {
        self.kind
    }

    pub fn layer_type(&self) -> &'static str {
        self.kind.name()
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Read-only view of the adjacency, for inspection and tests.
    pub fn engine(&self) -> &PartialConnected {
        &self.engine
    }

    pub fn in_types(&self) -> &[VectorType] {
        &self.in_types
    }

    pub fn in_shape(&self) -> &[Shape3d] {
        &self.in_shapes
    }

    pub fn out_shape(&self) -> Shape3d {
        self.out_shape
    }

    pub fn in_data_size(&self) -> usize {
        self.in_shapes[0].size()
    }

    pub fn out_data_size(&self) -> usize {
        self.out_shape.size()
    }

    pub fn fan_in_size(&self) -> usize {
        self.engine.fan_in_size()
    }

    pub fn fan_out_size(&self) -> usize {
        self.engine.fan_out_size()
    }

    pub fn param_size(&self) -> usize {
        self.engine.param_size()
    }

    pub fn connection_size(&self) -> usize {
        self.engine.connection_size()
    }

    pub fn is_trainable(&self) -> bool {
        self.trainable
    }

    /// Frozen layers still propagate gradients but skip parameter updates.
    pub fn set_trainable(&mut self, trainable: bool) {
        self.trainable = trainable;
    }

    pub fn initialized(&self) -> bool {
        self.initialized
    }

    pub fn in_edge(&self, port: usize) -> Result<EdgeRef> {
        self.prev
            .get(port)
            .cloned()
            .flatten()
            .ok_or_else(|| NnError::Graph(format!("{}: input port {port} is not connected", self.layer_type())))
    }

    pub fn out_edge(&self, port: usize) -> Result<EdgeRef> {
        self.next
            .get(port)
            .cloned()
            .flatten()
            .ok_or_else(|| NnError::Graph(format!("{}: output port {port} is not set up", self.layer_type())))
    }

    fn param_edge(&self, vtype: VectorType) -> Option<EdgeRef> {
        self.in_types
            .iter()
            .position(|&t| t == vtype)
            .and_then(|i| self.prev[i].clone())
    }

    /// Trainable input edges in port order (weights, then biases).
    pub fn param_edges(&self) -> Vec<EdgeRef> {
        self.in_types
            .iter()
            .zip(&self.prev)
            .filter(|(t, _)| t.is_trainable())
            .filter_map(|(_, e)| e.clone())
            .collect()
    }

    /// Makes `edge` this layer's input at `port`.
    pub(crate) fn set_in_edge(&mut self, port: usize, edge: EdgeRef) -> Result<()> {
        let slot = self
            .prev
            .get_mut(port)
            .ok_or_else(|| NnError::Graph(format!("input port {port} does not exist")))?;
        *slot = Some(edge);
        Ok(())
    }

    /// Allocates every missing edge and checks the declared channel counts.
    pub fn setup_edges(&mut self) -> Result<()> {
        if self.in_shapes.len() != self.in_types.len() || self.prev.len() != self.in_types.len() {
            return Err(NnError::ConnectionMismatch {
                from: format!("{} input shapes", self.layer_type()),
                to: "input channels".into(),
                out_size: self.in_shapes.len(),
                in_size: self.in_types.len(),
            });
        }
        for ((slot, &shape), &vtype) in self.prev.iter_mut().zip(&self.in_shapes).zip(&self.in_types) {
            if slot.is_none() {
                let mut edge = Edge::new(None, shape, vtype);
                // constant parameters hold their value even if never initialized
                let init = match vtype {
                    VectorType::Weight => Some(self.weight_init),
                    VectorType::Bias => Some(self.bias_init),
                    VectorType::Data => None,
                };
                if let Some(WeightInit::Constant(v)) = init {
                    edge.data_mut().fill(v);
                }
                *slot = Some(edge.into_ref());
            }
        }
        for slot in &mut self.next {
            if slot.is_none() {
                *slot = Some(Edge::new(self.id, self.out_shape, VectorType::Data).into_ref());
            }
        }
        Ok(())
    }

    /// Allocates edges and initializes the parameters if `reset_weights` is
    /// set or they were never initialized.
    pub fn setup(&mut self, reset_weights: bool) -> Result<()> {
        self.setup_edges()?;
        if reset_weights || !self.initialized {
            self.init_weight();
        }
        Ok(())
    }

    pub fn init_weight(&mut self) {
        self.init_weight_with(&mut rand::rng());
    }

    /// Fills weights and biases from their initializers using `rng`.
    ///
    /// A frozen layer keeps whatever parameters it holds and is only marked
    /// initialized.
    pub fn init_weight_with<R: Rng>(&mut self, rng: &mut R) {
        if !self.trainable {
            self.initialized = true;
            return;
        }
        let (fan_in, fan_out) = (self.fan_in_size(), self.fan_out_size());
        for (vtype, edge) in self.in_types.iter().zip(&self.prev) {
            let Some(edge) = edge else { continue };
            let init = match vtype {
                VectorType::Weight => self.weight_init,
                VectorType::Bias => self.bias_init,
                VectorType::Data => continue,
            };
            let mut e = edge.borrow_mut();
            init.fill(&mut e.data_mut()[0], fan_in, fan_out, rng);
            e.clear_grads();
        }
        self.initialized = true;
    }

    /// All parameter vectors, weights first.
    pub fn weights(&self) -> Vec<Ref<'_, [Float]>> {
        self.in_types
            .iter()
            .zip(&self.prev)
            .filter(|(t, _)| t.is_trainable())
            .filter_map(|(_, e)| e.as_ref())
            .map(|e| Ref::map(e.borrow(), |e| &e.data()[0]))
            .collect()
    }

    /// Mutable views of all parameter vectors, weights first.
    pub fn weights_mut(&self) -> Vec<RefMut<'_, [Float]>> {
        self.in_types
            .iter()
            .zip(&self.prev)
            .filter(|(t, _)| t.is_trainable())
            .filter_map(|(_, e)| e.as_ref())
            .map(|e| RefMut::map(e.borrow_mut(), |e| &mut e.data_mut()[0]))
            .collect()
    }

    fn param_ref(&self, vtype: VectorType) -> Option<Ref<'_, [Float]>> {
        let port = self.in_types.iter().position(|&t| t == vtype)?;
        let edge = self.prev[port].as_ref()?;
        Some(Ref::map(edge.borrow(), |e| &e.data()[0]))
    }

    fn param_mut(&self, vtype: VectorType) -> Option<RefMut<'_, [Float]>> {
        let port = self.in_types.iter().position(|&t| t == vtype)?;
        let edge = self.prev[port].as_ref()?;
        Some(RefMut::map(edge.borrow_mut(), |e| &mut e.data_mut()[0]))
    }

    fn param_grad(&self, vtype: VectorType) -> Option<Ref<'_, [Float]>> {
        let port = self.in_types.iter().position(|&t| t == vtype)?;
        let edge = self.prev[port].as_ref()?;
        Some(Ref::map(edge.borrow(), |e| &e.grad()[0]))
    }

    pub fn weight(&self) -> Option<Ref<'_, [Float]>> {
        self.param_ref(VectorType::Weight)
    }

    pub fn bias(&self) -> Option<Ref<'_, [Float]>> {
        self.param_ref(VectorType::Bias)
    }

    pub fn weight_mut(&self) -> Option<RefMut<'_, [Float]>> {
        self.param_mut(VectorType::Weight)
    }

    pub fn bias_mut(&self) -> Option<RefMut<'_, [Float]>> {
        self.param_mut(VectorType::Bias)
    }

    /// Weight gradient row of worker 0.
    pub fn weight_grad(&self) -> Option<Ref<'_, [Float]>> {
        self.param_grad(VectorType::Weight)
    }

    /// Bias gradient row of worker 0.
    pub fn bias_grad(&self) -> Option<Ref<'_, [Float]>> {
        self.param_grad(VectorType::Bias)
    }

    /// Gives every parameter edge `n` gradient rows.
    pub fn set_worker_count(&self, n: usize) {
        for e in self.param_edges() {
            e.borrow_mut().set_worker_count(n);
        }
    }

    pub fn clear_param_grads(&self) {
        for e in self.param_edges() {
            e.borrow_mut().clear_grads();
        }
    }

    pub fn clear_hessian(&self) {
        for e in self.param_edges() {
            e.borrow_mut().clear_hessian();
        }
    }

    /// Turns the accumulated Hessian sums into means over `denominator`
    /// samples.
    pub fn divide_hessian(&self, denominator: usize) {
        let inv = 1.0 / denominator.max(1) as Float;
        for e in self.param_edges() {
            let mut e = e.borrow_mut();
            e.hessian_mut().iter_mut().for_each(|h| *h *= inv);
            e.mark_hessian_ready();
        }
    }

    /// Runs the forward pass over the samples currently on the input edge.
    pub fn forward(&mut self) -> Result<()> {
        let input = self.in_edge(0)?;
        let output = self.out_edge(0)?;
        let weight = self
            .param_edge(VectorType::Weight)
            .ok_or_else(|| NnError::Graph("weight edge missing".into()))?;
        let bias = self.param_edge(VectorType::Bias);

        let in_ref = input.borrow();
        let n = in_ref.data().n_samples();
        let mut out_ref = output.borrow_mut();
        out_ref.resize_samples(n);
        out_ref.clear_grads();

        let w_ref = weight.borrow();
        let b_ref = bias.as_ref().map(|b| b.borrow());
        self.forward_propagation(
            in_ref.data(),
            &w_ref.data()[0],
            b_ref.as_ref().map(|b| &b.data()[0]),
            out_ref.data_mut(),
        );
        Ok(())
    }

    /// `out = h(engine(in))` for every sample.
    pub fn forward_propagation(
        &mut self,
        input: &Tensor,
        weights: &[Float],
        bias: Option<&[Float]>,
        out: &mut Tensor,
    ) {
        let n = input.n_samples();
        out.resize(n);

        let src: &Tensor = match &self.padding {
            Some(p) => {
                self.padded_in.resize(n);
                for (s, d) in input.samples().iter().zip(self.padded_in.samples_mut()) {
                    p.pad(s, d);
                }
                &self.padded_in
            }
            None => input,
        };

        let engine = &self.engine;
        let kernels = self.kernels;
        let act = self.activation;

        if n == 1 {
            let y = &mut out[0];
            engine.forward_sample_chunked(&kernels, &src[0], weights, bias, y);
            act.apply(y);
        } else {
            let run = |(y, x): (&mut Vec<Float>, &Vec<Float>)| {
                engine.forward_sample(&kernels, x, weights, bias, y);
                act.apply(y);
            };
            if parallel::parallelize() {
                out.samples_mut()
                    .par_iter_mut()
                    .zip(src.samples().par_iter())
                    .for_each(run);
            } else {
                out.samples_mut().iter_mut().zip(src.samples()).for_each(run);
            }
        }

        if log::log_enabled!(log::Level::Trace) && n > 0 {
            log::trace!("[{}] forward sample 0: {:?}", self.layer_type(), &out[0]);
        }
    }

    /// Propagates the output gradient to the input edge and accumulates the
    /// parameter gradients.
    pub fn backward(&mut self) -> Result<()> {
        let input = self.in_edge(0)?;
        let output = self.out_edge(0)?;
        let weight = self
            .param_edge(VectorType::Weight)
            .ok_or_else(|| NnError::Graph("weight edge missing".into()))?;
        let bias = self.param_edge(VectorType::Bias);

        let out_ref = output.borrow();
        let mut in_ref = input.borrow_mut();
        let mut w_ref = weight.borrow_mut();
        let mut b_ref = bias.as_ref().map(|b| b.borrow_mut());

        let (in_data, in_grad) = in_ref.split_mut();
        let (w_data, dw) = w_ref.split_mut();
        let db = b_ref.as_mut().map(|b| b.grad_mut());

        self.back_propagation(
            in_data,
            out_ref.data(),
            out_ref.grad(),
            in_grad,
            &w_data[0],
            dw,
            db,
        )
    }

    /// Backward pass over explicit buffers.
    ///
    /// Samples are split into contiguous worker slices; slice `k` writes only
    /// gradient row `k` of `dw`/`db` and its own samples of `in_grad`.
    #[allow(clippy::too_many_arguments)]
    pub fn back_propagation(
        &mut self,
        in_data: &Tensor,
        out_data: &Tensor,
        out_grad: &Tensor,
        in_grad: &mut Tensor,
        weights: &[Float],
        dw: &mut Tensor,
        db: Option<&mut Tensor>,
    ) -> Result<()> {
        let n = out_data.n_samples();
        if n == 0 {
            return Ok(());
        }
        if in_data.n_samples() != n || out_grad.n_samples() != n || in_grad.n_samples() != n {
            return Err(NnError::DataMismatch(format!(
                "{}: backward over {n} outputs with {} inputs, {} output grads, {} input grads",
                self.layer_type(),
                in_data.n_samples(),
                out_grad.n_samples(),
                in_grad.n_samples()
            )));
        }
        let (_, per) = parallel::partition(n, dw.n_samples());

        match self.padding {
            Some(p) => {
                self.padded_grad.resize(n);
                self.padded_grad.fill(0.0);
                backward_workers(
                    &self.engine,
                    self.kernels,
                    self.activation,
                    per,
                    (&self.padded_in, out_data, out_grad),
                    &mut self.padded_grad,
                    weights,
                    dw,
                    db,
                );
                for (src, dst) in self.padded_grad.samples().iter().zip(in_grad.samples_mut()) {
                    p.crop_add(src, dst);
                }
            }
            None => backward_workers(
                &self.engine,
                self.kernels,
                self.activation,
                per,
                (in_data, out_data, out_grad),
                in_grad,
                weights,
                dw,
                db,
            ),
        }
        Ok(())
    }

    /// Second-order pass for sample 0 of the current batch.
    ///
    /// Reads the output edge's second-order buffer, accumulates the weight
    /// and bias Hessians and adds this layer's contribution to the input
    /// edge's second-order buffer.
    pub fn backward_2nd(&mut self, curvature: Curvature) -> Result<()> {
        let input = self.in_edge(0)?;
        let output = self.out_edge(0)?;
        let weight = self
            .param_edge(VectorType::Weight)
            .ok_or_else(|| NnError::Graph("weight edge missing".into()))?;
        let bias = self.param_edge(VectorType::Bias);

        let out_ref = output.borrow();
        if out_ref.data().is_empty() {
            return Err(NnError::DataMismatch("second-order pass before forward".into()));
        }
        let act = self.activation;
        let delta2: Vec<Float> = out_ref.data()[0]
            .iter()
            .zip(out_ref.hessian())
            .map(|(&y, &h)| {
                let d = act.df(y);
                match curvature {
                    Curvature::Squared => h * d * d,
                    Curvature::Linear => h * d,
                }
            })
            .collect();

        let mut in_ref = input.borrow_mut();
        let mut w_ref = weight.borrow_mut();
        let mut b_ref = bias.as_ref().map(|b| b.borrow_mut());
        let (in_data, in_hess) = in_ref.split_hessian_mut();
        let (w_data, w_hess) = w_ref.split_hessian_mut();
        let b_hess = b_ref.as_mut().map(|b| b.hessian_mut());

        match self.padding {
            Some(p) => {
                self.padded_hessian.fill(0.0);
                self.engine.backward_2nd_sample(
                    &self.padded_in[0],
                    &w_data[0],
                    &delta2,
                    &mut self.padded_hessian,
                    w_hess,
                    b_hess,
                );
                p.crop_add(&self.padded_hessian, in_hess);
            }
            None => self.engine.backward_2nd_sample(
                &in_data[0],
                &w_data[0],
                &delta2,
                in_hess,
                w_hess,
                b_hess,
            ),
        }
        Ok(())
    }

    /// Applies `optimizer` to every trainable parameter vector using the
    /// mean gradient over `batch_size` samples, then clears the gradients.
    pub fn update_weight(&mut self, optimizer: &mut dyn Optimizer, batch_size: usize) -> Result<()> {
        if !self.trainable {
            self.clear_param_grads();
            return Ok(());
        }
        for e in self.param_edges() {
            e.borrow_mut().apply_update(&self.kernels, batch_size, optimizer)?;
        }
        Ok(())
    }

    /// Loads `inputs` onto the input edge and runs the forward pass.
    ///
    /// Convenience for using a layer on its own; returns a copy of the
    /// output.
    pub fn forward_batch(&mut self, inputs: &[Vec<Float>]) -> Result<Tensor> {
        self.setup_edges()?;
        self.in_edge(0)?.borrow_mut().load_samples(inputs)?;
        self.forward()?;
        Ok(self.out_edge(0)?.borrow().data().clone())
    }

    /// Sets the output gradient, clears all input gradients and runs the
    /// backward pass. Returns a copy of the input gradient.
    pub fn backward_batch(&mut self, out_grads: &[Vec<Float>]) -> Result<Tensor> {
        let output = self.out_edge(0)?;
        {
            let mut out = output.borrow_mut();
            if out_grads.len() != out.data().n_samples() {
                return Err(NnError::DataMismatch(format!(
                    "{} output gradients for {} outputs",
                    out_grads.len(),
                    out.data().n_samples()
                )));
            }
            let grad = out.grad_mut();
            for (dst, src) in grad.samples_mut().iter_mut().zip(out_grads) {
                if src.len() != dst.len() {
                    return Err(NnError::DataMismatch(format!(
                        "output gradient of {} elements, expected {}",
                        src.len(),
                        dst.len()
                    )));
                }
                dst.copy_from_slice(src);
            }
        }
        let input = self.in_edge(0)?;
        input.borrow_mut().clear_grads();
        self.clear_param_grads();
        self.backward()?;
        let grad = input.borrow().grad().clone();
        Ok(grad)
    }

    /// Compacts unused weight slots (connection-table gaps) away.
    pub fn remap(&mut self) -> Result<usize> {
        self.setup_edges()?;
        let weight = self
            .param_edge(VectorType::Weight)
            .ok_or_else(|| NnError::Graph("weight edge missing".into()))?;
        let mut w = weight.borrow().data()[0].to_vec();
        let removed = self.engine.remap(&mut w)?;
        if removed > 0 {
            let shape = Shape3d::new(w.len(), 1, 1);
            weight.borrow_mut().reshape_param(w);
            if let Some(port) = self.in_types.iter().position(|&t| t == VectorType::Weight) {
                self.in_shapes[port] = shape;
            }
        }
        Ok(removed)
    }

    /// Writes all parameters as whitespace-separated decimals, weights first.
    pub fn save<W: Write>(&self, writer: &mut W) -> Result<()> {
        for e in self.param_edges() {
            for v in e.borrow().data()[0].iter() {
                write!(writer, "{v} ")?;
            }
        }
        Ok(())
    }

    /// Reads parameters written by [`Layer::save`].
    ///
    /// # Errors
    /// A stream that ends before every parameter is read yields
    /// [`NnError::ShortStream`] and leaves the parameters untouched.
    pub fn load<R: BufRead>(&mut self, reader: &mut R) -> Result<()> {
        self.setup_edges()?;
        let edges = self.param_edges();
        let expected: usize = edges.iter().map(|e| e.borrow().data().sample_len()).sum();

        let mut values = Vec::with_capacity(expected);
        while values.len() < expected {
            let Some(tok) = modelio::read_token(reader)? else {
                return Err(NnError::ShortStream {
                    expected,
                    read: values.len(),
                });
            };
            values.push(tok.parse::<Float>().map_err(|_| NnError::Parse(tok))?);
        }

        let mut rest = values.as_slice();
        for e in edges {
            let mut e = e.borrow_mut();
            let dst = &mut e.data_mut()[0];
            let (head, tail) = rest.split_at(dst.len());
            dst.copy_from_slice(head);
            rest = tail;
        }
        self.initialized = true;
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
fn backward_workers(
    engine: &PartialConnected,
    kernels: Kernels,
    act: Activation,
    per: usize,
    (prev_out, out_data, out_grad): (&Tensor, &Tensor, &Tensor),
    prev_grad: &mut Tensor,
    weights: &[Float],
    dw: &mut Tensor,
    db: Option<&mut Tensor>,
) {
    let mut db_rows = db.map(|t| t.samples_mut().iter_mut());
    let mut slots: Vec<WorkerSlot<'_>> = out_data
        .samples()
        .chunks(per)
        .zip(out_grad.samples().chunks(per))
        .zip(prev_out.samples().chunks(per))
        .zip(prev_grad.samples_mut().chunks_mut(per))
        .zip(dw.samples_mut().iter_mut())
        .map(|((((out, out_grad), prev_out), prev_grad), dw)| WorkerSlot {
            out,
            out_grad,
            prev_out,
            prev_grad,
            dw,
            db: db_rows.as_mut().and_then(Iterator::next),
        })
        .collect();

    parallel::for_each_worker(&mut slots, |_, slot| {
        let mut delta = vec![0.0; engine.out_size()];
        for s in 0..slot.out.len() {
            act.backward(&slot.out_grad[s], &slot.out[s], &mut delta);
            engine.backward_sample(
                &kernels,
                &slot.prev_out[s],
                weights,
                &delta,
                &mut slot.prev_grad[s],
                &mut slot.dw[..],
                slot.db.as_mut().map(|d| &mut d[..]),
            );
        }
    });
}
