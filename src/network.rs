//! Network graph and training driver.
//!
//! A [`Network`] owns its layers in an arena indexed by [`LayerId`]. The
//! simplest way to build one is [`Network::add`], which chains each new layer
//! after the previous one; [`Network::add_layer`] plus [`Network::connect`]
//! and [`Network::construct`] build arbitrary graphs with fan-out.
//!
//! # Training
//!
//! [`Network::train`] runs epochs of minibatch gradient descent:
//!
//! 1. optionally, the second-order pass over the first
//!    [`TrainConfig::hessian_samples`] samples (when the optimizer asks for
//!    it), leaving the mean Hessian diagonal on every parameter edge;
//! 2. for every minibatch, forward, backward with the loss gradient seeded
//!    at the output, then one optimizer step on the batch-mean gradient.
//!
//! Each minibatch is split over [`TrainConfig::n_workers`] contiguous
//! slices; worker `k` writes only gradient row `k` of every parameter edge
//! and the rows are reduced after all workers have joined.
//!
//! # Example
//! ```rust
//! use briny_cnn::activation::Activation;
//! use briny_cnn::layers::FullyConnected;
//! use briny_cnn::loss::Loss;
//! use briny_cnn::network::{Network, TrainConfig};
//! use briny_cnn::optim::Adagrad;
//!
//! let mut net = Network::with_seed(1);
//! net.add(FullyConnected::new(2, 1).activation(Activation::Sigmoid).build().unwrap()).unwrap();
//!
//! let inputs = vec![vec![0.0, 1.0], vec![1.0, 0.0]];
//! let targets = vec![vec![0.9], vec![0.1]];
//! let config = TrainConfig { epochs: 5, ..TrainConfig::default() };
//! net.fit(&mut Adagrad::default(), Loss::Mse, &inputs, &targets, &config).unwrap();
//! assert_eq!(net.predict(&[0.0, 1.0]).unwrap().len(), 1);
//! ```

use std::collections::{BTreeMap, VecDeque};
use std::io::{BufRead, Write};
use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{NnError, Result};
use crate::layer::{Curvature, Layer};
use crate::loss::Loss;
use crate::modelio::{self, ParamTensor};
use crate::node::{self, LayerId};
use crate::optim::Optimizer;
use crate::parallel;
use crate::tensors::{Float, Tensor};

/// Indices sampled per parameter vector by [`GradCheckMode::Random`].
const RANDOM_CHECKS: usize = 10;

/// Minibatch training settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainConfig {
    pub batch_size: usize,
    pub epochs: usize,
    /// Upper bound on worker partitions per minibatch.
    pub n_workers: usize,
    /// Re-initialize every parameter before the first epoch.
    pub reset_weights: bool,
    /// Samples used by the second-order pass.
    pub hessian_samples: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            batch_size: 1,
            epochs: 1,
            n_workers: rayon::current_num_threads(),
            reset_weights: false,
            hessian_samples: 500,
        }
    }
}

/// Which parameter elements [`Network::gradient_check`] compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GradCheckMode {
    /// Every weight and bias.
    #[default]
    All,
    /// A few random elements of every parameter vector.
    Random,
}

/// Classification results of [`Network::test`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestResult {
    pub num_success: usize,
    pub num_total: usize,
    /// `confusion_matrix[predicted][actual]` counts.
    pub confusion_matrix: BTreeMap<usize, BTreeMap<usize, usize>>,
}

impl TestResult {
    /// Percentage of correctly classified samples.
    pub fn accuracy(&self) -> f64 {
        if self.num_total == 0 {
            return 0.0;
        }
        self.num_success as f64 * 100.0 / self.num_total as f64
    }

    fn insert(&mut self, predicted: usize, actual: usize) {
        if predicted == actual {
            self.num_success += 1;
        }
        self.num_total += 1;
        *self
            .confusion_matrix
            .entry(predicted)
            .or_default()
            .entry(actual)
            .or_default() += 1;
    }
}

/// A graph of layers with one input layer and one output layer.
#[derive(Debug)]
pub struct Network {
    layers: Vec<Layer>,
    order: Vec<LayerId>,
    input: Option<LayerId>,
    output: Option<LayerId>,
    rng: StdRng,
    stop: bool,
}

impl Default for Network {
    fn default() -> Self {
        Self::new()
    }
}

/// Two distinct layers borrowed mutably at once.
fn pair_mut(layers: &mut [Layer], a: usize, b: usize) -> Result<(&mut Layer, &mut Layer)> {
    if a == b {
        return Err(NnError::Graph(format!("cannot connect layer {a} to itself")));
    }
    if a.max(b) >= layers.len() {
        return Err(NnError::Graph(format!("layer {} does not exist", a.max(b))));
    }
    if a < b {
        let (l, r) = layers.split_at_mut(b);
        Ok((&mut l[a], &mut r[0]))
    } else {
        let (l, r) = layers.split_at_mut(a);
        Ok((&mut r[0], &mut l[b]))
    }
}

impl Network {
    /// Empty network with an OS-seeded generator for weight initialization.
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_os_rng())
    }

    /// Empty network whose initialization is reproducible.
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            layers: Vec::new(),
            order: Vec::new(),
            input: None,
            output: None,
            rng,
            stop: false,
        }
    }

    /// Enables or disables the worker pool for every layer.
    pub fn set_parallelize(on: bool) {
        parallel::set_parallelize(on);
    }

    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layer(&self, id: LayerId) -> Result<&Layer> {
        self.layers
            .get(id.0)
            .ok_or_else(|| NnError::Graph(format!("layer {} does not exist", id.0)))
    }

    pub fn layer_mut(&mut self, id: LayerId) -> Result<&mut Layer> {
        self.layers
            .get_mut(id.0)
            .ok_or_else(|| NnError::Graph(format!("layer {} does not exist", id.0)))
    }

    /// Layers in execution order.
    pub fn order(&self) -> &[LayerId] {
        &self.order
    }

    fn input_layer(&self) -> Result<&Layer> {
        self.input
            .ok_or_else(|| NnError::Graph("network has no layers".into()))
            .and_then(|id| self.layer(id))
    }

    fn output_layer(&self) -> Result<&Layer> {
        self.output
            .ok_or_else(|| NnError::Graph("network has no layers".into()))
            .and_then(|id| self.layer(id))
    }

    pub fn in_data_size(&self) -> Result<usize> {
        Ok(self.input_layer()?.in_data_size())
    }

    pub fn out_data_size(&self) -> Result<usize> {
        Ok(self.output_layer()?.out_data_size())
    }

    /// Adds a layer without connecting it.
    pub fn add_layer(&mut self, mut layer: Layer) -> LayerId {
        let id = LayerId(self.layers.len());
        layer.set_id(id);
        self.layers.push(layer);
        id
    }

    /// Appends `layer` after the current output layer.
    ///
    /// # Errors
    /// [`NnError::ConnectionMismatch`] when the previous layer's output size
    /// differs from this layer's input size.
    pub fn add(&mut self, layer: Layer) -> Result<LayerId> {
        let id = self.add_layer(layer);
        match self.output {
            Some(prev) => {
                if let Err(e) = self.connect(prev, id, 0, 0) {
                    self.layers.pop();
                    return Err(e);
                }
            }
            None => self.input = Some(id),
        }
        self.order.push(id);
        self.output = Some(id);
        Ok(id)
    }

    /// Feeds output `head_port` of `head` into input `tail_port` of `tail`.
    pub fn connect(&mut self, head: LayerId, tail: LayerId, head_port: usize, tail_port: usize) -> Result<()> {
        let (h, t) = pair_mut(&mut self.layers, head.0, tail.0)?;
        node::connect(h, t, head_port, tail_port)
    }

    /// Fixes the input and output layers of a hand-connected graph and
    /// computes the execution order.
    ///
    /// # Errors
    /// [`NnError::Graph`] for a cycle, or when `output` is not reachable
    /// from `input`.
    pub fn construct(&mut self, input: LayerId, output: LayerId) -> Result<()> {
        self.layer(input)?;
        self.layer(output)?;

        let n = self.layers.len();
        let mut producer = vec![None; n];
        let mut consumers = vec![Vec::new(); n];
        for (idx, layer) in self.layers.iter().enumerate() {
            let prev = layer.in_edge(0).ok().and_then(|e| e.borrow().prev());
            if let Some(p) = prev {
                producer[idx] = Some(p.0);
                consumers[p.0].push(idx);
            }
        }

        let mut queue: VecDeque<usize> = (0..n).filter(|&i| producer[i].is_none()).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(i) = queue.pop_front() {
            order.push(LayerId(i));
            queue.extend(consumers[i].iter().copied());
        }
        if order.len() != n {
            return Err(NnError::Graph(format!(
                "cycle detected: only {} of {n} layers can be ordered",
                order.len()
            )));
        }

        let mut cur = output.0;
        while cur != input.0 {
            cur = producer[cur].ok_or_else(|| {
                NnError::Graph(format!("layer {} is not reachable from layer {}", output.0, input.0))
            })?;
        }

        log::debug!("constructed graph of {n} layers");
        self.order = order;
        self.input = Some(input);
        self.output = Some(output);
        Ok(())
    }

    /// Sets every layer up, initializing parameters where needed.
    pub fn setup(&mut self, reset_weights: bool) -> Result<()> {
        for &id in &self.order {
            let layer = &mut self.layers[id.0];
            layer.setup_edges()?;
            if reset_weights || !layer.initialized() {
                layer.init_weight_with(&mut self.rng);
            }
        }
        Ok(())
    }

    /// Re-initializes every parameter.
    pub fn init_weight(&mut self) -> Result<()> {
        self.setup(true)
    }

    /// Runs the forward pass over `inputs` and returns the output batch.
    pub fn fprop(&mut self, inputs: &[Vec<Float>]) -> Result<Tensor> {
        self.setup(false)?;
        self.input_layer()?.in_edge(0)?.borrow_mut().load_samples(inputs)?;
        for &id in &self.order {
            self.layers[id.0].forward()?;
        }
        let out = self.output_layer()?.out_edge(0)?;
        let data = out.borrow().data().clone();
        Ok(data)
    }

    /// Seeds the output gradient with `∂loss/∂y` and runs the backward pass
    /// in reverse execution order. Parameter gradients accumulate.
    pub fn bprop(&mut self, loss: Loss, outputs: &Tensor, targets: &[Vec<Float>]) -> Result<()> {
        {
            let out = self.output_layer()?.out_edge(0)?;
            let mut out = out.borrow_mut();
            for ((g, y), t) in out.grad_mut().samples_mut().iter_mut().zip(outputs.iter()).zip(targets) {
                g.copy_from_slice(&loss.gradient(y, t));
            }
        }
        for &id in self.order.iter().rev() {
            self.layers[id.0].backward()?;
        }
        Ok(())
    }

    /// Output for a single sample.
    pub fn predict(&mut self, input: &[Float]) -> Result<Vec<Float>> {
        let out = self.fprop(&[input.to_vec()])?;
        Ok(out.into_samples().into_iter().next().unwrap_or_default())
    }

    /// Outputs for a batch of samples.
    pub fn predict_batch(&mut self, inputs: &[Vec<Float>]) -> Result<Tensor> {
        self.fprop(inputs)
    }

    /// Index of the largest output.
    pub fn predict_label(&mut self, input: &[Float]) -> Result<usize> {
        let out = self.predict(input)?;
        Ok(out
            .iter()
            .enumerate()
            .fold((0, Float::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
            .0)
    }

    /// Summed loss over every sample.
    pub fn get_loss(&mut self, loss: Loss, inputs: &[Vec<Float>], targets: &[Vec<Float>]) -> Result<f64> {
        if inputs.len() != targets.len() {
            return Err(NnError::DataMismatch(format!(
                "{} inputs but {} targets",
                inputs.len(),
                targets.len()
            )));
        }
        let out = self.fprop(inputs)?;
        Ok(out
            .iter()
            .zip(targets)
            .map(|(y, t)| f64::from(loss.f(y, t)))
            .sum())
    }

    /// Classifies every input and compares with `labels`.
    pub fn test(&mut self, inputs: &[Vec<Float>], labels: &[usize]) -> Result<TestResult> {
        if inputs.len() != labels.len() {
            return Err(NnError::DataMismatch(format!(
                "{} inputs but {} labels",
                inputs.len(),
                labels.len()
            )));
        }
        let mut result = TestResult::default();
        for (x, &label) in inputs.iter().zip(labels) {
            let predicted = self.predict_label(x)?;
            result.insert(predicted, label);
        }
        Ok(result)
    }

    /// One-hot style target for `label`, using the output activation's
    /// target range.
    pub fn label2vec(&self, label: usize) -> Result<Vec<Float>> {
        let out = self.output_layer()?;
        let size = out.out_data_size();
        if label >= size {
            return Err(NnError::DataMismatch(format!(
                "label {label} out of range for {size} outputs"
            )));
        }
        let (lo, hi) = out.activation().scale();
        let mut t = vec![lo; size];
        t[label] = hi;
        Ok(t)
    }

    fn check_training_data(&self, inputs: &[Vec<Float>], targets: &[Vec<Float>]) -> Result<()> {
        let (in_size, out_size) = (self.in_data_size()?, self.out_data_size()?);
        if inputs.len() != targets.len() {
            return Err(NnError::DataMismatch(format!(
                "{} inputs but {} targets",
                inputs.len(),
                targets.len()
            )));
        }
        if let Some(i) = inputs.iter().position(|x| x.len() != in_size) {
            return Err(NnError::DataMismatch(format!(
                "input {i} has {} values, network expects {in_size}",
                inputs[i].len()
            )));
        }
        if let Some(i) = targets.iter().position(|t| t.len() != out_size) {
            return Err(NnError::DataMismatch(format!(
                "target {i} has {} values, network outputs {out_size}",
                targets[i].len()
            )));
        }
        Ok(())
    }

    /// Trains with minibatches.
    ///
    /// `on_batch` runs after every optimizer step and `on_epoch` after every
    /// epoch; both may call [`Network::stop_ongoing_training`].
    ///
    /// Returns `Ok(false)` when the weights became non-finite, in which case
    /// training stops at that minibatch.
    #[allow(clippy::too_many_arguments)]
    pub fn train<B, E>(
        &mut self,
        optimizer: &mut dyn Optimizer,
        loss: Loss,
        inputs: &[Vec<Float>],
        targets: &[Vec<Float>],
        config: &TrainConfig,
        mut on_batch: B,
        mut on_epoch: E,
    ) -> Result<bool>
    where
        B: FnMut(&mut Self),
        E: FnMut(&mut Self, usize),
    {
        if config.batch_size == 0 {
            return Err(NnError::Config("batch size must be non-zero".into()));
        }
        self.check_training_data(inputs, targets)?;
        self.setup(config.reset_weights)?;
        for &id in &self.order {
            self.layers[id.0].set_worker_count(config.n_workers.max(1));
        }
        optimizer.reset();
        self.stop = false;

        log::info!(
            "training on {} samples: {} epochs, batch {}, {} workers",
            inputs.len(),
            config.epochs,
            config.batch_size,
            config.n_workers.max(1)
        );

        for epoch in 0..config.epochs {
            if self.stop {
                break;
            }
            if optimizer.requires_hessian() {
                self.calc_hessian(loss, inputs, config.hessian_samples)?;
            }
            for (batch_in, batch_t) in inputs.chunks(config.batch_size).zip(targets.chunks(config.batch_size)) {
                self.train_once(optimizer, loss, batch_in, batch_t)?;
                if self.is_exploded() {
                    log::warn!("weights exploded during epoch {epoch}, training stopped");
                    return Ok(false);
                }
                on_batch(&mut *self);
                if self.stop {
                    break;
                }
            }
            log::info!("epoch {} of {} done", epoch + 1, config.epochs);
            on_epoch(&mut *self, epoch);
        }
        Ok(true)
    }

    /// [`Network::train`] without callbacks.
    pub fn fit(
        &mut self,
        optimizer: &mut dyn Optimizer,
        loss: Loss,
        inputs: &[Vec<Float>],
        targets: &[Vec<Float>],
        config: &TrainConfig,
    ) -> Result<bool> {
        self.train(optimizer, loss, inputs, targets, config, |_| {}, |_, _| {})
    }

    /// Trains a classifier from integer labels.
    pub fn train_labels(
        &mut self,
        optimizer: &mut dyn Optimizer,
        loss: Loss,
        inputs: &[Vec<Float>],
        labels: &[usize],
        config: &TrainConfig,
    ) -> Result<bool> {
        let targets = labels
            .iter()
            .map(|&l| self.label2vec(l))
            .collect::<Result<Vec<_>>>()?;
        self.fit(optimizer, loss, inputs, &targets, config)
    }

    /// Requests that [`Network::train`] return after the current minibatch.
    pub fn stop_ongoing_training(&mut self) {
        self.stop = true;
    }

    fn train_once(
        &mut self,
        optimizer: &mut dyn Optimizer,
        loss: Loss,
        inputs: &[Vec<Float>],
        targets: &[Vec<Float>],
    ) -> Result<()> {
        let outputs = self.fprop(inputs)?;
        self.bprop(loss, &outputs, targets)?;
        for &id in &self.order {
            self.layers[id.0].update_weight(optimizer, inputs.len())?;
        }
        Ok(())
    }

    /// Mean Hessian diagonal over the first `max_samples` inputs.
    ///
    /// The output edge is seeded with the target maximum. The output layer
    /// applies `f'` once under a canonical activation/loss link and `f'²`
    /// otherwise; hidden layers always apply `f'²`.
    pub fn calc_hessian(&mut self, loss: Loss, inputs: &[Vec<Float>], max_samples: usize) -> Result<()> {
        let count = inputs.len().min(max_samples);
        let output = self.output.ok_or_else(|| NnError::Graph("network has no layers".into()))?;
        for layer in &self.layers {
            layer.clear_hessian();
        }

        let out_act = self.layer(output)?.activation();
        let seed = out_act.scale().1;
        let tail = if loss.is_canonical_link(out_act) {
            Curvature::Linear
        } else {
            Curvature::Squared
        };

        for sample in &inputs[..count] {
            self.fprop(std::slice::from_ref(sample))?;
            for &id in &self.order {
                let layer = &self.layers[id.0];
                layer.in_edge(0)?.borrow_mut().clear_hessian();
                layer.out_edge(0)?.borrow_mut().clear_hessian();
            }
            self.layer(output)?.out_edge(0)?.borrow_mut().hessian_mut().fill(seed);

            for &id in self.order.iter().rev() {
                let curvature = if id == output { tail } else { Curvature::Squared };
                self.layers[id.0].backward_2nd(curvature)?;
            }
        }

        for layer in &self.layers {
            layer.divide_hessian(count);
        }
        log::debug!("hessian diagonal estimated from {count} samples");
        Ok(())
    }

    /// Whether any parameter is NaN or infinite.
    pub fn is_exploded(&self) -> bool {
        self.layers
            .iter()
            .any(|l| l.weights().iter().any(|w| w.iter().any(|v| !v.is_finite())))
    }

    /// Summed (not averaged) gradient of the loss over every sample with
    /// respect to every parameter vector, in layer order.
    pub fn gradients(&mut self, loss: Loss, inputs: &[Vec<Float>], targets: &[Vec<Float>]) -> Result<Vec<Vec<Float>>> {
        self.check_training_data(inputs, targets)?;
        self.setup(false)?;
        for &id in &self.order {
            let layer = &self.layers[id.0];
            layer.set_worker_count(1);
            layer.clear_param_grads();
        }
        let outputs = self.fprop(inputs)?;
        self.bprop(loss, &outputs, targets)?;

        let mut grads = Vec::new();
        for &id in &self.order {
            for e in self.layers[id.0].param_edges() {
                grads.push(e.borrow().grad()[0].to_vec());
            }
        }
        for layer in &self.layers {
            layer.clear_param_grads();
        }
        Ok(grads)
    }

    /// Compares backpropagated gradients with central differences of the
    /// summed loss. Returns `Ok(false)` when any difference exceeds `eps`.
    pub fn gradient_check(
        &mut self,
        loss: Loss,
        inputs: &[Vec<Float>],
        targets: &[Vec<Float>],
        eps: Float,
        mode: GradCheckMode,
    ) -> Result<bool> {
        let analytic = self.gradients(loss, inputs, targets)?;
        let h = Float::EPSILON.sqrt();

        let mut edges = Vec::new();
        for &id in &self.order {
            edges.extend(self.layers[id.0].param_edges());
        }

        for (edge, grad) in edges.iter().zip(&analytic) {
            let len = grad.len();
            let positions: Vec<usize> = match mode {
                GradCheckMode::All => (0..len).collect(),
                GradCheckMode::Random if len == 0 => Vec::new(),
                GradCheckMode::Random => (0..RANDOM_CHECKS).map(|_| self.rng.random_range(0..len)).collect(),
            };

            for k in positions {
                let prev = edge.borrow().data()[0][k];
                edge.borrow_mut().data_mut()[0][k] = prev + h;
                let plus = self.get_loss(loss, inputs, targets)?;
                edge.borrow_mut().data_mut()[0][k] = prev - h;
                let minus = self.get_loss(loss, inputs, targets)?;
                edge.borrow_mut().data_mut()[0][k] = prev;

                let numeric = ((plus - minus) / (2.0 * f64::from(h))) as Float;
                let diff = (numeric - grad[k]).abs();
                if diff > eps {
                    log::warn!(
                        "gradient check failed at index {k}: analytic {}, numeric {numeric}",
                        grad[k]
                    );
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Whether both networks have the same number of parameters and every
    /// pair differs by at most `eps`.
    pub fn has_same_weights(&self, other: &Network, eps: Float) -> bool {
        let mine: Vec<Vec<Float>> = self.params().into_iter().map(|p| p.data).collect();
        let theirs: Vec<Vec<Float>> = other.params().into_iter().map(|p| p.data).collect();
        mine.len() == theirs.len()
            && mine.iter().zip(&theirs).all(|(a, b)| {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() <= eps)
            })
    }

    fn params(&self) -> Vec<ParamTensor> {
        let mut out = Vec::new();
        for &id in &self.order {
            for e in self.layers[id.0].param_edges() {
                let e = e.borrow();
                let s = e.shape();
                out.push(ParamTensor {
                    shape: vec![s.depth, s.height, s.width],
                    data: e.data()[0].to_vec(),
                });
            }
        }
        out
    }

    /// Writes every layer's parameters as text, in execution order.
    pub fn save_text<W: Write>(&self, writer: &mut W) -> Result<()> {
        for &id in &self.order {
            self.layers[id.0].save(writer)?;
        }
        Ok(())
    }

    /// Reads parameters written by [`Network::save_text`].
    pub fn load_text<R: BufRead>(&mut self, reader: &mut R) -> Result<()> {
        for &id in &self.order {
            self.layers[id.0].load(reader)?;
        }
        Ok(())
    }

    /// Saves all parameters to a `.bpat` file.
    pub fn save<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.setup(false)?;
        modelio::save_model(path, &self.params())
    }

    /// Loads parameters saved by [`Network::save`] into a network of the
    /// same architecture.
    ///
    /// # Errors
    /// [`NnError::Format`] when the file holds a different number or size of
    /// parameter vectors; nothing is modified in that case.
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let tensors = modelio::load_model(path)?;
        self.setup(false)?;
        let mut edges = Vec::new();
        for &id in &self.order {
            edges.extend(self.layers[id.0].param_edges());
        }
        if edges.len() != tensors.len() {
            return Err(NnError::Format(format!(
                "file holds {} parameter vectors, network has {}",
                tensors.len(),
                edges.len()
            )));
        }
        for (e, t) in edges.iter().zip(&tensors) {
            let expected = e.borrow().data().sample_len();
            if t.data.len() != expected {
                return Err(NnError::Format(format!(
                    "parameter vector of {} values where {expected} are expected",
                    t.data.len()
                )));
            }
        }
        for (e, t) in edges.iter().zip(tensors) {
            e.borrow_mut().data_mut()[0].copy_from_slice(&t.data);
        }
        Ok(())
    }
}
