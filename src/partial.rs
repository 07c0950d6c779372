//! Partial-connection engine.
//!
//! One sparse, weight-tied linear map shared by every layer kind. A layer
//! builder declares each nonzero term with [`PartialConnected::connect_weight`]
//! and [`PartialConnected::connect_bias`]; the engine keeps three mutually
//! consistent adjacency views so each pass can walk the view that makes its
//! loop write-local:
//!
//! | pass                  | loop over | view        |
//! |-----------------------|-----------|-------------|
//! | forward               | outputs   | `out2wi`    |
//! | input gradient        | inputs    | `in2wo`     |
//! | weight gradient       | weights   | `weight2io` |
//! | bias gradient         | biases    | `bias2out`  |
//!
//! Every weighted contribution is multiplied by a uniform `scale_factor`
//! (`1 / pool_area` for average pooling, `1` otherwise).
//!
//! Fully connected layers also carry a [`Connectivity::Dense`] hint: their
//! weight `i * out + o` joins input `i` to output `o`, so the same maps can be
//! evaluated with contiguous `dot`/`muladd` kernels instead of gathers.

use crate::error::{NnError, Result};
use crate::ops::VectorKernels;
use crate::ops::dispatch::Kernels;
use crate::parallel;
use crate::tensors::Float;

/// `(input, output)` pairs sharing one weight.
pub type IoConnections = Vec<(usize, usize)>;
/// `(weight, input)` pairs feeding one output.
pub type WiConnections = Vec<(usize, usize)>;
/// `(weight, output)` pairs fed by one input.
pub type WoConnections = Vec<(usize, usize)>;

/// Outputs computed per task when a single sample is split across threads.
const OUTPUT_GRAIN: usize = 256;

/// Layout hint selecting the arithmetic path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    /// Walk the adjacency lists.
    Sparse,
    /// Weight `i * out + o` connects input `i` to output `o`, bias `o` feeds
    /// output `o`.
    Dense,
}

/// Sparse adjacency plus the arithmetic over it.
#[derive(Debug, Clone)]
pub struct PartialConnected {
    in_size: usize,
    out_size: usize,
    weight2io: Vec<IoConnections>,
    out2wi: Vec<WiConnections>,
    in2wo: Vec<WoConnections>,
    bias2out: Vec<Vec<usize>>,
    out2bias: Vec<Option<usize>>,
    scale_factor: Float,
    connectivity: Connectivity,
}

impl PartialConnected {
    /// Empty adjacency over the given index spaces.
    pub fn new(in_size: usize, out_size: usize, weight_size: usize, bias_size: usize) -> Self {
        Self {
            in_size,
            out_size,
            weight2io: vec![Vec::new(); weight_size],
            out2wi: vec![Vec::new(); out_size],
            in2wo: vec![Vec::new(); in_size],
            bias2out: vec![Vec::new(); bias_size],
            out2bias: vec![None; out_size],
            scale_factor: 1.0,
            connectivity: Connectivity::Sparse,
        }
    }

    /// Dense `in_size → out_size` map, optionally with one bias per output.
    pub fn dense(in_size: usize, out_size: usize, has_bias: bool) -> Self {
        let mut pc = Self::new(
            in_size,
            out_size,
            in_size * out_size,
            if has_bias { out_size } else { 0 },
        );
        for i in 0..in_size {
            for o in 0..out_size {
                let w = i * out_size + o;
                pc.weight2io[w].push((i, o));
                pc.out2wi[o].push((w, i));
                pc.in2wo[i].push((w, o));
            }
        }
        if has_bias {
            for o in 0..out_size {
                pc.bias2out[o].push(o);
                pc.out2bias[o] = Some(o);
            }
        }
        pc.connectivity = Connectivity::Dense;
        pc
    }

    /// Declares that `weight_index` scales input `input_index` into output
    /// `output_index`.
    pub fn connect_weight(
        &mut self,
        input_index: usize,
        output_index: usize,
        weight_index: usize,
    ) -> Result<()> {
        check_index("input", input_index, self.in_size)?;
        check_index("output", output_index, self.out_size)?;
        check_index("weight", weight_index, self.weight2io.len())?;

        self.weight2io[weight_index].push((input_index, output_index));
        self.out2wi[output_index].push((weight_index, input_index));
        self.in2wo[input_index].push((weight_index, output_index));
        self.connectivity = Connectivity::Sparse;
        Ok(())
    }

    /// Declares that bias `bias_index` offsets output `output_index`.
    pub fn connect_bias(&mut self, bias_index: usize, output_index: usize) -> Result<()> {
        check_index("bias", bias_index, self.bias2out.len())?;
        check_index("output", output_index, self.out_size)?;

        if let Some(old) = self.out2bias[output_index].replace(bias_index) {
            self.bias2out[old].retain(|&o| o != output_index);
        }
        self.bias2out[bias_index].push(output_index);
        Ok(())
    }

    pub fn set_scale_factor(&mut self, scale: Float) {
        self.scale_factor = scale;
    }

    pub fn scale_factor(&self) -> Float {
        self.scale_factor
    }

    pub fn connectivity(&self) -> Connectivity {
        self.connectivity
    }

    pub fn in_size(&self) -> usize {
        self.in_size
    }

    pub fn out_size(&self) -> usize {
        self.out_size
    }

    pub fn weight_size(&self) -> usize {
        self.weight2io.len()
    }

    pub fn bias_size(&self) -> usize {
        self.bias2out.len()
    }

    pub fn weight2io(&self) -> &[IoConnections] {
        &self.weight2io
    }

    pub fn out2wi(&self) -> &[WiConnections] {
        &self.out2wi
    }

    pub fn in2wo(&self) -> &[WoConnections] {
        &self.in2wo
    }

    pub fn bias2out(&self) -> &[Vec<usize>] {
        &self.bias2out
    }

    pub fn out2bias(&self) -> &[Option<usize>] {
        &self.out2bias
    }

    /// Weight and bias slots that take part in at least one connection.
    pub fn param_size(&self) -> usize {
        self.weight2io.iter().filter(|w| !w.is_empty()).count()
            + self.bias2out.iter().filter(|b| !b.is_empty()).count()
    }

    /// Number of weighted and bias terms.
    pub fn connection_size(&self) -> usize {
        self.weight2io.iter().map(Vec::len).sum::<usize>()
            + self.bias2out.iter().map(Vec::len).sum::<usize>()
    }

    pub fn fan_in_size(&self) -> usize {
        self.out2wi.iter().map(Vec::len).max().unwrap_or(0)
    }

    pub fn fan_out_size(&self) -> usize {
        self.in2wo.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// Checks that the three weight views and the two bias views describe the
    /// same connections.
    pub fn check_consistency(&self) -> Result<()> {
        let broken = |what: String| Err(NnError::Graph(format!("inconsistent adjacency: {what}")));

        let n_terms: usize = self.weight2io.iter().map(Vec::len).sum();
        if n_terms != self.out2wi.iter().map(Vec::len).sum::<usize>()
            || n_terms != self.in2wo.iter().map(Vec::len).sum::<usize>()
        {
            return broken("connection counts differ between views".into());
        }

        for (w, pairs) in self.weight2io.iter().enumerate() {
            for &(i, o) in pairs {
                if !self.out2wi.get(o).is_some_and(|c| c.contains(&(w, i))) {
                    return broken(format!("weight {w} ({i}->{o}) missing from out2wi"));
                }
                if !self.in2wo.get(i).is_some_and(|c| c.contains(&(w, o))) {
                    return broken(format!("weight {w} ({i}->{o}) missing from in2wo"));
                }
            }
        }

        for (b, outs) in self.bias2out.iter().enumerate() {
            for &o in outs {
                if self.out2bias.get(o).copied().flatten() != Some(b) {
                    return broken(format!("bias {b} -> output {o} missing from out2bias"));
                }
            }
        }
        for (o, b) in self.out2bias.iter().enumerate() {
            if let Some(b) = *b {
                if !self.bias2out.get(b).is_some_and(|outs| outs.contains(&o)) {
                    return broken(format!("output {o} -> bias {b} missing from bias2out"));
                }
            }
        }
        Ok(())
    }

    /// Drops weight slots without connections and renumbers the survivors
    /// densely, compacting `weights` to match. Returns the number of slots
    /// removed.
    pub fn remap(&mut self, weights: &mut Vec<Float>) -> Result<usize> {
        if weights.len() != self.weight2io.len() {
            return Err(NnError::DataMismatch(format!(
                "remap: {} weights for {} slots",
                weights.len(),
                self.weight2io.len()
            )));
        }

        let mut map = vec![None; self.weight2io.len()];
        let mut n = 0;
        for (slot, pairs) in map.iter_mut().zip(&self.weight2io) {
            if !pairs.is_empty() {
                *slot = Some(n);
                n += 1;
            }
        }
        let removed = self.weight2io.len() - n;
        if removed == 0 {
            return Ok(0);
        }

        let translate = |w: usize| map[w].ok_or(NnError::Index {
            kind: "remapped weight",
            index: w,
            size: n,
        });

        for wi in &mut self.out2wi {
            for (w, _) in wi.iter_mut() {
                *w = translate(*w)?;
            }
        }
        for wo in &mut self.in2wo {
            for (w, _) in wo.iter_mut() {
                *w = translate(*w)?;
            }
        }

        let old = std::mem::take(&mut self.weight2io);
        let mut compacted = Vec::with_capacity(n);
        self.weight2io = Vec::with_capacity(n);
        for ((pairs, w), slot) in old.into_iter().zip(weights.iter()).zip(&map) {
            if slot.is_some() {
                self.weight2io.push(pairs);
                compacted.push(*w);
            }
        }
        *weights = compacted;
        self.connectivity = Connectivity::Sparse;

        log::debug!("remap dropped {removed} unused weight slots, {n} remain");
        Ok(removed)
    }

    /// Pre-activation of one sample:
    /// `a[o] = bias[out2bias[o]] + scale * Σ W[w] * input[i]`.
    pub fn forward_sample(
        &self,
        kernels: &Kernels,
        input: &[Float],
        weights: &[Float],
        bias: Option<&[Float]>,
        a: &mut [Float],
    ) {
        match self.connectivity {
            Connectivity::Dense => {
                let out = self.out_size;
                match bias {
                    Some(b) if !self.bias2out.is_empty() => a.copy_from_slice(&b[..out]),
                    _ => a.fill(0.0),
                }
                for (i, &x) in input.iter().enumerate().take(self.in_size) {
                    kernels.muladd(&weights[i * out..(i + 1) * out], x * self.scale_factor, a);
                }
            }
            Connectivity::Sparse => self.forward_outputs(0, input, weights, bias, a),
        }
    }

    /// Same as [`Self::forward_sample`], splitting the outputs of one sample
    /// into chunks that run on the worker pool.
    pub fn forward_sample_chunked(
        &self,
        kernels: &Kernels,
        input: &[Float],
        weights: &[Float],
        bias: Option<&[Float]>,
        a: &mut [Float],
    ) {
        if self.connectivity == Connectivity::Dense || self.out_size <= OUTPUT_GRAIN {
            self.forward_sample(kernels, input, weights, bias, a);
            return;
        }
        parallel::for_each_chunk(a, OUTPUT_GRAIN, |offset, chunk| {
            self.forward_outputs(offset, input, weights, bias, chunk);
        });
    }

    fn forward_outputs(
        &self,
        offset: usize,
        input: &[Float],
        weights: &[Float],
        bias: Option<&[Float]>,
        a: &mut [Float],
    ) {
        for (k, ao) in a.iter_mut().enumerate() {
            let o = offset + k;
            let mut sum = 0.0;
            for &(w, i) in &self.out2wi[o] {
                sum += weights[w] * input[i];
            }
            sum *= self.scale_factor;
            if let (Some(b), Some(bi)) = (bias, self.out2bias[o]) {
                sum += b[bi];
            }
            *ao = sum;
        }
    }

    /// First-order backward pass for one sample.
    ///
    /// `delta` is the gradient with respect to this layer's pre-activation.
    /// Accumulates `scale * Σ W * delta` into `prev_grad` (the gradient with
    /// respect to the input values), the weight gradient into `dw` and the
    /// bias gradient into `db`.
    #[allow(clippy::too_many_arguments)]
    pub fn backward_sample(
        &self,
        kernels: &Kernels,
        prev_out: &[Float],
        weights: &[Float],
        delta: &[Float],
        prev_grad: &mut [Float],
        dw: &mut [Float],
        db: Option<&mut [Float]>,
    ) {
        let scale = self.scale_factor;
        match self.connectivity {
            Connectivity::Dense => {
                let out = self.out_size;
                for i in 0..self.in_size {
                    let row = i * out..(i + 1) * out;
                    prev_grad[i] += scale * kernels.dot(&weights[row.clone()], delta);
                    kernels.muladd(delta, prev_out[i] * scale, &mut dw[row]);
                }
                if let Some(db) = db {
                    if !self.bias2out.is_empty() {
                        kernels.add(delta, db);
                    }
                }
            }
            Connectivity::Sparse => {
                for (pg, wo) in prev_grad.iter_mut().zip(&self.in2wo) {
                    let mut sum = 0.0;
                    for &(w, o) in wo {
                        sum += weights[w] * delta[o];
                    }
                    *pg += sum * scale;
                }

                for (g, io) in dw.iter_mut().zip(&self.weight2io) {
                    let mut diff = 0.0;
                    for &(i, o) in io {
                        diff += prev_out[i] * delta[o];
                    }
                    *g += diff * scale;
                }

                if let Some(db) = db {
                    for (g, outs) in db.iter_mut().zip(&self.bias2out) {
                        *g += outs.iter().map(|&o| delta[o]).sum::<Float>();
                    }
                }
            }
        }
    }

    /// Second-order (Hessian diagonal) pass for one sample.
    ///
    /// `delta2` is the second-order delta with respect to this layer's
    /// pre-activation. Accumulates into the weight and bias Hessians and adds
    /// `scale² * Σ W² * delta2` into `prev_delta2`.
    pub fn backward_2nd_sample(
        &self,
        prev_out: &[Float],
        weights: &[Float],
        delta2: &[Float],
        prev_delta2: &mut [Float],
        w_hessian: &mut [Float],
        b_hessian: Option<&mut [Float]>,
    ) {
        let scale2 = self.scale_factor * self.scale_factor;

        for (h, io) in w_hessian.iter_mut().zip(&self.weight2io) {
            let mut diff = 0.0;
            for &(i, o) in io {
                diff += prev_out[i] * prev_out[i] * delta2[o];
            }
            *h += diff * scale2;
        }

        if let Some(bh) = b_hessian {
            for (h, outs) in bh.iter_mut().zip(&self.bias2out) {
                *h += outs.iter().map(|&o| delta2[o]).sum::<Float>();
            }
        }

        for (pd, wo) in prev_delta2.iter_mut().zip(&self.in2wo) {
            let mut sum = 0.0;
            for &(w, o) in wo {
                sum += weights[w] * weights[w] * delta2[o];
            }
            *pd += sum * scale2;
        }
    }
}

fn check_index(kind: &'static str, index: usize, size: usize) -> Result<()> {
    if index >= size {
        return Err(NnError::Index { kind, index, size });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tied() -> PartialConnected {
        // 1-D "convolution": 4 inputs, 3 outputs, window 2, one bias
        let mut pc = PartialConnected::new(4, 3, 2, 1);
        for o in 0..3 {
            pc.connect_weight(o, o, 0).unwrap();
            pc.connect_weight(o + 1, o, 1).unwrap();
            pc.connect_bias(0, o).unwrap();
        }
        pc
    }

    #[test]
    fn views_agree_after_construction() {
        let pc = tied();
        pc.check_consistency().unwrap();
        assert_eq!(pc.weight2io()[0], vec![(0, 0), (1, 1), (2, 2)]);
        assert_eq!(pc.out2wi()[1], vec![(0, 1), (1, 2)]);
        assert_eq!(pc.in2wo()[1], vec![(1, 0), (0, 1)]);
        assert_eq!(pc.fan_in_size(), 2);
        assert_eq!(pc.fan_out_size(), 2);
        assert_eq!(pc.param_size(), 3);
        assert_eq!(pc.connection_size(), 9);
    }

    #[test]
    fn out_of_range_connection_is_rejected() {
        let mut pc = PartialConnected::new(2, 2, 1, 1);
        assert!(matches!(
            pc.connect_weight(2, 0, 0),
            Err(NnError::Index { kind: "input", .. })
        ));
        assert!(pc.connect_bias(1, 0).is_err());
    }

    #[test]
    fn tied_weight_gradient_sums_positions() {
        let pc = tied();
        let k = Kernels::default();
        let x = [1.0, 2.0, 3.0, 4.0];
        let w = [0.5, -1.0];
        let delta = [1.0, 1.0, 1.0];
        let mut prev = [0.0; 4];
        let mut dw = [0.0; 2];
        let mut db = [0.0; 1];
        pc.backward_sample(&k, &x, &w, &delta, &mut prev, &mut dw, Some(&mut db));
        assert_eq!(dw, [6.0, 9.0]);
        assert_eq!(db, [3.0]);
        assert_eq!(prev, [0.5, -0.5, -0.5, -1.0]);
    }

    #[test]
    fn remap_drops_empty_slots() {
        let mut pc = PartialConnected::new(2, 2, 4, 0);
        pc.connect_weight(0, 0, 1).unwrap();
        pc.connect_weight(1, 1, 3).unwrap();
        let mut w = vec![10.0, 11.0, 12.0, 13.0];
        assert_eq!(pc.remap(&mut w).unwrap(), 2);
        assert_eq!(w, vec![11.0, 13.0]);
        assert_eq!(pc.out2wi()[1], vec![(1, 1)]);
        pc.check_consistency().unwrap();
    }

    #[test]
    fn dense_and_sparse_paths_agree() {
        let k = Kernels::default();
        let dense = PartialConnected::dense(3, 2, true);
        let mut sparse = PartialConnected::new(3, 2, 6, 2);
        for i in 0..3 {
            for o in 0..2 {
                sparse.connect_weight(i, o, i * 2 + o).unwrap();
            }
        }
        for o in 0..2 {
            sparse.connect_bias(o, o).unwrap();
        }
        let x = [0.3, -1.2, 2.0];
        let w = [0.1, 0.2, 0.3, -0.4, 0.5, 0.6];
        let b = [0.05, -0.05];

        let mut ad = [0.0; 2];
        let mut asp = [0.0; 2];
        dense.forward_sample(&k, &x, &w, Some(&b), &mut ad);
        sparse.forward_sample(&k, &x, &w, Some(&b), &mut asp);
        for (d, s) in ad.iter().zip(&asp) {
            assert!((d - s).abs() < 1e-6);
        }

        let delta = [0.7, -0.3];
        let (mut pd, mut ps) = ([0.0; 3], [0.0; 3]);
        let (mut wd, mut ws) = ([0.0; 6], [0.0; 6]);
        let (mut bd, mut bs) = ([0.0; 2], [0.0; 2]);
        dense.backward_sample(&k, &x, &w, &delta, &mut pd, &mut wd, Some(&mut bd));
        sparse.backward_sample(&k, &x, &w, &delta, &mut ps, &mut ws, Some(&mut bs));
        for (d, s) in pd.iter().chain(&wd).chain(&bd).zip(ps.iter().chain(&ws).chain(&bs)) {
            assert!((d - s).abs() < 1e-6);
        }
    }
}
