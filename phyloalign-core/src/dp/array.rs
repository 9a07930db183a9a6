use std::collections::HashMap;
use std::sync::Arc;

use ndarray::Array2;
use rand::distributions::{Distribution as _, WeightedIndex};
use rand::Rng;
use tracing::trace;

use super::kernels::{dot, scale_by_pow2};
use super::{DpEngine, StateArray};
use crate::config::DpConfig;
use crate::error::{PhyloError, PhyloResult};
use crate::prob::LogDouble;

/// Forward table over positions `0..=length`.
///
/// Position 0 holds only silent states reached before the first
/// emission; position `i >= 1` holds the states that emit column `i`
/// plus any silent states visited before column `i + 1`.
#[derive(Clone, Debug)]
pub struct DpArray {
    engine: DpEngine,
    length: usize,
    cells: StateArray,
    emission: Option<Array2<f64>>,
    config: DpConfig,
    all_states: Vec<usize>,
    pub(super) allowed: Option<Vec<Vec<usize>>>,
    closures: HashMap<Vec<usize>, Arc<Array2<f64>>>,
}

impl DpArray {
    pub fn new(engine: DpEngine, length: usize, config: DpConfig) -> Self {
        let n = engine.n_states();
        Self {
            length,
            cells: StateArray::new(length + 1, n),
            emission: None,
            config,
            all_states: (0..n).collect(),
            allowed: None,
            closures: HashMap::new(),
            engine,
        }
    }

    pub fn engine(&self) -> &DpEngine {
        &self.engine
    }

    pub fn config(&self) -> &DpConfig {
        &self.config
    }

    /// Number of emitting positions.
    pub fn size(&self) -> usize {
        self.length
    }

    /// Clears the table for a new length. Emission weights are dropped.
    pub fn set_length(&mut self, length: usize) {
        self.length = length;
        self.cells.resize(length + 1, self.engine.n_states());
        self.emission = None;
        if let Some(allowed) = self.allowed.as_mut() {
            allowed.resize(length + 1, Vec::new());
        }
    }

    /// Per-position emission weights, `length x n_states`; row `i - 1`
    /// belongs to position `i`.
    pub fn set_emissions(&mut self, emission: Array2<f64>) -> PhyloResult<()> {
        let (rows, cols) = (self.length, self.engine.n_states());
        if emission.nrows() != rows || emission.ncols() != cols {
            return Err(PhyloError::EmissionShape {
                rows,
                cols,
                got_rows: emission.nrows(),
                got_cols: emission.ncols(),
            });
        }
        self.emission = Some(emission);
        Ok(())
    }

    #[inline]
    pub fn cell(&self, i: usize, s: usize) -> f64 {
        self.cells.get(i, s)
    }

    #[inline]
    pub fn scale(&self, i: usize) -> i32 {
        self.cells.scale(i)
    }

    pub(super) fn states_at(&self, i: usize) -> &[usize] {
        match &self.allowed {
            Some(allowed) => &allowed[i],
            None => &self.all_states,
        }
    }

    fn is_allowed(&self, i: usize, s: usize) -> bool {
        match &self.allowed {
            Some(allowed) => allowed[i].binary_search(&s).is_ok(),
            None => s < self.engine.n_states(),
        }
    }

    #[inline]
    fn emission_weight(&self, i: usize, s: usize) -> f64 {
        match &self.emission {
            None => 1.0,
            Some(e) => {
                let w = e[[i - 1, s]];
                if self.config.beta == 1.0 {
                    w
                } else {
                    w.powf(self.config.beta)
                }
            }
        }
    }

    fn closure(&mut self, subset: &[usize]) -> Arc<Array2<f64>> {
        if let Some(c) = self.closures.get(subset) {
            return c.clone();
        }
        let c = Arc::new(self.engine.closure_for(subset));
        self.closures.insert(subset.to_vec(), c.clone());
        c
    }

    pub fn forward(&mut self) {
        for i in 0..=self.length {
            self.forward_position(i);
        }
        trace!(
            length = self.length,
            log_total = self.pr_sum_all_paths().ln(),
            "forward"
        );
    }

    fn forward_position(&mut self, i: usize) {
        let states = self.states_at(i).to_vec();
        self.cells.row_mut(i).fill(0.0);
        let base_scale = if i == 0 { 0 } else { self.cells.scale(i - 1) };

        if i > 0 {
            for &s in &states {
                if !self.engine.emits(s) {
                    continue;
                }
                let mut sum = if self.allowed.is_none() {
                    dot(self.cells.row(i - 1), self.engine.q_into(s))
                } else {
                    self.states_at(i - 1)
                        .iter()
                        .map(|&p| self.cells.get(i - 1, p) * self.engine.q(p, s))
                        .sum()
                };
                if i == 1 {
                    sum += self.engine.start_p(s);
                }
                let v = sum * self.emission_weight(i, s);
                self.cells.set(i, s, v);
            }
        }

        let silent: Vec<usize> = states
            .iter()
            .copied()
            .filter(|&s| self.engine.is_silent(s))
            .collect();
        if !silent.is_empty() {
            let inflow: Vec<f64> = silent
                .iter()
                .map(|&z| {
                    let mut v: f64 = states
                        .iter()
                        .filter(|&&s| self.engine.emits(s))
                        .map(|&s| self.cells.get(i, s) * self.engine.q(s, z))
                        .sum();
                    if i == 0 {
                        v += self.engine.start_p(z);
                    }
                    v
                })
                .collect();
            let c = self.closure(&silent);
            for (k, &z) in silent.iter().enumerate() {
                let v: f64 = inflow.iter().enumerate().map(|(j, b)| b * c[[j, k]]).sum();
                self.cells.set(i, z, v);
            }
        }

        let mut scale = base_scale;
        if self.config.rescale && i > 0 {
            let max = states
                .iter()
                .map(|&s| self.cells.get(i, s))
                .fold(0.0, f64::max);
            if max > 0.0 && max.is_finite() {
                let e = max.log2().floor() as i32 + 1;
                scale_by_pow2(self.cells.row_mut(i), -e);
                scale += e;
            }
        }
        self.cells.set_scale(i, scale);
    }

    /// Backward masses, rescaled per position. Only used to find dead
    /// ends, so the scale exponents are not tracked.
    pub(super) fn backward(&mut self) -> StateArray {
        let n = self.engine.n_states();
        let end = self.engine.end_state();
        let mut bw = StateArray::new(self.length + 1, n);

        for i in (0..=self.length).rev() {
            let states = self.states_at(i).to_vec();
            let outflow = |s: usize, bw: &StateArray| -> f64 {
                if i == self.length {
                    return self.engine.q(s, end);
                }
                self.states_at(i + 1)
                    .iter()
                    .filter(|&&s2| self.engine.emits(s2))
                    .map(|&s2| {
                        self.engine.q(s, s2) * self.emission_weight(i + 1, s2) * bw.get(i + 1, s2)
                    })
                    .sum()
            };

            let silent: Vec<usize> = states
                .iter()
                .copied()
                .filter(|&s| self.engine.is_silent(s))
                .collect();
            let direct: Vec<f64> = silent.iter().map(|&z| outflow(z, &bw)).collect();
            let emitting: Vec<(usize, f64)> = states
                .iter()
                .copied()
                .filter(|&s| self.engine.emits(s))
                .map(|s| (s, outflow(s, &bw)))
                .collect();

            if !silent.is_empty() {
                let c = self.closure(&silent);
                for (k, &z) in silent.iter().enumerate() {
                    let v: f64 = direct.iter().enumerate().map(|(j, d)| c[[k, j]] * d).sum();
                    bw.set(i, z, v);
                }
            }
            for (s, v) in emitting {
                let via_silent: f64 = silent
                    .iter()
                    .map(|&z| self.engine.q(s, z) * bw.get(i, z))
                    .sum();
                bw.set(i, s, v + via_silent);
            }

            let max = bw.row(i).iter().copied().fold(0.0, f64::max);
            if max > 0.0 && max.is_finite() {
                let e = max.log2().floor() as i32 + 1;
                scale_by_pow2(bw.row_mut(i), -e);
            }
        }
        bw
    }

    /// Total probability of all paths, i.e. the forward mass flowing into
    /// the end state.
    pub fn pr_sum_all_paths(&self) -> LogDouble {
        let end = self.engine.end_state();
        let l = self.length;
        let mut total: f64 = self
            .states_at(l)
            .iter()
            .map(|&s| self.cells.get(l, s) * self.engine.q(s, end))
            .sum();
        if l == 0 {
            total += self.engine.start_p(end);
        }
        LogDouble::new(total) * LogDouble::pow2(self.cells.scale(l))
    }

    /// Draws a path from the posterior over paths by stochastic
    /// traceback. The end state is not included.
    pub fn sample_path<R: Rng + ?Sized>(&self, rng: &mut R) -> PhyloResult<Vec<usize>> {
        let end = self.engine.end_state();
        let l = self.length;

        let mut candidates: Vec<Option<usize>> = Vec::new();
        let mut weights: Vec<f64> = Vec::new();
        for &s in self.states_at(l) {
            candidates.push(Some(s));
            weights.push(self.cells.get(l, s) * self.engine.q(s, end));
        }
        if l == 0 {
            candidates.push(None);
            weights.push(self.engine.start_p(end));
        }
        let total: f64 = weights.iter().sum();
        if total.is_nan() || total <= 0.0 {
            return Err(PhyloError::NoValidPath);
        }

        let mut path = Vec::new();
        let mut i = l;
        let mut current = candidates[choose(&weights, rng, l, end)];
        while let Some(s) = current {
            path.push(s);
            candidates.clear();
            weights.clear();

            let pos = if self.engine.emits(s) { i - 1 } else { i };
            for &p in self.states_at(pos) {
                candidates.push(Some(p));
                weights.push(self.cells.get(pos, p) * self.engine.q(p, s));
            }
            if pos == 0 && (self.engine.emits(s) || i == 0) {
                candidates.push(None);
                weights.push(self.engine.start_p(s));
            }
            current = candidates[choose(&weights, rng, i, s)];
            i = pos;
        }
        path.reverse();
        Ok(path)
    }

    /// Joint probability of `path` (start, transitions, heated emissions
    /// and the final transition into the end state). Paths that are not
    /// legal under this table have probability zero.
    pub fn path_p(&self, path: &[usize]) -> LogDouble {
        let n = self.engine.n_states();
        let end = self.engine.end_state();
        let mut pr = LogDouble::ONE;
        let mut i = 0usize;
        let mut prev: Option<usize> = None;

        for &s in path {
            if s >= n {
                return LogDouble::ZERO;
            }
            if self.engine.emits(s) {
                i += 1;
                if i > self.length {
                    return LogDouble::ZERO;
                }
            }
            if !self.is_allowed(i, s) {
                return LogDouble::ZERO;
            }
            let t = match prev {
                None => self.engine.start_p(s),
                Some(p) => self.engine.q(p, s),
            };
            pr *= LogDouble::new(t);
            if self.engine.emits(s) {
                pr *= LogDouble::new(self.emission_weight(i, s));
            }
            prev = Some(s);
        }
        if i != self.length {
            return LogDouble::ZERO;
        }
        let t = match prev {
            None => self.engine.start_p(end),
            Some(p) => self.engine.q(p, end),
        };
        pr * LogDouble::new(t)
    }

    /// Probability that [`DpArray::sample_path`] returns `path`.
    pub fn path_sampling_p(&self, path: &[usize]) -> LogDouble {
        self.path_p(path) / self.pr_sum_all_paths()
    }
}

fn choose<R: Rng + ?Sized>(weights: &[f64], rng: &mut R, pos: usize, to: usize) -> usize {
    match WeightedIndex::new(weights) {
        Ok(dist) => dist.sample(rng),
        Err(e) => panic!(
            "sample_path: no probability mass into state {to} at position {pos} ({e}); forward table is inconsistent"
        ),
    }
}
