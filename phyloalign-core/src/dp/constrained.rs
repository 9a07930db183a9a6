use rand::Rng;
use tracing::debug;

use super::{DpArray, DpEngine};
use crate::config::DpConfig;
use crate::error::{PhyloError, PhyloResult};
use crate::prob::LogDouble;

/// A [`DpArray`] whose candidate states are restricted per position.
///
/// Position 0 starts out allowing every silent state; emitting positions
/// start out empty and must be filled before [`forward`](Self::forward).
#[derive(Clone, Debug)]
pub struct DpArrayConstrained {
    inner: DpArray,
}

impl DpArrayConstrained {
    pub fn new(engine: DpEngine, length: usize, config: DpConfig) -> Self {
        let silent = engine.silent_states().to_vec();
        let mut inner = DpArray::new(engine, length, config);
        let mut allowed = vec![Vec::new(); length + 1];
        allowed[0] = silent;
        inner.allowed = Some(allowed);
        Self { inner }
    }

    pub fn engine(&self) -> &DpEngine {
        self.inner.engine()
    }

    pub fn size(&self) -> usize {
        self.inner.size()
    }

    pub fn allowed(&self, i: usize) -> &[usize] {
        self.inner.states_at(i)
    }

    fn allowed_mut(&mut self) -> &mut Vec<Vec<usize>> {
        self.inner
            .allowed
            .as_mut()
            .expect("constrained array always carries allowed lists")
    }

    pub fn set_allowed(&mut self, i: usize, mut states: Vec<usize>) {
        states.sort_unstable();
        states.dedup();
        self.allowed_mut()[i] = states;
    }

    /// Adds every silent state to every position.
    pub fn allow_silent_everywhere(&mut self) {
        let silent = self.inner.engine().silent_states().to_vec();
        for states in self.allowed_mut().iter_mut() {
            states.extend_from_slice(&silent);
            states.sort_unstable();
            states.dedup();
        }
    }

    /// Total number of (position, state) cells that will be computed.
    pub fn n_cells(&self) -> usize {
        (0..=self.size()).map(|i| self.allowed(i).len()).sum()
    }

    pub fn set_emissions(&mut self, emission: ndarray::Array2<f64>) -> PhyloResult<()> {
        self.inner.set_emissions(emission)
    }

    fn check_allowed(&self) -> PhyloResult<()> {
        let n = self.engine().n_states();
        for i in 0..=self.size() {
            let states = self.allowed(i);
            if let Some(&bad) = states.iter().find(|&&s| s >= n) {
                return Err(PhyloError::InvalidConfig {
                    msg: format!("allowed state {bad} at position {i} is out of range (n={n})"),
                });
            }
            if i > 0 && !states.iter().any(|&s| self.engine().emits(s)) {
                return Err(PhyloError::EmptyAllowedStates { pos: i });
            }
        }
        Ok(())
    }

    pub fn forward(&mut self) -> PhyloResult<()> {
        self.check_allowed()?;
        self.inner.forward();
        Ok(())
    }

    /// Removes allowed states that carry no forward or no backward mass,
    /// then recomputes the forward table. Must follow [`forward`](Self::forward).
    pub fn prune(&mut self) -> PhyloResult<()> {
        if self.pr_sum_all_paths().is_zero() {
            return Err(PhyloError::NoValidPath);
        }
        let before = self.n_cells();
        let bw = self.inner.backward();
        let pruned: Vec<Vec<usize>> = (0..=self.size())
            .map(|i| {
                self.allowed(i)
                    .iter()
                    .copied()
                    .filter(|&s| self.inner.cell(i, s) > 0.0 && bw.get(i, s) > 0.0)
                    .collect()
            })
            .collect();
        *self.allowed_mut() = pruned;
        debug!(before, after = self.n_cells(), "pruned dead-end states");
        self.forward()
    }

    pub fn cell(&self, i: usize, s: usize) -> f64 {
        self.inner.cell(i, s)
    }

    pub fn pr_sum_all_paths(&self) -> LogDouble {
        self.inner.pr_sum_all_paths()
    }

    pub fn sample_path<R: Rng + ?Sized>(&self, rng: &mut R) -> PhyloResult<Vec<usize>> {
        self.inner.sample_path(rng)
    }

    pub fn path_p(&self, path: &[usize]) -> LogDouble {
        self.inner.path_p(path)
    }

    pub fn path_sampling_p(&self, path: &[usize]) -> LogDouble {
        self.inner.path_sampling_p(path)
    }
}
