/// Dense (position x state) table with one base-2 scale exponent per
/// position: the true value of a cell is `stored * 2^scale(position)`.
#[derive(Clone, Debug, Default)]
pub struct StateArray {
    n_states: usize,
    data: Vec<f64>,
    scale: Vec<i32>,
}

impl StateArray {
    /// `positions` rows of `n_states` zeros.
    pub fn new(positions: usize, n_states: usize) -> Self {
        Self {
            n_states,
            data: vec![0.0; positions * n_states],
            scale: vec![0; positions],
        }
    }

    pub fn resize(&mut self, positions: usize, n_states: usize) {
        self.n_states = n_states;
        self.data.clear();
        self.data.resize(positions * n_states, 0.0);
        self.scale.clear();
        self.scale.resize(positions, 0);
    }

    pub fn positions(&self) -> usize {
        self.scale.len()
    }

    pub fn n_states(&self) -> usize {
        self.n_states
    }

    #[inline]
    pub fn get(&self, i: usize, s: usize) -> f64 {
        self.data[i * self.n_states + s]
    }

    #[inline]
    pub fn set(&mut self, i: usize, s: usize, v: f64) {
        self.data[i * self.n_states + s] = v;
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.n_states..(i + 1) * self.n_states]
    }

    pub fn row_mut(&mut self, i: usize) -> &mut [f64] {
        &mut self.data[i * self.n_states..(i + 1) * self.n_states]
    }

    #[inline]
    pub fn scale(&self, i: usize) -> i32 {
        self.scale[i]
    }

    pub fn set_scale(&mut self, i: usize, e: i32) {
        self.scale[i] = e;
    }
}
