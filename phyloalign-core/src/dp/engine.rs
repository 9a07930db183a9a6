use ndarray::Array2;

use crate::error::{PhyloError, PhyloResult};
use crate::linalg;

const ROW_TOLERANCE: f64 = 1e-8;

/// State space and transition structure for a 1-D DP.
///
/// States `0..n` are either emitting (each consumes one position) or
/// silent. Index `n` is the end state. `start_p` has `n + 1` entries, the
/// last one being the probability of ending immediately.
#[derive(Clone, Debug)]
pub struct DpEngine {
    emits: Vec<bool>,
    start_p: Vec<f64>,
    q: Array2<f64>,
    // Transposed copy: column `s` of `q` is contiguous in row `s` here.
    qt: Array2<f64>,
    silent: Vec<usize>,
    silent_closure: Array2<f64>,
}

impl DpEngine {
    pub fn new(emits: Vec<bool>, start_p: Vec<f64>, q: Array2<f64>) -> PhyloResult<Self> {
        let n = emits.len();
        if q.nrows() != n + 1 || q.ncols() != n + 1 {
            return Err(PhyloError::TransitionShape {
                expected: n + 1,
                rows: q.nrows(),
                cols: q.ncols(),
            });
        }
        if start_p.len() != n + 1 {
            return Err(PhyloError::StartLength {
                expected: n + 1,
                got: start_p.len(),
            });
        }
        if let Some(v) = q.iter().chain(&start_p).find(|v| v.is_nan() || **v < 0.0) {
            return Err(PhyloError::InvalidHmm {
                msg: format!("negative or NaN probability {v}"),
            });
        }

        let silent: Vec<usize> = (0..n).filter(|&s| !emits[s]).collect();
        let silent_closure = Self::closure_of(&q, &silent).ok_or_else(|| PhyloError::InvalidHmm {
            msg: "silent states form a closed loop".to_string(),
        })?;

        let qt = Array2::from_shape_fn((n + 1, n + 1), |(i, j)| q[[j, i]]);
        Ok(Self {
            emits,
            start_p,
            q,
            qt,
            silent,
            silent_closure,
        })
    }

    fn closure_of(q: &Array2<f64>, subset: &[usize]) -> Option<Array2<f64>> {
        let k = subset.len();
        let mut qss = Array2::<f64>::zeros((k, k));
        for (i, &a) in subset.iter().enumerate() {
            for (j, &b) in subset.iter().enumerate() {
                qss[[i, j]] = q[[a, b]];
            }
        }
        linalg::closure(&qss)
    }

    /// `(I - Q_ss)^-1` restricted to `subset` (a sorted list of silent
    /// states).
    pub(crate) fn closure_for(&self, subset: &[usize]) -> Array2<f64> {
        if subset == self.silent.as_slice() {
            return self.silent_closure.clone();
        }
        // Principal blocks of a convergent substochastic matrix stay convergent.
        Self::closure_of(&self.q, subset).expect("sub-closure of an invertible silent block")
    }

    pub fn n_states(&self) -> usize {
        self.emits.len()
    }

    pub fn end_state(&self) -> usize {
        self.emits.len()
    }

    #[inline]
    pub fn emits(&self, s: usize) -> bool {
        self.emits[s]
    }

    #[inline]
    pub fn is_silent(&self, s: usize) -> bool {
        !self.emits[s]
    }

    pub fn silent_states(&self) -> &[usize] {
        &self.silent
    }

    #[inline]
    pub fn q(&self, from: usize, to: usize) -> f64 {
        self.q[[from, to]]
    }

    #[inline]
    pub fn start_p(&self, s: usize) -> f64 {
        self.start_p[s]
    }

    /// Column `to` of the transition matrix over states `0..n`.
    #[inline]
    pub(crate) fn q_into(&self, to: usize) -> &[f64] {
        let n = self.n_states();
        let row = self
            .qt
            .row(to)
            .to_slice()
            .expect("transposed copy is in standard layout");
        &row[..n]
    }

    /// True when every row (and the start vector) sums to one.
    pub fn is_stochastic(&self) -> bool {
        let n = self.n_states();
        let start_ok = (self.start_p.iter().sum::<f64>() - 1.0).abs() < ROW_TOLERANCE;
        start_ok && (0..n).all(|s| (self.q.row(s).sum() - 1.0).abs() < ROW_TOLERANCE)
    }
}
