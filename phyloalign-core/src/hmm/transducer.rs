use ndarray::Array2;

use super::states::{E, G1, G2, M, S};
use super::PairHmm;
use crate::error::{PhyloError, PhyloResult};
use crate::linalg;

/// A pair HMM over an arbitrary state set, with per-side letter
/// emissions. States emitting nothing (other than start and end) are
/// silent and can be eliminated with [`PairTransducer::remove_silent`].
#[derive(Clone, Debug, PartialEq)]
pub struct PairTransducer {
    q: Array2<f64>,
    e1: Vec<Option<usize>>,
    e2: Vec<Option<usize>>,
    n_letters: usize,
    start: usize,
    end: usize,
}

impl PairTransducer {
    pub fn new(
        q: Array2<f64>,
        e1: Vec<Option<usize>>,
        e2: Vec<Option<usize>>,
        n_letters: usize,
        start: usize,
        end: usize,
    ) -> PhyloResult<Self> {
        let n = e1.len();
        if q.nrows() != n || q.ncols() != n {
            return Err(PhyloError::TransitionShape {
                expected: n,
                rows: q.nrows(),
                cols: q.ncols(),
            });
        }
        if e2.len() != n {
            return Err(PhyloError::InvalidHmm {
                msg: format!("emission tables disagree: {} vs {} states", n, e2.len()),
            });
        }
        if start >= n || end >= n {
            return Err(PhyloError::InvalidHmm {
                msg: format!("start {start} / end {end} out of range for {n} states"),
            });
        }
        if e1.iter().chain(&e2).flatten().any(|&l| l >= n_letters) {
            return Err(PhyloError::InvalidHmm {
                msg: format!("letter index out of range (n_letters={n_letters})"),
            });
        }
        for s in [start, end] {
            if e1[s].is_some() || e2[s].is_some() {
                return Err(PhyloError::InvalidHmm {
                    msg: format!("start/end state {s} must not emit"),
                });
            }
        }
        Ok(Self {
            q,
            e1,
            e2,
            n_letters,
            start,
            end,
        })
    }

    pub fn n_states(&self) -> usize {
        self.e1.len()
    }

    pub fn n_letters(&self) -> usize {
        self.n_letters
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn q(&self, from: usize, to: usize) -> f64 {
        self.q[[from, to]]
    }

    pub fn emits1(&self, s: usize) -> Option<usize> {
        self.e1[s]
    }

    pub fn emits2(&self, s: usize) -> Option<usize> {
        self.e2[s]
    }

    pub fn is_match(&self, s: usize) -> bool {
        self.e1[s].is_some() && self.e2[s].is_some()
    }

    /// Only seq2 emits.
    pub fn is_insert(&self, s: usize) -> bool {
        self.e1[s].is_none() && self.e2[s].is_some()
    }

    /// Only seq1 emits.
    pub fn is_delete(&self, s: usize) -> bool {
        self.e1[s].is_some() && self.e2[s].is_none()
    }

    pub fn is_silent(&self, s: usize) -> bool {
        self.e1[s].is_none() && self.e2[s].is_none() && s != self.start && s != self.end
    }

    /// Folds every silent state into the transitions between the
    /// remaining states: `Q'_KK = Q_KK + Q_KZ (I - Q_ZZ)^-1 Q_ZK`.
    pub fn remove_silent(&self) -> PhyloResult<PairTransducer> {
        let n = self.n_states();
        let silent: Vec<usize> = (0..n).filter(|&s| self.is_silent(s)).collect();
        if silent.is_empty() {
            return Ok(self.clone());
        }
        let keep: Vec<usize> = (0..n).filter(|&s| !self.is_silent(s)).collect();

        let z = silent.len();
        let mut qzz = Array2::<f64>::zeros((z, z));
        for (i, &a) in silent.iter().enumerate() {
            for (j, &b) in silent.iter().enumerate() {
                qzz[[i, j]] = self.q[[a, b]];
            }
        }
        let c = linalg::closure(&qzz).ok_or_else(|| PhyloError::InvalidHmm {
            msg: "silent states form a closed loop".to_string(),
        })?;

        let k = keep.len();
        let mut q = Array2::<f64>::zeros((k, k));
        for (i, &a) in keep.iter().enumerate() {
            for (j, &b) in keep.iter().enumerate() {
                let mut v = self.q[[a, b]];
                for (zi, &za) in silent.iter().enumerate() {
                    let into = self.q[[a, za]];
                    if into == 0.0 {
                        continue;
                    }
                    for (zj, &zb) in silent.iter().enumerate() {
                        v += into * c[[zi, zj]] * self.q[[zb, b]];
                    }
                }
                q[[i, j]] = v;
            }
        }

        let position = |s: usize| keep.iter().position(|&x| x == s);
        let start = position(self.start).ok_or_else(|| PhyloError::InvalidHmm {
            msg: "start state removed".to_string(),
        })?;
        let end = position(self.end).ok_or_else(|| PhyloError::InvalidHmm {
            msg: "end state removed".to_string(),
        })?;
        PairTransducer::new(
            q,
            keep.iter().map(|&s| self.e1[s]).collect(),
            keep.iter().map(|&s| self.e2[s]).collect(),
            self.n_letters,
            start,
            end,
        )
    }

    /// Collapses a single-letter transducer with exactly one match, one
    /// insert and one delete state into a [`PairHmm`]. The start row is
    /// kept as is and `start_pi` is the point mass on M.
    pub fn to_pair_hmm(&self) -> PhyloResult<PairHmm> {
        let n = self.n_states();
        if self.n_letters != 1 {
            return Err(PhyloError::InvalidHmm {
                msg: format!("expected a single-letter transducer, got {}", self.n_letters),
            });
        }
        let find = |pred: &dyn Fn(usize) -> bool, what: &str| -> PhyloResult<usize> {
            let found: Vec<usize> = (0..n).filter(|&s| pred(s)).collect();
            match found.as_slice() {
                [s] => Ok(*s),
                _ => Err(PhyloError::InvalidHmm {
                    msg: format!("expected exactly one {what} state, found {}", found.len()),
                }),
            }
        };
        if (0..n).any(|s| self.is_silent(s)) {
            return Err(PhyloError::InvalidHmm {
                msg: "remove silent states first".to_string(),
            });
        }
        let m = find(&|s| self.is_match(s), "match")?;
        let ins = find(&|s| self.is_insert(s), "insert")?;
        let del = find(&|s| self.is_delete(s), "delete")?;

        let map = [(m, M), (ins, G1), (del, G2), (self.end, E)];
        let mut q = Array2::<f64>::zeros((5, 5));
        for &(from, row) in &[(m, M), (ins, G1), (del, G2), (self.start, S)] {
            for &(to, col) in &map {
                q[[row, col]] = self.q[[from, to]];
            }
        }
        PairHmm::new(q, [1.0, 0.0, 0.0, 0.0])
    }
}
