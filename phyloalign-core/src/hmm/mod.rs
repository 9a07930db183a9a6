mod transducer;

pub use transducer::PairTransducer;

use ndarray::Array2;

use crate::error::{PhyloError, PhyloResult};

/// States of a pairwise alignment HMM.
pub mod states {
    /// Both sequences emit.
    pub const M: usize = 0;
    /// Gap in seq1: only seq2 emits.
    pub const G1: usize = 1;
    /// Gap in seq2: only seq1 emits.
    pub const G2: usize = 2;
    pub const E: usize = 3;
    pub const S: usize = 4;

    pub const EMITTING: [usize; 3] = [M, G1, G2];

    /// Swap the roles of seq1 and seq2.
    pub fn flip(s: usize) -> usize {
        match s {
            G1 => G2,
            G2 => G1,
            other => other,
        }
    }
}

use states::{E, G1, G2, M, S};

const ROW_TOLERANCE: f64 = 1e-8;

/// Transition structure of the indel process along one branch.
///
/// `q` is 5x5 over `{M, G1, G2, E, S}`. Rows M, G1, G2 and S are
/// distributions over `{M, G1, G2, E}`; row E is zero. `start_pi` is the
/// distribution of the state "before" the first column, used by the
/// multi-way HMMs for sub-alignments that have not yet started.
#[derive(Clone, Debug, PartialEq)]
pub struct PairHmm {
    q: Array2<f64>,
    start_pi: [f64; 4],
}

impl PairHmm {
    pub fn new(q: Array2<f64>, start_pi: [f64; 4]) -> PhyloResult<Self> {
        if q.nrows() != 5 || q.ncols() != 5 {
            return Err(PhyloError::TransitionShape {
                expected: 5,
                rows: q.nrows(),
                cols: q.ncols(),
            });
        }
        let mut q = q;
        for k in 0..5 {
            q[[E, k]] = 0.0;
            q[[k, S]] = 0.0;
        }
        for row in [M, G1, G2, S] {
            let mut total = 0.0;
            for col in [M, G1, G2, E] {
                let v = q[[row, col]];
                if v.is_nan() || v < 0.0 {
                    return Err(PhyloError::InvalidHmm {
                        msg: format!("negative or NaN transition {v} at ({row},{col})"),
                    });
                }
                total += v;
            }
            if (total - 1.0).abs() > ROW_TOLERANCE {
                return Err(PhyloError::InvalidHmm {
                    msg: format!("row {row} sums to {total}"),
                });
            }
        }
        let pi_total: f64 = start_pi.iter().sum();
        if start_pi.iter().any(|&p| p < 0.0) || (pi_total - 1.0).abs() > ROW_TOLERANCE {
            return Err(PhyloError::InvalidHmm {
                msg: format!("start_pi {start_pi:?} is not a distribution"),
            });
        }
        Ok(Self { q, start_pi })
    }

    /// Derives the start row as `start(s) = sum_i start_pi[i] * Q(i, s)`.
    pub fn from_start_pi(q: Array2<f64>, start_pi: [f64; 4]) -> PhyloResult<Self> {
        let mut q = q;
        if q.nrows() == 5 && q.ncols() == 5 {
            for s in [M, G1, G2, E] {
                q[[S, s]] = (0..3).map(|i| start_pi[i] * q[[i, s]]).sum();
            }
        }
        Self::new(q, start_pi)
    }

    /// Only Match columns; each step ends with probability `p_end`.
    pub fn indel_free(p_end: f64) -> PhyloResult<Self> {
        let mut q = Array2::<f64>::zeros((5, 5));
        for row in [M, G1, G2] {
            q[[row, M]] = 1.0 - p_end;
            q[[row, E]] = p_end;
        }
        Self::from_start_pi(q, [1.0, 0.0, 0.0, 0.0])
    }

    #[inline]
    pub fn q(&self, from: usize, to: usize) -> f64 {
        self.q[[from, to]]
    }

    /// Probability that the first column is in state `s` (`E` for an
    /// empty alignment).
    #[inline]
    pub fn start(&self, s: usize) -> f64 {
        self.q[[S, s]]
    }

    #[inline]
    pub fn start_pi(&self, s: usize) -> f64 {
        self.start_pi[s]
    }

    pub fn matrix(&self) -> &Array2<f64> {
        &self.q
    }

    /// The same process seen with seq1 and seq2 exchanged.
    pub fn flipped(&self) -> PairHmm {
        let mut q = Array2::<f64>::zeros((5, 5));
        for a in 0..5 {
            for b in 0..5 {
                q[[states::flip(a), states::flip(b)]] = self.q[[a, b]];
            }
        }
        let mut start_pi = [0.0; 4];
        for (s, &p) in self.start_pi.iter().enumerate() {
            start_pi[states::flip(s)] = p;
        }
        PairHmm { q, start_pi }
    }
}
