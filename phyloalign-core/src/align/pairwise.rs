use std::ops::Deref;

use ndarray::Array2;

use super::Alignment;
use crate::error::{PhyloError, PhyloResult};
use crate::hmm::states::{self, E, G1, G2, M, S};
use crate::hmm::PairHmm;
use crate::prob::LogDouble;

/// A pairwise alignment as a path over `{M, G1, G2}`.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct PairwiseAlignment {
    path: Vec<usize>,
}

impl PairwiseAlignment {
    pub fn new(path: Vec<usize>) -> PhyloResult<Self> {
        if let Some(&bad) = path.iter().find(|&&s| !states::EMITTING.contains(&s)) {
            return Err(PhyloError::InvalidPath {
                msg: format!("state {bad} is not M, G1 or G2"),
            });
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &[usize] {
        &self.path
    }

    /// Residues of the first sequence.
    pub fn length1(&self) -> usize {
        self.path.iter().filter(|&&s| s != G1).count()
    }

    /// Residues of the second sequence.
    pub fn length2(&self) -> usize {
        self.path.iter().filter(|&&s| s != G2).count()
    }

    pub fn flip(&mut self) {
        for s in &mut self.path {
            *s = states::flip(*s);
        }
    }

    pub fn flipped(&self) -> Self {
        let mut other = self.clone();
        other.flip();
        other
    }

    /// Run-length form: consecutive equal states merged.
    pub fn runs(&self) -> Vec<(usize, usize)> {
        let mut runs: Vec<(usize, usize)> = Vec::new();
        for &s in &self.path {
            if let Some((last, n)) = runs.last_mut() {
                if *last == s {
                    *n += 1;
                    continue;
                }
            }
            runs.push((s, 1));
        }
        runs
    }

    /// Transition counts over `{M, G1, G2, E, S}`, including `S -> first`
    /// and `last -> E`.
    pub fn path_counts(&self) -> Array2<usize> {
        let mut counts = Array2::<usize>::zeros((5, 5));
        let mut prev = S;
        for &s in &self.path {
            counts[[prev, s]] += 1;
            prev = s;
        }
        counts[[prev, E]] += 1;
        counts
    }
}

impl Deref for PairwiseAlignment {
    type Target = [usize];

    fn deref(&self) -> &[usize] {
        &self.path
    }
}

/// The pairwise alignment of `n1` (seq1) and `n2` (seq2) induced by `a`.
pub fn get_pairwise_alignment(a: &Alignment, n1: usize, n2: usize) -> PairwiseAlignment {
    let path = a
        .columns()
        .iter()
        .filter_map(|c| match (c.contains(n1), c.contains(n2)) {
            (true, true) => Some(M),
            (false, true) => Some(G1),
            (true, false) => Some(G2),
            (false, false) => None,
        })
        .collect();
    PairwiseAlignment { path }
}

/// Probability of a pairwise path under `hmm`, start and end included.
pub fn pairwise_prior(pw: &PairwiseAlignment, hmm: &PairHmm) -> LogDouble {
    let mut pr = LogDouble::ONE;
    let mut prev = S;
    for (s, len) in pw.runs() {
        pr *= LogDouble::new(hmm.q(prev, s));
        if len > 1 {
            pr *= LogDouble::new(hmm.q(s, s)).powf((len - 1) as f64);
        }
        prev = s;
    }
    pr * LogDouble::new(hmm.q(prev, E))
}

/// Probability of the `n1`/`n2` projection of `a` under the branch HMM,
/// with `n1` as seq1.
pub fn prior_branch(a: &Alignment, hmm: &PairHmm, n1: usize, n2: usize) -> LogDouble {
    pairwise_prior(&get_pairwise_alignment(a, n1, n2), hmm)
}
