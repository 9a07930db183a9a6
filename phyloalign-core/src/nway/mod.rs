//! Multi-sequence alignment HMMs over small local trees (2, 3 or 5
//! nodes), their conversion to and from full alignments, and Gibbs
//! resampling of the internal nodes' alignment.

mod convert;
pub mod five_way;
mod hmm;
mod sampler;
pub mod three_way;
pub mod two_way;

pub use convert::{getorder, project};
pub use hmm::NWayHmm;
pub use sampler::{sample_alignment, Sample};

use crate::error::PhyloResult;
use crate::hmm::PairHmm;
use crate::prob::LogDouble;
use crate::state::Parameters;

/// Branch HMMs for each local edge, oriented `(seq1, seq2)` as the edge.
pub fn branch_hmms(hmm: &NWayHmm, p: &mut Parameters, nodes: &[usize]) -> PhyloResult<Vec<PairHmm>> {
    hmm.check_topology(nodes, p.tree())?;
    hmm.edges()
        .iter()
        .map(|&(x, y)| p.pair_hmm(nodes[x], nodes[y]))
        .collect()
}

/// Full alignment prior over the local composite path probability.
pub fn correction(hmm: &NWayHmm, p: &mut Parameters, nodes: &[usize]) -> PhyloResult<LogDouble> {
    let hmms = branch_hmms(hmm, p, nodes)?;
    let path = hmm.get_path(p.alignment(), nodes)?;
    let local = hmm.path_q(&path, &hmms)?;
    Ok(p.prior_hmm()? / local)
}

/// Factor by which moving from `p1` to `p2` must be reweighted when the
/// move was proposed from the local HMM.
pub fn acceptance_ratio(
    hmm: &NWayHmm,
    p1: &mut Parameters,
    nodes1: &[usize],
    p2: &mut Parameters,
    nodes2: &[usize],
) -> PhyloResult<LogDouble> {
    Ok(correction(hmm, p2, nodes2)? / correction(hmm, p1, nodes1)?)
}

#[cfg(test)]
mod tests;
