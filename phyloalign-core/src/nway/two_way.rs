//! Two nodes joined by one branch, both held fixed.

use std::sync::LazyLock;

use super::NWayHmm;
use crate::align::Alignment;
use crate::error::{PhyloError, PhyloResult};
use crate::phylo::PhyloTree;
use crate::prob::LogDouble;
use crate::state::Parameters;

static HMM: LazyLock<NWayHmm> = LazyLock::new(|| {
    NWayHmm::new(2, vec![(0, 1)], vec![0, 1]).expect("2-way topology is a valid tree")
});

pub fn hmm() -> &'static NWayHmm {
    &HMM
}

/// `[parent, child]` of branch `b`.
pub fn get_nodes(tree: &PhyloTree, b: usize) -> PhyloResult<Vec<usize>> {
    if b >= tree.n_branches() {
        return Err(PhyloError::InvalidTree {
            msg: format!("no branch {b}"),
        });
    }
    let (parent, child) = tree.branch(b);
    Ok(vec![parent, child])
}

pub fn get_path(a: &Alignment, nodes: &[usize]) -> PhyloResult<Vec<usize>> {
    HMM.get_path(a, nodes)
}

/// Probability of the pairwise alignment of `nodes` under their branch
/// HMM.
pub fn path_q(p: &mut Parameters, nodes: &[usize]) -> PhyloResult<LogDouble> {
    let hmms = super::branch_hmms(&HMM, p, nodes)?;
    HMM.path_q(&get_path(p.alignment(), nodes)?, &hmms)
}

pub fn correction(p: &mut Parameters, nodes: &[usize]) -> PhyloResult<LogDouble> {
    super::correction(&HMM, p, nodes)
}

pub fn acceptance_ratio(
    p1: &mut Parameters,
    nodes1: &[usize],
    p2: &mut Parameters,
    nodes2: &[usize],
) -> PhyloResult<LogDouble> {
    super::acceptance_ratio(&HMM, p1, nodes1, p2, nodes2)
}
