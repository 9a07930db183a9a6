//! An internal node and its three neighbors. The neighbors' mutual
//! alignment is fixed and the center's residues are resampled.

use std::sync::LazyLock;

use rand::seq::SliceRandom;
use rand::Rng;

use super::{NWayHmm, Sample};
use crate::align::Alignment;
use crate::config::SamplerConfig;
use crate::error::{PhyloError, PhyloResult};
use crate::phylo::PhyloTree;
use crate::prob::LogDouble;
use crate::state::Parameters;

static HMM: LazyLock<NWayHmm> = LazyLock::new(|| {
    NWayHmm::new(4, vec![(0, 1), (0, 2), (0, 3)], vec![1, 2, 3])
        .expect("3-way topology is a valid tree")
});

pub fn hmm() -> &'static NWayHmm {
    &HMM
}

fn neighbors(tree: &PhyloTree, n0: usize) -> PhyloResult<Vec<usize>> {
    if n0 >= tree.num_nodes() || tree.degree(n0) != 3 {
        return Err(PhyloError::NotInternalNode { node: n0 });
    }
    Ok(tree.neighbors(n0))
}

/// `[n0, a, b, c]` for internal node `n0` with neighbors `a, b, c`.
pub fn get_nodes(tree: &PhyloTree, n0: usize) -> PhyloResult<Vec<usize>> {
    let mut nodes = vec![n0];
    nodes.extend(neighbors(tree, n0)?);
    Ok(nodes)
}

/// As [`get_nodes`] with the neighbors in random order.
pub fn get_nodes_random<R: Rng + ?Sized>(
    tree: &PhyloTree,
    n0: usize,
    rng: &mut R,
) -> PhyloResult<Vec<usize>> {
    let mut nbrs = neighbors(tree, n0)?;
    nbrs.shuffle(rng);
    let mut nodes = vec![n0];
    nodes.extend(nbrs);
    Ok(nodes)
}

pub fn get_path(a: &Alignment, nodes: &[usize]) -> PhyloResult<Vec<usize>> {
    HMM.get_path(a, nodes)
}

pub fn construct(
    a: &Alignment,
    path: &[usize],
    nodes: &[usize],
    tree: &PhyloTree,
) -> PhyloResult<Alignment> {
    HMM.construct(a, path, nodes, tree)
}

pub fn sample<R: Rng + ?Sized>(
    p: &mut Parameters,
    nodes: &[usize],
    config: &SamplerConfig,
    rng: &mut R,
) -> PhyloResult<Sample> {
    super::sample_alignment(&HMM, p, nodes, config, rng)
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
