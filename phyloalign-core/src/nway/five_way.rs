//! Both ends of an internal branch plus their four other neighbors:
//! `n4` joins `n0, n1`, `n5` joins `n2, n3`. The four outer nodes are
//! held fixed and `n4`, `n5` are resampled together.

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
    NWayHmm::new(
        6,
        vec![(4, 0), (4, 1), (5, 2), (5, 3), (4, 5)],
        vec![0, 1, 2, 3],
    )
    .expect("5-way topology is a valid tree")
});

pub fn hmm() -> &'static NWayHmm {
    &HMM
}

fn branch_sides(tree: &PhyloTree, b: usize) -> PhyloResult<((usize, Vec<usize>), (usize, Vec<usize>))> {
    if b >= tree.n_branches() || !tree.is_internal_branch(b) {
        return Err(PhyloError::NotInternalBranch { branch: b });
    }
    let (x, y) = tree.branch(b);
    let side = |n: usize, other: usize| -> PhyloResult<Vec<usize>> {
        let rest: Vec<usize> = tree.neighbors(n).into_iter().filter(|&m| m != other).collect();
        if rest.len() != 2 {
            return Err(PhyloError::NotInternalNode { node: n });
        }
        Ok(rest)
    };
    Ok(((x, side(x, y)?), (y, side(y, x)?)))
}

/// `[n0, n1, n2, n3, n4, n5]` for internal branch `b = (n4, n5)`.
pub fn get_nodes(tree: &PhyloTree, b: usize) -> PhyloResult<Vec<usize>> {
    let ((x, xs), (y, ys)) = branch_sides(tree, b)?;
    Ok(vec![xs[0], xs[1], ys[0], ys[1], x, y])
}

/// As [`get_nodes`] with each side's neighbors in random order and the
/// two ends swapped half the time.
pub fn get_nodes_random<R: Rng + ?Sized>(
    tree: &PhyloTree,
    b: usize,
    rng: &mut R,
) -> PhyloResult<Vec<usize>> {
    let ((mut x, mut xs), (mut y, mut ys)) = branch_sides(tree, b)?;
    xs.shuffle(rng);
    ys.shuffle(rng);
    if rng.gen_bool(0.5) {
        std::mem::swap(&mut x, &mut y);
        std::mem::swap(&mut xs, &mut ys);
    }
    Ok(vec![xs[0], xs[1], ys[0], ys[1], x, y])
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
