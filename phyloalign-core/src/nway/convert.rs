use std::collections::VecDeque;

use bit_set::BitSet;

use super::NWayHmm;
use crate::align::{Alignment, PairwiseAlignment};
use crate::error::{PhyloError, PhyloResult};
use crate::hmm::states::{G1, G2, M};
use crate::phylo::PhyloTree;

/// Columns of `a` in which any of `nodes` has a residue.
pub fn getorder(a: &Alignment, nodes: &[usize]) -> Vec<usize> {
    (0..a.length())
        .filter(|&c| nodes.iter().any(|&n| a.present(c, n)))
        .collect()
}

/// The `nodes.len()`-row alignment induced by `a` on `nodes`. Letters of
/// observed nodes come along.
pub fn project(a: &Alignment, nodes: &[usize]) -> Alignment {
    let columns: Vec<BitSet> = getorder(a, nodes)
        .into_iter()
        .map(|c| {
            nodes
                .iter()
                .enumerate()
                .filter(|&(_, &n)| a.present(c, n))
                .map(|(i, _)| i)
                .collect()
        })
        .collect();
    let sequences = nodes.iter().map(|&n| a.sequence(n).map(<[u8]>::to_vec)).collect();
    Alignment::from_columns(nodes.len(), columns)
        .and_then(|out| out.with_sequences(sequences))
        .expect("projection keeps every residue of the projected nodes")
}

/// The subtree hanging off one leaf-end, and where its columns sit in the
/// old alignment.
struct Group {
    leaf: usize,
    nodes: Vec<usize>,
    leaf_cols: VecDeque<usize>,
    free_cols: VecDeque<usize>,
}

impl Group {
    /// Free columns may be emitted up to `bound`, but never past the
    /// group's next leaf-end residue.
    fn limit(&self, bound: Option<usize>) -> Option<usize> {
        bound.map(|b| self.leaf_cols.front().map_or(b, |&c| c.min(b)))
    }
}

impl NWayHmm {
    /// Node ids must be distinct and name nodes of an `n_total`-node tree.
    pub(crate) fn check_nodes(&self, nodes: &[usize], n_total: usize) -> PhyloResult<()> {
        if nodes.len() != self.n_nodes() {
            return Err(PhyloError::NodeCount {
                expected: self.n_nodes(),
                got: nodes.len(),
            });
        }
        let mut seen = BitSet::with_capacity(n_total);
        for &n in nodes {
            if n >= n_total {
                return Err(PhyloError::NodeOutOfRange { node: n, n: n_total });
            }
            if !seen.insert(n) {
                return Err(PhyloError::DuplicateNode { node: n });
            }
        }
        Ok(())
    }

    /// Every local edge must be a branch of `tree`.
    pub(crate) fn check_topology(&self, nodes: &[usize], tree: &PhyloTree) -> PhyloResult<()> {
        self.check_nodes(nodes, tree.num_nodes())?;
        for &(x, y) in self.edges() {
            if tree.find_branch(nodes[x], nodes[y]).is_none() {
                return Err(PhyloError::NotAdjacent {
                    a: nodes[x],
                    b: nodes[y],
                });
            }
        }
        Ok(())
    }

    fn column_mask(&self, a: &Alignment, c: usize, nodes: &[usize]) -> u32 {
        nodes
            .iter()
            .enumerate()
            .filter(|&(_, &n)| a.present(c, n))
            .fold(0u32, |m, (i, _)| m | 1 << i)
    }

    fn has_leaf_end(&self, a: &Alignment, c: usize, nodes: &[usize]) -> bool {
        self.leaf_ends().iter().any(|&l| a.present(c, nodes[l]))
    }

    /// The composite path implied by `a` on `nodes`. Before an edge's first
    /// column its remembered state is M.
    pub fn get_path(&self, a: &Alignment, nodes: &[usize]) -> PhyloResult<Vec<usize>> {
        self.check_nodes(nodes, a.n_nodes())?;
        let mut remembered = vec![M; self.edges().len()];
        let mut path = Vec::new();
        for c in getorder(a, nodes) {
            let mask = self.column_mask(a, c, nodes);
            if !self.is_connected(mask) {
                return Err(PhyloError::InvalidColumn { column: c });
            }
            for (j, &(x, y)) in self.edges().iter().enumerate() {
                match (mask >> x & 1 == 1, mask >> y & 1 == 1) {
                    (true, true) => remembered[j] = M,
                    (false, true) => remembered[j] = G1,
                    (true, false) => remembered[j] = G2,
                    (false, false) => {}
                }
            }
            path.push(self.findstate(self.encode(mask, &remembered)));
        }
        Ok(path)
    }

    /// Rebuilds `a` with the columns of `nodes` replaced by `path`.
    ///
    /// Every other node belongs to the subtree behind one leaf-end. A
    /// subtree's columns that lack its leaf-end keep their old order and
    /// are emitted just before the first path column that sits after them
    /// in `a`: one consuming a later leaf-end residue, or a silent column
    /// matched, in order, to an old column holding only resampled nodes.
    /// `construct(a, get_path(a))` therefore reproduces `a`.
    pub fn construct(
        &self,
        a: &Alignment,
        path: &[usize],
        nodes: &[usize],
        tree: &PhyloTree,
    ) -> PhyloResult<Alignment> {
        a.check_tree(tree)?;
        self.check_topology(nodes, tree)?;
        if let Some(&bad) = path.iter().find(|&&s| s >= self.n_states()) {
            return Err(PhyloError::InvalidPath {
                msg: format!("state {bad} out of range (n={})", self.n_states()),
            });
        }
        let internal: Vec<usize> = (0..self.n_nodes()).filter(|&i| !self.is_leaf_end(i)).collect();
        if let Some(&i) = internal.iter().find(|&&i| a.is_observed(nodes[i])) {
            return Err(PhyloError::InvalidAlignment {
                msg: format!("node {} has an observed sequence and cannot be realigned", nodes[i]),
            });
        }

        let mut groups = self.groups(a, nodes, tree)?;
        let mut silent_cols: VecDeque<usize> = getorder(a, nodes)
            .into_iter()
            .filter(|&c| !self.has_leaf_end(a, c, nodes))
            .collect();
        let mut last_anchor: Option<usize> = None;
        let n = a.n_nodes();
        let mut out: Vec<BitSet> = Vec::with_capacity(a.length());

        for &s in path {
            let mut consumed: Vec<(usize, usize)> = Vec::new();
            for (g, group) in groups.iter_mut().enumerate() {
                if !self.present(s, group.leaf) {
                    continue;
                }
                let node = nodes[group.leaf];
                let c = group.leaf_cols.pop_front().ok_or_else(|| PhyloError::InvalidPath {
                    msg: format!("path uses more residues of node {node} than the alignment has"),
                })?;
                consumed.push((g, c));
            }

            let bound = match consumed.iter().map(|&(_, c)| c).min() {
                Some(anchor) => Some(anchor),
                None => {
                    while silent_cols
                        .front()
                        .is_some_and(|&c| last_anchor.is_some_and(|l| c < l))
                    {
                        silent_cols.pop_front();
                    }
                    let next = groups.iter().filter_map(|g| g.leaf_cols.front().copied()).min();
                    let hint = silent_cols
                        .front()
                        .copied()
                        .filter(|&c| next.map_or(true, |x| c < x));
                    if hint.is_some() {
                        silent_cols.pop_front();
                    }
                    hint
                }
            };

            let mut batch = Vec::new();
            for (g, group) in groups.iter_mut().enumerate() {
                let limit = match consumed.iter().find(|&&(h, _)| h == g) {
                    Some(&(_, c)) => Some(c),
                    None => group.limit(bound),
                };
                let Some(limit) = limit else { continue };
                while let Some(&c) = group.free_cols.front() {
                    if c >= limit {
                        break;
                    }
                    group.free_cols.pop_front();
                    batch.push((c, g));
                }
            }
            flush(a, &groups, batch, &mut out);

            let mut column = BitSet::with_capacity(n);
            for &(g, c) in &consumed {
                column.extend(groups[g].nodes.iter().copied().filter(|&x| a.present(c, x)));
            }
            column.extend(internal.iter().filter(|&&i| self.present(s, i)).map(|&i| nodes[i]));
            out.push(column);
            if let Some(max) = consumed.iter().map(|&(_, c)| c).max() {
                last_anchor = Some(max);
            }
        }

        if let Some(group) = groups.iter().find(|g| !g.leaf_cols.is_empty()) {
            return Err(PhyloError::InvalidPath {
                msg: format!(
                    "path leaves {} residues of node {} unused",
                    group.leaf_cols.len(),
                    nodes[group.leaf]
                ),
            });
        }
        let rest: Vec<(usize, usize)> = groups
            .iter_mut()
            .enumerate()
            .flat_map(|(g, group)| group.free_cols.drain(..).map(move |c| (c, g)))
            .collect();
        flush(a, &groups, rest, &mut out);
        Alignment::from_columns(n, out)?.with_sequences(a.sequences().to_vec())
    }

    fn groups(&self, a: &Alignment, nodes: &[usize], tree: &PhyloTree) -> PhyloResult<Vec<Group>> {
        let mut covered = BitSet::with_capacity(a.n_nodes());
        for i in (0..self.n_nodes()).filter(|&i| !self.is_leaf_end(i)) {
            covered.insert(nodes[i]);
        }

        let mut groups = Vec::with_capacity(self.leaf_ends().len());
        for &l in self.leaf_ends() {
            let neighbor = self
                .edges()
                .iter()
                .find_map(|&(x, y)| match (x == l, y == l) {
                    (true, _) => Some(y),
                    (_, true) => Some(x),
                    _ => None,
                })
                .expect("every local node lies on an edge");
            let side = tree.partition(nodes[neighbor], nodes[l])?;
            let group_nodes: Vec<usize> = side.iter().collect();
            covered.union_with(&side);

            let mut leaf_cols = VecDeque::new();
            let mut free_cols = VecDeque::new();
            for c in 0..a.length() {
                if a.present(c, nodes[l]) {
                    leaf_cols.push_back(c);
                } else if group_nodes.iter().any(|&x| a.present(c, x)) {
                    free_cols.push_back(c);
                }
            }
            groups.push(Group {
                leaf: l,
                nodes: group_nodes,
                leaf_cols,
                free_cols,
            });
        }

        if let Some(x) = (0..a.n_nodes()).find(|&x| !covered.contains(x)) {
            return Err(PhyloError::InvalidTree {
                msg: format!("node {x} is neither resampled nor behind a leaf-end"),
            });
        }
        Ok(groups)
    }

    /// Pairwise alignment of local nodes `x` (seq1) and `y` (seq2) along a
    /// composite path.
    pub fn pairwise_from_path(&self, path: &[usize], x: usize, y: usize) -> PairwiseAlignment {
        let pairwise = path
            .iter()
            .filter_map(|&s| match (self.present(s, x), self.present(s, y)) {
                (true, true) => Some(M),
                (false, true) => Some(G1),
                (true, false) => Some(G2),
                (false, false) => None,
            })
            .collect();
        PairwiseAlignment::new(pairwise).expect("only M, G1 and G2 are produced")
    }
}

/// Emits old columns (restricted to their group) in old order; parts of
/// the same old column are merged.
fn flush(a: &Alignment, groups: &[Group], mut batch: Vec<(usize, usize)>, out: &mut Vec<BitSet>) {
    batch.sort_unstable();
    let mut i = 0;
    while i < batch.len() {
        let old = batch[i].0;
        let mut column = BitSet::with_capacity(a.n_nodes());
        while i < batch.len() && batch[i].0 == old {
            let nodes = &groups[batch[i].1].nodes;
            column.extend(nodes.iter().copied().filter(|&x| a.present(old, x)));
            i += 1;
        }
        out.push(column);
    }
}
