use std::collections::HashMap;

use ndarray::Array2;

use crate::dp::DpEngine;
use crate::error::{PhyloError, PhyloResult};
use crate::hmm::states::{E, G1, G2, M};
use crate::hmm::PairHmm;
use crate::prob::LogDouble;

const MAX_NODES: usize = 8;

/// Composite alignment HMM for K pairwise alignments meeting on a small
/// local tree.
///
/// Local node `i` is bit `i` of a state. Each edge `(seq1, seq2)` carries
/// a pairwise sub-state in two bits at `K + 2j`; when neither endpoint is
/// present the edge does not advance, bit `K + 2e + j` is set, and the
/// sub-state bits remember the edge's last state. Leaf-end nodes are the
/// ones whose mutual alignment is held fixed; a state emits (consumes a
/// DP position) iff some leaf-end is present.
#[derive(Clone, Debug)]
pub struct NWayHmm {
    n_nodes: usize,
    edges: Vec<(usize, usize)>,
    leaf_ends: Vec<usize>,
    leaf_mask: u32,
    states: Vec<u32>,
    lookup: HashMap<u32, usize>,
}

impl NWayHmm {
    pub fn new(n_nodes: usize, edges: Vec<(usize, usize)>, leaf_ends: Vec<usize>) -> PhyloResult<Self> {
        if !(2..=MAX_NODES).contains(&n_nodes) {
            return Err(PhyloError::InvalidHmm {
                msg: format!("{n_nodes} local nodes; supported range is 2..={MAX_NODES}"),
            });
        }
        if edges.len() != n_nodes - 1
            || edges.iter().any(|&(a, b)| a >= n_nodes || b >= n_nodes || a == b)
        {
            return Err(PhyloError::InvalidHmm {
                msg: format!("edges {edges:?} do not form a tree on {n_nodes} nodes"),
            });
        }
        if leaf_ends.is_empty() || leaf_ends.iter().any(|&l| l >= n_nodes) {
            return Err(PhyloError::InvalidHmm {
                msg: format!("bad leaf-end set {leaf_ends:?}"),
            });
        }
        let leaf_mask = leaf_ends.iter().fold(0u32, |m, &l| m | 1 << l);
        let mut hmm = Self {
            n_nodes,
            edges,
            leaf_ends,
            leaf_mask,
            states: Vec::new(),
            lookup: HashMap::new(),
        };
        if !hmm.is_connected((1 << n_nodes) - 1) {
            return Err(PhyloError::InvalidHmm {
                msg: format!("edges {:?} do not connect all nodes", hmm.edges),
            });
        }
        hmm.construct_states();
        Ok(hmm)
    }

    /// Enumerates states: connected presence sets in descending mask order,
    /// then every remembered sub-state of the edges that do not advance.
    fn construct_states(&mut self) {
        let k = self.n_nodes;
        let mut states = Vec::new();
        for mask in (1..(1u32 << k)).rev() {
            if !self.is_connected(mask) {
                continue;
            }
            let idle: Vec<usize> = (0..self.edges.len())
                .filter(|&j| !self.edge_advances(mask, j))
                .collect();
            let mut subs: Vec<usize> = (0..self.edges.len())
                .map(|j| self.advancing_substate(mask, j).unwrap_or(M))
                .collect();
            for combo in 0..3usize.pow(idle.len() as u32) {
                let mut c = combo;
                for &j in &idle {
                    subs[j] = [M, G1, G2][c % 3];
                    c /= 3;
                }
                states.push(self.encode(mask, &subs));
            }
        }
        self.lookup = states.iter().enumerate().map(|(i, &b)| (b, i)).collect();
        self.states = states;
    }

    /// True when the nodes in `mask` induce a connected subtree.
    pub fn is_connected(&self, mask: u32) -> bool {
        if mask == 0 {
            return false;
        }
        let first = mask.trailing_zeros();
        let mut seen = 1u32 << first;
        loop {
            let mut grown = seen;
            for &(a, b) in &self.edges {
                let (ba, bb) = (1u32 << a, 1u32 << b);
                if mask & ba != 0 && mask & bb != 0 && (seen & (ba | bb)) != 0 {
                    grown |= ba | bb;
                }
            }
            if grown == seen {
                return seen == mask;
            }
            seen = grown;
        }
    }

    fn edge_advances(&self, mask: u32, j: usize) -> bool {
        let (a, b) = self.edges[j];
        mask & (1 << a | 1 << b) != 0
    }

    fn advancing_substate(&self, mask: u32, j: usize) -> Option<usize> {
        let (a, b) = self.edges[j];
        match (mask >> a & 1 == 1, mask >> b & 1 == 1) {
            (true, true) => Some(M),
            (false, true) => Some(G1),
            (true, false) => Some(G2),
            (false, false) => None,
        }
    }

    /// Bit pattern for a presence mask and per-edge sub-states.
    pub fn encode(&self, mask: u32, subs: &[usize]) -> u32 {
        let k = self.n_nodes;
        let e = self.edges.len();
        let mut bits = mask;
        for (j, &s) in subs.iter().enumerate() {
            bits |= (s as u32) << (k + 2 * j);
            if !self.edge_advances(mask, j) {
                bits |= 1 << (k + 2 * e + j);
            }
        }
        bits
    }

    pub fn n_nodes(&self) -> usize {
        self.n_nodes
    }

    pub fn edges(&self) -> &[(usize, usize)] {
        &self.edges
    }

    pub fn leaf_ends(&self) -> &[usize] {
        &self.leaf_ends
    }

    pub fn is_leaf_end(&self, node: usize) -> bool {
        self.leaf_mask >> node & 1 == 1
    }

    pub fn n_states(&self) -> usize {
        self.states.len()
    }

    pub fn state_bits(&self, s: usize) -> u32 {
        self.states[s]
    }

    /// Canonical index of a bit pattern. Unknown patterns are a logic
    /// error.
    pub fn findstate(&self, bits: u32) -> usize {
        match self.lookup.get(&bits) {
            Some(&s) => s,
            None => panic!("findstate: bit pattern {bits:#b} is not a state of this HMM"),
        }
    }

    pub fn try_findstate(&self, bits: u32) -> Option<usize> {
        self.lookup.get(&bits).copied()
    }

    pub fn presence_mask(&self, s: usize) -> u32 {
        self.states[s] & ((1 << self.n_nodes) - 1)
    }

    #[inline]
    pub fn present(&self, s: usize, node: usize) -> bool {
        self.states[s] >> node & 1 == 1
    }

    /// Presence restricted to the leaf-end nodes.
    pub fn leaf_presence(&self, s: usize) -> u32 {
        self.states[s] & self.leaf_mask
    }

    pub fn emits(&self, s: usize) -> bool {
        self.leaf_presence(s) != 0
    }

    pub fn silent_states(&self) -> Vec<usize> {
        (0..self.n_states()).filter(|&s| !self.emits(s)).collect()
    }

    #[inline]
    pub fn substate(&self, s: usize, edge: usize) -> usize {
        (self.states[s] >> (self.n_nodes + 2 * edge) & 3) as usize
    }

    #[inline]
    pub fn advances(&self, s: usize, edge: usize) -> bool {
        self.states[s] >> (self.n_nodes + 2 * self.edges.len() + edge) & 1 == 0
    }

    pub(crate) fn check_hmms(&self, hmms: &[PairHmm]) -> PhyloResult<()> {
        if hmms.len() != self.edges.len() {
            return Err(PhyloError::InvalidHmm {
                msg: format!("{} branch HMMs for {} edges", hmms.len(), self.edges.len()),
            });
        }
        Ok(())
    }

    /// Transition probability from `s1` to `s2`, one factor per edge.
    pub fn get_q(&self, s1: usize, s2: usize, hmms: &[PairHmm]) -> f64 {
        let mut p = 1.0;
        for (j, hmm) in hmms.iter().enumerate() {
            let prev = self.substate(s1, j);
            let cur = self.substate(s2, j);
            if self.advances(s2, j) {
                p *= hmm.q(prev, cur);
            } else if prev != cur {
                return 0.0;
            }
        }
        p
    }

    /// Probability of starting in `s`. Idle edges draw their remembered
    /// state from the branch `start_pi`.
    pub fn start_p(&self, s: usize, hmms: &[PairHmm]) -> f64 {
        hmms.iter()
            .enumerate()
            .map(|(j, hmm)| {
                let sub = self.substate(s, j);
                if self.advances(s, j) {
                    hmm.start(sub)
                } else {
                    hmm.start_pi(sub)
                }
            })
            .product()
    }

    pub fn end_p(&self, s: usize, hmms: &[PairHmm]) -> f64 {
        hmms.iter()
            .enumerate()
            .map(|(j, hmm)| hmm.q(self.substate(s, j), E))
            .product()
    }

    /// Probability of the empty path.
    pub fn start_end_p(&self, hmms: &[PairHmm]) -> f64 {
        hmms.iter().map(|hmm| hmm.start(E)).product()
    }

    /// `(n+1) x (n+1)` transition matrix with the end state last.
    pub fn create_q(&self, hmms: &[PairHmm]) -> PhyloResult<Array2<f64>> {
        self.check_hmms(hmms)?;
        let n = self.n_states();
        let from: Vec<usize> = (0..n).collect();
        let rows: Vec<Vec<f64>> = par_map!(from, |&s1| {
            let mut row: Vec<f64> = (0..n).map(|s2| self.get_q(s1, s2, hmms)).collect();
            row.push(self.end_p(s1, hmms));
            row
        });
        let mut q = Array2::<f64>::zeros((n + 1, n + 1));
        for (s1, row) in rows.into_iter().enumerate() {
            for (s2, v) in row.into_iter().enumerate() {
                q[[s1, s2]] = v;
            }
        }
        Ok(q)
    }

    pub fn dp_engine(&self, hmms: &[PairHmm]) -> PhyloResult<DpEngine> {
        let q = self.create_q(hmms)?;
        let n = self.n_states();
        let mut start: Vec<f64> = (0..n).map(|s| self.start_p(s, hmms)).collect();
        start.push(self.start_end_p(hmms));
        let emits = (0..n).map(|s| self.emits(s)).collect();
        DpEngine::new(emits, start, q)
    }

    /// Probability of a composite path, end transition included.
    pub fn path_q(&self, path: &[usize], hmms: &[PairHmm]) -> PhyloResult<LogDouble> {
        self.check_hmms(hmms)?;
        if let Some(&bad) = path.iter().find(|&&s| s >= self.n_states()) {
            return Err(PhyloError::InvalidPath {
                msg: format!("state {bad} out of range (n={})", self.n_states()),
            });
        }
        let Some((&first, _)) = path.split_first() else {
            return Ok(LogDouble::new(self.start_end_p(hmms)));
        };
        let mut pr = LogDouble::new(self.start_p(first, hmms));
        for w in path.windows(2) {
            pr *= LogDouble::new(self.get_q(w[0], w[1], hmms));
        }
        let last = path[path.len() - 1];
        Ok(pr * LogDouble::new(self.end_p(last, hmms)))
    }
}
