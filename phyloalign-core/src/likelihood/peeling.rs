use bit_set::BitSet;
use ndarray::Array2;

use crate::align::Alignment;
use crate::error::{PhyloError, PhyloResult};
use crate::graph::Value;
use crate::phylo::PhyloTree;
use crate::prob::LogDouble;

/// Per-branch transition matrices for every rate bin, with the bin
/// weights and the equilibrium frequencies at the root.
#[derive(Clone, Debug, PartialEq)]
pub struct SubstitutionTables {
    frequencies: Vec<f64>,
    weights: Vec<f64>,
    /// `matrices[b][k]`: branch `b`, rate bin `k`.
    matrices: Vec<Vec<Array2<f64>>>,
}

impl SubstitutionTables {
    pub fn new(
        frequencies: Vec<f64>,
        weights: Vec<f64>,
        matrices: Vec<Vec<Array2<f64>>>,
    ) -> PhyloResult<Self> {
        let n = frequencies.len();
        if weights.is_empty() {
            return Err(PhyloError::InvalidModel {
                msg: "no rate bins".to_string(),
            });
        }
        for per_bin in &matrices {
            if per_bin.len() != weights.len() {
                return Err(PhyloError::InvalidModel {
                    msg: format!("{} matrices for {} rate bins", per_bin.len(), weights.len()),
                });
            }
            if let Some(m) = per_bin.iter().find(|m| m.nrows() != n || m.ncols() != n) {
                return Err(PhyloError::TransitionShape {
                    expected: n,
                    rows: m.nrows(),
                    cols: m.ncols(),
                });
            }
        }
        Ok(Self {
            frequencies,
            weights,
            matrices,
        })
    }

    /// Tables for a `Markov` or `Mixture` model value and the given
    /// per-branch matrices.
    pub fn from_model(model: &Value, matrices: Vec<Vec<Array2<f64>>>) -> PhyloResult<Self> {
        match model {
            Value::Markov(m) => Self::new(m.frequencies().to_vec(), vec![1.0], matrices),
            Value::Mixture(m) => Self::new(
                m.base.frequencies().to_vec(),
                m.bins.weights.clone(),
                matrices,
            ),
            other => Err(PhyloError::TypeMismatch {
                expected: "Markov or Mixture",
                found: other.kind(),
            }),
        }
    }

    pub fn n_letters(&self) -> usize {
        self.frequencies.len()
    }

    pub fn n_bins(&self) -> usize {
        self.weights.len()
    }

    pub fn n_branches(&self) -> usize {
        self.matrices.len()
    }

    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn transition(&self, branch: usize, bin: usize) -> &Array2<f64> {
        &self.matrices[branch][bin]
    }
}

/// Present nodes in pre-order from the first one, each with its parent
/// and the branch between them.
fn peeling_order(
    tree: &PhyloTree,
    present: &BitSet,
) -> PhyloResult<Vec<(usize, Option<(usize, usize)>)>> {
    if let Some(n) = present.iter().find(|&n| n >= tree.num_nodes()) {
        return Err(PhyloError::NodeOutOfRange {
            node: n,
            n: tree.num_nodes(),
        });
    }
    let Some(root) = present.iter().next() else {
        return Ok(Vec::new());
    };
    let mut order = vec![(root, None)];
    let mut stack = vec![(root, usize::MAX)];
    while let Some((node, parent)) = stack.pop() {
        for next in tree.neighbors(node) {
            if next == parent || !present.contains(next) {
                continue;
            }
            let b = tree
                .find_branch(node, next)
                .expect("neighbours share a branch");
            order.push((next, Some((node, b))));
            stack.push((next, node));
        }
    }
    if order.len() != present.len() {
        return Err(PhyloError::InvalidAlignment {
            msg: format!(
                "nodes {:?} of a column do not form a connected subtree",
                present.iter().collect::<Vec<_>>()
            ),
        });
    }
    Ok(order)
}

/// Likelihood of one column by peeling over the subtree of present
/// nodes. Observed letters clamp their node; every other present node is
/// summed over. A column with no present node has likelihood one.
pub fn column_likelihood(
    tree: &PhyloTree,
    tables: &SubstitutionTables,
    present: &BitSet,
    letters: &[Option<u8>],
) -> PhyloResult<f64> {
    if tables.n_branches() != tree.n_branches() {
        return Err(PhyloError::InvalidModel {
            msg: format!(
                "{} branch tables for a tree of {} branches",
                tables.n_branches(),
                tree.n_branches()
            ),
        });
    }
    let order = peeling_order(tree, present)?;
    if order.is_empty() {
        return Ok(1.0);
    }
    let n = tables.n_letters();
    if let Some(&l) = letters.iter().flatten().find(|&&l| l as usize >= n) {
        return Err(PhyloError::AlphabetMismatch {
            a: n,
            b: l as usize + 1,
        });
    }

    let mut total = 0.0;
    for (k, &w) in tables.weights().iter().enumerate() {
        let mut partial: Vec<Vec<f64>> = vec![Vec::new(); tree.num_nodes()];
        for &(node, _) in &order {
            partial[node] = match letters.get(node).copied().flatten() {
                Some(l) => (0..n).map(|a| if a == l as usize { 1.0 } else { 0.0 }).collect(),
                None => vec![1.0; n],
            };
        }
        for &(node, link) in order.iter().rev() {
            let Some((parent, b)) = link else { continue };
            let p = tables.transition(b, k);
            let child = std::mem::take(&mut partial[node]);
            for a in 0..n {
                let m: f64 = (0..n).map(|c| p[[a, c]] * child[c]).sum();
                partial[parent][a] *= m;
            }
        }
        let root = order[0].0;
        let at_root: f64 = partial[root]
            .iter()
            .zip(tables.frequencies())
            .map(|(l, pi)| l * pi)
            .sum();
        total += w * at_root;
    }
    Ok(total)
}

/// Likelihood of every column of `a`.
pub fn column_likelihoods(
    a: &Alignment,
    tree: &PhyloTree,
    tables: &SubstitutionTables,
) -> PhyloResult<Vec<LogDouble>> {
    a.check_tree(tree)?;
    let letters = a.column_letters();
    let columns: Vec<usize> = (0..a.length()).collect();
    par_try_map!(&columns, |&c| {
        column_likelihood(tree, tables, a.column(c), &letters[c]).map(LogDouble::new)
    })
}

/// Substitution likelihood of the whole alignment.
pub fn alignment_likelihood(
    a: &Alignment,
    tree: &PhyloTree,
    tables: &SubstitutionTables,
) -> PhyloResult<LogDouble> {
    Ok(column_likelihoods(a, tree, tables)?.into_iter().product())
}
