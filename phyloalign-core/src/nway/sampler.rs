use std::collections::HashMap;

use ndarray::Array2;
use rand::Rng;
use tracing::{debug, debug_span};

use super::{branch_hmms, getorder, NWayHmm};
use crate::align::Alignment;
use crate::config::SamplerConfig;
use crate::dp::DpArrayConstrained;
use crate::error::PhyloResult;
use crate::likelihood::{column_likelihood, SubstitutionTables};
use crate::phylo::PhyloTree;
use crate::prob::LogDouble;
use crate::state::Parameters;

/// One resampling draw and the quantities an MCMC move needs from it.
#[derive(Clone, Debug)]
pub struct Sample {
    pub alignment: Alignment,
    pub path: Vec<usize>,
    pub old_path: Vec<usize>,
    /// Total probability of every path the constrained DP allowed.
    pub pr_sum: LogDouble,
    /// Probability of drawing `path`.
    pub new_proposal: LogDouble,
    /// Probability of drawing the path of the current alignment.
    pub old_proposal: LogDouble,
}

/// Resamples the alignment of the non-leaf-end `nodes` given the fixed
/// alignment of the leaf-ends.
///
/// Position `i` of the DP is the `i`-th column in which any leaf-end has
/// a residue. There an emitting state is allowed iff its leaf-end
/// presence equals the column's; silent states are allowed everywhere.
/// With a substitution model set, each emitting state is weighted by the
/// likelihood of its column, so `pr_sum` includes the sequence data.
pub fn sample_alignment<R: Rng + ?Sized>(
    hmm: &NWayHmm,
    p: &mut Parameters,
    nodes: &[usize],
    config: &SamplerConfig,
    rng: &mut R,
) -> PhyloResult<Sample> {
    config.validate()?;
    hmm.check_topology(nodes, p.tree())?;
    let span = debug_span!("sample_alignment", k = hmm.n_nodes(), nodes = ?nodes);
    let _guard = span.enter();

    let hmms = branch_hmms(hmm, p, nodes)?;
    let engine = hmm.dp_engine(&hmms)?;
    let tables = if p.has_substitution() {
        Some(p.substitution_tables()?)
    } else {
        None
    };
    let a = p.alignment();

    let mut by_mask: HashMap<u32, Vec<usize>> = HashMap::new();
    for s in (0..hmm.n_states()).filter(|&s| hmm.emits(s)) {
        by_mask.entry(hmm.leaf_presence(s)).or_default().push(s);
    }
    let leaf_nodes: Vec<usize> = hmm.leaf_ends().iter().map(|&l| nodes[l]).collect();
    let columns = getorder(a, &leaf_nodes);

    let mut dp = DpArrayConstrained::new(engine, columns.len(), config.dp);
    for (i, &c) in columns.iter().enumerate() {
        let mask = leaf_mask(hmm, a, c, nodes);
        dp.set_allowed(i + 1, by_mask.get(&mask).cloned().unwrap_or_default());
    }
    dp.allow_silent_everywhere();
    if let Some(tables) = &tables {
        let e = emissions(hmm, a, p.tree(), tables, nodes, &columns, &by_mask)?;
        dp.set_emissions(e)?;
    }
    dp.forward()?;
    if config.prune {
        dp.prune()?;
    }
    let pr_sum = dp.pr_sum_all_paths();
    debug!(log_pr_sum = pr_sum.ln(), positions = columns.len(), "forward done");

    let old_path = hmm.get_path(a, nodes)?;
    let path = dp.sample_path(rng)?;
    let alignment = hmm.construct(a, &path, nodes, p.tree())?;

    Ok(Sample {
        new_proposal: dp.path_sampling_p(&path),
        old_proposal: dp.path_sampling_p(&old_path),
        alignment,
        path,
        old_path,
        pr_sum,
    })
}

fn leaf_mask(hmm: &NWayHmm, a: &Alignment, c: usize, nodes: &[usize]) -> u32 {
    hmm.leaf_ends()
        .iter()
        .filter(|&&l| a.present(c, nodes[l]))
        .fold(0u32, |m, &l| m | 1 << l)
}

/// Column likelihood of each DP position under each emitting state
/// allowed there. The old residues of the resampled nodes are dropped
/// and replaced by the state's.
fn emissions(
    hmm: &NWayHmm,
    a: &Alignment,
    tree: &PhyloTree,
    tables: &SubstitutionTables,
    nodes: &[usize],
    columns: &[usize],
    by_mask: &HashMap<u32, Vec<usize>>,
) -> PhyloResult<Array2<f64>> {
    let letters = a.column_letters();
    let internal: Vec<usize> = (0..hmm.n_nodes()).filter(|&i| !hmm.is_leaf_end(i)).collect();
    let mut e = Array2::zeros((columns.len(), hmm.n_states()));
    for (i, &c) in columns.iter().enumerate() {
        let mut base = a.column(c).clone();
        for &x in &internal {
            base.remove(nodes[x]);
        }
        let mut by_internal: HashMap<u32, f64> = HashMap::new();
        let states = by_mask.get(&leaf_mask(hmm, a, c, nodes));
        for &s in states.into_iter().flatten() {
            let inner = internal
                .iter()
                .filter(|&&x| hmm.present(s, x))
                .fold(0u32, |m, &x| m | 1 << x);
            let w = match by_internal.get(&inner) {
                Some(&w) => w,
                None => {
                    let mut present = base.clone();
                    present.extend(
                        internal
                            .iter()
                            .filter(|&&x| inner >> x & 1 == 1)
                            .map(|&x| nodes[x]),
                    );
                    let w = column_likelihood(tree, tables, &present, &letters[c])?;
                    by_internal.insert(inner, w);
                    w
                }
            };
            e[[i, s]] = w;
        }
    }
    Ok(e)
}
