use bit_set::BitSet;
use ndarray::Array2;
use proptest::prelude::*;

use super::*;
use crate::align::Alignment;
use crate::error::PhyloError;
use crate::model::{equ_model, reversible_markov_model, uniform_frequencies_model, IndelModel};
use crate::phylo::PhyloTree;
use crate::prob::LogDouble;
use crate::state::Parameters;

const LENGTHS: [f64; 5] = [0.1, 0.2, 0.3, 0.4, 0.5];

/// ((0,1)4,(2,3)5); branch b is the b-th edge below.
fn quartet() -> PhyloTree {
    PhyloTree::from_edges(
        6,
        &[
            (4, 0, LENGTHS[0]),
            (4, 1, LENGTHS[1]),
            (5, 2, LENGTHS[2]),
            (5, 3, LENGTHS[3]),
            (4, 5, LENGTHS[4]),
        ],
    )
    .unwrap()
}

fn jc(t: f64) -> Array2<f64> {
    let e = (-4.0 * t / 3.0).exp();
    Array2::from_shape_fn((4, 4), |(a, b)| {
        if a == b {
            0.25 + 0.75 * e
        } else {
            0.25 - 0.25 * e
        }
    })
}

fn jc_tables(lengths: &[f64]) -> SubstitutionTables {
    SubstitutionTables::new(
        vec![0.25; 4],
        vec![1.0],
        lengths.iter().map(|&t| vec![jc(t)]).collect(),
    )
    .unwrap()
}

fn set(nodes: &[usize]) -> BitSet {
    nodes.iter().copied().collect()
}

fn letters(pairs: &[(usize, u8)]) -> Vec<Option<u8>> {
    let mut out = vec![None; 6];
    for &(n, l) in pairs {
        out[n] = Some(l);
    }
    out
}

fn close(a: f64, b: f64, tol: f64) -> bool {
    (a - b).abs() <= tol
}

// ─── single columns ─────────────────────────────────────────

#[test]
fn two_observed_nodes() {
    let tree = quartet();
    let tables = jc_tables(&LENGTHS);
    let same = column_likelihood(&tree, &tables, &set(&[0, 4]), &letters(&[(0, 0), (4, 0)]));
    assert!(close(same.unwrap(), 0.25 * jc(0.1)[[0, 0]], 1e-12));
    let diff = column_likelihood(&tree, &tables, &set(&[0, 4]), &letters(&[(0, 0), (4, 2)]));
    assert!(close(diff.unwrap(), 0.25 * jc(0.1)[[0, 2]], 1e-12));
}

#[test]
fn unknown_node_chains_its_branches() {
    let tree = quartet();
    let tables = jc_tables(&LENGTHS);
    let l = column_likelihood(&tree, &tables, &set(&[0, 1, 4]), &letters(&[(0, 0), (1, 1)]));
    assert!(close(l.unwrap(), 0.25 * jc(0.3)[[0, 1]], 1e-12));
}

#[test]
fn lone_and_empty_columns() {
    let tree = quartet();
    let tables = jc_tables(&LENGTHS);
    let lone = column_likelihood(&tree, &tables, &set(&[2]), &letters(&[(2, 3)]));
    assert!(close(lone.unwrap(), 0.25, 1e-12));
    let empty = column_likelihood(&tree, &tables, &BitSet::new(), &letters(&[]));
    assert_eq!(empty.unwrap(), 1.0);
}

#[test]
fn unobserved_tips_sum_out() {
    let tree = quartet();
    let tables = jc_tables(&LENGTHS);
    let bare = column_likelihood(&tree, &tables, &set(&[0]), &letters(&[(0, 1)])).unwrap();
    let padded =
        column_likelihood(&tree, &tables, &set(&[0, 1, 4, 5]), &letters(&[(0, 1)])).unwrap();
    assert!(close(bare, padded, 1e-12));
}

#[test]
fn bad_columns_are_rejected() {
    let tree = quartet();
    let tables = jc_tables(&LENGTHS);
    assert!(matches!(
        column_likelihood(&tree, &tables, &set(&[0, 2]), &letters(&[])),
        Err(PhyloError::InvalidAlignment { .. })
    ));
    assert!(matches!(
        column_likelihood(&tree, &tables, &set(&[0, 9]), &letters(&[])),
        Err(PhyloError::NodeOutOfRange { node: 9, n: 6 })
    ));
    assert!(matches!(
        column_likelihood(&tree, &tables, &set(&[0]), &letters(&[(0, 4)])),
        Err(PhyloError::AlphabetMismatch { .. })
    ));
    let short = jc_tables(&LENGTHS[..4]);
    assert!(matches!(
        column_likelihood(&tree, &short, &set(&[0]), &letters(&[])),
        Err(PhyloError::InvalidModel { .. })
    ));
}

#[test]
fn rate_bins_mix_linearly() {
    let tree = quartet();
    let rates = [0.5, 2.0];
    let weights = [0.3, 0.7];
    let mixed = SubstitutionTables::new(
        vec![0.25; 4],
        weights.to_vec(),
        LENGTHS
            .iter()
            .map(|&t| rates.iter().map(|r| jc(t * r)).collect())
            .collect(),
    )
    .unwrap();
    let present = set(&[0, 1, 2, 4, 5]);
    let obs = letters(&[(0, 0), (1, 0), (2, 3)]);
    let want: f64 = rates
        .iter()
        .zip(weights)
        .map(|(r, w)| {
            let scaled: Vec<f64> = LENGTHS.iter().map(|t| t * r).collect();
            w * column_likelihood(&tree, &jc_tables(&scaled), &present, &obs).unwrap()
        })
        .sum();
    let got = column_likelihood(&tree, &mixed, &present, &obs).unwrap();
    assert!(close(got, want, 1e-12));
}

#[test]
fn table_shapes_are_checked() {
    assert!(SubstitutionTables::new(vec![0.25; 4], vec![], vec![]).is_err());
    assert!(matches!(
        SubstitutionTables::new(vec![0.25; 4], vec![1.0], vec![vec![Array2::zeros((3, 3))]]),
        Err(PhyloError::TransitionShape { expected: 4, .. })
    ));
    assert!(SubstitutionTables::new(vec![0.25; 4], vec![0.5, 0.5], vec![vec![jc(0.1)]]).is_err());
}

proptest! {
    #[test]
    fn letter_assignments_sum_to_one(t0 in 0.01f64..2.0, t1 in 0.01f64..2.0) {
        let tree = quartet();
        let tables = jc_tables(&[t0, t1, 0.3, 0.4, 0.5]);
        let present = set(&[0, 1, 4]);
        let mut total = 0.0;
        for a in 0..4u8 {
            for b in 0..4u8 {
                total += column_likelihood(&tree, &tables, &present, &letters(&[(0, a), (1, b)]))
                    .unwrap();
            }
        }
        prop_assert!(close(total, 1.0, 1e-9));
    }
}

// ─── alignments ─────────────────────────────────────────────

const ALPHABET: [char; 4] = ['A', 'C', 'G', 'T'];

fn lettered(rows: &[&str]) -> Alignment {
    Alignment::from_sequences(rows, &ALPHABET).unwrap()
}

#[test]
fn alignment_is_the_product_of_columns() {
    let tree = quartet();
    let tables = jc_tables(&LENGTHS);
    let a = lettered(&["AC-G", "AC-T", "A-TG", "A--G", "##-#", "#-##"]);
    let columns = column_likelihoods(&a, &tree, &tables).unwrap();
    assert_eq!(columns.len(), 4);
    let product: LogDouble = columns.iter().copied().product();
    let total = alignment_likelihood(&a, &tree, &tables).unwrap();
    assert!(close(product.ln(), total.ln(), 1e-12));

    // Column 2 holds node 2 alone under node 5.
    assert!(close(columns[2].ln(), 0.25f64.ln(), 1e-12));
}

#[test]
fn shared_letters_favour_their_split() {
    let rows = ["AAGA", "AAGA", "CCTC", "CCTC", "####", "####"];
    let a = lettered(&rows);
    let tables = jc_tables(&[0.1; 5]);
    let right = PhyloTree::from_edges(
        6,
        &[(4, 0, 0.1), (4, 1, 0.1), (5, 2, 0.1), (5, 3, 0.1), (4, 5, 0.1)],
    )
    .unwrap();
    let wrong = PhyloTree::from_edges(
        6,
        &[(4, 0, 0.1), (4, 2, 0.1), (5, 1, 0.1), (5, 3, 0.1), (4, 5, 0.1)],
    )
    .unwrap();
    let l_right = alignment_likelihood(&a, &right, &tables).unwrap();
    let l_wrong = alignment_likelihood(&a, &wrong, &tables).unwrap();
    assert!(l_right.ln() > l_wrong.ln());
}

#[test]
fn alignment_must_fit_the_tree() {
    let a = lettered(&["AC", "AC"]);
    assert!(matches!(
        alignment_likelihood(&a, &quartet(), &jc_tables(&LENGTHS)),
        Err(PhyloError::AlignmentTreeMismatch { .. })
    ));
}

// ─── parameters ─────────────────────────────────────────────

#[test]
fn parameters_read_tables_from_the_graph() {
    let a = lettered(&["AC-G", "AC-T", "A-TG", "A--G", "##-#", "#-##"]);
    let mut indel = IndelModel::rs07().unwrap();
    indel.set_parameter("tau", 0.05).unwrap();
    let mut p = Parameters::new(quartet(), a.clone(), indel).unwrap();
    assert!(!p.has_substitution());
    assert!(matches!(p.likelihood(), Err(PhyloError::InvalidModel { .. })));

    let jc_model =
        reversible_markov_model(equ_model(4).unwrap(), uniform_frequencies_model(4).unwrap())
            .unwrap();
    p.set_substitution(jc_model).unwrap();
    assert!(p.has_substitution());
    let got = p.likelihood().unwrap();
    let want = alignment_likelihood(&a, &quartet(), &jc_tables(&LENGTHS)).unwrap();
    assert!(close(got.ln(), want.ln(), 1e-9));

    p.set_branch_length(0, 1.0).unwrap();
    let moved = p.likelihood().unwrap();
    let want = alignment_likelihood(&a, p.tree(), &jc_tables(&[1.0, 0.2, 0.3, 0.4, 0.5])).unwrap();
    assert!(close(moved.ln(), want.ln(), 1e-9));
}
