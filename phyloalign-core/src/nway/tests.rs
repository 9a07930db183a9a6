use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::*;
use crate::align::{get_pairwise_alignment, prior_branch, Alignment};
use crate::config::{DpConfig, SamplerConfig};
use crate::error::PhyloError;
use crate::hmm::states::{G1, M};
use crate::model::{equ_model, reversible_markov_model, uniform_frequencies_model, IndelModel};
use crate::phylo::PhyloTree;
use crate::prob::LogDouble;
use crate::state::Parameters;

/// ((0,1)4,(2,3)5); node 4 is the root.
fn quartet() -> PhyloTree {
    PhyloTree::from_edges(
        6,
        &[
            (4, 0, 0.1),
            (4, 1, 0.2),
            (5, 2, 0.3),
            (5, 3, 0.4),
            (4, 5, 0.5),
        ],
    )
    .unwrap()
}

/// Every column is connected; column 4 touches only the internal nodes.
fn quartet_alignment() -> Alignment {
    Alignment::from_rows(&[
        "AC-G-T", // 0
        "AC-G--", // 1
        "A-TG-T", // 2
        "A--G-T", // 3
        "AC-GAT", // 4
        "A-TGAT", // 5
    ])
    .unwrap()
}

fn params_with(alignment: Alignment) -> Parameters {
    let mut indel = IndelModel::rs07().unwrap();
    indel.set_parameter("lambda", -1.0).unwrap();
    indel.set_parameter("tau", 0.05).unwrap();
    Parameters::new(quartet(), alignment, indel).unwrap()
}

fn params() -> Parameters {
    params_with(quartet_alignment())
}

fn close(a: LogDouble, b: LogDouble, tol: f64) -> bool {
    (a.ln() - b.ln()).abs() < tol
}

const QUARTET_NODES: [usize; 6] = [0, 1, 2, 3, 4, 5];

// ─── state space ────────────────────────────────────────────

#[test]
fn state_counts() {
    assert_eq!(two_way::hmm().n_states(), 3);
    assert!(two_way::hmm().silent_states().is_empty());
    assert_eq!(three_way::hmm().n_states(), 35);
    assert_eq!(three_way::hmm().silent_states().len(), 1);
    assert_eq!(five_way::hmm().n_states(), 412);
    assert_eq!(five_way::hmm().silent_states().len(), 19);
}

#[test]
fn findstate_inverts_state_bits() {
    for hmm in [two_way::hmm(), three_way::hmm(), five_way::hmm()] {
        for s in 0..hmm.n_states() {
            assert_eq!(hmm.findstate(hmm.state_bits(s)), s);
            assert!(hmm.is_connected(hmm.presence_mask(s)));
        }
    }
    assert_eq!(three_way::hmm().try_findstate(0), None);
}

#[test]
#[should_panic(expected = "not a state")]
fn findstate_rejects_unknown_bits() {
    three_way::hmm().findstate(0);
}

#[test]
fn first_state_is_the_full_mask() {
    let hmm = three_way::hmm();
    assert_eq!(hmm.presence_mask(0), 0b1111);
    for j in 0..3 {
        assert!(hmm.advances(0, j));
        assert_eq!(hmm.substate(0, j), M);
    }
}

#[test]
fn connectivity() {
    let hmm = five_way::hmm();
    assert!(hmm.is_connected(0b110001)); // 0, 4, 5
    assert!(!hmm.is_connected(0b000101)); // 0, 2
    assert!(!hmm.is_connected(0));
    assert!(hmm.is_connected(0b111111));
}

#[test]
fn invalid_topologies() {
    assert!(NWayHmm::new(1, vec![], vec![0]).is_err());
    assert!(NWayHmm::new(3, vec![(0, 1)], vec![0]).is_err());
    assert!(NWayHmm::new(4, vec![(0, 1), (0, 1), (2, 3)], vec![1]).is_err());
    assert!(NWayHmm::new(2, vec![(0, 1)], vec![5]).is_err());
}

// ─── probabilities ──────────────────────────────────────────

#[test]
fn start_probability_of_a_lone_leaf_end() {
    let mut p = params();
    let nodes = three_way::get_nodes(p.tree(), 4).unwrap();
    let hmms = branch_hmms(three_way::hmm(), &mut p, &nodes).unwrap();
    let hmm = three_way::hmm();

    // Only local node 1 present; the other two edges have not started.
    let bits = hmm.encode(0b0010, &[G1, M, M]);
    let s = hmm.findstate(bits);
    assert!(hmm.emits(s));
    assert!(!hmm.advances(s, 1));
    let want = hmms[0].start(G1) * hmms[1].start_pi(M) * hmms[2].start_pi(M);
    assert!((hmm.start_p(s, &hmms) - want).abs() < 1e-15);

    let other = hmm.findstate(hmm.encode(0b0010, &[G1, G1, M]));
    assert_eq!(hmm.start_p(other, &hmms), 0.0);
}

#[test]
fn full_match_start_is_the_product_of_branch_starts() {
    let hmm = three_way::hmm();
    let s = hmm.findstate(hmm.encode(0b1111, &[M, M, M]));
    assert_eq!(s, 0);
    let mut rng = StdRng::seed_from_u64(17);
    for _ in 0..20 {
        let mut indel = IndelModel::rs07().unwrap();
        indel.set_parameter("lambda", rng.gen_range(-4.0..0.0)).unwrap();
        indel.set_parameter("tau", rng.gen_range(0.001..0.5)).unwrap();
        let mut p = Parameters::new(quartet(), quartet_alignment(), indel).unwrap();
        for b in 0..5 {
            p.set_branch_length(b, rng.gen_range(0.01..2.0)).unwrap();
        }
        let nodes = three_way::get_nodes(p.tree(), 4).unwrap();
        let hmms = branch_hmms(hmm, &mut p, &nodes).unwrap();
        let want: f64 = hmms.iter().map(|h| h.start(M)).product();
        assert!((hmm.start_p(s, &hmms) - want).abs() < 1e-12);
        let engine = hmm.dp_engine(&hmms).unwrap();
        assert!((engine.start_p(s) - want).abs() < 1e-12);
    }
}

#[test]
fn idle_edges_must_keep_their_state() {
    let mut p = params();
    let nodes = three_way::get_nodes(p.tree(), 4).unwrap();
    let hmms = branch_hmms(three_way::hmm(), &mut p, &nodes).unwrap();
    let hmm = three_way::hmm();
    let from = hmm.findstate(hmm.encode(0b1111, &[M, M, M]));
    let keeps = hmm.findstate(hmm.encode(0b0010, &[G1, M, M]));
    let changes = hmm.findstate(hmm.encode(0b0010, &[G1, G1, M]));
    assert!((hmm.get_q(from, keeps, &hmms) - hmms[0].q(M, G1)).abs() < 1e-15);
    assert_eq!(hmm.get_q(from, changes, &hmms), 0.0);
}

#[test]
fn composite_path_factorizes_over_branches() {
    let mut p = params();
    let a = p.alignment().clone();
    let hmm = five_way::hmm();
    let hmms = branch_hmms(hmm, &mut p, &QUARTET_NODES).unwrap();
    let path = hmm.get_path(&a, &QUARTET_NODES).unwrap();

    let mut want = LogDouble::ONE;
    for b in 0..5 {
        let (parent, child) = p.tree().branch(b);
        want *= prior_branch(&a, &p.branch_hmm(b).unwrap(), parent, child);
    }
    assert!(close(hmm.path_q(&path, &hmms).unwrap(), want, 1e-10));
}

#[test]
fn correction_is_the_node_length_term() {
    let mut p = params();
    let indel = p.indel_model().clone();
    let a = p.alignment().clone();
    let want = indel.lengthp(a.seqlength(4)).unwrap().powi(-2)
        * indel.lengthp(a.seqlength(5)).unwrap().powi(-2);
    let got = five_way::correction(&mut p, &QUARTET_NODES).unwrap();
    assert!(close(got, want, 1e-9));
}

#[test]
fn identical_states_have_unit_ratio() {
    let mut p1 = params();
    let mut p2 = p1.clone();
    let nodes = three_way::get_nodes(p1.tree(), 5).unwrap();
    let r = three_way::acceptance_ratio(&mut p1, &nodes, &mut p2, &nodes).unwrap();
    assert!(r.ln().abs() < 1e-12);
}

#[test]
fn two_way_path_is_the_branch_prior() {
    let mut p = params();
    let nodes = two_way::get_nodes(p.tree(), 0).unwrap();
    assert_eq!(nodes, vec![4, 0]);
    let a = p.alignment().clone();
    let want = prior_branch(&a, &p.branch_hmm(0).unwrap(), 4, 0);
    assert!(close(two_way::path_q(&mut p, &nodes).unwrap(), want, 1e-12));
    assert!(two_way::get_nodes(p.tree(), 9).is_err());
}

#[test]
fn engine_matches_composite() {
    let mut p = params();
    let hmm = three_way::hmm();
    let nodes = three_way::get_nodes(p.tree(), 4).unwrap();
    let hmms = branch_hmms(hmm, &mut p, &nodes).unwrap();
    let engine = hmm.dp_engine(&hmms).unwrap();
    assert_eq!(engine.n_states(), hmm.n_states());
    for s in 0..hmm.n_states() {
        assert_eq!(engine.emits(s), hmm.emits(s));
        assert_eq!(engine.start_p(s), hmm.start_p(s, &hmms));
        assert_eq!(engine.q(s, engine.end_state()), hmm.end_p(s, &hmms));
    }
    assert!(hmm.dp_engine(&hmms[..2]).is_err());
}

// ─── node selection ─────────────────────────────────────────

#[test]
fn node_selection() {
    let tree = quartet();
    assert_eq!(three_way::get_nodes(&tree, 4).unwrap(), vec![4, 0, 1, 5]);
    assert_eq!(three_way::get_nodes(&tree, 5).unwrap(), vec![5, 4, 2, 3]);
    assert!(matches!(
        three_way::get_nodes(&tree, 0),
        Err(PhyloError::NotInternalNode { node: 0 })
    ));
    assert_eq!(five_way::get_nodes(&tree, 4).unwrap(), QUARTET_NODES.to_vec());
    assert!(matches!(
        five_way::get_nodes(&tree, 0),
        Err(PhyloError::NotInternalBranch { branch: 0 })
    ));
}

#[test]
fn random_node_selection_keeps_the_topology() {
    let tree = quartet();
    let mut rng = StdRng::seed_from_u64(11);
    for _ in 0..20 {
        let n = three_way::get_nodes_random(&tree, 4, &mut rng).unwrap();
        assert_eq!(n[0], 4);
        let mut rest = n[1..].to_vec();
        rest.sort_unstable();
        assert_eq!(rest, vec![0, 1, 5]);

        let n = five_way::get_nodes_random(&tree, 4, &mut rng).unwrap();
        for (outer, center) in [(0, 4), (1, 4), (2, 5), (3, 5)] {
            assert!(tree.find_branch(n[outer], n[center]).is_some());
        }
        assert!(tree.find_branch(n[4], n[5]).is_some());
    }
}

// ─── alignment conversion ───────────────────────────────────

#[test]
fn five_way_round_trip() {
    let p = params();
    let a = p.alignment();
    let hmm = five_way::hmm();
    let path = hmm.get_path(a, &QUARTET_NODES).unwrap();
    assert_eq!(path.len(), a.length());
    assert!(!hmm.emits(path[4]));
    let b = hmm.construct(a, &path, &QUARTET_NODES, p.tree()).unwrap();
    assert_eq!(&b, a);
}

#[test]
fn three_way_round_trip_with_free_columns() {
    // Column 1 holds only node 2, which sits behind leaf-end 5.
    let a = Alignment::from_rows(&["A-AA", "A-A-", "AAA-", "A-AA", "A-AA", "A-AA"]).unwrap();
    let tree = quartet();
    let nodes = three_way::get_nodes(&tree, 4).unwrap();
    let path = three_way::get_path(&a, &nodes).unwrap();
    assert_eq!(path.len(), 3);
    let b = three_way::construct(&a, &path, &nodes, &tree).unwrap();
    assert_eq!(b, a);
}

#[test]
fn project_and_getorder() {
    let a = quartet_alignment();
    assert_eq!(getorder(&a, &[1]), vec![0, 1, 3]);
    let sub = project(&a, &[2, 5]);
    assert_eq!(sub.to_rows(), vec!["###-#", "#####"]);
    assert_eq!(getorder(&a, &[1, 2]), vec![0, 1, 2, 3, 5]);
}

#[test]
fn pairwise_from_path_matches_alignment() {
    let a = quartet_alignment();
    let hmm = five_way::hmm();
    let path = hmm.get_path(&a, &QUARTET_NODES).unwrap();
    for &(x, y) in hmm.edges() {
        assert_eq!(
            hmm.pairwise_from_path(&path, x, y),
            get_pairwise_alignment(&a, x, y)
        );
    }
}

#[test]
fn disconnected_column_is_rejected() {
    let a = Alignment::from_rows(&["AA", "A-", "AA", "A-", "A-", "A-"]).unwrap();
    assert!(matches!(
        five_way::get_path(&a, &QUARTET_NODES),
        Err(PhyloError::InvalidColumn { column: 1 })
    ));
    assert!(matches!(
        five_way::get_path(&a, &[0, 1, 2]),
        Err(PhyloError::NodeCount { expected: 6, got: 3 })
    ));
}

#[test]
fn local_free_column_order_survives() {
    // Column 0 holds only node 0, behind leaf-end 4; column 1 only the
    // center.
    let a = Alignment::from_rows(&["#-", "--", "--", "--", "--", "-#"]).unwrap();
    let tree = quartet();
    let nodes = three_way::get_nodes(&tree, 5).unwrap();
    assert_eq!(nodes, vec![5, 4, 2, 3]);
    let path = three_way::get_path(&a, &nodes).unwrap();
    assert_eq!(path.len(), 1);
    let b = three_way::construct(&a, &path, &nodes, &tree).unwrap();
    assert_eq!(b.to_rows(), a.to_rows());
}

#[test]
fn node_ids_are_validated() {
    let p = params();
    let a = p.alignment();
    let tree = p.tree();
    let hmm = five_way::hmm();
    assert!(matches!(
        hmm.get_path(a, &[0, 0, 2, 3, 4, 5]),
        Err(PhyloError::DuplicateNode { node: 0 })
    ));
    assert!(matches!(
        hmm.get_path(a, &[0, 1, 2, 3, 4, 9]),
        Err(PhyloError::NodeOutOfRange { node: 9, n: 6 })
    ));

    let path = hmm.get_path(a, &QUARTET_NODES).unwrap();
    assert!(matches!(
        hmm.construct(a, &path, &[0, 0, 2, 3, 4, 5], tree),
        Err(PhyloError::DuplicateNode { node: 0 })
    ));
    // 2 is not a neighbour of 4.
    assert!(matches!(
        hmm.construct(a, &path, &[2, 1, 0, 3, 4, 5], tree),
        Err(PhyloError::NotAdjacent { .. })
    ));
}

#[test]
fn sampler_rejects_bad_nodes() {
    let mut p = params();
    let config = SamplerConfig::default();
    let mut rng = StdRng::seed_from_u64(2);
    assert!(matches!(
        three_way::sample(&mut p, &[4, 4, 1, 5], &config, &mut rng),
        Err(PhyloError::DuplicateNode { node: 4 })
    ));
    assert!(matches!(
        three_way::sample(&mut p, &[4, 0, 1, 2], &config, &mut rng),
        Err(PhyloError::NotAdjacent { .. })
    ));
    assert!(matches!(
        three_way::sample(&mut p, &[4, 0, 1, 7], &config, &mut rng),
        Err(PhyloError::NodeOutOfRange { node: 7, .. })
    ));
}

#[test]
fn construct_rejects_mismatched_paths() {
    let p = params();
    let a = p.alignment();
    let hmm = five_way::hmm();
    let path = hmm.get_path(a, &QUARTET_NODES).unwrap();

    let mut long = path.clone();
    long.push(path[0]);
    assert!(matches!(
        hmm.construct(a, &long, &QUARTET_NODES, p.tree()),
        Err(PhyloError::InvalidPath { .. })
    ));
    let short = &path[..path.len() - 1];
    assert!(matches!(
        hmm.construct(a, short, &QUARTET_NODES, p.tree()),
        Err(PhyloError::InvalidPath { .. })
    ));
}

// ─── sampling ───────────────────────────────────────────────

#[test]
fn five_way_samples_keep_the_leaf_alignment() {
    let mut p = params();
    let leaves = [0, 1, 2, 3];
    let fixed = project(p.alignment(), &leaves);
    let config = SamplerConfig::default();
    let mut rng = StdRng::seed_from_u64(3);
    for _ in 0..30 {
        let sample = five_way::sample(&mut p, &QUARTET_NODES, &config, &mut rng).unwrap();
        assert_eq!(project(&sample.alignment, &leaves), fixed);
        assert_eq!(
            five_way::get_path(&sample.alignment, &QUARTET_NODES).unwrap(),
            sample.path
        );
        assert!(!sample.new_proposal.is_zero());
        assert!(!sample.old_proposal.is_zero());
        assert!(!sample.pr_sum.is_zero());
        assert_eq!(sample.old_path, five_way::get_path(p.alignment(), &QUARTET_NODES).unwrap());
        p.set_alignment(sample.alignment).unwrap();
    }
}

#[test]
fn three_way_samples_keep_each_group() {
    let a = Alignment::from_rows(&["A-AA", "A-A-", "AAA-", "A-AA", "A-AA", "A-AA"]).unwrap();
    let mut p = params_with(a);
    let nodes = three_way::get_nodes(p.tree(), 4).unwrap();
    let config = SamplerConfig::default();
    let mut rng = StdRng::seed_from_u64(5);
    for _ in 0..30 {
        let before = p.alignment().clone();
        let sample = three_way::sample(&mut p, &nodes, &config, &mut rng).unwrap();
        assert_eq!(project(&sample.alignment, &[0, 1, 5]), project(&before, &[0, 1, 5]));
        assert_eq!(project(&sample.alignment, &[5, 2, 3]), project(&before, &[5, 2, 3]));
        for leaf in [0, 1, 2, 3] {
            assert_eq!(sample.alignment.seqlength(leaf), before.seqlength(leaf));
        }
        p.set_alignment(sample.alignment).unwrap();
    }
}

#[test]
fn pruning_keeps_the_total() {
    let mut p = params();
    let nodes = three_way::get_nodes(p.tree(), 5).unwrap();
    let mut rng = StdRng::seed_from_u64(9);
    let pruned = SamplerConfig::default();
    let unpruned = SamplerConfig {
        prune: false,
        ..SamplerConfig::default()
    };
    let a = three_way::sample(&mut p, &nodes, &pruned, &mut rng).unwrap();
    let b = three_way::sample(&mut p, &nodes, &unpruned, &mut rng).unwrap();
    assert!(close(a.pr_sum, b.pr_sum, 1e-9));
    assert!(close(a.old_proposal, b.old_proposal, 1e-9));
}

const ALPHABET: [char; 4] = ['A', 'C', 'G', 'T'];

fn lettered(rows: &[&str]) -> Alignment {
    Alignment::from_sequences(rows, &ALPHABET).unwrap()
}

fn with_jc(mut p: Parameters) -> Parameters {
    let jc = reversible_markov_model(equ_model(4).unwrap(), uniform_frequencies_model(4).unwrap())
        .unwrap();
    p.set_substitution(jc).unwrap();
    p
}

/// Same gaps as `quartet_alignment`, with letters on the leaves.
fn lettered_quartet(leaves: [&str; 4]) -> Alignment {
    let [r0, r1, r2, r3] = leaves;
    lettered(&[r0, r1, r2, r3, "##-###", "#-####"])
}

#[test]
fn sequence_data_weights_the_total() {
    let a = lettered_quartet(["AC-G-T", "AC-G--", "A-TG-T", "A--G-T"]);
    let mut bare = params_with(a.clone());
    let mut with_data = with_jc(params_with(a));
    let likelihood = with_data.likelihood().unwrap();
    let config = SamplerConfig::default();

    for nodes in [
        QUARTET_NODES.to_vec(),
        three_way::get_nodes(bare.tree(), 4).unwrap(),
    ] {
        let hmm = if nodes.len() == 6 {
            five_way::hmm()
        } else {
            three_way::hmm()
        };
        let mut rng = StdRng::seed_from_u64(21);
        let without = sample_alignment(hmm, &mut bare, &nodes, &config, &mut rng).unwrap();
        let mut rng = StdRng::seed_from_u64(21);
        let with = sample_alignment(hmm, &mut with_data, &nodes, &config, &mut rng).unwrap();

        // Column likelihoods do not depend on where the resampled nodes
        // go, so they scale the total and leave the proposal alone.
        assert!(close(with.pr_sum, without.pr_sum * likelihood, 1e-9));
        assert!(close(with.old_proposal, without.old_proposal, 1e-9));
    }
}

#[test]
fn matching_residues_raise_the_total() {
    let config = SamplerConfig::default();
    let mut same = with_jc(params_with(lettered_quartet([
        "AA-A-A", "AA-A--", "A-AA-A", "A--A-A",
    ])));
    let mut mixed = with_jc(params_with(lettered_quartet([
        "AC-G-T", "CA-T--", "G-CA-C", "T--C-G",
    ])));
    let mut rng = StdRng::seed_from_u64(4);
    let a = five_way::sample(&mut same, &QUARTET_NODES, &config, &mut rng).unwrap();
    let b = five_way::sample(&mut mixed, &QUARTET_NODES, &config, &mut rng).unwrap();
    assert!(a.pr_sum.ln() > b.pr_sum.ln());
    assert!(!b.pr_sum.is_zero());
}

#[test]
fn sampled_alignments_keep_their_letters() {
    let a = lettered_quartet(["AC-G-T", "AC-G--", "A-TG-T", "A--G-T"]);
    let mut p = with_jc(params_with(a.clone()));
    let config = SamplerConfig::default();
    let mut rng = StdRng::seed_from_u64(8);
    for _ in 0..10 {
        let sample = five_way::sample(&mut p, &QUARTET_NODES, &config, &mut rng).unwrap();
        let leaves = [0, 1, 2, 3];
        assert_eq!(project(&sample.alignment, &leaves), project(&a, &leaves));
        for leaf in leaves {
            assert_eq!(sample.alignment.sequence(leaf), a.sequence(leaf));
        }
        assert_eq!(sample.alignment.sequence(4), None);
        p.set_alignment(sample.alignment).unwrap();
    }
}

#[test]
fn sampler_validates_config() {
    let mut p = params();
    let config = SamplerConfig {
        dp: DpConfig::default().with_beta(-1.0),
        prune: true,
    };
    let mut rng = StdRng::seed_from_u64(1);
    assert!(matches!(
        five_way::sample(&mut p, &QUARTET_NODES, &config, &mut rng),
        Err(PhyloError::InvalidConfig { .. })
    ));
}

fn connected_alignment() -> impl Strategy<Value = Alignment> {
    let hmm = five_way::hmm();
    let masks: Vec<u32> = (1u32..64).filter(|&m| hmm.is_connected(m)).collect();
    prop::collection::vec(prop::sample::select(masks), 0..10).prop_map(|cols| {
        let mut a = Alignment::new(6);
        for m in cols {
            a.push_column((0..6).filter(|&n| m >> n & 1 == 1).collect()).unwrap();
        }
        a
    })
}

proptest! {
    #[test]
    fn connected_alignments_round_trip(a in connected_alignment()) {
        let tree = quartet();
        let path = five_way::get_path(&a, &QUARTET_NODES).unwrap();
        let b = five_way::construct(&a, &path, &QUARTET_NODES, &tree).unwrap();
        prop_assert_eq!(b, a);
    }

    #[test]
    fn three_way_round_trip_for_every_center(a in connected_alignment()) {
        let tree = quartet();
        for center in [4, 5] {
            let nodes = three_way::get_nodes(&tree, center).unwrap();
            let path = three_way::get_path(&a, &nodes).unwrap();
            let b = three_way::construct(&a, &path, &nodes, &tree).unwrap();
            prop_assert_eq!(&b, &a);
        }
    }

    #[test]
    fn two_way_round_trip(a in connected_alignment(), branch in 0usize..5) {
        let tree = quartet();
        let nodes = two_way::get_nodes(&tree, branch).unwrap();
        let path = two_way::get_path(&a, &nodes).unwrap();
        let b = two_way::hmm().construct(&a, &path, &nodes, &tree).unwrap();
        prop_assert_eq!(b, a);
    }
}
