use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ndarray::Array2;
use proptest::prelude::*;

use super::*;
use crate::error::PhyloError;
use crate::graph::{Builtin, FnOp, FromValue, Value};
use crate::hmm::states::{E, G1, G2, M, S};
use crate::prob::DistributionRegistry;

fn close(a: f64, b: f64, tol: f64) -> bool {
    (a - b).abs() <= tol
}

fn x_model(name: &str, x: f64) -> Model {
    Model::leaf(name, vec![Parameter::new("x", x)], |p| {
        Ok(Value::Double(f64::from_value(&p[0].value)?))
    })
    .unwrap()
}

fn sum_model(children: Vec<Model>) -> Model {
    Model::composite(
        "sum",
        vec![Parameter::new("scale", 1.0)],
        children,
        |params, results| {
            let scale = f64::from_value(&params[0].value)?;
            let mut total = 0.0;
            for r in results {
                total += f64::from_value(r)?;
            }
            Ok(Value::Double(scale * total))
        },
    )
    .unwrap()
}

fn row_sums(p: &Array2<f64>) -> Vec<f64> {
    p.rows().into_iter().map(|r| r.sum()).collect()
}

// ─── model layer ────────────────────────────────────────────

#[test]
fn composite_parameters_are_flattened() {
    let m = sum_model(vec![x_model("a", 1.0), x_model("b", 2.0)]);
    assert_eq!(m.n_parameters(), 3);
    assert_eq!(m.n_own_parameters(), 1);
    assert_eq!(m.parameter_names(), vec!["scale", "a::x", "b::x"]);
    assert_eq!(m.find_parameter("b::x"), Some(2));
    assert_eq!(m.result_as::<f64>().unwrap(), 3.0);
}

#[test]
fn unique_child_names_are_not_prefixed() {
    let child = Model::leaf("c", vec![Parameter::new("y", 1.0)], |p| Ok(p[0].value.clone()))
        .unwrap();
    let m = sum_model(vec![child]);
    assert_eq!(m.parameter_names(), vec!["scale", "y"]);
}

#[test]
fn writes_route_to_owning_child() {
    let mut m = sum_model(vec![x_model("a", 1.0), x_model("b", 2.0)]);
    assert_eq!(m.result_as::<f64>().unwrap(), 3.0);
    m.set_parameter("b::x", Value::Double(5.0)).unwrap();
    assert_eq!(m.children()[1].parameter(0).unwrap().value, Value::Double(5.0));
    assert_eq!(m.parameter(2).unwrap().value, Value::Double(5.0));
    assert_eq!(m.result_as::<f64>().unwrap(), 6.0);
    m.set_parameter_value(0, Value::Double(2.0)).unwrap();
    assert_eq!(m.result_as::<f64>().unwrap(), 12.0);
}

#[test]
fn parameter_errors() {
    let mut m = sum_model(vec![x_model("a", 1.0)]);
    assert!(matches!(
        m.set_parameter("nope", Value::Double(0.0)),
        Err(PhyloError::UnknownParameter { .. })
    ));
    assert!(matches!(
        m.set_parameter_value(7, Value::Double(0.0)),
        Err(PhyloError::ParameterIndex { index: 7, n: 2 })
    ));
    let dup = Model::leaf(
        "dup",
        vec![Parameter::new("x", 1.0), Parameter::new("x", 2.0)],
        |_| Ok(Value::Bool(true)),
    );
    assert!(matches!(dup, Err(PhyloError::DuplicateParameter { .. })));
}

#[test]
fn result_is_memoized_until_a_write() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let mut m = Model::leaf("count", vec![Parameter::new("x", 1.0)], move |p| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(p[0].value.clone())
    })
    .unwrap();
    assert!(!m.is_computed());
    m.result().unwrap();
    m.result().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(m.is_computed());

    m.set_parameter("x", Value::Double(2.0)).unwrap();
    assert!(!m.is_computed());
    assert_eq!(m.result_as::<f64>().unwrap(), 2.0);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn child_write_clears_parent_memo() {
    let mut m = sum_model(vec![x_model("a", 1.0)]);
    m.result().unwrap();
    m.set_parameter("x", Value::Double(4.0)).unwrap();
    assert!(!m.is_computed());
    assert!(!m.children()[0].is_computed());
    assert_eq!(m.result_as::<f64>().unwrap(), 4.0);
}

#[test]
fn operation_model_reads_slots() {
    let m = Model::operation(
        "scaled",
        Arc::new(Builtin::Multiply),
        vec![Parameter::new("k", 3.0)],
        vec![x_model("a", 2.0)],
        vec![ArgSlot::Parameter(0), ArgSlot::Submodel(0)],
    )
    .unwrap();
    assert_eq!(m.result_as::<f64>().unwrap(), 6.0);

    let c = Model::operation(
        "const",
        Arc::new(Builtin::Add),
        Vec::new(),
        Vec::new(),
        vec![ArgSlot::Constant(Value::Double(1.0)), ArgSlot::Constant(Value::Double(2.0))],
    )
    .unwrap();
    assert_eq!(c.result_as::<f64>().unwrap(), 3.0);
}

#[test]
fn operation_model_checks_slots() {
    let op = Arc::new(FnOp::new("pair", 2, |_| Ok(Value::Bool(true))));
    assert!(matches!(
        Model::operation("m", op.clone(), Vec::new(), Vec::new(), vec![ArgSlot::Parameter(0)]),
        Err(PhyloError::Arity { expected: 2, got: 1, .. })
    ));
    assert!(matches!(
        Model::operation(
            "m",
            op,
            Vec::new(),
            Vec::new(),
            vec![ArgSlot::Parameter(0), ArgSlot::Submodel(0)]
        ),
        Err(PhyloError::SlotOutOfRange { slot: 0, .. })
    ));
}

#[test]
fn prior_multiplies_parameter_priors() {
    let registry = DistributionRegistry::with_builtins();
    let hky = hky_model(4).unwrap();
    let freqs = free_frequencies_model(4).unwrap();
    let m = reversible_markov_model(hky, freqs).unwrap();

    let expected = registry
        .density("log_laplace", &[2.0], &[2f64.ln(), 0.25])
        .unwrap()
        * registry
            .density("dirichlet", &[0.25; 4], &[1.0; 4])
            .unwrap();
    assert!(close(m.prior(&registry).unwrap().ln(), expected.ln(), 1e-12));

    let no_priors = equ_model(4).unwrap();
    assert_eq!(no_priors.prior(&registry).unwrap().ln(), 0.0);
}

// ─── substitution ───────────────────────────────────────────

#[test]
fn equal_rates_match_jukes_cantor() {
    let s = equ_model(4).unwrap().result_as::<Array2<f64>>().unwrap();
    let m = ReversibleMarkov::from_exchange(&s, &[0.25; 4]).unwrap();
    assert!(close(m.rate(), 1.0, 1e-12));
    for t in [0.0, 0.1, 0.7, 3.0] {
        let p = m.transition_p(t);
        let same = 0.25 + 0.75 * (-4.0 * t / 3.0).exp();
        let diff = 0.25 - 0.25 * (-4.0 * t / 3.0).exp();
        for i in 0..4 {
            for j in 0..4 {
                let want = if i == j { same } else { diff };
                assert!(close(p[[i, j]], want, 1e-9), "t={t} ({i},{j})");
            }
        }
    }
}

#[test]
fn hky_transition_probabilities_are_reversible() {
    let mut hky = hky_model(4).unwrap();
    hky.set_parameter("kappa", Value::Double(4.0)).unwrap();
    let s = hky.result_as::<Array2<f64>>().unwrap();
    assert_eq!(s[[0, 2]], 4.0);
    assert_eq!(s[[1, 3]], 4.0);
    assert_eq!(s[[0, 1]], 1.0);

    let pi = [0.1, 0.2, 0.3, 0.4];
    let m = ReversibleMarkov::from_exchange(&s, &pi).unwrap();
    assert!(close(m.rate(), 1.0, 1e-12));
    assert!(m.raw_rate() > 0.0);

    let p0 = m.transition_p(0.0);
    for i in 0..4 {
        for j in 0..4 {
            let want = if i == j { 1.0 } else { 0.0 };
            assert!(close(p0[[i, j]], want, 1e-9));
        }
    }
    let p = m.transition_p(0.4);
    for total in row_sums(&p) {
        assert!(close(total, 1.0, 1e-9));
    }
    for i in 0..4 {
        for j in 0..4 {
            assert!(close(pi[i] * p[[i, j]], pi[j] * p[[j, i]], 1e-9));
        }
    }
    let far = m.transition_p(200.0);
    for i in 0..4 {
        for j in 0..4 {
            assert!(close(far[[i, j]], pi[j], 1e-6));
        }
    }
}

#[test]
fn gtr_uses_six_rates() {
    let mut gtr = gtr_model(4).unwrap();
    gtr.set_parameter("rates", Value::Vector(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]))
        .unwrap();
    let s = gtr.result_as::<Array2<f64>>().unwrap();
    assert_eq!(s[[0, 1]], 1.0);
    assert_eq!(s[[2, 0]], 2.0);
    assert_eq!(s[[3, 2]], 6.0);
    assert_eq!(s[[1, 1]], 0.0);
}

#[test]
fn nucleotide_models_reject_other_alphabets() {
    assert!(matches!(
        hky_model(20),
        Err(PhyloError::UnsupportedAlphabet { model: "HKY", size: 20 })
    ));
    assert!(matches!(
        gtr_model(3),
        Err(PhyloError::UnsupportedAlphabet { model: "GTR", .. })
    ));
    assert!(equ_model(20).is_ok());
}

#[test]
fn markov_construction_errors() {
    let s = Array2::<f64>::ones((4, 4));
    assert!(matches!(
        ReversibleMarkov::from_exchange(&s, &[0.5, 0.5]),
        Err(PhyloError::AlphabetMismatch { a: 4, b: 2 })
    ));
    assert!(matches!(
        ReversibleMarkov::from_exchange(&s, &[0.5, 0.5, 0.0, 0.0]),
        Err(PhyloError::InvalidModel { .. })
    ));
}

#[test]
fn zero_rate_is_left_unscaled() {
    let s = Array2::<f64>::zeros((3, 3));
    let m = ReversibleMarkov::from_exchange(&s, &[0.2, 0.3, 0.5]).unwrap();
    assert_eq!(m.raw_rate(), 0.0);
    let p = m.transition_p(5.0);
    for i in 0..3 {
        assert!(close(p[[i, i]], 1.0, 1e-12));
    }
}

#[test]
fn markov_model_follows_frequency_writes() {
    let mut m = reversible_markov_model(hky_model(4).unwrap(), free_frequencies_model(4).unwrap())
        .unwrap();
    assert_eq!(m.name(), "HKY+F");
    assert_eq!(m.parameter_names(), vec!["kappa", "pi"]);
    m.set_parameter("pi", Value::Vector(vec![1.0, 2.0, 3.0, 4.0]))
        .unwrap();
    let markov = m.result_as::<ReversibleMarkov>().unwrap();
    let pi = markov.frequencies();
    assert!(close(pi[3], 0.4, 1e-12));
    assert!(close(markov.rate(), 1.0, 1e-12));

    let uniform =
        reversible_markov_model(equ_model(5).unwrap(), uniform_frequencies_model(5).unwrap())
            .unwrap();
    assert_eq!(uniform.result_as::<ReversibleMarkov>().unwrap().n_letters(), 5);
}

#[test]
fn gamma_bins_have_mean_one() {
    for alpha in [0.2, 1.0, 5.0] {
        let bins = gamma_bins(alpha, 4).unwrap();
        assert_eq!(bins.len(), 4);
        assert!(close(bins.mean(), 1.0, 1e-9));
        assert!(bins.values.windows(2).all(|w| w[0] < w[1]));
    }
    assert!(gamma_bins(1.0, 0).is_err());
    assert!(gamma_bins(-1.0, 4).is_err());
}

#[test]
fn gamma_rates_wrap_base_chain() {
    let base = reversible_markov_model(equ_model(4).unwrap(), uniform_frequencies_model(4).unwrap())
        .unwrap();
    let mut g = gamma_rates(base, 4).unwrap();
    assert_eq!(g.parameter_names(), vec!["alpha"]);
    let mix = g.result_as::<MultiModel>().unwrap();
    assert_eq!(mix.n_bins(), 4);
    let ps = mix.transition_p(0.3);
    assert_eq!(ps.len(), 4);
    for p in &ps {
        for total in row_sums(p) {
            assert!(close(total, 1.0, 1e-9));
        }
    }
    for total in row_sums(&mix.mixed_transition_p(0.3)) {
        assert!(close(total, 1.0, 1e-9));
    }

    let before = mix.bins.values.clone();
    g.set_parameter("alpha", Value::Double(0.3)).unwrap();
    let after = g.result_as::<MultiModel>().unwrap();
    assert_ne!(before, after.bins.values);
}

#[test]
fn discrete_distribution_checks_weights() {
    assert!(DiscreteDistribution::new(vec![1.0, 2.0], vec![0.5, 0.5]).is_ok());
    assert!(DiscreteDistribution::new(vec![1.0, 2.0], vec![0.5, 0.6]).is_err());
    assert!(DiscreteDistribution::new(vec![1.0], vec![0.5, 0.5]).is_err());
}

// ─── indel ──────────────────────────────────────────────────

fn assert_same_hmm(a: &crate::hmm::PairHmm, b: &crate::hmm::PairHmm) {
    for from in [M, G1, G2, S] {
        for to in [M, G1, G2, E] {
            assert!(
                close(a.q(from, to), b.q(from, to), 1e-12),
                "({from},{to}): {} vs {}",
                a.q(from, to),
                b.q(from, to)
            );
        }
    }
    for s in [M, G1, G2, E] {
        assert!(close(a.start_pi(s), b.start_pi(s), 1e-12));
    }
}

#[test]
fn tkf1_transducer_matches_hmm() {
    let mut model = IndelModel::tkf1().unwrap();
    model.set_parameter("lambda", -1.5).unwrap();
    model.set_parameter("mean_length", 20.0).unwrap();
    for t in [0.0, 0.05, 0.5, 2.0] {
        let hmm = model.branch_hmm(t).unwrap();
        let folded = model
            .tkf1_transducer(t)
            .unwrap()
            .remove_silent()
            .unwrap()
            .to_pair_hmm()
            .unwrap();
        assert_same_hmm(&hmm, &folded);
    }
    assert!(IndelModel::rs07().unwrap().tkf1_transducer(1.0).is_err());
}

#[test]
fn zero_length_branch_is_indel_free() {
    for model in [IndelModel::rs07().unwrap(), IndelModel::tkf1().unwrap()] {
        let hmm = model.branch_hmm(0.0).unwrap();
        for from in [S, M] {
            assert_eq!(hmm.q(from, G1), 0.0, "{:?}", model.kind());
            assert_eq!(hmm.q(from, G2), 0.0, "{:?}", model.kind());
        }
    }
}

#[test]
fn rs07_rows() {
    let mut model = IndelModel::rs07().unwrap();
    model.set_parameter("lambda", 0.0).unwrap();
    model.set_parameter("epsilon", 0.5).unwrap();
    model.set_parameter("tau", 0.1).unwrap();
    let t = 2f64.ln();
    let delta = 0.25;
    let hmm = model.branch_hmm(t).unwrap();
    assert!(close(hmm.q(M, M), 0.9 * 0.5, 1e-12));
    assert!(close(hmm.q(M, G1), 0.9 * delta, 1e-12));
    assert!(close(hmm.q(G1, G1), 0.9 * (0.5 + 0.5 * delta), 1e-12));
    assert!(close(hmm.q(G1, G2), 0.9 * 0.5 * delta, 1e-12));
    assert!(close(hmm.q(G2, M), 0.9 * 0.5 * 0.5, 1e-12));
    assert!(close(hmm.q(G2, E), 0.1, 1e-12));
    assert!(close(hmm.start(M), hmm.q(M, M), 1e-12));
}

#[test]
fn length_priors_sum_to_one() {
    let mut rs07 = IndelModel::rs07().unwrap();
    rs07.set_parameter("tau", 0.05).unwrap();
    let mut tkf1 = IndelModel::tkf1().unwrap();
    tkf1.set_parameter("mean_length", 10.0).unwrap();
    for model in [rs07, tkf1] {
        let total: f64 = (0..2000).map(|l| model.lengthp(l).unwrap().to_f64()).sum();
        assert!(close(total, 1.0, 1e-9), "{:?}: {total}", model.kind());
    }
}

#[test]
fn long_sequences_keep_their_length() {
    let mut model = IndelModel::rs07().unwrap();
    model.set_parameter("tau", 0.5).unwrap();
    let l = i32::MAX as usize + 10;
    let got = model.lengthp(l).unwrap().ln();
    assert!(close(got, (l as f64 + 1.0) * 0.5f64.ln(), 1e-6 * got.abs()));
}

#[test]
fn zero_end_probability_is_rejected() {
    let mut model = IndelModel::rs07().unwrap();
    model.set_parameter("tau", 0.0).unwrap();
    assert!(matches!(model.lengthp(3), Err(PhyloError::InvalidModel { .. })));
}

#[test]
fn indel_parameters_and_prior() {
    let registry = DistributionRegistry::with_builtins();
    let model = IndelModel::rs07().unwrap();
    assert_eq!(model.parameter_names(), vec!["lambda", "epsilon", "tau"]);
    assert!(model.parameters()[2].fixed);
    assert_eq!(model.values().unwrap(), vec![-4.0, 0.25, 0.001]);

    let expected = registry.density("laplace", &[-4.0], &[-4.0, 0.707]).unwrap()
        * registry.density("beta", &[0.25], &[1.5, 8.0]).unwrap();
    assert!(close(model.prior(&registry).unwrap().ln(), expected.ln(), 1e-12));
}

#[test]
fn unknown_indel_parameter() {
    let mut model = IndelModel::tkf1().unwrap();
    assert!(matches!(
        model.set_parameter("epsilon", 0.1),
        Err(PhyloError::UnknownParameter { .. })
    ));
}

proptest! {
    #[test]
    fn branch_hmms_are_valid(
        lambda in -6.0f64..1.0,
        epsilon in 0.0f64..0.95,
        t in 0.0f64..5.0,
        mean_length in 1.0f64..500.0,
    ) {
        let mut rs07 = IndelModel::rs07().unwrap();
        rs07.set_parameter("lambda", lambda).unwrap();
        rs07.set_parameter("epsilon", epsilon).unwrap();
        prop_assert!(rs07.branch_hmm(t).is_ok());

        let mut tkf1 = IndelModel::tkf1().unwrap();
        tkf1.set_parameter("lambda", lambda).unwrap();
        tkf1.set_parameter("mean_length", mean_length).unwrap();
        prop_assert!(tkf1.branch_hmm(t).is_ok());
    }
}
