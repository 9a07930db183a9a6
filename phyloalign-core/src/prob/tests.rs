use super::special::{betai, erf, gammainc, ln_gamma};
use super::*;

use proptest::prelude::*;

fn close(a: f64, b: f64, tol: f64) -> bool {
    (a - b).abs() <= tol * (1.0 + a.abs().max(b.abs()))
}

// ─── LogDouble ──────────────────────────────────────────────

#[test]
fn log_double_zero_and_one() {
    assert!(LogDouble::ZERO.is_zero());
    assert_eq!(LogDouble::new(0.0), LogDouble::ZERO);
    assert_eq!(LogDouble::new(1.0), LogDouble::ONE);
    assert_eq!(LogDouble::ZERO + LogDouble::new(0.25), LogDouble::new(0.25));
    assert!((LogDouble::ZERO * LogDouble::new(0.5)).is_zero());
}

#[test]
fn log_double_tiny_products_do_not_underflow() {
    let p = LogDouble::new(1e-200);
    let q = p * p * p;
    assert!(!q.is_zero());
    assert!((q.ln() - 3.0 * 1e-200f64.ln()).abs() < 1e-9);
    assert!(q < p);
}

#[test]
fn log_double_pow2() {
    assert!((LogDouble::pow2(10).to_f64() - 1024.0).abs() < 1e-9);
    assert!((LogDouble::pow2(-3).to_f64() - 0.125).abs() < 1e-15);
}

#[test]
fn log_double_sum_and_product() {
    let xs = [0.1, 0.2, 0.3];
    let s: LogDouble = xs.iter().map(|&x| LogDouble::new(x)).sum();
    let p: LogDouble = xs.iter().map(|&x| LogDouble::new(x)).product();
    assert!((s.to_f64() - 0.6).abs() < 1e-12);
    assert!((p.to_f64() - 0.006).abs() < 1e-15);
}

#[test]
fn log_double_powf_zero_exponent() {
    assert_eq!(LogDouble::ZERO.powf(0.0), LogDouble::ONE);
    assert!((LogDouble::new(0.5).powf(-1.0).to_f64() - 2.0).abs() < 1e-12);
}

proptest! {
    #[test]
    fn log_double_tracks_f64(a in 0.0f64..10.0, b in 0.0f64..10.0) {
        let la = LogDouble::new(a);
        let lb = LogDouble::new(b);
        prop_assert!(close((la + lb).to_f64(), a + b, 1e-12));
        prop_assert!(close((la * lb).to_f64(), a * b, 1e-12));
        prop_assert_eq!(la < lb, a < b);
    }
}

// ─── special functions ──────────────────────────────────────

#[test]
fn ln_gamma_integers() {
    assert!((ln_gamma(1.0)).abs() < 1e-10);
    assert!((ln_gamma(5.0) - 24.0f64.ln()).abs() < 1e-10);
}

#[test]
fn erf_symmetry() {
    assert!(erf(0.0).abs() < 1e-7);
    assert!((erf(1.0) + erf(-1.0)).abs() < 1e-12);
}

#[test]
fn incomplete_functions() {
    // P(1, x) = 1 - e^{-x}
    assert!((gammainc(1.0, 2.0) - (1.0 - (-2.0f64).exp())).abs() < 1e-10);
    // I_x(1, 1) = x
    assert!((betai(1.0, 1.0, 0.3) - 0.3).abs() < 1e-10);
}

// ─── distributions ──────────────────────────────────────────

#[test]
fn quantile_inverts_cdf() {
    let dists = [
        Distribution::Exponential { mu: 2.0 },
        Distribution::Gamma { shape: 2.5, scale: 0.7 },
        Distribution::Beta { a: 2.0, b: 5.0 },
        Distribution::Normal { mu: 1.0, sigma: 3.0 },
        Distribution::LogNormal { lmu: 0.0, lsigma: 0.5 },
        Distribution::Cauchy { location: 0.0, scale: 1.0 },
        Distribution::Laplace { location: -4.0, scale: 1.0 },
        Distribution::LogLaplace { location: 0.0, scale: 0.5 },
        Distribution::Uniform { start: -1.0, end: 3.0 },
    ];
    for d in dists {
        for &p in &[0.05, 0.3, 0.5, 0.9] {
            let x = d.quantile(p);
            assert!(
                (d.cdf(x) - p).abs() < 1e-5,
                "{}: cdf(quantile({p})) = {}",
                d.name(),
                d.cdf(x)
            );
        }
    }
}

#[test]
fn gamma_large_shape_uses_lognormal() {
    let d = Distribution::Gamma { shape: 5000.0, scale: 1.0 / 5000.0 };
    let median = d.quantile(0.5);
    assert!((median - 1.0).abs() < 0.01);
    assert!(d.pdf(1.0).ln().is_finite());
}

#[test]
fn beta_hyperparameters_are_clamped() {
    let negative = Distribution::Beta { a: -1.0, b: 3.0 };
    let uniform = Distribution::Beta { a: 1.0, b: 1.0 };
    assert!((negative.cdf(0.4) - uniform.cdf(0.4)).abs() < 1e-12);

    let huge = Distribution::Beta { a: 1000.0, b: 500.0 };
    let scaled = Distribution::Beta { a: 100.0, b: 50.0 };
    assert!((huge.mean() - scaled.mean()).abs() < 1e-12);
}

#[test]
fn exponential_pdf_known() {
    let d = Distribution::Exponential { mu: 0.5 };
    assert!((d.pdf(1.0).to_f64() - 2.0 * (-2.0f64).exp()).abs() < 1e-12);
    assert!(d.pdf(-1.0).is_zero());
}

#[test]
fn dirichlet_uniform_on_simplex() {
    let p = dirichlet_pdf(&[0.2, 0.3, 0.5], &[1.0, 1.0, 1.0]).unwrap();
    assert!((p.to_f64() - 2.0).abs() < 1e-9);
    let off = dirichlet_pdf(&[0.2, 0.3, 0.6], &[1.0, 1.0, 1.0]).unwrap();
    assert!(off.is_zero());
    assert!(dirichlet_pdf(&[0.5, 0.5], &[1.0]).is_err());
}

// ─── registry ───────────────────────────────────────────────

#[test]
fn registry_builtins() {
    let r = DistributionRegistry::with_builtins();
    let p = r.density("exponential", &[1.0], &[1.0]).unwrap();
    assert!((p.to_f64() - (-1.0f64).exp()).abs() < 1e-12);
    assert!(r.contains("log_laplace"));
}

#[test]
fn registry_errors() {
    let r = DistributionRegistry::with_builtins();
    assert!(matches!(
        r.density("no_such", &[1.0], &[]),
        Err(crate::error::PhyloError::UnknownDistribution { .. })
    ));
    assert!(matches!(
        r.density("gamma", &[1.0], &[1.0]),
        Err(crate::error::PhyloError::DistributionArgs { .. })
    ));
    assert!(r.density("normal", &[1.0, 2.0], &[0.0, 1.0]).is_err());
}

#[test]
fn registry_custom_density() {
    fn flat(_: &[f64], _: &[f64]) -> crate::error::PhyloResult<LogDouble> {
        Ok(LogDouble::ONE)
    }
    let mut r = DistributionRegistry::new();
    assert!(!r.contains("flat"));
    r.register("flat", Some(0), flat);
    assert_eq!(r.density("flat", &[3.0], &[]).unwrap(), LogDouble::ONE);
}
