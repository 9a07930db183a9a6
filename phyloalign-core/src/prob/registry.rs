use vector_map::VecMap;

use super::distribution::{dirichlet_pdf, Distribution};
use super::LogDouble;
use crate::error::{PhyloError, PhyloResult};

/// Density of a (possibly vector-valued) point given hyperparameters.
pub type DensityFn = fn(&[f64], &[f64]) -> PhyloResult<LogDouble>;

#[derive(Clone, Copy, Debug)]
pub struct DensityEntry {
    /// Number of hyperparameters, or `None` when it depends on the point
    /// (e.g. one concentration per Dirichlet component).
    pub n_hyper: Option<usize>,
    pub density: DensityFn,
}

/// Named prior densities. Built once by the caller and passed by
/// reference to whatever needs to score a prior.
#[derive(Clone, Debug, Default)]
pub struct DistributionRegistry {
    densities: VecMap<String, DensityEntry>,
}

fn scalar_point(name: &str, x: &[f64]) -> PhyloResult<f64> {
    match x {
        [v] => Ok(*v),
        _ => Err(PhyloError::DistributionArgs {
            name: name.to_string(),
            expected: 1,
            got: x.len(),
        }),
    }
}

fn uniform_density(x: &[f64], h: &[f64]) -> PhyloResult<LogDouble> {
    let v = scalar_point("uniform", x)?;
    Ok(Distribution::Uniform { start: h[0], end: h[1] }.pdf(v))
}

fn exponential_density(x: &[f64], h: &[f64]) -> PhyloResult<LogDouble> {
    let v = scalar_point("exponential", x)?;
    Ok(Distribution::Exponential { mu: h[0] }.pdf(v))
}

fn gamma_density(x: &[f64], h: &[f64]) -> PhyloResult<LogDouble> {
    let v = scalar_point("gamma", x)?;
    Ok(Distribution::Gamma { shape: h[0], scale: h[1] }.pdf(v))
}

fn beta_density(x: &[f64], h: &[f64]) -> PhyloResult<LogDouble> {
    let v = scalar_point("beta", x)?;
    Ok(Distribution::Beta { a: h[0], b: h[1] }.pdf(v))
}

fn normal_density(x: &[f64], h: &[f64]) -> PhyloResult<LogDouble> {
    let v = scalar_point("normal", x)?;
    Ok(Distribution::Normal { mu: h[0], sigma: h[1] }.pdf(v))
}

fn log_normal_density(x: &[f64], h: &[f64]) -> PhyloResult<LogDouble> {
    let v = scalar_point("log_normal", x)?;
    Ok(Distribution::LogNormal { lmu: h[0], lsigma: h[1] }.pdf(v))
}

fn cauchy_density(x: &[f64], h: &[f64]) -> PhyloResult<LogDouble> {
    let v = scalar_point("cauchy", x)?;
    Ok(Distribution::Cauchy { location: h[0], scale: h[1] }.pdf(v))
}

fn laplace_density(x: &[f64], h: &[f64]) -> PhyloResult<LogDouble> {
    let v = scalar_point("laplace", x)?;
    Ok(Distribution::Laplace { location: h[0], scale: h[1] }.pdf(v))
}

fn log_laplace_density(x: &[f64], h: &[f64]) -> PhyloResult<LogDouble> {
    let v = scalar_point("log_laplace", x)?;
    Ok(Distribution::LogLaplace { location: h[0], scale: h[1] }.pdf(v))
}

impl DistributionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut r = Self::new();
        r.register("uniform", Some(2), uniform_density);
        r.register("exponential", Some(1), exponential_density);
        r.register("gamma", Some(2), gamma_density);
        r.register("beta", Some(2), beta_density);
        r.register("normal", Some(2), normal_density);
        r.register("log_normal", Some(2), log_normal_density);
        r.register("cauchy", Some(2), cauchy_density);
        r.register("laplace", Some(2), laplace_density);
        r.register("log_laplace", Some(2), log_laplace_density);
        r.register("dirichlet", None, dirichlet_pdf);
        r
    }

    /// Adds or replaces a density.
    pub fn register(&mut self, name: &str, n_hyper: Option<usize>, density: DensityFn) {
        self.densities
            .insert(name.to_string(), DensityEntry { n_hyper, density });
    }

    pub fn lookup(&self, name: &str) -> PhyloResult<DensityEntry> {
        self.densities
            .get(&name.to_string())
            .copied()
            .ok_or_else(|| PhyloError::UnknownDistribution {
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.densities.get(&name.to_string()).is_some()
    }

    pub fn density(&self, name: &str, x: &[f64], hyper: &[f64]) -> PhyloResult<LogDouble> {
        let entry = self.lookup(name)?;
        if let Some(n) = entry.n_hyper {
            if n != hyper.len() {
                return Err(PhyloError::DistributionArgs {
                    name: name.to_string(),
                    expected: n,
                    got: hyper.len(),
                });
            }
        }
        (entry.density)(x, hyper)
    }
}
