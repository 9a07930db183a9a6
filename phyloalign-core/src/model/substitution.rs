use std::sync::Arc;

use ndarray::Array2;
use tracing::warn;

use super::base::{ArgSlot, Model};
use super::parameter::{Bounds, Parameter, Prior};
use crate::error::{PhyloError, PhyloResult};
use crate::graph::{FnOp, FromValue, Value};
use crate::linalg;
use crate::prob::Distribution;

/// Nucleotide order assumed by the 4-letter exchange models.
pub const NUCLEOTIDES: [char; 4] = ['A', 'C', 'G', 'T'];

/// Pairs of the 6 GTR exchangeabilities, in parameter order.
const GTR_PAIRS: [(usize, usize); 6] = [(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)];

/// A reversible continuous-time Markov chain, normalized to one expected
/// substitution per unit time.
#[derive(Clone, Debug, PartialEq)]
pub struct ReversibleMarkov {
    pi: Vec<f64>,
    q: Array2<f64>,
    /// Rate before normalization.
    raw_rate: f64,
    eigenvalues: Vec<f64>,
    /// Orthonormal eigenvectors of the symmetrized rate matrix, one per
    /// column.
    eigenvectors: Array2<f64>,
}

impl ReversibleMarkov {
    /// `Q_ij = S_ij pi_j` for `i != j`, rescaled so that
    /// `-sum_i pi_i Q_ii = 1`.
    pub fn from_exchange(s: &Array2<f64>, pi: &[f64]) -> PhyloResult<Self> {
        let n = pi.len();
        if s.nrows() != s.ncols() {
            return Err(PhyloError::TransitionShape {
                expected: s.nrows(),
                rows: s.nrows(),
                cols: s.ncols(),
            });
        }
        if s.nrows() != n {
            return Err(PhyloError::AlphabetMismatch { a: s.nrows(), b: n });
        }
        if let Some(p) = pi.iter().find(|&&p| p.is_nan() || p <= 0.0) {
            return Err(PhyloError::InvalidModel {
                msg: format!("equilibrium frequency {p} is not positive"),
            });
        }
        for i in 0..n {
            for j in (i + 1)..n {
                if (s[[i, j]] - s[[j, i]]).abs() > 1e-12 || s[[i, j]] < 0.0 {
                    return Err(PhyloError::InvalidModel {
                        msg: format!("exchange matrix is not symmetric non-negative at ({i},{j})"),
                    });
                }
            }
        }

        let mut q = Array2::<f64>::zeros((n, n));
        for i in 0..n {
            let mut total = 0.0;
            for j in 0..n {
                if i != j {
                    q[[i, j]] = s[[i, j]] * pi[j];
                    total += q[[i, j]];
                }
            }
            q[[i, i]] = -total;
        }
        let raw_rate: f64 = -(0..n).map(|i| pi[i] * q[[i, i]]).sum::<f64>();
        if raw_rate > 0.0 {
            q.mapv_inplace(|x| x / raw_rate);
        } else {
            warn!(n, "substitution rate is zero, leaving Q unscaled");
        }

        let sqrt_pi: Vec<f64> = pi.iter().map(|p| p.sqrt()).collect();
        let mut b = Array2::<f64>::zeros((n, n));
        for i in 0..n {
            for j in 0..n {
                b[[i, j]] = sqrt_pi[i] * q[[i, j]] / sqrt_pi[j];
            }
        }
        // Exact symmetry for the Jacobi sweep.
        for i in 0..n {
            for j in (i + 1)..n {
                let m = 0.5 * (b[[i, j]] + b[[j, i]]);
                b[[i, j]] = m;
                b[[j, i]] = m;
            }
        }
        let (eigenvalues, eigenvectors) = linalg::symmetric_eigen(&b);

        Ok(Self {
            pi: pi.to_vec(),
            q,
            raw_rate,
            eigenvalues,
            eigenvectors,
        })
    }

    pub fn n_letters(&self) -> usize {
        self.pi.len()
    }

    pub fn frequencies(&self) -> &[f64] {
        &self.pi
    }

    pub fn rate_matrix(&self) -> &Array2<f64> {
        &self.q
    }

    /// Expected substitutions per unit time of the unnormalized matrix.
    pub fn raw_rate(&self) -> f64 {
        self.raw_rate
    }

    /// Expected substitutions per unit time after normalization.
    pub fn rate(&self) -> f64 {
        -(0..self.n_letters())
            .map(|i| self.pi[i] * self.q[[i, i]])
            .sum::<f64>()
    }

    pub fn eigenvalues(&self) -> &[f64] {
        &self.eigenvalues
    }

    /// `exp(Qt)`, with round-off negatives clamped to zero.
    pub fn transition_p(&self, t: f64) -> Array2<f64> {
        let n = self.n_letters();
        let v = &self.eigenvectors;
        let decay: Vec<f64> = self.eigenvalues.iter().map(|l| (l * t).exp()).collect();
        let mut p = Array2::<f64>::zeros((n, n));
        for i in 0..n {
            for j in 0..n {
                let mut x = 0.0;
                for k in 0..n {
                    x += v[[i, k]] * decay[k] * v[[j, k]];
                }
                p[[i, j]] = ((self.pi[j] / self.pi[i]).sqrt() * x).max(0.0);
            }
        }
        p
    }
}

/// Finitely many values with weights summing to one.
#[derive(Clone, Debug, PartialEq)]
pub struct DiscreteDistribution {
    pub values: Vec<f64>,
    pub weights: Vec<f64>,
}

impl DiscreteDistribution {
    pub fn new(values: Vec<f64>, weights: Vec<f64>) -> PhyloResult<Self> {
        if values.len() != weights.len() || values.is_empty() {
            return Err(PhyloError::InvalidModel {
                msg: format!(
                    "{} values with {} weights",
                    values.len(),
                    weights.len()
                ),
            });
        }
        let total: f64 = weights.iter().sum();
        if weights.iter().any(|&w| w < 0.0) || (total - 1.0).abs() > 1e-8 {
            return Err(PhyloError::InvalidModel {
                msg: format!("weights sum to {total}"),
            });
        }
        Ok(Self { values, weights })
    }

    pub fn uniform(values: Vec<f64>) -> PhyloResult<Self> {
        let w = 1.0 / values.len().max(1) as f64;
        let weights = vec![w; values.len()];
        Self::new(values, weights)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn mean(&self) -> f64 {
        self.values
            .iter()
            .zip(&self.weights)
            .map(|(v, w)| v * w)
            .sum()
    }
}

/// A base chain run at several relative rates.
#[derive(Clone, Debug, PartialEq)]
pub struct MultiModel {
    pub base: ReversibleMarkov,
    pub bins: DiscreteDistribution,
}

impl MultiModel {
    pub fn n_bins(&self) -> usize {
        self.bins.len()
    }

    /// One transition matrix per rate bin.
    pub fn transition_p(&self, t: f64) -> Vec<Array2<f64>> {
        self.bins
            .values
            .iter()
            .map(|r| self.base.transition_p(t * r))
            .collect()
    }

    /// Weighted average over the bins.
    pub fn mixed_transition_p(&self, t: f64) -> Array2<f64> {
        let n = self.base.n_letters();
        let mut p = Array2::<f64>::zeros((n, n));
        for (m, w) in self.transition_p(t).iter().zip(&self.bins.weights) {
            p.scaled_add(*w, m);
        }
        p
    }
}

/// Equal-probability bins of a mean-1 gamma distribution, each
/// represented by its median quantile, then rescaled to mean exactly 1.
pub fn gamma_bins(alpha: f64, n: usize) -> PhyloResult<DiscreteDistribution> {
    if n == 0 || alpha.is_nan() || alpha <= 0.0 {
        return Err(PhyloError::InvalidModel {
            msg: format!("gamma rates need n > 0 and alpha > 0 (n={n}, alpha={alpha})"),
        });
    }
    let gamma = Distribution::Gamma {
        shape: alpha,
        scale: 1.0 / alpha,
    };
    let mut values: Vec<f64> = (0..n)
        .map(|i| gamma.quantile((2 * i + 1) as f64 / (2 * n) as f64))
        .collect();
    let mean = values.iter().sum::<f64>() / n as f64;
    if mean > 0.0 {
        values.iter_mut().for_each(|v| *v /= mean);
    }
    DiscreteDistribution::uniform(values)
}

fn double(p: &Parameter) -> PhyloResult<f64> {
    f64::from_value(&p.value)
}

fn vector(p: &Parameter) -> PhyloResult<Vec<f64>> {
    Vec::<f64>::from_value(&p.value)
}

fn check_nucleotides(model: &'static str, n: usize) -> PhyloResult<()> {
    if n != NUCLEOTIDES.len() {
        return Err(PhyloError::UnsupportedAlphabet { model, size: n });
    }
    Ok(())
}

/// All exchangeabilities equal.
pub fn equ_model(n: usize) -> PhyloResult<Model> {
    Model::leaf("EQU", Vec::new(), move |_| {
        let mut s = Array2::<f64>::ones((n, n));
        s.diag_mut().fill(0.0);
        Ok(Value::Matrix(s))
    })
}

/// Transitions (A<->G, C<->T) scaled by `kappa`.
pub fn hky_model(n: usize) -> PhyloResult<Model> {
    check_nucleotides("HKY", n)?;
    let kappa = Parameter::new("kappa", 2.0)
        .with_bounds(Bounds::above(0.0))
        .with_prior(Prior::new("log_laplace", vec![2f64.ln(), 0.25]));
    Model::leaf("HKY", vec![kappa], |params| {
        let kappa = double(&params[0])?;
        let mut s = Array2::<f64>::ones((4, 4));
        s.diag_mut().fill(0.0);
        for (a, b) in [(0, 2), (1, 3)] {
            s[[a, b]] = kappa;
            s[[b, a]] = kappa;
        }
        Ok(Value::Matrix(s))
    })
}

/// One free exchangeability per unordered nucleotide pair.
pub fn gtr_model(n: usize) -> PhyloResult<Model> {
    check_nucleotides("GTR", n)?;
    let rates = Parameter::new("rates", vec![1.0 / 6.0; 6])
        .with_prior(Prior::new("dirichlet", vec![1.0; 6]));
    Model::leaf("GTR", vec![rates], |params| {
        let rates = vector(&params[0])?;
        if rates.len() != GTR_PAIRS.len() {
            return Err(PhyloError::InvalidModel {
                msg: format!("GTR needs 6 rates, got {}", rates.len()),
            });
        }
        let mut s = Array2::<f64>::zeros((4, 4));
        for (&(a, b), &r) in GTR_PAIRS.iter().zip(&rates) {
            s[[a, b]] = r;
            s[[b, a]] = r;
        }
        Ok(Value::Matrix(s))
    })
}

pub fn uniform_frequencies_model(n: usize) -> PhyloResult<Model> {
    Model::leaf("uniform_frequencies", Vec::new(), move |_| {
        Ok(Value::Vector(vec![1.0 / n as f64; n]))
    })
}

/// Frequencies as a free parameter `pi` with a flat Dirichlet prior.
/// The result is renormalized to sum to one.
pub fn free_frequencies_model(n: usize) -> PhyloResult<Model> {
    let pi = Parameter::new("pi", vec![1.0 / n as f64; n])
        .with_prior(Prior::new("dirichlet", vec![1.0; n]));
    Model::leaf("frequencies", vec![pi], |params| {
        let pi = vector(&params[0])?;
        let total: f64 = pi.iter().sum();
        if total <= 0.0 {
            return Err(PhyloError::InvalidModel {
                msg: "frequencies sum to zero".to_string(),
            });
        }
        Ok(Value::Vector(pi.iter().map(|p| p / total).collect()))
    })
}

/// Combines an exchange model and a frequency model into a
/// [`ReversibleMarkov`].
pub fn reversible_markov_model(exchange: Model, frequencies: Model) -> PhyloResult<Model> {
    let op = FnOp::new("reversible_markov", 2, |args| {
        let s = args.evaluate_as::<Array2<f64>>(0)?;
        let pi = args.evaluate_as::<Vec<f64>>(1)?;
        Ok(Value::Markov(ReversibleMarkov::from_exchange(&s, &pi)?))
    });
    let name = format!("{}+F", exchange.name());
    Model::operation(
        &name,
        Arc::new(op),
        Vec::new(),
        vec![exchange, frequencies],
        vec![ArgSlot::Submodel(0), ArgSlot::Submodel(1)],
    )
}

/// Discrete gamma rate heterogeneity over `base` with `n_bins` bins and
/// shape parameter `alpha`.
pub fn gamma_rates(base: Model, n_bins: usize) -> PhyloResult<Model> {
    let alpha = Parameter::new("alpha", 1.0)
        .with_bounds(Bounds::above(0.0))
        .with_prior(Prior::new("log_laplace", vec![6f64.ln(), 2.0]));
    let name = format!("{}+G{n_bins}", base.name());
    Model::composite(&name, vec![alpha], vec![base], move |params, results| {
        let alpha = double(&params[0])?;
        let base = ReversibleMarkov::from_value(&results[0])?;
        Ok(Value::Mixture(MultiModel {
            base,
            bins: gamma_bins(alpha, n_bins)?,
        }))
    })
}
