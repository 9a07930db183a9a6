use ndarray::Array2;

use super::base::Model;
use super::parameter::{Bounds, Parameter, Prior};
use crate::error::{PhyloError, PhyloResult};
use crate::graph::{FromValue, Value};
use crate::hmm::states::{E, G1, G2, M, S};
use crate::hmm::{PairHmm, PairTransducer};
use crate::prob::{DistributionRegistry, LogDouble};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IndelKind {
    /// Parameters: `lambda` (log indel rate), `epsilon` (gap extension),
    /// `tau` (per-column end probability).
    Rs07,
    /// Parameters: `lambda` (log birth rate), `mean_length`.
    Tkf1,
}

impl IndelKind {
    pub fn name(&self) -> &'static str {
        match self {
            IndelKind::Rs07 => "RS07",
            IndelKind::Tkf1 => "TKF1",
        }
    }

    pub fn n_parameters(&self) -> usize {
        match self {
            IndelKind::Rs07 => 3,
            IndelKind::Tkf1 => 2,
        }
    }

    fn check(&self, values: &[f64]) -> PhyloResult<()> {
        if values.len() != self.n_parameters() {
            return Err(PhyloError::InvalidModel {
                msg: format!(
                    "{} takes {} parameters, got {}",
                    self.name(),
                    self.n_parameters(),
                    values.len()
                ),
            });
        }
        Ok(())
    }

    /// Pair HMM of a branch of length `t`, for parameter values in
    /// declaration order.
    pub fn branch_hmm(&self, values: &[f64], t: f64) -> PhyloResult<PairHmm> {
        self.check(values)?;
        match self {
            IndelKind::Rs07 => rs07_hmm(values[0], values[1], values[2], t),
            IndelKind::Tkf1 => tkf1_hmm(values[0], values[1], t),
        }
    }

    /// Prior probability of a sequence of length `l`. The geometric
    /// prior is improper without a positive end probability.
    pub fn lengthp(&self, values: &[f64], l: usize) -> PhyloResult<LogDouble> {
        self.check(values)?;
        let (stop, extend) = match self {
            IndelKind::Rs07 => (values[2], 1.0 - values[2]),
            IndelKind::Tkf1 => {
                let kappa = tkf1_kappa(values[1]);
                (1.0 - kappa, kappa)
            }
        };
        if stop.is_nan() || stop <= 0.0 {
            return Err(PhyloError::InvalidModel {
                msg: format!("{}: sequence end probability {stop} is not positive", self.name()),
            });
        }
        Ok(LogDouble::new(stop) * LogDouble::new(extend).powf(l as f64))
    }
}

fn rs07_hmm(lambda: f64, epsilon: f64, tau: f64, t: f64) -> PhyloResult<PairHmm> {
    let delta = -0.5 * (-lambda.exp() * t).exp_m1();
    let e = epsilon;
    let mut q = Array2::<f64>::zeros((5, 5));

    q[[M, M]] = 1.0 - 2.0 * delta;
    q[[M, G1]] = delta;
    q[[M, G2]] = delta;

    for (gap, other) in [(G1, G2), (G2, G1)] {
        q[[gap, gap]] = e + (1.0 - e) * delta;
        q[[gap, other]] = (1.0 - e) * delta;
        q[[gap, M]] = (1.0 - e) * (1.0 - 2.0 * delta);
    }

    for row in [M, G1, G2] {
        for col in [M, G1, G2] {
            q[[row, col]] *= 1.0 - tau;
        }
        q[[row, E]] = tau;
    }
    PairHmm::from_start_pi(q, [1.0, 0.0, 0.0, 0.0])
}

fn tkf1_kappa(mean_length: f64) -> f64 {
    mean_length / (mean_length + 1.0)
}

/// (kappa, alpha, beta, gamma) of the TKF1 process on a branch of
/// length `t`.
fn tkf1_coefficients(log_lambda: f64, mean_length: f64, t: f64) -> (f64, f64, f64, f64) {
    let lambda = log_lambda.exp();
    let kappa = tkf1_kappa(mean_length);
    let mu = lambda / kappa;
    let alpha = (-mu * t).exp();
    let one_minus_alpha = -(-mu * t).exp_m1();
    if t == 0.0 || one_minus_alpha == 0.0 {
        return (kappa, alpha, 0.0, 0.0);
    }
    let r = ((lambda - mu) * t).exp();
    let beta = -lambda * ((lambda - mu) * t).exp_m1() / (mu - lambda * r);
    let gamma = 1.0 - mu * beta / (lambda * one_minus_alpha);
    (kappa, alpha, beta.clamp(0.0, 1.0), gamma.clamp(0.0, 1.0))
}

fn tkf1_hmm(log_lambda: f64, mean_length: f64, t: f64) -> PhyloResult<PairHmm> {
    let (kappa, alpha, beta, gamma) = tkf1_coefficients(log_lambda, mean_length, t);
    let mut q = Array2::<f64>::zeros((5, 5));
    for (row, ins) in [(S, beta), (M, beta), (G1, beta), (G2, gamma)] {
        q[[row, G1]] = ins;
        q[[row, M]] = (1.0 - ins) * kappa * alpha;
        q[[row, G2]] = (1.0 - ins) * kappa * (1.0 - alpha);
        q[[row, E]] = (1.0 - ins) * (1.0 - kappa);
    }
    PairHmm::new(q, [1.0, 0.0, 0.0, 0.0])
}

/// TKF1 as a single-letter transducer with an explicit silent wait
/// state between insertions and the next ancestral event.
fn tkf1_transducer(log_lambda: f64, mean_length: f64, t: f64) -> PhyloResult<PairTransducer> {
    const START: usize = 0;
    const MATCH: usize = 1;
    const DELETE: usize = 2;
    const INSERT: usize = 3;
    const WAIT: usize = 4;
    const END: usize = 5;

    let (kappa, alpha, beta, gamma) = tkf1_coefficients(log_lambda, mean_length, t);
    let mut q = Array2::<f64>::zeros((6, 6));
    for (row, ins) in [(START, beta), (MATCH, beta), (INSERT, beta), (DELETE, gamma)] {
        q[[row, INSERT]] = ins;
        q[[row, WAIT]] = 1.0 - ins;
    }
    q[[WAIT, MATCH]] = kappa * alpha;
    q[[WAIT, DELETE]] = kappa * (1.0 - alpha);
    q[[WAIT, END]] = 1.0 - kappa;

    let e1 = vec![None, Some(0), Some(0), None, None, None];
    let e2 = vec![None, Some(0), None, Some(0), None, None];
    PairTransducer::new(q, e1, e2, 1, START, END)
}

fn default_model(kind: IndelKind) -> PhyloResult<Model> {
    let lambda = Parameter::new("lambda", -4.0)
        .with_prior(Prior::new("laplace", vec![-4.0, 0.707]));
    let parameters = match kind {
        IndelKind::Rs07 => vec![
            lambda,
            Parameter::new("epsilon", 0.25)
                .with_bounds(Bounds::between(0.0, 1.0))
                .with_prior(Prior::new("beta", vec![1.5, 8.0])),
            Parameter::new("tau", 0.001)
                .with_bounds(Bounds::between(0.0, 1.0))
                .fixed(),
        ],
        IndelKind::Tkf1 => vec![
            lambda,
            Parameter::new("mean_length", 100.0)
                .with_bounds(Bounds::above(0.0))
                .with_prior(Prior::new("exponential", vec![100.0])),
        ],
    };
    Model::leaf(kind.name(), parameters, |params| {
        params
            .iter()
            .map(|p| f64::from_value(&p.value))
            .collect::<PhyloResult<Vec<f64>>>()
            .map(Value::Vector)
    })
}

/// An indel process: its parameters plus the per-branch pair HMMs and
/// sequence length prior they imply.
#[derive(Clone, Debug)]
pub struct IndelModel {
    kind: IndelKind,
    model: Model,
}

impl IndelModel {
    pub fn new(kind: IndelKind) -> PhyloResult<Self> {
        Ok(Self {
            kind,
            model: default_model(kind)?,
        })
    }

    pub fn rs07() -> PhyloResult<Self> {
        Self::new(IndelKind::Rs07)
    }

    pub fn tkf1() -> PhyloResult<Self> {
        Self::new(IndelKind::Tkf1)
    }

    pub fn kind(&self) -> IndelKind {
        self.kind
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn parameters(&self) -> Vec<&Parameter> {
        self.model.parameters()
    }

    pub fn parameter_names(&self) -> Vec<String> {
        self.model.parameter_names()
    }

    pub fn set_parameter(&mut self, name: &str, value: f64) -> PhyloResult<()> {
        self.model.set_parameter(name, Value::Double(value))
    }

    /// Current parameter values in declaration order.
    pub fn values(&self) -> PhyloResult<Vec<f64>> {
        self.model.result_as::<Vec<f64>>()
    }

    pub fn branch_hmm(&self, t: f64) -> PhyloResult<PairHmm> {
        self.kind.branch_hmm(&self.values()?, t)
    }

    pub fn lengthp(&self, l: usize) -> PhyloResult<LogDouble> {
        self.kind.lengthp(&self.values()?, l)
    }

    pub fn tkf1_transducer(&self, t: f64) -> PhyloResult<PairTransducer> {
        match self.kind {
            IndelKind::Tkf1 => {
                let v = self.values()?;
                tkf1_transducer(v[0], v[1], t)
            }
            IndelKind::Rs07 => Err(PhyloError::InvalidModel {
                msg: "RS07 has no transducer form".to_string(),
            }),
        }
    }

    pub fn prior(&self, registry: &DistributionRegistry) -> PhyloResult<LogDouble> {
        self.model.prior(registry)
    }
}
