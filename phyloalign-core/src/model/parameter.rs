use crate::error::{PhyloError, PhyloResult};
use crate::graph::Value;
use crate::prob::{DistributionRegistry, LogDouble};

/// Informative range of a parameter. Writes are not checked against it.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Bounds {
    pub lower: Option<f64>,
    pub upper: Option<f64>,
}

impl Bounds {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn above(lower: f64) -> Self {
        Self {
            lower: Some(lower),
            upper: None,
        }
    }

    pub fn between(lower: f64, upper: f64) -> Self {
        Self {
            lower: Some(lower),
            upper: Some(upper),
        }
    }

    pub fn contains(&self, x: f64) -> bool {
        self.lower.map_or(true, |l| x >= l) && self.upper.map_or(true, |u| x <= u)
    }
}

/// A named registry distribution with fixed hyperparameters.
#[derive(Clone, Debug, PartialEq)]
pub struct Prior {
    pub distribution: String,
    pub hyper: Vec<f64>,
}

impl Prior {
    pub fn new(distribution: &str, hyper: Vec<f64>) -> Self {
        Self {
            distribution: distribution.to_string(),
            hyper,
        }
    }

    pub fn density(&self, registry: &DistributionRegistry, value: &Value) -> PhyloResult<LogDouble> {
        let x = match value {
            Value::Double(x) => vec![*x],
            Value::Vector(v) => v.clone(),
            other => {
                return Err(PhyloError::TypeMismatch {
                    expected: "Double or Vector",
                    found: other.kind(),
                })
            }
        };
        registry.density(&self.distribution, &x, &self.hyper)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub value: Value,
    pub bounds: Bounds,
    pub fixed: bool,
    pub prior: Option<Prior>,
}

impl Parameter {
    pub fn new(name: &str, value: impl Into<Value>) -> Self {
        Self {
            name: name.to_string(),
            value: value.into(),
            bounds: Bounds::unbounded(),
            fixed: false,
            prior: None,
        }
    }

    pub fn with_bounds(mut self, bounds: Bounds) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn with_prior(mut self, prior: Prior) -> Self {
        self.prior = Some(prior);
        self
    }

    pub fn fixed(mut self) -> Self {
        self.fixed = true;
        self
    }

    pub fn in_bounds(&self) -> bool {
        match self.value {
            Value::Double(x) => self.bounds.contains(x),
            _ => true,
        }
    }
}
