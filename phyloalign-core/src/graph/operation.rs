use std::fmt;
use std::sync::Arc;

use super::value::{FromValue, Value};
use crate::error::{PhyloError, PhyloResult};
use crate::prob::{DistributionRegistry, LogDouble};

/// Lazy access to an operation's argument slots.
///
/// Implementations record which slots were actually read, so an
/// operation that never touches a slot never depends on it.
pub trait OperationArgs {
    fn n_args(&self) -> usize;

    fn evaluate(&mut self, slot: usize) -> PhyloResult<Arc<Value>>;
}

impl<'a> dyn OperationArgs + 'a {
    pub fn evaluate_as<T: FromValue>(&mut self, slot: usize) -> PhyloResult<T> {
        T::from_value(&*self.evaluate(slot)?)
    }
}

pub trait Operation: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    /// Fixed argument count.
    fn n_args(&self) -> usize;

    fn apply(&self, args: &mut dyn OperationArgs) -> PhyloResult<Value>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Builtin {
    Add,
    Minus,
    Multiply,
    Divide,
    Exp,
    Log,
    GreaterThan,
    LessThan,
    Equals,
    /// Evaluates only the branch selected by the condition.
    IfThenElse,
}

impl Operation for Builtin {
    fn name(&self) -> &str {
        match self {
            Builtin::Add => "+",
            Builtin::Minus => "-",
            Builtin::Multiply => "*",
            Builtin::Divide => "/",
            Builtin::Exp => "exp",
            Builtin::Log => "log",
            Builtin::GreaterThan => ">",
            Builtin::LessThan => "<",
            Builtin::Equals => "==",
            Builtin::IfThenElse => "if",
        }
    }

    fn n_args(&self) -> usize {
        match self {
            Builtin::Exp | Builtin::Log => 1,
            Builtin::IfThenElse => 3,
            _ => 2,
        }
    }

    fn apply(&self, args: &mut dyn OperationArgs) -> PhyloResult<Value> {
        match self {
            Builtin::Exp => Ok(Value::Double(args.evaluate_as::<f64>(0)?.exp())),
            Builtin::Log => Ok(Value::Double(args.evaluate_as::<f64>(0)?.ln())),
            Builtin::IfThenElse => {
                let slot = if args.evaluate_as::<bool>(0)? { 1 } else { 2 };
                Ok((*args.evaluate(slot)?).clone())
            }
            Builtin::Equals => {
                let x = args.evaluate(0)?;
                let y = args.evaluate(1)?;
                Ok(Value::Bool(x == y))
            }
            _ => {
                let x = args.evaluate_as::<f64>(0)?;
                let y = args.evaluate_as::<f64>(1)?;
                match self {
                    Builtin::Add => Ok(Value::Double(x + y)),
                    Builtin::Minus => Ok(Value::Double(x - y)),
                    Builtin::Multiply => Ok(Value::Double(x * y)),
                    Builtin::Divide if y == 0.0 => Err(PhyloError::DivideByZero {
                        op: self.name().to_string(),
                    }),
                    Builtin::Divide => Ok(Value::Double(x / y)),
                    Builtin::GreaterThan => Ok(Value::Bool(x > y)),
                    Builtin::LessThan => Ok(Value::Bool(x < y)),
                    _ => unreachable!("unary and ternary builtins handled above"),
                }
            }
        }
    }
}

pub type OpFn = dyn Fn(&mut dyn OperationArgs) -> PhyloResult<Value> + Send + Sync;

/// An operation backed by a closure. Terms are deduplicated by operation
/// name, so distinct closures need distinct names.
#[derive(Clone)]
pub struct FnOp {
    name: String,
    n_args: usize,
    f: Arc<OpFn>,
}

impl FnOp {
    pub fn new<F>(name: impl Into<String>, n_args: usize, f: F) -> Self
    where
        F: Fn(&mut dyn OperationArgs) -> PhyloResult<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            n_args,
            f: Arc::new(f),
        }
    }
}

impl fmt::Debug for FnOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnOp")
            .field("name", &self.name)
            .field("n_args", &self.n_args)
            .finish_non_exhaustive()
    }
}

impl Operation for FnOp {
    fn name(&self) -> &str {
        &self.name
    }

    fn n_args(&self) -> usize {
        self.n_args
    }

    fn apply(&self, args: &mut dyn OperationArgs) -> PhyloResult<Value> {
        (self.f)(args)
    }
}

/// Density of a registered distribution. Slot 0 is the point (a double
/// or a vector), the remaining slots are the hyperparameters.
#[derive(Clone, Debug)]
pub struct DensityOp {
    name: String,
    distribution: String,
    n_hyper: usize,
    registry: Arc<DistributionRegistry>,
}

impl DensityOp {
    pub fn new(
        registry: Arc<DistributionRegistry>,
        distribution: &str,
        n_hyper: usize,
    ) -> PhyloResult<Self> {
        let entry = registry.lookup(distribution)?;
        if let Some(expected) = entry.n_hyper {
            if expected != n_hyper {
                return Err(PhyloError::DistributionArgs {
                    name: distribution.to_string(),
                    expected,
                    got: n_hyper,
                });
            }
        }
        Ok(Self {
            name: format!("{distribution}_density"),
            distribution: distribution.to_string(),
            n_hyper,
            registry,
        })
    }
}

impl Operation for DensityOp {
    fn name(&self) -> &str {
        &self.name
    }

    fn n_args(&self) -> usize {
        self.n_hyper + 1
    }

    fn apply(&self, args: &mut dyn OperationArgs) -> PhyloResult<Value> {
        let x = match &*args.evaluate(0)? {
            Value::Double(x) => vec![*x],
            Value::Vector(v) => v.clone(),
            other => {
                return Err(PhyloError::TypeMismatch {
                    expected: "Double or Vector",
                    found: other.kind(),
                })
            }
        };
        let hyper = (1..=self.n_hyper)
            .map(|slot| args.evaluate_as::<f64>(slot))
            .collect::<PhyloResult<Vec<f64>>>()?;
        let p: LogDouble = self.registry.density(&self.distribution, &x, &hyper)?;
        Ok(Value::LogDouble(p))
    }
}
