use ndarray::Array2;

use crate::error::{PhyloError, PhyloResult};
use crate::hmm::PairHmm;
use crate::model::{DiscreteDistribution, MultiModel, ReversibleMarkov};
use crate::prob::LogDouble;

/// Every kind of value a graph term or model result can hold.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Double(f64),
    Int(i64),
    Bool(bool),
    Str(String),
    Vector(Vec<f64>),
    Matrix(Array2<f64>),
    /// One matrix per rate bin.
    Matrices(Vec<Array2<f64>>),
    LogDouble(LogDouble),
    PairHmm(PairHmm),
    Markov(ReversibleMarkov),
    Discrete(DiscreteDistribution),
    Mixture(MultiModel),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Double(_) => "Double",
            Value::Int(_) => "Int",
            Value::Bool(_) => "Bool",
            Value::Str(_) => "Str",
            Value::Vector(_) => "Vector",
            Value::Matrix(_) => "Matrix",
            Value::Matrices(_) => "Matrices",
            Value::LogDouble(_) => "LogDouble",
            Value::PairHmm(_) => "PairHmm",
            Value::Markov(_) => "Markov",
            Value::Discrete(_) => "Discrete",
            Value::Mixture(_) => "Mixture",
        }
    }
}

/// Typed extraction from a [`Value`].
pub trait FromValue: Sized {
    const KIND: &'static str;

    fn from_value(value: &Value) -> PhyloResult<Self>;
}

macro_rules! value_kind {
    ($ty:ty, $variant:ident) => {
        impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Value::$variant(v)
            }
        }

        impl FromValue for $ty {
            const KIND: &'static str = stringify!($variant);

            fn from_value(value: &Value) -> PhyloResult<Self> {
                match value {
                    Value::$variant(v) => Ok(v.clone()),
                    other => Err(PhyloError::TypeMismatch {
                        expected: Self::KIND,
                        found: other.kind(),
                    }),
                }
            }
        }
    };
}

value_kind!(f64, Double);
value_kind!(i64, Int);
value_kind!(bool, Bool);
value_kind!(String, Str);
value_kind!(Vec<f64>, Vector);
value_kind!(Array2<f64>, Matrix);
value_kind!(Vec<Array2<f64>>, Matrices);
value_kind!(LogDouble, LogDouble);
value_kind!(PairHmm, PairHmm);
value_kind!(ReversibleMarkov, Markov);
value_kind!(DiscreteDistribution, Discrete);
value_kind!(MultiModel, Mixture);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl FromValue for Value {
    const KIND: &'static str = "Value";

    fn from_value(value: &Value) -> PhyloResult<Self> {
        Ok(value.clone())
    }
}
