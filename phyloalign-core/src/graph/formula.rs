use std::fmt;
use std::sync::Arc;

use bit_set::BitSet;

use super::operation::Operation;
use super::value::Value;
use crate::error::{PhyloError, PhyloResult};

#[derive(Clone, Debug)]
pub enum Term {
    /// A settable leaf; the value here is its initial value.
    Parameter {
        name: String,
        initial: Option<Arc<Value>>,
    },
    Constant(Arc<Value>),
    Computed {
        op: Arc<dyn Operation>,
        args: Vec<usize>,
    },
}

#[derive(Clone, Debug)]
struct Entry {
    term: Term,
    /// Computed terms that name this one as an argument.
    affected: Vec<usize>,
}

/// Append-only arena of graph terms. Arguments always refer to older
/// terms, so the graph is acyclic by construction.
#[derive(Clone, Debug, Default)]
pub struct Formula {
    entries: Vec<Entry>,
}

/// An expression tree that [`Formula::add_expression`] flattens into terms.
#[derive(Clone)]
pub enum Expr {
    Param(String),
    Const(Value),
    Term(usize),
    Apply(Arc<dyn Operation>, Vec<Expr>),
}

impl Expr {
    pub fn param(name: &str) -> Self {
        Expr::Param(name.to_string())
    }

    pub fn constant(v: impl Into<Value>) -> Self {
        Expr::Const(v.into())
    }

    pub fn apply(op: impl Operation + 'static, args: Vec<Expr>) -> Self {
        Expr::Apply(Arc::new(op), args)
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Param(name) => write!(f, "{name}"),
            Expr::Const(v) => write!(f, "{v:?}"),
            Expr::Term(i) => write!(f, "#{i}"),
            Expr::Apply(op, args) => {
                write!(f, "({}", op.name())?;
                for a in args {
                    write!(f, " {a:?}")?;
                }
                write!(f, ")")
            }
        }
    }
}

impl Formula {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn term(&self, index: usize) -> &Term {
        &self.entries[index].term
    }

    pub(crate) fn check_index(&self, index: usize) -> PhyloResult<()> {
        if index >= self.entries.len() {
            return Err(PhyloError::TermIndex {
                index,
                size: self.entries.len(),
            });
        }
        Ok(())
    }

    pub fn is_parameter(&self, index: usize) -> bool {
        matches!(self.entries[index].term, Term::Parameter { .. })
    }

    pub fn is_constant(&self, index: usize) -> bool {
        matches!(self.entries[index].term, Term::Constant(_))
    }

    pub fn is_computed(&self, index: usize) -> bool {
        matches!(self.entries[index].term, Term::Computed { .. })
    }

    pub fn parameters(&self) -> Vec<usize> {
        (0..self.entries.len())
            .filter(|&i| self.is_parameter(i))
            .collect()
    }

    pub fn find_parameter(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(
            |e| matches!(&e.term, Term::Parameter { name: n, .. } if n == name),
        )
    }

    pub fn parameter_name(&self, index: usize) -> Option<&str> {
        match &self.entries[index].term {
            Term::Parameter { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn add_parameter(&mut self, name: &str, initial: Option<Value>) -> PhyloResult<usize> {
        if self.find_parameter(name).is_some() {
            return Err(PhyloError::DuplicateParameter {
                name: name.to_string(),
            });
        }
        Ok(self.push(Term::Parameter {
            name: name.to_string(),
            initial: initial.map(Arc::new),
        }))
    }

    pub fn add_constant(&mut self, value: Value) -> usize {
        self.push(Term::Constant(Arc::new(value)))
    }

    /// Adds `op(args...)`, or returns the existing term computing the same
    /// thing.
    pub fn add_computed(&mut self, op: Arc<dyn Operation>, args: Vec<usize>) -> PhyloResult<usize> {
        if args.len() != op.n_args() {
            return Err(PhyloError::Arity {
                op: op.name().to_string(),
                expected: op.n_args(),
                got: args.len(),
            });
        }
        for &a in &args {
            self.check_index(a)?;
        }
        let existing = self.entries.iter().position(|e| match &e.term {
            Term::Computed { op: o, args: a } => o.name() == op.name() && *a == args,
            _ => false,
        });
        if let Some(index) = existing {
            return Ok(index);
        }

        let index = self.push(Term::Computed {
            op,
            args: args.clone(),
        });
        for a in args {
            if !self.entries[a].affected.contains(&index) {
                self.entries[a].affected.push(index);
            }
        }
        Ok(index)
    }

    pub fn add_expression(&mut self, expr: &Expr) -> PhyloResult<usize> {
        match expr {
            Expr::Param(name) => {
                self.find_parameter(name)
                    .ok_or_else(|| PhyloError::UnknownParameter { name: name.clone() })
            }
            Expr::Const(v) => Ok(self.add_constant(v.clone())),
            Expr::Term(i) => {
                self.check_index(*i)?;
                Ok(*i)
            }
            Expr::Apply(op, args) => {
                let args = args
                    .iter()
                    .map(|a| self.add_expression(a))
                    .collect::<PhyloResult<Vec<usize>>>()?;
                self.add_computed(op.clone(), args)
            }
        }
    }

    fn push(&mut self, term: Term) -> usize {
        self.entries.push(Entry {
            term,
            affected: Vec::new(),
        });
        self.entries.len() - 1
    }

    /// Terms that take `index` directly as an argument.
    pub fn directly_affects(&self, index: usize) -> &[usize] {
        &self.entries[index].affected
    }

    /// Every term whose value could depend on `index`, itself excluded.
    pub fn may_affect(&self, index: usize) -> BitSet {
        let mut out = BitSet::with_capacity(self.entries.len());
        let mut stack: Vec<usize> = self.entries[index].affected.clone();
        while let Some(i) = stack.pop() {
            if out.insert(i) {
                stack.extend_from_slice(&self.entries[i].affected);
            }
        }
        out
    }
}
