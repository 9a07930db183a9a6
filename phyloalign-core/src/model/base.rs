use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, OnceLock};

use super::parameter::Parameter;
use crate::error::{PhyloError, PhyloResult};
use crate::graph::{FromValue, Operation, OperationArgs, Value};
use crate::prob::{DistributionRegistry, LogDouble};

pub type ResultFn = dyn Fn(&[Parameter]) -> PhyloResult<Value> + Send + Sync;
pub type CombineFn = dyn Fn(&[Parameter], &[Arc<Value>]) -> PhyloResult<Value> + Send + Sync;

/// Where an operation model takes one argument from.
#[derive(Clone, Debug, PartialEq)]
pub enum ArgSlot {
    Constant(Value),
    /// One of the model's own parameters.
    Parameter(usize),
    /// The result of a submodel.
    Submodel(usize),
}

#[derive(Clone)]
pub enum ModelKind {
    Leaf(Arc<ResultFn>),
    /// Own ("super") parameters plus submodels, combined by a function of
    /// both.
    Composite {
        children: Vec<Model>,
        combine: Arc<CombineFn>,
    },
    Operation {
        op: Arc<dyn Operation>,
        children: Vec<Model>,
        slots: Vec<ArgSlot>,
    },
}

/// A named parameter set with a lazily computed, memoized result.
///
/// Parameter `i` of a model with children is either one of its own
/// parameters (the first `n_own`) or, in order, a parameter of a child.
#[derive(Clone)]
pub struct Model {
    name: String,
    parameters: Vec<Parameter>,
    kind: ModelKind,
    result: OnceLock<Arc<Value>>,
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            ModelKind::Leaf(_) => "Leaf",
            ModelKind::Composite { .. } => "Composite",
            ModelKind::Operation { .. } => "Operation",
        };
        f.debug_struct("Model")
            .field("name", &self.name)
            .field("kind", &kind)
            .field("parameters", &self.parameter_names())
            .field("children", &self.children().len())
            .finish()
    }
}

impl Model {
    pub fn leaf<F>(name: &str, parameters: Vec<Parameter>, f: F) -> PhyloResult<Self>
    where
        F: Fn(&[Parameter]) -> PhyloResult<Value> + Send + Sync + 'static,
    {
        Self::build(name, parameters, ModelKind::Leaf(Arc::new(f)))
    }

    pub fn composite<F>(
        name: &str,
        parameters: Vec<Parameter>,
        children: Vec<Model>,
        combine: F,
    ) -> PhyloResult<Self>
    where
        F: Fn(&[Parameter], &[Arc<Value>]) -> PhyloResult<Value> + Send + Sync + 'static,
    {
        Self::build(
            name,
            parameters,
            ModelKind::Composite {
                children,
                combine: Arc::new(combine),
            },
        )
    }

    pub fn operation(
        name: &str,
        op: Arc<dyn Operation>,
        parameters: Vec<Parameter>,
        children: Vec<Model>,
        slots: Vec<ArgSlot>,
    ) -> PhyloResult<Self> {
        if slots.len() != op.n_args() {
            return Err(PhyloError::Arity {
                op: op.name().to_string(),
                expected: op.n_args(),
                got: slots.len(),
            });
        }
        for (slot, arg) in slots.iter().enumerate() {
            let ok = match arg {
                ArgSlot::Constant(_) => true,
                ArgSlot::Parameter(i) => *i < parameters.len(),
                ArgSlot::Submodel(c) => *c < children.len(),
            };
            if !ok {
                return Err(PhyloError::SlotOutOfRange {
                    op: op.name().to_string(),
                    slot,
                });
            }
        }
        Self::build(
            name,
            parameters,
            ModelKind::Operation {
                op,
                children,
                slots,
            },
        )
    }

    fn build(name: &str, parameters: Vec<Parameter>, kind: ModelKind) -> PhyloResult<Self> {
        let mut seen = HashSet::new();
        for p in &parameters {
            if !seen.insert(p.name.as_str()) {
                return Err(PhyloError::DuplicateParameter {
                    name: p.name.clone(),
                });
            }
        }
        Ok(Self {
            name: name.to_string(),
            parameters,
            kind,
            result: OnceLock::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &ModelKind {
        &self.kind
    }

    pub fn children(&self) -> &[Model] {
        match &self.kind {
            ModelKind::Leaf(_) => &[],
            ModelKind::Composite { children, .. } | ModelKind::Operation { children, .. } => {
                children
            }
        }
    }

    fn children_mut(&mut self) -> &mut [Model] {
        match &mut self.kind {
            ModelKind::Leaf(_) => &mut [],
            ModelKind::Composite { children, .. } | ModelKind::Operation { children, .. } => {
                children
            }
        }
    }

    pub fn n_own_parameters(&self) -> usize {
        self.parameters.len()
    }

    pub fn n_parameters(&self) -> usize {
        self.parameters.len() + self.children().iter().map(Model::n_parameters).sum::<usize>()
    }

    /// Maps a flat index to (child, index within child); `None` for own
    /// parameters.
    fn locate(&self, index: usize) -> PhyloResult<Option<(usize, usize)>> {
        let n = self.n_parameters();
        if index >= n {
            return Err(PhyloError::ParameterIndex { index, n });
        }
        if index < self.parameters.len() {
            return Ok(None);
        }
        let mut offset = self.parameters.len();
        for (c, child) in self.children().iter().enumerate() {
            let k = child.n_parameters();
            if index < offset + k {
                return Ok(Some((c, index - offset)));
            }
            offset += k;
        }
        unreachable!("index checked against n_parameters")
    }

    pub fn parameter(&self, index: usize) -> PhyloResult<&Parameter> {
        match self.locate(index)? {
            None => Ok(&self.parameters[index]),
            Some((c, i)) => self.children()[c].parameter(i),
        }
    }

    pub fn parameters(&self) -> Vec<&Parameter> {
        let mut out: Vec<&Parameter> = self.parameters.iter().collect();
        for child in self.children() {
            out.extend(child.parameters());
        }
        out
    }

    pub fn parameter_values(&self) -> Vec<Value> {
        self.parameters().into_iter().map(|p| p.value.clone()).collect()
    }

    /// Flat parameter names. A child parameter whose name occurs more than
    /// once is prefixed with `child::`.
    pub fn parameter_names(&self) -> Vec<String> {
        let mut raw: Vec<(Option<&str>, String)> = self
            .parameters
            .iter()
            .map(|p| (None, p.name.clone()))
            .collect();
        for child in self.children() {
            for name in child.parameter_names() {
                raw.push((Some(child.name()), name));
            }
        }
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for (_, name) in &raw {
            *counts.entry(name.as_str()).or_default() += 1;
        }
        raw.iter()
            .map(|(owner, name)| match owner {
                Some(owner) if counts[name.as_str()] > 1 => format!("{owner}::{name}"),
                _ => name.clone(),
            })
            .collect()
    }

    pub fn find_parameter(&self, name: &str) -> Option<usize> {
        self.parameter_names().iter().position(|n| n == name)
    }

    /// Always succeeds for a valid index; bounds are not enforced.
    pub fn set_parameter_value(&mut self, index: usize, value: Value) -> PhyloResult<()> {
        match self.locate(index)? {
            None => self.parameters[index].value = value,
            Some((c, i)) => self.children_mut()[c].set_parameter_value(i, value)?,
        }
        self.result = OnceLock::new();
        Ok(())
    }

    pub fn set_parameter(&mut self, name: &str, value: Value) -> PhyloResult<()> {
        let index = self
            .find_parameter(name)
            .ok_or_else(|| PhyloError::UnknownParameter {
                name: name.to_string(),
            })?;
        self.set_parameter_value(index, value)
    }

    pub fn result(&self) -> PhyloResult<Arc<Value>> {
        if let Some(v) = self.result.get() {
            return Ok(v.clone());
        }
        let value = Arc::new(self.compute()?);
        Ok(self.result.get_or_init(|| value).clone())
    }

    pub fn result_as<T: FromValue>(&self) -> PhyloResult<T> {
        T::from_value(&*self.result()?)
    }

    pub fn is_computed(&self) -> bool {
        self.result.get().is_some()
    }

    fn compute(&self) -> PhyloResult<Value> {
        match &self.kind {
            ModelKind::Leaf(f) => f(&self.parameters),
            ModelKind::Composite { children, combine } => {
                let results = children
                    .iter()
                    .map(Model::result)
                    .collect::<PhyloResult<Vec<_>>>()?;
                combine(&self.parameters, &results)
            }
            ModelKind::Operation {
                op,
                children,
                slots,
            } => {
                let mut args = SlotArgs {
                    parameters: &self.parameters,
                    children,
                    slots,
                    op: op.name(),
                };
                op.apply(&mut args)
            }
        }
    }

    /// Product of every parameter's prior density, children included.
    pub fn prior(&self, registry: &DistributionRegistry) -> PhyloResult<LogDouble> {
        let mut p = LogDouble::ONE;
        for param in &self.parameters {
            if let Some(prior) = &param.prior {
                p *= prior.density(registry, &param.value)?;
            }
        }
        for child in self.children() {
            p *= child.prior(registry)?;
        }
        Ok(p)
    }
}

struct SlotArgs<'a> {
    parameters: &'a [Parameter],
    children: &'a [Model],
    slots: &'a [ArgSlot],
    op: &'a str,
}

impl OperationArgs for SlotArgs<'_> {
    fn n_args(&self) -> usize {
        self.slots.len()
    }

    fn evaluate(&mut self, slot: usize) -> PhyloResult<Arc<Value>> {
        match self.slots.get(slot) {
            Some(ArgSlot::Constant(v)) => Ok(Arc::new(v.clone())),
            Some(ArgSlot::Parameter(i)) => Ok(Arc::new(self.parameters[*i].value.clone())),
            Some(ArgSlot::Submodel(c)) => self.children[*c].result(),
            None => Err(PhyloError::SlotOutOfRange {
                op: self.op.to_string(),
                slot,
            }),
        }
    }
}
