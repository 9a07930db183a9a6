use std::sync::Arc;

use bit_set::BitSet;
use tracing::trace;

use super::formula::{Expr, Formula, Term};
use super::operation::{Operation, OperationArgs};
use super::reg::{Computation, Reg};
use super::value::{FromValue, Value};
use crate::error::{PhyloError, PhyloResult};

/// One view of a [`Formula`] with its cached values.
///
/// Cloning is the snapshot operation: the clone shares every reg and
/// copies one only when it is about to change it.
#[derive(Clone, Debug)]
pub struct Context {
    formula: Arc<Formula>,
    regs: Vec<Arc<Reg>>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new(Formula::new())
    }
}

impl Context {
    pub fn new(formula: Formula) -> Self {
        Self::from_shared(Arc::new(formula))
    }

    pub(crate) fn from_shared(formula: Arc<Formula>) -> Self {
        let regs = (0..formula.size())
            .map(|i| Arc::new(Self::initial_reg(&formula, i)))
            .collect();
        Self { formula, regs }
    }

    fn initial_reg(formula: &Formula, index: usize) -> Reg {
        match formula.term(index) {
            Term::Parameter { initial, .. } => Reg::parameter(index, initial.clone()),
            _ => Reg::default(),
        }
    }

    pub fn formula(&self) -> &Formula {
        &self.formula
    }

    pub(crate) fn shared_formula(&self) -> Arc<Formula> {
        self.formula.clone()
    }

    pub fn size(&self) -> usize {
        self.regs.len()
    }

    fn grow(&mut self) {
        while self.regs.len() < self.formula.size() {
            let reg = Self::initial_reg(&self.formula, self.regs.len());
            self.regs.push(Arc::new(reg));
        }
    }

    pub fn add_parameter(&mut self, name: &str, initial: Option<Value>) -> PhyloResult<usize> {
        let index = Arc::make_mut(&mut self.formula).add_parameter(name, initial)?;
        self.grow();
        Ok(index)
    }

    pub fn add_constant(&mut self, value: Value) -> usize {
        let index = Arc::make_mut(&mut self.formula).add_constant(value);
        self.grow();
        index
    }

    pub fn add_computed(&mut self, op: Arc<dyn Operation>, args: Vec<usize>) -> PhyloResult<usize> {
        let index = Arc::make_mut(&mut self.formula).add_computed(op, args)?;
        self.grow();
        Ok(index)
    }

    pub fn add_expression(&mut self, expr: &Expr) -> PhyloResult<usize> {
        let index = Arc::make_mut(&mut self.formula).add_expression(expr)?;
        self.grow();
        Ok(index)
    }

    pub fn find_parameter(&self, name: &str) -> PhyloResult<usize> {
        self.formula
            .find_parameter(name)
            .ok_or_else(|| PhyloError::UnknownParameter {
                name: name.to_string(),
            })
    }

    pub fn reg(&self, index: usize) -> &Reg {
        &self.regs[index]
    }

    pub fn is_up_to_date(&self, index: usize) -> bool {
        self.regs[index].computed
    }

    /// True when another snapshot holds the same reg.
    pub fn is_shared(&self, index: usize) -> bool {
        Arc::strong_count(&self.regs[index]) > 1
    }

    pub fn used_inputs(&self, index: usize) -> &[usize] {
        &self.regs[index].computation.used_inputs
    }

    pub fn used_parameters(&self, index: usize) -> &BitSet {
        &self.regs[index].used_parameters
    }

    pub fn evaluate(&mut self, index: usize) -> PhyloResult<Arc<Value>> {
        self.formula.check_index(index)?;
        if let (true, Some(v)) = (self.regs[index].computed, &self.regs[index].value) {
            return Ok(v.clone());
        }

        let formula = self.formula.clone();
        match formula.term(index) {
            Term::Parameter { name, .. } => Err(PhyloError::MissingValue { name: name.clone() }),
            Term::Constant(v) => {
                let reg = Arc::make_mut(&mut self.regs[index]);
                reg.value = Some(v.clone());
                reg.computed = true;
                Ok(v.clone())
            }
            Term::Computed { op, args } => {
                let mut view = ContextArgs {
                    context: self,
                    op: op.name(),
                    args,
                    computation: Computation::default(),
                };
                let value = Arc::new(op.apply(&mut view)?);
                let computation = view.computation;

                let mut used_parameters = BitSet::with_capacity(formula.size());
                for &input in &computation.used_inputs {
                    used_parameters.union_with(&self.regs[input].used_parameters);
                    Arc::make_mut(&mut self.regs[input]).outputs.insert(index);
                }
                trace!(
                    index,
                    op = op.name(),
                    inputs = ?computation.used_inputs,
                    "evaluated term"
                );

                let reg = Arc::make_mut(&mut self.regs[index]);
                reg.value = Some(value.clone());
                reg.computed = true;
                reg.computation = computation;
                reg.used_parameters = used_parameters;
                Ok(value)
            }
        }
    }

    pub fn evaluate_as<T: FromValue>(&mut self, index: usize) -> PhyloResult<T> {
        T::from_value(&*self.evaluate(index)?)
    }

    pub fn parameter_value(&self, index: usize) -> PhyloResult<Arc<Value>> {
        self.formula.check_index(index)?;
        let Some(name) = self.formula.parameter_name(index) else {
            return Err(PhyloError::NotAParameter { index });
        };
        self.regs[index]
            .value
            .clone()
            .ok_or_else(|| PhyloError::MissingValue {
                name: name.to_string(),
            })
    }

    /// Sets a parameter and invalidates exactly the terms whose last
    /// computation read it, transitively. Returns how many were
    /// invalidated.
    pub fn set_parameter_value(&mut self, index: usize, value: Value) -> PhyloResult<usize> {
        self.formula.check_index(index)?;
        if !self.formula.is_parameter(index) {
            return Err(PhyloError::NotAParameter { index });
        }
        let reg = Arc::make_mut(&mut self.regs[index]);
        reg.value = Some(Arc::new(value));
        reg.computed = true;
        let mut stack: Vec<usize> = std::mem::take(&mut reg.outputs).into_iter().collect();

        let mut invalidated = 0;
        while let Some(i) = stack.pop() {
            if !self.regs[i].computed {
                continue;
            }
            let reg = Arc::make_mut(&mut self.regs[i]);
            let inputs = std::mem::take(&mut reg.computation.used_inputs);
            stack.extend(std::mem::take(&mut reg.outputs));
            reg.clear();
            invalidated += 1;

            for input in inputs {
                if self.regs[input].outputs.contains(&i) {
                    Arc::make_mut(&mut self.regs[input]).outputs.remove(&i);
                }
            }
        }
        trace!(index, invalidated, "set parameter");
        Ok(invalidated)
    }

    pub fn set_parameter(&mut self, name: &str, value: Value) -> PhyloResult<usize> {
        let index = self.find_parameter(name)?;
        self.set_parameter_value(index, value)
    }
}

/// Argument view handed to an operation while evaluating one term.
struct ContextArgs<'a> {
    context: &'a mut Context,
    op: &'a str,
    args: &'a [usize],
    computation: Computation,
}

impl OperationArgs for ContextArgs<'_> {
    fn n_args(&self) -> usize {
        self.args.len()
    }

    fn evaluate(&mut self, slot: usize) -> PhyloResult<Arc<Value>> {
        let Some(&input) = self.args.get(slot) else {
            return Err(PhyloError::SlotOutOfRange {
                op: self.op.to_string(),
                slot,
            });
        };
        let value = self.context.evaluate(input)?;
        if !self.computation.slots_used_order.contains(&slot) {
            self.computation.slots_used_order.push(slot);
            self.computation.used_inputs.push(input);
            self.computation.used_values.push(value.clone());
        }
        Ok(value)
    }
}
