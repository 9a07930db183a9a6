use std::sync::Arc;

use tracing::debug;

use super::context::Context;
use super::formula::Formula;
use super::value::{FromValue, Value};
use crate::error::{PhyloError, PhyloResult};

/// A pool of contexts ("tokens") over one formula.
///
/// Tokens share regs until one of them changes something, so copying a
/// token is cheap and releasing one never disturbs the others.
#[derive(Clone, Debug)]
pub struct RegMachine {
    formula: Arc<Formula>,
    tokens: Vec<Option<Context>>,
    free: Vec<usize>,
}

impl RegMachine {
    pub fn new(formula: Formula) -> Self {
        Self {
            formula: Arc::new(formula),
            tokens: Vec::new(),
            free: Vec::new(),
        }
    }

    /// A machine whose formula and first token come from `context`.
    pub fn from_context(context: Context) -> (Self, usize) {
        let mut machine = Self {
            formula: context.shared_formula(),
            tokens: Vec::new(),
            free: Vec::new(),
        };
        machine.tokens.push(Some(context));
        (machine, 0)
    }

    pub fn formula(&self) -> &Formula {
        &self.formula
    }

    pub fn n_tokens(&self) -> usize {
        self.tokens.iter().filter(|t| t.is_some()).count()
    }

    pub fn is_active(&self, token: usize) -> bool {
        matches!(self.tokens.get(token), Some(Some(_)))
    }

    /// Hands out a released slot when there is one.
    pub fn claim_token(&mut self) -> usize {
        let token = match self.free.pop() {
            Some(t) => t,
            None => {
                self.tokens.push(None);
                self.tokens.len() - 1
            }
        };
        self.tokens[token] = Some(Context::from_shared(self.formula.clone()));
        debug!(token, "claimed token");
        token
    }

    pub fn release_token(&mut self, token: usize) -> PhyloResult<()> {
        self.context_mut(token)?;
        self.tokens[token] = None;
        self.free.push(token);
        debug!(token, "released token");
        Ok(())
    }

    /// Resets `token` to the formula's initial parameter values.
    pub fn init_token(&mut self, token: usize) -> PhyloResult<()> {
        self.context_mut(token)?;
        self.tokens[token] = Some(Context::from_shared(self.formula.clone()));
        Ok(())
    }

    /// Makes `dst` share every cached value of `src`.
    pub fn copy_token(&mut self, src: usize, dst: usize) -> PhyloResult<()> {
        let copy = self.context_ref(src)?.clone();
        self.context_mut(dst)?;
        self.tokens[dst] = Some(copy);
        debug!(src, dst, "copied token");
        Ok(())
    }

    fn context_ref(&self, token: usize) -> PhyloResult<&Context> {
        match self.tokens.get(token) {
            Some(Some(c)) => Ok(c),
            _ => Err(PhyloError::InactiveToken { token }),
        }
    }

    fn context_mut(&mut self, token: usize) -> PhyloResult<&mut Context> {
        match self.tokens.get_mut(token) {
            Some(Some(c)) => Ok(c),
            _ => Err(PhyloError::InactiveToken { token }),
        }
    }

    /// Snapshot of one token.
    pub fn context(&self, token: usize) -> PhyloResult<Context> {
        self.context_ref(token).cloned()
    }

    pub fn evaluate(&mut self, token: usize, index: usize) -> PhyloResult<Arc<Value>> {
        self.context_mut(token)?.evaluate(index)
    }

    pub fn evaluate_as<T: FromValue>(&mut self, token: usize, index: usize) -> PhyloResult<T> {
        self.context_mut(token)?.evaluate_as(index)
    }

    pub fn set_parameter_value(
        &mut self,
        token: usize,
        index: usize,
        value: Value,
    ) -> PhyloResult<usize> {
        self.context_mut(token)?.set_parameter_value(index, value)
    }

    pub fn is_up_to_date(&self, token: usize, index: usize) -> PhyloResult<bool> {
        Ok(self.context_ref(token)?.is_up_to_date(index))
    }

    /// An independent machine holding a copy of `token` as its token 0.
    /// It shares regs with this one and can move to another thread.
    pub fn fork(&self, token: usize) -> PhyloResult<RegMachine> {
        let context = self.context_ref(token)?.clone();
        debug!(token, "forked token");
        Ok(Self::from_context(context).0)
    }
}
