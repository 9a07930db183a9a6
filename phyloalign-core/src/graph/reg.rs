use std::collections::BTreeSet;
use std::sync::Arc;

use bit_set::BitSet;

use super::value::Value;

/// What one evaluation of a computed term actually read.
#[derive(Clone, Debug, Default)]
pub struct Computation {
    /// Argument slots, in the order they were first read.
    pub slots_used_order: Vec<usize>,
    /// Term index behind each used slot.
    pub used_inputs: Vec<usize>,
    pub used_values: Vec<Arc<Value>>,
}

/// Cached state of one term under one context.
#[derive(Clone, Debug, Default)]
pub struct Reg {
    pub(super) value: Option<Arc<Value>>,
    pub(super) computed: bool,
    pub(super) computation: Computation,
    /// Terms whose current computation read this one.
    pub(super) outputs: BTreeSet<usize>,
    /// Parameter terms read, directly or through inputs.
    pub(super) used_parameters: BitSet,
}

impl Reg {
    pub fn value(&self) -> Option<&Arc<Value>> {
        self.value.as_ref()
    }

    pub fn is_computed(&self) -> bool {
        self.computed
    }

    pub fn computation(&self) -> &Computation {
        &self.computation
    }

    pub fn outputs(&self) -> &BTreeSet<usize> {
        &self.outputs
    }

    pub fn used_parameters(&self) -> &BitSet {
        &self.used_parameters
    }

    pub(super) fn parameter(index: usize, value: Option<Arc<Value>>) -> Self {
        let mut used_parameters = BitSet::new();
        used_parameters.insert(index);
        Self {
            computed: value.is_some(),
            value,
            used_parameters,
            ..Self::default()
        }
    }

    /// Drops the cached value and computation; dependents are kept.
    pub(super) fn clear(&mut self) {
        self.value = None;
        self.computed = false;
        self.computation = Computation::default();
        self.used_parameters.clear();
    }
}
