//! Parameterized models: named parameters with priors, a memoized result,
//! and the indel and substitution models built on them.

mod base;
mod indel;
mod parameter;
mod substitution;

pub use base::{ArgSlot, CombineFn, Model, ModelKind, ResultFn};
pub use indel::{IndelKind, IndelModel};
pub use parameter::{Bounds, Parameter, Prior};
pub use substitution::{
    equ_model, free_frequencies_model, gamma_bins, gamma_rates, gtr_model, hky_model,
    reversible_markov_model, uniform_frequencies_model, DiscreteDistribution, MultiModel,
    ReversibleMarkov, NUCLEOTIDES,
};

#[cfg(test)]
mod tests;
