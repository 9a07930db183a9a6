//! The MCMC state: tree, alignment and models, with per-branch HMMs and
//! transition matrices cached in a computation graph.

mod parameters;

pub use parameters::Parameters;
