mod array;
mod constrained;
mod engine;
mod kernels;
mod state_array;

pub use array::DpArray;
pub use constrained::DpArrayConstrained;
pub use engine::DpEngine;
pub use state_array::StateArray;
