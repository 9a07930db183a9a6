mod distribution;
mod log_double;
mod registry;
pub mod special;

pub use distribution::{dirichlet_pdf, Distribution, GAMMA_LOGNORMAL_SHAPE};
pub use log_double::LogDouble;
pub use registry::{DensityEntry, DensityFn, DistributionRegistry};

#[cfg(test)]
mod tests;
