mod alignment;
mod constraint;
mod pairwise;

pub use alignment::{Alignment, UNKNOWN_RESIDUE};
pub use constraint::{constraint_satisfied, report_constraints, ConstraintMatrix, ConstraintReport};
pub use pairwise::{get_pairwise_alignment, pairwise_prior, prior_branch, PairwiseAlignment};
