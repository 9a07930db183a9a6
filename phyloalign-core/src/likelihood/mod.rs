//! Substitution likelihood of alignment columns by peeling over the
//! subtree of nodes present in each column. Rate bins are mixed per
//! column.

mod peeling;

pub use peeling::{alignment_likelihood, column_likelihood, column_likelihoods, SubstitutionTables};

#[cfg(test)]
mod tests;
