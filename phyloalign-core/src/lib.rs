#[macro_use]
mod par;

pub mod align;
pub mod config;
pub mod dp;
pub mod error;
pub mod graph;
pub mod hmm;
pub mod likelihood;
pub mod linalg;
pub mod model;
pub mod nway;
pub mod phylo;
pub mod prob;
pub mod state;
