mod tree;

pub use tree::{PhyloNode, PhyloTree};
