use bit_set::BitSet;

use crate::error::{PhyloError, PhyloResult};

#[derive(Debug, Clone)]
pub struct PhyloNode {
    pub label: Option<Box<str>>,
    /// Length of the branch to `parent`.
    pub branch_length: Option<f64>,
    pub parent: Option<usize>,
    /// Index of the branch to `parent`.
    pub parent_branch: Option<usize>,
    pub children: Vec<usize>,
}

/// An unrooted tree stored in rooted form.
///
/// Branch `b` is the `b`-th edge given to [`PhyloTree::from_edges`],
/// oriented as `(parent, child)`.
#[derive(Debug, Clone)]
pub struct PhyloTree {
    nodes: Vec<PhyloNode>,
    root: usize,
    branch_child: Vec<usize>,
}

impl PhyloTree {
    /// Builds a tree over nodes `0..n` from `(parent, child, length)` edges.
    pub fn from_edges(n: usize, edges: &[(usize, usize, f64)]) -> PhyloResult<Self> {
        if n == 0 {
            return Err(PhyloError::InvalidTree {
                msg: "a tree needs at least one node".to_string(),
            });
        }
        if edges.len() != n - 1 {
            return Err(PhyloError::InvalidTree {
                msg: format!("{n} nodes need {} edges, got {}", n - 1, edges.len()),
            });
        }

        let mut nodes: Vec<PhyloNode> = (0..n)
            .map(|_| PhyloNode {
                label: None,
                branch_length: None,
                parent: None,
                parent_branch: None,
                children: Vec::new(),
            })
            .collect();
        let mut branch_child = Vec::with_capacity(edges.len());

        for (b, &(parent, child, length)) in edges.iter().enumerate() {
            if parent >= n || child >= n || parent == child {
                return Err(PhyloError::InvalidTree {
                    msg: format!("bad edge ({parent}, {child})"),
                });
            }
            if nodes[child].parent.is_some() {
                return Err(PhyloError::InvalidTree {
                    msg: format!("node {child} has two parents"),
                });
            }
            if length.is_nan() || length < 0.0 {
                return Err(PhyloError::InvalidTree {
                    msg: format!("branch {b} has length {length}"),
                });
            }
            nodes[child].parent = Some(parent);
            nodes[child].parent_branch = Some(b);
            nodes[child].branch_length = Some(length);
            nodes[parent].children.push(child);
            branch_child.push(child);
        }

        // With n - 1 single-parent edges there is exactly one parentless node;
        // the tree is valid iff it reaches everything.
        let root = (0..n)
            .find(|&i| nodes[i].parent.is_none())
            .ok_or_else(|| PhyloError::InvalidTree {
                msg: "every node has a parent".to_string(),
            })?;
        let mut seen = BitSet::with_capacity(n);
        let mut stack = vec![root];
        while let Some(x) = stack.pop() {
            if seen.insert(x) {
                stack.extend(nodes[x].children.iter().copied());
            }
        }
        if seen.len() != n {
            return Err(PhyloError::InvalidTree {
                msg: "edges do not connect all nodes".to_string(),
            });
        }

        Ok(Self {
            nodes,
            root,
            branch_child,
        })
    }

    pub fn with_labels<S: AsRef<str>>(mut self, labels: &[S]) -> PhyloResult<Self> {
        if labels.len() != self.nodes.len() {
            return Err(PhyloError::NodeCount {
                expected: self.nodes.len(),
                got: labels.len(),
            });
        }
        for (node, label) in self.nodes.iter_mut().zip(labels) {
            node.label = Some(label.as_ref().into());
        }
        Ok(self)
    }

    pub fn root(&self) -> usize {
        self.root
    }

    pub fn node(&self, idx: usize) -> &PhyloNode {
        &self.nodes[idx]
    }

    pub fn nodes(&self) -> &[PhyloNode] {
        &self.nodes
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn label(&self, idx: usize) -> Option<&str> {
        self.nodes[idx].label.as_deref()
    }

    pub fn labels(&self) -> Vec<String> {
        self.nodes
            .iter()
            .map(|n| n.label.as_deref().unwrap_or("").to_string())
            .collect()
    }

    pub fn neighbors(&self, idx: usize) -> Vec<usize> {
        let node = &self.nodes[idx];
        node.parent
            .into_iter()
            .chain(node.children.iter().copied())
            .collect()
    }

    pub fn degree(&self, idx: usize) -> usize {
        let node = &self.nodes[idx];
        node.children.len() + usize::from(node.parent.is_some())
    }

    pub fn is_leaf(&self, idx: usize) -> bool {
        self.degree(idx) <= 1
    }

    pub fn num_leaves(&self) -> usize {
        (0..self.nodes.len()).filter(|&i| self.is_leaf(i)).count()
    }

    pub fn leaves(&self) -> Vec<usize> {
        (0..self.nodes.len()).filter(|&i| self.is_leaf(i)).collect()
    }

    pub fn n_branches(&self) -> usize {
        self.branch_child.len()
    }

    /// `(parent, child)` endpoints of branch `b`.
    pub fn branch(&self, b: usize) -> (usize, usize) {
        let child = self.branch_child[b];
        let parent = self.nodes[child]
            .parent
            .expect("branch child always has a parent");
        (parent, child)
    }

    pub fn branch_length(&self, b: usize) -> f64 {
        self.nodes[self.branch_child[b]].branch_length.unwrap_or(0.0)
    }

    pub fn set_branch_length(&mut self, b: usize, length: f64) {
        let child = self.branch_child[b];
        self.nodes[child].branch_length = Some(length);
    }

    /// The branch joining `a` and `b`, in either orientation.
    pub fn find_branch(&self, a: usize, b: usize) -> Option<usize> {
        if self.nodes[b].parent == Some(a) {
            self.nodes[b].parent_branch
        } else if self.nodes[a].parent == Some(b) {
            self.nodes[a].parent_branch
        } else {
            None
        }
    }

    pub fn is_internal_branch(&self, b: usize) -> bool {
        let (parent, child) = self.branch(b);
        !self.is_leaf(parent) && !self.is_leaf(child)
    }

    /// Nodes on `to`'s side of the branch `(from, to)`, `to` included.
    pub fn partition(&self, from: usize, to: usize) -> PhyloResult<BitSet> {
        if self.find_branch(from, to).is_none() {
            return Err(PhyloError::NotAdjacent { a: from, b: to });
        }
        let mut side = BitSet::with_capacity(self.nodes.len());
        let mut stack = vec![(to, from)];
        while let Some((x, came_from)) = stack.pop() {
            side.insert(x);
            for y in self.neighbors(x) {
                if y != came_from {
                    stack.push((y, x));
                }
            }
        }
        Ok(side)
    }
}
