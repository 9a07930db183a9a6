use bit_set::BitSet;
use tracing::info;

use super::Alignment;
use crate::error::{PhyloError, PhyloResult};

/// Residues that must share a column.
///
/// Each row names, per constrained leaf, either a residue index or
/// nothing. A row is satisfied when all named residues sit in one column.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConstraintMatrix {
    n_leaves: usize,
    rows: Vec<Vec<Option<usize>>>,
}

impl ConstraintMatrix {
    pub fn new(n_leaves: usize) -> Self {
        Self {
            n_leaves,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<Option<usize>>) -> PhyloResult<()> {
        if row.len() != self.n_leaves {
            return Err(PhyloError::Constraint {
                msg: format!("row has {} entries, expected {}", row.len(), self.n_leaves),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn n_leaves(&self) -> usize {
        self.n_leaves
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn row(&self, i: usize) -> &[Option<usize>] {
        &self.rows[i]
    }
}

/// Indices of the constraint rows that `a` satisfies. `leaves[j]` is the
/// alignment node of constraint column `j`.
pub fn constraint_satisfied(
    constraint: &ConstraintMatrix,
    a: &Alignment,
    leaves: &[usize],
) -> PhyloResult<BitSet> {
    if leaves.len() != constraint.n_leaves() {
        return Err(PhyloError::Constraint {
            msg: format!(
                "{} leaves given for {} constraint columns",
                leaves.len(),
                constraint.n_leaves()
            ),
        });
    }
    let residue_columns: Vec<Vec<usize>> = leaves.iter().map(|&n| a.residue_columns(n)).collect();

    let mut satisfied = BitSet::with_capacity(constraint.n_rows());
    for i in 0..constraint.n_rows() {
        let mut column: Option<usize> = None;
        let mut ok = true;
        for (j, residue) in constraint.row(i).iter().enumerate() {
            let Some(r) = *residue else { continue };
            let c = *residue_columns[j].get(r).ok_or_else(|| PhyloError::Constraint {
                msg: format!(
                    "row {i} names residue {r} of leaf {}, which has {}",
                    leaves[j],
                    residue_columns[j].len()
                ),
            })?;
            match column {
                None => column = Some(c),
                Some(prev) if prev != c => ok = false,
                Some(_) => {}
            }
        }
        if ok {
            satisfied.insert(i);
        }
    }
    Ok(satisfied)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConstraintReport {
    pub satisfied: usize,
    pub total: usize,
    pub gained: Vec<usize>,
    pub lost: Vec<usize>,
}

/// Compares constraint satisfaction before (`s1`) and after (`s2`) a move
/// and logs the change.
pub fn report_constraints(s1: &BitSet, s2: &BitSet, total: usize) -> ConstraintReport {
    let gained: Vec<usize> = s2.difference(s1).collect();
    let lost: Vec<usize> = s1.difference(s2).collect();
    let report = ConstraintReport {
        satisfied: s2.len(),
        total,
        gained,
        lost,
    };
    if !report.gained.is_empty() || !report.lost.is_empty() {
        info!(
            satisfied = report.satisfied,
            total,
            gained = ?report.gained,
            lost = ?report.lost,
            "alignment constraints changed"
        );
    }
    report
}
