use bit_set::BitSet;

use crate::error::{PhyloError, PhyloResult};
use crate::phylo::PhyloTree;

/// Marks a residue whose letter is not observed (ancestral nodes).
pub const UNKNOWN_RESIDUE: char = '#';

/// Which tree nodes have a residue in which column, plus the letters of
/// the nodes whose sequences are observed.
///
/// Stored column-major: column `c` is the set of nodes with a residue in
/// it. `sequences[n]` holds the letter indices of node `n` in residue
/// order, or `None` when the node's letters are unknown.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Alignment {
    n_nodes: usize,
    columns: Vec<BitSet>,
    sequences: Vec<Option<Vec<u8>>>,
}

impl Alignment {
    pub fn new(n_nodes: usize) -> Self {
        Self {
            n_nodes,
            columns: Vec::new(),
            sequences: vec![None; n_nodes],
        }
    }

    /// Columns given as node sets; no letters are recorded.
    pub fn from_columns(n_nodes: usize, columns: Vec<BitSet>) -> PhyloResult<Self> {
        if let Some(n) = columns.iter().flat_map(|c| c.iter()).find(|&n| n >= n_nodes) {
            return Err(PhyloError::InvalidAlignment {
                msg: format!("column names node {n}, alignment has {n_nodes} nodes"),
            });
        }
        Ok(Self {
            n_nodes,
            columns,
            sequences: vec![None; n_nodes],
        })
    }

    /// One string per node; `'-'` is a gap, anything else a residue.
    /// No letters are recorded.
    pub fn from_rows<S: AsRef<str>>(rows: &[S]) -> PhyloResult<Self> {
        let width = check_width(rows)?;
        let mut columns = vec![BitSet::with_capacity(rows.len()); width];
        for (n, row) in rows.iter().enumerate() {
            for (c, ch) in row.as_ref().chars().enumerate() {
                if ch != '-' {
                    columns[c].insert(n);
                }
            }
        }
        Ok(Self {
            n_nodes: rows.len(),
            columns,
            sequences: vec![None; rows.len()],
        })
    }

    /// Like [`Alignment::from_rows`], but letters found in `alphabet` are
    /// recorded. A row written only with [`UNKNOWN_RESIDUE`] and gaps has
    /// unknown letters.
    pub fn from_sequences<S: AsRef<str>>(rows: &[S], alphabet: &[char]) -> PhyloResult<Self> {
        let mut a = Self::from_rows(rows)?;
        for (n, row) in rows.iter().enumerate() {
            let residues: Vec<char> = row.as_ref().chars().filter(|&ch| ch != '-').collect();
            if residues.iter().all(|&ch| ch == UNKNOWN_RESIDUE) {
                continue;
            }
            let letters = residues
                .iter()
                .map(|&ch| {
                    alphabet
                        .iter()
                        .position(|&l| l == ch)
                        .map(|l| l as u8)
                        .ok_or_else(|| PhyloError::InvalidAlignment {
                            msg: format!("row {n}: '{ch}' is not in the alphabet {alphabet:?}"),
                        })
                })
                .collect::<PhyloResult<Vec<u8>>>()?;
            a.sequences[n] = Some(letters);
        }
        Ok(a)
    }

    /// Attaches letters; each observed sequence must have one letter per
    /// residue of its node.
    pub fn with_sequences(mut self, sequences: Vec<Option<Vec<u8>>>) -> PhyloResult<Self> {
        if sequences.len() != self.n_nodes {
            return Err(PhyloError::InvalidAlignment {
                msg: format!(
                    "{} sequences for an alignment of {} nodes",
                    sequences.len(),
                    self.n_nodes
                ),
            });
        }
        for (n, seq) in sequences.iter().enumerate() {
            if let Some(seq) = seq {
                if seq.len() != self.seqlength(n) {
                    return Err(PhyloError::InvalidAlignment {
                        msg: format!(
                            "node {n} has {} letters but {} residues",
                            seq.len(),
                            self.seqlength(n)
                        ),
                    });
                }
            }
        }
        self.sequences = sequences;
        Ok(self)
    }

    /// Appends a column. Nodes with observed letters cannot gain residues.
    pub fn push_column(&mut self, column: BitSet) -> PhyloResult<()> {
        if let Some(n) = column.iter().find(|&n| n >= self.n_nodes) {
            return Err(PhyloError::InvalidAlignment {
                msg: format!("column names node {n}, alignment has {} nodes", self.n_nodes),
            });
        }
        if let Some(n) = column.iter().find(|&n| self.sequences[n].is_some()) {
            return Err(PhyloError::InvalidAlignment {
                msg: format!("node {n} has an observed sequence"),
            });
        }
        self.columns.push(column);
        Ok(())
    }

    /// Appends a column given as one flag per node.
    pub fn push_presence(&mut self, presence: &[bool]) -> PhyloResult<()> {
        if presence.len() != self.n_nodes {
            return Err(PhyloError::InvalidAlignment {
                msg: format!(
                    "column has {} entries, alignment has {} nodes",
                    presence.len(),
                    self.n_nodes
                ),
            });
        }
        self.push_column(
            presence
                .iter()
                .enumerate()
                .filter(|&(_, &p)| p)
                .map(|(n, _)| n)
                .collect(),
        )
    }

    pub fn n_nodes(&self) -> usize {
        self.n_nodes
    }

    pub fn length(&self) -> usize {
        self.columns.len()
    }

    #[inline]
    pub fn present(&self, column: usize, node: usize) -> bool {
        self.columns[column].contains(node)
    }

    pub fn column(&self, column: usize) -> &BitSet {
        &self.columns[column]
    }

    pub fn columns(&self) -> &[BitSet] {
        &self.columns
    }

    pub fn sequence(&self, node: usize) -> Option<&[u8]> {
        self.sequences[node].as_deref()
    }

    pub fn sequences(&self) -> &[Option<Vec<u8>>] {
        &self.sequences
    }

    pub fn is_observed(&self, node: usize) -> bool {
        self.sequences[node].is_some()
    }

    /// For every column, the letter of each node there (`None` for gaps
    /// and unknown letters).
    pub fn column_letters(&self) -> Vec<Vec<Option<u8>>> {
        let mut next = vec![0usize; self.n_nodes];
        self.columns
            .iter()
            .map(|column| {
                let mut letters = vec![None; self.n_nodes];
                for n in column {
                    if let Some(seq) = &self.sequences[n] {
                        letters[n] = Some(seq[next[n]]);
                    }
                    next[n] += 1;
                }
                letters
            })
            .collect()
    }

    /// Number of residues of `node`.
    pub fn seqlength(&self, node: usize) -> usize {
        self.columns.iter().filter(|c| c.contains(node)).count()
    }

    /// Column index of each residue of `node`, in order.
    pub fn residue_columns(&self, node: usize) -> Vec<usize> {
        (0..self.columns.len())
            .filter(|&c| self.columns[c].contains(node))
            .collect()
    }

    /// Rows as strings, `'#'` for a residue and `'-'` for a gap.
    pub fn to_rows(&self) -> Vec<String> {
        (0..self.n_nodes)
            .map(|n| {
                self.columns
                    .iter()
                    .map(|c| if c.contains(n) { UNKNOWN_RESIDUE } else { '-' })
                    .collect()
            })
            .collect()
    }

    /// Rows with observed letters spelled out from `alphabet`.
    pub fn to_letter_rows(&self, alphabet: &[char]) -> Vec<String> {
        let letters = self.column_letters();
        (0..self.n_nodes)
            .map(|n| {
                letters
                    .iter()
                    .zip(&self.columns)
                    .map(|(l, c)| match (c.contains(n), l[n]) {
                        (false, _) => '-',
                        (true, Some(x)) => alphabet.get(x as usize).copied().unwrap_or('?'),
                        (true, None) => UNKNOWN_RESIDUE,
                    })
                    .collect()
            })
            .collect()
    }

    pub fn check_tree(&self, tree: &PhyloTree) -> PhyloResult<()> {
        if self.n_nodes != tree.num_nodes() {
            return Err(PhyloError::AlignmentTreeMismatch {
                expected: tree.num_nodes(),
                got: self.n_nodes,
            });
        }
        Ok(())
    }
}

fn check_width<S: AsRef<str>>(rows: &[S]) -> PhyloResult<usize> {
    let width = rows.first().map_or(0, |r| r.as_ref().chars().count());
    for (n, row) in rows.iter().enumerate() {
        let len = row.as_ref().chars().count();
        if len != width {
            return Err(PhyloError::InvalidAlignment {
                msg: format!("row {n} has {len} columns, expected {width}"),
            });
        }
    }
    Ok(width)
}
