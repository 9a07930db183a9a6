use std::sync::Arc;

use ndarray::Array2;

use crate::align::{prior_branch, Alignment};
use crate::error::{PhyloError, PhyloResult};
use crate::graph::{Context, Operation, OperationArgs, Value};
use crate::hmm::PairHmm;
use crate::likelihood::{alignment_likelihood, SubstitutionTables};
use crate::model::{IndelKind, IndelModel, Model};
use crate::phylo::PhyloTree;
use crate::prob::{DistributionRegistry, LogDouble};

/// Pair HMM of one branch from the indel parameters and the branch
/// length (last slot).
#[derive(Debug)]
struct BranchHmmOp {
    kind: IndelKind,
    name: String,
}

impl BranchHmmOp {
    fn new(kind: IndelKind) -> Self {
        Self {
            kind,
            name: format!("{}_branch_hmm", kind.name()),
        }
    }
}

impl Operation for BranchHmmOp {
    fn name(&self) -> &str {
        &self.name
    }

    fn n_args(&self) -> usize {
        self.kind.n_parameters() + 1
    }

    fn apply(&self, args: &mut dyn OperationArgs) -> PhyloResult<Value> {
        let n = self.kind.n_parameters();
        let values = (0..n)
            .map(|i| args.evaluate_as::<f64>(i))
            .collect::<PhyloResult<Vec<f64>>>()?;
        let t = args.evaluate_as::<f64>(n)?;
        Ok(Value::PairHmm(self.kind.branch_hmm(&values, t)?))
    }
}

/// Transition matrix of a substitution model over one branch. Rate
/// mixtures are averaged over their bins.
#[derive(Debug)]
struct TransitionPOp;

impl Operation for TransitionPOp {
    fn name(&self) -> &str {
        "transition_p"
    }

    fn n_args(&self) -> usize {
        2
    }

    fn apply(&self, args: &mut dyn OperationArgs) -> PhyloResult<Value> {
        let t = args.evaluate_as::<f64>(1)?;
        let p = match &*args.evaluate(0)? {
            Value::Markov(m) => m.transition_p(t),
            Value::Mixture(m) => m.mixed_transition_p(t),
            other => {
                return Err(PhyloError::TypeMismatch {
                    expected: "Markov or Mixture",
                    found: other.kind(),
                })
            }
        };
        Ok(Value::Matrix(p))
    }
}

/// Transition matrices of one branch, one per rate bin.
#[derive(Debug)]
struct TransitionPsOp;

impl Operation for TransitionPsOp {
    fn name(&self) -> &str {
        "transition_ps"
    }

    fn n_args(&self) -> usize {
        2
    }

    fn apply(&self, args: &mut dyn OperationArgs) -> PhyloResult<Value> {
        let t = args.evaluate_as::<f64>(1)?;
        let ps = match &*args.evaluate(0)? {
            Value::Markov(m) => vec![m.transition_p(t)],
            Value::Mixture(m) => m.transition_p(t),
            other => {
                return Err(PhyloError::TypeMismatch {
                    expected: "Markov or Mixture",
                    found: other.kind(),
                })
            }
        };
        Ok(Value::Matrices(ps))
    }
}

fn check_substitution(value: &Value) -> PhyloResult<()> {
    match value {
        Value::Markov(_) | Value::Mixture(_) => Ok(()),
        other => Err(PhyloError::TypeMismatch {
            expected: "Markov or Mixture",
            found: other.kind(),
        }),
    }
}

/// Everything one MCMC step reads or proposes to change.
///
/// Cloning is the proposal snapshot: the clone shares the alignment and
/// every cached branch computation until one side writes to it.
#[derive(Clone, Debug)]
pub struct Parameters {
    tree: PhyloTree,
    alignment: Arc<Alignment>,
    indel: IndelModel,
    substitution: Option<Model>,
    context: Context,
    indel_terms: Vec<usize>,
    length_terms: Vec<usize>,
    hmm_terms: Vec<usize>,
    substitution_term: Option<usize>,
    transition_terms: Vec<usize>,
    bin_terms: Vec<usize>,
}

impl Parameters {
    pub fn new(tree: PhyloTree, alignment: Alignment, indel: IndelModel) -> PhyloResult<Self> {
        alignment.check_tree(&tree)?;
        let mut context = Context::default();

        let mut indel_terms = Vec::new();
        let values = indel.values()?;
        for (name, v) in indel.parameter_names().iter().zip(&values) {
            indel_terms.push(context.add_parameter(&format!("I:{name}"), Some(Value::Double(*v)))?);
        }

        let op: Arc<dyn Operation> = Arc::new(BranchHmmOp::new(indel.kind()));
        let mut length_terms = Vec::with_capacity(tree.n_branches());
        let mut hmm_terms = Vec::with_capacity(tree.n_branches());
        for b in 0..tree.n_branches() {
            let t = context.add_parameter(
                &format!("T:{b}"),
                Some(Value::Double(tree.branch_length(b))),
            )?;
            let mut args = indel_terms.clone();
            args.push(t);
            length_terms.push(t);
            hmm_terms.push(context.add_computed(op.clone(), args)?);
        }

        Ok(Self {
            tree,
            alignment: Arc::new(alignment),
            indel,
            substitution: None,
            context,
            indel_terms,
            length_terms,
            hmm_terms,
            substitution_term: None,
            transition_terms: Vec::new(),
            bin_terms: Vec::new(),
        })
    }

    pub fn tree(&self) -> &PhyloTree {
        &self.tree
    }

    pub fn alignment(&self) -> &Alignment {
        &self.alignment
    }

    /// Copies the alignment first if a snapshot still shares it.
    pub fn alignment_mut(&mut self) -> &mut Alignment {
        Arc::make_mut(&mut self.alignment)
    }

    pub fn shares_alignment(&self, other: &Parameters) -> bool {
        Arc::ptr_eq(&self.alignment, &other.alignment)
    }

    pub fn set_alignment(&mut self, alignment: Alignment) -> PhyloResult<()> {
        alignment.check_tree(&self.tree)?;
        self.alignment = Arc::new(alignment);
        Ok(())
    }

    pub fn indel_model(&self) -> &IndelModel {
        &self.indel
    }

    pub fn substitution_model(&self) -> Option<&Model> {
        self.substitution.as_ref()
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    fn check_branch(&self, b: usize) -> PhyloResult<()> {
        if b >= self.tree.n_branches() {
            return Err(PhyloError::InvalidTree {
                msg: format!("no branch {b} (tree has {})", self.tree.n_branches()),
            });
        }
        Ok(())
    }

    /// Pair HMM of branch `b`, with its parent end as seq1.
    pub fn branch_hmm(&mut self, b: usize) -> PhyloResult<PairHmm> {
        self.check_branch(b)?;
        self.context.evaluate_as::<PairHmm>(self.hmm_terms[b])
    }

    pub fn is_branch_hmm_cached(&self, b: usize) -> bool {
        self.context.is_up_to_date(self.hmm_terms[b])
    }

    /// Pair HMM between adjacent nodes, with `n1` as seq1.
    pub fn pair_hmm(&mut self, n1: usize, n2: usize) -> PhyloResult<PairHmm> {
        let b = self
            .tree
            .find_branch(n1, n2)
            .ok_or(PhyloError::NotAdjacent { a: n1, b: n2 })?;
        let hmm = self.branch_hmm(b)?;
        let (parent, _) = self.tree.branch(b);
        Ok(if parent == n1 { hmm } else { hmm.flipped() })
    }

    /// Returns the number of cached terms invalidated.
    pub fn set_branch_length(&mut self, b: usize, length: f64) -> PhyloResult<usize> {
        self.check_branch(b)?;
        if length.is_nan() || length < 0.0 {
            return Err(PhyloError::InvalidTree {
                msg: format!("branch length {length} is negative"),
            });
        }
        self.tree.set_branch_length(b, length);
        self.context
            .set_parameter_value(self.length_terms[b], Value::Double(length))
    }

    pub fn set_indel_parameter(&mut self, name: &str, value: f64) -> PhyloResult<usize> {
        self.indel.set_parameter(name, value)?;
        let index = self
            .indel
            .parameter_names()
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| PhyloError::UnknownParameter {
                name: name.to_string(),
            })?;
        self.context
            .set_parameter_value(self.indel_terms[index], Value::Double(value))
    }

    /// Installs (or replaces) the substitution model. The first call adds
    /// one transition-matrix term per branch.
    pub fn set_substitution(&mut self, model: Model) -> PhyloResult<usize> {
        let value = (*model.result()?).clone();
        check_substitution(&value)?;
        self.substitution = Some(model);
        self.push_substitution(value)
    }

    /// Writes one parameter of the installed substitution model.
    pub fn set_substitution_parameter(&mut self, name: &str, value: Value) -> PhyloResult<usize> {
        let model = self
            .substitution
            .as_mut()
            .ok_or_else(|| PhyloError::InvalidModel {
                msg: "no substitution model".to_string(),
            })?;
        model.set_parameter(name, value)?;
        let value = (*model.result()?).clone();
        self.push_substitution(value)
    }

    fn push_substitution(&mut self, value: Value) -> PhyloResult<usize> {
        if let Some(term) = self.substitution_term {
            return self.context.set_parameter_value(term, value);
        }
        let term = self.context.add_parameter("S:model", Some(value))?;
        let op: Arc<dyn Operation> = Arc::new(TransitionPOp);
        let bins: Arc<dyn Operation> = Arc::new(TransitionPsOp);
        for b in 0..self.tree.n_branches() {
            let args = vec![term, self.length_terms[b]];
            let p = self.context.add_computed(op.clone(), args.clone())?;
            self.transition_terms.push(p);
            let ps = self.context.add_computed(bins.clone(), args)?;
            self.bin_terms.push(ps);
        }
        self.substitution_term = Some(term);
        Ok(0)
    }

    pub fn transition_p(&mut self, b: usize) -> PhyloResult<Array2<f64>> {
        self.check_branch(b)?;
        let Some(&term) = self.transition_terms.get(b) else {
            return Err(PhyloError::InvalidModel {
                msg: "no substitution model".to_string(),
            });
        };
        self.context.evaluate_as::<Array2<f64>>(term)
    }

    pub fn has_substitution(&self) -> bool {
        self.substitution_term.is_some()
    }

    /// Per-bin transition matrices of every branch, read through the
    /// cache.
    pub fn substitution_tables(&mut self) -> PhyloResult<SubstitutionTables> {
        let Some(term) = self.substitution_term else {
            return Err(PhyloError::InvalidModel {
                msg: "no substitution model".to_string(),
            });
        };
        let matrices = self
            .bin_terms
            .iter()
            .map(|&t| self.context.evaluate_as::<Vec<Array2<f64>>>(t))
            .collect::<PhyloResult<Vec<_>>>()?;
        let model = self.context.evaluate(term)?;
        SubstitutionTables::from_model(&model, matrices)
    }

    /// Substitution likelihood of the current alignment.
    pub fn likelihood(&mut self) -> PhyloResult<LogDouble> {
        let tables = self.substitution_tables()?;
        alignment_likelihood(&self.alignment, &self.tree, &tables)
    }

    /// Alignment prior under the indel model:
    /// `prod_b prior_branch(A_b) * prod_n lengthp(L_n)^(1 - deg n)`.
    pub fn prior_hmm(&mut self) -> PhyloResult<LogDouble> {
        let mut branches = Vec::with_capacity(self.tree.n_branches());
        for b in 0..self.tree.n_branches() {
            let (parent, child) = self.tree.branch(b);
            branches.push((parent, child, self.branch_hmm(b)?));
        }
        let alignment = &*self.alignment;
        let per_branch: LogDouble = par_product!(&branches, |(parent, child, hmm)| {
            prior_branch(alignment, hmm, *parent, *child)
        });

        let kind = self.indel.kind();
        let values = self.indel.values()?;
        let tree = &self.tree;
        let nodes: Vec<usize> = (0..tree.num_nodes()).collect();
        let per_node: PhyloResult<Vec<LogDouble>> = par_try_map!(&nodes, |&n| {
            let exponent = 1 - tree.degree(n) as i32;
            kind.lengthp(&values, alignment.seqlength(n))
                .map(|p| p.powi(exponent))
        });

        Ok(per_branch * per_node?.into_iter().product::<LogDouble>())
    }

    /// Parameter priors of the indel and substitution models.
    pub fn prior(&self, registry: &DistributionRegistry) -> PhyloResult<LogDouble> {
        let mut p = self.indel.prior(registry)?;
        if let Some(model) = &self.substitution {
            p *= model.prior(registry)?;
        }
        Ok(p)
    }
}
