use thiserror::Error;

#[derive(Debug, Error)]
pub enum PhyloError {
    #[error("no allowed emitting state at DP position {pos}")]
    EmptyAllowedStates { pos: usize },

    #[error("no path through the HMM has positive probability")]
    NoValidPath,

    #[error("transition matrix must be {expected}x{expected}, got {rows}x{cols}")]
    TransitionShape {
        expected: usize,
        rows: usize,
        cols: usize,
    },

    #[error("start vector has {got} entries, expected {expected}")]
    StartLength { expected: usize, got: usize },

    #[error("emission table must be {rows}x{cols}, got {got_rows}x{got_cols}")]
    EmissionShape {
        rows: usize,
        cols: usize,
        got_rows: usize,
        got_cols: usize,
    },

    #[error("invalid HMM: {msg}")]
    InvalidHmm { msg: String },

    #[error("invalid path: {msg}")]
    InvalidPath { msg: String },

    #[error("column {column} has a disconnected presence pattern for the selected nodes")]
    InvalidColumn { column: usize },

    #[error("invalid alignment: {msg}")]
    InvalidAlignment { msg: String },

    #[error("alignment has {got} node rows but the tree has {expected} nodes")]
    AlignmentTreeMismatch { expected: usize, got: usize },

    #[error("invalid tree: {msg}")]
    InvalidTree { msg: String },

    #[error("nodes {a} and {b} are not adjacent")]
    NotAdjacent { a: usize, b: usize },

    #[error("node {node} is not an internal node of degree 3")]
    NotInternalNode { node: usize },

    #[error("branch {branch} is not an internal branch")]
    NotInternalBranch { branch: usize },

    #[error("expected {expected} nodes, got {got}")]
    NodeCount { expected: usize, got: usize },

    #[error("node {node} out of range (n={n})")]
    NodeOutOfRange { node: usize, n: usize },

    #[error("node {node} is listed more than once")]
    DuplicateNode { node: usize },

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("unknown parameter '{name}'")]
    UnknownParameter { name: String },

    #[error("duplicate parameter '{name}'")]
    DuplicateParameter { name: String },

    #[error("parameter index {index} out of range (n={n})")]
    ParameterIndex { index: usize, n: usize },

    #[error("parameter '{name}' has no value")]
    MissingValue { name: String },

    #[error("term {index} is not a parameter")]
    NotAParameter { index: usize },

    #[error("term index {index} out of range (size={size})")]
    TermIndex { index: usize, size: usize },

    #[error("operation '{op}' expects {expected} arguments, got {got}")]
    Arity {
        op: String,
        expected: usize,
        got: usize,
    },

    #[error("argument slot {slot} out of range for '{op}'")]
    SlotOutOfRange { op: String, slot: usize },

    #[error("division by zero in '{op}'")]
    DivideByZero { op: String },

    #[error("unknown distribution '{name}'")]
    UnknownDistribution { name: String },

    #[error("distribution '{name}' expects {expected} hyperparameters, got {got}")]
    DistributionArgs {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("invalid model: {msg}")]
    InvalidModel { msg: String },

    #[error("alphabet size mismatch: {a} vs {b}")]
    AlphabetMismatch { a: usize, b: usize },

    #[error("model '{model}' does not support an alphabet of size {size}")]
    UnsupportedAlphabet { model: &'static str, size: usize },

    #[error("token {token} is not active")]
    InactiveToken { token: usize },

    #[error("invalid configuration: {msg}")]
    InvalidConfig { msg: String },

    #[error("alignment constraint: {msg}")]
    Constraint { msg: String },
}

pub type PhyloResult<T> = Result<T, PhyloError>;
