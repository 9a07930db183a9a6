//! Incremental evaluation of named quantities.
//!
//! A [`Formula`] is an arena of parameter, constant and computed terms. A
//! [`Context`] caches one value per term and records, for each computed
//! term, exactly which inputs its last evaluation read; setting a
//! parameter invalidates only terms that really read it. Contexts are
//! snapshots that share their regs copy-on-write, and [`RegMachine`]
//! manages a pool of them as tokens.

mod context;
mod formula;
mod machine;
mod operation;
mod reg;
mod value;

pub use context::Context;
pub use formula::{Expr, Formula, Term};
pub use machine::RegMachine;
pub use operation::{Builtin, DensityOp, FnOp, OpFn, Operation, OperationArgs};
pub use reg::{Computation, Reg};
pub use value::{FromValue, Value};
