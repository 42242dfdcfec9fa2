//! # spmd-ir
//!
//! Tensor program graph with distribution-tagged values.
//!
//! This crate is the data-model half of the SPMD lowering engine. It
//! represents tensor programs as immutable, single-assignment graphs whose
//! tensor values carry an explicit distribution tag: either `Local` (a
//! plain tensor on this worker) or `Distributed` (one logical global tensor
//! split across a team of workers, of which this worker holds a partition).
//!
//! ## Core components
//!
//! - [`TensorGraph`]: the program graph — a value table plus nodes in
//!   topological order, with typed constructors and whole-graph validation.
//! - [`OpType`]: the operation set. Besides ordinary tensor operations
//!   (range construction, element-wise binary, reduction, raw-array
//!   extraction) it includes the distribution operations the lowering pass
//!   emits: partition-query requests ([`OpType::MakeDistInfo`]),
//!   projections out of a distribution descriptor, local-partition
//!   unwrapping, and the cross-worker [`OpType::AllReduce`] request.
//! - [`Distribution`]: the tag distinguishing local from distributed
//!   tensor values; the lowering rules match on it.
//! - [`graph::eval`]: a small single-member reference evaluator used by
//!   tests, with the external partitioning and collective services
//!   injected as traits.
//!
//! The lowering rules themselves live in the companion `spmd-lower` crate.
//!
//! ## Quick start
//!
//! ```rust
//! use spmd_ir::{TeamId, TensorGraph};
//!
//! let mut g = TensorGraph::new();
//! let start = g.const_int(0);
//! let stop = g.const_int(10);
//! let step = g.const_int(1);
//! let team = g.team(TeamId(0));
//!
//! // A range over a team: one logical [0,10) sequence, distributed.
//! let r = g.range(start, stop, step, Some(team)).unwrap();
//! g.add_output(r).unwrap();
//! assert!(g.validate().is_ok());
//! ```

pub mod error;
pub mod graph;
pub mod types;

pub use error::{EvalError, IrError};
pub use graph::{
    BinaryOp, InfoField, OpType, ReduceOp, ScalarBinOp, TensorGraph, TensorNode, ValueId,
};
pub use types::{DType, DimExtent, Distribution, TeamId, TensorType, ValueInfo, ValueKind};
