//! Lowering of logically-global distributed tensor programs to
//! partition-local programs with explicit collectives.
//!
//! The pass consumes a [`spmd_ir::TensorGraph`] in which tensors may carry a
//! Distributed tag, and rewrites every operation on such tensors into the
//! same operation on its partition-local block, inserting `all_reduce`
//! collectives where ranks must combine results. The output program is in
//! SPMD form: every team member runs it unchanged, differing only in the
//! answers its partition service gives.
//!
//! ```
//! use spmd_ir::{TeamId, TensorGraph};
//! use spmd_lower::LowerDistPass;
//!
//! let mut g = TensorGraph::new();
//! let start = g.const_int(0);
//! let stop = g.const_int(10);
//! let step = g.const_int(1);
//! let team = g.team(TeamId(0));
//! let r = g.range(start, stop, step, Some(team)).unwrap();
//! let arr = g.extract_array(r).unwrap();
//! g.add_output(arr).unwrap();
//!
//! let stats = LowerDistPass::new().run(&mut g).unwrap();
//! assert!(stats.rewrites > 0);
//! ```

pub mod driver;
pub mod emit;
pub mod error;
pub mod rules;

pub use driver::{LowerDistPass, LowerStats};
pub use emit::Rewriter;
pub use error::LowerError;
pub use rules::{ElementwiseRule, ExtractRule, RangeRule, ReductionRule, RewriteRule, RuleOutcome};
