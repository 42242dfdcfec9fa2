//! The rewrite rule set.
//!
//! One rule per distributable operation family. Each rule is a
//! (precondition, replacement) pair over a single node: the precondition
//! matches only when an operand carries the Distributed tensor tag, and the
//! replacement re-issues the operation on unwrapped local values before
//! re-wrapping the result. "No match" is a normal outcome, never an error.

mod elementwise;
mod extract;
mod range;
mod reduction;

pub use elementwise::ElementwiseRule;
pub use extract::ExtractRule;
pub use range::RangeRule;
pub use reduction::ReductionRule;

use spmd_ir::{TensorGraph, ValueId};

use crate::error::LowerError;

/// Outcome of offering one node to one rule.
#[derive(Debug)]
pub enum RuleOutcome {
    /// The precondition did not hold; the node is left untouched.
    NoMatch,
    /// The node was replaced. `requeue` lists the values the worklist
    /// should revisit.
    Applied { requeue: Vec<ValueId> },
}

/// A single local/global rewrite rule.
pub trait RewriteRule {
    /// Rule name, used in statistics and rewrite logs.
    fn name(&self) -> &'static str;

    /// Offer the node at `index` to this rule. On a match the rule replaces
    /// the node's local neighborhood in place; otherwise the graph is left
    /// untouched.
    fn apply(&self, graph: &mut TensorGraph, index: usize) -> Result<RuleOutcome, LowerError>;
}
