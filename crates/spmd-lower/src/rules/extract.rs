use spmd_ir::{OpType, TensorGraph};

use crate::emit::Rewriter;
use crate::error::LowerError;

use super::{RewriteRule, RuleOutcome};

/// Lowers `extract_array` applied to a distributed tensor.
///
/// The raw array of a distributed value is its local block's array, so the
/// extraction is re-issued on the unwrapped local tensor. Note the result is
/// the partition-local array, not a materialized global one.
pub struct ExtractRule;

impl RewriteRule for ExtractRule {
    fn name(&self) -> &'static str {
        "extract"
    }

    fn apply(&self, graph: &mut TensorGraph, index: usize) -> Result<RuleOutcome, LowerError> {
        let node = &graph.nodes[index];
        if !matches!(node.op, OpType::ExtractArray) {
            return Ok(RuleOutcome::NoMatch);
        }
        let input = node.inputs[0];
        let result = node.output;
        if !graph.values[input].kind.is_distributed_tensor() {
            return Ok(RuleOutcome::NoMatch);
        }

        let mut rw = Rewriter::new(graph);
        let local = rw.get_local(input);
        rw.extract_array_into(local, result);

        Ok(RuleOutcome::Applied {
            requeue: rw.finish(index)?,
        })
    }
}
