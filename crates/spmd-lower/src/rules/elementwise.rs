use spmd_ir::{OpType, TensorGraph};

use crate::emit::Rewriter;
use crate::error::LowerError;

use super::{RewriteRule, RuleOutcome};

/// Lowers an element-wise binary op on two distributed tensors.
///
/// Partitions of the two operands are assumed congruent, so the op applies
/// pointwise to the local blocks with no communication. The result reuses
/// the left operand's distribution descriptor wholesale; it is canonical
/// because congruence means both operands carry the same one. Building a
/// fresh descriptor from the operand's static global shape instead would
/// fail whenever that shape contains dynamic extents (a lowered range has
/// one), so the embedded descriptor is read back via `get_info`.
pub struct ElementwiseRule;

impl RewriteRule for ElementwiseRule {
    fn name(&self) -> &'static str {
        "elementwise"
    }

    fn apply(&self, graph: &mut TensorGraph, index: usize) -> Result<RuleOutcome, LowerError> {
        let node = &graph.nodes[index];
        let op = match node.op {
            OpType::ElemBinary { op } => op,
            _ => return Ok(RuleOutcome::NoMatch),
        };
        let (lhs, rhs) = (node.inputs[0], node.inputs[1]);
        let result = node.output;
        let both_dist = graph.values[lhs].kind.is_distributed_tensor()
            && graph.values[rhs].kind.is_distributed_tensor();
        if !both_dist {
            return Ok(RuleOutcome::NoMatch);
        }

        let mut rw = Rewriter::new(graph);
        let local_lhs = rw.get_local(lhs);
        let local_rhs = rw.get_local(rhs);
        let local = rw.elem_binary(op, local_lhs, local_rhs);

        let info = rw.dist_info_of(lhs);
        rw.make_distributed_into(local, info, result);

        Ok(RuleOutcome::Applied {
            requeue: rw.finish(index)?,
        })
    }
}
