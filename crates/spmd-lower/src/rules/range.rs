use spmd_ir::{OpType, ScalarBinOp, TensorGraph};

use crate::emit::Rewriter;
use crate::error::LowerError;

use super::{RewriteRule, RuleOutcome};

/// Lowers a team-annotated `range` into a partition-local `range`.
///
/// The global element count is `max(0, ceil_div(stop - start, step))`. The
/// partition service assigns this rank a slice `[offset, offset + n)` of
/// those elements, so the local bounds follow by stepping into the global
/// sequence:
///
/// ```text
/// start' = start + offset * step
/// stop'  = start' + n * step
/// ```
///
/// The local range is then wrapped with the partition descriptor so the
/// result stays a distributed tensor for downstream consumers.
pub struct RangeRule;

impl RewriteRule for RangeRule {
    fn name(&self) -> &'static str {
        "range"
    }

    fn apply(&self, graph: &mut TensorGraph, index: usize) -> Result<RuleOutcome, LowerError> {
        let node = &graph.nodes[index];
        if !matches!(node.op, OpType::Range) || node.inputs.len() != 4 {
            return Ok(RuleOutcome::NoMatch);
        }
        let (start, stop, step, team) = (
            node.inputs[0],
            node.inputs[1],
            node.inputs[2],
            node.inputs[3],
        );
        let result = node.output;

        let mut rw = Rewriter::new(graph);
        let count = rw.range_count(start, stop, step);
        let gshape = rw.make_shape(&[count]);
        let info = rw.make_dist_info(gshape, team);

        let lshape = rw.local_shape_of(info);
        let lsize = rw.shape_extract(lshape, 0);
        let offsets = rw.local_offsets_of(info);
        let offset = rw.shape_extract(offsets, 0);

        let skipped = rw.scalar(ScalarBinOp::Mul, offset, step);
        let lstart = rw.scalar(ScalarBinOp::Add, start, skipped);
        let span = rw.scalar(ScalarBinOp::Mul, lsize, step);
        let lstop = rw.scalar(ScalarBinOp::Add, lstart, span);

        let local = rw.range(lstart, lstop, step);
        rw.make_distributed_into(local, info, result);

        Ok(RuleOutcome::Applied {
            requeue: rw.finish(index)?,
        })
    }
}
