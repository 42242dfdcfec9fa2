use spmd_ir::{DimExtent, OpType, TensorGraph};

use crate::emit::Rewriter;
use crate::error::LowerError;

use super::{RewriteRule, RuleOutcome};

/// Lowers a full reduction over a distributed tensor.
///
/// Each rank reduces its local block to a scalar, then an `all_reduce`
/// collective combines the per-rank partials with the same operator. The
/// combined value is wrapped as a rank-0 distributed tensor, replicated on
/// the original team.
///
/// Reductions over a proper axis subset need a redistribution step this
/// pass does not emit; they are reported as an error instead of being left
/// silently unlowered.
pub struct ReductionRule;

impl RewriteRule for ReductionRule {
    fn name(&self) -> &'static str {
        "reduction"
    }

    fn apply(&self, graph: &mut TensorGraph, index: usize) -> Result<RuleOutcome, LowerError> {
        let node = &graph.nodes[index];
        let (op, axes) = match &node.op {
            OpType::Reduce { op, axes } => (*op, axes.clone()),
            _ => return Ok(RuleOutcome::NoMatch),
        };
        let input = node.inputs[0];
        let result = node.output;
        if !graph.values[input].kind.is_distributed_tensor() {
            return Ok(RuleOutcome::NoMatch);
        }
        // An explicit axis list covering every axis is still a full
        // reduction; anything shorter is not lowerable here.
        if let Some(axes) = axes {
            let rank = graph.values[input]
                .kind
                .as_tensor()
                .map(|t| t.rank)
                .unwrap_or(0);
            if axes.len() < rank {
                return Err(LowerError::UnsupportedPartialReduction { axes });
            }
        }

        let mut rw = Rewriter::new(graph);
        let local = rw.get_local(input);
        let partial = rw.reduce_all(op, local);
        let array = rw.extract_array(partial);
        let team = rw.team_of(input);
        let combined = rw.all_reduce(op, array, team);
        let tensor = rw.make_tensor(combined);

        let gshape = rw.const_shape(Vec::<DimExtent>::new());
        let info = rw.make_dist_info(gshape, team);
        rw.make_distributed_into(tensor, info, result);

        Ok(RuleOutcome::Applied {
            requeue: rw.finish(index)?,
        })
    }
}
