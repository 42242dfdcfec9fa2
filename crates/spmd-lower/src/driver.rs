//! Fixed-point worklist driver for the lowering pass.

use std::collections::VecDeque;

use spmd_ir::{TensorGraph, ValueId};
use tracing::debug;

use crate::error::LowerError;
use crate::rules::{
    ElementwiseRule, ExtractRule, RangeRule, ReductionRule, RewriteRule, RuleOutcome,
};

/// Statistics for one pass run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LowerStats {
    /// Total rewrites applied.
    pub rewrites: usize,
    /// Per-rule application counts, in rule order.
    pub by_rule: Vec<(&'static str, usize)>,
    pub nodes_before: usize,
    pub nodes_after: usize,
}

/// The lowering pass. Repeatedly offers graph nodes to its rule set until
/// no rule matches anywhere.
///
/// The worklist carries value ids rather than node indices: node indices
/// shift when a node is replaced by a subprogram, while the value table is
/// append-only, so a value id stays a stable handle on "the node producing
/// this value". Termination follows from the rules themselves: every
/// replacement is built from locally-tagged intermediates, so re-offering a
/// replacement's values finds nothing left to match.
pub struct LowerDistPass {
    rules: Vec<Box<dyn RewriteRule>>,
}

impl Default for LowerDistPass {
    fn default() -> Self {
        Self::new()
    }
}

impl LowerDistPass {
    /// The standard rule set, in match-priority order.
    pub fn new() -> Self {
        Self::with_rules(vec![
            Box::new(RangeRule),
            Box::new(ElementwiseRule),
            Box::new(ReductionRule),
            Box::new(ExtractRule),
        ])
    }

    /// A pass over a caller-chosen rule set.
    pub fn with_rules(rules: Vec<Box<dyn RewriteRule>>) -> Self {
        LowerDistPass { rules }
    }

    /// Run the pass to fixed point over `graph`.
    pub fn run(&self, graph: &mut TensorGraph) -> Result<LowerStats, LowerError> {
        let mut stats = LowerStats {
            nodes_before: graph.node_count(),
            by_rule: self.rules.iter().map(|r| (r.name(), 0)).collect(),
            ..Default::default()
        };

        let mut worklist: VecDeque<ValueId> =
            graph.nodes.iter().map(|n| n.output).collect();
        while let Some(value) = worklist.pop_front() {
            let Some(index) = graph.producer(value) else {
                continue;
            };
            for (slot, rule) in self.rules.iter().enumerate() {
                match rule.apply(graph, index)? {
                    RuleOutcome::NoMatch => continue,
                    RuleOutcome::Applied { requeue } => {
                        debug!(rule = rule.name(), value, "applied rewrite");
                        stats.rewrites += 1;
                        stats.by_rule[slot].1 += 1;
                        worklist.extend(requeue);
                        // Consumers of the rewritten value may now be
                        // matchable (or no longer matchable); revisit them.
                        for consumer in graph.consumers(value) {
                            worklist.push_back(graph.nodes[consumer].output);
                        }
                        break;
                    }
                }
            }
        }

        stats.nodes_after = graph.node_count();
        debug!(
            rewrites = stats.rewrites,
            nodes_before = stats.nodes_before,
            nodes_after = stats.nodes_after,
            "lowering pass finished"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use spmd_ir::{OpType, TeamId};

    use super::*;

    #[test]
    fn range_program_reaches_fixed_point() {
        let mut g = TensorGraph::new();
        let start = g.const_int(0);
        let stop = g.const_int(12);
        let step = g.const_int(2);
        let team = g.team(TeamId(0));
        let r = g.range(start, stop, step, Some(team)).unwrap();
        let arr = g.extract_array(r).unwrap();
        g.add_output(arr).unwrap();

        let pass = LowerDistPass::new();
        let stats = pass.run(&mut g).unwrap();
        assert_eq!(stats.rewrites, 2);
        assert!(g.validate().is_ok());
        // No node still consumes a distributed tensor it cannot handle.
        assert_eq!(
            g.count_ops(|op| matches!(op, OpType::Range | OpType::ExtractArray)),
            2
        );

        // Second run is a no-op.
        let stats = pass.run(&mut g).unwrap();
        assert_eq!(stats.rewrites, 0);
        assert_eq!(stats.nodes_before, stats.nodes_after);
    }

    #[test]
    fn purely_local_graph_is_untouched() {
        let mut g = TensorGraph::new();
        let start = g.const_int(0);
        let stop = g.const_int(4);
        let step = g.const_int(1);
        let r = g.range(start, stop, step, None).unwrap();
        g.extract_array(r).unwrap();
        let before = g.clone();

        let stats = LowerDistPass::new().run(&mut g).unwrap();
        assert_eq!(stats.rewrites, 0);
        assert_eq!(g, before);
    }
}
