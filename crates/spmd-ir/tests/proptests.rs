//! Property-based tests for the tensor program graph.

use proptest::prelude::*;
use spmd_ir::graph::eval::range_count;
use spmd_ir::{BinaryOp, DType, DimExtent, ReduceOp, TeamId, TensorGraph, TensorType, ValueKind};

/// Naive element count of the sequence start, start+step, ... bounded by
/// stop (exclusive) in the direction of step.
fn naive_count(start: i64, stop: i64, step: i64) -> i64 {
    let mut n = 0;
    let mut x = start;
    while (step > 0 && x < stop) || (step < 0 && x > stop) {
        n += 1;
        x += step;
        if n > 10_000 {
            break;
        }
    }
    n
}

proptest! {
    /// The closed-form count matches naive iteration for either step sign.
    #[test]
    fn range_count_matches_iteration(
        start in -1000i64..1000,
        stop in -1000i64..1000,
        step in prop_oneof![-8i64..0, 1i64..9],
    ) {
        prop_assert_eq!(range_count(start, stop, step), naive_count(start, stop, step));
    }

    /// Graphs built through the typed constructors always validate, and
    /// every value keeps a single producer.
    #[test]
    fn constructed_graphs_are_single_assignment(
        bounds in prop::collection::vec((-100i64..100, -100i64..100), 1..6),
        distributed in prop::collection::vec(any::<bool>(), 1..6),
    ) {
        let mut g = TensorGraph::new();
        let team = g.team(TeamId(0));
        let mut tensors = Vec::new();
        for ((start, stop), dist) in bounds.iter().zip(distributed.iter()) {
            let start = g.const_int(*start);
            let stop = g.const_int(*stop);
            let step = g.const_int(1);
            let t = g
                .range(start, stop, step, if *dist { Some(team) } else { None })
                .unwrap();
            tensors.push(t);
        }
        // Chain everything pairwise; mixing local and distributed operands
        // is allowed at construction time.
        let mut acc = tensors[0];
        for &t in &tensors[1..] {
            acc = g.elem_binary(BinaryOp::Add, acc, t).unwrap();
        }
        let red = g.reduce(ReduceOp::Sum, None, acc).unwrap();
        g.add_output(red).unwrap();

        prop_assert!(g.validate().is_ok());
        for v in 0..g.value_count() {
            let producers = g.nodes.iter().filter(|n| n.output == v).count();
            prop_assert!(producers <= 1, "value {} has {} producers", v, producers);
        }
    }
}

#[test]
fn graph_round_trips_through_serde() {
    let mut g = TensorGraph::new();
    let a = g.input(
        ValueKind::Tensor(TensorType::distributed(
            DType::I64,
            TeamId(2),
            vec![DimExtent::Static(16)],
        )),
        "a",
    );
    let b = g.input(
        ValueKind::Tensor(TensorType::distributed(
            DType::I64,
            TeamId(2),
            vec![DimExtent::Static(16)],
        )),
        "b",
    );
    let sum = g.elem_binary(BinaryOp::Mul, a, b).unwrap();
    g.add_output(sum).unwrap();

    let json = serde_json::to_string(&g).unwrap();
    let back: TensorGraph = serde_json::from_str(&json).unwrap();
    assert_eq!(g, back);
}
