//! Reference evaluator for lowered graphs.
//!
//! One [`Evaluator`] instance plays the role of a single team member; the
//! worker-local view of the two external services is injected through the
//! [`PartitionQuery`] and [`CollectiveReduce`] traits. The evaluator only
//! understands programs that have already been through the distribution
//! lowering pass: a `range` that still carries a team operand, or a tensor
//! operation applied to a distributed value, evaluates to
//! [`EvalError::NotLowered`].
//!
//! All arithmetic is on `i64` data; the evaluator exists to make the
//! behavior of lowered programs checkable in tests, not to be a backend.

use std::collections::HashMap;

use crate::error::EvalError;
use crate::types::{DimExtent, TeamId};

use super::{BinaryOp, InfoField, OpType, ReduceOp, ScalarBinOp, TensorGraph, ValueId};

/// Worker-local decomposition of a global shape, owned by the external
/// partitioning service. One instance per team member.
pub trait PartitionQuery {
    /// Returns `(local_shape, local_offsets)` for this member. The union of
    /// `[offset, offset + local)` across members must cover every dimension
    /// exactly; that coverage invariant is the service's, not re-verified
    /// here.
    fn partition(&self, global_shape: &[i64], team: TeamId) -> (Vec<i64>, Vec<i64>);
}

/// Cross-worker reduction, owned by the external collective runtime. One
/// instance per team member.
pub trait CollectiveReduce {
    /// Combines every member's `local` contribution with `op` and returns
    /// the identical combined result on every member.
    fn all_reduce(&self, op: ReduceOp, local: &[i64], team: TeamId) -> Vec<i64>;
}

/// Runtime value produced by evaluation.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Int(i64),
    Shape(Vec<i64>),
    Team(TeamId),
    Info {
        local_shape: Vec<i64>,
        local_offsets: Vec<i64>,
        team: TeamId,
    },
    Array {
        data: Vec<i64>,
        shape: Vec<i64>,
    },
    Tensor {
        data: Vec<i64>,
        shape: Vec<i64>,
    },
    Dist {
        data: Vec<i64>,
        shape: Vec<i64>,
        local_shape: Vec<i64>,
        local_offsets: Vec<i64>,
        team: TeamId,
    },
}

/// Signed ceiling division: rounds the quotient toward positive infinity.
///
/// This is the rounding the strided-sequence element count needs for either
/// sign of `step`: `ceil_div(stop - start, step)` counts the indices `i`
/// with `start + i*step` strictly before `stop` in the direction of `step`.
pub fn ceil_div(a: i64, b: i64) -> i64 {
    let q = a / b;
    if a % b != 0 && (a < 0) == (b < 0) {
        q + 1
    } else {
        q
    }
}

/// Number of elements of the sequence `start, start+step, ...` bounded by
/// `stop` (exclusive), for either sign of `step`; never negative.
pub fn range_count(start: i64, stop: i64, step: i64) -> i64 {
    ceil_div(stop - start, step).max(0)
}

/// Single-member interpreter over a lowered graph.
pub struct Evaluator<'a, P, C> {
    partition: &'a P,
    collective: &'a C,
}

impl<'a, P: PartitionQuery, C: CollectiveReduce> Evaluator<'a, P, C> {
    pub fn new(partition: &'a P, collective: &'a C) -> Self {
        Evaluator {
            partition,
            collective,
        }
    }

    /// Evaluate every node in order. `bindings` supplies runtime values for
    /// graph inputs; the result holds one slot per value id.
    pub fn eval(
        &self,
        graph: &TensorGraph,
        bindings: &HashMap<ValueId, Value>,
    ) -> Result<Vec<Option<Value>>, EvalError> {
        let mut slots: Vec<Option<Value>> = vec![None; graph.value_count()];
        for (&id, value) in bindings {
            slots[id] = Some(value.clone());
        }

        for (idx, node) in graph.nodes.iter().enumerate() {
            let arg = |i: usize| -> Result<Value, EvalError> {
                let v = node.inputs[i];
                slots[v].clone().ok_or(EvalError::NotComputed { value: v })
            };

            let result = match &node.op {
                OpType::ConstInt { value } => Value::Int(*value),
                OpType::TeamConst { team } => Value::Team(*team),
                OpType::Scalar { op } => {
                    let a = as_int(arg(0)?, idx)?;
                    let b = as_int(arg(1)?, idx)?;
                    Value::Int(match op {
                        ScalarBinOp::Add => a + b,
                        ScalarBinOp::Sub => a - b,
                        ScalarBinOp::Mul => a * b,
                        ScalarBinOp::CeilDiv => {
                            if b == 0 {
                                return Err(runtime(idx, "ceil_div by zero"));
                            }
                            ceil_div(a, b)
                        }
                        ScalarBinOp::Max => a.max(b),
                    })
                }
                OpType::MakeShape => {
                    let mut dims = Vec::with_capacity(node.inputs.len());
                    for i in 0..node.inputs.len() {
                        dims.push(as_int(arg(i)?, idx)?);
                    }
                    Value::Shape(dims)
                }
                OpType::ConstShape { dims } => {
                    let mut out = Vec::with_capacity(dims.len());
                    for d in dims {
                        match d {
                            DimExtent::Static(n) => out.push(*n as i64),
                            DimExtent::Dynamic => {
                                return Err(runtime(idx, "const shape with dynamic extent"))
                            }
                        }
                    }
                    Value::Shape(out)
                }
                OpType::ShapeExtract { dim } => match arg(0)? {
                    Value::Shape(dims) => Value::Int(dims[*dim]),
                    other => return Err(mismatch(idx, "shape", &other)),
                },
                OpType::Range => {
                    if node.inputs.len() == 4 {
                        return Err(EvalError::NotLowered {
                            node: idx,
                            op: node.op.to_string(),
                        });
                    }
                    let start = as_int(arg(0)?, idx)?;
                    let stop = as_int(arg(1)?, idx)?;
                    let step = as_int(arg(2)?, idx)?;
                    if step == 0 {
                        return Err(runtime(idx, "range step must be non-zero"));
                    }
                    let count = range_count(start, stop, step);
                    let data: Vec<i64> = (0..count).map(|i| start + i * step).collect();
                    Value::Tensor {
                        data,
                        shape: vec![count],
                    }
                }
                OpType::ElemBinary { op } => {
                    let (ld, ls) = as_local_tensor(arg(0)?, idx, &node.op)?;
                    let (rd, rs) = as_local_tensor(arg(1)?, idx, &node.op)?;
                    if ls != rs {
                        return Err(runtime(idx, "element-wise operand shapes differ"));
                    }
                    let mut data = Vec::with_capacity(ld.len());
                    for (a, b) in ld.iter().zip(rd.iter()) {
                        data.push(match op {
                            BinaryOp::Add => a + b,
                            BinaryOp::Sub => a - b,
                            BinaryOp::Mul => a * b,
                            BinaryOp::Div => {
                                if *b == 0 {
                                    return Err(runtime(idx, "division by zero"));
                                }
                                a / b
                            }
                        });
                    }
                    Value::Tensor { data, shape: ls }
                }
                OpType::Reduce { op, axes } => {
                    let (data, shape) = as_local_tensor(arg(0)?, idx, &node.op)?;
                    if let Some(axes) = axes {
                        if axes.len() != shape.len() {
                            return Err(EvalError::PartialReduction);
                        }
                    }
                    Value::Tensor {
                        data: vec![fold(*op, &data)],
                        shape: vec![],
                    }
                }
                OpType::ExtractArray => match arg(0)? {
                    Value::Tensor { data, shape } => Value::Array { data, shape },
                    Value::Dist { .. } => {
                        return Err(EvalError::NotLowered {
                            node: idx,
                            op: node.op.to_string(),
                        });
                    }
                    other => return Err(mismatch(idx, "tensor", &other)),
                },
                OpType::MakeTensor => match arg(0)? {
                    Value::Array { data, shape } => Value::Tensor { data, shape },
                    other => return Err(mismatch(idx, "array", &other)),
                },
                OpType::MakeDistInfo { .. } => {
                    let gshape = match arg(0)? {
                        Value::Shape(dims) => dims,
                        other => return Err(mismatch(idx, "shape", &other)),
                    };
                    let team = as_team(arg(1)?, idx)?;
                    let (local_shape, local_offsets) = self.partition.partition(&gshape, team);
                    Value::Info {
                        local_shape,
                        local_offsets,
                        team,
                    }
                }
                OpType::GetInfo => match arg(0)? {
                    Value::Dist {
                        local_shape,
                        local_offsets,
                        team,
                        ..
                    } => Value::Info {
                        local_shape,
                        local_offsets,
                        team,
                    },
                    other => return Err(mismatch(idx, "distributed tensor", &other)),
                },
                OpType::InfoField { field } => match arg(0)? {
                    Value::Info {
                        local_shape,
                        local_offsets,
                        team,
                    } => match field {
                        InfoField::LocalShape => Value::Shape(local_shape),
                        InfoField::LocalOffsets => Value::Shape(local_offsets),
                        InfoField::Team => Value::Team(team),
                    },
                    other => return Err(mismatch(idx, "distinfo", &other)),
                },
                OpType::GetLocal => match arg(0)? {
                    Value::Dist { data, shape, .. } => Value::Tensor { data, shape },
                    other => return Err(mismatch(idx, "distributed tensor", &other)),
                },
                OpType::MakeDistributed => {
                    let (data, shape) = match arg(0)? {
                        Value::Tensor { data, shape } => (data, shape),
                        other => return Err(mismatch(idx, "tensor", &other)),
                    };
                    match arg(1)? {
                        Value::Info {
                            local_shape,
                            local_offsets,
                            team,
                        } => Value::Dist {
                            data,
                            shape,
                            local_shape,
                            local_offsets,
                            team,
                        },
                        other => return Err(mismatch(idx, "distinfo", &other)),
                    }
                }
                OpType::AllReduce { op } => {
                    let (data, shape) = match arg(0)? {
                        Value::Array { data, shape } => (data, shape),
                        other => return Err(mismatch(idx, "array", &other)),
                    };
                    let team = as_team(arg(1)?, idx)?;
                    let combined = self.collective.all_reduce(*op, &data, team);
                    Value::Array {
                        data: combined,
                        shape,
                    }
                }
            };
            slots[node.output] = Some(result);
        }

        Ok(slots)
    }

    /// Evaluate the graph and return the runtime value of a single value id.
    pub fn eval_value(
        &self,
        graph: &TensorGraph,
        bindings: &HashMap<ValueId, Value>,
        value: ValueId,
    ) -> Result<Value, EvalError> {
        let slots = self.eval(graph, bindings)?;
        slots
            .into_iter()
            .nth(value)
            .flatten()
            .ok_or(EvalError::NotComputed { value })
    }
}

fn fold(op: ReduceOp, data: &[i64]) -> i64 {
    match op {
        ReduceOp::Sum => data.iter().sum(),
        ReduceOp::Prod => data.iter().product(),
        ReduceOp::Min => data.iter().copied().min().unwrap_or(i64::MAX),
        ReduceOp::Max => data.iter().copied().max().unwrap_or(i64::MIN),
    }
}

fn as_int(value: Value, node: usize) -> Result<i64, EvalError> {
    match value {
        Value::Int(i) => Ok(i),
        other => Err(mismatch(node, "scalar", &other)),
    }
}

fn as_team(value: Value, node: usize) -> Result<TeamId, EvalError> {
    match value {
        Value::Team(t) => Ok(t),
        other => Err(mismatch(node, "team", &other)),
    }
}

fn as_local_tensor(
    value: Value,
    node: usize,
    op: &OpType,
) -> Result<(Vec<i64>, Vec<i64>), EvalError> {
    match value {
        Value::Tensor { data, shape } => Ok((data, shape)),
        Value::Dist { .. } => Err(EvalError::NotLowered {
            node,
            op: op.to_string(),
        }),
        other => Err(mismatch(node, "tensor", &other)),
    }
}

fn mismatch(node: usize, expected: &str, actual: &Value) -> EvalError {
    runtime(node, format!("expected {} value, got {:?}", expected, actual))
}

fn runtime(node: usize, message: impl Into<String>) -> EvalError {
    EvalError::Runtime {
        node,
        message: message.into(),
    }
}

/// Check that a binding map covers a graph's declared inputs.
pub fn check_bindings(
    graph: &TensorGraph,
    bindings: &HashMap<ValueId, Value>,
) -> Result<(), EvalError> {
    for &input in &graph.inputs {
        if !bindings.contains_key(&input) {
            return Err(EvalError::NotComputed { value: input });
        }
    }
    Ok(())
}
