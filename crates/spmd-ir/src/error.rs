//! Error types for the IR.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IrError {
    #[error("Value index {index} out of bounds (max: {max})")]
    ValueIndexOutOfBounds { index: usize, max: usize },
    #[error("Operation {op} expects {expected} operands, got {actual}")]
    WrongOperandCount {
        op: String,
        expected: String,
        actual: usize,
    },
    #[error("Operation {op} operand {operand}: expected {expected} value, got {actual}")]
    KindMismatch {
        op: String,
        operand: usize,
        expected: String,
        actual: String,
    },
    #[error("Value {value} is defined more than once")]
    Redefinition { value: usize },
    #[error("Value {value} is never defined")]
    Undefined { value: usize },
    #[error("Node {node}: {message}")]
    NodeValidation { node: usize, message: String },
    #[error("Operands belong to different teams: {lhs} vs {rhs}")]
    TeamMismatch { lhs: String, rhs: String },
    #[error("Reduction axis {axis} out of bounds for rank {rank}")]
    AxisOutOfBounds { axis: usize, rank: usize },
    #[error("Reduction axis {axis} listed more than once")]
    DuplicateAxis { axis: usize },
}

/// Errors raised by the reference evaluator.
#[derive(Error, Debug)]
pub enum EvalError {
    #[error("Value {value} was used before it was computed")]
    NotComputed { value: usize },
    #[error("Node {node}: operation {op} is not lowered; run the distribution pass first")]
    NotLowered { node: usize, op: String },
    #[error("Node {node}: {message}")]
    Runtime { node: usize, message: String },
    #[error("Reduction over an axis subset is not supported by the evaluator")]
    PartialReduction,
    #[error(transparent)]
    Ir(#[from] IrError),
}
