//! Error types for the lowering pass.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LowerError {
    /// Reduction along a strict subset of axes over a distributed operand.
    /// The rule must surface this at the point it is asked to handle it
    /// rather than silently leaving the operation unrewritten.
    #[error("Reduction over an axis subset of a distributed tensor is not supported (axes {axes:?})")]
    UnsupportedPartialReduction { axes: Vec<usize> },
    #[error(transparent)]
    Ir(#[from] spmd_ir::IrError),
}
