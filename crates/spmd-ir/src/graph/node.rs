//! Operations and nodes in the tensor program graph.

use serde::{Deserialize, Serialize};

use crate::error::IrError;
use crate::types::{DimExtent, TeamId, TensorType, ValueInfo, ValueKind};

use super::ValueId;

/// Element-wise binary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Reduction operators, assumed associative and commutative.
///
/// The same enumeration is used for local reductions and for the
/// cross-worker `AllReduce` request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReduceOp {
    Sum,
    Prod,
    Min,
    Max,
}

/// Scalar integer operators used for symbolic bound computation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalarBinOp {
    Add,
    Sub,
    Mul,
    /// Signed ceiling division: the quotient is rounded toward positive
    /// infinity, for either sign of divisor and dividend.
    CeilDiv,
    Max,
}

/// Fields that can be projected out of a DistInfo value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InfoField {
    /// This worker's per-dimension partition extents.
    LocalShape,
    /// This worker's per-dimension partition start indices.
    LocalOffsets,
    /// The owning team.
    Team,
}

/// Operation types supported in the tensor graph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum OpType {
    /// Integer constant.
    ConstInt { value: i64 },
    /// Team constant.
    TeamConst { team: TeamId },
    /// Scalar integer arithmetic on two scalar operands.
    Scalar { op: ScalarBinOp },
    /// Build a shape from per-dimension scalar extents.
    MakeShape,
    /// Statically known shape.
    ConstShape { dims: Vec<DimExtent> },
    /// Read one extent out of a shape value.
    ShapeExtract { dim: usize },
    /// One-dimensional arithmetic sequence from `[start, stop, step]`.
    /// An optional fourth `team` operand requests a distributed result.
    Range,
    /// Element-wise binary operation on two tensors.
    ElemBinary { op: BinaryOp },
    /// Reduction. `axes: None` reduces all axes to a 0-d scalar tensor.
    Reduce {
        op: ReduceOp,
        axes: Option<Vec<usize>>,
    },
    /// Extract the raw array from a tensor, stripping all annotations.
    ExtractArray,
    /// Wrap a raw array into a local tensor value.
    MakeTensor,
    /// Build a DistInfo from `[global_shape, team]`; the symbolic request
    /// answered by the external partitioning service.
    MakeDistInfo { rank: usize },
    /// Read the DistInfo embedded in a distributed tensor.
    GetInfo,
    /// Project a field out of a DistInfo.
    InfoField { field: InfoField },
    /// Unwrap a distributed tensor into its local partition tensor.
    GetLocal,
    /// Compose a local tensor and a DistInfo into a distributed tensor.
    MakeDistributed,
    /// Combine `[array, team]` across the team; the symbolic request
    /// answered by the external collective runtime. The only operation
    /// that introduces inter-worker communication.
    AllReduce { op: ReduceOp },
}

impl OpType {
    /// Short mnemonic used in diagnostics and graph dumps.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            OpType::ConstInt { .. } => "const",
            OpType::TeamConst { .. } => "team",
            OpType::Scalar { .. } => "scalar",
            OpType::MakeShape => "make_shape",
            OpType::ConstShape { .. } => "const_shape",
            OpType::ShapeExtract { .. } => "shape_extract",
            OpType::Range => "range",
            OpType::ElemBinary { .. } => "elem_binary",
            OpType::Reduce { .. } => "reduce",
            OpType::ExtractArray => "extract_array",
            OpType::MakeTensor => "make_tensor",
            OpType::MakeDistInfo { .. } => "make_dist_info",
            OpType::GetInfo => "get_info",
            OpType::InfoField { .. } => "info_field",
            OpType::GetLocal => "get_local",
            OpType::MakeDistributed => "make_distributed",
            OpType::AllReduce { .. } => "all_reduce",
        }
    }
}

impl std::fmt::Display for OpType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpType::ConstInt { value } => write!(f, "const({})", value),
            OpType::TeamConst { team } => write!(f, "team({})", team),
            OpType::Scalar { op } => write!(f, "scalar({:?})", op),
            OpType::ShapeExtract { dim } => write!(f, "shape_extract[{}]", dim),
            OpType::ElemBinary { op } => write!(f, "elem_binary({:?})", op),
            OpType::Reduce { op, axes } => match axes {
                Some(axes) => write!(f, "reduce({:?}, axes={:?})", op, axes),
                None => write!(f, "reduce({:?})", op),
            },
            OpType::MakeDistInfo { rank } => write!(f, "make_dist_info(rank={})", rank),
            OpType::InfoField { field } => write!(f, "info_field({:?})", field),
            OpType::AllReduce { op } => write!(f, "all_reduce({:?})", op),
            other => f.write_str(other.mnemonic()),
        }
    }
}

/// A node in the graph: one operation consuming input values and defining
/// exactly one output value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TensorNode {
    pub op: OpType,
    pub inputs: Vec<ValueId>,
    pub output: ValueId,
}

impl TensorNode {
    pub fn new(op: OpType, inputs: Vec<ValueId>, output: ValueId) -> Self {
        TensorNode { op, inputs, output }
    }

    /// True if any input value carries the Distributed tensor tag.
    pub fn has_distributed_operand(&self, values: &[ValueInfo]) -> bool {
        self.inputs
            .iter()
            .any(|&v| values[v].kind.is_distributed_tensor())
    }

    /// Validate operand counts and kinds against the value table.
    pub fn validate(&self, values: &[ValueInfo]) -> Result<(), IrError> {
        for &idx in self.inputs.iter().chain(std::iter::once(&self.output)) {
            if idx >= values.len() {
                return Err(IrError::ValueIndexOutOfBounds {
                    index: idx,
                    max: values.len().saturating_sub(1),
                });
            }
        }

        let kind = |v: ValueId| &values[v].kind;
        match &self.op {
            OpType::ConstInt { .. } | OpType::TeamConst { .. } | OpType::ConstShape { .. } => {
                self.expect_operands(0)
            }
            OpType::Scalar { .. } => {
                self.expect_operands(2)?;
                self.expect_scalar(kind, 0)?;
                self.expect_scalar(kind, 1)
            }
            OpType::MakeShape => {
                for i in 0..self.inputs.len() {
                    self.expect_scalar(kind, i)?;
                }
                Ok(())
            }
            OpType::ShapeExtract { dim } => {
                self.expect_operands(1)?;
                match kind(self.inputs[0]) {
                    ValueKind::Shape { dims } if *dim < dims.len() => Ok(()),
                    ValueKind::Shape { dims } => Err(IrError::AxisOutOfBounds {
                        axis: *dim,
                        rank: dims.len(),
                    }),
                    other => Err(self.kind_error(0, "shape", other)),
                }
            }
            OpType::Range => {
                if self.inputs.len() != 3 && self.inputs.len() != 4 {
                    return Err(IrError::WrongOperandCount {
                        op: self.op.mnemonic().into(),
                        expected: "3 or 4".into(),
                        actual: self.inputs.len(),
                    });
                }
                for i in 0..3 {
                    self.expect_scalar(kind, i)?;
                }
                if self.inputs.len() == 4 {
                    self.expect_team(kind, 3)?;
                }
                Ok(())
            }
            OpType::ElemBinary { .. } => {
                self.expect_operands(2)?;
                self.expect_tensor(kind, 0)?;
                self.expect_tensor(kind, 1).map(|_| ())
            }
            OpType::Reduce { axes, .. } => {
                self.expect_operands(1)?;
                let t = self.expect_tensor(kind, 0)?;
                if let Some(axes) = axes {
                    let mut seen = vec![false; t.rank];
                    for &axis in axes {
                        if axis >= t.rank {
                            return Err(IrError::AxisOutOfBounds {
                                axis,
                                rank: t.rank,
                            });
                        }
                        if seen[axis] {
                            return Err(IrError::DuplicateAxis { axis });
                        }
                        seen[axis] = true;
                    }
                }
                Ok(())
            }
            OpType::ExtractArray => {
                self.expect_operands(1)?;
                self.expect_tensor(kind, 0).map(|_| ())
            }
            OpType::MakeTensor => {
                self.expect_operands(1)?;
                match kind(self.inputs[0]) {
                    ValueKind::Array { .. } => Ok(()),
                    other => Err(self.kind_error(0, "array", other)),
                }
            }
            OpType::MakeDistInfo { rank } => {
                self.expect_operands(2)?;
                match kind(self.inputs[0]) {
                    ValueKind::Shape { dims } if dims.len() == *rank => Ok(()),
                    ValueKind::Shape { dims } => Err(IrError::NodeValidation {
                        node: 0,
                        message: format!(
                            "make_dist_info rank {} does not match shape rank {}",
                            rank,
                            dims.len()
                        ),
                    }),
                    other => Err(self.kind_error(0, "shape", other)),
                }?;
                self.expect_team(kind, 1)
            }
            OpType::GetInfo | OpType::GetLocal => {
                self.expect_operands(1)?;
                let t = self.expect_tensor(kind, 0)?;
                if !t.is_distributed() {
                    return Err(self.kind_error(0, "tensor<dist>", kind(self.inputs[0])));
                }
                Ok(())
            }
            OpType::InfoField { .. } => {
                self.expect_operands(1)?;
                match kind(self.inputs[0]) {
                    ValueKind::DistInfo { .. } => Ok(()),
                    other => Err(self.kind_error(0, "distinfo", other)),
                }
            }
            OpType::MakeDistributed => {
                self.expect_operands(2)?;
                let t = self.expect_tensor(kind, 0)?;
                if t.is_distributed() {
                    return Err(self.kind_error(0, "tensor", kind(self.inputs[0])));
                }
                match kind(self.inputs[1]) {
                    ValueKind::DistInfo { .. } => Ok(()),
                    other => Err(self.kind_error(1, "distinfo", other)),
                }
            }
            OpType::AllReduce { .. } => {
                self.expect_operands(2)?;
                match kind(self.inputs[0]) {
                    ValueKind::Array { .. } => Ok(()),
                    other => Err(self.kind_error(0, "array", other)),
                }?;
                self.expect_team(kind, 1)
            }
        }
    }

    fn expect_operands(&self, expected: usize) -> Result<(), IrError> {
        if self.inputs.len() != expected {
            return Err(IrError::WrongOperandCount {
                op: self.op.mnemonic().into(),
                expected: expected.to_string(),
                actual: self.inputs.len(),
            });
        }
        Ok(())
    }

    fn expect_scalar<'a>(
        &self,
        kind: impl Fn(ValueId) -> &'a ValueKind,
        operand: usize,
    ) -> Result<(), IrError> {
        match kind(self.inputs[operand]) {
            ValueKind::Scalar => Ok(()),
            other => Err(self.kind_error(operand, "scalar", other)),
        }
    }

    fn expect_team<'a>(
        &self,
        kind: impl Fn(ValueId) -> &'a ValueKind,
        operand: usize,
    ) -> Result<(), IrError> {
        match kind(self.inputs[operand]) {
            ValueKind::Team { .. } => Ok(()),
            other => Err(self.kind_error(operand, "team", other)),
        }
    }

    fn expect_tensor<'a>(
        &self,
        kind: impl Fn(ValueId) -> &'a ValueKind,
        operand: usize,
    ) -> Result<&'a TensorType, IrError> {
        match kind(self.inputs[operand]) {
            ValueKind::Tensor(t) => Ok(t),
            other => Err(self.kind_error(operand, "tensor", other)),
        }
    }

    fn kind_error(&self, operand: usize, expected: &str, actual: &ValueKind) -> IrError {
        IrError::KindMismatch {
            op: self.op.mnemonic().into(),
            operand,
            expected: expected.into(),
            actual: actual.name().into(),
        }
    }
}
