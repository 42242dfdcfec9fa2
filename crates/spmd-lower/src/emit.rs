//! Node-emission helpers shared by the rewrite rules.
//!
//! A [`Rewriter`] stages a replacement subprogram against the graph being
//! rewritten: every emit method allocates a fresh value and stages one node
//! defining it, and [`Rewriter::finish`] splices the staged nodes in place
//! of the matched node. The final staged node must redefine the matched
//! node's output value (the `*_into` methods), so consumers see the new
//! definition without any index rewriting.
//!
//! Every tensor value produced here is built from explicitly unwrapped,
//! Local-tagged values before any re-wrapping. That discipline is what
//! keeps the rule set non-recursive: a rule's replacement never contains an
//! operand that the rule itself could match again.

use spmd_ir::{
    BinaryOp, DType, DimExtent, Distribution, InfoField, OpType, ReduceOp, ScalarBinOp,
    TensorGraph, TensorNode, TensorType, ValueId, ValueKind,
};

use crate::error::LowerError;

pub struct Rewriter<'g> {
    graph: &'g mut TensorGraph,
    staged: Vec<TensorNode>,
}

impl<'g> Rewriter<'g> {
    pub fn new(graph: &'g mut TensorGraph) -> Self {
        Rewriter {
            graph,
            staged: Vec::new(),
        }
    }

    fn kind(&self, value: ValueId) -> &ValueKind {
        &self.graph.values[value].kind
    }

    fn emit(&mut self, op: OpType, inputs: Vec<ValueId>, kind: ValueKind) -> ValueId {
        let out = self.graph.add_value(kind);
        self.staged.push(TensorNode::new(op, inputs, out));
        out
    }

    fn emit_into(&mut self, op: OpType, inputs: Vec<ValueId>, out: ValueId) {
        self.staged.push(TensorNode::new(op, inputs, out));
    }

    pub fn const_int(&mut self, value: i64) -> ValueId {
        self.emit(OpType::ConstInt { value }, vec![], ValueKind::Scalar)
    }

    pub fn scalar(&mut self, op: ScalarBinOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.emit(OpType::Scalar { op }, vec![lhs, rhs], ValueKind::Scalar)
    }

    /// Global element count of a strided sequence:
    /// `max(0, ceil_div(stop - start, step))`. The ceiling division rounds
    /// toward positive infinity, which makes the formula correct for either
    /// sign of `step`; a step pointing away from `stop` yields zero.
    pub fn range_count(&mut self, start: ValueId, stop: ValueId, step: ValueId) -> ValueId {
        let span = self.scalar(ScalarBinOp::Sub, stop, start);
        let quot = self.scalar(ScalarBinOp::CeilDiv, span, step);
        let zero = self.const_int(0);
        self.scalar(ScalarBinOp::Max, quot, zero)
    }

    /// Build a shape value from per-dimension scalar extents.
    pub fn make_shape(&mut self, extents: &[ValueId]) -> ValueId {
        let dims = vec![DimExtent::Dynamic; extents.len()];
        self.emit(OpType::MakeShape, extents.to_vec(), ValueKind::Shape { dims })
    }

    /// Statically known shape value.
    pub fn const_shape(&mut self, dims: Vec<DimExtent>) -> ValueId {
        let kind = ValueKind::Shape { dims: dims.clone() };
        self.emit(OpType::ConstShape { dims }, vec![], kind)
    }

    pub fn shape_extract(&mut self, shape: ValueId, dim: usize) -> ValueId {
        self.emit(OpType::ShapeExtract { dim }, vec![shape], ValueKind::Scalar)
    }

    /// Build the partition-query request node for a global shape and team.
    pub fn make_dist_info(&mut self, global_shape: ValueId, team: ValueId) -> ValueId {
        let dims = match self.kind(global_shape) {
            ValueKind::Shape { dims } => dims.clone(),
            other => panic!(
                "make_dist_info applied to a {} value; rule precondition did not hold",
                other.name()
            ),
        };
        let team_id = match self.kind(team) {
            ValueKind::Team { team } => *team,
            other => panic!(
                "make_dist_info applied to a {} value; rule precondition did not hold",
                other.name()
            ),
        };
        let rank = dims.len();
        self.emit(
            OpType::MakeDistInfo { rank },
            vec![global_shape, team],
            ValueKind::DistInfo {
                team: team_id,
                global_shape: dims,
            },
        )
    }

    pub fn local_shape_of(&mut self, info: ValueId) -> ValueId {
        self.info_field(info, InfoField::LocalShape)
    }

    pub fn local_offsets_of(&mut self, info: ValueId) -> ValueId {
        self.info_field(info, InfoField::LocalOffsets)
    }

    fn info_field(&mut self, info: ValueId, field: InfoField) -> ValueId {
        let (team, rank) = match self.kind(info) {
            ValueKind::DistInfo { team, global_shape } => (*team, global_shape.len()),
            other => panic!(
                "info projection applied to a {} value; rule precondition did not hold",
                other.name()
            ),
        };
        let kind = match field {
            InfoField::Team => ValueKind::Team { team },
            InfoField::LocalShape | InfoField::LocalOffsets => ValueKind::Shape {
                dims: vec![DimExtent::Dynamic; rank],
            },
        };
        self.emit(OpType::InfoField { field }, vec![info], kind)
    }

    /// Read the embedded DistInfo out of a distributed tensor.
    pub fn dist_info_of(&mut self, dist: ValueId) -> ValueId {
        let ty = self.distributed_type(dist, "dist_info_of");
        let (team, global_shape) = match &ty.dist {
            Distribution::Distributed { team, global_shape } => (*team, global_shape.clone()),
            Distribution::Local => unreachable!(),
        };
        self.emit(
            OpType::GetInfo,
            vec![dist],
            ValueKind::DistInfo { team, global_shape },
        )
    }

    /// Recover the owning team of a distributed tensor by reading its
    /// embedded DistInfo.
    pub fn team_of(&mut self, dist: ValueId) -> ValueId {
        let info = self.dist_info_of(dist);
        self.info_field(info, InfoField::Team)
    }

    /// Unwrap a distributed tensor into its local partition, stripping all
    /// distribution metadata. Aborts if the operand does not carry the
    /// Distributed tag: the rules gate on that tag before calling this, so
    /// a local operand here is a defect in a rule's precondition check.
    pub fn get_local(&mut self, dist: ValueId) -> ValueId {
        let ty = self.distributed_type(dist, "get_local");
        let local = TensorType {
            dtype: ty.dtype,
            rank: ty.rank,
            device: ty.device.clone(),
            dist: Distribution::Local,
        };
        self.emit(OpType::GetLocal, vec![dist], ValueKind::Tensor(local))
    }

    fn distributed_type(&self, value: ValueId, caller: &str) -> TensorType {
        match self.kind(value) {
            ValueKind::Tensor(t) if t.is_distributed() => t.clone(),
            other => panic!(
                "{} applied to a {} value; rule precondition did not hold",
                caller,
                other.name()
            ),
        }
    }

    /// Re-issue a range construction with no team operand: a plain local
    /// 1-d tensor.
    pub fn range(&mut self, start: ValueId, stop: ValueId, step: ValueId) -> ValueId {
        self.emit(
            OpType::Range,
            vec![start, stop, step],
            ValueKind::Tensor(TensorType::local(DType::I64, 1)),
        )
    }

    /// Re-issue a binary element-wise operation on two local tensors. The
    /// result type follows the left operand.
    pub fn elem_binary(&mut self, op: BinaryOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        let ty = match self.kind(lhs) {
            ValueKind::Tensor(t) => t.clone(),
            other => panic!(
                "elem_binary applied to a {} value; rule precondition did not hold",
                other.name()
            ),
        };
        self.emit(
            OpType::ElemBinary { op },
            vec![lhs, rhs],
            ValueKind::Tensor(ty),
        )
    }

    /// Reduce every axis of a local tensor to a local 0-d tensor.
    pub fn reduce_all(&mut self, op: ReduceOp, input: ValueId) -> ValueId {
        let dtype = match self.kind(input) {
            ValueKind::Tensor(t) => t.dtype,
            other => panic!(
                "reduce_all applied to a {} value; rule precondition did not hold",
                other.name()
            ),
        };
        self.emit(
            OpType::Reduce { op, axes: None },
            vec![input],
            ValueKind::Tensor(TensorType::local(dtype, 0)),
        )
    }

    /// Extract the raw array from a local tensor.
    pub fn extract_array(&mut self, input: ValueId) -> ValueId {
        let (dtype, rank) = match self.kind(input) {
            ValueKind::Tensor(t) => (t.dtype, t.rank),
            other => panic!(
                "extract_array applied to a {} value; rule precondition did not hold",
                other.name()
            ),
        };
        self.emit(
            OpType::ExtractArray,
            vec![input],
            ValueKind::Array { dtype, rank },
        )
    }

    /// Extraction that redefines the matched node's output value.
    pub fn extract_array_into(&mut self, input: ValueId, out: ValueId) {
        self.emit_into(OpType::ExtractArray, vec![input], out);
    }

    /// Wrap a raw array back into a local tensor.
    pub fn make_tensor(&mut self, array: ValueId) -> ValueId {
        let (dtype, rank) = match self.kind(array) {
            ValueKind::Array { dtype, rank } => (*dtype, *rank),
            other => panic!(
                "make_tensor applied to a {} value; rule precondition did not hold",
                other.name()
            ),
        };
        self.emit(
            OpType::MakeTensor,
            vec![array],
            ValueKind::Tensor(TensorType::local(dtype, rank)),
        )
    }

    /// The cross-worker reduction request; the single point at which real
    /// inter-worker communication enters the program.
    pub fn all_reduce(&mut self, op: ReduceOp, array: ValueId, team: ValueId) -> ValueId {
        let kind = self.kind(array).clone();
        self.emit(OpType::AllReduce { op }, vec![array, team], kind)
    }

    /// Compose a local tensor and a DistInfo, redefining the matched
    /// node's output value.
    pub fn make_distributed_into(&mut self, local: ValueId, info: ValueId, out: ValueId) {
        self.emit_into(OpType::MakeDistributed, vec![local, info], out);
    }

    /// Splice the staged nodes in place of the node at `index` and return
    /// the values the worklist should revisit.
    pub fn finish(self, index: usize) -> Result<Vec<ValueId>, LowerError> {
        let requeue: Vec<ValueId> = self.staged.iter().map(|n| n.output).collect();
        self.graph.replace_node(index, self.staged)?;
        Ok(requeue)
    }
}
