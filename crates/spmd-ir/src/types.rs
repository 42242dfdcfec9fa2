//! Value kinds and tensor types.

use serde::{Deserialize, Serialize};

/// Opaque identifier for a group of workers executing the same program.
///
/// Teams are immutable and equality-comparable; there is no membership
/// lifecycle beyond program scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TeamId(pub u64);

impl std::fmt::Display for TeamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "team{}", self.0)
    }
}

/// Element types supported by tensor values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DType {
    I64,
    F32,
    F64,
}

/// A per-dimension extent: a known non-negative size or unknown until runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DimExtent {
    Static(u64),
    Dynamic,
}

impl DimExtent {
    pub fn is_static(&self) -> bool {
        matches!(self, DimExtent::Static(_))
    }
}

/// How a tensor value is distributed across workers.
///
/// Every tensor value carries exactly one of these tags. The rewrite rules
/// match only on `Distributed` operands and build their replacements from
/// `Local` values, which is what makes repeated rule application terminate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Distribution {
    /// Plain tensor value on this worker; no distribution metadata.
    Local,
    /// One logical global tensor split across `team`; this worker holds a
    /// partition whose extent/offset are described by a DistInfo value.
    Distributed {
        team: TeamId,
        global_shape: Vec<DimExtent>,
    },
}

impl Distribution {
    pub fn is_distributed(&self) -> bool {
        matches!(self, Distribution::Distributed { .. })
    }

    /// The owning team, if this is a distributed tag.
    pub fn team(&self) -> Option<TeamId> {
        match self {
            Distribution::Distributed { team, .. } => Some(*team),
            Distribution::Local => None,
        }
    }
}

/// Type of a tensor value: element type, rank, optional device tag and the
/// distribution tag.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TensorType {
    pub dtype: DType,
    pub rank: usize,
    /// Optional device placement tag, carried through lowering untouched.
    pub device: Option<String>,
    pub dist: Distribution,
}

impl TensorType {
    /// A local (non-distributed) tensor type.
    pub fn local(dtype: DType, rank: usize) -> Self {
        TensorType {
            dtype,
            rank,
            device: None,
            dist: Distribution::Local,
        }
    }

    /// A distributed tensor type. The rank is taken from the global shape.
    pub fn distributed(dtype: DType, team: TeamId, global_shape: Vec<DimExtent>) -> Self {
        TensorType {
            dtype,
            rank: global_shape.len(),
            device: None,
            dist: Distribution::Distributed { team, global_shape },
        }
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    pub fn is_distributed(&self) -> bool {
        self.dist.is_distributed()
    }
}

/// Kind of a value in the program graph.
///
/// Shape and DistInfo kinds carry the statically known parts of their
/// payload so that result types of downstream nodes can be derived at
/// construction time; the actual numbers stay symbolic until execution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ValueKind {
    /// Symbolic integer scalar.
    Scalar,
    /// Ordered sequence of per-dimension extents.
    Shape { dims: Vec<DimExtent> },
    /// A worker team.
    Team { team: TeamId },
    /// Distribution descriptor: the result of a partition query.
    DistInfo {
        team: TeamId,
        global_shape: Vec<DimExtent>,
    },
    /// Annotated tensor value (local or distributed).
    Tensor(TensorType),
    /// Raw n-dimensional array, stripped of all annotations.
    Array { dtype: DType, rank: usize },
}

impl ValueKind {
    /// Short kind name for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            ValueKind::Scalar => "scalar",
            ValueKind::Shape { .. } => "shape",
            ValueKind::Team { .. } => "team",
            ValueKind::DistInfo { .. } => "distinfo",
            ValueKind::Tensor(t) => {
                if t.is_distributed() {
                    "tensor<dist>"
                } else {
                    "tensor"
                }
            }
            ValueKind::Array { .. } => "array",
        }
    }

    pub fn as_tensor(&self) -> Option<&TensorType> {
        match self {
            ValueKind::Tensor(t) => Some(t),
            _ => None,
        }
    }

    /// True for a tensor value carrying the Distributed tag.
    pub fn is_distributed_tensor(&self) -> bool {
        matches!(self, ValueKind::Tensor(t) if t.is_distributed())
    }
}

/// A value slot in the graph: its kind plus an optional debug name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValueInfo {
    pub kind: ValueKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ValueInfo {
    pub fn new(kind: ValueKind) -> Self {
        ValueInfo { kind, name: None }
    }

    pub fn named(kind: ValueKind, name: impl Into<String>) -> Self {
        ValueInfo {
            kind,
            name: Some(name.into()),
        }
    }
}
