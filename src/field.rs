//! Field variables and the per-thread storage of their derived quantities.
//!
//! The [`FieldRegistry`] describes the variables of a problem and collects, during setup, which
//! derived quantities each worker slot needs. Each worker slot owns a [`ThreadStorage`] that
//! recomputes those quantities for every visited element (a *pass*), reusing its allocations.
use crate::ad::DualNumber;
use nalgebra::{DMatrix, DVector, Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::fmt::Display;

mod compute;
pub mod registry;
pub mod storage;
pub mod tags;

pub use registry::{FieldRegistry, RegistrySettings, VariableDescription, WritableClaim};
pub use storage::{reinit_threads, ElementContext, LocalField, ShapeFunctions, SolutionVectors, ThreadStorage};
pub use tags::{TagRegistry, VectorTag, VectorTagKind};

pub type VariableId = usize;
pub type SubdomainId = u16;
pub type ThreadId = usize;
pub type TagId = usize;
/// Identifies an object holding setup-time claims on the registry.
pub type OwnerId = usize;

/// The closed set of field variable kinds.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FieldKind {
    /// Scalar finite element field.
    Standard,
    /// Finite element field with three components per point.
    Vector,
    /// Finite element field with a fixed number of scalar components per point.
    Array,
    /// Cell-centered finite volume field.
    FiniteVolume,
    /// Finite volume field of the linear finite volume discretization.
    LinearFiniteVolume,
}

/// The accessor families of the coupling interface.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Family {
    Scalar,
    Vector,
    Array,
}

impl Family {
    /// Prefix of the accessors that serve this family.
    pub fn accessors(&self) -> &'static str {
        match self {
            Family::Scalar => "coupled_*",
            Family::Vector => "coupled_vector_*",
            Family::Array => "coupled_array_*",
        }
    }
}

impl FieldKind {
    pub fn family(&self) -> Family {
        match self {
            FieldKind::Standard | FieldKind::FiniteVolume | FieldKind::LinearFiniteVolume => Family::Scalar,
            FieldKind::Vector => Family::Vector,
            FieldKind::Array => Family::Array,
        }
    }

    /// The number of old solution states retained for fields of this kind.
    pub fn max_history(&self) -> usize {
        match self {
            FieldKind::LinearFiniteVolume => 1,
            _ => 2,
        }
    }

    pub fn is_finite_volume(&self) -> bool {
        matches!(self, FieldKind::FiniteVolume | FieldKind::LinearFiniteVolume)
    }
}

impl Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldKind::Standard => "standard",
            FieldKind::Vector => "vector",
            FieldKind::Array => "array",
            FieldKind::FiniteVolume => "finite volume",
            FieldKind::LinearFiniteVolume => "linear finite volume",
        };
        write!(f, "{}", name)
    }
}

/// The system a variable belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SystemKind {
    /// Variables solved for by the nonlinear solver.
    Nonlinear,
    /// Variables computed explicitly from other quantities.
    Auxiliary,
}

/// A field variable registered with a [`FieldRegistry`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldVariable {
    pub id: VariableId,
    pub name: String,
    pub kind: FieldKind,
    pub system: SystemKind,
    /// The number of the variable within its system.
    pub number: u32,
    /// Number of scalar components per point: 3 for vector fields, the array size for array
    /// fields and 1 otherwise.
    pub components: usize,
    /// Whether the degrees of freedom of the variable live on nodes.
    pub nodal: bool,
    /// Subdomains the variable is defined on. `None` means every subdomain.
    pub blocks: Option<BTreeSet<SubdomainId>>,
}

impl FieldVariable {
    pub fn has_blocks(&self, subdomain: SubdomainId) -> bool {
        self.blocks
            .as_ref()
            .map_or(true, |blocks| blocks.contains(&subdomain))
    }

    /// Whether the variable is defined on every subdomain of the given restriction.
    pub fn covers(&self, blocks: Option<&BTreeSet<SubdomainId>>) -> bool {
        match (&self.blocks, blocks) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(own), Some(other)) => other.is_subset(own),
        }
    }
}

/// A retained state of the solution.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SolutionState {
    Current,
    /// The previous iterate of the nonlinear solver.
    PreviousNewton,
    /// The previous time step.
    Old,
    /// Two time steps back.
    Older,
}

impl SolutionState {
    /// The number of old time steps that must be retained to provide this state.
    pub fn history_depth(&self) -> usize {
        match self {
            SolutionState::Current | SolutionState::PreviousNewton => 0,
            SolutionState::Old => 1,
            SolutionState::Older => 2,
        }
    }
}

/// A derived quantity of a field variable.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Quantity {
    Value,
    Gradient,
    Second,
    Curl,
    Divergence,
    /// First time derivative.
    Dot,
    /// Second time derivative.
    DotDot,
    /// Derivative of the first time derivative with respect to the degrees of freedom.
    DotDu,
    /// Derivative of the second time derivative with respect to the degrees of freedom.
    DotDotDu,
    /// The local degree of freedom values.
    DofValues,
    /// Values at the nodes of the current element.
    NodalValue,
    /// Gradient of the first time derivative.
    GradientDot,
    VectorTag(TagId),
    VectorTagGradient(TagId),
    VectorTagDofValues(TagId),
    /// Diagonal entries of a tagged matrix, interpolated like values.
    MatrixTag(TagId),
}

impl Quantity {
    /// Whether the quantity is read from the solution at a given state (as opposed to time
    /// derivative vectors or tagged vectors).
    pub fn reads_solution(&self) -> bool {
        matches!(
            self,
            Quantity::Value
                | Quantity::Gradient
                | Quantity::Second
                | Quantity::Curl
                | Quantity::Divergence
                | Quantity::DofValues
                | Quantity::NodalValue
        )
    }

    /// Whether the quantity involves spatial derivatives.
    pub fn is_spatial_derivative(&self) -> bool {
        matches!(
            self,
            Quantity::Gradient
                | Quantity::Second
                | Quantity::Curl
                | Quantity::Divergence
                | Quantity::GradientDot
                | Quantity::VectorTagGradient(_)
        )
    }

    pub fn is_time_derivative(&self) -> bool {
        matches!(
            self,
            Quantity::Dot | Quantity::DotDot | Quantity::DotDu | Quantity::DotDotDu | Quantity::GradientDot
        )
    }
}

/// Which element of the current visit a quantity is evaluated on.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Side {
    Element,
    Neighbor,
}

/// Identifies a derived quantity in the per-thread storage.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QuantityKey {
    pub variable: VariableId,
    pub quantity: Quantity,
    pub state: SolutionState,
    pub side: Side,
    /// Evaluated at the nodes (dof values) rather than at quadrature points.
    pub nodal: bool,
    pub ad: bool,
}

/// The per-point value type of a derived quantity.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Shape {
    Scalars,
    Vectors,
    Tensors,
    Arrays,
    ArrayGradients,
    AdScalars,
    AdVectors,
    AdTensors,
}

impl Shape {
    /// The shape of a quantity of a variable of the given kind, or `None` if variables of that
    /// kind do not provide the quantity.
    pub fn of(kind: FieldKind, quantity: Quantity, ad: bool) -> Option<Shape> {
        use Quantity::*;
        use Shape::*;
        let plain = match kind.family() {
            Family::Scalar => match quantity {
                Value | Dot | DotDot | DotDu | DotDotDu | DofValues | NodalValue | VectorTag(_)
                | VectorTagDofValues(_) | MatrixTag(_) => Scalars,
                Gradient | GradientDot | VectorTagGradient(_) => Vectors,
                Second => Tensors,
                Curl | Divergence => return None,
            },
            Family::Vector => match quantity {
                Value | Dot | DotDot | Curl | NodalValue | VectorTag(_) => Vectors,
                Gradient | VectorTagGradient(_) => Tensors,
                Divergence | DofValues | DotDu | DotDotDu | VectorTagDofValues(_) => Scalars,
                Second | GradientDot | MatrixTag(_) => return None,
            },
            Family::Array => match quantity {
                Value | Dot | DotDot | NodalValue | VectorTag(_) => Arrays,
                Gradient | VectorTagGradient(_) => ArrayGradients,
                DofValues | DotDu | DotDotDu | VectorTagDofValues(_) => Scalars,
                Second | Curl | Divergence | GradientDot | MatrixTag(_) => return None,
            },
        };
        if !ad {
            return Some(plain);
        }
        match (quantity, plain) {
            (Value | Gradient | Second | Dot | DotDot | NodalValue, Scalars) => Some(AdScalars),
            (Value | Gradient | Dot | DotDot | NodalValue, Vectors) => Some(AdVectors),
            (Value | Gradient | Second, Tensors) => Some(AdTensors),
            _ => None,
        }
    }
}

/// Storage of one derived quantity: one entry per quadrature point (or node/dof).
#[derive(Debug, Clone, PartialEq)]
pub enum QuantityData<T: nalgebra::Scalar> {
    Scalars(Vec<T>),
    Vectors(Vec<Vector3<T>>),
    Tensors(Vec<Matrix3<T>>),
    Arrays(Vec<DVector<T>>),
    ArrayGradients(Vec<DMatrix<T>>),
    AdScalars(Vec<DualNumber<T>>),
    AdVectors(Vec<Vector3<DualNumber<T>>>),
    AdTensors(Vec<Matrix3<DualNumber<T>>>),
}

impl<T: nalgebra::Scalar> QuantityData<T> {
    pub fn empty(shape: Shape) -> Self {
        match shape {
            Shape::Scalars => Self::Scalars(Vec::new()),
            Shape::Vectors => Self::Vectors(Vec::new()),
            Shape::Tensors => Self::Tensors(Vec::new()),
            Shape::Arrays => Self::Arrays(Vec::new()),
            Shape::ArrayGradients => Self::ArrayGradients(Vec::new()),
            Shape::AdScalars => Self::AdScalars(Vec::new()),
            Shape::AdVectors => Self::AdVectors(Vec::new()),
            Shape::AdTensors => Self::AdTensors(Vec::new()),
        }
    }

    pub fn shape(&self) -> Shape {
        match self {
            Self::Scalars(_) => Shape::Scalars,
            Self::Vectors(_) => Shape::Vectors,
            Self::Tensors(_) => Shape::Tensors,
            Self::Arrays(_) => Shape::Arrays,
            Self::ArrayGradients(_) => Shape::ArrayGradients,
            Self::AdScalars(_) => Shape::AdScalars,
            Self::AdVectors(_) => Shape::AdVectors,
            Self::AdTensors(_) => Shape::AdTensors,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Scalars(v) => v.len(),
            Self::Vectors(v) => v.len(),
            Self::Tensors(v) => v.len(),
            Self::Arrays(v) => v.len(),
            Self::ArrayGradients(v) => v.len(),
            Self::AdScalars(v) => v.len(),
            Self::AdVectors(v) => v.len(),
            Self::AdTensors(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
