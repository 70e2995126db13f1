//! Typed handles to coupled quantities.
use crate::ad::DualNumber;
use crate::field::{QuantityData, Shape, TagId, ThreadId, VariableId};
use crate::Real;
use nalgebra::{DMatrix, DVector, Matrix3, Vector3};
use std::fmt;
use std::fmt::Debug;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// The per-point value type of a coupled quantity.
pub trait QuantityType: 'static {
    const SHAPE: Shape;
    type Item<T: Real>;

    /// Extracts the entries from quantity data of the matching shape.
    fn items<T: Real>(data: &QuantityData<T>) -> Option<&[Self::Item<T>]>;
}

macro_rules! quantity_type {
    ($(#[$attr:meta])* $marker:ident => $item:ty) => {
        $(#[$attr])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq)]
        pub struct $marker;

        impl QuantityType for $marker {
            const SHAPE: Shape = Shape::$marker;
            type Item<T: Real> = $item;

            fn items<T: Real>(data: &QuantityData<T>) -> Option<&[Self::Item<T>]> {
                match data {
                    QuantityData::$marker(items) => Some(items.as_slice()),
                    _ => None,
                }
            }
        }
    };
}

quantity_type!(
    /// One scalar per point.
    Scalars => T);
quantity_type!(
    /// One 3D vector per point, e.g. gradients of scalar fields or values of vector fields.
    Vectors => Vector3<T>);
quantity_type!(
    /// One 3x3 matrix per point, e.g. second derivatives of scalar fields or gradients of
    /// vector fields.
    Tensors => Matrix3<T>);
quantity_type!(
    /// One vector of array components per point.
    Arrays => DVector<T>);
quantity_type!(
    /// One `components x 3` matrix per point.
    ArrayGradients => DMatrix<T>);
quantity_type!(AdScalars => DualNumber<T>);
quantity_type!(AdVectors => Vector3<DualNumber<T>>);
quantity_type!(AdTensors => Matrix3<DualNumber<T>>);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Source {
    /// A slot of the per-thread storage.
    Live(usize),
    /// An entry of the resolver's default values.
    Default(usize),
}

/// Handle to a coupled quantity, valid for the worker slot it was requested for.
///
/// The handle is resolved into data with
/// [`CoupledFieldResolver::get`](crate::coupling::CoupledFieldResolver::get). The returned slice
/// borrows the per-thread storage and is therefore only valid until the storage is
/// re-initialized for the next pass.
pub struct Coupled<Q> {
    thread: ThreadId,
    pub(crate) source: Source,
    marker: PhantomData<fn() -> Q>,
}

impl<Q> Coupled<Q> {
    pub(crate) fn new(thread: ThreadId, source: Source) -> Self {
        Self {
            thread,
            source,
            marker: PhantomData,
        }
    }

    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    /// Whether the handle refers to a default value of an optional variable that was not
    /// supplied.
    pub fn is_default(&self) -> bool {
        matches!(self.source, Source::Default(_))
    }
}

impl<Q> Clone for Coupled<Q> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Q> Copy for Coupled<Q> {}

impl<Q> PartialEq for Coupled<Q> {
    fn eq(&self, other: &Self) -> bool {
        self.thread == other.thread && self.source == other.source
    }
}

impl<Q> Eq for Coupled<Q> {}

impl<Q> Hash for Coupled<Q> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.thread.hash(state);
        self.source.hash(state);
    }
}

impl<Q> Debug for Coupled<Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coupled")
            .field("thread", &self.thread)
            .field("source", &self.source)
            .finish()
    }
}

pub type VariableValue = Coupled<Scalars>;
pub type VariableGradient = Coupled<Vectors>;
pub type VariableSecond = Coupled<Tensors>;
pub type VectorVariableValue = Coupled<Vectors>;
pub type VectorVariableGradient = Coupled<Tensors>;
pub type VectorVariableCurl = Coupled<Vectors>;
pub type VectorVariableDivergence = Coupled<Scalars>;
pub type ArrayVariableValue = Coupled<Arrays>;
pub type ArrayVariableGradient = Coupled<ArrayGradients>;
pub type AdVariableValue = Coupled<AdScalars>;
pub type AdVariableGradient = Coupled<AdVectors>;
pub type AdVariableSecond = Coupled<AdTensors>;
pub type AdVectorVariableValue = Coupled<AdVectors>;
pub type AdVectorVariableGradient = Coupled<AdTensors>;

/// Exclusive write access to a variable on one worker slot.
///
/// Obtained through
/// [`CoupledFieldResolver::writable_variable`](crate::coupling::CoupledFieldResolver::writable_variable),
/// which guarantees that no other object on the same worker slot writes to the variable on a
/// shared subdomain.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct WritableField {
    thread: ThreadId,
    variable: VariableId,
}

impl WritableField {
    pub(crate) fn new(thread: ThreadId, variable: VariableId) -> Self {
        Self { thread, variable }
    }

    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    pub fn variable(&self) -> VariableId {
        self.variable
    }
}

/// A writable variable together with a handle to its current value.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct WritableValue {
    pub field: WritableField,
    pub value: VariableValue,
}

/// Refers to a tag by id or by (case-insensitive) name.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TagRef<'a> {
    Id(TagId),
    Name(&'a str),
}

impl From<TagId> for TagRef<'_> {
    fn from(id: TagId) -> Self {
        TagRef::Id(id)
    }
}

impl<'a> From<&'a str> for TagRef<'a> {
    fn from(name: &'a str) -> Self {
        TagRef::Name(name)
    }
}

impl fmt::Display for TagRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagRef::Id(id) => write!(f, "{}", id),
            TagRef::Name(name) => write!(f, "'{}'", name),
        }
    }
}
