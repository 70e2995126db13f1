//! Forward-mode automatic differentiation with sparse derivative vectors.
//!
//! Quantities requested with automatic differentiation carry, in addition to their value, the
//! derivatives with respect to the global degrees of freedom of the nonlinear system that they
//! depend on. Only the handful of degrees of freedom of one element contribute to an
//! interpolated quantity, so derivatives are stored sparsely.
use crate::coupling::{AdScalars, AdTensors, AdVectors, QuantityType, Scalars, Tensors, Vectors};
use crate::Real;
use num::Zero;
use std::ops::{Add, AddAssign, Mul, Neg, Sub};

/// A value together with its sparse derivatives with respect to global degrees of freedom.
///
/// The derivatives are stored as `(dof, derivative)` pairs sorted by dof index, without
/// duplicates.
#[derive(Debug, Clone, PartialEq)]
pub struct DualNumber<T> {
    value: T,
    derivatives: Vec<(usize, T)>,
}

impl<T: Real> DualNumber<T> {
    /// A number without any derivatives.
    pub fn constant(value: T) -> Self {
        Self {
            value,
            derivatives: Vec::new(),
        }
    }

    /// An independent variable, i.e. a number whose derivative with respect to `dof` is one.
    pub fn variable(value: T, dof: usize) -> Self {
        Self {
            value,
            derivatives: vec![(dof, T::one())],
        }
    }

    /// Constructs a number from unordered derivative entries. Duplicate entries are summed.
    pub fn from_derivatives(value: T, derivatives: impl IntoIterator<Item = (usize, T)>) -> Self {
        let mut result = Self::constant(value);
        for (dof, derivative) in derivatives {
            result.add_derivative(dof, derivative);
        }
        result
    }

    pub fn value(&self) -> T {
        self.value
    }

    pub fn derivatives(&self) -> &[(usize, T)] {
        &self.derivatives
    }

    /// The derivative with respect to the given dof (zero if it does not depend on it).
    pub fn derivative(&self, dof: usize) -> T {
        self.derivatives
            .binary_search_by_key(&dof, |&(d, _)| d)
            .map(|idx| self.derivatives[idx].1)
            .unwrap_or_else(|_| T::zero())
    }

    /// Adds `derivative` to the derivative with respect to `dof`.
    pub fn add_derivative(&mut self, dof: usize, derivative: T) {
        match self
            .derivatives
            .binary_search_by_key(&dof, |&(d, _)| d)
        {
            Ok(idx) => self.derivatives[idx].1 += derivative,
            Err(idx) => self.derivatives.insert(idx, (dof, derivative)),
        }
    }

    /// Sets the value and removes all derivatives, keeping the allocation.
    pub fn reset(&mut self, value: T) {
        self.value = value;
        self.derivatives.clear();
    }

    pub fn scale(mut self, factor: T) -> Self {
        self.value *= factor;
        for (_, d) in &mut self.derivatives {
            *d *= factor;
        }
        self
    }

    fn merge(mut self, other: &Self, sign: T) -> Self {
        self.value += sign * other.value;
        for &(dof, d) in &other.derivatives {
            self.add_derivative(dof, sign * d);
        }
        self
    }
}

impl<T: Real> Default for DualNumber<T> {
    fn default() -> Self {
        Self::constant(T::zero())
    }
}

impl<T: Real> Add for DualNumber<T> {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        self.merge(&rhs, T::one())
    }
}

impl<T: Real> AddAssign for DualNumber<T> {
    fn add_assign(&mut self, rhs: Self) {
        let lhs = std::mem::take(self);
        *self = lhs.merge(&rhs, T::one());
    }
}

impl<T: Real> Sub for DualNumber<T> {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        self.merge(&rhs, -T::one())
    }
}

impl<T: Real> Neg for DualNumber<T> {
    type Output = Self;

    fn neg(self) -> Self {
        self.scale(-T::one())
    }
}

impl<T: Real> Mul for DualNumber<T> {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        // (a + a') (b + b') = ab + a'b + ab'
        let a = self.value;
        let b = rhs.value;
        let mut product = self.scale(b);
        product.value = a * b;
        for &(dof, d) in &rhs.derivatives {
            product.add_derivative(dof, a * d);
        }
        product
    }
}

impl<T: Real> Mul<T> for DualNumber<T> {
    type Output = Self;

    fn mul(self, rhs: T) -> Self {
        self.scale(rhs)
    }
}

impl<T: Real> Zero for DualNumber<T> {
    fn zero() -> Self {
        Self::constant(T::zero())
    }

    fn is_zero(&self) -> bool {
        self.value.is_zero() && self.derivatives.iter().all(|(_, d)| d.is_zero())
    }
}

/// Selects whether generic accessors produce plain values or values with derivatives.
///
/// Generic code written against an `AdMode` is instantiated once for [`NoAd`] and once for
/// [`WithAd`], instead of duplicating every accessor by hand.
pub trait AdMode: 'static {
    const IS_AD: bool;
    type Scalars: QuantityType;
    type Vectors: QuantityType;
    type Tensors: QuantityType;
}

/// Plain values without derivative tracking.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct NoAd;

/// Values carrying derivatives with respect to the nonlinear degrees of freedom.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct WithAd;

impl AdMode for NoAd {
    const IS_AD: bool = false;
    type Scalars = Scalars;
    type Vectors = Vectors;
    type Tensors = Tensors;
}

impl AdMode for WithAd {
    const IS_AD: bool = true;
    type Scalars = AdScalars;
    type Vectors = AdVectors;
    type Tensors = AdTensors;
}
