//! Interpolation of derived quantities from local degrees of freedom.
use crate::ad::DualNumber;
use crate::field::storage::{ElementContext, ShapeFunctions, SolutionVectors};
use crate::field::tags::TagRegistry;
use crate::field::{Family, FieldVariable, Quantity, QuantityData, QuantityKey, SolutionState, SystemKind};
use crate::Real;
use eyre::{bail, eyre};
use nalgebra::{DMatrix, DVector, Matrix3, Vector3};

#[derive(Debug, Copy, Clone)]
enum Basis<'a, T: Real> {
    FiniteElement(&'a ShapeFunctions<T>),
    /// One element-wise constant dof per component.
    Constant,
}

impl<'a, T: Real> Basis<'a, T> {
    fn n_nodes(&self) -> usize {
        match self {
            Basis::FiniteElement(shape) => shape.n_nodes(),
            Basis::Constant => 1,
        }
    }

    fn phi(&self, node: usize, q: usize) -> T {
        match self {
            Basis::FiniteElement(shape) => shape.phi(node, q),
            Basis::Constant => T::one(),
        }
    }

    fn grad(&self, node: usize, q: usize) -> Vector3<T> {
        match self {
            Basis::FiniteElement(shape) => *shape.grad_phi(node, q),
            Basis::Constant => Vector3::zeros(),
        }
    }

    fn second(&self, node: usize, q: usize) -> Matrix3<T> {
        match self {
            Basis::FiniteElement(shape) => shape
                .second_phi(node, q)
                .copied()
                .unwrap_or_else(Matrix3::zeros),
            Basis::Constant => Matrix3::zeros(),
        }
    }
}

/// Local dof values of one variable together with its basis.
struct Interpolation<'a, T: Real> {
    basis: Basis<'a, T>,
    local: &'a [T],
    dofs: &'a [usize],
    n: usize,
    /// Scale of the derivatives with respect to the local dofs, if derivatives are tracked.
    seed: Option<T>,
}

impl<'a, T: Real> Interpolation<'a, T> {
    fn nodal(&self, c: usize, node: usize) -> T {
        self.local[c * self.n + node]
    }

    fn value(&self, c: usize, q: usize) -> T {
        (0..self.n).fold(T::zero(), |acc, node| acc + self.basis.phi(node, q) * self.nodal(c, node))
    }

    fn gradient(&self, c: usize, q: usize) -> Vector3<T> {
        (0..self.n).fold(Vector3::zeros(), |acc, node| acc + self.basis.grad(node, q) * self.nodal(c, node))
    }

    fn second(&self, c: usize, q: usize) -> Matrix3<T> {
        (0..self.n).fold(Matrix3::zeros(), |acc, node| acc + self.basis.second(node, q) * self.nodal(c, node))
    }

    /// Rows are components, columns are spatial directions.
    fn vector_gradient(&self, q: usize) -> Matrix3<T> {
        Matrix3::from_rows(&[
            self.gradient(0, q).transpose(),
            self.gradient(1, q).transpose(),
            self.gradient(2, q).transpose(),
        ])
    }

    fn seeded(&self, value: T, c: usize, weight: impl Fn(usize) -> T) -> DualNumber<T> {
        let mut result = DualNumber::constant(value);
        if let Some(seed) = self.seed {
            for node in 0..self.n {
                result.add_derivative(self.dofs[c * self.n + node], seed * weight(node));
            }
        }
        result
    }

    fn ad_nodal(&self, c: usize, node: usize) -> DualNumber<T> {
        let mut result = DualNumber::constant(self.nodal(c, node));
        if let Some(seed) = self.seed {
            result.add_derivative(self.dofs[c * self.n + node], seed);
        }
        result
    }

    fn ad_value(&self, c: usize, q: usize) -> DualNumber<T> {
        self.seeded(self.value(c, q), c, |node| self.basis.phi(node, q))
    }

    fn ad_gradient(&self, c: usize, q: usize) -> Vector3<DualNumber<T>> {
        let gradient = self.gradient(c, q);
        Vector3::from_fn(|d, _| self.seeded(gradient[d], c, |node| self.basis.grad(node, q)[d]))
    }

    fn ad_second(&self, c: usize, q: usize) -> Matrix3<DualNumber<T>> {
        let second = self.second(c, q);
        Matrix3::from_fn(|i, j| self.seeded(second[(i, j)], c, |node| self.basis.second(node, q)[(i, j)]))
    }
}

fn curl<T: Real>(g: &Matrix3<T>) -> Vector3<T> {
    Vector3::new(g[(2, 1)] - g[(1, 2)], g[(0, 2)] - g[(2, 0)], g[(1, 0)] - g[(0, 1)])
}

/// Replaces the contents of `values` with `len` new entries, keeping the allocation.
fn refill<V>(values: &mut Vec<V>, len: usize, mut entry: impl FnMut(usize) -> V) {
    values.clear();
    values.extend((0..len).map(&mut entry));
}

/// Sets every entry of the quantity to zero.
pub(crate) fn zero_fill<T: Real>(data: &mut QuantityData<T>, len: usize, components: usize) {
    match data {
        QuantityData::Scalars(v) => refill(v, len, |_| T::zero()),
        QuantityData::Vectors(v) => refill(v, len, |_| Vector3::zeros()),
        QuantityData::Tensors(v) => refill(v, len, |_| Matrix3::zeros()),
        QuantityData::Arrays(v) => {
            v.resize_with(len, || DVector::zeros(components));
            for entry in v {
                entry.resize_vertically_mut(components, T::zero());
                entry.fill(T::zero());
            }
        }
        QuantityData::ArrayGradients(v) => {
            v.resize_with(len, || DMatrix::zeros(components, 3));
            for entry in v {
                entry.resize_mut(components, 3, T::zero());
                entry.fill(T::zero());
            }
        }
        QuantityData::AdScalars(v) => refill(v, len, |_| DualNumber::constant(T::zero())),
        QuantityData::AdVectors(v) => refill(v, len, |_| Vector3::from_element(DualNumber::constant(T::zero()))),
        QuantityData::AdTensors(v) => refill(v, len, |_| Matrix3::from_element(DualNumber::constant(T::zero()))),
    }
}

/// Gathers the local values of the quantity's source into `local`.
fn gather_local<T: Real>(
    key: &QuantityKey,
    dofs: &[usize],
    solution: &SolutionVectors<T>,
    tags: &TagRegistry,
    local: &mut Vec<T>,
) -> eyre::Result<()> {
    local.clear();
    if let Quantity::MatrixTag(tag) = key.quantity {
        let matrix = solution
            .matrix_tags
            .get(&tag)
            .ok_or_else(|| eyre!("No matrix is associated with matrix tag {}", tag))?;
        for &dof in dofs {
            if dof >= matrix.nrows() || dof >= matrix.ncols() {
                bail!("Dof {} is out of bounds for the matrix of tag {}", dof, tag);
            }
            let diagonal = matrix
                .get_entry(dof, dof)
                .map(|entry| entry.into_value())
                .unwrap_or_else(T::zero);
            local.push(diagonal);
        }
        return Ok(());
    }

    let old = key.state == SolutionState::Old;
    let vector = match key.quantity {
        Quantity::Dot | Quantity::GradientDot if old => &solution.u_dot_old,
        Quantity::Dot | Quantity::GradientDot => &solution.u_dot,
        Quantity::DotDot if old => &solution.u_dotdot_old,
        Quantity::DotDot => &solution.u_dotdot,
        Quantity::VectorTag(tag) | Quantity::VectorTagGradient(tag) | Quantity::VectorTagDofValues(tag) => {
            match tags.solution_state(tag) {
                Some(state) => solution.state(state),
                None => solution
                    .vector_tags
                    .get(&tag)
                    .ok_or_else(|| eyre!("No vector is associated with vector tag {}", tag))?,
            }
        }
        _ => solution.state(key.state),
    };
    for &dof in dofs {
        let value = vector
            .get(dof)
            .ok_or_else(|| eyre!("Dof {} is out of bounds for vector of length {}", dof, vector.len()))?;
        local.push(*value);
    }
    Ok(())
}

/// Computes one derived quantity of a variable on the given element.
pub(crate) fn compute_quantity<T: Real>(
    key: &QuantityKey,
    variable: &FieldVariable,
    context: &ElementContext<T>,
    solution: &SolutionVectors<T>,
    tags: &TagRegistry,
    local: &mut Vec<T>,
    out: &mut QuantityData<T>,
) -> eyre::Result<()> {
    let field = context
        .field(key.variable)
        .ok_or_else(|| eyre!("Variable '{}' has no dofs on the current element", variable.name))?;
    let basis = match &field.shape {
        Some(shape) => {
            if shape.n_qp() != context.n_qp {
                bail!(
                    "Basis of variable '{}' has {} quadrature points, element has {}",
                    variable.name,
                    shape.n_qp(),
                    context.n_qp
                );
            }
            if key.quantity == Quantity::Second && !shape.has_second_derivatives() {
                bail!("Second derivatives of the basis of variable '{}' are not available", variable.name);
            }
            Basis::FiniteElement(shape.as_ref())
        }
        None => Basis::Constant,
    };
    let n = basis.n_nodes();
    let components = variable.components;
    if field.dof_indices.len() != n * components {
        bail!(
            "Variable '{}' has {} local dofs, expected {} ({} nodes, {} components)",
            variable.name,
            field.dof_indices.len(),
            n * components,
            n,
            components
        );
    }

    let nodal = key.nodal || key.quantity == Quantity::NodalValue;
    let points = if nodal { n } else { context.n_qp };

    if let Quantity::DotDu | Quantity::DotDotDu = key.quantity {
        let coefficient = match key.quantity {
            Quantity::DotDu => solution.du_dot_du,
            _ => solution.du_dotdot_du,
        };
        match out {
            QuantityData::Scalars(values) => refill(values, points, |_| coefficient),
            _ => bail!("Unexpected storage for {:?}", key.quantity),
        }
        return Ok(());
    }

    gather_local(key, &field.dof_indices, solution, tags, local)?;

    let seed = if key.ad && variable.system == SystemKind::Nonlinear && key.state == SolutionState::Current {
        match key.quantity {
            Quantity::Value | Quantity::Gradient | Quantity::Second | Quantity::NodalValue => Some(T::one()),
            Quantity::Dot => Some(solution.du_dot_du),
            Quantity::DotDot => Some(solution.du_dotdot_du),
            _ => None,
        }
    } else {
        None
    };
    let interp = Interpolation {
        basis,
        local: local.as_slice(),
        dofs: &field.dof_indices,
        n,
        seed,
    };

    let family = variable.kind.family();
    match out {
        QuantityData::Scalars(values) => match key.quantity {
            Quantity::DofValues | Quantity::VectorTagDofValues(_) => {
                values.clear();
                values.extend_from_slice(interp.local);
            }
            Quantity::Divergence => refill(values, points, |q| interp.vector_gradient(q).trace()),
            _ if nodal => refill(values, points, |node| interp.nodal(0, node)),
            _ => refill(values, points, |q| interp.value(0, q)),
        },
        QuantityData::Vectors(values) => match (family, key.quantity) {
            (Family::Scalar, _) => refill(values, points, |q| interp.gradient(0, q)),
            (_, Quantity::Curl) => refill(values, points, |q| curl(&interp.vector_gradient(q))),
            _ if nodal => refill(values, points, |node| {
                Vector3::from_fn(|c, _| interp.nodal(c, node))
            }),
            _ => refill(values, points, |q| Vector3::from_fn(|c, _| interp.value(c, q))),
        },
        QuantityData::Tensors(values) => match family {
            Family::Scalar => refill(values, points, |q| interp.second(0, q)),
            _ => refill(values, points, |q| interp.vector_gradient(q)),
        },
        QuantityData::Arrays(values) => {
            values.resize_with(points, || DVector::zeros(components));
            for (p, entry) in values.iter_mut().enumerate() {
                entry.resize_vertically_mut(components, T::zero());
                for c in 0..components {
                    entry[c] = if nodal { interp.nodal(c, p) } else { interp.value(c, p) };
                }
            }
        }
        QuantityData::ArrayGradients(values) => {
            values.resize_with(points, || DMatrix::zeros(components, 3));
            for (q, entry) in values.iter_mut().enumerate() {
                entry.resize_mut(components, 3, T::zero());
                for c in 0..components {
                    entry.set_row(c, &interp.gradient(c, q).transpose());
                }
            }
        }
        QuantityData::AdScalars(values) => {
            if nodal {
                refill(values, points, |node| interp.ad_nodal(0, node))
            } else {
                refill(values, points, |q| interp.ad_value(0, q))
            }
        }
        QuantityData::AdVectors(values) => match family {
            Family::Scalar => refill(values, points, |q| interp.ad_gradient(0, q)),
            _ if nodal => refill(values, points, |node| {
                Vector3::from_fn(|c, _| interp.ad_nodal(c, node))
            }),
            _ => refill(values, points, |q| Vector3::from_fn(|c, _| interp.ad_value(c, q))),
        },
        QuantityData::AdTensors(values) => match family {
            Family::Scalar => refill(values, points, |q| interp.ad_second(0, q)),
            _ => refill(values, points, |q| {
                let rows = [interp.ad_gradient(0, q), interp.ad_gradient(1, q), interp.ad_gradient(2, q)];
                Matrix3::from_fn(|c, d| rows[c][d].clone())
            }),
        },
    }
    Ok(())
}
