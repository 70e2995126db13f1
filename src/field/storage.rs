use crate::coupling::WritableField;
use crate::field::compute::{compute_quantity, zero_fill};
use crate::field::registry::FieldRegistry;
use crate::field::{QuantityData, QuantityKey, Shape, Side, SolutionState, SubdomainId, TagId, ThreadId, VariableId};
use crate::Real;
use eyre::{eyre, WrapErr};
use itertools::izip;
use log::debug;
use nalgebra::{DMatrix, DVector, Matrix3, Scalar, Vector3};
use nalgebra_sparse::CsrMatrix;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Basis functions of one element evaluated at its quadrature points.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeFunctions<T: Scalar> {
    /// Basis function values, `phi[(node, q)]`.
    phi: DMatrix<T>,
    /// Basis function gradients, `grad_phi[q * n_nodes + node]`.
    grad_phi: Vec<Vector3<T>>,
    /// Basis function Hessians, same layout as the gradients. Empty if not available.
    second_phi: Vec<Matrix3<T>>,
}

impl<T: Real> ShapeFunctions<T> {
    pub fn new(phi: DMatrix<T>, grad_phi: Vec<Vector3<T>>) -> Self {
        assert_eq!(
            grad_phi.len(),
            phi.nrows() * phi.ncols(),
            "Number of basis gradients must be n_nodes * n_qp"
        );
        Self {
            phi,
            grad_phi,
            second_phi: Vec::new(),
        }
    }

    pub fn with_second_derivatives(mut self, second_phi: Vec<Matrix3<T>>) -> Self {
        assert_eq!(
            second_phi.len(),
            self.grad_phi.len(),
            "Number of basis Hessians must be n_nodes * n_qp"
        );
        self.second_phi = second_phi;
        self
    }

    pub fn n_nodes(&self) -> usize {
        self.phi.nrows()
    }

    pub fn n_qp(&self) -> usize {
        self.phi.ncols()
    }

    pub fn phi(&self, node: usize, q: usize) -> T {
        self.phi[(node, q)]
    }

    pub fn grad_phi(&self, node: usize, q: usize) -> &Vector3<T> {
        &self.grad_phi[q * self.n_nodes() + node]
    }

    pub fn second_phi(&self, node: usize, q: usize) -> Option<&Matrix3<T>> {
        self.second_phi.get(q * self.n_nodes() + node)
    }

    pub fn has_second_derivatives(&self) -> bool {
        !self.second_phi.is_empty()
    }
}

/// The degrees of freedom of one variable on one element.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalField<T: Scalar> {
    /// Global dof indices in component-major order: the dof of component `c` at node `n` is
    /// stored at `c * n_nodes + n`.
    pub dof_indices: Vec<usize>,
    /// Basis functions of the variable. `None` for finite volume variables, which have one
    /// element-wise constant dof per component.
    pub shape: Option<Arc<ShapeFunctions<T>>>,
}

impl<T: Real> LocalField<T> {
    pub fn finite_element(dof_indices: Vec<usize>, shape: Arc<ShapeFunctions<T>>) -> Self {
        Self {
            dof_indices,
            shape: Some(shape),
        }
    }

    pub fn finite_volume(dof_indices: Vec<usize>) -> Self {
        Self {
            dof_indices,
            shape: None,
        }
    }

    pub fn n_nodes(&self) -> usize {
        self.shape.as_ref().map_or(1, |shape| shape.n_nodes())
    }
}

/// The element currently visited by a worker slot.
#[derive(Debug, Clone)]
pub struct ElementContext<T: Scalar> {
    pub subdomain: SubdomainId,
    pub n_qp: usize,
    fields: FxHashMap<VariableId, LocalField<T>>,
}

impl<T: Real> ElementContext<T> {
    pub fn new(subdomain: SubdomainId, n_qp: usize) -> Self {
        Self {
            subdomain,
            n_qp,
            fields: FxHashMap::default(),
        }
    }

    /// Moves the context to another element, keeping allocations.
    pub fn reset(&mut self, subdomain: SubdomainId, n_qp: usize) {
        self.subdomain = subdomain;
        self.n_qp = n_qp;
        self.fields.clear();
    }

    pub fn set_field(&mut self, variable: VariableId, field: LocalField<T>) {
        self.fields.insert(variable, field);
    }

    pub fn field(&self, variable: VariableId) -> Option<&LocalField<T>> {
        self.fields.get(&variable)
    }
}

/// Global solution vectors of all variables.
///
/// Dof indices refer to a single global numbering that covers the variables of both the
/// nonlinear and the auxiliary system.
#[derive(Debug, Clone, PartialEq)]
pub struct SolutionVectors<T: Scalar> {
    pub current: DVector<T>,
    pub old: DVector<T>,
    pub older: DVector<T>,
    pub previous_newton: DVector<T>,
    pub u_dot: DVector<T>,
    pub u_dotdot: DVector<T>,
    pub u_dot_old: DVector<T>,
    pub u_dotdot_old: DVector<T>,
    /// Derivative of the time derivative with respect to the solution, as defined by the time
    /// integration scheme.
    pub du_dot_du: T,
    pub du_dotdot_du: T,
    pub vector_tags: FxHashMap<TagId, DVector<T>>,
    pub matrix_tags: FxHashMap<TagId, CsrMatrix<T>>,
}

impl<T: Real> SolutionVectors<T> {
    pub fn zeros(num_dofs: usize) -> Self {
        let zeros = DVector::zeros(num_dofs);
        Self {
            current: zeros.clone(),
            old: zeros.clone(),
            older: zeros.clone(),
            previous_newton: zeros.clone(),
            u_dot: zeros.clone(),
            u_dotdot: zeros.clone(),
            u_dot_old: zeros.clone(),
            u_dotdot_old: zeros,
            du_dot_du: T::zero(),
            du_dotdot_du: T::zero(),
            vector_tags: FxHashMap::default(),
            matrix_tags: FxHashMap::default(),
        }
    }

    pub fn num_dofs(&self) -> usize {
        self.current.len()
    }

    pub fn state(&self, state: SolutionState) -> &DVector<T> {
        match state {
            SolutionState::Current => &self.current,
            SolutionState::PreviousNewton => &self.previous_newton,
            SolutionState::Old => &self.old,
            SolutionState::Older => &self.older,
        }
    }

    /// Shifts the solution states and time derivatives by one time step.
    pub fn advance_time_step(&mut self) {
        std::mem::swap(&mut self.older, &mut self.old);
        self.old.copy_from(&self.current);
        self.u_dot_old.copy_from(&self.u_dot);
        self.u_dotdot_old.copy_from(&self.u_dotdot);
    }

    pub fn store_previous_newton_iterate(&mut self) {
        self.previous_newton.copy_from(&self.current);
    }

    /// Applies the values written through writable fields of the given storage to the current
    /// solution. Returns the number of applied writes.
    pub fn apply_writes(&mut self, storage: &mut ThreadStorage<T>) -> usize {
        let num_writes = storage.pending_writes.len();
        for (dof, value) in storage.pending_writes.drain(..) {
            self.current[dof] = value;
        }
        num_writes
    }
}

/// The derived quantities of one worker slot.
///
/// The storage holds one entry per quantity requested for its worker slot. [`reinit`](Self::reinit)
/// recomputes all entries for the current element; the results are valid until the next call.
#[derive(Debug)]
pub struct ThreadStorage<T: Scalar> {
    thread: ThreadId,
    pub element: ElementContext<T>,
    pub neighbor: Option<ElementContext<T>>,
    keys: Vec<QuantityKey>,
    data: Vec<QuantityData<T>>,
    scratch: Vec<T>,
    pass: u64,
    pending_writes: Vec<(usize, T)>,
}

impl<T: Real> ThreadStorage<T> {
    pub fn new(thread: ThreadId, element: ElementContext<T>) -> Self {
        Self {
            thread,
            element,
            neighbor: None,
            keys: Vec::new(),
            data: Vec::new(),
            scratch: Vec::new(),
            pass: 0,
            pending_writes: Vec::new(),
        }
    }

    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    /// Number of completed passes.
    pub fn pass(&self) -> u64 {
        self.pass
    }

    pub fn keys(&self) -> &[QuantityKey] {
        &self.keys
    }

    /// # Panics
    ///
    /// Panics if the slot has not been computed by a call to [`reinit`](Self::reinit).
    pub fn quantity(&self, slot: usize) -> &QuantityData<T> {
        self.data.get(slot).unwrap_or_else(|| {
            panic!(
                "Quantity slot {} has not been computed on thread {}. \
                 Storage must be re-initialized after requesting quantities.",
                slot, self.thread
            )
        })
    }

    /// Recomputes every requested quantity for the current element (and neighbor).
    ///
    /// Quantities of variables that are not defined on the subdomain of the element are set
    /// to zero. Quantities on the neighbor side are left empty if no neighbor is set.
    pub fn reinit(&mut self, registry: &FieldRegistry, solution: &SolutionVectors<T>) -> eyre::Result<()> {
        let new_keys = registry.requested_quantities(self.thread, self.keys.len());
        if !new_keys.is_empty() {
            debug!("Thread {}: allocating {} new quantity slots", self.thread, new_keys.len());
        }
        for key in new_keys {
            let variable = registry.variable(key.variable);
            let shape = Shape::of(variable.kind, key.quantity, key.ad).ok_or_else(|| {
                eyre!(
                    "{} variable '{}' does not provide {:?}",
                    variable.kind,
                    variable.name,
                    key.quantity
                )
            })?;
            self.keys.push(key);
            self.data.push(QuantityData::empty(shape));
        }

        for (key, data) in izip!(&self.keys, &mut self.data) {
            let variable = registry.variable(key.variable);
            let context = match key.side {
                Side::Element => &self.element,
                Side::Neighbor => match &self.neighbor {
                    Some(neighbor) => neighbor,
                    None => {
                        zero_fill(data, 0, variable.components);
                        continue;
                    }
                },
            };
            if variable.has_blocks(context.subdomain) {
                compute_quantity(key, variable, context, solution, registry.tags(), &mut self.scratch, data)
                    .wrap_err_with(|| {
                        format!(
                            "Failed to compute {:?} ({:?}) of variable '{}' on thread {}",
                            key.quantity, key.state, variable.name, self.thread
                        )
                    })?;
            } else {
                zero_fill(data, context.n_qp, variable.components);
            }
        }

        self.pass += 1;
        Ok(())
    }

    /// Buffers a new value for a local dof of a writable variable on the current element.
    ///
    /// # Panics
    ///
    /// Panics if the field belongs to another worker slot, or the variable has no dofs on the
    /// current element.
    pub fn set_dof_value(&mut self, field: &WritableField, local_dof: usize, value: T) {
        assert_eq!(
            field.thread(),
            self.thread,
            "Writable field of thread {} used on thread {}",
            field.thread(),
            self.thread
        );
        let local = self
            .element
            .field(field.variable())
            .unwrap_or_else(|| panic!("Writable variable {} has no dofs on the current element", field.variable()));
        let dof = local.dof_indices[local_dof];
        self.pending_writes.push((dof, value));
    }

    /// Buffers new values for all local dofs of a writable variable on the current element.
    pub fn set_dof_values(&mut self, field: &WritableField, values: &[T]) {
        for (local_dof, &value) in values.iter().enumerate() {
            self.set_dof_value(field, local_dof, value);
        }
    }

    /// Writes that have not yet been applied, as `(global dof, value)` pairs.
    pub fn pending_writes(&self) -> &[(usize, T)] {
        &self.pending_writes
    }
}

/// Re-initializes the storage of all worker slots in parallel.
pub fn reinit_threads<T: Real>(
    storages: &mut [ThreadStorage<T>],
    registry: &FieldRegistry,
    solution: &SolutionVectors<T>,
) -> eyre::Result<()> {
    storages
        .par_iter_mut()
        .map(|storage| storage.reinit(registry, solution))
        .collect()
}
