//! Tagged vector and matrix contributions of coupled variables.
use crate::coupling::{
    ArrayVariableValue, Coupled, CoupledFieldResolver, CouplingError, QuantityType, Request, TagRef, VariableGradient,
    VariableValue,
};
use crate::field::{Family, Quantity, SolutionState, TagId};
use crate::Real;
use log::debug;

impl<T: Real> CoupledFieldResolver<T> {
    fn vector_tag_id(&self, tag: TagRef) -> Result<TagId, CouplingError> {
        let tags = self.registry.tags();
        let id = match tag {
            TagRef::Id(id) => tags.vector_tag(id).map(|tag| tag.id),
            TagRef::Name(name) => tags.vector_tag_id(name),
        };
        id.ok_or_else(|| CouplingError::UnknownTag {
            object: self.options.object_name.clone(),
            tag: format!("{}", tag),
        })
    }

    fn matrix_tag_id(&self, tag: TagRef) -> Result<TagId, CouplingError> {
        let tags = self.registry.tags();
        let id = match tag {
            TagRef::Id(id) => tags.matrix_tag_name(id).map(|_| id),
            TagRef::Name(name) => tags.matrix_tag_id(name),
        };
        id.ok_or_else(|| CouplingError::UnknownTag {
            object: self.options.object_name.clone(),
            tag: format!("{}", tag),
        })
    }

    fn require_coupled(&self, name: &str, accessor: &str) -> Result<(), CouplingError> {
        let declared = self.declared_name(name)?;
        if self.entries[&declared].is_coupled() {
            Ok(())
        } else {
            Err(CouplingError::InvalidCoupling {
                object: self.options.object_name.clone(),
                name: declared,
                reason: format!("'{}' requires a coupled variable", accessor),
            })
        }
    }

    /// Requires the solution state represented by a vector tag to be retained for the coupled
    /// variable. Tags that do not represent solution states are ignored.
    ///
    /// Must be called before the retained states are finalized.
    pub fn request_states<'a>(
        &mut self,
        name: &str,
        tag: impl Into<TagRef<'a>>,
        comp: usize,
    ) -> Result<(), CouplingError> {
        let id = self.vector_tag_id(tag.into())?;
        let state = match self.registry.tags().solution_state(id) {
            Some(state) => state,
            None => return Ok(()),
        };
        self.require_coupled(name, "request_states")?;
        let declared = self.declared_name(name)?;
        let binding = self.resolve_binding(&declared, comp)?;
        self.request_state(&declared, binding.kind, state)?;
        if state != SolutionState::Current {
            debug!(
                "'{}': retaining {:?} state for variable '{}'",
                self.options.object_name, state, binding.name
            );
        }
        Ok(())
    }

    fn tagged<'a, Q: QuantityType>(
        &mut self,
        name: &str,
        tag: TagRef<'a>,
        comp: usize,
        family: Family,
        quantity: fn(TagId) -> Quantity,
        accessor: &'static str,
    ) -> Result<Coupled<Q>, CouplingError> {
        let id = self.vector_tag_id(tag)?;
        self.require_coupled(name, accessor)?;
        if self.registry.tags().solution_state(id).is_some() {
            self.request_states(name, TagRef::Id(id), comp)?;
        }
        let handle = self.request(Request {
            name,
            comp,
            family,
            quantity: quantity(id),
            state: SolutionState::Current,
            side: None,
            ad: false,
            accessor,
        })?;
        self.vector_tags.insert(id);
        Ok(handle)
    }

    /// Values of the variable interpolated from a tagged vector.
    pub fn coupled_vector_tag_value<'a>(
        &mut self,
        name: &str,
        tag: impl Into<TagRef<'a>>,
        comp: usize,
    ) -> Result<VariableValue, CouplingError> {
        self.tagged(
            name,
            tag.into(),
            comp,
            Family::Scalar,
            Quantity::VectorTag,
            "coupled_vector_tag_value",
        )
    }

    pub fn coupled_vector_tag_array_value<'a>(
        &mut self,
        name: &str,
        tag: impl Into<TagRef<'a>>,
        comp: usize,
    ) -> Result<ArrayVariableValue, CouplingError> {
        self.tagged(
            name,
            tag.into(),
            comp,
            Family::Array,
            Quantity::VectorTag,
            "coupled_vector_tag_array_value",
        )
    }

    pub fn coupled_vector_tag_gradient<'a>(
        &mut self,
        name: &str,
        tag: impl Into<TagRef<'a>>,
        comp: usize,
    ) -> Result<VariableGradient, CouplingError> {
        self.tagged(
            name,
            tag.into(),
            comp,
            Family::Scalar,
            Quantity::VectorTagGradient,
            "coupled_vector_tag_gradient",
        )
    }

    /// Local dof values of the variable in a tagged vector.
    pub fn coupled_vector_tag_dof_value<'a>(
        &mut self,
        name: &str,
        tag: impl Into<TagRef<'a>>,
        comp: usize,
    ) -> Result<VariableValue, CouplingError> {
        self.tagged(
            name,
            tag.into(),
            comp,
            Family::Scalar,
            Quantity::VectorTagDofValues,
            "coupled_vector_tag_dof_value",
        )
    }

    /// Diagonal entries of a tagged matrix at the dofs of the variable, interpolated like
    /// values.
    pub fn coupled_matrix_tag_value<'a>(
        &mut self,
        name: &str,
        tag: impl Into<TagRef<'a>>,
        comp: usize,
    ) -> Result<VariableValue, CouplingError> {
        let id = self.matrix_tag_id(tag.into())?;
        self.require_coupled(name, "coupled_matrix_tag_value")?;
        let handle = self.request(Request {
            name,
            comp,
            family: Family::Scalar,
            quantity: Quantity::MatrixTag(id),
            state: SolutionState::Current,
            side: None,
            ad: false,
            accessor: "coupled_matrix_tag_value",
        })?;
        self.matrix_tags.insert(id);
        Ok(handle)
    }
}
