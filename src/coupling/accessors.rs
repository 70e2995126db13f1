//! Accessors of coupled quantities.
//!
//! Every accessor takes the coupled name and the component index, and returns a handle to be
//! resolved with [`CoupledFieldResolver::get`] during evaluation.
use crate::ad::AdMode;
use crate::coupling::{
    AdVariableGradient, AdVariableSecond, AdVariableValue, AdVectorVariableGradient, AdVectorVariableValue,
    ArrayVariableGradient, ArrayVariableValue, Coupled, CoupledFieldResolver, CouplingError, Request, VariableGradient,
    VariableSecond, VariableValue, VectorVariableCurl, VectorVariableDivergence, VectorVariableGradient,
    VectorVariableValue, QuantityType, WritableValue,
};
use crate::field::{Family, Quantity, Side, SolutionState};
use crate::Real;

macro_rules! side {
    () => {
        None
    };
    ($side:ident) => {
        Some(Side::$side)
    };
}

macro_rules! is_ad {
    () => {
        false
    };
    ($ad:ident) => {
        true
    };
}

macro_rules! coupled_accessors {
    ($(
        $(#[$attr:meta])*
        $method:ident -> $handle:ty = ($family:ident, $quantity:ident, $state:ident $(, $side:ident)? $(; $ad:ident)?);
    )*) => {
        impl<T: Real> CoupledFieldResolver<T> {
            $(
                $(#[$attr])*
                pub fn $method(&mut self, name: &str, comp: usize) -> Result<$handle, CouplingError> {
                    self.request(Request {
                        name,
                        comp,
                        family: Family::$family,
                        quantity: Quantity::$quantity,
                        state: SolutionState::$state,
                        side: side!($($side)?),
                        ad: is_ad!($($ad)?),
                        accessor: stringify!($method),
                    })
                }
            )*
        }
    };
}

coupled_accessors! {
    /// Values of a coupled scalar variable at the quadrature points (or nodes, for nodal
    /// objects).
    ///
    /// Optional variables that were not supplied resolve to their default value.
    coupled_value -> VariableValue = (Scalar, Value, Current);
    /// Values of the previous time step.
    coupled_value_old -> VariableValue = (Scalar, Value, Old);
    /// Values two time steps back.
    coupled_value_older -> VariableValue = (Scalar, Value, Older);
    /// Values of the previous nonlinear iterate.
    coupled_value_previous_nl -> VariableValue = (Scalar, Value, PreviousNewton);
    coupled_dot -> VariableValue = (Scalar, Dot, Current);
    coupled_dot_dot -> VariableValue = (Scalar, DotDot, Current);
    coupled_dot_old -> VariableValue = (Scalar, Dot, Old);
    coupled_dot_dot_old -> VariableValue = (Scalar, DotDot, Old);
    /// Derivative of the time derivative with respect to the dofs of the variable, which is the
    /// same for every point.
    coupled_dot_du -> VariableValue = (Scalar, DotDu, Current);
    coupled_dot_dot_du -> VariableValue = (Scalar, DotDotDu, Current);
    coupled_gradient -> VariableGradient = (Scalar, Gradient, Current);
    coupled_gradient_old -> VariableGradient = (Scalar, Gradient, Old);
    coupled_gradient_older -> VariableGradient = (Scalar, Gradient, Older);
    coupled_gradient_previous_nl -> VariableGradient = (Scalar, Gradient, PreviousNewton);
    /// Gradient of the time derivative.
    coupled_gradient_dot -> VariableGradient = (Scalar, GradientDot, Current);
    /// Second derivatives. Requesting them makes the registry compute basis Hessians.
    coupled_second -> VariableSecond = (Scalar, Second, Current);
    coupled_second_old -> VariableSecond = (Scalar, Second, Old);
    coupled_second_older -> VariableSecond = (Scalar, Second, Older);
    coupled_second_previous_nl -> VariableSecond = (Scalar, Second, PreviousNewton);
    /// Values at the nodes of the current element. The variable must be nodal.
    coupled_nodal_value -> VariableValue = (Scalar, NodalValue, Current);
    coupled_nodal_value_old -> VariableValue = (Scalar, NodalValue, Old);
    coupled_nodal_value_older -> VariableValue = (Scalar, NodalValue, Older);
    coupled_nodal_value_previous_nl -> VariableValue = (Scalar, NodalValue, PreviousNewton);
    /// The local dof values on the current element.
    coupled_dof_values -> VariableValue = (Scalar, DofValues, Current);
    coupled_dof_values_old -> VariableValue = (Scalar, DofValues, Old);
    coupled_dof_values_older -> VariableValue = (Scalar, DofValues, Older);
    coupled_neighbor_value -> VariableValue = (Scalar, Value, Current, Neighbor);
    coupled_neighbor_value_old -> VariableValue = (Scalar, Value, Old, Neighbor);
    coupled_neighbor_gradient -> VariableGradient = (Scalar, Gradient, Current, Neighbor);

    coupled_vector_value -> VectorVariableValue = (Vector, Value, Current);
    coupled_vector_value_old -> VectorVariableValue = (Vector, Value, Old);
    coupled_vector_value_older -> VectorVariableValue = (Vector, Value, Older);
    coupled_vector_dot -> VectorVariableValue = (Vector, Dot, Current);
    coupled_vector_dot_dot -> VectorVariableValue = (Vector, DotDot, Current);
    /// Gradient of a vector variable, with rows indexing the components.
    coupled_vector_gradient -> VectorVariableGradient = (Vector, Gradient, Current);
    coupled_vector_gradient_old -> VectorVariableGradient = (Vector, Gradient, Old);
    coupled_vector_gradient_older -> VectorVariableGradient = (Vector, Gradient, Older);
    coupled_curl -> VectorVariableCurl = (Vector, Curl, Current);
    coupled_curl_old -> VectorVariableCurl = (Vector, Curl, Old);
    coupled_div -> VectorVariableDivergence = (Vector, Divergence, Current);
    coupled_div_old -> VectorVariableDivergence = (Vector, Divergence, Old);
    coupled_vector_nodal_value -> VectorVariableValue = (Vector, NodalValue, Current);

    coupled_array_value -> ArrayVariableValue = (Array, Value, Current);
    coupled_array_value_old -> ArrayVariableValue = (Array, Value, Old);
    coupled_array_value_older -> ArrayVariableValue = (Array, Value, Older);
    coupled_array_gradient -> ArrayVariableGradient = (Array, Gradient, Current);
    coupled_array_gradient_old -> ArrayVariableGradient = (Array, Gradient, Old);
    coupled_array_gradient_older -> ArrayVariableGradient = (Array, Gradient, Older);
    coupled_array_dot -> ArrayVariableValue = (Array, Dot, Current);
    coupled_array_dof_values -> VariableValue = (Array, DofValues, Current);

    /// Values carrying derivatives with respect to the dofs of nonlinear variables.
    ad_coupled_value -> AdVariableValue = (Scalar, Value, Current; ad);
    ad_coupled_gradient -> AdVariableGradient = (Scalar, Gradient, Current; ad);
    ad_coupled_second -> AdVariableSecond = (Scalar, Second, Current; ad);
    ad_coupled_dot -> AdVariableValue = (Scalar, Dot, Current; ad);
    ad_coupled_dot_dot -> AdVariableValue = (Scalar, DotDot, Current; ad);
    ad_coupled_nodal_value -> AdVariableValue = (Scalar, NodalValue, Current; ad);
    ad_coupled_neighbor_value -> AdVariableValue = (Scalar, Value, Current, Neighbor; ad);
    ad_coupled_vector_value -> AdVectorVariableValue = (Vector, Value, Current; ad);
    ad_coupled_vector_gradient -> AdVectorVariableGradient = (Vector, Gradient, Current; ad);
    ad_coupled_vector_dot -> AdVectorVariableValue = (Vector, Dot, Current; ad);
}

impl<T: Real> CoupledFieldResolver<T> {
    fn generic<M: AdMode, Q: QuantityType>(
        &mut self,
        name: &str,
        comp: usize,
        family: Family,
        quantity: Quantity,
        accessor: &'static str,
    ) -> Result<Coupled<Q>, CouplingError> {
        self.request(Request {
            name,
            comp,
            family,
            quantity,
            state: SolutionState::Current,
            side: None,
            ad: M::IS_AD,
            accessor,
        })
    }

    /// Values of a coupled scalar variable, with or without derivatives depending on `M`.
    pub fn coupled_generic_value<M: AdMode>(&mut self, name: &str, comp: usize) -> Result<Coupled<M::Scalars>, CouplingError> {
        self.generic::<M, _>(name, comp, Family::Scalar, Quantity::Value, "coupled_generic_value")
    }

    pub fn coupled_generic_gradient<M: AdMode>(
        &mut self,
        name: &str,
        comp: usize,
    ) -> Result<Coupled<M::Vectors>, CouplingError> {
        self.generic::<M, _>(name, comp, Family::Scalar, Quantity::Gradient, "coupled_generic_gradient")
    }

    pub fn coupled_generic_dot<M: AdMode>(&mut self, name: &str, comp: usize) -> Result<Coupled<M::Scalars>, CouplingError> {
        self.generic::<M, _>(name, comp, Family::Scalar, Quantity::Dot, "coupled_generic_dot")
    }

    pub fn coupled_generic_vector_value<M: AdMode>(
        &mut self,
        name: &str,
        comp: usize,
    ) -> Result<Coupled<M::Vectors>, CouplingError> {
        self.generic::<M, _>(name, comp, Family::Vector, Quantity::Value, "coupled_generic_vector_value")
    }

    /// Write access to a coupled auxiliary variable together with a handle to its current
    /// value.
    pub fn writable_coupled_value(&mut self, name: &str, comp: usize) -> Result<WritableValue, CouplingError> {
        let field = self.writable_variable(name, comp)?;
        let value = self.coupled_value(name, comp)?;
        Ok(WritableValue { field, value })
    }
}
