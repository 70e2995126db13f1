//! Resolution of coupled variables and access to their derived quantities.
//!
//! Every object that depends on other field variables owns a [`CoupledFieldResolver`]. At
//! setup, the object requests quantities by the names it declared in its
//! [`CouplingParameters`]; the resolver binds each name to the variable supplied by the user,
//! validates that the request makes sense for that variable, and registers the quantity with
//! the shared [`FieldRegistry`]. The result is a typed [`Coupled`] handle. During evaluation,
//! the handle is resolved against the [`ThreadStorage`] of the object's worker slot, which
//! recomputes every registered quantity once per visited element.
//!
//! Optional variables that were not supplied resolve to cached default values (constants or
//! zeros) of the correct shape, so objects can treat optional coupling uniformly.
use crate::field::{
    Family, FieldKind, FieldRegistry, FieldVariable, OwnerId, Quantity, QuantityKey, Shape, Side, SolutionState,
    SubdomainId, SystemKind, TagId, ThreadId, ThreadStorage, VariableId,
};
use crate::Real;
use log::{debug, warn};
use nalgebra::Scalar;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::sync::Arc;

mod accessors;
mod defaults;
mod handle;
mod params;
mod tags;
mod writable;

pub use handle::*;
pub use params::{CoupledDeclaration, CoupledInput, CouplingParameters};

use crate::field::QuantityData;
use defaults::DefaultKey;
use handle::Source;

/// Returned by [`CoupledFieldResolver::coupled`] for optional variables that were not supplied.
pub const INVALID_VARIABLE_NUMBER: u32 = u32::MAX;

#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CouplingError {
    /// The name is not a declared coupled variable, or cannot be used the way it was.
    InvalidCoupling { object: String, name: String, reason: String },
    /// A supplied variable does not exist.
    UnknownVariable { object: String, name: String },
    /// The name resolved to a variable of another kind than the accessor serves.
    WrongVariableKind {
        object: String,
        name: String,
        kind: FieldKind,
        requested: Family,
    },
    UnsupportedHistoryDepth {
        object: String,
        name: String,
        state: SolutionState,
        reason: String,
    },
    UnsupportedQuantity {
        object: String,
        name: String,
        quantity: Quantity,
        reason: String,
    },
    /// Nodal/elemental mismatch between the object and the variable.
    IncompatibleContinuity { object: String, name: String, reason: String },
    UnknownTag { object: String, tag: String },
    IndexOutOfRange {
        object: String,
        name: String,
        index: usize,
        components: usize,
    },
    /// More old solution states were requested after the number of retained states was fixed.
    InsufficientHistoryConfigured { requested: usize, retained: usize },
    DuplicateWritableClaim {
        object: String,
        variable: String,
        owner: String,
        thread: ThreadId,
    },
    /// The variable cannot be written by the object.
    WritableRestriction { object: String, name: String, reason: String },
    DuplicateVariable(String),
}

struct Prefix<'a>(&'a str);

impl Display for Prefix<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            Ok(())
        } else {
            write!(f, "{}: ", self.0)
        }
    }
}

impl Display for CouplingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCoupling { object, name, reason } => {
                write!(f, "{}Invalid coupled variable '{}': {}", Prefix(object), name, reason)
            }
            Self::UnknownVariable { object, name } => {
                write!(f, "{}Coupled variable '{}' was not found", Prefix(object), name)
            }
            Self::WrongVariableKind {
                object,
                name,
                kind,
                requested,
            } => write!(
                f,
                "{}Coupled variable '{}' is a {} variable and cannot be accessed with the {} accessors. \
                 Use the {} accessors instead",
                Prefix(object),
                name,
                kind,
                requested.accessors(),
                kind.family().accessors()
            ),
            Self::UnsupportedHistoryDepth {
                object,
                name,
                state,
                reason,
            } => write!(
                f,
                "{}{:?} state of coupled variable '{}' is not available: {}",
                Prefix(object),
                state,
                name,
                reason
            ),
            Self::UnsupportedQuantity {
                object,
                name,
                quantity,
                reason,
            } => write!(
                f,
                "{}{:?} of coupled variable '{}' is not available: {}",
                Prefix(object),
                quantity,
                name,
                reason
            ),
            Self::IncompatibleContinuity { object, name, reason } => {
                write!(f, "{}Cannot couple variable '{}': {}", Prefix(object), name, reason)
            }
            Self::UnknownTag { object, tag } => write!(f, "{}Tag {} does not exist", Prefix(object), tag),
            Self::IndexOutOfRange {
                object,
                name,
                index,
                components,
            } => write!(
                f,
                "{}Requested component {} of coupled variable '{}' is out of range ({} components)",
                Prefix(object),
                index,
                name,
                components
            ),
            Self::InsufficientHistoryConfigured { requested, retained } => write!(
                f,
                "Requested {} old solution states after the number of retained states was \
                 finalized at {}",
                requested, retained
            ),
            Self::DuplicateWritableClaim {
                object,
                variable,
                owner,
                thread,
            } => write!(
                f,
                "{}Variable '{}' is already writable by '{}' on thread {} on a shared subdomain",
                Prefix(object),
                variable,
                owner,
                thread
            ),
            Self::WritableRestriction { object, name, reason } => {
                write!(f, "{}Variable '{}' cannot be written: {}", Prefix(object), name, reason)
            }
            Self::DuplicateVariable(name) => write!(f, "Variable '{}' already exists", name),
        }
    }
}

impl Error for CouplingError {}

/// Construction-time settings of a [`CoupledFieldResolver`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouplingOptions {
    /// Name of the owning object, used in error messages and writable claims.
    pub object_name: String,
    /// Worker slot the object runs on.
    pub thread: ThreadId,
    /// Whether the object is evaluated at nodes rather than at quadrature points.
    pub nodal: bool,
    /// Whether the object is a finite volume object.
    pub finite_volume: bool,
    /// Whether the object uses an implicit time integration scheme. Explicit objects read the
    /// solution one state further back.
    pub implicit: bool,
    /// Whether the object evaluates its couplings on the neighbor side of a face.
    pub neighbor: bool,
    /// Subdomains the object is restricted to. `None` means every subdomain.
    pub blocks: Option<BTreeSet<SubdomainId>>,
}

impl Default for CouplingOptions {
    fn default() -> Self {
        Self {
            object_name: String::new(),
            thread: 0,
            nodal: false,
            finite_volume: false,
            implicit: true,
            neighbor: false,
            blocks: None,
        }
    }
}

/// A coupled name resolved to a variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub variable: VariableId,
    pub name: String,
    pub kind: FieldKind,
    pub components: usize,
}

/// Resolution state of one component of a coupled name.
///
/// Bindings only ever move out of `Unresolved`, and never change afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingState {
    Unresolved,
    Resolved(Binding),
    /// An optional variable that was not supplied, served by default values.
    OptionalDefaulted,
}

#[derive(Debug)]
struct CoupledEntry {
    inputs: Vec<CoupledInput>,
    states: Vec<BindingState>,
}

impl CoupledEntry {
    fn is_coupled(&self) -> bool {
        matches!(self.inputs.first(), Some(CoupledInput::Variable(_)))
    }

    fn is_constant(&self) -> bool {
        matches!(self.inputs.first(), Some(CoupledInput::Constant(_)))
    }
}

/// A request for a coupled quantity.
#[derive(Debug, Copy, Clone)]
struct Request<'a> {
    name: &'a str,
    comp: usize,
    family: Family,
    quantity: Quantity,
    state: SolutionState,
    /// `None` selects the default side of the object.
    side: Option<Side>,
    ad: bool,
    accessor: &'static str,
}

type CoupledCallback = Box<dyn FnMut(&str, bool) + Send>;

/// Resolves the coupled variables of one object and hands out typed handles to their derived
/// quantities.
///
/// The resolver is configured during a single-threaded setup phase, in which all handles are
/// requested. During evaluation it is only read, by the worker slot the object runs on.
pub struct CoupledFieldResolver<T: Scalar> {
    registry: Arc<FieldRegistry>,
    parameters: CouplingParameters,
    options: CouplingOptions,
    owner: OwnerId,
    entries: BTreeMap<String, CoupledEntry>,
    coupled_variables: Vec<VariableId>,
    defaults: Vec<QuantityData<T>>,
    default_index: FxHashMap<DefaultKey, usize>,
    vector_tags: BTreeSet<TagId>,
    matrix_tags: BTreeSet<TagId>,
    writable: BTreeSet<VariableId>,
    callback: Option<CoupledCallback>,
}

impl<T: Scalar> fmt::Debug for CoupledFieldResolver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoupledFieldResolver")
            .field("options", &self.options)
            .field("entries", &self.entries)
            .field("coupled_variables", &self.coupled_variables)
            .field("vector_tags", &self.vector_tags)
            .field("matrix_tags", &self.matrix_tags)
            .field("writable", &self.writable)
            .finish_non_exhaustive()
    }
}

impl<T: Real> CoupledFieldResolver<T> {
    /// Creates the resolver of an object from its coupling parameters.
    ///
    /// Fails if a required coupled variable was not supplied, or if a supplied variable does
    /// not exist in the registry.
    pub fn new(
        registry: Arc<FieldRegistry>,
        parameters: CouplingParameters,
        options: CouplingOptions,
    ) -> Result<Self, CouplingError> {
        assert!(
            options.thread < registry.num_threads(),
            "Thread id {} out of range",
            options.thread
        );
        if let Some(&missing) = parameters.missing_required().first() {
            return Err(CouplingError::InvalidCoupling {
                object: options.object_name.clone(),
                name: missing.to_string(),
                reason: "required coupled variable was not supplied".to_string(),
            });
        }

        let mut entries = BTreeMap::new();
        let mut coupled_variables = Vec::new();
        for declaration in parameters.declarations() {
            let inputs = parameters.supplied(&declaration.name).to_vec();
            for input in &inputs {
                if let CoupledInput::Variable(variable) = input {
                    let variable = registry
                        .variable_by_name(variable)
                        .ok_or_else(|| CouplingError::UnknownVariable {
                            object: options.object_name.clone(),
                            name: variable.clone(),
                        })?;
                    if !coupled_variables.contains(&variable.id) {
                        coupled_variables.push(variable.id);
                    }
                }
            }
            let num_states = inputs.len().max(declaration.defaults.len()).max(1);
            entries.insert(
                declaration.name.clone(),
                CoupledEntry {
                    inputs,
                    states: vec![BindingState::Unresolved; num_states],
                },
            );
        }
        debug!(
            "'{}': {} coupled declarations, {} coupled variables",
            options.object_name,
            entries.len(),
            coupled_variables.len()
        );

        Ok(Self {
            owner: registry.register_owner(),
            registry,
            parameters,
            options,
            entries,
            coupled_variables,
            defaults: Vec::new(),
            default_index: FxHashMap::default(),
            vector_tags: BTreeSet::new(),
            matrix_tags: BTreeSet::new(),
            writable: BTreeSet::new(),
            callback: None,
        })
    }

    pub fn registry(&self) -> &Arc<FieldRegistry> {
        &self.registry
    }

    pub fn options(&self) -> &CouplingOptions {
        &self.options
    }

    /// The owner id under which this resolver registers claims with the registry.
    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    pub fn parameters(&self) -> &CouplingParameters {
        &self.parameters
    }

    /// Installs a hook invoked with the coupled name, and whether an old state is requested,
    /// every time a quantity of a coupled variable is requested.
    pub fn set_coupled_callback(&mut self, callback: impl FnMut(&str, bool) + Send + 'static) {
        self.callback = Some(Box::new(callback));
    }

    /// Resolves a handle into the data of the current pass.
    ///
    /// # Panics
    ///
    /// Panics if the storage belongs to another worker slot than the handle, or if the storage
    /// has not been re-initialized since the handle was requested.
    pub fn get<'a, Q: QuantityType>(&'a self, storage: &'a ThreadStorage<T>, handle: &Coupled<Q>) -> &'a [Q::Item<T>] {
        let data = match handle.source {
            Source::Default(idx) => &self.defaults[idx],
            Source::Live(slot) => {
                assert_eq!(
                    storage.thread(),
                    handle.thread(),
                    "Handle of thread {} resolved against storage of thread {}",
                    handle.thread(),
                    storage.thread()
                );
                storage.quantity(slot)
            }
        };
        Q::items(data).unwrap_or_else(|| panic!("Expected {:?} data, found {:?}", Q::SHAPE, data.shape()))
    }

    /// Whether the `index`-th component of the name is coupled to a variable.
    ///
    /// Never fails: undeclared names, constants and out-of-range indices are reported as not
    /// coupled.
    pub fn is_coupled(&self, name: &str, index: usize) -> bool {
        self.entry(name)
            .map_or(false, |entry| entry.is_coupled() && index < entry.inputs.len())
    }

    /// Whether the user supplied numeric constants in place of the optional variable.
    pub fn is_coupled_constant(&self, name: &str) -> bool {
        self.entry(name).map_or(false, CoupledEntry::is_constant)
    }

    /// The number of components (supplied variables, constants or default values) of the name.
    pub fn coupled_components(&self, name: &str) -> Result<usize, CouplingError> {
        let declared = self.declared_name(name)?;
        let entry = &self.entries[&declared];
        if !entry.inputs.is_empty() {
            Ok(entry.inputs.len())
        } else {
            Ok(self.parameters.default_values(&declared).len())
        }
    }

    /// A number identifying the coupled variable.
    ///
    /// Nonlinear variables are identified by their number in the nonlinear system, auxiliary
    /// variables by `u32::MAX - 1 - number`. Optional variables that were not supplied return
    /// [`INVALID_VARIABLE_NUMBER`].
    pub fn coupled(&mut self, name: &str, comp: usize) -> Result<u32, CouplingError> {
        let declared = self.declared_name(name)?;
        if !self.entries[&declared].is_coupled() {
            let components = self.default_components(&declared);
            if comp >= components {
                return Err(self.out_of_range(&declared, comp, components));
            }
            return Ok(INVALID_VARIABLE_NUMBER);
        }
        let binding = self.resolve_binding(&declared, comp)?;
        let variable = self.registry.variable(binding.variable);
        self.check_nodal_coupling(&declared, variable)?;
        Ok(match variable.system {
            SystemKind::Nonlinear => variable.number,
            SystemKind::Auxiliary => u32::MAX - 1 - variable.number,
        })
    }

    /// [`coupled`](Self::coupled) for every component of the name.
    pub fn coupled_indices(&mut self, name: &str) -> Result<Vec<u32>, CouplingError> {
        let components = self.coupled_components(name)?.max(1);
        (0..components)
            .map(|comp| self.coupled(name, comp))
            .collect()
    }

    /// The name of the variable (or the constant) supplied for the component.
    pub fn coupled_name(&self, name: &str, comp: usize) -> Result<String, CouplingError> {
        let declared = self.declared_name(name)?;
        let entry = &self.entries[&declared];
        match entry.inputs.get(comp) {
            Some(CoupledInput::Variable(variable)) => Ok(variable.clone()),
            Some(CoupledInput::Constant(value)) => Ok(value.to_string()),
            None if entry.inputs.is_empty() => Err(CouplingError::InvalidCoupling {
                object: self.options.object_name.clone(),
                name: declared,
                reason: "no variable was supplied".to_string(),
            }),
            None => Err(self.out_of_range(&declared, comp, entry.inputs.len())),
        }
    }

    pub fn coupled_names(&self, name: &str) -> Result<Vec<String>, CouplingError> {
        let components = self.coupled_components(name)?;
        (0..components)
            .map(|comp| self.coupled_name(name, comp))
            .collect()
    }

    /// The variable coupled as the given component, or `None` for optional variables that
    /// were not supplied.
    pub fn get_var(&mut self, name: &str, comp: usize) -> Result<Option<&FieldVariable>, CouplingError> {
        let declared = self.declared_name(name)?;
        if !self.entries[&declared].is_coupled() {
            return Ok(None);
        }
        let binding = self.resolve_binding(&declared, comp)?;
        let variable = self.registry.variable(binding.variable);
        self.check_nodal_coupling(&declared, variable)?;
        Ok(Some(variable))
    }

    /// The resolution state of the component of the name, if the name is declared.
    pub fn binding(&self, name: &str, comp: usize) -> Option<&BindingState> {
        self.entry(name)
            .and_then(|entry| entry.states.get(comp))
    }

    /// All variables supplied for any coupled name, in declaration order.
    pub fn coupled_variables(&self) -> &[VariableId] {
        &self.coupled_variables
    }

    /// Vector tags that quantities were requested for.
    pub fn vector_tags(&self) -> &BTreeSet<TagId> {
        &self.vector_tags
    }

    /// Matrix tags that quantities were requested for.
    pub fn matrix_tags(&self) -> &BTreeSet<TagId> {
        &self.matrix_tags
    }

    /// Variables this object holds write access to.
    pub fn writable_variables(&self) -> &BTreeSet<VariableId> {
        &self.writable
    }

    fn entry(&self, name: &str) -> Option<&CoupledEntry> {
        self.parameters
            .canonical_name(name)
            .and_then(|declared| self.entries.get(declared))
    }

    fn declared_name(&self, name: &str) -> Result<String, CouplingError> {
        match self.parameters.canonical_name(name) {
            Some(declared) => {
                if declared != name {
                    warn!(
                        "{}Coupled variable '{}' is deprecated, use '{}' instead",
                        Prefix(&self.options.object_name),
                        name,
                        declared
                    );
                }
                Ok(declared.to_string())
            }
            None => Err(CouplingError::InvalidCoupling {
                object: self.options.object_name.clone(),
                name: name.to_string(),
                reason: "it was never declared as a coupled variable of this object".to_string(),
            }),
        }
    }

    fn out_of_range(&self, name: &str, index: usize, components: usize) -> CouplingError {
        CouplingError::IndexOutOfRange {
            object: self.options.object_name.clone(),
            name: name.to_string(),
            index,
            components,
        }
    }

    /// Number of components served by defaults (supplied constants or declared defaults).
    fn default_components(&self, name: &str) -> usize {
        let entry = &self.entries[name];
        if entry.is_constant() {
            entry.inputs.len()
        } else {
            self.parameters.default_values(name).len().max(1)
        }
    }

    fn resolve_binding(&mut self, name: &str, comp: usize) -> Result<Binding, CouplingError> {
        let entry = &self.entries[name];
        let variable_name = match entry.inputs.get(comp) {
            Some(CoupledInput::Variable(variable)) => variable.clone(),
            _ => return Err(self.out_of_range(name, comp, entry.inputs.len())),
        };
        if let Some(BindingState::Resolved(binding)) = entry.states.get(comp) {
            return Ok(binding.clone());
        }

        let variable = self
            .registry
            .variable_by_name(&variable_name)
            .ok_or_else(|| CouplingError::UnknownVariable {
                object: self.options.object_name.clone(),
                name: variable_name.clone(),
            })?;
        let binding = Binding {
            variable: variable.id,
            name: variable.name.clone(),
            kind: variable.kind,
            components: variable.components,
        };
        debug!(
            "{}Bound '{}' (component {}) to {} variable '{}'",
            Prefix(&self.options.object_name),
            name,
            comp,
            binding.kind,
            binding.name
        );
        if let Some(entry) = self.entries.get_mut(name) {
            entry.states[comp] = BindingState::Resolved(binding.clone());
        }
        Ok(binding)
    }

    fn check_nodal_coupling(&self, name: &str, variable: &FieldVariable) -> Result<(), CouplingError> {
        if self.options.nodal && !variable.nodal {
            return Err(CouplingError::IncompatibleContinuity {
                object: self.options.object_name.clone(),
                name: name.to_string(),
                reason: format!("elemental variable '{}' cannot be coupled into a nodal object", variable.name),
            });
        }
        Ok(())
    }

    fn validate_transient(&self, request: &Request) -> Result<(), CouplingError> {
        let needs_time = request.state.history_depth() > 0 || request.quantity.is_time_derivative();
        if needs_time && !self.registry.is_transient() {
            return Err(CouplingError::UnsupportedHistoryDepth {
                object: self.options.object_name.clone(),
                name: request.name.to_string(),
                state: request.state,
                reason: format!(
                    "calling '{}' is only allowed in transient simulations",
                    request.accessor
                ),
            });
        }
        Ok(())
    }

    fn check_continuity(&self, request: &Request, variable: &FieldVariable) -> Result<(), CouplingError> {
        let incompatible = |reason: String| CouplingError::IncompatibleContinuity {
            object: self.options.object_name.clone(),
            name: request.name.to_string(),
            reason,
        };
        let unsupported = |reason: &str| CouplingError::UnsupportedQuantity {
            object: self.options.object_name.clone(),
            name: request.name.to_string(),
            quantity: request.quantity,
            reason: reason.to_string(),
        };

        self.check_nodal_coupling(request.name, variable)?;
        if self.options.nodal && variable.kind == FieldKind::Vector {
            return Err(incompatible(
                "vector variables are not required to be continuous and cannot be used by nodal objects"
                    .to_string(),
            ));
        }
        if self.options.nodal && request.quantity.is_spatial_derivative() {
            return Err(unsupported("nodal objects have no spatial derivatives"));
        }
        if request.quantity == Quantity::NodalValue && !variable.nodal {
            return Err(incompatible(format!("variable '{}' is not nodal", variable.name)));
        }
        if variable.kind.is_finite_volume() && request.quantity.is_spatial_derivative() {
            return Err(unsupported("finite volume variables only provide value-type quantities"));
        }
        if variable.kind == FieldKind::Array && request.ad {
            return Err(unsupported("array variables have no automatic differentiation accessors"));
        }
        Ok(())
    }

    /// The state actually read, taking explicit time integration into account.
    fn effective_state(&self, request: &Request) -> Result<SolutionState, CouplingError> {
        if self.options.implicit || !request.quantity.reads_solution() {
            return Ok(request.state);
        }
        match request.state {
            SolutionState::Current => Ok(SolutionState::Old),
            SolutionState::Old => Ok(SolutionState::Older),
            SolutionState::PreviousNewton => Ok(SolutionState::PreviousNewton),
            SolutionState::Older => Err(CouplingError::UnsupportedHistoryDepth {
                object: self.options.object_name.clone(),
                name: request.name.to_string(),
                state: request.state,
                reason: "older values are not available for explicit schemes".to_string(),
            }),
        }
    }

    fn invoke_callback(&mut self, name: &str, is_old: bool) {
        if let Some(callback) = self.callback.as_mut() {
            callback(name, is_old);
        }
    }

    /// Requires the given solution state to be retained and computed.
    fn request_state(&self, name: &str, kind: FieldKind, state: SolutionState) -> Result<(), CouplingError> {
        let depth = state.history_depth();
        if depth > kind.max_history() {
            return Err(CouplingError::UnsupportedHistoryDepth {
                object: self.options.object_name.clone(),
                name: name.to_string(),
                state,
                reason: format!(
                    "{} variables retain only {} old state(s)",
                    kind,
                    kind.max_history()
                ),
            });
        }
        self.registry.need_solution_state(depth)?;
        if state == SolutionState::PreviousNewton {
            self.registry.need_previous_newton_iteration();
        }
        Ok(())
    }

    /// Resolves a request into a handle.
    fn request<Q: QuantityType>(&mut self, request: Request) -> Result<Coupled<Q>, CouplingError> {
        let declared = self.declared_name(request.name)?;
        let request = Request {
            name: &declared,
            ..request
        };

        if !self.entries[&declared].is_coupled() {
            return self.default_handle::<Q>(&request);
        }

        let num_inputs = self.entries[&declared].inputs.len();
        if request.comp >= num_inputs {
            return Err(self.out_of_range(&declared, request.comp, num_inputs));
        }
        self.validate_transient(&request)?;
        self.invoke_callback(&declared, request.state != SolutionState::Current);

        let binding = self.resolve_binding(&declared, request.comp)?;
        if binding.kind.family() != request.family {
            return Err(CouplingError::WrongVariableKind {
                object: self.options.object_name.clone(),
                name: declared.clone(),
                kind: binding.kind,
                requested: request.family,
            });
        }
        let registry = Arc::clone(&self.registry);
        let variable = registry.variable(binding.variable);
        self.check_continuity(&request, variable)?;

        let state = self.effective_state(&request)?;
        self.request_state(&declared, variable.kind, state)?;
        if request.quantity == Quantity::Second {
            registry.need_second_derivatives();
        }

        let shape = Shape::of(variable.kind, request.quantity, request.ad).ok_or_else(|| {
            CouplingError::UnsupportedQuantity {
                object: self.options.object_name.clone(),
                name: declared.clone(),
                quantity: request.quantity,
                reason: format!("{} variables do not provide it", variable.kind),
            }
        })?;
        assert_eq!(shape, Q::SHAPE, "Internal error: accessor shape mismatch");

        let default_side = if self.options.neighbor {
            Side::Neighbor
        } else {
            Side::Element
        };
        let key = QuantityKey {
            variable: variable.id,
            quantity: request.quantity,
            state,
            side: request.side.unwrap_or(default_side),
            nodal: self.options.nodal,
            ad: request.ad,
        };
        let slot = registry.request(self.options.thread, key);
        Ok(Coupled::new(self.options.thread, Source::Live(slot)))
    }
}
