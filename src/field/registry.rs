use crate::coupling::CouplingError;
use crate::field::tags::TagRegistry;
use crate::field::{FieldKind, FieldVariable, OwnerId, QuantityKey, SubdomainId, SystemKind, ThreadId, VariableId};
use log::debug;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySettings {
    /// Number of worker slots.
    pub threads: usize,
    /// Maximum number of quadrature points of any element. Determines the size of default
    /// values.
    pub max_qps: usize,
    /// Whether the problem is time dependent.
    pub transient: bool,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            threads: 1,
            max_qps: 27,
            transient: false,
        }
    }
}

/// Description of a variable to be added to a [`FieldRegistry`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableDescription {
    pub name: String,
    pub kind: FieldKind,
    pub system: SystemKind,
    /// Number of components of array variables. Ignored for other kinds.
    pub components: usize,
    pub nodal: bool,
    pub blocks: Option<BTreeSet<SubdomainId>>,
}

impl VariableDescription {
    /// A variable defined on all blocks. Finite element variables are nodal, finite volume
    /// variables are elemental.
    pub fn new(name: impl Into<String>, kind: FieldKind, system: SystemKind) -> Self {
        Self {
            name: name.into(),
            kind,
            system,
            components: 1,
            nodal: !kind.is_finite_volume(),
            blocks: None,
        }
    }

    pub fn with_components(mut self, components: usize) -> Self {
        self.components = components;
        self
    }

    /// Marks the variable as elemental, e.g. a discontinuous (monomial) finite element field.
    pub fn elemental(mut self) -> Self {
        self.nodal = false;
        self
    }

    pub fn with_blocks(mut self, blocks: impl IntoIterator<Item = SubdomainId>) -> Self {
        self.blocks = Some(blocks.into_iter().collect());
        self
    }
}

/// A claim of exclusive write access to a variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WritableClaim {
    pub variable: VariableId,
    pub owner_id: OwnerId,
    /// Name of the object holding the claim.
    pub owner: String,
    /// Subdomains the claim applies to. `None` means every subdomain.
    pub blocks: Option<BTreeSet<SubdomainId>>,
}

impl WritableClaim {
    fn overlaps(&self, blocks: Option<&BTreeSet<SubdomainId>>) -> bool {
        match (&self.blocks, blocks) {
            (Some(a), Some(b)) => !a.is_disjoint(b),
            _ => true,
        }
    }
}

#[derive(Debug, Default)]
struct RequestTable {
    slots: FxHashMap<QuantityKey, usize>,
    keys: Vec<QuantityKey>,
}

#[derive(Debug, Default)]
struct SetupState {
    requests: Vec<RequestTable>,
    retained_states: usize,
    states_finalized: bool,
    needs_previous_newton: bool,
    needs_second_derivatives: bool,
    writable: Vec<Vec<WritableClaim>>,
    num_owners: usize,
}

/// The variables of a problem, and the setup-time requirements that objects coupling to them
/// register.
///
/// Variables and tags are added through `&mut self` before the registry is shared. The
/// requirements (requested quantities, retained solution states, writable claims) are
/// registered through `&self` during the setup phase, and only read once evaluation begins.
#[derive(Debug)]
pub struct FieldRegistry {
    settings: RegistrySettings,
    variables: Vec<FieldVariable>,
    names: FxHashMap<String, VariableId>,
    // Number of variables in the nonlinear and auxiliary systems
    system_counts: [u32; 2],
    tags: TagRegistry,
    setup: RwLock<SetupState>,
}

impl FieldRegistry {
    pub fn new(settings: RegistrySettings) -> Self {
        assert!(settings.threads > 0, "Registry needs at least one worker slot");
        let setup = SetupState {
            requests: (0..settings.threads)
                .map(|_| RequestTable::default())
                .collect(),
            writable: vec![Vec::new(); settings.threads],
            ..SetupState::default()
        };
        Self {
            settings,
            variables: Vec::new(),
            names: FxHashMap::default(),
            system_counts: [0, 0],
            tags: TagRegistry::default(),
            setup: RwLock::new(setup),
        }
    }

    pub fn add_variable(&mut self, description: VariableDescription) -> Result<VariableId, CouplingError> {
        if self.names.contains_key(&description.name) {
            return Err(CouplingError::DuplicateVariable(description.name));
        }
        let id = self.variables.len();
        let counter = match description.system {
            SystemKind::Nonlinear => &mut self.system_counts[0],
            SystemKind::Auxiliary => &mut self.system_counts[1],
        };
        let number = *counter;
        *counter += 1;

        let components = match description.kind {
            FieldKind::Vector => 3,
            FieldKind::Array => description.components.max(1),
            _ => 1,
        };
        let variable = FieldVariable {
            id,
            name: description.name.clone(),
            kind: description.kind,
            system: description.system,
            number,
            components,
            nodal: description.nodal && !description.kind.is_finite_volume(),
            blocks: description.blocks,
        };
        debug!(
            "Added {} variable '{}' to the {:?} system (number {})",
            variable.kind, variable.name, variable.system, number
        );
        self.names.insert(description.name, id);
        self.variables.push(variable);
        Ok(id)
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    pub fn is_transient(&self) -> bool {
        self.settings.transient
    }

    pub fn max_qps(&self) -> usize {
        self.settings.max_qps
    }

    pub fn num_threads(&self) -> usize {
        self.settings.threads
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    /// # Panics
    ///
    /// Panics if the id does not belong to a registered variable.
    pub fn variable(&self, id: VariableId) -> &FieldVariable {
        &self.variables[id]
    }

    pub fn variable_by_name(&self, name: &str) -> Option<&FieldVariable> {
        self.names.get(name).map(|&id| &self.variables[id])
    }

    pub fn variables(&self) -> &[FieldVariable] {
        &self.variables
    }

    pub fn tags(&self) -> &TagRegistry {
        &self.tags
    }

    pub fn tags_mut(&mut self) -> &mut TagRegistry {
        &mut self.tags
    }

    /// Requests that the given quantity be computed for the worker slot. Returns the slot of
    /// the quantity in the per-thread storage.
    ///
    /// Identical requests share the same slot.
    pub fn request(&self, thread: ThreadId, key: QuantityKey) -> usize {
        assert!(thread < self.settings.threads, "Thread id {} out of range", thread);
        let mut setup = self.setup.write();
        let table = &mut setup.requests[thread];
        if let Some(&slot) = table.slots.get(&key) {
            return slot;
        }
        let slot = table.keys.len();
        table.keys.push(key);
        table.slots.insert(key, slot);
        debug!("Thread {}: requested {:?} in slot {}", thread, key, slot);
        slot
    }

    /// The quantities requested for the worker slot, starting from the given slot.
    pub fn requested_quantities(&self, thread: ThreadId, from_slot: usize) -> Vec<QuantityKey> {
        let setup = self.setup.read();
        setup.requests[thread]
            .keys
            .get(from_slot..)
            .map(<[QuantityKey]>::to_vec)
            .unwrap_or_default()
    }

    pub fn num_requested_quantities(&self, thread: ThreadId) -> usize {
        self.setup.read().requests[thread].keys.len()
    }

    /// Requires that the given number of old solution states be retained.
    ///
    /// Fails if more states are requested after the state window has been finalized.
    pub fn need_solution_state(&self, depth: usize) -> Result<(), CouplingError> {
        let mut setup = self.setup.write();
        if depth <= setup.retained_states {
            return Ok(());
        }
        if setup.states_finalized {
            return Err(CouplingError::InsufficientHistoryConfigured {
                requested: depth,
                retained: setup.retained_states,
            });
        }
        debug!("Retaining {} old solution states", depth);
        setup.retained_states = depth;
        Ok(())
    }

    /// Freezes the number of retained solution states.
    pub fn finalize_states(&self) {
        let mut setup = self.setup.write();
        setup.states_finalized = true;
        debug!("Finalized solution state window with {} old states", setup.retained_states);
    }

    pub fn retained_states(&self) -> usize {
        self.setup.read().retained_states
    }

    pub fn states_finalized(&self) -> bool {
        self.setup.read().states_finalized
    }

    pub fn need_previous_newton_iteration(&self) {
        self.setup.write().needs_previous_newton = true;
    }

    pub fn needs_previous_newton_iteration(&self) -> bool {
        self.setup.read().needs_previous_newton
    }

    pub fn need_second_derivatives(&self) {
        self.setup.write().needs_second_derivatives = true;
    }

    pub fn needs_second_derivatives(&self) -> bool {
        self.setup.read().needs_second_derivatives
    }

    /// Hands out a new owner id. Every object that claims write access needs its own id.
    pub fn register_owner(&self) -> OwnerId {
        let mut setup = self.setup.write();
        setup.num_owners += 1;
        setup.num_owners - 1
    }

    /// Claims exclusive write access to a variable on behalf of the owner `owner_id`, named
    /// `owner` in messages.
    ///
    /// The claim applies to `blocks`, or to the blocks of the variable if `None`. Fails if
    /// another owner holds a claim on the same variable and thread on a shared subdomain.
    /// Repeated claims by the same owner are accepted.
    pub fn claim_writable(
        &self,
        thread: ThreadId,
        variable: VariableId,
        owner_id: OwnerId,
        owner: &str,
        blocks: Option<&BTreeSet<SubdomainId>>,
    ) -> Result<(), CouplingError> {
        let blocks = blocks
            .cloned()
            .or_else(|| self.variable(variable).blocks.clone());
        let mut setup = self.setup.write();
        assert!(owner_id < setup.num_owners, "Owner id {} was never registered", owner_id);
        let claims = &mut setup.writable[thread];
        if let Some(existing) = claims
            .iter()
            .find(|c| c.variable == variable && c.owner_id != owner_id && c.overlaps(blocks.as_ref()))
        {
            return Err(CouplingError::DuplicateWritableClaim {
                object: owner.to_string(),
                variable: self.variables[variable].name.clone(),
                owner: existing.owner.clone(),
                thread,
            });
        }
        if !claims
            .iter()
            .any(|c| c.variable == variable && c.owner_id == owner_id)
        {
            debug!(
                "Thread {}: '{}' (owner {}) claimed write access to '{}'",
                thread, owner, owner_id, self.variables[variable].name
            );
            claims.push(WritableClaim {
                variable,
                owner_id,
                owner: owner.to_string(),
                blocks,
            });
        }
        Ok(())
    }

    /// Writable claims held on the given worker slot.
    pub fn writable_claims(&self, thread: ThreadId) -> Vec<WritableClaim> {
        self.setup.read().writable[thread].clone()
    }
}
