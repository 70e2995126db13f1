use crate::coupling::{CoupledFieldResolver, CouplingError, WritableField};
use crate::field::{FieldKind, SystemKind};
use crate::Real;

impl<T: Real> CoupledFieldResolver<T> {
    /// Obtains exclusive write access to a coupled auxiliary variable.
    ///
    /// Within one worker slot, at most one object may write to a variable on any given
    /// subdomain. The claim is registered with the shared registry, so a conflicting claim by
    /// another object fails here, during setup, rather than when values are written. Objects
    /// are told apart by the owner id of their resolver, not by name.
    pub fn writable_variable(&mut self, name: &str, comp: usize) -> Result<WritableField, CouplingError> {
        let declared = self.declared_name(name)?;
        if !self.entries[&declared].is_coupled() {
            return Err(CouplingError::InvalidCoupling {
                object: self.options.object_name.clone(),
                name: declared,
                reason: "only coupled variables can be written".to_string(),
            });
        }
        let binding = self.resolve_binding(&declared, comp)?;
        let variable = self.registry.variable(binding.variable);
        let restriction = |reason: String| CouplingError::WritableRestriction {
            object: self.options.object_name.clone(),
            name: variable.name.clone(),
            reason,
        };

        if variable.kind != FieldKind::Standard {
            return Err(restriction(format!("{} variables cannot be written", variable.kind)));
        }
        if variable.system != SystemKind::Auxiliary {
            return Err(restriction("only auxiliary variables can be written".to_string()));
        }
        if !variable.covers(self.options.blocks.as_ref()) {
            return Err(restriction(
                "the variable must be defined on all blocks of the writing object".to_string(),
            ));
        }
        if variable.nodal != self.options.nodal {
            let reason = if self.options.nodal {
                "a nodal object cannot write to an elemental variable"
            } else {
                "an elemental object cannot write to a nodal variable"
            };
            return Err(restriction(reason.to_string()));
        }

        self.registry.claim_writable(
            self.options.thread,
            variable.id,
            self.owner,
            &self.options.object_name,
            self.options.blocks.as_ref(),
        )?;
        self.writable.insert(variable.id);
        Ok(WritableField::new(self.options.thread, variable.id))
    }
}
