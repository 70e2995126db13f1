//! Declared coupled variables of an object and the values supplied for them.
use crate::coupling::CouplingError;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A value supplied for a coupled variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CoupledInput {
    Variable(String),
    /// A literal standing in for an optional variable.
    Constant(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoupledDeclaration {
    pub name: String,
    pub required: bool,
    /// Values used when an optional variable is not supplied.
    pub defaults: Vec<f64>,
    pub description: String,
}

/// The coupled-variable parameters of one object.
///
/// Objects declare the names under which they couple to other variables. The user then
/// supplies, for each name, either a list of variable names or a list of numeric constants.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CouplingParameters {
    declarations: BTreeMap<String, CoupledDeclaration>,
    // Deprecated name -> current name
    aliases: BTreeMap<String, String>,
    supplied: BTreeMap<String, Vec<CoupledInput>>,
}

impl CouplingParameters {
    pub fn new() -> Self {
        Self::default()
    }

    fn declare(&mut self, name: &str, required: bool, defaults: Vec<f64>, description: &str) {
        self.declarations.insert(
            name.to_string(),
            CoupledDeclaration {
                name: name.to_string(),
                required,
                defaults,
                description: description.to_string(),
            },
        );
    }

    /// Declares an optional coupled variable that defaults to zero.
    pub fn add_coupled_var(&mut self, name: &str, description: &str) {
        self.declare(name, false, Vec::new(), description);
    }

    /// Declares an optional coupled variable with a constant default value.
    pub fn add_coupled_var_with_default(&mut self, name: &str, default: f64, description: &str) {
        self.declare(name, false, vec![default], description);
    }

    /// Declares an optional coupled variable with one default value per component.
    pub fn add_coupled_var_with_defaults(&mut self, name: &str, defaults: &[f64], description: &str) {
        self.declare(name, false, defaults.to_vec(), description);
    }

    pub fn add_required_coupled_var(&mut self, name: &str, description: &str) {
        self.declare(name, true, Vec::new(), description);
    }

    /// Makes `deprecated_name` an alias of the declared coupled variable `name`.
    pub fn add_deprecated_coupled_var(&mut self, deprecated_name: &str, name: &str) {
        self.aliases
            .insert(deprecated_name.to_string(), name.to_string());
    }

    /// The declared name that `name` refers to, resolving deprecated aliases.
    pub fn canonical_name<'a>(&'a self, name: &'a str) -> Option<&'a str> {
        if let Some((declared, _)) = self.declarations.get_key_value(name) {
            return Some(declared.as_str());
        }
        self.aliases
            .get(name)
            .filter(|declared| self.declarations.contains_key(declared.as_str()))
            .map(String::as_str)
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.canonical_name(name).is_some()
    }

    pub fn is_deprecated_name(&self, name: &str) -> bool {
        self.aliases.contains_key(name)
    }

    pub fn declaration(&self, name: &str) -> Option<&CoupledDeclaration> {
        self.canonical_name(name)
            .and_then(|declared| self.declarations.get(declared))
    }

    pub fn declarations(&self) -> impl Iterator<Item = &CoupledDeclaration> {
        self.declarations.values()
    }

    /// Supplies values for a declared coupled variable.
    ///
    /// If every value parses as a finite number, the values are constants standing in for an
    /// optional variable. Otherwise every value must be a variable name. At least one value must
    /// be given.
    pub fn set(&mut self, name: &str, values: &[&str]) -> Result<(), CouplingError> {
        let declared = self
            .canonical_name(name)
            .ok_or_else(|| CouplingError::InvalidCoupling {
                object: String::new(),
                name: name.to_string(),
                reason: "it was never declared as a coupled variable".to_string(),
            })?
            .to_string();
        if self.is_deprecated_name(name) {
            warn!("Coupled variable '{}' is deprecated, use '{}' instead", name, declared);
        }

        if values.is_empty() {
            return Err(CouplingError::InvalidCoupling {
                object: String::new(),
                name: declared,
                reason: "no values were supplied".to_string(),
            });
        }

        // "nan" and "inf" parse as floats but are valid variable names
        let numbers: Vec<_> = values
            .iter()
            .map(|value| {
                value
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|number| number.is_finite())
            })
            .collect();
        let inputs = if numbers.iter().all(Option::is_some) {
            numbers
                .into_iter()
                .flatten()
                .map(CoupledInput::Constant)
                .collect()
        } else if numbers.iter().all(Option::is_none) {
            values
                .iter()
                .map(|value| CoupledInput::Variable(value.trim().to_string()))
                .collect()
        } else {
            return Err(CouplingError::InvalidCoupling {
                object: String::new(),
                name: declared,
                reason: "constants and variable names cannot be mixed".to_string(),
            });
        };
        self.supplied.insert(declared, inputs);
        Ok(())
    }

    /// The values supplied for the coupled variable, or an empty slice.
    pub fn supplied(&self, name: &str) -> &[CoupledInput] {
        self.canonical_name(name)
            .and_then(|declared| self.supplied.get(declared))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The default values of an optional coupled variable, or an empty slice.
    pub fn default_values(&self, name: &str) -> &[f64] {
        self.declaration(name)
            .map(|declaration| declaration.defaults.as_slice())
            .unwrap_or(&[])
    }

    /// Required coupled variables for which no values were supplied.
    pub fn missing_required(&self) -> Vec<&str> {
        self.declarations
            .values()
            .filter(|declaration| {
                declaration.required
                    && self
                        .supplied
                        .get(&declaration.name)
                        .map_or(true, Vec::is_empty)
            })
            .map(|declaration| declaration.name.as_str())
            .collect()
    }
}
