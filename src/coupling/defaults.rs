//! Default values of optional coupled variables that were not supplied.
use crate::ad::DualNumber;
use crate::coupling::{
    AdScalars, AdVariableValue, ArrayVariableValue, Arrays, CoupledFieldResolver, CoupledInput, CouplingError,
    Request, Scalars, Source, VariableValue, VectorVariableValue, Vectors,
};
use crate::coupling::{BindingState, Coupled, Prefix, QuantityType};
use crate::field::{Family, Quantity, QuantityData, Shape, SolutionState};
use crate::Real;
use log::{debug, warn};
use nalgebra::{convert, DMatrix, DVector, Matrix3, Vector3};

/// Coupled name and component of a default value, or an empty name for shared zeros.
pub(super) type DefaultKey = (String, usize, Shape);

fn is_value_like(quantity: Quantity) -> bool {
    matches!(quantity, Quantity::Value | Quantity::NodalValue | Quantity::DofValues)
}

impl<T: Real> CoupledFieldResolver<T> {
    /// Constant values standing in for the optional variable: the supplied constants, or the
    /// declared defaults.
    fn default_constants(&self, name: &str) -> Vec<f64> {
        let supplied: Vec<f64> = self.entries[name]
            .inputs
            .iter()
            .filter_map(|input| match input {
                CoupledInput::Constant(value) => Some(*value),
                CoupledInput::Variable(_) => None,
            })
            .collect();
        if supplied.is_empty() {
            self.parameters.default_values(name).to_vec()
        } else {
            supplied
        }
    }

    /// Looks up or creates the cached default value of the given key.
    fn cached_default(&mut self, key: DefaultKey, create: impl FnOnce() -> QuantityData<T>) -> usize {
        if let Some(&idx) = self.default_index.get(&key) {
            return idx;
        }
        let idx = self.defaults.len();
        debug!(
            "{}Created default {:?} value for '{}' (component {})",
            Prefix(&self.options.object_name),
            key.2,
            key.0,
            key.1
        );
        self.defaults.push(create());
        self.default_index.insert(key, idx);
        idx
    }

    /// The handle of the default value served for a request of an optional variable that was
    /// not supplied.
    pub(super) fn default_handle<Q: QuantityType>(&mut self, request: &Request) -> Result<Coupled<Q>, CouplingError> {
        let name = request.name;
        let components = match request.family {
            Family::Scalar => self.default_components(name),
            Family::Vector | Family::Array => 1,
        };
        if request.comp >= components {
            return Err(self.out_of_range(name, request.comp, components));
        }

        let n = self.registry.max_qps();
        let constants = self.default_constants(name);
        let shape = Q::SHAPE;
        let idx = if is_value_like(request.quantity) {
            let key = (name.to_string(), request.comp, shape);
            match request.family {
                Family::Scalar => {
                    let value = constants
                        .get(request.comp)
                        .copied()
                        .unwrap_or(0.0);
                    self.cached_default(key, || filled(shape, n, &[value]))
                }
                Family::Vector => {
                    if !constants.is_empty() && constants.len() < 3 && !self.default_index.contains_key(&key) {
                        warn!(
                            "{}Only {} default value(s) given for vector variable '{}', \
                             remaining components are zero",
                            Prefix(&self.options.object_name),
                            constants.len(),
                            name
                        );
                    }
                    self.cached_default(key, || filled(shape, n, &constants))
                }
                Family::Array => self.cached_default(key, || filled(shape, n, &constants)),
            }
        } else {
            let array_components = constants.len().max(1);
            let key = (String::new(), array_components, shape);
            self.cached_default(key, || zeros(shape, n, array_components))
        };

        if let Some(entry) = self.entries.get_mut(name).filter(|entry| !entry.is_coupled()) {
            let state = &mut entry.states[request.comp];
            if *state == BindingState::Unresolved {
                *state = BindingState::OptionalDefaulted;
            }
        }
        Ok(Coupled::new(self.options.thread, Source::Default(idx)))
    }

    fn default_request<'a>(name: &'a str, family: Family, ad: bool, accessor: &'static str) -> Request<'a> {
        Request {
            name,
            comp: 0,
            family,
            quantity: Quantity::Value,
            state: SolutionState::Current,
            side: None,
            ad,
            accessor,
        }
    }

    fn default_for<Q: QuantityType>(&mut self, request: Request) -> Result<Coupled<Q>, CouplingError> {
        let declared = self.declared_name(request.name)?;
        self.default_handle(&Request {
            name: &declared,
            ..request
        })
    }

    /// The default value of an optional scalar variable, whether or not it was supplied.
    ///
    /// Repeated calls return handles to the same cached storage.
    pub fn default_value(&mut self, name: &str, comp: usize) -> Result<VariableValue, CouplingError> {
        self.default_for::<Scalars>(Request {
            comp,
            ..Self::default_request(name, Family::Scalar, false, "default_value")
        })
    }

    pub fn ad_default_value(&mut self, name: &str, comp: usize) -> Result<AdVariableValue, CouplingError> {
        self.default_for::<AdScalars>(Request {
            comp,
            ..Self::default_request(name, Family::Scalar, true, "ad_default_value")
        })
    }

    pub fn default_vector_value(&mut self, name: &str) -> Result<VectorVariableValue, CouplingError> {
        self.default_for::<Vectors>(Self::default_request(name, Family::Vector, false, "default_vector_value"))
    }

    pub fn default_array_value(&mut self, name: &str) -> Result<ArrayVariableValue, CouplingError> {
        self.default_for::<Arrays>(Self::default_request(name, Family::Array, false, "default_array_value"))
    }
}

fn constant<T: Real>(values: &[f64], i: usize) -> T {
    convert(values.get(i).copied().unwrap_or(0.0))
}

/// `n` copies of a constant value built from `values`, missing entries being zero.
fn filled<T: Real>(shape: Shape, n: usize, values: &[f64]) -> QuantityData<T> {
    let vector = || Vector3::from_fn(|i, _| constant::<T>(values, i));
    match shape {
        Shape::Scalars => QuantityData::Scalars(vec![constant(values, 0); n]),
        Shape::Vectors => QuantityData::Vectors(vec![vector(); n]),
        Shape::Arrays => {
            let array = DVector::from_fn(values.len().max(1), |i, _| constant::<T>(values, i));
            QuantityData::Arrays(vec![array; n])
        }
        Shape::AdScalars => QuantityData::AdScalars(vec![DualNumber::constant(constant(values, 0)); n]),
        Shape::AdVectors => {
            let value = vector().map(DualNumber::constant);
            QuantityData::AdVectors(vec![value; n])
        }
        _ => zeros(shape, n, values.len().max(1)),
    }
}

fn zeros<T: Real>(shape: Shape, n: usize, array_components: usize) -> QuantityData<T> {
    match shape {
        Shape::Scalars => QuantityData::Scalars(vec![T::zero(); n]),
        Shape::Vectors => QuantityData::Vectors(vec![Vector3::zeros(); n]),
        Shape::Tensors => QuantityData::Tensors(vec![Matrix3::zeros(); n]),
        Shape::Arrays => QuantityData::Arrays(vec![DVector::zeros(array_components); n]),
        Shape::ArrayGradients => QuantityData::ArrayGradients(vec![DMatrix::zeros(array_components, 3); n]),
        Shape::AdScalars => QuantityData::AdScalars(vec![DualNumber::constant(T::zero()); n]),
        Shape::AdVectors => QuantityData::AdVectors(vec![Vector3::from_fn(|_, _| DualNumber::constant(T::zero())); n]),
        Shape::AdTensors => QuantityData::AdTensors(vec![Matrix3::from_fn(|_, _| DualNumber::constant(T::zero())); n]),
    }
}
