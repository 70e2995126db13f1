use crate::{options, resolver_with, steady_registry, transient_registry};
use fenris_coupling::coupling::CouplingOptions;
use fenris_coupling::field::{
    reinit_threads, ElementContext, FieldRegistry, LocalField, ShapeFunctions, SolutionVectors, ThreadStorage,
};
use matrixcompare::assert_matrix_eq;
use nalgebra::{DMatrix, DVector, Matrix3, Vector3};
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use std::sync::Arc;

const NUM_DOFS: usize = 17;

/// A two-node element with two quadrature points.
fn shape_functions() -> Arc<ShapeFunctions<f64>> {
    let phi = DMatrix::from_row_slice(2, 2, &[0.75, 0.25, 0.25, 0.75]);
    let left = Vector3::new(-1.0, 0.0, 0.0);
    let right = Vector3::new(1.0, 0.0, 0.0);
    let second = Matrix3::identity();
    Arc::new(
        ShapeFunctions::new(phi, vec![left, right, left, right])
            .with_second_derivatives(vec![second, second * 2.0, second, second * 2.0]),
    )
}

/// Element on subdomain 0 carrying dofs for every variable of the test registry except
/// `aux_blocked`, which is not defined on subdomain 0.
fn element(registry: &FieldRegistry) -> ElementContext<f64> {
    let shape = shape_functions();
    let id = |name: &str| registry.variable_by_name(name).unwrap().id;
    let mut element = ElementContext::new(0, 2);
    element.set_field(id("u"), LocalField::finite_element(vec![0, 1], Arc::clone(&shape)));
    element.set_field(id("aux"), LocalField::finite_element(vec![2, 3], Arc::clone(&shape)));
    element.set_field(id("fv"), LocalField::finite_volume(vec![4]));
    element.set_field(id("a"), LocalField::finite_element(vec![5, 6, 7, 8], Arc::clone(&shape)));
    element.set_field(id("v"), LocalField::finite_element((9..15).collect(), Arc::clone(&shape)));
    element.set_field(id("lfv"), LocalField::finite_volume(vec![15]));
    element.set_field(id("elem"), LocalField::finite_volume(vec![16]));
    element
}

fn solution() -> SolutionVectors<f64> {
    let mut solution = SolutionVectors::zeros(NUM_DOFS);
    #[rustfmt::skip]
    let current = [
        1.0, 3.0,                     // u
        2.0, 4.0,                     // aux
        7.0,                          // fv
        1.0, 3.0, 10.0, 20.0,         // a
        1.0, 3.0, 0.0, 4.0, 2.0, 2.0, // v
        5.0,                          // lfv
        6.0,                          // elem
    ];
    solution.current.copy_from_slice(&current);
    solution.old[0] = 0.0;
    solution.old[1] = 1.0;
    solution.older[0] = -1.0;
    solution.older[1] = -1.0;
    solution.previous_newton[0] = 2.0;
    solution.previous_newton[1] = 2.0;
    solution.u_dot[0] = 2.0;
    solution.u_dot[1] = 2.0;
    solution.u_dot_old[0] = 4.0;
    solution.u_dot_old[1] = 0.0;
    solution.du_dot_du = 10.0;
    solution
}

#[test]
fn values_and_gradients_are_interpolated() {
    let registry = transient_registry();
    let mut resolver = resolver_with(&registry, &["u"], options("kernel"));
    let value = resolver.coupled_value("c", 0).unwrap();
    let gradient = resolver.coupled_gradient("c", 0).unwrap();
    let second = resolver.coupled_second("c", 0).unwrap();
    let nodal = resolver.coupled_nodal_value("c", 0).unwrap();
    let dofs = resolver.coupled_dof_values("c", 0).unwrap();

    let mut storage = ThreadStorage::new(0, element(&registry));
    storage.reinit(&registry, &solution()).unwrap();
    assert_eq!(storage.pass(), 1);
    assert_eq!(storage.keys().len(), 5);

    assert_eq!(resolver.get(&storage, &value), &[1.5, 2.5]);
    assert_eq!(resolver.get(&storage, &gradient), &[Vector3::new(2.0, 0.0, 0.0); 2]);
    assert_eq!(resolver.get(&storage, &nodal), &[1.0, 3.0]);
    assert_eq!(resolver.get(&storage, &dofs), &[1.0, 3.0]);
    for s in resolver.get(&storage, &second) {
        assert_matrix_eq!(*s, Matrix3::identity() * 7.0, comp = float);
    }
}

#[test]
fn old_states_and_time_derivatives() {
    let registry = transient_registry();
    let mut resolver = resolver_with(&registry, &["u"], options("kernel"));
    let old = resolver.coupled_value_old("c", 0).unwrap();
    let older = resolver.coupled_value_older("c", 0).unwrap();
    let previous = resolver.coupled_value_previous_nl("c", 0).unwrap();
    let dot = resolver.coupled_dot("c", 0).unwrap();
    let dot_old = resolver.coupled_dot_old("c", 0).unwrap();
    let dot_du = resolver.coupled_dot_du("c", 0).unwrap();
    let gradient_dot = resolver.coupled_gradient_dot("c", 0).unwrap();

    let mut solution = solution();
    let mut storage = ThreadStorage::new(0, element(&registry));
    storage.reinit(&registry, &solution).unwrap();

    assert_eq!(resolver.get(&storage, &old), &[0.25, 0.75]);
    assert_eq!(resolver.get(&storage, &older), &[-1.0, -1.0]);
    assert_eq!(resolver.get(&storage, &previous), &[2.0, 2.0]);
    assert_eq!(resolver.get(&storage, &dot), &[2.0, 2.0]);
    assert_eq!(resolver.get(&storage, &dot_old), &[3.0, 1.0]);
    assert_eq!(resolver.get(&storage, &dot_du), &[10.0, 10.0]);
    assert_eq!(resolver.get(&storage, &gradient_dot), &[Vector3::zeros(); 2]);

    solution.advance_time_step();
    storage.reinit(&registry, &solution).unwrap();
    assert_eq!(storage.pass(), 2);
    assert_eq!(resolver.get(&storage, &old), &[1.5, 2.5]);
    assert_eq!(resolver.get(&storage, &older), &[0.25, 0.75]);
    assert_eq!(resolver.get(&storage, &dot_old), &[2.0, 2.0]);
}

#[test]
fn ad_values_carry_nonlinear_derivatives() {
    let registry = transient_registry();
    let mut resolver = resolver_with(&registry, &["u", "aux"], options("kernel"));
    let value = resolver.ad_coupled_value("c", 0).unwrap();
    let gradient = resolver.ad_coupled_gradient("c", 0).unwrap();
    let dot = resolver.ad_coupled_dot("c", 0).unwrap();
    let aux = resolver.ad_coupled_value("c", 1).unwrap();

    let mut solution = solution();
    solution.du_dot_du = 2.0;
    let mut storage = ThreadStorage::new(0, element(&registry));
    storage.reinit(&registry, &solution).unwrap();

    let values = resolver.get(&storage, &value);
    assert_eq!(values[0].value(), 1.5);
    assert_eq!(values[0].derivatives(), &[(0, 0.75), (1, 0.25)]);
    assert_eq!(values[1].derivatives(), &[(0, 0.25), (1, 0.75)]);

    let gradients = resolver.get(&storage, &gradient);
    assert_eq!(gradients[0][0].value(), 2.0);
    assert_eq!(gradients[0][0].derivatives(), &[(0, -1.0), (1, 1.0)]);
    assert_eq!(gradients[0][1].derivatives(), &[(0, 0.0), (1, 0.0)]);

    let dots = resolver.get(&storage, &dot);
    assert_eq!(dots[0].value(), 2.0);
    assert_eq!(dots[0].derivatives(), &[(0, 1.5), (1, 0.5)]);

    // Auxiliary variables are not solved for
    let aux = resolver.get(&storage, &aux);
    assert_eq!(aux[0].value(), 2.5);
    assert!(aux[0].derivatives().is_empty());
}

#[test]
fn vector_and_array_fields() {
    let registry = steady_registry();
    let mut parameters = fenris_coupling::coupling::CouplingParameters::new();
    parameters.add_coupled_var("velocity", "Velocity");
    parameters.add_coupled_var("species", "Species concentrations");
    parameters.set("velocity", &["v"]).unwrap();
    parameters.set("species", &["a"]).unwrap();
    let mut resolver = fenris_coupling::coupling::CoupledFieldResolver::<f64>::new(
        Arc::clone(&registry),
        parameters,
        options("kernel"),
    )
    .unwrap();

    let value = resolver.coupled_vector_value("velocity", 0).unwrap();
    let gradient = resolver.coupled_vector_gradient("velocity", 0).unwrap();
    let div = resolver.coupled_div("velocity", 0).unwrap();
    let curl = resolver.coupled_curl("velocity", 0).unwrap();
    let array = resolver.coupled_array_value("species", 0).unwrap();
    let array_gradient = resolver.coupled_array_gradient("species", 0).unwrap();
    let array_dofs = resolver.coupled_array_dof_values("species", 0).unwrap();

    let mut storage = ThreadStorage::new(0, element(&registry));
    storage.reinit(&registry, &solution()).unwrap();

    assert_eq!(
        resolver.get(&storage, &value),
        &[Vector3::new(1.5, 1.0, 2.0), Vector3::new(2.5, 3.0, 2.0)]
    );
    let expected_gradient = Matrix3::new(2.0, 0.0, 0.0, 4.0, 0.0, 0.0, 0.0, 0.0, 0.0);
    for g in resolver.get(&storage, &gradient) {
        assert_matrix_eq!(*g, expected_gradient, comp = float);
    }
    assert_eq!(resolver.get(&storage, &div), &[2.0, 2.0]);
    assert_eq!(resolver.get(&storage, &curl), &[Vector3::new(0.0, 0.0, 4.0); 2]);

    let arrays = resolver.get(&storage, &array);
    assert_eq!(arrays[0], DVector::from_column_slice(&[1.5, 12.5]));
    assert_eq!(arrays[1], DVector::from_column_slice(&[2.5, 17.5]));
    let expected = DMatrix::from_row_slice(2, 3, &[2.0, 0.0, 0.0, 10.0, 0.0, 0.0]);
    for g in resolver.get(&storage, &array_gradient) {
        assert_matrix_eq!(g.clone(), expected, comp = float);
    }
    assert_eq!(resolver.get(&storage, &array_dofs), &[1.0, 3.0, 10.0, 20.0]);
}

#[test]
fn finite_volume_values_are_constant() {
    let registry = steady_registry();
    let mut resolver = resolver_with(&registry, &["fv", "lfv"], options("kernel"));
    let fv = resolver.coupled_value("c", 0).unwrap();
    let lfv = resolver.coupled_value("c", 1).unwrap();

    let mut storage = ThreadStorage::new(0, element(&registry));
    storage.reinit(&registry, &solution()).unwrap();
    assert_eq!(resolver.get(&storage, &fv), &[7.0, 7.0]);
    assert_eq!(resolver.get(&storage, &lfv), &[5.0, 5.0]);
}

#[test]
fn nodal_objects_read_nodal_values() {
    let registry = steady_registry();
    let mut resolver = resolver_with(
        &registry,
        &["u"],
        CouplingOptions {
            nodal: true,
            ..options("nodal")
        },
    );
    let value = resolver.coupled_value("c", 0).unwrap();
    let mut storage = ThreadStorage::new(0, element(&registry));
    storage.reinit(&registry, &solution()).unwrap();
    assert_eq!(resolver.get(&storage, &value), &[1.0, 3.0]);
}

#[test]
fn variables_inactive_on_block_are_zero() {
    let registry = steady_registry();
    let mut resolver = resolver_with(&registry, &["aux_blocked"], options("kernel"));
    let value = resolver.coupled_value("c", 0).unwrap();
    let gradient = resolver.coupled_gradient("c", 0).unwrap();

    let mut storage = ThreadStorage::new(0, element(&registry));
    storage.reinit(&registry, &solution()).unwrap();
    assert_eq!(resolver.get(&storage, &value), &[0.0, 0.0]);
    assert_eq!(resolver.get(&storage, &gradient), &[Vector3::zeros(); 2]);
}

#[test]
fn neighbor_quantities_need_a_neighbor() {
    let registry = steady_registry();
    let mut resolver = resolver_with(&registry, &["u"], options("face"));
    let neighbor = resolver.coupled_neighbor_value("c", 0).unwrap();

    let mut storage = ThreadStorage::new(0, element(&registry));
    storage.reinit(&registry, &solution()).unwrap();
    assert!(resolver.get(&storage, &neighbor).is_empty());

    storage.neighbor = Some(element(&registry));
    storage.reinit(&registry, &solution()).unwrap();
    assert_eq!(resolver.get(&storage, &neighbor), &[1.5, 2.5]);
}

#[test]
fn missing_dofs_are_reported() {
    let registry = steady_registry();
    let mut resolver = resolver_with(&registry, &["u"], options("kernel"));
    resolver.coupled_value("c", 0).unwrap();

    let mut storage = ThreadStorage::new(0, ElementContext::new(0, 2));
    let err = storage.reinit(&registry, &solution()).unwrap_err();
    assert!(err.to_string().contains("variable 'u' on thread 0"));
    assert!(err
        .chain()
        .any(|cause| cause.to_string().contains("has no dofs")));
    assert_eq!(storage.pass(), 0);
}

#[test]
fn quantities_requested_late_are_allocated() {
    let registry = steady_registry();
    let mut resolver = resolver_with(&registry, &["u"], options("kernel"));
    let value = resolver.coupled_value("c", 0).unwrap();

    let mut storage = ThreadStorage::new(0, element(&registry));
    let solution = solution();
    storage.reinit(&registry, &solution).unwrap();
    let gradient = resolver.coupled_gradient("c", 0).unwrap();
    storage.reinit(&registry, &solution).unwrap();

    assert_eq!(resolver.get(&storage, &value), &[1.5, 2.5]);
    assert_eq!(resolver.get(&storage, &gradient), &[Vector3::new(2.0, 0.0, 0.0); 2]);
}

#[test]
#[should_panic(expected = "has not been computed")]
fn handles_need_reinitialized_storage() {
    let registry = steady_registry();
    let mut resolver = resolver_with(&registry, &["u"], options("kernel"));
    let value = resolver.coupled_value("c", 0).unwrap();
    let storage = ThreadStorage::new(0, element(&registry));
    resolver.get(&storage, &value);
}

#[test]
#[should_panic(expected = "resolved against storage of thread 1")]
fn handles_are_bound_to_their_thread() {
    let registry = steady_registry();
    let mut resolver = resolver_with(&registry, &["u"], options("kernel"));
    let value = resolver.coupled_value("c", 0).unwrap();
    let mut storage = ThreadStorage::new(1, element(&registry));
    storage.reinit(&registry, &solution()).unwrap();
    resolver.get(&storage, &value);
}

#[test]
fn all_threads_are_reinitialized() {
    let registry = steady_registry();
    let mut first = resolver_with(&registry, &["u"], options("first"));
    let mut second = resolver_with(
        &registry,
        &["aux"],
        CouplingOptions {
            thread: 1,
            ..options("second")
        },
    );
    let u = first.coupled_value("c", 0).unwrap();
    let aux = second.coupled_value("c", 0).unwrap();

    let mut storages = vec![
        ThreadStorage::new(0, element(&registry)),
        ThreadStorage::new(1, element(&registry)),
    ];
    reinit_threads(&mut storages, &registry, &solution()).unwrap();
    assert_eq!(first.get(&storages[0], &u), &[1.5, 2.5]);
    assert_eq!(second.get(&storages[1], &aux), &[2.5, 3.5]);
    assert!(storages.iter().all(|storage| storage.pass() == 1));
}

#[test]
fn tagged_vectors_and_matrices_are_read() {
    let registry = transient_registry();
    let mut resolver = resolver_with(&registry, &["u"], options("kernel"));
    let time = resolver.coupled_vector_tag_value("c", "TIME", 0).unwrap();
    let old = resolver
        .coupled_vector_tag_value("c", "SOLUTION_STATE_1", 0)
        .unwrap();
    let dofs = resolver.coupled_vector_tag_dof_value("c", "TIME", 0).unwrap();
    let system = resolver.coupled_matrix_tag_value("c", "SYSTEM", 0).unwrap();

    let mut solution = solution();
    let mut time_vector = DVector::zeros(NUM_DOFS);
    time_vector[0] = 2.0;
    time_vector[1] = 6.0;
    solution.vector_tags.insert(4, time_vector);
    let mut coo = CooMatrix::new(NUM_DOFS, NUM_DOFS);
    coo.push(0, 0, 4.0);
    coo.push(1, 1, 8.0);
    coo.push(0, 1, 100.0);
    solution.matrix_tags.insert(0, CsrMatrix::from(&coo));

    let mut storage = ThreadStorage::new(0, element(&registry));
    storage.reinit(&registry, &solution).unwrap();
    assert_eq!(resolver.get(&storage, &time), &[3.0, 5.0]);
    assert_eq!(resolver.get(&storage, &old), &[0.25, 0.75]);
    assert_eq!(resolver.get(&storage, &dofs), &[2.0, 6.0]);
    assert_eq!(resolver.get(&storage, &system), &[5.0, 7.0]);

    solution.vector_tags.clear();
    assert!(storage.reinit(&registry, &solution).is_err());
}

#[test]
fn writes_are_buffered_and_applied() {
    let registry = steady_registry();
    let mut resolver = resolver_with(
        &registry,
        &["aux"],
        CouplingOptions {
            nodal: true,
            ..options("writer")
        },
    );
    let field = resolver.writable_variable("c", 0).unwrap();

    let mut solution = solution();
    let mut storage = ThreadStorage::new(0, element(&registry));
    storage.set_dof_values(&field, &[5.0, 6.0]);
    assert_eq!(storage.pending_writes(), &[(2, 5.0), (3, 6.0)]);

    assert_eq!(solution.apply_writes(&mut storage), 2);
    assert!(storage.pending_writes().is_empty());
    assert_eq!(solution.current[2], 5.0);
    assert_eq!(solution.current[3], 6.0);

    solution.store_previous_newton_iterate();
    assert_eq!(solution.previous_newton, solution.current);
}
