use crate::{options, resolver_with, steady_registry, test_registry, transient_registry};
use fenris_coupling::coupling::CouplingError;
use fenris_coupling::field::tags::{OLD_SOLUTION_TAG, TIME_TAG};
use fenris_coupling::field::{
    Quantity, RegistrySettings, SolutionState, TagRegistry, VectorTagKind,
};
use std::sync::Arc;

#[test]
fn builtin_tags_have_fixed_ids() {
    let tags = TagRegistry::default();
    let names: Vec<_> = tags
        .vector_tags()
        .iter()
        .map(|tag| tag.name.as_str())
        .collect();
    assert_eq!(
        names,
        vec![
            "SOLUTION",
            "SOLUTION_STATE_1",
            "SOLUTION_STATE_2",
            "U_PREVIOUS_NL_NEWTON",
            "TIME",
            "NONTIME",
            "RESIDUAL"
        ]
    );
    assert_eq!(tags.matrix_tag_id("system"), Some(0));
    assert_eq!(tags.matrix_tag_id(TIME_TAG), Some(1));
    assert_eq!(tags.num_matrix_tags(), 2);

    assert_eq!(tags.solution_state(0), Some(SolutionState::Current));
    assert_eq!(tags.solution_state(1), Some(SolutionState::Old));
    assert_eq!(tags.solution_state(2), Some(SolutionState::Older));
    assert_eq!(tags.solution_state(3), Some(SolutionState::PreviousNewton));
    assert_eq!(tags.solution_state(4), None);
    assert_eq!(tags.solution_state(100), None);
}

#[test]
fn tag_names_are_case_insensitive() {
    let mut tags = TagRegistry::empty();
    let id = tags.add_vector_tag("my_tag", VectorTagKind::Residual);
    assert_eq!(tags.add_vector_tag("MY_TAG", VectorTagKind::Residual), id);
    assert_eq!(tags.vector_tag_id("My_Tag"), Some(id));
    assert_eq!(tags.vector_tag(id).unwrap().name, "MY_TAG");
}

#[test]
fn vector_tag_requests_are_recorded() {
    let registry = transient_registry();
    let mut resolver = resolver_with(&registry, &["u"], options("kernel"));

    let by_name = resolver.coupled_vector_tag_value("c", "time", 0).unwrap();
    let by_id = resolver.coupled_vector_tag_value("c", 4usize, 0).unwrap();
    assert_eq!(by_name, by_id);
    resolver.coupled_vector_tag_gradient("c", "NONTIME", 0).unwrap();
    resolver.coupled_vector_tag_dof_value("c", "Residual", 0).unwrap();
    assert_eq!(resolver.vector_tags().iter().copied().collect::<Vec<_>>(), vec![4, 5, 6]);
    assert!(resolver.matrix_tags().is_empty());

    let quantities: Vec<_> = registry
        .requested_quantities(0, 0)
        .into_iter()
        .map(|key| key.quantity)
        .collect();
    assert_eq!(
        quantities,
        vec![
            Quantity::VectorTag(4),
            Quantity::VectorTagGradient(5),
            Quantity::VectorTagDofValues(6)
        ]
    );
}

#[test]
fn matrix_tag_requests_are_recorded() {
    let registry = steady_registry();
    let mut resolver = resolver_with(&registry, &["u"], options("kernel"));
    resolver.coupled_matrix_tag_value("c", "system", 0).unwrap();
    resolver.coupled_matrix_tag_value("c", 1usize, 0).unwrap();
    assert_eq!(resolver.matrix_tags().iter().copied().collect::<Vec<_>>(), vec![0, 1]);
    assert!(resolver.vector_tags().is_empty());
}

#[test]
fn unknown_tags_are_rejected() {
    let registry = steady_registry();
    let mut resolver = resolver_with(&registry, &["u"], options("kernel"));
    assert_eq!(
        resolver.coupled_vector_tag_value("c", "bogus", 0).unwrap_err(),
        CouplingError::UnknownTag {
            object: "kernel".to_string(),
            tag: "'bogus'".to_string()
        }
    );
    assert!(matches!(
        resolver.coupled_vector_tag_value("c", 99usize, 0),
        Err(CouplingError::UnknownTag { ref tag, .. }) if tag == "99"
    ));
    assert!(matches!(
        resolver.coupled_matrix_tag_value("c", "residual", 0),
        Err(CouplingError::UnknownTag { .. })
    ));
    assert!(matches!(
        resolver.request_states("c", "bogus", 0),
        Err(CouplingError::UnknownTag { .. })
    ));
    assert!(resolver.vector_tags().is_empty());
}

#[test]
fn tagged_accessors_require_coupled_variable() {
    let registry = steady_registry();
    let mut resolver = resolver_with(&registry, &[], options("kernel"));
    let err = resolver
        .coupled_vector_tag_value("c", TIME_TAG, 0)
        .unwrap_err();
    assert!(matches!(err, CouplingError::InvalidCoupling { .. }));
    assert!(err.to_string().contains("coupled_vector_tag_value"));
    assert!(matches!(
        resolver.coupled_matrix_tag_value("c", "SYSTEM", 0),
        Err(CouplingError::InvalidCoupling { .. })
    ));

    // Residual tags need no retained states, so nothing is validated
    assert!(resolver.request_states("c", "RESIDUAL", 0).is_ok());
    assert!(matches!(
        resolver.request_states("c", OLD_SOLUTION_TAG, 0),
        Err(CouplingError::InvalidCoupling { .. })
    ));
}

#[test]
fn solution_tags_retain_states() {
    let registry = transient_registry();
    let mut resolver = resolver_with(&registry, &["u", "lfv"], options("kernel"));

    resolver
        .coupled_vector_tag_value("c", OLD_SOLUTION_TAG, 0)
        .unwrap();
    assert_eq!(registry.retained_states(), 1);
    resolver
        .request_states("c", "solution_state_2", 0)
        .unwrap();
    assert_eq!(registry.retained_states(), 2);
    assert!(matches!(
        resolver.request_states("c", "SOLUTION_STATE_2", 1),
        Err(CouplingError::UnsupportedHistoryDepth { .. })
    ));

    assert!(!registry.needs_previous_newton_iteration());
    resolver
        .coupled_vector_tag_value("c", "U_PREVIOUS_NL_NEWTON", 0)
        .unwrap();
    assert!(registry.needs_previous_newton_iteration());
}

#[test]
fn solution_tags_requested_late_fail() {
    let registry = transient_registry();
    let mut resolver = resolver_with(&registry, &["u"], options("kernel"));
    registry.finalize_states();

    assert!(resolver.request_states("c", "SOLUTION", 0).is_ok());
    assert_eq!(
        resolver
            .coupled_vector_tag_value("c", "SOLUTION_STATE_1", 0)
            .unwrap_err(),
        CouplingError::InsufficientHistoryConfigured {
            requested: 1,
            retained: 0
        }
    );
}

#[test]
fn custom_tags_can_be_added_before_sharing() {
    let mut registry = test_registry(RegistrySettings {
        threads: 1,
        max_qps: 4,
        transient: false,
    });
    let id = registry
        .tags_mut()
        .add_vector_tag("flux", VectorTagKind::Residual);
    assert_eq!(id, 7);
    let registry = Arc::new(registry);

    let mut resolver = resolver_with(&registry, &["u"], options("kernel"));
    resolver.coupled_vector_tag_value("c", "FLUX", 0).unwrap();
    assert!(resolver.vector_tags().contains(&id));
}
