//! Task scheduling and coupled field resolution for multiphysics simulations.
//!
//! The crate provides two largely independent building blocks:
//!
//! - [`task_graph`]: registration of named build tasks, their partial order and the
//!   association of input syntax with construction actions. The graph resolves into a
//!   deterministic, immutable [`TaskSchedule`](task_graph::TaskSchedule).
//! - [`coupling`]: the [`CoupledFieldResolver`](coupling::CoupledFieldResolver), which maps the
//!   variable names an object was configured with onto typed field bindings and serves
//!   pass-scoped derived quantities (values, gradients, time derivatives, tagged contributions)
//!   computed by the per-thread storage in [`field`].

use nalgebra::RealField;

pub mod ad;
pub mod coupling;
pub mod dependency;
pub mod field;
pub mod task_graph;

pub extern crate nalgebra;
pub extern crate nalgebra_sparse;

/// Real scalar type used for field data.
///
/// Used as a trait alias for the traits frequently needed by generic routines in this crate.
pub trait Real: RealField + Copy {}

impl<T: RealField + Copy> Real for T {}
