use super::{element_context, node_position, quadrature_weights, NUM_ELEMENTS};
use fenris_coupling::coupling::{
    CoupledFieldResolver, CouplingError, CouplingOptions, CouplingParameters, VariableGradient, VariableValue,
    WritableField,
};
use fenris_coupling::field::{
    reinit_threads, FieldKind, FieldRegistry, RegistrySettings, SolutionVectors, SystemKind, ThreadStorage,
    VariableDescription,
};
use fenris_coupling::task_graph::TaskGraph;
use matrixcompare::assert_matrix_eq;
use nalgebra::DVector;
use std::sync::Arc;

const THREADS: usize = 2;
const VARIABLES: [&str; 2] = ["u", "k"];

/// Input blocks, deliberately not in construction order.
const INPUT: [&str; 4] = ["Kernels/diffusion", "AuxKernels/conductivity", "AuxVariables/k", "Variables/u"];

fn setup_graph() -> TaskGraph {
    let mut graph = TaskGraph::new();
    for task in [
        "init_mesh",
        "add_variable",
        "add_aux_variable",
        "add_kernel",
        "add_aux_kernel",
        "init_problem",
    ] {
        graph.register_task(task, false);
    }
    graph.register_task("check_input", true);
    graph
        .add_dependency_sets(
            "(init_mesh)
             (add_variable, add_aux_variable)
             (add_kernel, add_aux_kernel)
             (init_problem)
             (check_input)",
        )
        .unwrap();

    let syntax = [
        ("AddVariableAction", "Variables/*", "add_variable"),
        ("AddAuxVariableAction", "AuxVariables/*", "add_aux_variable"),
        ("AddKernelAction", "Kernels/*", "add_kernel"),
        ("AddAuxKernelAction", "AuxKernels/*", "add_aux_kernel"),
    ];
    for (action, path, task) in syntax {
        graph
            .register_action_syntax(action, path, Some(task), None)
            .unwrap();
    }
    graph
}

/// Computes `k * grad u . grad phi_i` contributions.
struct DiffusionKernel {
    resolver: CoupledFieldResolver<f64>,
    grad_u: VariableGradient,
    conductivity: VariableValue,
    source: VariableValue,
}

impl DiffusionKernel {
    fn new(registry: &Arc<FieldRegistry>, name: &str, thread: usize) -> Result<Self, CouplingError> {
        let mut parameters = CouplingParameters::new();
        parameters.add_required_coupled_var("variable", "The diffused variable");
        parameters.add_coupled_var_with_default("conductivity", 1.0, "Conductivity");
        parameters.add_coupled_var("source", "Volumetric source");
        parameters.set("variable", &["u"])?;
        parameters.set("conductivity", &["k"])?;
        let options = CouplingOptions {
            object_name: name.to_string(),
            thread,
            ..CouplingOptions::default()
        };
        let mut resolver = CoupledFieldResolver::new(Arc::clone(registry), parameters, options)?;
        Ok(Self {
            grad_u: resolver.coupled_gradient("variable", 0)?,
            conductivity: resolver.coupled_value("conductivity", 0)?,
            source: resolver.coupled_value("source", 0)?,
            resolver,
        })
    }
}

/// Writes `k = 1 + x` at the nodes of every visited element.
struct ConductivityAuxKernel {
    field: WritableField,
}

impl ConductivityAuxKernel {
    fn new(registry: &Arc<FieldRegistry>, name: &str, thread: usize) -> Result<Self, CouplingError> {
        let mut parameters = CouplingParameters::new();
        parameters.add_required_coupled_var("variable", "The computed variable");
        parameters.set("variable", &["k"])?;
        let options = CouplingOptions {
            object_name: name.to_string(),
            thread,
            nodal: true,
            ..CouplingOptions::default()
        };
        let mut resolver = CoupledFieldResolver::<f64>::new(Arc::clone(registry), parameters, options)?;
        Ok(Self {
            field: resolver.writable_variable("variable", 0)?,
        })
    }
}

#[derive(Default)]
struct Problem {
    registry: Option<FieldRegistry>,
    shared: Option<Arc<FieldRegistry>>,
    kernels: Vec<DiffusionKernel>,
    aux_kernels: Vec<ConductivityAuxKernel>,
    executed: Vec<String>,
}

impl Problem {
    fn registry_mut(&mut self) -> &mut FieldRegistry {
        assert!(self.shared.is_none(), "Variables must be added before objects are created");
        self.registry.as_mut().expect("Mesh is initialized first")
    }

    fn shared_registry(&mut self) -> Arc<FieldRegistry> {
        if self.shared.is_none() {
            let registry = self.registry.take().expect("Mesh is initialized first");
            self.shared = Some(Arc::new(registry));
        }
        Arc::clone(self.shared.as_ref().unwrap())
    }

    fn run_action(&mut self, action: &str, object: &str) -> eyre::Result<()> {
        match action {
            "AddVariableAction" => {
                self.registry_mut()
                    .add_variable(VariableDescription::new(object, FieldKind::Standard, SystemKind::Nonlinear))?;
            }
            "AddAuxVariableAction" => {
                self.registry_mut()
                    .add_variable(VariableDescription::new(object, FieldKind::Standard, SystemKind::Auxiliary))?;
            }
            "AddKernelAction" => {
                let registry = self.shared_registry();
                for thread in 0..THREADS {
                    self.kernels
                        .push(DiffusionKernel::new(&registry, object, thread)?);
                }
            }
            "AddAuxKernelAction" => {
                let registry = self.shared_registry();
                for thread in 0..THREADS {
                    self.aux_kernels
                        .push(ConductivityAuxKernel::new(&registry, object, thread)?);
                }
            }
            other => eyre::bail!("Unexpected action {}", other),
        }
        Ok(())
    }

    fn run(graph: &TaskGraph) -> eyre::Result<Self> {
        let mut problem = Problem::default();
        let schedule = graph.schedule()?;
        for (task, auto_build) in schedule.iter() {
            problem.executed.push(task.to_string());
            match task {
                "init_mesh" => {
                    problem.registry = Some(FieldRegistry::new(RegistrySettings {
                        threads: THREADS,
                        max_qps: 2,
                        transient: false,
                    }))
                }
                "init_problem" => problem.shared_registry().finalize_states(),
                "check_input" => assert!(auto_build),
                _ => {}
            }
            for path in INPUT {
                let (_, actions) = graph.actions_for_path(path)?;
                let object = path.rsplit('/').next().unwrap();
                for info in actions {
                    if info.task.as_deref() == Some(task) {
                        problem.run_action(&info.action, object)?;
                    }
                }
            }
        }
        Ok(problem)
    }
}

/// Runs a pass over all elements, distributing consecutive elements over the worker slots.
fn for_each_element(
    registry: &FieldRegistry,
    storages: &mut [ThreadStorage<f64>],
    solution: &SolutionVectors<f64>,
    mut visit: impl FnMut(usize, &mut ThreadStorage<f64>),
) {
    let elements: Vec<usize> = (0..NUM_ELEMENTS).collect();
    for batch in elements.chunks(storages.len()) {
        for (storage, &e) in storages.iter_mut().zip(batch) {
            storage.element = element_context(registry, e, &VARIABLES);
        }
        reinit_threads(&mut storages[..batch.len()], registry, solution).unwrap();
        for (storage, &e) in storages.iter_mut().zip(batch) {
            visit(e, storage);
        }
    }
}

#[test]
fn diffusion_residual_with_computed_conductivity() {
    let graph = setup_graph();
    let problem = Problem::run(&graph).unwrap();
    assert_eq!(
        problem.executed,
        vec![
            "init_mesh",
            "add_variable",
            "add_aux_variable",
            "add_kernel",
            "add_aux_kernel",
            "init_problem",
            "check_input"
        ]
    );
    let registry = problem.shared.clone().unwrap();
    assert_eq!(registry.variables().len(), 2);
    assert_eq!(problem.kernels.len(), THREADS);
    assert!(problem.kernels.iter().all(|kernel| kernel.source.is_default()));
    for thread in 0..THREADS {
        assert_eq!(registry.writable_claims(thread).len(), 1);
    }

    // u = x^2 at the nodes, k is computed by the auxiliary kernel
    let num_nodes = NUM_ELEMENTS + 1;
    let mut solution = SolutionVectors::zeros(2 * num_nodes);
    for node in 0..num_nodes {
        solution.current[node] = node_position(node).powi(2);
    }

    let mut storages: Vec<_> = (0..THREADS)
        .map(|thread| ThreadStorage::new(thread, element_context(&registry, 0, &VARIABLES)))
        .collect();

    for_each_element(&registry, &mut storages, &solution, |e, storage| {
        let aux = &problem.aux_kernels[storage.thread()];
        let values = [1.0 + node_position(e), 1.0 + node_position(e + 1)];
        storage.set_dof_values(&aux.field, &values);
    });
    let num_writes: usize = storages
        .iter_mut()
        .map(|storage| solution.apply_writes(storage))
        .sum();
    assert_eq!(num_writes, 2 * NUM_ELEMENTS);
    for node in 0..num_nodes {
        assert_eq!(solution.current[num_nodes + node], 1.0 + node_position(node));
    }

    let weights = quadrature_weights();
    let mut residual = DVector::zeros(num_nodes);
    for_each_element(&registry, &mut storages, &solution, |e, storage| {
        let kernel = &problem.kernels[storage.thread()];
        let grad_u = kernel.resolver.get(storage, &kernel.grad_u);
        let k = kernel.resolver.get(storage, &kernel.conductivity);
        let f = kernel.resolver.get(storage, &kernel.source);
        let shape = storage
            .element
            .field(registry.variable_by_name("u").unwrap().id)
            .and_then(|field| field.shape.clone())
            .unwrap();
        for q in 0..2 {
            for i in 0..2 {
                let grad_phi = shape.grad_phi(i, q);
                let phi = shape.phi(i, q);
                residual[e + i] += weights[q] * (k[q] * grad_u[q].dot(grad_phi) - f[q] * phi);
            }
        }
    });

    // k is linear and grad u constant on each element, so the quadrature is exact
    let mut expected = DVector::zeros(num_nodes);
    for e in 0..NUM_ELEMENTS {
        let (x0, x1) = (node_position(e), node_position(e + 1));
        let slope = (x1 * x1 - x0 * x0) / (x1 - x0);
        let mean_conductivity = 1.0 + (x0 + x1) / 2.0;
        expected[e] -= slope * mean_conductivity;
        expected[e + 1] += slope * mean_conductivity;
    }
    assert_matrix_eq!(residual, expected, comp = abs, tol = 1e-12);
    assert!(storages.iter().all(|storage| storage.pass() == 4));
}

#[test]
fn missing_syntax_aborts_setup() {
    let mut graph = setup_graph();
    graph.remove_all_actions_for_syntax("AuxVariables/*");
    let err = Problem::run(&graph).err().unwrap();
    assert!(err.to_string().contains("AuxVariables/k"));
}

#[test]
fn objects_cannot_couple_to_variables_added_later() {
    let mut graph = setup_graph();
    // Kernels are now created before the auxiliary variable exists
    graph.delete_task_dependencies("add_kernel");
    graph.add_dependency("add_kernel", "add_variable").unwrap();
    graph.add_dependency("add_aux_variable", "add_kernel").unwrap();

    let sorted = graph.sorted_tasks().unwrap();
    let position = |task: &str| sorted.iter().position(|t| t == task).unwrap();
    assert!(position("add_kernel") < position("add_aux_variable"));

    let err = Problem::run(&graph).err().unwrap();
    let err = err.downcast::<CouplingError>().unwrap();
    assert_eq!(
        err,
        CouplingError::UnknownVariable {
            object: "diffusion".to_string(),
            name: "k".to_string()
        }
    );
}
