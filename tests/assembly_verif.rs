use std::f64::consts::PI;
use std::sync::Arc;

use approx::assert_relative_eq;
use nalgebra::{DMatrix, DVector};

use cvfem_rs::assembly::{
    AssembleElemSolverAlgorithm, AssemblyContext, AssemblyError, CoeffApplier, EquationSystem,
    EquationSystemOptions, SolverAlgorithm,
};
use cvfem_rs::discretization::fields::names;
use cvfem_rs::discretization::generator::{
    create_box_mesh, create_single_tet_mesh, BoxMeshSpec, BLOCK_PART,
};
use cvfem_rs::discretization::mesh::{EntityRank, Mesh};
use cvfem_rs::numerics::exec::ExecutionSpace;
use cvfem_rs::numerics::sparse::{CrsLinearSystem, GraphBuilder, SumInto};
use cvfem_rs::physics::bc::BoundaryConditions;
use cvfem_rs::physics::source::ContactSourceParams;
use cvfem_rs::physics::{SteadyThermal3dContactSrcElemKernel, SteadyThermalDiffusionElemKernel};
use cvfem_rs::realm::{Realm, RealmConfig, SolutionOptions};

const UNIT_TET: [[f64; 3]; 4] = [
    [0.0, 0.0, 0.0],
    [1.0, 0.0, 0.0],
    [0.0, 1.0, 0.0],
    [0.0, 0.0, 1.0],
];

fn scaled_tet(h: f64) -> [[f64; 3]; 4] {
    UNIT_TET.map(|x| x.map(|xi| xi * h))
}

fn source_system(mesh: &mut Mesh) -> EquationSystem {
    let mut sys = EquationSystem::new("temperature", 1, EquationSystemOptions::default());
    sys.add_algorithm(Box::new(
        AssembleElemSolverAlgorithm::new(BLOCK_PART, 1)
            .explicit()
            .with_kernel(SteadyThermal3dContactSrcElemKernel::default()),
    ));
    sys.initialize_connectivity(mesh).unwrap();
    sys
}

fn wall_yaml(target: &str) -> serde_yaml::Value {
    serde_yaml::from_str(&format!(
        "wall_boundary_condition: hot\ntarget_name: {target}\nwall_user_data:\n  emissivity: 0.8\n  irradiation: 450.0\n"
    ))
    .unwrap()
}

fn realm_config(divisions: usize, ranks: usize, options: SolutionOptions) -> RealmConfig {
    let mut cfg = RealmConfig {
        mesh: BoxMeshSpec::cube(divisions).with_ranks(ranks),
        solution_options: options,
        boundary_conditions: vec![wall_yaml("surface_zmax")],
        ..Default::default()
    };
    cfg.initial_conditions.temperature = 300.0;
    cfg
}

fn with_hole(mut cfg: RealmConfig) -> RealmConfig {
    cfg.boundary_conditions.push(
        serde_yaml::from_str(
            "overset_boundary_condition: hole\noverset_user_data:\n  hole_min: [0.4, 0.4, 0.4]\n  hole_max: [0.6, 0.6, 0.6]\n",
        )
        .unwrap(),
    );
    cfg
}

fn assembled(cfg: &RealmConfig) -> Realm {
    let mut realm = Realm::new(cfg).unwrap();
    realm.initialize_connectivity().unwrap();
    realm.assemble().unwrap();
    realm
}

/// (3k/4)(wh - sin wh)/w with w = 2πa: exact integral of the source over the
/// corner tet of edge h.
fn exact_source_integral(h: f64, params: ContactSourceParams) -> f64 {
    let w = 2.0 * PI * params.a;
    0.75 * params.k * (w * h - (w * h).sin()) / w
}

#[test]
fn connectivity_initialization_is_idempotent() {
    let mesh = create_box_mesh(&BoxMeshSpec::cube(2));
    let mut alg = AssembleElemSolverAlgorithm::new(BLOCK_PART, 1)
        .with_kernel(SteadyThermalDiffusionElemKernel::new(1.0));

    let mut first = GraphBuilder::new(0..mesh.num_nodes());
    alg.initialize_connectivity(&mesh, &mut first).unwrap();
    let cache = alg.connectivity().cloned();

    let mut second = GraphBuilder::new(0..mesh.num_nodes());
    alg.initialize_connectivity(&mesh, &mut second).unwrap();

    assert_eq!(alg.connectivity().cloned(), cache);
    assert_eq!(first.build(), second.build());
    assert_eq!(alg.kernel_names(), vec!["steady_thermal_diffusion"]);

    let mut mesh = mesh;
    let mut sys = source_system(&mut mesh);
    let before = Arc::clone(sys.linear_system().unwrap());
    sys.initialize_connectivity(&mut mesh).unwrap();
    assert!(Arc::ptr_eq(&before, sys.linear_system().unwrap()));
}

#[test]
fn single_tet_source_matches_quadrature() {
    let mut mesh = create_single_tet_mesh(UNIT_TET);
    let sys = source_system(&mut mesh);
    sys.assemble(&mesh, ExecutionSpace::Host).unwrap();

    let rhs = sys.linear_system().unwrap().rhs_vector();
    let expected = PI * PI / 24.0
        * (9.0 * (2.0 * PI * 17.0 / 96.0).cos() + 3.0 * (2.0 * PI * 45.0 / 96.0).cos());
    assert_relative_eq!(rhs.sum(), expected, epsilon = 1e-12);
    assert_relative_eq!(rhs.sum(), 0.4269600613276405, epsilon = 1e-12);
    assert_relative_eq!(exact_source_integral(1.0, ContactSourceParams::default()), 0.75);
}

#[test]
fn source_integral_converges_at_second_order() {
    let params = ContactSourceParams::default();
    let errors: Vec<f64> = [1.0, 0.5, 0.25, 0.125, 0.0625]
        .iter()
        .map(|&h| {
            let mut mesh = create_single_tet_mesh(scaled_tet(h));
            let sys = source_system(&mut mesh);
            sys.assemble(&mesh, ExecutionSpace::Host).unwrap();
            let sum = sys.linear_system().unwrap().rhs_vector().sum();
            let exact = exact_source_integral(h, params);
            ((sum - exact) / exact).abs()
        })
        .collect();

    assert_relative_eq!(errors[0], 0.4307, epsilon = 1e-3);
    assert!(errors[4] < 2.0e-3, "{errors:?}");
    for pair in errors[2..].windows(2) {
        let rate = (pair[0] / pair[1]).log2();
        assert!(rate > 1.9, "rate {rate} from {errors:?}");
    }
}

#[test]
fn host_and_teams_assemble_the_same_system() {
    let host = assembled(&realm_config(3, 1, SolutionOptions::default()));
    let teams = assembled(&realm_config(
        3,
        1,
        SolutionOptions {
            execution_space: ExecutionSpace::Teams,
            threads: Some(4),
            ..Default::default()
        },
    ));

    let diff = (host.global_matrix() - teams.global_matrix()).abs().max();
    assert!(diff < 1e-10, "{diff}");
    let diff = (host.global_rhs() - teams.global_rhs()).abs().max();
    assert!(diff < 1e-10, "{diff}");
}

#[test]
fn object_order_does_not_change_the_result() {
    let cfg = realm_config(3, 1, SolutionOptions::default());
    let reference = assembled(&cfg);

    let mut realm = Realm::new(&cfg).unwrap();
    realm.initialize_connectivity().unwrap();
    for part in &mut realm.mesh.parts {
        part.objects.reverse();
    }
    realm.assemble().unwrap();

    let diff = (reference.global_matrix() - realm.global_matrix()).abs().max();
    assert!(diff < 1e-10, "{diff}");
    let diff = (reference.global_rhs() - realm.global_rhs()).abs().max();
    assert!(diff < 1e-10, "{diff}");
}

#[test]
fn three_ranks_sum_to_the_single_rank_system() {
    let one = assembled(&realm_config(3, 1, SolutionOptions::default()));
    let three = assembled(&realm_config(3, 3, SolutionOptions::default()));

    assert_eq!(three.systems().len(), 3);
    let diff = (one.global_matrix() - three.global_matrix()).abs().max();
    assert!(diff < 1e-12, "{diff}");
    let diff = (one.global_rhs() - three.global_rhs()).abs().max();
    assert!(diff < 1e-12, "{diff}");
}

#[test]
fn overset_rows_hold_the_reset_state() {
    let realm = assembled(&with_hole(realm_config(2, 2, SolutionOptions::default())));

    // centre node (1, 1, 1) of the 3x3x3 lattice
    let centre = 13;
    let row = realm.mesh.global_id(centre) - 1;
    let matrix = realm.global_matrix();
    let rhs = realm.global_rhs();

    assert_eq!(rhs[row], 0.0);
    for col in 0..matrix.ncols() {
        let expected = if col == row { 1.0 } else { 0.0 };
        assert_eq!(matrix[(row, col)], expected, "col {col}");
    }
    // active neighbours still see the blanked column
    assert!(matrix.column(row).iter().any(|&v| v != 0.0 && v != 1.0));
}

#[test]
fn diagonal_field_matches_assembled_diagonal() {
    let cfg = realm_config(
        2,
        2,
        SolutionOptions {
            extract_diagonal: true,
            ..Default::default()
        },
    );
    let realm = assembled(&cfg);
    let diag = realm.diagonal().unwrap();
    let matrix = realm.global_matrix();

    for node in 0..realm.mesh.num_nodes() {
        let row = realm.mesh.global_id(node) - 1;
        assert_relative_eq!(diag[node], matrix[(row, row)], epsilon = 1e-12);
    }

    // applier extraction reads owned rows only
    let sys = &realm.systems()[0];
    let applier = sys.coeff_applier(&realm.mesh).unwrap();
    let owned: Vec<usize> = realm.mesh.owned_nodes(0).collect();
    let mut lhs = DMatrix::from_element(owned.len(), owned.len(), -1.0);
    applier.extract_diagonal(&owned, &mut lhs).unwrap();
    let ls = sys.linear_system().unwrap();
    for (i, &node) in owned.iter().enumerate() {
        let row = realm.mesh.global_id(node) - 1;
        assert_eq!(Some(lhs[(i, i)]), ls.value(row, row));
    }
}

#[test]
fn overset_diagonal_field_matches_assembled_diagonal() {
    for execution_space in [ExecutionSpace::Host, ExecutionSpace::Teams] {
        let cfg = with_hole(realm_config(
            2,
            2,
            SolutionOptions {
                execution_space,
                extract_diagonal: true,
                ..Default::default()
            },
        ));
        // assemble twice so the reset state is rebuilt on a reused field
        let realm = assembled(&cfg);
        realm.assemble().unwrap();

        let diag = realm.diagonal().unwrap();
        let matrix = realm.global_matrix();
        for node in 0..realm.mesh.num_nodes() {
            let row = realm.mesh.global_id(node) - 1;
            assert_relative_eq!(diag[node], matrix[(row, row)], epsilon = 1e-12);
        }
        let centre = 13;
        assert_eq!(diag[centre], 1.0);
    }
}

#[test]
fn sparse_accessors_match_the_dense_matrix() {
    let realm = assembled(&with_hole(realm_config(3, 3, SolutionOptions::default())));
    let matrix = realm.global_matrix();

    let diag = realm.assembled_diagonal();
    let sums = realm.row_sums();
    assert_eq!(diag.len(), matrix.nrows());
    for row in 0..matrix.nrows() {
        assert_relative_eq!(diag[row], matrix[(row, row)], epsilon = 1e-12);
        assert_relative_eq!(sums[row], matrix.row(row).sum(), epsilon = 1e-12);
    }
}

#[test]
fn teams_outboxes_hold_every_foreign_row() {
    let cfg = realm_config(3, 2, SolutionOptions::default());
    let mut realm = Realm::new(&cfg).unwrap();
    realm.initialize_connectivity().unwrap();

    let sys = &realm.systems()[0];
    let ls = sys.linear_system().unwrap();
    let mut drained = Vec::new();
    for space in [ExecutionSpace::Host, ExecutionSpace::Teams] {
        sys.assemble(&realm.mesh, space).unwrap();
        let mut shared = ls.drain_shared();
        shared.sort_by(|a, b| a.row.cmp(&b.row).then(a.rhs.total_cmp(&b.rhs)));
        drained.push(shared);
    }
    assert!(!drained[0].is_empty());
    assert_eq!(drained[0].len(), drained[1].len());
    assert!(drained[0].iter().all(|c| !ls.owns_row(c.row)));

    let total = |cs: &[cvfem_rs::numerics::sparse::SharedContribution]| -> f64 {
        cs.iter().map(|c| c.rhs + c.values.iter().sum::<f64>()).sum()
    };
    assert_relative_eq!(total(&drained[0]), total(&drained[1]), epsilon = 1e-10);
}

#[test]
fn execute_visits_only_the_objects_it_is_given() {
    let mut mesh = create_box_mesh(&BoxMeshSpec::cube(1));
    let sys = source_system(&mut mesh);
    let applier = sys.coeff_applier(&mesh).unwrap();
    let ctx = AssemblyContext {
        mesh: &mesh,
        applier: &applier,
        exec: ExecutionSpace::Host,
        rank: 0,
    };
    let alg = sys.algorithms().next().unwrap();
    let objects = alg.validate(&ctx).unwrap();
    assert_eq!(objects.len(), 6);

    let ls = sys.linear_system().unwrap();
    ls.zero();
    alg.execute(&ctx, &objects[..1]).unwrap();
    let touched: Vec<usize> = mesh
        .connected_nodes(objects[0])
        .iter()
        .map(|&n| mesh.global_id(n) - 1)
        .collect();
    let rhs = ls.rhs_dense(mesh.num_nodes());
    for row in (0..mesh.num_nodes()).filter(|r| !touched.contains(r)) {
        assert_eq!(rhs[row], 0.0, "row {row}");
    }

    ls.zero();
    alg.execute(&ctx, &objects).unwrap();
    let by_execute = ls.rhs_vector();
    sys.assemble(&mesh, ExecutionSpace::Host).unwrap();
    assert_eq!(ls.rhs_vector(), by_execute);
}

#[test]
fn diagonal_field_follows_the_node_count() {
    let mut mesh = create_single_tet_mesh(UNIT_TET);
    let n = mesh.num_nodes();
    mesh.fields.declare_real(names::TEMPERATURE, EntityRank::Node, 1, n, 300.0);
    let options = EquationSystemOptions {
        extract_diagonal: true,
        ..Default::default()
    };
    let mut sys = EquationSystem::new("temperature", 1, options);
    sys.add_algorithm(Box::new(
        AssembleElemSolverAlgorithm::new(BLOCK_PART, 1)
            .with_kernel(SteadyThermalDiffusionElemKernel::new(1.0)),
    ));

    // left over from a coarser mesh
    mesh.fields
        .declare_atomic(sys.diagonal_field_name(), EntityRank::Node, 1, 2);
    sys.initialize_connectivity(&mut mesh).unwrap();

    let field = mesh.fields.atomic(&sys.diagonal_field_name()).unwrap();
    assert_eq!(field.len(), mesh.num_nodes());
    sys.assemble(&mesh, ExecutionSpace::Host).unwrap();
    let ls = sys.linear_system().unwrap();
    for node in 0..mesh.num_nodes() {
        let row = mesh.global_id(node) - 1;
        assert_eq!(Some(field.get(node, 0)), ls.value(row, row));
    }
}

#[test]
fn failed_precondition_leaves_the_system_untouched() {
    let mut mesh = create_single_tet_mesh(UNIT_TET);
    let sys = source_system(&mut mesh);
    sys.assemble(&mesh, ExecutionSpace::Host).unwrap();
    let before = sys.linear_system().unwrap().rhs_vector();

    mesh.elements[0].nodes.pop();
    let err = sys.assemble(&mesh, ExecutionSpace::Host).unwrap_err();
    assert!(matches!(
        err,
        AssemblyError::TopologyPrecondition {
            expected: 4,
            found: 3,
            ..
        }
    ));
    assert_eq!(sys.linear_system().unwrap().rhs_vector(), before);
}

#[test]
fn modified_mesh_requires_new_connectivity() {
    let mut mesh = create_single_tet_mesh(UNIT_TET);
    let mut sys = source_system(&mut mesh);

    mesh.mark_modified();
    assert!(matches!(
        sys.assemble(&mesh, ExecutionSpace::Host),
        Err(AssemblyError::StaleConnectivity(_))
    ));

    sys.initialize_connectivity(&mut mesh).unwrap();
    sys.assemble(&mesh, ExecutionSpace::Host).unwrap();

    sys.add_algorithm(Box::new(AssembleElemSolverAlgorithm::new(BLOCK_PART, 1)));
    assert!(matches!(
        sys.assemble(&mesh, ExecutionSpace::Host),
        Err(AssemblyError::ConnectivityNotInitialized(_))
    ));

    let mut uninit = EquationSystem::new("temperature", 1, EquationSystemOptions::default());
    uninit.add_algorithm(Box::new(AssembleElemSolverAlgorithm::new(BLOCK_PART, 1)));
    assert!(matches!(
        uninit.assemble(&mesh, ExecutionSpace::Host),
        Err(AssemblyError::NoLinearSystem(_))
    ));
}

#[test]
fn concurrent_disjoint_applies_match_sequential() {
    let mesh = create_box_mesh(&BoxMeshSpec::cube(2));
    let blocks: [&[usize]; 2] = [&[0, 1, 3], &[22, 25, 26]];
    let mut builder = GraphBuilder::new(0..mesh.num_nodes());
    for nodes in blocks {
        let rows: Vec<usize> = nodes.iter().map(|&n| mesh.global_id(n) - 1).collect();
        builder.add_connected_rows(&rows);
    }
    let graph = builder.build();

    let local = |seed: f64| {
        let lhs = DMatrix::from_fn(3, 3, |i, j| seed + (3 * i + j) as f64 * 0.1);
        let rhs = DVector::from_fn(3, |i, _| seed * (i + 1) as f64);
        (lhs, rhs)
    };
    let run = |applier: &CoeffApplier, nodes: &[usize], seed: f64| {
        let (mut lhs, mut rhs) = local(seed);
        let (mut ids, mut perm, mut outbox) = (Vec::new(), Vec::new(), Vec::new());
        applier
            .apply(nodes, &mut ids, &mut perm, &mut rhs, &mut lhs, &mut outbox, "test")
            .unwrap();
        assert!(outbox.is_empty());
    };

    let sequential = Arc::new(CrsLinearSystem::new(graph.clone()));
    let applier =
        CoeffApplier::new(&mesh, Arc::clone(&sequential) as Arc<dyn SumInto>, 1, false, None)
            .unwrap();
    run(&applier, blocks[0], 1.3);
    run(&applier, blocks[1], 2.7);

    let concurrent = Arc::new(CrsLinearSystem::new(graph));
    let applier =
        CoeffApplier::new(&mesh, Arc::clone(&concurrent) as Arc<dyn SumInto>, 1, false, None)
            .unwrap();
    rayon::join(
        || run(&applier, blocks[0], 1.3),
        || run(&applier, blocks[1], 2.7),
    );

    let n = mesh.num_nodes();
    assert_eq!(sequential.to_dense(n), concurrent.to_dense(n));
    assert_eq!(sequential.rhs_dense(n), concurrent.rhs_dense(n));
}

#[test]
fn irradiation_jacobian_matches_finite_differences() {
    let cfg = RealmConfig {
        boundary_conditions: vec![wall_yaml("surface_1")],
        ..Default::default()
    };
    let bcs = BoundaryConditions::load_all(&cfg.boundary_conditions).unwrap();
    let mut realm =
        Realm::with_mesh(&cfg, create_single_tet_mesh(UNIT_TET), bcs).unwrap();
    realm.initialize_connectivity().unwrap();

    let base = [300.0, 320.0, 340.0, 360.0];
    let rhs_at = |realm: &mut Realm, t: [f64; 4]| {
        let field = realm.mesh.fields.real_mut(names::TEMPERATURE).unwrap();
        for (n, v) in t.iter().enumerate() {
            field.set(n, 0, *v);
        }
        realm.assemble().unwrap();
        realm.global_rhs()
    };

    rhs_at(&mut realm, base);
    let jacobian = realm.global_matrix();

    let delta = 1e-3;
    for j in 0..4 {
        let (mut up, mut down) = (base, base);
        up[j] += delta;
        down[j] -= delta;
        let fd = (rhs_at(&mut realm, up) - rhs_at(&mut realm, down)) / (2.0 * delta);
        for i in 0..4 {
            assert_relative_eq!(jacobian[(i, j)], -fd[i], epsilon = 1e-6, max_relative = 1e-6);
        }
    }
}
