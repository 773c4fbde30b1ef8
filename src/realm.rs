//! A simulation region: mesh, boundary conditions and the conduction
//! equation system of every simulated rank.

use std::path::{Path, PathBuf};

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use thiserror::Error;

use crate::assembly::{
    AssembleElemSolverAlgorithm, AssembleHeatCondIrradWallSolverAlgorithm, AssemblyError,
    EquationSystem, EquationSystemOptions,
};
use crate::discretization::fields::names;
use crate::discretization::generator::{create_box_mesh, BoxMeshSpec, BLOCK_PART};
use crate::discretization::mesh::{EntityRank, Mesh};
use crate::numerics::exec::ExecutionSpace;
use crate::numerics::sparse::{CrsLinearSystem, SharedContribution};
use crate::physics::bc::{BcKind, BoundaryCondition, BoundaryConditions, ConfigError};
use crate::physics::source::ContactSourceParams;
use crate::physics::{SteadyThermal3dContactSrcElemKernel, SteadyThermalDiffusionElemKernel};

pub const TEMPERATURE_SYSTEM: &str = "temperature";

#[derive(Debug, Error)]
pub enum RealmError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Assembly(#[from] AssemblyError),
    #[error("thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("shared row {row} has no owner among {ranks} ranks")]
    UnroutedRow { row: usize, ranks: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionOptions {
    #[serde(default)]
    pub execution_space: ExecutionSpace,
    /// Worker count for `teams`; the rayon default when absent.
    #[serde(default)]
    pub threads: Option<usize>,
    #[serde(default)]
    pub extract_diagonal: bool,
    #[serde(default = "default_conductivity")]
    pub conductivity: f64,
    #[serde(default = "default_stefan_boltzmann")]
    pub stefan_boltzmann: f64,
    #[serde(default)]
    pub use_shifted_irradiation: bool,
    #[serde(default)]
    pub source: ContactSourceParams,
}

fn default_conductivity() -> f64 {
    1.0
}

fn default_stefan_boltzmann() -> f64 {
    crate::assembly::irrad_wall::STEFAN_BOLTZMANN
}

impl Default for SolutionOptions {
    fn default() -> Self {
        Self {
            execution_space: ExecutionSpace::default(),
            threads: None,
            extract_diagonal: false,
            conductivity: default_conductivity(),
            stefan_boltzmann: default_stefan_boltzmann(),
            use_shifted_irradiation: false,
            source: ContactSourceParams::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialConditions {
    #[serde(default)]
    pub temperature: f64,
    #[serde(default)]
    pub irradiation: f64,
    #[serde(default = "default_emissivity")]
    pub emissivity: f64,
}

fn default_emissivity() -> f64 {
    1.0
}

impl Default for InitialConditions {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            irradiation: 0.0,
            emissivity: default_emissivity(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealmConfig {
    #[serde(default = "default_realm_name")]
    pub name: String,
    #[serde(default)]
    pub mesh: BoxMeshSpec,
    #[serde(default)]
    pub solution_options: SolutionOptions,
    #[serde(default)]
    pub initial_conditions: InitialConditions,
    #[serde(default)]
    pub boundary_conditions: Vec<Value>,
}

fn default_realm_name() -> String {
    "realm_1".to_string()
}

impl Default for RealmConfig {
    fn default() -> Self {
        Self {
            name: default_realm_name(),
            mesh: BoxMeshSpec::default(),
            solution_options: SolutionOptions::default(),
            initial_conditions: InitialConditions::default(),
            boundary_conditions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub directory: PathBuf,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_dir(),
        }
    }
}

/// Top-level input document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub realm: RealmConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl SimulationConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }
}

/// Counters of one assembly pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    pub ranks: usize,
    pub rows: usize,
    pub nonzeros: usize,
    pub shared_routed: usize,
}

pub struct Realm {
    pub name: String,
    pub mesh: Mesh,
    pub bcs: BoundaryConditions,
    options: SolutionOptions,
    systems: Vec<EquationSystem>,
    pool: Option<rayon::ThreadPool>,
}

impl Realm {
    pub fn new(config: &RealmConfig) -> Result<Self, RealmError> {
        let bcs = BoundaryConditions::load_all(&config.boundary_conditions)?;
        Self::with_mesh(config, create_box_mesh(&config.mesh), bcs)
    }

    /// Build a realm on an existing mesh.
    pub fn with_mesh(
        config: &RealmConfig,
        mut mesh: Mesh,
        bcs: BoundaryConditions,
    ) -> Result<Self, RealmError> {
        let opts = &config.solution_options;
        let ic = &config.initial_conditions;
        let n = mesh.num_nodes();
        mesh.fields
            .declare_real(names::TEMPERATURE, EntityRank::Node, 1, n, ic.temperature);
        mesh.fields
            .declare_real(names::IRRADIATION, EntityRank::Node, 1, n, ic.irradiation);
        mesh.fields
            .declare_real(names::EMISSIVITY, EntityRank::Node, 1, n, ic.emissivity);

        for bc in bcs.iter() {
            if bc.kind() == BcKind::Overset {
                continue;
            }
            for part in bc.target().parts() {
                if mesh.part(part).is_none() {
                    return Err(ConfigError::UnknownPart {
                        bc: bc.name().to_string(),
                        part: part.to_string(),
                    }
                    .into());
                }
            }
        }

        apply_wall_data(&mut mesh, &bcs);
        let has_overset = apply_overset_holes(&mut mesh, &bcs);

        let eq_options = EquationSystemOptions {
            has_overset,
            extract_diagonal: opts.extract_diagonal,
        };
        let systems = (0..mesh.num_ranks)
            .map(|rank| build_temperature_system(rank, eq_options, opts, &bcs))
            .collect();

        for bc in bcs.iter() {
            let handled = match bc {
                BoundaryCondition::Wall(w) => w.user_data.is_irradiating(),
                BoundaryCondition::Overset(_) => true,
                _ => false,
            };
            if !handled {
                log::info!(
                    "{} BC {} adds no conduction contribution on {}",
                    bc.kind(),
                    bc.name(),
                    bc.target()
                );
            }
        }

        let pool = match (opts.execution_space, opts.threads) {
            (ExecutionSpace::Teams, Some(t)) => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(t)
                    .build()?,
            ),
            _ => None,
        };

        Ok(Self {
            name: config.name.clone(),
            mesh,
            bcs,
            options: opts.clone(),
            systems,
            pool,
        })
    }

    pub fn options(&self) -> &SolutionOptions {
        &self.options
    }

    pub fn systems(&self) -> &[EquationSystem] {
        &self.systems
    }

    pub fn num_rows(&self) -> usize {
        self.mesh.num_nodes()
    }

    pub fn initialize_connectivity(&mut self) -> Result<(), RealmError> {
        for sys in &mut self.systems {
            sys.initialize_connectivity(&mut self.mesh)?;
        }
        Ok(())
    }

    /// Assemble every rank, then route shared rows to their owners.
    pub fn assemble(&self) -> Result<PassReport, RealmError> {
        let exec = self.options.execution_space;
        let run = || -> Result<(), RealmError> {
            for sys in &self.systems {
                sys.assemble(&self.mesh, exec)?;
            }
            Ok(())
        };
        match &self.pool {
            Some(pool) => pool.install(run)?,
            None => run()?,
        }

        let shared_routed = self.route_shared()?;
        let mut report = PassReport {
            ranks: self.systems.len(),
            shared_routed,
            ..Default::default()
        };
        for sys in &self.systems {
            if let Some(ls) = sys.linear_system() {
                report.rows += ls.graph().num_rows();
                report.nonzeros += ls.nnz();
            }
        }
        log::info!(
            "{}: assembled {} rows, {} nonzeros on {} ranks ({} shared rows routed, {})",
            self.name,
            report.rows,
            report.nonzeros,
            report.ranks,
            report.shared_routed,
            exec.name()
        );
        Ok(report)
    }

    /// Stand-in for the distributed-matrix layer: every outbox entry is
    /// summed into the rank owning its row.
    fn route_shared(&self) -> Result<usize, RealmError> {
        let outgoing: Vec<SharedContribution> = self
            .systems
            .iter()
            .filter_map(|s| s.linear_system())
            .flat_map(|ls| ls.drain_shared())
            .collect();

        for contribution in &outgoing {
            let owner = self
                .systems
                .iter()
                .filter_map(|s| s.linear_system())
                .find(|ls| ls.graph().local_row(contribution.row).is_some())
                .ok_or(RealmError::UnroutedRow {
                    row: contribution.row,
                    ranks: self.systems.len(),
                })?;
            owner
                .sum_shared(std::slice::from_ref(contribution))
                .map_err(AssemblyError::from)?;
        }
        Ok(outgoing.len())
    }

    /// Assembled diagonal by global row, read from the owning rank.
    pub fn assembled_diagonal(&self) -> DVector<f64> {
        self.per_owned_row(|ls, row| ls.value(row, row))
    }

    /// Sum of every global row, read from the owning rank.
    pub fn row_sums(&self) -> DVector<f64> {
        self.per_owned_row(CrsLinearSystem::row_sum)
    }

    fn per_owned_row<F>(&self, read: F) -> DVector<f64>
    where
        F: Fn(&CrsLinearSystem, usize) -> Option<f64>,
    {
        let mut out = DVector::zeros(self.num_rows());
        for ls in self.systems.iter().filter_map(|s| s.linear_system()) {
            for &row in ls.graph().owned_rows() {
                out[row] = read(ls.as_ref(), row).unwrap_or(0.0);
            }
        }
        out
    }

    /// Dense copy of the global matrix gathered from every rank. Test and
    /// debugging aid only; output paths use the sparse accessors.
    pub fn global_matrix(&self) -> DMatrix<f64> {
        let n = self.num_rows();
        self.systems
            .iter()
            .filter_map(|s| s.linear_system())
            .fold(DMatrix::zeros(n, n), |acc, ls| acc + ls.to_dense(n))
    }

    pub fn global_rhs(&self) -> DVector<f64> {
        let n = self.num_rows();
        self.systems
            .iter()
            .filter_map(|s| s.linear_system())
            .fold(DVector::zeros(n), |acc, ls| acc + ls.rhs_dense(n))
    }

    /// Per-node diagonal accumulated by the coefficient appliers of every
    /// rank. `None` unless diagonal extraction is enabled.
    pub fn diagonal(&self) -> Option<Vec<f64>> {
        let mut total: Option<Vec<f64>> = None;
        for sys in &self.systems {
            let field = self.mesh.fields.atomic(&sys.diagonal_field_name())?;
            let values = field.to_vec();
            match total.as_mut() {
                Some(t) => t.iter_mut().zip(values).for_each(|(a, b)| *a += b),
                None => total = Some(values),
            }
        }
        total
    }
}

fn build_temperature_system(
    rank: usize,
    eq_options: EquationSystemOptions,
    opts: &SolutionOptions,
    bcs: &BoundaryConditions,
) -> EquationSystem {
    let mut sys = EquationSystem::new(TEMPERATURE_SYSTEM, 1, eq_options).for_rank(rank);
    sys.add_algorithm(Box::new(
        AssembleElemSolverAlgorithm::new(BLOCK_PART, 1)
            .with_kernel(SteadyThermalDiffusionElemKernel::new(opts.conductivity))
            .with_kernel(SteadyThermal3dContactSrcElemKernel::new(opts.source)),
    ));

    for bc in bcs.iter() {
        if let BoundaryCondition::Wall(w) = bc {
            if !w.user_data.is_irradiating() {
                continue;
            }
            for part in w.target.parts() {
                sys.add_algorithm(Box::new(
                    AssembleHeatCondIrradWallSolverAlgorithm::new(part, opts.use_shifted_irradiation)
                        .with_stefan_boltzmann(opts.stefan_boltzmann),
                ));
            }
        }
    }
    sys
}

/// Copy wall user data onto the nodes of the wall's parts.
fn apply_wall_data(mesh: &mut Mesh, bcs: &BoundaryConditions) {
    for bc in bcs.iter() {
        let BoundaryCondition::Wall(w) = bc else {
            continue;
        };
        let data = &w.user_data;
        let nodes: Vec<usize> = w
            .target
            .parts()
            .into_iter()
            .filter_map(|p| mesh.part(p))
            .flat_map(|p| mesh.objects(p))
            .flat_map(|o| mesh.connected_nodes(o).to_vec())
            .collect();

        for (field, value) in [
            (names::TEMPERATURE, data.temperature),
            (names::IRRADIATION, data.irradiation),
            (names::EMISSIVITY, data.emissivity),
        ] {
            let (Some(v), Some(f)) = (value, mesh.fields.real_mut(field)) else {
                continue;
            };
            for &n in &nodes {
                f.set(n, 0, v);
            }
        }
    }
}

/// Blank the nodes inside every overset hole box. Returns whether any
/// overset condition exists.
fn apply_overset_holes(mesh: &mut Mesh, bcs: &BoundaryConditions) -> bool {
    let holes: Vec<_> = bcs
        .iter()
        .filter_map(|bc| match bc {
            BoundaryCondition::Overset(o) => Some(o.user_data.clone()),
            _ => None,
        })
        .collect();
    if holes.is_empty() {
        return false;
    }

    let n = mesh.num_nodes();
    let inside: Vec<bool> = (0..n)
        .map(|node| {
            let x = mesh.node_coordinates(node);
            holes.iter().any(|h| h.contains(x))
        })
        .collect();
    let iblank = mesh.fields.declare_int(names::IBLANK, EntityRank::Node, 1, n, 1);
    let mut blanked = 0;
    for (node, &hole) in inside.iter().enumerate() {
        if hole {
            iblank.set(node, 0, 0);
            blanked += 1;
        }
    }
    log::info!("overset: {blanked} of {n} nodes blanked");
    true
}
