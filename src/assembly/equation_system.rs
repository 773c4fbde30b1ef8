use std::sync::Arc;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::assembly::{global_row, AssemblyContext, AssemblyError, CoeffApplier, SolverAlgorithm};
use crate::discretization::mesh::{EntityRank, Mesh, NodeId};
use crate::numerics::exec::ExecutionSpace;
use crate::numerics::sparse::{CrsLinearSystem, GraphBuilder, SumInto};
use crate::numerics::timing;

/// Flags fixed for the lifetime of an equation system and its applier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquationSystemOptions {
    #[serde(default)]
    pub has_overset: bool,
    #[serde(default)]
    pub extract_diagonal: bool,
}

/// The rows one rank owns for one physics unknown, and the algorithms that
/// fill them.
pub struct EquationSystem {
    name: String,
    dofs_per_node: usize,
    options: EquationSystemOptions,
    rank: usize,
    algorithms: Vec<Box<dyn SolverAlgorithm>>,
    linsys: Option<Arc<CrsLinearSystem>>,
}

impl EquationSystem {
    pub fn new(name: impl Into<String>, dofs_per_node: usize, options: EquationSystemOptions) -> Self {
        Self {
            name: name.into(),
            dofs_per_node: dofs_per_node.max(1),
            options,
            rank: 0,
            algorithms: Vec::new(),
            linsys: None,
        }
    }

    /// Assemble as simulated rank `rank`.
    pub fn for_rank(mut self, rank: usize) -> Self {
        self.rank = rank;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dofs_per_node(&self) -> usize {
        self.dofs_per_node
    }

    pub fn options(&self) -> EquationSystemOptions {
        self.options
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn add_algorithm(&mut self, algorithm: Box<dyn SolverAlgorithm>) {
        self.algorithms.push(algorithm);
    }

    pub fn algorithms(&self) -> impl Iterator<Item = &dyn SolverAlgorithm> {
        self.algorithms.iter().map(|a| a.as_ref())
    }

    /// Node field holding this rank's share of the assembled diagonal.
    pub fn diagonal_field_name(&self) -> String {
        format!("{}_diagonal_{}", self.name, self.rank)
    }

    pub fn linear_system(&self) -> Option<&Arc<CrsLinearSystem>> {
        self.linsys.as_ref()
    }

    /// Build the graph from every algorithm's connectivity and allocate the
    /// linear system. An unchanged graph keeps the existing system.
    pub fn initialize_connectivity(&mut self, mesh: &mut Mesh) -> Result<(), AssemblyError> {
        let ndof = self.dofs_per_node;
        let owned_rows: Vec<usize> = mesh
            .owned_nodes(self.rank)
            .flat_map(|n| {
                let gid = mesh.global_id(n);
                (0..ndof).map(move |d| global_row(gid, ndof, d))
            })
            .collect();
        let mut builder = GraphBuilder::new(owned_rows);

        timing::record_connectivity(|| {
            self.algorithms
                .iter_mut()
                .try_for_each(|alg| alg.initialize_connectivity(mesh, &mut builder))
        })?;
        let graph = builder.build();

        let unchanged = self.linsys.as_ref().is_some_and(|s| *s.graph() == graph);
        if !unchanged {
            log::info!(
                "{}: rank {} owns {} rows, {} nonzeros",
                self.name,
                self.rank,
                graph.num_rows(),
                graph.nnz()
            );
            self.linsys = Some(Arc::new(CrsLinearSystem::new(graph)));
        }

        if self.options.extract_diagonal {
            let name = self.diagonal_field_name();
            mesh.fields
                .declare_atomic(name, EntityRank::Node, ndof, mesh.nodes.len());
        }
        Ok(())
    }

    /// Applier for one pass, sharing the system's fixed flags.
    pub fn coeff_applier(&self, mesh: &Mesh) -> Result<CoeffApplier, AssemblyError> {
        let linsys = self
            .linsys
            .as_ref()
            .ok_or_else(|| AssemblyError::NoLinearSystem(self.name.clone()))?;
        let delegate: Arc<dyn SumInto> = Arc::clone(linsys) as Arc<dyn SumInto>;
        let diag = self.diagonal_field_name();
        CoeffApplier::new(
            mesh,
            delegate,
            self.dofs_per_node,
            self.options.has_overset,
            self.options.extract_diagonal.then_some(diag.as_str()),
        )
    }

    /// One assembly pass.
    ///
    /// All algorithms are validated first; a precondition failure returns
    /// before the system is touched. Otherwise the system is zeroed, owned
    /// overset rows are reset and only then do the algorithms accumulate.
    pub fn assemble(&self, mesh: &Mesh, exec: ExecutionSpace) -> Result<(), AssemblyError> {
        let linsys = self
            .linsys
            .as_ref()
            .ok_or_else(|| AssemblyError::NoLinearSystem(self.name.clone()))?;
        let applier = self.coeff_applier(mesh)?;
        let ctx = AssemblyContext {
            mesh,
            applier: &applier,
            exec,
            rank: self.rank,
        };
        let passes = self
            .algorithms
            .iter()
            .map(|alg| alg.validate(&ctx))
            .collect::<Result<Vec<_>, _>>()?;

        linsys.zero();
        if let Some(diag) = mesh.fields.atomic(&self.diagonal_field_name()) {
            diag.zero();
        }

        if applier.has_overset() {
            timing::record_overset_reset(|| self.reset_overset(mesh, &applier))?;
        }

        timing::record_assembly(|| {
            self.algorithms
                .iter()
                .zip(&passes)
                .try_for_each(|(alg, objects)| {
                    log::debug!("{}: executing {} on {}", self.name, alg.name(), alg.part_name());
                    alg.execute(&ctx, objects)
                })
        })
    }

    /// Reset the owned rows of every inactive node. Runs to completion
    /// before any algorithm of the pass.
    fn reset_overset(&self, mesh: &Mesh, applier: &CoeffApplier) -> Result<(), AssemblyError> {
        let inactive: Vec<NodeId> = mesh
            .owned_nodes(self.rank)
            .filter(|&n| !applier.is_active(n))
            .collect();
        if inactive.is_empty() {
            return Ok(());
        }
        log::debug!("{}: resetting {} overset rows", self.name, inactive.len());
        let mut rhs = DVector::zeros(inactive.len() * self.dofs_per_node);
        let mut lhs = DMatrix::zeros(0, 0);
        applier.reset_overset_rows(&inactive, &mut rhs, &mut lhs)
    }
}

impl std::fmt::Debug for EquationSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EquationSystem")
            .field("name", &self.name)
            .field("dofs_per_node", &self.dofs_per_node)
            .field("options", &self.options)
            .field("rank", &self.rank)
            .field("algorithms", &self.algorithms.len())
            .finish()
    }
}
