//! Assembly of mesh-object contributions into the global linear system.
//!
//! A [`SolverAlgorithm`] is bound to one mesh part. Its
//! `initialize_connectivity` registers the part's coupling with the equation
//! system graph and caches topology constants; `validate` lists the objects
//! this rank owns and `execute` evaluates their local blocks and hands them
//! to the [`CoeffApplier`].

pub mod coeff_applier;
pub mod elem;
pub mod equation_system;
pub mod irrad_wall;
pub mod scratch;

use nalgebra::{DMatrix, DVector};
use thiserror::Error;

use crate::discretization::master_element::Topology;
use crate::discretization::mesh::{Mesh, MeshObject, NodeId};
use crate::numerics::exec::ExecutionSpace;
use crate::numerics::sparse::{GraphBuilder, SharedContribution, SparseError};
use crate::physics::ElemDataRequests;

pub use coeff_applier::CoeffApplier;
pub use elem::AssembleElemSolverAlgorithm;
pub use equation_system::{EquationSystem, EquationSystemOptions};
pub use irrad_wall::AssembleHeatCondIrradWallSolverAlgorithm;
pub use scratch::{ScratchViews, TeamScratch};

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("{part}: object {object} has {found} connected nodes, expected {expected}")]
    TopologyPrecondition {
        part: String,
        object: usize,
        expected: usize,
        found: usize,
    },
    #[error("local block has size {found}, expected {expected}")]
    DofMismatch { expected: usize, found: usize },
    #[error("required field `{field}` is not registered")]
    MissingField { field: String },
    #[error("node {node} is not present on this mesh")]
    UnknownNode { node: NodeId },
    #[error("mesh part `{0}` does not exist")]
    UnknownPart(String),
    #[error("{0}: mesh topology changed since connectivity was initialized")]
    StaleConnectivity(String),
    #[error("{0}: execute called before initialize_connectivity")]
    ConnectivityNotInitialized(String),
    #[error("equation system `{0}` has no linear system yet")]
    NoLinearSystem(String),
    #[error(transparent)]
    Sparse(#[from] SparseError),
}

/// What an algorithm sees during one assembly pass.
pub struct AssemblyContext<'a> {
    pub mesh: &'a Mesh,
    pub applier: &'a CoeffApplier,
    pub exec: ExecutionSpace,
    /// Rank whose owned objects are assembled.
    pub rank: usize,
}

/// Assembly of one part's contribution into an equation system.
pub trait SolverAlgorithm: Send + Sync {
    fn name(&self) -> &str;

    fn part_name(&self) -> &str;

    /// Register connectivity and cache topology constants. Calling it again
    /// without a topology change leaves the cached state unchanged.
    fn initialize_connectivity(
        &mut self,
        mesh: &Mesh,
        graph: &mut GraphBuilder,
    ) -> Result<(), AssemblyError>;

    /// Check every precondition of `execute` without touching the linear
    /// system; returns the objects the pass would visit.
    fn validate(&self, ctx: &AssemblyContext<'_>) -> Result<Vec<MeshObject>, AssemblyError>;

    /// Run one assembly pass over `objects`, as returned by `validate` for
    /// the same context.
    fn execute(
        &self,
        ctx: &AssemblyContext<'_>,
        objects: &[MeshObject],
    ) -> Result<(), AssemblyError>;
}

/// Topology constants cached by `initialize_connectivity`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectivityCache {
    pub part: String,
    pub topology: Topology,
    pub nodes_per_object: usize,
    pub num_objects: usize,
    pub dofs_per_node: usize,
    pub revision: u64,
}

/// Global row of a node dof.
#[inline]
pub fn global_row(global_id: usize, dofs_per_node: usize, dof: usize) -> usize {
    (global_id - 1) * dofs_per_node + dof
}

/// Couple the rows of every object of `part_name`, owned or not, so rows
/// shared with other ranks exist in each owner's graph.
pub fn register_part_connectivity(
    mesh: &Mesh,
    part_name: &str,
    dofs_per_node: usize,
    graph: &mut GraphBuilder,
) -> Result<ConnectivityCache, AssemblyError> {
    let part = mesh
        .part(part_name)
        .ok_or_else(|| AssemblyError::UnknownPart(part_name.to_string()))?;

    let mut rows = Vec::with_capacity(part.topology.nodes_per_entity() * dofs_per_node);
    for object in mesh.objects(part) {
        rows.clear();
        for &node in mesh.connected_nodes(object) {
            let gid = mesh.global_id(node);
            rows.extend((0..dofs_per_node).map(|d| global_row(gid, dofs_per_node, d)));
        }
        graph.add_connected_rows(&rows);
    }

    Ok(ConnectivityCache {
        part: part_name.to_string(),
        topology: part.topology,
        nodes_per_object: part.topology.nodes_per_entity(),
        num_objects: part.objects.len(),
        dofs_per_node,
        revision: mesh.topology_revision(),
    })
}

/// Check everything `execute` depends on before the first accumulation.
pub fn validate_pass(
    ctx: &AssemblyContext<'_>,
    name: &str,
    cache: Option<&ConnectivityCache>,
    requests: &ElemDataRequests,
) -> Result<Vec<MeshObject>, AssemblyError> {
    let cache = cache.ok_or_else(|| AssemblyError::ConnectivityNotInitialized(name.to_string()))?;
    if ctx.mesh.topology_revision() != cache.revision {
        return Err(AssemblyError::StaleConnectivity(name.to_string()));
    }
    if ctx.applier.dofs_per_node() != cache.dofs_per_node {
        return Err(AssemblyError::DofMismatch {
            expected: ctx.applier.dofs_per_node(),
            found: cache.dofs_per_node,
        });
    }
    requests.validate(ctx.mesh)?;

    let part = ctx
        .mesh
        .part(&cache.part)
        .ok_or_else(|| AssemblyError::UnknownPart(cache.part.clone()))?;
    let objects = ctx.mesh.owned_objects(part, ctx.rank);
    for &object in &objects {
        let found = ctx.mesh.connected_nodes(object).len();
        if found == 0 || found != cache.nodes_per_object {
            return Err(AssemblyError::TopologyPrecondition {
                part: cache.part.clone(),
                object: object.index,
                expected: cache.nodes_per_object,
                found,
            });
        }
    }
    Ok(objects)
}

/// Gather, evaluate and apply every object of a validated pass.
///
/// `compute` fills the zeroed local blocks of one object; an explicit
/// algorithm leaves `lhs` empty by passing `implicit = false`. Rows owned
/// elsewhere stay in the team outboxes until the loop is done and are then
/// parked with the linear system in one call.
pub fn run_object_loop<F>(
    ctx: &AssemblyContext<'_>,
    objects: &[MeshObject],
    requests: &ElemDataRequests,
    implicit: bool,
    trace_tag: &str,
    compute: F,
) -> Result<(), AssemblyError>
where
    F: Fn(&mut DMatrix<f64>, &mut DVector<f64>, MeshObject, &ScratchViews) + Sync + Send,
{
    let ndof = ctx.applier.dofs_per_node();
    let teams = ctx.exec.for_each(
        objects,
        || TeamScratch::new(requests),
        |scratch, &object| {
            let n = ctx.mesh.connected_nodes(object).len() * ndof;
            scratch.acquire(n, implicit);
            let TeamScratch {
                views,
                scratch_ids,
                sort_permutation,
                rhs,
                lhs,
                outbox,
            } = scratch;
            views.gather(ctx.mesh, object, requests)?;
            compute(lhs, rhs, object, views);
            ctx.applier.apply(
                &views.nodes,
                scratch_ids,
                sort_permutation,
                rhs,
                lhs,
                outbox,
                trace_tag,
            )
        },
    )?;

    let shared: Vec<SharedContribution> = teams.into_iter().flat_map(|t| t.outbox).collect();
    if !shared.is_empty() {
        log::trace!("{trace_tag}: {} rows parked for other ranks", shared.len());
    }
    ctx.applier.park_shared(shared);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discretization::generator::{create_box_mesh, BoxMeshSpec, BLOCK_PART};

    #[test]
    fn global_rows_interleave_dofs() {
        assert_eq!(global_row(1, 1, 0), 0);
        assert_eq!(global_row(3, 2, 1), 5);
    }

    #[test]
    fn registration_caches_part_topology() {
        let mesh = create_box_mesh(&BoxMeshSpec::cube(2));
        let mut graph = GraphBuilder::new(0..mesh.num_nodes());
        let cache = register_part_connectivity(&mesh, BLOCK_PART, 1, &mut graph).unwrap();
        assert_eq!(cache.topology, Topology::Tet4);
        assert_eq!(cache.nodes_per_object, 4);
        assert_eq!(cache.num_objects, 48);
        assert!(matches!(
            register_part_connectivity(&mesh, "nope", 1, &mut graph),
            Err(AssemblyError::UnknownPart(_))
        ));
    }
}
