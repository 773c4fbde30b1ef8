use crate::assembly::{
    register_part_connectivity, run_object_loop, validate_pass, AssemblyContext, AssemblyError,
    ConnectivityCache, SolverAlgorithm,
};
use crate::discretization::mesh::{Mesh, MeshObject};
use crate::numerics::sparse::GraphBuilder;
use crate::physics::{ElemDataRequests, Kernel};

/// Element loop over a volume part running a list of kernels.
///
/// Kernels share one gather per element; their contributions add into the
/// same local blocks before a single apply.
pub struct AssembleElemSolverAlgorithm {
    part_name: String,
    dofs_per_node: usize,
    implicit: bool,
    kernels: Vec<Box<dyn Kernel>>,
    requests: ElemDataRequests,
    cache: Option<ConnectivityCache>,
}

impl AssembleElemSolverAlgorithm {
    pub fn new(part_name: impl Into<String>, dofs_per_node: usize) -> Self {
        Self {
            part_name: part_name.into(),
            dofs_per_node,
            implicit: true,
            kernels: Vec::new(),
            requests: ElemDataRequests::default(),
            cache: None,
        }
    }

    /// Assemble the rhs only.
    pub fn explicit(mut self) -> Self {
        self.implicit = false;
        self
    }

    pub fn add_kernel(&mut self, kernel: Box<dyn Kernel>) {
        self.requests.merge(&kernel.data_requests());
        self.kernels.push(kernel);
    }

    pub fn with_kernel(mut self, kernel: impl Kernel + 'static) -> Self {
        self.add_kernel(Box::new(kernel));
        self
    }

    pub fn kernel_names(&self) -> Vec<&str> {
        self.kernels.iter().map(|k| k.name()).collect()
    }

    pub fn connectivity(&self) -> Option<&ConnectivityCache> {
        self.cache.as_ref()
    }
}

impl SolverAlgorithm for AssembleElemSolverAlgorithm {
    fn name(&self) -> &str {
        "assemble_elem"
    }

    fn part_name(&self) -> &str {
        &self.part_name
    }

    fn initialize_connectivity(
        &mut self,
        mesh: &Mesh,
        graph: &mut GraphBuilder,
    ) -> Result<(), AssemblyError> {
        self.cache = Some(register_part_connectivity(
            mesh,
            &self.part_name,
            self.dofs_per_node,
            graph,
        )?);
        Ok(())
    }

    fn validate(&self, ctx: &AssemblyContext<'_>) -> Result<Vec<MeshObject>, AssemblyError> {
        if let Some(k) = self
            .kernels
            .iter()
            .find(|k| k.dofs_per_node() != self.dofs_per_node)
        {
            return Err(AssemblyError::DofMismatch {
                expected: self.dofs_per_node,
                found: k.dofs_per_node(),
            });
        }
        validate_pass(ctx, &self.part_name, self.cache.as_ref(), &self.requests)
    }

    fn execute(
        &self,
        ctx: &AssemblyContext<'_>,
        objects: &[MeshObject],
    ) -> Result<(), AssemblyError> {
        log::debug!(
            "{}: {} elements of {} on rank {}, kernels {:?}",
            self.name(),
            objects.len(),
            self.part_name,
            ctx.rank,
            self.kernel_names()
        );

        run_object_loop(
            ctx,
            objects,
            &self.requests,
            self.implicit,
            self.name(),
            |lhs, rhs, object, views| {
                for k in &self.kernels {
                    k.execute(lhs, rhs, object, views);
                }
            },
        )
    }
}
