pub mod bc;
pub mod diffusion;
pub mod source;

use nalgebra::{DMatrix, DVector};

use crate::assembly::{AssemblyError, ScratchViews};
use crate::discretization::fields::Field;
use crate::discretization::mesh::{EntityRank, Mesh, MeshObject};

pub use diffusion::SteadyThermalDiffusionElemKernel;
pub use source::SteadyThermal3dContactSrcElemKernel;

/// Data a kernel needs gathered before it runs on an object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElemDataRequests {
    /// Node fields and the number of components to gather.
    pub nodal_fields: Vec<(Field, usize)>,
    /// Face or element fields read on the object itself.
    pub entity_fields: Vec<(Field, usize)>,
    pub scv_volume: bool,
}

impl ElemDataRequests {
    pub fn add_gathered_nodal_field(&mut self, name: impl Into<Field>, components: usize) {
        add_unique(&mut self.nodal_fields, name.into(), components);
    }

    pub fn add_entity_field(&mut self, name: impl Into<Field>, components: usize) {
        add_unique(&mut self.entity_fields, name.into(), components);
    }

    pub fn add_scv_volume(&mut self) {
        self.scv_volume = true;
    }

    pub fn merge(&mut self, other: &ElemDataRequests) {
        for (f, c) in &other.nodal_fields {
            add_unique(&mut self.nodal_fields, f.clone(), *c);
        }
        for (f, c) in &other.entity_fields {
            add_unique(&mut self.entity_fields, f.clone(), *c);
        }
        self.scv_volume |= other.scv_volume;
    }

    /// Every requested field must be registered with enough components.
    pub fn validate(&self, mesh: &Mesh) -> Result<(), AssemblyError> {
        let check = |(name, comps): &(Field, usize), node_rank: bool| {
            let ok = mesh.fields.real(name.name()).is_some_and(|f| {
                f.components >= *comps && (f.rank == EntityRank::Node) == node_rank
            });
            if ok {
                Ok(())
            } else {
                Err(AssemblyError::MissingField {
                    field: name.to_string(),
                })
            }
        };
        self.nodal_fields.iter().try_for_each(|r| check(r, true))?;
        self.entity_fields.iter().try_for_each(|r| check(r, false))
    }
}

fn add_unique(list: &mut Vec<(Field, usize)>, name: Field, components: usize) {
    match list.iter_mut().find(|(f, _)| *f == name) {
        Some((_, c)) => *c = (*c).max(components),
        None => list.push((name, components)),
    }
}

/// Local contribution of one physics term on one mesh object.
///
/// Kernels are pure: they read gathered data from the views and add into
/// the zeroed local blocks. `rhs` holds the negated residual and `lhs` its
/// derivative with respect to the local unknowns; `lhs` is empty when the
/// owning algorithm is explicit.
pub trait Kernel: Send + Sync {
    fn name(&self) -> &str;

    fn data_requests(&self) -> ElemDataRequests;

    fn dofs_per_node(&self) -> usize {
        1
    }

    fn execute(
        &self,
        lhs: &mut DMatrix<f64>,
        rhs: &mut DVector<f64>,
        object: MeshObject,
        views: &ScratchViews,
    );
}
