use nalgebra::{DMatrix, DVector};

use crate::assembly::AssemblyError;
use crate::discretization::fields::Field;
use crate::discretization::master_element::{Tet4Scv, Topology};
use crate::discretization::mesh::{Mesh, MeshObject, NodeId};
use crate::numerics::sparse::SharedContribution;
use crate::physics::ElemDataRequests;

/// Per-object data gathered for the kernels.
#[derive(Debug, Default)]
pub struct ScratchViews {
    pub nodes: Vec<NodeId>,
    nodal: Vec<(Field, usize, Vec<f64>)>,
    entity: Vec<(Field, usize, Vec<f64>)>,
    pub scv_volume: Vec<f64>,
}

impl ScratchViews {
    pub fn new(requests: &ElemDataRequests) -> Self {
        Self {
            nodes: Vec::new(),
            nodal: requests
                .nodal_fields
                .iter()
                .map(|(f, c)| (f.clone(), *c, Vec::new()))
                .collect(),
            entity: requests
                .entity_fields
                .iter()
                .map(|(f, c)| (f.clone(), *c, Vec::new()))
                .collect(),
            scv_volume: Vec::new(),
        }
    }

    /// Gathered nodal values, `[node * components + component]`.
    pub fn nodal(&self, name: &str) -> Option<&[f64]> {
        self.nodal
            .iter()
            .find(|(f, _, _)| f.name() == name)
            .map(|(_, _, v)| v.as_slice())
    }

    /// Values of a face or element field on the current object.
    pub fn entity(&self, name: &str) -> Option<&[f64]> {
        self.entity
            .iter()
            .find(|(f, _, _)| f.name() == name)
            .map(|(_, _, v)| v.as_slice())
    }

    /// Fill every requested view for `object`.
    pub fn gather(
        &mut self,
        mesh: &Mesh,
        object: MeshObject,
        requests: &ElemDataRequests,
    ) -> Result<(), AssemblyError> {
        self.nodes.clear();
        self.nodes.extend_from_slice(mesh.connected_nodes(object));

        for (name, comps, buf) in &mut self.nodal {
            let field = mesh.fields.real(name.name()).ok_or_else(|| missing(name))?;
            buf.clear();
            for &node in &self.nodes {
                buf.extend_from_slice(&field.entity(node)[..*comps]);
            }
        }

        for (name, comps, buf) in &mut self.entity {
            let field = mesh.fields.real(name.name()).ok_or_else(|| missing(name))?;
            buf.clear();
            buf.extend_from_slice(&field.entity(object.index)[..*comps]);
        }

        self.scv_volume.clear();
        let is_tet = mesh.entity(object).is_some_and(|e| e.topology == Topology::Tet4);
        if requests.scv_volume && is_tet {
            let coords: Vec<[f64; 3]> = self
                .nodes
                .iter()
                .map(|&n| mesh.node_coordinates(n))
                .collect();
            self.scv_volume.resize(Tet4Scv::NUM_IP, 0.0);
            Tet4Scv.scv_volume(&coords, &mut self.scv_volume);
        }
        Ok(())
    }
}

fn missing(name: &Field) -> AssemblyError {
    AssemblyError::MissingField {
        field: name.to_string(),
    }
}

/// Everything one worker needs for one object, reused across objects.
#[derive(Debug)]
pub struct TeamScratch {
    pub views: ScratchViews,
    pub scratch_ids: Vec<usize>,
    pub sort_permutation: Vec<usize>,
    pub rhs: DVector<f64>,
    pub lhs: DMatrix<f64>,
    /// Rows owned by other ranks, kept for the whole loop.
    pub outbox: Vec<SharedContribution>,
}

impl TeamScratch {
    pub fn new(requests: &ElemDataRequests) -> Self {
        Self {
            views: ScratchViews::new(requests),
            scratch_ids: Vec::new(),
            sort_permutation: Vec::new(),
            rhs: DVector::zeros(0),
            lhs: DMatrix::zeros(0, 0),
            outbox: Vec::new(),
        }
    }

    /// Size and zero the local blocks for an object with `n` dofs.
    /// An explicit pass gets an empty `lhs`. The outbox is left alone.
    pub fn acquire(&mut self, n: usize, implicit: bool) {
        if self.rhs.len() == n {
            self.rhs.fill(0.0);
        } else {
            self.rhs = DVector::zeros(n);
        }
        let m = if implicit { n } else { 0 };
        if self.lhs.nrows() == m {
            self.lhs.fill(0.0);
        } else {
            self.lhs = DMatrix::zeros(m, m);
        }
        self.scratch_ids.clear();
        self.sort_permutation.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discretization::fields::names;
    use crate::discretization::generator::create_single_tet_mesh;

    const UNIT_TET: [[f64; 3]; 4] = [
        [0.0, 0.0, 0.0],
        [1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
        [0.0, 0.0, 1.0],
    ];

    #[test]
    fn gather_fills_coordinates_and_scv_volume() {
        let mesh = create_single_tet_mesh(UNIT_TET);
        let mut req = ElemDataRequests::default();
        req.add_gathered_nodal_field(names::COORDINATES, 3);
        req.add_scv_volume();
        let mut views = ScratchViews::new(&req);
        views.gather(&mesh, MeshObject::element(0), &req).unwrap();
        assert_eq!(views.nodal(names::COORDINATES).unwrap()[3..6], [1.0, 0.0, 0.0]);
        assert_eq!(views.scv_volume, vec![1.0 / 24.0; 4]);
    }

    #[test]
    fn acquire_resets_previous_contents() {
        let mut scratch = TeamScratch::new(&ElemDataRequests::default());
        scratch.acquire(4, true);
        scratch.rhs[1] = 3.0;
        scratch.lhs[(2, 2)] = 1.0;
        scratch.acquire(4, true);
        assert_eq!(scratch.rhs.sum(), 0.0);
        assert_eq!(scratch.lhs.sum(), 0.0);
        scratch.outbox.push(SharedContribution {
            row: 7,
            rhs: 1.0,
            cols: Vec::new(),
            values: Vec::new(),
        });
        scratch.acquire(3, false);
        assert_eq!(scratch.lhs.shape(), (0, 0));
        assert_eq!(scratch.outbox.len(), 1);
    }
}
