//! Master elements for the CVFEM sub-control volumes and sub-control surfaces.
//!
//! Only the linear topologies used by the generator are provided: the Tet4
//! volume element and the Tri3 boundary face. Integration points sit at the
//! centroids of the sub-control volumes (surfaces) in isoparametric space and
//! each one is associated with the node whose dual volume contains it.

use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::discretization::mesh::EntityRank;

/// Cell topology of a mesh object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topology {
    Tet4,
    Tri3,
}

impl Topology {
    pub const fn nodes_per_entity(self) -> usize {
        match self {
            Topology::Tet4 => Tet4Scv::NODES,
            Topology::Tri3 => Tri3Scs::NODES,
        }
    }

    pub const fn rank(self) -> EntityRank {
        match self {
            Topology::Tet4 => EntityRank::Element,
            Topology::Tri3 => EntityRank::Face,
        }
    }
}

/// Sub-control-volume master element of the linear tetrahedron.
#[derive(Debug, Clone, Copy, Default)]
pub struct Tet4Scv;

impl Tet4Scv {
    pub const NUM_IP: usize = 4;
    pub const NODES: usize = 4;

    const SEVENTEEN_96THS: f64 = 17.0 / 96.0;
    const FORTYFIVE_96THS: f64 = 45.0 / 96.0;

    /// Isoparametric coordinates of the sub-control-volume centroids.
    pub const INTG_LOC: [[f64; 3]; 4] = [
        [Self::SEVENTEEN_96THS, Self::SEVENTEEN_96THS, Self::SEVENTEEN_96THS],
        [Self::FORTYFIVE_96THS, Self::SEVENTEEN_96THS, Self::SEVENTEEN_96THS],
        [Self::SEVENTEEN_96THS, Self::FORTYFIVE_96THS, Self::SEVENTEEN_96THS],
        [Self::SEVENTEEN_96THS, Self::SEVENTEEN_96THS, Self::FORTYFIVE_96THS],
    ];

    pub fn ip_node_map(&self) -> &'static [usize] {
        &[0, 1, 2, 3]
    }

    /// Shape functions at every integration point, `[ip][node]`.
    pub fn shape_fcn(&self) -> [[f64; 4]; 4] {
        Self::INTG_LOC.map(|[xi, eta, zeta]| [1.0 - xi - eta - zeta, xi, eta, zeta])
    }

    /// Shape functions collocated at the nodes (lumped).
    pub fn shifted_shape_fcn(&self) -> [[f64; 4]; 4] {
        let mut n = [[0.0; 4]; 4];
        for (ip, row) in n.iter_mut().enumerate() {
            row[ip] = 1.0;
        }
        n
    }

    /// Signed element volume.
    pub fn volume(coords: &[[f64; 3]]) -> f64 {
        let x0 = DVec3::from_array(coords[0]);
        let a = DVec3::from_array(coords[1]) - x0;
        let b = DVec3::from_array(coords[2]) - x0;
        let c = DVec3::from_array(coords[3]) - x0;
        a.dot(b.cross(c)) / 6.0
    }

    /// Sub-control-volume measures. On a linear tetrahedron the median-dual
    /// partition splits the element into four pieces of equal volume.
    pub fn scv_volume(&self, coords: &[[f64; 3]], out: &mut [f64]) {
        let quarter = Self::volume(coords) / 4.0;
        out[..Self::NUM_IP].fill(quarter);
    }
}

/// Sub-control-surface master element of the linear boundary triangle.
#[derive(Debug, Clone, Copy, Default)]
pub struct Tri3Scs;

impl Tri3Scs {
    pub const NUM_IP: usize = 3;
    pub const NODES: usize = 3;

    const SEVEN_36THS: f64 = 7.0 / 36.0;
    const ELEVEN_18THS: f64 = 11.0 / 18.0;

    pub const INTG_LOC: [[f64; 2]; 3] = [
        [Self::SEVEN_36THS, Self::SEVEN_36THS],
        [Self::ELEVEN_18THS, Self::SEVEN_36THS],
        [Self::SEVEN_36THS, Self::ELEVEN_18THS],
    ];

    pub fn ip_node_map(&self) -> &'static [usize] {
        &[0, 1, 2]
    }

    pub fn shape_fcn(&self) -> [[f64; 3]; 3] {
        Self::INTG_LOC.map(|[xi, eta]| [1.0 - xi - eta, xi, eta])
    }

    pub fn shifted_shape_fcn(&self) -> [[f64; 3]; 3] {
        [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]
    }

    /// Area vector of each sub-control surface; the face normal follows the
    /// right-hand rule on the node ordering.
    pub fn exposed_area_vectors(&self, coords: &[[f64; 3]]) -> [[f64; 3]; 3] {
        let x0 = DVec3::from_array(coords[0]);
        let x1 = DVec3::from_array(coords[1]);
        let x2 = DVec3::from_array(coords[2]);
        let third = 0.5 * (x1 - x0).cross(x2 - x0) / 3.0;
        [third.to_array(); 3]
    }
}
