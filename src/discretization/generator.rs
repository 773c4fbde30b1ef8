use glam::DVec3;
use serde::{Deserialize, Serialize};

use super::master_element::{Tet4Scv, Topology};
use super::mesh::{Entity, Mesh, Node, Part};

pub const BLOCK_PART: &str = "block_1";

/// Box mesh description: `divisions` hexahedral cells per direction, each
/// split into six tetrahedra, and slab ownership across `num_ranks` along x.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxMeshSpec {
    #[serde(default = "default_divisions")]
    pub divisions: [usize; 3],
    #[serde(default = "default_lengths")]
    pub lengths: [f64; 3],
    #[serde(default = "default_origin")]
    pub origin: [f64; 3],
    #[serde(default = "default_ranks")]
    pub num_ranks: usize,
}

fn default_divisions() -> [usize; 3] {
    [4, 4, 4]
}

fn default_lengths() -> [f64; 3] {
    [1.0, 1.0, 1.0]
}

fn default_origin() -> [f64; 3] {
    [0.0, 0.0, 0.0]
}

fn default_ranks() -> usize {
    1
}

impl Default for BoxMeshSpec {
    fn default() -> Self {
        Self {
            divisions: default_divisions(),
            lengths: default_lengths(),
            origin: default_origin(),
            num_ranks: default_ranks(),
        }
    }
}

impl BoxMeshSpec {
    pub fn cube(n: usize) -> Self {
        Self {
            divisions: [n, n, n],
            ..Default::default()
        }
    }

    pub fn with_ranks(mut self, num_ranks: usize) -> Self {
        self.num_ranks = num_ranks.max(1);
        self
    }

    fn slab_owner(&self, x: f64) -> usize {
        let ranks = self.num_ranks.max(1);
        let t = (x - self.origin[0]) / self.lengths[0];
        ((t * ranks as f64).floor().max(0.0) as usize).min(ranks - 1)
    }
}

/// Names of the six boundary parts, in (axis, side) order.
pub const SURFACE_PARTS: [&str; 6] = [
    "surface_xmin",
    "surface_xmax",
    "surface_ymin",
    "surface_ymax",
    "surface_zmin",
    "surface_zmax",
];

/// Axis permutations defining the six tetrahedra around the main diagonal.
const KUHN_PATHS: [[usize; 3]; 6] = [
    [0, 1, 2],
    [0, 2, 1],
    [1, 0, 2],
    [1, 2, 0],
    [2, 0, 1],
    [2, 1, 0],
];

/// Build a conforming tetrahedral mesh of a box.
///
/// Every cell uses the same diagonal, so shared faces match between
/// neighbours and each boundary quad is cut along its low-to-high diagonal.
pub fn create_box_mesh(spec: &BoxMeshSpec) -> Mesh {
    let [nx, ny, nz] = spec.divisions.map(|d| d.max(1));
    let (px, py) = (nx + 1, ny + 1);
    let node_index = |i: usize, j: usize, k: usize| i + px * (j + py * k);
    let origin = DVec3::from_array(spec.origin);
    let h = DVec3::new(
        spec.lengths[0] / nx as f64,
        spec.lengths[1] / ny as f64,
        spec.lengths[2] / nz as f64,
    );

    let mut coordinates = Vec::with_capacity(px * py * (nz + 1));
    let mut nodes = Vec::with_capacity(coordinates.capacity());
    for k in 0..=nz {
        for j in 0..=ny {
            for i in 0..=nx {
                let x = origin + h * DVec3::new(i as f64, j as f64, k as f64);
                nodes.push(Node {
                    global_id: nodes.len() + 1,
                    owner: spec.slab_owner(x.x),
                });
                coordinates.push(x.to_array());
            }
        }
    }

    let mut mesh = Mesh::new(nodes, &coordinates, spec.num_ranks);

    let mut block = Vec::new();
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let base = [i, j, k];
                let centroid = origin + h * (DVec3::new(i as f64, j as f64, k as f64) + 0.5);
                for path in KUHN_PATHS {
                    let mut corner = base;
                    let mut tet = vec![node_index(corner[0], corner[1], corner[2])];
                    for &axis in &path {
                        corner[axis] += 1;
                        tet.push(node_index(corner[0], corner[1], corner[2]));
                    }
                    let xyz: Vec<[f64; 3]> = tet.iter().map(|&n| coordinates[n]).collect();
                    if Tet4Scv::volume(&xyz) < 0.0 {
                        tet.swap(1, 2);
                    }
                    block.push(mesh.elements.len());
                    mesh.elements.push(Entity {
                        topology: Topology::Tet4,
                        nodes: tet,
                        owner: spec.slab_owner(centroid.x),
                    });
                }
            }
        }
    }
    mesh.add_part(Part {
        name: BLOCK_PART.to_string(),
        topology: Topology::Tet4,
        objects: block,
    });

    let n = [nx, ny, nz];
    for axis in 0..3 {
        let (a, b) = ((axis + 1) % 3, (axis + 2) % 3);
        for side in 0..2 {
            let plane = side * n[axis];
            let mut outward = [0.0; 3];
            outward[axis] = if side == 0 { -1.0 } else { 1.0 };
            let outward = DVec3::from_array(outward);

            let mut objects = Vec::new();
            for v in 0..n[b] {
                for u in 0..n[a] {
                    let at = |du: usize, dv: usize| {
                        let mut ijk = [0; 3];
                        ijk[axis] = plane;
                        ijk[a] = u + du;
                        ijk[b] = v + dv;
                        node_index(ijk[0], ijk[1], ijk[2])
                    };
                    let quad = [at(0, 0), at(1, 0), at(1, 1), at(0, 1)];
                    for tri in [[quad[0], quad[1], quad[2]], [quad[0], quad[2], quad[3]]] {
                        let mut tri = tri.to_vec();
                        let p: Vec<DVec3> =
                            tri.iter().map(|&n| DVec3::from_array(coordinates[n])).collect();
                        if (p[1] - p[0]).cross(p[2] - p[0]).dot(outward) < 0.0 {
                            tri.swap(1, 2);
                        }
                        let centroid = (p[0] + p[1] + p[2]) / 3.0;
                        objects.push(mesh.faces.len());
                        mesh.faces.push(Entity {
                            topology: Topology::Tri3,
                            nodes: tri,
                            owner: spec.slab_owner(centroid.x),
                        });
                    }
                }
            }
            mesh.add_part(Part {
                name: SURFACE_PARTS[2 * axis + side].to_string(),
                topology: Topology::Tri3,
                objects,
            });
        }
    }

    mesh.compute_exposed_area_vectors();
    mesh
}

/// A mesh made of one tetrahedron (`block_1`) and its four faces (`surface_1`).
pub fn create_single_tet_mesh(coordinates: [[f64; 3]; 4]) -> Mesh {
    let nodes = (0..4).map(|i| Node { global_id: i + 1, owner: 0 }).collect();
    let mut mesh = Mesh::new(nodes, &coordinates, 1);

    let mut tet = vec![0, 1, 2, 3];
    if Tet4Scv::volume(&coordinates) < 0.0 {
        tet.swap(1, 2);
    }
    mesh.elements.push(Entity {
        topology: Topology::Tet4,
        nodes: tet.clone(),
        owner: 0,
    });
    mesh.add_part(Part {
        name: BLOCK_PART.to_string(),
        topology: Topology::Tet4,
        objects: vec![0],
    });

    // faces opposite each vertex, ordered to point away from it
    let faces = [
        [tet[1], tet[2], tet[3]],
        [tet[0], tet[3], tet[2]],
        [tet[0], tet[1], tet[3]],
        [tet[0], tet[2], tet[1]],
    ];
    for face in faces {
        mesh.faces.push(Entity {
            topology: Topology::Tri3,
            nodes: face.to_vec(),
            owner: 0,
        });
    }
    mesh.add_part(Part {
        name: "surface_1".to_string(),
        topology: Topology::Tri3,
        objects: (0..4).collect(),
    });

    mesh.compute_exposed_area_vectors();
    mesh
}
