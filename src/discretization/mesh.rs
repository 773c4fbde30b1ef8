use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::discretization::fields::{names, FieldRepository, RealField};
use crate::discretization::master_element::{Topology, Tri3Scs};

/// Local ordinal of a node on this process.
pub type NodeId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityRank {
    Node,
    Face,
    Element,
}

/// Handle to an element or face. Carries no data of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshObject {
    pub rank: EntityRank,
    pub index: usize,
}

impl MeshObject {
    pub fn element(index: usize) -> Self {
        Self {
            rank: EntityRank::Element,
            index,
        }
    }

    pub fn face(index: usize) -> Self {
        Self {
            rank: EntityRank::Face,
            index,
        }
    }
}

/// A node of the mesh. Coordinates live in the `coordinates` field.
#[derive(Debug, Clone)]
pub struct Node {
    /// 1-based identifier shared by every process.
    pub global_id: usize,
    /// Rank that owns the equation rows of this node.
    pub owner: usize,
}

/// An element or boundary face together with its connected nodes.
#[derive(Debug, Clone)]
pub struct Entity {
    pub topology: Topology,
    pub nodes: Vec<NodeId>,
    /// Rank that assembles this object.
    pub owner: usize,
}

/// A named subset of mesh objects sharing one topology.
#[derive(Debug, Clone)]
pub struct Part {
    pub name: String,
    pub topology: Topology,
    pub objects: Vec<usize>,
}

impl Part {
    pub fn rank(&self) -> EntityRank {
        self.topology.rank()
    }
}

/// The complete computational grid as seen by one process.
///
/// Every object is locally present; ownership decides which rank assembles it
/// and which rank holds a node's rows.
#[derive(Debug, Default)]
pub struct Mesh {
    pub nodes: Vec<Node>,
    pub elements: Vec<Entity>,
    pub faces: Vec<Entity>,
    pub parts: Vec<Part>,
    pub fields: FieldRepository,
    pub num_ranks: usize,
    revision: u64,
}

impl Mesh {
    pub fn new(nodes: Vec<Node>, coordinates: &[[f64; 3]], num_ranks: usize) -> Self {
        let mut fields = FieldRepository::default();
        let coords = fields.declare_real(
            names::COORDINATES,
            EntityRank::Node,
            3,
            nodes.len(),
            0.0,
        );
        for (n, xyz) in coordinates.iter().enumerate() {
            coords.entity_mut(n).copy_from_slice(xyz);
        }
        Self {
            nodes,
            fields,
            num_ranks: num_ranks.max(1),
            ..Default::default()
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn part(&self, name: &str) -> Option<&Part> {
        self.parts.iter().find(|p| p.name == name)
    }

    /// Add a part, replacing any part with the same name.
    pub fn add_part(&mut self, part: Part) {
        self.parts.retain(|p| p.name != part.name);
        self.parts.push(part);
    }

    pub fn entity(&self, object: MeshObject) -> Option<&Entity> {
        match object.rank {
            EntityRank::Element => self.elements.get(object.index),
            EntityRank::Face => self.faces.get(object.index),
            EntityRank::Node => None,
        }
    }

    /// Connected-node set of an object; empty for nodes and unknown handles.
    pub fn connected_nodes(&self, object: MeshObject) -> &[NodeId] {
        self.entity(object).map_or(&[][..], |e| e.nodes.as_slice())
    }

    /// Every object of `part`, including the ones other ranks assemble.
    pub fn objects(&self, part: &Part) -> Vec<MeshObject> {
        let rank = part.rank();
        part.objects
            .iter()
            .map(|&index| MeshObject { rank, index })
            .collect()
    }

    /// Objects of `part` assembled by `rank`.
    pub fn owned_objects(&self, part: &Part, rank: usize) -> Vec<MeshObject> {
        self.objects(part)
            .into_iter()
            .filter(|&o| self.entity(o).is_some_and(|e| e.owner == rank))
            .collect()
    }

    #[inline]
    pub fn global_id(&self, node: NodeId) -> usize {
        self.nodes[node].global_id
    }

    pub fn owned_nodes(&self, rank: usize) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(move |(_, n)| n.owner == rank)
            .map(|(i, _)| i)
    }

    pub fn coordinates(&self) -> Option<&RealField> {
        self.fields.real(names::COORDINATES)
    }

    pub fn node_coordinates(&self, node: NodeId) -> [f64; 3] {
        let mut xyz = [0.0; 3];
        if let Some(c) = self.coordinates() {
            xyz.copy_from_slice(c.entity(node));
        }
        xyz
    }

    /// Counter bumped by every topology change.
    pub fn topology_revision(&self) -> u64 {
        self.revision
    }

    /// Signal that connectivity changed; cached algorithm state becomes stale.
    pub fn mark_modified(&mut self) {
        self.revision += 1;
    }

    /// Compute the per-ip exposed area vectors of every boundary face.
    pub fn compute_exposed_area_vectors(&mut self) {
        let me = Tri3Scs;
        let ncomp = Tri3Scs::NUM_IP * 3;
        let areas: Vec<[[f64; 3]; 3]> = self
            .faces
            .iter()
            .map(|face| {
                let coords: Vec<[f64; 3]> =
                    face.nodes.iter().map(|&n| self.node_coordinates(n)).collect();
                me.exposed_area_vectors(&coords)
            })
            .collect();

        let field = self.fields.declare_real(
            names::EXPOSED_AREA_VECTOR,
            EntityRank::Face,
            ncomp,
            areas.len(),
            0.0,
        );
        for (f, a) in areas.iter().enumerate() {
            field.entity_mut(f).copy_from_slice(&a.concat());
        }
    }

    /// Number of objects each rank assembles in every part.
    pub fn ownership_summary(&self) -> HashMap<String, Vec<usize>> {
        self.parts
            .iter()
            .map(|part| {
                let mut counts = vec![0; self.num_ranks];
                for o in self.objects(part) {
                    if let Some(e) = self.entity(o) {
                        counts[e.owner.min(self.num_ranks - 1)] += 1;
                    }
                }
                (part.name.clone(), counts)
            })
            .collect()
    }
}
