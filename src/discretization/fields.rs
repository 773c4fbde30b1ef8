use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use crate::discretization::mesh::EntityRank;
use crate::numerics::atomic::{self, AtomicF64};

/// Field identifier stored as a runtime string.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Field(pub Arc<str>);

impl Field {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl<T: Into<Arc<str>>> From<T> for Field {
    fn from(name: T) -> Self {
        Field::new(name)
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Names of the fields the heat-conduction algorithms touch.
pub mod names {
    pub const COORDINATES: &str = "coordinates";
    pub const TEMPERATURE: &str = "temperature";
    pub const IRRADIATION: &str = "irradiation";
    pub const EMISSIVITY: &str = "emissivity";
    pub const EXPOSED_AREA_VECTOR: &str = "exposed_area_vector";
    pub const IBLANK: &str = "iblank";
}

/// Entity-rank data with a fixed number of components per entity.
#[derive(Clone, Debug)]
pub struct FieldData<T> {
    pub rank: EntityRank,
    pub components: usize,
    values: Vec<T>,
}

impl<T: Clone> FieldData<T> {
    pub fn new(rank: EntityRank, components: usize, entities: usize, init: T) -> Self {
        Self {
            rank,
            components,
            values: vec![init; components * entities],
        }
    }

    #[inline]
    pub fn get(&self, entity: usize, component: usize) -> &T {
        &self.values[entity * self.components + component]
    }

    #[inline]
    pub fn set(&mut self, entity: usize, component: usize, value: T) {
        self.values[entity * self.components + component] = value;
    }

    #[inline]
    pub fn entity(&self, entity: usize) -> &[T] {
        let start = entity * self.components;
        &self.values[start..start + self.components]
    }

    #[inline]
    pub fn entity_mut(&mut self, entity: usize) -> &mut [T] {
        let start = entity * self.components;
        &mut self.values[start..start + self.components]
    }

    pub fn len(&self) -> usize {
        if self.components == 0 {
            0
        } else {
            self.values.len() / self.components
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    pub fn fill(&mut self, value: T) {
        self.values.fill(value);
    }
}

pub type RealField = FieldData<f64>;
pub type IntField = FieldData<i32>;

/// Real field that many workers accumulate into at once.
#[derive(Debug)]
pub struct AtomicField {
    pub rank: EntityRank,
    pub components: usize,
    values: Vec<AtomicF64>,
}

impl AtomicField {
    pub fn new(rank: EntityRank, components: usize, entities: usize) -> Self {
        Self {
            rank,
            components,
            values: atomic::zeroed(components * entities),
        }
    }

    #[inline]
    pub fn add(&self, entity: usize, component: usize, value: f64) {
        self.values[entity * self.components + component].fetch_add(value);
    }

    #[inline]
    pub fn get(&self, entity: usize, component: usize) -> f64 {
        self.values[entity * self.components + component].load()
    }

    /// Number of entities.
    pub fn len(&self) -> usize {
        self.values.len() / self.components.max(1)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn zero(&self) {
        self.values.iter().for_each(|v| v.store(0.0));
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.values.iter().map(AtomicF64::load).collect()
    }
}

/// Owner of every field registered on a mesh.
///
/// Integer fields are kept behind `Arc` so a coefficient applier can hold the
/// overset mask for the duration of a pass; mutating one after that clones it.
#[derive(Debug, Default)]
pub struct FieldRepository {
    real: HashMap<Field, RealField>,
    int: HashMap<Field, Arc<IntField>>,
    atomic: HashMap<Field, Arc<AtomicField>>,
}

impl FieldRepository {
    /// Register (or replace) a real field filled with `init`.
    pub fn declare_real(
        &mut self,
        name: impl Into<Field>,
        rank: EntityRank,
        components: usize,
        entities: usize,
        init: f64,
    ) -> &mut RealField {
        let data = RealField::new(rank, components, entities, init);
        match self.real.entry(name.into()) {
            Entry::Occupied(mut slot) => {
                slot.insert(data);
                slot.into_mut()
            }
            Entry::Vacant(slot) => slot.insert(data),
        }
    }

    pub fn declare_int(
        &mut self,
        name: impl Into<Field>,
        rank: EntityRank,
        components: usize,
        entities: usize,
        init: i32,
    ) -> &mut IntField {
        let data = Arc::new(IntField::new(rank, components, entities, init));
        let slot = match self.int.entry(name.into()) {
            Entry::Occupied(mut slot) => {
                slot.insert(data);
                slot.into_mut()
            }
            Entry::Vacant(slot) => slot.insert(data),
        };
        Arc::make_mut(slot)
    }

    /// Register an atomic field, or return the existing one when rank,
    /// components and entity count all match. Any other shape replaces it.
    pub fn declare_atomic(
        &mut self,
        name: impl Into<Field>,
        rank: EntityRank,
        components: usize,
        entities: usize,
    ) -> Arc<AtomicField> {
        let field = name.into();
        let existing = self
            .atomic
            .get(&field)
            .filter(|f| f.rank == rank && f.components == components && f.len() == entities);
        if let Some(f) = existing {
            return Arc::clone(f);
        }
        let f = Arc::new(AtomicField::new(rank, components, entities));
        self.atomic.insert(field, Arc::clone(&f));
        f
    }

    pub fn real(&self, name: &str) -> Option<&RealField> {
        self.real.get(name)
    }

    pub fn real_mut(&mut self, name: &str) -> Option<&mut RealField> {
        self.real.get_mut(name)
    }

    pub fn int(&self, name: &str) -> Option<&Arc<IntField>> {
        self.int.get(name)
    }

    pub fn int_mut(&mut self, name: &str) -> Option<&mut IntField> {
        self.int.get_mut(name).map(Arc::make_mut)
    }

    pub fn atomic(&self, name: &str) -> Option<&Arc<AtomicField>> {
        self.atomic.get(name)
    }

}

impl std::borrow::Borrow<str> for Field {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn real_fields_are_addressed_by_entity_and_component() {
        let mut repo = FieldRepository::default();
        let f = repo.declare_real("velocity", EntityRank::Node, 3, 2, 0.0);
        f.set(1, 2, 4.0);
        assert_eq!(repo.real("velocity").unwrap().entity(1), &[0.0, 0.0, 4.0]);
        assert!(repo.real("pressure").is_none());
    }

    #[test]
    fn int_field_mutation_does_not_leak_into_held_snapshot() {
        let mut repo = FieldRepository::default();
        repo.declare_int(names::IBLANK, EntityRank::Node, 1, 3, 1);
        let held = Arc::clone(repo.int(names::IBLANK).unwrap());
        repo.int_mut(names::IBLANK).unwrap().set(0, 0, 0);
        assert_eq!(*held.get(0, 0), 1);
        assert_eq!(*repo.int(names::IBLANK).unwrap().get(0, 0), 0);
    }

    #[test]
    fn atomic_field_is_shared_between_declarations() {
        let mut repo = FieldRepository::default();
        let a = repo.declare_atomic("diag", EntityRank::Node, 1, 4);
        let b = repo.declare_atomic("diag", EntityRank::Node, 1, 4);
        a.add(2, 0, 1.5);
        assert_eq!(b.get(2, 0), 1.5);
    }

    #[test]
    fn atomic_field_is_reallocated_when_the_entity_count_changes() {
        let mut repo = FieldRepository::default();
        let short = repo.declare_atomic("diag", EntityRank::Node, 2, 4);
        short.add(3, 1, 2.0);
        let long = repo.declare_atomic("diag", EntityRank::Node, 2, 6);
        assert_eq!(long.len(), 6);
        assert_eq!(long.to_vec(), vec![0.0; 12]);
        long.add(5, 1, 1.0);
        assert!(Arc::ptr_eq(&long, repo.atomic("diag").unwrap()));
        assert_eq!(short.len(), 4);
    }
}
