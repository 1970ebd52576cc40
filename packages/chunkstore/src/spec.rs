//! Entity specs: the canonical description of an archetype's component set.

use std::fmt::{self, Debug, Formatter};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::component::{lookup, Component, ComponentType, ComponentTypeID};
use crate::component_set::{self, canonical_id};
use crate::error::{Result, StoreError};

/// The order-independent hash of a component set.
///
/// Two specs built from the same types in any order share a `SpecId`.
/// Different sets may collide, so a `SpecId` alone never identifies an
/// archetype.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpecId(u32);

impl SpecId {
    /// Return the raw hash.
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// An immutable, sorted set of component types.
///
/// The entity handle column every chunk carries is implied and never part of
/// a spec.
#[derive(Clone)]
pub struct EntitySpec {
    component_types: Arc<[ComponentType]>,
    entity_size: usize,
    id: SpecId,
}

impl EntitySpec {
    /// Build a spec from component descriptions given in any order.
    ///
    /// Fails on an empty set, on a type occurring twice, and on the reserved
    /// entity handle type.
    pub fn new(component_types: impl IntoIterator<Item = ComponentType>) -> Result<EntitySpec> {
        let mut component_types: Vec<_> = component_types.into_iter().collect();
        if component_types.is_empty() {
            return Err(StoreError::EmptySpec);
        }

        component_types.sort();
        let ids: Vec<_> = component_types.iter().map(|ty| ty.id()).collect();

        if ids[0] == ComponentTypeID::ENTITY {
            return Err(StoreError::DuplicateComponentInSpec(ComponentTypeID::ENTITY));
        }

        if let Some(duplicate) = component_set::first_duplicate(&ids) {
            return Err(StoreError::DuplicateComponentInSpec(duplicate));
        }

        Ok(EntitySpec::from_sorted(component_types))
    }

    /// Build a spec from registered component IDs.
    ///
    /// IDs which were never registered cannot be sized and are reported as
    /// missing.
    pub fn from_ids(ids: impl IntoIterator<Item = ComponentTypeID>) -> Result<EntitySpec> {
        let component_types = ids
            .into_iter()
            .map(|id| lookup(id).ok_or(StoreError::MissingComponent { component: id }))
            .collect::<Result<Vec<_>>>()?;
        EntitySpec::new(component_types)
    }

    /// Build a spec holding a single component type.
    pub fn of<T: Component>() -> Result<EntitySpec> {
        EntitySpec::new(std::iter::once(T::component_type()))
    }

    fn from_sorted(component_types: Vec<ComponentType>) -> EntitySpec {
        debug_assert!(component_set::is_sorted_unique(&component_types));

        let entity_size = component_types.iter().map(|ty| ty.size()).sum();
        let mut ids: Vec<_> = component_types.iter().map(|ty| ty.id()).collect();
        let id = SpecId(canonical_id(&mut ids));

        EntitySpec {
            component_types: component_types.into(),
            entity_size,
            id,
        }
    }

    /// Return the canonical hash of this spec.
    pub fn id(&self) -> SpecId {
        self.id
    }

    /// Return the sorted component types.
    pub fn component_types(&self) -> &[ComponentType] {
        &self.component_types
    }

    /// Return an iterator over the sorted component IDs.
    pub fn ids(&self) -> impl Iterator<Item = ComponentTypeID> + '_ {
        self.component_types.iter().map(|ty| ty.id())
    }

    /// Return the number of component types.
    pub fn len(&self) -> usize {
        self.component_types.len()
    }

    /// Specs are never empty, so this always returns false.
    pub fn is_empty(&self) -> bool {
        self.component_types.is_empty()
    }

    /// Return the summed byte size of one entity's components.
    pub fn entity_size(&self) -> usize {
        self.entity_size
    }

    /// Returns true if the spec has the given component type.
    pub fn contains(&self, id: ComponentTypeID) -> bool {
        self.index_of(id).is_some()
    }

    /// Return the position of a component type within the spec.
    pub fn index_of(&self, id: ComponentTypeID) -> Option<usize> {
        self.component_types.binary_search_by(|ty| ty.id().cmp(&id)).ok()
    }

    /// Returns true if this spec has every component type of `other`.
    pub fn has_all(&self, other: &EntitySpec) -> bool {
        component_set::is_superset(&self.component_types, &other.component_types)
    }

    /// Returns true if this spec has any component type of `other`.
    pub fn has_any(&self, other: &EntitySpec) -> bool {
        component_set::has_any(&self.component_types, &other.component_types)
    }

    /// Collect the component types shared with `other` into `out`.
    pub fn find_matches(&self, other: &EntitySpec, out: &mut Vec<ComponentType>) -> usize {
        component_set::intersect(&self.component_types, &other.component_types, out)
    }

    /// Return the spec with `ty` added. Adding a present type is a no-op.
    pub fn with(&self, ty: ComponentType) -> Result<EntitySpec> {
        if ty.id() == ComponentTypeID::ENTITY {
            return Err(StoreError::DuplicateComponentInSpec(ComponentTypeID::ENTITY));
        }
        if self.contains(ty.id()) {
            return Ok(self.clone());
        }

        Ok(EntitySpec::from_sorted(component_set::union_with(&self.component_types, &[ty])))
    }

    /// Return the spec with `id` removed.
    ///
    /// Fails if the spec lacks the type, or if it was the only one.
    pub fn without(&self, id: ComponentTypeID) -> Result<EntitySpec> {
        let index = self.index_of(id).ok_or(StoreError::MissingComponent { component: id })?;
        if self.len() == 1 {
            return Err(StoreError::EmptySpec);
        }

        let mut component_types = self.component_types.to_vec();
        component_types.remove(index);
        Ok(EntitySpec::from_sorted(component_types))
    }
}

impl PartialEq for EntitySpec {
    fn eq(&self, other: &EntitySpec) -> bool {
        self.id == other.id && self.component_types == other.component_types
    }
}

impl Eq for EntitySpec {}

impl Hash for EntitySpec {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state)
    }
}

impl Debug for EntitySpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.ids()).finish()
    }
}

/// Build an `EntitySpec` from a list of component types.
///
/// ```ignore
/// let spec = spec!(Position, Velocity)?;
/// ```
#[macro_export]
macro_rules! spec {
    ($($t:ty),+ $(,)?) => {
        $crate::spec::EntitySpec::new([
            $(<$t as $crate::component::Component>::component_type()),+
        ])
    };
}
