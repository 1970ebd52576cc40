//! The `World` ties entity handles, archetypes and chunks together.
//!
//! Structural changes (create, destroy, add or remove a component) take
//! `&mut World`, so they can never overlap a query. Column access through
//! `&World` goes through the per-column locks instead.

use std::collections::{BTreeMap, HashSet};

use rayon::prelude::*;

use crate::archetype::{Archetype, ArchetypeRegistry};
use crate::chunk::Chunk;
use crate::chunk_list::Placement;
use crate::component::Component;
use crate::config::StoreConfig;
use crate::entity::{Entity, EntityLocation, EntityPool};
use crate::error::{Result, StoreError};
use crate::query::{ChunkView, Filter, Project, Query, View};
use crate::spec::EntitySpec;

/// An in-memory store of entities and their components.
pub struct World {
    config: StoreConfig,
    pool: EntityPool,
    locations: Vec<EntityLocation>,
    archetypes: ArchetypeRegistry,
}

impl World {
    /// Create an empty world with the default configuration.
    pub fn new() -> World {
        World::build(StoreConfig::default())
    }

    /// Create an empty world, checking the configuration first.
    pub fn with_config(config: StoreConfig) -> Result<World> {
        config.validate()?;
        Ok(World::build(config))
    }

    fn build(config: StoreConfig) -> World {
        World {
            archetypes: ArchetypeRegistry::new(config.clone()),
            config,
            pool: EntityPool::reserving_null(),
            locations: Vec::new(),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns true if the entity was created and not yet destroyed.
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.pool.is_alive(entity)
    }

    /// Return the number of live entities.
    pub fn entity_count(&self) -> usize {
        self.pool.live_count()
    }

    /// Return the number of archetypes created so far.
    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    /// Iterate over every archetype.
    pub fn archetypes(&self) -> std::slice::Iter<'_, Archetype> {
        self.archetypes.iter()
    }

    pub fn archetype(&self, id: usize) -> Option<&Archetype> {
        self.archetypes.get(id)
    }

    /// Find the archetype holding entities of exactly `spec`.
    pub fn archetype_for(&self, spec: &EntitySpec) -> Option<&Archetype> {
        self.archetypes.find(spec).and_then(|id| self.archetypes.get(id))
    }

    /// Return where an entity's data is stored.
    pub fn location(&self, entity: Entity) -> Result<EntityLocation> {
        if !self.pool.is_alive(entity) {
            return Err(StoreError::InvalidHandle(entity));
        }
        Ok(self.locations[entity.index() as usize])
    }

    /// Return the component set of an entity.
    pub fn spec_of(&self, entity: Entity) -> Result<&EntitySpec> {
        let location = self.location(entity)?;
        Ok(self.archetypes[location.spec_index()].spec())
    }

    fn set_location(&mut self, entity: Entity, location: EntityLocation) {
        let index = entity.index() as usize;
        if index >= self.locations.len() {
            self.locations.resize(index + 1, EntityLocation::default());
        }
        self.locations[index] = location;
    }

    fn record_placements(
        &mut self,
        archetype: usize,
        entities: &[Entity],
        placements: &[Placement],
    ) {
        let mut entities = entities.iter();
        for placement in placements {
            for (slot, entity) in placement.slots.clone().zip(entities.by_ref()) {
                self.set_location(*entity, EntityLocation::new(archetype, placement.chunk, slot));
            }
        }
    }

    /// Create an entity with every component of `spec` zeroed.
    pub fn create_entity(&mut self, spec: &EntitySpec) -> Result<Entity> {
        let archetype = self.archetypes.get_or_create(spec)?;
        let entity = self.pool.take()?;

        let (chunk, slot) = match self.archetypes[archetype].chunks_mut().create(entity) {
            Ok(placed) => placed,
            Err(err) => {
                self.pool.give_back(entity)?;
                return Err(err);
            }
        };

        self.set_location(entity, EntityLocation::new(archetype, chunk, slot));
        log::trace!("created {:?} in archetype #{}", entity, archetype);
        Ok(entity)
    }

    fn take_entities(&mut self, count: usize) -> Result<Vec<Entity>> {
        let mut entities = Vec::with_capacity(count);
        for _ in 0..count {
            match self.pool.take() {
                Ok(entity) => entities.push(entity),
                Err(err) => {
                    for entity in entities {
                        self.pool.give_back(entity)?;
                    }
                    return Err(err);
                }
            }
        }
        Ok(entities)
    }

    fn create_batch(
        &mut self,
        spec: &EntitySpec,
        count: usize,
    ) -> Result<(usize, Vec<Entity>, Vec<Placement>)> {
        let archetype = self.archetypes.get_or_create(spec)?;
        let entities = self.take_entities(count)?;

        let placements = match self.archetypes[archetype].chunks_mut().create_batch(&entities) {
            Ok(placements) => placements,
            Err(err) => {
                for entity in entities {
                    self.pool.give_back(entity)?;
                }
                return Err(err);
            }
        };

        self.record_placements(archetype, &entities, &placements);
        log::trace!("created {} entities in archetype #{}", count, archetype);
        Ok((archetype, entities, placements))
    }

    /// Create `count` entities with every component of `spec` zeroed.
    pub fn create_entities(&mut self, spec: &EntitySpec, count: usize) -> Result<Vec<Entity>> {
        self.create_batch(spec, count).map(|(_, entities, _)| entities)
    }

    /// Create one entity per value, with the `T` column initialised from
    /// `values` and everything else zeroed.
    pub fn create_entities_with<T: Component>(
        &mut self,
        spec: &EntitySpec,
        values: &[T],
    ) -> Result<Vec<Entity>> {
        if !spec.contains(T::type_id()) {
            return Err(StoreError::MissingComponent { component: T::type_id() });
        }

        let (archetype, entities, placements) = self.create_batch(spec, values.len())?;
        let mut offset = 0;
        for placement in placements {
            let slots: Vec<usize> = placement.slots.collect();
            let chunk = self.chunk_mut(archetype, placement.chunk)?;
            chunk.write_slots(&slots, &values[offset..offset + slots.len()])?;
            offset += slots.len();
        }

        Ok(entities)
    }

    /// Create `count` entities whose `T` component is `value`.
    pub fn create_entities_filled<T: Component>(
        &mut self,
        spec: &EntitySpec,
        count: usize,
        value: T,
    ) -> Result<Vec<Entity>> {
        if !spec.contains(T::type_id()) {
            return Err(StoreError::MissingComponent { component: T::type_id() });
        }

        let (archetype, entities, placements) = self.create_batch(spec, count)?;
        for placement in placements {
            let slots: Vec<usize> = placement.slots.collect();
            self.chunk_mut(archetype, placement.chunk)?.fill(&slots, &value)?;
        }

        Ok(entities)
    }

    fn chunk_mut(&mut self, archetype: usize, chunk: usize) -> Result<&mut Chunk> {
        self.archetypes[archetype]
            .chunks_mut()
            .chunk_mut(chunk)
            .ok_or(StoreError::InvalidHandle(Entity::NULL))
    }

    /// Destroy an entity, compacting its chunk.
    pub fn destroy_entity(&mut self, entity: Entity) -> Result<()> {
        let location = self.location(entity)?;

        let displaced = self.archetypes[location.spec_index()].chunks_mut().delete(
            entity,
            location.chunk_index(),
            location.slot_index(),
            &mut self.pool,
        )?;

        if let Some((moved, slot)) = displaced {
            self.set_location(moved, location.with_slot(slot));
        }

        log::trace!("destroyed {:?}", entity);
        Ok(())
    }

    /// Destroy several entities at once.
    ///
    /// Every handle is checked first; if any is invalid or repeated nothing is
    /// destroyed.
    pub fn destroy_entities(&mut self, entities: &[Entity]) -> Result<()> {
        let mut seen = HashSet::with_capacity(entities.len());
        let mut groups: BTreeMap<(usize, usize), Vec<usize>> = BTreeMap::new();

        for entity in entities.iter().copied() {
            let location = self.location(entity)?;
            if !seen.insert(entity) {
                return Err(StoreError::InvalidHandle(entity));
            }

            groups
                .entry((location.spec_index(), location.chunk_index()))
                .or_default()
                .push(location.slot_index());
        }

        for ((archetype, chunk), slots) in groups {
            let moves = self.archetypes[archetype]
                .chunks_mut()
                .delete_batch(chunk, &slots, &mut self.pool)?;

            for (moved, slot) in moves {
                self.set_location(moved, EntityLocation::new(archetype, chunk, slot));
            }
        }

        log::trace!("destroyed {} entities", entities.len());
        Ok(())
    }

    /// Move an entity to another archetype, updating every affected location.
    fn migrate(
        &mut self,
        entity: Entity,
        location: EntityLocation,
        to: usize,
    ) -> Result<EntityLocation> {
        let from = location.spec_index();
        let (src, dst) = self.archetypes.pair_mut(from, to);
        let migration = src
            .chunks_mut()
            .move_to(location.chunk_index(), location.slot_index(), dst.chunks_mut())?;

        if let Some((moved, slot)) = migration.displaced {
            self.set_location(moved, location.with_slot(slot));
        }

        let new_location = EntityLocation::new(to, migration.chunk, migration.slot);
        self.set_location(entity, new_location);
        log::trace!("migrated {:?} from archetype #{} to #{}", entity, from, to);
        Ok(new_location)
    }

    /// Set a component of an entity, adding it if the entity lacks it.
    ///
    /// Adding a component moves the entity to the archetype with it; every
    /// other component value is carried over.
    pub fn set_component<T: Component>(&mut self, entity: Entity, value: T) -> Result<()> {
        let mut location = self.location(entity)?;

        if !self.archetypes[location.spec_index()].spec().contains(T::type_id()) {
            let to = self.archetypes.transition_add(location.spec_index(), T::component_type())?;
            location = self.migrate(entity, location, to)?;
        }

        let chunk = self.chunk_mut(location.spec_index(), location.chunk_index())?;
        chunk.column_mut::<T>()?[location.slot_index()] = value;
        Ok(())
    }

    /// Remove a component from an entity, moving it to the archetype without
    /// it.
    ///
    /// # Errors
    /// `MissingComponent` if the entity lacks `T`, and `EmptySpec` if `T` is
    /// its only component. The entity is unchanged in both cases.
    pub fn remove_component<T: Component>(&mut self, entity: Entity) -> Result<()> {
        let location = self.location(entity)?;
        let to = self.archetypes.transition_remove(location.spec_index(), T::type_id())?;
        self.migrate(entity, location, to)?;
        Ok(())
    }

    /// Read a component of an entity by value.
    ///
    /// This takes a read lock on the column for the duration of the call.
    pub fn get_component<T: Component>(&self, entity: Entity) -> Result<T> {
        let location = self.location(entity)?;
        let chunk = self.archetypes[location.spec_index()]
            .chunks()
            .chunk(location.chunk_index())
            .ok_or(StoreError::InvalidHandle(entity))?;
        chunk.get::<T>(location.slot_index())
    }

    /// Returns true if the entity has a `T` component.
    pub fn has_component<T: Component>(&self, entity: Entity) -> Result<bool> {
        Ok(self.spec_of(entity)?.contains(T::type_id()))
    }

    /// Iterate over the non-empty chunks of every archetype `query` matches.
    pub fn filter(&self, query: &Query) -> Filter<'_> {
        Filter::new(self.archetypes.iter().as_slice(), query.clone())
    }

    /// Call `f` on every chunk `query` matches, stopping at the first error.
    pub fn for_each_chunk<F>(&self, query: &Query, mut f: F) -> Result<()>
    where
        F: FnMut(ChunkView<'_>) -> Result<()>,
    {
        self.filter(query).try_for_each(|view| f(view))
    }

    /// Iterate over the columns `V` declares, one chunk at a time.
    pub fn project<'a, V: View<'a>>(&'a self) -> Result<Project<'a, V>> {
        let query = Query::of::<V>()?;
        Ok(Project::new(self.filter(&query)))
    }

    /// Call `f` on every chunk `query` matches, spreading chunks over the
    /// rayon thread pool.
    ///
    /// Chunks are independent, and column locks are per chunk, so `f` only
    /// conflicts with itself if it reaches into other chunks.
    pub fn par_for_each<F>(&self, query: &Query, f: F) -> Result<()>
    where
        F: Fn(ChunkView<'_>) -> Result<()> + Send + Sync,
    {
        let views: Vec<ChunkView<'_>> = self.filter(query).collect();
        views.into_par_iter().try_for_each(f)
    }

    /// Pack every archetype's entities into its earliest chunks.
    ///
    /// Returns the number of entities moved.
    pub fn defragment(&mut self) -> usize {
        let mut relocated = Vec::new();
        for archetype in self.archetypes.iter_mut() {
            let id = archetype.id();
            for (entity, chunk, slot) in archetype.chunks_mut().defragment() {
                relocated.push((entity, EntityLocation::new(id, chunk, slot)));
            }
        }

        for (entity, location) in relocated.iter() {
            self.set_location(*entity, *location);
        }

        relocated.len()
    }
}

impl Default for World {
    fn default() -> Self {
        World::new()
    }
}
