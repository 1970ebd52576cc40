//! Entity handles, packed storage locations and the handle pool.
//!
//! An `Entity` is an opaque 32-bit handle:
//!
//! ```text
//! | generation (8) | index (24) |
//! ```
//!
//! The index names a slot in the pool. The generation is bumped every time a
//! slot is recycled, so a stale handle never compares equal to the handle that
//! currently owns the slot. Raw value 0 is the null handle.
//!
//! An `EntityLocation` is a second 32-bit value naming where the entity's data
//! physically lives:
//!
//! ```text
//! | spec index (12) | chunk index (10) | slot index (10) |
//! ```

use std::fmt::{self, Debug, Formatter};

use bit_vec::BitVec;
use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert;

use crate::component::{Component, ComponentTypeID};
use crate::error::{Result, StoreError};

/// Number of bits holding the slot index of an entity handle.
pub const INDEX_BITS: u32 = 24;
/// Number of bits holding the generation of an entity handle.
pub const GENERATION_BITS: u32 = 8;

const_assert!(INDEX_BITS + GENERATION_BITS == 32);
const_assert!(GENERATION_BITS > 0);

const INDEX_MASK: u32 = (1 << INDEX_BITS) - 1;
const GENERATION_MASK: u32 = (1 << GENERATION_BITS) - 1;

/// Maximum number of entity slots the pool can hand out.
pub const MAX_ENTITIES: usize = 1 << INDEX_BITS;

/// Bits of an `EntityLocation` naming the archetype.
pub const SPEC_INDEX_BITS: u32 = 12;
/// Bits of an `EntityLocation` naming the chunk within the archetype.
pub const CHUNK_INDEX_BITS: u32 = 10;
/// Bits of an `EntityLocation` naming the slot within the chunk.
pub const SLOT_INDEX_BITS: u32 = 10;

const_assert!(SPEC_INDEX_BITS + CHUNK_INDEX_BITS + SLOT_INDEX_BITS == 32);

/// Maximum number of live archetypes.
pub const MAX_ARCHETYPES: usize = 1 << SPEC_INDEX_BITS;
/// Maximum number of chunks per archetype.
pub const MAX_CHUNKS: usize = 1 << CHUNK_INDEX_BITS;
/// Capacity of a chunk, in entities.
pub const ENTITY_MAX: usize = 1 << SLOT_INDEX_BITS;

const SLOT_SHIFT: u32 = 0;
const CHUNK_SHIFT: u32 = SLOT_INDEX_BITS;
const SPEC_SHIFT: u32 = SLOT_INDEX_BITS + CHUNK_INDEX_BITS;

const SLOT_MASK: u32 = ((1 << SLOT_INDEX_BITS) - 1) << SLOT_SHIFT;
const CHUNK_MASK: u32 = ((1 << CHUNK_INDEX_BITS) - 1) << CHUNK_SHIFT;
const SPEC_MASK: u32 = ((1 << SPEC_INDEX_BITS) - 1) << SPEC_SHIFT;

const_assert!(SLOT_MASK & CHUNK_MASK == 0);
const_assert!(CHUNK_MASK & SPEC_MASK == 0);
const_assert!(SLOT_MASK | CHUNK_MASK | SPEC_MASK == u32::MAX);

/// The handle of a single entity.
///
/// Entity handles are unique per world. They are not unique across worlds.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable)]
#[repr(transparent)]
pub struct Entity(u32);

impl Entity {
    /// The reserved null handle. It is never alive.
    pub const NULL: Entity = Entity(0);

    /// Reconstruct a handle from its raw 32-bit value.
    pub const fn from_raw(raw: u32) -> Entity {
        Entity(raw)
    }

    pub(crate) const fn from_parts(index: u32, generation: u32) -> Entity {
        Entity(((generation & GENERATION_MASK) << INDEX_BITS) | (index & INDEX_MASK))
    }

    /// Return the raw 32-bit value.
    pub const fn to_raw(self) -> u32 {
        self.0
    }

    /// Return the slot index, stored in the low bits.
    pub const fn index(self) -> u32 {
        self.0 & INDEX_MASK
    }

    /// Return the generation of this handle.
    pub const fn generation(self) -> u32 {
        self.0 >> INDEX_BITS
    }

    /// Returns true for the null handle.
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// The handle the same slot will carry after it is recycled, or `None`
    /// once the generation is exhausted.
    fn next_generation(self) -> Option<Entity> {
        if self.generation() == GENERATION_MASK {
            return None;
        }
        Some(Entity::from_parts(self.index(), self.generation() + 1))
    }
}

impl Debug for Entity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "Entity(null)")
        } else {
            write!(f, "Entity({}v{})", self.index(), self.generation())
        }
    }
}

impl Component for Entity {
    fn type_id() -> ComponentTypeID {
        ComponentTypeID::ENTITY
    }
}

/// The physical location of an entity's data: archetype, chunk and slot.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct EntityLocation(u32);

impl EntityLocation {
    /// Pack a location.
    ///
    /// # Panics
    /// If any field exceeds its bit width.
    pub fn new(spec_index: usize, chunk_index: usize, slot_index: usize) -> EntityLocation {
        assert!(spec_index < MAX_ARCHETYPES, "spec index {} out of range", spec_index);
        assert!(chunk_index < MAX_CHUNKS, "chunk index {} out of range", chunk_index);
        assert!(slot_index < ENTITY_MAX, "slot index {} out of range", slot_index);

        EntityLocation(
            ((spec_index as u32) << SPEC_SHIFT)
                | ((chunk_index as u32) << CHUNK_SHIFT)
                | ((slot_index as u32) << SLOT_SHIFT),
        )
    }

    /// Return the raw packed value.
    pub fn to_raw(self) -> u32 {
        self.0
    }

    /// Return the index of the archetype holding the entity.
    pub fn spec_index(self) -> usize {
        ((self.0 & SPEC_MASK) >> SPEC_SHIFT) as usize
    }

    /// Return the index of the chunk within the archetype.
    pub fn chunk_index(self) -> usize {
        ((self.0 & CHUNK_MASK) >> CHUNK_SHIFT) as usize
    }

    /// Return the slot within the chunk.
    pub fn slot_index(self) -> usize {
        ((self.0 & SLOT_MASK) >> SLOT_SHIFT) as usize
    }

    /// Return a copy of this location pointing at another slot of the same
    /// chunk.
    pub fn with_slot(self, slot_index: usize) -> EntityLocation {
        assert!(slot_index < ENTITY_MAX, "slot index {} out of range", slot_index);
        EntityLocation((self.0 & !SLOT_MASK) | ((slot_index as u32) << SLOT_SHIFT))
    }

    /// Return a copy of this location pointing at another chunk and slot of
    /// the same archetype.
    pub fn with_chunk_slot(self, chunk_index: usize, slot_index: usize) -> EntityLocation {
        EntityLocation::new(self.spec_index(), chunk_index, slot_index)
    }
}

impl Debug for EntityLocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityLocation")
            .field("spec", &self.spec_index())
            .field("chunk", &self.chunk_index())
            .field("slot", &self.slot_index())
            .finish()
    }
}

/// Issues and recycles entity handles.
///
/// A slot whose generation is exhausted is retired rather than wrapped, so a
/// stale handle can never become alive again.
#[derive(Debug, Clone, Default)]
pub struct EntityPool {
    /// The handle each slot currently carries, or will carry once reissued.
    handles: Vec<Entity>,
    alive: BitVec,
    free: Vec<u32>,
    live: usize,
    retired: usize,
}

impl EntityPool {
    /// Create an empty pool. The first handle taken has raw value 0.
    pub fn new() -> EntityPool {
        EntityPool::default()
    }

    /// Create a pool which never issues the null handle.
    pub fn reserving_null() -> EntityPool {
        let mut pool = EntityPool::new();
        pool.handles.push(Entity::NULL);
        pool.alive.push(false);
        pool
    }

    /// Take a fresh or recycled handle.
    pub fn take(&mut self) -> Result<Entity> {
        let entity = match self.free.pop() {
            Some(index) => {
                let index = index as usize;
                self.alive.set(index, true);
                self.handles[index]
            }
            None => {
                let index = self.handles.len();
                if index >= MAX_ENTITIES {
                    return Err(StoreError::EntityLimit(MAX_ENTITIES));
                }

                let entity = Entity::from_parts(index as u32, 0);
                self.handles.push(entity);
                self.alive.push(true);
                entity
            }
        };

        self.live += 1;
        Ok(entity)
    }

    /// Return a handle to the pool so its slot can be reused.
    ///
    /// The slot's generation is bumped, invalidating `entity` and every copy of
    /// it.
    pub fn give_back(&mut self, entity: Entity) -> Result<()> {
        if !self.is_alive(entity) {
            log::warn!("returning {:?} which is not alive", entity);
            return Err(StoreError::InvalidHandle(entity));
        }

        let index = entity.index() as usize;
        self.alive.set(index, false);
        self.live -= 1;

        match entity.next_generation() {
            Some(next) => {
                self.handles[index] = next;
                self.free.push(index as u32);
            }
            None => {
                log::debug!("retiring entity slot {}", index);
                self.retired += 1;
            }
        }
        Ok(())
    }

    /// Returns true if the handle was issued and not yet returned.
    pub fn is_alive(&self, entity: Entity) -> bool {
        let index = entity.index() as usize;
        self.alive.get(index).unwrap_or(false) && self.handles[index] == entity
    }

    /// Return the number of handles currently issued.
    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Return the number of slots ever allocated, live or free.
    pub fn slot_count(&self) -> usize {
        self.handles.len()
    }

    /// Return the number of slots retired after exhausting their generations.
    pub fn retired_count(&self) -> usize {
        self.retired
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_sequential_take() {
        let mut pool = EntityPool::new();
        for expected in 0..10000u32 {
            assert_eq!(pool.take().unwrap().to_raw(), expected);
        }
        assert_eq!(pool.live_count(), 10000);
    }

    #[test]
    fn test_recycle_bumps_generation() {
        let mut pool = EntityPool::new();
        let handles = (0..10).map(|_| pool.take().unwrap()).collect::<Vec<_>>();

        let old = handles[5];
        pool.give_back(old).unwrap();
        let new = pool.take().unwrap();

        assert_eq!(new.index(), 5);
        assert_ne!(new.generation(), old.generation());
        assert_ne!(new, old);
        assert!(pool.is_alive(new));
        assert!(!pool.is_alive(old));
    }

    #[test]
    fn test_stale_give_back_fails() {
        let mut pool = EntityPool::new();
        let e = pool.take().unwrap();
        pool.give_back(e).unwrap();
        assert_eq!(pool.give_back(e), Err(StoreError::InvalidHandle(e)));

        let unknown = Entity::from_parts(77, 0);
        assert!(pool.give_back(unknown).is_err());
    }

    #[test]
    fn test_reserving_null() {
        let mut pool = EntityPool::reserving_null();
        let first = pool.take().unwrap();
        assert!(!first.is_null());
        assert_eq!(first.index(), 1);
        assert!(!pool.is_alive(Entity::NULL));
        assert!(pool.give_back(Entity::NULL).is_err());
    }

    #[test]
    fn test_exhausted_slot_is_retired() {
        let mut pool = EntityPool::new();
        let first = pool.take().unwrap();
        let mut issued = vec![first];
        let mut e = first;
        for _ in 0..(1 << GENERATION_BITS) {
            pool.give_back(e).unwrap();
            e = pool.take().unwrap();
            issued.push(e);
        }

        // The last generation of slot 0 was handed back, so slot 1 took over.
        assert_eq!(e.index(), first.index() + 1);
        assert_eq!(pool.retired_count(), 1);
        assert_eq!(pool.live_count(), 1);
        assert!(issued[..issued.len() - 1].iter().all(|stale| !pool.is_alive(*stale)));
        assert!(issued[..issued.len() - 1].iter().all(|stale| *stale != e));
    }

    #[test]
    fn test_location_fields() {
        let loc = EntityLocation::new(4095, 1023, 1023);
        assert_eq!(loc.to_raw(), u32::MAX);

        let loc = EntityLocation::new(7, 3, 9);
        assert_eq!((loc.spec_index(), loc.chunk_index(), loc.slot_index()), (7, 3, 9));

        let moved = loc.with_slot(512);
        assert_eq!((moved.spec_index(), moved.chunk_index(), moved.slot_index()), (7, 3, 512));

        let moved = loc.with_chunk_slot(1, 0);
        assert_eq!((moved.spec_index(), moved.chunk_index(), moved.slot_index()), (7, 1, 0));
    }

    #[test]
    #[should_panic]
    fn test_location_out_of_range() {
        EntityLocation::new(0, 0, ENTITY_MAX);
    }
}
