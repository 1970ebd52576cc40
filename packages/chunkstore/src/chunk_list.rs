//! The growable list of chunks behind one archetype.

use std::ops::Range;
use std::sync::Arc;

use bit_vec::BitVec;

use crate::alloc::ChunkAllocator;
use crate::archetype::ChunkLayout;
use crate::chunk::Chunk;
use crate::entity::{Entity, EntityPool, MAX_CHUNKS};
use crate::error::{Result, StoreError};
use crate::spec::EntitySpec;

/// Where an entity landed after moving to another chunk list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Migration {
    /// Chunk index in the destination list.
    pub chunk: usize,
    /// Slot index in the destination chunk.
    pub slot: usize,
    /// The source entity which was compacted into the vacated slot, with
    /// that slot.
    pub displaced: Option<(Entity, usize)>,
}

/// A run of consecutive slots filled by a batch create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub chunk: usize,
    pub slots: Range<usize>,
}

/// All chunks of one archetype.
///
/// Chunks are appended when every existing chunk is full and are never
/// released.
pub struct ChunkList {
    layout: Arc<ChunkLayout>,
    allocator: Arc<dyn ChunkAllocator>,
    zero_vacated: bool,
    chunks: Vec<Chunk>,
    full: BitVec,
    len: usize,
}

impl ChunkList {
    pub fn new(
        layout: Arc<ChunkLayout>,
        allocator: Arc<dyn ChunkAllocator>,
        zero_vacated: bool,
    ) -> ChunkList {
        ChunkList {
            layout,
            allocator,
            zero_vacated,
            chunks: Vec::new(),
            full: BitVec::new(),
            len: 0,
        }
    }

    pub fn layout(&self) -> &Arc<ChunkLayout> {
        &self.layout
    }

    pub fn spec(&self) -> &EntitySpec {
        self.layout.spec()
    }

    /// Return the number of entities across all chunks.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Return the number of allocated chunks.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Return the number of unoccupied slots across all chunks.
    pub fn free_slots(&self) -> usize {
        self.chunks.len() * self.layout.capacity() - self.len
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn chunk(&self, index: usize) -> Option<&Chunk> {
        self.chunks.get(index)
    }

    pub fn chunk_mut(&mut self, index: usize) -> Option<&mut Chunk> {
        self.chunks.get_mut(index)
    }

    fn sync_full(&mut self, index: usize) {
        self.full.set(index, self.chunks[index].is_full());
    }

    /// Return the index of the first chunk with room, allocating one if every
    /// chunk is full.
    fn open_chunk(&mut self) -> Result<usize> {
        if let Some(index) = self.full.iter().position(|full| !full) {
            return Ok(index);
        }

        let index = self.chunks.len();
        if index >= MAX_CHUNKS {
            return Err(StoreError::ChunkLimit(MAX_CHUNKS));
        }

        let chunk = Chunk::new(self.layout.clone(), self.allocator.clone(), self.zero_vacated)?;
        log::debug!(
            "allocated chunk #{} for {:?} ({} bytes)",
            index,
            self.layout.spec(),
            self.layout.memory_layout().size()
        );

        self.chunks.push(chunk);
        self.full.push(false);
        Ok(index)
    }

    /// Place an entity in the first chunk with room.
    ///
    /// Returns the chunk and slot it now occupies.
    pub fn create(&mut self, entity: Entity) -> Result<(usize, usize)> {
        let index = self.open_chunk()?;
        let slot = self.chunks[index].create(entity)?;
        self.sync_full(index);
        self.len += 1;
        Ok((index, slot))
    }

    /// Place every entity, filling existing chunks before allocating new ones.
    ///
    /// Fails with `ChunkLimit` before placing anything if the entities cannot
    /// all fit.
    pub fn create_batch(&mut self, entities: &[Entity]) -> Result<Vec<Placement>> {
        let reachable =
            self.free_slots() + (MAX_CHUNKS - self.chunks.len()) * self.layout.capacity();
        if entities.len() > reachable {
            return Err(StoreError::ChunkLimit(MAX_CHUNKS));
        }

        let mut placements = Vec::new();
        let mut remaining = entities;

        while !remaining.is_empty() {
            let index = self.open_chunk()?;
            let start = self.chunks[index].len();
            let placed = self.chunks[index].create_batch(remaining);
            self.sync_full(index);
            self.len += placed;

            placements.push(Placement {
                chunk: index,
                slots: start..start + placed,
            });
            remaining = &remaining[placed..];
        }

        Ok(placements)
    }

    fn check_entity(&self, entity: Entity, chunk: usize, slot: usize) -> Result<()> {
        match self.chunks.get(chunk).and_then(|c| c.entities().get(slot)) {
            Some(stored) if *stored == entity => Ok(()),
            _ => Err(StoreError::InvalidHandle(entity)),
        }
    }

    /// Remove an entity and return its handle to the pool.
    ///
    /// Returns the entity compacted into the freed slot, if any.
    pub fn delete(
        &mut self,
        entity: Entity,
        chunk: usize,
        slot: usize,
        pool: &mut EntityPool,
    ) -> Result<Option<(Entity, usize)>> {
        self.check_entity(entity, chunk, slot)?;
        pool.give_back(entity)?;

        let displaced = self.chunks[chunk].delete(slot);
        self.sync_full(chunk);
        self.len -= 1;
        Ok(displaced)
    }

    /// Remove several entities from one chunk and return their handles.
    ///
    /// Every slot is checked before anything is removed.
    pub fn delete_batch(
        &mut self,
        chunk: usize,
        slots: &[usize],
        pool: &mut EntityPool,
    ) -> Result<Vec<(Entity, usize)>> {
        let mut slots = slots.to_vec();
        slots.sort_unstable();
        slots.dedup();

        let target = self
            .chunks
            .get(chunk)
            .ok_or(StoreError::InvalidHandle(Entity::NULL))?;
        let entities = target.entities();
        for slot in slots.iter().copied() {
            match entities.get(slot) {
                Some(entity) if pool.is_alive(*entity) => {}
                Some(entity) => return Err(StoreError::InvalidHandle(*entity)),
                None => return Err(StoreError::InvalidHandle(Entity::NULL)),
            }
        }

        for slot in slots.iter().copied() {
            pool.give_back(entities[slot])?;
        }

        let moves = self.chunks[chunk].delete_batch(&slots);
        self.sync_full(chunk);
        self.len -= slots.len();
        Ok(moves)
    }

    /// Move an entity into another list, carrying over every component both
    /// archetypes share.
    ///
    /// Components only the source has are dropped. Components only the
    /// destination has start zeroed.
    pub fn move_to(
        &mut self,
        src_chunk: usize,
        src_slot: usize,
        dst: &mut ChunkList,
    ) -> Result<Migration> {
        let entity = self.chunks[src_chunk].entities()[src_slot];
        let (chunk, slot) = dst.create(entity)?;
        Chunk::copy_shared(&self.chunks[src_chunk], src_slot, &mut dst.chunks[chunk], slot);

        let displaced = self.chunks[src_chunk].delete(src_slot);
        self.sync_full(src_chunk);
        self.len -= 1;

        Ok(Migration { chunk, slot, displaced })
    }

    /// Pack entities into the earliest chunks.
    ///
    /// Entities are taken from the back of the last non-empty chunk and put
    /// into the first chunk with room, until no chunk with room precedes an
    /// occupied one. Returns every moved entity with its new chunk and slot.
    pub fn defragment(&mut self) -> Vec<(Entity, usize, usize)> {
        let mut moved = Vec::new();

        loop {
            let hole = match self.full.iter().position(|full| !full) {
                Some(hole) => hole,
                None => break,
            };
            let tail = match self.chunks.iter().rposition(|c| !c.is_empty()) {
                Some(tail) if tail > hole => tail,
                _ => break,
            };

            let (front, back) = self.chunks.split_at_mut(tail);
            let dst = &mut front[hole];
            let src = &mut back[0];

            while !dst.is_full() && !src.is_empty() {
                let last = src.len() - 1;
                let entity = src.entities()[last];
                let slot = match dst.create(entity) {
                    Ok(slot) => slot,
                    Err(_) => break,
                };

                Chunk::copy_shared(src, last, dst, slot);
                src.delete(last);
                moved.push((entity, hole, slot));
            }

            self.sync_full(hole);
            self.sync_full(tail);
        }

        if !moved.is_empty() {
            log::debug!("defragmented {:?}: moved {} entities", self.layout.spec(), moved.len());
        }

        moved
    }
}

#[cfg(test)]
mod test {
    use bytemuck::{Pod, Zeroable};

    use super::*;
    use crate::alloc::HeapAllocator;
    use crate::{component, spec};

    #[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
    #[repr(C)]
    struct Tag(u32);
    #[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
    #[repr(C)]
    struct Extra(u16);

    component!(Tag, Extra);

    fn list(spec: EntitySpec, capacity: usize) -> ChunkList {
        let layout = Arc::new(ChunkLayout::new(spec, capacity).unwrap());
        ChunkList::new(layout, Arc::new(HeapAllocator), false)
    }

    fn take(pool: &mut EntityPool, n: usize) -> Vec<Entity> {
        (0..n).map(|_| pool.take().unwrap()).collect()
    }

    #[test]
    fn test_grows_by_chunk() {
        let mut pool = EntityPool::new();
        let mut list = list(spec!(Tag).unwrap(), 4);

        for (i, entity) in take(&mut pool, 5).into_iter().enumerate() {
            assert_eq!(list.create(entity).unwrap(), (i / 4, i % 4));
        }
        assert_eq!(list.chunk_count(), 2);
        assert_eq!(list.len(), 5);
        assert_eq!(list.free_slots(), 3);
    }

    #[test]
    fn test_refills_earliest_chunk() {
        let mut pool = EntityPool::new();
        let mut list = list(spec!(Tag).unwrap(), 2);
        let entities = take(&mut pool, 3);
        for entity in entities.iter() {
            list.create(*entity).unwrap();
        }

        assert_eq!(list.delete(entities[0], 0, 0, &mut pool).unwrap(), Some((entities[1], 0)));
        let fresh = pool.take().unwrap();
        assert_eq!(list.create(fresh).unwrap(), (0, 1));
        assert!(!pool.is_alive(entities[0]));
    }

    #[test]
    fn test_delete_checks_slot() {
        let mut pool = EntityPool::new();
        let mut list = list(spec!(Tag).unwrap(), 4);
        let entities = take(&mut pool, 2);
        list.create(entities[0]).unwrap();
        list.create(entities[1]).unwrap();

        assert_eq!(
            list.delete(entities[0], 0, 1, &mut pool),
            Err(StoreError::InvalidHandle(entities[0]))
        );
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_create_batch_spans_chunks() {
        let mut pool = EntityPool::new();
        let mut list = list(spec!(Tag).unwrap(), 4);
        list.create(pool.take().unwrap()).unwrap();

        let placements = list.create_batch(&take(&mut pool, 9)).unwrap();
        assert_eq!(
            placements,
            vec![
                Placement { chunk: 0, slots: 1..4 },
                Placement { chunk: 1, slots: 0..4 },
                Placement { chunk: 2, slots: 0..2 },
            ]
        );
        assert_eq!(list.len(), 10);
    }

    #[test]
    fn test_move_to() {
        let mut pool = EntityPool::new();
        let mut src = list(spec!(Tag, Extra).unwrap(), 4);
        let mut dst = list(spec!(Tag).unwrap(), 4);
        let entities = take(&mut pool, 2);
        src.create(entities[0]).unwrap();
        src.create(entities[1]).unwrap();
        src.chunk_mut(0).unwrap().column_mut::<Tag>().unwrap().copy_from_slice(&[Tag(1), Tag(2)]);

        let migration = src.move_to(0, 0, &mut dst).unwrap();
        assert_eq!(
            migration,
            Migration {
                chunk: 0,
                slot: 0,
                displaced: Some((entities[1], 0)),
            }
        );
        assert_eq!(dst.chunk_mut(0).unwrap().column_mut::<Tag>().unwrap(), &[Tag(1)]);
        assert_eq!(src.len(), 1);
        assert_eq!(dst.len(), 1);
    }

    #[test]
    fn test_delete_batch() {
        let mut pool = EntityPool::new();
        let mut list = list(spec!(Tag).unwrap(), 8);
        let entities = take(&mut pool, 6);
        list.create_batch(&entities).unwrap();

        let moves = list.delete_batch(0, &[4, 0, 2], &mut pool).unwrap();
        assert_eq!(list.len(), 3);
        let survivors = list.chunk(0).unwrap().entities();
        for (entity, slot) in moves {
            assert_eq!(survivors[slot], entity);
        }
        assert_eq!(pool.live_count(), 3);

        assert!(list.delete_batch(0, &[5], &mut pool).is_err());
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn test_defragment() {
        let mut pool = EntityPool::new();
        let mut list = list(spec!(Tag).unwrap(), 4);
        let entities = take(&mut pool, 12);
        list.create_batch(&entities).unwrap();

        list.delete_batch(0, &[0, 1, 2], &mut pool).unwrap();
        list.delete_batch(1, &[3], &mut pool).unwrap();

        let moved = list.defragment();
        assert_eq!(moved.len(), 4);
        assert_eq!(list.chunk(0).unwrap().len(), 4);
        assert_eq!(list.chunk(1).unwrap().len(), 4);
        assert!(list.chunk(2).unwrap().is_empty());
        assert_eq!(list.chunk_count(), 3);

        for (entity, chunk, slot) in moved {
            assert_eq!(list.chunk(chunk).unwrap().entities()[slot], entity);
        }
    }
}
