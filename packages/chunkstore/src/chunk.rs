//! Logic for dealing with chunks of entities.

use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::mem;
use std::ptr::{self, NonNull};
use std::sync::Arc;

use crate::alloc::ChunkAllocator;
use crate::archetype::ChunkLayout;
use crate::component::{Component, ComponentType, ComponentTypeID};
use crate::entity::Entity;
use crate::error::{LockViolationReason, Result, StoreError};
use crate::lock::{ColumnLock, ColumnMut, ColumnRef};

/// A single `Chunk` of entities of the same archetype.
///
/// The components are stored as a struct of arrays in one contiguous block of
/// memory. Slots `[0, len)` are occupied; the rest are free.
pub struct Chunk {
    layout: Arc<ChunkLayout>,
    allocator: Arc<dyn ChunkAllocator>,
    ptr: NonNull<u8>,
    len: usize,
    locks: Box<[ColumnLock]>,
    zero_vacated: bool,
}

// Shared access to columns only goes through the column locks. Everything
// else needs `&mut Chunk`.
unsafe impl Send for Chunk {}
unsafe impl Sync for Chunk {}

impl Chunk {
    /// Reserve a new, empty chunk.
    pub fn new(
        layout: Arc<ChunkLayout>,
        allocator: Arc<dyn ChunkAllocator>,
        zero_vacated: bool,
    ) -> Result<Chunk> {
        let ptr = allocator.reserve(layout.memory_layout())?;
        let locks = (0..layout.columns().len()).map(|_| ColumnLock::new()).collect();

        Ok(Chunk {
            layout,
            allocator,
            ptr,
            len: 0,
            locks,
            zero_vacated,
        })
    }

    /// Return the layout shared by every chunk of the archetype.
    pub fn layout(&self) -> &Arc<ChunkLayout> {
        &self.layout
    }

    /// Get the total number of entities currently stored in this chunk.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if this chunk contains no entities.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns true if every slot is occupied.
    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// Get the fixed capacity of this chunk.
    pub fn capacity(&self) -> usize {
        self.layout.capacity()
    }

    /// Return the number of unoccupied slots.
    pub fn free_slots(&self) -> usize {
        self.capacity() - self.len
    }

    /// Returns true if the chunk stores the component type.
    pub fn has_column(&self, id: ComponentTypeID) -> bool {
        self.layout.column_index(id).is_some()
    }

    /// Get the handles of the entities in this chunk, by slot.
    ///
    /// The handle column is only written by structural changes, which need
    /// `&mut self`, so reading it takes no lock.
    pub fn entities(&self) -> &[Entity] {
        unsafe { std::slice::from_raw_parts(self.column_ptr(0) as *const Entity, self.len) }
    }

    fn column_ptr(&self, column: usize) -> *mut u8 {
        unsafe { self.ptr.as_ptr().add(self.layout.offsets()[column]) }
    }

    fn slot_ptr(&self, column: usize, slot: usize) -> *mut u8 {
        let size = self.layout.columns()[column].size();
        unsafe { self.column_ptr(column).add(slot * size) }
    }

    /// Find the column for `T`, checking `T` really is the type stored there.
    fn typed_column<T: Component>(&self, ty: ComponentType) -> Result<usize> {
        let column = self
            .layout
            .column_index(ty.id())
            .ok_or(StoreError::MissingComponent { component: ty.id() })?;

        let stored = self.layout.columns()[column];
        let requested = T::component_type();
        if requested.id() != stored.id()
            || mem::size_of::<T>() != stored.size()
            || mem::align_of::<T>() > stored.align()
        {
            return Err(StoreError::TypeMismatch {
                expected: stored,
                found: requested,
            });
        }

        Ok(column)
    }

    /// Get a mutable column as a slice of `T`.
    ///
    /// # Errors
    /// `MissingComponent` if the chunk has no column for `ty`, and
    /// `TypeMismatch` if `T` is not the type registered for `ty`.
    pub fn get_column<T: Component>(&mut self, ty: ComponentType) -> Result<&mut [T]> {
        let column = self.typed_column::<T>(ty)?;
        if column == 0 {
            return Err(StoreError::lock(ComponentTypeID::ENTITY, LockViolationReason::ReadHeld));
        }

        let ptr = self.column_ptr(column) as *mut T;
        Ok(unsafe { std::slice::from_raw_parts_mut(ptr, self.len) })
    }

    /// Get the column of `T` for writing, without taking a lock.
    pub fn column_mut<T: Component>(&mut self) -> Result<&mut [T]> {
        self.get_column::<T>(T::component_type())
    }

    /// Take a read lock on the column of `T`.
    pub fn read<T: Component>(&self) -> Result<ColumnRef<'_, T>> {
        let ty = T::component_type();
        let column = self.typed_column::<T>(ty)?;
        let token = self.locks[column].try_read(ty.id())?;

        let ptr = self.column_ptr(column) as *const T;
        let slice = unsafe { std::slice::from_raw_parts(ptr, self.len) };
        Ok(ColumnRef::new(slice, token))
    }

    /// Take a write lock on the column of `T`.
    ///
    /// The entity handle column can never be locked for writing.
    pub fn write<T: Component>(&self) -> Result<ColumnMut<'_, T>> {
        let ty = T::component_type();
        let column = self.typed_column::<T>(ty)?;
        if column == 0 {
            return Err(StoreError::lock(ty.id(), LockViolationReason::ReadHeld));
        }

        let token = self.locks[column].try_write(ty.id())?;

        let ptr = self.column_ptr(column) as *mut T;
        let slice = unsafe { std::slice::from_raw_parts_mut(ptr, self.len) };
        Ok(ColumnMut::new(slice, token))
    }

    /// Returns true if no column of this chunk is locked.
    pub fn is_unlocked(&self) -> bool {
        self.locks.iter().all(|lock| lock.is_free())
    }

    fn zero_slot(&mut self, slot: usize, include_entity: bool) {
        let first = if include_entity { 0 } else { 1 };
        for column in first..self.layout.columns().len() {
            let size = self.layout.columns()[column].size();
            unsafe { ptr::write_bytes(self.slot_ptr(column, slot), 0, size) };
        }
    }

    /// Append an entity, zeroing its components.
    ///
    /// Returns the slot the entity was placed in.
    pub fn create(&mut self, entity: Entity) -> Result<usize> {
        if self.is_full() {
            return Err(StoreError::ChunkFull);
        }

        let slot = self.len;
        self.len += 1;
        self.zero_slot(slot, false);
        unsafe { (self.slot_ptr(0, slot) as *mut Entity).write(entity) };
        Ok(slot)
    }

    /// Append as many of `entities` as fit.
    ///
    /// Returns how many were placed; they occupy the slots starting at the old
    /// `len()`.
    pub fn create_batch(&mut self, entities: &[Entity]) -> usize {
        let count = entities.len().min(self.free_slots());
        let start = self.len;
        self.len += count;

        for column in 1..self.layout.columns().len() {
            let size = self.layout.columns()[column].size();
            unsafe { ptr::write_bytes(self.slot_ptr(column, start), 0, size * count) };
        }

        unsafe {
            ptr::copy_nonoverlapping(
                entities.as_ptr(),
                self.slot_ptr(0, start) as *mut Entity,
                count,
            );
        }

        count
    }

    /// Remove the entity in `slot` by moving the last entity into its place.
    ///
    /// Returns the entity which was moved and the slot it now occupies, or
    /// `None` if `slot` was the last one. The removed entity's data is left
    /// behind the new end unless vacated slots are zeroed.
    ///
    /// # Panics
    /// If `slot` is not occupied.
    pub fn delete(&mut self, slot: usize) -> Option<(Entity, usize)> {
        assert!(slot < self.len, "slot {} is not occupied", slot);

        let last = self.len - 1;
        let moved = if slot != last {
            let (moved, _) = self.move_slot(last, slot);
            Some((moved, slot))
        } else {
            None
        };

        if self.zero_vacated {
            self.zero_slot(last, true);
        }

        self.len -= 1;
        moved
    }

    /// Remove several entities at once.
    ///
    /// Slots may be given in any order and may repeat. Returns the final slot
    /// of every surviving entity which was moved.
    pub fn delete_batch(&mut self, slots: &[usize]) -> Vec<(Entity, usize)> {
        let mut slots = slots.to_vec();
        slots.sort_unstable_by(|a, b| b.cmp(a));
        slots.dedup();

        let mut moves: Vec<(Entity, usize)> = Vec::new();
        let mut index: HashMap<Entity, usize> = HashMap::new();

        for slot in slots {
            if let Some((entity, to)) = self.delete(slot) {
                match index.get(&entity) {
                    Some(&i) => moves[i].1 = to,
                    None => {
                        index.insert(entity, moves.len());
                        moves.push((entity, to));
                    }
                }
            }
        }

        moves
    }

    /// Swap the contents of two occupied slots, handles included.
    ///
    /// Deletion compacts through this. Returns the entities now occupying `to`
    /// and `from`, in that order.
    pub fn move_slot(&mut self, from: usize, to: usize) -> (Entity, Entity) {
        assert!(from < self.len && to < self.len, "slots must be occupied");

        if from != to {
            for column in 0..self.layout.columns().len() {
                let size = self.layout.columns()[column].size();
                unsafe {
                    ptr::swap_nonoverlapping(
                        self.slot_ptr(column, from),
                        self.slot_ptr(column, to),
                        size,
                    )
                };
            }
        }

        let entities = self.entities();
        (entities[to], entities[from])
    }

    /// Copy raw component bytes into several slots.
    ///
    /// With `advance_src`, `src` holds one element per destination slot;
    /// otherwise it holds a single element written to every slot.
    pub fn copy_from(
        &mut self,
        ty: ComponentTypeID,
        src: &[u8],
        dest_slots: &[usize],
        advance_src: bool,
    ) -> Result<()> {
        let column = self
            .layout
            .column_index(ty)
            .ok_or(StoreError::MissingComponent { component: ty })?;
        if column == 0 {
            return Err(StoreError::lock(ty, LockViolationReason::ReadHeld));
        }

        let size = self.layout.columns()[column].size();
        let expected = if advance_src { size * dest_slots.len() } else { size };
        if src.len() != expected {
            return Err(StoreError::SizeMismatch {
                expected,
                found: src.len(),
            });
        }

        if size == 0 {
            return Ok(());
        }

        for (i, slot) in dest_slots.iter().copied().enumerate() {
            assert!(slot < self.len, "slot {} is not occupied", slot);

            let src_offset = if advance_src { i * size } else { 0 };
            unsafe {
                ptr::copy_nonoverlapping(
                    src.as_ptr().add(src_offset),
                    self.slot_ptr(column, slot),
                    size,
                );
            }
        }

        Ok(())
    }

    /// Write one value into every slot listed.
    pub fn fill<T: Component>(&mut self, dest_slots: &[usize], value: &T) -> Result<()> {
        self.copy_from(T::type_id(), bytemuck::bytes_of(value), dest_slots, false)
    }

    /// Write `values[i]` into `dest_slots[i]`.
    pub fn write_slots<T: Component>(&mut self, dest_slots: &[usize], values: &[T]) -> Result<()> {
        self.copy_from(T::type_id(), bytemuck::cast_slice(values), dest_slots, true)
    }

    /// Copy every component `src` and `dst` have in common from one slot to
    /// another. The handle column is left alone.
    ///
    /// Returns the number of columns copied.
    pub fn copy_shared(src: &Chunk, src_slot: usize, dst: &mut Chunk, dst_slot: usize) -> usize {
        assert!(src_slot < src.len && dst_slot < dst.len, "slots must be occupied");

        let src_columns = src.layout.columns();
        let dst_columns = dst.layout.columns();
        let mut i = 1;
        let mut j = 1;
        let mut copied = 0;

        while i < src_columns.len() && j < dst_columns.len() {
            match src_columns[i].id().cmp(&dst_columns[j].id()) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    let size = src_columns[i].size();
                    unsafe {
                        ptr::copy_nonoverlapping(
                            src.slot_ptr(i, src_slot),
                            dst.slot_ptr(j, dst_slot),
                            size,
                        );
                    }
                    copied += 1;
                    i += 1;
                    j += 1;
                }
            }
        }

        copied
    }

    /// Read one component of one slot by value.
    pub fn get<T: Component>(&self, slot: usize) -> Result<T> {
        let column = self.read::<T>()?;
        column
            .get(slot)
            .copied()
            .ok_or(StoreError::MissingComponent { component: T::type_id() })
    }
}

impl Drop for Chunk {
    fn drop(&mut self) {
        unsafe { self.allocator.free(self.ptr, self.layout.memory_layout()) }
    }
}

impl Debug for Chunk {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("spec", self.layout.spec())
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use bytemuck::{Pod, Zeroable};

    use super::*;
    use crate::alloc::HeapAllocator;
    use crate::component;
    use crate::spec;

    #[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
    #[repr(C)]
    struct A(u32);
    #[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
    #[repr(C)]
    struct B(u64);
    #[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
    #[repr(C)]
    struct C(u8);
    #[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
    #[repr(C)]
    struct Unit;

    component!(A, B, C, Unit);

    fn chunk(capacity: usize, zero_vacated: bool) -> Chunk {
        let spec = spec!(A, B).unwrap();
        let layout = Arc::new(ChunkLayout::new(spec, capacity).unwrap());
        Chunk::new(layout, Arc::new(HeapAllocator), zero_vacated).unwrap()
    }

    fn e(raw: u32) -> Entity {
        Entity::from_raw(raw)
    }

    #[test]
    fn test_create_until_full() {
        let mut chunk = chunk(4, false);
        for i in 0..4 {
            assert_eq!(chunk.create(e(i + 1)).unwrap(), i as usize);
        }
        assert!(chunk.is_full());
        assert_eq!(chunk.create(e(9)), Err(StoreError::ChunkFull));
        assert_eq!(chunk.entities(), &[e(1), e(2), e(3), e(4)]);
    }

    #[test]
    fn test_create_batch_partial() {
        let mut chunk = chunk(4, false);
        chunk.create(e(1)).unwrap();
        let placed = chunk.create_batch(&[e(2), e(3), e(4), e(5), e(6)]);
        assert_eq!(placed, 3);
        assert_eq!(chunk.len(), 4);
        assert_eq!(chunk.entities()[3], e(4));
    }

    #[test]
    fn test_delete_compacts() {
        let mut chunk = chunk(8, false);
        chunk.create(e(1)).unwrap();
        chunk.create(e(2)).unwrap();
        chunk.column_mut::<A>().unwrap().copy_from_slice(&[A(10), A(20)]);

        assert_eq!(chunk.delete(0), Some((e(2), 0)));
        assert_eq!(chunk.len(), 1);
        assert_eq!(chunk.entities(), &[e(2)]);
        assert_eq!(chunk.column_mut::<A>().unwrap(), &[A(20)]);

        assert_eq!(chunk.delete(0), None);
        assert!(chunk.is_empty());
    }

    #[test]
    fn test_zero_vacated() {
        fn stale_b(zero_vacated: bool) -> u64 {
            let mut chunk = chunk(8, zero_vacated);
            chunk.create(e(1)).unwrap();
            chunk.create(e(2)).unwrap();
            chunk.column_mut::<B>().unwrap().copy_from_slice(&[B(7), B(8)]);
            chunk.delete(0);

            let column = chunk.layout().column_index(B::type_id()).unwrap();
            unsafe { *(chunk.slot_ptr(column, 1) as *const u64) }
        }

        assert_eq!(stale_b(true), 0);
        // Without zeroing the removed entity's value is swapped past the end.
        assert_eq!(stale_b(false), 7);
    }

    #[test]
    fn test_delete_batch_any_order() {
        let mut chunk = chunk(8, false);
        for i in 1..=8 {
            chunk.create(e(i)).unwrap();
        }
        let values: Vec<A> = (1..=8).map(A).collect();
        chunk.column_mut::<A>().unwrap().copy_from_slice(&values);

        let moves = chunk.delete_batch(&[1, 6, 0, 3, 6]);
        assert_eq!(chunk.len(), 4);

        let survivors = chunk.entities().to_vec();
        let column = chunk.column_mut::<A>().unwrap().to_vec();
        for (slot, entity) in survivors.iter().enumerate() {
            assert!(![1, 2, 4, 7].contains(&entity.to_raw()));
            assert_eq!(column[slot].0, entity.to_raw());
        }
        for (entity, slot) in moves {
            assert_eq!(survivors[slot], entity);
        }
    }

    #[test]
    fn test_move_slot_swaps() {
        let mut chunk = chunk(4, false);
        chunk.create(e(1)).unwrap();
        chunk.create(e(2)).unwrap();
        chunk.column_mut::<A>().unwrap().copy_from_slice(&[A(1), A(2)]);

        assert_eq!(chunk.move_slot(0, 1), (e(1), e(2)));
        assert_eq!(chunk.entities(), &[e(2), e(1)]);
        assert_eq!(chunk.column_mut::<A>().unwrap(), &[A(2), A(1)]);
    }

    #[test]
    fn test_type_checks() {
        let mut chunk = chunk(4, false);
        chunk.create(e(1)).unwrap();

        assert!(matches!(
            chunk.get_column::<A>(B::component_type()),
            Err(StoreError::TypeMismatch { .. })
        ));
        assert!(matches!(
            chunk.column_mut::<C>(),
            Err(StoreError::MissingComponent { .. })
        ));
        assert!(chunk.write::<Entity>().is_err());
        assert_eq!(chunk.read::<Entity>().unwrap()[0], e(1));
    }

    #[test]
    fn test_copy_from() {
        let mut chunk = chunk(8, false);
        for i in 1..=4 {
            chunk.create(e(i)).unwrap();
        }

        chunk.fill(&[0, 2], &A(9)).unwrap();
        chunk.write_slots(&[3, 1], &[A(30), A(10)]).unwrap();
        assert_eq!(chunk.column_mut::<A>().unwrap(), &[A(9), A(10), A(9), A(30)]);

        assert_eq!(
            chunk.copy_from(A::type_id(), &[0u8; 3], &[0], true),
            Err(StoreError::SizeMismatch { expected: 4, found: 3 })
        );
        assert!(chunk.fill(&[0], &C(1)).is_err());
    }

    #[test]
    fn test_copy_shared() {
        let layout_ac = Arc::new(ChunkLayout::new(spec!(A, C).unwrap(), 4).unwrap());
        let mut src = chunk(4, false);
        let mut dst = Chunk::new(layout_ac, Arc::new(HeapAllocator), false).unwrap();

        src.create(e(1)).unwrap();
        src.column_mut::<A>().unwrap()[0] = A(42);
        src.column_mut::<B>().unwrap()[0] = B(43);
        dst.create(e(1)).unwrap();

        assert_eq!(Chunk::copy_shared(&src, 0, &mut dst, 0), 1);
        assert_eq!(dst.column_mut::<A>().unwrap(), &[A(42)]);
        assert_eq!(dst.column_mut::<C>().unwrap(), &[C(0)]);
    }

    #[test]
    fn test_zero_sized_column() {
        let layout = Arc::new(ChunkLayout::new(spec!(Unit, A).unwrap(), 4).unwrap());
        let mut chunk = Chunk::new(layout, Arc::new(HeapAllocator), false).unwrap();
        chunk.create(e(1)).unwrap();
        chunk.fill(&[0], &Unit).unwrap();
        assert_eq!(chunk.read::<Unit>().unwrap().len(), 1);
    }

    #[test]
    fn test_locks_are_per_column() {
        let mut chunk = chunk(4, false);
        chunk.create(e(1)).unwrap();

        let a = chunk.read::<A>().unwrap();
        let mut b = chunk.write::<B>().unwrap();
        b[0] = B(3);
        assert!(chunk.write::<A>().is_err());
        assert!(chunk.read::<B>().is_err());
        assert!(chunk.read::<A>().is_err());
        assert_eq!(a[0], A(0));
        drop(a);
        drop(b);

        assert!(chunk.is_unlocked());
        assert_eq!(chunk.get::<B>(0).unwrap(), B(3));
    }
}
