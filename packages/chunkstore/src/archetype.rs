//! Archetypes are the 'layout' of entities, containing a list of the attached
//! components and the chunks holding them.

use std::alloc::Layout;
use std::collections::HashMap;
use std::sync::Arc;

use crate::alloc::ChunkAllocator;
use crate::chunk_list::ChunkList;
use crate::component::{Component, ComponentType, ComponentTypeID};
use crate::config::StoreConfig;
use crate::entity::{Entity, MAX_ARCHETYPES};
use crate::error::{Result, StoreError};
use crate::spec::EntitySpec;

/// The memory layout shared by every chunk of one archetype.
///
/// Column 0 always holds entity handles. The remaining columns follow in spec
/// order, each aligned for its component type.
#[derive(Debug)]
pub struct ChunkLayout {
    spec: EntitySpec,
    columns: Vec<ComponentType>,
    offsets: Vec<usize>,
    capacity: usize,
    layout: Layout,
}

impl ChunkLayout {
    /// Calculate the layout of chunks holding `capacity` entities of `spec`.
    pub fn new(spec: EntitySpec, capacity: usize) -> Result<ChunkLayout> {
        let mut columns = Vec::with_capacity(spec.len() + 1);
        columns.push(Entity::component_type());
        columns.extend_from_slice(spec.component_types());

        let mut offsets = Vec::with_capacity(columns.len());
        let mut offset = 0usize;
        let mut align = 1usize;

        for ty in columns.iter() {
            let misalignment = offset % ty.align();
            if misalignment != 0 {
                offset += ty.align() - misalignment;
            }

            offsets.push(offset);
            align = align.max(ty.align());
            offset = capacity
                .checked_mul(ty.size())
                .and_then(|bytes| offset.checked_add(bytes))
                .ok_or(StoreError::AllocationFailed { size: usize::MAX, align })?;
        }

        let layout = Layout::from_size_align(offset, align)
            .map_err(|_| StoreError::AllocationFailed { size: offset, align })?;

        Ok(ChunkLayout {
            spec,
            columns,
            offsets,
            capacity,
            layout,
        })
    }

    pub fn spec(&self) -> &EntitySpec {
        &self.spec
    }

    /// Return the column types, starting with the entity handle column.
    pub fn columns(&self) -> &[ComponentType] {
        &self.columns
    }

    /// Return the byte offset of each column within a chunk.
    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get the required memory layout for a chunk.
    pub fn memory_layout(&self) -> Layout {
        self.layout
    }

    /// Find the column storing a component type.
    pub fn column_index(&self, id: ComponentTypeID) -> Option<usize> {
        self.columns.binary_search_by(|ty| ty.id().cmp(&id)).ok()
    }
}

/// An archetype holds every entity with one exact set of components.
pub struct Archetype {
    id: usize,
    spec: EntitySpec,
    chunks: ChunkList,
    add_edges: HashMap<ComponentTypeID, usize>,
    remove_edges: HashMap<ComponentTypeID, usize>,
}

impl Archetype {
    fn new(id: usize, spec: EntitySpec, config: &StoreConfig) -> Result<Archetype> {
        let layout = Arc::new(ChunkLayout::new(spec.clone(), config.chunk_capacity())?);
        let chunks = ChunkList::new(
            layout,
            config.allocator().clone(),
            config.zero_vacated_slots(),
        );

        Ok(Archetype {
            id,
            spec,
            chunks,
            add_edges: HashMap::new(),
            remove_edges: HashMap::new(),
        })
    }

    /// Return the index of this archetype in its registry.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Return the component set of this archetype.
    pub fn spec(&self) -> &EntitySpec {
        &self.spec
    }

    /// Return the chunks holding this archetype's entities.
    pub fn chunks(&self) -> &ChunkList {
        &self.chunks
    }

    pub fn chunks_mut(&mut self) -> &mut ChunkList {
        &mut self.chunks
    }

    /// Return the number of entities in this archetype.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Returns true if this archetype holds no entities.
    pub fn is_empty(&self) -> bool {
        self.chunks.len() == 0
    }
}

/// Every archetype created so far, addressable by index and by spec.
///
/// Archetypes are never removed.
pub struct ArchetypeRegistry {
    config: StoreConfig,
    archetypes: Vec<Archetype>,
    by_spec: HashMap<EntitySpec, usize>,
}

impl ArchetypeRegistry {
    pub fn new(config: StoreConfig) -> ArchetypeRegistry {
        ArchetypeRegistry {
            config,
            archetypes: Vec::new(),
            by_spec: HashMap::new(),
        }
    }

    /// Return the chunk allocator new archetypes are built with.
    pub fn allocator(&self) -> &Arc<dyn ChunkAllocator> {
        self.config.allocator()
    }

    /// Return the number of archetypes.
    pub fn len(&self) -> usize {
        self.archetypes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archetypes.is_empty()
    }

    pub fn get(&self, id: usize) -> Option<&Archetype> {
        self.archetypes.get(id)
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut Archetype> {
        self.archetypes.get_mut(id)
    }

    /// Iterate over every archetype in creation order.
    pub fn iter(&self) -> std::slice::Iter<'_, Archetype> {
        self.archetypes.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Archetype> {
        self.archetypes.iter_mut()
    }

    /// Find the archetype for a spec, if it exists.
    pub fn find(&self, spec: &EntitySpec) -> Option<usize> {
        self.by_spec.get(spec).copied()
    }

    /// Find or create the archetype for a spec.
    pub fn get_or_create(&mut self, spec: &EntitySpec) -> Result<usize> {
        if let Some(id) = self.find(spec) {
            return Ok(id);
        }

        let id = self.archetypes.len();
        if id >= MAX_ARCHETYPES {
            return Err(StoreError::ArchetypeLimit(MAX_ARCHETYPES));
        }

        let archetype = Archetype::new(id, spec.clone(), &self.config)?;
        log::debug!(
            "created archetype #{} {:?} ({} bytes per entity)",
            id,
            spec,
            spec.entity_size()
        );

        self.archetypes.push(archetype);
        self.by_spec.insert(spec.clone(), id);
        Ok(id)
    }

    /// Return the archetype reached by adding `ty` to archetype `from`.
    pub fn transition_add(&mut self, from: usize, ty: ComponentType) -> Result<usize> {
        if let Some(&to) = self.archetypes[from].add_edges.get(&ty.id()) {
            return Ok(to);
        }

        let spec = self.archetypes[from].spec.with(ty)?;
        let to = self.get_or_create(&spec)?;
        self.link(from, to, ty.id());
        Ok(to)
    }

    /// Return the archetype reached by removing `id` from archetype `from`.
    pub fn transition_remove(&mut self, from: usize, id: ComponentTypeID) -> Result<usize> {
        if let Some(&to) = self.archetypes[from].remove_edges.get(&id) {
            return Ok(to);
        }

        let spec = self.archetypes[from].spec.without(id)?;
        let to = self.get_or_create(&spec)?;
        self.link(to, from, id);
        Ok(to)
    }

    fn link(&mut self, smaller: usize, larger: usize, id: ComponentTypeID) {
        self.archetypes[smaller].add_edges.insert(id, larger);
        self.archetypes[larger].remove_edges.insert(id, smaller);
    }

    /// Borrow two distinct archetypes mutably.
    ///
    /// # Panics
    /// If `a == b`.
    pub fn pair_mut(&mut self, a: usize, b: usize) -> (&mut Archetype, &mut Archetype) {
        assert_ne!(a, b, "cannot borrow an archetype twice");

        if a < b {
            let (left, right) = self.archetypes.split_at_mut(b);
            (&mut left[a], &mut right[0])
        } else {
            let (left, right) = self.archetypes.split_at_mut(a);
            (&mut right[0], &mut left[b])
        }
    }
}

impl std::ops::Index<usize> for ArchetypeRegistry {
    type Output = Archetype;

    fn index(&self, index: usize) -> &Archetype {
        &self.archetypes[index]
    }
}

impl std::ops::IndexMut<usize> for ArchetypeRegistry {
    fn index_mut(&mut self, index: usize) -> &mut Archetype {
        &mut self.archetypes[index]
    }
}
