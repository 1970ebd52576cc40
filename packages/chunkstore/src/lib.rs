//! An archetype-based, chunked entity component store.
//!
//! Entities sharing one exact set of components live together in fixed-size
//! chunks, one column per component. Adding or removing a component migrates
//! the entity to the archetype for its new set. Queries select archetypes by
//! component set and hand out per-column locks on their chunks.
//!
//! Component types are plain value blobs:
//!
//! ```ignore
//! use chunkstore::{bytemuck, component, spec, World};
//!
//! #[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
//! #[repr(C)]
//! struct Position(f32, f32);
//! component!(Position);
//!
//! let mut world = World::new();
//! let entity = world.create_entity(&spec!(Position)?)?;
//! world.set_component(entity, Position(1.0, 2.0))?;
//! ```

pub use bytemuck;

pub use alloc::{ChunkAllocator, HeapAllocator, PooledAllocator};
pub use archetype::{Archetype, ArchetypeRegistry, ChunkLayout};
pub use chunk::Chunk;
pub use chunk_list::{ChunkList, Migration, Placement};
pub use component::{Component, ComponentType, ComponentTypeID};
pub use config::StoreConfig;
pub use entity::{Entity, EntityLocation, EntityPool, ENTITY_MAX};
pub use error::{LockViolationReason, Result, StoreError};
pub use lock::{ColumnMut, ColumnRef};
pub use query::{ChunkView, ComponentAccess, Filter, Project, Projection, Query, QueryBuilder, View};
pub use spec::{EntitySpec, SpecId};
pub use world::World;

pub mod alloc;
pub mod archetype;
pub mod chunk;
pub mod chunk_list;
pub mod component;
pub mod component_set;
pub mod config;
pub mod entity;
pub mod error;
pub mod lock;
pub mod query;
pub mod spec;
pub mod world;
