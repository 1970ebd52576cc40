//! Store configuration.

use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

use crate::alloc::{ChunkAllocator, HeapAllocator};
use crate::entity::ENTITY_MAX;
use crate::error::{Result, StoreError};

/// Tunables for a `World`.
#[derive(Clone)]
pub struct StoreConfig {
    chunk_capacity: usize,
    zero_vacated_slots: bool,
    allocator: Arc<dyn ChunkAllocator>,
}

impl StoreConfig {
    /// Set the number of entities each chunk holds.
    pub fn with_chunk_capacity(mut self, chunk_capacity: usize) -> StoreConfig {
        self.chunk_capacity = chunk_capacity;
        self
    }

    /// Zero the slot left behind by every swap-compaction.
    ///
    /// Off by default. Vacated slots are always zeroed again on reuse, so this
    /// only matters to anything inspecting raw chunk memory.
    pub fn with_zero_vacated_slots(mut self, zero: bool) -> StoreConfig {
        self.zero_vacated_slots = zero;
        self
    }

    /// Set where chunk memory comes from.
    pub fn with_allocator(mut self, allocator: Arc<dyn ChunkAllocator>) -> StoreConfig {
        self.allocator = allocator;
        self
    }

    pub fn chunk_capacity(&self) -> usize {
        self.chunk_capacity
    }

    pub fn zero_vacated_slots(&self) -> bool {
        self.zero_vacated_slots
    }

    pub fn allocator(&self) -> &Arc<dyn ChunkAllocator> {
        &self.allocator
    }

    /// Check the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_capacity == 0 {
            return Err(StoreError::InvalidConfig("chunk capacity must be at least 1"));
        }

        if self.chunk_capacity > ENTITY_MAX {
            return Err(StoreError::InvalidConfig("chunk capacity exceeds the slot index range"));
        }

        Ok(())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            chunk_capacity: ENTITY_MAX,
            zero_vacated_slots: false,
            allocator: Arc::new(HeapAllocator),
        }
    }
}

impl Debug for StoreConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("chunk_capacity", &self.chunk_capacity)
            .field("zero_vacated_slots", &self.zero_vacated_slots)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.chunk_capacity(), ENTITY_MAX);
        assert!(!config.zero_vacated_slots());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate() {
        assert!(StoreConfig::default().with_chunk_capacity(0).validate().is_err());
        assert!(StoreConfig::default().with_chunk_capacity(ENTITY_MAX + 1).validate().is_err());
        assert!(StoreConfig::default().with_chunk_capacity(1).validate().is_ok());
    }
}
