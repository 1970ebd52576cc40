//! Errors raised by the storage engine.
//!
//! Set algebra and chunk-local queries are total and never produce these.
//! Structural changes and typed column access fail immediately with a
//! `StoreError`, since every variant here points at a caller bug rather than
//! a transient condition.

use std::fmt;

use thiserror::Error;

use crate::component::{ComponentType, ComponentTypeID};
use crate::entity::Entity;

/// Shorthand for results produced by this crate.
pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// Why a column lock could not be taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockViolationReason {
    /// The column is exclusively locked for writing.
    WriteHeld,
    /// A write was requested while at least one reader holds the column.
    ReadHeld,
    /// The current thread already holds a read lock on the column.
    ReentrantRead,
    /// The query the access was made through never declared it.
    UndeclaredAccess,
}

impl fmt::Display for LockViolationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            LockViolationReason::WriteHeld => "column is write-locked",
            LockViolationReason::ReadHeld => "column has active readers",
            LockViolationReason::ReentrantRead => "column is already read-locked by this thread",
            LockViolationReason::UndeclaredAccess => "access was not declared by the query",
        };
        f.write_str(reason)
    }
}

/// The error type for all fallible storage operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The entity was destroyed, never created, or is the null handle.
    #[error("invalid entity handle {0:?}")]
    InvalidHandle(Entity),

    /// A column was requested as a different component type.
    #[error("component type mismatch: expected {expected:?}, found {found:?}")]
    TypeMismatch {
        expected: ComponentType,
        found: ComponentType,
    },

    /// Raw component bytes did not have the length the column requires.
    #[error("component data is {found} bytes, expected {expected}")]
    SizeMismatch { expected: usize, found: usize },

    /// The archetype has no column for the component.
    #[error("component {component:?} is not part of this archetype")]
    MissingComponent { component: ComponentTypeID },

    /// The chunk has no free slots left.
    #[error("chunk is full")]
    ChunkFull,

    /// A component type occurs more than once in a spec.
    #[error("component {0:?} appears more than once in the spec")]
    DuplicateComponentInSpec(ComponentTypeID),

    /// A spec was built from no component types at all.
    #[error("an entity spec needs at least one component type")]
    EmptySpec,

    /// A column lock could not be taken.
    #[error("cannot lock column {component:?}: {reason}")]
    LockViolation {
        component: ComponentTypeID,
        reason: LockViolationReason,
    },

    /// Every archetype index is in use.
    #[error("archetype limit of {0} reached")]
    ArchetypeLimit(usize),

    /// An archetype cannot address another chunk.
    #[error("chunk limit of {0} per archetype reached")]
    ChunkLimit(usize),

    /// Every entity index is in use.
    #[error("entity limit of {0} reached")]
    EntityLimit(usize),

    /// The chunk allocator could not provide memory.
    #[error("failed to reserve {size} bytes aligned to {align}")]
    AllocationFailed { size: usize, align: usize },

    /// The store configuration is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

impl StoreError {
    pub(crate) fn lock(component: ComponentTypeID, reason: LockViolationReason) -> StoreError {
        StoreError::LockViolation { component, reason }
    }
}
