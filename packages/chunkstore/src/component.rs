//! Base definitions for components.
//!
//! All entities in this library are built out of components. There is no
//! intrinsic value to an entity beyond its handle. This module provides the
//! means of defining and registering component types.
//!
//! Each component type is allocated a unique `ComponentTypeID` the first time
//! it is registered, and keeps it for the lifetime of the process. The
//! `component!` macro wires a type into the registry lazily, so no runtime
//! type inspection is ever needed to discover components.
//!
//! Components must be plain value blobs. The `bytemuck::Pod` bound enforces
//! that at compile time: a shape containing references, pointers to managed
//! data, padding or a `Drop` impl cannot be a component.

use std::any::{type_name, TypeId};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::hash::{Hash, Hasher};
use std::mem;

use bytemuck::Pod;
use once_cell::sync::{Lazy, OnceCell};
use parking_lot::RwLock;

use crate::entity::Entity;

/// A component type ID which is unique for a specific component type.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentTypeID(u32);

impl ComponentTypeID {
    /// The ID reserved for the entity handle column every chunk carries.
    pub const ENTITY: ComponentTypeID = ComponentTypeID(0);

    /// Construct a new `ComponentTypeID` from the inner value.
    pub(crate) const fn new(inner: u32) -> ComponentTypeID {
        ComponentTypeID(inner)
    }

    /// Get the ID of a component type, registering it if needed.
    pub fn of<T: Component>() -> ComponentTypeID {
        T::type_id()
    }

    /// Return the inner unique ID.
    pub fn id(&self) -> u32 {
        self.0
    }

    /// Fetch the registered description of this ID.
    pub fn component_type(&self) -> Option<ComponentType> {
        lookup(*self)
    }
}

impl Debug for ComponentTypeID {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match lookup(*self) {
            Some(ty) => write!(f, "{}", ty.name()),
            None => write!(f, "ComponentTypeID(#{} missing)", self.0),
        }
    }
}

/// The registered shape of a component: its identity and byte footprint.
///
/// Equality, ordering and hashing only consider the ID.
#[derive(Clone, Copy)]
pub struct ComponentType {
    id: ComponentTypeID,
    size: usize,
    align: usize,
    name: &'static str,
}

impl ComponentType {
    /// Describe a static type under a given ID.
    pub(crate) fn describe<T: Pod>(id: ComponentTypeID) -> ComponentType {
        ComponentType {
            id,
            size: mem::size_of::<T>(),
            align: mem::align_of::<T>(),
            name: type_name::<T>(),
        }
    }

    /// Get the registered description of a component type.
    pub fn of<T: Component>() -> ComponentType {
        ComponentType::describe::<T>(T::type_id())
    }

    /// Return the unique type ID for this component type.
    pub fn id(&self) -> ComponentTypeID {
        self.id
    }

    /// Return the size in bytes of a single instance.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Return the alignment of a single instance.
    pub fn align(&self) -> usize {
        self.align
    }

    /// Get the name of this component type.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for ComponentType {
    fn eq(&self, other: &ComponentType) -> bool {
        self.id.eq(&other.id)
    }
}

impl Eq for ComponentType {}

impl PartialOrd for ComponentType {
    fn partial_cmp(&self, other: &ComponentType) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ComponentType {
    fn cmp(&self, other: &ComponentType) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl Hash for ComponentType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state)
    }
}

impl Debug for ComponentType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}(#{}, {} bytes)", self.name, self.id.0, self.size)
    }
}

/// The component trait is implemented on all component types.
///
/// Use the `component!` macro rather than implementing this by hand. A hand
/// written `type_id` that collides with another type's cannot break memory
/// safety (every component is `Pod`), but it will alias the two columns.
pub trait Component: Pod + Debug + Send + Sync {
    /// Get the unique type ID of this component.
    fn type_id() -> ComponentTypeID;

    /// Get the registered description of this component.
    fn component_type() -> ComponentType {
        ComponentType::describe::<Self>(Self::type_id())
    }
}

struct ComponentRegistry {
    component_types: Vec<ComponentType>,
    by_type: HashMap<TypeId, ComponentTypeID>,
}

static COMPONENT_REGISTRY: Lazy<RwLock<ComponentRegistry>> = Lazy::new(|| {
    let mut by_type = HashMap::new();
    by_type.insert(TypeId::of::<Entity>(), ComponentTypeID::ENTITY);

    RwLock::new(ComponentRegistry {
        component_types: vec![ComponentType::describe::<Entity>(ComponentTypeID::ENTITY)],
        by_type,
    })
});

/// Register a component shape, returning the existing entry if it was seen
/// before.
pub fn register<T: Pod>() -> ComponentType {
    let type_id = TypeId::of::<T>();

    if let Some(id) = COMPONENT_REGISTRY.read().by_type.get(&type_id).copied() {
        return ComponentType::describe::<T>(id);
    }

    let mut registry = COMPONENT_REGISTRY.write();
    if let Some(id) = registry.by_type.get(&type_id).copied() {
        return ComponentType::describe::<T>(id);
    }

    let id = ComponentTypeID(registry.component_types.len() as u32);
    let ty = ComponentType::describe::<T>(id);
    registry.component_types.push(ty);
    registry.by_type.insert(type_id, id);
    log::debug!("registered component {:?}", ty);
    ty
}

/// Fetch the description of a registered component type.
///
/// Unknown IDs yield `None`; nothing is ever fabricated.
pub fn lookup(id: ComponentTypeID) -> Option<ComponentType> {
    COMPONENT_REGISTRY.read().component_types.get(id.0 as usize).copied()
}

/// Returns true if the shape has been registered.
pub fn is_registered<T: 'static>() -> bool {
    COMPONENT_REGISTRY.read().by_type.contains_key(&TypeId::of::<T>())
}

/// Return the number of registered component types, including the entity
/// handle column.
pub fn registered_count() -> usize {
    COMPONENT_REGISTRY.read().component_types.len()
}

/// A struct for lazily assigning unique `ComponentTypeID`s.
pub struct AutoComponentTypeID(OnceCell<ComponentTypeID>);

impl AutoComponentTypeID {
    /// Create a new `AutoComponentTypeID`.
    pub const fn new() -> AutoComponentTypeID {
        AutoComponentTypeID(OnceCell::new())
    }

    /// Get the `ComponentTypeID` this struct wraps.
    pub fn get<T: Pod>(&self) -> ComponentTypeID {
        *self.0.get_or_init(|| register::<T>().id())
    }
}

impl Default for AutoComponentTypeID {
    fn default() -> Self {
        AutoComponentTypeID::new()
    }
}

/// Implement the `Component` trait on one or more types.
///
/// Component types must implement `bytemuck::Pod` and `Debug`.
#[macro_export]
macro_rules! component {
    ($($i:ident),+ $(,)?) => {
        $(
            const _: () = {
                static INIT_TYPE: $crate::component::AutoComponentTypeID =
                    $crate::component::AutoComponentTypeID::new();

                impl $crate::component::Component for $i {
                    fn type_id() -> $crate::component::ComponentTypeID {
                        INIT_TYPE.get::<$i>()
                    }
                }
            };
        )+
    };
}
