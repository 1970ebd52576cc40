//! Queries select archetypes by component set and expose their chunks.
//!
//! A `Query` records which components an archetype must have, may have one of,
//! or must not have, and which columns the caller intends to read or write.
//! The access list is plain data so an external scheduler can reason about
//! which queries may run side by side.

use std::fmt::{self, Debug, Formatter};
use std::marker::PhantomData;
use std::sync::Arc;

use crate::archetype::Archetype;
use crate::chunk::Chunk;
use crate::component::{Component, ComponentType, ComponentTypeID};
use crate::component_set;
use crate::entity::Entity;
use crate::error::{LockViolationReason, Result, StoreError};
use crate::lock::{ColumnMut, ColumnRef};
use crate::spec::EntitySpec;

/// A declared access to one component column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentAccess {
    pub component_type: ComponentType,
    pub writable: bool,
}

struct QueryInner {
    all: Vec<ComponentType>,
    any: Vec<ComponentType>,
    none: Vec<ComponentType>,
    access: Vec<ComponentAccess>,
}

/// A compiled archetype filter plus the column accesses it is allowed.
#[derive(Clone)]
pub struct Query(Arc<QueryInner>);

impl Query {
    pub fn builder() -> QueryBuilder {
        QueryBuilder::new()
    }

    /// Build the query declared by a `View` type.
    pub fn of<'a, V: View<'a>>() -> Result<Query> {
        V::declare(QueryBuilder::new()).build()
    }

    /// Component types every matching archetype has.
    pub fn all(&self) -> &[ComponentType] {
        &self.0.all
    }

    /// Component types of which a matching archetype has at least one.
    pub fn any(&self) -> &[ComponentType] {
        &self.0.any
    }

    /// Component types no matching archetype has.
    pub fn none(&self) -> &[ComponentType] {
        &self.0.none
    }

    /// The declared column accesses, sorted by component type.
    pub fn access(&self) -> &[ComponentAccess] {
        &self.0.access
    }

    fn declared(&self, id: ComponentTypeID) -> Option<ComponentAccess> {
        self.0
            .access
            .binary_search_by(|a| a.component_type.id().cmp(&id))
            .ok()
            .map(|idx| self.0.access[idx])
    }

    /// Returns true if archetypes with this spec satisfy the query.
    pub fn matches(&self, spec: &EntitySpec) -> bool {
        let types = spec.component_types();
        component_set::is_superset(types, &self.0.all)
            && (self.0.any.is_empty() || component_set::has_any(types, &self.0.any))
            && !component_set::has_any(types, &self.0.none)
    }
}

impl Debug for Query {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("all", &self.0.all)
            .field("any", &self.0.any)
            .field("none", &self.0.none)
            .field("access", &self.0.access)
            .finish()
    }
}

/// Builds a `Query` one component at a time.
#[derive(Default, Clone, Debug)]
pub struct QueryBuilder {
    all: Vec<ComponentType>,
    any: Vec<ComponentType>,
    none: Vec<ComponentType>,
    access: Vec<ComponentAccess>,
}

impl QueryBuilder {
    pub fn new() -> QueryBuilder {
        QueryBuilder::default()
    }

    /// Require `T` and declare read access to it.
    pub fn read<T: Component>(self) -> QueryBuilder {
        self.require_access(T::component_type(), false)
    }

    /// Require `T` and declare write access to it.
    pub fn write<T: Component>(self) -> QueryBuilder {
        self.require_access(T::component_type(), true)
    }

    /// Declare read access to `T` without requiring it.
    pub fn read_optional<T: Component>(mut self) -> QueryBuilder {
        self.access.push(ComponentAccess {
            component_type: T::component_type(),
            writable: false,
        });
        self
    }

    /// Declare write access to `T` without requiring it.
    pub fn write_optional<T: Component>(mut self) -> QueryBuilder {
        self.access.push(ComponentAccess {
            component_type: T::component_type(),
            writable: true,
        });
        self
    }

    /// Require `T` without accessing it.
    pub fn with<T: Component>(self) -> QueryBuilder {
        self.with_type(T::component_type())
    }

    pub fn with_type(mut self, ty: ComponentType) -> QueryBuilder {
        self.all.push(ty);
        self
    }

    /// Require at least one of the types passed to `any`.
    pub fn any<T: Component>(mut self) -> QueryBuilder {
        self.any.push(T::component_type());
        self
    }

    /// Exclude archetypes with `T`.
    pub fn without<T: Component>(mut self) -> QueryBuilder {
        self.none.push(T::component_type());
        self
    }

    fn require_access(mut self, ty: ComponentType, writable: bool) -> QueryBuilder {
        self.all.push(ty);
        self.access.push(ComponentAccess {
            component_type: ty,
            writable,
        });
        self
    }

    /// Finish the query.
    ///
    /// A component type may only be declared once per list. The entity handle
    /// column is always readable and may not be declared.
    pub fn build(self) -> Result<Query> {
        let QueryBuilder {
            mut all,
            mut any,
            mut none,
            mut access,
        } = self;

        for list in [&mut all, &mut any, &mut none] {
            list.sort();
            if let Some(ty) = component_set::first_duplicate(list) {
                return Err(StoreError::DuplicateComponentInSpec(ty.id()));
            }
        }

        access.sort_by_key(|a| a.component_type);
        let ids: Vec<_> = access.iter().map(|a| a.component_type.id()).collect();
        if let Some(id) = component_set::first_duplicate(&ids) {
            return Err(StoreError::DuplicateComponentInSpec(id));
        }

        let touches_entity = all
            .iter()
            .chain(any.iter())
            .chain(none.iter())
            .any(|ty| ty.id() == ComponentTypeID::ENTITY);
        if touches_entity || ids.first() == Some(&ComponentTypeID::ENTITY) {
            return Err(StoreError::DuplicateComponentInSpec(ComponentTypeID::ENTITY));
        }

        Ok(Query(Arc::new(QueryInner {
            all,
            any,
            none,
            access,
        })))
    }
}

/// One non-empty chunk of a matching archetype, seen through a query.
///
/// Column access is limited to what the query declared.
pub struct ChunkView<'a> {
    chunk: &'a Chunk,
    archetype: usize,
    chunk_index: usize,
    query: Query,
}

impl<'a> ChunkView<'a> {
    pub(crate) fn new(
        chunk: &'a Chunk,
        archetype: usize,
        chunk_index: usize,
        query: Query,
    ) -> ChunkView<'a> {
        ChunkView {
            chunk,
            archetype,
            chunk_index,
            query,
        }
    }

    /// Return the index of the archetype this chunk belongs to.
    pub fn archetype(&self) -> usize {
        self.archetype
    }

    /// Return the index of this chunk within its archetype.
    pub fn chunk_index(&self) -> usize {
        self.chunk_index
    }

    pub fn len(&self) -> usize {
        self.chunk.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunk.is_empty()
    }

    /// Return the entity handles of the chunk, by slot.
    pub fn entities(&self) -> &'a [Entity] {
        self.chunk.entities()
    }

    /// Returns true if the chunk stores `T`.
    pub fn has<T: Component>(&self) -> bool {
        self.chunk.has_column(T::type_id())
    }

    /// Read-lock the column of `T`.
    pub fn read<T: Component>(&self) -> Result<ColumnRef<'a, T>> {
        if self.query.declared(T::type_id()).is_none() {
            return Err(StoreError::lock(T::type_id(), LockViolationReason::UndeclaredAccess));
        }
        self.chunk.read::<T>()
    }

    /// Write-lock the column of `T`.
    pub fn write<T: Component>(&self) -> Result<ColumnMut<'a, T>> {
        match self.query.declared(T::type_id()) {
            Some(access) if access.writable => self.chunk.write::<T>(),
            _ => Err(StoreError::lock(T::type_id(), LockViolationReason::UndeclaredAccess)),
        }
    }
}

impl<'a> Debug for ChunkView<'a> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkView")
            .field("archetype", &self.archetype)
            .field("chunk", &self.chunk_index)
            .field("len", &self.len())
            .finish()
    }
}

/// A typed set of columns fetched from one chunk.
///
/// Implemented for `ColumnRef<T>` (read), `ColumnMut<T>` (write), `Option`s of
/// either (not required) and tuples of up to eight views.
pub trait View<'a>: Sized {
    /// Add this view's requirements and accesses to a query.
    fn declare(builder: QueryBuilder) -> QueryBuilder;

    /// Lock and fetch the columns from a chunk.
    fn fetch(chunk: &ChunkView<'a>) -> Result<Self>;
}

impl<'a, T: Component> View<'a> for ColumnRef<'a, T> {
    fn declare(builder: QueryBuilder) -> QueryBuilder {
        builder.read::<T>()
    }

    fn fetch(chunk: &ChunkView<'a>) -> Result<Self> {
        chunk.read::<T>()
    }
}

impl<'a, T: Component> View<'a> for ColumnMut<'a, T> {
    fn declare(builder: QueryBuilder) -> QueryBuilder {
        builder.write::<T>()
    }

    fn fetch(chunk: &ChunkView<'a>) -> Result<Self> {
        chunk.write::<T>()
    }
}

impl<'a, T: Component> View<'a> for Option<ColumnRef<'a, T>> {
    fn declare(builder: QueryBuilder) -> QueryBuilder {
        builder.read_optional::<T>()
    }

    fn fetch(chunk: &ChunkView<'a>) -> Result<Self> {
        if chunk.has::<T>() {
            chunk.read::<T>().map(Some)
        } else {
            Ok(None)
        }
    }
}

impl<'a, T: Component> View<'a> for Option<ColumnMut<'a, T>> {
    fn declare(builder: QueryBuilder) -> QueryBuilder {
        builder.write_optional::<T>()
    }

    fn fetch(chunk: &ChunkView<'a>) -> Result<Self> {
        if chunk.has::<T>() {
            chunk.write::<T>().map(Some)
        } else {
            Ok(None)
        }
    }
}

macro_rules! impl_view_tuple {
    ($($v:ident),+) => {
        impl<'a, $($v: View<'a>),+> View<'a> for ($($v,)+) {
            fn declare(builder: QueryBuilder) -> QueryBuilder {
                $(let builder = $v::declare(builder);)+
                builder
            }

            fn fetch(chunk: &ChunkView<'a>) -> Result<Self> {
                Ok(($($v::fetch(chunk)?,)+))
            }
        }
    };
}

impl_view_tuple!(A);
impl_view_tuple!(A, B);
impl_view_tuple!(A, B, C);
impl_view_tuple!(A, B, C, D);
impl_view_tuple!(A, B, C, D, E);
impl_view_tuple!(A, B, C, D, E, F);
impl_view_tuple!(A, B, C, D, E, F, G);
impl_view_tuple!(A, B, C, D, E, F, G, H);

/// The columns of one chunk, fetched through a `View`.
pub struct Projection<'a, V> {
    pub entities: &'a [Entity],
    pub columns: V,
    pub archetype: usize,
}

/// Iterates over the non-empty chunks of every archetype a query matches.
pub struct Filter<'a> {
    archetypes: std::slice::Iter<'a, Archetype>,
    chunks: Option<(usize, std::iter::Enumerate<std::slice::Iter<'a, Chunk>>)>,
    query: Query,
}

impl<'a> Filter<'a> {
    pub(crate) fn new(archetypes: &'a [Archetype], query: Query) -> Filter<'a> {
        Filter {
            archetypes: archetypes.iter(),
            chunks: None,
            query,
        }
    }
}

impl<'a> Iterator for Filter<'a> {
    type Item = ChunkView<'a>;

    fn next(&mut self) -> Option<ChunkView<'a>> {
        loop {
            if let Some((archetype, chunks)) = &mut self.chunks {
                for (index, chunk) in chunks.by_ref() {
                    if !chunk.is_empty() {
                        return Some(ChunkView::new(chunk, *archetype, index, self.query.clone()));
                    }
                }
            }

            let archetype = self.archetypes.by_ref().find(|a| self.query.matches(a.spec()))?;
            self.chunks = Some((archetype.id(), archetype.chunks().chunks().iter().enumerate()));
        }
    }
}

/// Iterates over the chunks a `View` matches, fetching its columns from each.
pub struct Project<'a, V> {
    filter: Filter<'a>,
    _view: PhantomData<fn() -> V>,
}

impl<'a, V: View<'a>> Project<'a, V> {
    pub(crate) fn new(filter: Filter<'a>) -> Project<'a, V> {
        Project {
            filter,
            _view: PhantomData,
        }
    }
}

impl<'a, V: View<'a>> Iterator for Project<'a, V> {
    type Item = Result<Projection<'a, V>>;

    fn next(&mut self) -> Option<Self::Item> {
        let view = self.filter.next()?;
        Some(V::fetch(&view).map(|columns| Projection {
            entities: view.entities(),
            columns,
            archetype: view.archetype(),
        }))
    }
}

#[cfg(test)]
mod test {
    use bytemuck::{Pod, Zeroable};

    use super::*;
    use crate::{component, spec};

    #[derive(Debug, Clone, Copy, Pod, Zeroable)]
    #[repr(C)]
    struct P(f32);
    #[derive(Debug, Clone, Copy, Pod, Zeroable)]
    #[repr(C)]
    struct V(f32);
    #[derive(Debug, Clone, Copy, Pod, Zeroable)]
    #[repr(C)]
    struct Frozen(u8);

    component!(P, V, Frozen);

    #[test]
    fn test_matches() {
        let query = Query::builder().read::<P>().without::<Frozen>().build().unwrap();

        assert!(query.matches(&spec!(P).unwrap()));
        assert!(query.matches(&spec!(P, V).unwrap()));
        assert!(!query.matches(&spec!(V).unwrap()));
        assert!(!query.matches(&spec!(P, Frozen).unwrap()));

        let any = Query::builder().any::<P>().any::<V>().build().unwrap();
        assert!(any.matches(&spec!(V, Frozen).unwrap()));
        assert!(!any.matches(&spec!(Frozen).unwrap()));
    }

    #[test]
    fn test_access_declarations() {
        let query = Query::of::<(ColumnRef<P>, ColumnMut<V>, Option<ColumnRef<Frozen>>)>().unwrap();

        assert_eq!(query.all().len(), 2);
        let access: Vec<_> = query
            .access()
            .iter()
            .map(|a| (a.component_type.id(), a.writable))
            .collect();
        let mut expected = vec![
            (P::type_id(), false),
            (V::type_id(), true),
            (Frozen::type_id(), false),
        ];
        expected.sort();
        assert_eq!(access, expected);
    }

    #[test]
    fn test_rejects_duplicates() {
        assert_eq!(
            Query::builder().read::<P>().write::<P>().build().err(),
            Some(StoreError::DuplicateComponentInSpec(P::type_id()))
        );
        assert!(Query::builder().with::<P>().read::<P>().build().is_err());
        assert!(Query::builder().read::<Entity>().build().is_err());
        assert!(Query::builder().with::<P>().without::<V>().build().is_ok());
    }
}
