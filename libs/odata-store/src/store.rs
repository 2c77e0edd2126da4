//! The generic transactional row-store interface.

use async_trait::async_trait;
use odata_model::{EntityDescriptor, Expr, KeyValues, NavigationDescriptor, OrderBy, PropertyDescriptor, Row};

use crate::error::StoreResult;

/// What a store can do natively. Everything else is done in memory by the caller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub search: bool,
    pub select: bool,
}

/// A navigation property between two entity types.
#[derive(Clone, Copy, Debug)]
pub struct Association<'a> {
    pub owner: &'a EntityDescriptor,
    pub property: &'a PropertyDescriptor,
    pub navigation: &'a NavigationDescriptor,
    pub target: &'a EntityDescriptor,
}

impl<'a> Association<'a> {
    /// `None` when `property` is not a navigation.
    #[must_use]
    pub fn new(
        owner: &'a EntityDescriptor,
        property: &'a PropertyDescriptor,
        target: &'a EntityDescriptor,
    ) -> Option<Self> {
        property.navigation.as_ref().map(|navigation| Self {
            owner,
            property,
            navigation,
            target,
        })
    }

    /// Name of the edge table backing an association-table navigation.
    #[must_use]
    pub fn link_table(&self) -> String {
        format!("{}_{}", self.owner.table_name(), self.property.name)
    }
}

/// Where rows come from.
#[derive(Clone, Debug)]
pub enum Source<'a> {
    /// The whole entity set of `FindQuery::entity`.
    EntitySet,
    /// Rows related to one owner row through a navigation property.
    Navigation {
        association: Association<'a>,
        owner_key: KeyValues,
    },
}

/// One read against a store. Predicates are ANDed.
#[derive(Clone, Debug)]
pub struct FindQuery<'a> {
    pub entity: &'a EntityDescriptor,
    pub source: Source<'a>,
    pub predicates: Vec<Expr>,
    /// Property names.
    pub order: OrderBy,
    pub top: Option<u64>,
    pub skip: Option<u64>,
    pub search: Option<String>,
    /// Only honored by stores with `Capabilities::select`; keys and order
    /// columns are always returned.
    pub select: Option<Vec<String>>,
    pub apply: Option<String>,
    pub compute: Option<String>,
}

impl<'a> FindQuery<'a> {
    #[must_use]
    pub fn new(entity: &'a EntityDescriptor) -> Self {
        Self {
            entity,
            source: Source::EntitySet,
            predicates: Vec::new(),
            order: OrderBy::empty(),
            top: None,
            skip: None,
            search: None,
            select: None,
            apply: None,
            compute: None,
        }
    }

    /// Rows of `association.target` related to the owner identified by `owner_key`.
    #[must_use]
    pub fn related(association: Association<'a>, owner_key: KeyValues) -> Self {
        Self {
            source: Source::Navigation {
                association,
                owner_key,
            },
            ..Self::new(association.target)
        }
    }

    /// Exactly the row with `key`.
    #[must_use]
    pub fn by_key(entity: &'a EntityDescriptor, key: &KeyValues) -> Self {
        Self::new(entity).filter(key.to_predicate())
    }

    #[must_use]
    pub fn filter(mut self, predicate: Expr) -> Self {
        self.predicates.push(predicate);
        self
    }

    #[must_use]
    pub fn order(mut self, order: OrderBy) -> Self {
        self.order = order;
        self
    }

    #[must_use]
    pub fn limit(mut self, top: u64) -> Self {
        self.top = Some(top);
        self
    }

    #[must_use]
    pub fn offset(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    #[must_use]
    pub fn search(mut self, term: impl Into<String>) -> Self {
        self.search = Some(term.into());
        self
    }

    /// Same filtering, no ordering or paging. Used for `$count`.
    #[must_use]
    pub fn unpaged(&self) -> Self {
        Self {
            order: OrderBy::empty(),
            top: None,
            skip: None,
            select: None,
            ..self.clone()
        }
    }
}

/// Entry point of a store: opens transactions.
#[async_trait]
pub trait RowStore: Send + Sync {
    /// # Errors
    /// Returns `StoreError::Backend` if no transaction can be started.
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>>;

    fn capabilities(&self) -> Capabilities;
}

/// One open transaction. Dropping it without `commit` discards its writes.
#[async_trait]
pub trait StoreTx: Send {
    async fn find(&mut self, query: &FindQuery<'_>) -> StoreResult<Vec<Row>>;

    async fn count(&mut self, query: &FindQuery<'_>) -> StoreResult<u64>;

    /// Insert `row`; returns the stored row including generated keys.
    async fn create(&mut self, entity: &EntityDescriptor, row: &Row) -> StoreResult<Row>;

    /// Apply `changes` to the row with `key`; returns the stored row.
    async fn update(&mut self, entity: &EntityDescriptor, key: &KeyValues, changes: &Row) -> StoreResult<Row>;

    async fn delete(&mut self, entity: &EntityDescriptor, key: &KeyValues) -> StoreResult<()>;

    /// Add one edge. Idempotent for an edge that already exists.
    async fn append_association(
        &mut self,
        association: &Association<'_>,
        owner: &KeyValues,
        target: &KeyValues,
    ) -> StoreResult<()>;

    /// Make the owner's membership exactly `targets`.
    async fn replace_associations(
        &mut self,
        association: &Association<'_>,
        owner: &KeyValues,
        targets: &[KeyValues],
    ) -> StoreResult<()>;

    /// Remove one edge. Removing a missing edge is a `NotFound`.
    async fn remove_association(
        &mut self,
        association: &Association<'_>,
        owner: &KeyValues,
        target: &KeyValues,
    ) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}
