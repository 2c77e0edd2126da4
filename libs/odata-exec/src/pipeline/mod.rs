//! Collection execution pipeline.
//!
//! Seven stages, run in order by [`execute`]:
//! validate → scopes → count → fetch → paginate → after-read → respond.
//! Every stage is a method of [`CollectionStages`] with a default body, so a
//! caller can swap one stage and keep the rest. A stage stops the pipeline by
//! returning an [`Interrupt`]: `Failed` carries the error to report, `Handled`
//! carries a response the stage produced itself (delta short-circuit).

mod links;
mod stages;

use std::collections::BTreeMap;

use odata_model::{
    EntityDescriptor, Error, Expr, KeyValues, OrderBy, QueryOptions, RequestContext, Row, format_reference,
};
use odata_store::{ChangeEvent, Source, StoreError, StoreTx};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::service::{Service, cancellable, release};

pub use links::{Continuation, delta_link, next_link};
pub use stages::{
    CollectionStages, DefaultStages, apply_after_read, before_read_scopes, before_read_scopes_for, count_rows,
    fetch_rows, paginate_rows, project, respond_page, validate_request,
};

/// `Owner(key)/Navigation` prefix of a sub-collection request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NavigationSegment {
    pub key: String,
    pub property: String,
}

/// One collection read: a whole entity set or the targets of a navigation.
#[derive(Clone, Debug)]
#[must_use]
pub struct CollectionRequest {
    pub entity_set: String,
    pub navigation: Option<NavigationSegment>,
    pub options: QueryOptions,
    pub context: RequestContext,
}

impl CollectionRequest {
    pub fn new(entity_set: impl Into<String>, options: QueryOptions) -> Self {
        Self {
            entity_set: entity_set.into(),
            navigation: None,
            options,
            context: RequestContext::anonymous(),
        }
    }

    /// `entity_set(key)/navigation`
    pub fn related(
        entity_set: impl Into<String>,
        key: impl Into<String>,
        navigation: impl Into<String>,
        options: QueryOptions,
    ) -> Self {
        Self {
            navigation: Some(NavigationSegment {
                key: key.into(),
                property: navigation.into(),
            }),
            ..Self::new(entity_set, options)
        }
    }

    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }
}

/// Everything a stage may look at.
pub struct ReadContext<'a> {
    pub service: &'a Service,
    pub request: &'a CollectionRequest,
    /// Type of the rows being read (the navigation target for sub-collections).
    pub entity: &'a EntityDescriptor,
    pub source: Source<'a>,
    /// Resource path relative to the service root, used in links.
    pub path: String,
}

impl<'a> ReadContext<'a> {
    /// Resolve the request's entity set and navigation path.
    ///
    /// # Errors
    /// `Error::NotFound` for an unknown entity set or navigation,
    /// `Error::InvalidKey` for a malformed owner key.
    pub fn new(service: &'a Service, request: &'a CollectionRequest) -> Result<Self, Error> {
        let owner = service.entity_set(&request.entity_set)?;
        let Some(segment) = &request.navigation else {
            return Ok(Self {
                service,
                request,
                entity: owner,
                source: Source::EntitySet,
                path: owner.entity_set.clone(),
            });
        };

        let owner_key = KeyValues::parse(owner, &segment.key)?;
        let association = service.association(owner, &segment.property)?;
        let path = format!(
            "{}/{}",
            format_reference(&owner.entity_set, &owner_key.to_key_string(owner)),
            association.property.name
        );
        Ok(Self {
            service,
            request,
            entity: association.target,
            source: Source::Navigation {
                association,
                owner_key,
            },
            path,
        })
    }

    #[must_use]
    pub fn options(&self) -> &QueryOptions {
        &self.request.options
    }
}

/// Validated, resolved form of the query options.
#[derive(Clone, Debug, Default)]
pub struct ReadPlan {
    /// Effective order: requested `$orderby` followed by the key columns.
    pub order: OrderBy,
    /// `$filter` and the skip-token resume predicate.
    pub predicates: Vec<Expr>,
    /// Page size: `$top`, or the configured default page size.
    pub top: Option<u64>,
    pub skip: Option<u64>,
    /// Property names.
    pub select: Option<Vec<String>>,
    /// Navigation property names.
    pub expand: Vec<String>,
    pub search: Option<String>,
    pub count: bool,
}

/// A trimmed page and the link to the one after it.
#[derive(Clone, Debug, Default)]
pub struct Page {
    pub rows: Vec<Row>,
    pub next_link: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResultEntity {
    pub row: Row,
    /// Navigation property name -> related rows (zero or one for single-valued).
    pub expanded: BTreeMap<String, Vec<Row>>,
}

/// `(rows, count?, nextLink?, deltaLink?)` handed to the response writer.
#[derive(Clone, Debug, Default)]
pub struct CollectionResponse {
    pub entities: Vec<ResultEntity>,
    pub count: Option<u64>,
    pub next_link: Option<String>,
    pub delta_link: Option<String>,
    /// Present on `$deltatoken` responses instead of entities.
    pub changes: Option<Vec<ChangeEvent>>,
}

impl CollectionResponse {
    pub fn rows(&self) -> impl Iterator<Item = &Row> {
        self.entities.iter().map(|e| &e.row)
    }

    #[must_use]
    pub fn is_delta(&self) -> bool {
        self.changes.is_some()
    }
}

/// Why a stage stopped the pipeline.
#[derive(Debug)]
pub enum Interrupt {
    /// The stage already produced the response; not a failure.
    Handled(CollectionResponse),
    Failed(Error),
}

impl From<Error> for Interrupt {
    fn from(e: Error) -> Self {
        Interrupt::Failed(e)
    }
}

impl From<StoreError> for Interrupt {
    fn from(e: StoreError) -> Self {
        Interrupt::Failed(e.into())
    }
}

async fn run(
    stages: &dyn CollectionStages,
    ctx: &ReadContext<'_>,
    tx: &mut dyn StoreTx,
) -> Result<CollectionResponse, Interrupt> {
    let plan = stages.validate(ctx, tx).await?;
    let scopes = stages.scopes(ctx)?;
    debug!(order = %plan.order, scopes = scopes.len(), "query validated");

    let count = stages.count(ctx, tx, &plan, &scopes).await?;
    let rows = stages.fetch(ctx, tx, &plan, &scopes).await?;
    debug!(fetched = rows.len(), "rows fetched");

    let page = stages.paginate(ctx, &plan, rows)?;
    let rows = stages.after_read(ctx, page.rows)?;
    stages
        .respond(
            ctx,
            tx,
            &plan,
            Page {
                rows,
                next_link: page.next_link,
            },
            count,
        )
        .await
}

/// Run all stages inside `tx`. The first failure ends the pipeline.
///
/// # Errors
/// The error of the first failing stage.
pub async fn execute(
    stages: &dyn CollectionStages,
    ctx: &ReadContext<'_>,
    tx: &mut dyn StoreTx,
) -> Result<CollectionResponse, Error> {
    match run(stages, ctx, tx).await {
        Ok(response) => Ok(response),
        Err(Interrupt::Handled(response)) => {
            debug!("response produced by a stage");
            Ok(response)
        }
        Err(Interrupt::Failed(err)) => Err(err),
    }
}

impl Service {
    /// Read a collection with the default stages.
    ///
    /// # Errors
    /// See [`execute`].
    pub async fn read_collection(
        &self,
        request: &CollectionRequest,
        cancel: &CancellationToken,
    ) -> Result<CollectionResponse, Error> {
        self.read_collection_with(&DefaultStages, request, cancel).await
    }

    /// Read a collection with caller-supplied stages.
    ///
    /// # Errors
    /// See [`execute`].
    #[instrument(skip_all, fields(entity_set = %request.entity_set))]
    pub async fn read_collection_with(
        &self,
        stages: &dyn CollectionStages,
        request: &CollectionRequest,
        cancel: &CancellationToken,
    ) -> Result<CollectionResponse, Error> {
        let ctx = ReadContext::new(self, request)?;
        let mut tx = self.begin(cancel).await?;
        let outcome = cancellable(cancel, execute(stages, &ctx, tx.as_mut())).await;
        release(tx, outcome).await
    }
}
