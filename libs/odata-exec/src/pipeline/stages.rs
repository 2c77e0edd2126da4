//! The seven pipeline stages and their default behavior.
//!
//! Each default body is also exported as a free function so an overriding
//! stage can wrap it.

use std::collections::BTreeMap;

use async_trait::async_trait;
use odata_model::{
    EntityDescriptor, Error, Expr, KeyValues, OrderBy, PropertyDescriptor, RequestContext, Row, SkipToken,
    effective_order,
};
use odata_store::eval::{eval, matches_all, matches_search};
use odata_store::{ChangeEvent, FindQuery, Source, StoreTx};
use tracing::{debug, warn};

use super::links::{Continuation, delta_link, next_link};
use super::{CollectionResponse, Interrupt, Page, ReadContext, ReadPlan, ResultEntity};

#[async_trait]
pub trait CollectionStages: Send + Sync {
    /// Stage 1: check and resolve the query options.
    async fn validate(&self, ctx: &ReadContext<'_>, tx: &mut dyn StoreTx) -> Result<ReadPlan, Interrupt> {
        validate_request(ctx, tx).await
    }

    /// Stage 2: predicates from the before-read hook.
    fn scopes(&self, ctx: &ReadContext<'_>) -> Result<Vec<Expr>, Interrupt> {
        before_read_scopes(ctx)
    }

    /// Stage 3: total count under filter and scopes, without paging.
    async fn count(
        &self,
        ctx: &ReadContext<'_>,
        tx: &mut dyn StoreTx,
        plan: &ReadPlan,
        scopes: &[Expr],
    ) -> Result<Option<u64>, Interrupt> {
        count_rows(ctx, tx, plan, scopes).await
    }

    /// Stage 4: one page plus one look-ahead row.
    async fn fetch(
        &self,
        ctx: &ReadContext<'_>,
        tx: &mut dyn StoreTx,
        plan: &ReadPlan,
        scopes: &[Expr],
    ) -> Result<Vec<Row>, Interrupt> {
        fetch_rows(ctx, tx, plan, scopes).await
    }

    /// Stage 5: trim the look-ahead row and build the next link.
    fn paginate(&self, ctx: &ReadContext<'_>, plan: &ReadPlan, rows: Vec<Row>) -> Result<Page, Interrupt> {
        paginate_rows(ctx, plan, rows)
    }

    /// Stage 6: let the after-read hook replace the page.
    fn after_read(&self, ctx: &ReadContext<'_>, rows: Vec<Row>) -> Result<Vec<Row>, Interrupt> {
        apply_after_read(ctx, rows)
    }

    /// Stage 7: expansion, projection and delta link.
    async fn respond(
        &self,
        ctx: &ReadContext<'_>,
        tx: &mut dyn StoreTx,
        plan: &ReadPlan,
        page: Page,
        count: Option<u64>,
    ) -> Result<CollectionResponse, Interrupt> {
        respond_page(ctx, tx, plan, page, count).await
    }
}

/// All default stages.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultStages;

impl CollectionStages for DefaultStages {}

fn non_negative(option: &str, value: i64) -> Result<u64, Error> {
    u64::try_from(value).map_err(|_| Error::query_option(option, "must not be negative"))
}

fn filterable<'a>(entity: &'a EntityDescriptor, name: &str) -> Result<&'a PropertyDescriptor, Error> {
    let prop = entity
        .property(name)
        .ok_or_else(|| Error::query_option("$filter", format!("unknown property '{name}'")))?;
    if prop.is_navigation() || prop.is_complex() {
        return Err(Error::query_option(
            "$filter",
            format!("'{name}' is a navigation or complex property"),
        ));
    }
    Ok(prop)
}

fn resolve_select(entity: &EntityDescriptor, fields: &[String]) -> Result<Vec<String>, Error> {
    fields
        .iter()
        .map(|f| {
            entity
                .property(f)
                .map(|p| p.name.clone())
                .ok_or_else(|| Error::query_option("$select", format!("unknown property '{f}'")))
        })
        .collect()
}

fn resolve_expand(entity: &EntityDescriptor, navs: &[String]) -> Result<Vec<String>, Error> {
    navs.iter()
        .map(|n| {
            entity
                .navigation(n)
                .map(|(p, _)| p.name.clone())
                .ok_or_else(|| Error::query_option("$expand", format!("'{n}' is not a navigation property")))
        })
        .collect()
}

/// Answer a `$deltatoken` request from the change tracker.
fn delta_response(ctx: &ReadContext<'_>, token: &str) -> Result<CollectionResponse, Error> {
    let tracker = ctx
        .service
        .tracker()
        .ok_or_else(|| Error::not_implemented("change tracking"))?;
    let set = tracker
        .entity_set_from_token(token)
        .map_err(|_| Error::InvalidDeltaToken)?;
    if set != ctx.entity.entity_set {
        return Err(Error::InvalidDeltaToken);
    }
    let scopes = read_scopes(ctx)?;
    let changes = tracker
        .changes_since(token)
        .map_err(|_| Error::InvalidDeltaToken)?;
    let changes = visible_changes(ctx, &scopes, changes)?;
    debug!(changes = changes.len(), "delta request answered");
    let link = delta_link(
        &ctx.service.config().service_root,
        &ctx.path,
        &tracker.current_token(&set),
    )?;
    Ok(CollectionResponse {
        delta_link: Some(link),
        changes: Some(changes),
        ..CollectionResponse::default()
    })
}

/// Changes the caller may see: data events must satisfy the read scopes and
/// pass through the after-read hook; deletions are dropped only when a scope
/// over key fields alone rejects them.
fn visible_changes(
    ctx: &ReadContext<'_>,
    scopes: &[Expr],
    changes: Vec<ChangeEvent>,
) -> Result<Vec<ChangeEvent>, Error> {
    let mut visible = Vec::with_capacity(changes.len());
    for change in changes {
        let keep = match &change.data {
            Some(row) => matches_all(ctx.entity, scopes, row)?,
            None => {
                let key_row = change.key.to_row();
                let mut keep = true;
                for scope in scopes {
                    let key_only = scope.identifiers().iter().all(|id| change.key.get(id).is_some());
                    if key_only && eval(ctx.entity, scope, &key_row)? == Some(false) {
                        keep = false;
                        break;
                    }
                }
                keep
            }
        };
        if keep {
            visible.push(change);
        }
    }

    let Some(hook) = &ctx.entity.hooks.after_read else {
        return Ok(visible);
    };
    let rows: Vec<Row> = visible.iter().filter_map(|c| c.data.clone()).collect();
    let Some(replaced) = hook(&ctx.request.context, &rows)? else {
        return Ok(visible);
    };
    // Rewritten rows are matched back by key; events whose row the hook dropped go too.
    Ok(visible
        .into_iter()
        .filter_map(|mut change| {
            if change.data.is_none() {
                return Some(change);
            }
            let row = replaced.iter().find(|r| change.key.matches(r))?;
            change.data = Some(row.clone());
            Some(change)
        })
        .collect())
}

/// Default stage 1.
///
/// # Errors
/// `Interrupt::Handled` for delta requests; `Interrupt::Failed` with
/// `InvalidQueryOption`/`InvalidSkipToken` for bad options, `NotFound` for a
/// missing navigation owner, `NotImplemented` for change tracking without a tracker.
pub async fn validate_request(ctx: &ReadContext<'_>, tx: &mut dyn StoreTx) -> Result<ReadPlan, Interrupt> {
    let options = ctx.options();
    let limits = &ctx.service.config().limits;

    if let Source::Navigation {
        association,
        owner_key,
    } = &ctx.source
    {
        let owner = tx
            .find(&FindQuery::by_key(association.owner, owner_key))
            .await?;
        if owner.is_empty() {
            return Err(Error::not_found(format!(
                "{}({})",
                association.owner.entity_set,
                owner_key.to_key_string(association.owner)
            ))
            .into());
        }
    }

    if let Some(token) = &options.delta_token {
        return Err(Interrupt::Handled(delta_response(ctx, token)?));
    }
    if options.track_changes && ctx.service.tracker().is_none() {
        return Err(Error::not_implemented("change tracking").into());
    }

    let top = match options.top {
        Some(t) => {
            limits.validate_top(t)?;
            Some(non_negative("$top", t)?)
        }
        None => ctx.service.config().default_page_size,
    };
    let skip = match options.skip {
        Some(s) => {
            limits.validate_skip(s)?;
            Some(non_negative("$skip", s)?)
        }
        None => None,
    };

    limits.validate_orderby_count(options.order_by.len())?;
    let order = effective_order(ctx.entity, &options.order_by)?;

    let mut predicates = Vec::new();
    if let Some(filter) = &options.filter {
        for name in filter.identifiers() {
            filterable(ctx.entity, name)?;
        }
        predicates.push(filter.clone());
    }
    if let Some(token) = &options.skip_token {
        limits.validate_skip_token(token)?;
        let position = SkipToken::decode(ctx.entity, &order, token)?;
        predicates.push(position.resume_predicate(&order)?);
    }

    let select = options
        .select
        .as_deref()
        .map(|fields| resolve_select(ctx.entity, fields))
        .transpose()?;
    let expand = resolve_expand(ctx.entity, &options.expand)?;

    Ok(ReadPlan {
        order,
        predicates,
        top,
        skip,
        select,
        expand,
        search: options.search.clone(),
        count: options.count,
    })
}

/// Default stage 2.
///
/// # Errors
/// `Interrupt::Failed(Error::Forbidden)` when the hook rejects the read.
pub fn before_read_scopes(ctx: &ReadContext<'_>) -> Result<Vec<Expr>, Interrupt> {
    Ok(read_scopes(ctx)?)
}

fn read_scopes(ctx: &ReadContext<'_>) -> Result<Vec<Expr>, Error> {
    before_read_scopes_for(ctx.entity, &ctx.request.context)
}

/// Predicates the `before_read` hook of `entity` adds for `context`.
///
/// # Errors
/// `Error::Forbidden` when the hook refuses the read.
pub fn before_read_scopes_for(entity: &EntityDescriptor, context: &RequestContext) -> Result<Vec<Expr>, Error> {
    match &entity.hooks.before_read {
        Some(hook) => Ok(hook(context)?),
        None => Ok(Vec::new()),
    }
}

/// Whether `$search` has to be evaluated here rather than by the store.
fn searches_in_memory(ctx: &ReadContext<'_>, plan: &ReadPlan) -> bool {
    plan.search.is_some() && !ctx.service.store().capabilities().search
}

/// Unpaged query under filter, resume position and scopes.
fn base_query<'q>(ctx: &'q ReadContext<'_>, plan: &ReadPlan, scopes: &[Expr]) -> FindQuery<'q> {
    let options = ctx.options();
    FindQuery {
        entity: ctx.entity,
        source: ctx.source.clone(),
        predicates: scopes.iter().chain(&plan.predicates).cloned().collect(),
        order: OrderBy::empty(),
        top: None,
        skip: None,
        search: if searches_in_memory(ctx, plan) {
            None
        } else {
            plan.search.clone()
        },
        select: None,
        apply: options.apply.clone(),
        compute: options.compute.clone(),
    }
}

fn searched(entity: &EntityDescriptor, rows: Vec<Row>, term: &str) -> Vec<Row> {
    rows.into_iter()
        .filter(|r| matches_search(entity, r, term))
        .collect()
}

fn to_usize(n: u64) -> usize {
    usize::try_from(n).unwrap_or(usize::MAX)
}

/// Default stage 3.
///
/// # Errors
/// Store failures.
pub async fn count_rows(
    ctx: &ReadContext<'_>,
    tx: &mut dyn StoreTx,
    plan: &ReadPlan,
    scopes: &[Expr],
) -> Result<Option<u64>, Interrupt> {
    if !plan.count {
        return Ok(None);
    }
    // count ignores $skiptoken: drop the resume predicate
    let filter_only = ReadPlan {
        predicates: ctx.options().filter.iter().cloned().collect(),
        ..plan.clone()
    };
    let query = base_query(ctx, &filter_only, scopes);
    let total = match (&plan.search, searches_in_memory(ctx, plan)) {
        (Some(term), true) => {
            let rows = tx.find(&query).await?;
            u64::try_from(searched(ctx.entity, rows, term).len()).unwrap_or(u64::MAX)
        }
        _ => tx.count(&query).await?,
    };
    Ok(Some(total))
}

/// Default stage 4.
///
/// # Errors
/// Store failures; `NotImplemented` when the store cannot run `$apply`/`$compute`.
pub async fn fetch_rows(
    ctx: &ReadContext<'_>,
    tx: &mut dyn StoreTx,
    plan: &ReadPlan,
    scopes: &[Expr],
) -> Result<Vec<Row>, Interrupt> {
    let limit = plan.top.map(|t| t.saturating_add(1));
    let mut query = base_query(ctx, plan, scopes).order(plan.order.clone());
    query.select.clone_from(&plan.select);

    if let (Some(term), true) = (&plan.search, searches_in_memory(ctx, plan)) {
        debug!("applying $search in memory");
        let rows = searched(ctx.entity, tx.find(&query).await?, term);
        return Ok(rows
            .into_iter()
            .skip(to_usize(plan.skip.unwrap_or(0)))
            .take(limit.map_or(usize::MAX, to_usize))
            .collect());
    }

    query.top = limit;
    query.skip = plan.skip;
    Ok(tx.find(&query).await?)
}

/// Default stage 5.
///
/// # Errors
/// `Error::Internal` when the link cannot be rendered.
pub fn paginate_rows(ctx: &ReadContext<'_>, plan: &ReadPlan, mut rows: Vec<Row>) -> Result<Page, Interrupt> {
    let Some(top) = plan.top else {
        return Ok(Page { rows, next_link: None });
    };
    let page_len = to_usize(top);
    if rows.len() <= page_len {
        return Ok(Page { rows, next_link: None });
    }
    rows.truncate(page_len);
    let Some(last) = rows.last() else {
        return Ok(Page { rows, next_link: None });
    };

    let next = match SkipToken::from_row(ctx.entity, &plan.order, last).and_then(|t| t.encode(ctx.entity)) {
        Ok(token) => Continuation::Token(token),
        Err(e) => {
            let offset = plan.skip.unwrap_or(0).saturating_add(top);
            warn!(error = %e, offset, "skip token unavailable, falling back to $skip");
            Continuation::Offset(offset)
        }
    };
    let link = next_link(&ctx.service.config().service_root, &ctx.path, ctx.options(), &next)?;
    Ok(Page {
        rows,
        next_link: Some(link),
    })
}

/// Default stage 6.
///
/// # Errors
/// `Interrupt::Failed(Error::Forbidden)` when the hook rejects the page.
pub fn apply_after_read(ctx: &ReadContext<'_>, rows: Vec<Row>) -> Result<Vec<Row>, Interrupt> {
    let Some(hook) = &ctx.entity.hooks.after_read else {
        return Ok(rows);
    };
    match hook(&ctx.request.context, &rows).map_err(Error::from)? {
        Some(replaced) => {
            debug!(rows = replaced.len(), "after-read hook replaced the page");
            Ok(replaced)
        }
        None => Ok(rows),
    }
}

/// Keep the key properties and the `select`ed properties.
#[must_use]
pub fn project(entity: &EntityDescriptor, row: &Row, select: Option<&[String]>) -> Row {
    let Some(fields) = select else {
        return row.clone();
    };
    let mut out = Row::new();
    for prop in entity.scalar_properties() {
        if !prop.is_key && !fields.contains(&prop.name) {
            continue;
        }
        if let Some(v) = row.get(&prop.name) {
            out.set(prop.name.clone(), v.clone());
        }
    }
    out
}

async fn expand_row(
    ctx: &ReadContext<'_>,
    tx: &mut dyn StoreTx,
    expand: &[String],
    row: &Row,
) -> Result<BTreeMap<String, Vec<Row>>, Error> {
    let mut expanded = BTreeMap::new();
    if expand.is_empty() {
        return Ok(expanded);
    }
    let key = KeyValues::from_row(ctx.entity, row)
        .map_err(|e| Error::internal(format!("cannot expand a row without its key: {e}")))?;
    for nav in expand {
        let association = ctx.service.association(ctx.entity, nav)?;
        let related = tx
            .find(&FindQuery::related(association, key.clone()))
            .await?;
        expanded.insert(nav.clone(), related);
    }
    Ok(expanded)
}

/// Default stage 7.
///
/// # Errors
/// Store failures during `$expand`; `Error::Internal` when a link cannot be rendered.
pub async fn respond_page(
    ctx: &ReadContext<'_>,
    tx: &mut dyn StoreTx,
    plan: &ReadPlan,
    page: Page,
    count: Option<u64>,
) -> Result<CollectionResponse, Interrupt> {
    let mut entities = Vec::with_capacity(page.rows.len());
    for row in &page.rows {
        let expanded = expand_row(ctx, tx, &plan.expand, row).await?;
        entities.push(ResultEntity {
            row: project(ctx.entity, row, plan.select.as_deref()),
            expanded,
        });
    }

    let delta_link = match ctx.service.tracker() {
        Some(tracker) if ctx.options().track_changes => Some(delta_link(
            &ctx.service.config().service_root,
            &ctx.path,
            &tracker.current_token(&ctx.entity.entity_set),
        )?),
        _ => None,
    };

    Ok(CollectionResponse {
        entities,
        count,
        next_link: page.next_link,
        delta_link,
        changes: None,
    })
}
