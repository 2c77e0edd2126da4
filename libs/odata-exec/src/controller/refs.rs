//! `$ref` operations on one navigation of one entity.

use odata_model::{
    EntityDescriptor, Error, KeyValues, OrderBy, RequestContext, Row, effective_order, format_reference,
    parse_reference,
};
use odata_store::{Association, ChangeType, FindQuery, StoreTx};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::{check_if_match, fetch_row};
use crate::binding::{constraint_values, unlink_values};
use crate::service::{Service, cancellable, release, settle};

/// `Set(key)/Navigation/$ref`, optionally with a target (`@odata.id` or `$id`).
#[derive(Clone, Debug)]
#[must_use]
pub struct RefRequest {
    pub entity_set: String,
    pub key: String,
    pub navigation: String,
    /// Entity reference of the target: the `@odata.id` body of PUT/POST, or
    /// the `$id` of a collection DELETE.
    pub target: Option<String>,
    pub if_match: Option<String>,
    pub context: RequestContext,
}

impl RefRequest {
    pub fn new(entity_set: impl Into<String>, key: impl Into<String>, navigation: impl Into<String>) -> Self {
        Self {
            entity_set: entity_set.into(),
            key: key.into(),
            navigation: navigation.into(),
            target: None,
            if_match: None,
            context: RequestContext::anonymous(),
        }
    }

    pub fn with_target(mut self, reference: impl Into<String>) -> Self {
        self.target = Some(reference.into());
        self
    }

    pub fn with_if_match(mut self, etag: impl Into<String>) -> Self {
        self.if_match = Some(etag.into());
        self
    }

    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }
}

/// Owner, owner key and association a `$ref` request addresses.
struct Edge<'a> {
    owner: &'a EntityDescriptor,
    key: KeyValues,
    association: Association<'a>,
}

impl Service {
    fn edge<'a>(&'a self, request: &RefRequest) -> Result<Edge<'a>, Error> {
        let owner = self.entity_set(&request.entity_set)?;
        let key = KeyValues::parse(owner, &request.key)?;
        let association = self.association(owner, &request.navigation)?;
        Ok(Edge {
            owner,
            key,
            association,
        })
    }

    /// `@odata.id` of every entity related through the navigation.
    ///
    /// # Errors
    /// `NotFound` for an unknown owner or navigation.
    #[instrument(skip_all, fields(entity_set = %request.entity_set, key = %request.key, navigation = %request.navigation))]
    pub async fn get_refs(&self, request: &RefRequest, cancel: &CancellationToken) -> Result<Vec<String>, Error> {
        let edge = self.edge(request)?;
        let target = edge.association.target;
        let mut tx = self.begin(cancel).await?;
        let outcome = cancellable(cancel, async {
            fetch_row(tx.as_mut(), edge.owner, &edge.key).await?;
            let order = effective_order(target, &OrderBy::empty())?;
            let query = FindQuery::related(edge.association, edge.key.clone()).order(order);
            Ok::<_, Error>(tx.find(&query).await?)
        })
        .await;
        let rows = release(tx, outcome).await?;

        rows.iter()
            .map(|row| {
                let key = KeyValues::from_row(target, row)
                    .map_err(|e| Error::internal(format!("related row has no usable key: {e}")))?;
                Ok(self.location(target, &key))
            })
            .collect()
    }

    /// Point a single-valued navigation at the target.
    ///
    /// # Errors
    /// `Validation` for a collection navigation or a missing `@odata.id`,
    /// `NotFound` for a missing owner or target.
    #[instrument(skip_all, fields(entity_set = %request.entity_set, key = %request.key, navigation = %request.navigation))]
    pub async fn put_ref(&self, request: &RefRequest, cancel: &CancellationToken) -> Result<(), Error> {
        let edge = self.edge(request)?;
        if edge.association.navigation.is_array {
            return Err(Error::validation(format!(
                "'{}' is collection-valued; use POST to add a reference",
                request.navigation
            )));
        }
        let mut tx = self.begin(cancel).await?;
        let outcome = cancellable(cancel, async {
            let current = guard(tx.as_mut(), &edge, request).await?;
            let (target_key, target_row) = self.target(tx.as_mut(), &edge, request).await?;
            let nav = edge.association.navigation;
            if nav.has_constraints() {
                let changes = constraint_values(edge.owner, nav, Some(&target_row), self.config().null_fk_policy)?;
                before_update(edge.owner, request, &current, &changes)?;
                Ok::<_, Error>(tx.update(edge.owner, &edge.key, &changes).await?)
            } else {
                before_update(edge.owner, request, &current, &Row::new())?;
                tx.replace_associations(&edge.association, &edge.key, &[target_key])
                    .await?;
                Ok::<_, Error>(current)
            }
        })
        .await;
        let row = settle(tx, outcome).await?;
        self.ref_committed(&edge, request, row);
        info!("reference set");
        Ok(())
    }

    /// Add one target to a collection-valued navigation.
    ///
    /// # Errors
    /// `Validation` for a single-valued navigation, `NotFound` for a
    /// missing owner or target.
    #[instrument(skip_all, fields(entity_set = %request.entity_set, key = %request.key, navigation = %request.navigation))]
    pub async fn post_ref(&self, request: &RefRequest, cancel: &CancellationToken) -> Result<(), Error> {
        let edge = self.edge(request)?;
        if !edge.association.navigation.is_array {
            return Err(Error::validation(format!(
                "'{}' is single-valued; use PUT to set the reference",
                request.navigation
            )));
        }
        let mut tx = self.begin(cancel).await?;
        let outcome = cancellable(cancel, async {
            let current = guard(tx.as_mut(), &edge, request).await?;
            let (target_key, _) = self.target(tx.as_mut(), &edge, request).await?;
            before_update(edge.owner, request, &current, &Row::new())?;
            tx.append_association(&edge.association, &edge.key, &target_key)
                .await?;
            Ok::<_, Error>(current)
        })
        .await;
        let row = settle(tx, outcome).await?;
        self.ref_committed(&edge, request, row);
        info!("reference added");
        Ok(())
    }

    /// Unlink a single-valued navigation, or remove one edge of a collection.
    ///
    /// Unlinking never deletes the related entity.
    ///
    /// # Errors
    /// `Validation` when a collection delete names no target, `NotFound`
    /// for a missing owner or edge.
    #[instrument(skip_all, fields(entity_set = %request.entity_set, key = %request.key, navigation = %request.navigation))]
    pub async fn delete_ref(&self, request: &RefRequest, cancel: &CancellationToken) -> Result<(), Error> {
        let edge = self.edge(request)?;
        let nav = edge.association.navigation;
        if nav.is_array && request.target.is_none() {
            return Err(Error::validation(format!(
                "removing a reference from '{}' needs the target's $id",
                request.navigation
            )));
        }
        let mut tx = self.begin(cancel).await?;
        let outcome = cancellable(cancel, async {
            let current = guard(tx.as_mut(), &edge, request).await?;
            if nav.is_array {
                let target_key = self.target_key(&edge, request)?;
                before_update(edge.owner, request, &current, &Row::new())?;
                tx.remove_association(&edge.association, &edge.key, &target_key)
                    .await?;
                Ok::<_, Error>(current)
            } else if nav.has_constraints() {
                let changes = unlink_values(edge.owner, nav)?;
                before_update(edge.owner, request, &current, &changes)?;
                Ok::<_, Error>(tx.update(edge.owner, &edge.key, &changes).await?)
            } else {
                before_update(edge.owner, request, &current, &Row::new())?;
                tx.replace_associations(&edge.association, &edge.key, &[])
                    .await?;
                Ok::<_, Error>(current)
            }
        })
        .await;
        let row = settle(tx, outcome).await?;
        self.ref_committed(&edge, request, row);
        info!("reference removed");
        Ok(())
    }

    /// Key of the referenced target, checked against the navigation's type.
    fn target_key(&self, edge: &Edge<'_>, request: &RefRequest) -> Result<KeyValues, Error> {
        let raw = request
            .target
            .as_deref()
            .ok_or_else(|| Error::validation("missing @odata.id"))?;
        let reference = parse_reference(raw)?;
        let target = edge.association.target;
        let set = self.entity_set(&reference.entity_set)?;
        if set.entity_name != target.entity_name {
            return Err(Error::validation(format!(
                "'{}' holds {} entities, '{}' expects {}",
                reference.entity_set, set.entity_name, request.navigation, target.entity_name
            )));
        }
        Ok(KeyValues::parse(target, &reference.key)?)
    }

    /// The referenced target row; it must exist.
    async fn target(
        &self,
        tx: &mut dyn StoreTx,
        edge: &Edge<'_>,
        request: &RefRequest,
    ) -> Result<(KeyValues, Row), Error> {
        let key = self.target_key(edge, request)?;
        let target = edge.association.target;
        let row = fetch_row(tx, target, &key).await?;
        debug!(target = %format_reference(&target.entity_set, &key.to_key_string(target)), "reference target found");
        Ok((key, row))
    }

    fn ref_committed(&self, edge: &Edge<'_>, request: &RefRequest, row: Row) {
        let after = edge
            .owner
            .hooks
            .after_update
            .as_ref()
            .map(|hook| hook(&request.context, &row));
        self.committed(edge.owner, &edge.key, ChangeType::Updated, Some(row), after);
    }
}

/// Owner must exist and satisfy `If-Match`.
async fn guard(tx: &mut dyn StoreTx, edge: &Edge<'_>, request: &RefRequest) -> Result<Row, Error> {
    let current = fetch_row(tx, edge.owner, &edge.key).await?;
    check_if_match(edge.owner, &current, request.if_match.as_deref())?;
    Ok(current)
}

fn before_update(owner: &EntityDescriptor, request: &RefRequest, current: &Row, changes: &Row) -> Result<(), Error> {
    if let Some(hook) = &owner.hooks.before_update {
        hook(&request.context, current, changes)?;
    }
    Ok(())
}
