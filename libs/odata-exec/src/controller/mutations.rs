use odata_model::{EntityDescriptor, Error, KeyValues, Row, Value, etag};
use odata_store::{ChangeType, FindQuery, StoreTx};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::{EntityRequest, MutationResult, ReadOutcome, UpdateMode, check_if_match, fetch_row, request_key};
use crate::binding::BindingResolver;
use crate::payload::parse_payload;
use crate::pipeline::before_read_scopes_for;
use crate::service::{Service, cancellable, release, settle};

impl Service {
    /// Insert one entity, resolving its `@odata.bind` annotations.
    ///
    /// # Errors
    /// `Validation`/`InvalidBinding` for a bad payload, `NotFound` for a
    /// missing bind target, `Forbidden` when `before_create` refuses.
    #[instrument(skip_all, fields(entity_set = %request.entity_set))]
    pub async fn create(
        &self,
        request: &EntityRequest,
        cancel: &CancellationToken,
    ) -> Result<MutationResult, Error> {
        let entity = self.entity_set(&request.entity_set)?;
        let mut tx = self.begin(cancel).await?;
        let outcome = cancellable(cancel, self.create_in(tx.as_mut(), entity, request)).await;
        let (key, row) = settle(tx, outcome).await?;

        let after = entity
            .hooks
            .after_create
            .as_ref()
            .map(|hook| hook(&request.context, &row));
        self.committed(entity, &key, ChangeType::Added, Some(row.clone()), after);
        info!(key = %key.to_key_string(entity), "entity created");
        Ok(self.mutation_result(entity, &key, row))
    }

    async fn create_in(
        &self,
        tx: &mut dyn StoreTx,
        entity: &EntityDescriptor,
        request: &EntityRequest,
    ) -> Result<(KeyValues, Row), Error> {
        let payload = parse_payload(entity, &request.body)?;
        let resolver = BindingResolver::new(self.registry(), self.config().null_fk_policy);
        let bindings = resolver.resolve(tx, entity, &payload.binds).await?;

        let mut row = payload.values;
        row.merge(&bindings.assignments);
        for prop in entity.scalar_properties() {
            if prop.required && !prop.generated && !row.contains(&prop.name) {
                return Err(Error::validation(format!("missing required property '{}'", prop.wire_name)));
            }
        }
        check_nulls(entity, &row)?;

        if let Some(hook) = &entity.hooks.before_create {
            hook(&request.context, &row)?;
        }
        let stored = tx.create(entity, &row).await?;
        let key = KeyValues::from_row(entity, &stored)
            .map_err(|e| Error::internal(format!("stored row has no usable key: {e}")))?;
        resolver.apply(tx, entity, &key, &bindings.pending).await?;
        Ok((key, stored))
    }

    /// PATCH (`Merge`) or PUT (`Replace`) one entity.
    ///
    /// # Errors
    /// `NotFound` for a missing row, `PreconditionFailed` when `If-Match`
    /// does not match, otherwise as [`Service::create`].
    #[instrument(skip_all, fields(entity_set = %request.entity_set, key = ?request.key, mode = ?mode))]
    pub async fn update(
        &self,
        request: &EntityRequest,
        mode: UpdateMode,
        cancel: &CancellationToken,
    ) -> Result<MutationResult, Error> {
        let entity = self.entity_set(&request.entity_set)?;
        let key = request_key(entity, request.key.as_deref())?;
        let mut tx = self.begin(cancel).await?;
        let outcome = cancellable(cancel, self.update_in(tx.as_mut(), entity, &key, request, mode)).await;
        let row = settle(tx, outcome).await?;

        let after = entity
            .hooks
            .after_update
            .as_ref()
            .map(|hook| hook(&request.context, &row));
        self.committed(entity, &key, ChangeType::Updated, Some(row.clone()), after);
        info!("entity updated");
        Ok(self.mutation_result(entity, &key, row))
    }

    async fn update_in(
        &self,
        tx: &mut dyn StoreTx,
        entity: &EntityDescriptor,
        key: &KeyValues,
        request: &EntityRequest,
        mode: UpdateMode,
    ) -> Result<Row, Error> {
        let current = fetch_row(tx, entity, key).await?;
        check_if_match(entity, &current, request.if_match.as_deref())?;

        let payload = parse_payload(entity, &request.body)?;
        let mut changes = strip_key(entity, key, payload.values)?;
        let resolver = BindingResolver::new(self.registry(), self.config().null_fk_policy);
        let bindings = resolver.resolve(tx, entity, &payload.binds).await?;
        changes.merge(&bindings.assignments);
        if mode == UpdateMode::Replace {
            fill_replaced(entity, &mut changes)?;
        }
        check_nulls(entity, &changes)?;

        if let Some(hook) = &entity.hooks.before_update {
            hook(&request.context, &current, &changes)?;
        }
        let stored = if changes.is_empty() {
            debug!("no property changes");
            current
        } else {
            tx.update(entity, key, &changes).await?
        };
        resolver.apply(tx, entity, key, &bindings.pending).await?;
        Ok(stored)
    }

    /// Delete one entity.
    ///
    /// # Errors
    /// `NotFound`, `PreconditionFailed`, or `Forbidden` from `before_delete`.
    #[instrument(skip_all, fields(entity_set = %request.entity_set, key = ?request.key))]
    pub async fn delete(&self, request: &EntityRequest, cancel: &CancellationToken) -> Result<(), Error> {
        let entity = self.entity_set(&request.entity_set)?;
        let key = request_key(entity, request.key.as_deref())?;
        let mut tx = self.begin(cancel).await?;
        let outcome = cancellable(cancel, async {
            let current = fetch_row(tx.as_mut(), entity, &key).await?;
            check_if_match(entity, &current, request.if_match.as_deref())?;
            if let Some(hook) = &entity.hooks.before_delete {
                hook(&request.context, &current)?;
            }
            tx.delete(entity, &key).await?;
            Ok::<_, Error>(current)
        })
        .await;
        let removed = settle(tx, outcome).await?;

        let after = entity
            .hooks
            .after_delete
            .as_ref()
            .map(|hook| hook(&request.context, &removed));
        self.committed(entity, &key, ChangeType::Deleted, None, after);
        info!("entity deleted");
        Ok(())
    }

    /// Read one entity through the read hooks, honouring `If-None-Match`.
    ///
    /// # Errors
    /// `NotFound` when the row does not exist or a read scope hides it.
    #[instrument(skip_all, fields(entity_set = %request.entity_set, key = ?request.key))]
    pub async fn read_entity(&self, request: &EntityRequest, cancel: &CancellationToken) -> Result<ReadOutcome, Error> {
        let entity = self.entity_set(&request.entity_set)?;
        let key = request_key(entity, request.key.as_deref())?;
        let scopes = before_read_scopes_for(entity, &request.context)?;

        let mut tx = self.begin(cancel).await?;
        let outcome = cancellable(cancel, async {
            let query = scopes
                .into_iter()
                .fold(FindQuery::by_key(entity, &key), FindQuery::filter);
            Ok::<_, Error>(tx.find(&query).await?.into_iter().next())
        })
        .await;
        let found = release(tx, outcome)
            .await?
            .ok_or_else(|| Error::not_found(format!("{}({})", entity.entity_set, key.to_key_string(entity))))?;

        let row = match &entity.hooks.after_read {
            Some(hook) => hook(&request.context, std::slice::from_ref(&found))?
                .and_then(|rows| rows.into_iter().next())
                .unwrap_or(found),
            None => found,
        };
        let tag = etag::compute(entity, &row);
        if let (Some(header), Some(current)) = (request.if_none_match.as_deref(), tag.as_deref())
            && etag::if_none_match(header, current)
        {
            debug!("cached copy is current");
            return Ok(ReadOutcome::NotModified {
                etag: current.to_owned(),
            });
        }
        Ok(ReadOutcome::Found { row, etag: tag })
    }
}

/// Drop key properties from `values`; a key that differs from the addressed one fails.
fn strip_key(entity: &EntityDescriptor, key: &KeyValues, mut values: Row) -> Result<Row, Error> {
    for prop in entity.key_properties() {
        let Some(sent) = values.remove(&prop.name) else {
            continue;
        };
        let addressed = key.get(&prop.name).unwrap_or(&Value::Null);
        if !sent.loosely_eq(addressed) {
            return Err(Error::validation(format!("key property '{}' cannot be changed", prop.wire_name)));
        }
    }
    Ok(values)
}

/// PUT semantics: absent nullable properties become null, absent required ones fail.
fn fill_replaced(entity: &EntityDescriptor, changes: &mut Row) -> Result<(), Error> {
    for prop in entity.scalar_properties() {
        if prop.is_key || prop.generated || changes.contains(&prop.name) {
            continue;
        }
        if prop.required {
            return Err(Error::validation(format!("missing required property '{}'", prop.wire_name)));
        }
        if prop.nullable {
            changes.set(prop.name.clone(), Value::Null);
        }
    }
    Ok(())
}

fn check_nulls(entity: &EntityDescriptor, row: &Row) -> Result<(), Error> {
    for (name, value) in row.iter() {
        let Some(prop) = entity.property(name) else {
            continue;
        };
        if value.is_null() && !prop.nullable && !prop.generated {
            return Err(Error::validation(format!("property '{}' cannot be null", prop.wire_name)));
        }
    }
    Ok(())
}
