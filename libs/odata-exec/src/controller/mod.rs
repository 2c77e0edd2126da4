//! Mutation and reference controller.
//!
//! Every operation runs in one store transaction: fetch, precondition,
//! payload, bindings, before-hook, write, deferred bindings. The after-hook
//! and the change event follow the commit.

mod mutations;
mod refs;

use odata_model::{EntityDescriptor, Error, KeyValues, RequestContext, Row, etag};
use odata_store::{ChangeEvent, ChangeType, FindQuery, StoreTx};
use serde_json::Value as Json;
use tracing::warn;

use crate::service::Service;

pub use refs::RefRequest;

/// Single-entity request: create, read, update or delete.
#[derive(Clone, Debug)]
#[must_use]
pub struct EntityRequest {
    pub entity_set: String,
    /// Key text inside `Set(...)`; absent for create.
    pub key: Option<String>,
    pub body: Json,
    pub if_match: Option<String>,
    pub if_none_match: Option<String>,
    pub context: RequestContext,
}

impl EntityRequest {
    pub fn new(entity_set: impl Into<String>) -> Self {
        Self {
            entity_set: entity_set.into(),
            key: None,
            body: Json::Null,
            if_match: None,
            if_none_match: None,
            context: RequestContext::anonymous(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_body(mut self, body: Json) -> Self {
        self.body = body;
        self
    }

    pub fn with_if_match(mut self, etag: impl Into<String>) -> Self {
        self.if_match = Some(etag.into());
        self
    }

    pub fn with_if_none_match(mut self, etag: impl Into<String>) -> Self {
        self.if_none_match = Some(etag.into());
        self
    }

    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }
}

/// PATCH merges, PUT replaces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateMode {
    Merge,
    Replace,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MutationResult {
    /// The stored row.
    pub row: Row,
    /// Canonical key text.
    pub key: String,
    /// `{service_root}/Set(key)`
    pub location: String,
    pub etag: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    Found { row: Row, etag: Option<String> },
    /// `If-None-Match` matched the current ETag (304).
    NotModified { etag: String },
}

impl Service {
    fn mutation_result(&self, entity: &EntityDescriptor, key: &KeyValues, row: Row) -> MutationResult {
        MutationResult {
            key: key.to_key_string(entity),
            location: self.location(entity, key),
            etag: etag::compute(entity, &row),
            row,
        }
    }

    /// Emit the change event and run an after-hook; hook failures are only logged.
    fn committed(
        &self,
        entity: &EntityDescriptor,
        key: &KeyValues,
        change_type: ChangeType,
        data: Option<Row>,
        after: Option<Result<(), odata_model::HookRejection>>,
    ) {
        if let Some(Err(rejection)) = after {
            warn!(
                entity_set = %entity.entity_set,
                key = %key.to_key_string(entity),
                error = %rejection,
                "after-mutation hook failed"
            );
        }
        self.record(ChangeEvent {
            change_type,
            entity_set: entity.entity_set.clone(),
            key: key.clone(),
            data,
        });
    }
}

pub(crate) fn request_key(entity: &EntityDescriptor, key: Option<&str>) -> Result<KeyValues, Error> {
    let raw = key.ok_or_else(|| Error::validation(format!("a key is required for '{}'", entity.entity_set)))?;
    Ok(KeyValues::parse(entity, raw)?)
}

/// The stored row with `key`.
///
/// # Errors
/// `Error::NotFound` when it does not exist.
pub(crate) async fn fetch_row(tx: &mut dyn StoreTx, entity: &EntityDescriptor, key: &KeyValues) -> Result<Row, Error> {
    tx.find(&FindQuery::by_key(entity, key))
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| Error::not_found(format!("{}({})", entity.entity_set, key.to_key_string(entity))))
}

/// Compare `If-Match` with the row's current ETag.
///
/// Types without an ETag property accept any precondition.
pub(crate) fn check_if_match(entity: &EntityDescriptor, current: &Row, if_match: Option<&str>) -> Result<(), Error> {
    let (Some(header), Some(tag)) = (if_match, etag::compute(entity, current)) else {
        return Ok(());
    };
    if etag::if_match(header, &tag) {
        Ok(())
    } else {
        Err(Error::PreconditionFailed)
    }
}
