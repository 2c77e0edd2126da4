//! Per-entity lifecycle callbacks.
//!
//! Every lifecycle point is an optional callback; "the entity type has a hook"
//! means the slot is populated. Authentication and policy evaluation happen
//! inside the callbacks, the core only consumes their allow/deny outcome.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::ast::Expr;
use crate::row::Row;

/// Caller identity and attributes handed to every hook.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    pub subject: Option<String>,
    pub attributes: BTreeMap<String, String>,
}

impl RequestContext {
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn for_subject(subject: impl Into<String>) -> Self {
        Self {
            subject: Some(subject.into()),
            attributes: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// A hook refused the operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HookRejection {
    pub message: String,
}

impl HookRejection {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for HookRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

pub type HookResult<T> = Result<T, HookRejection>;

/// Returns predicates ("scopes") ANDed into every read of the entity set.
pub type BeforeReadHook = Arc<dyn Fn(&RequestContext) -> HookResult<Vec<Expr>> + Send + Sync>;

/// May replace the fetched page (`Some`) or keep it (`None`).
pub type AfterReadHook =
    Arc<dyn Fn(&RequestContext, &[Row]) -> HookResult<Option<Vec<Row>>> + Send + Sync>;

/// Sees the row about to be written (create) or deleted (delete).
pub type RowHook = Arc<dyn Fn(&RequestContext, &Row) -> HookResult<()> + Send + Sync>;

/// Sees the current row and the changes about to be applied.
pub type BeforeUpdateHook = Arc<dyn Fn(&RequestContext, &Row, &Row) -> HookResult<()> + Send + Sync>;

#[derive(Clone, Default)]
pub struct EntityHooks {
    pub before_read: Option<BeforeReadHook>,
    pub after_read: Option<AfterReadHook>,
    pub before_create: Option<RowHook>,
    pub after_create: Option<RowHook>,
    pub before_update: Option<BeforeUpdateHook>,
    pub after_update: Option<RowHook>,
    pub before_delete: Option<RowHook>,
    pub after_delete: Option<RowHook>,
}

impl EntityHooks {
    #[must_use]
    pub fn has_before_read(&self) -> bool {
        self.before_read.is_some()
    }

    #[must_use]
    pub fn has_after_read(&self) -> bool {
        self.after_read.is_some()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.presence().iter().all(|(_, present)| !present)
    }

    fn presence(&self) -> [(&'static str, bool); 8] {
        [
            ("before_read", self.before_read.is_some()),
            ("after_read", self.after_read.is_some()),
            ("before_create", self.before_create.is_some()),
            ("after_create", self.after_create.is_some()),
            ("before_update", self.before_update.is_some()),
            ("after_update", self.after_update.is_some()),
            ("before_delete", self.before_delete.is_some()),
            ("after_delete", self.after_delete.is_some()),
        ]
    }
}

impl fmt::Debug for EntityHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let present: Vec<&str> = self
            .presence()
            .into_iter()
            .filter_map(|(name, present)| present.then_some(name))
            .collect();
        f.debug_struct("EntityHooks")
            .field("present", &present)
            .finish()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::use_debug)]
    fn presence_flags_follow_slots() {
        let mut hooks = EntityHooks::default();
        assert!(hooks.is_empty());
        assert!(!hooks.has_before_read());

        hooks.before_read = Some(Arc::new(|_ctx: &RequestContext| Ok(Vec::new())));
        assert!(hooks.has_before_read());
        assert!(!hooks.is_empty());
        assert!(format!("{hooks:?}").contains("before_read"));
    }
}
