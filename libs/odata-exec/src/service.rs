//! The service handle shared by the pipeline and the controller.

use std::future::Future;
use std::sync::Arc;

use odata_model::{EntityDescriptor, Error, KeyValues, Registry, format_reference};
use odata_store::{Association, ChangeEvent, ChangeTracker, RowStore, StoreError, StoreTx};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ServiceConfig;

/// Registry, store, optional change tracker and configuration of one service.
///
/// Cheap to share behind an `Arc`; every operation opens its own transaction.
pub struct Service {
    registry: Arc<Registry>,
    store: Arc<dyn RowStore>,
    tracker: Option<Arc<dyn ChangeTracker>>,
    config: ServiceConfig,
}

impl Service {
    #[must_use]
    pub fn new(registry: Arc<Registry>, store: Arc<dyn RowStore>, config: ServiceConfig) -> Self {
        Self {
            registry,
            store,
            tracker: None,
            config,
        }
    }

    /// Enable delta links and `$deltatoken` requests.
    #[must_use]
    pub fn with_tracker(mut self, tracker: Arc<dyn ChangeTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub(crate) fn store(&self) -> &dyn RowStore {
        self.store.as_ref()
    }

    pub(crate) fn tracker(&self) -> Option<&dyn ChangeTracker> {
        self.tracker.as_deref()
    }

    pub(crate) fn entity_set(&self, name: &str) -> Result<&EntityDescriptor, Error> {
        self.registry
            .entity_set(name)
            .map(AsRef::as_ref)
            .ok_or_else(|| Error::not_found(format!("entity set '{name}'")))
    }

    /// The association behind navigation `name` of `owner`.
    pub(crate) fn association<'a>(
        &'a self,
        owner: &'a EntityDescriptor,
        name: &str,
    ) -> Result<Association<'a>, Error> {
        let (prop, nav) = owner.navigation(name).ok_or_else(|| {
            Error::not_found(format!("navigation '{}/{name}'", owner.entity_set))
        })?;
        let target = self
            .registry
            .entity(&nav.target)
            .ok_or_else(|| Error::internal(format!("unknown navigation target '{}'", nav.target)))?;
        Association::new(owner, prop, target)
            .ok_or_else(|| Error::internal(format!("'{name}' is not a navigation")))
    }

    /// `{service_root}/{Set(key)}`
    pub(crate) fn location(&self, entity: &EntityDescriptor, key: &KeyValues) -> String {
        format!(
            "{}/{}",
            self.config.service_root,
            format_reference(&entity.entity_set, &key.to_key_string(entity))
        )
    }

    pub(crate) async fn begin(&self, cancel: &CancellationToken) -> Result<Box<dyn StoreTx>, Error> {
        cancellable(cancel, async { Ok(self.store.begin().await?) }).await
    }

    /// Hand a committed change to the tracker, if any.
    pub(crate) fn record(&self, event: ChangeEvent) {
        if let Some(tracker) = &self.tracker {
            tracker.record(event);
        }
    }
}

/// Race `fut` against `cancel`. A cancelled operation reports `StoreError::Cancelled`.
pub(crate) async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, Error>
where
    F: Future<Output = Result<T, Error>>,
{
    if cancel.is_cancelled() {
        return Err(StoreError::Cancelled.into());
    }
    tokio::select! {
        biased;

        () = cancel.cancelled() => {
            debug!("operation cancelled");
            Err(StoreError::Cancelled.into())
        }
        out = fut => out,
    }
}

/// Commit on success, roll back on failure.
pub(crate) async fn settle<T>(tx: Box<dyn StoreTx>, outcome: Result<T, Error>) -> Result<T, Error> {
    match outcome {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = tx.rollback().await {
                warn!(error = %rollback, "rollback failed");
            }
            Err(err)
        }
    }
}

/// Read-only work: always roll back.
pub(crate) async fn release<T>(tx: Box<dyn StoreTx>, outcome: Result<T, Error>) -> Result<T, Error> {
    if let Err(rollback) = tx.rollback().await {
        warn!(error = %rollback, "rollback of read transaction failed");
    }
    outcome
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use odata_model::ErrorKind;

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = cancellable(&cancel, async { Ok::<_, Error>(1) }).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(err.to_string().contains("cancelled"), "{err}");
    }

    #[tokio::test]
    async fn pending_future_loses_to_cancellation() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let slow = async {
            trigger.cancel();
            std::future::pending::<Result<(), Error>>().await
        };
        assert!(cancellable(&cancel, slow).await.is_err());
    }
}
