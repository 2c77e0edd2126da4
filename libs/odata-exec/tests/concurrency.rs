#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;

use common::{fixture, fixture_with, registry_with_hooks};
use odata_exec::{EntityRequest, ReadOutcome, RefRequest, ServiceConfig, UpdateMode};
use odata_model::{EntityHooks, ErrorKind, HookRejection, RequestContext, Row, Value, etag};
use odata_store::{ChangeTracker, MemoryStore};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing_test::traced_test;

async fn current_etag(f: &common::Fixture) -> String {
    match f
        .service
        .read_entity(&EntityRequest::new("Orders").with_key("1"), &CancellationToken::new())
        .await
        .unwrap()
    {
        ReadOutcome::Found { etag, .. } => etag.unwrap(),
        ReadOutcome::NotModified { .. } => panic!("no precondition was sent"),
    }
}

async fn products_of_order_1(f: &common::Fixture) -> Vec<String> {
    f.service
        .get_refs(&RefRequest::new("Orders", "1", "Products"), &CancellationToken::new())
        .await
        .unwrap()
}

#[tokio::test]
async fn stale_if_match_leaves_row_and_links_untouched() {
    let f = fixture().await;
    let cancel = CancellationToken::new();
    f.service
        .post_ref(
            &RefRequest::new("Orders", "1", "Products").with_target("Products(1)"),
            &cancel,
        )
        .await
        .unwrap();
    let stale = current_etag(&f).await;

    f.service
        .update(
            &EntityRequest::new("Orders")
                .with_key("1")
                .with_if_match(stale.clone())
                .with_body(json!({ "Version": 2 })),
            UpdateMode::Merge,
            &cancel,
        )
        .await
        .unwrap();
    let rows_before = f.store.rows("Orders").await;
    let links_before = products_of_order_1(&f).await;

    let patch = EntityRequest::new("Orders").with_key("1").with_if_match(stale.clone());
    let attempts = [
        f.service
            .update(
                &patch.clone().with_body(json!({
                    "Note": "lost update",
                    "Customer@odata.bind": "Customers(5)",
                    "Products@odata.bind": ["Products(2)", "Products(3)"],
                })),
                UpdateMode::Merge,
                &cancel,
            )
            .await
            .map(|_| ()),
        f.service
            .update(
                &patch.clone().with_body(json!({ "Note": "replaced", "Version": 9 })),
                UpdateMode::Replace,
                &cancel,
            )
            .await
            .map(|_| ()),
        f.service.delete(&patch, &cancel).await,
        f.service
            .put_ref(
                &RefRequest::new("Orders", "1", "Customer")
                    .with_target("Customers(5)")
                    .with_if_match(stale),
                &cancel,
            )
            .await,
    ];
    for outcome in attempts {
        assert_eq!(outcome.unwrap_err().kind(), ErrorKind::PreconditionFailed);
    }

    assert_eq!(f.store.rows("Orders").await, rows_before);
    assert_eq!(products_of_order_1(&f).await, links_before);
}

#[tokio::test]
async fn matching_if_match_applies_the_change() {
    let f = fixture().await;
    let cancel = CancellationToken::new();
    let tag = current_etag(&f).await;

    let updated = f
        .service
        .update(
            &EntityRequest::new("Orders")
                .with_key("1")
                .with_if_match(format!("{tag}, W/\"other\""))
                .with_body(json!({ "Version": 2 })),
            UpdateMode::Merge,
            &cancel,
        )
        .await
        .unwrap();
    assert_ne!(updated.etag.as_deref(), Some(tag.as_str()));

    f.service
        .delete(
            &EntityRequest::new("Orders").with_key("1").with_if_match("*"),
            &cancel,
        )
        .await
        .unwrap();
    assert!(f.store.rows("Orders").await.is_empty());
}

#[tokio::test]
async fn if_none_match_reports_not_modified() {
    let f = fixture().await;
    let cancel = CancellationToken::new();
    let tag = current_etag(&f).await;
    let order = f.registry.entity_set("Orders").unwrap();
    assert_eq!(
        Some(tag.clone()),
        etag::compute(order, &common::order(1, 1, 1))
    );

    let cached = f
        .service
        .read_entity(
            &EntityRequest::new("Orders").with_key("1").with_if_none_match(tag.clone()),
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(cached, ReadOutcome::NotModified { etag: tag });

    let fresh = f
        .service
        .read_entity(
            &EntityRequest::new("Orders").with_key("1").with_if_none_match("W/\"old\""),
            &cancel,
        )
        .await
        .unwrap();
    assert!(matches!(fresh, ReadOutcome::Found { .. }));

    let err = f
        .service
        .read_entity(&EntityRequest::new("Orders").with_key("7"), &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn put_replaces_and_patch_merges() {
    let f = fixture().await;
    let cancel = CancellationToken::new();

    let merged = f
        .service
        .update(
            &EntityRequest::new("Orders").with_key("1").with_body(json!({ "Version": 2 })),
            UpdateMode::Merge,
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(merged.row.get("Note"), Some(&Value::String("first".into())));
    assert_eq!(merged.row.get("CustomerID"), Some(&Value::Int(1)));

    let replaced = f
        .service
        .update(
            &EntityRequest::new("Orders").with_key("1").with_body(json!({ "ID": 1, "Version": 3 })),
            UpdateMode::Replace,
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(replaced.row.get("Note"), Some(&Value::Null));
    assert_eq!(replaced.row.get("CustomerID"), Some(&Value::Null));
    assert_eq!(replaced.row.get("Version"), Some(&Value::Int(3)));

    let err = f
        .service
        .update(
            &EntityRequest::new("Orders").with_key("1").with_body(json!({ "ID": 2 })),
            UpdateMode::Merge,
            &cancel,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = f
        .service
        .update(
            &EntityRequest::new("Orders").with_key("8").with_body(json!({})),
            UpdateMode::Merge,
            &cancel,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn required_properties_are_enforced() {
    let f = fixture().await;
    let cancel = CancellationToken::new();

    let err = f
        .service
        .create(&EntityRequest::new("Customers").with_body(json!({ "ID": 7 })), &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = f
        .service
        .update(
            &EntityRequest::new("Customers").with_key("1").with_body(json!({})),
            UpdateMode::Replace,
            &cancel,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = f
        .service
        .create(
            &EntityRequest::new("Customers").with_body(json!({ "ID": 7, "Name": 12 })),
            &cancel,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

fn guarded_hooks() -> EntityHooks {
    EntityHooks {
        before_create: Some(Arc::new(|ctx: &RequestContext, _: &Row| {
            if ctx.subject.is_none() {
                return Err(HookRejection::new("sign in first"));
            }
            Ok(())
        })),
        before_update: Some(Arc::new(|_: &RequestContext, _: &Row, changes: &Row| {
            // link-table edges leave the row untouched
            if changes.is_empty() || changes.contains("Version") {
                return Ok(());
            }
            Err(HookRejection::new("every update must bump Version"))
        })),
        after_create: Some(Arc::new(|_: &RequestContext, _: &Row| Err(HookRejection::new("audit sink offline")))),
        after_update: Some(Arc::new(|_: &RequestContext, _: &Row| Err(HookRejection::new("search index offline")))),
        ..EntityHooks::default()
    }
}

#[tokio::test]
#[traced_test]
async fn mutation_hooks_gate_writes_and_after_hooks_are_best_effort() {
    let registry = registry_with_hooks(&[("Orders", guarded_hooks())]);
    let f = fixture_with(registry, MemoryStore::new(), ServiceConfig::default()).await;
    let cancel = CancellationToken::new();

    let err = f
        .service
        .create(&EntityRequest::new("Orders").with_body(json!({ "Note": "x" })), &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);
    assert_eq!(f.store.rows("Orders").await.len(), 1);

    let created = f
        .service
        .create(
            &EntityRequest::new("Orders")
                .with_body(json!({ "Note": "x" }))
                .with_context(RequestContext::for_subject("u1")),
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(created.key, "2");
    assert!(logs_contain("after-mutation hook failed"));
    assert!(logs_contain("audit sink offline"));

    let err = f
        .service
        .update(
            &EntityRequest::new("Orders").with_key("1").with_body(json!({ "Note": "y" })),
            UpdateMode::Merge,
            &cancel,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);

    let err = f
        .service
        .put_ref(
            &RefRequest::new("Orders", "1", "Customer").with_target("Customers(5)"),
            &cancel,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);
    assert!(!logs_contain("search index offline"));

    let token = f.tracker.current_token("Orders");
    f.service
        .post_ref(
            &RefRequest::new("Orders", "1", "Products").with_target("Products(2)"),
            &cancel,
        )
        .await
        .unwrap();
    assert!(logs_contain("search index offline"));
    assert_eq!(f.tracker.changes_since(&token).unwrap().len(), 1);
}

#[tokio::test]
async fn cancelled_mutations_roll_back() {
    let f = fixture().await;
    let before = f.store.rows("Orders").await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = f
        .service
        .update(
            &EntityRequest::new("Orders").with_key("1").with_body(json!({ "Note": "never" })),
            UpdateMode::Merge,
            &cancel,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);
    assert!(err.to_string().contains("cancelled"), "{err}");
    assert_eq!(f.store.rows("Orders").await, before);
    assert!(f.tracker.changes_since(&f.tracker.current_token("Orders")).unwrap().is_empty());
}

#[tokio::test]
async fn committed_mutations_emit_one_event_each() {
    let f = fixture().await;
    let cancel = CancellationToken::new();
    let token = f.tracker.current_token("Orders");

    f.service
        .update(
            &EntityRequest::new("Orders").with_key("1").with_body(json!({ "Note": "z" })),
            UpdateMode::Merge,
            &cancel,
        )
        .await
        .unwrap();
    f.service
        .update(
            &EntityRequest::new("Orders")
                .with_key("1")
                .with_if_match("W/\"stale\"")
                .with_body(json!({ "Note": "lost" })),
            UpdateMode::Merge,
            &cancel,
        )
        .await
        .unwrap_err();

    let events = f.tracker.changes_since(&token).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].data.as_ref().unwrap().get("Note"), Some(&Value::String("z".into())));
}
