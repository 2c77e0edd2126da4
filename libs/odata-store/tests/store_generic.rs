#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

#[cfg(all(feature = "sea-orm", feature = "sqlite"))]
use std::sync::Arc;

use common::{ids, key};
use odata_model::{CompareOperator, Expr, OrderBy, Registry, Row, Value};
use odata_store::{Association, FindQuery, MemoryStore, RowStore, StoreError};

fn association<'a>(registry: &'a Registry, set: &str, nav: &str) -> Association<'a> {
    let owner = registry.entity_set(set).unwrap();
    let (prop, navigation) = owner.navigation(nav).unwrap();
    let target = registry.entity(&navigation.target).unwrap();
    Association::new(owner, prop, target).unwrap()
}

async fn seed(store: &dyn RowStore, registry: &Registry) {
    let customers = registry.entity_set("Customers").unwrap();
    let orders = registry.entity_set("Orders").unwrap();
    let tags = registry.entity_set("Tags").unwrap();

    let mut tx = store.begin().await.unwrap();
    for (id, name) in [(1_i64, "Contoso"), (2, "Fabrikam")] {
        tx.create(customers, &Row::new().with("ID", id).with("Name", name))
            .await
            .unwrap();
    }
    let first = tx
        .create(orders, &Row::new().with("CustomerID", 1_i64).with("Total", 30_i64))
        .await
        .unwrap();
    assert_eq!(first.get("ID"), Some(&Value::Int(1)));
    tx.create(orders, &Row::new().with("CustomerID", 1_i64).with("Total", Value::Null))
        .await
        .unwrap();
    tx.create(orders, &Row::new().with("CustomerID", 2_i64).with("Total", 10_i64))
        .await
        .unwrap();
    tx.create(tags, &Row::new().with("Code", "rush").with("Label", "Rush"))
        .await
        .unwrap();
    tx.commit().await.unwrap();
}

async fn reads(store: &dyn RowStore, registry: &Registry) {
    let customers = registry.entity_set("Customers").unwrap();
    let orders = registry.entity_set("Orders").unwrap();
    let mut tx = store.begin().await.unwrap();

    // nulls sort first ascending and last descending
    let desc = tx
        .find(&FindQuery::new(orders).order(OrderBy::parse("Total desc, ID").unwrap()))
        .await
        .unwrap();
    assert_eq!(ids(&desc), vec![1, 3, 2]);
    let asc = tx
        .find(&FindQuery::new(orders).order(OrderBy::parse("Total, ID").unwrap()))
        .await
        .unwrap();
    assert_eq!(ids(&asc), vec![2, 3, 1]);

    let page = tx
        .find(
            &FindQuery::new(orders)
                .order(OrderBy::parse("ID").unwrap())
                .offset(1)
                .limit(1),
        )
        .await
        .unwrap();
    assert_eq!(ids(&page), vec![2]);

    // comparisons against null are unknown, so neither side matches
    let gt = Expr::compare("Total", CompareOperator::Gt, Value::Int(5));
    assert_eq!(tx.count(&FindQuery::new(orders).filter(gt.clone())).await.unwrap(), 2);
    assert_eq!(tx.count(&FindQuery::new(orders).filter(gt.not())).await.unwrap(), 0);
    assert_eq!(
        tx.count(&FindQuery::new(orders).filter(Expr::eq("Total", Value::Null)))
            .await
            .unwrap(),
        1
    );

    let found = tx
        .find(&FindQuery::new(customers).search("fab"))
        .await
        .unwrap();
    assert_eq!(ids(&found), vec![2]);

    let by_key = tx
        .find(&FindQuery::by_key(customers, &key(customers, "1")))
        .await
        .unwrap();
    assert_eq!(by_key[0].get("Name"), Some(&Value::from("Contoso")));

    let err = tx
        .find(&FindQuery::new(orders).filter(Expr::eq("Nope", Value::Int(1))))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidInput(_)), "{err}");

    tx.rollback().await.unwrap();
}

async fn navigation(store: &dyn RowStore, registry: &Registry) {
    let customers = registry.entity_set("Customers").unwrap();
    let orders = registry.entity_set("Orders").unwrap();
    let customer_orders = association(registry, "Customers", "Orders");
    let order_customer = association(registry, "Orders", "Customer");
    let mut tx = store.begin().await.unwrap();

    let related = tx
        .find(&FindQuery::related(customer_orders, key(customers, "1")).order(OrderBy::parse("ID").unwrap()))
        .await
        .unwrap();
    assert_eq!(ids(&related), vec![1, 2]);
    assert_eq!(
        tx.count(&FindQuery::related(customer_orders, key(customers, "2")))
            .await
            .unwrap(),
        1
    );

    let owner = tx
        .find(&FindQuery::related(order_customer, key(orders, "3")))
        .await
        .unwrap();
    assert_eq!(ids(&owner), vec![2]);

    // single-valued: point order 3 at customer 1
    tx.replace_associations(&order_customer, &key(orders, "3"), &[key(customers, "1")])
        .await
        .unwrap();
    let related = tx
        .find(&FindQuery::related(customer_orders, key(customers, "1")).order(OrderBy::parse("ID").unwrap()))
        .await
        .unwrap();
    assert_eq!(ids(&related), vec![1, 2, 3]);

    // collection with the foreign key on the target
    tx.remove_association(&customer_orders, &key(customers, "1"), &key(orders, "3"))
        .await
        .unwrap();
    let detached = tx
        .find(&FindQuery::by_key(orders, &key(orders, "3")))
        .await
        .unwrap();
    assert_eq!(detached[0].get_or_null("CustomerID"), &Value::Null);
    let err = tx
        .remove_association(&customer_orders, &key(customers, "1"), &key(orders, "3"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)), "{err}");

    let err = tx
        .replace_associations(
            &order_customer,
            &key(orders, "3"),
            &[key(customers, "1"), key(customers, "2")],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidInput(_)), "{err}");

    tx.replace_associations(&customer_orders, &key(customers, "2"), &[key(orders, "3")])
        .await
        .unwrap();
    let related = tx
        .find(&FindQuery::related(customer_orders, key(customers, "2")))
        .await
        .unwrap();
    assert_eq!(ids(&related), vec![3]);

    tx.commit().await.unwrap();
}

async fn link_table(store: &dyn RowStore, registry: &Registry) {
    let orders = registry.entity_set("Orders").unwrap();
    let tags = registry.entity_set("Tags").unwrap();
    let order_tags = association(registry, "Orders", "Tags");
    let rush = key(tags, "'rush'");
    let mut tx = store.begin().await.unwrap();

    tx.append_association(&order_tags, &key(orders, "1"), &rush)
        .await
        .unwrap();
    tx.append_association(&order_tags, &key(orders, "1"), &rush)
        .await
        .unwrap();
    let linked = tx
        .find(&FindQuery::related(order_tags, key(orders, "1")))
        .await
        .unwrap();
    assert_eq!(linked.len(), 1);
    assert_eq!(linked[0].get("Label"), Some(&Value::from("Rush")));

    tx.replace_associations(&order_tags, &key(orders, "1"), &[])
        .await
        .unwrap();
    assert_eq!(
        tx.count(&FindQuery::related(order_tags, key(orders, "1")))
            .await
            .unwrap(),
        0
    );
    let err = tx
        .remove_association(&order_tags, &key(orders, "1"), &rush)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)), "{err}");

    let err = tx
        .append_association(&order_tags, &key(orders, "1"), &key(tags, "'missing'"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)), "{err}");

    // deleting a target drops its edges
    tx.append_association(&order_tags, &key(orders, "2"), &rush)
        .await
        .unwrap();
    tx.delete(tags, &rush).await.unwrap();
    assert!(
        tx.find(&FindQuery::related(order_tags, key(orders, "2")))
            .await
            .unwrap()
            .is_empty()
    );
    let err = tx.delete(tags, &rush).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)), "{err}");

    tx.commit().await.unwrap();
}

async fn transactions(store: &dyn RowStore, registry: &Registry) {
    let customers = registry.entity_set("Customers").unwrap();
    let one = key(customers, "1");

    let mut tx = store.begin().await.unwrap();
    let err = tx
        .create(customers, &Row::new().with("ID", 1_i64).with("Name", "dup"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)), "{err}");
    let updated = tx
        .update(customers, &one, &Row::new().with("Name", "Changed"))
        .await
        .unwrap();
    assert_eq!(updated.get("Name"), Some(&Value::from("Changed")));
    tx.rollback().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let rows = tx.find(&FindQuery::by_key(customers, &one)).await.unwrap();
    assert_eq!(rows[0].get("Name"), Some(&Value::from("Contoso")));
    let err = tx
        .update(customers, &key(customers, "99"), &Row::new().with("Name", "x"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)), "{err}");
    tx.rollback().await.unwrap();
}

async fn exercise(store: &dyn RowStore, registry: &Registry) {
    seed(store, registry).await;
    reads(store, registry).await;
    navigation(store, registry).await;
    link_table(store, registry).await;
    transactions(store, registry).await;
}

#[tokio::test]
async fn memory_store() {
    let registry = common::registry();
    exercise(&MemoryStore::new(), &registry).await;
}

#[tokio::test]
async fn memory_store_without_search_reports_unsupported() {
    let registry = common::registry();
    let store = MemoryStore::new().without_search();
    let customers = registry.entity_set("Customers").unwrap();
    let mut tx = store.begin().await.unwrap();
    let err = tx
        .find(&FindQuery::new(customers).search("x"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Unsupported(_)), "{err}");
}

#[tokio::test]
async fn memory_store_refuses_keys_past_the_integer_limit() {
    let registry = common::registry();
    let store = MemoryStore::new();
    let orders = registry.entity_set("Orders").unwrap();
    store
        .seed(orders, [Row::new().with("ID", i64::MAX).with("CustomerID", 1_i64)])
        .await;

    let mut tx = store.begin().await.unwrap();
    let err = tx
        .create(orders, &Row::new().with("CustomerID", 1_i64))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)), "{err}");
    tx.rollback().await.unwrap();
}

#[cfg(all(feature = "sea-orm", feature = "sqlite"))]
#[tokio::test]
async fn sqlite_store() {
    let registry = Arc::new(common::registry());
    let store = common::sqlite_store(Arc::clone(&registry)).await;
    exercise(&store, &registry).await;
}

#[cfg(all(feature = "sea-orm", feature = "sqlite"))]
#[tokio::test]
async fn sqlite_store_projects_selected_columns() {
    let registry = Arc::new(common::registry());
    let store = common::sqlite_store(Arc::clone(&registry)).await;
    seed(&store, &registry).await;
    let customers = registry.entity_set("Customers").unwrap();

    let mut tx = store.begin().await.unwrap();
    let mut query = FindQuery::new(customers).order(OrderBy::parse("ID").unwrap());
    query.select = Some(vec!["ID".to_owned()]);
    let rows = tx.find(&query).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert!(!rows[0].contains("Name"));
    tx.rollback().await.unwrap();
}
