#![allow(clippy::unwrap_used, clippy::expect_used)]
#![allow(dead_code)]

use odata_model::{EntityDescriptor, KeyValues, NavigationDescriptor, PropertyDescriptor, PropertyKind, Registry, Row, Value};

/// Customers 1-n Orders (foreign key on Orders), Orders n-n Tags (link table).
#[must_use]
pub fn registry() -> Registry {
    let customer = EntityDescriptor::new("Customer", "Customers")
        .with_property(PropertyDescriptor::scalar("ID", PropertyKind::Int).key())
        .with_property(PropertyDescriptor::scalar("Name", PropertyKind::String).searchable())
        .with_property(PropertyDescriptor::navigation(
            "Orders",
            NavigationDescriptor::collection("Order").with_inverse_constraint("CustomerID", "ID"),
        ));
    let order = EntityDescriptor::new("Order", "Orders")
        .with_property(PropertyDescriptor::scalar("ID", PropertyKind::Int).key().generated())
        .with_property(PropertyDescriptor::scalar("CustomerID", PropertyKind::Int))
        .with_property(PropertyDescriptor::scalar("Total", PropertyKind::Int))
        .with_property(PropertyDescriptor::navigation(
            "Customer",
            NavigationDescriptor::single("Customer").with_constraint("CustomerID", "ID"),
        ))
        .with_property(PropertyDescriptor::navigation(
            "Tags",
            NavigationDescriptor::collection("Tag"),
        ));
    let tag = EntityDescriptor::new("Tag", "Tags")
        .with_property(PropertyDescriptor::scalar("Code", PropertyKind::String).key())
        .with_property(PropertyDescriptor::scalar("Label", PropertyKind::String));

    Registry::builder()
        .entities([customer, order, tag])
        .build()
        .expect("valid registry")
}

pub fn key(entity: &EntityDescriptor, raw: &str) -> KeyValues {
    KeyValues::parse(entity, raw).unwrap()
}

pub fn ids(rows: &[Row]) -> Vec<i64> {
    rows.iter()
        .map(|r| r.get_or_null("ID").as_i64().unwrap())
        .collect()
}

pub fn int(row: &Row, field: &str) -> Value {
    row.get_or_null(field).clone()
}

#[cfg(all(feature = "sea-orm", feature = "sqlite"))]
pub async fn sqlite_store(registry: std::sync::Arc<Registry>) -> odata_store::SqlStore {
    let mut opts = sea_orm::ConnectOptions::new("sqlite::memory:");
    opts.max_connections(1).sqlx_logging(false);
    let store = odata_store::SqlStore::connect(opts, registry).await.unwrap();
    store.create_schema().await.unwrap();
    store
}
