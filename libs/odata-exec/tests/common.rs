#![allow(clippy::unwrap_used, clippy::expect_used)]
#![allow(dead_code)]

use std::sync::Arc;

use odata_exec::{CollectionRequest, CollectionResponse, Service, ServiceConfig};
use odata_model::{
    EntityDescriptor, EntityHooks, NavigationDescriptor, PropertyDescriptor, PropertyKind, QueryOptions, Registry, Row,
    Value,
};
use odata_store::{MemoryChangeTracker, MemoryStore};
use tokio_util::sync::CancellationToken;

/// Customers 1-n Orders (foreign key on Orders), Orders n-n Products (link table).
pub fn model() -> Vec<EntityDescriptor> {
    let customer = EntityDescriptor::new("Customer", "Customers")
        .with_property(PropertyDescriptor::scalar("ID", PropertyKind::Int).key())
        .with_property(PropertyDescriptor::scalar("Name", PropertyKind::String).required().searchable())
        .with_property(PropertyDescriptor::navigation(
            "Orders",
            NavigationDescriptor::collection("Order").with_inverse_constraint("CustomerID", "ID"),
        ));
    let order = EntityDescriptor::new("Order", "Orders")
        .with_property(PropertyDescriptor::scalar("ID", PropertyKind::Int).key().generated())
        .with_property(PropertyDescriptor::scalar("CustomerID", PropertyKind::Int))
        .with_property(PropertyDescriptor::scalar("Note", PropertyKind::String))
        .with_property(PropertyDescriptor::scalar("Version", PropertyKind::Int))
        .with_property(PropertyDescriptor::navigation(
            "Customer",
            NavigationDescriptor::single("Customer").with_constraint("CustomerID", "ID"),
        ))
        .with_property(PropertyDescriptor::navigation(
            "Products",
            NavigationDescriptor::collection("Product"),
        ))
        .with_etag("Version");
    let product = EntityDescriptor::new("Product", "Products")
        .with_property(PropertyDescriptor::scalar("ID", PropertyKind::Int).key())
        .with_property(PropertyDescriptor::scalar("Name", PropertyKind::String).searchable())
        .with_property(PropertyDescriptor::scalar("Price", PropertyKind::Int));
    vec![customer, order, product]
}

pub fn registry() -> Arc<Registry> {
    registry_with_hooks(&[])
}

pub fn registry_with_hooks(hooks: &[(&str, EntityHooks)]) -> Arc<Registry> {
    let builder = hooks
        .iter()
        .fold(Registry::builder().entities(model()), |b, (set, h)| b.hooks(*set, h.clone()));
    Arc::new(builder.build().expect("valid registry"))
}

pub fn customer(id: i64, name: &str) -> Row {
    Row::new().with("ID", id).with("Name", name)
}

pub fn product(id: i64, name: &str, price: Option<i64>) -> Row {
    let row = Row::new().with("ID", id).with("Name", name);
    match price {
        Some(p) => row.with("Price", p),
        None => row.with("Price", Value::Null),
    }
}

pub fn order(id: i64, customer: i64, version: i64) -> Row {
    Row::new()
        .with("ID", id)
        .with("CustomerID", customer)
        .with("Note", "first")
        .with("Version", version)
}

/// Two customers, five products (one without a price) and order 1 of customer 1.
pub async fn seeded(store: &MemoryStore, registry: &Registry) {
    let customers = registry.entity_set("Customers").unwrap();
    let products = registry.entity_set("Products").unwrap();
    let orders = registry.entity_set("Orders").unwrap();
    store
        .seed(customers, [customer(1, "Contoso"), customer(5, "Fabrikam")])
        .await;
    store
        .seed(
            products,
            [
                product(1, "Apple", Some(3)),
                product(2, "Banana", Some(5)),
                product(3, "Cherry", Some(5)),
                product(4, "Apricot", None),
                product(5, "Date", Some(8)),
            ],
        )
        .await;
    store.seed(orders, [order(1, 1, 1)]).await;
}

pub struct Fixture {
    pub registry: Arc<Registry>,
    pub store: MemoryStore,
    pub tracker: Arc<MemoryChangeTracker>,
    pub service: Service,
}

pub async fn fixture() -> Fixture {
    fixture_with(registry(), MemoryStore::new(), ServiceConfig::default()).await
}

pub async fn fixture_with(registry: Arc<Registry>, store: MemoryStore, config: ServiceConfig) -> Fixture {
    seeded(&store, &registry).await;
    let tracker = Arc::new(MemoryChangeTracker::new());
    let service = Service::new(Arc::clone(&registry), Arc::new(store.clone()), config)
        .with_tracker(Arc::clone(&tracker) as Arc<dyn odata_store::ChangeTracker>);
    Fixture {
        registry,
        store,
        tracker,
        service,
    }
}

pub fn ids<'a>(rows: impl IntoIterator<Item = &'a Row>) -> Vec<i64> {
    rows.into_iter()
        .map(|r| r.get_or_null("ID").as_i64().unwrap())
        .collect()
}

/// Query parameter `name` of a rendered link, decoded.
pub fn link_param(link: &str, name: &str) -> Option<String> {
    let (_, query) = link.split_once('?')?;
    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(query).unwrap();
    pairs.into_iter().find(|(n, _)| n == name).map(|(_, v)| v)
}

/// Request the page a next link points at, keeping the other options of `base`.
pub fn follow(base: &QueryOptions, link: &str) -> QueryOptions {
    let mut options = base.clone();
    options.skip_token = link_param(link, "$skiptoken");
    options.skip = link_param(link, "$skip").map(|s| s.parse().unwrap());
    options
}

/// Walk every page of `set` and return the rows in order.
pub async fn walk(service: &Service, set: &str, options: QueryOptions) -> (Vec<Row>, usize) {
    let cancel = CancellationToken::new();
    let mut rows = Vec::new();
    let mut pages = 0;
    let mut current = options.clone();
    loop {
        let response: CollectionResponse = service
            .read_collection(&CollectionRequest::new(set, current.clone()), &cancel)
            .await
            .unwrap();
        pages += 1;
        rows.extend(response.rows().cloned());
        match response.next_link {
            Some(link) => current = follow(&options, &link),
            None => break,
        }
        assert!(pages < 50, "pagination does not terminate");
    }
    (rows, pages)
}
