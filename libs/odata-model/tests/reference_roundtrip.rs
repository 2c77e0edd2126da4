#![allow(clippy::unwrap_used, clippy::expect_used)]

use odata_model::{
    EntityDescriptor, KeyValues, PropertyDescriptor, PropertyKind, Value, format_reference,
    parse_reference,
};

fn order_line() -> EntityDescriptor {
    EntityDescriptor::new("OrderLine", "OrderLines")
        .with_property(PropertyDescriptor::scalar("OrderID", PropertyKind::Int).key())
        .with_property(PropertyDescriptor::scalar("Sku", PropertyKind::String).key())
}

#[test]
fn parsed_reference_formats_back_to_the_same_entity() {
    let inputs = [
        "Categories(1)",
        "/svc/Categories(1)",
        "http://host/svc/Categories(1)",
        "OrderLines(OrderID=3,Sku='a''b')",
        "https://example.com/odata/OrderLines(Sku='x,y',OrderID=9)",
    ];
    for input in inputs {
        let parsed = parse_reference(input).unwrap();
        let formatted = format_reference(&parsed.entity_set, &parsed.key);
        let reparsed = parse_reference(&formatted).unwrap();
        assert_eq!(parsed, reparsed, "{input}");
    }
}

#[test]
fn reference_key_resolves_through_descriptor() {
    let d = order_line();
    let r = parse_reference("https://example.com/odata/OrderLines(Sku='x,y',OrderID=9)").unwrap();
    let key = KeyValues::parse(&d, &r.key).unwrap();
    assert_eq!(key.get("OrderID"), Some(&Value::Int(9)));
    assert_eq!(key.get("Sku"), Some(&Value::from("x,y")));

    let canonical = format_reference(&d.entity_set, &key.to_key_string(&d));
    assert_eq!(canonical, "OrderLines(OrderID=9,Sku='x,y')");
    let again = parse_reference(&canonical).unwrap();
    assert_eq!(KeyValues::parse(&d, &again.key).unwrap(), key);
}
