//! Skip-token codec.
//!
//! A skip token captures the sort position of the last row of a page: every
//! `$orderby` value plus the key. The wire form is base64url (no padding) over
//! `{"v":1,"k":{wire:value},"o":{wire:value}}`. Only this codec interprets it.
//!
//! Resuming is a lexicographic comparison over the effective order (the
//! requested `$orderby` followed by the key columns ascending), so pages stay
//! complete and duplicate-free even when leading sort values repeat.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::ast::{CompareOperator, Expr};
use crate::descriptor::{EntityDescriptor, PropertyDescriptor};
use crate::errors::Error;
use crate::query::{OrderBy, OrderKey, SortDir};
use crate::row::Row;
use crate::value::Value;

const VERSION: u8 = 1;

/// Resolve `$orderby` against the descriptor and append the key columns.
///
/// Fields in the result are property names (not wire names).
///
/// # Errors
/// `Error::InvalidQueryOption` when an order field is unknown or not a scalar.
pub fn effective_order(descriptor: &EntityDescriptor, order_by: &OrderBy) -> Result<OrderBy, Error> {
    let mut keys = Vec::with_capacity(order_by.len() + 1);
    for k in order_by.iter() {
        let prop = orderable(descriptor, &k.field)?;
        if keys.iter().any(|existing: &OrderKey| existing.field == prop.name) {
            continue;
        }
        keys.push(OrderKey {
            field: prop.name.clone(),
            dir: k.dir,
        });
    }
    let mut order = OrderBy(keys);
    for key in descriptor.key_properties() {
        order = order.ensure_tiebreaker(&key.name, SortDir::Asc);
    }
    Ok(order)
}

fn orderable<'a>(descriptor: &'a EntityDescriptor, field: &str) -> Result<&'a PropertyDescriptor, Error> {
    let prop = descriptor
        .property(field)
        .ok_or_else(|| Error::query_option("$orderby", format!("unknown property '{field}'")))?;
    if prop.is_navigation() || !prop.kind.is_scalar() {
        return Err(Error::query_option(
            "$orderby",
            format!("'{field}' is not a primitive property"),
        ));
    }
    Ok(prop)
}

/// Decoded cursor. Maps are keyed by property name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SkipToken {
    pub key_values: BTreeMap<String, Value>,
    pub order_by_values: BTreeMap<String, Value>,
}

#[derive(Serialize, Deserialize)]
struct Wire {
    v: u8,
    k: BTreeMap<String, Json>,
    #[serde(default)]
    o: BTreeMap<String, Json>,
}

impl SkipToken {
    /// Capture the position of `row` under `order` (an effective order).
    ///
    /// # Errors
    /// `Error::Internal` when the row lacks a key or sort value.
    pub fn from_row(descriptor: &EntityDescriptor, order: &OrderBy, row: &Row) -> Result<Self, Error> {
        let mut key_values = BTreeMap::new();
        for key in descriptor.key_properties() {
            let v = row
                .get(&key.name)
                .filter(|v| !v.is_null())
                .ok_or_else(|| Error::internal(format!("row has no value for key '{}'", key.name)))?;
            key_values.insert(key.name.clone(), v.clone());
        }

        let mut order_by_values = BTreeMap::new();
        for k in order.iter() {
            if key_values.contains_key(&k.field) {
                continue;
            }
            let v = row
                .get(&k.field)
                .ok_or_else(|| Error::internal(format!("row has no value for sort field '{}'", k.field)))?;
            order_by_values.insert(k.field.clone(), v.clone());
        }

        Ok(Self {
            key_values,
            order_by_values,
        })
    }

    /// # Errors
    /// `Error::Internal` if the cursor cannot be serialized.
    pub fn encode(&self, descriptor: &EntityDescriptor) -> Result<String, Error> {
        let wire_map = |m: &BTreeMap<String, Value>| {
            m.iter()
                .map(|(name, v)| {
                    let wire = descriptor
                        .property(name)
                        .map_or_else(|| name.clone(), |p| p.wire_name.clone());
                    (wire, v.to_json())
                })
                .collect::<BTreeMap<_, _>>()
        };
        let wire = Wire {
            v: VERSION,
            k: wire_map(&self.key_values),
            o: wire_map(&self.order_by_values),
        };
        let bytes = serde_json::to_vec(&wire).map_err(|e| Error::internal(format!("skip token: {e}")))?;
        Ok(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Decode a token issued for `order` (an effective order) over `descriptor`.
    ///
    /// # Errors
    /// `Error::InvalidSkipToken` when the token is malformed, was issued for a
    /// different entity set or sort order, or carries values of the wrong type.
    pub fn decode(descriptor: &EntityDescriptor, order: &OrderBy, token: &str) -> Result<Self, Error> {
        let invalid = |reason: &str| Error::InvalidSkipToken(reason.to_owned());

        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|_| invalid("invalid base64url encoding"))?;
        let wire: Wire = serde_json::from_slice(&bytes).map_err(|_| invalid("malformed JSON"))?;
        if wire.v != VERSION {
            return Err(invalid("unsupported version"));
        }

        let typed = |wire_name: &str, json: &Json| -> Result<(String, Value), Error> {
            let prop = descriptor
                .property(wire_name)
                .ok_or_else(|| invalid("unknown property"))?;
            let v = Value::from_json(prop.kind, json).map_err(|_| invalid("value has the wrong type"))?;
            Ok((prop.name.clone(), v))
        };

        let key_values = wire
            .k
            .iter()
            .map(|(w, j)| typed(w, j))
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        let order_by_values = wire
            .o
            .iter()
            .map(|(w, j)| typed(w, j))
            .collect::<Result<BTreeMap<_, _>, _>>()?;

        let key_names = descriptor.key_names();
        if key_values.len() != key_names.len()
            || key_names
                .iter()
                .any(|k| key_values.get(*k).is_none_or(Value::is_null))
        {
            return Err(invalid("key values do not match the entity key"));
        }

        let sort_fields: Vec<&str> = order
            .iter()
            .map(|k| k.field.as_str())
            .filter(|f| !key_names.contains(f))
            .collect();
        if order_by_values.len() != sort_fields.len()
            || sort_fields.iter().any(|f| !order_by_values.contains_key(*f))
        {
            return Err(invalid("token was issued for a different $orderby"));
        }

        Ok(Self {
            key_values,
            order_by_values,
        })
    }

    fn value_of(&self, field: &str) -> Option<&Value> {
        self.key_values
            .get(field)
            .or_else(|| self.order_by_values.get(field))
    }

    /// Predicate selecting the rows strictly after this position under `order`.
    ///
    /// Disjunct `i` holds the first `i` columns equal to the token and column
    /// `i` past it. Nulls sort first: ascending, everything non-null follows a
    /// null; descending, nothing follows a null and null follows every value.
    ///
    /// # Errors
    /// `Error::InvalidSkipToken` when the token lacks a value for an order column.
    pub fn resume_predicate(&self, order: &OrderBy) -> Result<Expr, Error> {
        let mut disjuncts = Vec::with_capacity(order.len());
        let mut prefix: Vec<Expr> = Vec::new();

        for k in order.iter() {
            let v = self
                .value_of(&k.field)
                .ok_or_else(|| Error::InvalidSkipToken(format!("no value for '{}'", k.field)))?;

            if let Some(after) = after(&k.field, k.dir, v) {
                disjuncts.push(
                    Expr::all(prefix.iter().cloned().chain(std::iter::once(after)))
                        .unwrap_or(Expr::Value(Value::Bool(false))),
                );
            }
            prefix.push(Expr::eq(k.field.as_str(), v.clone()));
        }

        Expr::any(disjuncts).ok_or_else(|| Error::InvalidSkipToken("empty sort order".into()))
    }
}

fn after(field: &str, dir: SortDir, v: &Value) -> Option<Expr> {
    match (dir, v.is_null()) {
        (SortDir::Asc, true) => Some(Expr::compare(field, CompareOperator::Ne, Value::Null)),
        (SortDir::Asc, false) => Some(Expr::compare(field, CompareOperator::Gt, v.clone())),
        (SortDir::Desc, true) => None,
        (SortDir::Desc, false) => Some(
            Expr::compare(field, CompareOperator::Lt, v.clone())
                .or(Expr::compare(field, CompareOperator::Eq, Value::Null)),
        ),
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::descriptor::PropertyDescriptor;
    use crate::kind::PropertyKind;

    fn product() -> EntityDescriptor {
        EntityDescriptor::new("Product", "Products")
            .with_property(PropertyDescriptor::scalar("ID", PropertyKind::Int).key().wire("id"))
            .with_property(PropertyDescriptor::scalar("Name", PropertyKind::String))
            .with_property(PropertyDescriptor::scalar("Price", PropertyKind::Int))
            .with_property(PropertyDescriptor::scalar("Tags", PropertyKind::Complex))
    }

    #[test]
    fn effective_order_appends_key() {
        let d = product();
        let order = effective_order(&d, &OrderBy(vec![OrderKey::desc("Price")])).unwrap();
        assert_eq!(order.0, vec![OrderKey::desc("Price"), OrderKey::asc("ID")]);

        let order = effective_order(&d, &OrderBy(vec![OrderKey::desc("id")])).unwrap();
        assert_eq!(order.0, vec![OrderKey::desc("ID")]);

        assert!(effective_order(&d, &OrderBy(vec![OrderKey::asc("Tags")])).is_err());
        assert!(effective_order(&d, &OrderBy(vec![OrderKey::asc("Nope")])).is_err());
    }

    #[test]
    fn encode_decode() {
        let d = product();
        let order = effective_order(&d, &OrderBy(vec![OrderKey::asc("Name")])).unwrap();
        let row = Row::new().with("ID", 2).with("Name", "Pen").with("Price", 3);
        let token = SkipToken::from_row(&d, &order, &row).unwrap();
        assert_eq!(token.order_by_values.len(), 1);

        let encoded = token.encode(&d).unwrap();
        assert!(!encoded.contains('='));
        assert_eq!(SkipToken::decode(&d, &order, &encoded).unwrap(), token);
    }

    #[test]
    fn decode_rejects_foreign_or_tampered_tokens() {
        let d = product();
        let by_name = effective_order(&d, &OrderBy(vec![OrderKey::asc("Name")])).unwrap();
        let by_key = effective_order(&d, &OrderBy::empty()).unwrap();
        let row = Row::new().with("ID", 2).with("Name", "Pen");
        let encoded = SkipToken::from_row(&d, &by_name, &row)
            .unwrap()
            .encode(&d)
            .unwrap();

        assert!(matches!(
            SkipToken::decode(&d, &by_key, &encoded),
            Err(Error::InvalidSkipToken(_))
        ));
        assert!(SkipToken::decode(&d, &by_name, "not base64!").is_err());
        let bad_type = URL_SAFE_NO_PAD.encode(br#"{"v":1,"k":{"id":"x"}}"#);
        assert!(SkipToken::decode(&d, &by_key, &bad_type).is_err());
        let bad_version = URL_SAFE_NO_PAD.encode(br#"{"v":2,"k":{"id":1}}"#);
        assert!(SkipToken::decode(&d, &by_key, &bad_version).is_err());
        let good = URL_SAFE_NO_PAD.encode(br#"{"v":1,"k":{"id":1}}"#);
        assert!(SkipToken::decode(&d, &by_key, &good).is_ok());
    }

    #[test]
    fn resume_predicate_is_lexicographic() {
        let d = product();
        let order = effective_order(&d, &OrderBy(vec![OrderKey::desc("Price")])).unwrap();
        let token = SkipToken::from_row(&d, &order, &Row::new().with("ID", 4).with("Price", 10)).unwrap();
        let pred = token.resume_predicate(&order).unwrap();

        let expected = Expr::compare("Price", CompareOperator::Lt, Value::Int(10))
            .or(Expr::compare("Price", CompareOperator::Eq, Value::Null))
            .or(Expr::eq("Price", Value::Int(10))
                .and(Expr::compare("ID", CompareOperator::Gt, Value::Int(4))));
        assert_eq!(pred, expected);
    }

    #[test]
    fn resume_after_null_descending_only_uses_key() {
        let d = product();
        let order = effective_order(&d, &OrderBy(vec![OrderKey::desc("Price")])).unwrap();
        let token = SkipToken::from_row(&d, &order, &Row::new().with("ID", 4).with("Price", Value::Null)).unwrap();
        let pred = token.resume_predicate(&order).unwrap();
        let expected = Expr::eq("Price", Value::Null)
            .and(Expr::compare("ID", CompareOperator::Gt, Value::Int(4)));
        assert_eq!(pred, expected);
    }

    #[test]
    fn missing_sort_value_fails_token_build() {
        let d = product();
        let order = effective_order(&d, &OrderBy(vec![OrderKey::asc("Name")])).unwrap();
        assert!(matches!(
            SkipToken::from_row(&d, &order, &Row::new().with("ID", 1)),
            Err(Error::Internal(_))
        ));
    }
}
