//! Key literal codec: `5`, `'abc'`, `K1=V1,K2=V2`.

use thiserror::Error;

use crate::ast::Expr;
use crate::descriptor::EntityDescriptor;
use crate::reference::{CompositeKeyError, split_composite_key};
use crate::row::Row;
use crate::value::{Value, ValueError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("entity '{entity}' has {expected} key properties, got a single key value")]
    NeedsComposite { entity: String, expected: usize },

    #[error("'{0}' is not a key property")]
    UnknownKeyProperty(String),

    #[error("key property '{0}' given twice")]
    DuplicateKeyProperty(String),

    #[error("key property '{0}' is missing")]
    MissingKeyProperty(String),

    #[error("key property '{0}' cannot be null")]
    NullKey(String),

    #[error("malformed key '{0}'")]
    Malformed(String),

    #[error(transparent)]
    Literal(#[from] ValueError),
}

/// Key of one entity, in descriptor key order, keyed by property name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyValues(Vec<(String, Value)>);

impl KeyValues {
    /// Parse the text found inside `Set(...)`.
    ///
    /// # Errors
    /// Returns `KeyError` for unknown, missing, duplicate or untyped key parts.
    pub fn parse(descriptor: &EntityDescriptor, key: &str) -> Result<Self, KeyError> {
        let key_props: Vec<_> = descriptor.key_properties().collect();

        let pairs = match split_composite_key(key) {
            Ok(pairs) => pairs,
            Err(CompositeKeyError::NotComposite) => {
                let [only] = key_props.as_slice() else {
                    return Err(KeyError::NeedsComposite {
                        entity: descriptor.entity_name.clone(),
                        expected: key_props.len(),
                    });
                };
                vec![(only.name.clone(), key.trim().to_owned())]
            }
            Err(CompositeKeyError::Malformed(k)) => return Err(KeyError::Malformed(k)),
        };

        let mut resolved: Vec<Option<Value>> = vec![None; key_props.len()];
        for (name, literal) in pairs {
            let idx = key_props
                .iter()
                .position(|p| p.answers_to(&name))
                .ok_or_else(|| KeyError::UnknownKeyProperty(name.clone()))?;
            if resolved[idx].is_some() {
                return Err(KeyError::DuplicateKeyProperty(name));
            }
            let value = Value::parse_literal(key_props[idx].kind, &literal)?;
            if value.is_null() {
                return Err(KeyError::NullKey(name));
            }
            resolved[idx] = Some(value);
        }

        key_props
            .iter()
            .zip(resolved)
            .map(|(prop, value)| {
                value
                    .map(|v| (prop.name.clone(), v))
                    .ok_or_else(|| KeyError::MissingKeyProperty(prop.name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    /// Extract the key of `row`.
    ///
    /// # Errors
    /// `KeyError::MissingKeyProperty` / `NullKey` when the row lacks a key value.
    pub fn from_row(descriptor: &EntityDescriptor, row: &Row) -> Result<Self, KeyError> {
        descriptor
            .key_properties()
            .map(|p| match row.get(&p.name) {
                None => Err(KeyError::MissingKeyProperty(p.name.clone())),
                Some(Value::Null) => Err(KeyError::NullKey(p.name.clone())),
                Some(v) => Ok((p.name.clone(), v.clone())),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    /// Canonical key text: `5` for a single key, `A=1,B='x'` (wire names) otherwise.
    #[must_use]
    pub fn to_key_string(&self, descriptor: &EntityDescriptor) -> String {
        if let [(_, only)] = self.0.as_slice() {
            return only.to_literal();
        }
        self.0
            .iter()
            .map(|(name, value)| {
                let wire = descriptor
                    .property(name)
                    .map_or(name.as_str(), |p| p.wire_name.as_str());
                format!("{wire}={}", value.to_literal())
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    /// `K1 eq V1 and K2 eq V2 ...`
    #[must_use]
    pub fn to_predicate(&self) -> Expr {
        let mut clauses = self.0.iter().map(|(n, v)| Expr::eq(n.as_str(), v.clone()));
        let first = clauses.next().unwrap_or(Expr::Value(Value::Bool(false)));
        clauses.fold(first, Expr::and)
    }

    /// Whether `row` carries exactly this key.
    #[must_use]
    pub fn matches(&self, row: &Row) -> bool {
        self.0
            .iter()
            .all(|(n, v)| row.get(n).is_some_and(|rv| rv.loosely_eq(v)))
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// The key as a (partial) row.
    #[must_use]
    pub fn to_row(&self) -> Row {
        self.0.iter().cloned().collect()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::descriptor::PropertyDescriptor;
    use crate::kind::PropertyKind;

    fn single() -> EntityDescriptor {
        EntityDescriptor::new("Product", "Products")
            .with_property(PropertyDescriptor::scalar("ID", PropertyKind::Int).key())
    }

    fn composite() -> EntityDescriptor {
        EntityDescriptor::new("OrderLine", "OrderLines")
            .with_property(PropertyDescriptor::scalar("OrderID", PropertyKind::Int).key())
            .with_property(
                PropertyDescriptor::scalar("Sku", PropertyKind::String)
                    .key()
                    .wire("sku"),
            )
            .with_property(PropertyDescriptor::scalar("Qty", PropertyKind::Int))
    }

    #[test]
    fn single_key_forms() {
        let d = single();
        let k = KeyValues::parse(&d, "5").unwrap();
        assert_eq!(k.get("ID"), Some(&Value::Int(5)));
        assert_eq!(k.to_key_string(&d), "5");
        assert_eq!(KeyValues::parse(&d, "ID=5").unwrap(), k);
        assert!(matches!(KeyValues::parse(&d, "abc"), Err(KeyError::Literal(_))));
        assert!(matches!(KeyValues::parse(&d, "null"), Err(KeyError::NullKey(_))));
    }

    #[test]
    fn composite_key_order_follows_descriptor() {
        let d = composite();
        let k = KeyValues::parse(&d, "sku='O''Neil',OrderID=7").unwrap();
        assert_eq!(
            k.iter().map(|(n, _)| n).collect::<Vec<_>>(),
            vec!["OrderID", "Sku"]
        );
        assert_eq!(k.get("Sku"), Some(&Value::from("O'Neil")));
        assert_eq!(k.to_key_string(&d), "OrderID=7,sku='O''Neil'");
        assert_eq!(KeyValues::parse(&d, &k.to_key_string(&d)).unwrap(), k);
    }

    #[test]
    fn composite_key_errors() {
        let d = composite();
        assert!(matches!(
            KeyValues::parse(&d, "7"),
            Err(KeyError::NeedsComposite { expected: 2, .. })
        ));
        assert_eq!(
            KeyValues::parse(&d, "OrderID=7"),
            Err(KeyError::MissingKeyProperty("Sku".into()))
        );
        assert_eq!(
            KeyValues::parse(&d, "OrderID=7,Qty=1"),
            Err(KeyError::UnknownKeyProperty("Qty".into()))
        );
        assert_eq!(
            KeyValues::parse(&d, "OrderID=7,OrderID=8"),
            Err(KeyError::DuplicateKeyProperty("OrderID".into()))
        );
    }

    #[test]
    fn row_key_and_predicate() {
        let d = composite();
        let row = Row::new().with("OrderID", 7).with("Sku", "a").with("Qty", 2);
        let k = KeyValues::from_row(&d, &row).unwrap();
        assert!(k.matches(&row));
        assert!(!k.matches(&Row::new().with("OrderID", 7).with("Sku", "b")));
        assert!(matches!(k.to_predicate(), Expr::And(_, _)));
        assert_eq!(
            KeyValues::from_row(&d, &Row::new().with("OrderID", 7)),
            Err(KeyError::MissingKeyProperty("Sku".into()))
        );
    }
}
