//! Generic entity row: property name -> value.

use std::collections::BTreeMap;

use serde_json::{Map, Value as Json};

use crate::descriptor::EntityDescriptor;
use crate::value::Value;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Row(BTreeMap<String, Value>);

impl Row {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Value of `name`, treating an absent property as null.
    #[must_use]
    pub fn get_or_null(&self, name: &str) -> &Value {
        self.0.get(name).unwrap_or(&Value::Null)
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.0.insert(name.into(), value);
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value.into());
        self
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.0.remove(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Overwrite every property present in `changes`.
    pub fn merge(&mut self, changes: &Row) {
        for (k, v) in changes.iter() {
            self.0.insert(k.clone(), v.clone());
        }
    }

    /// Render as a JSON object keyed by wire names.
    ///
    /// With `select`, only the listed properties plus the key properties are
    /// emitted. Navigation properties are never part of a row.
    #[must_use]
    pub fn to_json(&self, descriptor: &EntityDescriptor, select: Option<&[String]>) -> Map<String, Json> {
        let mut out = Map::new();
        for prop in descriptor.properties.iter().filter(|p| !p.is_navigation()) {
            let selected = select.is_none_or(|fields| {
                prop.is_key
                    || fields
                        .iter()
                        .any(|f| f == &prop.name || f == &prop.wire_name)
            });
            if !selected {
                continue;
            }
            if let Some(v) = self.get(&prop.name) {
                out.insert(prop.wire_name.clone(), v.to_json());
            }
        }
        out
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Row {
    type Item = (String, Value);
    type IntoIter = std::collections::btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::descriptor::PropertyDescriptor;
    use crate::kind::PropertyKind;
    use serde_json::json;

    fn product() -> EntityDescriptor {
        EntityDescriptor::new("Product", "Products")
            .with_property(PropertyDescriptor::scalar("ID", PropertyKind::Int).key())
            .with_property(PropertyDescriptor::scalar("Name", PropertyKind::String))
            .with_property(PropertyDescriptor::scalar("Price", PropertyKind::Int))
    }

    #[test]
    fn select_keeps_keys() {
        let row = Row::new().with("ID", 1).with("Name", "Pen").with("Price", 3);
        let select = vec!["Name".to_owned()];
        let json = row.to_json(&product(), Some(&select));
        assert_eq!(Json::Object(json), json!({"ID": 1, "Name": "Pen"}));
    }

    #[test]
    fn merge_overwrites() {
        let mut row = Row::new().with("ID", 1).with("Name", "Pen");
        row.merge(&Row::new().with("Name", "Pencil"));
        assert_eq!(row.get("Name"), Some(&Value::from("Pencil")));
        assert_eq!(row.get_or_null("Missing"), &Value::Null);
    }
}
