//! Declarative per-type descriptors.
//!
//! A descriptor is the only way the core learns about an entity type: its
//! properties, key, navigations, ETag source and lifecycle hooks. Values are
//! reached by property name through [`Row`](crate::row::Row), never through
//! reflection.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::hooks::EntityHooks;
use crate::kind::PropertyKind;
use crate::value::Value;

/// Relationship metadata of a navigation property.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NavigationDescriptor {
    /// Target entity name (not the entity-set name).
    pub target: String,
    pub is_array: bool,
    /// Owner dependent property -> target principal property.
    ///
    /// Present when the foreign key lives on the owning row.
    pub referential_constraints: BTreeMap<String, String>,
    /// Target dependent property -> owner principal property.
    ///
    /// Present on collection navigations whose foreign key lives on the target rows.
    pub inverse_constraints: BTreeMap<String, String>,
}

impl NavigationDescriptor {
    #[must_use]
    pub fn single(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn collection(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            is_array: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_constraint(mut self, dependent: impl Into<String>, principal: impl Into<String>) -> Self {
        self.referential_constraints
            .insert(dependent.into(), principal.into());
        self
    }

    #[must_use]
    pub fn with_inverse_constraint(
        mut self,
        dependent: impl Into<String>,
        principal: impl Into<String>,
    ) -> Self {
        self.inverse_constraints
            .insert(dependent.into(), principal.into());
        self
    }

    #[must_use]
    pub fn has_constraints(&self) -> bool {
        !self.referential_constraints.is_empty()
    }

    /// Backed by an association table rather than a foreign-key column.
    #[must_use]
    pub fn is_association(&self) -> bool {
        self.referential_constraints.is_empty() && self.inverse_constraints.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PropertyDescriptor {
    pub name: String,
    /// JSON name on the wire; defaults to `name` when the registry is built.
    #[serde(default)]
    pub wire_name: String,
    pub kind: PropertyKind,
    #[serde(default, rename = "key")]
    pub is_key: bool,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub required: bool,
    /// Assigned by the store on insert (auto-increment keys and the like).
    #[serde(default)]
    pub generated: bool,
    #[serde(default)]
    pub searchable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub navigation: Option<NavigationDescriptor>,
}

fn default_true() -> bool {
    true
}

impl PropertyDescriptor {
    #[must_use]
    pub fn scalar(name: impl Into<String>, kind: PropertyKind) -> Self {
        let name = name.into();
        Self {
            wire_name: name.clone(),
            name,
            kind,
            is_key: false,
            nullable: true,
            required: false,
            generated: false,
            searchable: false,
            navigation: None,
        }
    }

    #[must_use]
    pub fn navigation(name: impl Into<String>, nav: NavigationDescriptor) -> Self {
        Self {
            navigation: Some(nav),
            ..Self::scalar(name, PropertyKind::Navigation)
        }
    }

    /// Mark as key. Keys are required and never null.
    #[must_use]
    pub fn key(mut self) -> Self {
        self.is_key = true;
        self.required = true;
        self.nullable = false;
        self
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self.nullable = false;
        self
    }

    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    #[must_use]
    pub fn generated(mut self) -> Self {
        self.generated = true;
        self
    }

    #[must_use]
    pub fn searchable(mut self) -> Self {
        self.searchable = true;
        self
    }

    #[must_use]
    pub fn wire(mut self, wire_name: impl Into<String>) -> Self {
        self.wire_name = wire_name.into();
        self
    }

    #[must_use]
    pub fn is_navigation(&self) -> bool {
        self.navigation.is_some()
    }

    /// What a foreign key holds once its link is removed: null, or the kind's
    /// zero value for a non-nullable column. `None` when the kind has no zero.
    #[must_use]
    pub fn unlinked_value(&self) -> Option<Value> {
        if self.nullable {
            Some(Value::Null)
        } else {
            Value::zero(self.kind)
        }
    }

    #[must_use]
    pub fn is_complex(&self) -> bool {
        self.kind == PropertyKind::Complex
    }

    /// Whether the property answers to `name` (property name or wire name).
    #[must_use]
    pub fn answers_to(&self, name: &str) -> bool {
        self.name == name || self.wire_name == name
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntityDescriptor {
    pub entity_name: String,
    pub entity_set: String,
    /// Physical table; defaults to the entity-set name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    pub properties: Vec<PropertyDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag_property: Option<String>,
    #[serde(skip)]
    pub hooks: EntityHooks,
}

impl EntityDescriptor {
    #[must_use]
    pub fn new(entity_name: impl Into<String>, entity_set: impl Into<String>) -> Self {
        Self {
            entity_name: entity_name.into(),
            entity_set: entity_set.into(),
            table: None,
            properties: Vec::new(),
            etag_property: None,
            hooks: EntityHooks::default(),
        }
    }

    #[must_use]
    pub fn with_property(mut self, property: PropertyDescriptor) -> Self {
        self.properties.push(property);
        self
    }

    #[must_use]
    pub fn with_etag(mut self, property: impl Into<String>) -> Self {
        self.etag_property = Some(property.into());
        self
    }

    #[must_use]
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    #[must_use]
    pub fn with_hooks(mut self, hooks: EntityHooks) -> Self {
        self.hooks = hooks;
        self
    }

    #[must_use]
    pub fn table_name(&self) -> &str {
        self.table.as_deref().unwrap_or(&self.entity_set)
    }

    /// Look a property up by name or wire name.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties
            .iter()
            .find(|p| p.name == name)
            .or_else(|| self.properties.iter().find(|p| p.wire_name == name))
    }

    /// Look a navigation property up by name or wire name.
    #[must_use]
    pub fn navigation(&self, name: &str) -> Option<(&PropertyDescriptor, &NavigationDescriptor)> {
        let prop = self.property(name)?;
        prop.navigation.as_ref().map(|nav| (prop, nav))
    }

    /// Key properties in declaration order.
    pub fn key_properties(&self) -> impl Iterator<Item = &PropertyDescriptor> {
        self.properties.iter().filter(|p| p.is_key)
    }

    #[must_use]
    pub fn key_names(&self) -> Vec<&str> {
        self.key_properties().map(|p| p.name.as_str()).collect()
    }

    pub fn scalar_properties(&self) -> impl Iterator<Item = &PropertyDescriptor> {
        self.properties.iter().filter(|p| !p.is_navigation())
    }

    pub fn navigation_properties(&self) -> impl Iterator<Item = &PropertyDescriptor> {
        self.properties.iter().filter(|p| p.is_navigation())
    }

    #[must_use]
    pub fn etag_descriptor(&self) -> Option<&PropertyDescriptor> {
        self.etag_property.as_deref().and_then(|n| self.property(n))
    }
}
