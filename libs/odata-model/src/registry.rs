//! Entity metadata registry.
//!
//! Built once at startup through [`RegistryBuilder`], validated, then shared
//! read-only (`Arc<Registry>`) by every request.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use thiserror::Error;

use crate::descriptor::EntityDescriptor;
use crate::hooks::EntityHooks;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("duplicate entity set '{0}'")]
    DuplicateEntitySet(String),

    #[error("duplicate entity type '{0}'")]
    DuplicateEntityName(String),

    #[error("entity '{entity}' declares property '{property}' twice")]
    DuplicateProperty { entity: String, property: String },

    #[error("entity '{0}' has no key property")]
    NoKey(String),

    #[error("entity '{entity}': key property '{property}' must be a scalar")]
    InvalidKey { entity: String, property: String },

    #[error("entity '{entity}': navigation '{property}' targets unknown entity '{target}'")]
    UnknownTarget {
        entity: String,
        property: String,
        target: String,
    },

    #[error("entity '{entity}': constraint on '{property}' names unknown or non-scalar property '{name}'")]
    InvalidConstraint {
        entity: String,
        property: String,
        name: String,
    },

    #[error("entity '{entity}': ETag property '{property}' is missing or not a scalar")]
    InvalidETag { entity: String, property: String },

    #[error("hooks registered for unknown entity set '{0}'")]
    UnknownHookTarget(String),
}

#[derive(Debug, Default)]
pub struct Registry {
    by_set: HashMap<String, Arc<EntityDescriptor>>,
    set_by_entity: HashMap<String, String>,
}

impl Registry {
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    #[must_use]
    pub fn entity_set(&self, name: &str) -> Option<&Arc<EntityDescriptor>> {
        self.by_set.get(name)
    }

    /// Look up by entity (type) name.
    #[must_use]
    pub fn entity(&self, entity_name: &str) -> Option<&Arc<EntityDescriptor>> {
        self.set_by_entity
            .get(entity_name)
            .and_then(|set| self.by_set.get(set))
    }

    /// Entity sets in name order.
    #[must_use]
    pub fn entity_sets(&self) -> Vec<&Arc<EntityDescriptor>> {
        let mut sets: Vec<_> = self.by_set.values().collect();
        sets.sort_by(|a, b| a.entity_set.cmp(&b.entity_set));
        sets
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_set.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_set.is_empty()
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    entities: Vec<EntityDescriptor>,
    hooks: Vec<(String, EntityHooks)>,
}

impl RegistryBuilder {
    #[must_use]
    pub fn entity(mut self, descriptor: EntityDescriptor) -> Self {
        self.entities.push(descriptor);
        self
    }

    #[must_use]
    pub fn entities(mut self, descriptors: impl IntoIterator<Item = EntityDescriptor>) -> Self {
        self.entities.extend(descriptors);
        self
    }

    /// Attach hooks to an entity set declared elsewhere (e.g. in a model file).
    #[must_use]
    pub fn hooks(mut self, entity_set: impl Into<String>, hooks: EntityHooks) -> Self {
        self.hooks.push((entity_set.into(), hooks));
        self
    }

    /// Validate and freeze.
    ///
    /// # Errors
    /// Returns the first `RegistryError` found.
    pub fn build(self) -> Result<Registry, RegistryError> {
        let mut entities = self.entities;
        for (set, hooks) in self.hooks {
            let entity = entities
                .iter_mut()
                .find(|e| e.entity_set == set)
                .ok_or_else(|| RegistryError::UnknownHookTarget(set.clone()))?;
            entity.hooks = hooks;
        }

        for entity in &mut entities {
            for prop in &mut entity.properties {
                if prop.wire_name.is_empty() {
                    prop.wire_name.clone_from(&prop.name);
                }
            }
        }

        let mut seen_sets = HashSet::new();
        let mut set_by_entity = HashMap::new();
        for entity in &entities {
            if !seen_sets.insert(entity.entity_set.clone()) {
                return Err(RegistryError::DuplicateEntitySet(entity.entity_set.clone()));
            }
            if set_by_entity.contains_key(&entity.entity_name) {
                return Err(RegistryError::DuplicateEntityName(entity.entity_name.clone()));
            }
            set_by_entity.insert(entity.entity_name.clone(), entity.entity_set.clone());
        }

        for entity in &entities {
            validate_entity(entity, &entities)?;
        }

        Ok(Registry {
            by_set: entities
                .into_iter()
                .map(|e| (e.entity_set.clone(), Arc::new(e)))
                .collect(),
            set_by_entity,
        })
    }
}

fn validate_entity(entity: &EntityDescriptor, all: &[EntityDescriptor]) -> Result<(), RegistryError> {
    let name = || entity.entity_name.clone();

    for (i, prop) in entity.properties.iter().enumerate() {
        if entity.properties[..i].iter().any(|p| p.name == prop.name) {
            return Err(RegistryError::DuplicateProperty {
                entity: name(),
                property: prop.name.clone(),
            });
        }
    }

    let mut keys = entity.key_properties().peekable();
    if keys.peek().is_none() {
        return Err(RegistryError::NoKey(name()));
    }
    if let Some(bad) = keys.find(|k| !k.kind.is_scalar() || k.is_navigation()) {
        return Err(RegistryError::InvalidKey {
            entity: name(),
            property: bad.name.clone(),
        });
    }

    if let Some(etag) = &entity.etag_property {
        match entity.etag_descriptor() {
            Some(p) if p.kind.is_scalar() && !p.is_navigation() => {}
            _ => {
                return Err(RegistryError::InvalidETag {
                    entity: name(),
                    property: etag.clone(),
                });
            }
        }
    }

    for prop in entity.navigation_properties() {
        let Some(nav) = &prop.navigation else {
            continue;
        };
        let target = all
            .iter()
            .find(|e| e.entity_name == nav.target)
            .ok_or_else(|| RegistryError::UnknownTarget {
                entity: name(),
                property: prop.name.clone(),
                target: nav.target.clone(),
            })?;

        let scalar_on = |owner: &EntityDescriptor, field: &str| {
            owner
                .property(field)
                .is_some_and(|p| p.kind.is_scalar() && !p.is_navigation())
        };
        let bad_constraint = |field: &str| RegistryError::InvalidConstraint {
            entity: name(),
            property: prop.name.clone(),
            name: field.to_owned(),
        };

        for (dependent, principal) in &nav.referential_constraints {
            if !scalar_on(entity, dependent) {
                return Err(bad_constraint(dependent));
            }
            if !scalar_on(target, principal) {
                return Err(bad_constraint(principal));
            }
        }
        for (dependent, principal) in &nav.inverse_constraints {
            if !scalar_on(target, dependent) {
                return Err(bad_constraint(dependent));
            }
            if !scalar_on(entity, principal) {
                return Err(bad_constraint(principal));
            }
        }
    }

    Ok(())
}
