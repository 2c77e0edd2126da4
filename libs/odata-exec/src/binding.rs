//! `@odata.bind` resolution.
//!
//! A single-valued navigation with referential constraints resolves into
//! foreign-key values written together with the owning row. Every other bind
//! resolves into a [`PendingCollectionBinding`], applied with replace
//! semantics once the owning row exists and has its key. Targets are always
//! fetched first, so a missing one fails the whole request.

use odata_model::{
    EntityDescriptor, EntityRef, Error, KeyValues, NavigationDescriptor, PropertyDescriptor, Registry, Row, Value,
    parse_reference,
};
use odata_store::{Association, FindQuery, StoreTx};
use serde_json::{Map, Value as Json};
use tracing::debug;

use crate::config::NullFkPolicy;
use crate::payload::BIND_ANNOTATION;

/// Association write deferred until the owner is persisted.
///
/// An empty target list clears the navigation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingCollectionBinding {
    /// Navigation property name on the owner.
    pub navigation: String,
    /// Fetched targets in request order.
    pub targets: Vec<(KeyValues, Row)>,
}

impl PendingCollectionBinding {
    #[must_use]
    pub fn target_keys(&self) -> Vec<KeyValues> {
        self.targets.iter().map(|(k, _)| k.clone()).collect()
    }
}

#[derive(Clone, Debug, Default)]
pub struct ResolvedBindings {
    /// Foreign-key values by property name, written with the owning row.
    pub assignments: Row,
    pub pending: Vec<PendingCollectionBinding>,
}

impl ResolvedBindings {
    /// `assignments` keyed by wire name, for merging into a partial-update body.
    #[must_use]
    pub fn wire_assignments(&self, entity: &EntityDescriptor) -> Map<String, Json> {
        self.assignments
            .iter()
            .map(|(name, v)| {
                let wire = entity
                    .property(name)
                    .map_or_else(|| name.clone(), |p| p.wire_name.clone());
                (wire, v.to_json())
            })
            .collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty() && self.pending.is_empty()
    }
}

/// Copy a principal value into a dependent foreign-key slot.
///
/// Non-null values pass through. A null lands as null when the dependent is
/// nullable; otherwise `policy` decides between failing and the zero value of
/// the dependent's kind.
///
/// # Errors
/// `Error::InvalidBinding` when a null must be rejected or the kind has no zero value.
pub fn assign_fk(dependent: &PropertyDescriptor, value: &Value, policy: NullFkPolicy) -> Result<Value, Error> {
    if !value.is_null() || dependent.nullable {
        return Ok(value.clone());
    }
    match policy {
        NullFkPolicy::Reject => Err(Error::binding(
            dependent.name.as_str(),
            "principal value is null but the foreign key is not nullable",
        )),
        NullFkPolicy::ZeroValue => Value::zero(dependent.kind).ok_or_else(|| {
            Error::binding(dependent.name.as_str(), format!("{} has no zero value", dependent.kind))
        }),
    }
}

/// Foreign-key values that point `nav` at `target_row`.
///
/// # Errors
/// See [`assign_fk`]; also `Error::Internal` when a constraint names an unknown property.
pub fn constraint_values(
    owner: &EntityDescriptor,
    nav: &NavigationDescriptor,
    target_row: Option<&Row>,
    policy: NullFkPolicy,
) -> Result<Row, Error> {
    let mut out = Row::new();
    for (dependent, principal) in &nav.referential_constraints {
        let dep = owner
            .property(dependent)
            .ok_or_else(|| Error::internal(format!("unknown dependent property '{dependent}'")))?;
        let value = target_row.map_or(&Value::Null, |row| row.get_or_null(principal));
        out.set(dep.name.clone(), assign_fk(dep, value, policy)?);
    }
    Ok(out)
}

/// Foreign-key values that unlink a single-valued `nav`. Non-nullable
/// dependents take their zero value whatever the null-FK policy says.
///
/// # Errors
/// `Error::InvalidBinding` for a non-nullable dependent without a zero value,
/// `Error::Internal` when a constraint names an unknown property.
pub fn unlink_values(owner: &EntityDescriptor, nav: &NavigationDescriptor) -> Result<Row, Error> {
    let mut out = Row::new();
    for dependent in nav.referential_constraints.keys() {
        let dep = owner
            .property(dependent)
            .ok_or_else(|| Error::internal(format!("unknown dependent property '{dependent}'")))?;
        let value = dep
            .unlinked_value()
            .ok_or_else(|| Error::binding(dep.name.as_str(), format!("{} has no zero value", dep.kind)))?;
        out.set(dep.name.clone(), value);
    }
    Ok(out)
}

pub struct BindingResolver<'a> {
    registry: &'a Registry,
    policy: NullFkPolicy,
}

impl<'a> BindingResolver<'a> {
    #[must_use]
    pub fn new(registry: &'a Registry, policy: NullFkPolicy) -> Self {
        Self { registry, policy }
    }

    /// Resolve every `(navigation, value)` bind of a payload.
    ///
    /// # Errors
    /// `Error::InvalidBinding`/`InvalidReference`/`InvalidKey` for malformed
    /// binds, `Error::NotFound` for a missing target.
    pub async fn resolve(
        &self,
        tx: &mut dyn StoreTx,
        entity: &EntityDescriptor,
        binds: &[(String, Json)],
    ) -> Result<ResolvedBindings, Error> {
        let mut out = ResolvedBindings::default();
        for (name, value) in binds {
            let (prop, nav) = entity
                .navigation(name)
                .ok_or_else(|| Error::binding(annotation(name), "not a navigation property"))?;
            let target = self.target(prop, nav)?;

            if nav.is_array {
                let targets = self.resolve_collection(tx, prop, target, value).await?;
                debug!(navigation = %prop.name, targets = targets.len(), "collection bind resolved");
                out.pending.push(PendingCollectionBinding {
                    navigation: prop.name.clone(),
                    targets,
                });
                continue;
            }

            let raw = value
                .as_str()
                .ok_or_else(|| Error::binding(annotation(&prop.name), "expected a reference string"))?;
            let (key, row) = self.fetch_reference(tx, prop, target, raw).await?;
            if nav.has_constraints() {
                let fk = constraint_values(entity, nav, Some(&row), self.policy)?;
                debug!(navigation = %prop.name, "foreign key bind resolved");
                out.assignments.merge(&fk);
            } else {
                out.pending.push(PendingCollectionBinding {
                    navigation: prop.name.clone(),
                    targets: vec![(key, row)],
                });
            }
        }
        Ok(out)
    }

    async fn resolve_collection(
        &self,
        tx: &mut dyn StoreTx,
        prop: &PropertyDescriptor,
        target: &EntityDescriptor,
        value: &Json,
    ) -> Result<Vec<(KeyValues, Row)>, Error> {
        let bind = annotation(&prop.name);
        let items = value
            .as_array()
            .ok_or_else(|| Error::binding(bind.as_str(), "expected an array of reference strings"))?;

        let mut refs: Vec<(&str, EntityRef)> = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let raw = item
                .as_str()
                .ok_or_else(|| Error::binding(bind.as_str(), format!("element {i} is not a string")))?;
            let reference = parse_reference(raw)?;
            if let Some((_, first)) = refs.first()
                && first.entity_set != reference.entity_set
            {
                return Err(Error::binding(
                    bind.as_str(),
                    format!(
                        "element {i} references '{}', expected '{}' like every other element",
                        reference.entity_set, first.entity_set
                    ),
                ));
            }
            refs.push((raw, reference));
        }

        let mut targets = Vec::with_capacity(refs.len());
        for (raw, _) in refs {
            targets.push(self.fetch_reference(tx, prop, target, raw).await?);
        }
        Ok(targets)
    }

    /// Parse `raw`, check it addresses `target` and load the row.
    async fn fetch_reference(
        &self,
        tx: &mut dyn StoreTx,
        prop: &PropertyDescriptor,
        target: &EntityDescriptor,
        raw: &str,
    ) -> Result<(KeyValues, Row), Error> {
        let reference = parse_reference(raw)?;
        let set = self.registry.entity_set(&reference.entity_set).ok_or_else(|| {
            Error::binding(
                annotation(&prop.name),
                format!("unknown entity set '{}'", reference.entity_set),
            )
        })?;
        if set.entity_name != target.entity_name {
            return Err(Error::binding(
                annotation(&prop.name),
                format!(
                    "'{}' holds {} entities, expected {}",
                    reference.entity_set, set.entity_name, target.entity_name
                ),
            ));
        }
        let key = KeyValues::parse(target, &reference.key)?;
        let row = tx
            .find(&FindQuery::by_key(target, &key))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found(reference.to_string()))?;
        Ok((key, row))
    }

    /// Apply deferred bindings to the persisted owner, replacing membership.
    ///
    /// # Errors
    /// Store failures, e.g. `NotFound` if a target vanished meanwhile.
    pub async fn apply(
        &self,
        tx: &mut dyn StoreTx,
        owner: &EntityDescriptor,
        owner_key: &KeyValues,
        pending: &[PendingCollectionBinding],
    ) -> Result<(), Error> {
        for binding in pending {
            let (prop, nav) = owner
                .navigation(&binding.navigation)
                .ok_or_else(|| Error::internal(format!("unknown navigation '{}'", binding.navigation)))?;
            let target = self.target(prop, nav)?;
            let association = Association::new(owner, prop, target)
                .ok_or_else(|| Error::internal(format!("'{}' is not a navigation", prop.name)))?;
            tx.replace_associations(&association, owner_key, &binding.target_keys())
                .await?;
            debug!(
                navigation = %prop.name,
                targets = binding.targets.len(),
                "deferred binding applied"
            );
        }
        Ok(())
    }

    fn target(&self, prop: &PropertyDescriptor, nav: &NavigationDescriptor) -> Result<&'a EntityDescriptor, Error> {
        self.registry
            .entity(&nav.target)
            .map(AsRef::as_ref)
            .ok_or_else(|| Error::internal(format!("navigation '{}' targets unknown '{}'", prop.name, nav.target)))
    }
}

fn annotation(navigation: &str) -> String {
    format!("{navigation}@{BIND_ANNOTATION}")
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use odata_model::PropertyKind;

    #[test]
    fn nullable_dependent_takes_null() {
        let dep = PropertyDescriptor::scalar("CustomerID", PropertyKind::Int);
        assert_eq!(assign_fk(&dep, &Value::Null, NullFkPolicy::Reject).unwrap(), Value::Null);
        assert_eq!(assign_fk(&dep, &Value::Int(5), NullFkPolicy::Reject).unwrap(), Value::Int(5));
    }

    #[test]
    fn non_nullable_dependent_follows_policy() {
        let dep = PropertyDescriptor::scalar("CustomerID", PropertyKind::Int).not_null();
        assert!(matches!(
            assign_fk(&dep, &Value::Null, NullFkPolicy::Reject),
            Err(Error::InvalidBinding { .. })
        ));
        assert_eq!(
            assign_fk(&dep, &Value::Null, NullFkPolicy::ZeroValue).unwrap(),
            Value::Int(0)
        );
        let blob = PropertyDescriptor::scalar("Blob", PropertyKind::Complex).not_null();
        assert!(assign_fk(&blob, &Value::Null, NullFkPolicy::ZeroValue).is_err());
    }

    #[test]
    fn unlinking_ignores_the_null_policy() {
        let owner = EntityDescriptor::new("Shipment", "Shipments")
            .with_property(PropertyDescriptor::scalar("ID", PropertyKind::Int).key())
            .with_property(PropertyDescriptor::scalar("WarehouseID", PropertyKind::Int).not_null())
            .with_property(PropertyDescriptor::scalar("CarrierID", PropertyKind::String));
        let nav = NavigationDescriptor::single("Warehouse")
            .with_constraint("WarehouseID", "ID")
            .with_constraint("CarrierID", "Code");
        let row = unlink_values(&owner, &nav).unwrap();
        assert_eq!(row.get("WarehouseID"), Some(&Value::Int(0)));
        assert_eq!(row.get("CarrierID"), Some(&Value::Null));

        let opaque = EntityDescriptor::new("Shipment", "Shipments")
            .with_property(PropertyDescriptor::scalar("WarehouseID", PropertyKind::Complex).not_null());
        let nav = NavigationDescriptor::single("Warehouse").with_constraint("WarehouseID", "ID");
        assert!(matches!(unlink_values(&opaque, &nav), Err(Error::InvalidBinding { .. })));
    }

    #[test]
    fn wire_assignments_use_wire_names() {
        let d = EntityDescriptor::new("Order", "Orders")
            .with_property(PropertyDescriptor::scalar("ID", PropertyKind::Int).key())
            .with_property(PropertyDescriptor::scalar("CustomerID", PropertyKind::Int).wire("customerId"));
        let resolved = ResolvedBindings {
            assignments: Row::new().with("CustomerID", 5_i64),
            pending: Vec::new(),
        };
        let wire = resolved.wire_assignments(&d);
        assert_eq!(wire.get("customerId"), Some(&Json::from(5)));
        assert!(!resolved.is_empty());
    }
}
