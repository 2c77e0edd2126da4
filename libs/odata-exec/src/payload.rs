//! Request payload validation.

use odata_model::{EntityDescriptor, Error, Row, Value};
use serde_json::Value as Json;

pub const BIND_ANNOTATION: &str = "odata.bind";

/// A validated create/update body.
#[derive(Clone, Debug, Default)]
pub struct Payload {
    /// Scalar values by property name.
    pub values: Row,
    /// `(navigation property name, raw annotation value)` in body order.
    pub binds: Vec<(String, Json)>,
}

/// Split `body` into typed property values and `@odata.bind` annotations.
///
/// Instance annotations (`@odata.type`, ...) and annotations on known
/// properties are ignored. Unknown property names and inline navigation
/// content are rejected.
///
/// # Errors
/// `Error::Validation` for a non-object body, unknown names, inline
/// navigation content or values that do not fit their property;
/// `Error::InvalidBinding` for a bind on a non-navigation property.
pub fn parse_payload(entity: &EntityDescriptor, body: &Json) -> Result<Payload, Error> {
    let object = body
        .as_object()
        .ok_or_else(|| Error::validation("payload must be a JSON object"))?;

    let mut payload = Payload::default();
    for (name, json) in object {
        if name.starts_with('@') {
            continue;
        }

        if let Some((target, annotation)) = name.split_once('@') {
            let Some(prop) = entity.property(target) else {
                return Err(Error::validation(format!("unknown property '{target}'")));
            };
            if annotation != BIND_ANNOTATION {
                continue;
            }
            if !prop.is_navigation() {
                return Err(Error::binding(name.as_str(), "not a navigation property"));
            }
            if payload.binds.iter().any(|(n, _)| n == &prop.name) {
                return Err(Error::binding(name.as_str(), "navigation bound twice"));
            }
            payload.binds.push((prop.name.clone(), json.clone()));
            continue;
        }

        let prop = entity
            .property(name)
            .ok_or_else(|| Error::validation(format!("unknown property '{name}'")))?;
        if prop.is_navigation() {
            return Err(Error::validation(format!(
                "inline content for navigation '{name}' is not supported, use '{name}@{BIND_ANNOTATION}'"
            )));
        }
        let value = Value::from_json(prop.kind, json)
            .map_err(|e| Error::validation(format!("property '{name}': {e}")))?;
        payload.values.set(prop.name.clone(), value);
    }
    Ok(payload)
}
