//! Service configuration.
//!
//! Loaded through `figment`; the application decides which providers
//! (defaults, YAML file, environment) feed it.

use figment::Figment;
use odata_model::{EntityDescriptor, ODataLimits, Registry, RegistryBuilder, RegistryError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_SERVICE_ROOT: &str = "/odata";

/// What to write into a non-nullable foreign key when the principal value is null.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullFkPolicy {
    /// Fail the binding.
    #[default]
    Reject,
    /// Write the zero value of the dependent's kind.
    ZeroValue,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    /// Base of next links, delta links and entity locations.
    pub service_root: String,
    pub limits: ODataLimits,
    /// Page size applied when a request carries no `$top`.
    pub default_page_size: Option<u64>,
    pub null_fk_policy: NullFkPolicy,
    pub model: Vec<EntityDescriptor>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service_root: DEFAULT_SERVICE_ROOT.to_owned(),
            limits: ODataLimits::default(),
            default_page_size: None,
            null_fk_policy: NullFkPolicy::default(),
            model: Vec::new(),
        }
    }
}

impl ServiceConfig {
    /// Extract and validate the configuration held by `figment`.
    ///
    /// # Errors
    /// `ConfigError::Invalid` when extraction fails or values are out of range.
    pub fn from_figment(figment: &Figment) -> Result<Self, ConfigError> {
        let mut config: Self = figment
            .extract()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        config.service_root = config.service_root.trim_end_matches('/').to_owned();
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// `ConfigError::Invalid` for a zero or oversized page size or non-positive limits.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.limits.max_top <= 0 {
            return Err(ConfigError::Invalid("limits.max_top must be positive".into()));
        }
        if let Some(size) = self.default_page_size {
            let max = self.limits.max_top.unsigned_abs();
            if size == 0 || size > max {
                return Err(ConfigError::Invalid(format!(
                    "default_page_size must be between 1 and {max}"
                )));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn with_service_root(mut self, root: impl Into<String>) -> Self {
        self.service_root = root.into().trim_end_matches('/').to_owned();
        self
    }

    #[must_use]
    pub fn with_default_page_size(mut self, size: u64) -> Self {
        self.default_page_size = Some(size);
        self
    }

    #[must_use]
    pub fn with_null_fk_policy(mut self, policy: NullFkPolicy) -> Self {
        self.null_fk_policy = policy;
        self
    }

    #[must_use]
    pub fn with_limits(mut self, limits: ODataLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Builder preloaded with the configured model, for attaching hooks.
    #[must_use]
    pub fn registry_builder(&self) -> RegistryBuilder {
        Registry::builder().entities(self.model.iter().cloned())
    }

    /// # Errors
    /// `ConfigError::Registry` when the model does not validate.
    pub fn build_registry(&self) -> Result<Registry, ConfigError> {
        Ok(self.registry_builder().build()?)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use figment::providers::Serialized;
    use serde_json::json;

    #[test]
    fn defaults_fill_missing_fields() {
        let figment = Figment::new().merge(Serialized::defaults(json!({
            "service_root": "https://example.com/svc/",
            "null_fk_policy": "zero_value",
        })));
        let config = ServiceConfig::from_figment(&figment).unwrap();
        assert_eq!(config.service_root, "https://example.com/svc");
        assert_eq!(config.null_fk_policy, NullFkPolicy::ZeroValue);
        assert_eq!(config.limits.max_top, 1000);
        assert!(config.default_page_size.is_none());
    }

    #[test]
    fn unknown_fields_and_bad_page_size_are_rejected() {
        let figment = Figment::new().merge(Serialized::defaults(json!({ "nope": 1 })));
        assert!(matches!(
            ServiceConfig::from_figment(&figment),
            Err(ConfigError::Invalid(_))
        ));

        let figment = Figment::new().merge(Serialized::defaults(json!({
            "default_page_size": 5000,
        })));
        assert!(ServiceConfig::from_figment(&figment).is_err());
    }

    #[test]
    fn model_section_builds_registry() {
        let figment = Figment::new().merge(Serialized::defaults(json!({
            "model": [{
                "entity_name": "Product",
                "entity_set": "Products",
                "properties": [
                    { "name": "ID", "kind": "int", "key": true },
                    { "name": "Name", "kind": "string", "searchable": true },
                ],
            }],
        })));
        let config = ServiceConfig::from_figment(&figment).unwrap();
        let registry = config.build_registry().unwrap();
        let products = registry.entity_set("Products").unwrap();
        assert_eq!(products.key_names(), vec!["ID"]);
        assert_eq!(products.property("Name").unwrap().wire_name, "Name");
    }
}
