use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Args;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use odata_exec::ServiceConfig;
use tracing::debug;

pub const ENV_PREFIX: &str = "ODATA_";

#[derive(Args)]
pub struct CommonArgs {
    #[arg(short = 'c', long, default_value = "./odata.yaml")]
    pub config: PathBuf,
}

impl CommonArgs {
    pub fn load(&self) -> anyhow::Result<ServiceConfig> {
        load_config(&self.config)
    }
}

/// Defaults, then the YAML file at `path`, then `ODATA_*` variables (`__` nests).
#[must_use]
pub fn figment(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(ServiceConfig::default()))
        .merge(Yaml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

pub fn load_config(path: &Path) -> anyhow::Result<ServiceConfig> {
    if !path.exists() {
        anyhow::bail!("configuration file {} does not exist", path.display());
    }
    let config = ServiceConfig::from_figment(&figment(path))
        .with_context(|| format!("loading {}", path.display()))?;
    debug!(
        path = %path.display(),
        entity_sets = config.model.len(),
        service_root = %config.service_root,
        "configuration loaded"
    );
    Ok(config)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
pub mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    pub const MODEL: &str = r"
service_root: https://example.com/svc/
default_page_size: 50
model:
  - entity_name: Customer
    entity_set: Customers
    properties:
      - { name: ID, kind: int, key: true }
      - { name: Name, kind: string, searchable: true }
  - entity_name: Order
    entity_set: Orders
    etag_property: Version
    properties:
      - { name: ID, kind: int, key: true, generated: true }
      - { name: CustomerID, kind: int }
      - { name: Version, kind: int }
      - name: Customer
        kind: navigation
        navigation:
          target: Customer
          referential_constraints: { CustomerID: ID }
";

    pub fn config_file(contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn yaml_file_overrides_defaults() {
        let file = config_file(MODEL);
        let config = super::load_config(file.path()).unwrap();
        assert_eq!(config.service_root, "https://example.com/svc");
        assert_eq!(config.default_page_size, Some(50));
        assert_eq!(config.limits.max_top, 1000);
        assert_eq!(config.model.len(), 2);
    }

    #[test]
    fn missing_file_is_reported() {
        let err = super::load_config(std::path::Path::new("./does-not-exist.yaml")).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn unknown_keys_fail() {
        let file = config_file("page_size: 10\n");
        assert!(super::load_config(file.path()).is_err());
    }
}
