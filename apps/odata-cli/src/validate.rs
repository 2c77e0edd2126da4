use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use odata_model::{EntityDescriptor, Registry};
use tracing::info;

use crate::common::load_config;

/// Check a configuration file's model and list its entity sets.
#[derive(Args)]
pub struct ValidateArgs {
    model: PathBuf,
}

impl ValidateArgs {
    pub fn run(&self) -> anyhow::Result<()> {
        let config = load_config(&self.model)?;
        let registry = config
            .build_registry()
            .with_context(|| format!("invalid model in {}", self.model.display()))?;
        info!(entity_sets = registry.len(), "model is valid");
        println!("{}", summary(&registry));
        Ok(())
    }
}

fn summary(registry: &Registry) -> String {
    registry
        .entity_sets()
        .into_iter()
        .map(|entity| describe(entity))
        .collect::<Vec<_>>()
        .join("\n")
}

fn describe(entity: &EntityDescriptor) -> String {
    let navigations: Vec<String> = entity
        .navigation_properties()
        .filter_map(|p| {
            let nav = p.navigation.as_ref()?;
            let shape = if nav.is_array { "*" } else { "1" };
            Some(format!("{}->{}[{shape}]", p.name, nav.target))
        })
        .collect();
    let mut line = format!(
        "{} ({}) key={} properties={}",
        entity.entity_set,
        entity.entity_name,
        entity.key_names().join(","),
        entity.scalar_properties().count(),
    );
    if !navigations.is_empty() {
        line = format!("{line} navigations={}", navigations.join(","));
    }
    if let Some(etag) = &entity.etag_property {
        line = format!("{line} etag={etag}");
    }
    line
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::common::tests::{MODEL, config_file};

    #[test]
    fn summary_lists_sets_in_name_order() {
        let file = config_file(MODEL);
        let registry = load_config(file.path()).unwrap().build_registry().unwrap();
        assert_eq!(
            summary(&registry),
            "Customers (Customer) key=ID properties=2\n\
             Orders (Order) key=ID properties=3 navigations=Customer->Customer[1] etag=Version"
        );
    }

    #[test]
    fn dangling_navigation_target_fails() {
        let file = config_file(
            r"
model:
  - entity_name: Order
    entity_set: Orders
    properties:
      - { name: ID, kind: int, key: true }
      - { name: Lines, kind: navigation, navigation: { target: Line, is_array: true } }
",
        );
        let args = ValidateArgs {
            model: file.path().to_path_buf(),
        };
        let err = args.run().unwrap_err();
        assert!(err.to_string().contains("invalid model"));
    }
}
