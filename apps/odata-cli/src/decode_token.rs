use std::collections::BTreeMap;

use anyhow::Context;
use clap::Args;
use odata_model::{OrderBy, Registry, SkipToken, Value, effective_order};
use serde_json::{Map, Value as Json, json};

use crate::common::CommonArgs;

/// Decode a `$skiptoken` issued for an entity set and sort order.
#[derive(Args)]
pub struct DecodeTokenArgs {
    token: String,
    #[arg(short = 'e', long)]
    entity_set: String,
    /// The `$orderby` of the request that produced the token.
    #[arg(short = 'o', long)]
    orderby: Option<String>,
    #[command(flatten)]
    common_args: CommonArgs,
}

impl DecodeTokenArgs {
    pub fn run(&self) -> anyhow::Result<()> {
        let registry = self.common_args.load()?.build_registry()?;
        let decoded = decode(&registry, &self.entity_set, self.orderby.as_deref(), &self.token)?;
        println!("{}", serde_json::to_string_pretty(&decoded)?);
        Ok(())
    }
}

fn decode(registry: &Registry, entity_set: &str, orderby: Option<&str>, token: &str) -> anyhow::Result<Json> {
    let entity = registry
        .entity_set(entity_set)
        .with_context(|| format!("unknown entity set '{entity_set}'"))?;
    let requested = match orderby {
        Some(raw) => OrderBy::parse(raw)?,
        None => OrderBy::empty(),
    };
    let order = effective_order(entity, &requested)?;
    let cursor = SkipToken::decode(entity, &order, token)?;

    let to_map = |values: &BTreeMap<String, Value>| {
        values
            .iter()
            .map(|(name, v)| (name.clone(), v.to_json()))
            .collect::<Map<_, _>>()
    };
    Ok(json!({
        "entity_set": entity.entity_set,
        "order": order.to_query_value(),
        "key": to_map(&cursor.key_values),
        "order_values": to_map(&cursor.order_by_values),
    }))
}
