use clap::Args;
use odata_model::parse_reference;
use odata_model::reference::{CompositeKeyError, parse_composite_key};

/// Split an entity reference such as `Orders(ID=1,Line=2)` into its parts.
#[derive(Args)]
pub struct ParseRefArgs {
    reference: String,
}

impl ParseRefArgs {
    pub fn run(&self) -> anyhow::Result<()> {
        println!("{}", render(&self.reference)?);
        Ok(())
    }
}

fn render(reference: &str) -> anyhow::Result<String> {
    let parsed = parse_reference(reference)?;
    let mut lines = vec![format!("entity_set: {}", parsed.entity_set)];
    match parse_composite_key(&parsed.key) {
        Ok(pairs) => lines.extend(pairs.into_iter().map(|(name, value)| format!("key {name}: {value}"))),
        Err(CompositeKeyError::NotComposite) => lines.push(format!("key: {}", parsed.key)),
        Err(err) => return Err(err.into()),
    }
    Ok(lines.join("\n"))
}
