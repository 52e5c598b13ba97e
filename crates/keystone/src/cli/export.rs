//! `keystone export` command implementation.

use std::path::Path;
use std::process::ExitCode;

use keystone::{EntityId, Result};

use super::{Context, resolve_entity};

/// Run the export command.
pub fn run(ctx: &Context, references: &[String], output: Option<&Path>) -> Result<ExitCode> {
    let store = ctx.open_store()?;

    let ids = references
        .iter()
        .map(|reference| resolve_entity(&store, reference))
        .collect::<Result<Vec<EntityId>>>()?;
    let selection = (!ids.is_empty()).then_some(ids.as_slice());

    let data = store.export(selection)?;
    let json = serde_json::to_string_pretty(&data)?;

    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, json)?;
            eprintln!(
                "Exported {} entities and {} relations to {}",
                data.entities.len(),
                data.relations.len(),
                path.display()
            );
        }
        None => println!("{json}"),
    }

    Ok(ExitCode::SUCCESS)
}
