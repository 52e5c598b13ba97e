//! `keystone import` command implementation.

use std::path::Path;
use std::process::ExitCode;

use colored::Colorize;
use keystone::{GraphData, Result};

use super::Context;

/// Run the import command.
pub fn run(ctx: &Context, file: &Path) -> Result<ExitCode> {
    let content = std::fs::read_to_string(file)?;
    let data: GraphData = serde_json::from_str(&content)?;

    let store = ctx.open_store()?;
    let outcome = store.import(&data)?;

    println!(
        "Imported {} of {} records ({} entities, {} relations)",
        outcome.succeeded.to_string().green(),
        outcome.total(),
        outcome.entities_written,
        outcome.relations_written
    );

    if outcome.failures.is_empty() {
        return Ok(ExitCode::SUCCESS);
    }

    println!();
    println!(
        "  {} ({}):",
        "Failures".yellow().bold(),
        outcome.failures.len()
    );
    for failure in &outcome.failures {
        println!(
            "    {} #{} [{}] {}",
            "•".dimmed(),
            failure.index,
            failure.kind,
            failure.message
        );
    }
    Ok(ExitCode::FAILURE)
}
