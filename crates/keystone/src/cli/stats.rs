//! `keystone stats` command implementation.

use std::process::ExitCode;

use colored::Colorize;
use keystone::Result;

use super::Context;
use super::display::format_size;

/// Run the stats command.
pub fn run(ctx: &Context) -> Result<ExitCode> {
    let store = ctx.open_store()?;
    let stats = store.stats()?;

    println!("{}", "Keystone Store Statistics".cyan().bold());
    println!();

    println!(
        "  {}: {} ({})",
        "Database".white().bold(),
        ctx.db_path().display(),
        format_size(stats.storage_bytes)
    );
    println!(
        "  {}: {}, {}: {}",
        "Indexes".white().bold(),
        stats.index_count,
        "Tags".white().bold(),
        stats.tag_count
    );
    println!();

    println!(
        "  {}: {} total",
        "Entities".white().bold(),
        stats.entity_count.to_string().green()
    );
    // Sort by count descending, then by name for deterministic output
    let mut domains: Vec<_> = stats.entities_by_domain.iter().collect();
    domains.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    for (domain, count) in domains {
        println!("    {}: {}", domain.dimmed(), count);
    }
    println!(
        "    {}: {} resolved, {} unresolved, {} conflict",
        "status".dimmed(),
        stats.resolved,
        stats.unresolved,
        stats.conflict
    );
    println!();

    println!(
        "  {}: {} total",
        "Relations".white().bold(),
        stats.relation_count.to_string().green()
    );
    let mut types: Vec<_> = stats.relations_by_type.iter().collect();
    types.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    for (relation_type, count) in types {
        println!("    {}: {}", relation_type.as_str().dimmed(), count);
    }

    Ok(ExitCode::SUCCESS)
}
