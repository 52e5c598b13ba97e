//! `keystone cycles` command implementation.

use std::process::ExitCode;

use colored::Colorize;
use keystone::Result;

use super::Context;
use super::display::arrow_chain;

/// Run the cycles command.
pub fn run(ctx: &Context) -> Result<ExitCode> {
    let store = ctx.open_store()?;
    let view = ctx.load_view(&store)?;

    let cycles = view.find_circular_dependencies();

    if cycles.is_empty() {
        println!("{}", "No circular dependencies detected.".green());
        return Ok(ExitCode::SUCCESS);
    }

    println!(
        "Found {} circular dependency groups:",
        cycles.len().to_string().red().bold()
    );
    println!();

    for (i, group) in cycles.iter().enumerate() {
        println!(
            "  {} {} ({} entities):",
            "Group".yellow().bold(),
            i + 1,
            group.len()
        );
        println!("    {}", arrow_chain(&view, group).dimmed());
    }

    Ok(ExitCode::SUCCESS)
}
