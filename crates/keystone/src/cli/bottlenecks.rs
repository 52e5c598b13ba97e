//! `keystone bottlenecks` command implementation.

use std::process::ExitCode;

use colored::Colorize;
use keystone::{ImpactAnalyzer, Result};

use super::{Context, display_name};

/// Run the bottlenecks command.
pub fn run(ctx: &Context, min_dependents: usize) -> Result<ExitCode> {
    let store = ctx.open_store()?;
    let view = ctx.load_view(&store)?;
    let analyzer = ImpactAnalyzer::new(&view, ctx.config().risk);

    let bottlenecks = analyzer.find_bottlenecks(min_dependents);

    if bottlenecks.is_empty() {
        println!(
            "{}",
            format!("No entities with {min_dependents} or more direct dependents.").green()
        );
        return Ok(ExitCode::SUCCESS);
    }

    println!(
        "{} entities with at least {} direct dependents:",
        bottlenecks.len().to_string().yellow().bold(),
        min_dependents
    );
    for bottleneck in &bottlenecks {
        println!(
            "  {:>6}  {}",
            bottleneck.dependents.to_string().yellow(),
            display_name(&view, &bottleneck.id)
        );
    }

    Ok(ExitCode::SUCCESS)
}
