//! `keystone critical-path` command implementation.

use std::process::ExitCode;

use colored::Colorize;
use keystone::{ImpactAnalyzer, Result};

use super::{Context, display_name};

/// Run the critical-path command.
pub fn run(ctx: &Context) -> Result<ExitCode> {
    let store = ctx.open_store()?;
    let view = ctx.load_view(&store)?;
    let analyzer = ImpactAnalyzer::new(&view, ctx.config().risk);

    let Some(path) = analyzer.find_critical_path() else {
        if view.is_acyclic() {
            println!("{}", "No dependency chains in the graph.".dimmed());
        } else {
            println!(
                "{}: the graph has cycles; run `keystone cycles`",
                "No critical path".yellow().bold()
            );
        }
        return Ok(ExitCode::SUCCESS);
    };

    println!(
        "{} ({} entities, {} edges):",
        "Critical path".cyan().bold(),
        path.len(),
        path.edge_count()
    );
    for (i, id) in path.chain.iter().enumerate() {
        let name = display_name(&view, id);
        if *id == path.bottleneck {
            println!("  {:>3}. {} {}", i + 1, name.bold(), "(bottleneck)".yellow());
        } else {
            println!("  {:>3}. {name}", i + 1);
        }
    }

    Ok(ExitCode::SUCCESS)
}
