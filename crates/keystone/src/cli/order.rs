//! `keystone order` command implementation.

use std::process::ExitCode;

use colored::Colorize;
use keystone::{Error, Result};

use super::display::arrow_chain;
use super::{Context, display_name};

/// Run the order command.
pub fn run(ctx: &Context) -> Result<ExitCode> {
    let store = ctx.open_store()?;
    let view = ctx.load_view(&store)?;

    match view.topological_sort() {
        Ok(order) => {
            println!(
                "{} ({} entities, dependencies first):",
                "Build order".cyan().bold(),
                order.len()
            );
            for (i, id) in order.iter().enumerate() {
                println!("  {:>4}. {}", i + 1, display_name(&view, id));
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(Error::CycleDetected { cycle }) => {
            println!(
                "{}: no valid order, these entities depend on each other:",
                "Cycle".red().bold()
            );
            println!("    {}", arrow_chain(&view, &cycle).dimmed());
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e),
    }
}
