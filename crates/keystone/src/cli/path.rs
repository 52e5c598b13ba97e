//! `keystone path` command implementation.

use std::process::ExitCode;

use colored::Colorize;
use keystone::{PathLimits, Result};

use super::display::arrow_chain;
use super::{Context, resolve_entity};

/// Run the path command.
pub fn run(
    ctx: &Context,
    from: &str,
    to: &str,
    all: bool,
    limit: Option<usize>,
) -> Result<ExitCode> {
    let store = ctx.open_store()?;
    let from_id = resolve_entity(&store, from)?;
    let to_id = resolve_entity(&store, to)?;
    let view = ctx.load_view(&store)?;

    if !all {
        return match view.find_path(&from_id, &to_id)? {
            Some(path) => {
                println!(
                    "Shortest path from {} to {} ({} hops):",
                    from.cyan().bold(),
                    to.cyan().bold(),
                    path.len() - 1
                );
                println!("    {}", arrow_chain(&view, &path));
                Ok(ExitCode::SUCCESS)
            }
            None => {
                println!("{} does not reach {}.", from.cyan(), to.cyan());
                Ok(ExitCode::FAILURE)
            }
        };
    }

    let limits = PathLimits {
        max_paths: limit.unwrap_or(ctx.config().paths.max_paths),
        ..ctx.config().paths
    };
    limits.validate()?;
    let paths = view.find_all_paths(&from_id, &to_id, &limits)?;

    if paths.is_empty() {
        println!("{} does not reach {}.", from.cyan(), to.cyan());
        return Ok(ExitCode::FAILURE);
    }

    println!(
        "Found {} paths from {} to {}:",
        paths.len().to_string().green(),
        from.cyan().bold(),
        to.cyan().bold()
    );
    for (i, path) in paths.iter().enumerate() {
        println!("  {:>3}. {}", i + 1, arrow_chain(&view, path));
    }
    if paths.len() == limits.max_paths {
        println!(
            "  {}",
            format!("(stopped at {} paths, raise --limit for more)", limits.max_paths).dimmed()
        );
    }

    Ok(ExitCode::SUCCESS)
}
