//! `keystone optimize`, `backup` and `restore` command implementations.

use std::path::Path;
use std::process::ExitCode;

use colored::Colorize;
use keystone::Result;

use super::Context;
use super::display::format_size;

/// Run the optimize command.
pub fn optimize(ctx: &Context) -> Result<ExitCode> {
    let store = ctx.open_store()?;
    let before = store.stats()?.storage_bytes;
    store.optimize()?;
    let after = store.stats()?.storage_bytes;

    println!(
        "{} {} → {}",
        "Optimized".green(),
        format_size(before),
        format_size(after)
    );
    Ok(ExitCode::SUCCESS)
}

/// Run the backup command.
pub fn backup(ctx: &Context, dest: &Path) -> Result<ExitCode> {
    let store = ctx.open_store()?;
    store.backup(dest)?;

    println!("{} {}", "Backed up to".green(), dest.display());
    Ok(ExitCode::SUCCESS)
}

/// Run the restore command.
pub fn restore(ctx: &Context, src: &Path) -> Result<ExitCode> {
    let store = ctx.open_store()?;
    store.restore(src)?;

    let stats = store.stats()?;
    println!(
        "{} {} ({} entities, {} relations)",
        "Restored from".green(),
        src.display(),
        stats.entity_count,
        stats.relation_count
    );
    Ok(ExitCode::SUCCESS)
}
