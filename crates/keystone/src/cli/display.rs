//! Common display utilities for CLI commands.

use colored::Colorize;
use keystone::{EntityId, GraphView};

use super::display_name;

const MAX_DISPLAY_ITEMS: usize = 20;

/// Display entities as a bullet list with optional truncation.
///
/// Shows up to `MAX_DISPLAY_ITEMS` entries. If there are more, shows
/// "... and N more". If empty, shows the provided `empty_message`.
pub fn print_entities<'a>(
    view: &GraphView,
    ids: impl ExactSizeIterator<Item = &'a EntityId>,
    empty_message: &str,
) {
    let total = ids.len();
    if total == 0 {
        println!("    {}", empty_message.dimmed());
        return;
    }

    for id in ids.take(MAX_DISPLAY_ITEMS) {
        println!("    {} {}", "•".dimmed(), display_name(view, id));
    }

    if total > MAX_DISPLAY_ITEMS {
        println!(
            "    {} ... and {} more",
            "•".dimmed(),
            total - MAX_DISPLAY_ITEMS
        );
    }
}

/// Join entity names with arrows: `a → b → c`.
pub fn arrow_chain(view: &GraphView, ids: &[EntityId]) -> String {
    ids.iter()
        .map(|id| display_name(view, id))
        .collect::<Vec<_>>()
        .join(" → ")
}

#[allow(clippy::cast_precision_loss)]
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
