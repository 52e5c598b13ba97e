//! `keystone check` command implementation.

use std::process::ExitCode;

use colored::Colorize;
use keystone::{IntegrityFix, IntegrityIssue, Result};

use super::Context;

/// Run the check command. Exits non-zero when hard errors are found.
pub fn run(ctx: &Context) -> Result<ExitCode> {
    let store = ctx.open_store()?;
    let report = store.validate_integrity()?;

    if report.errors.is_empty() && report.warnings.is_empty() {
        println!("{}", "No integrity issues found.".green());
        return Ok(ExitCode::SUCCESS);
    }

    if !report.errors.is_empty() {
        println!(
            "  {} ({}):",
            "Errors".red().bold(),
            report.errors.len()
        );
        for issue in &report.errors {
            print_issue(issue);
        }
        println!();
    }

    if !report.warnings.is_empty() {
        println!(
            "  {} ({}):",
            "Warnings".yellow().bold(),
            report.warnings.len()
        );
        for issue in &report.warnings {
            print_issue(issue);
        }
    }

    if report.is_healthy() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

fn print_issue(issue: &IntegrityIssue) {
    println!("    {} {} {}", "•".dimmed(), issue.subject.dimmed(), issue.message);
    match &issue.fix {
        Some(IntegrityFix::Sql(sql)) => println!("      {} {sql}", "fix:".cyan()),
        Some(IntegrityFix::RebuildAdjacency) => {
            println!("      {} rebuild cached adjacency", "fix:".cyan());
        }
        None => {}
    }
}
