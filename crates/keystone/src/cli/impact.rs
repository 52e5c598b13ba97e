//! `keystone impact` command implementation.

use std::process::ExitCode;

use colored::Colorize;
use keystone::{ChangeImpact, GraphView, ImpactAnalyzer, Result, Severity};

use super::display::{arrow_chain, print_entities};
use super::{Context, display_name, resolve_entity};

/// Run the impact command.
pub fn run(ctx: &Context, reference: &str, depth: Option<usize>) -> Result<ExitCode> {
    let store = ctx.open_store()?;
    let id = resolve_entity(&store, reference)?;
    let view = ctx.load_view(&store)?;

    let analyzer = ImpactAnalyzer::new(&view, ctx.config().risk);
    let impact = analyzer.analyze_change_impact(&id)?;

    println!(
        "Impact analysis for {}:",
        display_name(&view, &id).cyan().bold()
    );
    print_summary(&impact);
    print_affected(&view, &impact, depth)?;
    print_cycles(&view, &impact);
    print_recommendations(&impact);

    Ok(ExitCode::SUCCESS)
}

fn print_summary(impact: &ChangeImpact) {
    let metrics = &impact.metrics;
    println!();
    println!(
        "  {}: {:.2} ({})",
        "Risk score".white().bold(),
        impact.risk_score,
        if impact.is_safe_to_change() {
            "safe to change".green()
        } else {
            "needs care".red()
        }
    );
    println!(
        "  {}: {} ({} affected)",
        "Severity".white().bold(),
        severity_label(metrics.severity),
        metrics.blast_radius()
    );
    println!(
        "  {}: {} direct, {} transitive",
        "Dependents".white().bold(),
        metrics.direct_dependents,
        metrics.transitive_dependents
    );
    println!(
        "  {}: {} direct, {} transitive",
        "Dependencies".white().bold(),
        metrics.direct_dependencies,
        metrics.transitive_dependencies
    );
    println!(
        "  {}: deployment {}, dependency {}",
        "Depth".white().bold(),
        metrics.deployment_depth,
        metrics.dependency_depth
    );

    let breakdown = &impact.breakdown;
    println!(
        "    {}",
        format!(
            "blast radius {:.2} + circular {:.2} + critical path {:.2} + hub {:.2}",
            breakdown.blast_radius, breakdown.circular, breakdown.critical_path, breakdown.hub
        )
        .dimmed()
    );
    if impact.requires_coordination() {
        println!("  {}", "Requires coordination".yellow().bold());
    }
}

fn print_affected(view: &GraphView, impact: &ChangeImpact, depth: Option<usize>) -> Result<()> {
    println!();
    match depth {
        Some(depth) => {
            let near = view.transitive_dependents(&impact.entity, Some(depth))?;
            println!(
                "  {} (within {} hops, {} of {}):",
                "Affected".white().bold(),
                depth,
                near.len().to_string().yellow(),
                impact.affected.len()
            );
            print_entities(view, near.iter().map(|r| &r.id), "(none)");
        }
        None => {
            println!(
                "  {} ({}):",
                "Affected".white().bold(),
                impact.affected.len().to_string().yellow()
            );
            print_entities(view, impact.affected.iter(), "(none)");
        }
    }
    Ok(())
}

fn print_cycles(view: &GraphView, impact: &ChangeImpact) {
    if impact.circular_groups.is_empty() {
        return;
    }
    println!();
    println!("  {}:", "Circular dependencies".red().bold());
    for group in &impact.circular_groups {
        println!("    {}", arrow_chain(view, group).dimmed());
    }
}

fn print_recommendations(impact: &ChangeImpact) {
    if impact.recommendations.is_empty() {
        return;
    }
    println!();
    println!("  {}:", "Recommendations".white().bold());
    for rec in &impact.recommendations {
        println!("    {} {rec}", "•".dimmed());
    }
}

fn severity_label(severity: Severity) -> colored::ColoredString {
    let label = severity.as_str().to_uppercase();
    match severity {
        Severity::Minimal | Severity::Low => label.green(),
        Severity::Medium => label.yellow(),
        Severity::High | Severity::Critical => label.red().bold(),
    }
}
