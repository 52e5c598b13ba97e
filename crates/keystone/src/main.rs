//! Keystone CLI - dependency graph queries from the command line.
//!
//! Imports and exports graph data, and answers structural and change-impact
//! questions about the graph stored in `.keystone/graph.db`.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use colored::Colorize;
use keystone::config::{DEFAULT_CONFIG_PATH, DEFAULT_DB_PATH};
use tracing_subscriber::EnvFilter;

mod cli;

/// Keystone: dependency graph store with change-impact analysis.
#[derive(Parser)]
#[command(name = "keystone")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the graph database
    #[arg(long, global = true, default_value = DEFAULT_DB_PATH)]
    db: PathBuf,

    /// Path to the configuration file (used when present)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Verbose output (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import entities and relations from a JSON file
    Import {
        /// JSON file holding `{ "entities": [...], "relations": [...] }`
        file: PathBuf,
    },

    /// Export entities and the relations among them as JSON
    Export {
        /// Entity to include (id or domain:identifier[@version]); all when omitted
        #[arg(short, long = "entity")]
        entities: Vec<String>,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Detect circular dependencies
    Cycles,

    /// Print a dependency-first order, or the cycle preventing one
    Order,

    /// Find the path between two entities
    Path {
        /// Starting entity (id or domain:identifier[@version])
        from: String,

        /// Destination entity (id or domain:identifier[@version])
        to: String,

        /// List every simple path instead of the shortest one
        #[arg(short, long)]
        all: bool,

        /// Maximum number of paths with --all (defaults to the configured limit)
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Analyze the impact of changing an entity
    Impact {
        /// Entity to analyze (id or domain:identifier[@version])
        entity: String,

        /// Only list affected entities up to this many hops away
        #[arg(short, long)]
        depth: Option<usize>,
    },

    /// Show the longest dependency chain and its bottleneck
    CriticalPath,

    /// Rank entities by number of direct dependents
    Bottlenecks {
        /// Minimum number of direct dependents
        #[arg(short, long, default_value = "10")]
        min: usize,
    },

    /// Show store statistics
    Stats,

    /// Validate store integrity (exits non-zero on errors)
    Check,

    /// Analyze, optimize and vacuum the database
    Optimize,

    /// Copy the database to a file
    Backup {
        /// Destination file
        dest: PathBuf,
    },

    /// Replace the database with a backup
    Restore {
        /// Backup file
        src: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let ctx = match cli::Context::new(cli.db, &cli.config) {
        Ok(ctx) => ctx,
        Err(e) => return report(&e),
    };

    let result = match cli.command {
        Commands::Import { file } => cli::import::run(&ctx, &file),
        Commands::Export { entities, output } => {
            cli::export::run(&ctx, &entities, output.as_deref())
        }
        Commands::Cycles => cli::cycles::run(&ctx),
        Commands::Order => cli::order::run(&ctx),
        Commands::Path {
            from,
            to,
            all,
            limit,
        } => cli::path::run(&ctx, &from, &to, all, limit),
        Commands::Impact { entity, depth } => cli::impact::run(&ctx, &entity, depth),
        Commands::CriticalPath => cli::critical_path::run(&ctx),
        Commands::Bottlenecks { min } => cli::bottlenecks::run(&ctx, min),
        Commands::Stats => cli::stats::run(&ctx),
        Commands::Check => cli::check::run(&ctx),
        Commands::Optimize => cli::maintenance::optimize(&ctx),
        Commands::Backup { dest } => cli::maintenance::backup(&ctx, &dest),
        Commands::Restore { src } => cli::maintenance::restore(&ctx, &src),
    };

    match result {
        Ok(code) => code,
        Err(e) => report(&e),
    }
}

fn report(e: &keystone::Error) -> ExitCode {
    eprintln!("{}: {e}", "error".red().bold());
    // Show cause chain for nested errors
    let mut source = std::error::Error::source(e);
    while let Some(cause) = source {
        eprintln!("  {}: {cause}", "caused by".dimmed());
        source = std::error::Error::source(cause);
    }
    ExitCode::FAILURE
}
