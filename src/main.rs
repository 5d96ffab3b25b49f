//! policy-atlas main entry point
//!
//! This is the command-line interface for the policy-atlas crawler.

use anyhow::Context;
use clap::{Parser, Subcommand};
use policy_atlas::config::{load_config_with_hash, Config};
use policy_atlas::crawler::{CrawlMode, Orchestrator};
use policy_atlas::output::{load_statistics, print_crawl_stats, print_statistics, print_task_status};
use policy_atlas::schedule::run_schedule;
use policy_atlas::storage::open_catalog;
use policy_atlas::tasks::TaskStatus;
use policy_atlas::CatalogStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// policy-atlas: a catalog of AI-assistant policy files on GitHub
///
/// Finds repositories containing files such as CLAUDE.md or .cursorrules,
/// stores their content in SQLite, and keeps it current with cheap
/// incremental runs.
#[derive(Parser, Debug)]
#[command(name = "policy-atlas")]
#[command(version)]
#[command(about = "Incremental crawler for AI-assistant policy files", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one crawl and print its counters
    Run {
        /// Passes to perform: discover, update, or both
        #[arg(long, default_value = "both")]
        mode: CrawlMode,
    },

    /// Run update and discovery periodically until interrupted
    Schedule,

    /// Show the state of a recorded run
    Status {
        #[arg(value_name = "RUN_ID")]
        run_id: i64,
    },

    /// Show statistics from the catalog
    Stats,

    /// Validate config and show what would be searched
    DryRun,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::debug!("Configuration hash: {}", config_hash);

    match cli.command {
        Command::Run { mode } => handle_run(&config, &config_hash, mode).await,
        Command::Schedule => handle_schedule(&config, &config_hash).await,
        Command::Status { run_id } => handle_status(&config, run_id),
        Command::Stats => handle_stats(&config),
        Command::DryRun => {
            handle_dry_run(&config);
            Ok(())
        }
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("policy_atlas=info,warn"),
            1 => EnvFilter::new("policy_atlas=debug,info"),
            2 => EnvFilter::new("policy_atlas=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Runs one tracked crawl; an aborted run exits non-zero
async fn handle_run(config: &Config, config_hash: &str, mode: CrawlMode) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::from_config(config)?;
    let run_id = orchestrator.queue_run(mode, config_hash)?;

    match orchestrator.run_tracked(run_id, mode).await {
        Ok(stats) => {
            println!("Run #{} ({}) completed", run_id, mode);
            print_crawl_stats(&stats);
            Ok(())
        }
        Err(aborted) => {
            println!("Run #{} ({}) failed", run_id, mode);
            print_crawl_stats(&aborted.stats);
            Err(aborted.into())
        }
    }
}

async fn handle_schedule(config: &Config, config_hash: &str) -> anyhow::Result<()> {
    let orchestrator = Arc::new(Orchestrator::from_config(config)?);
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
        }
    };

    run_schedule(orchestrator, &config.schedule, config_hash, shutdown).await?;
    Ok(())
}

fn handle_status(config: &Config, run_id: i64) -> anyhow::Result<()> {
    let catalog = open_catalog(Path::new(&config.storage.database_path))?;
    let run = catalog.get_run(run_id)?;
    print_task_status(&TaskStatus::from(run))?;
    Ok(())
}

fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.storage.database_path);

    let catalog = open_catalog(Path::new(&config.storage.database_path))?;
    let stats = load_statistics(&catalog)?;
    print_statistics(&stats);

    Ok(())
}

/// Validates config and shows what would be searched
fn handle_dry_run(config: &Config) {
    println!("=== policy-atlas Dry Run ===\n");

    println!("GitHub API:");
    println!("  URL: {}", config.github.api_url);
    println!("  Token variable: {}", config.github.token_env);
    let token_state = if std::env::var(&config.github.token_env).is_ok() {
        "set"
    } else {
        "NOT SET"
    };
    println!("  Token: {}", token_state);
    println!("  Results per page: {}", config.github.per_page);

    println!("\nCrawl:");
    println!("  Star threshold: {}", config.crawl.star_threshold);
    println!("  Max fetches per run: {}", config.crawl.max_hits_per_run);
    match config.crawl.max_run_seconds {
        Some(secs) => println!("  Max run time: {}s", secs),
        None => println!("  Max run time: unlimited"),
    }
    println!("  Update interval: {}h", config.crawl.update_interval_hours);
    println!("  Skip unpushed repositories: {}", config.crawl.skip_unpushed);

    println!("\nSchedule:");
    println!("  Update every: {}s", config.schedule.update_every_secs);
    println!("  Discover every: {}s", config.schedule.discover_every_secs);

    println!("\nStorage:");
    println!("  Database: {}", config.storage.database_path);

    println!("\nSearch queries ({}):", config.crawl.patterns.len());
    for pattern in &config.crawl.patterns {
        println!("  - filename:{}", pattern.trim().trim_start_matches('*'));
    }

    println!("\n✓ Configuration is valid");
}
