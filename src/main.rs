//! Worksite - dashboard statistics from the command line
//!
//! Reads the entity collections from the worksite API through the sync engine
//! and prints dashboard statistics once or whenever they change.

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use worksite_sync::backend::StaticSession;
use worksite_sync::cache::CacheKey;
use worksite_sync::stats::{DashboardStats, ProjectReport, StatsFilter, TimeWindow};
use worksite_sync::sync::{PollOptions, AGGREGATE_SOURCES};
use worksite_sync::{Config, SyncEngine};

#[derive(Parser)]
#[command(name = "worksite")]
#[command(about = "Worksite dashboard statistics")]
struct Cli {
    /// YAML config file (defaults to ./worksite.yaml)
    #[arg(long, env = "WORKSITE_CONFIG")]
    config: Option<PathBuf>,

    /// Backend API URL (overrides config)
    #[arg(long)]
    api_url: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print dashboard statistics once
    Stats {
        /// month, quarter, half_year, year or all_time
        #[arg(short, long, default_value = "all_time")]
        window: TimeWindow,

        /// Restrict to one project
        #[arg(short, long)]
        project: Option<String>,

        /// Print JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Print the report of one project
    Report {
        project: String,

        #[arg(short, long, default_value = "all_time")]
        window: TimeWindow,

        #[arg(long)]
        json: bool,
    },

    /// Poll the API and print statistics whenever they change
    Watch {
        /// Poll interval in milliseconds (defaults to the configured one)
        #[arg(long)]
        interval_ms: Option<u64>,

        #[arg(short, long, default_value = "all_time")]
        window: TimeWindow,

        #[arg(short, long)]
        project: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Initialize tracing (stderr, stdout is for output)
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,worksite_sync=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    if cli.log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    // Load configuration
    let mut config = Config::from_yaml_and_env(cli.config.as_deref())?;
    if let Some(url) = cli.api_url {
        config.api_base_url = url;
    }

    let engine = SyncEngine::new(config, Arc::new(StaticSession::from_env()))?;

    match cli.command {
        Commands::Stats {
            window,
            project,
            json,
        } => {
            let filter = filter_for(window, project);
            let stats = engine
                .stats(&filter, Local::now().date_naive())
                .await
                .context("failed to load dashboard data")?;
            print_stats(&stats, json)
        }
        Commands::Report {
            project,
            window,
            json,
        } => {
            let report = engine
                .project_report(&project, window, Local::now().date_naive())
                .await
                .context("failed to load project data")?
                .with_context(|| format!("project '{project}' not found"))?;
            print_report(&report, json)
        }
        Commands::Watch {
            interval_ms,
            window,
            project,
        } => {
            let interval = interval_ms
                .map(Duration::from_millis)
                .unwrap_or(engine.config().poll_interval);
            run_watch(&engine, interval, filter_for(window, project)).await
        }
    }
}

fn filter_for(window: TimeWindow, project: Option<String>) -> StatsFilter {
    let filter = StatsFilter::window(window);
    match project {
        Some(id) => filter.for_project(id),
        None => filter,
    }
}

async fn run_watch(engine: &SyncEngine, interval: Duration, filter: StatsFilter) -> Result<()> {
    tracing::info!(
        interval_ms = interval.as_millis() as u64,
        window = %filter.window,
        "Watching dashboard sources"
    );

    let options = PollOptions {
        interval: Some(interval),
        ..engine.scheduler.default_poll_options()
    };
    let mut changes = engine.store.subscribe();
    let _handles: Vec<_> = AGGREGATE_SOURCES
        .iter()
        .map(|kind| {
            engine
                .scheduler
                .watch(CacheKey::Collection(*kind), options)
        })
        .collect();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut last: Option<DashboardStats> = None;

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Shutting down");
                break;
            }
            change = changes.recv() => {
                match change {
                    Ok(change) if change.key.is_derived() => continue,
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                }
                let stats = worksite_sync::stats::dashboard_stats(
                    &engine.store.dashboard_snapshot(),
                    &filter,
                    Local::now().date_naive(),
                );
                if last.as_ref() != Some(&stats) {
                    print_stats(&stats, false)?;
                    last = Some(stats);
                }
            }
        }
    }
    Ok(())
}

fn print_stats(stats: &DashboardStats, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(stats)?);
        return Ok(());
    }

    let scope = stats.project_id.as_deref().unwrap_or("all projects");
    println!("Dashboard ({}, {})", stats.window, scope);
    println!(
        "  Projects:   {} total, {} in progress, {} completed ({:.1}% done)",
        stats.projects.total,
        stats.projects.in_progress,
        stats.projects.completed,
        stats.projects.completion_rate()
    );
    println!(
        "  Budget:     {} spent of {} ({:.1}%), {} remaining",
        stats.total_spending, stats.total_budget, stats.utilization_percent, stats.remaining
    );
    println!(
        "  Sections:   {} total, {} completed, {:.1}% average progress",
        stats.sections.total, stats.sections.completed, stats.sections.average_progress
    );
    println!(
        "  Inventory:  {} items, {} low, {} out of stock, value {}",
        stats.inventory.total_items,
        stats.inventory.low_stock,
        stats.inventory.out_of_stock,
        stats.inventory.total_value
    );
    println!(
        "  Employees:  {} total, {} active",
        stats.employees.total, stats.employees.active
    );
    Ok(())
}

fn print_report(report: &ProjectReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("{} ({:?}, {})", report.name, report.status, report.window);
    println!(
        "  Budget:    {} spent of {} ({:.1}%), {} remaining",
        report.spent, report.budget, report.utilization_percent, report.remaining
    );
    println!("  Progress:  {:.1}% average", report.average_progress);
    for section in &report.sections {
        println!(
            "    - {:<24} {:>3}%  {} employees",
            section.name, section.progress, section.employee_count
        );
    }
    println!(
        "  Inventory: value {}, {} items low or out of stock",
        report.inventory_value, report.low_stock_items
    );
    Ok(())
}
