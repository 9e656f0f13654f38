// ABOUTME: CLI entry point for analytics-replicator
// ABOUTME: Runs one sync pass, watches for changes, or compares counts

use analytics_replicator::config::SyncConfig;
use analytics_replicator::source::{DocumentSource, MongoChangeFeed, MongoSource};
use analytics_replicator::sync::{
    ChangeWatcher, LiveConnector, PassOutcome, PassReport, SyncOrchestrator, WatcherState,
};
use analytics_replicator::target::{PgTarget, RelationalTarget};
use analytics_replicator::verify;
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "analytics-replicator")]
#[command(about = "Keep PostgreSQL analytics tables in step with MongoDB", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to a TOML config file (environment variables override it)
    #[arg(long, env = "ANALYTICS_REPLICATOR_CONFIG", global = true)]
    config: Option<PathBuf>,
    /// Allow self-signed TLS certificates on the target (insecure - use only for testing)
    #[arg(
        long = "allow-self-signed-certs",
        global = true,
        default_value_t = false
    )]
    allow_self_signed_certs: bool,
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replicate the source into the analytics tables
    ///
    /// Without --once, runs a pass on every relevant change until Ctrl+C.
    Sync {
        /// Run exactly one full-refresh pass and exit
        #[arg(long)]
        once: bool,
    },
    /// Compare source document counts with target row counts
    Verify,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 1. RUST_LOG environment variable has highest precedence
    // 2. --log flag is used if RUST_LOG is not set
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log.clone()));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let mut config = SyncConfig::load(cli.config.as_deref()).context("Invalid configuration")?;
    if cli.allow_self_signed_certs {
        config.target.accept_invalid_certs = true;
        config.validate().context("Invalid configuration")?;
    }

    match cli.command {
        Commands::Sync { once: true } => sync_once(&config).await,
        Commands::Sync { once: false } => watch(&config).await,
        Commands::Verify => verify_counts(&config).await,
    }
}

fn orchestrator(config: &SyncConfig) -> Arc<SyncOrchestrator> {
    Arc::new(SyncOrchestrator::new(
        Arc::new(LiveConnector::new(config)),
        config.retry.policy(),
    ))
}

async fn sync_once(config: &SyncConfig) -> anyhow::Result<()> {
    let report = orchestrator(config).run_once().await;
    print_report(&report);

    if let PassOutcome::Failed { error } = &report.outcome {
        anyhow::bail!("Sync pass failed: {}", error);
    }
    Ok(())
}

async fn watch(config: &SyncConfig) -> anyhow::Result<()> {
    let watcher = ChangeWatcher::new(
        orchestrator(config),
        Arc::new(MongoChangeFeed::new(config.source.clone())),
        config.watcher.stop_timeout(),
    );

    if !watcher.start().await {
        anyhow::bail!("Could not start the change watcher");
    }

    println!();
    println!("========================================");
    println!("Watching for changes");
    println!("========================================");
    println!("  Source database: {}", config.source.database);
    println!("  Target: {}", config.target.display_target());
    println!("  Press Ctrl+C to stop");
    println!();

    let mut state = watcher.subscribe_state();
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl+C")?;
            tracing::info!("Received shutdown signal");
        }
        _ = state.wait_for(|s| *s == WatcherState::Stopped) => {
            tracing::warn!("Change watcher stopped on its own");
        }
    }

    watcher.stop().await;

    let status = watcher.status();
    println!(
        "Watcher stopped after {} notifications and {} passes",
        status.notifications_seen, status.passes_triggered
    );
    Ok(())
}

async fn verify_counts(config: &SyncConfig) -> anyhow::Result<()> {
    let source = MongoSource::connect(&config.source).await?;
    let mut target = PgTarget::connect(&config.target).await?;

    let comparisons = verify::compare_counts(
        &source as &dyn DocumentSource,
        &mut target as &mut dyn RelationalTarget,
    )
    .await?;

    println!("{:<22} {:>10} {:>10}  status", "entity", "source", "target");
    let mut drifted = 0;
    for c in &comparisons {
        let status = if c.is_in_sync() {
            "ok".to_string()
        } else {
            drifted += 1;
            format!("drift {:+}", c.difference())
        };
        println!(
            "{:<22} {:>10} {:>10}  {}",
            c.kind.table(),
            c.source_documents,
            c.target_rows,
            status
        );
    }

    if drifted > 0 {
        println!();
        println!("{} entity types differ between source and target", drifted);
    }
    Ok(())
}

fn print_report(report: &PassReport) {
    println!();
    match &report.outcome {
        PassOutcome::Completed => println!("✓ Sync pass completed"),
        PassOutcome::Cancelled => println!("Sync pass cancelled"),
        PassOutcome::Failed { error } => println!("✗ Sync pass failed: {}", error),
    }
    println!("  Attempts: {}", report.attempts);
    println!("  Duration: {}ms", report.duration_ms);

    for entity in &report.entities {
        println!(
            "  {:<22} read {:>6}  inserted {:>6}  updated {:>6}  failed {:>4}",
            entity.kind.table(),
            entity.read,
            entity.inserted,
            entity.updated,
            entity.failed.len()
        );
        for warning in &entity.schema_warnings {
            println!("    schema warning: {}", warning);
        }
        if entity.skipped + entity.rejected > 0 {
            println!(
                "    {} documents could not be decoded, {} had no id",
                entity.skipped, entity.rejected
            );
        }
    }
}
