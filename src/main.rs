//! Scene Sync - scene controller indicator synchronization
//!
//! Runs the sync engine against an in-memory host seeded from the
//! configuration's `simulation` section, with an interactive shell on top.

use anyhow::Result;
use clap::Parser;
use colored::*;
use scene_sync::cli::Repl;
use scene_sync::config::{AppConfig, ConfigWatcher};
use scene_sync::engine::SyncEngine;
use scene_sync::registry::InMemoryRegistry;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Scene Sync - keep scene controller LEDs, buttons and loads consistent
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "scene-sync.yaml")]
    config: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Also write logs to daily rotated files in this directory
    #[arg(long, env = "LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Validate the configuration file and exit
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Keep the guard alive so buffered file logs are flushed on exit
    let log_guard = init_logging(&args.log_level, args.log_dir.as_deref())?;

    info!("Starting Scene Sync...");
    info!("Configuration file: {}", args.config);

    if args.check_config {
        return check_config(&args.config).await;
    }

    let (mut config_watcher, initial_config) = ConfigWatcher::new(args.config.clone()).await?;
    info!("Configuration loaded successfully with hot-reload enabled");

    let registry = Arc::new(InMemoryRegistry::new(
        "simulator",
        initial_config.host.id_scheme(),
    ));
    match &initial_config.simulation {
        Some(simulation) => registry.seed(&initial_config.controller, simulation),
        None => warn!("No simulation section; starting with an empty registry"),
    }

    let engine = SyncEngine::spawn((*initial_config).clone(), registry.clone());
    engine.start().await?;

    let repl = Repl::new(
        registry.clone(),
        engine.clone(),
        tokio::runtime::Handle::current(),
    );
    let mut repl_task = tokio::task::spawn_blocking(move || repl.run());

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut repl_task => {
                match result {
                    Ok(Ok(())) => info!("Shell closed"),
                    Ok(Err(e)) => warn!("Shell failed: {:#}", e),
                    Err(e) => warn!("Shell task panicked: {}", e),
                }
                break;
            }

            Some(new_config) = config_watcher.next_config() => {
                info!("📝 Configuration file changed, reloading...");
                engine.update_config(new_config);
            }

            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping");
                break;
            }
        }
    }

    info!("Shutting down...");
    let released = engine.stop().await?;
    info!("Scene Sync shutdown complete ({} subscriptions released)", released);

    // The shell thread may still be blocked on stdin. Exiting skips
    // destructors, so flush the file log first
    if !repl_task.is_finished() {
        drop(log_guard);
        std::process::exit(0);
    }

    Ok(())
}

fn init_logging(level: &str, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, "scene-sync.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .with(file_layer)
        .init();

    Ok(guard)
}

async fn check_config(path: &str) -> Result<()> {
    let config = AppConfig::load(path).await?;

    println!("\n{}", "=== Configuration OK ===".bold().green());
    println!(
        "  Controller: {} / {}",
        config.controller.vendor.cyan(),
        config.controller.device_type.cyan()
    );
    println!(
        "  Devices:    {}_{}_... (gateway node {})",
        config.host.family.yellow(),
        config.host.controller_name.yellow(),
        config.host.gateway_node_id
    );
    println!("  Refresh:    {} ms", config.sync.refresh_delay_ms);
    println!(
        "  Simulation: {} nodes",
        config
            .simulation
            .as_ref()
            .map(|s| s.nodes.len())
            .unwrap_or(0)
    );

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for CTRL+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
