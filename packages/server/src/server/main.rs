// Main entry point for the catalog re-verification service.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shelfwatch_core::domains::catalog::PostgresCatalog;
use shelfwatch_core::domains::notify::LogNotifier;
use shelfwatch_core::domains::platforms::config::PlatformCatalog;
use shelfwatch_core::domains::platforms::fetch::LiveFetcher;
use shelfwatch_core::domains::scheduler::watcher::{set_watcher_enabled, Watcher};
use shelfwatch_core::domains::scheduler::{self, PlatformScheduler};
use shelfwatch_core::domains::validation::build_node_registry;
use shelfwatch_core::domains::worker::WorkerFleet;
use shelfwatch_core::kernel::browser::{BrowserPool, BrowserPoolConfig};
use shelfwatch_core::kernel::jobs::{QueueStore, RedisQueueStore};
use shelfwatch_core::kernel::workflow::{WorkflowEngine, WorkflowLoader};
use shelfwatch_core::kernel::ServerDeps;
use shelfwatch_core::server::build_app;
use shelfwatch_core::Config;

#[derive(Parser, Debug)]
#[command(name = "shelfwatch-server", about = "Catalog re-verification service")]
struct Args {
    /// Start with the scheduler and watcher disabled.
    #[arg(long)]
    paused: bool,
    /// Override the HTTP port from the environment.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,shelfwatch_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    tracing::info!("Starting catalog re-verification service");

    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!("Configuration loaded");

    // Source of record
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Database connected, migrations complete");

    // Queue store
    let queue: Arc<dyn QueueStore> = Arc::new(
        RedisQueueStore::connect(&config.redis_url)
            .await
            .context("Failed to connect to queue store")?,
    );
    tracing::info!("Queue store connected");

    // Platform configuration and workflow definitions
    let platforms = Arc::new(
        PlatformCatalog::load(Path::new(&config.platforms_file))
            .await
            .context("Failed to load platform configuration")?,
    );
    let workflows = Arc::new(WorkflowLoader::new(&config.workflows_dir));

    // Shared browser pool, lazily launched inside the fetch stage
    let browser = Arc::new(BrowserPool::new(BrowserPoolConfig::default()));
    let fetcher = Arc::new(LiveFetcher::new(browser.clone()));

    let deps = Arc::new(ServerDeps::new(
        queue.clone(),
        Arc::new(PostgresCatalog::new(pool)),
        platforms.clone(),
        workflows,
        fetcher,
        Arc::new(LogNotifier),
        PathBuf::from(&config.audit_output_root),
    ));

    let registry = Arc::new(build_node_registry());
    let engine = Arc::new(WorkflowEngine::new(registry, deps.clone()));

    if !args.paused {
        scheduler::set_enabled(queue.as_ref(), true)
            .await
            .context("Failed to enable scheduler")?;
        set_watcher_enabled(queue.as_ref(), true)
            .await
            .context("Failed to enable watcher")?;
    }

    // Long-running tasks: scheduler, watcher, one worker per platform
    let platform_scheduler = PlatformScheduler::new(queue.clone(), platforms.clone());
    let scheduler_shutdown = platform_scheduler.shutdown_handle();
    tokio::spawn(platform_scheduler.run());

    let watcher = Watcher::new(queue.clone(), platforms.clone());
    let watcher_shutdown = watcher.shutdown_handle();
    tokio::spawn(watcher.run());

    let worker_shutdown = Arc::new(AtomicBool::new(false));
    let workers = WorkerFleet::spawn(engine, deps.clone(), worker_shutdown.clone());
    tracing::info!(workers = workers.len(), "worker fleet started");

    // Control surface
    let app = build_app(deps);
    let port = args.port.unwrap_or(config.port);
    let addr = format!("0.0.0.0:{port}");
    tracing::info!("Starting control surface on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Shutting down");
    scheduler_shutdown.store(true, Ordering::SeqCst);
    watcher_shutdown.store(true, Ordering::SeqCst);
    worker_shutdown.store(true, Ordering::SeqCst);
    browser.cleanup().await;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
