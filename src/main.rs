//! shutter-sync: interactive shell around the write-coalescing sync queue
//!
//! Reads interaction commands from stdin (one per line) and feeds them to
//! the queue, which writes to the persistence API after each quiet period.
//! Ctrl-C, SIGTERM or end of input unloads the queue: whatever is still
//! pending goes out as fire-and-forget beacons, and writes already in
//! flight get up to the unload grace period to land before the process exits.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::io::BufReader;
use tokio::time::Instant;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use shutter_sync::backend::{BeaconTransport, HttpBackend, HttpBeacon, MemoryBackend, SyncBackend};
use shutter_sync::shell;
use shutter_sync::{SyncConfig, SyncQueue};

#[derive(Parser)]
#[command(name = "shutter-sync")]
#[command(about = "Debounced write-coalescing sync queue for photo community interactions")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "shutter-sync.toml")]
    config: PathBuf,

    /// Persistence API base URL (overrides config file)
    #[arg(long, env = "SHUTTER_SYNC_BASE_URL")]
    base_url: Option<String>,

    /// Quiet period before a flush, in milliseconds (overrides config file)
    #[arg(long, env = "SHUTTER_SYNC_QUIET_PERIOD_MS")]
    quiet_period_ms: Option<u64>,

    /// Write attempts per flush cycle (overrides config file)
    #[arg(long, env = "SHUTTER_SYNC_MAX_ATTEMPTS")]
    max_attempts: Option<u32>,

    /// Record writes in memory instead of calling the API
    #[arg(long)]
    dry_run: bool,

    /// Emit logs as JSON
    #[arg(long, env = "SHUTTER_SYNC_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("shutter_sync=info"));
    if cli.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("Starting shutter-sync");
    info!("Config file: {}", cli.config.display());

    let mut config = SyncConfig::load(&cli.config)?;

    // Apply CLI overrides
    if let Some(base_url) = cli.base_url {
        config.backend.base_url = base_url;
    }
    if let Some(quiet_period_ms) = cli.quiet_period_ms {
        config.queue.quiet_period_ms = quiet_period_ms;
    }
    if let Some(max_attempts) = cli.max_attempts {
        config.retry.max_attempts = max_attempts;
    }

    info!("Backend: {}", config.backend.base_url);
    info!("Quiet period: {}ms", config.queue.quiet_period_ms);

    let memory = cli.dry_run.then(|| Arc::new(MemoryBackend::new()));
    let (backend, beacon): (Arc<dyn SyncBackend>, Arc<dyn BeaconTransport>) = match &memory {
        Some(memory) => {
            info!("Dry run: writes are recorded in memory");
            (memory.clone(), memory.clone())
        }
        None => (
            Arc::new(HttpBackend::new(&config.backend)?),
            Arc::new(HttpBeacon::new(&config.backend)?),
        ),
    };

    let queue = SyncQueue::spawn(&config, beacon);
    queue.initialize_sync_handlers(backend);

    let exit = shell::run(
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        &queue,
        shutdown_signal(),
    )
    .await?;
    info!(?exit, "Shell stopped");

    let report = queue.unload().await?;
    info!(
        entries = report.entries,
        beacons_sent = report.beacons_sent,
        in_flight = report.in_flight,
        "Queue unloaded"
    );

    // One grace period covers both the writes still in flight and the
    // detached beacon requests.
    let grace = Duration::from_millis(config.shutdown.unload_grace_ms);
    let grace_ends = Instant::now() + grace;
    if report.in_flight > 0 {
        queue.drain(grace).await;
    }
    if report.beacons_sent > 0 {
        tokio::time::sleep_until(grace_ends).await;
    }

    if let Some(memory) = memory {
        info!(
            likes = memory.likes().len(),
            notification_batches = memory.notification_batches().len(),
            beacons = memory.beacons().len(),
            "Dry run totals"
        );
    }

    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
