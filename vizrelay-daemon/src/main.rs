//! vizrelay - WebSocket relay for music visualizer frames
//!
//! One music bot streams FFT frames in; every connected browser visualizer
//! gets them out. Bot and viewers share one endpoint and are told apart by
//! their `User-Agent`.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use vizrelay_broadcaster::{server, RelayHub};
use vizrelay_daemon::cli::Cli;
use vizrelay_daemon::config::RelayConfig;

/// How long open connections get to finish closing on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_level(true)
        .init();

    std::panic::set_hook(Box::new(|panic| {
        error!("💥 Panic: {}", panic);
    }));

    let cli = Cli::parse();

    info!("🎵 Starting vizrelay v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config = RelayConfig::load(cli.config.as_deref())
        .context("Failed to load configuration")?;
    config.apply_overrides(&cli);
    config.validate().context("Invalid configuration")?;

    if cli.write_default_config {
        config.save().context("Failed to write configuration")?;
        info!("📝 Configuration written to {}", config.config_path.display());
        return Ok(());
    }

    if config.config_path.exists() {
        info!("📋 Configuration loaded from {}", config.config_path.display());
    } else {
        info!("📋 No config file at {}, using defaults", config.config_path.display());
    }

    let addr = config.socket_addr()?;
    let hub = Arc::new(RelayHub::new(config.to_hub_config()));

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("🚀 Audio streaming relay ready on port {}", addr.port());
    info!("  - Max viewers: {}", config.max_viewers);
    info!("  - Heartbeat: every {}s", config.heartbeat_interval_secs);
    info!("  - Stats: every {}s", config.stats_interval_secs);
    info!("  - Bot markers: {}", config.bot_markers.join(", "));

    let heartbeat = hub.spawn_heartbeat();
    let reporter = hub.spawn_stats_reporter();

    let shutdown_hub = Arc::clone(&hub);
    let result = server::serve(listener, Arc::clone(&hub), async move {
        shutdown_signal().await;
        info!("🧹 Shutting down...");
        let closing = shutdown_hub.shutdown();
        info!("Closing {} connection(s)", closing);
    })
    .await;

    heartbeat.abort();
    reporter.abort();

    if !hub.wait_closed(SHUTDOWN_GRACE).await {
        warn!(
            "⚠️ {} connection(s) still open after {:?}, exiting anyway",
            hub.open_connections(),
            SHUTDOWN_GRACE
        );
    }

    info!("👋 vizrelay stopped");
    result.context("HTTP server error")
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("🛑 Received Ctrl+C"),
        _ = terminate => info!("🛑 Received SIGTERM"),
    }
}
