//! Klaxon Alert Player (klaxon-ap) - Main entry point
//!
//! Loads configuration, starts the alert engine and its playback consumer,
//! then takes snapshots from the HTTP API and/or standard input until
//! interrupted.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use klaxon_common::config::{resolve_config_path, KlaxonConfig};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use klaxon_ap::api::{self, AppState};
use klaxon_ap::audio::{AudioOutput, CommandOutput, LogOutput};
use klaxon_ap::{ingest, AlertEngine, SharedState};

/// Command-line arguments for klaxon-ap
#[derive(Parser, Debug)]
#[command(name = "klaxon-ap")]
#[command(about = "Audible alerting for monitored signals")]
#[command(version)]
struct Args {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP port (overrides config)
    #[arg(short, long, env = "KLAXON_PORT")]
    port: Option<u16>,

    /// Read newline-delimited JSON snapshots from standard input
    #[arg(long)]
    stdin: bool,

    /// Log sounds instead of playing them
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref())?;
    let config = KlaxonConfig::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    // RUST_LOG wins over the configured level
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting klaxon-ap {}", env!("CARGO_PKG_VERSION"));
    info!("Config: {}", config_path.display());
    info!(
        monitors = config.monitors.len(),
        sounds = config.sounds.len(),
        pools = config.pools.len(),
        chains = config.chains.len(),
        "Configuration loaded"
    );

    let output: Arc<dyn AudioOutput> = if args.dry_run {
        info!("Dry run: sounds will be logged, not played");
        Arc::new(LogOutput)
    } else {
        Arc::new(CommandOutput::new(
            &config.player,
            config.dispatcher.play_timeout(),
        ))
    };

    let state = Arc::new(SharedState::new());
    let engine = Arc::new(AlertEngine::new(&config, output, state));
    let dispatcher_task = engine.start();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Periodic idle eviction
    let eviction_task = engine.idle_eviction().map(|max_idle| {
        let engine = Arc::clone(&engine);
        let mut shutdown = shutdown_rx.clone();
        let period = (max_idle / 4).max(std::time::Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        engine.evict_idle();
                    }
                    _ = shutdown.wait_for(|stop| *stop) => break,
                }
            }
        })
    });

    let server_task = if config.server.enabled {
        let port = args.port.unwrap_or(config.server.port);
        let addr: SocketAddr = format!("{}:{}", config.server.bind, port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", config.server.bind, port))?;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind to {}", addr))?;

        let app_state = AppState {
            engine: Arc::clone(&engine),
            port,
        };
        let mut shutdown = shutdown_rx.clone();
        Some(tokio::spawn(api::serve(listener, app_state, async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })))
    } else {
        info!("HTTP API disabled");
        None
    };

    if args.stdin {
        tokio::select! {
            result = ingest::ingest_stdin(&engine) => {
                result.context("Failed reading snapshots from stdin")?;
                if server_task.is_none() {
                    // Let running chains and queued alerts finish before exiting
                    let running = engine.sequencer().running();
                    if !running.is_empty() {
                        info!(chains = ?running, "Waiting for running chains");
                    }
                    tokio::select! {
                        _ = async {
                            engine.sequencer().idle().await;
                            engine.dispatcher().idle().await;
                        } => {}
                        _ = shutdown_signal() => {}
                    }
                } else {
                    shutdown_signal().await;
                }
            }
            _ = shutdown_signal() => {}
        }
    } else {
        if server_task.is_none() {
            warn!("No snapshot source enabled (HTTP API disabled and --stdin not given)");
        }
        shutdown_signal().await;
    }

    info!("Shutting down");
    shutdown_tx.send_replace(true);
    engine.shutdown();

    if let Some(server) = server_task {
        match server.await {
            Ok(result) => result.context("Server error")?,
            Err(e) => error!("Server task failed: {}", e),
        }
    }
    if let Some(eviction) = eviction_task {
        let _ = eviction.await;
    }
    let _ = dispatcher_task.await;

    info!("Shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
