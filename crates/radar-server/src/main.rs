//! # radar-server
//!
//! Presence daemon for the radar presence detection system.
//!
//! This binary provides:
//! - Periodic discovery rounds over the local network and Bluetooth
//! - A read-only REST API with the current presence of every device
//! - OpenAPI documentation via Swagger UI
//! - Structured logging to file and stdout
//!
//! ## Running
//!
//! ```bash
//! # Development
//! RADAR_CONFIG=./config.toml cargo run --package radar-server
//!
//! # Production (needs raw sockets for arp-scan)
//! RADAR_ENV=production ./radar-server
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use radar_core::{Engine, JsonFileStateSink, RadarConfig, RadarError, Scheduler, SystemClock};
use radar_server::state::AppState;
use radar_server::{api, collaborators, logging};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Environment variable overriding the listen address.
const BIND_ENV: &str = "RADAR_BIND";

/// Environment variable naming the configuration file. When set, the file
/// must exist.
const CONFIG_ENV: &str = "RADAR_CONFIG";

fn bind_address() -> SocketAddr {
    std::env::var(BIND_ENV)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)))
}

/// Log a startup failure with its machine-readable code.
fn startup<T>(step: &'static str, result: Result<T, impl Into<RadarError>>) -> anyhow::Result<T> {
    result.map_err(|e| {
        let e: RadarError = e.into();
        error!(error = %e, code = e.error_code(), step, "Startup failed");
        anyhow::Error::new(e).context(step)
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init(logging::is_production())?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting radar-server");

    let config_path = RadarConfig::default_path();
    let config = if std::env::var_os(CONFIG_ENV).is_some() {
        startup("loading configuration", RadarConfig::load(&config_path))?
    } else {
        startup("loading configuration", RadarConfig::load_or_default(&config_path))?
    };
    info!(
        path = %config_path.display(),
        devices = config.devices.len(),
        interval_secs = config.scan.interval().as_secs(),
        "Configuration loaded"
    );

    let sink_path = JsonFileStateSink::default_path();
    let sink = startup("opening state file", JsonFileStateSink::open(&sink_path))?;
    let (collaborators, bluetooth_available) = startup(
        "starting collaborators",
        collaborators::system(Arc::new(sink)).await,
    )?;

    let (engine, issues) = startup(
        "starting presence engine",
        Engine::bootstrap(&config, collaborators, Arc::new(SystemClock)).await,
    )?;
    if !issues.is_empty() {
        warn!(skipped = issues.len(), "Some device entries were not registered");
    }

    let (scheduler, handle) = Scheduler::new(engine);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watch_task = tokio::spawn(
        collaborators::NeighborWatcher::default().run(handle.clone(), shutdown_rx.clone()),
    );
    let scan_task = tokio::spawn(scheduler.run(shutdown_rx));

    let state = AppState::new(handle.subscribe(), config_path, bluetooth_available).shared();
    let app = api::create_router(state);

    let addr = bind_address();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    let _ = shutdown_tx.send(true);
    scan_task.await.context("scheduler task panicked")?;
    watch_task.await.context("neighbour watcher panicked")?;

    Ok(())
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for Ctrl-C");
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
                warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
