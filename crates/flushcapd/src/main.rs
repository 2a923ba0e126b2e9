//! Flush Capacitor daemon - occupancy sensor hub
//!
//! Watches the configured sensors, serves their states over HTTP and a
//! WebSocket changes feed, and optionally re-publishes the feeds of other
//! instances.
//!
//! # Usage
//!
//! ```bash
//! # Demo mode: random sensors L and R
//! flushcapd
//!
//! # GPIO circuits from a device spec
//! flushcapd --listen 0.0.0.0:8080 --sensor-spec /etc/flushcap/circuits.toml
//!
//! # Aggregate two other instances
//! flushcapd --forward upstairs.local:8080 --forward downstairs.local:8080
//!
//! # Enable debug logging
//! RUST_LOG=flushcapd=debug flushcapd
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Graceful shutdown

use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use flushcap_core::Sensor;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use flushcap_sensors::{demo_sensors, sensors_from_spec_file};
use flushcapd::config::{Cli, DaemonConfig, SensorSource};
use flushcapd::hub::spawn_hub;
use flushcapd::server::Server;

fn main() -> Result<()> {
    let cli = Cli::parse();
    run_daemon(cli)
}

/// Runs the daemon (async entry point).
#[tokio::main]
async fn run_daemon(cli: Cli) -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("flushcapd=info".parse()?)
                .add_directive("flushcap_sensors=info".parse()?),
        )
        .init();

    let config = DaemonConfig::load(cli).context("Failed to load configuration")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        listen = %config.server.listen,
        "Flush Capacitor daemon starting"
    );

    let sensors: Vec<Arc<dyn Sensor>> = match &config.sensors {
        SensorSource::Spec(path) => sensors_from_spec_file(path)
            .await
            .with_context(|| format!("Failed to set up sensors from {}", path.display()))?,
        SensorSource::Demo => {
            info!("No sensor spec given, running random demo sensors");
            demo_sensors()
        }
        SensorSource::None => Vec::new(),
    };

    let server = Arc::new(Server::new(config.server, spawn_hub()));

    // Setup signal handlers
    let signalled = Arc::clone(&server);
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        if let Err(e) = signalled.terminate().await {
            warn!(error = %e, "Failed to terminate server");
        }
    });

    match server.register_sensors(&sensors).await {
        Ok(true) => {}
        Ok(false) => {
            // Shutdown was requested before the listener started
            close_sensors(&sensors).await;
            info!("Flush Capacitor daemon stopped");
            return Ok(());
        }
        Err(e) => {
            if let Err(term_err) = server.terminate().await {
                warn!(error = %term_err, "Failed to terminate server");
            }
            close_sensors(&sensors).await;
            return Err(e).context("Failed to register sensors");
        }
    }

    let result = server.run().await;

    close_sensors(&sensors).await;

    result.context("Server error")?;
    info!("Flush Capacitor daemon stopped");
    Ok(())
}

async fn close_sensors(sensors: &[Arc<dyn Sensor>]) {
    for sensor in sensors {
        if let Err(e) = sensor.close().await {
            warn!(sensor = %sensor.name(), error = %e, "Failed to close sensor");
        }
    }
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
